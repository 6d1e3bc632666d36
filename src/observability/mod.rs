//! Structured tracing and dispatch metrics.
//!
//! Events are emitted through `tracing`; install a subscriber with
//! [`init_tracing`] (feature `subscriber`) or bring your own.

mod metrics;
mod spans;

pub use metrics::{Counter, HookMetrics, Histogram, MetricsSummary};
pub use spans::{dispatch_span, handler_span, registry_span};

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`, falling back
/// to `default_filter`. Returns false if a subscriber was already set.
#[cfg(feature = "subscriber")]
pub fn init_tracing(default_filter: &str) -> bool {
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

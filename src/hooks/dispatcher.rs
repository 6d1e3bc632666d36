//! Sequential hook dispatch over a registry snapshot.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::time::timeout;
use tracing::{Instrument, debug, info, warn};

use super::{HookContext, HookName, HookResult};
use crate::config::Settings;
use crate::observability::{HookMetrics, MetricsSummary, dispatch_span, handler_span};
use crate::plugins::{ActiveHandler, PluginRegistry};

#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Per-handler budget. `None` waits indefinitely.
    pub handler_timeout: Option<Duration>,
}

impl DispatchOptions {
    pub fn with_handler_timeout(mut self, limit: Duration) -> Self {
        self.handler_timeout = Some(limit);
        self
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            handler_timeout: settings.hook_timeout(),
        }
    }
}

/// One handler's result within a dispatch.
#[derive(Debug, Clone)]
pub struct PluginHookResult {
    pub plugin: String,
    pub result: HookResult,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub hook: HookName,
    /// Results in invocation order.
    pub results: Vec<PluginHookResult>,
    /// False if any result failed without being recoverable, or the
    /// dispatch was cancelled.
    pub aggregate_success: bool,
    /// Plugin whose result requested `stop_propagation`.
    pub stopped_by: Option<String>,
    /// Plugin whose failure aborted a critical hook.
    pub aborted_by: Option<String>,
    pub cancelled: bool,
    /// Registry version the handler set was taken from.
    pub registry_version: u64,
}

impl DispatchOutcome {
    pub fn result_for(&self, plugin: &str) -> Option<&HookResult> {
        self.results
            .iter()
            .find(|r| r.plugin == plugin)
            .map(|r| &r.result)
    }

    pub fn invoked(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.plugin.as_str()).collect()
    }

    /// True when the caller must not continue the workflow stage.
    pub fn is_blocking(&self) -> bool {
        self.aborted_by.is_some() || self.cancelled
    }

    /// Converts a blocking outcome into an error.
    pub fn into_result(self) -> crate::Result<Self> {
        if self.cancelled {
            return Err(crate::Error::Cancelled { hook: self.hook });
        }
        let Some(plugin) = self.aborted_by.clone() else {
            return Ok(self);
        };
        let failed = self.result_for(&plugin).cloned().unwrap_or_default();
        if failed.is_timeout() {
            return Err(crate::Error::HookTimeout {
                hook: self.hook,
                plugin,
            });
        }
        Err(crate::Error::HookFailed {
            hook: self.hook,
            plugin,
            message: failed.error.unwrap_or_else(|| "handler reported failure".into()),
        })
    }
}

/// Runs the active handlers for a hook, one at a time, against one context.
#[derive(Clone)]
pub struct HookDispatcher {
    registry: Arc<PluginRegistry>,
    options: DispatchOptions,
    metrics: Arc<HookMetrics>,
}

impl HookDispatcher {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            options: DispatchOptions::default(),
            metrics: Arc::new(HookMetrics::new()),
        }
    }

    /// Dispatcher whose options come from the registry's settings.
    pub async fn configured(registry: Arc<PluginRegistry>) -> Self {
        let options = DispatchOptions::from_settings(&registry.settings().await);
        Self::new(registry).with_options(options)
    }

    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    pub async fn dispatch(&self, hook: HookName, ctx: &mut HookContext) -> DispatchOutcome {
        self.dispatch_with_observer(hook, ctx, |_| {}).await
    }

    /// Like [`dispatch`](Self::dispatch) for a hook given by name.
    pub async fn dispatch_named(
        &self,
        hook: &str,
        ctx: &mut HookContext,
    ) -> crate::Result<DispatchOutcome> {
        let hook: HookName = hook.parse()?;
        Ok(self.dispatch(hook, ctx).await)
    }

    /// Dispatches `hook`, calling `observer` after each handler completes.
    pub async fn dispatch_with_observer<F>(
        &self,
        hook: HookName,
        ctx: &mut HookContext,
        mut observer: F,
    ) -> DispatchOutcome
    where
        F: FnMut(&PluginHookResult),
    {
        let (registry_version, handlers) = self.registry.active_handlers(hook).await;
        let span = dispatch_span(hook, &ctx.session_id, handlers.len());
        self.metrics.dispatches.inc();

        async move {
            let mut outcome = DispatchOutcome {
                hook,
                results: Vec::with_capacity(handlers.len()),
                aggregate_success: true,
                stopped_by: None,
                aborted_by: None,
                cancelled: false,
                registry_version,
            };

            for active in &handlers {
                if ctx.is_cancelled() {
                    info!(hook = %hook, remaining = handlers.len() - outcome.results.len(), "Dispatch cancelled");
                    self.metrics.cancellations.inc();
                    outcome.cancelled = true;
                    break;
                }

                let started = Instant::now();
                let result = self
                    .invoke(hook, active, ctx)
                    .instrument(handler_span(hook, &active.plugin))
                    .await;
                let elapsed = started.elapsed();
                self.metrics
                    .record_invocation(elapsed, result.success, result.is_timeout());

                if let Some(data) = &result.data {
                    ctx.merge_data(&active.plugin, data);
                }

                let entry = PluginHookResult {
                    plugin: active.plugin.clone(),
                    result,
                    elapsed,
                };
                observer(&entry);

                let counts = entry.result.counts_as_success();
                let stop = entry.result.stop_propagation;
                if !entry.result.success {
                    warn!(
                        hook = %hook,
                        plugin = %entry.plugin,
                        error = entry.result.error.as_deref().unwrap_or(""),
                        recoverable = entry.result.recoverable,
                        "Hook handler failed"
                    );
                }
                outcome.aggregate_success &= counts;
                let plugin = entry.plugin.clone();
                outcome.results.push(entry);

                if !counts && hook.is_critical() {
                    warn!(hook = %hook, plugin = %plugin, "Critical hook failed, aborting dispatch");
                    self.metrics.aborts.inc();
                    outcome.aborted_by = Some(plugin);
                    break;
                }
                if stop {
                    debug!(hook = %hook, plugin = %plugin, "Propagation stopped");
                    outcome.stopped_by = Some(plugin);
                    break;
                }
            }

            if outcome.cancelled {
                outcome.aggregate_success = false;
            }
            debug!(
                hook = %hook,
                invoked = outcome.results.len(),
                success = outcome.aggregate_success,
                "Dispatch finished"
            );
            outcome
        }
        .instrument(span)
        .await
    }

    async fn invoke(&self, hook: HookName, active: &ActiveHandler, ctx: &HookContext) -> HookResult {
        let call = AssertUnwindSafe(active.handler.handle(ctx, active.config.as_ref())).catch_unwind();

        let outcome = match self.options.handler_timeout {
            Some(limit) => match timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        hook = %hook,
                        plugin = %active.plugin,
                        timeout_ms = limit.as_millis() as u64,
                        "Hook handler timed out"
                    );
                    return HookResult::timeout();
                }
            },
            None => call.await,
        };

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => HookResult::failure(e.to_string()),
            Err(payload) => HookResult::failure(format!(
                "handler panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }
}

impl std::fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDispatcher")
            .field("options", &self.options)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

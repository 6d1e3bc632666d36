//! Structured spans for dispatch and handler execution.

use tracing::{Level, Span, span};

use crate::hooks::HookName;

/// Span covering one dispatch round.
pub fn dispatch_span(hook: HookName, session_id: &str, handlers: usize) -> Span {
    span!(
        Level::INFO,
        "hook.dispatch",
        hook = %hook,
        session_id = session_id,
        handlers = handlers,
    )
}

/// Span covering a single handler invocation.
pub fn handler_span(hook: HookName, plugin: &str) -> Span {
    span!(
        Level::DEBUG,
        "hook.handler",
        hook = %hook,
        plugin = plugin,
    )
}

/// Span covering a registry mutation.
pub fn registry_span(operation: &'static str, plugin: &str) -> Span {
    span!(
        Level::INFO,
        "plugin.registry",
        operation = operation,
        plugin = plugin,
    )
}

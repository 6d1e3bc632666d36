//! Lifecycle hooks: names, context, handlers and dispatch.

mod dispatcher;
mod event;
mod handler;

pub use dispatcher::{DispatchOptions, DispatchOutcome, HookDispatcher, PluginHookResult};
pub use event::{HookContext, HookName, HookResult};
pub use handler::{FnHandler, HookHandler};

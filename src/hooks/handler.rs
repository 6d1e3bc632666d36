//! Handler trait and closure adapter.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use super::{HookContext, HookResult};

/// A callable bound to a declared hook at plugin load time.
///
/// # Example
///
/// ```rust
/// use orchestrator_core::hooks::{HookContext, HookHandler, HookResult};
/// use async_trait::async_trait;
/// use serde_json::{Value, json};
///
/// struct EnhancePlan;
///
/// #[async_trait]
/// impl HookHandler for EnhancePlan {
///     async fn handle(&self, ctx: &HookContext, _config: &Value)
///         -> orchestrator_core::Result<HookResult>
///     {
///         Ok(HookResult::ok_with(json!({ "planHint": format!("use FastAPI for {}", ctx.task) })))
///     }
/// }
/// ```
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Runs the handler. `config` is the owning plugin's effective config.
    ///
    /// Returning `Err` is reported as a failed `HookResult`.
    async fn handle(&self, ctx: &HookContext, config: &Value) -> crate::Result<HookResult>;
}

type BoxedHandlerFn =
    Arc<dyn Fn(HookContext, Value) -> BoxFuture<'static, crate::Result<HookResult>> + Send + Sync>;

/// Closure-based handler. The closure receives owned copies of the
/// context and config so the future can be `'static`.
#[derive(Clone)]
pub struct FnHandler {
    handler: BoxedHandlerFn,
}

impl FnHandler {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(HookContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::Result<HookResult>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |ctx, config| Box::pin(handler(ctx, config))),
        }
    }

    /// Wraps a synchronous closure.
    pub fn sync<F>(handler: F) -> Self
    where
        F: Fn(&HookContext, &Value) -> crate::Result<HookResult> + Send + Sync + 'static,
    {
        Self::new(move |ctx, config| {
            let result = handler(&ctx, &config);
            async move { result }
        })
    }

    pub fn into_arc(self) -> Arc<dyn HookHandler> {
        Arc::new(self)
    }
}

#[async_trait]
impl HookHandler for FnHandler {
    async fn handle(&self, ctx: &HookContext, config: &Value) -> crate::Result<HookResult> {
        (self.handler)(ctx.clone(), config.clone()).await
    }
}

impl std::fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").field("handler", &"<closure>").finish()
    }
}

//! # orchestrator-core
//!
//! Plugin manifests and hook dispatch for an AI coding workflow
//! orchestrator (plan → execute → audit → recover → test → commit).
//!
//! Plugins are described by a `plugin.json` manifest, backed by a module
//! the host registers with a [`ModuleCatalog`], and invoked at fixed
//! lifecycle points by a [`HookDispatcher`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use orchestrator_core::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> orchestrator_core::Result<()> {
//!     let catalog = Arc::new(ModuleCatalog::new().with_module(
//!         "fast_api",
//!         ExportTable::new()
//!             .with_export_fn("enhancePlanForFastAPI", |_ctx, _config| async {
//!                 Ok(HookResult::ok_with(json!({ "framework": "fastapi" })))
//!             })
//!             .into_module(),
//!     ));
//!
//!     let registry = Arc::new(PluginRegistry::new(catalog).with_project_root("."));
//!     registry.load_plugin("plugins/fast-api").await?;
//!
//!     let dispatcher = HookDispatcher::new(registry);
//!     let mut ctx = HookContext::new("s1").with_task("add auth").with_phase("plan");
//!     let outcome = dispatcher.dispatch(HookName::BeforePlan, &mut ctx).await.into_result()?;
//!     println!("{} handler(s) ran", outcome.results.len());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod hooks;
pub mod observability;
pub mod plugins;
pub mod prelude;

pub use config::{ConfigError, PluginSettings, Settings, SettingsLoader};
pub use hooks::{
    DispatchOptions, DispatchOutcome, FnHandler, HookContext, HookDispatcher, HookHandler,
    HookName, HookResult, PluginHookResult,
};
pub use observability::{HookMetrics, MetricsSummary};
pub use plugins::{
    Detection, DetectionEngine, EnablementSource, ExportTable, LoadReport, ModuleCatalog,
    ModuleResolver, PluginError, PluginInfo, PluginManifest, PluginModule, PluginRegistry,
    RegistryStats, load_manifest,
};

/// Error type for orchestrator-core operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Manifest, dependency or lifecycle failure.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Name is not one of the lifecycle hooks.
    #[error("Unknown hook '{0}'")]
    UnknownHook(String),

    /// A handler failed while running.
    #[error("Handler execution failed: {0}")]
    HandlerExecution(String),

    /// A critical hook handler failed.
    #[error("Hook '{hook}' failed in plugin '{plugin}': {message}")]
    HookFailed {
        hook: HookName,
        plugin: String,
        message: String,
    },

    /// A critical hook handler exceeded its time budget.
    #[error("Hook '{hook}' timed out in plugin '{plugin}'")]
    HookTimeout { hook: HookName, plugin: String },

    /// Dispatch stopped by its cancellation token.
    #[error("Dispatch of '{hook}' was cancelled")]
    Cancelled { hook: HookName },
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Manifests, settings and unknown hook names
    Configuration,
    /// Registry lifecycle conflicts (duplicates, dependencies, unload)
    Lifecycle,
    /// Critical hook failures the workflow must stop on
    Blocking,
    /// Failures raised by plugin code
    Execution,
    /// Internal errors (IO, JSON)
    Internal,
}

impl Error {
    pub fn handler(message: impl Into<String>) -> Self {
        Error::HandlerExecution(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Plugin(e) if e.is_manifest_error() => ErrorCategory::Configuration,
            Error::Plugin(PluginError::Io(_) | PluginError::Json(_)) => ErrorCategory::Internal,
            Error::Plugin(PluginError::ModuleLoad { .. }) => ErrorCategory::Execution,
            Error::Plugin(_) => ErrorCategory::Lifecycle,

            Error::Config(_) | Error::UnknownHook(_) => ErrorCategory::Configuration,

            Error::HookFailed { .. } | Error::HookTimeout { .. } | Error::Cancelled { .. } => {
                ErrorCategory::Blocking
            }

            Error::HandlerExecution(_) => ErrorCategory::Execution,

            Error::Io(_) | Error::Json(_) => ErrorCategory::Internal,
        }
    }

    /// True for errors that must stop the current workflow stage.
    pub fn is_blocking(&self) -> bool {
        self.category() == ErrorCategory::Blocking
    }

    pub fn is_configuration_error(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::InvalidValue { key, message } => {
                Error::Config(format!("Invalid value for {}: {}", key, message))
            }
            config::ConfigError::Serialization(e) => Error::Json(e),
            config::ConfigError::Io(e) => Error::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::HookFailed {
            hook: HookName::BeforeCommit,
            plugin: "secrets".into(),
            message: "token found".into(),
        };
        assert_eq!(
            err.to_string(),
            "Hook 'before-commit' failed in plugin 'secrets': token found"
        );

        let err = Error::HookTimeout {
            hook: HookName::BeforeTest,
            plugin: "slow".into(),
        };
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_error_category() {
        let err: Error = PluginError::Duplicate { name: "a".into() }.into();
        assert_eq!(err.category(), ErrorCategory::Lifecycle);

        let err: Error = PluginError::InvalidName {
            name: "Bad".into(),
            reason: "uppercase".into(),
        }
        .into();
        assert!(err.is_configuration_error());

        let err = Error::Cancelled {
            hook: HookName::AfterPlan,
        };
        assert!(err.is_blocking());

        assert_eq!(Error::handler("x").category(), ErrorCategory::Execution);
    }

    #[test]
    fn test_config_error_conversion() {
        let config_err = config::ConfigError::InvalidValue {
            key: "hookTimeoutMs".to_string(),
            message: "negative".to_string(),
        };
        let err: Error = config_err.into();
        assert!(matches!(err, Error::Config(_)));
    }
}

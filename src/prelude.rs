//! Prelude module for convenient imports.
//!
//! # Usage
//!
//! ```rust
//! use orchestrator_core::prelude::*;
//! ```

// Core types
pub use crate::Error;
pub use crate::Result;

// Hooks
pub use crate::hooks::{
    DispatchOptions, DispatchOutcome, FnHandler, HookContext, HookDispatcher, HookHandler,
    HookName, HookResult,
};

// Plugins
pub use crate::plugins::{
    Detection, ExportTable, ModuleCatalog, ModuleResolver, PluginError, PluginInfo,
    PluginManifest, PluginModule, PluginRegistry,
};

// Configuration
pub use crate::config::{Settings, SettingsLoader};

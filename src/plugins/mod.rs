//! Plugin manifests, modules and the registry that owns their lifecycle.
//!
//! A plugin is a directory with a `plugin.json` manifest naming a module
//! (`main`) and the hooks it handles:
//!
//! ```text
//! plugins/
//! └── fast-api/
//!     └── plugin.json
//! ```
//!
//! ```json
//! {
//!   "name": "fast-api",
//!   "version": "1.0.0",
//!   "main": "fast_api",
//!   "hooks": { "before-plan": "enhancePlanForFastAPI" },
//!   "detect": { "files": ["requirements.txt"], "contains": ["fastapi"] }
//! }
//! ```
//!
//! Modules are capability tables registered with a [`ModuleResolver`];
//! every declared hook is bound to its export once, at load time.

mod detection;
mod discovery;
mod error;
mod graph;
mod manifest;
mod module;
mod registry;

pub use detection::DetectionEngine;
pub use discovery::{DiscoveredPlugin, PluginDiscovery};
pub use error::PluginError;
pub use manifest::{
    Detection, PLUGIN_MANIFEST_FILE, PluginAuthor, PluginManifest, load_manifest, validate,
};
pub use module::{ExportTable, ModuleCatalog, ModuleResolver, PluginModule};
pub use registry::{EnablementSource, LoadReport, PluginInfo, PluginRegistry, RegistryStats};

pub(crate) use registry::ActiveHandler;

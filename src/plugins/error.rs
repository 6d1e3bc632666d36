use std::path::PathBuf;

use crate::hooks::HookName;

/// Failures of manifest loading and registry lifecycle operations.
///
/// Every variant is returned before the registry is mutated.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Plugin manifest not found: {path}")]
    ManifestNotFound { path: PathBuf },

    #[error("Invalid plugin manifest at {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error("Invalid plugin name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Plugin '{name}' is already loaded")]
    Duplicate { name: String },

    #[error("Plugin '{plugin}' depends on '{dependency}', which is not loaded")]
    MissingDependency { plugin: String, dependency: String },

    #[error("Circular dependency detected among plugins: {}", cycle.join(", "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Module '{main}' for plugin '{plugin}' could not be resolved")]
    ModuleNotFound { plugin: String, main: String },

    #[error("Plugin '{plugin}' declares hook '{hook}' -> '{export}', but the module has no such export")]
    HandlerResolution {
        plugin: String,
        hook: HookName,
        export: String,
    },

    #[error("Plugin '{plugin}' failed to initialize: {message}")]
    ModuleLoad { plugin: String, message: String },

    #[error("Cannot unload '{name}': required by {}", dependents.join(", "))]
    UnloadBlocked {
        name: String,
        dependents: Vec<String>,
    },

    #[error("Plugin '{name}' is not loaded")]
    NotFound { name: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PluginError {
    pub(crate) fn manifest(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for the manifest-shape failures (missing, malformed, invalid name).
    pub fn is_manifest_error(&self) -> bool {
        matches!(
            self,
            Self::ManifestNotFound { .. } | Self::Manifest { .. } | Self::InvalidName { .. }
        )
    }
}

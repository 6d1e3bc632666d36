//! Layered settings for the plugin host.
//!
//! ```rust,no_run
//! use orchestrator_core::config::SettingsLoader;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = SettingsLoader::load_merged(std::path::Path::new(".")).await?;
//! println!("{:?}", settings.pin("fast-api"));
//! # Ok(())
//! # }
//! ```

pub mod settings;

pub use settings::{PluginSettings, Settings, SettingsLoader, SettingsSource};

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur in configuration operations
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// The key with invalid value
        key: String,
        /// Error message
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Deep-merges `overlay` into `base`. Objects merge key by key; any other
/// overlay value replaces what was there.
pub fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

//! Orchestrator settings.json with hierarchical loading.
//!
//! Loads settings from (lowest to highest priority):
//! 1. User settings: ~/.orchestrator/settings.json
//! 2. Project settings: .orchestrator/settings.json
//! 3. Local settings: .orchestrator/settings.local.json (not committed)
//!
//! ```json
//! {
//!   "plugins": {
//!     "fast-api": { "enabled": true, "config": { "strict": false } }
//!   },
//!   "pluginDirs": ["./plugins"],
//!   "hookTimeoutMs": 30000
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ConfigResult, merge_json};

pub const SETTINGS_DIR: &str = ".orchestrator";
pub const SETTINGS_FILE: &str = "settings.json";
pub const LOCAL_SETTINGS_FILE: &str = "settings.local.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsSource {
    #[default]
    User,
    Project,
    Local,
}

/// Per-plugin overrides. A present `enabled` is a pinned preference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

impl PluginSettings {
    pub fn pinned(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            config: None,
        }
    }

    fn merge(&mut self, other: PluginSettings) {
        if other.enabled.is_some() {
            self.enabled = other.enabled;
        }
        match (&mut self.config, other.config) {
            (Some(base), Some(overlay)) => merge_json(base, &overlay),
            (slot @ None, Some(overlay)) => *slot = Some(overlay),
            (_, None) => {}
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(skip)]
    pub source: SettingsSource,

    #[serde(default)]
    pub plugins: BTreeMap<String, PluginSettings>,

    #[serde(default, rename = "pluginDirs", skip_serializing_if = "Vec::is_empty")]
    pub plugin_dirs: Vec<PathBuf>,

    #[serde(default, rename = "hookTimeoutMs", skip_serializing_if = "Option::is_none")]
    pub hook_timeout_ms: Option<u64>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Settings {
    pub fn with_source(mut self, source: SettingsSource) -> Self {
        self.source = source;
        self
    }

    pub fn plugin(&self, name: &str) -> Option<&PluginSettings> {
        self.plugins.get(name)
    }

    /// The pinned enable/disable preference for `name`, if any.
    pub fn pin(&self, name: &str) -> Option<bool> {
        self.plugins.get(name).and_then(|p| p.enabled)
    }

    pub fn set_pin(&mut self, name: impl Into<String>, enabled: bool) {
        self.plugins.entry(name.into()).or_default().enabled = Some(enabled);
    }

    pub fn hook_timeout(&self) -> Option<Duration> {
        self.hook_timeout_ms.map(Duration::from_millis)
    }

    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Writes pretty JSON, creating parent directories as needed.
    pub async fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Project settings file for `project_dir`.
    pub fn project_path(project_dir: &Path) -> PathBuf {
        project_dir.join(SETTINGS_DIR).join(SETTINGS_FILE)
    }

    /// Local (uncommitted) settings file for `project_dir`.
    pub fn local_path(project_dir: &Path) -> PathBuf {
        project_dir.join(SETTINGS_DIR).join(LOCAL_SETTINGS_FILE)
    }
}

/// Settings loader that merges from multiple sources.
#[derive(Debug, Default)]
pub struct SettingsLoader {
    settings: Settings,
    user_dir: Option<PathBuf>,
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the directory user settings are read from
    /// (default `~/.orchestrator`).
    pub fn with_user_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_dir = Some(dir.into());
        self
    }

    fn user_settings_path(&self) -> Option<PathBuf> {
        match &self.user_dir {
            Some(dir) => Some(dir.join(SETTINGS_FILE)),
            None => directories::UserDirs::new()
                .map(|d| d.home_dir().join(SETTINGS_DIR).join(SETTINGS_FILE)),
        }
    }

    /// Load settings from all sources for a project.
    /// Priority (lowest to highest): User → Project → Local
    pub async fn load(&mut self, project_dir: &Path) -> ConfigResult<&Settings> {
        if let Some(user_settings) = self.user_settings_path()
            && user_settings.exists()
        {
            self.merge_file(&user_settings, SettingsSource::User)
                .await?;
        }

        let project_settings = Settings::project_path(project_dir);
        if project_settings.exists() {
            self.merge_file(&project_settings, SettingsSource::Project)
                .await?;
        }

        let local_settings = Settings::local_path(project_dir);
        if local_settings.exists() {
            self.merge_file(&local_settings, SettingsSource::Local)
                .await?;
        }

        Ok(&self.settings)
    }

    async fn merge_file(&mut self, path: &Path, source: SettingsSource) -> ConfigResult<()> {
        let file_settings = Settings::load(path).await?.with_source(source.clone());
        tracing::debug!(path = %path.display(), ?source, "Merging settings file");
        self.merge_settings(file_settings);
        Ok(())
    }

    fn merge_settings(&mut self, other: Settings) {
        for (name, plugin) in other.plugins {
            self.settings.plugins.entry(name).or_default().merge(plugin);
        }

        for dir in other.plugin_dirs {
            if !self.settings.plugin_dirs.contains(&dir) {
                self.settings.plugin_dirs.push(dir);
            }
        }

        if other.hook_timeout_ms.is_some() {
            self.settings.hook_timeout_ms = other.hook_timeout_ms;
        }

        self.settings.extra.extend(other.extra);
        self.settings.source = other.source;
    }

    pub async fn load_merged(project_dir: &Path) -> ConfigResult<Settings> {
        let mut loader = Self::new();
        loader.load(project_dir).await?;
        Ok(loader.settings)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn into_settings(self) -> Settings {
        self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    async fn write(path: PathBuf, value: Value) {
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(path, value.to_string()).await.unwrap();
    }

    #[test]
    fn test_settings_parse() {
        let settings: Settings = serde_json::from_value(json!({
            "plugins": {
                "fast-api": {"enabled": false, "config": {"strict": true}},
                "lint": {"config": {"level": 2}}
            },
            "pluginDirs": ["./plugins"],
            "hookTimeoutMs": 1500,
            "theme": "dark"
        }))
        .unwrap();

        assert_eq!(settings.pin("fast-api"), Some(false));
        assert_eq!(settings.pin("lint"), None);
        assert_eq!(settings.pin("missing"), None);
        assert_eq!(settings.hook_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(settings.plugin_dirs, vec![PathBuf::from("./plugins")]);
        assert_eq!(settings.extra.get("theme"), Some(&json!("dark")));
    }

    #[tokio::test]
    async fn test_hierarchical_merge() {
        let user = tempdir().unwrap();
        let project = tempdir().unwrap();

        write(
            user.path().join(SETTINGS_FILE),
            json!({
                "plugins": {"fast-api": {"enabled": false, "config": {"a": 1, "nested": {"x": 1}}}},
                "hookTimeoutMs": 100
            }),
        )
        .await;
        write(
            Settings::project_path(project.path()),
            json!({
                "plugins": {"fast-api": {"config": {"nested": {"y": 2}}}},
                "pluginDirs": ["plugins"]
            }),
        )
        .await;
        write(
            Settings::local_path(project.path()),
            json!({
                "plugins": {"fast-api": {"enabled": true}},
                "hookTimeoutMs": 250
            }),
        )
        .await;

        let mut loader = SettingsLoader::new().with_user_dir(user.path());
        let settings = loader.load(project.path()).await.unwrap();

        assert_eq!(settings.pin("fast-api"), Some(true));
        assert_eq!(
            settings.plugin("fast-api").unwrap().config,
            Some(json!({"a": 1, "nested": {"x": 1, "y": 2}}))
        );
        assert_eq!(settings.hook_timeout_ms, Some(250));
        assert_eq!(settings.plugin_dirs, vec![PathBuf::from("plugins")]);
        assert_eq!(settings.source, SettingsSource::Local);
    }

    #[tokio::test]
    async fn test_missing_files_yield_defaults() {
        let user = tempdir().unwrap();
        let project = tempdir().unwrap();
        let mut loader = SettingsLoader::new().with_user_dir(user.path());
        let settings = loader.load(project.path()).await.unwrap();
        assert!(settings.plugins.is_empty());
        assert!(settings.hook_timeout().is_none());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = Settings::project_path(dir.path());

        let mut settings = Settings::default();
        settings.set_pin("fast-api", true);
        settings.save(&path).await.unwrap();

        let loaded = Settings::load(&path).await.unwrap();
        assert_eq!(loaded.pin("fast-api"), Some(true));
        assert_eq!(loaded.plugins["fast-api"], PluginSettings::pinned(true));
    }

    #[tokio::test]
    async fn test_invalid_json_is_error() {
        let dir = tempdir().unwrap();
        let path = Settings::project_path(dir.path());
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, "{ nope").await.unwrap();

        let err = Settings::load(&path).await.unwrap_err();
        assert!(matches!(err, super::super::ConfigError::Serialization(_)));
    }
}

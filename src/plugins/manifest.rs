use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::PluginError;
use crate::hooks::HookName;

pub const PLUGIN_MANIFEST_FILE: &str = "plugin.json";

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]+(?:[-_.][a-z0-9]+)*$").expect("valid name regex"))
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?$")
            .expect("valid version regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "AuthorRepr")]
pub struct PluginAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AuthorRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
}

impl From<AuthorRepr> for PluginAuthor {
    fn from(repr: AuthorRepr) -> Self {
        match repr {
            AuthorRepr::Name(name) => Self {
                name,
                email: None,
                url: None,
            },
            AuthorRepr::Full { name, email, url } => Self { name, email, url },
        }
    }
}

/// Auto-activation predicate evaluated against a project root.
///
/// ```json
/// { "files": ["requirements*.txt", "pyproject.toml"], "contains": ["fastapi"] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    /// Glob patterns, relative to the root, of files to scan for tokens.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Tokens searched (ASCII case-insensitive) in the `files`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contains: Vec<String>,
    /// Glob patterns whose mere existence activates the plugin.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exists: Vec<String>,
}

impl Detection {
    pub fn file_contains(file: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            files: vec![file.into()],
            contains: vec![token.into()],
            exists: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.exists.is_empty() && (self.files.is_empty() || self.contains.is_empty())
    }
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<PluginAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Module reference resolved by the registry's `ModuleResolver`.
    pub main: String,
    /// Hook name to exported handler name.
    pub hooks: BTreeMap<HookName, String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "empty_object")]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detect: Option<Detection>,
}

impl PluginManifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>, main: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: None,
            license: None,
            main: main.into(),
            hooks: BTreeMap::new(),
            dependencies: Vec::new(),
            config: empty_object(),
            detect: None,
        }
    }

    pub fn hook(mut self, hook: HookName, export: impl Into<String>) -> Self {
        self.hooks.insert(hook, export.into());
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_detection(mut self, detect: Detection) -> Self {
        self.detect = Some(detect);
        self
    }

    /// Reads `path` (a manifest file, or a directory holding `plugin.json`)
    /// and validates it.
    pub fn load(path: &Path) -> Result<Self, PluginError> {
        let manifest_path = manifest_path(path);
        if !manifest_path.is_file() {
            return Err(PluginError::ManifestNotFound {
                path: manifest_path,
            });
        }
        let content = std::fs::read_to_string(&manifest_path)?;
        let manifest: Self = serde_json::from_str(&content)
            .map_err(|e| PluginError::manifest(&manifest_path, e.to_string()))?;
        manifest.validate_at(&manifest_path)?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), PluginError> {
        self.validate_at(Path::new(&self.name))
    }

    fn validate_at(&self, path: &Path) -> Result<(), PluginError> {
        if !name_regex().is_match(&self.name) {
            return Err(PluginError::InvalidName {
                name: self.name.clone(),
                reason: "must be lowercase alphanumerics separated by '-', '_' or '.'".into(),
            });
        }
        if !version_regex().is_match(&self.version) {
            return Err(PluginError::manifest(
                path,
                format!("version '{}' is not a semantic version", self.version),
            ));
        }
        if self.main.trim().is_empty() {
            return Err(PluginError::manifest(path, "'main' must not be empty"));
        }
        if let Some((hook, _)) = self.hooks.iter().find(|(_, export)| export.trim().is_empty()) {
            return Err(PluginError::manifest(
                path,
                format!("hook '{}' has an empty handler name", hook),
            ));
        }

        let mut seen = HashSet::new();
        for dep in &self.dependencies {
            if dep == &self.name {
                return Err(PluginError::manifest(path, "plugin depends on itself"));
            }
            if !seen.insert(dep.as_str()) {
                return Err(PluginError::manifest(
                    path,
                    format!("dependency '{}' listed twice", dep),
                ));
            }
        }
        Ok(())
    }
}

/// Loads and validates a manifest from a file or plugin directory.
pub fn load_manifest(path: impl AsRef<Path>) -> Result<PluginManifest, PluginError> {
    PluginManifest::load(path.as_ref())
}

pub fn validate(manifest: &PluginManifest) -> Result<(), PluginError> {
    manifest.validate()
}

pub(crate) fn manifest_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(PLUGIN_MANIFEST_FILE)
    } else {
        path.to_path_buf()
    }
}

/// Directory that module references are resolved against.
pub(crate) fn base_dir(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent().map(Path::to_path_buf).unwrap_or_default()
    }
}

//! Auto-activation of plugins from project contents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use super::Detection;

/// Evaluates detection predicates, caching each result per
/// (project root, plugin).
///
/// Globbing and file reads run on tokio's blocking pool.
#[derive(Debug, Clone, Default)]
pub struct DetectionEngine {
    cache: Arc<DashMap<(PathBuf, String), bool>>,
}

impl DetectionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates `detection` for `plugin` against `root`, at most once per
    /// (root, plugin) until invalidated.
    pub async fn evaluate(&self, root: &Path, plugin: &str, detection: &Detection) -> bool {
        if let Some(cached) = self.cached(root, plugin) {
            return cached;
        }

        let task_root = root.to_path_buf();
        let task_detection = detection.clone();
        let active = match tokio::task::spawn_blocking(move || {
            Self::matches(&task_root, &task_detection)
        })
        .await
        {
            Ok(active) => active,
            Err(e) => {
                warn!(plugin, error = %e, "Detection task failed");
                return false;
            }
        };
        debug!(plugin, root = %root.display(), active, "Detection evaluated");
        self.cache
            .insert((root.to_path_buf(), plugin.to_string()), active);
        active
    }

    pub fn cached(&self, root: &Path, plugin: &str) -> Option<bool> {
        self.cache
            .get(&(root.to_path_buf(), plugin.to_string()))
            .map(|entry| *entry)
    }

    /// Drops cached results for `root`, e.g. after its dependency files change.
    pub fn invalidate(&self, root: &Path) {
        self.cache.retain(|(cached_root, _), _| cached_root != root);
    }

    pub fn forget_plugin(&self, plugin: &str) {
        self.cache.retain(|(_, name), _| name != plugin);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn matches(root: &Path, detection: &Detection) -> bool {
        if detection
            .exists
            .iter()
            .any(|pattern| !Self::expand(root, pattern).is_empty())
        {
            return true;
        }

        if detection.contains.is_empty() {
            return false;
        }
        let tokens: Vec<String> = detection
            .contains
            .iter()
            .map(|t| t.to_ascii_lowercase())
            .collect();

        detection
            .files
            .iter()
            .flat_map(|pattern| Self::expand(root, pattern))
            .filter(|path| path.is_file())
            .any(|path| match std::fs::read_to_string(&path) {
                Ok(content) => {
                    let content = content.to_ascii_lowercase();
                    tokens.iter().any(|token| content.contains(token.as_str()))
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping unreadable file");
                    false
                }
            })
    }

    fn expand(root: &Path, pattern: &str) -> Vec<PathBuf> {
        let full = format!(
            "{}/{}",
            glob::Pattern::escape(&root.to_string_lossy()),
            pattern.trim_start_matches("./")
        );
        match glob::glob(&full) {
            Ok(paths) => paths.filter_map(Result::ok).collect(),
            Err(e) => {
                warn!(pattern, error = %e, "Invalid detection pattern");
                Vec::new()
            }
        }
    }
}

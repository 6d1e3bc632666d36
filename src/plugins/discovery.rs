use std::path::{Path, PathBuf};

use super::PluginError;
use super::manifest::{PLUGIN_MANIFEST_FILE, PluginManifest};
use crate::config::settings::SETTINGS_DIR;

/// A manifest found on disk together with the directory it came from.
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub manifest: PluginManifest,
    pub root: PathBuf,
}

impl DiscoveredPlugin {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }
}

pub struct PluginDiscovery;

impl PluginDiscovery {
    /// Returns the default plugins directory: `~/.orchestrator/plugins/`.
    pub fn default_plugins_dir() -> Option<PathBuf> {
        directories::UserDirs::new().map(|d| d.home_dir().join(SETTINGS_DIR).join("plugins"))
    }

    /// Finds plugins in `dirs`. Each entry is either a plugin root itself or
    /// a directory whose immediate children are plugin roots. Children are
    /// visited in name order.
    pub fn discover(dirs: &[PathBuf]) -> Result<Vec<DiscoveredPlugin>, PluginError> {
        let mut found = Vec::new();

        for dir in dirs {
            if !dir.exists() {
                continue;
            }

            if Self::is_plugin_root(dir) {
                let manifest = PluginManifest::load(dir)?;
                found.push(DiscoveredPlugin {
                    manifest,
                    root: dir.clone(),
                });
            } else {
                Self::scan_children(dir, &mut found)?;
            }
        }

        Ok(found)
    }

    fn is_plugin_root(dir: &Path) -> bool {
        dir.join(PLUGIN_MANIFEST_FILE).is_file()
    }

    fn scan_children(parent: &Path, found: &mut Vec<DiscoveredPlugin>) -> Result<(), PluginError> {
        let mut children = Vec::new();
        for entry in std::fs::read_dir(parent)? {
            let path = entry?.path();
            if path.is_dir() && Self::is_plugin_root(&path) {
                children.push(path);
            }
        }
        children.sort();

        for path in children {
            let manifest = PluginManifest::load(&path)?;
            found.push(DiscoveredPlugin {
                manifest,
                root: path,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_plugin(parent: &Path, name: &str) -> PathBuf {
        let plugin_dir = parent.join(name);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join(PLUGIN_MANIFEST_FILE),
            format!(
                r#"{{"name":"{}","version":"1.0.0","main":"{}","hooks":{{"after-plan":"report"}}}}"#,
                name, name
            ),
        )
        .unwrap();
        plugin_dir
    }

    #[test]
    fn test_discover_direct_plugin_root() {
        let dir = tempdir().unwrap();
        let plugin_dir = create_plugin(dir.path(), "my-plugin");

        let found = PluginDiscovery::discover(&[plugin_dir.clone()]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "my-plugin");
        assert_eq!(found[0].root, plugin_dir);
    }

    #[test]
    fn test_discover_parent_directory_sorted() {
        let dir = tempdir().unwrap();
        create_plugin(dir.path(), "plugin-b");
        create_plugin(dir.path(), "plugin-a");
        std::fs::create_dir(dir.path().join("not-a-plugin")).unwrap();

        let found = PluginDiscovery::discover(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<&str> = found.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["plugin-a", "plugin-b"]);
    }

    #[test]
    fn test_discover_nonexistent_dir() {
        let found = PluginDiscovery::discover(&[PathBuf::from("/nonexistent/path")]).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_discover_invalid_manifest_fails() {
        let dir = tempdir().unwrap();
        let bad = dir.path().join("bad");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join(PLUGIN_MANIFEST_FILE), "{").unwrap();

        let err = PluginDiscovery::discover(&[dir.path().to_path_buf()]).unwrap_err();
        assert!(err.is_manifest_error());
    }

    #[test]
    fn test_default_plugins_dir() {
        if let Some(path) = PluginDiscovery::default_plugins_dir() {
            assert!(path.ends_with(".orchestrator/plugins"));
        }
    }
}

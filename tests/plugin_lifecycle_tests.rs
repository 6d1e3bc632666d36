//! Plugin Lifecycle Tests
//!
//! Tests for manifest loading, registry load/unload/enable semantics,
//! detection-driven enablement and persisted pins.
//!
//! Run: cargo nextest run --test plugin_lifecycle_tests

use std::path::{Path, PathBuf};
use std::sync::Arc;

use orchestrator_core::config::{Settings, SettingsLoader};
use orchestrator_core::hooks::{HookName, HookResult};
use orchestrator_core::plugins::{
    EnablementSource, ExportTable, ModuleCatalog, PluginError, PluginManifest, PluginRegistry,
    load_manifest,
};
use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};

fn catalog() -> Arc<ModuleCatalog> {
    let module = ExportTable::new()
        .with_export_fn("enhancePlanForFastAPI", |_, _| async { Ok(HookResult::ok()) })
        .with_export_fn("checkCommit", |_, _| async { Ok(HookResult::ok()) })
        .into_module();
    Arc::new(
        ModuleCatalog::new()
            .with_module("fast_api", module.clone())
            .with_module("base", module.clone())
            .with_module("child", module),
    )
}

fn write_manifest(parent: &Path, dir: &str, manifest: Value) -> PathBuf {
    let root = parent.join(dir);
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("plugin.json"), manifest.to_string()).unwrap();
    root
}

fn fast_api_manifest() -> Value {
    json!({
        "name": "fast-api",
        "version": "1.2.0",
        "description": "FastAPI planning hints",
        "author": "Platform Team",
        "license": "MIT",
        "main": "fast_api",
        "hooks": {"before-plan": "enhancePlanForFastAPI"},
        "config": {"strict": false},
        "detect": {"files": ["requirements.txt", "pyproject.toml"], "contains": ["fastapi"]}
    })
}

fn project_with(file: &str, content: &str) -> TempDir {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join(file), content).unwrap();
    dir
}

// =============================================================================
// Manifest loading
// =============================================================================

mod manifest_tests {
    use super::*;

    #[test]
    fn test_load_manifest_from_dir_and_file() {
        let dir = tempdir().unwrap();
        let root = write_manifest(dir.path(), "fast-api", fast_api_manifest());

        let from_dir = load_manifest(&root).unwrap();
        let from_file = load_manifest(root.join("plugin.json")).unwrap();
        assert_eq!(from_dir, from_file);
        assert_eq!(from_dir.name, "fast-api");
        assert_eq!(from_dir.author.as_ref().unwrap().name, "Platform Team");
        assert_eq!(
            from_dir.hooks.get(&HookName::BeforePlan).map(String::as_str),
            Some("enhancePlanForFastAPI")
        );
    }

    #[test]
    fn test_missing_required_field() {
        let dir = tempdir().unwrap();
        let root = write_manifest(
            dir.path(),
            "broken",
            json!({"name": "broken", "version": "1.0.0", "hooks": {}}),
        );
        let err = load_manifest(&root).unwrap_err();
        assert!(matches!(err, PluginError::Manifest { ref reason, .. } if reason.contains("main")));
    }

    #[test]
    fn test_unknown_hook_name_rejected() {
        let dir = tempdir().unwrap();
        let root = write_manifest(
            dir.path(),
            "deployer",
            json!({
                "name": "deployer",
                "version": "1.0.0",
                "main": "deployer",
                "hooks": {"before-deploy": "run"}
            }),
        );
        assert!(load_manifest(&root).unwrap_err().is_manifest_error());
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempdir().unwrap();
        let err = load_manifest(dir.path()).unwrap_err();
        assert!(matches!(err, PluginError::ManifestNotFound { .. }));
    }
}

// =============================================================================
// Registry lifecycle
// =============================================================================

mod registry_tests {
    use super::*;

    #[tokio::test]
    async fn test_load_then_get_matches_manifest() {
        let dir = tempdir().unwrap();
        let root = write_manifest(dir.path(), "fast-api", fast_api_manifest());
        let expected = load_manifest(&root).unwrap();

        let registry = PluginRegistry::new(catalog());
        registry.load_plugin(&root).await.unwrap();

        let info = registry.get_plugin("fast-api").await.unwrap();
        assert!(info.loaded);
        // No project root: default enabled.
        assert!(info.enabled);
        assert_eq!(info.enablement_source, EnablementSource::Auto);
        assert_eq!(info.manifest, expected);
        assert_eq!(info.source.as_deref(), Some(root.join("plugin.json").as_path()));
    }

    #[tokio::test]
    async fn test_duplicate_is_atomic() {
        let dir = tempdir().unwrap();
        let first = write_manifest(dir.path(), "one", fast_api_manifest());
        let second = write_manifest(dir.path(), "two", fast_api_manifest());

        let registry = PluginRegistry::new(catalog());
        registry.load_plugin(&first).await.unwrap();
        let before_plugins = registry.get_plugins().await;
        let before_stats = registry.get_stats().await;

        let err = registry.load_plugin(&second).await.unwrap_err();
        assert!(matches!(err, PluginError::Duplicate { ref name } if name == "fast-api"));

        assert_eq!(registry.get_stats().await, before_stats);
        let after = registry.get_plugins().await;
        assert_eq!(after.len(), before_plugins.len());
        assert_eq!(after[0].source, before_plugins[0].source);
    }

    #[tokio::test]
    async fn test_unload_blocked_until_dependent_unloaded() {
        let registry = PluginRegistry::new(catalog());
        registry
            .load_manifest_with_base(
                PluginManifest::new("base", "1.0.0", "base")
                    .hook(HookName::BeforePlan, "enhancePlanForFastAPI"),
                ".",
            )
            .await
            .unwrap();
        registry
            .load_manifest_with_base(
                PluginManifest::new("child", "1.0.0", "child")
                    .hook(HookName::BeforePlan, "enhancePlanForFastAPI")
                    .depends_on("base"),
                ".",
            )
            .await
            .unwrap();

        let err = registry.unload_plugin("base").await.unwrap_err();
        assert!(matches!(
            err,
            PluginError::UnloadBlocked { ref dependents, .. } if dependents == &["child".to_string()]
        ));
        assert!(registry.contains("base").await);

        registry.unload_plugin("child").await.unwrap();
        registry.unload_plugin("base").await.unwrap();
        assert_eq!(registry.get_stats().await.total, 0);
    }

    #[tokio::test]
    async fn test_version_counter_tracks_mutations() {
        let registry = PluginRegistry::new(catalog());
        assert_eq!(registry.version().await, 0);

        registry
            .load_manifest_with_base(
                PluginManifest::new("base", "1.0.0", "base")
                    .hook(HookName::BeforeCommit, "checkCommit"),
                ".",
            )
            .await
            .unwrap();
        assert_eq!(registry.version().await, 1);

        assert!(registry.set_plugin_enabled("base", false).await);
        assert_eq!(registry.version().await, 2);

        // Failed mutations leave the counter alone.
        assert!(!registry.set_plugin_enabled("ghost", true).await);
        assert!(registry.unload_plugin("ghost").await.is_err());
        assert_eq!(registry.version().await, 2);

        let stats = registry.get_stats().await;
        assert_eq!(stats.version, 2);
        assert_eq!(stats.pinned, 1);
    }

    #[tokio::test]
    async fn test_load_dir_with_cycle_loads_nothing() {
        let dir = tempdir().unwrap();
        for (name, dep) in [("base", "child"), ("child", "base")] {
            write_manifest(
                dir.path(),
                name,
                json!({
                    "name": name,
                    "version": "1.0.0",
                    "main": name,
                    "hooks": {"before-commit": "checkCommit"},
                    "dependencies": [dep]
                }),
            );
        }

        let registry = PluginRegistry::new(catalog());
        let err = registry.load_dir(dir.path()).await.unwrap_err();
        assert!(matches!(err, PluginError::CyclicDependency { .. }));
        assert!(registry.get_plugins().await.is_empty());
    }
}

// =============================================================================
// Detection and pins
// =============================================================================

mod detection_tests {
    use super::*;

    #[tokio::test]
    async fn test_detection_enables_when_token_present() {
        let plugins = tempdir().unwrap();
        let root = write_manifest(plugins.path(), "fast-api", fast_api_manifest());

        let project = project_with("requirements.txt", "fastapi==0.110\nuvicorn\n");
        let registry = PluginRegistry::new(catalog()).with_project_root(project.path());
        let info = registry.load_plugin(&root).await.unwrap();
        assert!(info.enabled);
        assert_eq!(info.enablement_source, EnablementSource::Auto);
    }

    #[tokio::test]
    async fn test_detection_disables_when_token_absent() {
        let plugins = tempdir().unwrap();
        let root = write_manifest(plugins.path(), "fast-api", fast_api_manifest());

        let project = project_with("requirements.txt", "django\n");
        let registry = PluginRegistry::new(catalog()).with_project_root(project.path());
        let info = registry.load_plugin(&root).await.unwrap();
        assert!(!info.enabled);
        assert_eq!(registry.get_stats().await.disabled, 1);
    }

    #[tokio::test]
    async fn test_pin_survives_project_root_change() {
        let plugins = tempdir().unwrap();
        let root = write_manifest(plugins.path(), "fast-api", fast_api_manifest());
        let django = project_with("requirements.txt", "django\n");
        let fastapi = project_with("pyproject.toml", "[deps]\nFastAPI = \"*\"\n");

        let registry = PluginRegistry::new(catalog()).with_project_root(django.path());
        registry.load_plugin(&root).await.unwrap();
        assert!(!registry.get_plugin("fast-api").await.unwrap().enabled);

        registry.set_project_root(fastapi.path()).await;
        assert!(registry.get_plugin("fast-api").await.unwrap().enabled);

        assert!(registry.set_plugin_enabled("fast-api", false).await);
        registry.set_project_root(fastapi.path()).await;
        registry.refresh_detection().await;
        let info = registry.get_plugin("fast-api").await.unwrap();
        assert!(!info.enabled);
        assert_eq!(info.enablement_source, EnablementSource::Pinned);
    }

    #[tokio::test]
    async fn test_settings_pin_wins_over_detection() {
        let plugins = tempdir().unwrap();
        let root = write_manifest(plugins.path(), "fast-api", fast_api_manifest());
        let project = project_with("requirements.txt", "fastapi\n");

        let mut settings = Settings::default();
        settings.set_pin("fast-api", false);
        let registry = PluginRegistry::new(catalog())
            .with_settings(settings)
            .with_project_root(project.path());

        let info = registry.load_plugin(&root).await.unwrap();
        assert!(!info.enabled);
        assert_eq!(info.enablement_source, EnablementSource::Pinned);
    }

    #[tokio::test]
    async fn test_pins_persist_through_settings_files() {
        let plugins = tempdir().unwrap();
        let root = write_manifest(plugins.path(), "fast-api", fast_api_manifest());
        let project = tempdir().unwrap();
        let home = tempdir().unwrap();

        let registry = PluginRegistry::new(catalog());
        registry.load_plugin(&root).await.unwrap();
        registry.set_plugin_enabled("fast-api", false).await;
        registry
            .pinned_settings()
            .await
            .save(&Settings::local_path(project.path()))
            .await
            .unwrap();

        let mut loader = SettingsLoader::new().with_user_dir(home.path());
        let settings = loader.load(project.path()).await.unwrap().clone();
        let reloaded = PluginRegistry::new(catalog()).with_settings(settings);
        let info = reloaded.load_plugin(&root).await.unwrap();
        assert!(!info.enabled);
        assert_eq!(info.enablement_source, EnablementSource::Pinned);
    }
}

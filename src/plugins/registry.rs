//! Plugin registry: load, unload and enablement lifecycle.
//!
//! One registry belongs to exactly one orchestrator instance. All state
//! sits behind a single `tokio::sync::RwLock`; every mutation holds the
//! write lock for its whole duration, so a load either commits completely
//! or leaves the registry exactly as it was.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{Instrument, debug, info, warn};

use super::detection::DetectionEngine;
use super::discovery::{DiscoveredPlugin, PluginDiscovery};
use super::graph::{self, Node};
use super::manifest::{self, Detection, PluginManifest};
use super::module::{ModuleResolver, PluginModule, bind_handlers};
use super::PluginError;
use crate::config::{Settings, merge_json};
use crate::hooks::{HookHandler, HookName};
use crate::observability::registry_span;

/// Where a plugin's current `enabled` value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnablementSource {
    /// Detection result or the default.
    #[default]
    Auto,
    /// User preference; never replaced by detection.
    Pinned,
}

pub(crate) struct PluginRecord {
    manifest: PluginManifest,
    source: Option<PathBuf>,
    enabled: bool,
    enablement_source: EnablementSource,
    module: Arc<dyn PluginModule>,
    handlers: BTreeMap<HookName, Arc<dyn HookHandler>>,
    config: Arc<Value>,
    load_order: u64,
    loaded_at: DateTime<Utc>,
}

impl PluginRecord {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            manifest: self.manifest.clone(),
            loaded: true,
            enabled: self.enabled,
            enablement_source: self.enablement_source,
            load_order: self.load_order,
            loaded_at: self.loaded_at,
            source: self.source.clone(),
            hooks: self.handlers.keys().copied().collect(),
            config: self.config.as_ref().clone(),
        }
    }
}

/// Read view of a loaded plugin.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub manifest: PluginManifest,
    pub loaded: bool,
    pub enabled: bool,
    pub enablement_source: EnablementSource,
    pub load_order: u64,
    pub loaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    pub hooks: Vec<HookName>,
    /// Manifest config with settings overrides applied.
    pub config: Value,
}

impl PluginInfo {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub pinned: usize,
    /// Handlers that would run for each hook right now.
    pub handlers_per_hook: BTreeMap<HookName, usize>,
    pub version: u64,
}

/// Outcome of a batch load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<PluginInfo>,
    pub failed: Vec<(String, PluginError)>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn extend(&mut self, other: LoadReport) {
        self.loaded.extend(other.loaded);
        self.failed.extend(other.failed);
    }
}

/// A handler selected for one dispatch, detached from the registry lock.
#[derive(Clone)]
pub(crate) struct ActiveHandler {
    pub plugin: String,
    pub handler: Arc<dyn HookHandler>,
    pub config: Arc<Value>,
    pub rank: usize,
    pub load_order: u64,
}

impl std::fmt::Debug for ActiveHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveHandler")
            .field("plugin", &self.plugin)
            .field("rank", &self.rank)
            .field("load_order", &self.load_order)
            .finish()
    }
}

#[derive(Default)]
struct RegistryState {
    plugins: HashMap<String, PluginRecord>,
    settings: Settings,
    project_root: Option<PathBuf>,
    next_load_order: u64,
    version: u64,
}

impl RegistryState {
    fn nodes(&self) -> Vec<Node<'_>> {
        let mut records: Vec<&PluginRecord> = self.plugins.values().collect();
        records.sort_by_key(|r| r.load_order);
        records
            .into_iter()
            .map(|r| (r.manifest.name.as_str(), r.manifest.dependencies.as_slice()))
            .collect()
    }

    fn enabled_dependents(&self, name: &str) -> Vec<String> {
        let mut dependents: Vec<String> = self
            .plugins
            .values()
            .filter(|r| r.enabled && r.manifest.name != name)
            .filter(|r| r.manifest.dependencies.iter().any(|d| d == name))
            .map(|r| r.manifest.name.clone())
            .collect();
        dependents.sort();
        dependents
    }

    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

pub struct PluginRegistry {
    state: RwLock<RegistryState>,
    resolver: Arc<dyn ModuleResolver>,
    detection: DetectionEngine,
}

impl PluginRegistry {
    pub fn new(resolver: Arc<dyn ModuleResolver>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            resolver,
            detection: DetectionEngine::new(),
        }
    }

    /// Persisted preferences: pins and per-plugin config overrides.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.state.get_mut().settings = settings;
        self
    }

    /// Project root that detection predicates are evaluated against.
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.state.get_mut().project_root = Some(root.into());
        self
    }

    /// Loads, binds and commits the plugin at `path` (a `plugin.json` or a
    /// directory holding one).
    pub async fn load_plugin(&self, path: impl AsRef<Path>) -> Result<PluginInfo, PluginError> {
        let path = path.as_ref();
        let manifest = manifest::load_manifest(path)?;
        let source = manifest::manifest_path(path);
        let base_dir = manifest::base_dir(path);
        let name = manifest.name.clone();
        self.commit(manifest, Some(source), base_dir)
            .instrument(registry_span("load", &name))
            .await
    }

    /// Loads a manifest built in code; `base_dir` is handed to the resolver.
    pub async fn load_manifest_with_base(
        &self,
        manifest: PluginManifest,
        base_dir: impl Into<PathBuf>,
    ) -> Result<PluginInfo, PluginError> {
        manifest.validate()?;
        let name = manifest.name.clone();
        self.commit(manifest, None, base_dir.into())
            .instrument(registry_span("load", &name))
            .await
    }

    /// Discovers every plugin under `dir` and loads them in dependency
    /// order. A cycle within the batch fails before anything is loaded;
    /// other per-plugin failures are collected in the report.
    pub async fn load_dir(&self, dir: impl AsRef<Path>) -> Result<LoadReport, PluginError> {
        let discovered = PluginDiscovery::discover(&[dir.as_ref().to_path_buf()])?;

        let nodes: Vec<Node<'_>> = discovered
            .iter()
            .map(|d| (d.manifest.name.as_str(), d.manifest.dependencies.as_slice()))
            .collect();
        let order = graph::topological_order(&nodes)?;

        let mut by_name: HashMap<&str, &DiscoveredPlugin> = HashMap::new();
        let mut report = LoadReport::default();
        for plugin in &discovered {
            if by_name.contains_key(plugin.name()) {
                report.failed.push((
                    plugin.name().to_string(),
                    PluginError::Duplicate {
                        name: plugin.name().to_string(),
                    },
                ));
            } else {
                by_name.insert(plugin.name(), plugin);
            }
        }

        for name in order {
            let Some(plugin) = by_name.remove(name.as_str()) else {
                continue;
            };
            let source = manifest::manifest_path(&plugin.root);
            let result = self
                .commit(plugin.manifest.clone(), Some(source), plugin.root.clone())
                .instrument(registry_span("load", &name))
                .await;
            match result {
                Ok(info) => report.loaded.push(info),
                Err(e) => {
                    warn!(plugin = %name, error = %e, "Plugin failed to load");
                    report.failed.push((name, e));
                }
            }
        }

        info!(
            dir = %dir.as_ref().display(),
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Plugin directory loaded"
        );
        Ok(report)
    }

    /// Loads every directory listed in the settings' `pluginDirs`. Relative
    /// entries are resolved against the project root when one is set.
    pub async fn load_configured_dirs(&self) -> Result<LoadReport, PluginError> {
        let dirs: Vec<PathBuf> = {
            let state = self.state.read().await;
            state
                .settings
                .plugin_dirs
                .iter()
                .map(|dir| match &state.project_root {
                    Some(root) if dir.is_relative() => root.join(dir),
                    _ => dir.clone(),
                })
                .collect()
        };

        let mut report = LoadReport::default();
        for dir in dirs {
            report.extend(self.load_dir(&dir).await?);
        }
        Ok(report)
    }

    async fn commit(
        &self,
        manifest: PluginManifest,
        source: Option<PathBuf>,
        base_dir: PathBuf,
    ) -> Result<PluginInfo, PluginError> {
        let detected = self.detect_unlocked(&manifest).await;
        let mut state = self.state.write().await;
        let name = manifest.name.clone();

        if state.plugins.contains_key(&name) {
            return Err(PluginError::Duplicate { name });
        }

        if let Some(dependency) = manifest
            .dependencies
            .iter()
            .find(|dep| !state.plugins.contains_key(dep.as_str()))
        {
            return Err(PluginError::MissingDependency {
                plugin: name,
                dependency: dependency.clone(),
            });
        }

        {
            let mut nodes = state.nodes();
            nodes.push((name.as_str(), manifest.dependencies.as_slice()));
            graph::topological_order(&nodes)?;
        }

        let module = self.resolver.resolve(&manifest, &base_dir)?;
        let handlers = bind_handlers(&manifest, module.as_ref())?;

        let mut config = manifest.config.clone();
        if let Some(overrides) = state.settings.plugin(&name).and_then(|p| p.config.as_ref()) {
            merge_json(&mut config, overrides);
        }

        module
            .on_load(&config)
            .await
            .map_err(|e| PluginError::ModuleLoad {
                plugin: name.clone(),
                message: e.to_string(),
            })?;

        let (enabled, enablement_source) = match state.settings.pin(&name) {
            Some(pinned) => (pinned, EnablementSource::Pinned),
            None => {
                let active = match (&state.project_root, &manifest.detect) {
                    (Some(root), Some(detect)) => match detected {
                        Some((evaluated, active)) if &evaluated == root => active,
                        // Project root moved since the unlocked evaluation.
                        _ => self.detection.evaluate(root, &name, detect).await,
                    },
                    _ => true,
                };
                (active, EnablementSource::Auto)
            }
        };

        let load_order = state.next_load_order;
        state.next_load_order += 1;

        let record = PluginRecord {
            manifest,
            source,
            enabled,
            enablement_source,
            module,
            handlers,
            config: Arc::new(config),
            load_order,
            loaded_at: Utc::now(),
        };
        let info = record.info();
        state.plugins.insert(name.clone(), record);
        let version = state.bump();

        info!(
            plugin = %name,
            version = %info.manifest.version,
            enabled,
            source = ?enablement_source,
            hooks = info.hooks.len(),
            registry_version = version,
            "Plugin loaded"
        );
        Ok(info)
    }

    /// Runs detection for `manifest` against the current project root
    /// before the write lock is taken.
    async fn detect_unlocked(&self, manifest: &PluginManifest) -> Option<(PathBuf, bool)> {
        let detect = manifest.detect.as_ref()?;
        let root = self.state.read().await.project_root.clone()?;
        let active = self.detection.evaluate(&root, &manifest.name, detect).await;
        Some((root, active))
    }

    /// Removes a plugin and its hook bindings.
    ///
    /// Refused while another enabled plugin depends on it. The module's
    /// `on_unload` runs after the record is gone; its errors are logged.
    pub async fn unload_plugin(&self, name: &str) -> Result<(), PluginError> {
        let module = {
            let mut state = self.state.write().await;
            if !state.plugins.contains_key(name) {
                return Err(PluginError::NotFound {
                    name: name.to_string(),
                });
            }

            let dependents = state.enabled_dependents(name);
            if !dependents.is_empty() {
                return Err(PluginError::UnloadBlocked {
                    name: name.to_string(),
                    dependents,
                });
            }

            let record = state.plugins.remove(name).ok_or_else(|| PluginError::NotFound {
                name: name.to_string(),
            })?;
            let version = state.bump();
            info!(plugin = name, registry_version = version, "Plugin unloaded");
            record.module
        };

        self.detection.forget_plugin(name);
        Self::release(name, module)
            .instrument(registry_span("unload", name))
            .await;
        Ok(())
    }

    /// Unloads everything, dependents before their dependencies.
    pub async fn unload_all(&self) -> Vec<String> {
        let released = {
            let mut state = self.state.write().await;
            let order = match graph::topological_order(&state.nodes()) {
                Ok(order) => order,
                Err(e) => {
                    warn!(error = %e, "Dependency graph inconsistent, unloading by load order");
                    state.nodes().iter().map(|(n, _)| n.to_string()).collect()
                }
            };

            let mut released = Vec::with_capacity(order.len());
            for name in order.into_iter().rev() {
                if let Some(record) = state.plugins.remove(&name) {
                    released.push((name, record.module));
                }
            }
            if !released.is_empty() {
                state.bump();
            }
            released
        };

        let mut names = Vec::with_capacity(released.len());
        for (name, module) in released {
            self.detection.forget_plugin(&name);
            Self::release(&name, module).await;
            names.push(name);
        }
        info!(count = names.len(), "All plugins unloaded");
        names
    }

    async fn release(name: &str, module: Arc<dyn PluginModule>) {
        if let Err(e) = module.on_unload().await {
            warn!(plugin = name, error = %e, "Plugin on_unload failed");
        }
    }

    /// Pins `name` to `enabled`. Returns false if the plugin is not loaded.
    pub async fn set_plugin_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut state = self.state.write().await;
        let Some(record) = state.plugins.get_mut(name) else {
            return false;
        };
        record.enabled = enabled;
        record.enablement_source = EnablementSource::Pinned;
        state.settings.set_pin(name, enabled);
        let version = state.bump();
        info!(plugin = name, enabled, registry_version = version, "Plugin enablement pinned");
        true
    }

    /// Switches to a new project root and re-runs detection for every
    /// plugin that is not pinned.
    pub async fn set_project_root(&self, root: impl Into<PathBuf>) {
        let root = root.into();
        let candidates: Vec<(String, Detection)> = {
            let state = self.state.read().await;
            state
                .plugins
                .values()
                .filter(|r| r.enablement_source == EnablementSource::Auto)
                .filter_map(|r| Some((r.manifest.name.clone(), r.manifest.detect.clone()?)))
                .collect()
        };
        let mut detected = HashMap::with_capacity(candidates.len());
        for (name, detect) in &candidates {
            let active = self.detection.evaluate(&root, name, detect).await;
            detected.insert(name.clone(), active);
        }

        let mut state = self.state.write().await;
        let mut changed = 0usize;
        for record in state.plugins.values_mut() {
            if record.enablement_source == EnablementSource::Pinned {
                continue;
            }
            let Some(detect) = &record.manifest.detect else {
                continue;
            };
            let enabled = match detected.get(&record.manifest.name) {
                Some(active) => *active,
                // Loaded while the unlocked pass ran.
                None => self.detection.evaluate(&root, &record.manifest.name, detect).await,
            };
            if enabled != record.enabled {
                debug!(plugin = %record.manifest.name, enabled, "Detection changed enablement");
                record.enabled = enabled;
                changed += 1;
            }
        }

        info!(root = %root.display(), changed, "Project root set");
        state.project_root = Some(root);
        state.bump();
    }

    /// Drops cached detection results for the current root and evaluates
    /// again, e.g. after the project's dependency files changed.
    pub async fn refresh_detection(&self) {
        let root = self.state.read().await.project_root.clone();
        if let Some(root) = root {
            self.detection.invalidate(&root);
            self.set_project_root(root).await;
        }
    }

    pub async fn project_root(&self) -> Option<PathBuf> {
        self.state.read().await.project_root.clone()
    }

    /// Loaded plugins in load order.
    pub async fn get_plugins(&self) -> Vec<PluginInfo> {
        let state = self.state.read().await;
        let mut plugins: Vec<PluginInfo> = state.plugins.values().map(PluginRecord::info).collect();
        plugins.sort_by_key(|p| p.load_order);
        plugins
    }

    pub async fn get_plugin(&self, name: &str) -> Option<PluginInfo> {
        self.state.read().await.plugins.get(name).map(PluginRecord::info)
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.state.read().await.plugins.contains_key(name)
    }

    pub async fn get_stats(&self) -> RegistryStats {
        let state = self.state.read().await;
        let mut stats = RegistryStats {
            total: state.plugins.len(),
            version: state.version,
            ..Default::default()
        };

        for record in state.plugins.values() {
            if record.enablement_source == EnablementSource::Pinned {
                stats.pinned += 1;
            }
            if !record.enabled {
                stats.disabled += 1;
                continue;
            }
            stats.enabled += 1;
            for hook in record.handlers.keys() {
                *stats.handlers_per_hook.entry(*hook).or_default() += 1;
            }
        }
        stats
    }

    /// Incremented by every successful mutation.
    pub async fn version(&self) -> u64 {
        self.state.read().await.version
    }

    /// Snapshot of the settings the registry was configured with, including
    /// pins made since.
    pub async fn settings(&self) -> Settings {
        self.state.read().await.settings.clone()
    }

    /// Current pins as settings, suitable for `settings.local.json`.
    pub async fn pinned_settings(&self) -> Settings {
        let state = self.state.read().await;
        let mut settings = Settings::default();
        for (name, plugin) in &state.settings.plugins {
            if let Some(enabled) = plugin.enabled {
                settings.set_pin(name.clone(), enabled);
            }
        }
        settings
    }

    /// Consistent snapshot of the handlers to run for `hook`, ordered by
    /// (dependency rank, load order). The read lock is released on return.
    pub(crate) async fn active_handlers(&self, hook: HookName) -> (u64, Vec<ActiveHandler>) {
        let state = self.state.read().await;

        let ranks = graph::dependency_ranks(&state.nodes()).unwrap_or_else(|e| {
            warn!(error = %e, "Dependency ranks unavailable, ordering by load order");
            HashMap::new()
        });

        let mut active: Vec<ActiveHandler> = state
            .plugins
            .values()
            .filter(|r| r.enabled)
            .filter_map(|r| {
                r.handlers.get(&hook).map(|handler| ActiveHandler {
                    plugin: r.manifest.name.clone(),
                    handler: Arc::clone(handler),
                    config: Arc::clone(&r.config),
                    rank: ranks.get(&r.manifest.name).copied().unwrap_or(0),
                    load_order: r.load_order,
                })
            })
            .collect();
        active.sort_by_key(|h| (h.rank, h.load_order));

        (state.version, active)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("detection_cache", &self.detection.len())
            .finish_non_exhaustive()
    }
}

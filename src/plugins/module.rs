//! Plugin modules as fixed-shape capability tables.
//!
//! A module exposes a set of named entry points. At load time the registry
//! binds each hook a manifest declares to one of those exports; dispatch
//! only ever sees the bound handlers.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use super::{PluginError, PluginManifest};
use crate::hooks::{FnHandler, HookContext, HookHandler, HookName, HookResult};

/// Entry points of a loaded plugin.
#[async_trait]
pub trait PluginModule: Send + Sync {
    /// Names of all exported handlers.
    fn exports(&self) -> Vec<String>;

    fn export(&self, name: &str) -> Option<Arc<dyn HookHandler>>;

    /// Called once before the plugin is committed to the registry.
    /// An error aborts the load.
    async fn on_load(&self, _config: &Value) -> crate::Result<()> {
        Ok(())
    }

    /// Called after the plugin has been removed from the registry.
    async fn on_unload(&self) -> crate::Result<()> {
        Ok(())
    }
}

/// Map of export name to handler; the usual way to build a module.
#[derive(Clone, Default)]
pub struct ExportTable {
    exports: BTreeMap<String, Arc<dyn HookHandler>>,
}

impl ExportTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_export(mut self, name: impl Into<String>, handler: Arc<dyn HookHandler>) -> Self {
        self.exports.insert(name.into(), handler);
        self
    }

    pub fn with_export_fn<F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(HookContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::Result<HookResult>> + Send + 'static,
    {
        self.with_export(name, FnHandler::new(handler).into_arc())
    }

    pub fn into_module(self) -> Arc<dyn PluginModule> {
        Arc::new(self)
    }

    pub fn len(&self) -> usize {
        self.exports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }
}

#[async_trait]
impl PluginModule for ExportTable {
    fn exports(&self) -> Vec<String> {
        self.exports.keys().cloned().collect()
    }

    fn export(&self, name: &str) -> Option<Arc<dyn HookHandler>> {
        self.exports.get(name).cloned()
    }
}

impl std::fmt::Debug for ExportTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportTable")
            .field("exports", &self.exports.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Turns a manifest's `main` reference into a module.
pub trait ModuleResolver: Send + Sync {
    fn resolve(
        &self,
        manifest: &PluginManifest,
        base_dir: &Path,
    ) -> Result<Arc<dyn PluginModule>, PluginError>;
}

/// Resolver backed by modules the host registered up front, keyed by the
/// `main` reference manifests use.
#[derive(Default)]
pub struct ModuleCatalog {
    modules: RwLock<HashMap<String, Arc<dyn PluginModule>>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(self, main: impl Into<String>, module: Arc<dyn PluginModule>) -> Self {
        self.register(main, module);
        self
    }

    pub fn register(&self, main: impl Into<String>, module: Arc<dyn PluginModule>) {
        let mut modules = self.modules.write().unwrap_or_else(|e| e.into_inner());
        modules.insert(main.into(), module);
    }

    pub fn contains(&self, main: &str) -> bool {
        let modules = self.modules.read().unwrap_or_else(|e| e.into_inner());
        modules.contains_key(main)
    }
}

impl ModuleResolver for ModuleCatalog {
    fn resolve(
        &self,
        manifest: &PluginManifest,
        _base_dir: &Path,
    ) -> Result<Arc<dyn PluginModule>, PluginError> {
        let modules = self.modules.read().unwrap_or_else(|e| e.into_inner());
        modules
            .get(&manifest.main)
            .cloned()
            .ok_or_else(|| PluginError::ModuleNotFound {
                plugin: manifest.name.clone(),
                main: manifest.main.clone(),
            })
    }
}

impl std::fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let modules = self.modules.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("ModuleCatalog")
            .field("modules", &modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Binds every declared hook to its export, all or nothing.
pub(crate) fn bind_handlers(
    manifest: &PluginManifest,
    module: &dyn PluginModule,
) -> Result<BTreeMap<HookName, Arc<dyn HookHandler>>, PluginError> {
    manifest
        .hooks
        .iter()
        .map(|(hook, export)| {
            module
                .export(export)
                .map(|handler| (*hook, handler))
                .ok_or_else(|| PluginError::HandlerResolution {
                    plugin: manifest.name.clone(),
                    hook: *hook,
                    export: export.clone(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ExportTable {
        ExportTable::new()
            .with_export_fn("enhancePlan", |_, _| async { Ok(HookResult::ok()) })
            .with_export_fn("checkCommit", |_, _| async { Ok(HookResult::ok()) })
    }

    #[test]
    fn test_export_table() {
        let table = table();
        assert_eq!(table.len(), 2);
        assert_eq!(table.exports(), vec!["checkCommit", "enhancePlan"]);
        assert!(table.export("enhancePlan").is_some());
        assert!(table.export("missing").is_none());
    }

    #[test]
    fn test_catalog_resolve() {
        let catalog = ModuleCatalog::new().with_module("fast_api", table().into_module());
        assert!(catalog.contains("fast_api"));

        let manifest = PluginManifest::new("fast-api", "1.0.0", "fast_api");
        assert!(catalog.resolve(&manifest, Path::new(".")).is_ok());

        let manifest = PluginManifest::new("other", "1.0.0", "other_main");
        let err = catalog.resolve(&manifest, Path::new(".")).err().unwrap();
        assert!(matches!(err, PluginError::ModuleNotFound { main, .. } if main == "other_main"));
    }

    #[test]
    fn test_bind_handlers() {
        let module = table();
        let manifest = PluginManifest::new("p", "1.0.0", "p")
            .hook(HookName::BeforePlan, "enhancePlan")
            .hook(HookName::BeforeCommit, "checkCommit");
        let bound = bind_handlers(&manifest, &module).unwrap();
        assert_eq!(bound.len(), 2);
        assert!(bound.contains_key(&HookName::BeforeCommit));

        let manifest = manifest.hook(HookName::AfterTest, "reportTests");
        match bind_handlers(&manifest, &module) {
            Err(PluginError::HandlerResolution { hook, export, .. }) => {
                assert_eq!(hook, HookName::AfterTest);
                assert_eq!(export, "reportTests");
            }
            other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
        }
    }
}

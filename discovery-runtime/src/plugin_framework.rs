//! C7 — plugin registry, lifecycle state machine, dependency-ordered batch
//! load, directory discovery and named hooks.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use discovery_core::{DiscoveryError, Plugin, PluginMetadata, PluginRecord, PluginStatus, Result};
use tokio::sync::Mutex;

struct Entry {
    plugin: Mutex<Box<dyn Plugin>>,
    record: Mutex<PluginRecord>,
    source_path: Option<PathBuf>,
}

#[async_trait]
pub trait HookCallback: Send + Sync {
    async fn call(&self, plugin_name: &str);
}

pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> HookCallback for FnHook<F>
where
    F: Fn(&str) + Send + Sync,
{
    async fn call(&self, plugin_name: &str) {
        (self.0)(plugin_name)
    }
}

/// `name -> {plugin instance, metadata, dependents}` plus a named-hook
/// dispatch table.
pub struct PluginRegistry {
    entries: Mutex<HashMap<String, Arc<Entry>>>,
    hooks: Mutex<HashMap<String, Vec<Arc<dyn HookCallback>>>>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        PluginRegistry {
            entries: Mutex::new(HashMap::new()),
            hooks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(
        &self,
        metadata: PluginMetadata,
        plugin: Box<dyn Plugin>,
        source_path: Option<PathBuf>,
    ) {
        let name = metadata.name.clone();
        let entry = Arc::new(Entry {
            plugin: Mutex::new(plugin),
            record: Mutex::new(PluginRecord::new(metadata)),
            source_path,
        });
        self.entries.lock().await.insert(name, entry);
    }

    pub async fn on(&self, hook_name: &str, callback: Arc<dyn HookCallback>) {
        self.hooks
            .lock()
            .await
            .entry(hook_name.to_string())
            .or_default()
            .push(callback);
    }

    async fn fire(&self, hook_name: &str, plugin_name: &str) {
        let callbacks = self.hooks.lock().await.get(hook_name).cloned().unwrap_or_default();
        for cb in callbacks {
            cb.call(plugin_name).await;
        }
    }

    async fn entry(&self, name: &str) -> Result<Arc<Entry>> {
        self.entries
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DiscoveryError::Plugin {
                name: name.to_string(),
                message: "not registered".to_string(),
            })
    }

    async fn fail(&self, name: &str, entry: &Entry, message: String) -> DiscoveryError {
        let mut record = entry.record.lock().await;
        record.status = PluginStatus::Error;
        record.last_error = Some(message.clone());
        record.error_count += 1;
        self.fire("status_changed", name).await;
        DiscoveryError::Plugin {
            name: name.to_string(),
            message,
        }
    }

    /// `UNLOADED -> LOADING -> LOADED`, running the plugin's `initialize`.
    pub async fn load(&self, name: &str) -> Result<()> {
        let entry = self.entry(name).await?;
        {
            let mut record = entry.record.lock().await;
            record.status = PluginStatus::Loading;
        }
        self.fire("status_changed", name).await;

        let init_result = entry.plugin.lock().await.initialize().await;
        match init_result {
            Ok(()) => {
                let mut record = entry.record.lock().await;
                record.status = PluginStatus::Loaded;
                record.load_time = Some(chrono::Utc::now());
                drop(record);
                self.fire("status_changed", name).await;
                Ok(())
            }
            Err(e) => Err(self.fail(name, &entry, e.to_string()).await),
        }
    }

    /// `LOADED -> ACTIVE`; fires the `activated` hook.
    pub async fn activate(&self, name: &str) -> Result<()> {
        let entry = self.entry(name).await?;
        {
            let mut record = entry.record.lock().await;
            if record.status != PluginStatus::Loaded && record.status != PluginStatus::Inactive {
                return Err(DiscoveryError::Plugin {
                    name: name.to_string(),
                    message: format!("cannot activate from state {:?}", record.status),
                });
            }
            record.status = PluginStatus::Active;
        }
        self.fire("activated", name).await;
        Ok(())
    }

    /// `ACTIVE -> INACTIVE`; fires the `deactivated` hook.
    pub async fn deactivate(&self, name: &str) -> Result<()> {
        let entry = self.entry(name).await?;
        {
            let mut record = entry.record.lock().await;
            record.status = PluginStatus::Inactive;
        }
        self.fire("deactivated", name).await;
        Ok(())
    }

    /// Runs `cleanup`, fires `unloaded`, transitions to `UNLOADED`.
    pub async fn unload(&self, name: &str) -> Result<()> {
        let entry = self.entry(name).await?;
        {
            let mut record = entry.record.lock().await;
            record.status = PluginStatus::Unloading;
        }
        let cleanup_result = entry.plugin.lock().await.cleanup().await;
        match cleanup_result {
            Ok(()) => {
                entry.record.lock().await.status = PluginStatus::Unloaded;
                self.fire("unloaded", name).await;
                Ok(())
            }
            Err(e) => Err(self.fail(name, &entry, e.to_string()).await),
        }
    }

    /// `Deactivate -> Unload -> Load -> Activate`.
    pub async fn reload(&self, name: &str) -> Result<()> {
        self.deactivate(name).await.ok();
        self.unload(name).await?;
        self.load(name).await?;
        self.activate(name).await
    }

    pub async fn record(&self, name: &str) -> Result<PluginRecord> {
        Ok(self.entry(name).await?.record.lock().await.clone())
    }

    pub async fn names(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }

    pub async fn discover(&self, params: &HashMap<String, serde_json::Value>, name: &str) -> Result<discovery_core::DiscoveryResult> {
        let entry = self.entry(name).await?;
        let result = entry.plugin.lock().await.discover(params).await;
        entry.record.lock().await.discovery_count += 1;
        Ok(result)
    }

    /// Computes a load order for `names` via DFS-with-temporary-mark,
    /// considering only dependencies that are themselves in `names`.
    /// A temporary mark seen again signals a cycle.
    pub async fn dependency_order(&self, names: &[String]) -> Result<Vec<String>> {
        let wanted: HashSet<&str> = names.iter().map(|s| s.as_str()).collect();
        let mut deps_by_name: HashMap<String, Vec<String>> = HashMap::new();
        for name in names {
            let entry = self.entry(name).await?;
            let record = entry.record.lock().await;
            let deps = record
                .metadata
                .dependencies
                .iter()
                .filter(|d| wanted.contains(d.as_str()))
                .cloned()
                .collect();
            deps_by_name.insert(name.clone(), deps);
        }

        #[derive(PartialEq, Eq, Clone, Copy)]
        enum Mark {
            Temporary,
            Permanent,
        }
        let mut marks: HashMap<String, Mark> = HashMap::new();
        let mut order = Vec::new();

        fn visit(
            name: &str,
            deps_by_name: &HashMap<String, Vec<String>>,
            marks: &mut HashMap<String, Mark>,
            order: &mut Vec<String>,
        ) -> Result<()> {
            match marks.get(name) {
                Some(Mark::Permanent) => return Ok(()),
                Some(Mark::Temporary) => {
                    return Err(DiscoveryError::CircularDependency(name.to_string()));
                }
                None => {}
            }
            marks.insert(name.to_string(), Mark::Temporary);
            if let Some(deps) = deps_by_name.get(name) {
                for dep in deps {
                    visit(dep, deps_by_name, marks, order)?;
                }
            }
            marks.insert(name.to_string(), Mark::Permanent);
            order.push(name.to_string());
            Ok(())
        }

        for name in names {
            visit(name, &deps_by_name, &mut marks, &mut order)?;
        }
        Ok(order)
    }

    /// Loads and activates `names` in dependency order.
    pub async fn load_ordered(&self, names: &[String]) -> Result<Vec<String>> {
        let order = self.dependency_order(names).await?;
        for name in &order {
            self.load(name).await?;
            self.activate(name).await?;
        }
        Ok(order)
    }

    /// Scans a directory for plugin source files, invoking `loader` on each
    /// one not prefixed with `_`. Per-file failures are isolated into the
    /// returned `load_errors` map rather than aborting the scan.
    pub async fn discover_directory<L>(&self, dir: &Path, loader: L) -> HashMap<String, String>
    where
        L: Fn(&Path) -> Result<(PluginMetadata, Box<dyn Plugin>)>,
    {
        let mut load_errors = HashMap::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                load_errors.insert(dir.display().to_string(), e.to_string());
                return load_errors;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let file_name = match path.file_name().and_then(|f| f.to_str()) {
                Some(f) => f.to_string(),
                None => continue,
            };
            if file_name.starts_with('_') {
                continue;
            }
            match loader(&path) {
                Ok((metadata, plugin)) => {
                    self.register(metadata, plugin, Some(path)).await;
                }
                Err(e) => {
                    load_errors.insert(file_name, e.to_string());
                }
            }
        }
        load_errors
    }

    /// Re-executes `loader` for every plugin whose source path is `path`
    /// and reloads the live instance. Used when an optional file-change
    /// watcher reports a modification.
    pub async fn reload_from_path<L>(&self, path: &Path, loader: L) -> Result<Vec<String>>
    where
        L: Fn(&Path) -> Result<(PluginMetadata, Box<dyn Plugin>)>,
    {
        let affected: Vec<String> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .filter(|(_, e)| e.source_path.as_deref() == Some(path))
                .map(|(name, _)| name.clone())
                .collect()
        };
        let (metadata, plugin) = loader(path)?;
        self.register(metadata, plugin, Some(path.to_path_buf())).await;
        for name in &affected {
            self.reload(name).await?;
        }
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discovery_core::DiscoveryResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubPlugin {
        protocols: Vec<String>,
        fail_init: bool,
    }

    #[async_trait]
    impl Plugin for StubPlugin {
        async fn initialize(&mut self) -> Result<()> {
            if self.fail_init {
                Err(DiscoveryError::Generic("boom".to_string()))
            } else {
                Ok(())
            }
        }

        async fn discover(&self, _params: &HashMap<String, serde_json::Value>) -> DiscoveryResult {
            DiscoveryResult::ok("stub", vec![], 0.0)
        }

        async fn cleanup(&mut self) -> Result<()> {
            Ok(())
        }

        fn validate_config(&self) -> Vec<String> {
            vec![]
        }

        fn supported_protocols(&self) -> Vec<String> {
            self.protocols.clone()
        }
    }

    fn metadata(name: &str, deps: &[&str]) -> PluginMetadata {
        PluginMetadata {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            author: String::new(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            supported_protocols: vec![],
        }
    }

    #[tokio::test]
    async fn full_lifecycle_transitions() {
        let registry = PluginRegistry::new();
        registry
            .register(
                metadata("a", &[]),
                Box::new(StubPlugin { protocols: vec![], fail_init: false }),
                None,
            )
            .await;

        registry.load("a").await.unwrap();
        assert_eq!(registry.record("a").await.unwrap().status, PluginStatus::Loaded);

        registry.activate("a").await.unwrap();
        assert_eq!(registry.record("a").await.unwrap().status, PluginStatus::Active);

        registry.deactivate("a").await.unwrap();
        assert_eq!(registry.record("a").await.unwrap().status, PluginStatus::Inactive);

        registry.activate("a").await.unwrap();
        registry.unload("a").await.unwrap();
        assert_eq!(registry.record("a").await.unwrap().status, PluginStatus::Unloaded);
    }

    #[tokio::test]
    async fn failed_initialize_transitions_to_error() {
        let registry = PluginRegistry::new();
        registry
            .register(
                metadata("bad", &[]),
                Box::new(StubPlugin { protocols: vec![], fail_init: true }),
                None,
            )
            .await;
        let result = registry.load("bad").await;
        assert!(result.is_err());
        let record = registry.record("bad").await.unwrap();
        assert_eq!(record.status, PluginStatus::Error);
        assert_eq!(record.error_count, 1);
        assert!(record.last_error.is_some());
    }

    #[tokio::test]
    async fn dependency_order_respects_declared_deps() {
        let registry = PluginRegistry::new();
        for (name, deps) in [("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])] {
            registry
                .register(
                    metadata(name, &deps),
                    Box::new(StubPlugin { protocols: vec![], fail_init: false }),
                    None,
                )
                .await;
        }
        let order = registry
            .dependency_order(&["c".to_string(), "b".to_string(), "a".to_string()])
            .await
            .unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn circular_dependency_is_detected() {
        let registry = PluginRegistry::new();
        registry
            .register(metadata("a", &["b"]), Box::new(StubPlugin { protocols: vec![], fail_init: false }), None)
            .await;
        registry
            .register(metadata("b", &["a"]), Box::new(StubPlugin { protocols: vec![], fail_init: false }), None)
            .await;

        let result = registry
            .dependency_order(&["a".to_string(), "b".to_string()])
            .await;
        assert!(matches!(result, Err(DiscoveryError::CircularDependency(_))));
    }

    #[tokio::test]
    async fn hooks_fire_on_activate() {
        let registry = PluginRegistry::new();
        registry
            .register(metadata("a", &[]), Box::new(StubPlugin { protocols: vec![], fail_init: false }), None)
            .await;
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        registry
            .on("activated", Arc::new(FnHook(move |_name: &str| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })))
            .await;
        registry.load("a").await.unwrap();
        registry.activate("a").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    fn loader_by_filename(path: &Path) -> Result<(PluginMetadata, Box<dyn Plugin>)> {
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("").to_string();
        if name.contains("broken") {
            return Err(DiscoveryError::Plugin {
                name,
                message: "malformed plugin source".to_string(),
            });
        }
        let plugin: Box<dyn Plugin> = Box::new(StubPlugin { protocols: vec![], fail_init: false });
        Ok((metadata(&name, &[]), plugin))
    }

    #[tokio::test]
    async fn discover_directory_skips_underscore_files_and_isolates_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good_one.py"), "").unwrap();
        std::fs::write(dir.path().join("broken_two.py"), "").unwrap();
        std::fs::write(dir.path().join("_private.py"), "").unwrap();

        let registry = PluginRegistry::new();
        let load_errors = registry.discover_directory(dir.path(), loader_by_filename).await;

        assert_eq!(load_errors.len(), 1);
        assert!(load_errors.contains_key("broken_two.py"));

        let mut names = registry.names().await;
        names.sort();
        assert_eq!(names, vec!["good_one".to_string()]);
    }

    #[tokio::test]
    async fn discover_directory_reports_unreadable_dir_as_a_load_error() {
        let registry = PluginRegistry::new();
        let missing = Path::new("/nonexistent/plugins/dir/for/this/test");
        let load_errors = registry.discover_directory(missing, loader_by_filename).await;
        assert_eq!(load_errors.len(), 1);
        assert!(load_errors.contains_key(&missing.display().to_string()));
    }

    #[tokio::test]
    async fn reload_from_path_reloads_only_plugins_registered_from_that_path() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_path = dir.path().join("good_one.py");
        std::fs::write(&plugin_path, "").unwrap();

        let registry = PluginRegistry::new();
        registry.discover_directory(dir.path(), loader_by_filename).await;
        registry.load("good_one").await.unwrap();
        registry.activate("good_one").await.unwrap();
        assert_eq!(registry.record("good_one").await.unwrap().status, PluginStatus::Active);

        let affected = registry.reload_from_path(&plugin_path, loader_by_filename).await.unwrap();
        assert_eq!(affected, vec!["good_one".to_string()]);
        assert_eq!(registry.record("good_one").await.unwrap().status, PluginStatus::Active);

        let other_path = dir.path().join("never_registered.py");
        let affected = registry.reload_from_path(&other_path, loader_by_filename).await.unwrap();
        assert!(affected.is_empty());
    }
}

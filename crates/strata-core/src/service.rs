//! Load and save orchestration over a backend, the scope cache and the
//! merge engine.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, ScopeCache};
use crate::error::{Result, StrataError};
use crate::merge::{MergeEngine, NoopObserver, StalenessObserver, StrategyRegistry};
use crate::node::stamp::stamp_for_save;
use crate::node::{ConfigNode, NodeKind};
use crate::schema::{Schema, TypeDescriptor};
use crate::scope::{ScopePath, ScopeRegistry};
use crate::store::ConfigurationBackend;

/// Merged configuration for a requested scope path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub node: ConfigNode,
    /// Nothing is stored at the requested path itself; the node was
    /// assembled from ancestors only.
    pub is_new: bool,
    /// Version of the snapshot stored at the requested path, 0 when absent.
    pub stored_version: i64,
}

pub struct ConfigService {
    backend: Arc<dyn ConfigurationBackend>,
    cache: ScopeCache,
    schema: Arc<Schema>,
    strategies: Arc<StrategyRegistry>,
    scopes: Option<Arc<ScopeRegistry>>,
    observer: Arc<dyn StalenessObserver>,
    path_locks: Mutex<HashMap<ScopePath, Arc<Mutex<()>>>>,
}

impl ConfigService {
    pub fn new(
        backend: Arc<dyn ConfigurationBackend>,
        schema: Arc<Schema>,
        strategies: Arc<StrategyRegistry>,
    ) -> Self {
        Self {
            backend,
            cache: ScopeCache::default(),
            schema,
            strategies,
            scopes: None,
            observer: Arc::new(NoopObserver),
            path_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn StalenessObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = ScopeCache::new(capacity);
        self
    }

    /// Reject paths whose domain scopes the registry does not know.
    pub fn with_scope_registry(mut self, scopes: Arc<ScopeRegistry>) -> Self {
        self.scopes = Some(scopes);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn cache(&self) -> &ScopeCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Turn the cache on or off; turning it off empties it.
    pub fn set_cache_enabled(&self, enabled: bool) {
        self.cache.set_enabled(enabled);
    }

    /// Merge every stored level from `class` down to `path`.
    ///
    /// Returns `None` when no level has a stored snapshot.
    pub fn load(&self, path: &ScopePath, type_name: &str) -> Result<Option<Resolved>> {
        let root_type = self.root_type(path, type_name)?;

        let lock = self.path_lock(path);
        let _guard = lock.lock();

        let levels = self.read_levels(path)?;
        let stored_version = levels
            .last()
            .and_then(Option::as_ref)
            .map_or(0, ConfigNode::version);
        let merged = MergeEngine::new(&self.schema, &self.strategies).merge(
            path,
            &levels,
            root_type,
            self.observer.as_ref(),
        )?;

        Ok(merged.map(|node| {
            let is_new = node.scope_path() != path;
            debug!(scope = %path, is_new, version = node.version(), "Resolved configuration");
            Resolved {
                node,
                is_new,
                stored_version,
            }
        }))
    }

    /// Stamp `node` against the stored snapshot and the merged ancestors,
    /// then persist it at `path`. Returns the node as stored.
    pub fn save(&self, path: &ScopePath, type_name: &str, node: &ConfigNode) -> Result<ConfigNode> {
        self.store(path, type_name, node, None)
    }

    /// Like [`ConfigService::save`], but fails with
    /// [`StrataError::StaleConfig`] unless the stored snapshot still has
    /// `loaded_version` (0 for "nothing stored").
    pub fn save_checked(
        &self,
        path: &ScopePath,
        type_name: &str,
        node: &ConfigNode,
        loaded_version: i64,
    ) -> Result<ConfigNode> {
        self.store(path, type_name, node, Some(loaded_version))
    }

    fn store(
        &self,
        path: &ScopePath,
        type_name: &str,
        node: &ConfigNode,
        loaded_version: Option<i64>,
    ) -> Result<ConfigNode> {
        let root_type = self.root_type(path, type_name)?;
        if node.kind() != NodeKind::Complex {
            return Err(StrataError::corrupt(
                &path.to_string(),
                format!("expected a complex root node, found {}", node.kind()),
            ));
        }

        let lock = self.path_lock(path);
        let _guard = lock.lock();

        let previous = self.backend.load_configuration(path)?;
        let ancestor = match path.parent() {
            Some(parent) => {
                let levels = self.read_levels(&parent)?;
                MergeEngine::new(&self.schema, &self.strategies).merge(
                    &parent,
                    &levels,
                    root_type,
                    &NoopObserver,
                )?
            }
            None => None,
        };

        let stamped = stamp_for_save(
            &self.schema,
            root_type,
            previous.as_ref(),
            node,
            ancestor.as_ref(),
            path,
        );
        if loaded_version.is_none() && previous.as_ref() == Some(&stamped) {
            debug!(scope = %path, "Snapshot unchanged, skipping write");
            return Ok(stamped);
        }

        let written = match (loaded_version, &previous) {
            (Some(loaded), _) => self.backend.update_configuration(&stamped, loaded),
            (None, Some(previous)) => self
                .backend
                .update_configuration(&stamped, previous.version()),
            (None, None) => self.backend.save_configuration(&stamped),
        };
        if let Err(e) = written {
            self.cache.remove(path);
            if e.is_stale() {
                warn!(scope = %path, error = %e, "Save rejected");
            }
            return Err(e);
        }

        info!(scope = %path, version = stamped.version(), "Saved configuration");
        self.cache.put(path.clone(), Arc::new(stamped.clone()));
        Ok(stamped)
    }

    /// Delete the snapshot at `path` (and below it when `include_children`).
    pub fn delete(&self, path: &ScopePath, include_children: bool) -> Result<usize> {
        let lock = self.path_lock(path);
        let _guard = lock.lock();

        let removed = self.backend.delete(path, include_children)?;
        if include_children {
            self.cache.remove_subtree(path);
        } else {
            self.cache.remove(path);
        }
        info!(scope = %path, removed, include_children, "Deleted configuration");
        Ok(removed)
    }

    /// Delete every snapshot mentioning the scope. Clears the whole cache.
    pub fn delete_all_occurrences(
        &self,
        scope_name: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<usize> {
        let removed = self.backend.delete_all_occurrences(scope_name, properties)?;
        self.cache.clear();
        info!(scope_name, removed, "Deleted all occurrences");
        Ok(removed)
    }

    pub fn list_scopes(
        &self,
        scope_name: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<Vec<ScopePath>> {
        self.backend.list_scopes(scope_name, properties)
    }

    fn root_type(&self, path: &ScopePath, type_name: &str) -> Result<&TypeDescriptor> {
        if path.class_name() != type_name {
            return Err(StrataError::InvalidScope(format!(
                "{path} belongs to class '{}', not '{type_name}'",
                path.class_name()
            )));
        }
        if let Some(scopes) = &self.scopes {
            scopes.validate(path)?;
        }
        self.schema.require(type_name)
    }

    /// One entry per prefix of `path`, most generic first.
    fn read_levels(&self, path: &ScopePath) -> Result<Vec<Option<ConfigNode>>> {
        path.prefixes()
            .map(|prefix| self.read_level(&prefix))
            .collect()
    }

    fn read_level(&self, path: &ScopePath) -> Result<Option<ConfigNode>> {
        if let Some(cached) = self.cache.get(path) {
            return Ok(Some(cached.as_ref().clone()));
        }
        let loaded = self.backend.load_configuration(path)?;
        if let Some(node) = &loaded {
            self.cache.put(path.clone(), Arc::new(node.clone()));
        }
        Ok(loaded)
    }

    fn path_lock(&self, path: &ScopePath) -> Arc<Mutex<()>> {
        let mut locks = self.path_locks.lock();
        Arc::clone(locks.entry(path.clone()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PropertyDescriptor, TypeDescriptor};
    use crate::store::MemoryBackend;

    fn service() -> (Arc<MemoryBackend>, ConfigService) {
        let schema = Schema::new().with_type(
            TypeDescriptor::new("App").property(PropertyDescriptor::simple("port", "u16")),
        );
        let backend = Arc::new(MemoryBackend::new());
        let service = ConfigService::new(
            backend.clone(),
            Arc::new(schema),
            Arc::new(StrategyRegistry::new()),
        );
        (backend, service)
    }

    fn path(text: &str) -> ScopePath {
        text.parse().unwrap()
    }

    fn app(port: &str) -> ConfigNode {
        let scratch = path("class[name=App]");
        ConfigNode::complex(&scratch, "App")
            .with_property("port", ConfigNode::simple(&scratch, "u16", Some(port)))
    }

    #[test]
    fn test_load_nothing_stored() {
        let (_, service) = service();
        assert!(
            service
                .load(&path("class[name=App]/default/global"), "App")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_class_mismatch() {
        let (_, service) = service();
        let err = service
            .load(&path("class[name=Db]/default"), "App")
            .unwrap_err();
        assert!(matches!(err, StrataError::InvalidScope(_)));
    }

    #[test]
    fn test_unchanged_save_keeps_version() {
        let (backend, service) = service();
        let global = path("class[name=App]/default/global");
        let first = service.save(&global, "App", &app("80")).unwrap();
        let second = service.save(&global, "App", &app("80")).unwrap();
        assert_eq!(first.version(), 1);
        assert_eq!(second.version(), 1);
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn test_save_checked_rejects_moved_version() {
        let (_, service) = service();
        let global = path("class[name=App]/default/global");
        service.save(&global, "App", &app("80")).unwrap();
        service.save(&global, "App", &app("81")).unwrap();

        let err = service.save_checked(&global, "App", &app("82"), 1).unwrap_err();
        assert!(err.is_stale());
        assert!(service.cache().get(&global).is_none());

        let saved = service.save_checked(&global, "App", &app("82"), 2).unwrap();
        assert_eq!(saved.version(), 3);
    }

    #[test]
    fn test_backend_reads_populate_cache() {
        let (backend, service) = service();
        let global = path("class[name=App]/default/global");
        let mut stored = app("80");
        stored.meta.defining_scope_path = global.clone();
        backend.save_configuration(&stored).unwrap();

        service.load(&global, "App").unwrap();
        assert!(service.cache().get(&global).is_some());
    }
}

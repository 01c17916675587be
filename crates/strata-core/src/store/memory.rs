//! In-process backend, mainly for tests and embedding.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::debug;

use super::{ConfigurationBackend, check_version, mentions_scope};
use crate::error::Result;
use crate::node::ConfigNode;
use crate::scope::ScopePath;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    nodes: RwLock<BTreeMap<ScopePath, ConfigNode>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl ConfigurationBackend for MemoryBackend {
    fn load_configuration(&self, path: &ScopePath) -> Result<Option<ConfigNode>> {
        Ok(self.nodes.read().get(path).cloned())
    }

    fn save_configuration(&self, node: &ConfigNode) -> Result<()> {
        debug!(scope = %node.scope_path(), version = node.version(), "Saving snapshot");
        self.nodes
            .write()
            .insert(node.scope_path().clone(), node.clone());
        Ok(())
    }

    fn update_configuration(&self, node: &ConfigNode, loaded_version: i64) -> Result<()> {
        let path = node.scope_path();
        let mut nodes = self.nodes.write();
        check_version(path, nodes.get(path), loaded_version)?;
        debug!(scope = %path, version = node.version(), "Updating snapshot");
        nodes.insert(path.clone(), node.clone());
        Ok(())
    }

    fn delete(&self, path: &ScopePath, include_children: bool) -> Result<usize> {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        if include_children {
            nodes.retain(|stored, _| !stored.starts_with(path));
        } else {
            nodes.remove(path);
        }
        Ok(before - nodes.len())
    }

    fn delete_all_occurrences(
        &self,
        scope_name: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<usize> {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|stored, _| !mentions_scope(stored, scope_name, properties));
        Ok(before - nodes.len())
    }

    fn list_scopes(
        &self,
        scope_name: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<Vec<ScopePath>> {
        Ok(self
            .nodes
            .read()
            .keys()
            .filter(|stored| mentions_scope(stored, scope_name, properties))
            .cloned()
            .collect())
    }
}

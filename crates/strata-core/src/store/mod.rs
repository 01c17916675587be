//! Persistence backends
//!
//! A backend stores one raw (unmerged) snapshot per scope path. The core
//! never retries a failed backend call; errors surface to the caller.

pub mod file;
pub mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use std::collections::BTreeMap;

use crate::error::{Result, StrataError};
use crate::node::ConfigNode;
use crate::scope::ScopePath;

/// Storage for per-scope configuration snapshots.
pub trait ConfigurationBackend: Send + Sync {
    /// Raw snapshot stored at exactly `path`.
    fn load_configuration(&self, path: &ScopePath) -> Result<Option<ConfigNode>>;

    /// Store a snapshot at its defining scope path, replacing any existing one.
    fn save_configuration(&self, node: &ConfigNode) -> Result<()>;

    /// Replace an existing snapshot.
    ///
    /// Fails with [`StrataError::StaleConfig`] when the stored version is no
    /// longer `loaded_version`. A missing snapshot counts as version 0.
    fn update_configuration(&self, node: &ConfigNode, loaded_version: i64) -> Result<()>;

    /// Remove the snapshot at `path`, and every snapshot below it when
    /// `include_children` is set. Returns the number removed.
    fn delete(&self, path: &ScopePath, include_children: bool) -> Result<usize>;

    /// Remove every snapshot whose path contains a segment named
    /// `scope_name` carrying all of `properties`.
    fn delete_all_occurrences(
        &self,
        scope_name: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<usize>;

    /// Stored paths containing a matching segment, in path order.
    fn list_scopes(
        &self,
        scope_name: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<Vec<ScopePath>>;
}

pub(crate) fn mentions_scope(
    path: &ScopePath,
    scope_name: &str,
    properties: &BTreeMap<String, String>,
) -> bool {
    path.segments()
        .iter()
        .any(|segment| segment.matches(scope_name, properties))
}

pub(crate) fn check_version(
    path: &ScopePath,
    stored: Option<&ConfigNode>,
    loaded_version: i64,
) -> Result<()> {
    let actual = stored.map_or(0, ConfigNode::version);
    if actual != loaded_version {
        return Err(StrataError::StaleConfig {
            scope_path: path.clone(),
            expected: loaded_version,
            actual,
        });
    }
    Ok(())
}

//! Snapshot persistence as JSON files
//!
//! Each scope path maps to `<root>/<blake3(path text)>.json`, so paths never
//! leak into file names. Writes go to a temporary file first and are then
//! renamed into place.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ConfigurationBackend, check_version, mentions_scope};
use crate::error::{Result, StrataError};
use crate::node::ConfigNode;
use crate::scope::ScopePath;

const SNAPSHOT_EXTENSION: &str = "json";

/// On-disk document.
#[derive(Debug, Serialize, Deserialize)]
struct StoredSnapshot {
    scope_path: ScopePath,
    node: ConfigNode,
}

/// Directory of snapshot files.
///
/// Writers within one process are serialized; the version check in
/// [`ConfigurationBackend::update_configuration`] does not guard against
/// other processes writing the same directory.
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Default store directory
    ///
    /// - Unix: `$XDG_STATE_HOME/strata/store` or `~/.local/state/strata/store`
    /// - Windows: `%LOCALAPPDATA%\strata\store`
    pub fn default_root() -> anyhow::Result<PathBuf> {
        let base = if cfg!(unix) {
            dirs::state_dir()
                .or_else(dirs::data_local_dir)
                .ok_or_else(|| anyhow::anyhow!("Cannot determine state directory"))?
        } else {
            dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("Cannot determine local app data directory"))?
        };
        Ok(base.join("strata").join("store"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stable file key for a scope path.
    pub fn snapshot_key(path: &ScopePath) -> String {
        blake3::hash(path.to_string().as_bytes()).to_hex().to_string()
    }

    fn snapshot_path(&self, path: &ScopePath) -> PathBuf {
        self.root
            .join(format!("{}.{SNAPSHOT_EXTENSION}", Self::snapshot_key(path)))
    }

    fn read_snapshot(file: &Path) -> Result<StoredSnapshot> {
        let bytes = fs::read(file)
            .with_context(|| format!("Failed to read snapshot: {}", file.display()))?;
        let snapshot: StoredSnapshot = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse snapshot: {}", file.display()))?;
        if snapshot.node.scope_path() != &snapshot.scope_path {
            return Err(StrataError::corrupt(
                &file.display().to_string(),
                format!(
                    "snapshot stored for {} defines {}",
                    snapshot.scope_path,
                    snapshot.node.scope_path()
                ),
            ));
        }
        Ok(snapshot)
    }

    /// Every snapshot file under the root, with its parsed path.
    fn scan(&self) -> Result<Vec<(PathBuf, ScopePath)>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list store: {}", self.root.display()))?;
        for entry in entries {
            let file = entry?.path();
            if file.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            let snapshot = Self::read_snapshot(&file)?;
            found.push((file, snapshot.scope_path));
        }
        found.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(found)
    }

    /// Write atomically (tmp + rename).
    fn write_snapshot(&self, node: &ConfigNode) -> Result<()> {
        fs::create_dir_all(&self.root).with_context(|| {
            format!("Failed to create store directory: {}", self.root.display())
        })?;

        let target = self.snapshot_path(node.scope_path());
        let tmp = target.with_extension(format!("{SNAPSHOT_EXTENSION}.{}.tmp", std::process::id()));

        let snapshot = StoredSnapshot {
            scope_path: node.scope_path().clone(),
            node: node.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot).context("Failed to serialize snapshot")?;

        fs::write(&tmp, bytes)
            .with_context(|| format!("Failed to write tmp snapshot: {}", tmp.display()))?;

        // Windows rename does not replace an existing file
        if cfg!(windows) && target.exists() {
            fs::remove_file(&target).with_context(|| {
                format!("Failed to remove existing snapshot: {}", target.display())
            })?;
        }
        fs::rename(&tmp, &target)
            .with_context(|| format!("Failed to rename tmp snapshot: {}", tmp.display()))?;

        debug!(scope = %node.scope_path(), file = %target.display(), "Snapshot written");
        Ok(())
    }

    fn remove_files(&self, files: Vec<PathBuf>) -> Result<usize> {
        let mut removed = 0;
        for file in files {
            match fs::remove_file(&file) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(file = %file.display(), "Snapshot vanished before delete");
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("Failed to remove snapshot: {}", file.display()))
                        .into());
                }
            }
        }
        Ok(removed)
    }
}

impl ConfigurationBackend for FileBackend {
    fn load_configuration(&self, path: &ScopePath) -> Result<Option<ConfigNode>> {
        let file = self.snapshot_path(path);
        if !file.exists() {
            return Ok(None);
        }
        Ok(Some(Self::read_snapshot(&file)?.node))
    }

    fn save_configuration(&self, node: &ConfigNode) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.write_snapshot(node)
    }

    fn update_configuration(&self, node: &ConfigNode, loaded_version: i64) -> Result<()> {
        let _guard = self.write_lock.lock();
        let stored = self.load_configuration(node.scope_path())?;
        check_version(node.scope_path(), stored.as_ref(), loaded_version)?;
        self.write_snapshot(node)
    }

    fn delete(&self, path: &ScopePath, include_children: bool) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let files = if include_children {
            self.scan()?
                .into_iter()
                .filter(|(_, stored)| stored.starts_with(path))
                .map(|(file, _)| file)
                .collect()
        } else {
            let file = self.snapshot_path(path);
            if file.exists() { vec![file] } else { Vec::new() }
        };
        self.remove_files(files)
    }

    fn delete_all_occurrences(
        &self,
        scope_name: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let files = self
            .scan()?
            .into_iter()
            .filter(|(_, stored)| mentions_scope(stored, scope_name, properties))
            .map(|(file, _)| file)
            .collect();
        self.remove_files(files)
    }

    fn list_scopes(
        &self,
        scope_name: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<Vec<ScopePath>> {
        Ok(self
            .scan()?
            .into_iter()
            .map(|(_, stored)| stored)
            .filter(|stored| mentions_scope(stored, scope_name, properties))
            .collect())
    }
}

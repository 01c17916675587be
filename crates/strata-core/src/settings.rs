//! `strata.toml` runtime settings.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::schema::parser::describe_toml_error;
use crate::store::FileBackend;

pub const SETTINGS_FILE_NAME: &str = "strata.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSettings {
    /// Snapshot directory; the platform state directory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl Settings {
    /// `<config dir>/strata/strata.toml`
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(dir.join("strata").join(SETTINGS_FILE_NAME))
    }

    /// Read settings from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let settings: Settings = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!(describe_toml_error(&e, content)))?;
        if settings.cache.capacity == 0 {
            anyhow::bail!("cache.capacity must be at least 1");
        }
        Ok(settings)
    }

    /// Configured store root, or the platform default.
    pub fn store_root(&self) -> anyhow::Result<PathBuf> {
        match &self.store.root {
            Some(root) => Ok(root.clone()),
            None => FileBackend::default_root(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_missing() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::load(&temp.path().join(SETTINGS_FILE_NAME)).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.cache.enabled);
        assert_eq!(settings.cache.capacity, 200);
    }

    #[test]
    fn test_partial_sections() {
        let settings = Settings::from_toml_str(
            r#"
[cache]
enabled = false

[store]
root = "/var/lib/strata"
"#,
        )
        .unwrap();
        assert!(!settings.cache.enabled);
        assert_eq!(settings.cache.capacity, 200);
        assert_eq!(settings.store_root().unwrap(), PathBuf::from("/var/lib/strata"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = Settings::from_toml_str("[cache]\nsize = 10\n").unwrap_err();
        assert!(err.to_string().contains("TOML parsing error"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(Settings::from_toml_str("[cache]\ncapacity = 0\n").is_err());
    }
}

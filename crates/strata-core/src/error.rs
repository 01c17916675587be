//! Error types for the strata core library.

use crate::scope::ScopePath;

/// Top-level error enum for the strata core library.
#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    /// Malformed scope path construction (empty path, duplicate scope name, bad text form).
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Unsupported merge or staleness policy combination.
    #[error("Invalid merge configuration: {0}")]
    InvalidMergeConfiguration(String),

    /// Node kinds disagree between two levels, or with the declared property kind.
    #[error("Corrupt configuration data: {0}")]
    CorruptConfigurationData(String),

    /// Cross-references between configuration classes form a cycle.
    #[error("Cross-reference cycle detected: {chain}")]
    CrossReferenceCycleDetected { chain: String },

    /// The backend refused a write because the stored version moved since load.
    #[error("Stale configuration at {scope_path}: loaded version {expected}, stored version {actual}")]
    StaleConfig {
        scope_path: ScopePath,
        expected: i64,
        actual: i64,
    },

    /// A schema document could not be parsed.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Opaque failure reported by a persistence backend.
    #[error("Persistence error: {0}")]
    Persistence(#[from] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StrataError {
    /// Configuration-authoring or data bugs that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            StrataError::StaleConfig { .. } | StrataError::Persistence(_) | StrataError::Io(_)
        )
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, StrataError::StaleConfig { .. })
    }

    pub(crate) fn corrupt(at: &str, message: impl std::fmt::Display) -> Self {
        StrataError::CorruptConfigurationData(format!("{at}: {message}"))
    }

    pub(crate) fn invalid_merge(at: &str, message: impl std::fmt::Display) -> Self {
        StrataError::InvalidMergeConfiguration(format!("{at}: {message}"))
    }
}

pub type Result<T> = std::result::Result<T, StrataError>;

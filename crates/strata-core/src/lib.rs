//! Strata Core Library
//!
//! Hierarchical configuration resolved across an ordered chain of scopes
//! (class defaults, code defaults, then domain scopes such as global, user
//! and instance), merged per property under schema-declared policies with
//! staleness detection.

pub mod cache;
pub mod context;
pub mod crossref;
pub mod error;
pub mod merge;
pub mod node;
pub mod schema;
pub mod scope;
pub mod service;
pub mod settings;
pub mod store;

/// Re-exports of commonly used types
pub mod prelude {
    // Errors
    pub use crate::error::{Result, StrataError};

    // Scopes
    pub use crate::scope::{ScopeDescriptor, ScopePath, ScopeRegistry, ScopeSegment};

    // Nodes
    pub use crate::node::stamp::stamp_for_save;
    pub use crate::node::{ConfigNode, NodeKind, NodeMeta, NodeValue};

    // Schema
    pub use crate::schema::{
        EntryPolicy, ItemKind, ItemMerge, MergePolicy, PropertyDescriptor, ReferenceDescriptor,
        Schema, StalePolicy, TypeDescriptor, ValueMerge, parse_schema_toml, parse_schema_toml_str,
    };

    // Merge
    pub use crate::merge::{
        MergeEngine, MergeResult, NoopObserver, RecordingObserver, SimpleValueMergingStrategy,
        StalenessObserver, StrategyRegistry,
    };

    // Cache, persistence, orchestration
    pub use crate::cache::{CacheStats, ScopeCache};
    pub use crate::context::AppContext;
    pub use crate::crossref::CycleDetector;
    pub use crate::service::{ConfigService, Resolved};
    pub use crate::settings::Settings;
    pub use crate::store::{ConfigurationBackend, FileBackend, MemoryBackend};
}

//! Scope-chain merge engine
//!
//! Folds one snapshot per scope level, most generic first, into a single
//! node. Each pair is merged property by property under the policy the
//! schema declares for that property:
//!
//! 1. Staleness: a child saved against a different parent scope or version
//!    is either dropped for the parent (`use-parent`) or merged anyway.
//! 2. Value merge: use-child, use-parent, a named strategy, or a recursive
//!    merge, depending on the property kind.
//!
//! The engine is a pure function of its inputs: no I/O, no locks, and input
//! nodes are never modified.

mod complex;
mod keyed;
mod list;
pub mod result;
mod simple;
pub mod strategy;

use tracing::trace;

use crate::error::{Result, StrataError};
use crate::node::ConfigNode;
use crate::schema::{PropertyDescriptor, Schema, StalePolicy, TypeDescriptor};
use crate::scope::ScopePath;

pub use result::{MergeResult, NoopObserver, RecordingObserver, StalenessObserver};
pub use strategy::{SimpleValueMergingStrategy, StrategyRegistry};

/// Merges scope levels under the policies declared in a [`Schema`].
#[derive(Debug, Clone, Copy)]
pub struct MergeEngine<'a> {
    schema: &'a Schema,
    strategies: &'a StrategyRegistry,
}

impl<'a> MergeEngine<'a> {
    pub fn new(schema: &'a Schema, strategies: &'a StrategyRegistry) -> Self {
        Self { schema, strategies }
    }

    /// Merge `levels` (most generic first) into one node.
    ///
    /// `None` levels are skipped. Returns `None` only when every level is
    /// absent. The result carries the version and parent snapshot of the
    /// last present level. `observer` is notified once if any property was
    /// found stale.
    pub fn merge(
        &self,
        scope_path: &ScopePath,
        levels: &[Option<ConfigNode>],
        root_type: &TypeDescriptor,
        observer: &dyn StalenessObserver,
    ) -> Result<Option<ConfigNode>> {
        let mut ctx = MergeContext::new(*self, scope_path);
        let mut accumulator: Option<ConfigNode> = None;

        for level in levels {
            accumulator = match (accumulator, level) {
                (None, Some(child)) => Some(child.clone()),
                (Some(parent), None) => Some(parent),
                (Some(parent), Some(child)) => {
                    Some(ctx.merge_complex(&root_type.name, root_type, &parent, child)?)
                }
                (None, None) => None,
            };
        }

        if ctx.stale_found {
            trace!(
                scope = %scope_path,
                merged = ctx.result.number_of_merged_properties,
                discarded = ctx.result.number_of_discarded_properties,
                "Staleness found during merge"
            );
            observer.on_merge_result(&ctx.result);
        }

        Ok(accumulator)
    }
}

/// Class and default scopes only supply defaults: when the parent side of a
/// merge was defined there, the child always overwrites it, whatever policy
/// the property declares.
pub(crate) fn defaults_only(parent: &ConfigNode) -> bool {
    parent.scope_path().is_structural()
}

/// True when the child's recorded parent snapshot no longer matches `parent`.
pub(crate) fn is_stale(parent: &ConfigNode, child: &ConfigNode) -> bool {
    child.meta.parent_scope_name.as_deref() != Some(parent.scope_name())
        || child.meta.parent_version != parent.version()
}

/// Outcome of the staleness step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Staleness {
    /// Go on with the value merge.
    Proceed,
    /// Child dropped; keep the parent node.
    KeepParent,
}

/// Per-call state: the engine plus the running totals.
struct MergeContext<'a> {
    engine: MergeEngine<'a>,
    result: MergeResult,
    stale_found: bool,
}

impl<'a> MergeContext<'a> {
    fn new(engine: MergeEngine<'a>, scope_path: &ScopePath) -> Self {
        Self {
            engine,
            result: MergeResult::new(scope_path.clone()),
            stale_found: false,
        }
    }

    fn schema(&self) -> &'a Schema {
        self.engine.schema
    }

    fn strategies(&self) -> &'a StrategyRegistry {
        self.engine.strategies
    }

    fn check_staleness(
        &mut self,
        at: &str,
        policy: StalePolicy,
        parent: &ConfigNode,
        child: &ConfigNode,
    ) -> Staleness {
        if !is_stale(parent, child) {
            return Staleness::Proceed;
        }
        self.stale_found = true;
        match policy {
            StalePolicy::UseParent => {
                trace!(
                    property = at,
                    parent_scope = parent.scope_name(),
                    parent_version = parent.version(),
                    recorded_version = child.meta.parent_version,
                    "Stale child value discarded"
                );
                self.result.number_of_discarded_properties += 1;
                Staleness::KeepParent
            }
            StalePolicy::Merge => {
                trace!(property = at, "Stale child value merged");
                self.result.number_of_merged_properties += 1;
                Staleness::Proceed
            }
        }
    }

    /// Merge one declared property present on both sides.
    fn merge_property(
        &mut self,
        owner: &str,
        at: &str,
        property: &PropertyDescriptor,
        parent: &ConfigNode,
        child: &ConfigNode,
    ) -> Result<ConfigNode> {
        property.check_policy(owner, self.schema(), self.strategies())?;

        for (side, node) in [("parent", parent), ("child", child)] {
            if node.kind() != property.kind {
                return Err(StrataError::corrupt(
                    at,
                    format!(
                        "expected {} node, {side} has {} defined at {}",
                        property.kind,
                        node.kind(),
                        node.scope_path()
                    ),
                ));
            }
        }

        match property.kind {
            crate::node::NodeKind::Simple => self.merge_simple(at, property, parent, child),
            crate::node::NodeKind::Complex => {
                self.merge_complex_property(at, property, parent, child)
            }
            crate::node::NodeKind::List => Ok(self.merge_list(at, property, parent, child)),
            crate::node::NodeKind::Set => self.merge_set(at, property, parent, child),
            crate::node::NodeKind::Map => self.merge_map(at, property, parent, child),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PropertyDescriptor, ValueMerge};

    fn scope(text: &str) -> ScopePath {
        text.parse().unwrap()
    }

    fn schema() -> Schema {
        Schema::new().with_type(
            TypeDescriptor::new("App")
                .property(PropertyDescriptor::simple("port", "u16"))
                .property(PropertyDescriptor::simple("host", "string").merge(ValueMerge::UseParent)),
        )
    }

    #[test]
    fn test_all_levels_absent() {
        let schema = schema();
        let strategies = StrategyRegistry::new();
        let engine = MergeEngine::new(&schema, &strategies);
        let path = scope("class[name=App]/default");
        let merged = engine
            .merge(&path, &[None, None], schema.get("App").unwrap(), &NoopObserver)
            .unwrap();
        assert!(merged.is_none());
    }

    #[test]
    fn test_single_level_is_identity() {
        let schema = schema();
        let strategies = StrategyRegistry::new();
        let engine = MergeEngine::new(&schema, &strategies);
        let path = scope("class[name=App]/default/global");
        let node = ConfigNode::complex(&path, "App")
            .with_property("port", ConfigNode::simple(&path, "u16", Some("1")))
            .with_version(5);
        let merged = engine
            .merge(&path, &[None, Some(node.clone()), None], schema.get("App").unwrap(), &NoopObserver)
            .unwrap();
        assert_eq!(merged, Some(node));
    }

    #[test]
    fn test_stale_detection() {
        let parent_path = scope("class[name=App]/default/global");
        let parent = ConfigNode::simple(&parent_path, "u16", Some("1")).with_version(2);
        let child_path = scope("class[name=App]/default/global/user[name=a]");
        let fresh = ConfigNode::simple(&child_path, "u16", Some("2")).with_parent("global", 2);
        let stale = ConfigNode::simple(&child_path, "u16", Some("2")).with_parent("global", 1);
        let moved = ConfigNode::simple(&child_path, "u16", Some("2")).with_parent("default", 2);

        assert!(!is_stale(&parent, &fresh));
        assert!(is_stale(&parent, &stale));
        assert!(is_stale(&parent, &moved));
    }

    #[test]
    fn test_defaults_only_for_structural_scopes() {
        let default = ConfigNode::simple(&scope("class[name=App]/default"), "u16", Some("1"));
        let global = ConfigNode::simple(&scope("class[name=App]/default/global"), "u16", Some("1"));
        assert!(defaults_only(&default));
        assert!(!defaults_only(&global));
    }
}

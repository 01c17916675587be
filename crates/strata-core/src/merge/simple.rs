//! Simple value merging.

use super::{MergeContext, Staleness, defaults_only};
use crate::error::{Result, StrataError};
use crate::node::{ConfigNode, NodeValue};
use crate::schema::{PropertyDescriptor, ValueMerge};

impl MergeContext<'_> {
    pub(super) fn merge_simple(
        &mut self,
        at: &str,
        property: &PropertyDescriptor,
        parent: &ConfigNode,
        child: &ConfigNode,
    ) -> Result<ConfigNode> {
        if self.check_staleness(at, property.policy.stale, parent, child) == Staleness::KeepParent {
            return Ok(parent.clone());
        }

        let policy = if defaults_only(parent) {
            ValueMerge::UseChild
        } else {
            property.policy.value.clone()
        };

        match policy {
            ValueMerge::UseChild => Ok(child.clone()),
            ValueMerge::UseParent => Ok(parent.clone()),
            ValueMerge::Strategy(name) => {
                let strategy = self.strategies().get(&name).ok_or_else(|| {
                    StrataError::invalid_merge(at, format!("unknown simple-value strategy '{name}'"))
                })?;
                let value = strategy.merge(parent.simple_value(), child.simple_value());
                Ok(ConfigNode::new(child.meta.clone(), NodeValue::Simple { value }))
            }
            ValueMerge::Merge => Err(StrataError::invalid_merge(
                at,
                "'merge' is not a simple-value policy",
            )),
        }
    }
}

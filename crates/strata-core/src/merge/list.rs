//! List merging: wholesale, never element by element.

use super::{MergeContext, Staleness, defaults_only};
use crate::node::ConfigNode;
use crate::schema::{PropertyDescriptor, ValueMerge};

impl MergeContext<'_> {
    pub(super) fn merge_list(
        &mut self,
        at: &str,
        property: &PropertyDescriptor,
        parent: &ConfigNode,
        child: &ConfigNode,
    ) -> ConfigNode {
        // Absent on one side falls through to the other.
        if child.items().is_none() {
            return parent.clone();
        }
        if parent.items().is_none() {
            return child.clone();
        }

        if self.check_staleness(at, property.policy.stale, parent, child) == Staleness::KeepParent {
            return parent.clone();
        }

        if defaults_only(parent) {
            return child.clone();
        }
        match property.policy.value {
            ValueMerge::UseParent => parent.clone(),
            // check_policy admits only use-child/use-parent here
            _ => child.clone(),
        }
    }
}

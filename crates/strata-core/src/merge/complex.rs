//! Complex node merging.

use std::collections::{BTreeMap, BTreeSet};

use super::{MergeContext, Staleness, defaults_only};
use crate::error::{Result, StrataError};
use crate::node::{ConfigNode, NodeValue};
use crate::schema::{PropertyDescriptor, TypeDescriptor, ValueMerge};

impl MergeContext<'_> {
    /// Complex property: staleness, then the declared (or overridden) policy.
    pub(super) fn merge_complex_property(
        &mut self,
        at: &str,
        property: &PropertyDescriptor,
        parent: &ConfigNode,
        child: &ConfigNode,
    ) -> Result<ConfigNode> {
        if self.check_staleness(at, property.policy.stale, parent, child) == Staleness::KeepParent {
            return Ok(parent.clone());
        }

        let policy = if !defaults_only(parent) {
            property.policy.value.clone()
        } else if property.polymorph {
            ValueMerge::UseChild
        } else {
            ValueMerge::Merge
        };

        match policy {
            ValueMerge::UseChild => Ok(child.clone()),
            ValueMerge::UseParent => Ok(parent.clone()),
            ValueMerge::Merge if property.polymorph => Err(StrataError::invalid_merge(
                at,
                "'merge' is not allowed on a polymorphic property",
            )),
            ValueMerge::Merge => {
                let descriptor = self.schema().require(&property.type_name)?;
                self.merge_complex(at, descriptor, parent, child)
            }
            ValueMerge::Strategy(name) => Err(StrataError::invalid_merge(
                at,
                format!("unknown complex merge policy '{name}'"),
            )),
        }
    }

    /// Merge two complex nodes property by property.
    ///
    /// Properties on one side only are carried over; properties the type does
    /// not declare take the child's node. The result keeps the child's
    /// metadata and declared-property set.
    pub(super) fn merge_complex(
        &mut self,
        at: &str,
        descriptor: &TypeDescriptor,
        parent: &ConfigNode,
        child: &ConfigNode,
    ) -> Result<ConfigNode> {
        let (
            NodeValue::Complex {
                properties: parent_properties,
                ..
            },
            NodeValue::Complex {
                properties: child_properties,
                declared_properties,
            },
        ) = (&parent.value, &child.value)
        else {
            return Err(StrataError::corrupt(
                at,
                format!(
                    "expected complex nodes, found {} ({}) and {} ({})",
                    parent.kind(),
                    parent.scope_path(),
                    child.kind(),
                    child.scope_path()
                ),
            ));
        };

        let names: BTreeSet<&String> = parent_properties
            .keys()
            .chain(child_properties.keys())
            .collect();

        let mut merged = BTreeMap::new();
        for name in names {
            let node = match (parent_properties.get(name), child_properties.get(name)) {
                (Some(p), None) => p.clone(),
                (None, Some(c)) => c.clone(),
                (Some(p), Some(c)) => match descriptor.get(name) {
                    Some(property) => {
                        let path = format!("{at}.{name}");
                        self.merge_property(&descriptor.name, &path, property, p, c)?
                    }
                    None => c.clone(),
                },
                (None, None) => continue,
            };
            merged.insert(name.clone(), node);
        }

        Ok(ConfigNode::new(
            child.meta.clone(),
            NodeValue::Complex {
                properties: merged,
                declared_properties: declared_properties.clone(),
            },
        ))
    }
}

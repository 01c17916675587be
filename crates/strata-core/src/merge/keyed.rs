//! Set and map merging
//!
//! Both sides are partitioned by key: set items by identity (the item
//! itself for simple items, the identity property for complex ones), map
//! entries by their string key. Then:
//! - child only: kept when `entry_added = add`
//! - parent only: kept when `entry_removed = add`
//! - both: combined per `item_merge`

use indexmap::IndexMap;
use std::collections::BTreeMap;

use super::{MergeContext, Staleness, defaults_only};
use crate::error::{Result, StrataError};
use crate::node::{ConfigNode, NodeKind, NodeValue};
use crate::schema::{EntryPolicy, ItemKind, ItemMerge, PropertyDescriptor};

impl MergeContext<'_> {
    pub(super) fn merge_set(
        &mut self,
        at: &str,
        property: &PropertyDescriptor,
        parent: &ConfigNode,
        child: &ConfigNode,
    ) -> Result<ConfigNode> {
        let (Some(parent_items), Some(child_items)) = (parent.items(), child.items()) else {
            return Ok(fall_through(parent, child));
        };
        if self.check_staleness(at, property.policy.stale, parent, child) == Staleness::KeepParent {
            return Ok(parent.clone());
        }

        let parent_index = self.index_set(at, property, parent_items)?;
        let child_index = self.index_set(at, property, child_items)?;
        let merged = self.merge_keyed(at, property, parent, &parent_index, &child_index)?;

        Ok(ConfigNode::new(
            child.meta.clone(),
            NodeValue::Set {
                items: Some(merged.into_values().collect()),
            },
        ))
    }

    pub(super) fn merge_map(
        &mut self,
        at: &str,
        property: &PropertyDescriptor,
        parent: &ConfigNode,
        child: &ConfigNode,
    ) -> Result<ConfigNode> {
        let (Some(parent_entries), Some(child_entries)) = (parent.entries(), child.entries())
        else {
            return Ok(fall_through(parent, child));
        };
        if self.check_staleness(at, property.policy.stale, parent, child) == Staleness::KeepParent {
            return Ok(parent.clone());
        }

        let parent_index = index_map(at, property, parent_entries)?;
        let child_index = index_map(at, property, child_entries)?;
        let merged = self.merge_keyed(at, property, parent, &parent_index, &child_index)?;

        Ok(ConfigNode::new(
            child.meta.clone(),
            NodeValue::Map {
                entries: Some(merged.into_iter().collect::<BTreeMap<_, _>>()),
            },
        ))
    }

    /// Shared added/removed/existing logic.
    ///
    /// Output order: child entries first, then parent-only entries that survive.
    fn merge_keyed(
        &mut self,
        at: &str,
        property: &PropertyDescriptor,
        parent: &ConfigNode,
        parent_index: &IndexMap<String, &ConfigNode>,
        child_index: &IndexMap<String, &ConfigNode>,
    ) -> Result<IndexMap<String, ConfigNode>> {
        let item_policy = if defaults_only(parent) {
            ItemMerge::UseChild
        } else {
            property.policy.item
        };

        let mut merged = IndexMap::new();
        for (key, child_item) in child_index {
            match parent_index.get(key) {
                Some(parent_item) => {
                    let path = format!("{at}[{key}]");
                    let item = self.merge_item(&path, property, item_policy, parent_item, child_item)?;
                    merged.insert(key.clone(), item);
                }
                None if property.policy.entry_added == EntryPolicy::Add => {
                    merged.insert(key.clone(), (*child_item).clone());
                }
                None => {}
            }
        }
        if property.policy.entry_removed == EntryPolicy::Add {
            for (key, parent_item) in parent_index {
                if !child_index.contains_key(key) {
                    merged.insert(key.clone(), (*parent_item).clone());
                }
            }
        }
        Ok(merged)
    }

    fn merge_item(
        &mut self,
        at: &str,
        property: &PropertyDescriptor,
        policy: ItemMerge,
        parent: &ConfigNode,
        child: &ConfigNode,
    ) -> Result<ConfigNode> {
        match policy {
            ItemMerge::UseParent => Ok(parent.clone()),
            ItemMerge::UseChild => Ok(backfill(parent, child)),
            ItemMerge::Merge => {
                if property.polymorph || property.item_kind != ItemKind::Complex {
                    return Err(StrataError::invalid_merge(
                        at,
                        "'merge' requires complex, non-polymorphic items",
                    ));
                }
                let descriptor = self.schema().require(&property.type_name)?;
                self.merge_complex(at, descriptor, parent, child)
            }
        }
    }

    /// Key every set item, keeping the first occurrence of a duplicate key.
    fn index_set<'n>(
        &self,
        at: &str,
        property: &PropertyDescriptor,
        items: &'n [ConfigNode],
    ) -> Result<IndexMap<String, &'n ConfigNode>> {
        let mut index = IndexMap::new();
        for item in items {
            check_item_kind(at, property, item)?;
            let key = property.set_item_key(self.schema(), at, item)?;
            index.entry(key).or_insert(item);
        }
        Ok(index)
    }
}

fn index_map<'n>(
    at: &str,
    property: &PropertyDescriptor,
    entries: &'n BTreeMap<String, ConfigNode>,
) -> Result<IndexMap<String, &'n ConfigNode>> {
    let mut index = IndexMap::new();
    for (key, entry) in entries {
        check_item_kind(at, property, entry)?;
        index.insert(key.clone(), entry);
    }
    Ok(index)
}

fn check_item_kind(at: &str, property: &PropertyDescriptor, item: &ConfigNode) -> Result<()> {
    let expected = match property.item_kind {
        ItemKind::Simple => NodeKind::Simple,
        ItemKind::Complex => NodeKind::Complex,
    };
    if item.kind() != expected {
        return Err(StrataError::corrupt(
            at,
            format!(
                "expected {expected} items, found {} defined at {}",
                item.kind(),
                item.scope_path()
            ),
        ));
    }
    Ok(())
}

/// An absent collection on one side yields the other side unchanged.
fn fall_through(parent: &ConfigNode, child: &ConfigNode) -> ConfigNode {
    match child.value {
        NodeValue::Set { items: None } | NodeValue::Map { entries: None } => parent.clone(),
        _ => child.clone(),
    }
}

/// Child item with every property it lacks taken from the parent item.
fn backfill(parent: &ConfigNode, child: &ConfigNode) -> ConfigNode {
    let (Some(parent_properties), NodeValue::Complex { properties, .. }) =
        (parent.properties(), &child.value)
    else {
        return child.clone();
    };

    let mut filled = child.clone();
    if let NodeValue::Complex {
        properties: filled_properties,
        ..
    } = &mut filled.value
    {
        for (name, node) in parent_properties {
            if !properties.contains_key(name) {
                filled_properties.insert(name.clone(), node.clone());
            }
        }
    }
    filled
}

//! Save-time version stamping
//!
//! Changes are found by diffing the node about to be saved against the
//! snapshot previously stored at the same scope. A node's version moves
//! only when its content or a descendant's content differs. Every node also
//! records the scope name and version of the matching ancestor node, which
//! the merge engine later compares against to detect staleness.
//!
//! Set items are matched by the same key the merge engine uses, so an
//! edited item keeps its history.

use std::collections::{BTreeMap, HashMap};

use super::{ConfigNode, NodeValue};
use crate::schema::{PropertyDescriptor, Schema, TypeDescriptor};
use crate::scope::ScopePath;

/// Produce the node to persist at `target`.
///
/// * `root_type` - type of the root node being saved
/// * `previous` - snapshot currently stored at `target`, if any
/// * `current` - node produced from the edited live object
/// * `ancestor` - merged node of all levels above `target`, if any
pub fn stamp_for_save(
    schema: &Schema,
    root_type: &TypeDescriptor,
    previous: Option<&ConfigNode>,
    current: &ConfigNode,
    ancestor: Option<&ConfigNode>,
    target: &ScopePath,
) -> ConfigNode {
    Stamper { schema, target }.stamp(Shape::Type(root_type), previous, current, ancestor)
}

/// What the schema says about the node being stamped.
#[derive(Clone, Copy)]
enum Shape<'s> {
    Unknown,
    Type(&'s TypeDescriptor),
    Property(&'s PropertyDescriptor),
}

struct Stamper<'s> {
    schema: &'s Schema,
    target: &'s ScopePath,
}

impl<'s> Stamper<'s> {
    fn stamp(
        &self,
        shape: Shape<'s>,
        previous: Option<&ConfigNode>,
        current: &ConfigNode,
        ancestor: Option<&ConfigNode>,
    ) -> ConfigNode {
        let value = match &current.value {
            NodeValue::Simple { value } => NodeValue::Simple {
                value: value.clone(),
            },
            NodeValue::Complex {
                properties,
                declared_properties,
            } => {
                let descriptor = match shape {
                    Shape::Type(descriptor) => Some(descriptor),
                    Shape::Property(property) => property.value_type(self.schema, current),
                    Shape::Unknown => None,
                };
                NodeValue::Complex {
                    properties: properties
                        .iter()
                        .map(|(name, child)| {
                            let child_shape = descriptor
                                .and_then(|d| d.get(name))
                                .map_or(Shape::Unknown, Shape::Property);
                            let stamped = self.stamp(
                                child_shape,
                                previous.and_then(|p| p.property(name)),
                                child,
                                ancestor.and_then(|a| a.property(name)),
                            );
                            (name.clone(), stamped)
                        })
                        .collect(),
                    declared_properties: declared_properties.clone(),
                }
            }
            NodeValue::List { items } => NodeValue::List {
                items: items.as_ref().map(|items| {
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| {
                            self.stamp(
                                self.item_shape(shape, item),
                                previous.and_then(|p| p.items()).and_then(|p| p.get(i)),
                                item,
                                ancestor.and_then(|a| a.items()).and_then(|a| a.get(i)),
                            )
                        })
                        .collect()
                }),
            },
            NodeValue::Set { items } => NodeValue::Set {
                items: items.as_ref().map(|items| {
                    let previous_items = self.by_key(shape, previous.and_then(|p| p.items()));
                    let ancestor_items = self.by_key(shape, ancestor.and_then(|a| a.items()));
                    items
                        .iter()
                        .map(|item| {
                            let key = self.set_key(shape, item);
                            self.stamp(
                                self.item_shape(shape, item),
                                previous_items.get(&key).copied(),
                                item,
                                ancestor_items.get(&key).copied(),
                            )
                        })
                        .collect()
                }),
            },
            NodeValue::Map { entries } => NodeValue::Map {
                entries: entries.as_ref().map(|entries| {
                    entries
                        .iter()
                        .map(|(key, entry)| {
                            let stamped = self.stamp(
                                self.item_shape(shape, entry),
                                previous.and_then(|p| p.entries()).and_then(|p| p.get(key)),
                                entry,
                                ancestor.and_then(|a| a.entries()).and_then(|a| a.get(key)),
                            );
                            (key.clone(), stamped)
                        })
                        .collect::<BTreeMap<_, _>>()
                }),
            },
        };

        let version = match previous {
            Some(previous) if previous.content_eq(current) => previous.version(),
            Some(previous) => previous.version() + 1,
            None => 1,
        };

        let mut meta = current.meta.clone();
        meta.defining_scope_path = self.target.clone();
        meta.version = version;
        match ancestor {
            Some(ancestor) => {
                meta.parent_scope_name = Some(ancestor.scope_name().to_string());
                meta.parent_version = ancestor.version();
            }
            None => {
                meta.parent_scope_name = None;
                meta.parent_version = 0;
            }
        }

        ConfigNode::new(meta, value)
    }

    /// Shape of one item of a collection.
    fn item_shape(&self, collection: Shape<'s>, item: &ConfigNode) -> Shape<'s> {
        match collection {
            Shape::Property(property) => property
                .value_type(self.schema, item)
                .map_or(Shape::Unknown, Shape::Type),
            _ => Shape::Unknown,
        }
    }

    /// Merge key of a set item; whole content when the schema cannot key it.
    fn set_key(&self, collection: Shape<'s>, item: &ConfigNode) -> String {
        match collection {
            Shape::Property(property) => property
                .set_item_key(self.schema, &property.name, item)
                .unwrap_or_else(|_| item.content_fingerprint()),
            _ => item.content_fingerprint(),
        }
    }

    fn by_key<'n>(
        &self,
        collection: Shape<'s>,
        items: Option<&'n [ConfigNode]>,
    ) -> HashMap<String, &'n ConfigNode> {
        let mut index = HashMap::new();
        for item in items.unwrap_or_default() {
            index.entry(self.set_key(collection, item)).or_insert(item);
        }
        index
    }
}

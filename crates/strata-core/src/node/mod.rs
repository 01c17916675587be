//! Configuration node tree
//!
//! A node is one of five shapes (simple value, complex, list, set, map) plus
//! metadata describing where it was defined and which parent snapshot it
//! was saved against. Absent collections (`None`) mean "not present at this
//! level" and are distinct from empty collections.

pub mod stamp;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::scope::ScopePath;

/// Metadata carried by every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    /// Scope path of the snapshot this node was read from.
    pub defining_scope_path: ScopePath,
    /// Declared or runtime type name.
    pub property_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_name: Option<String>,
    #[serde(default)]
    pub polymorph: bool,
    #[serde(default)]
    pub version: i64,
    /// Scope name of the ancestor node this one was saved against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_scope_name: Option<String>,
    /// Version of that ancestor node at save time.
    #[serde(default)]
    pub parent_version: i64,
}

impl NodeMeta {
    pub fn new(defining_scope_path: ScopePath, property_type: impl Into<String>) -> Self {
        Self {
            defining_scope_path,
            property_type: property_type.into(),
            property_name: None,
            polymorph: false,
            version: 0,
            parent_scope_name: None,
            parent_version: 0,
        }
    }
}

/// Payload of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeValue {
    Simple {
        value: Option<String>,
    },
    Complex {
        properties: BTreeMap<String, ConfigNode>,
        /// Properties explicitly present at this node's own scope.
        #[serde(default)]
        declared_properties: BTreeSet<String>,
    },
    List {
        items: Option<Vec<ConfigNode>>,
    },
    /// Unordered; identity of items is decided by the item type.
    Set {
        items: Option<Vec<ConfigNode>>,
    },
    Map {
        entries: Option<BTreeMap<String, ConfigNode>>,
    },
}

/// Shape of a node without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Simple,
    Complex,
    List,
    Set,
    Map,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Simple => "simple",
            NodeKind::Complex => "complex",
            NodeKind::List => "list",
            NodeKind::Set => "set",
            NodeKind::Map => "map",
        };
        f.write_str(s)
    }
}

impl NodeValue {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeValue::Simple { .. } => NodeKind::Simple,
            NodeValue::Complex { .. } => NodeKind::Complex,
            NodeValue::List { .. } => NodeKind::List,
            NodeValue::Set { .. } => NodeKind::Set,
            NodeValue::Map { .. } => NodeKind::Map,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigNode {
    pub meta: NodeMeta,
    pub value: NodeValue,
}

impl ConfigNode {
    pub fn new(meta: NodeMeta, value: NodeValue) -> Self {
        Self { meta, value }
    }

    pub fn simple(scope: &ScopePath, property_type: &str, value: Option<&str>) -> Self {
        Self::new(
            NodeMeta::new(scope.clone(), property_type),
            NodeValue::Simple {
                value: value.map(str::to_string),
            },
        )
    }

    /// Empty complex node; add properties with [`ConfigNode::with_property`].
    pub fn complex(scope: &ScopePath, property_type: &str) -> Self {
        Self::new(
            NodeMeta::new(scope.clone(), property_type),
            NodeValue::Complex {
                properties: BTreeMap::new(),
                declared_properties: BTreeSet::new(),
            },
        )
    }

    pub fn list(scope: &ScopePath, property_type: &str, items: Option<Vec<ConfigNode>>) -> Self {
        Self::new(
            NodeMeta::new(scope.clone(), property_type),
            NodeValue::List { items },
        )
    }

    pub fn set(scope: &ScopePath, property_type: &str, items: Option<Vec<ConfigNode>>) -> Self {
        Self::new(
            NodeMeta::new(scope.clone(), property_type),
            NodeValue::Set { items },
        )
    }

    pub fn map(
        scope: &ScopePath,
        property_type: &str,
        entries: Option<BTreeMap<String, ConfigNode>>,
    ) -> Self {
        Self::new(
            NodeMeta::new(scope.clone(), property_type),
            NodeValue::Map { entries },
        )
    }

    /// Add a property declared at this node's own scope.
    ///
    /// No effect on non-complex nodes.
    pub fn with_property(mut self, name: &str, node: ConfigNode) -> Self {
        self.insert_property(name, node, true);
        self
    }

    /// Add a property carried over from an ancestor scope.
    pub fn with_inherited_property(mut self, name: &str, node: ConfigNode) -> Self {
        self.insert_property(name, node, false);
        self
    }

    fn insert_property(&mut self, name: &str, mut node: ConfigNode, declared: bool) {
        if let NodeValue::Complex {
            properties,
            declared_properties,
        } = &mut self.value
        {
            node.meta.property_name = Some(name.to_string());
            properties.insert(name.to_string(), node);
            if declared {
                declared_properties.insert(name.to_string());
            }
        }
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.meta.version = version;
        self
    }

    pub fn with_parent(mut self, scope_name: &str, version: i64) -> Self {
        self.meta.parent_scope_name = Some(scope_name.to_string());
        self.meta.parent_version = version;
        self
    }

    pub fn polymorphic(mut self) -> Self {
        self.meta.polymorph = true;
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.value.kind()
    }

    pub fn scope_path(&self) -> &ScopePath {
        &self.meta.defining_scope_path
    }

    /// Name of the scope this node was defined at.
    pub fn scope_name(&self) -> &str {
        self.meta.defining_scope_path.last().name()
    }

    pub fn version(&self) -> i64 {
        self.meta.version
    }

    pub fn property_type(&self) -> &str {
        &self.meta.property_type
    }

    /// Value of a simple node; `None` for other kinds or absent values.
    pub fn simple_value(&self) -> Option<&str> {
        match &self.value {
            NodeValue::Simple { value } => value.as_deref(),
            _ => None,
        }
    }

    pub fn property(&self, name: &str) -> Option<&ConfigNode> {
        match &self.value {
            NodeValue::Complex { properties, .. } => properties.get(name),
            _ => None,
        }
    }

    pub fn properties(&self) -> Option<&BTreeMap<String, ConfigNode>> {
        match &self.value {
            NodeValue::Complex { properties, .. } => Some(properties),
            _ => None,
        }
    }

    pub fn declared_properties(&self) -> Option<&BTreeSet<String>> {
        match &self.value {
            NodeValue::Complex {
                declared_properties,
                ..
            } => Some(declared_properties),
            _ => None,
        }
    }

    /// Items of a list or set node.
    pub fn items(&self) -> Option<&[ConfigNode]> {
        match &self.value {
            NodeValue::List { items } | NodeValue::Set { items } => items.as_deref(),
            _ => None,
        }
    }

    pub fn entries(&self) -> Option<&BTreeMap<String, ConfigNode>> {
        match &self.value {
            NodeValue::Map { entries } => entries.as_ref(),
            _ => None,
        }
    }

    /// Follow a dotted property path (`db.host`) through complex nodes.
    pub fn lookup(&self, dotted: &str) -> Option<&ConfigNode> {
        dotted
            .split('.')
            .try_fold(self, |node, name| node.property(name))
    }

    /// Structural equality ignoring metadata.
    pub fn content_eq(&self, other: &ConfigNode) -> bool {
        match (&self.value, &other.value) {
            (NodeValue::Simple { value: a }, NodeValue::Simple { value: b }) => a == b,
            (
                NodeValue::Complex { properties: a, .. },
                NodeValue::Complex { properties: b, .. },
            ) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.content_eq(other)))
            }
            (NodeValue::List { items: a }, NodeValue::List { items: b }) => {
                option_slices_eq(a.as_deref(), b.as_deref())
            }
            (NodeValue::Set { items: a }, NodeValue::Set { items: b }) => match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => {
                    let mut left: Vec<String> = a.iter().map(|n| n.content_fingerprint()).collect();
                    let mut right: Vec<String> = b.iter().map(|n| n.content_fingerprint()).collect();
                    left.sort();
                    right.sort();
                    left == right
                }
                _ => false,
            },
            (NodeValue::Map { entries: a }, NodeValue::Map { entries: b }) => match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => {
                    a.len() == b.len()
                        && a.iter()
                            .all(|(k, v)| b.get(k).is_some_and(|other| v.content_eq(other)))
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Canonical text of the content, ignoring metadata.
    pub fn content_fingerprint(&self) -> String {
        let mut out = String::new();
        self.write_fingerprint(&mut out);
        out
    }

    fn write_fingerprint(&self, out: &mut String) {
        match &self.value {
            NodeValue::Simple { value } => match value {
                Some(v) => push_quoted(out, v),
                None => out.push_str("null"),
            },
            NodeValue::Complex { properties, .. } => {
                push_quoted(out, &self.meta.property_type);
                out.push('{');
                for (name, node) in properties {
                    push_quoted(out, name);
                    out.push(':');
                    node.write_fingerprint(out);
                    out.push(';');
                }
                out.push('}');
            }
            NodeValue::List { items } => write_items(out, '[', ']', items.as_deref(), false),
            NodeValue::Set { items } => write_items(out, '<', '>', items.as_deref(), true),
            NodeValue::Map { entries } => match entries {
                Some(entries) => {
                    out.push('(');
                    for (key, node) in entries {
                        push_quoted(out, key);
                        out.push('=');
                        node.write_fingerprint(out);
                        out.push(';');
                    }
                    out.push(')');
                }
                None => out.push_str("null"),
            },
        }
    }
}

/// Quoted, with backslashes and double quotes escaped, so names and values
/// cannot run into the surrounding separators.
fn push_quoted(out: &mut String, text: &str) {
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

fn option_slices_eq(a: Option<&[ConfigNode]>, b: Option<&[ConfigNode]>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.content_eq(y)),
        _ => false,
    }
}

fn write_items(out: &mut String, open: char, close: char, items: Option<&[ConfigNode]>, sort: bool) {
    let Some(items) = items else {
        out.push_str("null");
        return;
    };
    let mut parts: Vec<String> = items.iter().map(ConfigNode::content_fingerprint).collect();
    if sort {
        parts.sort();
    }
    out.push(open);
    out.push_str(&parts.join(","));
    out.push(close);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global() -> ScopePath {
        "class[name=App]/default/global".parse().unwrap()
    }

    #[test]
    fn test_with_property_tracks_declared() {
        let scope = global();
        let node = ConfigNode::complex(&scope, "App")
            .with_property("port", ConfigNode::simple(&scope, "u16", Some("8080")))
            .with_inherited_property("host", ConfigNode::simple(&scope, "string", Some("h")));

        let declared = node.declared_properties().unwrap();
        assert!(declared.contains("port"));
        assert!(!declared.contains("host"));
        assert_eq!(node.property("port").unwrap().meta.property_name.as_deref(), Some("port"));
        assert_eq!(node.lookup("port").and_then(ConfigNode::simple_value), Some("8080"));
    }

    #[test]
    fn test_absent_and_empty_collections_differ() {
        let scope = global();
        let absent = ConfigNode::list(&scope, "string", None);
        let empty = ConfigNode::list(&scope, "string", Some(vec![]));
        assert!(!absent.content_eq(&empty));
        assert!(absent.items().is_none());
        assert_eq!(empty.items().map(<[ConfigNode]>::len), Some(0));
    }

    #[test]
    fn test_content_eq_ignores_metadata_and_set_order() {
        let scope = global();
        let a = ConfigNode::simple(&scope, "string", Some("a"));
        let b = ConfigNode::simple(&scope, "string", Some("b"));
        let left = ConfigNode::set(&scope, "string", Some(vec![a.clone(), b.clone()])).with_version(3);
        let right = ConfigNode::set(&scope, "string", Some(vec![b, a])).with_version(7);
        assert!(left.content_eq(&right));
        assert_ne!(left, right);
    }

    #[test]
    fn test_fingerprint_keys_cannot_collide() {
        let scope = global();
        let value = |v: &str| ConfigNode::simple(&scope, "string", Some(v));

        let one_entry = BTreeMap::from([("a=\"1\";b".to_string(), value("2"))]);
        let two_entries = BTreeMap::from([
            ("a".to_string(), value("1")),
            ("b".to_string(), value("2")),
        ]);
        let crafted = ConfigNode::map(&scope, "string", Some(one_entry));
        let plain = ConfigNode::map(&scope, "string", Some(two_entries));
        assert_ne!(crafted.content_fingerprint(), plain.content_fingerprint());

        let crafted = ConfigNode::complex(&scope, "Plugin").with_property("a:\"1\";b", value("2"));
        let plain = ConfigNode::complex(&scope, "Plugin")
            .with_property("a", value("1"))
            .with_property("b", value("2"));
        assert_ne!(crafted.content_fingerprint(), plain.content_fingerprint());

        let slash = value("x\\");
        let quote = value("x\"");
        assert_ne!(slash.content_fingerprint(), quote.content_fingerprint());
    }

    #[test]
    fn test_json_shape() {
        let scope = global();
        let node = ConfigNode::simple(&scope, "string", Some("x")).with_parent("default", 2);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["value"]["kind"], "simple");
        assert_eq!(json["meta"]["parent_scope_name"], "default");
        let back: ConfigNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }
}

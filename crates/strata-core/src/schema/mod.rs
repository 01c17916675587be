//! Type descriptors and per-property merge policies
//!
//! A [`Schema`] is the build-time description of every configuration class:
//! its properties, their node kinds, how each one merges across scopes, and
//! which properties reference other classes.

pub mod document;
pub mod parser;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StrataError};
use crate::merge::strategy::StrategyRegistry;
use crate::node::{ConfigNode, NodeKind};
use crate::scope::{ScopePath, ScopeSegment};

pub use document::SchemaDocument;
pub use parser::{parse_schema_toml, parse_schema_toml_str};

fn normalize(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace('_', "-")
}

/// What to do when a child snapshot was saved against an older parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StalePolicy {
    /// Discard the child value and keep the parent's.
    UseParent,
    /// Keep going with the regular value merge.
    #[default]
    Merge,
}

impl FromStr for StalePolicy {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match normalize(s).as_str() {
            "use-parent" => Ok(StalePolicy::UseParent),
            "merge" => Ok(StalePolicy::Merge),
            _ => Err(StrataError::InvalidMergeConfiguration(format!(
                "Unknown staleness policy '{s}'"
            ))),
        }
    }
}

/// How a property's value combines parent and child.
///
/// Which variants are legal depends on the property kind; see
/// [`PropertyDescriptor::check_policy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueMerge {
    UseChild,
    UseParent,
    Merge,
    /// Named [`crate::merge::strategy::SimpleValueMergingStrategy`].
    Strategy(String),
}

impl FromStr for ValueMerge {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = normalize(s);
        Ok(match normalized.as_str() {
            "use-child" => ValueMerge::UseChild,
            "use-parent" => ValueMerge::UseParent,
            "merge" => ValueMerge::Merge,
            "" => {
                return Err(StrataError::InvalidMergeConfiguration(
                    "Empty merge policy".to_string(),
                ));
            }
            _ => ValueMerge::Strategy(s.trim().to_string()),
        })
    }
}

impl fmt::Display for ValueMerge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueMerge::UseChild => f.write_str("use-child"),
            ValueMerge::UseParent => f.write_str("use-parent"),
            ValueMerge::Merge => f.write_str("merge"),
            ValueMerge::Strategy(name) => f.write_str(name),
        }
    }
}

/// Fate of a set/map entry present on only one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPolicy {
    Add,
    Remove,
}

impl FromStr for EntryPolicy {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match normalize(s).as_str() {
            "add" => Ok(EntryPolicy::Add),
            "remove" => Ok(EntryPolicy::Remove),
            _ => Err(StrataError::InvalidMergeConfiguration(format!(
                "Unknown entry policy '{s}'"
            ))),
        }
    }
}

/// How a set/map entry present on both sides is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ItemMerge {
    /// Child item, with properties missing from it filled from the parent item.
    #[default]
    UseChild,
    UseParent,
    /// Recursive complex merge; complex, non-polymorphic items only.
    Merge,
}

impl FromStr for ItemMerge {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match normalize(s).as_str() {
            "use-child" => Ok(ItemMerge::UseChild),
            "use-parent" => Ok(ItemMerge::UseParent),
            "merge" => Ok(ItemMerge::Merge),
            _ => Err(StrataError::InvalidMergeConfiguration(format!(
                "Unknown item merge policy '{s}'"
            ))),
        }
    }
}

/// Shape of collection items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    #[default]
    Simple,
    Complex,
}

/// Full merge policy of one property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePolicy {
    pub stale: StalePolicy,
    pub value: ValueMerge,
    pub entry_added: EntryPolicy,
    pub entry_removed: EntryPolicy,
    pub item: ItemMerge,
}

impl MergePolicy {
    /// Defaults for a property of the given kind.
    pub fn for_kind(kind: NodeKind, polymorph: bool) -> Self {
        let value = match kind {
            NodeKind::Complex if !polymorph => ValueMerge::Merge,
            _ => ValueMerge::UseChild,
        };
        Self {
            stale: StalePolicy::default(),
            value,
            entry_added: EntryPolicy::Add,
            entry_removed: EntryPolicy::Remove,
            item: ItemMerge::default(),
        }
    }
}

/// Declared link from a property to another configuration class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDescriptor {
    /// Referenced type name.
    pub target: String,
    /// Explicit scope path overriding the target's default path.
    #[serde(default)]
    pub scope_path: Option<ScopePath>,
    /// Instance name appended as an `instance[name=..]` scope.
    #[serde(default)]
    pub instance: Option<String>,
}

impl ReferenceDescriptor {
    pub fn to(target: &str) -> Self {
        Self {
            target: target.to_string(),
            scope_path: None,
            instance: None,
        }
    }

    pub fn at(mut self, scope_path: ScopePath) -> Self {
        self.scope_path = Some(scope_path);
        self
    }

    pub fn instance(mut self, name: &str) -> Self {
        self.instance = Some(name.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: NodeKind,
    /// Value type for simple properties, class name for complex ones,
    /// item type for collections.
    pub type_name: String,
    pub item_kind: ItemKind,
    pub polymorph: bool,
    pub reference: Option<ReferenceDescriptor>,
    pub policy: MergePolicy,
}

impl PropertyDescriptor {
    fn new(name: &str, kind: NodeKind, type_name: &str, item_kind: ItemKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            type_name: type_name.to_string(),
            item_kind,
            polymorph: false,
            reference: None,
            policy: MergePolicy::for_kind(kind, false),
        }
    }

    pub fn simple(name: &str, type_name: &str) -> Self {
        Self::new(name, NodeKind::Simple, type_name, ItemKind::Simple)
    }

    pub fn complex(name: &str, type_name: &str) -> Self {
        Self::new(name, NodeKind::Complex, type_name, ItemKind::Complex)
    }

    pub fn list(name: &str, item_kind: ItemKind, item_type: &str) -> Self {
        Self::new(name, NodeKind::List, item_type, item_kind)
    }

    pub fn set(name: &str, item_kind: ItemKind, item_type: &str) -> Self {
        Self::new(name, NodeKind::Set, item_type, item_kind)
    }

    pub fn map(name: &str, item_kind: ItemKind, value_type: &str) -> Self {
        Self::new(name, NodeKind::Map, value_type, item_kind)
    }

    /// Mark the property (or its items) polymorphic.
    ///
    /// Resets the value policy to the polymorphic default when it was still
    /// the kind default.
    pub fn polymorphic(mut self) -> Self {
        if self.policy.value == MergePolicy::for_kind(self.kind, false).value {
            self.policy.value = MergePolicy::for_kind(self.kind, true).value;
        }
        self.polymorph = true;
        self
    }

    pub fn references(mut self, reference: ReferenceDescriptor) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn merge(mut self, value: ValueMerge) -> Self {
        self.policy.value = value;
        self
    }

    pub fn on_stale(mut self, stale: StalePolicy) -> Self {
        self.policy.stale = stale;
        self
    }

    pub fn entries(mut self, added: EntryPolicy, removed: EntryPolicy) -> Self {
        self.policy.entry_added = added;
        self.policy.entry_removed = removed;
        self
    }

    pub fn items(mut self, item: ItemMerge) -> Self {
        self.policy.item = item;
        self
    }

    pub(crate) fn is_complex_item(&self) -> bool {
        self.kind == NodeKind::Complex
            || (matches!(self.kind, NodeKind::List | NodeKind::Set | NodeKind::Map)
                && self.item_kind == ItemKind::Complex)
    }

    /// Type of a complex value or item of this property.
    ///
    /// Polymorphic values use their runtime type name.
    pub(crate) fn value_type<'s>(
        &self,
        schema: &'s Schema,
        node: &ConfigNode,
    ) -> Option<&'s TypeDescriptor> {
        if !self.is_complex_item() {
            return None;
        }
        if self.polymorph {
            schema.get(node.property_type())
        } else {
            schema.get(&self.type_name)
        }
    }

    /// Key identifying a set item across levels and saves: the item itself
    /// for simple items, the identity property's value for complex ones.
    ///
    /// Polymorphic items use their runtime type's identity and fall back to
    /// their whole content when that type declares none.
    pub(crate) fn set_item_key(
        &self,
        schema: &Schema,
        at: &str,
        item: &ConfigNode,
    ) -> Result<String> {
        if self.item_kind == ItemKind::Simple {
            return Ok(item.content_fingerprint());
        }

        let identity = if self.polymorph {
            let runtime = schema
                .get(item.property_type())
                .and_then(|t| t.identity.as_deref());
            match runtime {
                Some(identity) => identity,
                None => return Ok(item.content_fingerprint()),
            }
        } else {
            let descriptor = schema.require(&self.type_name)?;
            descriptor.identity.as_deref().ok_or_else(|| {
                StrataError::invalid_merge(
                    at,
                    format!("set item type '{}' declares no identity property", descriptor.name),
                )
            })?
        };

        item.property(identity)
            .map(ConfigNode::content_fingerprint)
            .ok_or_else(|| {
                StrataError::corrupt(
                    at,
                    format!(
                        "set item defined at {} has no value for identity property '{identity}'",
                        item.scope_path()
                    ),
                )
            })
    }

    /// Reject policy combinations the merge engine cannot honor.
    ///
    /// `owner` names the declaring type for error messages.
    pub fn check_policy(
        &self,
        owner: &str,
        schema: &Schema,
        strategies: &StrategyRegistry,
    ) -> Result<()> {
        let at = format!("{owner}.{}", self.name);
        match self.kind {
            NodeKind::Simple => match &self.policy.value {
                ValueMerge::UseChild | ValueMerge::UseParent => {}
                ValueMerge::Strategy(name) if strategies.contains(name) => {}
                ValueMerge::Strategy(name) => {
                    return Err(StrataError::invalid_merge(
                        &at,
                        format!("unknown simple-value strategy '{name}'"),
                    ));
                }
                ValueMerge::Merge => {
                    return Err(StrataError::invalid_merge(
                        &at,
                        "'merge' is not a simple-value policy",
                    ));
                }
            },
            NodeKind::Complex => match &self.policy.value {
                ValueMerge::UseChild | ValueMerge::UseParent => {}
                ValueMerge::Merge if self.polymorph => {
                    return Err(StrataError::invalid_merge(
                        &at,
                        "'merge' is not allowed on a polymorphic property",
                    ));
                }
                ValueMerge::Merge => {}
                ValueMerge::Strategy(name) => {
                    return Err(StrataError::invalid_merge(
                        &at,
                        format!("unknown complex merge policy '{name}'"),
                    ));
                }
            },
            NodeKind::List => match &self.policy.value {
                ValueMerge::UseChild | ValueMerge::UseParent => {}
                other => {
                    return Err(StrataError::invalid_merge(
                        &at,
                        format!("list properties only support use-child/use-parent, found '{other}'"),
                    ));
                }
            },
            NodeKind::Set | NodeKind::Map => {
                if self.policy.item == ItemMerge::Merge {
                    if self.polymorph {
                        return Err(StrataError::invalid_merge(
                            &at,
                            "'merge' is not allowed on polymorphic items",
                        ));
                    }
                    if self.item_kind != ItemKind::Complex {
                        return Err(StrataError::invalid_merge(
                            &at,
                            "'merge' requires complex items",
                        ));
                    }
                }
                if self.kind == NodeKind::Set
                    && self.item_kind == ItemKind::Complex
                    && !self.polymorph
                {
                    let item_type = schema.require(&self.type_name)?;
                    if item_type.identity.is_none() {
                        return Err(StrataError::invalid_merge(
                            &at,
                            format!("set item type '{}' declares no identity property", self.type_name),
                        ));
                    }
                }
            }
        }

        if self.is_complex_item() && !self.polymorph && schema.get(&self.type_name).is_none() {
            return Err(StrataError::Schema(format!(
                "{at}: unknown type '{}'",
                self.type_name
            )));
        }
        Ok(())
    }
}

/// Description of one configuration class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub name: String,
    /// Property whose value identifies items of this type inside sets.
    pub identity: Option<String>,
    /// Domain segments appended to `class/default` to form the default path.
    pub default_scopes: Vec<ScopeSegment>,
    pub properties: IndexMap<String, PropertyDescriptor>,
}

impl TypeDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            identity: None,
            default_scopes: Vec::new(),
            properties: IndexMap::new(),
        }
    }

    pub fn identity(mut self, property: &str) -> Self {
        self.identity = Some(property.to_string());
        self
    }

    pub fn default_scope(mut self, segment: ScopeSegment) -> Self {
        self.default_scopes.push(segment);
        self
    }

    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.insert(property.name.clone(), property);
        self
    }

    pub fn get(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.get(name)
    }

    /// `class[name=..]/default` plus the declared default scopes.
    pub fn default_path(&self) -> Result<ScopePath> {
        let mut path = ScopePath::for_class(&self.name)?;
        for segment in &self.default_scopes {
            path = path.append_segment(segment.clone())?;
        }
        Ok(path)
    }
}

/// Every known configuration class, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    types: BTreeMap<String, TypeDescriptor>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    pub fn insert(&mut self, descriptor: TypeDescriptor) {
        self.types.insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&TypeDescriptor> {
        self.get(name)
            .ok_or_else(|| StrataError::Schema(format!("Unknown type '{name}'")))
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values()
    }

    /// Check every property policy and identity declaration.
    pub fn validate(&self, strategies: &StrategyRegistry) -> Result<()> {
        for descriptor in self.types.values() {
            if let Some(identity) = &descriptor.identity {
                match descriptor.get(identity) {
                    Some(p) if p.kind == NodeKind::Simple => {}
                    Some(_) => {
                        return Err(StrataError::Schema(format!(
                            "{}: identity property '{identity}' must be simple",
                            descriptor.name
                        )));
                    }
                    None => {
                        return Err(StrataError::Schema(format!(
                            "{}: identity property '{identity}' is not declared",
                            descriptor.name
                        )));
                    }
                }
            }
            for property in descriptor.properties.values() {
                property.check_policy(&descriptor.name, self, strategies)?;
                if let Some(reference) = &property.reference {
                    self.require(&reference.target)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_schema() -> Schema {
        Schema::new()
            .with_type(
                TypeDescriptor::new("Server")
                    .identity("host")
                    .property(PropertyDescriptor::simple("host", "string"))
                    .property(PropertyDescriptor::simple("port", "u16")),
            )
            .with_type(
                TypeDescriptor::new("App")
                    .property(PropertyDescriptor::simple("name", "string"))
                    .property(
                        PropertyDescriptor::set("servers", ItemKind::Complex, "Server")
                            .items(ItemMerge::Merge),
                    ),
            )
    }

    #[test]
    fn test_policy_names_parse() {
        assert_eq!("USE_PARENT".parse::<StalePolicy>().unwrap(), StalePolicy::UseParent);
        assert_eq!("merge".parse::<ItemMerge>().unwrap(), ItemMerge::Merge);
        assert_eq!(
            "max-int".parse::<ValueMerge>().unwrap(),
            ValueMerge::Strategy("max-int".to_string())
        );
        assert!(matches!(
            "sometimes".parse::<EntryPolicy>(),
            Err(StrataError::InvalidMergeConfiguration(_))
        ));
    }

    #[test]
    fn test_valid_schema_passes() {
        server_schema()
            .validate(&StrategyRegistry::with_builtins())
            .unwrap();
    }

    #[test]
    fn test_merge_on_polymorphic_complex_rejected() {
        let schema = Schema::new().with_type(
            TypeDescriptor::new("App").property(
                PropertyDescriptor::complex("handler", "Handler")
                    .polymorphic()
                    .merge(ValueMerge::Merge),
            ),
        );
        let err = schema.validate(&StrategyRegistry::new()).unwrap_err();
        assert!(matches!(err, StrataError::InvalidMergeConfiguration(_)));
        assert!(err.to_string().contains("App.handler"));
    }

    #[test]
    fn test_polymorphic_default_is_use_child() {
        let property = PropertyDescriptor::complex("handler", "Handler").polymorphic();
        assert_eq!(property.policy.value, ValueMerge::UseChild);
    }

    #[test]
    fn test_set_item_without_identity_rejected() {
        let schema = Schema::new()
            .with_type(TypeDescriptor::new("Server").property(PropertyDescriptor::simple("host", "string")))
            .with_type(
                TypeDescriptor::new("App")
                    .property(PropertyDescriptor::set("servers", ItemKind::Complex, "Server")),
            );
        let err = schema.validate(&StrategyRegistry::new()).unwrap_err();
        assert!(err.to_string().contains("no identity"));
    }

    #[test]
    fn test_item_merge_on_simple_items_rejected() {
        let property = PropertyDescriptor::set("tags", ItemKind::Simple, "string").items(ItemMerge::Merge);
        let err = property
            .check_policy("App", &Schema::new(), &StrategyRegistry::new())
            .unwrap_err();
        assert!(err.to_string().contains("requires complex items"));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let property = PropertyDescriptor::simple("port", "u16")
            .merge(ValueMerge::Strategy("median".to_string()));
        let err = property
            .check_policy("App", &Schema::new(), &StrategyRegistry::with_builtins())
            .unwrap_err();
        assert!(matches!(err, StrataError::InvalidMergeConfiguration(_)));
    }

    #[test]
    fn test_default_path() {
        let descriptor = TypeDescriptor::new("Db").default_scope(ScopeSegment::named("global"));
        assert_eq!(
            descriptor.default_path().unwrap().to_string(),
            "class[name=Db]/default/global"
        );
    }
}

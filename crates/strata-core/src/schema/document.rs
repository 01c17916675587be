//! Serialized form of a schema
//!
//! ```toml
//! [types.Server]
//! identity = "host"
//!
//! [types.Server.properties.host]
//! kind = "simple"
//! type = "string"
//!
//! [types.App]
//! default_scopes = ["global"]
//!
//! [types.App.properties.servers]
//! kind = "set"
//! item = "complex"
//! type = "Server"
//! entry_removed = "add"
//! item_merge = "merge"
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    ItemKind, MergePolicy, PropertyDescriptor, ReferenceDescriptor, Schema, TypeDescriptor,
};
use crate::error::{Result, StrataError};
use crate::node::NodeKind;
use crate::scope::ScopeSegment;

/// Root of a schema file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDocument {
    #[serde(default)]
    pub types: BTreeMap<String, TypeDocument>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeDocument {
    /// Identity property for set membership
    #[serde(default)]
    pub identity: Option<String>,

    /// Domain scopes of the default path: "global", "user[name=alice]"
    #[serde(default)]
    pub default_scopes: Vec<String>,

    #[serde(default)]
    pub properties: IndexMap<String, PropertyDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyDocument {
    pub kind: NodeKind,

    /// Value type, class name, or item type for collections
    #[serde(rename = "type")]
    pub type_name: String,

    /// Item shape for list/set/map (defaults to simple)
    #[serde(default)]
    pub item: Option<ItemKind>,

    #[serde(default)]
    pub polymorph: bool,

    #[serde(default)]
    pub reference: Option<ReferenceDescriptor>,

    /// use-parent | merge
    #[serde(default)]
    pub stale: Option<String>,

    /// use-child | use-parent | merge | <strategy name>
    #[serde(default)]
    pub merge: Option<String>,

    /// add | remove
    #[serde(default)]
    pub entry_added: Option<String>,

    /// add | remove
    #[serde(default)]
    pub entry_removed: Option<String>,

    /// use-child | use-parent | merge
    #[serde(default)]
    pub item_merge: Option<String>,
}

impl SchemaDocument {
    /// Convert to a typed schema. Unknown policy names fail here.
    pub fn into_schema(self) -> Result<Schema> {
        let mut schema = Schema::new();
        for (name, document) in self.types {
            schema.insert(document.into_descriptor(&name)?);
        }
        Ok(schema)
    }
}

impl TypeDocument {
    fn into_descriptor(self, name: &str) -> Result<TypeDescriptor> {
        let mut descriptor = TypeDescriptor::new(name);
        descriptor.identity = self.identity;
        descriptor.default_scopes = self
            .default_scopes
            .iter()
            .map(|s| s.parse::<ScopeSegment>())
            .collect::<Result<Vec<_>>>()?;
        for (property_name, property) in self.properties {
            descriptor = descriptor.property(property.into_descriptor(name, &property_name)?);
        }
        Ok(descriptor)
    }
}

impl PropertyDocument {
    fn into_descriptor(self, owner: &str, name: &str) -> Result<PropertyDescriptor> {
        let at = format!("{owner}.{name}");
        let is_keyed = matches!(self.kind, NodeKind::Set | NodeKind::Map);
        let is_collection = is_keyed || self.kind == NodeKind::List;

        let item_kind = match (self.kind, self.item) {
            (NodeKind::Simple, None) => ItemKind::Simple,
            (NodeKind::Complex, None) => ItemKind::Complex,
            (_, Some(item)) if is_collection => item,
            (_, None) => ItemKind::Simple,
            (_, Some(_)) => {
                return Err(StrataError::Schema(format!(
                    "{at}: 'item' only applies to list, set and map properties"
                )));
            }
        };

        if is_keyed && self.merge.is_some() {
            return Err(StrataError::invalid_merge(
                &at,
                "set and map properties use entry_added, entry_removed and item_merge",
            ));
        }
        if !is_keyed
            && (self.entry_added.is_some()
                || self.entry_removed.is_some()
                || self.item_merge.is_some())
        {
            return Err(StrataError::invalid_merge(
                &at,
                "entry and item policies only apply to set and map properties",
            ));
        }

        let mut policy = MergePolicy::for_kind(self.kind, self.polymorph);
        if let Some(stale) = &self.stale {
            policy.stale = stale.parse()?;
        }
        if let Some(merge) = &self.merge {
            policy.value = merge.parse()?;
        }
        if let Some(added) = &self.entry_added {
            policy.entry_added = added.parse()?;
        }
        if let Some(removed) = &self.entry_removed {
            policy.entry_removed = removed.parse()?;
        }
        if let Some(item) = &self.item_merge {
            policy.item = item.parse()?;
        }

        Ok(PropertyDescriptor {
            name: name.to_string(),
            kind: self.kind,
            type_name: self.type_name,
            item_kind,
            polymorph: self.polymorph,
            reference: self.reference,
            policy,
        })
    }
}

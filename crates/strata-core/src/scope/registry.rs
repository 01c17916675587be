//! Known domain scopes and their ordering.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ScopePath, ScopeSegment};
use crate::error::{Result, StrataError};

/// A domain scope that may follow `class/default` in a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDescriptor {
    pub name: String,
    /// Property keys a segment of this scope must carry.
    #[serde(default)]
    pub required_properties: Vec<String>,
}

impl ScopeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required_properties: Vec::new(),
        }
    }

    pub fn requiring(mut self, key: impl Into<String>) -> Self {
        self.required_properties.push(key.into());
        self
    }
}

/// Ordered registry of domain scopes, most generic first.
///
/// Built once at startup and passed to whatever builds scope paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRegistry {
    scopes: Vec<ScopeDescriptor>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `global`, `user[name]`, `instance[name]`
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.scopes = vec![
            ScopeDescriptor::new("global"),
            ScopeDescriptor::new("user").requiring("name"),
            ScopeDescriptor::new("instance").requiring("name"),
        ];
        registry
    }

    /// Append a scope after all registered ones.
    pub fn register(&mut self, descriptor: ScopeDescriptor) -> Result<()> {
        if descriptor.name == super::CLASS_SCOPE || descriptor.name == super::DEFAULT_SCOPE {
            return Err(StrataError::InvalidScope(format!(
                "'{}' is a structural scope and cannot be registered",
                descriptor.name
            )));
        }
        if self.descriptor(&descriptor.name).is_some() {
            return Err(StrataError::InvalidScope(format!(
                "Scope '{}' is already registered",
                descriptor.name
            )));
        }
        self.scopes.push(descriptor);
        Ok(())
    }

    pub fn descriptor(&self, name: &str) -> Option<&ScopeDescriptor> {
        self.scopes.iter().find(|d| d.name == name)
    }

    pub fn scopes(&self) -> &[ScopeDescriptor] {
        &self.scopes
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.scopes.iter().position(|d| d.name == name)
    }

    /// Build `class[name=..]/default/<segments..>` after checking the domain segments.
    pub fn path_for(&self, class_name: &str, segments: &[ScopeSegment]) -> Result<ScopePath> {
        let mut path = ScopePath::for_class(class_name)?;
        for segment in segments {
            path = path.append_segment(segment.clone())?;
        }
        self.validate(&path)?;
        Ok(path)
    }

    /// Check domain segments are registered, in order and carry required properties.
    pub fn validate(&self, path: &ScopePath) -> Result<()> {
        let mut last_position = None;
        for segment in path.domain_segments() {
            let position = self.position(segment.name()).ok_or_else(|| {
                StrataError::InvalidScope(format!("Unknown scope '{}' in {path}", segment.name()))
            })?;
            if let Some(previous) = last_position
                && position <= previous
            {
                return Err(StrataError::InvalidScope(format!(
                    "Scope '{}' is out of order in {path}",
                    segment.name()
                )));
            }
            last_position = Some(position);

            for key in &self.scopes[position].required_properties {
                if segment.property(key).is_none() {
                    return Err(StrataError::InvalidScope(format!(
                        "Scope '{}' requires property '{key}' in {path}",
                        segment.name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parse `name` or `name:key=value,key=value` into a segment.
    pub fn parse_segment(&self, text: &str) -> Result<ScopeSegment> {
        let (name, rest) = text.split_once(':').unwrap_or((text, ""));
        let mut properties = BTreeMap::new();
        for pair in rest.split(',').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                StrataError::InvalidScope(format!("Expected key=value in '{text}'"))
            })?;
            properties.insert(key.to_string(), value.to_string());
        }
        if self.descriptor(name).is_none() {
            return Err(StrataError::InvalidScope(format!("Unknown scope '{name}'")));
        }
        Ok(ScopeSegment::new(name, properties))
    }
}

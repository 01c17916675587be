//! Scope paths identify one configuration snapshot location.
//!
//! A path always starts with the two structural scopes:
//! - `class[name=<Type>]`: identity of the configuration class
//! - `default`: the code-supplied defaults
//!
//! followed by zero or more domain scopes (e.g. `global`, `user[name=alice]`).

pub mod registry;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StrataError};

pub use registry::{ScopeDescriptor, ScopeRegistry};

/// Name of the class-identity scope (always the first segment).
pub const CLASS_SCOPE: &str = "class";
/// Name of the code-default scope (always the second segment).
pub const DEFAULT_SCOPE: &str = "default";
/// Property of the class scope carrying the class name.
pub const CLASS_NAME_PROPERTY: &str = "name";

const RESERVED_CHARS: &[char] = &['/', '[', ']', '=', ','];

/// One named level of a scope path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeSegment {
    name: String,
    properties: BTreeMap<String, String>,
}

impl ScopeSegment {
    pub fn new(name: impl Into<String>, properties: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            properties,
        }
    }

    /// Segment without properties.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, BTreeMap::new())
    }

    /// Segment with a single property.
    pub fn with_property(
        name: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(key.into(), value.into());
        Self::new(name, properties)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// True for the class-identity and code-default scopes.
    pub fn is_structural(&self) -> bool {
        self.name == CLASS_SCOPE || self.name == DEFAULT_SCOPE
    }

    /// True when every given property is present with the same value.
    pub fn matches(&self, name: &str, properties: &BTreeMap<String, String>) -> bool {
        self.name == name
            && properties
                .iter()
                .all(|(k, v)| self.properties.get(k) == Some(v))
    }

    fn validate(&self) -> Result<()> {
        check_token("scope name", &self.name)?;
        for (key, value) in &self.properties {
            check_token("scope property key", key)?;
            check_token("scope property value", value)?;
        }
        Ok(())
    }
}

impl fmt::Display for ScopeSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.properties.is_empty() {
            let props: Vec<String> = self
                .properties
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, "[{}]", props.join(","))?;
        }
        Ok(())
    }
}

impl FromStr for ScopeSegment {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        let Some(open) = s.find('[') else {
            let segment = ScopeSegment::named(s);
            segment.validate()?;
            return Ok(segment);
        };

        let Some(body) = s[open + 1..].strip_suffix(']') else {
            return Err(StrataError::InvalidScope(format!(
                "Unterminated property list in scope segment '{s}'"
            )));
        };

        let mut properties = BTreeMap::new();
        for pair in body.split(',').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                StrataError::InvalidScope(format!("Expected key=value in scope segment '{s}'"))
            })?;
            if properties.insert(key.to_string(), value.to_string()).is_some() {
                return Err(StrataError::InvalidScope(format!(
                    "Duplicate property '{key}' in scope segment '{s}'"
                )));
            }
        }

        let segment = ScopeSegment::new(&s[..open], properties);
        segment.validate()?;
        Ok(segment)
    }
}

fn check_token(what: &str, token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(StrataError::InvalidScope(format!("Empty {what}")));
    }
    if let Some(c) = token.chars().find(|c| RESERVED_CHARS.contains(c)) {
        return Err(StrataError::InvalidScope(format!(
            "Invalid character '{c}' in {what} '{token}'"
        )));
    }
    Ok(())
}

/// Ordered, immutable chain of scope segments.
///
/// Equality, ordering and hashing use the full segment sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopePath {
    segments: Vec<ScopeSegment>,
}

impl ScopePath {
    /// Build a path from explicit segments.
    ///
    /// The first segment must be the class scope and the second (when present)
    /// the default scope; names may not repeat.
    pub fn create(segments: Vec<ScopeSegment>) -> Result<Self> {
        let Some(first) = segments.first() else {
            return Err(StrataError::InvalidScope(
                "Scope path must contain at least one segment".to_string(),
            ));
        };
        if first.name != CLASS_SCOPE {
            return Err(StrataError::InvalidScope(format!(
                "Scope path must start with '{CLASS_SCOPE}', found '{}'",
                first.name
            )));
        }
        if first.property(CLASS_NAME_PROPERTY).is_none() {
            return Err(StrataError::InvalidScope(format!(
                "Class scope requires a '{CLASS_NAME_PROPERTY}' property"
            )));
        }
        if let Some(second) = segments.get(1)
            && second.name != DEFAULT_SCOPE
        {
            return Err(StrataError::InvalidScope(format!(
                "Second scope must be '{DEFAULT_SCOPE}', found '{}'",
                second.name
            )));
        }

        for (i, segment) in segments.iter().enumerate() {
            segment.validate()?;
            if segments[..i].iter().any(|s| s.name == segment.name) {
                return Err(StrataError::InvalidScope(format!(
                    "Scope '{}' appears more than once",
                    segment.name
                )));
            }
        }

        Ok(Self { segments })
    }

    /// `class[name=<class_name>]/default`
    pub fn for_class(class_name: &str) -> Result<Self> {
        Self::create(vec![
            ScopeSegment::with_property(CLASS_SCOPE, CLASS_NAME_PROPERTY, class_name),
            ScopeSegment::named(DEFAULT_SCOPE),
        ])
    }

    /// New path with one more segment.
    pub fn append(&self, name: &str, properties: BTreeMap<String, String>) -> Result<Self> {
        self.append_segment(ScopeSegment::new(name, properties))
    }

    pub fn append_segment(&self, segment: ScopeSegment) -> Result<Self> {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self::create(segments)
    }

    /// Path without the last segment, or `None` for a single-segment path.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn last(&self) -> &ScopeSegment {
        // Non-empty by construction.
        &self.segments[self.segments.len() - 1]
    }

    pub fn segments(&self) -> &[ScopeSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn class_name(&self) -> &str {
        self.segments[0]
            .property(CLASS_NAME_PROPERTY)
            .unwrap_or_default()
    }

    /// True when the last segment is the class or default scope.
    pub fn is_structural(&self) -> bool {
        self.last().is_structural()
    }

    /// Segments after `class` and `default`.
    pub fn domain_segments(&self) -> &[ScopeSegment] {
        &self.segments[self.segments.len().min(2)..]
    }

    /// Every prefix of this path, most generic first, ending with the path itself.
    pub fn prefixes(&self) -> impl Iterator<Item = ScopePath> + '_ {
        (1..=self.segments.len()).map(|n| ScopePath {
            segments: self.segments[..n].to_vec(),
        })
    }

    /// True when `self` equals `ancestor` or extends it.
    pub fn starts_with(&self, ancestor: &ScopePath) -> bool {
        self.segments.starts_with(&ancestor.segments)
    }

    /// Segment with the given scope name.
    pub fn segment(&self, name: &str) -> Option<&ScopeSegment> {
        self.segments.iter().find(|s| s.name == name)
    }
}

impl fmt::Display for ScopePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for ScopePath {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        let segments = s
            .trim()
            .split('/')
            .map(ScopeSegment::from_str)
            .collect::<Result<Vec<_>>>()?;
        Self::create(segments)
    }
}

impl TryFrom<String> for ScopePath {
    type Error = StrataError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ScopePath> for String {
    fn from(path: ScopePath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_path() -> ScopePath {
        ScopePath::for_class("App")
            .unwrap()
            .append("global", BTreeMap::new())
            .unwrap()
            .append_segment(ScopeSegment::with_property("user", "name", "alice"))
            .unwrap()
    }

    #[test]
    fn test_parent_append_roundtrip() {
        let path = user_path();
        let last = path.last().clone();
        let rebuilt = path
            .parent()
            .unwrap()
            .append(last.name(), last.properties().clone())
            .unwrap();
        assert_eq!(rebuilt, path);
    }

    #[test]
    fn test_single_segment_has_no_parent() {
        let class_only = ScopePath::for_class("App").unwrap().parent().unwrap();
        assert_eq!(class_only.len(), 1);
        assert!(class_only.parent().is_none());
    }

    #[test]
    fn test_duplicate_scope_rejected() {
        let err = user_path()
            .append("global", BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, StrataError::InvalidScope(_)));
    }

    #[test]
    fn test_empty_path_rejected() {
        assert!(matches!(
            ScopePath::create(vec![]),
            Err(StrataError::InvalidScope(_))
        ));
    }

    #[test]
    fn test_structural_prefix_enforced() {
        let err = ScopePath::create(vec![ScopeSegment::named("global")]).unwrap_err();
        assert!(err.to_string().contains("class"));

        let err = ScopePath::create(vec![
            ScopeSegment::with_property(CLASS_SCOPE, CLASS_NAME_PROPERTY, "App"),
            ScopeSegment::named("global"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("default"));
    }

    #[test]
    fn test_text_form_roundtrip() {
        let path = user_path();
        let text = path.to_string();
        assert_eq!(text, "class[name=App]/default/global/user[name=alice]");
        assert_eq!(text.parse::<ScopePath>().unwrap(), path);
    }

    #[test]
    fn test_reserved_characters_rejected() {
        let err = ScopePath::for_class("a/b").unwrap_err();
        assert!(matches!(err, StrataError::InvalidScope(_)));
        assert!("class[name=App/default".parse::<ScopePath>().is_err());
    }

    #[test]
    fn test_prefixes_generic_first() {
        let names: Vec<String> = user_path()
            .prefixes()
            .map(|p| p.last().name().to_string())
            .collect();
        assert_eq!(names, vec!["class", "default", "global", "user"]);
    }

    #[test]
    fn test_structural_and_domain_segments() {
        let path = user_path();
        assert!(!path.is_structural());
        assert!(path.parent().unwrap().parent().unwrap().is_structural());
        assert_eq!(path.domain_segments().len(), 2);
        assert_eq!(path.class_name(), "App");
        assert!(path.starts_with(&ScopePath::for_class("App").unwrap()));
    }

    #[test]
    fn test_serde_uses_text_form() {
        let path = user_path();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"class[name=App]/default/global/user[name=alice]\"");
        let back: ScopePath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}

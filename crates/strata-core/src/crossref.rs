//! Cross-reference cycle detection
//!
//! Works on the graph of declared references between configuration
//! classes, not on node trees. A graph node is a class at a resolved scope
//! path; an edge is a property carrying a [`ReferenceDescriptor`].
//! References nested in embedded complex properties (directly or as
//! collection items) count as edges of the owning class.
//!
//! Polymorphic properties are not descended into: their runtime subtypes
//! are unknown here, so cycles running through them go undetected.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, trace};

use crate::error::{Result, StrataError};
use crate::schema::{ReferenceDescriptor, Schema, TypeDescriptor};
use crate::scope::{ScopePath, ScopeSegment};

pub const INSTANCE_SCOPE: &str = "instance";
pub const INSTANCE_NAME_PROPERTY: &str = "name";

/// Scope path a reference points at.
///
/// An explicit path on the reference wins over the target's default path;
/// an instance name appends `instance[name=..]`.
pub fn resolve_reference_path(schema: &Schema, reference: &ReferenceDescriptor) -> Result<ScopePath> {
    let base = match &reference.scope_path {
        Some(path) => path.clone(),
        None => schema.require(&reference.target)?.default_path()?,
    };
    match &reference.instance {
        Some(name) => base.append_segment(ScopeSegment::with_property(
            INSTANCE_SCOPE,
            INSTANCE_NAME_PROPERTY,
            name,
        )),
        None => Ok(base),
    }
}

#[derive(Debug, Clone)]
struct Frame {
    type_name: String,
    path: ScopePath,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.type_name, self.path)
    }
}

pub struct CycleDetector<'a> {
    schema: &'a Schema,
}

impl<'a> CycleDetector<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Check everything reachable from `root_type` at `root_path`.
    pub fn check(&self, root_type: &str, root_path: &ScopePath) -> Result<()> {
        let descriptor = self.schema.require(root_type)?;
        let mut walk = Walk {
            schema: self.schema,
            stack: vec![Frame {
                type_name: descriptor.name.clone(),
                path: root_path.clone(),
            }],
            checked: HashSet::new(),
            in_progress: HashSet::new(),
        };
        walk.visit(descriptor, root_path)?;
        debug!(
            root = %root_path,
            checked = walk.checked.len(),
            "Cross-reference check passed"
        );
        Ok(())
    }

    /// Check `type_name` rooted at its default path.
    pub fn check_type(&self, type_name: &str) -> Result<()> {
        let path = self.schema.require(type_name)?.default_path()?;
        self.check(type_name, &path)
    }

    /// Check every type in the schema.
    pub fn check_all(&self) -> Result<()> {
        self.schema
            .types()
            .try_for_each(|descriptor| self.check_type(&descriptor.name))
    }
}

struct Walk<'a> {
    schema: &'a Schema,
    stack: Vec<Frame>,
    // (type, path) pairs whose whole reachable graph is cycle-free
    checked: HashSet<(String, ScopePath)>,
    in_progress: HashSet<(String, ScopePath)>,
}

impl Walk<'_> {
    fn visit(&mut self, descriptor: &TypeDescriptor, path: &ScopePath) -> Result<()> {
        let key = (descriptor.name.clone(), path.clone());
        if self.checked.contains(&key) {
            return Ok(());
        }
        // A type embedding itself at the same path is recursion in the data
        // shape, not a reference cycle.
        if !self.in_progress.insert(key.clone()) {
            return Ok(());
        }

        for property in descriptor.properties.values() {
            if let Some(reference) = &property.reference {
                self.follow(reference)?;
            } else if property.is_complex_item() && !property.polymorph {
                let embedded = self.schema.require(&property.type_name)?;
                trace!(owner = %descriptor.name, property = %property.name, "Descending into embedded type");
                self.visit(embedded, path)?;
            }
        }

        self.in_progress.remove(&key);
        self.checked.insert(key);
        Ok(())
    }

    fn follow(&mut self, reference: &ReferenceDescriptor) -> Result<()> {
        let target = self.schema.require(&reference.target)?;
        let path = resolve_reference_path(self.schema, reference)?;
        let frame = Frame {
            type_name: target.name.clone(),
            path,
        };

        if self.stack.iter().any(|f| f.path == frame.path) {
            let chain = self
                .stack
                .iter()
                .chain(std::iter::once(&frame))
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(StrataError::CrossReferenceCycleDetected { chain });
        }

        let path = frame.path.clone();
        self.stack.push(frame);
        let outcome = self.visit(target, &path);
        self.stack.pop();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ItemKind, PropertyDescriptor};

    fn reference(name: &str, target: &str) -> PropertyDescriptor {
        PropertyDescriptor::simple(name, "string").references(ReferenceDescriptor::to(target))
    }

    #[test]
    fn test_resolve_reference_path() {
        let schema = Schema::new().with_type(
            TypeDescriptor::new("Db").default_scope(ScopeSegment::named("global")),
        );
        let plain = resolve_reference_path(&schema, &ReferenceDescriptor::to("Db")).unwrap();
        assert_eq!(plain.to_string(), "class[name=Db]/default/global");

        let instance =
            resolve_reference_path(&schema, &ReferenceDescriptor::to("Db").instance("main"))
                .unwrap();
        assert_eq!(
            instance.to_string(),
            "class[name=Db]/default/global/instance[name=main]"
        );

        let explicit: ScopePath = "class[name=Db]/default/user[name=a]".parse().unwrap();
        let overridden =
            resolve_reference_path(&schema, &ReferenceDescriptor::to("Db").at(explicit.clone()))
                .unwrap();
        assert_eq!(overridden, explicit);
    }

    #[test]
    fn test_self_reference() {
        let schema = Schema::new().with_type(TypeDescriptor::new("A").property(reference("me", "A")));
        let err = CycleDetector::new(&schema).check_type("A").unwrap_err();
        assert!(matches!(err, StrataError::CrossReferenceCycleDetected { .. }));
    }

    #[test]
    fn test_embedded_recursion_is_not_a_cycle() {
        let schema = Schema::new().with_type(
            TypeDescriptor::new("Tree")
                .property(PropertyDescriptor::list("children", ItemKind::Complex, "Tree")),
        );
        CycleDetector::new(&schema).check_type("Tree").unwrap();
    }

    #[test]
    fn test_unknown_target() {
        let schema = Schema::new().with_type(TypeDescriptor::new("A").property(reference("b", "B")));
        let err = CycleDetector::new(&schema).check_type("A").unwrap_err();
        assert!(matches!(err, StrataError::Schema(_)));
    }
}

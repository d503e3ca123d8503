//! Class definitions for business objects
//!
//! A `ClassDef` is everything the runtime needs to know about a class of
//! business objects: its properties, its primary key, its relationships and
//! its place in the class hierarchy.

use crate::key_def::PrimaryKeyDef;
use crate::prop_def::{PropDef, is_valid_identifier};
use crate::relationship_def::RelationshipDef;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use stowage_core::{Named, StowageError, StowageResult, Validatable};

// ============================================================================
// ClassDef
// ============================================================================

/// Schema of one business object class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    /// Class name (PascalCase, e.g. "Person")
    pub name: String,

    /// Parent class whose properties, key and relationships are inherited
    #[serde(default)]
    pub super_class: Option<String>,

    /// Abstract classes cannot be instantiated
    #[serde(default)]
    pub is_abstract: bool,

    /// Properties in declaration order
    pub props: Vec<PropDef>,

    /// Primary key
    #[serde(default)]
    pub primary_key: PrimaryKeyDef,

    /// Relationships owned by this class
    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,

    /// Human-readable description
    pub description: Option<String>,
}

impl ClassDef {
    /// Create an empty class definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_class: None,
            is_abstract: false,
            props: Vec::new(),
            primary_key: PrimaryKeyDef::default(),
            relationships: Vec::new(),
            description: None,
        }
    }

    // ========================================================================
    // Builder methods
    // ========================================================================

    /// Add a Guid property and make it the object-id key
    pub fn with_object_id(mut self, prop: impl Into<String>) -> Self {
        let prop = prop.into();
        self.props.push(PropDef::object_id(prop.clone()));
        self.primary_key = PrimaryKeyDef::object_id(prop);
        self
    }

    /// Add a property
    pub fn with_prop(mut self, prop: PropDef) -> Self {
        self.props.push(prop);
        self
    }

    /// Use existing properties as the primary key
    pub fn with_key<I, S>(mut self, props: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = PrimaryKeyDef::new(props);
        self
    }

    /// Add a relationship
    pub fn with_relationship(mut self, relationship: RelationshipDef) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Inherit from another class
    pub fn extends(mut self, super_class: impl Into<String>) -> Self {
        self.super_class = Some(super_class.into());
        self
    }

    /// Mark the class as abstract
    pub fn abstract_class(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    // ========================================================================
    // Query methods
    // ========================================================================

    /// Get a property definition by name
    pub fn get_prop(&self, name: &str) -> Option<&PropDef> {
        self.props.iter().find(|p| p.name == name)
    }

    /// Check if a property exists
    pub fn has_prop(&self, name: &str) -> bool {
        self.get_prop(name).is_some()
    }

    /// Get a relationship definition by name
    pub fn get_relationship(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Property names in declaration order
    pub fn prop_names(&self) -> impl Iterator<Item = &str> {
        self.props.iter().map(|p| p.name.as_str())
    }

    /// Multiple relationships, the ones delete-parent actions apply to
    pub fn multiple_relationships(&self) -> impl Iterator<Item = &RelationshipDef> {
        self.relationships.iter().filter(|r| r.is_multiple())
    }

    /// Whether `name` is part of the primary key
    pub fn is_key_prop(&self, name: &str) -> bool {
        self.primary_key.contains(name)
    }
}

impl Named for ClassDef {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Validatable for ClassDef {
    fn validate(&self) -> StowageResult<()> {
        let fail = |message: String| StowageError::ClassValidation {
            class: self.name.clone(),
            message,
        };

        if !is_valid_identifier(&self.name) {
            return Err(fail(format!("'{}' is not a valid class name", self.name)));
        }

        if !self.is_abstract && self.primary_key.is_empty() {
            return Err(fail("class must have a primary key".to_string()));
        }

        let mut names = HashSet::new();
        for prop in &self.props {
            if !names.insert(prop.name.as_str()) {
                return Err(StowageError::DuplicateProperty {
                    class: self.name.clone(),
                    property: prop.name.clone(),
                });
            }
            prop.validate().map_err(|e| match e {
                StowageError::PropValidation {
                    property, message, ..
                } => StowageError::PropValidation {
                    class: self.name.clone(),
                    property,
                    message,
                },
                other => other,
            })?;
        }

        for key_prop in &self.primary_key.props {
            if !self.has_prop(key_prop) {
                return Err(fail(format!(
                    "primary key property '{}' is not defined",
                    key_prop
                )));
            }
        }

        let mut rel_names = HashSet::new();
        for rel in &self.relationships {
            if !rel_names.insert(rel.name.as_str()) {
                return Err(StowageError::RelationshipValidation(format!(
                    "relationship '{}' is defined twice on class '{}'",
                    rel.name, self.name
                )));
            }
            rel.validate()?;
            for owner_prop in rel.owner_props() {
                if !self.has_prop(owner_prop) {
                    return Err(StowageError::RelationshipValidation(format!(
                        "relationship '{}' uses undefined property '{}.{}'",
                        rel.name, self.name, owner_prop
                    )));
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

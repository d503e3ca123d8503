//! Relationship definitions between classes
//!
//! A relationship is declared on the owning class. Each `RelPropDef` pairs a
//! property on the owner with a property on the related class; the related
//! objects are those whose `related_prop` values equal the owner's
//! `owner_prop` values.
//!
//! - Single: the owner holds the foreign key (`Address.PersonID -> Person.ID`)
//! - Multiple: the related objects hold it (`Person.ID -> Address.PersonID`)

use crate::criteria::{Criteria, OrderCriteria};
use crate::prop_def::is_valid_identifier;
use serde::{Deserialize, Serialize};
use stowage_core::{
    Cardinality, DeleteParentAction, Named, PropValue, RelationshipType, StowageError,
    StowageResult, Validatable,
};

// ============================================================================
// RelPropDef
// ============================================================================

/// One owner property / related property pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelPropDef {
    pub owner_prop: String,
    pub related_prop: String,
}

// ============================================================================
// RelationshipDef
// ============================================================================

/// Definition of a named relationship on a class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDef {
    /// Relationship name, unique within the owning class
    pub name: String,

    /// Class of the related objects
    pub related_class: String,

    /// Single or multiple
    pub cardinality: Cardinality,

    /// Ownership policy
    #[serde(default)]
    pub relationship_type: RelationshipType,

    /// What happens to related objects when the owner is marked for delete
    #[serde(default)]
    pub delete_parent_action: DeleteParentAction,

    /// Cache resolved objects; `None` uses the configured default
    #[serde(default)]
    pub keep_reference: Option<bool>,

    /// Order of a multiple relationship's collection
    #[serde(default)]
    pub order: OrderCriteria,

    /// Property pairs forming the relationship key
    pub key: Vec<RelPropDef>,

    /// Human-readable description
    pub description: Option<String>,
}

impl RelationshipDef {
    /// Create a relationship definition
    pub fn new(
        name: impl Into<String>,
        related_class: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            name: name.into(),
            related_class: related_class.into(),
            cardinality,
            relationship_type: RelationshipType::Association,
            delete_parent_action: DeleteParentAction::Prevent,
            keep_reference: None,
            order: OrderCriteria::default(),
            key: Vec::new(),
            description: None,
        }
    }

    /// Single relationship (owner holds the foreign key)
    pub fn single(name: impl Into<String>, related_class: impl Into<String>) -> Self {
        Self::new(name, related_class, Cardinality::Single).on_delete(DeleteParentAction::DoNothing)
    }

    /// Multiple relationship (related objects hold the foreign key)
    pub fn multiple(name: impl Into<String>, related_class: impl Into<String>) -> Self {
        Self::new(name, related_class, Cardinality::Multiple)
    }

    // ========================================================================
    // Builder methods
    // ========================================================================

    /// Add a key property pair
    pub fn with_prop(mut self, owner_prop: impl Into<String>, related_prop: impl Into<String>) -> Self {
        self.key.push(RelPropDef {
            owner_prop: owner_prop.into(),
            related_prop: related_prop.into(),
        });
        self
    }

    /// Set the ownership policy
    pub fn with_type(mut self, relationship_type: RelationshipType) -> Self {
        self.relationship_type = relationship_type;
        self
    }

    /// Shorthand for `with_type(RelationshipType::Composition)`
    pub fn composition(self) -> Self {
        self.with_type(RelationshipType::Composition)
    }

    /// Shorthand for `with_type(RelationshipType::Aggregation)`
    pub fn aggregation(self) -> Self {
        self.with_type(RelationshipType::Aggregation)
    }

    /// Set the delete-parent action
    pub fn on_delete(mut self, action: DeleteParentAction) -> Self {
        self.delete_parent_action = action;
        self
    }

    /// Override whether resolved objects are cached
    pub fn keep_reference(mut self, keep: bool) -> Self {
        self.keep_reference = Some(keep);
        self
    }

    /// Set the collection order
    pub fn order_by(mut self, order: OrderCriteria) -> Self {
        self.order = order;
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

    pub fn is_single(&self) -> bool {
        self.cardinality == Cardinality::Single
    }

    pub fn is_multiple(&self) -> bool {
        self.cardinality == Cardinality::Multiple
    }

    pub fn is_composition(&self) -> bool {
        self.relationship_type == RelationshipType::Composition
    }

    /// Effective caching flag
    pub fn keeps_reference(&self, default: bool) -> bool {
        self.keep_reference.unwrap_or(default)
    }

    /// Owner property names
    pub fn owner_props(&self) -> impl Iterator<Item = &str> {
        self.key.iter().map(|p| p.owner_prop.as_str())
    }

    /// Related property names
    pub fn related_props(&self) -> impl Iterator<Item = &str> {
        self.key.iter().map(|p| p.related_prop.as_str())
    }

    /// True when every owner key property has a value
    pub fn owner_key_is_set<F>(&self, owner: &F) -> bool
    where
        F: Fn(&str) -> PropValue,
    {
        !self.key.is_empty()
            && self
                .key
                .iter()
                .all(|p| !owner(&p.owner_prop).is_null_or_empty())
    }

    /// Criteria over the related class selecting the owner's related objects
    pub fn criteria<F>(&self, owner: &F) -> Criteria
    where
        F: Fn(&str) -> PropValue,
    {
        let mut parts: Vec<Criteria> = self
            .key
            .iter()
            .map(|p| Criteria::eq(p.related_prop.as_str(), owner(&p.owner_prop)))
            .collect();
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Criteria::And(parts)
        }
    }
}

impl Named for RelationshipDef {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Validatable for RelationshipDef {
    fn validate(&self) -> StowageResult<()> {
        if !is_valid_identifier(&self.name) {
            return Err(StowageError::RelationshipValidation(format!(
                "'{}' is not a valid relationship name",
                self.name
            )));
        }

        if self.related_class.trim().is_empty() {
            return Err(StowageError::RelationshipValidation(format!(
                "relationship '{}' has no related class",
                self.name
            )));
        }

        if self.key.is_empty() {
            return Err(StowageError::RelationshipValidation(format!(
                "relationship '{}' has no key properties",
                self.name
            )));
        }

        if self.is_single() && self.delete_parent_action != DeleteParentAction::DoNothing {
            return Err(StowageError::RelationshipValidation(format!(
                "single relationship '{}' cannot use delete action {}",
                self.name, self.delete_parent_action
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

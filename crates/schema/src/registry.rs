//! Class registry
//!
//! The registry is the class schema provider consumed by the runtime. Classes
//! are registered in dependency order (a super class before its subclasses);
//! registration resolves inheritance once so that every lookup returns a flat
//! definition carrying inherited properties, key and relationships.

use crate::class_def::ClassDef;
use std::collections::HashMap;
use std::sync::Arc;
use stowage_core::{StowageError, StowageResult, Validatable};

/// Registry of class definitions
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    /// Definitions as declared, in registration order
    declared: Vec<ClassDef>,

    /// Inheritance-resolved definitions by name
    resolved: HashMap<String, Arc<ClassDef>>,
}

impl ClassRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from definitions in dependency order
    pub fn from_classes(classes: impl IntoIterator<Item = ClassDef>) -> StowageResult<Self> {
        let mut registry = Self::new();
        for class in classes {
            registry.register(class)?;
        }
        Ok(registry)
    }

    /// Register a class, resolving inheritance against already-registered classes
    pub fn register(&mut self, class: ClassDef) -> StowageResult<Arc<ClassDef>> {
        if self.resolved.contains_key(&class.name) {
            return Err(StowageError::DuplicateClass(class.name));
        }

        let flat = match &class.super_class {
            Some(super_name) => {
                let parent = self.get(super_name)?;
                flatten(&parent, &class)
            }
            None => class.clone(),
        };
        flat.validate()?;

        let flat = Arc::new(flat);
        self.resolved.insert(class.name.clone(), Arc::clone(&flat));
        self.declared.push(class);
        Ok(flat)
    }

    /// Builder-style `register`
    pub fn with_class(mut self, class: ClassDef) -> StowageResult<Self> {
        self.register(class)?;
        Ok(self)
    }

    /// Get a resolved class definition
    pub fn get(&self, name: &str) -> StowageResult<Arc<ClassDef>> {
        self.find(name)
            .ok_or_else(|| StowageError::ClassNotFound(name.to_string()))
    }

    /// Get a resolved class definition if registered
    pub fn find(&self, name: &str) -> Option<Arc<ClassDef>> {
        self.resolved.get(name).cloned()
    }

    /// Get a class that can be instantiated
    pub fn constructible(&self, name: &str) -> StowageResult<Arc<ClassDef>> {
        let class = self.get(name)?;
        if class.is_abstract {
            return Err(StowageError::MissingConstructor(name.to_string()));
        }
        Ok(class)
    }

    /// Whether `class` is `ancestor` or inherits from it
    pub fn is_subclass_of(&self, class: &str, ancestor: &str) -> bool {
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self
                .declared
                .iter()
                .find(|c| c.name == name)
                .and_then(|c| c.super_class.clone());
        }
        false
    }

    /// Fail unless `related` can be used where `requested` is expected
    pub fn check_compatible(&self, related: &str, requested: &str) -> StowageResult<()> {
        if self.find(related).is_none() {
            return Err(StowageError::UnknownTypeOrIncompatibleType(format!(
                "class '{}' is not registered",
                related
            )));
        }
        if !self.is_subclass_of(related, requested) {
            return Err(StowageError::UnknownTypeOrIncompatibleType(format!(
                "class '{}' is not a '{}'",
                related, requested
            )));
        }
        Ok(())
    }

    /// Definitions as declared, in registration order
    pub fn declared(&self) -> &[ClassDef] {
        &self.declared
    }

    /// Registered class names, in registration order
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.declared.iter().map(|c| c.name.as_str())
    }

    /// Resolved definitions, in registration order
    pub fn classes(&self) -> impl Iterator<Item = Arc<ClassDef>> + '_ {
        self.declared
            .iter()
            .filter_map(|c| self.resolved.get(&c.name).cloned())
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }
}

/// Merge a subclass over its resolved parent; subclass members win by name
fn flatten(parent: &ClassDef, class: &ClassDef) -> ClassDef {
    let mut flat = class.clone();

    let mut props: Vec<_> = parent
        .props
        .iter()
        .filter(|p| !class.has_prop(&p.name))
        .cloned()
        .collect();
    props.extend(class.props.iter().cloned());
    flat.props = props;

    if class.primary_key.is_empty() {
        flat.primary_key = parent.primary_key.clone();
    }

    let mut relationships: Vec<_> = parent
        .relationships
        .iter()
        .filter(|r| class.get_relationship(&r.name).is_none())
        .cloned()
        .collect();
    relationships.extend(class.relationships.iter().cloned());
    flat.relationships = relationships;

    flat
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PropDef, RelationshipDef};
    use stowage_core::DataType;

    fn party() -> ClassDef {
        ClassDef::new("Party")
            .abstract_class()
            .with_object_id("PartyID")
            .with_prop(PropDef::new("Name", DataType::String))
    }

    fn customer() -> ClassDef {
        ClassDef::new("Customer")
            .extends("Party")
            .with_prop(PropDef::new("CreditLimit", DataType::Float))
            .with_relationship(
                RelationshipDef::multiple("Orders", "Order").with_prop("PartyID", "CustomerID"),
            )
    }

    #[test]
    fn test_register_flattens_inheritance() {
        let registry = ClassRegistry::from_classes([party(), customer()]).unwrap();
        let customer = registry.get("Customer").unwrap();
        assert_eq!(
            customer.prop_names().collect::<Vec<_>>(),
            vec!["PartyID", "Name", "CreditLimit"]
        );
        assert!(customer.primary_key.is_object_id);
        assert!(!customer.is_abstract);
        assert_eq!(registry.declared()[1].props.len(), 1);
    }

    #[test]
    fn test_super_class_must_be_registered_first() {
        let err = ClassRegistry::from_classes([customer(), party()]).unwrap_err();
        assert!(matches!(err, StowageError::ClassNotFound(ref name) if name == "Party"));
    }

    #[test]
    fn test_duplicate_class() {
        let err = ClassRegistry::from_classes([party(), party()]).unwrap_err();
        assert!(matches!(err, StowageError::DuplicateClass(_)));
    }

    #[test]
    fn test_abstract_class_has_no_constructor() {
        let registry = ClassRegistry::from_classes([party(), customer()]).unwrap();
        assert!(matches!(
            registry.constructible("Party"),
            Err(StowageError::MissingConstructor(_))
        ));
        assert!(registry.constructible("Customer").is_ok());
    }

    #[test]
    fn test_type_compatibility() {
        let registry = ClassRegistry::from_classes([party(), customer()]).unwrap();
        assert!(registry.is_subclass_of("Customer", "Party"));
        assert!(!registry.is_subclass_of("Party", "Customer"));
        assert!(registry.check_compatible("Customer", "Party").is_ok());
        assert!(matches!(
            registry.check_compatible("Party", "Customer"),
            Err(StowageError::UnknownTypeOrIncompatibleType(_))
        ));
        assert!(matches!(
            registry.check_compatible("Supplier", "Party"),
            Err(StowageError::UnknownTypeOrIncompatibleType(_))
        ));
    }

    #[test]
    fn test_class_names_in_order() {
        let registry = ClassRegistry::new()
            .with_class(party())
            .unwrap()
            .with_class(customer())
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.class_names().collect::<Vec<_>>(), vec!["Party", "Customer"]);
        assert_eq!(registry.classes().count(), 2);
    }
}

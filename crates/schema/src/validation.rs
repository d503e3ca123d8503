//! Registry-wide validation
//!
//! `ClassDef::validate` checks a single class in isolation. The rules here
//! check what only the whole registry can answer: whether related classes
//! exist, whether relationship keys line up on both sides, and whether
//! ownership policies and delete actions agree with each other.

use crate::registry::ClassRegistry;
use stowage_core::{DeleteParentAction, RelationshipType, StowageError, StowageResult};

// ============================================================================
// ValidationResult
// ============================================================================

/// Result of a validation operation
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether the validation passed
    pub valid: bool,

    /// List of errors (empty if valid)
    pub errors: Vec<ValidationError>,

    /// List of warnings (non-fatal issues)
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    /// Create a successful validation result
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error to the result
    pub fn add_error(&mut self, error: ValidationError) {
        self.valid = false;
        self.errors.push(error);
    }

    /// Add a warning to the result
    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Merge another validation result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        if !other.valid {
            self.valid = false;
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Convert to StowageResult (fails if any errors)
    pub fn to_result(self) -> StowageResult<()> {
        if self.valid {
            Ok(())
        } else {
            let msg = self
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            Err(StowageError::RelationshipValidation(msg))
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::ok()
    }
}

// ============================================================================
// ValidationError
// ============================================================================

/// A validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Error code for programmatic handling
    pub code: ValidationErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Path to the problematic element (e.g., "Person.relationships.Addresses")
    pub path: Option<String>,

    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationError {
    /// Create a new validation error
    pub fn new(code: ValidationErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
            suggestion: None,
        }
    }

    /// Add a path to the error
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Add a suggestion to the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "[{}] {}", path, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Error codes for validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorCode {
    UnknownRelatedClass,
    UnknownRelatedProperty,
    KeyTypeMismatch,
    OrphaningComposition,
    Custom,
}

// ============================================================================
// ValidationWarning
// ============================================================================

/// A validation warning (non-fatal issue)
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub code: ValidationWarningCode,
    pub message: String,
    pub path: Option<String>,
}

impl ValidationWarning {
    /// Create a new warning
    pub fn new(code: ValidationWarningCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
        }
    }

    /// Add a path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "[{}] Warning: {}", path, self.message)
        } else {
            write!(f, "Warning: {}", self.message)
        }
    }
}

/// Warning codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationWarningCode {
    NoDescription,
    UncachedComposition,
    Custom,
}

// ============================================================================
// ValidationRule Trait
// ============================================================================

/// Trait for validation rules
pub trait ValidationRule {
    /// Get the rule name
    fn name(&self) -> &'static str;

    /// Get the rule description
    fn description(&self) -> &'static str;

    /// Validate a registry and return the result
    fn validate(&self, registry: &ClassRegistry) -> ValidationResult;
}

// ============================================================================
// Validator
// ============================================================================

/// Registry validator that runs multiple validation rules
#[derive(Default)]
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    /// Create a new validator
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Create a validator with default rules
    pub fn with_default_rules() -> Self {
        let mut validator = Self::new();
        validator.add_rule(Box::new(RelationshipTargetsRule));
        validator.add_rule(Box::new(OwnershipRule));
        validator.add_rule(Box::new(DescriptionRule));
        validator
    }

    /// Add a validation rule
    pub fn add_rule(&mut self, rule: Box<dyn ValidationRule>) {
        self.rules.push(rule);
    }

    /// Validate a registry with all rules
    pub fn validate(&self, registry: &ClassRegistry) -> ValidationResult {
        let mut result = ValidationResult::ok();
        for rule in &self.rules {
            result.merge(rule.validate(registry));
        }
        result
    }

    /// Validate and return Result
    pub fn validate_result(&self, registry: &ClassRegistry) -> StowageResult<()> {
        self.validate(registry).to_result()
    }
}

// ============================================================================
// Built-in Validation Rules
// ============================================================================

/// Rule: related classes and properties exist, and key types line up
pub struct RelationshipTargetsRule;

impl ValidationRule for RelationshipTargetsRule {
    fn name(&self) -> &'static str {
        "relationship_targets"
    }

    fn description(&self) -> &'static str {
        "Validates that relationships reference registered classes and properties"
    }

    fn validate(&self, registry: &ClassRegistry) -> ValidationResult {
        let mut result = ValidationResult::ok();

        for class in registry.classes() {
            for rel in &class.relationships {
                let rel_path = format!("{}.relationships.{}", class.name, rel.name);

                let Some(related) = registry.find(&rel.related_class) else {
                    result.add_error(
                        ValidationError::new(
                            ValidationErrorCode::UnknownRelatedClass,
                            format!(
                                "Relationship '{}' references unregistered class '{}'",
                                rel.name, rel.related_class
                            ),
                        )
                        .with_path(&rel_path)
                        .with_suggestion("Register the related class before validating"),
                    );
                    continue;
                };

                for pair in &rel.key {
                    let Some(related_prop) = related.get_prop(&pair.related_prop) else {
                        result.add_error(
                            ValidationError::new(
                                ValidationErrorCode::UnknownRelatedProperty,
                                format!(
                                    "Relationship '{}' uses undefined property '{}.{}'",
                                    rel.name, related.name, pair.related_prop
                                ),
                            )
                            .with_path(&rel_path),
                        );
                        continue;
                    };

                    if let Some(owner_prop) = class.get_prop(&pair.owner_prop) {
                        if owner_prop.data_type != related_prop.data_type {
                            result.add_error(
                                ValidationError::new(
                                    ValidationErrorCode::KeyTypeMismatch,
                                    format!(
                                        "'{}.{}' is {} but '{}.{}' is {}",
                                        class.name,
                                        owner_prop.name,
                                        owner_prop.data_type,
                                        related.name,
                                        related_prop.name,
                                        related_prop.data_type
                                    ),
                                )
                                .with_path(&rel_path),
                            );
                        }
                    }
                }
            }
        }

        result
    }
}

/// Rule: ownership policies agree with delete actions and caching
pub struct OwnershipRule;

impl ValidationRule for OwnershipRule {
    fn name(&self) -> &'static str {
        "ownership"
    }

    fn description(&self) -> &'static str {
        "Validates that composition relationships never orphan their children"
    }

    fn validate(&self, registry: &ClassRegistry) -> ValidationResult {
        let mut result = ValidationResult::ok();

        for class in registry.classes() {
            for rel in class.multiple_relationships() {
                if rel.relationship_type != RelationshipType::Composition {
                    continue;
                }
                let rel_path = format!("{}.relationships.{}", class.name, rel.name);

                if rel.delete_parent_action == DeleteParentAction::DereferenceRelated {
                    result.add_error(
                        ValidationError::new(
                            ValidationErrorCode::OrphaningComposition,
                            format!(
                                "Composition '{}' cannot dereference its children on delete",
                                rel.name
                            ),
                        )
                        .with_path(&rel_path)
                        .with_suggestion("Use DeleteRelated or Prevent"),
                    );
                }

                if rel.keep_reference == Some(false) {
                    result.add_warning(
                        ValidationWarning::new(
                            ValidationWarningCode::UncachedComposition,
                            format!(
                                "Composition '{}' does not keep its collection; owned children are not saved with the parent",
                                rel.name
                            ),
                        )
                        .with_path(&rel_path),
                    );
                }
            }
        }

        result
    }
}

/// Rule: classes carry a description
pub struct DescriptionRule;

impl ValidationRule for DescriptionRule {
    fn name(&self) -> &'static str {
        "descriptions"
    }

    fn description(&self) -> &'static str {
        "Warns about classes without a description"
    }

    fn validate(&self, registry: &ClassRegistry) -> ValidationResult {
        let mut result = ValidationResult::ok();
        for class in registry.declared() {
            if class.description.is_none() {
                result.add_warning(
                    ValidationWarning::new(
                        ValidationWarningCode::NoDescription,
                        format!("Class '{}' has no description", class.name),
                    )
                    .with_path(&class.name),
                );
            }
        }
        result
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClassDef, PropDef, RelationshipDef};
    use stowage_core::DataType;

    fn person(addresses: RelationshipDef) -> ClassDef {
        ClassDef::new("Person")
            .with_prop(PropDef::new("ID", DataType::Integer).compulsory())
            .with_key(["ID"])
            .with_relationship(addresses)
            .with_description("A person")
    }

    fn address() -> ClassDef {
        ClassDef::new("Address")
            .with_object_id("AddressID")
            .with_prop(PropDef::new("PersonID", DataType::Integer))
    }

    fn addresses() -> RelationshipDef {
        RelationshipDef::multiple("Addresses", "Address").with_prop("ID", "PersonID")
    }

    #[test]
    fn test_valid_registry() {
        let registry = ClassRegistry::from_classes([person(addresses()), address()]).unwrap();
        let result = Validator::with_default_rules().validate(&registry);
        assert!(result.valid);
        // Address has no description
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].code, ValidationWarningCode::NoDescription);
    }

    #[test]
    fn test_unknown_related_class() {
        let registry = ClassRegistry::from_classes([person(addresses())]).unwrap();
        let result = Validator::with_default_rules().validate(&registry);
        assert!(!result.valid);
        assert_eq!(result.errors[0].code, ValidationErrorCode::UnknownRelatedClass);
    }

    #[test]
    fn test_unknown_related_prop() {
        let rel = RelationshipDef::multiple("Addresses", "Address").with_prop("ID", "OwnerID");
        let registry = ClassRegistry::from_classes([person(rel), address()]).unwrap();
        let result = Validator::with_default_rules().validate(&registry);
        assert_eq!(result.errors[0].code, ValidationErrorCode::UnknownRelatedProperty);
    }

    #[test]
    fn test_key_type_mismatch() {
        let rel = RelationshipDef::multiple("Addresses", "Address").with_prop("ID", "AddressID");
        let registry = ClassRegistry::from_classes([person(rel), address()]).unwrap();
        let result = Validator::with_default_rules().validate(&registry);
        assert_eq!(result.errors[0].code, ValidationErrorCode::KeyTypeMismatch);
    }

    #[test]
    fn test_composition_cannot_dereference() {
        let rel = addresses()
            .composition()
            .on_delete(DeleteParentAction::DereferenceRelated);
        let registry = ClassRegistry::from_classes([person(rel), address()]).unwrap();
        let err = Validator::with_default_rules()
            .validate_result(&registry)
            .unwrap_err();
        assert!(err.is_schema_validation());
        assert!(err.to_string().contains("Person.relationships.Addresses"));
    }

    #[test]
    fn test_uncached_composition_warns() {
        let rel = addresses().composition().keep_reference(false);
        let registry = ClassRegistry::from_classes([person(rel), address()]).unwrap();
        let result = Validator::with_default_rules().validate(&registry);
        assert!(result.valid);
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.code == ValidationWarningCode::UncachedComposition)
        );
    }
}

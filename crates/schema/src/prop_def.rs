//! Property definitions for business object classes
//!
//! A `PropDef` describes one persistable property: its data type, default,
//! rules, and an optional lookup list. It also owns the coercion step that
//! turns incoming values into the property's stored representation.

use stowage_core::{
    DataType, Named, PropValue, StowageError, StowageResult, Validatable, Validation,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// PropDef
// ============================================================================

/// Definition of a single business object property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropDef {
    /// Property name as used by `get_property_value` / `set_property_value`
    pub name: String,

    /// Stored data type
    pub data_type: DataType,

    /// Whether a value is required for the object to be valid
    pub compulsory: bool,

    /// Read-only properties can be set while new, never once persisted
    pub read_only: bool,

    /// Value assigned to newly constructed objects
    pub default_value: Option<PropValue>,

    /// Validation rules applied after every change
    #[serde(default)]
    pub validations: Vec<Validation>,

    /// Display text to stored value mapping
    #[serde(default)]
    pub lookup_list: Option<LookupList>,

    /// Human-readable description
    pub description: Option<String>,
}

impl PropDef {
    /// Create a new property definition
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            compulsory: false,
            read_only: false,
            default_value: None,
            validations: Vec::new(),
            lookup_list: None,
            description: None,
        }
    }

    /// Create a Guid property suitable for an object-id primary key
    pub fn object_id(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Guid).compulsory().read_only()
    }

    // ========================================================================
    // Builder methods
    // ========================================================================

    /// Mark the property as compulsory
    pub fn compulsory(mut self) -> Self {
        self.compulsory = true;
        self
    }

    /// Mark the property as read-only once persisted
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Set a default value
    pub fn with_default(mut self, value: impl Into<PropValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Add a validation rule
    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validations.push(validation);
        self
    }

    /// Attach a lookup list
    pub fn with_lookup(mut self, lookup: LookupList) -> Self {
        self.lookup_list = Some(lookup);
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    // ========================================================================
    // Value handling
    // ========================================================================

    /// Initial value for a freshly constructed object
    pub fn initial_value(&self) -> PropValue {
        match &self.default_value {
            Some(value) => self
                .data_type
                .coerce(value.clone())
                .unwrap_or_else(|_| value.clone()),
            None => match self.data_type {
                DataType::Bool => PropValue::Bool(false),
                _ => PropValue::Null,
            },
        }
    }

    /// Convert an incoming value to the stored representation.
    ///
    /// Lookup display texts resolve to their stored value before the
    /// data type coercion runs.
    pub fn coerce(&self, class_name: &str, value: PropValue) -> StowageResult<PropValue> {
        let value = match &self.lookup_list {
            Some(lookup) => lookup.resolve(&value).unwrap_or(value),
            None => value,
        };
        self.data_type
            .coerce(value)
            .map_err(|msg| StowageError::invalid_value(class_name, &self.name, msg))
    }

    /// Run every rule against a value; messages joined with newlines
    pub fn check_rules(&self, value: &PropValue) -> Result<(), String> {
        let mut messages = Vec::new();
        if self.compulsory && value.is_null_or_empty() {
            messages.push(format!("'{}' is a compulsory field and has no value", self.name));
        }
        for rule in &self.validations {
            if let Err(msg) = rule.check(value) {
                messages.push(format!("'{}': {}", self.name, msg));
            }
        }
        if let Some(lookup) = &self.lookup_list {
            if !value.is_null_or_empty() && lookup.limit_to_list && !lookup.contains_value(value) {
                messages.push(format!(
                    "'{}': '{}' is not in the list of allowed values",
                    self.name, value
                ));
            }
        }
        if messages.is_empty() {
            Ok(())
        } else {
            Err(messages.join("\n"))
        }
    }
}

impl Named for PropDef {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Validatable for PropDef {
    fn validate(&self) -> StowageResult<()> {
        if !is_valid_identifier(&self.name) {
            return Err(StowageError::PropValidation {
                class: String::new(),
                property: self.name.clone(),
                message: format!("'{}' is not a valid property name", self.name),
            });
        }

        if let Some(default) = &self.default_value {
            self.data_type
                .coerce(default.clone())
                .map_err(|message| StowageError::PropValidation {
                    class: String::new(),
                    property: self.name.clone(),
                    message: format!("default value is incompatible: {}", message),
                })?;
        }

        Ok(())
    }
}

// ============================================================================
// LookupList
// ============================================================================

/// A single display text / stored value pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupItem {
    pub display: String,
    pub value: PropValue,
}

/// Maps user-facing display texts to stored values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupList {
    pub items: Vec<LookupItem>,

    /// Values outside the list fail validation
    #[serde(default)]
    pub limit_to_list: bool,
}

impl LookupList {
    /// Create an empty lookup list
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry
    pub fn with_item(mut self, display: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.items.push(LookupItem {
            display: display.into(),
            value: value.into(),
        });
        self
    }

    /// Reject values that are not in the list
    pub fn limited(mut self) -> Self {
        self.limit_to_list = true;
        self
    }

    /// Stored value for a display text, if the value is one
    pub fn resolve(&self, value: &PropValue) -> Option<PropValue> {
        let text = value.as_str()?;
        self.items
            .iter()
            .find(|item| item.display == text)
            .map(|item| item.value.clone())
    }

    /// Display text for a stored value
    pub fn display_for(&self, value: &PropValue) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.value.same_value(value))
            .map(|item| item.display.as_str())
    }

    /// Whether a stored value is in the list
    pub fn contains_value(&self, value: &PropValue) -> bool {
        self.items.iter().any(|item| item.value.same_value(value))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Check if a string is a valid identifier
pub(crate) fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn title_lookup() -> LookupList {
        LookupList::new()
            .with_item("Mister", "Mr")
            .with_item("Doctor", "Dr")
            .limited()
    }

    #[test]
    fn test_prop_def_new() {
        let prop = PropDef::new("Surname", DataType::String);
        assert_eq!(prop.name, "Surname");
        assert!(!prop.compulsory);
        assert!(!prop.read_only);
        assert!(prop.validations.is_empty());
    }

    #[test]
    fn test_object_id_prop() {
        let prop = PropDef::object_id("PersonID");
        assert_eq!(prop.data_type, DataType::Guid);
        assert!(prop.compulsory);
        assert!(prop.read_only);
    }

    #[test]
    fn test_initial_values() {
        assert_eq!(
            PropDef::new("Active", DataType::Bool).initial_value(),
            PropValue::Bool(false)
        );
        assert_eq!(
            PropDef::new("Age", DataType::Integer)
                .with_default("18")
                .initial_value(),
            PropValue::Int(18)
        );
        assert_eq!(
            PropDef::new("Name", DataType::String).initial_value(),
            PropValue::Null
        );
    }

    #[test]
    fn test_coerce_resolves_lookup_display_text() {
        let prop = PropDef::new("Title", DataType::String).with_lookup(title_lookup());
        assert_eq!(
            prop.coerce("Person", "Doctor".into()).unwrap(),
            PropValue::from("Dr")
        );
        assert_eq!(
            prop.coerce("Person", "Mr".into()).unwrap(),
            PropValue::from("Mr")
        );
    }

    #[test]
    fn test_coerce_error_names_property() {
        let prop = PropDef::new("PersonID", DataType::Guid);
        let err = prop.coerce("Person", "xyz".into()).unwrap_err();
        assert!(matches!(
            err,
            StowageError::InvalidPropertyValue { ref property, .. } if property == "PersonID"
        ));
        let id = Uuid::new_v4();
        assert_eq!(
            prop.coerce("Person", id.to_string().into()).unwrap(),
            PropValue::Guid(id)
        );
    }

    #[test]
    fn test_check_rules_collects_messages() {
        let prop = PropDef::new("Surname", DataType::String)
            .compulsory()
            .with_validation(Validation::MinLength(2));
        let msg = prop.check_rules(&PropValue::Null).unwrap_err();
        assert!(msg.contains("compulsory"));
        let msg = prop.check_rules(&"A".into()).unwrap_err();
        assert!(msg.contains("Minimum length is 2"));
        assert!(prop.check_rules(&"Smith".into()).is_ok());
    }

    #[test]
    fn test_limited_lookup_rejects_unknown_value() {
        let prop = PropDef::new("Title", DataType::String).with_lookup(title_lookup());
        assert!(prop.check_rules(&"Prof".into()).is_err());
        assert!(prop.check_rules(&"Dr".into()).is_ok());
        assert_eq!(title_lookup().display_for(&"Dr".into()), Some("Doctor"));
    }

    #[test]
    fn test_prop_def_validation() {
        assert!(PropDef::new("Surname", DataType::String).validate().is_ok());
        assert!(PropDef::new("2name", DataType::String).validate().is_err());
        assert!(
            PropDef::new("Age", DataType::Integer)
                .with_default("old")
                .validate()
                .is_err()
        );
    }
}

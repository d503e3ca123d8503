//! Core types used throughout Stowage
//!
//! This module contains the value and enumeration types shared by the schema
//! and the business object runtime: property values and their data types,
//! relationship cardinality, ownership and delete policies, and property-level
//! validation rules.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

// ============================================================================
// Property Values
// ============================================================================

/// A single property value held by a business object
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropValue {
    /// No value (database NULL)
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Guid(Uuid),
    DateTime(DateTime<Utc>),
}

impl PropValue {
    /// Check if null
    pub fn is_null(&self) -> bool {
        matches!(self, PropValue::Null)
    }

    /// Null, or an empty string
    pub fn is_null_or_empty(&self) -> bool {
        match self {
            PropValue::Null => true,
            PropValue::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Try to get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Try to get as integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get as float (integers widen)
    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropValue::Float(v) => Some(*v),
            PropValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Try to get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get as Guid
    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            PropValue::Guid(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get as date-time
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            PropValue::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    /// Equality used for change detection: null and empty string are equal,
    /// integers and floats compare numerically.
    pub fn same_value(&self, other: &PropValue) -> bool {
        if self.is_null_or_empty() || other.is_null_or_empty() {
            return self.is_null_or_empty() && other.is_null_or_empty();
        }
        match (self, other) {
            (PropValue::Int(a), PropValue::Float(b)) | (PropValue::Float(b), PropValue::Int(a)) => {
                (*a as f64) == *b
            }
            _ => self == other,
        }
    }

    /// Total ordering used for sorting; nulls sort first
    pub fn compare(&self, other: &PropValue) -> Ordering {
        match (self, other) {
            (PropValue::Null, PropValue::Null) => Ordering::Equal,
            (PropValue::Null, _) => Ordering::Less,
            (_, PropValue::Null) => Ordering::Greater,
            (PropValue::Bool(a), PropValue::Bool(b)) => a.cmp(b),
            (PropValue::Int(a), PropValue::Int(b)) => a.cmp(b),
            (PropValue::String(a), PropValue::String(b)) => a.cmp(b),
            (PropValue::Guid(a), PropValue::Guid(b)) => a.cmp(b),
            (PropValue::DateTime(a), PropValue::DateTime(b)) => a.cmp(b),
            (a, b) => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.to_string().cmp(&b.to_string()),
            },
        }
    }

    /// Name of the value's kind, for error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            PropValue::Null => "null",
            PropValue::Bool(_) => "bool",
            PropValue::Int(_) => "integer",
            PropValue::Float(_) => "float",
            PropValue::String(_) => "string",
            PropValue::Guid(_) => "guid",
            PropValue::DateTime(_) => "datetime",
        }
    }
}

impl std::fmt::Display for PropValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropValue::Null => Ok(()),
            PropValue::Bool(v) => write!(f, "{}", v),
            PropValue::Int(v) => write!(f, "{}", v),
            PropValue::Float(v) => write!(f, "{}", v),
            PropValue::String(v) => write!(f, "{}", v),
            PropValue::Guid(v) => write!(f, "{}", v.hyphenated()),
            PropValue::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        PropValue::Bool(v)
    }
}

impl From<i32> for PropValue {
    fn from(v: i32) -> Self {
        PropValue::Int(v as i64)
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        PropValue::Int(v)
    }
}

impl From<f64> for PropValue {
    fn from(v: f64) -> Self {
        PropValue::Float(v)
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        PropValue::String(v)
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        PropValue::String(v.to_string())
    }
}

impl From<Uuid> for PropValue {
    fn from(v: Uuid) -> Self {
        PropValue::Guid(v)
    }
}

impl From<DateTime<Utc>> for PropValue {
    fn from(v: DateTime<Utc>) -> Self {
        PropValue::DateTime(v)
    }
}

impl<T: Into<PropValue>> From<Option<T>> for PropValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(PropValue::Null)
    }
}

// ============================================================================
// Data Types
// ============================================================================

/// Data types supported for business object properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    String,
    Integer,
    Float,
    Bool,
    Guid,
    DateTime,
}

impl DataType {
    /// Get a user-friendly display name
    pub fn display_name(&self) -> &'static str {
        match self {
            DataType::String => "String",
            DataType::Integer => "Integer",
            DataType::Float => "Float",
            DataType::Bool => "Boolean",
            DataType::Guid => "Guid",
            DataType::DateTime => "DateTime",
        }
    }

    /// Coerce an incoming value to this data type.
    ///
    /// Null stays null except for booleans, where it becomes `false`.
    /// Empty strings become null for every non-string type.
    pub fn coerce(&self, value: PropValue) -> Result<PropValue, String> {
        if value.is_null() {
            return Ok(match self {
                // null booleans read as false
                DataType::Bool => PropValue::Bool(false),
                _ => PropValue::Null,
            });
        }
        if *self != DataType::String && value.is_null_or_empty() {
            return Ok(PropValue::Null);
        }

        match (self, value) {
            (DataType::String, PropValue::String(s)) => Ok(PropValue::String(s)),
            (DataType::String, other) => Ok(PropValue::String(other.to_string())),

            (DataType::Integer, PropValue::Int(v)) => Ok(PropValue::Int(v)),
            (DataType::Integer, PropValue::Float(v)) if v.fract() == 0.0 => {
                Ok(PropValue::Int(v as i64))
            }
            (DataType::Integer, PropValue::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(PropValue::Int)
                .map_err(|_| format!("'{}' is not a valid integer", s)),

            (DataType::Float, PropValue::Float(v)) => Ok(PropValue::Float(v)),
            (DataType::Float, PropValue::Int(v)) => Ok(PropValue::Float(v as f64)),
            (DataType::Float, PropValue::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(PropValue::Float)
                .map_err(|_| format!("'{}' is not a valid number", s)),

            (DataType::Bool, PropValue::Bool(v)) => Ok(PropValue::Bool(v)),
            (DataType::Bool, PropValue::Int(v)) if v == 0 || v == 1 => {
                Ok(PropValue::Bool(v == 1))
            }
            (DataType::Bool, PropValue::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "y" => Ok(PropValue::Bool(true)),
                "false" | "0" | "no" | "n" => Ok(PropValue::Bool(false)),
                _ => Err(format!("'{}' is not a valid boolean", s)),
            },

            (DataType::Guid, PropValue::Guid(v)) => Ok(PropValue::Guid(v)),
            (DataType::Guid, PropValue::String(s)) => Uuid::parse_str(s.trim())
                .map(PropValue::Guid)
                .map_err(|_| format!("'{}' is not a valid Guid", s)),

            (DataType::DateTime, PropValue::DateTime(v)) => Ok(PropValue::DateTime(v)),
            (DataType::DateTime, PropValue::String(s)) => parse_datetime(s.trim())
                .map(PropValue::DateTime)
                .ok_or_else(|| format!("'{}' is not a valid date/time", s)),

            (data_type, other) => Err(format!(
                "a {} value cannot be stored in a {} property",
                other.kind_name(),
                data_type.display_name()
            )),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Relationship Types
// ============================================================================

/// Number of objects on the related side of a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// At most one related object (foreign key held by the owner)
    #[default]
    Single,
    /// A collection of related objects (foreign key held by the children)
    Multiple,
}

/// Ownership policy between a parent and its related objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    /// No ownership constraints
    #[default]
    Association,
    /// Children may be reassigned between parents
    Aggregation,
    /// Children belong to exactly one parent for their lifetime
    Composition,
}

impl RelationshipType {
    /// Get display name
    pub fn display_name(&self) -> &'static str {
        match self {
            RelationshipType::Association => "Association",
            RelationshipType::Aggregation => "Aggregation",
            RelationshipType::Composition => "Composition",
        }
    }

    /// Whether the parent saves its dirty children as part of its own commit
    pub fn owns_children(&self) -> bool {
        matches!(
            self,
            RelationshipType::Aggregation | RelationshipType::Composition
        )
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// What happens to related objects when the parent is marked for delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeleteParentAction {
    /// Mark every related object for delete as well
    DeleteRelated,
    /// Clear the related objects' foreign keys
    DereferenceRelated,
    /// Refuse to delete while related objects exist
    #[default]
    Prevent,
    /// Leave related objects untouched
    DoNothing,
}

impl DeleteParentAction {
    /// Get display name
    pub fn display_name(&self) -> &'static str {
        match self {
            DeleteParentAction::DeleteRelated => "DeleteRelated",
            DeleteParentAction::DereferenceRelated => "DereferenceRelated",
            DeleteParentAction::Prevent => "Prevent",
            DeleteParentAction::DoNothing => "DoNothing",
        }
    }

    /// Get all delete actions
    pub fn all() -> &'static [DeleteParentAction] {
        &[
            DeleteParentAction::DeleteRelated,
            DeleteParentAction::DereferenceRelated,
            DeleteParentAction::Prevent,
            DeleteParentAction::DoNothing,
        ]
    }
}

impl std::fmt::Display for DeleteParentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

// ============================================================================
// Validation Types
// ============================================================================

/// Property validation rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validation {
    /// Property must have a value
    Required,
    /// Minimum string length
    MinLength(usize),
    /// Maximum string length
    MaxLength(usize),
    /// Minimum numeric value
    Min(f64),
    /// Maximum numeric value
    Max(f64),
    /// Value must be in a list
    OneOf(Vec<String>),
}

impl Validation {
    /// Get a user-friendly error message
    pub fn error_message(&self) -> String {
        match self {
            Validation::Required => "This field is required".to_string(),
            Validation::MinLength(n) => format!("Minimum length is {} characters", n),
            Validation::MaxLength(n) => format!("Maximum length is {} characters", n),
            Validation::Min(n) => format!("Minimum value is {}", n),
            Validation::Max(n) => format!("Maximum value is {}", n),
            Validation::OneOf(values) => format!("Must be one of: {}", values.join(", ")),
        }
    }

    /// Check a value against this rule. Null values only fail `Required`.
    pub fn check(&self, value: &PropValue) -> Result<(), String> {
        let ok = match self {
            Validation::Required => !value.is_null_or_empty(),
            _ if value.is_null_or_empty() => true,
            Validation::MinLength(n) => value.to_string().chars().count() >= *n,
            Validation::MaxLength(n) => value.to_string().chars().count() <= *n,
            Validation::Min(n) => value.as_float().is_none_or(|v| v >= *n),
            Validation::Max(n) => value.as_float().is_none_or(|v| v <= *n),
            Validation::OneOf(values) => values.iter().any(|v| *v == value.to_string()),
        };
        if ok {
            Ok(())
        } else {
            Err(self.error_message())
        }
    }
}

impl std::fmt::Display for Validation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Validation::Required => write!(f, "required"),
            Validation::MinLength(n) => write!(f, "min_length({})", n),
            Validation::MaxLength(n) => write!(f, "max_length({})", n),
            Validation::Min(n) => write!(f, "min({})", n),
            Validation::Max(n) => write!(f, "max({})", n),
            Validation::OneOf(values) => write!(f, "one_of({:?})", values),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // PropValue tests
    #[test]
    fn test_prop_value_null_and_empty_are_same() {
        assert!(PropValue::Null.same_value(&PropValue::String(String::new())));
        assert!(!PropValue::Null.same_value(&PropValue::Int(0)));
        assert!(PropValue::Int(3).same_value(&PropValue::Float(3.0)));
    }

    #[test]
    fn test_prop_value_compare_nulls_first() {
        let mut values = vec![
            PropValue::Int(3),
            PropValue::Null,
            PropValue::Float(1.5),
            PropValue::Int(2),
        ];
        values.sort_by(|a, b| a.compare(b));
        assert_eq!(
            values,
            vec![
                PropValue::Null,
                PropValue::Float(1.5),
                PropValue::Int(2),
                PropValue::Int(3)
            ]
        );
    }

    #[test]
    fn test_prop_value_display() {
        assert_eq!(PropValue::Null.to_string(), "");
        assert_eq!(PropValue::Int(7).to_string(), "7");
        assert_eq!(PropValue::from("abc").to_string(), "abc");
        let id = Uuid::nil();
        assert_eq!(
            PropValue::Guid(id).to_string(),
            "00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_prop_value_from_option() {
        assert_eq!(PropValue::from(None::<i64>), PropValue::Null);
        assert_eq!(PropValue::from(Some(5i64)), PropValue::Int(5));
    }

    // DataType coercion tests
    #[test]
    fn test_coerce_string_to_guid() {
        let id = Uuid::new_v4();
        let coerced = DataType::Guid
            .coerce(PropValue::String(id.to_string()))
            .unwrap();
        assert_eq!(coerced, PropValue::Guid(id));
        assert!(DataType::Guid.coerce("not-a-guid".into()).is_err());
    }

    #[test]
    fn test_coerce_null_to_false_for_bool() {
        assert_eq!(
            DataType::Bool.coerce(PropValue::Null).unwrap(),
            PropValue::Bool(false)
        );
        assert_eq!(
            DataType::Integer.coerce(PropValue::Null).unwrap(),
            PropValue::Null
        );
    }

    #[test]
    fn test_coerce_empty_string_to_null() {
        assert_eq!(DataType::Integer.coerce("".into()).unwrap(), PropValue::Null);
        assert_eq!(
            DataType::String.coerce("".into()).unwrap(),
            PropValue::String(String::new())
        );
    }

    #[test]
    fn test_coerce_numbers() {
        assert_eq!(
            DataType::Integer.coerce("42".into()).unwrap(),
            PropValue::Int(42)
        );
        assert_eq!(
            DataType::Float.coerce(PropValue::Int(2)).unwrap(),
            PropValue::Float(2.0)
        );
        assert!(DataType::Integer.coerce(PropValue::Float(1.5)).is_err());
    }

    #[test]
    fn test_coerce_datetime_formats() {
        let full = DataType::DateTime.coerce("2024-03-01T10:00:00Z".into());
        let naive = DataType::DateTime.coerce("2024-03-01 10:00:00".into());
        assert_eq!(full.unwrap(), naive.unwrap());
        assert!(DataType::DateTime.coerce("2024-03-01".into()).is_ok());
    }

    #[test]
    fn test_coerce_rejects_mismatched_kind() {
        let err = DataType::Guid.coerce(PropValue::Int(1)).unwrap_err();
        assert_eq!(err, "a integer value cannot be stored in a Guid property");
    }

    // Relationship type tests
    #[test]
    fn test_relationship_type_ownership() {
        assert!(RelationshipType::Composition.owns_children());
        assert!(RelationshipType::Aggregation.owns_children());
        assert!(!RelationshipType::Association.owns_children());
        assert_eq!(RelationshipType::Composition.to_string(), "Composition");
    }

    #[test]
    fn test_delete_parent_action_default() {
        assert_eq!(DeleteParentAction::default(), DeleteParentAction::Prevent);
        assert_eq!(DeleteParentAction::all().len(), 4);
    }

    // Validation tests
    #[test]
    fn test_validation_checks() {
        assert!(Validation::Required.check(&PropValue::Null).is_err());
        assert!(Validation::MinLength(3).check(&PropValue::Null).is_ok());
        assert!(Validation::MinLength(3).check(&"ab".into()).is_err());
        assert!(Validation::Max(10.0).check(&PropValue::Int(11)).is_err());
        assert!(
            Validation::OneOf(vec!["a".into(), "b".into()])
                .check(&"b".into())
                .is_ok()
        );
    }

    #[test]
    fn test_validation_error_message() {
        assert_eq!(
            Validation::MinLength(5).error_message(),
            "Minimum length is 5 characters"
        );
    }
}

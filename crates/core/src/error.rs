//! Error types for Stowage
//!
//! This module provides unified error handling across the persistence core:
//! business-rule violations raised to the user, developer-class errors
//! (misconfiguration, missing schema), concurrency failures and commit failures.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for Stowage
#[derive(Debug, Error)]
pub enum StowageError {
    // ========================================================================
    // Property Errors
    // ========================================================================
    /// Property name not present in the class schema
    #[error("Property '{property}' does not exist on class '{class}'")]
    UnknownProperty { class: String, property: String },

    /// A value could not be coerced to the property's data type
    #[error("Invalid value for '{class}.{property}': {message}")]
    InvalidPropertyValue {
        class: String,
        property: String,
        message: String,
    },

    // ========================================================================
    // Business Object State Errors
    // ========================================================================
    /// The editability hook vetoed an edit
    #[error("Business object of class '{class}' is not editable: {message}")]
    NotEditable { class: String, message: String },

    /// The deletability hook (or a prevent-delete relationship) vetoed a delete
    #[error("Business object of class '{class}' cannot be deleted: {message}")]
    NotDeletable { class: String, message: String },

    /// An edit was started while one was already in progress
    #[error("Business object '{class}' ({key}) is already being edited")]
    AlreadyEditing { class: String, key: String },

    /// An invalid business object was handed to a committer
    #[error("Business object of class '{class}' is not valid: {message}")]
    BusinessObjectInvalid { class: String, message: String },

    // ========================================================================
    // Concurrency Errors
    // ========================================================================
    /// Stale version, duplicate key or lost write
    #[error("Concurrency violation: {0}")]
    ConcurrencyViolation(String),

    // ========================================================================
    // Relationship Errors
    // ========================================================================
    /// Composition/aggregation rule violated on add, remove or reparent
    #[error("Invalid operation on relationship '{relationship}' ({action}): {message}")]
    InvalidRelationshipOperation {
        relationship: String,
        action: String,
        message: String,
    },

    /// Relationship name not defined on the class
    #[error("Relationship '{relationship}' is not defined on class '{class}'")]
    RelationshipNotFound { class: String, relationship: String },

    // ========================================================================
    // Type Errors
    // ========================================================================
    /// Related or requested class is unknown or not type compatible
    #[error("Unknown or incompatible type: {0}")]
    UnknownTypeOrIncompatibleType(String),

    /// No way to construct an instance of the class
    #[error("No constructor available for class '{0}'")]
    MissingConstructor(String),

    /// Class not registered in the schema
    #[error("Class not found: {0}")]
    ClassNotFound(String),

    // ========================================================================
    // Schema Validation Errors
    // ========================================================================
    /// Class definition failed validation
    #[error("Class definition '{class}' is invalid: {message}")]
    ClassValidation { class: String, message: String },

    /// Property definition failed validation
    #[error("Property definition '{class}.{property}' is invalid: {message}")]
    PropValidation {
        class: String,
        property: String,
        message: String,
    },

    /// Relationship definition failed validation
    #[error("Relationship definition is invalid: {0}")]
    RelationshipValidation(String),

    /// Duplicate class name
    #[error("Duplicate class name: '{0}' already exists")]
    DuplicateClass(String),

    /// Duplicate property name
    #[error("Duplicate property name: '{property}' already exists in class '{class}'")]
    DuplicateProperty { class: String, property: String },

    // ========================================================================
    // Commit Errors
    // ========================================================================
    /// Aggregate failure of an atomic commit
    #[error("Commit of {participants} business object(s) failed: {source}")]
    CommitFailed {
        participants: usize,
        #[source]
        source: Box<StowageError>,
    },

    /// The backing store rejected an operation
    #[error("Data store error: {0}")]
    DataStore(String),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Misconfiguration, e.g. attaching no select query to a collection
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ========================================================================
    // IO Errors
    // ========================================================================
    /// File IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File read error
    #[error("Failed to read file '{path}': {message}")]
    FileRead { path: PathBuf, message: String },

    /// File write error
    #[error("Failed to write file '{path}': {message}")]
    FileWrite { path: PathBuf, message: String },

    // ========================================================================
    // Serialization Errors
    // ========================================================================
    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Schema version mismatch
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch { expected: u32, found: u32 },

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error with context
    #[error("{context}: {message}")]
    WithContext { context: String, message: String },
}

impl StowageError {
    /// Create an unknown property error
    pub fn unknown_property(class: impl Into<String>, property: impl Into<String>) -> Self {
        StowageError::UnknownProperty {
            class: class.into(),
            property: property.into(),
        }
    }

    /// Create an invalid property value error
    pub fn invalid_value(
        class: impl Into<String>,
        property: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        StowageError::InvalidPropertyValue {
            class: class.into(),
            property: property.into(),
            message: msg.into(),
        }
    }

    /// Create a relationship rule violation
    pub fn invalid_relationship(
        relationship: impl Into<String>,
        action: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        StowageError::InvalidRelationshipOperation {
            relationship: relationship.into(),
            action: action.into(),
            message: msg.into(),
        }
    }

    /// Create a concurrency violation
    pub fn concurrency(msg: impl Into<String>) -> Self {
        StowageError::ConcurrencyViolation(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        StowageError::Configuration(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        StowageError::Internal(msg.into())
    }

    /// Create an error with context
    pub fn with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        StowageError::WithContext {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Errors a UI should display to the end user
    pub fn is_user_facing(&self) -> bool {
        match self {
            StowageError::InvalidPropertyValue { .. }
            | StowageError::NotEditable { .. }
            | StowageError::NotDeletable { .. }
            | StowageError::BusinessObjectInvalid { .. }
            | StowageError::ConcurrencyViolation(_)
            | StowageError::InvalidRelationshipOperation { .. } => true,
            StowageError::CommitFailed { source, .. } => source.is_user_facing(),
            _ => false,
        }
    }

    /// Errors caused by misconfiguration or a programming mistake
    pub fn is_developer_error(&self) -> bool {
        match self {
            StowageError::UnknownProperty { .. }
            | StowageError::AlreadyEditing { .. }
            | StowageError::RelationshipNotFound { .. }
            | StowageError::UnknownTypeOrIncompatibleType(_)
            | StowageError::MissingConstructor(_)
            | StowageError::ClassNotFound(_)
            | StowageError::ClassValidation { .. }
            | StowageError::PropValidation { .. }
            | StowageError::RelationshipValidation(_)
            | StowageError::DuplicateClass(_)
            | StowageError::DuplicateProperty { .. }
            | StowageError::Configuration(_)
            | StowageError::Internal(_) => true,
            StowageError::CommitFailed { source, .. } => source.is_developer_error(),
            _ => false,
        }
    }

    /// Check if this error is a concurrency violation (directly or as a commit cause)
    pub fn is_concurrency(&self) -> bool {
        match self {
            StowageError::ConcurrencyViolation(_) => true,
            StowageError::CommitFailed { source, .. } => source.is_concurrency(),
            _ => false,
        }
    }

    /// Check if this error is a schema validation error
    pub fn is_schema_validation(&self) -> bool {
        matches!(
            self,
            StowageError::ClassValidation { .. }
                | StowageError::PropValidation { .. }
                | StowageError::RelationshipValidation(_)
                | StowageError::DuplicateClass(_)
                | StowageError::DuplicateProperty { .. }
        )
    }

    /// Check if this error is an IO error
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            StowageError::Io(_) | StowageError::FileRead { .. } | StowageError::FileWrite { .. }
        )
    }
}

/// Result type alias using StowageError
pub type StowageResult<T> = Result<T, StowageError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn with_context<C: Into<String>>(self, context: C) -> StowageResult<T>;
}

impl<T, E: Into<StowageError>> ResultExt<T> for Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> StowageResult<T> {
        self.map_err(|e| {
            let err: StowageError = e.into();
            StowageError::WithContext {
                context: context.into(),
                message: err.to_string(),
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

//! # Stowage Schema
//!
//! The class schema consumed by the business object runtime. It describes
//! what classes exist and how their instances relate to each other.
//!
//! ## Core Concepts
//!
//! - **ClassDef**: a business object class (e.g. Person, Address)
//! - **PropDef**: a persistable property with type, default, rules and lookup list
//! - **PrimaryKeyDef**: ordered key properties, or a generated object-id Guid
//! - **RelationshipDef**: a named single or multiple relationship with its
//!   ownership policy and delete action
//! - **ClassRegistry**: the registry the runtime resolves classes through
//! - **Criteria**: filter expressions and ordering used by select queries
//!

pub mod class_def;
pub mod criteria;
pub mod key_def;
pub mod prop_def;
pub mod registry;
pub mod relationship_def;
pub mod serialization;
pub mod validation;

pub use class_def::ClassDef;
pub use criteria::{Criteria, OrderCriteria, OrderField, SortDirection};
pub use key_def::PrimaryKeyDef;
pub use prop_def::{LookupItem, LookupList, PropDef};
pub use registry::ClassRegistry;
pub use relationship_def::{RelPropDef, RelationshipDef};
pub use serialization::{
    SchemaFile, load_registry, load_registry_from_string, save_registry, save_registry_to_string,
};
pub use validation::{ValidationResult, ValidationRule, Validator};

// Re-export core types that are commonly used with schemas
pub use stowage_core::{
    Cardinality, DataType, DeleteParentAction, PropValue, RelationshipType, StowageError,
    StowageResult, Validation,
};

/// Current schema version for schema files
pub const SCHEMA_VERSION: u32 = 1;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

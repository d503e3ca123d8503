//! Saving and loading class schemas
//!
//! A schema file is JSON holding the declared (not inheritance-resolved)
//! class definitions in registration order, wrapped with a schema version.

use crate::class_def::ClassDef;
use crate::registry::ClassRegistry;
use crate::SCHEMA_VERSION;
use serde::{Deserialize, Serialize};
use std::path::Path;
use stowage_core::{Persistable, StowageError, StowageResult};

/// File extension for schema files
pub const SCHEMA_EXTENSION: &str = "schema.json";

// ============================================================================
// Schema File Wrapper
// ============================================================================

/// Wrapper for schema files that includes version information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaFile {
    /// Schema version for migration purposes
    pub schema_version: u32,

    /// Declared classes in dependency order
    pub classes: Vec<ClassDef>,
}

impl SchemaFile {
    /// Capture a registry
    pub fn from_registry(registry: &ClassRegistry) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            classes: registry.declared().to_vec(),
        }
    }

    /// Rebuild a registry, rejecting files written by a newer version
    pub fn into_registry(self) -> StowageResult<ClassRegistry> {
        if self.schema_version > SCHEMA_VERSION {
            return Err(StowageError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: self.schema_version,
            });
        }
        ClassRegistry::from_classes(self.classes)
    }
}

impl Persistable for SchemaFile {
    fn file_extension() -> &'static str {
        SCHEMA_EXTENSION
    }

    fn schema_version() -> u32 {
        SCHEMA_VERSION
    }
}

// ============================================================================
// Save / Load
// ============================================================================

/// Save a registry to a file
pub fn save_registry(registry: &ClassRegistry, path: impl AsRef<Path>) -> StowageResult<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| StowageError::FileWrite {
                path: parent.to_path_buf(),
                message: e.to_string(),
            })?;
        }
    }

    SchemaFile::from_registry(registry).save_to_file(path)
}

/// Save a registry to a JSON string
pub fn save_registry_to_string(registry: &ClassRegistry) -> StowageResult<String> {
    SchemaFile::from_registry(registry).to_json()
}

/// Load a registry from a file
pub fn load_registry(path: impl AsRef<Path>) -> StowageResult<ClassRegistry> {
    let path = path.as_ref();
    SchemaFile::load_from_file(path)
        .map_err(|e| match e {
            StowageError::JsonSerialization(je) => StowageError::FileRead {
                path: path.to_path_buf(),
                message: format!("Invalid schema file format: {}", je),
            },
            other => other,
        })?
        .into_registry()
}

/// Load a registry from a JSON string
pub fn load_registry_from_string(json: &str) -> StowageResult<ClassRegistry> {
    SchemaFile::from_json(json)?.into_registry()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LookupList, OrderCriteria, PropDef, RelationshipDef};
    use stowage_core::{DataType, DeleteParentAction, Validation};

    fn sample_registry() -> ClassRegistry {
        ClassRegistry::from_classes([
            ClassDef::new("Person")
                .with_object_id("PersonID")
                .with_prop(
                    PropDef::new("Surname", DataType::String)
                        .compulsory()
                        .with_validation(Validation::MaxLength(50)),
                )
                .with_prop(
                    PropDef::new("Title", DataType::String)
                        .with_lookup(LookupList::new().with_item("Doctor", "Dr")),
                )
                .with_relationship(
                    RelationshipDef::multiple("Addresses", "Address")
                        .with_prop("PersonID", "PersonID")
                        .composition()
                        .on_delete(DeleteParentAction::DeleteRelated)
                        .order_by(OrderCriteria::new().asc("Street")),
                ),
            ClassDef::new("Address")
                .with_object_id("AddressID")
                .with_prop(PropDef::new("PersonID", DataType::Guid))
                .with_prop(PropDef::new("Street", DataType::String)),
            ClassDef::new("HomeAddress").extends("Address"),
        ])
        .unwrap()
    }

    #[test]
    fn test_string_round_trip() {
        let registry = sample_registry();
        let json = save_registry_to_string(&registry).unwrap();
        let loaded = load_registry_from_string(&json).unwrap();

        assert_eq!(loaded.declared(), registry.declared());
        assert_eq!(
            loaded.get("HomeAddress").unwrap().prop_names().count(),
            3
        );
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.schema.json");

        save_registry(&sample_registry(), &path).unwrap();
        let loaded = load_registry(&path).unwrap();

        let person = loaded.get("Person").unwrap();
        let rel = person.get_relationship("Addresses").unwrap();
        assert!(rel.is_composition());
        assert_eq!(rel.order.to_string(), "Street ASC");
    }

    #[test]
    fn test_newer_version_rejected() {
        let file = SchemaFile {
            schema_version: SCHEMA_VERSION + 1,
            classes: Vec::new(),
        };
        let json = file.to_json().unwrap();
        assert!(matches!(
            load_registry_from_string(&json),
            Err(StowageError::SchemaVersionMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.schema.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_registry(&path).unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn test_missing_file() {
        let err = load_registry("/nonexistent/model.schema.json").unwrap_err();
        assert!(matches!(err, StowageError::FileRead { .. }));
    }
}

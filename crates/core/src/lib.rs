//! # Stowage Core
//!
//! Core types, traits, errors and configuration shared by every Stowage crate.
//!
//! - **Types**: property values, data types, relationship ownership and
//!   delete policies, property validation rules
//! - **Traits**: `Validatable`, `Named`, `Persistable`
//! - **Errors**: unified error handling with `StowageError` and `StowageResult`
//! - **Config**: `StowageConfig`, loaded from TOML
//!

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used items at crate root
pub use config::{
    CollectionConfig, LoggingConfig, RelationshipConfig, StowageConfig, TransactionLogConfig,
};
pub use error::{ResultExt, StowageError, StowageResult};
pub use traits::{Named, Persistable, Validatable};
pub use types::{
    Cardinality, DataType, DeleteParentAction, PropValue, RelationshipType, Validation,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

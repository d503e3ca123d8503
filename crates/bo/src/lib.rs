//! # Stowage Business Objects
//!
//! The runtime half of Stowage. Classes described by `stowage_schema` become
//! live business objects with identity, edit state and relationships.
//!
//! ## Core Concepts
//!
//! - **BusinessObject**: an instance of a class, moving between new,
//!   persisted clean, persisted dirty and deleted states
//! - **IdentityMap**: guarantees one live instance per class and key
//! - **BusinessObjectCollection**: a loaded set of objects that tracks
//!   created, added, removed and marked-for-delete members until saved
//! - **SingleRelationship / MultipleRelationship**: navigation between
//!   objects governed by composition, aggregation or association rules
//! - **TransactionCommitter**: persists a set of objects as one atomic batch
//! - **DataStore**: the storage boundary; `InMemoryDataStore` is provided
//!

pub mod behaviour;
pub mod business_object;
pub mod collection;
pub mod committer;
pub mod concurrency;
pub mod context;
pub mod data_store;
pub mod events;
pub mod identity_map;
pub mod loader;
pub mod props;
pub mod query;
pub mod relationship;

#[cfg(test)]
pub(crate) mod fixtures;

pub use behaviour::{BoBehaviour, DefaultBehaviour};
pub use business_object::{BoState, BusinessObject, PropInput, WeakBusinessObject};
pub use collection::BusinessObjectCollection;
pub use committer::{TransactionCommitter, TransactionLog, TransactionalHook};
pub use concurrency::{ConcurrencyControl, NullConcurrencyControl, OptimisticLockingVersionNumber};
pub use context::BoContext;
pub use data_store::{DataStore, InMemoryDataStore, PendingOperation, Row};
pub use events::{BoEvent, BoListener, CollectionEvent};
pub use identity_map::{IdentityMap, identity_key};
pub use loader::Loader;
pub use props::{BoProp, PropChange, PropSet};
pub use query::SelectQuery;
pub use relationship::{MultipleRelationship, SingleRelationship};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

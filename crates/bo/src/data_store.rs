//! Backing store boundary
//!
//! The runtime talks to storage only through `DataStore`: rows for a select
//! query, and atomic execution of a batch of pending operations. SQL and
//! drivers live behind implementations of this trait.

use crate::query::SelectQuery;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use stowage_core::{PropValue, StowageError, StowageResult};
use stowage_schema::ClassDef;

/// One stored row: property name to value
pub type Row = BTreeMap<String, PropValue>;

/// A single write inside a commit batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PendingOperation {
    Insert {
        class: String,
        key: String,
        row: Row,
    },
    Update {
        class: String,
        /// Key the row is currently stored under
        key: String,
        /// Key after the update (differs when a key property was edited)
        new_key: String,
        row: Row,
    },
    Delete {
        class: String,
        key: String,
    },
}

impl PendingOperation {
    pub fn class(&self) -> &str {
        match self {
            PendingOperation::Insert { class, .. }
            | PendingOperation::Update { class, .. }
            | PendingOperation::Delete { class, .. } => class,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PendingOperation::Insert { .. } => "Insert",
            PendingOperation::Update { .. } => "Update",
            PendingOperation::Delete { .. } => "Delete",
        }
    }
}

/// Storage collaborator
pub trait DataStore: Send + Sync {
    /// Rows of `class` matching the query, ordered and windowed
    fn select(&self, class: &ClassDef, query: &SelectQuery) -> StowageResult<Vec<Row>>;

    /// Apply every operation or none of them
    fn execute(&self, operations: &[PendingOperation]) -> StowageResult<()>;
}

// ============================================================================
// InMemoryDataStore
// ============================================================================

type Tables = HashMap<String, BTreeMap<String, Row>>;

/// In-memory, HashMap-based data store
///
/// Intended for tests and the demo. Tables are keyed by class name and rows
/// by their textual primary key. Inserting an existing key and updating or
/// deleting a missing one are reported as concurrency violations.
pub struct InMemoryDataStore {
    tables: RwLock<Tables>,
    selects: AtomicUsize,
    fail_next_commit: AtomicBool,
    batches: RwLock<Vec<Vec<PendingOperation>>>,
}

impl InMemoryDataStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            selects: AtomicUsize::new(0),
            fail_next_commit: AtomicBool::new(false),
            batches: RwLock::new(Vec::new()),
        }
    }

    /// Put a row directly into a table, bypassing commits
    pub fn seed(&self, class: &ClassDef, row: Row) {
        let key = class
            .primary_key
            .key_string(&|name: &str| row.get(name).cloned().unwrap_or_default());
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(class.name.clone())
            .or_default()
            .insert(key, row);
    }

    /// Stored row by class and key string
    pub fn row(&self, class: &str, key: &str) -> Option<Row> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(class)
            .and_then(|table| table.get(key).cloned())
    }

    /// Every row of a table, in key order
    pub fn rows(&self, class: &str) -> Vec<Row> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(class)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of rows in a table
    pub fn len(&self, class: &str) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(class)
            .map_or(0, BTreeMap::len)
    }

    /// Number of `select` calls served
    pub fn select_count(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    /// Make the next `execute` fail without applying anything
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Every successfully executed batch, oldest first
    pub fn batches(&self) -> Vec<Vec<PendingOperation>> {
        self.batches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recent successfully executed batch
    pub fn last_batch(&self) -> Option<Vec<PendingOperation>> {
        self.batches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    fn apply(tables: &mut Tables, op: &PendingOperation) -> StowageResult<()> {
        match op {
            PendingOperation::Insert { class, key, row } => {
                let table = tables.entry(class.clone()).or_default();
                if table.contains_key(key) {
                    return Err(StowageError::concurrency(format!(
                        "duplicate key: {} ({}) already exists",
                        class, key
                    )));
                }
                table.insert(key.clone(), row.clone());
            }
            PendingOperation::Update {
                class,
                key,
                new_key,
                row,
            } => {
                let table = tables.entry(class.clone()).or_default();
                if table.remove(key).is_none() {
                    return Err(StowageError::concurrency(format!(
                        "lost write: {} ({}) no longer exists",
                        class, key
                    )));
                }
                if table.contains_key(new_key) {
                    return Err(StowageError::concurrency(format!(
                        "duplicate key: {} ({}) already exists",
                        class, new_key
                    )));
                }
                table.insert(new_key.clone(), row.clone());
            }
            PendingOperation::Delete { class, key } => {
                let removed = tables.get_mut(class).and_then(|table| table.remove(key));
                if removed.is_none() {
                    return Err(StowageError::concurrency(format!(
                        "lost write: {} ({}) was already deleted",
                        class, key
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for InMemoryDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore for InMemoryDataStore {
    fn select(&self, class: &ClassDef, query: &SelectQuery) -> StowageResult<Vec<Row>> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        Ok(query.apply(self.rows(&class.name)))
    }

    fn execute(&self, operations: &[PendingOperation]) -> StowageResult<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StowageError::DataStore(
                "commit rejected by the data store".to_string(),
            ));
        }

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        // work on a copy so a failing operation leaves the store untouched
        let mut staged = tables.clone();
        for op in operations {
            Self::apply(&mut staged, op)?;
        }
        *tables = staged;
        drop(tables);

        self.batches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(operations.to_vec());
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("InMemoryDataStore")
            .field("tables", &tables.len())
            .field("selects", &self.select_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Concurrency control
//!
//! The runtime asks a `ConcurrencyControl` before an object starts editing
//! and before it is persisted, lets it stamp the object just before the
//! batch is built, and tells it when write locks can go or a commit failed.

use crate::business_object::BusinessObject;
use crate::query::SelectQuery;
use stowage_core::{PropValue, StowageError, StowageResult};

pub trait ConcurrencyControl: Send + Sync {
    fn check_concurrency_before_begin_editing(&self, _bo: &BusinessObject) -> StowageResult<()> {
        Ok(())
    }

    fn check_concurrency_before_persisting(&self, _bo: &BusinessObject) -> StowageResult<()> {
        Ok(())
    }

    fn update_properties_with_latest_concurrency_info_before_persisting(
        &self,
        _bo: &BusinessObject,
    ) -> StowageResult<()> {
        Ok(())
    }

    /// Release any write lock held for `class` / `key`
    ///
    /// Called from drop, so it receives names rather than the object.
    fn release_write_locks(&self, _class: &str, _key: &str) {}

    fn update_as_transaction_rolled_back(&self, _bo: &BusinessObject) -> StowageResult<()> {
        Ok(())
    }
}

/// No concurrency checks at all
#[derive(Debug, Clone, Copy, Default)]
pub struct NullConcurrencyControl;

impl ConcurrencyControl for NullConcurrencyControl {}

/// Optimistic locking on an integer version property
///
/// The stored version must equal the version the object was loaded with,
/// both when editing starts and when the object is persisted. The version
/// is incremented just before the batch is built and reverted if the commit
/// fails.
#[derive(Debug, Clone)]
pub struct OptimisticLockingVersionNumber {
    version_prop: String,
}

impl OptimisticLockingVersionNumber {
    pub fn new(version_prop: impl Into<String>) -> Self {
        Self {
            version_prop: version_prop.into(),
        }
    }

    pub fn version_prop(&self) -> &str {
        &self.version_prop
    }

    fn check_stored_version(&self, bo: &BusinessObject) -> StowageResult<()> {
        if bo.is_new() {
            return Ok(());
        }

        let class = bo.class();
        let criteria = class
            .primary_key
            .criteria(&|name: &str| bo.persisted_value_or_null(name));
        let query = SelectQuery::new(&class.name).with_criteria(criteria);
        let rows = bo.context().store().select(class, &query)?;

        let Some(row) = rows.first() else {
            return Err(StowageError::concurrency(format!(
                "{} ({}) has been deleted by another user",
                class.name,
                bo.persisted_key_string()
            )));
        };

        let stored = row.get(&self.version_prop).cloned().unwrap_or_default();
        let loaded = bo.persisted_value_or_null(&self.version_prop);
        if !stored.same_value(&loaded) {
            return Err(StowageError::concurrency(format!(
                "{} ({}) has been edited by another user: version {} is now {}",
                class.name,
                bo.persisted_key_string(),
                loaded,
                stored
            )));
        }
        Ok(())
    }
}

impl ConcurrencyControl for OptimisticLockingVersionNumber {
    fn check_concurrency_before_begin_editing(&self, bo: &BusinessObject) -> StowageResult<()> {
        self.check_stored_version(bo)
    }

    fn check_concurrency_before_persisting(&self, bo: &BusinessObject) -> StowageResult<()> {
        self.check_stored_version(bo)
    }

    fn update_properties_with_latest_concurrency_info_before_persisting(
        &self,
        bo: &BusinessObject,
    ) -> StowageResult<()> {
        if bo.is_deleted() {
            return Ok(());
        }
        let next = bo
            .persisted_value_or_null(&self.version_prop)
            .as_int()
            .unwrap_or(0)
            + 1;
        bo.set_system_value(&self.version_prop, PropValue::Int(next))
    }

    fn update_as_transaction_rolled_back(&self, bo: &BusinessObject) -> StowageResult<()> {
        let loaded = bo.persisted_value_or_null(&self.version_prop);
        bo.set_system_value(&self.version_prop, loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataStore;
    use crate::fixtures;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn versioned() -> (crate::BoContext, Arc<crate::InMemoryDataStore>, BusinessObject) {
        let (ctx, store) = fixtures::context();
        ctx.set_concurrency_control("Person", Arc::new(OptimisticLockingVersionNumber::new("Version")));
        fixtures::seed_person_with_version(&ctx, &store, 1, "Smith", 4);
        let bo = ctx
            .loader()
            .get_business_object_by_key("Person", &[("ID", PropValue::Int(1))])
            .unwrap()
            .unwrap();
        (ctx, store, bo)
    }

    #[test]
    fn test_version_incremented_on_save() {
        let (_ctx, store, bo) = versioned();
        bo.set_property_value("Surname", "Jones").unwrap();
        bo.save().unwrap();

        assert_eq!(bo.value("Version").unwrap(), PropValue::Int(5));
        assert_eq!(
            store.row("Person", "ID=1").unwrap()["Version"],
            PropValue::Int(5)
        );
    }

    #[test]
    fn test_stale_version_blocks_edit() {
        let (ctx, store, bo) = versioned();
        fixtures::seed_person_with_version(&ctx, &store, 1, "Changed", 9);

        let err = bo.set_property_value("Surname", "Jones").unwrap_err();
        assert!(err.is_concurrency());
        assert!(!bo.is_dirty());
    }

    #[test]
    fn test_stale_version_blocks_save_and_rolls_back() {
        let (ctx, store, bo) = versioned();
        bo.set_property_value("Surname", "Jones").unwrap();
        fixtures::seed_person_with_version(&ctx, &store, 1, "Changed", 9);

        let err = bo.save().unwrap_err();
        assert!(err.is_concurrency());
        assert!(bo.is_dirty());
        assert_eq!(bo.value("Version").unwrap(), PropValue::Int(4));
    }

    #[test]
    fn test_version_reverted_when_store_fails() {
        let (_ctx, store, bo) = versioned();
        bo.set_property_value("Surname", "Jones").unwrap();
        store.fail_next_commit();

        assert!(bo.save().is_err());
        assert_eq!(bo.value("Version").unwrap(), PropValue::Int(4));
        assert_eq!(bo.value("Surname").unwrap(), PropValue::from("Jones"));
    }

    #[test]
    fn test_deleted_row_is_a_violation() {
        let (ctx, store, bo) = versioned();
        let class = ctx.class("Person").unwrap();
        store
            .execute(&[crate::PendingOperation::Delete {
                class: class.name.clone(),
                key: "ID=1".into(),
            }])
            .unwrap();

        assert!(bo.begin_edit().unwrap_err().is_concurrency());
    }
}

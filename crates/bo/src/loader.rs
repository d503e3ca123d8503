//! Loading business objects through the identity map
//!
//! Every row the data store returns is turned into a business object by
//! first consulting the identity map. An object already live for the row's
//! key is refreshed in place and returned, so all outstanding references
//! keep pointing at the one instance.

use crate::business_object::BusinessObject;
use crate::collection::BusinessObjectCollection;
use crate::context::BoContext;
use crate::data_store::Row;
use crate::identity_map::identity_key;
use crate::query::{SelectQuery, row_value};
use std::collections::HashMap;
use std::sync::Arc;
use stowage_core::{PropValue, StowageError, StowageResult};
use stowage_schema::{ClassDef, Criteria};

pub struct Loader {
    context: BoContext,
}

impl Loader {
    pub fn new(context: &BoContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Run a select query and materialize every row
    pub fn load(&self, query: &SelectQuery) -> StowageResult<Vec<BusinessObject>> {
        let class = self.context.class(&query.class_name)?;
        let rows = self.context.store().select(&class, query)?;
        tracing::debug!(query = %query, rows = rows.len(), "select executed");
        Ok(rows.iter().map(|row| self.materialize(&class, row)).collect())
    }

    /// At most one object matching `criteria`
    pub fn load_one(&self, class: &str, criteria: Criteria) -> StowageResult<Option<BusinessObject>> {
        let query = SelectQuery::new(class).with_criteria(criteria);
        let mut loaded = self.load(&query)?;
        if loaded.len() > 1 {
            return Err(StowageError::DataStore(format!(
                "{} returned {} rows where at most one was expected",
                query,
                loaded.len()
            )));
        }
        Ok(loaded.pop())
    }

    /// Object with the given primary key values
    ///
    /// A live instance in the identity map is returned without touching the
    /// store.
    pub fn get_business_object_by_key(
        &self,
        class: &str,
        key: &[(&str, PropValue)],
    ) -> StowageResult<Option<BusinessObject>> {
        let class_def = self.context.class(class)?;
        let mut values = HashMap::new();
        for (name, value) in key {
            let def = class_def
                .get_prop(name)
                .ok_or_else(|| StowageError::unknown_property(class, *name))?;
            values.insert(*name, def.coerce(class, value.clone())?);
        }
        let get = |name: &str| values.get(name).cloned().unwrap_or_default();

        let identity = identity_key(class, &class_def.primary_key.key_string(&get));
        if let Some(bo) = self.context.identity_map().lookup(&identity) {
            return Ok(Some(bo));
        }
        self.load_one(class, class_def.primary_key.criteria(&get))
    }

    /// Re-run a collection's select query
    pub fn refresh_collection(&self, collection: &BusinessObjectCollection) -> StowageResult<()> {
        collection.refresh()
    }

    fn materialize(&self, class: &Arc<ClassDef>, row: &Row) -> BusinessObject {
        let key = class
            .primary_key
            .key_string(&|name: &str| row_value(row, name));
        let identity = identity_key(&class.name, &key);

        if let Some(existing) = self.context.identity_map().lookup(&identity) {
            self.refresh_existing(&existing, row);
            return existing;
        }

        let bo = BusinessObject::from_row(&self.context, Arc::clone(class), row);
        if let Some(winner) = bo.register_identity() {
            self.refresh_existing(&winner, row);
            return winner;
        }
        self.context.behaviour_for(&class.name).after_load(&bo);
        bo
    }

    fn refresh_existing(&self, bo: &BusinessObject, row: &Row) {
        let busy = bo.is_dirty() || bo.is_editing();
        if busy && self.context.config().collections.refresh_skips_dirty {
            tracing::debug!(class = %bo.class_name(), key = %bo.key_string(), "pending edits kept on refresh");
            return;
        }
        bo.refresh_from_row(row, true);
        self.context.behaviour_for(bo.class_name()).after_load(bo);
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader").finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Business object collections
//!
//! A collection keeps a loaded set of objects and tells apart how each one
//! got there. Besides the current members it tracks:
//!
//! - `persisted`: members as last loaded or saved
//! - `created`: new objects created in or added to the collection
//! - `added`: persisted objects added from elsewhere
//! - `removed`: members taken out, still to be saved
//! - `marked_for_delete`: members flagged for deletion
//!
//! and maintains `current == (persisted ∪ created ∪ added) − removed −
//! marked_for_delete`. Members report their own state changes through
//! `BoEvent`s, which is how a commit made elsewhere reaches every collection
//! holding the object.

use crate::business_object::{BusinessObject, WeakBusinessObject};
use crate::context::BoContext;
use crate::events::{BoEvent, BoListener, CollectionEvent, next_listener_id};
use crate::query::SelectQuery;
use crate::relationship::release_parent;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use stowage_core::{PropValue, StowageError, StowageResult};
use stowage_schema::{ClassDef, Criteria, OrderCriteria, RelationshipDef};
use uuid::Uuid;

type ChangeHandler = Arc<dyn Fn(&CollectionEvent) + Send + Sync>;

/// Owner and definition of a relationship-bound collection
#[derive(Clone)]
struct Binding {
    def: RelationshipDef,
    owner: WeakBusinessObject,
}

struct CollectionState {
    current: Vec<BusinessObject>,
    key_index: HashMap<String, BusinessObject>,
    persisted: Vec<BusinessObject>,
    created: Vec<BusinessObject>,
    added: Vec<BusinessObject>,
    removed: Vec<BusinessObject>,
    marked_for_delete: Vec<BusinessObject>,
    query: SelectQuery,
    binding: Option<Binding>,
}

impl CollectionState {
    fn new(query: SelectQuery, binding: Option<Binding>) -> Self {
        Self {
            current: Vec::new(),
            key_index: HashMap::new(),
            persisted: Vec::new(),
            created: Vec::new(),
            added: Vec::new(),
            removed: Vec::new(),
            marked_for_delete: Vec::new(),
            query,
            binding,
        }
    }

    fn index(&mut self, bo: &BusinessObject) {
        if !bo.is_new() {
            self.key_index.insert(bo.key_string(), bo.clone());
        }
    }

    fn unindex(&mut self, bo: &BusinessObject) {
        self.key_index.retain(|_, member| !member.ptr_eq(bo));
    }

    fn rebuild_index(&mut self) {
        self.key_index = self
            .current
            .iter()
            .filter(|bo| !bo.is_new())
            .map(|bo| (bo.key_string(), bo.clone()))
            .collect();
    }

    /// Every object the collection knows about, once each
    fn all_members(&self) -> Vec<BusinessObject> {
        let mut seen = HashSet::new();
        self.current
            .iter()
            .chain(&self.persisted)
            .chain(&self.created)
            .chain(&self.added)
            .chain(&self.removed)
            .chain(&self.marked_for_delete)
            .filter(|bo| seen.insert(bo.addr()))
            .cloned()
            .collect()
    }
}

fn contains(list: &[BusinessObject], bo: &BusinessObject) -> bool {
    list.iter().any(|member| member.ptr_eq(bo))
}

/// Remove `bo` from `list`, reporting whether it was there
fn take(list: &mut Vec<BusinessObject>, bo: &BusinessObject) -> bool {
    let before = list.len();
    list.retain(|member| !member.ptr_eq(bo));
    list.len() != before
}

fn push_unique(list: &mut Vec<BusinessObject>, bo: &BusinessObject) {
    if !contains(list, bo) {
        list.push(bo.clone());
    }
}

struct CollectionInner {
    listener_id: u64,
    class: Arc<ClassDef>,
    context: BoContext,
    state: Mutex<CollectionState>,
    handlers: Mutex<Vec<ChangeHandler>>,
    self_weak: Weak<CollectionInner>,
}

impl CollectionInner {
    fn state(&self) -> MutexGuard<'_, CollectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribe(&self, bo: &BusinessObject) {
        let listener: Weak<dyn BoListener> = self.self_weak.clone();
        bo.add_listener(self.listener_id, listener);
        let owner = self
            .state()
            .binding
            .as_ref()
            .and_then(|binding| binding.owner.upgrade());
        if let Some(owner) = owner {
            release_parent(bo, &owner);
        }
    }

    fn unsubscribe(&self, bo: &BusinessObject) {
        bo.unsubscribe(self.listener_id);
    }

    fn notify(&self, event: CollectionEvent) {
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in &handlers {
            handler(&event);
        }
    }

    fn on_saved(&self, bo: &BusinessObject) {
        let mut state = self.state();
        take(&mut state.created, bo);
        if contains(&state.removed, bo) {
            return;
        }
        push_unique(&mut state.current, bo);
        state.unindex(bo);
        state.index(bo);
        if !bo.is_new() && !bo.is_deleted() {
            take(&mut state.added, bo);
            push_unique(&mut state.persisted, bo);
        }
    }

    fn on_deleted(&self, bo: &BusinessObject) {
        {
            let mut state = self.state();
            take(&mut state.current, bo);
            take(&mut state.persisted, bo);
            take(&mut state.created, bo);
            take(&mut state.added, bo);
            take(&mut state.removed, bo);
            take(&mut state.marked_for_delete, bo);
            state.unindex(bo);
        }
        self.unsubscribe(bo);
    }

    fn on_restored(&self, bo: &BusinessObject) {
        let moved = {
            let mut state = self.state();
            let moved = take(&mut state.marked_for_delete, bo);
            if moved {
                push_unique(&mut state.current, bo);
                state.index(bo);
            }
            moved
        };
        if moved {
            self.notify(CollectionEvent::Added(bo.clone()));
        }
    }

    fn on_marked_for_delete(&self, bo: &BusinessObject) {
        let moved = {
            let mut state = self.state();
            let moved = take(&mut state.current, bo);
            if moved {
                state.unindex(bo);
                push_unique(&mut state.marked_for_delete, bo);
            }
            moved
        };
        if moved {
            self.notify(CollectionEvent::Removed(bo.clone()));
        }
    }

    fn on_key_changed(&self, bo: &BusinessObject, old: &str, new: &str) {
        let mut state = self.state();
        let indexed_here = state
            .key_index
            .get(old)
            .is_some_and(|member| member.ptr_eq(bo));
        if indexed_here {
            state.key_index.remove(old);
            state.key_index.insert(new.to_string(), bo.clone());
        }
    }
}

impl BoListener for CollectionInner {
    fn on_event(&self, bo: &BusinessObject, event: &BoEvent) {
        match event {
            BoEvent::Saved => self.on_saved(bo),
            BoEvent::Deleted => self.on_deleted(bo),
            BoEvent::Restored => self.on_restored(bo),
            BoEvent::MarkedForDelete => self.on_marked_for_delete(bo),
            BoEvent::KeyChanged { old, new } => self.on_key_changed(bo, old, new),
            BoEvent::Updated | BoEvent::PropertyUpdated { .. } => {}
        }
    }
}

// ============================================================================
// BusinessObjectCollection
// ============================================================================

/// Shared handle on a collection of business objects of one class
#[derive(Clone)]
pub struct BusinessObjectCollection {
    inner: Arc<CollectionInner>,
}

impl BusinessObjectCollection {
    /// Empty collection of `class`
    pub fn new(context: &BoContext, class: &str) -> StowageResult<Self> {
        let class = context.class(class)?;
        let query = SelectQuery::new(&class.name);
        Ok(Self::build(context, class, query, None))
    }

    /// Collection of the objects related to `owner` through `def`
    pub(crate) fn for_relationship(
        context: &BoContext,
        def: &RelationshipDef,
        owner: &BusinessObject,
    ) -> StowageResult<Self> {
        let class = context.class(&def.related_class)?;
        let query = SelectQuery::new(&class.name).with_order(def.order.clone());
        let binding = Binding {
            def: def.clone(),
            owner: owner.downgrade(),
        };
        Ok(Self::build(context, class, query, Some(binding)))
    }

    fn build(
        context: &BoContext,
        class: Arc<ClassDef>,
        query: SelectQuery,
        binding: Option<Binding>,
    ) -> Self {
        let inner = Arc::new_cyclic(|self_weak| CollectionInner {
            listener_id: next_listener_id(),
            class,
            context: context.clone(),
            state: Mutex::new(CollectionState::new(query, binding)),
            handlers: Mutex::new(Vec::new()),
            self_weak: self_weak.clone(),
        });
        Self { inner }
    }

    fn state(&self) -> MutexGuard<'_, CollectionState> {
        self.inner.state()
    }

    fn binding(&self) -> Option<Binding> {
        self.state().binding.clone()
    }

    /// Same underlying collection
    pub fn ptr_eq(&self, other: &BusinessObjectCollection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Class of the members
    pub fn class(&self) -> &Arc<ClassDef> {
        &self.inner.class
    }

    /// Name of the members' class
    pub fn class_name(&self) -> &str {
        &self.inner.class.name
    }

    /// Context the collection loads and saves through
    pub fn context(&self) -> &BoContext {
        &self.inner.context
    }

    /// The collection's own query; a relationship's criteria are added on refresh
    pub fn select_query(&self) -> SelectQuery {
        self.state().query.clone()
    }

    /// Replace the query used by `refresh`; `None` is rejected
    pub fn set_select_query(&self, query: Option<SelectQuery>) -> StowageResult<()> {
        let Some(query) = query else {
            return Err(StowageError::configuration(format!(
                "the select query of a {} collection cannot be removed",
                self.class_name()
            )));
        };
        self.inner
            .context
            .registry()
            .check_compatible(&query.class_name, self.class_name())?;
        self.state().query = query;
        Ok(())
    }

    /// Relationship this collection belongs to, if any
    pub fn relationship(&self) -> Option<RelationshipDef> {
        self.binding().map(|binding| binding.def)
    }

    /// Owner of a relationship-bound collection, while it is alive
    pub fn owner(&self) -> Option<BusinessObject> {
        self.binding().and_then(|binding| binding.owner.upgrade())
    }

    /// Number of current members
    pub fn len(&self) -> usize {
        self.state().current.len()
    }

    /// No current members
    pub fn is_empty(&self) -> bool {
        self.state().current.is_empty()
    }

    /// Current member at `index`
    pub fn get(&self, index: usize) -> Option<BusinessObject> {
        self.state().current.get(index).cloned()
    }

    /// Snapshot of the current members
    pub fn to_vec(&self) -> Vec<BusinessObject> {
        self.state().current.clone()
    }

    /// Iterate over a snapshot of the current members
    pub fn iter(&self) -> std::vec::IntoIter<BusinessObject> {
        self.to_vec().into_iter()
    }

    /// `bo` is a current member
    pub fn contains(&self, bo: &BusinessObject) -> bool {
        contains(&self.state().current, bo)
    }

    /// Position of `bo` among the current members
    pub fn index_of(&self, bo: &BusinessObject) -> Option<usize> {
        self.state().current.iter().position(|member| member.ptr_eq(bo))
    }

    /// Members as last loaded or saved
    pub fn persisted(&self) -> Vec<BusinessObject> {
        self.state().persisted.clone()
    }

    /// New members not yet saved
    pub fn created(&self) -> Vec<BusinessObject> {
        self.state().created.clone()
    }

    /// Persisted objects added since the last load or save
    pub fn added(&self) -> Vec<BusinessObject> {
        self.state().added.clone()
    }

    /// Persisted members removed since the last load or save
    pub fn removed(&self) -> Vec<BusinessObject> {
        self.state().removed.clone()
    }

    /// Members marked for delete and awaiting a save
    pub fn marked_for_delete(&self) -> Vec<BusinessObject> {
        self.state().marked_for_delete.clone()
    }

    /// `bo` is known to the collection in any of its lists
    pub(crate) fn holds(&self, bo: &BusinessObject) -> bool {
        let state = self.state();
        [
            &state.current,
            &state.persisted,
            &state.created,
            &state.added,
            &state.removed,
            &state.marked_for_delete,
        ]
        .into_iter()
        .any(|list| contains(list, bo))
    }

    /// Members that have something to commit
    pub(crate) fn pending_members(&self) -> Vec<BusinessObject> {
        let state = self.state();
        let mut seen = HashSet::new();
        let pending: Vec<BusinessObject> = state
            .created
            .iter()
            .chain(state.current.iter().filter(|bo| bo.is_new() || bo.is_dirty()))
            .chain(&state.marked_for_delete)
            .chain(state.removed.iter().filter(|bo| bo.is_dirty()))
            .filter(|bo| seen.insert(bo.addr()))
            .cloned()
            .collect();
        pending
    }

    /// Register a closure for `Added` / `Removed` notifications
    pub fn on_change<F>(&self, handler: F)
    where
        F: Fn(&CollectionEvent) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Point a child's foreign key at this collection's owner, or clear it
    fn assign_owner_key(&self, bo: &BusinessObject, attach: bool) -> StowageResult<()> {
        let Some(binding) = self.binding() else {
            return Ok(());
        };
        let owner = binding.owner.upgrade();
        for pair in &binding.def.key {
            let value = match (&owner, attach) {
                (Some(owner), true) => owner.value_or_null(&pair.owner_prop),
                _ => PropValue::Null,
            };
            bo.set_owned_value(&pair.related_prop, value)?;
        }
        Ok(())
    }

    fn composition_violation(&self, def: &RelationshipDef, bo: &BusinessObject, message: String) -> StowageError {
        tracing::debug!(
            relationship = %def.name,
            class = %bo.class_name(),
            key = %bo.key_string(),
            "composition rule violated"
        );
        StowageError::invalid_relationship(
            &def.name,
            def.relationship_type.to_string(),
            format!("{} (delete action: {})", message, def.delete_parent_action),
        )
    }

    /// Add an object to the collection
    ///
    /// New objects are bookkept as created. A persisted child of a
    /// composition that belongs to another parent is refused.
    pub fn add(&self, bo: &BusinessObject) -> StowageResult<()> {
        if self.contains(bo) {
            return Ok(());
        }
        self.inner
            .context
            .registry()
            .check_compatible(bo.class_name(), self.class_name())?;

        if let Some(binding) = self.binding().filter(|b| b.def.is_composition()) {
            if !bo.is_new() && !bo.is_deleted() {
                let owner = binding.owner.upgrade();
                let owned_here = binding.def.key.iter().all(|pair| {
                    let parent = owner
                        .as_ref()
                        .map(|o| o.value_or_null(&pair.owner_prop))
                        .unwrap_or_default();
                    bo.persisted_value_or_null(&pair.related_prop).same_value(&parent)
                });
                if !owned_here {
                    return Err(self.composition_violation(
                        &binding.def,
                        bo,
                        format!(
                            "a persisted {} ({}) already belongs to another parent",
                            bo.class_name(),
                            bo.key_string()
                        ),
                    ));
                }
            }
        }
        self.assign_owner_key(bo, true)?;

        {
            let mut state = self.state();
            if bo.is_new() {
                push_unique(&mut state.created, bo);
            } else {
                let was_removed = take(&mut state.removed, bo);
                if !was_removed && !contains(&state.persisted, bo) {
                    push_unique(&mut state.added, bo);
                }
                state.index(bo);
            }
            take(&mut state.marked_for_delete, bo);
            state.current.push(bo.clone());
        }
        self.inner.subscribe(bo);
        tracing::debug!(collection = %self.class_name(), key = %bo.key_string(), "member added");
        self.inner.notify(CollectionEvent::Added(bo.clone()));
        Ok(())
    }

    /// Take an object out of the collection
    ///
    /// A persisted, still-parented child of a composition can only leave by
    /// being deleted.
    pub fn remove(&self, bo: &BusinessObject) -> StowageResult<()> {
        if !self.contains(bo) {
            return Ok(());
        }

        if let Some(binding) = self.binding().filter(|b| b.def.is_composition()) {
            let parented = !binding.def.key.is_empty()
                && binding
                    .def
                    .related_props()
                    .all(|prop| !bo.persisted_value_or_null(prop).is_null_or_empty());
            if !bo.is_new() && !bo.is_deleted() && parented {
                return Err(self.composition_violation(
                    &binding.def,
                    bo,
                    format!(
                        "a persisted {} ({}) can only leave its parent by being deleted",
                        bo.class_name(),
                        bo.key_string()
                    ),
                ));
            }
        }
        if !bo.is_deleted() {
            self.assign_owner_key(bo, false)?;
        }

        {
            let mut state = self.state();
            take(&mut state.current, bo);
            state.unindex(bo);
            // created and added members were never stored as part of this set
            if !take(&mut state.created, bo) && !take(&mut state.added, bo) {
                push_unique(&mut state.removed, bo);
            }
        }
        self.inner.unsubscribe(bo);
        tracing::debug!(collection = %self.class_name(), key = %bo.key_string(), "member removed");
        self.inner.notify(CollectionEvent::Removed(bo.clone()));
        Ok(())
    }

    /// Construct a new member of the collection's class
    pub fn create_business_object(&self) -> StowageResult<BusinessObject> {
        let bo = BusinessObject::new(&self.inner.context, self.class_name())?;
        self.assign_owner_key(&bo, true)?;
        {
            let mut state = self.state();
            push_unique(&mut state.created, &bo);
            state.current.push(bo.clone());
        }
        self.inner.subscribe(&bo);
        self.inner.notify(CollectionEvent::Added(bo.clone()));
        Ok(bo)
    }

    /// Mark a member for delete; it moves to `marked_for_delete`
    pub fn mark_for_delete(&self, bo: &BusinessObject) -> StowageResult<()> {
        if !self.contains(bo) {
            return Err(StowageError::configuration(format!(
                "{} ({}) is not a member of this collection",
                bo.class_name(),
                bo.key_string()
            )));
        }
        bo.mark_for_delete()
    }

    pub fn mark_for_delete_at(&self, index: usize) -> StowageResult<()> {
        let bo = self.get(index).ok_or_else(|| {
            StowageError::configuration(format!(
                "index {} is out of range for a collection of {}",
                index,
                self.len()
            ))
        })?;
        bo.mark_for_delete()
    }

    // ========================================================================
    // Loading
    // ========================================================================

    pub fn load(&self, criteria: Criteria, order: OrderCriteria) -> StowageResult<()> {
        self.configure_query(Some(criteria), order, None)?;
        self.refresh()
    }

    pub fn load_all(&self, order: OrderCriteria) -> StowageResult<()> {
        self.configure_query(None, order, None)?;
        self.refresh()
    }

    pub fn load_with_limit(
        &self,
        criteria: Option<Criteria>,
        order: OrderCriteria,
        limit: usize,
    ) -> StowageResult<()> {
        self.configure_query(criteria, order, Some(limit))?;
        self.refresh()
    }

    fn configure_query(
        &self,
        criteria: Option<Criteria>,
        order: OrderCriteria,
        limit: Option<usize>,
    ) -> StowageResult<()> {
        let mut query = SelectQuery::new(self.class_name()).with_order(order);
        query.criteria = criteria;
        query.limit = limit;
        self.set_select_query(Some(query))
    }

    /// Query actually run on refresh; `None` when an unsaved owner means
    /// nothing can be related yet
    fn effective_query(&self) -> Option<SelectQuery> {
        let (mut query, binding) = {
            let state = self.state();
            (state.query.clone(), state.binding.clone())
        };
        if let Some(binding) = binding {
            let owner = binding.owner.upgrade()?;
            let get = |name: &str| owner.value_or_null(name);
            if !binding.def.owner_key_is_set(&get) {
                return None;
            }
            let related = binding.def.criteria(&get);
            query.criteria = Some(match query.criteria.take() {
                Some(own) => related.and(own),
                None => related,
            });
        }
        Some(query)
    }

    /// Re-run the select query and reconcile the result by identity
    ///
    /// Loaded objects come through the identity map, so members still
    /// present stay the same instances. Members missing from the result
    /// leave `current` without being recorded as removed. Created and added
    /// members stay, removed and marked-for-delete ones stay out.
    pub fn refresh(&self) -> StowageResult<()> {
        let loaded = match self.effective_query() {
            Some(query) => self.inner.context.loader().load(&query)?,
            None => Vec::new(),
        };

        let (members, dropped) = {
            let mut state = self.state();
            let excluded: Vec<BusinessObject> = state
                .removed
                .iter()
                .chain(&state.marked_for_delete)
                .cloned()
                .collect();
            let mut current: Vec<BusinessObject> = loaded
                .iter()
                .filter(|bo| !contains(&excluded, bo))
                .cloned()
                .collect();
            for bo in state.created.iter().chain(&state.added) {
                if !contains(&current, bo) && !contains(&excluded, bo) {
                    current.push(bo.clone());
                }
            }
            let previous = std::mem::replace(&mut state.current, current);
            state.persisted = loaded;
            state.rebuild_index();

            let dropped: Vec<BusinessObject> = previous
                .into_iter()
                .filter(|bo| !contains(&state.current, bo) && !contains(&excluded, bo))
                .collect();
            (state.current.clone(), dropped)
        };

        for bo in &members {
            self.inner.subscribe(bo);
        }
        for bo in &dropped {
            self.inner.unsubscribe(bo);
        }
        tracing::debug!(collection = %self.class_name(), members = members.len(), "refreshed");
        Ok(())
    }

    /// Forget every member and all bookkeeping
    pub fn clear(&self) {
        let members = {
            let mut state = self.state();
            let members = state.all_members();
            state.current.clear();
            state.key_index.clear();
            state.persisted.clear();
            state.created.clear();
            state.added.clear();
            state.removed.clear();
            state.marked_for_delete.clear();
            members
        };
        for bo in &members {
            self.inner.unsubscribe(bo);
        }
    }

    // ========================================================================
    // Saving
    // ========================================================================

    /// Commit every pending member in one transaction
    pub fn save_all(&self) -> StowageResult<()> {
        let mut committer = self.inner.context.committer();
        for member in self.pending_members() {
            for bo in member.save_participants() {
                committer.add_business_object(&bo);
            }
        }
        committer.commit()?;

        let mut state = self.state();
        let removed = std::mem::take(&mut state.removed);
        state.persisted.retain(|bo| !contains(&removed, bo));
        state.created.clear();
        for bo in std::mem::take(&mut state.added) {
            if !bo.is_deleted() {
                push_unique(&mut state.persisted, &bo);
            }
        }
        Ok(())
    }

    /// Cancel every pending change made through the collection
    pub fn restore_all(&self) {
        let (current, created, marked, removed) = {
            let state = self.state();
            (
                state.current.clone(),
                state.created.clone(),
                state.marked_for_delete.clone(),
                state.removed.clone(),
            )
        };

        for bo in current.iter().filter(|bo| !contains(&created, bo)) {
            bo.restore();
        }

        for bo in &marked {
            bo.restore();
            let moved = {
                let mut state = self.state();
                let moved = take(&mut state.marked_for_delete, bo);
                if moved {
                    push_unique(&mut state.current, bo);
                    state.index(bo);
                }
                moved
            };
            if moved {
                self.inner.notify(CollectionEvent::Added(bo.clone()));
            }
        }

        for bo in &created {
            bo.restore();
            {
                let mut state = self.state();
                take(&mut state.created, bo);
                take(&mut state.current, bo);
                take(&mut state.marked_for_delete, bo);
            }
            self.inner.unsubscribe(bo);
            self.inner.notify(CollectionEvent::Removed(bo.clone()));
        }

        for bo in &removed {
            bo.restore();
            {
                let mut state = self.state();
                take(&mut state.removed, bo);
                push_unique(&mut state.current, bo);
                state.index(bo);
            }
            self.inner.subscribe(bo);
            self.inner.notify(CollectionEvent::Added(bo.clone()));
        }
    }

    // ========================================================================
    // Set operations
    // ========================================================================

    fn empty_like(&self) -> Self {
        let query = SelectQuery::new(self.class_name());
        Self::build(&self.inner.context, Arc::clone(&self.inner.class), query, None)
    }

    /// Take a member into a fresh collection as loaded (or created if new)
    fn adopt(&self, bo: &BusinessObject) {
        {
            let mut state = self.state();
            if contains(&state.current, bo) {
                return;
            }
            if bo.is_new() {
                push_unique(&mut state.created, bo);
            } else {
                push_unique(&mut state.persisted, bo);
                state.index(bo);
            }
            state.current.push(bo.clone());
        }
        self.inner.subscribe(bo);
    }

    /// Members current in both collections
    pub fn intersection(&self, other: &BusinessObjectCollection) -> BusinessObjectCollection {
        let theirs = other.to_vec();
        let result = self.empty_like();
        for bo in self.to_vec().iter().filter(|bo| contains(&theirs, bo)) {
            result.adopt(bo);
        }
        result
    }

    /// Members current in either collection
    pub fn union(&self, other: &BusinessObjectCollection) -> BusinessObjectCollection {
        let result = self.empty_like();
        for bo in self.to_vec().iter().chain(other.to_vec().iter()) {
            result.adopt(bo);
        }
        result
    }

    /// Shallow copy: same objects, new bookkeeping lists
    pub fn clone_collection(&self) -> BusinessObjectCollection {
        let copy = {
            let state = self.state();
            let copy = Self::build(
                &self.inner.context,
                Arc::clone(&self.inner.class),
                state.query.clone(),
                state.binding.clone(),
            );
            {
                let mut target = copy.state();
                target.current = state.current.clone();
                target.key_index = state.key_index.clone();
                target.persisted = state.persisted.clone();
                target.created = state.created.clone();
                target.added = state.added.clone();
                target.removed = state.removed.clone();
                target.marked_for_delete = state.marked_for_delete.clone();
            }
            copy
        };
        let subscribed: Vec<BusinessObject> = {
            let state = copy.state();
            state
                .current
                .iter()
                .chain(&state.created)
                .chain(&state.marked_for_delete)
                .cloned()
                .collect()
        };
        for bo in &subscribed {
            copy.inner.subscribe(bo);
        }
        copy
    }

    // ========================================================================
    // Lookup and sorting
    // ========================================================================

    /// Member with the given textual key, e.g. `ID=1`
    pub fn find(&self, key: &str) -> Option<BusinessObject> {
        let state = self.state();
        if let Some(bo) = state.key_index.get(key) {
            return Some(bo.clone());
        }
        state
            .created
            .iter()
            .filter(|bo| contains(&state.current, bo))
            .find(|bo| bo.key_string() == key)
            .cloned()
    }

    /// Member whose instance Guid is `id`
    ///
    /// Object-id classes go through the key index, then new members. Other
    /// classes do not key on the Guid and are scanned.
    pub fn find_by_guid(&self, id: Uuid) -> Option<BusinessObject> {
        let state = self.state();
        let primary_key = &self.inner.class.primary_key;
        if !primary_key.is_object_id {
            return state
                .current
                .iter()
                .chain(&state.created)
                .find(|bo| bo.id() == id)
                .cloned();
        }
        let key = primary_key.key_string(&|_: &str| PropValue::Guid(id));
        if let Some(bo) = state.key_index.get(&key) {
            return Some(bo.clone());
        }
        state
            .created
            .iter()
            .filter(|bo| contains(&state.current, bo))
            .find(|bo| bo.id() == id)
            .cloned()
    }

    fn sorted_members(&self, prop: &str, ascending: bool) -> StowageResult<Vec<BusinessObject>> {
        if self.inner.class.get_prop(prop).is_none() {
            return Err(StowageError::unknown_property(self.class_name(), prop));
        }
        let mut keyed: Vec<(PropValue, BusinessObject)> = self
            .to_vec()
            .into_iter()
            .map(|bo| (bo.value_or_null(prop), bo))
            .collect();
        keyed.sort_by(|(a, _), (b, _)| {
            let ordering = a.compare(b);
            if ascending { ordering } else { ordering.reverse() }
        });
        Ok(keyed.into_iter().map(|(_, bo)| bo).collect())
    }

    /// Stable sort of the current members by a property
    pub fn sort(&self, prop: &str, ascending: bool) -> StowageResult<()> {
        let sorted = self.sorted_members(prop, ascending)?;
        self.state().current = sorted;
        Ok(())
    }

    /// Stable sort of the current members with a comparer
    pub fn sort_by<F>(&self, compare: F)
    where
        F: FnMut(&BusinessObject, &BusinessObject) -> Ordering,
    {
        let mut members = self.to_vec();
        members.sort_by(compare);
        self.state().current = members;
    }

    /// Current members sorted by a property, leaving the collection as is
    pub fn get_sorted_list(&self, prop: &str, ascending: bool) -> StowageResult<Vec<BusinessObject>> {
        self.sorted_members(prop, ascending)
    }

    /// Copy of the collection with its members sorted by a property
    pub fn get_sorted_collection(
        &self,
        prop: &str,
        ascending: bool,
    ) -> StowageResult<BusinessObjectCollection> {
        let copy = self.clone_collection();
        copy.sort(prop, ascending)?;
        Ok(copy)
    }
}

impl std::fmt::Debug for BusinessObjectCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("BusinessObjectCollection")
            .field("class", &self.class_name())
            .field("current", &state.current.len())
            .field("created", &state.created.len())
            .field("removed", &state.removed.len())
            .field("marked_for_delete", &state.marked_for_delete.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataStore;
    use crate::fixtures;
    use pretty_assertions::assert_eq;

    fn keys(list: &[BusinessObject]) -> Vec<String> {
        let mut keys: Vec<String> = list.iter().map(BusinessObject::key_string).collect();
        keys.sort();
        keys
    }

    /// current == (persisted ∪ created ∪ added) − removed − marked_for_delete
    fn assert_partition(collection: &BusinessObjectCollection) {
        let removed = collection.removed();
        let marked = collection.marked_for_delete();
        let mut expected: Vec<BusinessObject> = Vec::new();
        for bo in collection
            .persisted()
            .iter()
            .chain(&collection.created())
            .chain(&collection.added())
        {
            if !contains(&expected, bo) && !contains(&removed, bo) && !contains(&marked, bo) {
                expected.push(bo.clone());
            }
        }
        let current = collection.to_vec();
        assert_eq!(current.len(), expected.len(), "{:?}", collection);
        for bo in &expected {
            assert!(contains(&current, bo), "{:?} missing from current", bo);
        }
    }

    fn people(n: i64) -> (BoContext, Arc<crate::InMemoryDataStore>, BusinessObjectCollection) {
        let (ctx, store) = fixtures::context();
        for id in 1..=n {
            fixtures::seed_person(&ctx, &store, id, &format!("Person{}", id));
        }
        let collection = ctx.collection("Person").unwrap();
        collection.load_all(OrderCriteria::new().asc("ID")).unwrap();
        (ctx, store, collection)
    }

    #[test]
    fn test_load_all_populates_current_and_persisted() {
        let (_ctx, _store, collection) = people(3);
        assert_eq!(collection.len(), 3);
        assert_eq!(collection.persisted().len(), 3);
        assert_eq!(collection.get(0).unwrap().key_string(), "ID=1");
        assert!(collection.find("ID=2").is_some());
        assert_partition(&collection);
    }

    #[test]
    fn test_partition_holds_through_operations() {
        let (ctx, store, collection) = people(3);
        fixtures::seed_person(&ctx, &store, 9, "Elsewhere");
        let outsider = fixtures::load_person(&ctx, &store, 9);

        let created = collection.create_business_object().unwrap();
        assert_partition(&collection);

        collection.add(&outsider).unwrap();
        assert_eq!(collection.added().len(), 1);
        assert_partition(&collection);

        let first = collection.get(0).unwrap();
        collection.remove(&first).unwrap();
        collection.remove(&first).unwrap();
        assert_eq!(collection.removed().len(), 1);
        assert_partition(&collection);

        let second = collection.get(0).unwrap();
        collection.mark_for_delete(&second).unwrap();
        assert_partition(&collection);

        created.set_property_value("ID", 4).unwrap();
        created.set_property_value("Surname", "New").unwrap();
        collection.save_all().unwrap();
        assert_partition(&collection);
        assert!(collection.created().is_empty());
        assert!(collection.removed().is_empty());
        assert!(collection.marked_for_delete().is_empty());
        assert_eq!(keys(&collection.to_vec()), vec!["ID=3", "ID=4", "ID=9"]);
    }

    #[test]
    fn test_save_all_commits_new_and_dirty_only() {
        let (ctx, store) = fixtures::context();
        fixtures::seed_person(&ctx, &store, 2, "Bravo");
        fixtures::seed_person(&ctx, &store, 3, "Charlie");
        let collection = ctx.collection("Person").unwrap();
        collection.load_all(OrderCriteria::new().asc("ID")).unwrap();

        let a = collection.create_business_object().unwrap();
        a.set_property_value("ID", 1).unwrap();
        a.set_property_value("Surname", "Alpha").unwrap();
        let b = collection.find("ID=2").unwrap();
        b.set_property_value("Surname", "Beta").unwrap();
        let c = collection.find("ID=3").unwrap();

        collection.save_all().unwrap();

        let batch = store.last_batch().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch.iter().map(|op| op.kind()).collect::<Vec<_>>(),
            vec!["Insert", "Update"]
        );
        assert!(collection.created().is_empty());
        for bo in [&a, &b] {
            assert!(!bo.is_new());
            assert!(!bo.is_dirty());
        }
        assert!(!c.is_dirty());
        assert!(collection.find("ID=1").unwrap().ptr_eq(&a));
    }

    #[test]
    fn test_failed_save_all_keeps_bookkeeping() {
        let (_ctx, store, collection) = people(3);
        let created = collection.create_business_object().unwrap();
        created.set_property_value("ID", 4).unwrap();
        created.set_property_value("Surname", "New").unwrap();
        let dirty = collection.find("ID=1").unwrap();
        dirty.set_property_value("Surname", "Changed").unwrap();
        let doomed = collection.find("ID=2").unwrap();
        collection.mark_for_delete(&doomed).unwrap();
        let batches = store.batches().len();

        store.fail_next_commit();
        assert!(collection.save_all().is_err());

        assert_eq!(store.batches().len(), batches);
        assert_eq!(store.len("Person"), 3);
        assert_eq!(keys(&collection.created()), vec!["ID=4"]);
        assert_eq!(keys(&collection.persisted()), vec!["ID=1", "ID=2", "ID=3"]);
        assert_eq!(keys(&collection.marked_for_delete()), vec!["ID=2"]);
        assert!(collection.find("ID=2").is_none());
        assert!(created.is_new());
        assert!(dirty.is_dirty());
        assert!(doomed.is_deleted());
        assert_partition(&collection);

        collection.save_all().unwrap();
        assert!(collection.created().is_empty());
        assert!(collection.marked_for_delete().is_empty());
        assert_eq!(keys(&collection.to_vec()), vec!["ID=1", "ID=3", "ID=4"]);
        assert_partition(&collection);
    }

    #[test]
    fn test_find_falls_back_to_created() {
        let (ctx, _store) = fixtures::context();
        let collection = ctx.collection("Person").unwrap();
        let created = collection.create_business_object().unwrap();
        created.set_property_value("ID", 1).unwrap();

        let found = collection.find("ID=1").unwrap();
        assert!(found.ptr_eq(&created));
        assert!(collection.find("ID=2").is_none());
        assert!(collection.find_by_guid(created.id()).unwrap().ptr_eq(&created));
    }

    #[test]
    fn test_find_by_guid_uses_object_id_key() {
        let (ctx, store) = fixtures::context();
        fixtures::seed_person(&ctx, &store, 1, "Smith");
        let main = fixtures::seed_address(&ctx, &store, 1, "Main St");
        fixtures::seed_address(&ctx, &store, 1, "High St");
        let smith = fixtures::load_person(&ctx, &store, 1);
        let addresses = smith.get_related_collection("Addresses").unwrap();

        let found = addresses.find_by_guid(main).unwrap();
        assert_eq!(found.value("Street").unwrap(), PropValue::from("Main St"));
        assert!(found.ptr_eq(&addresses.find(&format!("AddressID={}", main)).unwrap()));

        let created = addresses.create_business_object().unwrap();
        assert!(addresses.find_by_guid(created.id()).unwrap().ptr_eq(&created));
        addresses.remove(&created).unwrap();
        assert!(addresses.find_by_guid(created.id()).is_none());
        assert!(addresses.find_by_guid(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_add_new_object_counts_as_created() {
        let (ctx, _store) = fixtures::context();
        let collection = ctx.collection("Person").unwrap();
        let bo = ctx.create("Person").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        collection.on_change(move |event| {
            let name = match event {
                CollectionEvent::Added(_) => "added",
                CollectionEvent::Removed(_) => "removed",
            };
            sink.lock().unwrap().push(name);
        });

        collection.add(&bo).unwrap();
        collection.add(&bo).unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.created().len(), 1);
        assert!(collection.added().is_empty());

        collection.remove(&bo).unwrap();
        assert!(collection.created().is_empty());
        assert!(collection.removed().is_empty());
        assert_eq!(*seen.lock().unwrap(), vec!["added", "removed"]);
    }

    #[test]
    fn test_add_rejects_other_class() {
        let (ctx, _store) = fixtures::context();
        let collection = ctx.collection("Person").unwrap();
        let note = ctx.create("Note").unwrap();
        assert!(matches!(
            collection.add(&note),
            Err(StowageError::UnknownTypeOrIncompatibleType(_))
        ));

        let addresses = ctx.collection("Address").unwrap();
        addresses.add(&ctx.create("HomeAddress").unwrap()).unwrap();
        assert_eq!(addresses.len(), 1);
    }

    #[test]
    fn test_create_in_abstract_collection() {
        let (ctx, _store) = fixtures::context();
        let parties = ctx.collection("Party").unwrap();
        assert!(matches!(
            parties.create_business_object(),
            Err(StowageError::MissingConstructor(_))
        ));
    }

    #[test]
    fn test_composition_enforcement() {
        let (ctx, store) = fixtures::context();
        fixtures::seed_person(&ctx, &store, 1, "Smith");
        fixtures::seed_person(&ctx, &store, 2, "Jones");
        fixtures::seed_address(&ctx, &store, 1, "Main St");
        fixtures::seed_address(&ctx, &store, 2, "Elm St");
        let smith = fixtures::load_person(&ctx, &store, 1);
        let jones = fixtures::load_person(&ctx, &store, 2);

        let smiths = smith.get_related_collection("Addresses").unwrap();
        let jones_address = jones.get_related_collection("Addresses").unwrap().get(0).unwrap();

        let err = smiths.add(&jones_address).unwrap_err();
        match &err {
            StowageError::InvalidRelationshipOperation {
                relationship,
                action,
                message,
            } => {
                assert_eq!(relationship, "Addresses");
                assert_eq!(action, "Composition");
                assert!(message.contains("DeleteRelated"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(smiths.len(), 1);
        assert!(!jones_address.is_dirty());

        let fresh = ctx.create("Address").unwrap();
        smiths.add(&fresh).unwrap();
        assert_eq!(fresh.value("PersonID").unwrap(), PropValue::Int(1));
        assert_eq!(smiths.len(), 2);

        let persisted = smiths
            .to_vec()
            .into_iter()
            .find(|a| !a.is_new())
            .unwrap();
        assert!(matches!(
            smiths.remove(&persisted),
            Err(StowageError::InvalidRelationshipOperation { .. })
        ));
        smiths.remove(&fresh).unwrap();
        assert_eq!(fresh.value("PersonID").unwrap(), PropValue::Null);
    }

    #[test]
    fn test_aggregation_allows_reparenting() {
        let (ctx, store) = fixtures::context();
        fixtures::seed_person(&ctx, &store, 1, "Smith");
        fixtures::seed_person(&ctx, &store, 2, "Jones");
        fixtures::seed_note(&ctx, &store, 2, "hello");
        let smith = fixtures::load_person(&ctx, &store, 1);
        let jones = fixtures::load_person(&ctx, &store, 2);

        let jones_notes = jones.get_related_collection("Notes").unwrap();
        let note = jones_notes.get(0).unwrap();
        jones_notes.remove(&note).unwrap();
        assert_eq!(note.value("PersonID").unwrap(), PropValue::Null);
        assert_eq!(jones_notes.removed().len(), 1);

        let smith_notes = smith.get_related_collection("Notes").unwrap();
        smith_notes.add(&note).unwrap();
        assert_eq!(note.value("PersonID").unwrap(), PropValue::Int(1));
        assert_eq!(smith_notes.added().len(), 1);

        smith.save().unwrap();
        assert!(!note.is_dirty());
        assert_eq!(smith_notes.persisted().len(), 1);
        assert!(smith_notes.added().is_empty());
    }

    #[test]
    fn test_mark_for_delete_and_restore_bookkeeping() {
        let (_ctx, _store, collection) = people(2);
        let first = collection.get(0).unwrap();

        collection.mark_for_delete_at(0).unwrap();
        assert!(!collection.contains(&first));
        assert!(contains(&collection.marked_for_delete(), &first));
        assert!(collection.find("ID=1").is_none());

        first.restore();
        assert!(collection.contains(&first));
        assert!(collection.marked_for_delete().is_empty());
        assert!(collection.find("ID=1").is_some());
        assert_partition(&collection);

        assert!(matches!(
            collection.mark_for_delete_at(5),
            Err(StowageError::Configuration(_))
        ));
    }

    #[test]
    fn test_deleted_member_leaves_every_list() {
        let (_ctx, store, collection) = people(2);
        let first = collection.get(0).unwrap();
        first.mark_for_delete().unwrap();
        first.save().unwrap();

        assert!(!contains(&collection.persisted(), &first));
        assert!(collection.marked_for_delete().is_empty());
        assert_eq!(collection.len(), 1);
        assert_eq!(store.len("Person"), 1);
    }

    #[test]
    fn test_saved_elsewhere_moves_created_to_persisted() {
        let (ctx, _store) = fixtures::context();
        let collection = ctx.collection("Person").unwrap();
        let bo = collection.create_business_object().unwrap();
        bo.set_property_value("ID", 5).unwrap();
        bo.set_property_value("Surname", "Smith").unwrap();

        bo.save().unwrap();
        assert!(collection.created().is_empty());
        assert!(contains(&collection.persisted(), &bo));
        assert!(collection.find("ID=5").unwrap().ptr_eq(&bo));
    }

    #[test]
    fn test_key_change_reindexes() {
        let (_ctx, _store, collection) = people(1);
        let bo = collection.get(0).unwrap();
        bo.set_property_value("ID", 7).unwrap();

        assert!(collection.find("ID=1").is_none());
        assert!(collection.find("ID=7").unwrap().ptr_eq(&bo));
    }

    #[test]
    fn test_restore_all() {
        let (_ctx, _store, collection) = people(3);
        let edited = collection.get(0).unwrap();
        let removed = collection.get(1).unwrap();
        let marked = collection.get(2).unwrap();

        edited.set_property_value("Surname", "Changed").unwrap();
        collection.remove(&removed).unwrap();
        marked.mark_for_delete().unwrap();
        let created = collection.create_business_object().unwrap();

        collection.restore_all();

        assert_eq!(keys(&collection.to_vec()), vec!["ID=1", "ID=2", "ID=3"]);
        assert!(!collection.contains(&created));
        assert!(collection.created().is_empty());
        assert!(collection.removed().is_empty());
        assert!(collection.marked_for_delete().is_empty());
        assert_eq!(edited.value("Surname").unwrap(), PropValue::from("Person1"));
        assert!(!marked.is_deleted());
        assert_partition(&collection);
    }

    #[test]
    fn test_refresh_keeps_instances_and_bookkeeping() {
        let (ctx, store, collection) = people(2);
        let before = collection.to_vec();
        let created = collection.create_business_object().unwrap();
        let gone = collection.get(1).unwrap();
        collection.remove(&gone).unwrap();

        fixtures::seed_person(&ctx, &store, 3, "Person3");
        collection.refresh().unwrap();

        assert!(collection.get(0).unwrap().ptr_eq(&before[0]));
        assert!(collection.contains(&created));
        assert!(!collection.contains(&gone));
        assert_eq!(collection.removed().len(), 1);
        assert_eq!(collection.len(), 3);
        assert_partition(&collection);
    }

    #[test]
    fn test_refresh_drops_vanished_rows_without_removing() {
        let (_ctx, store, collection) = people(2);
        let second = collection.get(1).unwrap();
        store
            .execute(&[crate::PendingOperation::Delete {
                class: "Person".into(),
                key: "ID=2".into(),
            }])
            .unwrap();

        collection.refresh().unwrap();
        assert!(!collection.contains(&second));
        assert!(collection.removed().is_empty());
        assert!(!second.is_deleted());
    }

    #[test]
    fn test_load_with_criteria_and_limit() {
        let (_ctx, _store, collection) = people(5);
        collection
            .load(Criteria::Gt("ID".into(), PropValue::Int(2)), OrderCriteria::new().desc("ID"))
            .unwrap();
        assert_eq!(collection.get(0).unwrap().key_string(), "ID=5");
        assert_eq!(collection.len(), 3);

        collection
            .load_with_limit(None, OrderCriteria::new().asc("ID"), 2)
            .unwrap();
        assert_eq!(keys(&collection.to_vec()), vec!["ID=1", "ID=2"]);
        assert_eq!(collection.select_query().limit, Some(2));
    }

    #[test]
    fn test_select_query_cannot_be_removed() {
        let (ctx, _store) = fixtures::context();
        let collection = ctx.collection("Person").unwrap();
        assert!(matches!(
            collection.set_select_query(None),
            Err(StowageError::Configuration(_))
        ));
        assert!(collection
            .set_select_query(Some(SelectQuery::new("Address")))
            .is_err());
    }

    #[test]
    fn test_clear_is_a_hard_reset() {
        let (_ctx, _store, collection) = people(2);
        collection.create_business_object().unwrap();
        collection.clear();
        assert!(collection.is_empty());
        assert!(collection.persisted().is_empty());
        assert!(collection.created().is_empty());
        assert!(collection.find("ID=1").is_none());
    }

    #[test]
    fn test_set_operations() {
        let (ctx, _store, all) = people(3);
        let some = ctx.collection("Person").unwrap();
        some.load(Criteria::Lt("ID".into(), PropValue::Int(3)), OrderCriteria::new())
            .unwrap();
        let extra = ctx.collection("Person").unwrap();
        let created = extra.create_business_object().unwrap();

        let both = all.intersection(&some);
        assert_eq!(keys(&both.to_vec()), vec!["ID=1", "ID=2"]);
        assert!(both.get(0).unwrap().ptr_eq(&all.get(0).unwrap()));

        let union = some.union(&extra);
        assert_eq!(union.len(), 3);
        assert!(union.contains(&created));
        assert_eq!(union.created().len(), 1);
        assert_partition(&union);
    }

    #[test]
    fn test_clone_collection_is_shallow() {
        let (_ctx, _store, collection) = people(2);
        collection.create_business_object().unwrap();
        let copy = collection.clone_collection();

        assert!(!copy.ptr_eq(&collection));
        assert_eq!(copy.len(), 3);
        assert_eq!(copy.created().len(), 1);
        assert!(copy.get(0).unwrap().ptr_eq(&collection.get(0).unwrap()));

        copy.remove(&copy.get(0).unwrap()).unwrap();
        assert_eq!(collection.len(), 3);
    }

    #[test]
    fn test_sorting() {
        let (_ctx, _store, collection) = people(3);
        collection.sort("ID", false).unwrap();
        assert_eq!(collection.get(0).unwrap().key_string(), "ID=3");

        let sorted = collection.get_sorted_list("Surname", true).unwrap();
        assert_eq!(sorted[0].key_string(), "ID=1");
        assert_eq!(collection.get(0).unwrap().key_string(), "ID=3");

        let copy = collection.get_sorted_collection("ID", true).unwrap();
        assert_eq!(copy.get(0).unwrap().key_string(), "ID=1");

        collection.sort_by(|a, b| a.key_string().cmp(&b.key_string()));
        assert_eq!(collection.get(0).unwrap().key_string(), "ID=1");

        assert!(matches!(
            collection.sort("Nickname", true),
            Err(StowageError::UnknownProperty { .. })
        ));
    }
}

//! Business objects
//!
//! A `BusinessObject` is a shared handle on one domain object: its property
//! set, state flags, cached relationships and event subscribers. Handles
//! are cheap to clone and compare by identity.
//!
//! State flags and the derived `BoState`:
//!
//! | state            | is_new | is_deleted | is_dirty | is_editing |
//! |------------------|--------|------------|----------|------------|
//! | `New`            | true   | false      | any      | any        |
//! | `PersistedClean` | false  | false      | false    | false      |
//! | `Editing`        | false  | false      | false    | true       |
//! | `PersistedDirty` | false  | false      | true     | any        |
//! | `DeletedPending` | any    | true       | true     | any        |
//! | `DeletedFinal`   | true   | true       | false    | false      |
//!
//! Object locks are never held while events fire or while hooks, the
//! loader or the committer run.

use crate::behaviour::BoBehaviour;
use crate::collection::BusinessObjectCollection;
use crate::concurrency::ConcurrencyControl;
use crate::context::BoContext;
use crate::data_store::{PendingOperation, Row};
use crate::events::{BoEvent, BoListener, next_listener_id};
use crate::identity_map::identity_key;
use crate::props::{PropChange, PropSet};
use crate::relationship::{MultipleRelationship, RelCache, SingleRelationship, check_composition_move};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use stowage_core::{DeleteParentAction, PropValue, StowageError, StowageResult};
use stowage_schema::{ClassDef, RelationshipDef};
use uuid::Uuid;

// ============================================================================
// State
// ============================================================================

/// Lifecycle state derived from the object's flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoState {
    New,
    PersistedClean,
    PersistedDirty,
    Editing,
    DeletedPending,
    DeletedFinal,
}

/// Value accepted by `set_property_value`
///
/// A business object stands for its key value.
#[derive(Debug, Clone)]
pub enum PropInput {
    Value(PropValue),
    Object(BusinessObject),
}

impl From<PropValue> for PropInput {
    fn from(v: PropValue) -> Self {
        PropInput::Value(v)
    }
}

impl From<&str> for PropInput {
    fn from(v: &str) -> Self {
        PropInput::Value(v.into())
    }
}

impl From<String> for PropInput {
    fn from(v: String) -> Self {
        PropInput::Value(v.into())
    }
}

impl From<bool> for PropInput {
    fn from(v: bool) -> Self {
        PropInput::Value(v.into())
    }
}

impl From<i32> for PropInput {
    fn from(v: i32) -> Self {
        PropInput::Value(v.into())
    }
}

impl From<i64> for PropInput {
    fn from(v: i64) -> Self {
        PropInput::Value(v.into())
    }
}

impl From<f64> for PropInput {
    fn from(v: f64) -> Self {
        PropInput::Value(v.into())
    }
}

impl From<Uuid> for PropInput {
    fn from(v: Uuid) -> Self {
        PropInput::Value(v.into())
    }
}

impl From<DateTime<Utc>> for PropInput {
    fn from(v: DateTime<Utc>) -> Self {
        PropInput::Value(v.into())
    }
}

impl From<BusinessObject> for PropInput {
    fn from(v: BusinessObject) -> Self {
        PropInput::Object(v)
    }
}

impl From<&BusinessObject> for PropInput {
    fn from(v: &BusinessObject) -> Self {
        PropInput::Object(v.clone())
    }
}

// ============================================================================
// Internals
// ============================================================================

struct BoData {
    props: PropSet,
    is_new: bool,
    is_dirty: bool,
    is_editing: bool,
    is_deleted: bool,
    /// Identity key this object is registered under, if any
    registered_key: Option<String>,
    /// Children marked for delete or dereferenced by this object's delete
    cascade: Vec<BusinessObject>,
}

struct ListenerEntry {
    id: u64,
    listener: Weak<dyn BoListener>,
}

pub(crate) struct BoInner {
    id: Uuid,
    class: Arc<ClassDef>,
    context: BoContext,
    data: RwLock<BoData>,
    relationships: Mutex<HashMap<String, RelCache>>,
    listeners: Mutex<Vec<ListenerEntry>>,
}

impl Drop for BoInner {
    fn drop(&mut self) {
        let data = self.data.get_mut().unwrap_or_else(PoisonError::into_inner);
        let key = key_of(&self.class, &data.props);
        if let Some(identity) = data.registered_key.take() {
            self.context.identity_map().purge_dead(&identity);
        }
        self.context
            .concurrency_for(&self.class.name)
            .release_write_locks(&self.class.name, &key);
    }
}

fn key_of(class: &ClassDef, props: &PropSet) -> String {
    class
        .primary_key
        .key_string(&|name: &str| props.value_or_null(name))
}

fn persisted_key_of(class: &ClassDef, props: &PropSet) -> String {
    class
        .primary_key
        .key_string(&|name: &str| props.persisted_or_null(name))
}

// ============================================================================
// BusinessObject
// ============================================================================

#[derive(Clone)]
pub struct BusinessObject {
    inner: Arc<BoInner>,
}

/// Non-owning handle on a business object
#[derive(Debug, Clone)]
pub struct WeakBusinessObject {
    inner: Weak<BoInner>,
}

impl WeakBusinessObject {
    pub fn upgrade(&self) -> Option<BusinessObject> {
        self.inner.upgrade().map(BusinessObject::from_inner)
    }
}

impl BusinessObject {
    /// Construct a new object of a registered, non-abstract class
    ///
    /// Object-id classes get a fresh Guid key and join the identity map
    /// straight away.
    pub fn new(context: &BoContext, class_name: &str) -> StowageResult<Self> {
        let class = context.registry().constructible(class_name)?;
        let mut props = PropSet::new(&class);
        let id = Uuid::new_v4();
        let object_id = class.primary_key.is_object_id;
        if object_id {
            if let Some(prop) = class.primary_key.props.first() {
                props.init_value(prop, PropValue::Guid(id))?;
            }
        }

        let bo = Self::build(context, class, props, id, true);
        if object_id {
            bo.register_identity();
        }
        tracing::debug!(class = %bo.class_name(), key = %bo.key_string(), "business object created");
        Ok(bo)
    }

    /// Materialize a persisted object from a stored row (not registered)
    pub(crate) fn from_row(context: &BoContext, class: Arc<ClassDef>, row: &Row) -> Self {
        let mut props = PropSet::new(&class);
        props.load_row(row);
        let object_id = class
            .primary_key
            .props
            .first()
            .filter(|_| class.primary_key.is_object_id)
            .and_then(|prop| props.value_or_null(prop).as_guid());
        let id = object_id.unwrap_or_else(Uuid::new_v4);
        Self::build(context, class, props, id, false)
    }

    fn build(
        context: &BoContext,
        class: Arc<ClassDef>,
        props: PropSet,
        id: Uuid,
        is_new: bool,
    ) -> Self {
        Self {
            inner: Arc::new(BoInner {
                id,
                class,
                context: context.clone(),
                data: RwLock::new(BoData {
                    props,
                    is_new,
                    is_dirty: false,
                    is_editing: false,
                    is_deleted: false,
                    registered_key: None,
                    cascade: Vec::new(),
                }),
                relationships: Mutex::new(HashMap::new()),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<BoInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<BoInner> {
        &self.inner
    }

    fn read(&self) -> RwLockReadGuard<'_, BoData> {
        self.inner.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BoData> {
        self.inner.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn behaviour(&self) -> Arc<dyn BoBehaviour> {
        self.inner.context.behaviour_for(&self.inner.class.name)
    }

    fn concurrency(&self) -> Arc<dyn ConcurrencyControl> {
        self.inner.context.concurrency_for(&self.inner.class.name)
    }

    pub fn downgrade(&self) -> WeakBusinessObject {
        WeakBusinessObject {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Same instance
    pub fn ptr_eq(&self, other: &BusinessObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Instance Guid (the key value for object-id classes)
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Class definition
    pub fn class(&self) -> &Arc<ClassDef> {
        &self.inner.class
    }

    /// Name of the class
    pub fn class_name(&self) -> &str {
        &self.inner.class.name
    }

    /// Context the object was created or loaded in
    pub fn context(&self) -> &BoContext {
        &self.inner.context
    }

    /// Never saved
    pub fn is_new(&self) -> bool {
        self.read().is_new
    }

    /// Has edits not yet saved
    pub fn is_dirty(&self) -> bool {
        self.read().is_dirty
    }

    /// Between `begin_edit` and save or cancel
    pub fn is_editing(&self) -> bool {
        self.read().is_editing
    }

    /// Marked for delete or already deleted
    pub fn is_deleted(&self) -> bool {
        self.read().is_deleted
    }

    /// Lifecycle state derived from the flags
    pub fn state(&self) -> BoState {
        let data = self.read();
        match (data.is_new, data.is_deleted, data.is_dirty, data.is_editing) {
            (true, true, false, false) => BoState::DeletedFinal,
            (_, true, _, _) => BoState::DeletedPending,
            (true, false, _, _) => BoState::New,
            (false, false, true, _) => BoState::PersistedDirty,
            (false, false, false, true) => BoState::Editing,
            (false, false, false, false) => BoState::PersistedClean,
        }
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Current value of a property
    pub fn value(&self, name: &str) -> StowageResult<PropValue> {
        self.read().props.value(name)
    }

    /// Same as `value`
    pub fn get_property_value(&self, name: &str) -> StowageResult<PropValue> {
        self.value(name)
    }

    /// Value as last loaded or saved
    pub fn persisted_property_value(&self, name: &str) -> StowageResult<PropValue> {
        let data = self.read();
        data.props.value(name)?;
        Ok(data.props.persisted_or_null(name))
    }

    pub(crate) fn value_or_null(&self, name: &str) -> PropValue {
        self.read().props.value_or_null(name)
    }

    pub(crate) fn persisted_value_or_null(&self, name: &str) -> PropValue {
        self.read().props.persisted_or_null(name)
    }

    /// Display text of a lookup property's current value
    pub fn display_value(&self, name: &str) -> StowageResult<String> {
        let value = self.value(name)?;
        let display = self
            .inner
            .class
            .get_prop(name)
            .and_then(|def| def.lookup_list.as_ref())
            .and_then(|lookup| lookup.display_for(&value))
            .map(str::to_string);
        Ok(display.unwrap_or_else(|| value.to_string()))
    }

    /// Names of properties changed since the last load or save
    pub fn dirty_props(&self) -> Vec<String> {
        self.read()
            .props
            .dirty_props()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Persisted and current value of each dirty property
    pub fn changes(&self) -> BTreeMap<String, PropChange> {
        self.read().props.changes()
    }

    /// Current values as a store row
    pub fn to_row(&self) -> Row {
        self.read().props.to_row()
    }

    /// Set a property through coercion, editing and events
    ///
    /// Setting a value equal to the current one (null and empty string are
    /// equal) changes nothing. Otherwise the object starts editing if it is
    /// not already, becomes dirty, and `PropertyUpdated` fires, followed by
    /// `KeyChanged` for key edits and `Updated` when the object is valid.
    ///
    /// A persisted child cannot point a composition's foreign key at another
    /// parent or clear it.
    pub fn set_property_value(&self, name: &str, value: impl Into<PropInput>) -> StowageResult<()> {
        self.assign(name, value.into(), true)
    }

    /// Set a foreign key for collection or delete bookkeeping
    ///
    /// Skips the composition ownership check of `set_property_value`.
    pub(crate) fn set_owned_value(&self, name: &str, value: PropValue) -> StowageResult<()> {
        self.assign(name, value.into(), false)
    }

    fn assign(&self, name: &str, input: PropInput, guard_composition: bool) -> StowageResult<()> {
        let class = Arc::clone(&self.inner.class);
        let def = class
            .get_prop(name)
            .ok_or_else(|| StowageError::unknown_property(&class.name, name))?;
        let raw = match input {
            PropInput::Value(value) => value,
            PropInput::Object(bo) => bo.key_value(),
        };
        let value = def.coerce(&class.name, raw)?;

        let (current, is_new, is_editing) = {
            let data = self.read();
            (data.props.value_or_null(name), data.is_new, data.is_editing)
        };
        if current.same_value(&value) {
            return Ok(());
        }
        if def.read_only && !is_new {
            return Err(StowageError::NotEditable {
                class: class.name.clone(),
                message: format!("'{}' is read-only once persisted", name),
            });
        }
        if guard_composition {
            for rel in class
                .relationships
                .iter()
                .filter(|rel| rel.owner_props().any(|prop| prop == name))
            {
                let values: Vec<(String, PropValue)> = rel
                    .key
                    .iter()
                    .map(|pair| {
                        let next = if pair.owner_prop == name {
                            value.clone()
                        } else {
                            self.value_or_null(&pair.owner_prop)
                        };
                        (pair.owner_prop.clone(), next)
                    })
                    .collect();
                check_composition_move(self, rel, &values)?;
            }
        }
        if !is_editing {
            self.begin_edit()?;
        }

        let (old_key, new_key) = {
            let mut data = self.write();
            let old_key = key_of(&class, &data.props);
            data.props.set_current(name, value)?;
            data.is_dirty = true;
            (old_key, key_of(&class, &data.props))
        };
        tracing::debug!(class = %class.name, key = %new_key, property = %name, "property updated");

        self.fire(&BoEvent::PropertyUpdated {
            name: name.to_string(),
        });
        if old_key != new_key {
            self.fire(&BoEvent::KeyChanged {
                old: old_key,
                new: new_key,
            });
        }
        if self.is_valid() {
            self.fire(&BoEvent::Updated);
        }
        Ok(())
    }

    /// Set a property without editing checks or events
    pub(crate) fn set_system_value(&self, name: &str, value: PropValue) -> StowageResult<()> {
        self.write().props.set_current(name, value)
    }

    /// Refresh from a stored row in place
    ///
    /// With `discard_edits` pending edits are dropped as well.
    pub(crate) fn refresh_from_row(&self, row: &Row, discard_edits: bool) {
        let mut data = self.write();
        data.props.load_row(row);
        if discard_edits {
            data.is_dirty = false;
            data.is_editing = false;
        }
    }

    // ========================================================================
    // Editing
    // ========================================================================

    /// Start editing
    pub fn begin_edit(&self) -> StowageResult<()> {
        if let Err(message) = self.behaviour().is_editable(self) {
            return Err(StowageError::NotEditable {
                class: self.class_name().to_string(),
                message,
            });
        }
        if self.is_editing() {
            return Err(StowageError::AlreadyEditing {
                class: self.class_name().to_string(),
                key: self.key_string(),
            });
        }
        self.concurrency()
            .check_concurrency_before_begin_editing(self)?;
        self.write().is_editing = true;
        tracing::debug!(class = %self.class_name(), key = %self.key_string(), "editing started");
        Ok(())
    }

    fn begin_edit_for_delete(&self) -> StowageResult<()> {
        if self.is_editing() {
            return Ok(());
        }
        self.concurrency()
            .check_concurrency_before_begin_editing(self)?;
        self.write().is_editing = true;
        Ok(())
    }

    /// Flag the object for deletion on its next save
    ///
    /// Multiple relationships apply their delete-parent action first:
    /// `Prevent` vetoes while related objects exist, `DeleteRelated` marks
    /// them for delete and `DereferenceRelated` clears their foreign keys.
    /// Affected children are saved together with this object.
    pub fn mark_for_delete(&self) -> StowageResult<()> {
        if self.is_deleted() {
            return Ok(());
        }
        if let Err(message) = self.behaviour().is_deletable(self) {
            return Err(StowageError::NotDeletable {
                class: self.class_name().to_string(),
                message,
            });
        }

        let class = Arc::clone(&self.inner.class);
        let mut actions: Vec<(&RelationshipDef, Vec<BusinessObject>)> = Vec::new();
        for def in class.multiple_relationships() {
            if def.delete_parent_action == DeleteParentAction::DoNothing {
                continue;
            }
            let members = self
                .multiple_relationship(&def.name)?
                .get_related_collection()?
                .to_vec();
            if def.delete_parent_action == DeleteParentAction::Prevent {
                if !members.is_empty() {
                    return Err(StowageError::NotDeletable {
                        class: class.name.clone(),
                        message: format!(
                            "{} related {} object(s) exist through '{}'",
                            members.len(),
                            def.related_class,
                            def.name
                        ),
                    });
                }
            } else if !members.is_empty() {
                actions.push((def, members));
            }
        }

        let was_editing = self.is_editing();
        self.begin_edit_for_delete()?;

        let mut cascaded = Vec::new();
        if let Err(e) = apply_delete_actions(&actions, &mut cascaded) {
            for child in &cascaded {
                child.restore();
            }
            self.write().is_editing = was_editing;
            return Err(e);
        }

        {
            let mut data = self.write();
            data.is_deleted = true;
            data.is_dirty = true;
            data.cascade.extend(cascaded);
        }
        tracing::debug!(class = %class.name, key = %self.key_string(), "marked for delete");
        self.fire(&BoEvent::MarkedForDelete);
        Ok(())
    }

    pub fn delete(&self) -> StowageResult<()> {
        self.mark_for_delete()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Commit this object with its cascaded and owned children
    pub fn save(&self) -> StowageResult<()> {
        let mut committer = self.inner.context.committer();
        for bo in self.save_participants() {
            committer.add_business_object(&bo);
        }
        committer.commit()
    }

    /// This object, then every dependent that has to be committed with it
    pub(crate) fn save_participants(&self) -> Vec<BusinessObject> {
        let mut participants = Vec::new();
        let mut seen = HashSet::new();
        let mut pending = VecDeque::from([self.clone()]);
        while let Some(bo) = pending.pop_front() {
            if !seen.insert(bo.addr()) {
                continue;
            }
            pending.extend(bo.owned_dependents());
            participants.push(bo);
        }
        participants
    }

    fn owned_dependents(&self) -> Vec<BusinessObject> {
        let mut dependents = self.read().cascade.clone();
        let owned: Vec<BusinessObjectCollection> = self
            .relationship_cache()
            .values()
            .filter_map(|cache| match cache {
                RelCache::Multiple(collection) => Some(collection.clone()),
                RelCache::Single { .. } => None,
            })
            .filter(|collection| {
                collection
                    .relationship()
                    .is_some_and(|def| def.relationship_type.owns_children())
            })
            .collect();
        for collection in owned {
            dependents.extend(collection.pending_members());
        }
        dependents
    }

    /// Operation that would persist the current state, if any
    pub fn pending_operation(&self) -> Option<PendingOperation> {
        let data = self.read();
        let class = &self.inner.class;
        match (data.is_new, data.is_deleted, data.is_dirty) {
            (true, true, _) => None,
            (false, true, _) => Some(PendingOperation::Delete {
                class: class.name.clone(),
                key: persisted_key_of(class, &data.props),
            }),
            (true, false, _) => Some(PendingOperation::Insert {
                class: class.name.clone(),
                key: key_of(class, &data.props),
                row: data.props.to_row(),
            }),
            (false, false, true) => Some(PendingOperation::Update {
                class: class.name.clone(),
                key: persisted_key_of(class, &data.props),
                new_key: key_of(class, &data.props),
                row: data.props.to_row(),
            }),
            (false, false, false) => None,
        }
    }

    /// Transition after a successful commit
    pub fn update_state_as_persisted(&self) {
        let (deleted, registered, cascade) = {
            let mut data = self.write();
            let cascade = std::mem::take(&mut data.cascade);
            data.is_dirty = false;
            data.is_editing = false;
            if data.is_deleted {
                data.is_new = true;
                (true, data.registered_key.take(), cascade)
            } else {
                data.props.backup();
                data.is_new = false;
                (false, data.registered_key.clone(), cascade)
            }
        };
        drop(cascade);

        let map = self.inner.context.identity_map();
        if deleted {
            if let Some(identity) = registered {
                map.remove_if_same(&identity, self);
            }
            tracing::debug!(class = %self.class_name(), key = %self.key_string(), "deleted");
            self.fire(&BoEvent::Deleted);
        } else {
            let identity = self.identity_key();
            if registered.as_deref() != Some(identity.as_str()) {
                if let Some(old) = registered {
                    map.remove_if_same(&old, self);
                    self.write().registered_key = None;
                }
                self.register_identity();
            }
            tracing::debug!(class = %self.class_name(), key = %self.key_string(), "saved");
            self.fire(&BoEvent::Saved);
        }

        self.behaviour().after_save(self);
        self.concurrency()
            .release_write_locks(self.class_name(), &self.key_string());
    }

    /// Register under the current identity key
    ///
    /// Returns the other live instance if the key is already taken.
    pub(crate) fn register_identity(&self) -> Option<BusinessObject> {
        let identity = self.identity_key();
        let winner = self.inner.context.identity_map().register(&identity, self);
        if winner.is_none() {
            self.write().registered_key = Some(identity);
        }
        winner
    }

    /// Cancel pending edits and a pending delete
    pub fn restore(&self) {
        let (old_key, new_key, cascade) = {
            let mut data = self.write();
            let old_key = key_of(&self.inner.class, &data.props);
            data.props.restore();
            data.is_deleted = false;
            data.is_editing = false;
            data.is_dirty = false;
            let cascade = std::mem::take(&mut data.cascade);
            (old_key, key_of(&self.inner.class, &data.props), cascade)
        };
        for child in &cascade {
            child.restore();
        }
        drop(cascade);

        self.concurrency()
            .release_write_locks(self.class_name(), &new_key);
        tracing::debug!(class = %self.class_name(), key = %new_key, "restored");
        if old_key != new_key {
            self.fire(&BoEvent::KeyChanged {
                old: old_key,
                new: new_key,
            });
        }
        self.fire(&BoEvent::Updated);
        self.fire(&BoEvent::Restored);
    }

    /// Transition after a failed commit; values are left as they are
    pub fn update_as_transaction_rolled_back(&self) -> StowageResult<()> {
        self.concurrency().update_as_transaction_rolled_back(self)
    }

    // ========================================================================
    // Validation
    // ========================================================================

    pub fn is_valid(&self) -> bool {
        self.is_valid_message().is_empty()
    }

    /// Every broken rule, one per line; empty when valid
    pub fn is_valid_message(&self) -> String {
        let mut messages = {
            let data = self.read();
            if data.is_deleted {
                return String::new();
            }
            data.props.invalid_messages()
        };
        if let Err(message) = self.behaviour().are_custom_rules_valid(self) {
            messages.push(message);
        }
        messages.join("\n")
    }

    // ========================================================================
    // Keys
    // ========================================================================

    /// Textual key from current values, e.g. `ID=1`
    pub fn key_string(&self) -> String {
        key_of(&self.inner.class, &self.read().props)
    }

    /// Textual key from persisted values
    pub fn persisted_key_string(&self) -> String {
        persisted_key_of(&self.inner.class, &self.read().props)
    }

    /// `"{Class}|{key}"`
    pub fn identity_key(&self) -> String {
        identity_key(self.class_name(), &self.key_string())
    }

    /// Value this object stands for when assigned to a property
    pub fn key_value(&self) -> PropValue {
        let pk = &self.inner.class.primary_key;
        match pk.props.as_slice() {
            [single] => self.value_or_null(single),
            _ => PropValue::String(self.key_string()),
        }
    }

    // ========================================================================
    // Relationships
    // ========================================================================

    pub fn single_relationship(&self, name: &str) -> StowageResult<SingleRelationship> {
        let def = self.relationship_def(name, true)?;
        Ok(SingleRelationship::new(self.clone(), def))
    }

    pub fn multiple_relationship(&self, name: &str) -> StowageResult<MultipleRelationship> {
        let def = self.relationship_def(name, false)?;
        Ok(MultipleRelationship::new(self.clone(), def))
    }

    fn relationship_def(&self, name: &str, single: bool) -> StowageResult<RelationshipDef> {
        self.inner
            .class
            .get_relationship(name)
            .filter(|def| def.is_single() == single)
            .cloned()
            .ok_or_else(|| StowageError::RelationshipNotFound {
                class: self.class_name().to_string(),
                relationship: name.to_string(),
            })
    }

    pub fn get_related_object(&self, name: &str) -> StowageResult<Option<BusinessObject>> {
        self.single_relationship(name)?.get_related_object()
    }

    pub fn set_related_object(
        &self,
        name: &str,
        related: Option<&BusinessObject>,
    ) -> StowageResult<()> {
        self.single_relationship(name)?.set_related_object(related)
    }

    pub fn get_related_collection(&self, name: &str) -> StowageResult<BusinessObjectCollection> {
        self.multiple_relationship(name)?.get_related_collection()
    }

    pub fn get_related_collection_as(
        &self,
        name: &str,
        class: &str,
    ) -> StowageResult<BusinessObjectCollection> {
        self.multiple_relationship(name)?
            .get_related_collection_as(class)
    }

    pub(crate) fn relationship_cache(&self) -> MutexGuard<'_, HashMap<String, RelCache>> {
        self.inner
            .relationships
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Subscribe a listener, held weakly; returns its subscription id
    pub fn subscribe<L: BoListener + 'static>(&self, listener: &Arc<L>) -> u64 {
        let weak: Weak<L> = Arc::downgrade(listener);
        let weak: Weak<dyn BoListener> = weak;
        let id = next_listener_id();
        self.add_listener(id, weak);
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.listeners().retain(|entry| entry.id != id);
    }

    pub(crate) fn add_listener(&self, id: u64, listener: Weak<dyn BoListener>) {
        let mut listeners = self.listeners();
        if !listeners.iter().any(|entry| entry.id == id) {
            listeners.push(ListenerEntry { id, listener });
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<ListenerEntry>> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn fire(&self, event: &BoEvent) {
        let live: Vec<Arc<dyn BoListener>> = {
            let mut listeners = self.listeners();
            listeners.retain(|entry| entry.listener.strong_count() > 0);
            listeners
                .iter()
                .filter_map(|entry| entry.listener.upgrade())
                .collect()
        };
        for listener in &live {
            listener.on_event(self, event);
        }
    }
}

fn apply_delete_actions(
    actions: &[(&RelationshipDef, Vec<BusinessObject>)],
    cascaded: &mut Vec<BusinessObject>,
) -> StowageResult<()> {
    for (def, members) in actions {
        for child in members {
            match def.delete_parent_action {
                DeleteParentAction::DeleteRelated => child.mark_for_delete()?,
                DeleteParentAction::DereferenceRelated => {
                    for prop in def.related_props() {
                        child.set_owned_value(prop, PropValue::Null)?;
                    }
                }
                DeleteParentAction::Prevent | DeleteParentAction::DoNothing => continue,
            }
            cascaded.push(child.clone());
        }
    }
    Ok(())
}

impl PartialEq for BusinessObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for BusinessObject {}

impl Hash for BusinessObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl std::fmt::Debug for BusinessObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusinessObject")
            .field("class", &self.class_name())
            .field("key", &self.key_string())
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Relationship resolution
//!
//! Relationships are resolved through the owner's property values: the
//! definition's key maps owner properties to related properties, and the
//! resulting criteria (its `Display` form is the relationship expression)
//! selects the related objects.
//!
//! Single relationships cache the related object together with the
//! expression it was resolved for; a changed expression means the cache is
//! stale. Multiple relationships cache the whole collection and refresh it
//! on every access.
//!
//! A parent keeping a child in one of its cached collections already holds
//! that child, so the child's cached link back to the parent is weak. Every
//! other cached related object is held strongly.

use crate::business_object::{BusinessObject, WeakBusinessObject};
use crate::collection::BusinessObjectCollection;
use stowage_core::{PropValue, StowageError, StowageResult};
use stowage_schema::RelationshipDef;

/// Per-object relationship cache entry
pub(crate) enum RelCache {
    Single {
        fingerprint: String,
        related: Option<CachedRelated>,
    },
    Multiple(BusinessObjectCollection),
}

/// Related object kept by a single relationship
pub(crate) enum CachedRelated {
    Held(BusinessObject),
    /// A parent holding the owner in one of its cached collections
    Parent(WeakBusinessObject),
}

impl CachedRelated {
    fn new(owner: &BusinessObject, related: &BusinessObject) -> Self {
        if holds_in_collection(related, owner) {
            CachedRelated::Parent(related.downgrade())
        } else {
            CachedRelated::Held(related.clone())
        }
    }

    fn get(&self) -> Option<BusinessObject> {
        match self {
            CachedRelated::Held(bo) => Some(bo.clone()),
            CachedRelated::Parent(weak) => weak.upgrade(),
        }
    }
}

/// `parent` keeps `child` in one of its cached collections
fn holds_in_collection(parent: &BusinessObject, child: &BusinessObject) -> bool {
    if parent.ptr_eq(child) {
        return true;
    }
    let collections: Vec<BusinessObjectCollection> = parent
        .relationship_cache()
        .values()
        .filter_map(|cache| match cache {
            RelCache::Multiple(collection) => Some(collection.clone()),
            RelCache::Single { .. } => None,
        })
        .collect();
    collections.iter().any(|collection| collection.holds(child))
}

/// Turn `child`'s strong cached links to `parent` into weak ones
///
/// Called when `parent` takes `child` into one of its collections.
pub(crate) fn release_parent(child: &BusinessObject, parent: &BusinessObject) {
    let mut cache = child.relationship_cache();
    for entry in cache.values_mut() {
        if let RelCache::Single {
            related: Some(cached),
            ..
        } = entry
        {
            if matches!(cached, CachedRelated::Held(bo) if bo.ptr_eq(parent)) {
                *cached = CachedRelated::Parent(parent.downgrade());
            }
        }
    }
}

fn keeps_reference(owner: &BusinessObject, def: &RelationshipDef) -> bool {
    def.keeps_reference(
        owner
            .context()
            .config()
            .relationships
            .keep_reference_default,
    )
}

/// Refuse to move a persisted composed child away from its parent
///
/// `values` are the foreign key values the owner is about to take.
pub(crate) fn check_composition_move(
    owner: &BusinessObject,
    def: &RelationshipDef,
    values: &[(String, PropValue)],
) -> StowageResult<()> {
    if !def.is_single() || !def.is_composition() || owner.is_new() {
        return Ok(());
    }
    let parented = def.owner_key_is_set(&|name: &str| owner.persisted_value_or_null(name));
    let changed = values
        .iter()
        .any(|(prop, value)| !owner.persisted_value_or_null(prop).same_value(value));
    if !parented || !changed {
        return Ok(());
    }

    let verb = if values.iter().any(|(_, value)| value.is_null_or_empty()) {
        "removed from its"
    } else {
        "moved to another"
    };
    tracing::debug!(
        relationship = %def.name,
        class = %owner.class_name(),
        key = %owner.key_string(),
        "composition rule violated"
    );
    Err(StowageError::invalid_relationship(
        &def.name,
        def.relationship_type.to_string(),
        format!(
            "a persisted {} cannot be {} {} (delete action: {})",
            owner.class_name(),
            verb,
            def.related_class,
            def.delete_parent_action
        ),
    ))
}

// ============================================================================
// SingleRelationship
// ============================================================================

/// At most one related object, found through the owner's foreign key
pub struct SingleRelationship {
    owner: BusinessObject,
    def: RelationshipDef,
}

impl SingleRelationship {
    pub(crate) fn new(owner: BusinessObject, def: RelationshipDef) -> Self {
        Self { owner, def }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn definition(&self) -> &RelationshipDef {
        &self.def
    }

    pub fn owner(&self) -> &BusinessObject {
        &self.owner
    }

    /// Every owner key property has a value
    pub fn has_relationship(&self) -> bool {
        self.def
            .owner_key_is_set(&|name: &str| self.owner.value_or_null(name))
    }

    /// Textual form of the criteria selecting the related object
    pub fn relationship_expression(&self) -> String {
        self.def
            .criteria(&|name: &str| self.owner.value_or_null(name))
            .to_string()
    }

    pub fn get_related_object(&self) -> StowageResult<Option<BusinessObject>> {
        let expression = self.relationship_expression();
        let keep = keeps_reference(&self.owner, &self.def);
        let has_relationship = self.has_relationship();

        if keep {
            let cache = self.owner.relationship_cache();
            if let Some(RelCache::Single {
                fingerprint,
                related,
            }) = cache.get(&self.def.name)
            {
                if *fingerprint == expression {
                    match related.as_ref().map(CachedRelated::get) {
                        Some(Some(bo)) => return Ok(Some(bo)),
                        None if !has_relationship => return Ok(None),
                        _ => {}
                    }
                }
            }
        }

        let related = if has_relationship {
            tracing::debug!(
                relationship = %self.def.name,
                criteria = %expression,
                "resolving related object"
            );
            let criteria = self
                .def
                .criteria(&|name: &str| self.owner.value_or_null(name));
            self.owner
                .context()
                .loader()
                .load_one(&self.def.related_class, criteria)?
        } else {
            None
        };

        if keep {
            let cached = related
                .as_ref()
                .map(|bo| CachedRelated::new(&self.owner, bo));
            self.owner.relationship_cache().insert(
                self.def.name.clone(),
                RelCache::Single {
                    fingerprint: expression,
                    related: cached,
                },
            );
        }
        Ok(related)
    }

    /// Point the relationship at `related`, or clear it
    ///
    /// Copies the related object's key values into the owner's foreign key
    /// properties. A persisted owner of a composition cannot be moved to
    /// another parent or lose its parent.
    pub fn set_related_object(&self, related: Option<&BusinessObject>) -> StowageResult<()> {
        if let Some(bo) = related {
            self.owner
                .context()
                .registry()
                .check_compatible(bo.class_name(), &self.def.related_class)?;
        }

        let values: Vec<(String, PropValue)> = self
            .def
            .key
            .iter()
            .map(|p| {
                let value = related
                    .map(|bo| bo.value_or_null(&p.related_prop))
                    .unwrap_or_default();
                (p.owner_prop.clone(), value)
            })
            .collect();

        check_composition_move(&self.owner, &self.def, &values)?;

        for (prop, value) in values {
            self.owner.set_property_value(&prop, value)?;
        }

        let expression = self.relationship_expression();
        if keeps_reference(&self.owner, &self.def) {
            let cached = related.map(|bo| CachedRelated::new(&self.owner, bo));
            self.owner.relationship_cache().insert(
                self.def.name.clone(),
                RelCache::Single {
                    fingerprint: expression,
                    related: cached,
                },
            );
        } else {
            self.owner.relationship_cache().remove(&self.def.name);
        }
        Ok(())
    }
}

// ============================================================================
// MultipleRelationship
// ============================================================================

/// Collection of related objects holding the owner's key
pub struct MultipleRelationship {
    owner: BusinessObject,
    def: RelationshipDef,
}

impl MultipleRelationship {
    pub(crate) fn new(owner: BusinessObject, def: RelationshipDef) -> Self {
        Self { owner, def }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn definition(&self) -> &RelationshipDef {
        &self.def
    }

    pub fn owner(&self) -> &BusinessObject {
        &self.owner
    }

    pub fn get_related_collection(&self) -> StowageResult<BusinessObjectCollection> {
        self.get_related_collection_as(&self.def.related_class)
    }

    /// Related collection, requiring the related class to be `class` or a
    /// subclass of it
    pub fn get_related_collection_as(&self, class: &str) -> StowageResult<BusinessObjectCollection> {
        let registry = self.owner.context().registry();
        registry.check_compatible(&self.def.related_class, class)?;
        registry.constructible(&self.def.related_class)?;

        let keep = keeps_reference(&self.owner, &self.def);
        if keep {
            let cached = match self.owner.relationship_cache().get(&self.def.name) {
                Some(RelCache::Multiple(collection)) => Some(collection.clone()),
                _ => None,
            };
            if let Some(collection) = cached {
                collection.refresh()?;
                return Ok(collection);
            }
        }

        let collection =
            BusinessObjectCollection::for_relationship(self.owner.context(), &self.def, &self.owner)?;
        collection.refresh()?;
        if keep {
            self.owner
                .relationship_cache()
                .insert(self.def.name.clone(), RelCache::Multiple(collection.clone()));
        }
        Ok(collection)
    }
}

// ============================================================================
// Tests
// ============================================================================

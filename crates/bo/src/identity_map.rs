//! Identity map
//!
//! Maps `"{Class}|{key}"` to a weak handle on the one live business object
//! with that identity. Entries never keep an object alive; a dead entry is
//! purged when its object drops or lazily on lookup.
//!
//! No business object is ever dropped while the map lock is held: liveness
//! is checked with `Weak::strong_count` and every upgraded handle leaves the
//! critical section before it can be released.

use crate::business_object::{BoInner, BusinessObject};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Identity key of an object of `class` with textual key `key`
pub fn identity_key(class: &str, key: &str) -> String {
    format!("{}|{}", class, key)
}

#[derive(Default)]
pub struct IdentityMap {
    entries: RwLock<HashMap<String, Weak<BoInner>>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `bo` under `key`
    ///
    /// Returns the live object already registered under the key when it is
    /// a different instance; that entry is left in place.
    pub fn register(&self, key: &str, bo: &BusinessObject) -> Option<BusinessObject> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let winner = match entries.get(key) {
            Some(existing) if existing.strong_count() > 0 => {
                if Weak::ptr_eq(existing, &Arc::downgrade(bo.inner())) {
                    return None;
                }
                existing.upgrade()
            }
            _ => None,
        };
        if winner.is_none() {
            entries.insert(key.to_string(), Arc::downgrade(bo.inner()));
        }
        drop(entries);

        let winner = winner.map(BusinessObject::from_inner);
        if winner.is_some() {
            tracing::warn!(key = %key, "identity already registered to another instance");
        }
        winner
    }

    /// Live object registered under `key`
    pub fn lookup(&self, key: &str) -> Option<BusinessObject> {
        let found = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(key) {
                Some(weak) => Some(weak.upgrade()),
                None => None,
            }
        };
        match found {
            Some(Some(inner)) => Some(BusinessObject::from_inner(inner)),
            Some(None) => {
                self.purge_dead(key);
                None
            }
            None => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Drop the entry for `key` whatever it points to
    pub fn remove(&self, key: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Drop the entry for `key` only if it points to `bo`
    pub(crate) fn remove_if_same(&self, key: &str, bo: &BusinessObject) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let same = entries
            .get(key)
            .is_some_and(|weak| Weak::ptr_eq(weak, &Arc::downgrade(bo.inner())));
        if same {
            entries.remove(key);
        }
    }

    /// Drop the entry for `key` if its object is gone
    pub(crate) fn purge_dead(&self, key: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).is_some_and(|weak| weak.strong_count() == 0) {
            entries.remove(key);
        }
    }

    /// Number of entries, dead ones included
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityMap")
            .field("entries", &self.len())
            .finish()
    }
}

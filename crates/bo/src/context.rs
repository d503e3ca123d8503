//! Runtime context
//!
//! A `BoContext` ties together everything a business object needs beyond
//! its own data: the class registry, the identity map, the data store,
//! per-class behaviours and concurrency controls, and the configuration.
//! It is a cheap `Clone` handle; a process normally creates one.

use crate::behaviour::{BoBehaviour, DefaultBehaviour};
use crate::business_object::BusinessObject;
use crate::collection::BusinessObjectCollection;
use crate::committer::{TransactionCommitter, TransactionLog};
use crate::concurrency::{ConcurrencyControl, NullConcurrencyControl};
use crate::data_store::DataStore;
use crate::identity_map::IdentityMap;
use crate::loader::Loader;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use stowage_core::{StowageConfig, StowageResult};
use stowage_schema::{ClassDef, ClassRegistry};

#[derive(Clone)]
pub struct BoContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    registry: Arc<ClassRegistry>,
    identity_map: IdentityMap,
    store: Arc<dyn DataStore>,
    behaviours: RwLock<HashMap<String, Arc<dyn BoBehaviour>>>,
    concurrency: RwLock<HashMap<String, Arc<dyn ConcurrencyControl>>>,
    config: StowageConfig,
}

impl BoContext {
    /// Create a context with the default configuration
    pub fn new(registry: impl Into<Arc<ClassRegistry>>, store: Arc<dyn DataStore>) -> Self {
        Self::with_config(registry, store, StowageConfig::default())
    }

    /// Create a context with an explicit configuration
    pub fn with_config(
        registry: impl Into<Arc<ClassRegistry>>,
        store: Arc<dyn DataStore>,
        config: StowageConfig,
    ) -> Self {
        let registry = registry.into();
        tracing::debug!(classes = registry.len(), "business object context created");
        Self {
            inner: Arc::new(ContextInner {
                registry,
                identity_map: IdentityMap::new(),
                store,
                behaviours: RwLock::new(HashMap::new()),
                concurrency: RwLock::new(HashMap::new()),
                config,
            }),
        }
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.inner.registry
    }

    /// Resolved class definition
    pub fn class(&self, name: &str) -> StowageResult<Arc<ClassDef>> {
        self.inner.registry.get(name)
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.inner.identity_map
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &StowageConfig {
        &self.inner.config
    }

    /// Install business rules for a class and its subclasses
    pub fn set_behaviour(&self, class: impl Into<String>, behaviour: Arc<dyn BoBehaviour>) {
        self.inner
            .behaviours
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(class.into(), behaviour);
    }

    /// Install a concurrency control for a class and its subclasses
    pub fn set_concurrency_control(
        &self,
        class: impl Into<String>,
        control: Arc<dyn ConcurrencyControl>,
    ) {
        self.inner
            .concurrency
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(class.into(), control);
    }

    pub(crate) fn behaviour_for(&self, class: &str) -> Arc<dyn BoBehaviour> {
        let behaviours = self
            .inner
            .behaviours
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        self.walk_super_chain(class, |name| behaviours.get(name).cloned())
            .unwrap_or_else(|| Arc::new(DefaultBehaviour))
    }

    pub(crate) fn concurrency_for(&self, class: &str) -> Arc<dyn ConcurrencyControl> {
        let controls = self
            .inner
            .concurrency
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        self.walk_super_chain(class, |name| controls.get(name).cloned())
            .unwrap_or_else(|| Arc::new(NullConcurrencyControl))
    }

    fn walk_super_chain<T>(&self, class: &str, find: impl Fn(&str) -> Option<T>) -> Option<T> {
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            if let Some(found) = find(&name) {
                return Some(found);
            }
            current = self
                .inner
                .registry
                .find(&name)
                .and_then(|c| c.super_class.clone());
        }
        None
    }

    /// Construct a new business object
    pub fn create(&self, class: &str) -> StowageResult<BusinessObject> {
        BusinessObject::new(self, class)
    }

    /// Empty collection of `class`
    pub fn collection(&self, class: &str) -> StowageResult<BusinessObjectCollection> {
        BusinessObjectCollection::new(self, class)
    }

    pub fn loader(&self) -> Loader {
        Loader::new(self)
    }

    /// Committer with the configured transaction log hook
    pub fn committer(&self) -> TransactionCommitter {
        let mut committer = TransactionCommitter::new(self);
        let log = &self.inner.config.transaction_log;
        if log.enabled {
            committer.add_hook(Arc::new(TransactionLog::new(&log.table)));
        }
        committer
    }

    pub fn ptr_eq(&self, other: &BoContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for BoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoContext")
            .field("classes", &self.inner.registry.len())
            .field("identity_map", &self.inner.identity_map)
            .finish()
    }
}

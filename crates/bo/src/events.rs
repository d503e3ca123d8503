//! Business object and collection events
//!
//! Events are the only signalling mechanism between a business object and
//! the collections it belongs to. They are dispatched synchronously, after
//! the object has released its own locks, to every live subscriber.

use crate::business_object::BusinessObject;
use std::sync::atomic::{AtomicU64, Ordering};

/// State change raised by a business object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoEvent {
    /// The object changed and is valid
    Updated,
    /// A single property changed
    PropertyUpdated { name: String },
    /// The object was persisted
    Saved,
    /// The object's delete was persisted
    Deleted,
    /// Pending edits were cancelled
    Restored,
    /// The object was flagged for deletion
    MarkedForDelete,
    /// A key property edit changed the textual key
    KeyChanged { old: String, new: String },
}

impl BoEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BoEvent::Updated => "Updated",
            BoEvent::PropertyUpdated { .. } => "PropertyUpdated",
            BoEvent::Saved => "Saved",
            BoEvent::Deleted => "Deleted",
            BoEvent::Restored => "Restored",
            BoEvent::MarkedForDelete => "MarkedForDelete",
            BoEvent::KeyChanged { .. } => "KeyChanged",
        }
    }
}

/// Subscriber to business object events
///
/// Objects hold their listeners weakly; a listener lives as long as its
/// owner keeps the `Arc` that was subscribed.
pub trait BoListener: Send + Sync {
    fn on_event(&self, bo: &BusinessObject, event: &BoEvent);
}

/// Membership change raised by a collection
#[derive(Debug, Clone)]
pub enum CollectionEvent {
    /// `BusinessObjectAdded`
    Added(BusinessObject),
    /// `BusinessObjectRemoved`
    Removed(BusinessObject),
}

impl CollectionEvent {
    /// The object the event is about
    pub fn business_object(&self) -> &BusinessObject {
        match self {
            CollectionEvent::Added(bo) | CollectionEvent::Removed(bo) => bo,
        }
    }
}

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique listener id
pub(crate) fn next_listener_id() -> u64 {
    NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
pub(crate) mod recorder {
    use super::*;
    use std::sync::Mutex;

    /// Listener that records every event it sees
    #[derive(Default)]
    pub struct EventRecorder {
        events: Mutex<Vec<BoEvent>>,
    }

    impl EventRecorder {
        pub fn events(&self) -> Vec<BoEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn names(&self) -> Vec<&'static str> {
            self.events().iter().map(BoEvent::name).collect()
        }

        pub fn clear(&self) {
            self.events.lock().unwrap().clear();
        }
    }

    impl BoListener for EventRecorder {
        fn on_event(&self, _bo: &BusinessObject, event: &BoEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}

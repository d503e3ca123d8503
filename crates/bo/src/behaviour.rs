//! Per-class business rule hooks

use crate::business_object::BusinessObject;

/// Business rules attached to a class
///
/// Every hook has a permissive default. A vetoing hook returns the message
/// shown to the user. Hooks run without any object lock held and may read
/// the object freely.
pub trait BoBehaviour: Send + Sync {
    /// Veto an edit
    fn is_editable(&self, _bo: &BusinessObject) -> Result<(), String> {
        Ok(())
    }

    /// Veto a delete
    fn is_deletable(&self, _bo: &BusinessObject) -> Result<(), String> {
        Ok(())
    }

    /// Object-level rules on top of the property rules
    fn are_custom_rules_valid(&self, _bo: &BusinessObject) -> Result<(), String> {
        Ok(())
    }

    /// Runs after a successful save or delete
    fn after_save(&self, _bo: &BusinessObject) {}

    /// Runs after an object was materialized or refreshed from a row
    fn after_load(&self, _bo: &BusinessObject) {}
}

/// Behaviour with no extra rules
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBehaviour;

impl BoBehaviour for DefaultBehaviour {}

//! Property set
//!
//! Every business object owns one `PropSet`: its properties in schema order,
//! each with a current value, the value last read from or written to the
//! store, and the reason the current value is invalid (if it is).

use crate::data_store::Row;
use serde::Serialize;
use std::collections::BTreeMap;
use stowage_core::{PropValue, StowageError, StowageResult};
use stowage_schema::{ClassDef, PropDef};

/// One property of a business object
#[derive(Debug, Clone)]
pub struct BoProp {
    def: PropDef,
    current: PropValue,
    persisted: PropValue,
    invalid: Option<String>,
}

impl BoProp {
    fn new(def: &PropDef) -> Self {
        let initial = def.initial_value();
        let mut prop = Self {
            def: def.clone(),
            current: initial.clone(),
            persisted: initial,
            invalid: None,
        };
        prop.revalidate();
        prop
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn definition(&self) -> &PropDef {
        &self.def
    }

    pub fn value(&self) -> &PropValue {
        &self.current
    }

    pub fn persisted_value(&self) -> &PropValue {
        &self.persisted
    }

    /// Current value differs from the persisted one
    pub fn is_dirty(&self) -> bool {
        !self.current.same_value(&self.persisted)
    }

    pub fn is_valid(&self) -> bool {
        self.invalid.is_none()
    }

    pub fn invalid_reason(&self) -> Option<&str> {
        self.invalid.as_deref()
    }

    fn revalidate(&mut self) {
        self.invalid = self.def.check_rules(&self.current).err();
    }
}

/// Old and new value of a changed property
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropChange {
    pub old: PropValue,
    pub new: PropValue,
}

/// Ordered property values of one business object
#[derive(Debug, Clone)]
pub struct PropSet {
    class_name: String,
    props: Vec<BoProp>,
}

impl PropSet {
    /// Blank property set with schema defaults
    pub fn new(class: &ClassDef) -> Self {
        Self {
            class_name: class.name.clone(),
            props: class.props.iter().map(BoProp::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoProp> {
        self.props.iter()
    }

    pub fn get(&self, name: &str) -> Option<&BoProp> {
        self.props.iter().find(|p| p.def.name == name)
    }

    fn get_mut(&mut self, name: &str) -> StowageResult<&mut BoProp> {
        let class_name = &self.class_name;
        self.props
            .iter_mut()
            .find(|p| p.def.name == name)
            .ok_or_else(|| StowageError::unknown_property(class_name, name))
    }

    /// Current value of a property
    pub fn value(&self, name: &str) -> StowageResult<PropValue> {
        self.get(name)
            .map(|p| p.current.clone())
            .ok_or_else(|| StowageError::unknown_property(&self.class_name, name))
    }

    /// Current value, or null for unknown names
    pub fn value_or_null(&self, name: &str) -> PropValue {
        self.get(name).map(|p| p.current.clone()).unwrap_or_default()
    }

    /// Persisted value, or null for unknown names
    pub fn persisted_or_null(&self, name: &str) -> PropValue {
        self.get(name).map(|p| p.persisted.clone()).unwrap_or_default()
    }

    /// Store an already coerced value and revalidate the property
    pub fn set_current(&mut self, name: &str, value: PropValue) -> StowageResult<()> {
        let prop = self.get_mut(name)?;
        prop.current = value;
        prop.revalidate();
        Ok(())
    }

    /// Set current and persisted value together (no dirtiness)
    pub fn init_value(&mut self, name: &str, value: PropValue) -> StowageResult<()> {
        let prop = self.get_mut(name)?;
        prop.current = value.clone();
        prop.persisted = value;
        prop.revalidate();
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.props.iter().any(BoProp::is_dirty)
    }

    /// Names of properties whose value changed since the last backup
    pub fn dirty_props(&self) -> Vec<&str> {
        self.props
            .iter()
            .filter(|p| p.is_dirty())
            .map(BoProp::name)
            .collect()
    }

    /// Changed properties with their persisted and current values
    pub fn changes(&self) -> BTreeMap<String, PropChange> {
        self.props
            .iter()
            .filter(|p| p.is_dirty())
            .map(|p| {
                (
                    p.def.name.clone(),
                    PropChange {
                        old: p.persisted.clone(),
                        new: p.current.clone(),
                    },
                )
            })
            .collect()
    }

    /// Current values become the persisted snapshot
    pub fn backup(&mut self) {
        for prop in &mut self.props {
            prop.persisted = prop.current.clone();
        }
    }

    /// Current values revert to the persisted snapshot
    pub fn restore(&mut self) {
        for prop in &mut self.props {
            prop.current = prop.persisted.clone();
            prop.revalidate();
        }
    }

    /// Take values from a stored row as both current and persisted
    ///
    /// Columns missing from the row read as null. Values that do not coerce
    /// to the property's type are kept as stored.
    pub fn load_row(&mut self, row: &Row) {
        for prop in &mut self.props {
            let raw = row.get(&prop.def.name).cloned().unwrap_or_default();
            let value = match prop.def.data_type.coerce(raw.clone()) {
                Ok(value) => value,
                Err(message) => {
                    tracing::warn!(
                        class = %self.class_name,
                        property = %prop.def.name,
                        "stored value kept as is: {}",
                        message
                    );
                    raw
                }
            };
            prop.current = value.clone();
            prop.persisted = value;
            prop.revalidate();
        }
    }

    /// Current values as a row
    pub fn to_row(&self) -> Row {
        self.props
            .iter()
            .map(|p| (p.def.name.clone(), p.current.clone()))
            .collect()
    }

    /// Reasons of every invalid property, in schema order
    pub fn invalid_messages(&self) -> Vec<String> {
        self.props
            .iter()
            .filter_map(|p| p.invalid.clone())
            .collect()
    }
}

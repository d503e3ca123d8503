//! Primary key definitions
//!
//! A key is an ordered list of property names. Its textual form
//! (`Prop=Value` pairs joined by `;`) is what identity maps and collection
//! key indexes are keyed on.

use crate::criteria::Criteria;
use serde::{Deserialize, Serialize};
use stowage_core::PropValue;

/// Primary key of a class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKeyDef {
    /// Key properties, in key order
    pub props: Vec<String>,

    /// The key is a single generated Guid rather than a business key
    #[serde(default)]
    pub is_object_id: bool,
}

impl PrimaryKeyDef {
    /// Composite business key
    pub fn new<I, S>(props: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            props: props.into_iter().map(Into::into).collect(),
            is_object_id: false,
        }
    }

    /// Single-property business key
    pub fn single(prop: impl Into<String>) -> Self {
        Self::new([prop])
    }

    /// Generated Guid key
    pub fn object_id(prop: impl Into<String>) -> Self {
        Self {
            props: vec![prop.into()],
            is_object_id: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Whether `name` is one of the key properties
    pub fn contains(&self, name: &str) -> bool {
        self.props.iter().any(|p| p == name)
    }

    /// Textual key, e.g. `ID=1` or `Surname=Smith;Born=1970`
    pub fn key_string<F>(&self, get: &F) -> String
    where
        F: Fn(&str) -> PropValue,
    {
        self.props
            .iter()
            .map(|prop| format!("{}={}", prop, get(prop)))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// True when any key property is null
    pub fn has_null<F>(&self, get: &F) -> bool
    where
        F: Fn(&str) -> PropValue,
    {
        self.props.iter().any(|prop| get(prop).is_null_or_empty())
    }

    /// Criteria selecting the row with this key
    pub fn criteria<F>(&self, get: &F) -> Criteria
    where
        F: Fn(&str) -> PropValue,
    {
        let mut parts: Vec<Criteria> = self
            .props
            .iter()
            .map(|prop| Criteria::eq(prop.as_str(), get(prop)))
            .collect();
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Criteria::And(parts)
        }
    }
}

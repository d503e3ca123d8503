//! Query criteria and ordering
//!
//! `Criteria` is the core's representation of a filter expression. Parsing
//! criteria from text belongs to the data access layer; the core only builds,
//! prints and evaluates them. The printed form doubles as the textual
//! relationship expression used to detect stale related objects.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use stowage_core::PropValue;

// ============================================================================
// Criteria
// ============================================================================

/// A filter expression over property values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criteria {
    Eq(String, PropValue),
    Ne(String, PropValue),
    Gt(String, PropValue),
    Lt(String, PropValue),
    /// SQL-style pattern with `%` wildcards at either end
    Like(String, String),
    IsNull(String),
    IsNotNull(String),
    And(Vec<Criteria>),
    Or(Vec<Criteria>),
}

impl Criteria {
    /// `prop = value` (a null value means `prop IS NULL`)
    pub fn eq(prop: impl Into<String>, value: impl Into<PropValue>) -> Self {
        let value = value.into();
        if value.is_null() {
            Criteria::IsNull(prop.into())
        } else {
            Criteria::Eq(prop.into(), value)
        }
    }

    /// Combine two criteria with AND, flattening nested conjunctions
    pub fn and(self, other: Criteria) -> Self {
        match (self, other) {
            (Criteria::And(mut left), Criteria::And(right)) => {
                left.extend(right);
                Criteria::And(left)
            }
            (Criteria::And(mut left), right) => {
                left.push(right);
                Criteria::And(left)
            }
            (left, right) => Criteria::And(vec![left, right]),
        }
    }

    /// Combine two criteria with OR
    pub fn or(self, other: Criteria) -> Self {
        match self {
            Criteria::Or(mut left) => {
                left.push(other);
                Criteria::Or(left)
            }
            left => Criteria::Or(vec![left, other]),
        }
    }

    /// Evaluate against a row, given a property accessor
    pub fn matches<F>(&self, get: &F) -> bool
    where
        F: Fn(&str) -> PropValue,
    {
        match self {
            Criteria::Eq(prop, value) => get(prop).same_value(value),
            Criteria::Ne(prop, value) => !get(prop).same_value(value),
            Criteria::Gt(prop, value) => {
                let actual = get(prop);
                !actual.is_null() && actual.compare(value) == Ordering::Greater
            }
            Criteria::Lt(prop, value) => {
                let actual = get(prop);
                !actual.is_null() && actual.compare(value) == Ordering::Less
            }
            Criteria::Like(prop, pattern) => like(&get(prop).to_string(), pattern),
            Criteria::IsNull(prop) => get(prop).is_null_or_empty(),
            Criteria::IsNotNull(prop) => !get(prop).is_null_or_empty(),
            Criteria::And(parts) => parts.iter().all(|c| c.matches(get)),
            Criteria::Or(parts) => parts.iter().any(|c| c.matches(get)),
        }
    }
}

fn like(text: &str, pattern: &str) -> bool {
    let starts = pattern.starts_with('%');
    let ends = pattern.ends_with('%') && pattern.len() > 1;
    let core = pattern.trim_start_matches('%').trim_end_matches('%');
    match (starts, ends) {
        (true, true) => text.contains(core),
        (true, false) => text.ends_with(core),
        (false, true) => text.starts_with(core),
        (false, false) => text == core,
    }
}

fn literal(value: &PropValue) -> String {
    match value {
        PropValue::Null => "NULL".to_string(),
        PropValue::Bool(_) | PropValue::Int(_) | PropValue::Float(_) => value.to_string(),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

impl std::fmt::Display for Criteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Criteria::Eq(prop, value) => write!(f, "{} = {}", prop, literal(value)),
            Criteria::Ne(prop, value) => write!(f, "{} <> {}", prop, literal(value)),
            Criteria::Gt(prop, value) => write!(f, "{} > {}", prop, literal(value)),
            Criteria::Lt(prop, value) => write!(f, "{} < {}", prop, literal(value)),
            Criteria::Like(prop, pattern) => write!(f, "{} LIKE '{}'", prop, pattern),
            Criteria::IsNull(prop) => write!(f, "{} IS NULL", prop),
            Criteria::IsNotNull(prop) => write!(f, "{} IS NOT NULL", prop),
            Criteria::And(parts) => join(f, parts, " AND "),
            Criteria::Or(parts) => join(f, parts, " OR "),
        }
    }
}

fn join(f: &mut std::fmt::Formatter<'_>, parts: &[Criteria], sep: &str) -> std::fmt::Result {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        match part {
            Criteria::And(_) | Criteria::Or(_) => write!(f, "({})", part)?,
            _ => write!(f, "{}", part)?,
        }
    }
    Ok(())
}

// ============================================================================
// Ordering
// ============================================================================

/// Sort direction for one order field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// One property in an order clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderField {
    pub prop: String,
    pub direction: SortDirection,
}

/// Ordered list of sort fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCriteria {
    pub fields: Vec<OrderField>,
}

impl OrderCriteria {
    /// Create an empty order clause
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an ascending field
    pub fn asc(mut self, prop: impl Into<String>) -> Self {
        self.fields.push(OrderField {
            prop: prop.into(),
            direction: SortDirection::Ascending,
        });
        self
    }

    /// Append a descending field
    pub fn desc(mut self, prop: impl Into<String>) -> Self {
        self.fields.push(OrderField {
            prop: prop.into(),
            direction: SortDirection::Descending,
        });
        self
    }

    /// Whether any field is set
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Compare two rows by the order fields
    pub fn compare<A, B>(&self, a: &A, b: &B) -> Ordering
    where
        A: Fn(&str) -> PropValue,
        B: Fn(&str) -> PropValue,
    {
        for field in &self.fields {
            let ord = a(&field.prop).compare(&b(&field.prop));
            let ord = match field.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl std::fmt::Display for OrderCriteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|field| match field.direction {
                SortDirection::Ascending => format!("{} ASC", field.prop),
                SortDirection::Descending => format!("{} DESC", field.prop),
            })
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn row(pairs: &[(&str, PropValue)]) -> HashMap<String, PropValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn getter(row: &HashMap<String, PropValue>) -> impl Fn(&str) -> PropValue + '_ {
        move |name| row.get(name).cloned().unwrap_or_default()
    }

    #[test]
    fn test_eq_with_null_becomes_is_null() {
        assert_eq!(
            Criteria::eq("ParentID", PropValue::Null),
            Criteria::IsNull("ParentID".to_string())
        );
    }

    #[test]
    fn test_display_relationship_expression() {
        let criteria = Criteria::eq("PersonID", 5i64).and(Criteria::eq("Kind", "home"));
        assert_eq!(criteria.to_string(), "PersonID = 5 AND Kind = 'home'");
    }

    #[test]
    fn test_display_nested_groups() {
        let criteria = Criteria::eq("A", 1i64).and(Criteria::eq("B", 2i64).or(Criteria::eq("C", 3i64)));
        assert_eq!(criteria.to_string(), "A = 1 AND (B = 2 OR C = 3)");
    }

    #[test]
    fn test_matches_row() {
        let r = row(&[("Surname", "Smith".into()), ("Age", PropValue::Int(40))]);
        let get = getter(&r);
        assert!(Criteria::eq("Surname", "Smith").matches(&get));
        assert!(Criteria::Gt("Age".into(), PropValue::Int(30)).matches(&get));
        assert!(!Criteria::Lt("Age".into(), PropValue::Int(30)).matches(&get));
        assert!(Criteria::Like("Surname".into(), "Sm%".into()).matches(&get));
        assert!(Criteria::IsNull("Missing".into()).matches(&get));
    }

    #[test]
    fn test_order_compare() {
        let a = row(&[("Surname", "Smith".into()), ("Age", PropValue::Int(40))]);
        let b = row(&[("Surname", "Smith".into()), ("Age", PropValue::Int(30))]);
        let order = OrderCriteria::new().asc("Surname").desc("Age");
        assert_eq!(order.compare(&getter(&a), &getter(&b)), Ordering::Less);
        assert_eq!(order.to_string(), "Surname ASC, Age DESC");
    }
}

//! Select queries
//!
//! A `SelectQuery` is criteria + order + an optional row window. Collections
//! own exactly one and re-run it on every refresh.

use crate::data_store::Row;
use serde::{Deserialize, Serialize};
use stowage_core::PropValue;
use stowage_schema::{Criteria, OrderCriteria};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectQuery {
    /// Class whose rows are selected
    pub class_name: String,

    /// Filter; `None` selects every row
    pub criteria: Option<Criteria>,

    /// Sort order
    #[serde(default)]
    pub order: OrderCriteria,

    /// Maximum number of rows
    pub limit: Option<usize>,

    /// Rows skipped before the window starts
    #[serde(default)]
    pub offset: usize,
}

impl SelectQuery {
    /// Select every row of a class
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            criteria: None,
            order: OrderCriteria::default(),
            limit: None,
            offset: 0,
        }
    }

    pub fn with_criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = Some(criteria);
        self
    }

    pub fn with_order(mut self, order: OrderCriteria) -> Self {
        self.order = order;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Whether a row passes the criteria
    pub fn matches(&self, row: &Row) -> bool {
        match &self.criteria {
            Some(criteria) => criteria.matches(&|name: &str| row_value(row, name)),
            None => true,
        }
    }

    /// Filter, sort and window a set of rows in memory
    pub fn apply(&self, rows: impl IntoIterator<Item = Row>) -> Vec<Row> {
        let mut selected: Vec<Row> = rows.into_iter().filter(|row| self.matches(row)).collect();
        if !self.order.is_empty() {
            selected.sort_by(|a, b| {
                self.order
                    .compare(&|name: &str| row_value(a, name), &|name: &str| row_value(b, name))
            });
        }
        let window = selected.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => window.take(limit).collect(),
            None => window.collect(),
        }
    }
}

impl std::fmt::Display for SelectQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SELECT {}", self.class_name)?;
        if let Some(criteria) = &self.criteria {
            write!(f, " WHERE {}", criteria)?;
        }
        if !self.order.is_empty() {
            write!(f, " ORDER BY {}", self.order)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        if self.offset > 0 {
            write!(f, " OFFSET {}", self.offset)?;
        }
        Ok(())
    }
}

pub(crate) fn row_value(row: &Row, name: &str) -> PropValue {
    row.get(name).cloned().unwrap_or_default()
}

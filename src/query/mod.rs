//! Query Module
//!
//! Filtering, sorting and pagination over the record store.
//!
//! ## Evaluation
//! ```text
//!   index entries ──► clauses on indexed fields ──► candidates
//!                                                      │
//!            (only if a clause or the sort key is not indexed)
//!                                                      ▼
//!                                   load full records, apply the rest
//!                                                      │
//!                          sort (nulls last, ties by id) ──► offset/limit
//! ```

pub mod engine;
pub mod filter;
pub mod value;

use std::cmp::Ordering;
use std::str::FromStr;

use serde_json::Value;

use crate::StockroomError;

pub use engine::QueryEngine;
pub use filter::{Clause, FieldSource, Filter, Predicate};

// =============================================================================
// Sorting
// =============================================================================

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Sort by one dotted field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }

    /// Compare two field values; missing values go last in either direction
    pub fn compare(&self, a: Option<&Value>, b: Option<&Value>) -> Ordering {
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => {
                let ord = value::total_cmp(a, b);
                match self.order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            }
        }
    }
}

/// `"price.amount"` ascending, `"-price.amount"` descending
impl FromStr for SortSpec {
    type Err = StockroomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, order) = match s.strip_prefix('-') {
            Some(rest) => (rest, SortOrder::Desc),
            None => (s.strip_prefix('+').unwrap_or(s), SortOrder::Asc),
        };
        if field.is_empty() || field.split('.').any(str::is_empty) {
            return Err(StockroomError::Validation(format!("invalid sort field {:?}", s)));
        }
        Ok(Self {
            field: field.to_string(),
            order,
        })
    }
}

// =============================================================================
// Query
// =============================================================================

/// Filter + sort + pagination
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filter: Filter,
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// 1-based page of `page_size` items
    pub fn page(self, page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        self.offset((page - 1) * page_size).limit(page_size)
    }
}

/// Records on the requested page plus the size of the whole filtered set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub records: Vec<Value>,
    pub total_count: usize,
}

impl QueryResult {
    /// Number of pages of `page_size` the filtered set spans
    pub fn total_pages(&self, page_size: usize) -> usize {
        if page_size == 0 {
            return 0;
        }
        self.total_count.div_ceil(page_size)
    }

    /// Ids of the returned records, in order
    pub fn ids(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter_map(|r| r.get(crate::record::ID_FIELD).and_then(Value::as_str))
            .collect()
    }
}

//! Filter predicates
//!
//! A filter is a conjunction of clauses, each pairing a dotted field path
//! with one predicate from a closed set. A clause whose field is missing
//! from a record never matches, whatever the predicate.

use std::collections::BTreeMap;
use std::ops::Bound;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::StockroomError;

use super::value::{compare, display, values_equal};

/// Anything a clause can be evaluated against (index entries, full records)
pub trait FieldSource {
    /// Value at a dotted path, `None` when missing
    fn field(&self, path: &str) -> Option<&Value>;
}

impl FieldSource for Value {
    fn field(&self, path: &str) -> Option<&Value> {
        super::value::lookup(self, path)
    }
}

// =============================================================================
// Predicates
// =============================================================================

/// The predicate kinds a clause may carry
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Field equals the value
    Eq(Value),

    /// Field is present and differs from the value
    Ne(Value),

    /// Field lies within the bounds
    Range { min: Bound<Value>, max: Bound<Value> },

    /// Field equals one of the values
    In(Vec<Value>),

    /// Field is present and equals none of the values
    NotIn(Vec<Value>),

    /// String form of the field contains the substring
    Contains(String),

    /// Every key (dotted, relative to the clause path) equals its value
    Matches(BTreeMap<String, Value>),
}

impl Predicate {
    /// Evaluate against a single field value
    fn test(&self, value: &Value) -> bool {
        match self {
            Predicate::Eq(expected) => values_equal(value, expected),
            Predicate::Ne(expected) => !values_equal(value, expected),
            Predicate::Range { min, max } => {
                let above = match min {
                    Bound::Included(b) => compare(value, b).map_or(false, |o| o.is_ge()),
                    Bound::Excluded(b) => compare(value, b).map_or(false, |o| o.is_gt()),
                    Bound::Unbounded => true,
                };
                let below = match max {
                    Bound::Included(b) => compare(value, b).map_or(false, |o| o.is_le()),
                    Bound::Excluded(b) => compare(value, b).map_or(false, |o| o.is_lt()),
                    Bound::Unbounded => true,
                };
                above && below
            }
            Predicate::In(options) => options.iter().any(|o| values_equal(value, o)),
            Predicate::NotIn(options) => !options.iter().any(|o| values_equal(value, o)),
            Predicate::Contains(needle) => display(value).contains(needle.as_str()),
            // Evaluated per sub-path in Clause::matches
            Predicate::Matches(_) => false,
        }
    }
}

// =============================================================================
// Clauses
// =============================================================================

/// One `path → predicate` pair
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub path: String,
    pub predicate: Predicate,
}

impl Clause {
    pub fn new(path: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            path: path.into(),
            predicate,
        }
    }

    /// Every concrete path this clause reads
    pub fn paths(&self) -> Vec<String> {
        match &self.predicate {
            Predicate::Matches(expected) => expected
                .keys()
                .map(|k| format!("{}.{}", self.path, k))
                .collect(),
            _ => vec![self.path.clone()],
        }
    }

    /// Evaluate the clause against a record or index entry
    pub fn matches<S: FieldSource + ?Sized>(&self, source: &S) -> bool {
        match &self.predicate {
            Predicate::Matches(expected) => {
                !expected.is_empty()
                    && expected.iter().all(|(key, want)| {
                        source
                            .field(&format!("{}.{}", self.path, key))
                            .map_or(false, |got| values_equal(got, want))
                    })
            }
            predicate => source
                .field(&self.path)
                .map_or(false, |value| predicate.test(value)),
        }
    }
}

// =============================================================================
// Filter
// =============================================================================

/// Conjunction of clauses (an empty filter matches everything)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn eq(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clause(Clause::new(path, Predicate::Eq(value.into())))
    }

    pub fn ne(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clause(Clause::new(path, Predicate::Ne(value.into())))
    }

    /// Inclusive range `[min, max]`
    pub fn between(self, path: impl Into<String>, min: impl Into<Value>, max: impl Into<Value>) -> Self {
        self.range(path, Bound::Included(min.into()), Bound::Included(max.into()))
    }

    pub fn range(self, path: impl Into<String>, min: Bound<Value>, max: Bound<Value>) -> Self {
        self.clause(Clause::new(path, Predicate::Range { min, max }))
    }

    pub fn one_of<I, V>(self, path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.clause(Clause::new(path, Predicate::In(values)))
    }

    pub fn none_of<I, V>(self, path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.clause(Clause::new(path, Predicate::NotIn(values)))
    }

    pub fn contains(self, path: impl Into<String>, needle: impl Into<String>) -> Self {
        self.clause(Clause::new(path, Predicate::Contains(needle.into())))
    }

    /// Nested-metadata equality: `matches("metadata", [("source", "feed")])`
    pub fn matches<I, K, V>(self, path: impl Into<String>, expected: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let expected = expected
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.clause(Clause::new(path, Predicate::Matches(expected)))
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// AND of all clauses
    pub fn matches_all<S: FieldSource + ?Sized>(&self, source: &S) -> bool {
        self.clauses.iter().all(|c| c.matches(source))
    }

    /// Parse the dictionary form used by API callers
    ///
    /// ```text
    /// {
    ///   "brand": "Acme",                          equality
    ///   "price.amount": {"gte": 10, "lt": 30},    range
    ///   "category": {"in": ["tools", "garden"]},  set membership
    ///   "metadata": {"source": "feed"}            nested equality
    /// }
    /// ```
    ///
    /// Objects whose keys are all operators are operator sets; objects with
    /// no operator keys are nested equality; mixing the two is rejected.
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = match value {
            Value::Null => return Ok(Self::new()),
            Value::Object(map) => map,
            other => {
                return Err(StockroomError::Validation(format!(
                    "filter must be a JSON object, got {}",
                    other
                )))
            }
        };

        let mut filter = Self::new();
        for (path, spec) in map {
            if path.is_empty() {
                return Err(StockroomError::Validation("empty filter field".to_string()));
            }
            match spec {
                Value::Object(ops) if !ops.is_empty() => {
                    let operator_keys = ops.keys().filter(|k| is_operator(k)).count();
                    if operator_keys == ops.len() {
                        for clause in parse_operators(path, ops)? {
                            filter = filter.clause(clause);
                        }
                    } else if operator_keys == 0 {
                        let expected = ops.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                        filter = filter.clause(Clause::new(path.clone(), Predicate::Matches(expected)));
                    } else {
                        return Err(StockroomError::Validation(format!(
                            "filter on {:?} mixes operators and nested fields",
                            path
                        )));
                    }
                }
                scalar => filter = filter.eq(path.clone(), scalar.clone()),
            }
        }
        Ok(filter)
    }
}

const OPERATORS: &[&str] = &[
    "eq", "ne", "neq", "gt", "gte", "lt", "lte", "in", "nin", "contains",
];

fn is_operator(key: &str) -> bool {
    OPERATORS.contains(&key)
}

fn value_list(path: &str, op: &str, value: &Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        other => Err(StockroomError::Validation(format!(
            "{}.{} expects an array, got {}",
            path, op, other
        ))),
    }
}

fn parse_operators(path: &str, ops: &Map<String, Value>) -> Result<Vec<Clause>> {
    let mut clauses = Vec::new();
    let mut min = Bound::Unbounded;
    let mut max = Bound::Unbounded;

    for (op, value) in ops {
        match op.as_str() {
            "eq" => clauses.push(Clause::new(path, Predicate::Eq(value.clone()))),
            "ne" | "neq" => clauses.push(Clause::new(path, Predicate::Ne(value.clone()))),
            "gt" => min = Bound::Excluded(value.clone()),
            "gte" => min = Bound::Included(value.clone()),
            "lt" => max = Bound::Excluded(value.clone()),
            "lte" => max = Bound::Included(value.clone()),
            "in" => clauses.push(Clause::new(path, Predicate::In(value_list(path, op, value)?))),
            "nin" => clauses.push(Clause::new(
                path,
                Predicate::NotIn(value_list(path, op, value)?),
            )),
            "contains" => clauses.push(Clause::new(
                path,
                Predicate::Contains(display(value).into_owned()),
            )),
            unknown => {
                return Err(StockroomError::Validation(format!(
                    "unknown filter operator {:?} on {:?}",
                    unknown, path
                )))
            }
        }
    }

    if !matches!((&min, &max), (Bound::Unbounded, Bound::Unbounded)) {
        clauses.push(Clause::new(path, Predicate::Range { min, max }));
    }
    Ok(clauses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product() -> Value {
        json!({
            "id": "p1",
            "brand": "Acme",
            "title": "Rocket Skates",
            "price": {"amount": 20, "currency": "USD"},
            "metadata": {"source": "feed", "region": "us"}
        })
    }

    #[test]
    fn test_equality_and_missing_fields() {
        let doc = product();
        assert!(Filter::new().eq("brand", "Acme").matches_all(&doc));
        assert!(!Filter::new().eq("brand", "Other").matches_all(&doc));
        assert!(!Filter::new().eq("color", "red").matches_all(&doc));
        assert!(!Filter::new().ne("color", "red").matches_all(&doc));
        assert!(!Filter::new().none_of("color", ["red"]).matches_all(&doc));
    }

    #[test]
    fn test_range_bounds() {
        let doc = product();
        assert!(Filter::new().between("price.amount", 20, 30).matches_all(&doc));
        assert!(!Filter::new()
            .range("price.amount", Bound::Excluded(json!(20)), Bound::Unbounded)
            .matches_all(&doc));
        assert!(!Filter::new().between("price.amount", "a", "z").matches_all(&doc));
    }

    #[test]
    fn test_set_membership_and_contains() {
        let doc = product();
        assert!(Filter::new().one_of("brand", ["Acme", "Globex"]).matches_all(&doc));
        assert!(Filter::new().none_of("brand", ["Globex"]).matches_all(&doc));
        assert!(Filter::new().contains("title", "Skate").matches_all(&doc));
        assert!(!Filter::new().contains("title", "skate").matches_all(&doc));
    }

    #[test]
    fn test_nested_metadata_equality() {
        let doc = product();
        assert!(Filter::new()
            .matches("metadata", [("source", "feed"), ("region", "us")])
            .matches_all(&doc));
        assert!(!Filter::new()
            .matches("metadata", [("source", "crawl")])
            .matches_all(&doc));
        let clause = Clause::new("metadata", Predicate::Matches(BTreeMap::new()));
        assert!(!clause.matches(&doc));
    }

    #[test]
    fn test_from_json_builds_closed_predicates() {
        let filter = Filter::from_json(&json!({
            "brand": "Acme",
            "price.amount": {"gte": 10, "lt": 30},
            "metadata": {"source": "feed"}
        }))
        .unwrap();

        assert_eq!(filter.clauses().len(), 3);
        assert!(filter.matches_all(&product()));
        assert!(filter.clauses().iter().any(|c| matches!(
            &c.predicate,
            Predicate::Range { min: Bound::Included(_), max: Bound::Excluded(_) }
        )));
    }

    #[test]
    fn test_from_json_rejects_bad_input() {
        assert!(Filter::from_json(&json!([1, 2])).is_err());
        assert!(Filter::from_json(&json!({"price": {"gte": 1, "currency": "USD"}})).is_err());
        assert!(Filter::from_json(&json!({"brand": {"in": "Acme"}})).is_err());
        assert!(Filter::from_json(&Value::Null).unwrap().is_empty());
    }
}

//! JSON value helpers
//!
//! Dotted path lookup and the ordering rules shared by filters and sorting.

use std::borrow::Cow;
use std::cmp::Ordering;

use serde_json::{Number, Value};

/// Resolve a dotted path (`price.amount`, `images.0.url`) inside a document
///
/// `null` is treated the same as a missing field.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    match current {
        Value::Null => None,
        found => Some(found),
    }
}

/// Equality with numeric coercion (`10 == 10.0`)
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => number_cmp(x, y) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Ordering between two values of the same kind, `None` when incomparable
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => number_cmp(x, y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Integers compare exactly; floats go through `f64`
fn number_cmp(x: &Number, y: &Number) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return Some(a.cmp(&b));
    }
    if x.is_f64() || y.is_f64() {
        return x.as_f64()?.partial_cmp(&y.as_f64()?);
    }
    // a negative i64 against a u64 above i64::MAX
    Some(if x.is_i64() { Ordering::Less } else { Ordering::Greater })
}

fn kind_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order used for sorting mixed documents
///
/// Values of the same kind compare naturally; different kinds order as
/// bool < number < string < array < object.
pub fn total_cmp(a: &Value, b: &Value) -> Ordering {
    match compare(a, b) {
        Some(ord) => ord,
        None => kind_rank(a)
            .cmp(&kind_rank(b))
            .then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

/// String form used by substring matching
pub fn display(v: &Value) -> Cow<'_, str> {
    match v {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

//! Index Entry
//!
//! Per-record summary holding only the registered fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::value::lookup;
use crate::query::FieldSource;
use crate::record::ID_FIELD;

/// Summary of one record's indexed fields, keyed by dotted path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,

    /// Indexed path → value (absent paths are not stored)
    pub fields: BTreeMap<String, Value>,
}

impl IndexEntry {
    /// Extract the registered `fields` from a document
    pub fn from_document(id: &str, doc: &Value, fields: &[String]) -> Self {
        let mut extracted = BTreeMap::new();
        extracted.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        for path in fields {
            if let Some(value) = lookup(doc, path) {
                extracted.insert(path.clone(), value.clone());
            }
        }
        Self {
            id: id.to_string(),
            fields: extracted,
        }
    }
}

impl FieldSource for IndexEntry {
    fn field(&self, path: &str) -> Option<&Value> {
        self.fields.get(path)
    }
}

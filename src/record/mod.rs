//! Record Module
//!
//! A record is one product document (a JSON object) plus the fields the
//! engine manages itself: `id`, `created_at` and `updated_at`.
//!
//! ## Responsibilities
//! - Id rules (alphabet, length) and id assignment
//! - Structural validation of incoming documents
//! - Engine-managed timestamps
//!
//! Everything else in the document is opaque payload.

pub mod codec;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::config::{Config, IdStrategy};
use crate::error::Result;
use crate::query::value::lookup;
use crate::StockroomError;

pub use codec::RecordStore;

// =============================================================================
// Engine-managed Fields
// =============================================================================

pub const ID_FIELD: &str = "id";
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

/// Longest id accepted (ids double as file names)
pub const MAX_ID_LEN: usize = 200;

// =============================================================================
// Ids
// =============================================================================

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Check that an id can be used as a record file name
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(StockroomError::Validation("id is empty".to_string()));
    }
    if id.len() > MAX_ID_LEN {
        return Err(StockroomError::Validation(format!(
            "id longer than {} characters",
            MAX_ID_LEN
        )));
    }
    if id.starts_with('.') {
        return Err(StockroomError::Validation(format!(
            "id may not start with '.': {}",
            id
        )));
    }
    if let Some(bad) = id.chars().find(|c| !is_id_char(*c)) {
        return Err(StockroomError::Validation(format!(
            "id {:?} contains invalid character {:?}",
            id, bad
        )));
    }
    Ok(())
}

/// Map an arbitrary string into the id alphabet
pub fn slugify(raw: &str) -> String {
    let mut slug: String = raw
        .trim()
        .chars()
        .map(|c| if is_id_char(c) { c } else { '_' })
        .collect();
    while slug.starts_with('.') {
        slug.replace_range(0..1, "_");
    }
    slug.truncate(MAX_ID_LEN);
    if slug.is_empty() {
        slug.push('_');
    }
    slug
}

fn text(doc: &Map<String, Value>, key: &str) -> Option<String> {
    match doc.get(key)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..32].to_string()
}

/// Derive a stable id from product identifiers
///
/// Order of preference:
/// 1. `seller_id` + `sku`
/// 2. `brand` + `mpn`
/// 3. `gtin`, `upc` or `ean`
/// 4. hash of `url`
/// 5. hash of title/name, brand, category and model
pub fn derive_id(doc: &Map<String, Value>) -> String {
    if let (Some(seller), Some(sku)) = (text(doc, "seller_id"), text(doc, "sku")) {
        return slugify(&format!("{}_{}", seller, sku));
    }
    if let (Some(brand), Some(mpn)) = (text(doc, "brand"), text(doc, "mpn")) {
        return slugify(&format!("{}_{}", brand, mpn));
    }
    for kind in ["gtin", "upc", "ean"] {
        if let Some(code) = text(doc, kind) {
            return slugify(&format!("{}_{}", kind, code));
        }
    }
    if let Some(url) = text(doc, "url") {
        return format!("url_{}", short_hash(&url));
    }

    let mut basis = Map::new();
    let name = text(doc, "title").or_else(|| text(doc, "name")).unwrap_or_default();
    basis.insert("name".to_string(), Value::String(name));
    for key in ["brand", "category", "model"] {
        if let Some(v) = doc.get(key) {
            basis.insert(key.to_string(), v.clone());
        }
    }
    // serde_json maps are ordered by key, so this is canonical
    format!("product_{}", short_hash(&Value::Object(basis).to_string()))
}

/// Read an explicit `id` from the document, if any
fn explicit_id(doc: &Map<String, Value>) -> Result<Option<String>> {
    let id = match doc.get(ID_FIELD) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(StockroomError::Validation(format!(
                "id must be a string, got {}",
                other
            )))
        }
    };
    validate_id(&id)?;
    Ok(Some(id))
}

// =============================================================================
// Timestamps
// =============================================================================

/// Current time as RFC 3339 UTC with microseconds (sorts lexicographically)
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

// =============================================================================
// Document Preparation
// =============================================================================

fn check_structure<'a>(doc: &'a mut Value, config: &Config) -> Result<&'a mut Map<String, Value>> {
    let missing: Vec<&str> = config
        .required_fields
        .iter()
        .filter(|field| lookup(doc, field).is_none())
        .map(String::as_str)
        .collect();

    let map = doc
        .as_object_mut()
        .ok_or_else(|| StockroomError::Validation("document must be a JSON object".to_string()))?;

    if !missing.is_empty() {
        return Err(StockroomError::Validation(format!(
            "missing required field(s): {}",
            missing.join(", ")
        )));
    }
    Ok(map)
}

/// Validate a new document, assign its id and stamp it
///
/// Returns the id and the document as it will be persisted.
pub fn prepare_new(mut doc: Value, config: &Config) -> Result<(String, Value)> {
    let map = check_structure(&mut doc, config)?;

    let id = match explicit_id(map)? {
        Some(id) => id,
        None => match config.id_strategy {
            IdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            IdStrategy::Derived => derive_id(map),
        },
    };

    let now = now_timestamp();
    map.insert(ID_FIELD.to_string(), Value::String(id.clone()));
    map.insert(CREATED_AT.to_string(), Value::String(now.clone()));
    map.insert(UPDATED_AT.to_string(), Value::String(now));

    Ok((id, doc))
}

/// Validate a replacement for an existing record
///
/// `created_at` is carried over from `previous`, `updated_at` is refreshed.
pub fn prepare_replacement(id: &str, mut doc: Value, previous: &Value, config: &Config) -> Result<Value> {
    let map = check_structure(&mut doc, config)?;

    if let Some(given) = explicit_id(map)? {
        if given != id {
            return Err(StockroomError::Validation(format!(
                "document id {:?} does not match target id {:?}",
                given, id
            )));
        }
    }

    let created_at = previous
        .get(CREATED_AT)
        .cloned()
        .unwrap_or_else(|| Value::String(now_timestamp()));

    map.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    map.insert(CREATED_AT.to_string(), created_at);
    map.insert(UPDATED_AT.to_string(), Value::String(now_timestamp()));

    Ok(doc)
}

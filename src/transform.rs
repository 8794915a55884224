//! Maps upstream items onto the record schema.
//!
//! Transformation is per item and never fails the run: an item that cannot
//! be mapped is returned as [`Transformed::Rejected`] with the reason, and
//! the updater job decides what to do with it.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::models::{AttributeValue, Record, UpstreamItem};
use crate::schema::{AttributeKind, AttributeSpec, Schema};

#[derive(Debug, Clone, PartialEq)]
pub enum Transformed {
    Accepted(Record),
    Rejected {
        /// Identifier, when the item carried a usable one.
        id: Option<String>,
        reason: String,
    },
}

/// Reads the identifier of an upstream item: a non-empty string or an
/// integer.
pub fn item_id(schema: &Schema, item: &UpstreamItem) -> Option<String> {
    match item.get(&schema.id_source)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

pub fn transform_item(schema: &Schema, item: &UpstreamItem, now: DateTime<Utc>) -> Transformed {
    let id = match item_id(schema, item) {
        Some(id) => id,
        None => {
            return Transformed::Rejected {
                id: None,
                reason: format!("missing or invalid identifier '{}'", schema.id_source),
            }
        }
    };

    let mut attributes = BTreeMap::new();
    for spec in &schema.attributes {
        match convert(spec, item.get(spec.source_key())) {
            Ok(Some(value)) => {
                attributes.insert(spec.name.clone(), value);
            }
            Ok(None) if spec.required => {
                return Transformed::Rejected {
                    id: Some(id),
                    reason: format!("missing required attribute '{}'", spec.name),
                }
            }
            Ok(None) => {}
            Err(reason) => return Transformed::Rejected { id: Some(id), reason },
        }
    }

    Transformed::Accepted(Record {
        id,
        attributes,
        last_updated: now,
    })
}

/// Converts one raw value. `Ok(None)` means absent (missing, null or blank).
fn convert(spec: &AttributeSpec, raw: Option<&Value>) -> Result<Option<AttributeValue>, String> {
    let raw = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(v) => v,
    };

    match spec.kind {
        AttributeKind::Number => {
            let n = match raw {
                Value::Number(n) => n.as_f64(),
                Value::String(s) if s.trim().is_empty() => return Ok(None),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            match n {
                Some(n) if n.is_finite() => Ok(Some(AttributeValue::Number(n))),
                _ => Err(format!("attribute '{}' is not a number: {}", spec.name, raw)),
            }
        }
        AttributeKind::Text | AttributeKind::Category => {
            let s = match raw {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => {
                    return Err(format!(
                        "attribute '{}' must be a scalar, got {}",
                        spec.name, raw
                    ))
                }
            };
            if s.is_empty() {
                return Ok(None);
            }
            if spec.kind == AttributeKind::Category
                && spec.has_fixed_values()
                && !spec.values.contains(&s)
            {
                return Err(format!(
                    "attribute '{}' has value '{}' outside its legal set",
                    spec.name, s
                ));
            }
            Ok(Some(AttributeValue::Text(s)))
        }
    }
}

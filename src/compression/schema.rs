//! Structure-only descriptions of JSON values.
//!
//! A [`Schema`] records types, object keys and array lengths but none of the
//! content, so an agent can see what a compressed payload looks like before
//! deciding what to retrieve.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Nesting depth below which values are summarised instead of described.
const MAX_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schema {
    Object {
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        properties: BTreeMap<String, Schema>,
        #[serde(default, skip_serializing_if = "is_false")]
        truncated: bool,
    },
    Array {
        length: usize,
        /// Schema of the first element, standing in for all of them.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        items: Option<Box<Schema>>,
        #[serde(default, skip_serializing_if = "is_false")]
        truncated: bool,
    },
    String,
    Integer,
    Number,
    Boolean,
    Null,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(value: &bool) -> bool {
    !*value
}

/// Generate the schema of a JSON value.
#[must_use]
pub fn generate_schema(value: &Value) -> Schema {
    schema_at_depth(value, 0)
}

fn schema_at_depth(value: &Value, depth: usize) -> Schema {
    match value {
        Value::Object(map) => {
            if depth >= MAX_DEPTH {
                return Schema::Object {
                    properties: BTreeMap::new(),
                    truncated: true,
                };
            }
            Schema::Object {
                properties: map
                    .iter()
                    .map(|(key, child)| (key.clone(), schema_at_depth(child, depth + 1)))
                    .collect(),
                truncated: false,
            }
        }
        Value::Array(items) => {
            if depth >= MAX_DEPTH {
                return Schema::Array {
                    length: items.len(),
                    items: None,
                    truncated: true,
                };
            }
            Schema::Array {
                length: items.len(),
                items: items
                    .first()
                    .map(|first| Box::new(schema_at_depth(first, depth + 1))),
                truncated: false,
            }
        }
        Value::String(_) => Schema::String,
        Value::Number(n) if n.is_i64() || n.is_u64() => Schema::Integer,
        Value::Number(_) => Schema::Number,
        Value::Bool(_) => Schema::Boolean,
        Value::Null => Schema::Null,
    }
}

//! Entity serialization to plain JSON maps.
//!
//! Paths become strings, timestamps become RFC 3339 with an explicit
//! `+00:00`, nested entities serialize recursively, keys optionally remap
//! between snake_case and camelCase, and every top-level map gains an 8-hex
//! CRC32 `checksum` of its canonical (sorted-key) form unless excluded.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::helpers::{camel_to_snake, create_checksum, snake_to_camel};

/// Finalize a raw snake_case map for export: apply exclusions, append the
/// checksum, then remap keys for JavaScript clients when `to_js` is set.
pub fn finish(map: Map<String, Value>, excl: &HashSet<&str>, to_js: bool) -> Value {
    let mut value = scrub(Value::Object(map), excl);

    if !excl.contains("checksum") {
        if let Value::Object(ref mut map) = value {
            // a data column named checksum (corpus) wins over the computed one
            if !map.contains_key("checksum") {
                // serde_json maps are sorted by key, so this string is canonical
                let canonical = Value::Object(map.clone()).to_string();
                map.insert("checksum".into(), Value::String(create_checksum(canonical)));
            }
        }
    }

    if to_js {
        value = remap_keys(value, &snake_to_camel);
    }
    value
}

/// Remap camelCase keys from a JavaScript client back to snake_case,
/// recursively.
pub fn from_js(value: Value) -> Value {
    remap_keys(value, &camel_to_snake)
}

fn scrub(value: Value, excl: &HashSet<&str>) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| !excl.contains(k.as_str()))
                .map(|(k, v)| (k, scrub(v, excl)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| scrub(v, excl)).collect())
        }
        other => other,
    }
}

fn remap_keys(value: Value, remap: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (remap(&k), remap_keys(v, remap)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| remap_keys(v, remap)).collect())
        }
        other => other,
    }
}

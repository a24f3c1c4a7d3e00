//! Recursive key search over nested JSON mappings.

use crate::keys::lora::{LORAS_KEY, find_loras};
use crate::keys::normalize::strip_known_extension;
use serde_json::{Map, Value};

/// Find every occurrence of `target_keys` anywhere in a nested mapping.
///
/// Only objects are descended into; arrays are treated as leaf values.
/// When a key occurs more than once the last one visited (depth-first, in
/// document order) wins. Keys that never occur are absent from the result.
pub fn find_keys<K: AsRef<str>>(
    container: &Map<String, Value>,
    target_keys: &[K],
) -> Map<String, Value> {
    let mut found = Map::new();
    for (key, value) in container {
        if target_keys.iter().any(|k| k.as_ref() == key) {
            found.insert(key.clone(), value.clone());
        }
        if let Value::Object(child) = value {
            found.extend(find_keys(child, target_keys));
        }
    }
    found
}

/// [`find_keys`] for parameter extraction.
///
/// Found strings lose known model extensions, nulls count as absent, and a
/// requested `loras` key is filled with the aggregated LoRA names.
pub fn find_parameter_values<K: AsRef<str>>(
    container: &Map<String, Value>,
    target_keys: &[K],
) -> Map<String, Value> {
    let mut found: Map<String, Value> = find_keys(container, target_keys)
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let value = strip_known_extension(&value);
            (key, value)
        })
        .collect();

    if target_keys.iter().any(|k| k.as_ref() == LORAS_KEY) {
        if let Some(loras) = find_loras(container) {
            found.insert(LORAS_KEY.to_string(), Value::String(loras));
        }
    }

    found
}

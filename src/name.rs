//! File and folder name synthesis from graph parameters.

use crate::keys::{
    LORAS_KEY, display_value, find_keys, find_loras, round_if_numeric, strip_known_extension,
};
use serde_json::{Map, Value};

/// Split a comma-separated key list, dropping blank items.
pub fn parse_key_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Compose a name from `prefix` followed by the values of `keys`.
///
/// Values are appended in the order the keys are given, with nothing in
/// between; `resolution` is available as a pseudo-key. Keys without a value
/// are skipped. Any characters of `delimiter` are trimmed from both ends of
/// the result. Without keys or a graph, the name is just the prefix.
pub fn compose_name<K: AsRef<str>>(
    keys: &[K],
    prefix: &str,
    delimiter: &str,
    resolution: &str,
    graph: Option<&Map<String, Value>>,
) -> String {
    let mut name = prefix.to_string();

    if let Some(graph) = graph.filter(|_| !keys.is_empty()) {
        let mut found = Map::new();
        found.insert("resolution".to_string(), Value::from(resolution));
        found.extend(find_keys(graph, keys));
        if keys.iter().any(|k| k.as_ref() == LORAS_KEY) {
            if let Some(loras) = find_loras(graph) {
                found.insert(LORAS_KEY.to_string(), Value::String(loras));
            }
        }

        for key in keys {
            let key = key.as_ref();
            let Some(value) = found.get(key).filter(|v| !v.is_null()) else {
                continue;
            };
            let value = strip_known_extension(&round_if_numeric(key, value));
            name.push_str(&display_value(&value));
        }
    }

    trim_delimiter(&name, delimiter).to_string()
}

fn trim_delimiter<'a>(name: &'a str, delimiter: &str) -> &'a str {
    if delimiter.is_empty() {
        return name;
    }
    name.trim_matches(|c| delimiter.contains(c))
}

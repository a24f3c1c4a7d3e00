//! LoRA name aggregation.
//!
//! Loader nodes name their LoRA slots either `lora_name` or
//! `lora_name_<n>` (stackers also use `lora_<n>`). All slots of one mapping
//! are collapsed into a single `"a, b, c"` string.

use crate::keys::normalize::strip_extension;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Requested key under which the aggregate is reported.
pub const LORAS_KEY: &str = "loras";

/// Placeholder loaders put in unused slots.
const EMPTY_SLOT: &str = "None";

static LORA_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^lora(_name)?(_\d+)?$").unwrap());

/// Collect the LoRA names of one flat mapping, in mapping order.
///
/// Returns `None` when no slot holds a name.
pub fn aggregate_loras(inputs: &Map<String, Value>) -> Option<String> {
    let names: Vec<String> = inputs
        .iter()
        .filter(|(key, _)| LORA_KEY_RE.is_match(key))
        .filter_map(|(_, value)| value.as_str())
        .map(|name| strip_extension(name).into_owned())
        .filter(|name| name != EMPTY_SLOT)
        .collect();

    if names.is_empty() {
        return None;
    }

    Some(
        names
            .join(", ")
            .trim_matches(|c| c == ',' || c == ' ')
            .to_string(),
    )
}

/// Search a nested mapping for LoRA slots.
///
/// Child mappings are visited in order and the last one with names wins;
/// a mapping's own slots take precedence over anything found below it.
pub fn find_loras(container: &Map<String, Value>) -> Option<String> {
    let mut nested = None;
    for value in container.values() {
        if let Value::Object(child) = value {
            if let Some(found) = find_loras(child) {
                nested = Some(found);
            }
        }
    }
    aggregate_loras(container).or(nested)
}

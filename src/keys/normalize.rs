//! Value normalization applied before values reach names or the job log.

use serde_json::{Number, Value};
use std::borrow::Cow;

/// Model-file suffixes removed from values, checked in this order.
pub const KNOWN_EXTENSIONS: [&str; 2] = [".safetensors", ".pt"];

/// Keys whose values are rounded to one decimal place.
pub const ROUNDED_KEYS: [&str; 2] = ["cfg", "denoise"];

/// Strip a known model extension, keeping only the basename.
///
/// `"models/sdxl/base.safetensors"` becomes `"base"`. Names with any other
/// suffix come back untouched, directory prefix included.
pub fn strip_extension(name: &str) -> Cow<'_, str> {
    let mut out = Cow::Borrowed(name);
    for ext in KNOWN_EXTENSIONS {
        if out.ends_with(ext) {
            let stripped = {
                let base = basename(&out);
                base[..base.len() - ext.len()].to_string()
            };
            out = Cow::Owned(stripped);
        }
    }
    out
}

/// [`strip_extension`] lifted to JSON values; non-strings pass through.
pub fn strip_known_extension(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(strip_extension(s).into_owned()),
        other => other.clone(),
    }
}

/// Round `cfg`/`denoise` values to one decimal place.
///
/// Numbers and numeric strings are rounded; anything that does not parse
/// (or any other key) is returned unchanged.
pub fn round_if_numeric(key: &str, value: &Value) -> Value {
    if !ROUNDED_KEYS.contains(&key) {
        return value.clone();
    }

    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed.and_then(round_one_decimal).and_then(Number::from_f64) {
        Some(n) => Value::Number(n),
        None => value.clone(),
    }
}

/// Render a value the way it appears inside composed names.
///
/// Floats always keep a fractional digit (`7.0`), so a rounded cfg of 7
/// stays distinguishable from an integer step count. Lists and mappings
/// render as compact JSON (`["6",0]`).
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) if n.is_f64() => n.as_f64().map(display_float).unwrap_or_default(),
        Value::Number(n) => n.to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

fn display_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

// Decimal formatting rounds on the exact binary value, which keeps
// 0.15 -> 0.1 instead of the 0.2 a multiply-and-round would give.
fn round_one_decimal(x: f64) -> Option<f64> {
    format!("{:.1}", x).parse().ok()
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

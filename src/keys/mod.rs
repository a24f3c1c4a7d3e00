//! Key search and value normalization over arbitrary nested mappings.

pub mod find;
pub mod lora;
pub mod normalize;

pub use find::{find_keys, find_parameter_values};
pub use lora::{LORAS_KEY, find_loras};
pub use normalize::{display_value, round_if_numeric, strip_known_extension};

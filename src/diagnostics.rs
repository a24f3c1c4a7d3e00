//! Shared wording for user-facing diagnostics.
//!
//! Errors bubble up through anyhow; warnings go to the tracing subscriber.
//! Both carry the same prefix so messages from the node are easy to grep in
//! a busy pipeline log.

use std::fmt::Display;

const PREFIX: &str = "save-image-jobs";

/// Format an error message with the crate prefix.
pub fn error_message(msg: impl Display) -> String {
    format!("{}: {}", PREFIX, msg)
}

/// Emit a recoverable warning.
pub fn warn(msg: impl Display) {
    tracing::warn!("{}: {}", PREFIX, msg);
}

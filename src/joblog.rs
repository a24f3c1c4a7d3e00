//! Persistent job log (jobs.json): one entry per saved image, keyed by a
//! human-readable timestamp.
//!
//! File shape:
//! {
//!     "17.10.2026 | 14:03:59:123456": {
//!         "filename": "0001.png",
//!         "resolution": "1024x1024",
//!         ...
//!     },
//!     ...
//! }
//!
//! Every append is a full read-modify-write. The rewrite goes through a
//! temporary file in the same folder and is renamed into place, so readers
//! never see a half-written log. Concurrent appenders can still lose each
//! other's entries.

use crate::Result;
use crate::diagnostics;
use crate::graph::ExtractedRecord;

use anyhow::Context;
use chrono::{DateTime, TimeZone};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;

pub const JOB_LOG_FILE: &str = "jobs.json";

/// strftime patterns for the timestamps the node produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampFormat {
    /// Job log entry keys. Microsecond precision keeps keys unique in
    /// practice; a collision overwrites the older entry.
    pub entry_key: String,
    /// Default folder prefix.
    pub folder_date: String,
}

impl Default for TimestampFormat {
    fn default() -> Self {
        Self {
            entry_key: "%d.%m.%Y | %H:%M:%S:%6f".to_string(),
            folder_date: "%Y-%m-%d".to_string(),
        }
    }
}

impl TimestampFormat {
    pub fn entry_key<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        at.format(&self.entry_key).to_string()
    }

    pub fn folder_date<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        at.format(&self.folder_date).to_string()
    }
}

/// Read the job log at `path`.
///
/// A missing file is an empty log. So is a file that does not parse as a
/// JSON object; that case is reported as a warning and its contents will be
/// replaced on the next append. Other read failures are errors.
pub fn load(path: &Path) -> Result<Map<String, Value>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => {
            return Err(e).with_context(|| {
                diagnostics::error_message(format!("read job log {}", path.display()))
            });
        }
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(entries)) => Ok(entries),
        Ok(_) => {
            diagnostics::warn(format!(
                "job log {} is not a JSON object, starting with empty data",
                path.display()
            ));
            Ok(Map::new())
        }
        Err(e) => {
            diagnostics::warn(format!(
                "job log {} is empty or malformed ({}), starting with empty data",
                path.display(),
                e
            ));
            Ok(Map::new())
        }
    }
}

/// Add `record` under `timestamp` and rewrite the whole log.
pub fn append(path: &Path, timestamp: &str, record: &ExtractedRecord) -> Result<()> {
    let mut entries = load(path)?;
    entries.insert(timestamp.to_string(), Value::Object(record.clone()));
    write_atomic(path, &entries)?;

    tracing::debug!(
        path = %path.display(),
        entry = timestamp,
        entries = entries.len(),
        "job log updated"
    );
    Ok(())
}

fn write_atomic(path: &Path, entries: &Map<String, Value>) -> Result<()> {
    let mut buf = Vec::new();
    let mut ser =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    entries.serialize(&mut ser)?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).with_context(|| {
        diagnostics::error_message(format!("create temp file in {}", dir.display()))
    })?;
    tmp.write_all(&buf)?;
    tmp.as_file()
        .set_permissions(log_permissions(path, tmp.as_file())?)
        .with_context(|| diagnostics::error_message(format!("set permissions on {}", path.display())))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| diagnostics::error_message(format!("write job log {}", path.display())))?;
    Ok(())
}

/// Permissions for the rewritten log: those of the file being replaced, or
/// 0644 for a new one. Temp files start out owner-only.
fn log_permissions(path: &Path, tmp: &fs::File) -> Result<fs::Permissions> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.permissions()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let mut perms = tmp.metadata()?.permissions();
            set_new_log_mode(&mut perms);
            Ok(perms)
        }
        Err(e) => Err(e)
            .with_context(|| diagnostics::error_message(format!("stat job log {}", path.display()))),
    }
}

#[cfg(unix)]
fn set_new_log_mode(perms: &mut fs::Permissions) {
    use std::os::unix::fs::PermissionsExt;
    perms.set_mode(0o644);
}

#[cfg(not(unix))]
fn set_new_log_mode(perms: &mut fs::Permissions) {
    perms.set_readonly(false);
}

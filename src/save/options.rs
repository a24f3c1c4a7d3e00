//! Options the host passes to a save call.

use crate::joblog::TimestampFormat;
use crate::name::parse_key_list;

use chrono::{DateTime, Local};
use clap::ValueEnum;

/// Characters trimmed from both ends of composed names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Delimiter {
    #[default]
    None,
    Underscore,
    Dot,
}

impl Delimiter {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Underscore => "_",
            Self::Dot => ".",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    #[default]
    Enabled,
    Disabled,
}

impl Toggle {
    pub fn is_enabled(self) -> bool {
        self == Self::Enabled
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOptions {
    /// Zero-padding width of the image counter.
    pub counter_digits: usize,
    /// Enabled: one counter per folder. Disabled: one per filename prefix.
    pub one_counter_per_folder: Toggle,
    pub delimiter: Delimiter,
    pub filename_keys: Vec<String>,
    pub foldername_keys: Vec<String>,
    /// Embed the graph and extra info as PNG text chunks.
    pub save_metadata: Toggle,
    pub filename_prefix: String,
    pub foldername_prefix: String,
}

impl SaveOptions {
    /// Defaults with the folder prefix set to the date of `now`.
    pub fn dated(timestamps: &TimestampFormat, now: &DateTime<Local>) -> Self {
        Self {
            counter_digits: 4,
            one_counter_per_folder: Toggle::Enabled,
            delimiter: Delimiter::None,
            filename_keys: Vec::new(),
            foldername_keys: Vec::new(),
            save_metadata: Toggle::Enabled,
            filename_prefix: String::new(),
            foldername_prefix: timestamps.folder_date(now),
        }
    }

    /// Set both key lists from their comma-separated form.
    pub fn with_key_lists(mut self, filename_keys: &str, foldername_keys: &str) -> Self {
        self.filename_keys = parse_key_list(filename_keys);
        self.foldername_keys = parse_key_list(foldername_keys);
        self
    }
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self::dated(&TimestampFormat::default(), &Local::now())
    }
}

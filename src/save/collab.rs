//! Collaborators of the save operation: output path resolution, counter
//! recovery, and image encoding.
//!
//! Each is a trait so hosts can plug in their own; the filesystem-backed
//! defaults here are what the command-line tool uses.

use crate::Result;
use crate::diagnostics;

use anyhow::{Context, bail};
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const IMAGE_EXTENSION: &str = "png";

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

/// One image of a batch. `data` is whatever the writer consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl ImageFrame {
    /// Wrap an encoded PNG, reading its size from the IHDR chunk.
    pub fn from_png(data: Vec<u8>) -> Result<Self> {
        if data.len() < 24 || data[..8] != PNG_SIGNATURE || &data[12..16] != b"IHDR" {
            bail!("{}", diagnostics::error_message("not a PNG image"));
        }
        let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
        let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Where a batch goes: the folder and the file name stem inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavePath {
    pub folder: PathBuf,
    pub filename: String,
}

pub trait SavePathResolver {
    fn resolve(&self, base: &str, width: u32, height: u32) -> Result<SavePath>;
}

/// Resolves names below a fixed output root.
///
/// `%width%` and `%height%` in the name are substituted; a directory part
/// becomes a subfolder of the root.
#[derive(Debug, Clone)]
pub struct OutputDirResolver {
    root: PathBuf,
}

impl OutputDirResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SavePathResolver for OutputDirResolver {
    fn resolve(&self, base: &str, width: u32, height: u32) -> Result<SavePath> {
        let base = base
            .replace("%width%", &width.to_string())
            .replace("%height%", &height.to_string());
        let base = Path::new(&base);

        let subfolder = base.parent().unwrap_or(Path::new(""));
        ensure_relative(subfolder)?;
        let filename = base
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(SavePath {
            folder: self.root.join(subfolder),
            filename,
        })
    }
}

/// Reject paths that could leave the folder they are joined onto.
pub fn ensure_relative(path: &Path) -> Result<()> {
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => bail!(
                "{}",
                diagnostics::error_message(format!(
                    "path {} escapes the output folder",
                    path.display()
                ))
            ),
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterScope {
    /// Every image in the folder shares one counter.
    Folder,
    /// Only images starting with the same prefix count.
    Prefix,
}

pub trait CounterSource {
    /// The next free counter for `prefix` in `folder`, starting at 1.
    fn next_counter(
        &self,
        folder: &Path,
        prefix: &str,
        digits: usize,
        scope: CounterScope,
    ) -> Result<u64>;
}

/// Recovers counters from the names of existing images.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryCounter;

impl CounterSource for DirectoryCounter {
    fn next_counter(
        &self,
        folder: &Path,
        prefix: &str,
        digits: usize,
        scope: CounterScope,
    ) -> Result<u64> {
        if !folder.exists() {
            tracing::info!(folder = %folder.display(), "folder does not exist, starting counter at 1");
            return Ok(1);
        }

        match highest_counter(folder, prefix, digits, scope) {
            Ok(Some(highest)) => highest.checked_add(1).with_context(|| {
                diagnostics::error_message(format!(
                    "image counter {} in {} cannot be incremented",
                    highest,
                    folder.display()
                ))
            }),
            Ok(None) => Ok(1),
            Err(e) => {
                diagnostics::warn(format!(
                    "could not read counters in {}: {:#}",
                    folder.display(),
                    e
                ));
                Ok(1)
            }
        }
    }
}

fn highest_counter(
    folder: &Path,
    prefix: &str,
    digits: usize,
    scope: CounterScope,
) -> Result<Option<u64>> {
    let suffix = format!(".{}", IMAGE_EXTENSION);
    let mut highest = None;

    for entry in fs::read_dir(folder).with_context(|| format!("list {}", folder.display()))? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        let Some(stem) = name.strip_suffix(&suffix) else {
            continue;
        };
        if scope == CounterScope::Prefix && !name.starts_with(prefix) {
            continue;
        }
        let counter = trailing_counter(stem, digits);
        highest = highest.max(Some(counter));
    }

    Ok(highest)
}

/// The last `digits` characters of a file stem as a number; 0 when they are
/// not all digits.
fn trailing_counter(stem: &str, digits: usize) -> u64 {
    let chars: Vec<char> = stem.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(digits)..].iter().collect();
    if tail.is_empty() || !tail.chars().all(|c| c.is_ascii_digit()) {
        return 0;
    }
    tail.parse().unwrap_or(0)
}

/// Text chunks embedded next to the pixels: (keyword, JSON text).
pub type TextChunks = Vec<(String, String)>;

pub trait ImageWriter {
    fn write(&mut self, frame: &ImageFrame, path: &Path, text: &[(String, String)]) -> Result<()>;
}

/// Writes frames that already hold encoded PNG bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughWriter;

impl ImageWriter for PassthroughWriter {
    fn write(&mut self, frame: &ImageFrame, path: &Path, text: &[(String, String)]) -> Result<()> {
        if !text.is_empty() {
            tracing::debug!(
                path = %path.display(),
                chunks = text.len(),
                "passthrough writer does not embed text chunks"
            );
        }
        fs::write(path, &frame.data)
            .with_context(|| diagnostics::error_message(format!("write image {}", path.display())))
    }
}

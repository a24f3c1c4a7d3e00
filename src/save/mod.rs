//! The save operation: name the batch, write each image, and log its job
//! metadata next to it.
//!
//! Failures never escape a batch. Whatever was written before an error is
//! reported back together with the error message.

pub mod collab;
pub mod options;

pub use collab::{
    CounterScope, CounterSource, DirectoryCounter, ImageFrame, ImageWriter, OutputDirResolver,
    PassthroughWriter, SavePathResolver, TextChunks,
};
pub use options::{Delimiter, SaveOptions, Toggle};

use crate::Result;
use crate::diagnostics;
use crate::graph::{ExecutionGraph, extract_record};
use crate::joblog::{self, JOB_LOG_FILE, TimestampFormat};
use crate::name::compose_name;

use anyhow::Context;
use chrono::Local;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub output_folder: Option<PathBuf>,
    pub saved: Vec<PathBuf>,
    pub error: Option<String>,
}

pub struct ImageSaver<R, C, W> {
    options: SaveOptions,
    timestamps: TimestampFormat,
    resolver: R,
    counter: C,
    writer: W,
}

impl<R, C, W> ImageSaver<R, C, W>
where
    R: SavePathResolver,
    C: CounterSource,
    W: ImageWriter,
{
    pub fn new(options: SaveOptions, resolver: R, counter: C, writer: W) -> Self {
        Self {
            options,
            timestamps: TimestampFormat::default(),
            resolver,
            counter,
            writer,
        }
    }

    pub fn with_timestamps(mut self, timestamps: TimestampFormat) -> Self {
        self.timestamps = timestamps;
        self
    }

    #[cfg(test)]
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Save a batch. Names are derived from the first frame's resolution.
    pub fn save_images(
        &mut self,
        frames: &[ImageFrame],
        prompt: Option<&Map<String, Value>>,
        extra_pnginfo: Option<&Map<String, Value>>,
    ) -> SaveReport {
        let mut report = SaveReport::default();
        let Some(first) = frames.first() else {
            return report;
        };

        if let Err(e) = self.save_batch(first, frames, prompt, extra_pnginfo, &mut report) {
            let message = format!("{:#}", e);
            tracing::error!(
                saved = report.saved.len(),
                "error while creating the subfolder or saving the image: {}",
                message
            );
            report.error = Some(message);
        }
        report
    }

    fn save_batch(
        &mut self,
        first: &ImageFrame,
        frames: &[ImageFrame],
        prompt: Option<&Map<String, Value>>,
        extra_pnginfo: Option<&Map<String, Value>>,
        report: &mut SaveReport,
    ) -> Result<()> {
        let opts = &self.options;
        let delimiter = opts.delimiter.as_str();
        let resolution = first.resolution();

        let custom_filename = compose_name(
            &opts.filename_keys,
            &opts.filename_prefix,
            delimiter,
            &resolution,
            prompt,
        );
        let custom_foldername = compose_name(
            &opts.foldername_keys,
            &opts.foldername_prefix,
            delimiter,
            &resolution,
            prompt,
        );

        let save_path = self
            .resolver
            .resolve(&custom_filename, first.width, first.height)?;
        collab::ensure_relative(Path::new(&custom_foldername))?;
        let output_folder = save_path.folder.join(&custom_foldername);
        fs::create_dir_all(&output_folder).with_context(|| {
            diagnostics::error_message(format!("create folder {}", output_folder.display()))
        })?;
        report.output_folder = Some(output_folder.clone());

        let scope = if opts.one_counter_per_folder.is_enabled() {
            CounterScope::Folder
        } else {
            CounterScope::Prefix
        };
        let digits = opts.counter_digits;
        let first_counter =
            self.counter
                .next_counter(&output_folder, &save_path.filename, digits, scope)?;

        let text = if opts.save_metadata.is_enabled() {
            text_chunks(prompt, extra_pnginfo)?
        } else {
            TextChunks::new()
        };
        let graph = prompt.map(ExecutionGraph::from_prompt);
        let log_path = output_folder.join(JOB_LOG_FILE);

        for (offset, frame) in (0u64..).zip(frames) {
            let counter = first_counter.checked_add(offset).with_context(|| {
                diagnostics::error_message(format!("image counter overflow after {}", first_counter))
            })?;
            let file_name = format!(
                "{}{:0width$}.{}",
                save_path.filename,
                counter,
                collab::IMAGE_EXTENSION,
                width = digits
            );
            let image_path = output_folder.join(&file_name);
            self.writer.write(frame, &image_path, &text)?;
            report.saved.push(image_path);

            tracing::info!(
                file = %file_name,
                log = %log_path.display(),
                "saving job data"
            );
            let record = extract_record(graph.as_ref(), &file_name, &resolution);
            let key = self.timestamps.entry_key(&Local::now());
            joblog::append(&log_path, &key, &record)?;
        }

        Ok(())
    }
}

/// PNG text chunks: the graph under `prompt`, then each extra info entry,
/// all JSON-encoded.
fn text_chunks(
    prompt: Option<&Map<String, Value>>,
    extra_pnginfo: Option<&Map<String, Value>>,
) -> Result<TextChunks> {
    let mut chunks = TextChunks::new();
    if let Some(prompt) = prompt {
        chunks.push(("prompt".to_string(), serde_json::to_string(prompt)?));
    }
    for (key, value) in extra_pnginfo.into_iter().flatten() {
        chunks.push((key.clone(), serde_json::to_string(value)?));
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingWriter {
        writes: Vec<(PathBuf, TextChunks)>,
        fail_after: Option<usize>,
    }

    impl ImageWriter for RecordingWriter {
        fn write(&mut self, frame: &ImageFrame, path: &Path, text: &[(String, String)]) -> Result<()> {
            if self.fail_after == Some(self.writes.len()) {
                anyhow::bail!("disk full");
            }
            fs::write(path, &frame.data)?;
            self.writes.push((path.to_path_buf(), text.to_vec()));
            Ok(())
        }
    }

    fn frame() -> ImageFrame {
        ImageFrame {
            width: 512,
            height: 768,
            data: vec![1, 2, 3],
        }
    }

    fn prompt() -> Map<String, Value> {
        json!({
            "4": {"class_type": "CheckpointLoaderSimple",
                  "inputs": {"ckpt_name": "sdxl/juggernaut.safetensors"}},
            "3": {"class_type": "KSampler",
                  "inputs": {"seed": 42, "steps": 30, "cfg": 7.0,
                             "positive": ["6", 0], "negative": ["7", 0]}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "a cat"}},
            "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "a dog"}},
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn options() -> SaveOptions {
        SaveOptions {
            foldername_prefix: "2026-10-17".to_string(),
            ..SaveOptions::default()
        }
        .with_key_lists("ckpt_name, steps", "resolution")
    }

    fn saver(
        root: &Path,
        options: SaveOptions,
        writer: RecordingWriter,
    ) -> ImageSaver<OutputDirResolver, DirectoryCounter, RecordingWriter> {
        ImageSaver::new(options, OutputDirResolver::new(root), DirectoryCounter, writer)
    }

    #[test]
    fn saves_batch_and_logs_each_image() {
        let dir = TempDir::new().unwrap();
        let mut saver = saver(dir.path(), options(), RecordingWriter::default());
        let prompt = prompt();

        let report = saver.save_images(&[frame(), frame()], Some(&prompt), None);

        let folder = dir.path().join("2026-10-17512x768");
        assert_eq!(report.error, None);
        assert_eq!(report.output_folder, Some(folder.clone()));
        assert_eq!(
            report.saved,
            vec![
                folder.join("juggernaut300001.png"),
                folder.join("juggernaut300002.png"),
            ]
        );

        let log = joblog::load(&folder.join(JOB_LOG_FILE)).unwrap();
        assert_eq!(log.len(), 2);
        let first = log.values().next().unwrap();
        assert_eq!(first["filename"], json!("juggernaut300001.png"));
        assert_eq!(first["resolution"], json!("512x768"));
        assert_eq!(first["checkpoint"], json!("juggernaut"));
        assert_eq!(first["positive_prompt"], json!("a dog"));
    }

    #[test]
    fn continues_counter_from_existing_files() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("2026-10-17512x768");
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("juggernaut300007.png"), b"").unwrap();

        let mut saver = saver(dir.path(), options(), RecordingWriter::default());
        let prompt = prompt();
        let report = saver.save_images(&[frame()], Some(&prompt), None);

        assert_eq!(report.saved, vec![folder.join("juggernaut300008.png")]);
    }

    #[test]
    fn metadata_toggle_controls_text_chunks() {
        let dir = TempDir::new().unwrap();
        let extra = json!({"workflow": {"nodes": []}}).as_object().cloned().unwrap();
        let prompt = prompt();

        let mut with = saver(dir.path(), options(), RecordingWriter::default());
        with.save_images(&[frame()], Some(&prompt), Some(&extra));
        let keys: Vec<_> = with.writer().writes[0].1.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec!["prompt", "workflow"]);
        assert_eq!(with.writer().writes[0].1[1].1, r#"{"nodes":[]}"#);

        let opts = SaveOptions {
            save_metadata: Toggle::Disabled,
            ..options()
        };
        let mut without = saver(dir.path(), opts, RecordingWriter::default());
        without.save_images(&[frame()], Some(&prompt), Some(&extra));
        assert!(without.writer().writes[0].1.is_empty());
    }

    #[test]
    fn write_failure_stops_the_batch() {
        let dir = TempDir::new().unwrap();
        let writer = RecordingWriter {
            fail_after: Some(1),
            ..RecordingWriter::default()
        };
        let mut saver = saver(dir.path(), options(), writer);
        let prompt = prompt();

        let report = saver.save_images(&[frame(), frame(), frame()], Some(&prompt), None);

        assert_eq!(report.saved.len(), 1);
        assert!(report.error.as_deref().unwrap().contains("disk full"));
        let folder = report.output_folder.unwrap();
        assert_eq!(joblog::load(&folder.join(JOB_LOG_FILE)).unwrap().len(), 1);
    }

    #[test]
    fn counter_overflow_stops_the_batch() {
        let dir = TempDir::new().unwrap();
        let opts = SaveOptions {
            counter_digits: 20,
            ..options()
        };
        let mut saver = saver(dir.path(), opts, RecordingWriter::default());
        let prompt = prompt();
        let folder = dir.path().join("2026-10-17512x768");
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join(format!("juggernaut30{}.png", u64::MAX - 1)), b"").unwrap();

        let report = saver.save_images(&[frame(), frame()], Some(&prompt), None);

        assert_eq!(
            report.saved,
            vec![folder.join(format!("juggernaut30{}.png", u64::MAX))]
        );
        assert!(report.error.as_deref().unwrap().contains("overflow"));
    }

    #[test]
    fn unreadable_log_bytes_do_not_stop_the_batch() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("2026-10-17512x768");
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join(JOB_LOG_FILE), [0xff, 0x00, 0x9c]).unwrap();

        let mut saver = saver(dir.path(), options(), RecordingWriter::default());
        let prompt = prompt();
        let report = saver.save_images(&[frame(), frame()], Some(&prompt), None);

        assert_eq!(report.error, None);
        assert_eq!(report.saved.len(), 2);
        assert_eq!(joblog::load(&folder.join(JOB_LOG_FILE)).unwrap().len(), 2);
    }

    #[test]
    fn escaping_folder_name_is_reported() {
        let dir = TempDir::new().unwrap();
        let opts = SaveOptions {
            foldername_prefix: "../outside".to_string(),
            foldername_keys: Vec::new(),
            ..options()
        };
        let mut saver = saver(dir.path(), opts, RecordingWriter::default());

        let report = saver.save_images(&[frame()], None, None);

        assert!(report.saved.is_empty());
        assert!(report.error.is_some());
    }

    #[test]
    fn empty_batch_does_nothing() {
        let dir = TempDir::new().unwrap();
        let mut saver = saver(dir.path(), options(), RecordingWriter::default());
        assert_eq!(saver.save_images(&[], None, None), SaveReport::default());
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn without_prompt_names_fall_back_to_prefixes() {
        let dir = TempDir::new().unwrap();
        let opts = SaveOptions {
            filename_prefix: "shot_".to_string(),
            delimiter: Delimiter::Underscore,
            ..options()
        };
        let mut saver = saver(dir.path(), opts, RecordingWriter::default());

        let report = saver.save_images(&[frame()], None, None);

        let folder = dir.path().join("2026-10-17");
        assert_eq!(report.saved, vec![folder.join("shot0001.png")]);
        let log = joblog::load(&folder.join(JOB_LOG_FILE)).unwrap();
        let entry = log.values().next().unwrap();
        assert_eq!(entry, &json!({"filename": "shot0001.png", "resolution": "512x768"}));
    }
}

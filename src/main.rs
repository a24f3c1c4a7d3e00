use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

mod diagnostics;
mod graph;
mod joblog;
mod keys;
mod name;
mod save;

pub type Result<T> = anyhow::Result<T>;

#[derive(Parser)]
#[command(name = "save-image-jobs")]
#[command(about = "Name generated images after their graph and log each job", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the job record extracted from a prompt graph.
    Extract {
        #[arg(long)]
        prompt: PathBuf,

        #[arg(long, default_value = "0001.png")]
        filename: String,

        #[arg(long, default_value = "0x0")]
        resolution: String,
    },

    /// Print the file and folder names a save would use.
    Name {
        #[arg(long)]
        prompt: Option<PathBuf>,

        #[arg(long, default_value = "0x0")]
        resolution: String,

        #[command(flatten)]
        naming: NamingArgs,
    },

    /// Save PNG images into the output folder and append their jobs.
    Save {
        /// Output root directory.
        #[arg(short = 'o', long)]
        output: PathBuf,

        /// Encoded PNG file; repeat for a batch.
        #[arg(long = "image", required = true)]
        images: Vec<PathBuf>,

        #[arg(long)]
        prompt: Option<PathBuf>,

        #[arg(long)]
        extra_pnginfo: Option<PathBuf>,

        #[arg(long, default_value_t = 4)]
        counter_digits: usize,

        #[arg(long, value_enum, default_value_t = save::Toggle::Enabled)]
        one_counter_per_folder: save::Toggle,

        #[arg(long, value_enum, default_value_t = save::Toggle::Enabled)]
        save_metadata: save::Toggle,

        /// strftime pattern for job log entry keys.
        #[arg(long, default_value = "%d.%m.%Y | %H:%M:%S:%6f")]
        timestamp_format: String,

        #[command(flatten)]
        naming: NamingArgs,
    },
}

#[derive(Args)]
struct NamingArgs {
    #[arg(long, value_enum, default_value_t = save::Delimiter::None)]
    delimiter: save::Delimiter,

    /// Comma-separated keys appended to the file name prefix.
    #[arg(long, default_value = "")]
    filename_keys: String,

    /// Comma-separated keys appended to the folder name prefix.
    #[arg(long, default_value = "")]
    foldername_keys: String,

    #[arg(long, default_value = "")]
    filename_prefix: String,

    /// Defaults to today's date.
    #[arg(long)]
    foldername_prefix: Option<String>,
}

impl NamingArgs {
    fn options(&self) -> save::SaveOptions {
        let mut options = save::SaveOptions::default()
            .with_key_lists(&self.filename_keys, &self.foldername_keys);
        options.delimiter = self.delimiter;
        options.filename_prefix = self.filename_prefix.clone();
        if let Some(prefix) = &self.foldername_prefix {
            options.foldername_prefix = prefix.clone();
        }
        options
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Extract {
            prompt,
            filename,
            resolution,
        } => {
            let prompt = read_json_object(&prompt)?;
            let graph = graph::ExecutionGraph::from_prompt(&prompt);
            let record = graph::extract_record(Some(&graph), &filename, &resolution);
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::Name {
            prompt,
            resolution,
            naming,
        } => {
            let prompt = prompt.as_deref().map(read_json_object).transpose()?;
            let options = naming.options();
            let delimiter = options.delimiter.as_str();

            let filename = name::compose_name(
                &options.filename_keys,
                &options.filename_prefix,
                delimiter,
                &resolution,
                prompt.as_ref(),
            );
            let foldername = name::compose_name(
                &options.foldername_keys,
                &options.foldername_prefix,
                delimiter,
                &resolution,
                prompt.as_ref(),
            );
            println!("filename:   {}", filename);
            println!("foldername: {}", foldername);
        }

        Commands::Save {
            output,
            images,
            prompt,
            extra_pnginfo,
            counter_digits,
            one_counter_per_folder,
            save_metadata,
            timestamp_format,
            naming,
        } => {
            let prompt = prompt.as_deref().map(read_json_object).transpose()?;
            let extra = extra_pnginfo.as_deref().map(read_json_object).transpose()?;

            let mut frames = Vec::with_capacity(images.len());
            for path in &images {
                let data = std::fs::read(path).with_context(|| {
                    diagnostics::error_message(format!("read image {}", path.display()))
                })?;
                frames.push(save::ImageFrame::from_png(data)?);
            }

            let mut options = naming.options();
            options.counter_digits = counter_digits;
            options.one_counter_per_folder = one_counter_per_folder;
            options.save_metadata = save_metadata;

            let mut saver = save::ImageSaver::new(
                options,
                save::OutputDirResolver::new(&output),
                save::DirectoryCounter,
                save::PassthroughWriter,
            )
            .with_timestamps(joblog::TimestampFormat {
                entry_key: timestamp_format,
                ..joblog::TimestampFormat::default()
            });
            let report = saver.save_images(&frames, prompt.as_ref(), extra.as_ref());

            let (lines, ok) = save_summary(&report);
            for line in lines {
                println!("{}", line);
            }
            if !ok {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Lines to print for a finished batch, and whether it succeeded. A batch
/// error is left out; the saver has already logged it.
fn save_summary(report: &save::SaveReport) -> (Vec<String>, bool) {
    let lines = report
        .saved
        .iter()
        .map(|path| format!("Wrote {}", path.display()))
        .collect();
    (lines, report.error.is_none())
}

fn read_json_object(path: &Path) -> Result<Map<String, Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| diagnostics::error_message(format!("read {}", path.display())))?;
    match serde_json::from_str(&text)
        .with_context(|| diagnostics::error_message(format!("parse {}", path.display())))?
    {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!(
            "{}",
            diagnostics::error_message(format!("{} is not a JSON object", path.display()))
        ),
    }
}

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use split_stacker::{
    composition::{CompositionEngine, FillRequest, JobRecord, StackRequest},
    config::Config,
    jobs::JobGate,
    retention::{RetentionPolicy, RetentionScheduler},
    toolkit::FfmpegToolkit,
};

#[derive(Parser)]
#[command(
    name = "split-stacker",
    version,
    about = "Stack two videos vertically into one composite",
    long_about = "Split-Stacker plays a primary video once on top of a looping secondary video, crops both to fill the output frame, and carries the primary's audio onto the result."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Compose a single stacked video
    Stack {
        /// Video played once on top; its audio is kept
        #[arg(short, long)]
        primary: PathBuf,

        /// Video looped underneath
        #[arg(short, long)]
        secondary: PathBuf,

        /// Output video file path
        #[arg(short, long)]
        output: PathBuf,

        /// File receiving the current progress percentage
        #[arg(long)]
        progress: Option<PathBuf>,

        /// Output width (overrides config)
        #[arg(long)]
        width: Option<u32>,

        /// Output height, must be even (overrides config)
        #[arg(long)]
        height: Option<u32>,

        /// Configuration file (optional)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Crop and scale one video to fill a fixed frame, without audio
    Resize {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Output video file path
        #[arg(short, long)]
        output: PathBuf,

        /// Target width, must be even
        #[arg(long, default_value_t = 1080)]
        width: u32,

        /// Target height, must be even
        #[arg(long, default_value_t = 960)]
        height: u32,

        /// File receiving the current progress percentage
        #[arg(long)]
        progress: Option<PathBuf>,

        /// Configuration file (optional)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run every job of a manifest through the admission gate
    Batch {
        /// TOML file with one [[job]] table per job
        #[arg(short, long)]
        manifest: PathBuf,

        /// Configuration file (optional)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the records of finished jobs as JSON
        #[arg(short, long)]
        records: Option<PathBuf>,
    },

    /// Delete expired files from the retention roots
    Clean {
        /// Configuration file (optional)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Keep cleaning on the configured interval until Ctrl-C
        #[arg(short, long)]
        watch: bool,
    },
}

#[derive(Deserialize)]
struct Manifest {
    #[serde(rename = "job", default)]
    jobs: Vec<StackRequest>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Split-Stacker v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Stack { primary, secondary, output, progress, width, height, config } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(width) = width {
                config.video.output_width = width;
            }
            if let Some(height) = height {
                config.video.output_height = height;
            }
            config.validate().context("invalid output settings")?;
            warn_if_toolkit_missing(&config);

            let mut request = StackRequest::new(primary, secondary, output);
            request.progress = progress;

            let engine = CompositionEngine::with_ffmpeg(config);
            let record = tokio::task::spawn_blocking(move || engine.compose(&request))
                .await
                .context("compositing task panicked")?
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;

            info!("Composition complete! Output saved to: {:?}", record.output);
        }

        Command::Resize { input, output, width, height, progress, config } => {
            let config = load_config(config.as_deref())?;
            warn_if_toolkit_missing(&config);

            let mut request = FillRequest::new(input, output.clone(), width, height);
            request.progress = progress;

            let engine = CompositionEngine::with_ffmpeg(config);
            let summary = tokio::task::spawn_blocking(move || engine.resize_to_fill(&request))
                .await
                .context("resize task panicked")?
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;

            info!("Resize complete! {} frames saved to: {:?}", summary.frames_written, output);
        }

        Command::Batch { manifest, config, records } => {
            let config = load_config(config.as_deref())?;
            warn_if_toolkit_missing(&config);
            run_batch(config, &manifest, records.as_deref()).await?;
        }

        Command::Clean { config, watch } => {
            let config = load_config(config.as_deref())?;
            let policy = RetentionPolicy::from_config(&config.retention)?;

            if watch {
                let mut scheduler = RetentionScheduler::new(policy);
                scheduler.start()?;
                tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
                info!("Interrupted, stopping cleanup");
                scheduler.stop().await?;
            } else {
                let report = tokio::task::spawn_blocking(move || policy.run_pass())
                    .await
                    .context("cleanup task panicked")?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path).with_context(|| format!("loading {}", config_path.display()))?
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn warn_if_toolkit_missing(config: &Config) {
    if !FfmpegToolkit::from_config(config).is_available() {
        warn!("{} is not runnable; jobs will fail to decode", config.toolkit.ffmpeg.display());
    }
}

async fn run_batch(config: Config, manifest: &Path, records_path: Option<&Path>) -> Result<()> {
    let text = std::fs::read_to_string(manifest).with_context(|| format!("reading {}", manifest.display()))?;
    let manifest: Manifest = toml::from_str(&text).context("parsing job manifest")?;

    let mut scheduler = RetentionScheduler::new(RetentionPolicy::from_config(&config.retention)?);
    scheduler.start()?;

    let gate = JobGate::from_config(config);
    info!("Loaded {} jobs, running up to {} at once", manifest.jobs.len(), gate.limit());
    let handles: Vec<_> = manifest
        .jobs
        .into_iter()
        .map(|request| (request.output.clone(), gate.spawn(request)))
        .collect();

    let mut records: Vec<JobRecord> = Vec::new();
    let mut failures = 0usize;
    for (output, handle) in handles {
        match handle.await {
            Ok(Ok(record)) => records.push(record),
            Ok(Err(e)) => {
                error!("Job for {} failed: {}", output.display(), e.user_message());
                failures += 1;
            }
            Err(e) => {
                error!("Job for {} did not finish: {}", output.display(), e);
                failures += 1;
            }
        }
    }

    scheduler.stop().await?;

    if let Some(path) = records_path {
        std::fs::write(path, serde_json::to_string_pretty(&records)?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("Wrote {} job records to {}", records.len(), path.display());
    }

    info!("Batch finished: {} succeeded, {} failed", records.len(), failures);
    if failures > 0 {
        anyhow::bail!("{} of {} jobs failed", failures, failures + records.len());
    }
    Ok(())
}

mod background;
mod capture;
mod config;
mod detection;
mod error;
mod output;
mod pipeline;
mod prompt;

use anyhow::{bail, Context, Result};
use background::MogSettings;
use clap::{Parser, ValueEnum};
use config::{AppConfig, SourceSpec, DEFAULT_WAIT};
use error::SourceError;
use pipeline::{MainLoop, StopReason};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Exit code when the input source cannot be opened
const EXIT_SOURCE_UNAVAILABLE: u8 = 2;
const EXIT_FAILURE: u8 = 1;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input source; asks at the console when omitted
    #[arg(short, long, value_enum)]
    source: Option<SourceKind>,

    /// Video file to read; implies `--source file`
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Camera device index
    #[arg(short, long, default_value_t = 0)]
    device: u32,

    /// Gaussian components per pixel (3-5 works well)
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..))]
    mixtures: u8,

    /// Mark shadows separately from moving objects
    #[arg(long)]
    shadows: bool,

    /// Frames the background model averages over
    #[arg(long, default_value_t = 500)]
    history: u32,

    /// Squared Mahalanobis distance for a pixel to match the background
    #[arg(long, default_value_t = 16.0)]
    var_threshold: f32,

    /// Fixed model learning rate (0-1); derived from --history when omitted
    #[arg(long)]
    learning_rate: Option<f32>,

    /// Milliseconds to wait for a key press between frames
    #[arg(long, default_value_t = DEFAULT_WAIT.as_millis() as u64)]
    wait_ms: u64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SourceKind {
    File,
    Camera,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = build_config(args)?;
    tracing::info!("Input: {}", config.source);

    let source = capture::open_source(&config.source)
        .with_context(|| format!("Failed to initialize {}", config.source))?;
    let model = background::create_default_model(config.model);
    let main_loop = MainLoop::new(source, model, config.wait);

    match output::run_windows(main_loop)? {
        Some(StopReason::KeyPressed) => tracing::info!("Key pressed, exiting"),
        Some(StopReason::EndOfStream) => tracing::info!("Input finished, exiting"),
        None => tracing::info!("Window closed, exiting"),
    }
    Ok(())
}

fn build_config(args: Args) -> Result<AppConfig> {
    let source = match (args.source, args.path) {
        (Some(SourceKind::File), Some(path)) => SourceSpec::File(path),
        (Some(SourceKind::File), None) => bail!("--source file needs --path"),
        (Some(SourceKind::Camera), _) => SourceSpec::Camera(args.device),
        (None, Some(path)) => SourceSpec::File(path),
        (None, None) => {
            let stdin = io::stdin();
            prompt::prompt_source(&mut stdin.lock(), &mut io::stdout(), args.device)?
        }
    };

    if let Some(rate) = args.learning_rate {
        if !(0.0..=1.0).contains(&rate) {
            bail!("--learning-rate must be between 0 and 1, got {}", rate);
        }
    }

    let model = MogSettings {
        history: args.history,
        var_threshold: args.var_threshold,
        learning_rate: args.learning_rate,
        ..MogSettings::configure(usize::from(args.mixtures), args.shadows)
    };

    Ok(AppConfig {
        source,
        model,
        wait: Duration::from_millis(args.wait_ms),
    })
}

fn exit_code(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<SourceError>() {
        Some(source_error) if source_error.is_open_failure() => EXIT_SOURCE_UNAVAILABLE,
        _ => EXIT_FAILURE,
    }
}

//! Background replacement CLI tool
//!
//! Cuts the foreground out of one image and, when a background is given,
//! composes it over that background. Both results are written into the
//! output directory.

use super::backend_factory::{build_registry, ALPHA_MODEL};
use super::config::CliConfigBuilder;
use crate::{
    config::PipelineConfig,
    pipeline::{Pipeline, PipelineSnapshot},
    services::{
        cutout_filename, FilePresenter, PipelineStage, Presenter, ProgressReporter,
        ProgressUpdate, StatusSink,
    },
    tracing_config::{events, init_cli_tracing, spans, TracingFormat},
    types::{ImageResource, ModelSelector},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Background removal and replacement tool
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "rmbg")]
pub struct Cli {
    /// Image to cut out
    #[arg(value_name = "INPUT", required_unless_present = "list_models")]
    pub input: Option<PathBuf>,

    /// Replacement background; a composite is written when given
    #[arg(short, long, value_name = "BACKGROUND")]
    pub background: Option<PathBuf>,

    /// Segmentation model (see --list-models)
    #[arg(short, long, default_value = ALPHA_MODEL)]
    pub model: String,

    /// ONNX model file, or a directory containing <MODEL>.onnx
    #[arg(long, value_name = "PATH")]
    pub model_path: Option<PathBuf>,

    /// Output directory [default: current directory]
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Composite output format [default: png]
    #[arg(short, long, value_enum)]
    pub format: Option<CliOutputFormat>,

    /// JPEG quality (0-100) [default: 90]
    #[arg(long)]
    pub jpeg_quality: Option<u8>,

    /// Execution provider for ONNX models [default: auto]
    #[arg(short, long, value_enum)]
    pub execution_provider: Option<CliExecutionProvider>,

    /// Number of inference threads (0 = auto-detect)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Give up on segmentation after this many seconds [default: 120]
    #[arg(long, value_name = "SECONDS")]
    pub timeout_secs: Option<u64>,

    /// JSON pipeline configuration; command-line flags override its values
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// List the available models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    /// Enable verbose logging (-v: INFO, -vv: DEBUG, -vvv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    Jpeg,
    Webp,
    Tiff,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum CliExecutionProvider {
    Auto,
    Cpu,
    Cuda,
    Coreml,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum CliLogFormat {
    /// Colored, human-readable
    Console,
    /// Plain single-line output for CI logs
    Compact,
    /// JSON lines (requires the `tracing-json` feature)
    Json,
}

impl CliLogFormat {
    /// Map to the subscriber format
    ///
    /// # Errors
    /// - When JSON output is requested but the binary was built without it
    pub fn tracing_format(self) -> Result<TracingFormat> {
        match self {
            CliLogFormat::Console => Ok(TracingFormat::Console),
            CliLogFormat::Compact => Ok(TracingFormat::Compact),
            #[cfg(feature = "tracing-json")]
            CliLogFormat::Json => Ok(TracingFormat::Json),
            #[cfg(not(feature = "tracing-json"))]
            CliLogFormat::Json => {
                anyhow::bail!("JSON logs need a build with the `tracing-json` feature")
            },
        }
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let session_id = init_cli_tracing(cli.verbose, cli.log_format.tracing_format()?)
        .context("Failed to initialize tracing")?;

    if cli.list_models {
        return list_models();
    }

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;

    let model = ModelSelector::new(cli.model.as_str()).context("Invalid model name")?;
    let span = spans::session(
        &session_id,
        model.as_str(),
        &config.runtime.execution_provider.to_string(),
    );
    let result = run(&cli, config, model).instrument(span).await;
    if let Err(e) = &result {
        events::error_with_context(e.as_ref(), "background replacement");
    }
    result
}

fn list_models() -> Result<()> {
    let registry = build_registry().context("Failed to build model registry")?;
    println!("Available models:");
    for model in registry.models() {
        println!("  • {}", model);
    }
    Ok(())
}

async fn run(cli: &Cli, config: PipelineConfig, model: ModelSelector) -> Result<()> {
    let start_time = Instant::now();
    let input_path = cli.input.clone().context("An input image is required")?;
    let output_dir = cli.output.clone().unwrap_or_else(|| PathBuf::from("."));

    let registry = build_registry().context("Failed to build model registry")?;
    if !registry.contains(&model) {
        let available: Vec<String> = registry.models().iter().map(ToString::to_string).collect();
        anyhow::bail!(
            "Unknown model '{}'. Available models: {}",
            model,
            available.join(", ")
        );
    }
    if model.as_str() != ALPHA_MODEL && config.runtime.model_path.is_none() {
        events::warning_with_recommendation(
            &format!("model '{}' needs ONNX weights but no model path is set", model),
            "pass --model-path or set runtime.model_path in the config file",
        );
    }

    info!("Input: {}", input_path.display());
    info!("Model: {}", model);
    info!("Output directory: {}", output_dir.display());

    let presenter = Arc::new(
        FilePresenter::new(&output_dir)
            .with_context(|| format!("Failed to prepare output directory {}", output_dir.display()))?
            .with_foreground_name(cutout_filename(&input_path)),
    );

    let bar = create_spinner();
    let pipeline = Pipeline::builder(registry)
        .config(config)
        .model(model)
        .status_sink(Arc::new(CliStatusSink::new(bar.clone())))
        .progress_reporter(Arc::new(CliProgressReporter::new(bar.clone())))
        .presenter(Arc::clone(&presenter) as Arc<dyn Presenter>)
        .build()
        .context("Failed to build pipeline")?;
    let handle = pipeline.spawn();

    let input = ImageResource::from_path(&input_path)
        .await
        .with_context(|| format!("Failed to read input {}", input_path.display()))?;
    handle.select_input(input)?;

    if let Some(background_path) = &cli.background {
        let background = ImageResource::from_path(background_path)
            .await
            .with_context(|| format!("Failed to read background {}", background_path.display()))?;
        handle.select_background(background)?;
    }

    let snapshot = handle.wait_until_idle().await;
    handle.shutdown().await;
    presenter.flush().await;
    bar.finish_and_clear();
    let snapshot = snapshot.context("Pipeline stopped unexpectedly")?;

    report_outputs(&output_dir, &presenter.written());
    check_outcome(&snapshot, cli.background.is_some(), &input_path)?;

    let elapsed = start_time.elapsed();
    events::performance_metric("rmbg", elapsed.as_millis() as u64);
    info!("Finished in {:.2}s", elapsed.as_secs_f64());
    Ok(())
}

fn report_outputs(output_dir: &Path, written: &[PathBuf]) {
    let _span = spans::file_output(output_dir).entered();
    for path in written {
        println!("✅ Saved {}", path.display());
    }
    if written.is_empty() {
        warn!("No output files were written to {}", output_dir.display());
    }
}

/// Fail unless every requested output was produced
fn check_outcome(snapshot: &PipelineSnapshot, wants_composite: bool, input: &Path) -> Result<()> {
    if snapshot.foreground_result.is_none() {
        anyhow::bail!("Could not cut out the foreground of {}", input.display());
    }
    if wants_composite && snapshot.composite_result.is_none() {
        anyhow::bail!("Could not compose {} over the background", input.display());
    }
    Ok(())
}

fn create_spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Prints status lines above the spinner
struct CliStatusSink {
    bar: ProgressBar,
}

impl CliStatusSink {
    fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl StatusSink for CliStatusSink {
    fn append(&self, message: &str) {
        tracing::info!(target: "rmbg::status", "{}", message);
        self.bar.suspend(|| println!("  {}", message));
    }
}

/// Shows the current stage as the spinner message
struct CliProgressReporter {
    bar: ProgressBar,
}

impl CliProgressReporter {
    fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl ProgressReporter for CliProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        self.bar
            .set_message(format!("{} ({}%)", update.description, update.progress));
    }

    fn report_error(&self, stage: PipelineStage, error: &str) {
        self.bar
            .set_message(format!("{} failed: {}", stage.description(), error));
    }
}

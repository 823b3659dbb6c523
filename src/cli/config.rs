//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::{Cli, CliExecutionProvider, CliOutputFormat};
use crate::{
    config::{ExecutionProvider, OutputFormat, PipelineConfig, PipelineConfigBuilder},
    types::ModelSelector,
};
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

/// Segmentation timeout used when neither a flag nor the config file sets one
pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Convert CLI arguments to a `PipelineConfig`
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build a `PipelineConfig` from the optional config file, then apply flags
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let base = match &cli.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        let timeout = match (cli.timeout_secs, base.segmentation_timeout) {
            (Some(secs), _) => Duration::from_secs(secs),
            (None, Some(timeout)) => timeout,
            (None, None) => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let mut builder = PipelineConfigBuilder::from(base).segmentation_timeout(timeout);

        if let Some(format) = cli.format {
            builder = builder.output_format(Self::output_format(format));
        }
        if let Some(quality) = cli.jpeg_quality {
            builder = builder.jpeg_quality(quality);
        }
        if let Some(provider) = cli.execution_provider {
            builder = builder.execution_provider(Self::execution_provider(provider));
        }
        if let Some(threads) = cli.threads {
            builder = builder.intra_threads(threads);
        }
        if let Some(model_path) = &cli.model_path {
            builder = builder.model_path(model_path);
        }

        let config = builder.build().context("Invalid configuration")?;
        Ok(config)
    }

    fn output_format(format: CliOutputFormat) -> OutputFormat {
        match format {
            CliOutputFormat::Png => OutputFormat::Png,
            CliOutputFormat::Jpeg => OutputFormat::Jpeg,
            CliOutputFormat::Webp => OutputFormat::WebP,
            CliOutputFormat::Tiff => OutputFormat::Tiff,
        }
    }

    fn execution_provider(provider: CliExecutionProvider) -> ExecutionProvider {
        match provider {
            CliExecutionProvider::Auto => ExecutionProvider::Auto,
            CliExecutionProvider::Cpu => ExecutionProvider::Cpu,
            CliExecutionProvider::Cuda => ExecutionProvider::Cuda,
            CliExecutionProvider::Coreml => ExecutionProvider::CoreMl,
        }
    }

    /// Validate CLI arguments for consistency
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if let Some(input) = &cli.input {
            Self::require_file(input, "Input image")?;
        }
        if let Some(background) = &cli.background {
            Self::require_file(background, "Background image")?;
        }
        if let Some(config) = &cli.config {
            Self::require_file(config, "Config file")?;
        }

        if let Some(quality) = cli.jpeg_quality {
            if quality > 100 {
                anyhow::bail!("JPEG quality must be between 0 and 100, got {}", quality);
            }
        }
        if cli.timeout_secs == Some(0) {
            anyhow::bail!("Timeout must be at least one second");
        }

        ModelSelector::new(cli.model.as_str()).context("Invalid model specification")?;

        Ok(())
    }

    fn require_file(path: &Path, what: &str) -> Result<()> {
        if !path.is_file() {
            anyhow::bail!("{} not found: {}", what, path.display());
        }
        Ok(())
    }
}

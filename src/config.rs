//! Configuration types for the pipeline, the compositor and segmentation runtimes

use crate::error::{Result, RmbgError};
use image::imageops::FilterType;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Execution provider hint forwarded to segmentation runtimes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Encoded output format of the composite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG with alpha channel
    #[default]
    Png,
    /// JPEG (alpha dropped; fine for a flattened composite)
    Jpeg,
    /// TIFF with alpha channel
    Tiff,
    /// Lossless WebP with alpha channel (requires `webp-support`)
    WebP,
}

impl OutputFormat {
    /// Matching `image` crate format
    #[must_use]
    pub fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Tiff => ImageFormat::Tiff,
            Self::WebP => ImageFormat::WebP,
        }
    }
}

/// Resampling filter used when stretching the background onto the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFilter {
    Nearest,
    /// Bilinear; closest to a browser canvas `drawImage`
    #[default]
    Triangle,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Configuration handed to segmentation backends untouched by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Execution provider hint
    pub execution_provider: ExecutionProvider,
    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,
    /// Square input resolution expected by the model
    pub model_resolution: u32,
    /// Location of the model weights, if the backend needs one
    pub model_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            execution_provider: ExecutionProvider::Auto,
            intra_threads: 0,
            model_resolution: 320,
            model_path: None,
        }
    }
}

/// Compositor output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Output format of the composite
    pub output_format: OutputFormat,
    /// JPEG quality (0-100, only used for JPEG output)
    pub jpeg_quality: u8,
    /// Filter used to stretch the background
    pub resize_filter: ResizeFilter,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::Png,
            jpeg_quality: 90,
            resize_filter: ResizeFilter::Triangle,
        }
    }
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Runtime configuration passed to every segmentation call
    pub runtime: RuntimeConfig,
    /// Compositor settings
    pub compositor: CompositorConfig,
    /// Upper bound on a single segmentation call (None = wait indefinitely)
    #[serde(with = "duration_ms")]
    pub segmentation_timeout: Option<Duration>,
    /// File stem suggested to the presenter for composite exports
    pub export_basename: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            compositor: CompositorConfig::default(),
            segmentation_timeout: None,
            export_basename: "background-replaced".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use rmbg::{OutputFormat, PipelineConfig};
    /// use std::time::Duration;
    ///
    /// let config = PipelineConfig::builder()
    ///     .output_format(OutputFormat::Jpeg)
    ///     .jpeg_quality(85)
    ///     .segmentation_timeout(Duration::from_secs(30))
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.compositor.jpeg_quality, 85);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref)
            .map_err(|e| RmbgError::file_io_error("read config file", path_ref, &e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            RmbgError::invalid_config(format!(
                "Failed to parse '{}': {}",
                path_ref.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - JPEG quality outside 0-100
    /// - Zero model resolution
    /// - Zero segmentation timeout
    /// - Empty export basename
    pub fn validate(&self) -> Result<()> {
        if self.compositor.jpeg_quality > 100 {
            return Err(RmbgError::config_value_error(
                "JPEG quality",
                self.compositor.jpeg_quality,
                "0-100",
                Some(90),
            ));
        }

        if self.runtime.model_resolution == 0 {
            return Err(RmbgError::config_value_error(
                "model resolution",
                self.runtime.model_resolution,
                "1+",
                Some(320),
            ));
        }

        if self.segmentation_timeout == Some(Duration::ZERO) {
            return Err(RmbgError::invalid_config(
                "segmentation timeout must be greater than zero",
            ));
        }

        if self.export_basename.trim().is_empty() {
            return Err(RmbgError::invalid_config("export basename must not be empty"));
        }

        Ok(())
    }

    /// Suggested export filename for composites, e.g. `background-replaced.png`
    #[must_use]
    pub fn export_filename(&self) -> String {
        format!(
            "{}.{}",
            self.export_basename,
            crate::services::OutputFormatHandler::get_extension(self.compositor.output_format)
        )
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.config.runtime = runtime;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.runtime.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn model_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.runtime.model_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn model_resolution(mut self, resolution: u32) -> Self {
        self.config.runtime.model_resolution = resolution;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.runtime.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.compositor.output_format = format;
        self
    }

    /// Set JPEG quality (clamped to 100)
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.compositor.jpeg_quality = quality.min(100);
        self
    }

    #[must_use]
    pub fn resize_filter(mut self, filter: ResizeFilter) -> Self {
        self.config.compositor.resize_filter = filter;
        self
    }

    #[must_use]
    pub fn segmentation_timeout(mut self, timeout: Duration) -> Self {
        self.config.segmentation_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn export_basename<S: Into<String>>(mut self, basename: S) -> Self {
        self.config.export_basename = basename.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl From<PipelineConfig> for PipelineConfigBuilder {
    /// Start from an existing configuration, e.g. one loaded from a file
    fn from(config: PipelineConfig) -> Self {
        Self { config }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(crate) fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.compositor.output_format, OutputFormat::Png);
        assert_eq!(config.runtime.model_resolution, 320);
        assert!(config.segmentation_timeout.is_none());
        assert_eq!(config.export_filename(), "background-replaced.png");
    }

    #[test]
    fn test_builder_clamps_and_validates() {
        let config = PipelineConfig::builder()
            .jpeg_quality(150)
            .output_format(OutputFormat::Jpeg)
            .build()
            .unwrap();
        assert_eq!(config.compositor.jpeg_quality, 100);
        assert_eq!(config.export_filename(), "background-replaced.jpg");

        assert!(PipelineConfig::builder().model_resolution(0).build().is_err());
        assert!(PipelineConfig::builder()
            .segmentation_timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(PipelineConfig::builder().export_basename("  ").build().is_err());
    }

    #[test]
    fn test_manual_validation_failure() {
        let mut config = PipelineConfig::default();
        config.compositor.jpeg_quality = 101;

        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("JPEG quality"));
        assert!(error.to_string().contains("101"));
    }

    #[test]
    fn test_config_json_roundtrip_with_timeout() {
        let config = PipelineConfig::builder()
            .segmentation_timeout(Duration::from_millis(2500))
            .resize_filter(ResizeFilter::Lanczos3)
            .execution_provider(ExecutionProvider::Cuda)
            .build()
            .unwrap();

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"segmentation_timeout\":2500"));
        assert!(json.contains("\"lanczos3\""));
        assert!(json.contains("\"cuda\""));

        let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let parsed: PipelineConfig =
            serde_json::from_str(r#"{"compositor": {"output_format": "jpeg"}}"#).unwrap();
        assert_eq!(parsed.compositor.output_format, OutputFormat::Jpeg);
        assert_eq!(parsed.compositor.jpeg_quality, 90);
        assert_eq!(parsed.segmentation_timeout, None);
        assert_eq!(parsed.export_basename, "background-replaced");
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rmbg.json");
        std::fs::write(&path, r#"{"runtime": {"model_resolution": 512}}"#).unwrap();
        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.runtime.model_resolution, 512);

        std::fs::write(&path, r#"{"runtime": {"model_resolution": 0}}"#).unwrap();
        assert!(PipelineConfig::from_json_file(&path).is_err());

        std::fs::write(&path, "not json").unwrap();
        let err = PipelineConfig::from_json_file(&path).unwrap_err();
        assert!(matches!(err, RmbgError::InvalidConfig(_)));
    }

    #[test]
    fn test_filter_conversion() {
        assert_eq!(FilterType::from(ResizeFilter::Nearest), FilterType::Nearest);
        assert_eq!(FilterType::from(ResizeFilter::default()), FilterType::Triangle);
        assert_eq!(OutputFormat::Tiff.image_format(), ImageFormat::Tiff);
    }
}

#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # rmbg: Background Removal and Replacement
//!
//! An asynchronous pipeline that cuts the foreground out of an image with a
//! pluggable segmentation model and composes it over a replacement
//! background.
//!
//! ## Features
//!
//! - **Pluggable Models**: segmenters are looked up by name in an explicit [`ModelRegistry`]
//! - **Latest Input Wins**: results of superseded segmentation calls are discarded, never shown
//! - **Compositing**: background stretched to the foreground canvas, source-over blending
//! - **Bounded Calls**: optional per-call segmentation timeout
//! - **ONNX Runtime**: MODNet, Silueta, BRIA RMBG and U2-Net-P style matting models (`onnx` feature)
//! - **CLI Integration**: optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rmbg::{
//!     backends::AlphaPassthroughSegmenter, FilePresenter, ImageResource, ModelRegistry,
//!     ModelSelector, Pipeline, PipelineConfig,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let model = ModelSelector::new("alpha")?;
//! let mut registry = ModelRegistry::new();
//! registry.register_instance(model.clone(), Arc::new(AlphaPassthroughSegmenter));
//!
//! let config = PipelineConfig::builder()
//!     .segmentation_timeout(Duration::from_secs(60))
//!     .build()?;
//! let handle = Pipeline::builder(registry)
//!     .config(config)
//!     .model(model)
//!     .presenter(Arc::new(FilePresenter::new("out")?))
//!     .build()?
//!     .spawn();
//!
//! handle.select_input(ImageResource::from_path("portrait-cutout.png").await?)?;
//! handle.select_background(ImageResource::from_path("beach.jpg").await?)?;
//! let snapshot = handle.wait_until_idle().await?;
//! assert!(snapshot.composite_result.is_some());
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): `rmbg` binary, spinner progress and tracing subscriber setup
//! - `webp-support` (default): WebP decoding and encoding
//! - `onnx`: ONNX Runtime segmenter
//! - `tracing-json`: JSON log output for the CLI
//!
//! ### Library-Only Usage
//!
//! ```toml
//! [dependencies]
//! rmbg = { version = "0.1", default-features = false, features = ["onnx"] }
//! ```

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod segmentation;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;

// Public API exports
pub use config::{
    CompositorConfig, ExecutionProvider, OutputFormat, PipelineConfig, PipelineConfigBuilder,
    ResizeFilter, RuntimeConfig,
};
pub use error::{Result, RmbgError};
pub use pipeline::{
    Pipeline, PipelineBuilder, PipelineHandle, PipelinePhase, PipelineSnapshot, SegmentationToken,
};
pub use segmentation::{ModelRegistry, SegmentationInvoker, Segmenter, SegmenterFactory};
pub use services::{
    cutout_filename, Compositor, FilePresenter, HandleRegistry, ImageInfo, ImageLoader,
    MemoryStatusSink, NoOpPresenter, NoOpProgressReporter, NoOpStatusSink, OutputFormatHandler,
    PipelineStage, PreviewKind, Presenter, ProgressReporter, ProgressTracker, ProgressUpdate,
    StatusEntry, StatusSink, TracingProgressReporter, TracingStatusSink,
};
pub use types::{ImageResource, ModelSelector, RasterHandle};

#[cfg(feature = "cli")]
pub use tracing_config::{events, init_cli_tracing, spans, TracingConfig, TracingFormat};

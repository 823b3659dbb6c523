//! Progress reporting service
//!
//! This module separates progress reporting concerns from business logic,
//! allowing different frontends to implement their own progress handling.

use instant::Instant;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Progress stages of a segmentation or composition run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Creating the segmenter and loading model weights
    ModelLoading,
    /// Preparing the input for inference
    Preprocessing,
    /// Running model inference
    Inference,
    /// Turning the model output into a cutout
    Postprocessing,
    /// Decoding foreground and background rasters
    Decoding,
    /// Drawing the canvas
    Compositing,
    /// Encoding the composite
    Encoding,
    /// Run completed
    Completed,
}

impl PipelineStage {
    /// Get a human-readable description of the stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            PipelineStage::ModelLoading => "Loading segmentation model",
            PipelineStage::Preprocessing => "Preprocessing image",
            PipelineStage::Inference => "Running segmentation",
            PipelineStage::Postprocessing => "Generating cutout",
            PipelineStage::Decoding => "Decoding images",
            PipelineStage::Compositing => "Compositing onto background",
            PipelineStage::Encoding => "Encoding composite",
            PipelineStage::Completed => "Completed",
        }
    }

    /// Get the nominal progress percentage for this stage
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            PipelineStage::ModelLoading => 5,
            PipelineStage::Preprocessing => 20,
            PipelineStage::Inference => 60,
            PipelineStage::Postprocessing => 80,
            PipelineStage::Decoding => 85,
            PipelineStage::Compositing => 90,
            PipelineStage::Encoding => 95,
            PipelineStage::Completed => 100,
        }
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Current stage
    pub stage: PipelineStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human-readable stage description
    pub description: String,
    /// Elapsed time since the run started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    /// Create a new progress update
    #[must_use]
    pub fn new(stage: PipelineStage, start_time: Instant) -> Self {
        Self {
            progress: stage.progress_percentage(),
            description: stage.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
        }
    }

    /// Create a progress update with custom description
    #[must_use]
    pub fn with_description(stage: PipelineStage, description: String, start_time: Instant) -> Self {
        Self {
            progress: stage.progress_percentage(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
            description,
        }
    }

    /// Override the nominal percentage (clamped to 100)
    #[must_use]
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = progress.min(100);
        self
    }
}

/// Trait for reporting progress of segmentation and composition runs
pub trait ProgressReporter: Send + Sync {
    /// Report a progress update
    fn report_progress(&self, update: ProgressUpdate);

    /// Report an error during a run
    fn report_error(&self, stage: PipelineStage, error: &str);
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_error(&self, _stage: PipelineStage, _error: &str) {}
}

/// Reporter that forwards updates as `tracing` events
pub struct TracingProgressReporter {
    verbose: bool,
}

impl TracingProgressReporter {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for TracingProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            tracing::info!(
                stage = ?update.stage,
                progress = update.progress,
                elapsed_ms = update.elapsed_ms,
                "{}",
                update.description
            );
        } else {
            tracing::debug!(progress = update.progress, "{}", update.description);
        }
    }

    fn report_error(&self, stage: PipelineStage, error: &str) {
        tracing::error!(stage = ?stage, "Error during {}: {}", stage.description(), error);
    }
}

/// Forwards updates only while its token is still the current one
///
/// The orchestrator hands one of these to each segmentation call and each
/// composition, so superseded work cannot drive the progress display.
pub struct StaleAwareProgress {
    inner: Arc<dyn ProgressReporter>,
    token: u64,
    current: Arc<AtomicU64>,
}

impl StaleAwareProgress {
    #[must_use]
    pub fn new(inner: Arc<dyn ProgressReporter>, token: u64, current: Arc<AtomicU64>) -> Self {
        Self {
            inner,
            token,
            current,
        }
    }

    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.token
    }
}

impl ProgressReporter for StaleAwareProgress {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.is_current() {
            self.inner.report_progress(update);
        }
    }

    fn report_error(&self, stage: PipelineStage, error: &str) {
        if self.is_current() {
            self.inner.report_error(stage, error);
        }
    }
}

/// Progress tracker that manages stage reporting with a shared start time
pub struct ProgressTracker<'a> {
    reporter: &'a dyn ProgressReporter,
    start_time: Instant,
    current_stage: Option<PipelineStage>,
}

impl<'a> ProgressTracker<'a> {
    /// Create a new progress tracker around the specified reporter
    #[must_use]
    pub fn new(reporter: &'a dyn ProgressReporter) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            current_stage: None,
        }
    }

    /// Report progress for a specific stage
    pub fn report_stage(&mut self, stage: PipelineStage) {
        self.current_stage = Some(stage);
        self.reporter
            .report_progress(ProgressUpdate::new(stage, self.start_time));
    }

    /// Report progress with custom description
    pub fn report_stage_with_description(&mut self, stage: PipelineStage, description: String) {
        self.current_stage = Some(stage);
        self.reporter.report_progress(ProgressUpdate::with_description(
            stage,
            description,
            self.start_time,
        ));
    }

    /// Report an error against the current stage
    pub fn report_error(&self, error: &str) {
        let stage = self.current_stage.unwrap_or(PipelineStage::ModelLoading);
        self.reporter.report_error(stage, error);
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    #[must_use]
    pub fn current_stage(&self) -> Option<PipelineStage> {
        self.current_stage
    }
}

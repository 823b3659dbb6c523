//! Segmenter for images that are already cut out

use crate::{
    config::RuntimeConfig,
    error::{Result, RmbgError},
    segmentation::Segmenter,
    services::{OutputFormatHandler, PipelineStage, ProgressReporter, ProgressTracker},
    types::ImageResource,
};
use async_trait::async_trait;

/// Uses the input's own alpha channel as the segmentation result
///
/// Opaque inputs come back fully opaque, so composing them hides the
/// background entirely. Useful for recomposing existing cutouts.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlphaPassthroughSegmenter;

impl AlphaPassthroughSegmenter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Segmenter for AlphaPassthroughSegmenter {
    fn name(&self) -> &str {
        "alpha-passthrough"
    }

    async fn segment(
        &self,
        input: &ImageResource,
        _runtime: &RuntimeConfig,
        progress: &dyn ProgressReporter,
    ) -> Result<ImageResource> {
        let mut tracker = ProgressTracker::new(progress);
        tracker.report_stage(PipelineStage::Postprocessing);

        let owned = input.clone();
        tokio::task::spawn_blocking(move || {
            let decoded = image::load_from_memory(owned.bytes())
                .map_err(|e| RmbgError::segmentation(format!("failed to decode input: {}", e)))?;
            OutputFormatHandler::encode_png(&decoded.to_rgba8())
        })
        .await
        .map_err(|e| RmbgError::segmentation(format!("passthrough task failed: {}", e)))?
    }
}

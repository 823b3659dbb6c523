//! Two-layer raster compositor
//!
//! The canvas takes the foreground's native size. The background is stretched
//! onto it, then the foreground is drawn unscaled at the origin using
//! source-over blending.

use crate::{
    config::CompositorConfig,
    error::{Result, RmbgError},
    services::{
        NoOpProgressReporter, OutputFormatHandler, PipelineStage, ProgressReporter,
        ProgressTracker,
    },
    types::{ImageResource, RasterHandle},
};
use image::{imageops, Rgba, RgbaImage};
use tracing::{debug, instrument};

/// Stretches a background under a foreground and encodes the result
#[derive(Debug, Clone, Default)]
pub struct Compositor {
    config: CompositorConfig,
}

impl Compositor {
    #[must_use]
    pub fn new(config: CompositorConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Compose and encode the flattened canvas
    ///
    /// # Errors
    /// - `Composition` when either input is zero-sized or encoding fails
    pub async fn compose(
        &self,
        foreground: RasterHandle,
        background: RasterHandle,
    ) -> Result<ImageResource> {
        self.compose_with_progress(foreground, background, &NoOpProgressReporter)
            .await
    }

    /// Like [`Self::compose`], reporting the compositing and encoding stages
    ///
    /// Both stages run on the blocking pool. The handles are released once
    /// the canvas is drawn, before encoding starts.
    ///
    /// # Errors
    /// - `Composition` when either input is zero-sized or encoding fails
    #[instrument(skip_all, fields(fg = ?foreground.dimensions(), bg = ?background.dimensions()))]
    pub async fn compose_with_progress(
        &self,
        foreground: RasterHandle,
        background: RasterHandle,
        progress: &dyn ProgressReporter,
    ) -> Result<ImageResource> {
        let mut tracker = ProgressTracker::new(progress);

        tracker.report_stage(PipelineStage::Compositing);
        let compositor = self.clone();
        let canvas = run_blocking("compose", move || {
            compositor.compose_rgba(&foreground, &background)
        })
        .await?;

        tracker.report_stage(PipelineStage::Encoding);
        let config = self.config.clone();
        let encoded = run_blocking("encode", move || OutputFormatHandler::encode(canvas, &config))
            .await?;

        debug!(
            bytes = encoded.len(),
            elapsed_ms = tracker.elapsed_ms(),
            "composite encoded"
        );
        Ok(encoded)
    }

    /// Compose into a raw RGBA canvas without encoding
    ///
    /// # Errors
    /// - `Composition` when either input is zero-sized
    pub fn compose_rgba(
        &self,
        foreground: &RasterHandle,
        background: &RasterHandle,
    ) -> Result<RgbaImage> {
        if foreground.is_degenerate() {
            return Err(RmbgError::composition(format!(
                "foreground has zero dimensions {:?}",
                foreground.dimensions()
            )));
        }
        if background.is_degenerate() {
            return Err(RmbgError::composition(format!(
                "background has zero dimensions {:?}",
                background.dimensions()
            )));
        }

        let (width, height) = foreground.dimensions();
        let mut canvas = if background.dimensions() == (width, height) {
            background.as_rgba().clone()
        } else {
            imageops::resize(
                background.as_rgba(),
                width,
                height,
                self.config.resize_filter.into(),
            )
        };

        for (dst, src) in canvas.pixels_mut().zip(foreground.as_rgba().pixels()) {
            *dst = source_over(*src, *dst);
        }

        Ok(canvas)
    }
}

async fn run_blocking<T, F>(what: &str, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| RmbgError::composition(format!("{} task failed: {}", what, e)))?
}

/// Porter-Duff source-over of one straight-alpha pixel onto another
fn source_over(src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    match src[3] {
        0 => dst,
        255 => src,
        sa => {
            let sa = f32::from(sa) / 255.0;
            let da = f32::from(dst[3]) / 255.0;
            let out_a = sa + da * (1.0 - sa);

            let mut out = [0_u8; 4];
            for c in 0..3 {
                let blended =
                    (f32::from(src[c]) * sa + f32::from(dst[c]) * da * (1.0 - sa)) / out_a;
                out[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
            out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
            Rgba(out)
        },
    }
}

//! Test utilities and mock segmenters
//!
//! Provides a configurable [`MockSegmenter`] so the invoker and the pipeline
//! can be tested without model files or an inference runtime.

use crate::{
    config::RuntimeConfig,
    error::{Result, RmbgError},
    segmentation::Segmenter,
    services::{OutputFormatHandler, PipelineStage, ProgressReporter, ProgressUpdate},
    types::ImageResource,
};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use instant::Instant;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Side length of the transparent top-left corner in mock cutouts
pub const MOCK_CORNER: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockOutput {
    /// Input pixels with a transparent top-left corner
    Cutout,
    /// RGB output without alpha
    Opaque,
    /// Cutout at half the input size
    WrongSize,
}

/// Mock segmenter for testing
#[derive(Debug, Clone)]
pub struct MockSegmenter {
    /// Short ids of every input seen, in call order
    call_history: Arc<Mutex<Vec<String>>>,
    /// Inputs whose calls block until released
    gates: Arc<Mutex<HashMap<[u8; 32], Arc<Semaphore>>>>,
    should_fail: bool,
    output: MockOutput,
    delay: Option<Duration>,
}

impl MockSegmenter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            call_history: Arc::new(Mutex::new(Vec::new())),
            gates: Arc::new(Mutex::new(HashMap::new())),
            should_fail: false,
            output: MockOutput::Cutout,
            delay: None,
        }
    }

    /// Create a mock segmenter that fails every call
    #[must_use]
    pub fn failing() -> Self {
        let mut segmenter = Self::new();
        segmenter.should_fail = true;
        segmenter
    }

    #[must_use]
    pub fn opaque_output() -> Self {
        let mut segmenter = Self::new();
        segmenter.output = MockOutput::Opaque;
        segmenter
    }

    #[must_use]
    pub fn wrong_size_output() -> Self {
        let mut segmenter = Self::new();
        segmenter.output = MockOutput::WrongSize;
        segmenter
    }

    /// Sleep for `delay` before resolving
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make calls for `input` block until [`Self::release`] is called
    pub fn hold(&self, input: &ImageResource) {
        self.gates
            .lock()
            .unwrap()
            .insert(*input.digest(), Arc::new(Semaphore::new(0)));
    }

    /// Let one held call for `input` proceed
    pub fn release(&self, input: &ImageResource) {
        if let Some(gate) = self.gates.lock().unwrap().get(input.digest()) {
            gate.add_permits(1);
        }
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_history.lock().unwrap().len()
    }

    #[must_use]
    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    fn record_call(&self, input: &ImageResource) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(input.short_id());
        }
    }

    fn gate_for(&self, input: &ImageResource) -> Option<Arc<Semaphore>> {
        self.gates.lock().unwrap().get(input.digest()).cloned()
    }

    fn generate_output(&self, input: &ImageResource) -> Result<ImageResource> {
        let decoded = image::load_from_memory(input.bytes())
            .map_err(|e| RmbgError::segmentation(format!("mock decode failed: {}", e)))?;

        match self.output {
            MockOutput::Cutout => OutputFormatHandler::encode_png(&transparent_corner(&decoded)),
            MockOutput::Opaque => Ok(png_resource(&DynamicImage::ImageRgb8(decoded.to_rgb8()))),
            MockOutput::WrongSize => {
                let half = decoded.thumbnail_exact(
                    (decoded.width() / 2).max(1),
                    (decoded.height() / 2).max(1),
                );
                OutputFormatHandler::encode_png(&half.to_rgba8())
            },
        }
    }
}

impl Default for MockSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Segmenter for MockSegmenter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn segment(
        &self,
        input: &ImageResource,
        _runtime: &RuntimeConfig,
        progress: &dyn ProgressReporter,
    ) -> Result<ImageResource> {
        self.record_call(input);
        let start = Instant::now();
        progress.report_progress(ProgressUpdate::new(PipelineStage::Inference, start));

        if let Some(gate) = self.gate_for(input) {
            gate.acquire()
                .await
                .map_err(|e| RmbgError::segmentation(e.to_string()))?
                .forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail {
            return Err(RmbgError::segmentation("Mock segmenter inference failed"));
        }
        self.generate_output(input)
    }
}

/// The input's pixels with the top-left `MOCK_CORNER` square made fully transparent
#[must_use]
pub fn transparent_corner(image: &DynamicImage) -> RgbaImage {
    let mut rgba = image.to_rgba8();
    for y in 0..MOCK_CORNER.min(rgba.height()) {
        for x in 0..MOCK_CORNER.min(rgba.width()) {
            let p = rgba.get_pixel(x, y);
            rgba.put_pixel(x, y, Rgba([p[0], p[1], p[2], 0]));
        }
    }
    rgba
}

/// Encode an image as a PNG resource
#[must_use]
pub fn png_resource(image: &DynamicImage) -> ImageResource {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    ImageResource::from_bytes(out.into_inner()).with_format(ImageFormat::Png)
}

/// Solid-colour PNG resource
#[must_use]
pub fn solid_png(width: u32, height: u32, rgba: [u8; 4]) -> ImageResource {
    png_resource(&DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        width,
        height,
        Rgba(rgba),
    )))
}

//! Shared helpers for pipeline integration tests
//!
//! [`ScriptedSegmenter`] stands in for a real model: it cuts a transparent
//! square out of the top-left corner and can be told to hold, fail or count
//! calls per input.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use rmbg::{
    ImageResource, MemoryStatusSink, ModelRegistry, ModelSelector, NoOpProgressReporter,
    OutputFormatHandler, Pipeline, PipelineConfig, PipelineHandle, ProgressReporter, RmbgError,
    RuntimeConfig, Segmenter,
};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Side length of the transparent corner in scripted cutouts
pub const CORNER: u32 = 100;

/// Upper bound for any single wait in these tests
pub const WAIT: Duration = Duration::from_secs(10);

type Digest = [u8; 32];

#[derive(Debug, Default)]
struct Script {
    gates: HashMap<Digest, Arc<Semaphore>>,
    failing: HashSet<Digest>,
    truncating: HashSet<Digest>,
    calls: Vec<Digest>,
}

/// Segmenter whose behaviour is scripted per input image
#[derive(Debug, Clone, Default)]
pub struct ScriptedSegmenter {
    script: Arc<Mutex<Script>>,
    started: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl ScriptedSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls for `input` wait until [`Self::release`]
    pub fn hold(&self, input: &ImageResource) {
        self.script
            .lock()
            .unwrap()
            .gates
            .insert(*input.digest(), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, input: &ImageResource) {
        if let Some(gate) = self.script.lock().unwrap().gates.get(input.digest()) {
            gate.add_permits(1);
        }
    }

    /// Calls for `input` return an error
    pub fn fail_for(&self, input: &ImageResource) {
        self.script
            .lock()
            .unwrap()
            .failing
            .insert(*input.digest());
    }

    /// Calls for `input` return a cutout whose header is valid but whose body is cut short
    pub fn truncate_for(&self, input: &ImageResource) {
        self.script
            .lock()
            .unwrap()
            .truncating
            .insert(*input.digest());
    }

    /// Calls started so far
    pub fn calls(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Calls that ran to completion
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, input: &ImageResource) -> usize {
        let script = self.script.lock().unwrap();
        script
            .calls
            .iter()
            .filter(|digest| *digest == input.digest())
            .count()
    }

    /// Wait until `count` calls have started
    pub async fn wait_for_calls(&self, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.calls() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("segmentation call did not start in time");
    }
}

#[async_trait]
impl Segmenter for ScriptedSegmenter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn segment(
        &self,
        input: &ImageResource,
        _runtime: &RuntimeConfig,
        _progress: &dyn ProgressReporter,
    ) -> rmbg::Result<ImageResource> {
        let (gate, fail, truncate) = {
            let mut script = self.script.lock().unwrap();
            script.calls.push(*input.digest());
            (
                script.gates.get(input.digest()).cloned(),
                script.failing.contains(input.digest()),
                script.truncating.contains(input.digest()),
            )
        };
        self.started.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|e| RmbgError::segmentation(e.to_string()))?
                .forget();
        }
        self.finished.fetch_add(1, Ordering::SeqCst);

        if fail {
            return Err(RmbgError::segmentation("scripted failure"));
        }
        let decoded = image::load_from_memory(input.bytes())
            .map_err(|e| RmbgError::segmentation(e.to_string()))?;
        let cutout = OutputFormatHandler::encode_png(&cut_corner(&decoded))?;
        if truncate {
            return Ok(truncated(&cutout));
        }
        Ok(cutout)
    }
}

/// First 60 bytes of a PNG: the header still parses, the pixel data does not
pub fn truncated(resource: &ImageResource) -> ImageResource {
    ImageResource::from_bytes(resource.bytes()[..60].to_vec())
}

/// The image's pixels with a fully transparent `CORNER`×`CORNER` top-left square
pub fn cut_corner(image: &DynamicImage) -> RgbaImage {
    let mut rgba = image.to_rgba8();
    for y in 0..CORNER.min(rgba.height()) {
        for x in 0..CORNER.min(rgba.width()) {
            rgba.get_pixel_mut(x, y)[3] = 0;
        }
    }
    rgba
}

/// Opaque RGB image whose pixels depend on `seed`, encoded as `format`
pub fn photo(width: u32, height: u32, seed: u8, format: ImageFormat) -> ImageResource {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x % 256) as u8 ^ seed,
            (y % 256) as u8,
            ((x + y) % 256) as u8 ^ seed.rotate_left(3),
        ])
    });
    encode(&DynamicImage::ImageRgb8(image), format)
}

/// Solid-colour RGBA PNG
pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> ImageResource {
    encode(
        &DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(rgba))),
        ImageFormat::Png,
    )
}

pub fn encode(image: &DynamicImage, format: ImageFormat) -> ImageResource {
    let mut out = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
            .write_to(&mut out, format)
            .unwrap(),
        _ => image.write_to(&mut out, format).unwrap(),
    }
    ImageResource::from_bytes(out.into_inner()).with_format(format)
}

pub fn decode(resource: &ImageResource) -> RgbaImage {
    image::load_from_memory(resource.bytes())
        .expect("resource should decode")
        .to_rgba8()
}

pub fn model(name: &str) -> ModelSelector {
    ModelSelector::new(name).unwrap()
}

/// Registry with `segmenter` registered under `name`
pub fn registry_with(name: &str, segmenter: &ScriptedSegmenter) -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    registry.register_instance(model(name), Arc::new(segmenter.clone()));
    registry
}

/// A running pipeline with a scripted "modnet" model and an in-memory status log
pub struct Harness {
    pub handle: PipelineHandle,
    pub segmenter: ScriptedSegmenter,
    pub status: MemoryStatusSink,
}

impl Harness {
    pub fn start() -> Self {
        Self::start_with(PipelineConfig::default())
    }

    pub fn start_with(config: PipelineConfig) -> Self {
        let segmenter = ScriptedSegmenter::new();
        let status = MemoryStatusSink::new();
        let handle = Pipeline::builder(registry_with("modnet", &segmenter))
            .config(config)
            .status_sink(Arc::new(status.clone()))
            .progress_reporter(Arc::new(NoOpProgressReporter))
            .build()
            .unwrap()
            .spawn();
        Self {
            handle,
            segmenter,
            status,
        }
    }

    pub async fn idle(&self) -> rmbg::PipelineSnapshot {
        tokio::time::timeout(WAIT, self.handle.wait_until_idle())
            .await
            .expect("pipeline did not become idle in time")
            .unwrap()
    }
}

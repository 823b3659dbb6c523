//! ONNX Runtime segmenter for single-input matting models
//!
//! Runs models such as MODNet, Silueta, BRIA RMBG or U2-Net-P that take a
//! normalized square RGB tensor and produce a single-channel mask.

use crate::{
    config::{ExecutionProvider, RuntimeConfig},
    error::{Result, RmbgError},
    segmentation::Segmenter,
    services::{OutputFormatHandler, PipelineStage, ProgressReporter, ProgressTracker},
    types::ImageResource,
};
use async_trait::async_trait;
use image::{imageops, imageops::FilterType, DynamicImage, GrayImage, Luma, RgbaImage};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Resolve the weights file for `model` from the runtime configuration
///
/// A directory in `model_path` is searched for `<model>.onnx`; a file is
/// used as is.
///
/// # Errors
/// - `InvalidConfig` when no model path is configured or the file is missing
pub fn resolve_model_file(runtime: &RuntimeConfig, model: &str) -> Result<PathBuf> {
    let base = runtime.model_path.as_ref().ok_or_else(|| {
        RmbgError::invalid_config(format!(
            "model '{}' needs a model path (file or directory containing {}.onnx)",
            model, model
        ))
    })?;

    let candidate = if base.is_dir() {
        base.join(format!("{}.onnx", model))
    } else {
        base.clone()
    };
    if !candidate.is_file() {
        return Err(RmbgError::invalid_config(format!(
            "model file '{}' not found",
            candidate.display()
        )));
    }
    Ok(candidate)
}

/// ONNX Runtime segmenter; the session is created on first use
pub struct OnnxSegmenter {
    name: String,
    model_file: PathBuf,
    session: Arc<Mutex<Option<Session>>>,
}

impl OnnxSegmenter {
    #[must_use]
    pub fn new<S: Into<String>, P: Into<PathBuf>>(name: S, model_file: P) -> Self {
        Self {
            name: name.into(),
            model_file: model_file.into(),
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Build a segmenter for `model`, locating its weights via [`resolve_model_file`]
    ///
    /// # Errors
    /// - `InvalidConfig` when the weights cannot be found
    pub fn from_runtime(model: &str, runtime: &RuntimeConfig) -> Result<Self> {
        Ok(Self::new(model, resolve_model_file(runtime, model)?))
    }

    #[must_use]
    pub fn model_file(&self) -> &Path {
        &self.model_file
    }
}

impl std::fmt::Debug for OnnxSegmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxSegmenter")
            .field("name", &self.name)
            .field("model_file", &self.model_file)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Segmenter for OnnxSegmenter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn segment(
        &self,
        input: &ImageResource,
        runtime: &RuntimeConfig,
        progress: &dyn ProgressReporter,
    ) -> Result<ImageResource> {
        let mut tracker = ProgressTracker::new(progress);
        let resolution = runtime.model_resolution;

        tracker.report_stage(PipelineStage::Preprocessing);
        let owned = input.clone();
        let (decoded, tensor) = run_blocking("preprocess", move || {
            let decoded = image::load_from_memory(owned.bytes())
                .map_err(|e| RmbgError::segmentation(format!("failed to decode input: {}", e)))?;
            let tensor = preprocess(&decoded, resolution);
            Ok((decoded, tensor))
        })
        .await?;

        tracker.report_stage(PipelineStage::Inference);
        let session = Arc::clone(&self.session);
        let model_file = self.model_file.clone();
        let runtime = runtime.clone();
        let (mask_width, mask_height, mask) = run_blocking("inference", move || {
            let mut guard = match session.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if guard.is_none() {
                *guard = Some(create_session(&model_file, &runtime)?);
            }
            let session = guard
                .as_mut()
                .ok_or_else(|| RmbgError::segmentation("ONNX session not initialized"))?;
            run_session(session, tensor)
        })
        .await?;

        tracker.report_stage(PipelineStage::Postprocessing);
        let encoded = run_blocking("postprocess", move || {
            let cutout = apply_mask(&decoded, &mask, mask_width, mask_height)?;
            OutputFormatHandler::encode_png(&cutout)
        })
        .await?;
        tracing::debug!(elapsed_ms = tracker.elapsed_ms(), "onnx segmentation finished");
        Ok(encoded)
    }
}

async fn run_blocking<T, F>(stage: &str, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| RmbgError::segmentation(format!("{} task failed: {}", stage, e)))?
}

fn create_session(model_file: &Path, runtime: &RuntimeConfig) -> Result<Session> {
    let mut builder = Session::builder()
        .map_err(|e| session_error("create session builder", e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| session_error("set optimization level", e))?;

    let mut providers = Vec::new();
    let want_cuda = matches!(
        runtime.execution_provider,
        ExecutionProvider::Auto | ExecutionProvider::Cuda
    );
    let want_coreml = matches!(
        runtime.execution_provider,
        ExecutionProvider::Auto | ExecutionProvider::CoreMl
    );

    if want_cuda {
        let cuda = CUDAExecutionProvider::default();
        if OrtExecutionProvider::is_available(&cuda).unwrap_or(false) {
            log::info!("Using CUDA execution provider");
            providers.push(cuda.build());
        } else if runtime.execution_provider == ExecutionProvider::Cuda {
            log::warn!("CUDA execution provider requested but not available, falling back to CPU");
        }
    }
    if want_coreml {
        let coreml = CoreMLExecutionProvider::default();
        if OrtExecutionProvider::is_available(&coreml).unwrap_or(false) {
            log::info!("Using CoreML execution provider");
            providers.push(coreml.with_subgraphs(true).build());
        } else if runtime.execution_provider == ExecutionProvider::CoreMl {
            log::warn!("CoreML execution provider requested but not available, falling back to CPU");
        }
    }
    if !providers.is_empty() {
        builder = builder
            .with_execution_providers(providers)
            .map_err(|e| session_error("set execution providers", e))?;
    }

    let intra_threads = if runtime.intra_threads > 0 {
        runtime.intra_threads
    } else {
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4)
    };

    let session = builder
        .with_intra_threads(intra_threads)
        .map_err(|e| session_error("set intra threads", e))?
        .commit_from_file(model_file)
        .map_err(|e| session_error("load model", e))?;

    tracing::info!(model = %model_file.display(), intra_threads, "ONNX session created");
    Ok(session)
}

fn session_error<E: std::fmt::Display>(step: &str, error: E) -> RmbgError {
    RmbgError::segmentation(format!("Failed to {}: {}", step, error))
}

fn run_session(session: &mut Session, tensor: Array4<f32>) -> Result<(u32, u32, Vec<f32>)> {
    let input_value = Value::from_array(tensor)
        .map_err(|e| RmbgError::segmentation(format!("Failed to convert input tensor: {}", e)))?;
    let outputs = session
        .run(ort::inputs![input_value])
        .map_err(|e| RmbgError::segmentation(format!("ONNX inference failed: {}", e)))?;

    let keys: Vec<_> = outputs.keys().collect();
    let first_key = keys
        .first()
        .ok_or_else(|| RmbgError::segmentation("No output tensors found"))?;
    let output = outputs
        .get(first_key)
        .ok_or_else(|| RmbgError::segmentation("First output tensor not found"))?
        .try_extract_array::<f32>()
        .map_err(|e| RmbgError::segmentation(format!("Failed to extract output tensor: {}", e)))?;

    let shape = output.shape();
    if shape.len() < 2 {
        return Err(RmbgError::segmentation(format!(
            "Expected a 2D+ mask tensor, got shape {:?}",
            shape
        )));
    }
    let height = shape[shape.len() - 2];
    let width = shape[shape.len() - 1];
    let mask: Vec<f32> = output.iter().take(width * height).copied().collect();

    Ok((width as u32, height as u32, mask))
}

/// Resize to a square and normalize each channel to `[-1, 1]` in NCHW order
#[must_use]
pub fn preprocess(image: &DynamicImage, resolution: u32) -> Array4<f32> {
    let size = resolution as usize;
    let resized = image
        .resize_exact(resolution, resolution, FilterType::Triangle)
        .to_rgb8();

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (f32::from(pixel[c]) - 127.5) / 127.5;
        }
    }
    tensor
}

/// Scale a `mask_width × mask_height` mask to the image size and use it as alpha
///
/// # Errors
/// - `Segmentation` when the mask length does not match its dimensions
pub fn apply_mask(
    image: &DynamicImage,
    mask: &[f32],
    mask_width: u32,
    mask_height: u32,
) -> Result<RgbaImage> {
    if mask.len() != (mask_width * mask_height) as usize || mask.is_empty() {
        return Err(RmbgError::segmentation(format!(
            "mask has {} values, expected {}x{}",
            mask.len(),
            mask_width,
            mask_height
        )));
    }

    let mask_image = GrayImage::from_fn(mask_width, mask_height, |x, y| {
        let value = mask[(y * mask_width + x) as usize];
        Luma([(value * 255.0).clamp(0.0, 255.0) as u8])
    });
    let alpha = imageops::resize(
        &mask_image,
        image.width(),
        image.height(),
        FilterType::Triangle,
    );

    let mut rgba = image.to_rgba8();
    for (pixel, a) in rgba.pixels_mut().zip(alpha.pixels()) {
        pixel[3] = a[0];
    }
    Ok(rgba)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_preprocess_normalizes_to_unit_range() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 20, Rgb([255, 0, 128])));
        let tensor = preprocess(&image, 16);

        assert_eq!(tensor.shape(), &[1, 3, 16, 16]);
        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] + 1.0).abs() < 1e-6);
        assert!(tensor[[0, 2, 5, 5]].abs() < 0.01);
    }

    #[test]
    fn test_apply_mask_scales_to_image() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([9, 8, 7])));
        let mask = vec![1.0; 4];

        let cutout = apply_mask(&image, &mask, 2, 2).unwrap();
        assert_eq!(cutout.dimensions(), (8, 8));
        assert_eq!(cutout.get_pixel(3, 3).0, [9, 8, 7, 255]);

        let cleared = apply_mask(&image, &[0.0; 4], 2, 2).unwrap();
        assert_eq!(cleared.get_pixel(0, 0)[3], 0);

        assert!(apply_mask(&image, &[0.5; 3], 2, 2).is_err());
    }

    #[test]
    fn test_resolve_model_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("modnet.onnx"), b"onnx").unwrap();

        let runtime = RuntimeConfig {
            model_path: Some(dir.path().to_path_buf()),
            ..RuntimeConfig::default()
        };
        assert_eq!(
            resolve_model_file(&runtime, "modnet").unwrap(),
            dir.path().join("modnet.onnx")
        );
        assert!(resolve_model_file(&runtime, "u2netp").is_err());
        assert!(resolve_model_file(&RuntimeConfig::default(), "modnet").is_err());
    }
}

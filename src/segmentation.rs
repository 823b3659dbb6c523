//! Segmentation abstraction, model registry and invoker
//!
//! A [`Segmenter`] turns an input image into a foreground-only cutout. The
//! [`ModelRegistry`] maps [`ModelSelector`]s to factories that build them, and
//! the [`SegmentationInvoker`] wraps a single call with model lookup, caching,
//! a timeout and output validation.

use crate::{
    config::RuntimeConfig,
    error::{Result, RmbgError},
    services::{ImageLoader, PipelineStage, ProgressReporter, ProgressUpdate},
    types::{ImageResource, ModelSelector},
};
use async_trait::async_trait;
use instant::Instant;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// An asynchronous foreground extractor
#[async_trait]
pub trait Segmenter: Send + Sync {
    /// Display name used in logs and status messages
    fn name(&self) -> &str;

    /// Produce an alpha-bearing cutout with the same pixel dimensions as `input`
    ///
    /// # Errors
    /// - Backend initialization or inference failures
    async fn segment(
        &self,
        input: &ImageResource,
        runtime: &RuntimeConfig,
        progress: &dyn ProgressReporter,
    ) -> Result<ImageResource>;
}

/// Builds a segmenter for a registry entry
pub trait SegmenterFactory: Send + Sync {
    /// Create a segmenter for the given runtime configuration
    ///
    /// # Errors
    /// - Missing model assets or invalid runtime settings
    fn create(&self, runtime: &RuntimeConfig) -> Result<Arc<dyn Segmenter>>;
}

impl<F> SegmenterFactory for F
where
    F: Fn(&RuntimeConfig) -> Result<Arc<dyn Segmenter>> + Send + Sync,
{
    fn create(&self, runtime: &RuntimeConfig) -> Result<Arc<dyn Segmenter>> {
        self(runtime)
    }
}

struct InstanceFactory(Arc<dyn Segmenter>);

impl SegmenterFactory for InstanceFactory {
    fn create(&self, _runtime: &RuntimeConfig) -> Result<Arc<dyn Segmenter>> {
        Ok(Arc::clone(&self.0))
    }
}

/// Explicit map from model selectors to segmenter factories
#[derive(Clone, Default)]
pub struct ModelRegistry {
    factories: BTreeMap<ModelSelector, Arc<dyn SegmenterFactory>>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous entry for `selector`
    pub fn register<F>(&mut self, selector: ModelSelector, factory: F) -> &mut Self
    where
        F: SegmenterFactory + 'static,
    {
        self.factories.insert(selector, Arc::new(factory));
        self
    }

    /// Register a ready-made segmenter instance
    pub fn register_instance(
        &mut self,
        selector: ModelSelector,
        segmenter: Arc<dyn Segmenter>,
    ) -> &mut Self {
        self.register(selector, InstanceFactory(segmenter))
    }

    #[must_use]
    pub fn contains(&self, selector: &ModelSelector) -> bool {
        self.factories.contains_key(selector)
    }

    /// Registered selectors in sorted order
    #[must_use]
    pub fn models(&self) -> Vec<ModelSelector> {
        self.factories.keys().cloned().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    fn factory(&self, selector: &ModelSelector) -> Option<Arc<dyn SegmenterFactory>> {
        self.factories.get(selector).cloned()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.models())
            .finish()
    }
}

/// Runs segmentation calls against a model registry
pub struct SegmentationInvoker {
    registry: ModelRegistry,
    runtime: RuntimeConfig,
    timeout: Option<Duration>,
    instances: Mutex<HashMap<ModelSelector, Arc<dyn Segmenter>>>,
}

impl SegmentationInvoker {
    #[must_use]
    pub fn new(registry: ModelRegistry, runtime: RuntimeConfig, timeout: Option<Duration>) -> Self {
        Self {
            registry,
            runtime,
            timeout,
            instances: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Segment `input` with the model named by `selector`
    ///
    /// # Errors
    /// - `Decode` if the input is not a valid image
    /// - `Segmentation` for unknown models, backend failures or invalid output
    /// - `Timeout` if the configured bound elapses first
    #[instrument(skip(self, input, progress), fields(input = %input.short_id(), model = %selector))]
    pub async fn segment(
        &self,
        input: &ImageResource,
        selector: &ModelSelector,
        progress: &dyn ProgressReporter,
    ) -> Result<ImageResource> {
        let start = Instant::now();
        let input_info = ImageLoader::read_header(input)?;
        let segmenter = self.segmenter_for(selector, progress, start)?;

        let call = segmenter.segment(input, &self.runtime, progress);
        let result = match self.timeout {
            Some(bound) => match tokio::time::timeout(bound, call).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_ms = bound.as_millis() as u64, "segmentation timed out");
                    return Err(RmbgError::timeout(bound));
                },
            },
            None => call.await,
        };
        let output = result.map_err(|e| wrap_backend_error(selector, e))?;

        let output_info = ImageLoader::read_header(&output).map_err(|e| {
            RmbgError::segmentation_with_model(selector.as_str(), format!("invalid output: {}", e))
        })?;
        if (output_info.width, output_info.height) != (input_info.width, input_info.height) {
            return Err(RmbgError::segmentation_with_model(
                selector.as_str(),
                format!(
                    "output is {}x{} but input is {}x{}",
                    output_info.width, output_info.height, input_info.width, input_info.height
                ),
            ));
        }
        if !output_info.has_alpha {
            return Err(RmbgError::segmentation_with_model(
                selector.as_str(),
                "output has no alpha channel",
            ));
        }

        progress.report_progress(ProgressUpdate::new(PipelineStage::Completed, start));
        info!(
            output = %output.short_id(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "segmentation finished"
        );
        Ok(output)
    }

    fn segmenter_for(
        &self,
        selector: &ModelSelector,
        progress: &dyn ProgressReporter,
        start: Instant,
    ) -> Result<Arc<dyn Segmenter>> {
        let mut instances = match self.instances.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(segmenter) = instances.get(selector) {
            return Ok(Arc::clone(segmenter));
        }

        let factory = self.registry.factory(selector).ok_or_else(|| {
            let available: Vec<String> =
                self.registry.models().iter().map(ToString::to_string).collect();
            RmbgError::segmentation(format!(
                "unknown model '{}'. Available models: {}",
                selector,
                available.join(", ")
            ))
        })?;

        progress.report_progress(ProgressUpdate::new(PipelineStage::ModelLoading, start));
        let segmenter = factory
            .create(&self.runtime)
            .map_err(|e| wrap_backend_error(selector, e))?;
        debug!(segmenter = segmenter.name(), "created segmenter");

        instances.insert(selector.clone(), Arc::clone(&segmenter));
        Ok(segmenter)
    }
}

impl std::fmt::Debug for SegmentationInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentationInvoker")
            .field("registry", &self.registry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn wrap_backend_error(selector: &ModelSelector, error: RmbgError) -> RmbgError {
    match error {
        RmbgError::Segmentation(msg) => RmbgError::segmentation_with_model(selector.as_str(), msg),
        RmbgError::Timeout(_) => error,
        other => RmbgError::segmentation_with_model(selector.as_str(), other),
    }
}

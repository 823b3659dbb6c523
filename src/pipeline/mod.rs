//! Pipeline orchestration
//!
//! [`Pipeline::builder`] wires a [`ModelRegistry`] and the presentation sinks
//! into an orchestrator task. The returned [`PipelineHandle`] feeds it user
//! events and observes its state.
//!
//! ```rust,no_run
//! use rmbg::{backends::AlphaPassthroughSegmenter, ImageResource, ModelRegistry, ModelSelector, Pipeline};
//! use std::sync::Arc;
//!
//! # async fn example() -> rmbg::Result<()> {
//! let alpha = ModelSelector::new("alpha")?;
//! let mut registry = ModelRegistry::new();
//! registry.register_instance(alpha.clone(), Arc::new(AlphaPassthroughSegmenter));
//!
//! let handle = Pipeline::builder(registry).build()?.spawn();
//! handle.select_model(alpha)?;
//! handle.select_input(ImageResource::from_path("cutout.png").await?)?;
//! handle.select_background(ImageResource::from_path("beach.jpg").await?)?;
//!
//! let snapshot = handle.wait_until_idle().await?;
//! assert!(snapshot.composite_result.is_some());
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod orchestrator;
mod state;

pub use state::{PipelinePhase, PipelineSnapshot, SegmentationToken};

use crate::{
    config::PipelineConfig,
    error::{Result, RmbgError},
    segmentation::{ModelRegistry, SegmentationInvoker},
    services::{
        Compositor, HandleRegistry, ImageLoader, NoOpPresenter, Presenter, ProgressReporter,
        StatusSink, TracingProgressReporter, TracingStatusSink,
    },
    types::{ImageResource, ModelSelector},
};
use orchestrator::{Orchestrator, OrchestratorParts, PipelineEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// A configured pipeline, ready to be spawned
pub struct Pipeline {
    config: PipelineConfig,
    registry: ModelRegistry,
    initial_model: Option<ModelSelector>,
    status: Arc<dyn StatusSink>,
    presenter: Arc<dyn Presenter>,
    progress: Arc<dyn ProgressReporter>,
    handles: HandleRegistry,
}

impl Pipeline {
    /// Start building a pipeline over an explicit model registry
    #[must_use]
    pub fn builder(registry: ModelRegistry) -> PipelineBuilder {
        PipelineBuilder::new(registry)
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Spawn the orchestrator task on the current tokio runtime
    #[must_use]
    pub fn spawn(self) -> PipelineHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(PipelineSnapshot::default());

        let invoker = Arc::new(SegmentationInvoker::new(
            self.registry,
            self.config.runtime.clone(),
            self.config.segmentation_timeout,
        ));
        let parts = OrchestratorParts {
            invoker,
            loader: ImageLoader::with_registry(self.handles.clone()),
            compositor: Arc::new(Compositor::new(self.config.compositor.clone())),
            status: self.status,
            presenter: self.presenter,
            progress: self.progress,
            export_filename: self.config.export_filename(),
            initial_model: self.initial_model,
        };

        let orchestrator = Orchestrator::new(parts, snapshot_tx);
        let task = tokio::spawn(orchestrator.run(events_rx));

        PipelineHandle {
            events: events_tx,
            snapshots: snapshot_rx,
            sent: Arc::new(AtomicU64::new(0)),
            handles: self.handles,
            task: Arc::new(tokio::sync::Mutex::new(Some(task))),
        }
    }
}

/// Builder for [`Pipeline`]
pub struct PipelineBuilder {
    config: PipelineConfig,
    registry: ModelRegistry,
    initial_model: Option<ModelSelector>,
    status: Arc<dyn StatusSink>,
    presenter: Arc<dyn Presenter>,
    progress: Arc<dyn ProgressReporter>,
    handles: HandleRegistry,
}

impl PipelineBuilder {
    fn new(registry: ModelRegistry) -> Self {
        Self {
            config: PipelineConfig::default(),
            registry,
            initial_model: None,
            status: Arc::new(TracingStatusSink),
            presenter: Arc::new(NoOpPresenter),
            progress: Arc::new(TracingProgressReporter::new(false)),
            handles: HandleRegistry::new(),
        }
    }

    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Preselect a model so the first input is segmented right away
    #[must_use]
    pub fn model(mut self, model: ModelSelector) -> Self {
        self.initial_model = Some(model);
        self
    }

    #[must_use]
    pub fn status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status = sink;
        self
    }

    #[must_use]
    pub fn presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = presenter;
        self
    }

    #[must_use]
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress = reporter;
        self
    }

    /// Share a handle registry, e.g. to observe decoded-raster leaks
    #[must_use]
    pub fn handle_registry(mut self, handles: HandleRegistry) -> Self {
        self.handles = handles;
        self
    }

    /// Validate and build
    ///
    /// # Errors
    /// - `InvalidConfig` for invalid settings, an empty registry, or an
    ///   initial model the registry does not know
    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;
        if self.registry.is_empty() {
            return Err(RmbgError::invalid_config("model registry is empty"));
        }
        if let Some(model) = &self.initial_model {
            if !self.registry.contains(model) {
                return Err(RmbgError::invalid_config(format!(
                    "initial model '{}' is not registered",
                    model
                )));
            }
        }

        Ok(Pipeline {
            config: self.config,
            registry: self.registry,
            initial_model: self.initial_model,
            status: self.status,
            presenter: self.presenter,
            progress: self.progress,
            handles: self.handles,
        })
    }
}

/// Cloneable front-end to a running pipeline
#[derive(Clone)]
pub struct PipelineHandle {
    events: mpsc::UnboundedSender<PipelineEvent>,
    snapshots: watch::Receiver<PipelineSnapshot>,
    sent: Arc<AtomicU64>,
    handles: HandleRegistry,
    task: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl PipelineHandle {
    /// Choose the segmentation model
    ///
    /// # Errors
    /// - `PipelineClosed` if the orchestrator has stopped
    pub fn select_model(&self, model: ModelSelector) -> Result<()> {
        self.send(PipelineEvent::SelectModel(model))
    }

    /// Choose the image to cut out
    ///
    /// # Errors
    /// - `PipelineClosed` if the orchestrator has stopped
    pub fn select_input(&self, input: ImageResource) -> Result<()> {
        self.send(PipelineEvent::SelectInput(input))
    }

    /// Choose the replacement background
    ///
    /// # Errors
    /// - `PipelineClosed` if the orchestrator has stopped
    pub fn select_background(&self, background: ImageResource) -> Result<()> {
        self.send(PipelineEvent::SelectBackground(background))
    }

    /// Forget the background; the last composite is kept
    ///
    /// # Errors
    /// - `PipelineClosed` if the orchestrator has stopped
    pub fn clear_background(&self) -> Result<()> {
        self.send(PipelineEvent::ClearBackground)
    }

    fn send(&self, event: PipelineEvent) -> Result<()> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.events.send(event).map_err(|_| {
            self.sent.fetch_sub(1, Ordering::SeqCst);
            RmbgError::PipelineClosed
        })
    }

    /// Latest published state
    #[must_use]
    pub fn snapshot(&self) -> PipelineSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every state change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PipelineSnapshot> {
        self.snapshots.clone()
    }

    /// Live decoded-raster handles
    #[must_use]
    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    /// Wait for the first snapshot satisfying `predicate`
    ///
    /// # Errors
    /// - `PipelineClosed` if the orchestrator stops first
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<PipelineSnapshot>
    where
        F: FnMut(&PipelineSnapshot) -> bool,
    {
        let mut receiver = self.snapshots.clone();
        let snapshot = receiver
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| RmbgError::PipelineClosed)?;
        Ok(snapshot.clone())
    }

    /// Wait until every event sent so far is handled and no work is running
    ///
    /// # Errors
    /// - `PipelineClosed` if the orchestrator stops first
    pub async fn wait_until_idle(&self) -> Result<PipelineSnapshot> {
        let sent = self.sent.load(Ordering::SeqCst);
        self.wait_for(|snapshot| snapshot.processed_events >= sent && snapshot.is_idle())
            .await
    }

    /// Stop the orchestrator and wait for it to exit; unfinished work is dropped
    pub async fn shutdown(&self) {
        let _ = self.events.send(PipelineEvent::Shutdown);
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::warn!("pipeline task ended abnormally: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("sent", &self.sent.load(Ordering::SeqCst))
            .field("live_handles", &self.handles.live())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{png_resource, solid_png, MockSegmenter, MOCK_CORNER};
    use crate::services::{MemoryStatusSink, NoOpProgressReporter};
    use image::{DynamicImage, Rgb, RgbImage};

    fn selector(name: &str) -> ModelSelector {
        ModelSelector::new(name).unwrap()
    }

    fn registry(mock: &MockSegmenter) -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        registry.register_instance(selector("mock"), Arc::new(mock.clone()));
        registry
    }

    fn photo(seed: u8) -> ImageResource {
        png_resource(&DynamicImage::ImageRgb8(RgbImage::from_fn(160, 120, |x, y| {
            Rgb([x as u8 ^ seed, y as u8, seed])
        })))
    }

    #[test]
    fn test_build_rejects_empty_registry_and_unknown_model() {
        assert!(matches!(
            Pipeline::builder(ModelRegistry::new()).build(),
            Err(RmbgError::InvalidConfig(_))
        ));

        let mock = MockSegmenter::new();
        assert!(Pipeline::builder(registry(&mock))
            .model(selector("other"))
            .build()
            .is_err());
        assert!(Pipeline::builder(registry(&mock))
            .model(selector("mock"))
            .build()
            .is_ok());
    }

    #[tokio::test]
    async fn test_superseded_call_is_discarded() {
        let mock = MockSegmenter::new();
        let status = MemoryStatusSink::new();
        let handle = Pipeline::builder(registry(&mock))
            .model(selector("mock"))
            .status_sink(Arc::new(status.clone()))
            .progress_reporter(Arc::new(NoOpProgressReporter))
            .build()
            .unwrap()
            .spawn();

        let first = photo(1);
        let second = photo(2);
        mock.hold(&first);
        handle.select_input(first.clone()).unwrap();
        handle
            .wait_for(|snapshot| snapshot.segmentation_calls == 1)
            .await
            .unwrap();
        handle.select_input(second.clone()).unwrap();
        let settled = handle.wait_until_idle().await.unwrap();

        mock.release(&first);
        let after = handle
            .wait_for(|snapshot| snapshot.discarded_results == 1)
            .await
            .unwrap();

        assert_eq!(after.foreground_result, settled.foreground_result);
        assert_eq!(
            mock.get_call_history(),
            vec![first.short_id(), second.short_id()]
        );

        let foreground = image::load_from_memory(after.foreground_result.unwrap().bytes())
            .unwrap()
            .to_rgba8();
        assert_eq!(foreground.get_pixel(MOCK_CORNER - 1, MOCK_CORNER - 1)[3], 0);
        assert_eq!(foreground.get_pixel(MOCK_CORNER, MOCK_CORNER)[3], 255);
        assert!(status.contains(&format!("Segmenting {} with mock", second.short_id())));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscribers_see_composition() {
        let mock = MockSegmenter::new();
        let handle = Pipeline::builder(registry(&mock))
            .model(selector("mock"))
            .status_sink(Arc::new(crate::services::NoOpStatusSink))
            .build()
            .unwrap()
            .spawn();
        let mut updates = handle.subscribe();

        handle.select_input(photo(3)).unwrap();
        handle
            .select_background(solid_png(20, 20, [0, 0, 0, 255]))
            .unwrap();
        let composed = updates
            .wait_for(|snapshot| snapshot.phase() == PipelinePhase::Composed)
            .await
            .unwrap()
            .clone();

        assert_eq!(composed.composition_calls, 1);
        assert_eq!(handle.snapshot().phase(), PipelinePhase::Composed);
        assert_eq!(mock.call_count(), 1);
        assert_eq!(handle.handles().live(), 0);
        handle.shutdown().await;
    }
}

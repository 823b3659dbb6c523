//! Event loop driving segmentation and composition
//!
//! A single task owns [`PipelineState`]. User events and finished work both
//! arrive here, so every state change happens between suspension points and
//! never races with another.

use super::state::{PipelineSnapshot, PipelineState, SegmentationToken};
use crate::{
    error::{Result, RmbgError},
    segmentation::SegmentationInvoker,
    services::{
        Compositor, ImageInfo, ImageLoader, PipelineStage, PreviewKind, Presenter,
        ProgressReporter, ProgressTracker, StaleAwareProgress, StatusSink,
    },
    types::{ImageResource, ModelSelector},
};
use futures::future::{AbortHandle, AbortRegistration, Abortable, BoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use instant::Instant;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

/// User-level input events
#[derive(Debug, Clone)]
pub(crate) enum PipelineEvent {
    SelectModel(ModelSelector),
    SelectInput(ImageResource),
    SelectBackground(ImageResource),
    ClearBackground,
    Shutdown,
}

/// Which selected image a verification belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageSlot {
    Input,
    Background,
}

impl ImageSlot {
    fn label(self) -> &'static str {
        match self {
            ImageSlot::Input => "input",
            ImageSlot::Background => "background",
        }
    }
}

/// Completed background work
enum TaskOutcome {
    Verified {
        slot: ImageSlot,
        generation: u64,
        resource: ImageResource,
        result: Result<ImageInfo>,
    },
    Segmented {
        token: SegmentationToken,
        model: ModelSelector,
        result: Result<ImageResource>,
        elapsed: Duration,
    },
    Composed {
        generation: u64,
        result: Result<ImageResource>,
        elapsed: Duration,
    },
    /// Aborted before its rasters were decoded
    ComposeCancelled {
        generation: u64,
    },
}

pub(crate) struct Orchestrator {
    state: PipelineState,
    invoker: Arc<SegmentationInvoker>,
    loader: ImageLoader,
    compositor: Arc<Compositor>,
    status: Arc<dyn StatusSink>,
    presenter: Arc<dyn Presenter>,
    progress: Arc<dyn ProgressReporter>,
    current_token: Arc<AtomicU64>,
    current_composition: Arc<AtomicU64>,
    compose_abort: Option<AbortHandle>,
    export_filename: String,
    snapshots: watch::Sender<PipelineSnapshot>,
    tasks: FuturesUnordered<BoxFuture<'static, TaskOutcome>>,
}

pub(crate) struct OrchestratorParts {
    pub(crate) invoker: Arc<SegmentationInvoker>,
    pub(crate) loader: ImageLoader,
    pub(crate) compositor: Arc<Compositor>,
    pub(crate) status: Arc<dyn StatusSink>,
    pub(crate) presenter: Arc<dyn Presenter>,
    pub(crate) progress: Arc<dyn ProgressReporter>,
    pub(crate) export_filename: String,
    pub(crate) initial_model: Option<ModelSelector>,
}

impl Orchestrator {
    pub fn new(parts: OrchestratorParts, snapshots: watch::Sender<PipelineSnapshot>) -> Self {
        Self {
            state: PipelineState::with_model(parts.initial_model),
            invoker: parts.invoker,
            loader: parts.loader,
            compositor: parts.compositor,
            status: parts.status,
            presenter: parts.presenter,
            progress: parts.progress,
            current_token: Arc::new(AtomicU64::new(0)),
            current_composition: Arc::new(AtomicU64::new(0)),
            compose_abort: None,
            export_filename: parts.export_filename,
            snapshots,
            tasks: FuturesUnordered::new(),
        }
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<PipelineEvent>) {
        self.publish();
        loop {
            tokio::select! {
                biased;

                event = events.recv() => match event {
                    Some(PipelineEvent::Shutdown) | None => break,
                    Some(event) => {
                        self.handle_event(event);
                        self.state.processed_events += 1;
                    },
                },
                Some(outcome) = self.tasks.next(), if !self.tasks.is_empty() => {
                    self.handle_outcome(outcome);
                },
            }
            self.publish();
        }

        if let Some(abort) = self.compose_abort.take() {
            abort.abort();
        }
        let pending = self.tasks.len();
        if pending > 0 {
            debug!(pending, "dropping unfinished pipeline work");
        }
        info!("pipeline stopped");
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.state.snapshot());
    }

    fn handle_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::SelectModel(model) => self.on_model_selected(model),
            PipelineEvent::SelectInput(input) => self.on_input_selected(input),
            PipelineEvent::SelectBackground(background) => self.on_background_selected(background),
            PipelineEvent::ClearBackground => self.on_background_cleared(),
            PipelineEvent::Shutdown => {},
        }
    }

    fn on_model_selected(&mut self, model: ModelSelector) {
        let unchanged = self.state.selected_model.as_ref() == Some(&model);
        let have_result =
            self.state.foreground_result.is_some() || self.state.in_flight_segmentation.is_some();
        if unchanged && have_result {
            debug!(%model, "model unchanged, keeping current result");
            return;
        }

        self.status.append(&format!("Model selected: {}", model));
        self.state.selected_model = Some(model);
        self.start_segmentation();
    }

    fn on_input_selected(&mut self, input: ImageResource) {
        self.state.input_generation += 1;
        self.verify(ImageSlot::Input, self.state.input_generation, input);
    }

    fn on_background_selected(&mut self, background: ImageResource) {
        self.state.background_generation += 1;
        self.verify(ImageSlot::Background, self.state.background_generation, background);
    }

    fn on_background_cleared(&mut self) {
        // A background still being verified must not come back afterwards.
        self.state.background_generation += 1;
        if self.state.background_image.take().is_some() {
            self.cancel_composition();
            self.status.append("Background cleared");
        }
    }

    /// Decode a selected image fully before it may replace the current one
    fn verify(&mut self, slot: ImageSlot, generation: u64, resource: ImageResource) {
        self.state.pending_loads += 1;
        self.tasks.push(
            async move {
                let result = ImageLoader::verify(&resource).await;
                TaskOutcome::Verified {
                    slot,
                    generation,
                    resource,
                    result,
                }
            }
            .boxed(),
        );
    }

    fn on_verified(
        &mut self,
        slot: ImageSlot,
        generation: u64,
        resource: ImageResource,
        result: Result<ImageInfo>,
    ) {
        self.state.pending_loads = self.state.pending_loads.saturating_sub(1);
        let latest = match slot {
            ImageSlot::Input => self.state.input_generation,
            ImageSlot::Background => self.state.background_generation,
        };
        if generation != latest {
            debug!(slot = slot.label(), "dropping superseded selection");
            return;
        }

        let info = match result {
            Ok(info) => info,
            Err(e) => {
                warn!("Rejected {} image: {}", slot.label(), e);
                self.status
                    .append(&format!("Invalid {} image: {}", slot.label(), e));
                return;
            },
        };

        match slot {
            ImageSlot::Input => {
                self.status.append(&format!(
                    "Input image {} ({}x{})",
                    resource.short_id(),
                    info.width,
                    info.height
                ));
                self.state.input_image = Some(resource);
                self.start_segmentation();
            },
            ImageSlot::Background => {
                self.status.append(&format!(
                    "Background image {} ({}x{})",
                    resource.short_id(),
                    info.width,
                    info.height
                ));
                self.state.background_image = Some(resource);
                self.start_composition();
            },
        }
    }

    /// Abort the running composition, if any, without starting a new one
    fn cancel_composition(&mut self) {
        if let Some(abort) = self.compose_abort.take() {
            abort.abort();
        }
        self.state.invalidate_composition();
    }

    /// Issue a segmentation for the current model and input, if both are set
    fn start_segmentation(&mut self) {
        let (Some(model), Some(input)) = (
            self.state.selected_model.clone(),
            self.state.input_image.clone(),
        ) else {
            return;
        };

        if let Some(previous) = self.state.in_flight_segmentation {
            debug!(%previous, "superseding in-flight segmentation");
        }
        let token = self.state.issue_token();
        self.current_token.store(token.value(), Ordering::SeqCst);
        self.state.foreground_result = None;
        self.state.composite_result = None;
        self.cancel_composition();

        self.status
            .append(&format!("Segmenting {} with {} ({})", input.short_id(), model, token));

        let invoker = Arc::clone(&self.invoker);
        let progress = StaleAwareProgress::new(
            Arc::clone(&self.progress),
            token.value(),
            Arc::clone(&self.current_token),
        );
        self.tasks.push(
            async move {
                let start = Instant::now();
                let result = invoker.segment(&input, &model, &progress).await;
                TaskOutcome::Segmented {
                    token,
                    model,
                    result,
                    elapsed: start.elapsed(),
                }
            }
            .boxed(),
        );
    }

    /// Compose the current foreground over the current background, if both are set
    fn start_composition(&mut self) {
        let (Some(foreground), Some(background)) = (
            self.state.foreground_result.clone(),
            self.state.background_image.clone(),
        ) else {
            return;
        };

        if let Some(previous) = self.compose_abort.take() {
            previous.abort();
        }
        let generation = self.state.next_compose_generation();
        self.state.pending_compositions += 1;
        self.current_composition.store(generation, Ordering::SeqCst);

        let (abort, registration) = AbortHandle::new_pair();
        self.compose_abort = Some(abort);
        let job = ComposeJob {
            loader: self.loader.clone(),
            compositor: Arc::clone(&self.compositor),
            progress: StaleAwareProgress::new(
                Arc::clone(&self.progress),
                generation,
                Arc::clone(&self.current_composition),
            ),
            foreground,
            background,
            generation,
        };
        self.tasks.push(job.run(registration).boxed());
    }

    fn handle_outcome(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Verified {
                slot,
                generation,
                resource,
                result,
            } => self.on_verified(slot, generation, resource, result),
            TaskOutcome::Segmented {
                token,
                model,
                result,
                elapsed,
            } => self.on_segmented(token, &model, result, elapsed),
            TaskOutcome::Composed {
                generation,
                result,
                elapsed,
            } => self.on_composed(generation, result, elapsed),
            TaskOutcome::ComposeCancelled { generation } => {
                self.state.pending_compositions = self.state.pending_compositions.saturating_sub(1);
                debug!(generation, "composition cancelled");
            },
        }
    }

    #[instrument(skip(self, result), fields(token = %token))]
    fn on_segmented(
        &mut self,
        token: SegmentationToken,
        model: &ModelSelector,
        result: Result<ImageResource>,
        elapsed: Duration,
    ) {
        if !self.state.is_current(token) {
            self.state.discarded_results += 1;
            debug!(ok = result.is_ok(), "discarding stale segmentation result");
            return;
        }
        self.state.in_flight_segmentation = None;

        match result {
            Ok(foreground) => {
                self.status.append(&format!(
                    "Segmentation with {} finished in {}ms",
                    model,
                    elapsed.as_millis()
                ));
                self.presenter
                    .publish_preview(PreviewKind::Foreground, &foreground);
                self.state.foreground_result = Some(foreground);
                self.start_composition();
            },
            Err(e) => self.report_failure("Segmentation", &e),
        }
    }

    #[instrument(skip(self, result))]
    fn on_composed(&mut self, generation: u64, result: Result<ImageResource>, elapsed: Duration) {
        self.state.pending_compositions = self.state.pending_compositions.saturating_sub(1);
        if generation != self.state.compose_generation {
            debug!(
                latest = self.state.compose_generation,
                "discarding superseded composition"
            );
            return;
        }
        self.state.composing = false;
        self.compose_abort = None;

        match result {
            Ok(composite) => {
                self.status.append(&format!(
                    "Background composited in {}ms",
                    elapsed.as_millis()
                ));
                self.presenter
                    .publish_preview(PreviewKind::Composite, &composite);
                self.presenter
                    .publish_export(&composite, &self.export_filename);
                self.state.composite_result = Some(composite);
            },
            Err(e) => self.report_failure("Composition", &e),
        }
    }

    fn report_failure(&self, what: &str, error: &RmbgError) {
        warn!(category = error.category(), "{} failed: {}", what, error);
        self.status.append(&format!("{} failed: {}", what, error));
    }
}

/// Everything a composition needs, detached from the orchestrator
struct ComposeJob {
    loader: ImageLoader,
    compositor: Arc<Compositor>,
    progress: StaleAwareProgress,
    foreground: ImageResource,
    background: ImageResource,
    generation: u64,
}

impl ComposeJob {
    /// Decode both layers, then draw and encode
    ///
    /// Only decoding can be aborted. Once drawing starts the job runs to the
    /// end, so its raster handles are always gone when the outcome arrives.
    async fn run(self, registration: AbortRegistration) -> TaskOutcome {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(&self.progress);

        tracker.report_stage(PipelineStage::Decoding);
        let load = self.loader.load_pair(&self.foreground, &self.background);
        let Ok(loaded) = Abortable::new(load, registration).await else {
            return TaskOutcome::ComposeCancelled {
                generation: self.generation,
            };
        };

        let result = match loaded {
            Ok((fg, bg)) => {
                self.compositor
                    .compose_with_progress(fg, bg, &self.progress)
                    .await
            },
            Err(e) => Err(e),
        };
        match &result {
            Ok(_) => tracker.report_stage(PipelineStage::Completed),
            Err(e) => tracker.report_error(&e.to_string()),
        }

        TaskOutcome::Composed {
            generation: self.generation,
            result,
            elapsed: start.elapsed(),
        }
    }
}

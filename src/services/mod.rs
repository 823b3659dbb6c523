//! Service layer: decoding, composition, encoding and the reporting sinks

pub mod compositor;
pub mod format;
pub mod loader;
pub mod presenter;
pub mod progress;
pub mod status;

pub use compositor::Compositor;
pub use format::OutputFormatHandler;
pub use loader::{HandleLease, HandleRegistry, ImageInfo, ImageLoader};
pub use presenter::{cutout_filename, FilePresenter, NoOpPresenter, PreviewKind, Presenter};
pub use progress::{
    NoOpProgressReporter, PipelineStage, ProgressReporter, ProgressTracker, ProgressUpdate,
    StaleAwareProgress, TracingProgressReporter,
};
pub use status::{MemoryStatusSink, NoOpStatusSink, StatusEntry, StatusSink, TracingStatusSink};

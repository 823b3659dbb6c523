//! Presentation sinks for previews and exports

use crate::{
    error::{Result, RmbgError},
    services::OutputFormatHandler,
    types::ImageResource,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Which pipeline output a preview shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewKind {
    /// Segmentation cutout
    Foreground,
    /// Flattened composite
    Composite,
}

/// Receives pipeline outputs for display and export
pub trait Presenter: Send + Sync {
    fn publish_preview(&self, kind: PreviewKind, resource: &ImageResource);

    fn publish_export(&self, resource: &ImageResource, suggested_filename: &str);
}

/// Presenter that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpPresenter;

impl Presenter for NoOpPresenter {
    fn publish_preview(&self, _kind: PreviewKind, _resource: &ImageResource) {}

    fn publish_export(&self, _resource: &ImageResource, _suggested_filename: &str) {}
}

/// Writes exports (and optionally the foreground cutout) into a directory
///
/// Existing files are never overwritten: `name.png` becomes `name_1.png`,
/// `name_2.png` and so on. Inside a tokio runtime, writes are queued onto the
/// blocking pool in publish order; [`FilePresenter::flush`] waits for them.
#[derive(Debug)]
pub struct FilePresenter {
    dir: PathBuf,
    foreground_name: Option<String>,
    written: Arc<Mutex<Vec<PathBuf>>>,
    queue: Mutex<Option<JoinHandle<()>>>,
}

impl FilePresenter {
    /// Create a presenter writing into `dir`, creating it if needed
    ///
    /// # Errors
    /// - `Io` when the directory cannot be created
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| RmbgError::file_io_error("create output directory", &dir, &e))?;
        Ok(Self {
            dir,
            foreground_name: None,
            written: Arc::new(Mutex::new(Vec::new())),
            queue: Mutex::new(None),
        })
    }

    /// Also save foreground previews under this file name
    #[must_use]
    pub fn with_foreground_name<S: Into<String>>(mut self, name: S) -> Self {
        self.foreground_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Paths written so far, in write order
    #[must_use]
    pub fn written(&self) -> Vec<PathBuf> {
        lock(&self.written).clone()
    }

    /// Write a resource under `filename` right away, picking a free name if taken
    ///
    /// # Errors
    /// - `Io` when the file cannot be written
    pub fn write(&self, resource: &ImageResource, filename: &str) -> Result<PathBuf> {
        write_unique(&self.dir, filename, resource, &self.written)
    }

    /// Wait until every queued write has finished
    pub async fn flush(&self) {
        let pending = lock(&self.queue).take();
        if let Some(task) = pending {
            if let Err(e) = task.await {
                warn!("output writer ended abnormally: {}", e);
            }
        }
    }

    fn enqueue(&self, resource: &ImageResource, filename: &str) {
        let Ok(runtime) = Handle::try_current() else {
            if let Err(e) = self.write(resource, filename) {
                warn!("Failed to write {}: {}", filename, e);
            }
            return;
        };

        let dir = self.dir.clone();
        let written = Arc::clone(&self.written);
        let resource = resource.clone();
        let filename = filename.to_string();
        let mut queue = lock(&self.queue);
        let previous = queue.take();
        *queue = Some(runtime.spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let name = filename.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                write_unique(&dir, &filename, &resource, &written)
            })
            .await;
            match outcome {
                Ok(Ok(_)) => {},
                Ok(Err(e)) => warn!("Failed to write {}: {}", name, e),
                Err(e) => warn!("Writer task for {} failed: {}", name, e),
            }
        }));
    }
}

impl Presenter for FilePresenter {
    fn publish_preview(&self, kind: PreviewKind, resource: &ImageResource) {
        if kind != PreviewKind::Foreground {
            return;
        }
        if let Some(name) = &self.foreground_name {
            self.enqueue(resource, name);
        }
    }

    fn publish_export(&self, resource: &ImageResource, suggested_filename: &str) {
        self.enqueue(resource, suggested_filename);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_unique(
    dir: &Path,
    filename: &str,
    resource: &ImageResource,
    written: &Mutex<Vec<PathBuf>>,
) -> Result<PathBuf> {
    let path = unique_path(&dir.join(filename));
    std::fs::write(&path, resource.bytes())
        .map_err(|e| RmbgError::file_io_error("write output file", &path, &e))?;

    info!(path = %path.display(), bytes = resource.len(), "wrote output");
    lock(written).push(path.clone());
    Ok(path)
}

/// Suggested file name for a foreground cutout of `input`, e.g. `photo-rmbg.png`
#[must_use]
pub fn cutout_filename(input: &Path) -> String {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    format!(
        "{}-rmbg.{}",
        stem,
        OutputFormatHandler::get_extension(crate::config::OutputFormat::Png)
    )
}

/// First path of `path`, `path_1`, `path_2`, ... that does not exist yet
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let extension = path.extension().and_then(|s| s.to_str());
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    let mut counter = 1_u32;
    loop {
        let name = match extension {
            Some(ext) => format!("{}_{}.{}", stem, counter, ext),
            None => format!("{}_{}", stem, counter),
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

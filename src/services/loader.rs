//! Image loading service
//!
//! Decodes [`ImageResource`]s into [`RasterHandle`]s on the blocking pool and
//! keeps count of outstanding handles so repeated pipeline runs can be shown
//! not to leak them.

use crate::{
    error::{Result, RmbgError},
    types::{ImageResource, RasterHandle},
};
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, span, trace, Level};

#[derive(Debug, Default)]
struct RegistryInner {
    live: AtomicUsize,
    issued: AtomicU64,
}

/// Tracks transient handles allocated for decoded rasters
#[derive(Debug, Clone, Default)]
pub struct HandleRegistry {
    inner: Arc<RegistryInner>,
}

impl HandleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles currently held
    #[must_use]
    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Number of handles ever issued
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.inner.issued.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> HandleLease {
        let id = self.inner.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.live.fetch_add(1, Ordering::SeqCst);
        trace!(handle = id, "acquired raster handle");
        HandleLease {
            registry: Arc::clone(&self.inner),
            id,
        }
    }
}

/// A single outstanding handle; released on drop
#[derive(Debug)]
pub struct HandleLease {
    registry: Arc<RegistryInner>,
    id: u64,
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        self.registry.live.fetch_sub(1, Ordering::SeqCst);
        trace!(handle = self.id, "released raster handle");
    }
}

/// Header-level facts about an encoded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub has_alpha: bool,
    pub format: ImageFormat,
}

/// Decodes encoded images into raster handles
#[derive(Debug, Clone, Default)]
pub struct ImageLoader {
    registry: HandleRegistry,
}

impl ImageLoader {
    /// Create a loader with its own handle registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loader that reports into an existing registry
    #[must_use]
    pub fn with_registry(registry: HandleRegistry) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    /// Decode a resource into a raster handle
    ///
    /// # Errors
    /// - `Decode` for empty, malformed or zero-sized images
    pub async fn load(&self, resource: &ImageResource) -> Result<RasterHandle> {
        if resource.is_empty() {
            return Err(RmbgError::decode("resource is empty"));
        }

        let owned = resource.clone();
        let rgba = tokio::task::spawn_blocking(move || decode_rgba(&owned).map(|image| image.to_rgba8()))
            .await
            .map_err(|e| RmbgError::decode(format!("decode task failed: {}", e)))??;

        if rgba.width() == 0 || rgba.height() == 0 {
            return Err(RmbgError::decode(format!(
                "decoded image {} has zero dimensions",
                resource.short_id()
            )));
        }

        debug!(
            id = %resource.short_id(),
            width = rgba.width(),
            height = rgba.height(),
            "decoded raster"
        );
        Ok(RasterHandle::with_lease(rgba, self.registry.acquire()))
    }

    /// Decode two resources concurrently; resolves once both have resolved
    ///
    /// # Errors
    /// - The first `Decode` error of either load
    pub async fn load_pair(
        &self,
        first: &ImageResource,
        second: &ImageResource,
    ) -> Result<(RasterHandle, RasterHandle)> {
        tokio::try_join!(self.load(first), self.load(second))
    }

    /// Decode a resource completely and discard the pixels
    ///
    /// Catches bodies that are truncated or corrupt behind a valid header.
    /// No raster handle is issued.
    ///
    /// # Errors
    /// - `Decode` for empty, malformed or zero-sized images
    pub async fn verify(resource: &ImageResource) -> Result<ImageInfo> {
        if resource.is_empty() {
            return Err(RmbgError::decode("resource is empty"));
        }

        let owned = resource.clone();
        tokio::task::spawn_blocking(move || {
            let image = decode_rgba(&owned)?;
            if image.width() == 0 || image.height() == 0 {
                return Err(RmbgError::decode("image has zero dimensions"));
            }
            let format = owned
                .format()
                .or_else(|| image::guess_format(owned.bytes()).ok())
                .ok_or_else(|| RmbgError::decode("unrecognised image format"))?;
            Ok(ImageInfo {
                width: image.width(),
                height: image.height(),
                has_alpha: image.color().has_alpha(),
                format,
            })
        })
        .await
        .map_err(|e| RmbgError::decode(format!("verify task failed: {}", e)))?
    }

    /// Read dimensions and pixel layout from the image header without decoding pixels
    ///
    /// # Errors
    /// - `Decode` when the format cannot be recognised or the header is invalid
    pub fn read_header(resource: &ImageResource) -> Result<ImageInfo> {
        let reader = ImageReader::new(Cursor::new(resource.bytes()))
            .with_guessed_format()
            .map_err(|e| RmbgError::decode(format!("failed to read header: {}", e)))?;
        let format = reader
            .format()
            .ok_or_else(|| RmbgError::decode("unrecognised image format"))?;
        let decoder = reader
            .into_decoder()
            .map_err(|e| RmbgError::decode(format!("invalid {:?} header: {}", format, e)))?;
        let (width, height) = decoder.dimensions();

        if width == 0 || height == 0 {
            return Err(RmbgError::decode("image has zero dimensions"));
        }

        Ok(ImageInfo {
            width,
            height,
            has_alpha: decoder.color_type().has_alpha(),
            format,
        })
    }
}

/// Decode with the format hint first, falling back to content sniffing
fn decode_rgba(resource: &ImageResource) -> Result<DynamicImage> {
    let _span = span!(Level::DEBUG, "decode", id = %resource.short_id(), bytes = resource.len())
        .entered();

    let bytes = resource.bytes();
    let hinted = resource.format().map(|format| {
        image::load_from_memory_with_format(bytes, format)
    });

    match hinted {
        Some(Ok(image)) => Ok(image),
        Some(Err(hint_err)) => {
            log::debug!(
                "Hinted decode failed for {}: {}. Attempting content-based detection.",
                resource.short_id(),
                hint_err
            );
            image::load_from_memory(bytes).map_err(|content_err| {
                RmbgError::decode(format!(
                    "failed with both hinted and content-based detection. Hint error: {}. Content error: {}",
                    hint_err, content_err
                ))
            })
        },
        None => image::load_from_memory(bytes)
            .map_err(|e| RmbgError::decode(format!("unrecognised image data: {}", e))),
    }
}

//! Core data types exchanged between pipeline components

use crate::error::{Result, RmbgError};
use crate::services::loader::HandleLease;
use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Immutable encoded image blob (PNG, JPEG, ...)
///
/// Cloning is cheap: the bytes are shared. Two resources compare equal when
/// their bytes are equal, regardless of the format hint.
#[derive(Clone)]
pub struct ImageResource {
    bytes: Arc<[u8]>,
    format_hint: Option<ImageFormat>,
    digest: [u8; 32],
}

impl ImageResource {
    /// Wrap encoded image bytes
    pub fn from_bytes<B: Into<Vec<u8>>>(bytes: B) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let digest: [u8; 32] = Sha256::digest(&bytes).into();
        Self {
            bytes: Arc::from(bytes),
            format_hint: None,
            digest,
        }
    }

    /// Attach a format hint (e.g. from a file extension or an encoder)
    #[must_use]
    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format_hint = Some(format);
        self
    }

    /// Read a resource from disk, taking the format hint from the extension
    pub async fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let bytes = tokio::fs::read(path_ref)
            .await
            .map_err(|e| RmbgError::file_io_error("read image file", path_ref, &e))?;
        let resource = Self::from_bytes(bytes);
        Ok(match ImageFormat::from_path(path_ref) {
            Ok(format) => resource.with_format(format),
            Err(_) => resource,
        })
    }

    /// Encoded bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Format hint if present, otherwise sniffed from the magic bytes
    #[must_use]
    pub fn format(&self) -> Option<ImageFormat> {
        self.format_hint
            .or_else(|| image::guess_format(&self.bytes).ok())
    }

    /// SHA-256 of the encoded bytes
    #[must_use]
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Short hex identifier used in logs and status messages
    #[must_use]
    pub fn short_id(&self) -> String {
        self.digest
            .iter()
            .take(6)
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl PartialEq for ImageResource {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
            || (self.digest == other.digest && self.bytes == other.bytes)
    }
}

impl Eq for ImageResource {}

impl fmt::Debug for ImageResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageResource")
            .field("id", &self.short_id())
            .field("len", &self.bytes.len())
            .field("format", &self.format())
            .finish()
    }
}

/// Identifies a segmentation model in a [`crate::segmentation::ModelRegistry`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelSelector(String);

impl ModelSelector {
    /// Create a selector; the key must not be blank
    pub fn new<S: Into<String>>(key: S) -> Result<Self> {
        let key = key.into();
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(RmbgError::invalid_config("model selector must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ModelSelector {
    type Err = RmbgError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ModelSelector {
    type Error = RmbgError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ModelSelector> for String {
    fn from(value: ModelSelector) -> Self {
        value.0
    }
}

/// Decoded RGBA raster with known native dimensions
///
/// Handles produced by [`crate::services::ImageLoader`] hold a lease on the
/// loader's handle registry; the lease is returned when the handle is dropped.
#[derive(Debug)]
pub struct RasterHandle {
    image: RgbaImage,
    _lease: Option<HandleLease>,
}

impl RasterHandle {
    /// Wrap an already decoded image without registering a lease
    #[must_use]
    pub fn from_rgba(image: RgbaImage) -> Self {
        Self {
            image,
            _lease: None,
        }
    }

    pub(crate) fn with_lease(image: RgbaImage, lease: HandleLease) -> Self {
        Self {
            image,
            _lease: Some(lease),
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// True when either dimension is zero
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    #[must_use]
    pub fn as_rgba(&self) -> &RgbaImage {
        &self.image
    }
}

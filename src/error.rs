//! Error types for pipeline operations

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, RmbgError>;

/// Error taxonomy for the loader, compositor, segmentation and orchestration layers
#[derive(Error, Debug)]
pub enum RmbgError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A supplied resource is not a decodable raster image
    #[error("Decode error: {0}")]
    Decode(String),

    /// Segmentation backend failed or could not be initialized
    #[error("Segmentation error: {0}")]
    Segmentation(String),

    /// Segmentation did not resolve within the configured bound
    #[error("Segmentation timed out after {0}ms")]
    Timeout(u64),

    /// Canvas rasterization or encoding failure
    #[error("Composition error: {0}")]
    Composition(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The orchestrator task is no longer running
    #[error("Pipeline closed")]
    PipelineClosed,
}

impl RmbgError {
    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new segmentation error
    pub fn segmentation<S: Into<String>>(msg: S) -> Self {
        Self::Segmentation(msg.into())
    }

    /// Create a new composition error
    pub fn composition<S: Into<String>>(msg: S) -> Self {
        Self::Composition(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a timeout error from the elapsed bound
    #[must_use]
    pub fn timeout(bound: std::time::Duration) -> Self {
        Self::Timeout(bound.as_millis() as u64)
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Wrap any backend failure as a segmentation error naming the model
    pub fn segmentation_with_model<E: std::fmt::Display>(model: &str, error: E) -> Self {
        Self::Segmentation(format!("model '{}': {}", model, error))
    }

    /// Short category label used in status messages
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Decode(_) => "decode",
            Self::Segmentation(_) => "segmentation",
            Self::Timeout(_) => "timeout",
            Self::Composition(_) => "composition",
            Self::InvalidConfig(_) => "config",
            Self::PipelineClosed => "pipeline",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    #[test]
    fn test_error_creation() {
        let err = RmbgError::decode("not a png");
        assert!(matches!(err, RmbgError::Decode(_)));

        let err = RmbgError::composition("zero-sized canvas");
        assert!(matches!(err, RmbgError::Composition(_)));
    }

    #[test]
    fn test_error_display() {
        let err = RmbgError::invalid_config("JPEG quality must be 0-100");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: JPEG quality must be 0-100"
        );

        let err = RmbgError::timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Segmentation timed out after 1500ms");
    }

    #[test]
    fn test_enhanced_error_context() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = RmbgError::file_io_error("write export", Path::new("/out/result.png"), &io_error);
        let error_string = err.to_string();
        assert!(error_string.contains("write export"));
        assert!(error_string.contains("/out/result.png"));

        let err = RmbgError::config_value_error("jpeg_quality", 150, "0-100", Some(90));
        let error_string = err.to_string();
        assert!(error_string.contains("jpeg_quality"));
        assert!(error_string.contains("150"));
        assert!(error_string.contains("Recommended: 90"));

        let err = RmbgError::segmentation_with_model("modnet", "session init failed");
        assert_eq!(
            err.to_string(),
            "Segmentation error: model 'modnet': session init failed"
        );
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(RmbgError::decode("x").category(), "decode");
        assert_eq!(RmbgError::segmentation("x").category(), "segmentation");
        assert_eq!(RmbgError::timeout(Duration::from_secs(1)).category(), "timeout");
        assert_eq!(RmbgError::PipelineClosed.category(), "pipeline");
    }
}

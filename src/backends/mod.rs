//! Segmenter implementations
//!
//! - Alpha passthrough (uses an existing cutout's alpha channel)
//! - ONNX Runtime matting models (feature `onnx`)

pub mod passthrough;

#[cfg(feature = "onnx")]
pub mod onnx;

// Test utilities for segmenter testing
#[cfg(test)]
pub mod test_utils;

pub use self::passthrough::AlphaPassthroughSegmenter;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxSegmenter;

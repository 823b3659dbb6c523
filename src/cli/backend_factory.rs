//! Model registry construction for the CLI
//!
//! "alpha" is always available. With the `onnx` feature the matting models
//! are registered as well; their weights are resolved from `--model-path`
//! when a model is first used.

use crate::backends::AlphaPassthroughSegmenter;
use crate::{error::Result, segmentation::ModelRegistry, types::ModelSelector};
use std::sync::Arc;

/// Model key of the alpha-passthrough segmenter
pub(crate) const ALPHA_MODEL: &str = "alpha";

/// ONNX matting models offered by the CLI
#[cfg(feature = "onnx")]
pub(crate) const ONNX_MODELS: [&str; 4] = ["modnet", "silueta", "briaai", "u2netp"];

/// Build the registry of every model this binary can run
pub(crate) fn build_registry() -> Result<ModelRegistry> {
    let mut registry = ModelRegistry::new();
    registry.register_instance(
        ModelSelector::new(ALPHA_MODEL)?,
        Arc::new(AlphaPassthroughSegmenter),
    );

    #[cfg(feature = "onnx")]
    register_onnx_models(&mut registry)?;

    Ok(registry)
}

#[cfg(feature = "onnx")]
fn register_onnx_models(registry: &mut ModelRegistry) -> Result<()> {
    use crate::backends::OnnxSegmenter;
    use crate::config::RuntimeConfig;
    use crate::segmentation::Segmenter;

    for name in ONNX_MODELS {
        registry.register(
            ModelSelector::new(name)?,
            move |runtime: &RuntimeConfig| -> Result<Arc<dyn Segmenter>> {
                Ok(Arc::new(OnnxSegmenter::from_runtime(name, runtime)?))
            },
        );
    }
    Ok(())
}

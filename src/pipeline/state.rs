//! Orchestrator working memory and its public snapshot

use crate::types::{ImageResource, ModelSelector};
use std::fmt;

/// Identifies one issued segmentation call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentationToken(pub(crate) u64);

impl SegmentationToken {
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SegmentationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Derived pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    /// Nothing segmented yet (or the last segmentation failed)
    Idle,
    /// A segmentation call is live
    Segmenting,
    /// A foreground is available but no composite for it
    SegmentationReady,
    /// A composition is running
    Composing,
    /// The current foreground has been composed
    Composed,
}

/// State owned and mutated only by the orchestrator task
#[derive(Debug, Default)]
pub(crate) struct PipelineState {
    pub selected_model: Option<ModelSelector>,
    pub input_image: Option<ImageResource>,
    pub background_image: Option<ImageResource>,
    pub foreground_result: Option<ImageResource>,
    pub composite_result: Option<ImageResource>,
    pub in_flight_segmentation: Option<SegmentationToken>,
    /// Generation of the latest triggered composition
    pub compose_generation: u64,
    /// Set while the composition of `compose_generation` is running
    pub composing: bool,
    /// Latest selection per image slot; older verifications are dropped
    pub input_generation: u64,
    pub background_generation: u64,
    /// Image verifications not yet drained, superseded ones included
    pub pending_loads: usize,
    /// Compositions not yet drained, superseded ones included
    pub pending_compositions: usize,
    next_token: u64,
    pub segmentation_calls: u64,
    pub composition_calls: u64,
    pub discarded_results: u64,
    pub processed_events: u64,
}

impl PipelineState {
    pub(super) fn with_model(model: Option<ModelSelector>) -> Self {
        Self {
            selected_model: model,
            ..Self::default()
        }
    }

    /// Issue a fresh token and make it the only live one
    pub fn issue_token(&mut self) -> SegmentationToken {
        self.next_token += 1;
        let token = SegmentationToken(self.next_token);
        self.in_flight_segmentation = Some(token);
        self.segmentation_calls += 1;
        token
    }

    #[must_use]
    pub fn is_current(&self, token: SegmentationToken) -> bool {
        self.in_flight_segmentation == Some(token)
    }

    /// Start a new composition generation, superseding any running one
    pub fn next_compose_generation(&mut self) -> u64 {
        self.compose_generation += 1;
        self.composing = true;
        self.composition_calls += 1;
        self.compose_generation
    }

    /// Drop any running composition without starting a new one
    pub fn invalidate_composition(&mut self) {
        self.compose_generation += 1;
        self.composing = false;
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            selected_model: self.selected_model.clone(),
            input_image: self.input_image.clone(),
            background_image: self.background_image.clone(),
            foreground_result: self.foreground_result.clone(),
            composite_result: self.composite_result.clone(),
            in_flight_segmentation: self.in_flight_segmentation,
            composing: self.composing,
            pending_work: self.pending_loads + self.pending_compositions,
            segmentation_calls: self.segmentation_calls,
            composition_calls: self.composition_calls,
            discarded_results: self.discarded_results,
            processed_events: self.processed_events,
        }
    }
}

/// Read-only copy of the pipeline state, published after every change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSnapshot {
    pub selected_model: Option<ModelSelector>,
    pub input_image: Option<ImageResource>,
    pub background_image: Option<ImageResource>,
    pub foreground_result: Option<ImageResource>,
    pub composite_result: Option<ImageResource>,
    pub in_flight_segmentation: Option<SegmentationToken>,
    pub composing: bool,
    /// Image verifications and compositions still running, superseded ones included
    pub pending_work: usize,
    /// Segmentation calls issued so far
    pub segmentation_calls: u64,
    /// Compositions started so far
    pub composition_calls: u64,
    /// Results dropped because a newer request superseded them
    pub discarded_results: u64,
    /// User events handled so far
    pub processed_events: u64,
}

impl PipelineSnapshot {
    #[must_use]
    pub fn phase(&self) -> PipelinePhase {
        if self.in_flight_segmentation.is_some() {
            PipelinePhase::Segmenting
        } else if self.composing {
            PipelinePhase::Composing
        } else if self.foreground_result.is_some() && self.composite_result.is_some() {
            PipelinePhase::Composed
        } else if self.foreground_result.is_some() {
            PipelinePhase::SegmentationReady
        } else {
            PipelinePhase::Idle
        }
    }

    /// True when no segmentation, composition or image verification is running
    ///
    /// Superseded segmentations are not waited for; they hold no raster handles.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.in_flight_segmentation.is_none() && !self.composing && self.pending_work == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_latest_token_is_current() {
        let mut state = PipelineState::default();
        let first = state.issue_token();
        let second = state.issue_token();

        assert!(!state.is_current(first));
        assert!(state.is_current(second));
        assert_eq!(state.segmentation_calls, 2);
        assert_eq!(second.to_string(), "#2");

        state.in_flight_segmentation = None;
        assert!(!state.is_current(second));
    }

    #[test]
    fn test_with_model_starts_clean() {
        let model = ModelSelector::new("modnet").unwrap();
        let mut state = PipelineState::with_model(Some(model.clone()));
        assert_eq!(state.selected_model, Some(model));
        assert!(state.input_image.is_none());
        assert_eq!(state.issue_token(), SegmentationToken(1));
    }

    #[test]
    fn test_compose_generations() {
        let mut state = PipelineState::default();
        let first = state.next_compose_generation();
        let second = state.next_compose_generation();
        assert!(second > first);
        assert!(state.composing);
        assert_eq!(state.composition_calls, 2);

        state.invalidate_composition();
        assert!(!state.composing);
        assert_ne!(state.compose_generation, second);
    }

    #[test]
    fn test_phase_derivation() {
        let resource = ImageResource::from_bytes(vec![1]);
        let mut snapshot = PipelineSnapshot::default();
        assert_eq!(snapshot.phase(), PipelinePhase::Idle);
        assert!(snapshot.is_idle());

        snapshot.in_flight_segmentation = Some(SegmentationToken(1));
        assert_eq!(snapshot.phase(), PipelinePhase::Segmenting);
        assert!(!snapshot.is_idle());

        snapshot.in_flight_segmentation = None;
        snapshot.foreground_result = Some(resource.clone());
        assert_eq!(snapshot.phase(), PipelinePhase::SegmentationReady);

        snapshot.composing = true;
        assert_eq!(snapshot.phase(), PipelinePhase::Composing);

        snapshot.composing = false;
        snapshot.composite_result = Some(resource);
        assert_eq!(snapshot.phase(), PipelinePhase::Composed);
        assert!(snapshot.is_idle());

        snapshot.pending_work = 1;
        assert_eq!(snapshot.phase(), PipelinePhase::Composed);
        assert!(!snapshot.is_idle());
    }
}

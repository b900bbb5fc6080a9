//! États du pipeline

use serde::Serialize;

/// `Idle -> Streaming -> Flushing -> Done`, ou `Failed` depuis tout état
/// non terminal. Un run ignoré (source déjà chargée) passe de `Idle` à `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Streaming,
    Flushing,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Idle, Streaming) | (Idle, Done) => true,
            (Streaming, Flushing) => true,
            (Flushing, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

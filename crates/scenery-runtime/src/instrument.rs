#![forbid(unsafe_code)]

//! Tracing targets, spans, and counters for the pipeline.
//!
//! Spans:
//! - `pipeline.invoke`: one per invocation; records `pushed` and
//!   `duration_us` when the lifecycle finishes.
//! - `pipeline.undo` / `pipeline.redo`: one per history transition.
//!
//! Library code never installs a subscriber.

use scenery_core::OperationMetadata;
use tracing::Span;

/// Target for dispatcher lifecycle events.
pub const PIPELINE_TARGET: &str = "scenery.pipeline";
/// Target for history stack transitions.
pub const HISTORY_TARGET: &str = "scenery.history";
/// Target for telemetry hook failures.
pub const TELEMETRY_TARGET: &str = "scenery.telemetry";

/// Per-dispatcher outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineStats {
    pub invoked: u64,
    pub completed: u64,
    pub blocked: u64,
    pub failed: u64,
    /// Entries pushed or merged into history.
    pub pushed: u64,
    /// Subset of `pushed` that merged into the previous entry.
    pub coalesced: u64,
    pub undone: u64,
    pub redone: u64,
}

pub(crate) fn invoke_span(meta: &OperationMetadata) -> Span {
    tracing::debug_span!(
        "pipeline.invoke",
        command_id = %meta.id,
        pushed = tracing::field::Empty,
        duration_us = tracing::field::Empty,
    )
}

pub(crate) fn undo_span(label: &str) -> Span {
    tracing::debug_span!("pipeline.undo", label = %label)
}

pub(crate) fn redo_span(label: &str) -> Span {
    tracing::debug_span!("pipeline.redo", label = %label)
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#![forbid(unsafe_code)]

//! Scenery Runtime
//!
//! This crate runs the operation pipeline defined by `scenery-core`: it
//! sequences every mutation, records reversible results, and replays them on
//! undo/redo.
//!
//! # Key Components
//!
//! - [`Dispatcher`] - The only entry point client code calls
//! - [`HistoryManager`] - Bounded two-stack undo/redo ledger
//! - [`BulkComposer`] - Folds several commits into one undo step
//! - [`HookRegistry`] - Telemetry listeners isolated from pipeline outcome
//! - [`PipelineConfig`] - Capacity, coalescing, and run-queue policy
//!
//! # How it fits in the system
//! Panels and tools build an [`Operation`](scenery_core::Operation) and hand
//! it to the dispatcher. The dispatcher builds a fresh
//! [`ExecutionContext`](scenery_core::ExecutionContext), runs preconditions
//! and perform, pushes the commit to history, and emits lifecycle events.
//! Undo and redo go through the dispatcher too so the busy counters on the
//! shared store stay consistent.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod instrument;
pub mod telemetry;
pub mod undo;

pub use config::{HistoryConfig, PipelineConfig};
pub use dispatch::{Dispatcher, InvokeOptions, Invocation};
pub use error::PipelineError;
pub use instrument::PipelineStats;
pub use telemetry::{
    HookError, HookRegistry, HookResult, HookSubscription, PipelineEvent, PipelineEventKind,
};
pub use undo::{
    BulkComposer, EntryInfo, EntryMetadata, HistoryEntry, HistoryManager, HistorySnapshot,
    HistorySubscription,
};

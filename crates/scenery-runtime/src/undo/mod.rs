#![forbid(unsafe_code)]

//! Undo/redo support.
//!
//! - [`HistoryManager`]: two-stack ledger with capacity eviction and
//!   coalescing
//! - [`BulkComposer`]: folds several commits into one undo step

pub mod bulk;
pub mod history;
mod sequence;

pub use bulk::BulkComposer;
pub use history::{
    EntryFn, EntryInfo, EntryMetadata, HistoryEntry, HistoryManager, HistorySnapshot,
    HistorySubscription,
};

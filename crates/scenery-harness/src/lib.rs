#![forbid(unsafe_code)]

//! Test tooling for the Scenery pipeline.
//!
//! - [`scene`]: a small scene document with reference operations
//! - [`spies`]: history entries and commits that count their calls
//! - [`capture`]: lifecycle event recorder and tracing capture layer
//! - [`yield_now`]: a future that suspends exactly once

pub mod capture;
pub mod scene;
pub mod spies;
pub mod yield_now;

pub use capture::{CaptureHandle, CapturedEvent, CapturedSpan, EventRecorder, with_captured_tracing};
pub use scene::{
    AddNode, NamePolicy, PropertyValue, RemoveNode, RenameNode, SceneDocument, SceneNode,
    SetSelection, UpdateObjectProperty,
};
pub use spies::{CallCounter, SpyCalls, failing_entry, spy_commit, spy_entry};
pub use yield_now::yield_now;

#![forbid(unsafe_code)]

//! Scenery core: the unit-of-work contract of the operation pipeline.
//!
//! # Role in Scenery
//! `scenery-core` defines what a mutation *is*. Clients (panels, the scene
//! graph, viewport sync) implement [`Operation`] or [`Command`] against a
//! shared [`Store`]; the runtime crate (`scenery-runtime`) sequences them,
//! records their [`Commit`]s in history, and replays them on undo/redo.
//!
//! # Primary responsibilities
//! - **ExecutionContext**: fresh per call; carries the store, a snapshot taken
//!   before the call, the service container, and the request time.
//! - **Store**: single-threaded shared handle over the domain document plus
//!   the coarse [`PipelineStatus`] counters the UI reads.
//! - **Operation / Command**: metadata, precondition, perform/execute.
//! - **Commit**: undo/redo closures produced by a successful perform.
//!
//! # How it fits in the system
//! Nothing here runs the pipeline. The dispatcher in `scenery-runtime` is the
//! only component client code calls directly.

pub mod commit;
pub mod container;
pub mod context;
pub mod error;
pub mod metadata;
pub mod operation;
pub mod store;

pub use commit::{Commit, CommitFn, InvokeResult};
pub use container::ServiceContainer;
pub use context::{ContextFactory, ContextOverride, ExecutionContext, SnapshotFn};
pub use error::{OperationError, OperationResult};
pub use metadata::OperationMetadata;
pub use operation::{Blocked, Command, Operation, Precondition};
pub use store::{PipelineStatus, Store};

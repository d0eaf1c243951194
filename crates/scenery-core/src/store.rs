#![forbid(unsafe_code)]

//! Shared mutable store handed to every operation.
//!
//! [`Store<S>`] wraps the domain document in reference-counted storage
//! (`Rc<RefCell<..>>`). Cloning a `Store` yields a new handle to the **same**
//! document, the way the composition root hands one store to the dispatcher,
//! the panels, and the viewport.
//!
//! # Snapshots
//!
//! [`Store::snapshot`] clones the document into an `Rc<S>`. When `S` is built
//! from persistent collections (`im::HashMap`, `im::OrdMap`, `im::Vector`) the
//! clone is O(1)-ish and shares structure with the live document, so taking a
//! snapshot for every call is cheap. The snapshot is never updated afterwards.
//!
//! # Failure Modes
//!
//! - **Re-entrant update**: calling [`Store::update`] from inside another
//!   `update`/`read` closure on the same store panics (RefCell rules). Access
//!   is closure-scoped so no borrow ever survives an `.await`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Coarse execution counters the pipeline keeps on the shared store.
///
/// These are a busy signal for UI (disable buttons while executing), not a
/// lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStatus {
    /// Invocations that have started but not yet finished.
    pub pending_command_count: u32,
    /// True while any invocation, undo, or redo is in flight.
    pub is_executing: bool,
    /// Command id of the entry currently on top of the undo stack.
    pub last_undoable_command_id: Option<String>,
}

struct StoreInner<S> {
    document: S,
    status: PipelineStatus,
}

/// Shared handle to the domain document and pipeline status.
pub struct Store<S> {
    inner: Rc<RefCell<StoreInner<S>>>,
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Store")
            .field("document", &inner.document)
            .field("status", &inner.status)
            .finish()
    }
}

impl<S> Store<S> {
    /// Create a store around an initial document.
    #[must_use]
    pub fn new(document: S) -> Self {
        Self {
            inner: Rc::new(RefCell::new(StoreInner {
                document,
                status: PipelineStatus::default(),
            })),
        }
    }

    /// Read the document through a closure.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.borrow().document)
    }

    /// Mutate the document through a closure.
    pub fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.inner.borrow_mut().document)
    }

    /// Copy of the current pipeline status.
    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        self.inner.borrow().status.clone()
    }

    /// Mutate the pipeline status. Reserved for the dispatcher.
    pub fn update_status<R>(&self, f: impl FnOnce(&mut PipelineStatus) -> R) -> R {
        f(&mut self.inner.borrow_mut().status)
    }

    /// Whether two handles point at the same store.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<S: Clone> Store<S> {
    /// Clone of the current document.
    #[must_use]
    pub fn get(&self) -> S {
        self.inner.borrow().document.clone()
    }

    /// Replace the whole document.
    pub fn set(&self, document: S) {
        self.inner.borrow_mut().document = document;
    }

    /// Point-in-time, immutable copy of the document.
    #[must_use]
    pub fn snapshot(&self) -> Rc<S> {
        Rc::new(self.get())
    }
}

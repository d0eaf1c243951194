#![forbid(unsafe_code)]

//! Counting stand-ins for history entries and commits.

use std::cell::Cell;
use std::rc::Rc;

use scenery_core::{Commit, ExecutionContext, OperationError};
use scenery_runtime::HistoryEntry;

/// Shared call counter.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Rc<Cell<usize>>);

impl CallCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self) -> usize {
        self.0.get()
    }

    fn hit(&self) {
        self.0.set(self.0.get() + 1);
    }
}

/// Counters for both directions of a spied unit.
#[derive(Debug, Clone, Default)]
pub struct SpyCalls {
    pub undo: CallCounter,
    pub redo: CallCounter,
}

impl SpyCalls {
    /// `(undo, redo)` call counts.
    #[must_use]
    pub fn counts(&self) -> (usize, usize) {
        (self.undo.get(), self.redo.get())
    }
}

/// History entry whose callbacks only count.
#[must_use]
pub fn spy_entry(label: &str) -> (HistoryEntry, SpyCalls) {
    let calls = SpyCalls::default();
    let (undo, redo) = (calls.undo.clone(), calls.redo.clone());
    let entry = HistoryEntry::new(
        label,
        move || {
            undo.hit();
            Ok(())
        },
        move || {
            redo.hit();
            Ok(())
        },
    );
    (entry, calls)
}

/// History entry whose undo always fails. Redo succeeds.
#[must_use]
pub fn failing_entry(label: &str) -> (HistoryEntry, SpyCalls) {
    let calls = SpyCalls::default();
    let (undo, redo) = (calls.undo.clone(), calls.redo.clone());
    let message = format!("{label} cannot be undone");
    let entry = HistoryEntry::new(
        label,
        move || {
            undo.hit();
            Err(OperationError::other(message.clone()))
        },
        move || {
            redo.hit();
            Ok(())
        },
    );
    (entry, calls)
}

/// Commit whose callbacks only count.
#[must_use]
pub fn spy_commit<S: 'static>() -> (Commit<S>, SpyCalls) {
    let calls = SpyCalls::default();
    let (undo, redo) = (calls.undo.clone(), calls.redo.clone());
    let commit = Commit::new(
        move |_: &ExecutionContext<S>| {
            undo.hit();
            Ok(())
        },
        move |_: &ExecutionContext<S>| {
            redo.hit();
            Ok(())
        },
    );
    (commit, calls)
}

#![forbid(unsafe_code)]

//! Reversible results of a perform step.
//!
//! A [`Commit`] stores the undo and redo callbacks an operation hands back
//! after mutating state. Operations can't keep references into the store
//! across history (lifetimes), so the callbacks own whatever they captured
//! ("previous value", removed node) and receive a fresh [`ExecutionContext`]
//! each time they run.
//!
//! # Invariants
//!
//! - `undo()` after perform restores the pre-perform state, including any
//!   derived state perform touched (dirty flags, caches).
//! - `redo()` after `undo()` restores exactly the post-perform state.

use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::{self, LocalBoxFuture};

use crate::context::ExecutionContext;
use crate::error::OperationResult;

/// Boxed undo/redo callback.
pub type CommitFn<S> =
    Box<dyn FnMut(ExecutionContext<S>) -> LocalBoxFuture<'static, OperationResult<()>>>;

/// Undo/redo callbacks plus display data.
pub struct Commit<S> {
    /// Label shown in history UI. Falls back to the operation title.
    pub label: Option<String>,
    pub before_snapshot: Option<Rc<S>>,
    pub after_snapshot: Option<Rc<S>>,
    pub undo: CommitFn<S>,
    pub redo: CommitFn<S>,
}

impl<S> fmt::Debug for Commit<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commit")
            .field("label", &self.label)
            .field("has_before_snapshot", &self.before_snapshot.is_some())
            .field("has_after_snapshot", &self.after_snapshot.is_some())
            .finish_non_exhaustive()
    }
}

impl<S: 'static> Commit<S> {
    /// Build a commit from synchronous callbacks.
    pub fn new<U, R>(mut undo: U, mut redo: R) -> Self
    where
        U: FnMut(&ExecutionContext<S>) -> OperationResult<()> + 'static,
        R: FnMut(&ExecutionContext<S>) -> OperationResult<()> + 'static,
    {
        Self::from_boxed(
            Box::new(move |ctx| future::ready(undo(&ctx)).boxed_local()),
            Box::new(move |ctx| future::ready(redo(&ctx)).boxed_local()),
        )
    }

    /// Build a commit from callbacks that may suspend.
    pub fn from_async<U, UF, R, RF>(mut undo: U, mut redo: R) -> Self
    where
        U: FnMut(ExecutionContext<S>) -> UF + 'static,
        UF: Future<Output = OperationResult<()>> + 'static,
        R: FnMut(ExecutionContext<S>) -> RF + 'static,
        RF: Future<Output = OperationResult<()>> + 'static,
    {
        Self::from_boxed(
            Box::new(move |ctx| undo(ctx).boxed_local()),
            Box::new(move |ctx| redo(ctx).boxed_local()),
        )
    }

    /// Build a commit from already boxed callbacks.
    #[must_use]
    pub fn from_boxed(undo: CommitFn<S>, redo: CommitFn<S>) -> Self {
        Self {
            label: None,
            before_snapshot: None,
            after_snapshot: None,
            undo,
            redo,
        }
    }
}

impl<S> Commit<S> {
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_before_snapshot(mut self, snapshot: Rc<S>) -> Self {
        self.before_snapshot = Some(snapshot);
        self
    }

    #[must_use]
    pub fn with_after_snapshot(mut self, snapshot: Rc<S>) -> Self {
        self.after_snapshot = Some(snapshot);
        self
    }

    /// Run the undo callback.
    pub async fn run_undo(&mut self, ctx: ExecutionContext<S>) -> OperationResult<()> {
        (self.undo)(ctx).await
    }

    /// Run the redo callback.
    pub async fn run_redo(&mut self, ctx: ExecutionContext<S>) -> OperationResult<()> {
        (self.redo)(ctx).await
    }
}

/// Outcome of a perform step.
///
/// `did_mutate == false` means nothing observable changed (for example the
/// value already equalled the target). Such a result never enters history,
/// even if it carries a commit.
pub struct InvokeResult<S> {
    pub did_mutate: bool,
    pub commit: Option<Commit<S>>,
}

impl<S> fmt::Debug for InvokeResult<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeResult")
            .field("did_mutate", &self.did_mutate)
            .field("commit", &self.commit)
            .finish()
    }
}

impl<S> InvokeResult<S> {
    /// Nothing changed.
    #[must_use]
    pub fn unchanged() -> Self {
        Self {
            did_mutate: false,
            commit: None,
        }
    }

    /// State changed and can be reversed with `commit`.
    #[must_use]
    pub fn mutated(commit: Commit<S>) -> Self {
        Self {
            did_mutate: true,
            commit: Some(commit),
        }
    }

    /// State changed but cannot be undone.
    #[must_use]
    pub fn mutated_without_commit() -> Self {
        Self {
            did_mutate: true,
            commit: None,
        }
    }

    /// Whether this result should be recorded in history.
    #[must_use]
    pub fn is_undoable(&self) -> bool {
        self.did_mutate && self.commit.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ServiceContainer;
    use crate::store::Store;
    use futures::executor::block_on;

    fn ctx(store: &Store<i32>) -> ExecutionContext<i32> {
        ExecutionContext::capture(store, &ServiceContainer::new())
    }

    #[test]
    fn sync_commit_round_trip() {
        let store = Store::new(1);
        store.set(2);
        let mut commit = Commit::new(
            |ctx: &ExecutionContext<i32>| {
                ctx.state.set(1);
                Ok(())
            },
            |ctx: &ExecutionContext<i32>| {
                ctx.state.set(2);
                Ok(())
            },
        )
        .with_label("Set to 2");

        block_on(commit.run_undo(ctx(&store))).unwrap();
        assert_eq!(store.get(), 1);
        block_on(commit.run_redo(ctx(&store))).unwrap();
        assert_eq!(store.get(), 2);
        assert_eq!(commit.label.as_deref(), Some("Set to 2"));
    }

    #[test]
    fn async_commit_sees_fresh_snapshot() {
        let store = Store::new(10);
        let mut commit = Commit::from_async(
            |ctx: ExecutionContext<i32>| async move {
                let before = *ctx.snapshot;
                ctx.state.set(before - 1);
                Ok(())
            },
            |ctx: ExecutionContext<i32>| async move {
                let before = *ctx.snapshot;
                ctx.state.set(before + 1);
                Ok(())
            },
        );

        block_on(commit.run_undo(ctx(&store))).unwrap();
        block_on(commit.run_undo(ctx(&store))).unwrap();
        assert_eq!(store.get(), 8);
        block_on(commit.run_redo(ctx(&store))).unwrap();
        assert_eq!(store.get(), 9);
    }

    #[test]
    fn results_classify_undoability() {
        let noop = Commit::<i32>::new(|_| Ok(()), |_| Ok(()));
        assert!(InvokeResult::mutated(noop).is_undoable());
        assert!(!InvokeResult::<i32>::unchanged().is_undoable());
        assert!(!InvokeResult::<i32>::mutated_without_commit().is_undoable());

        let skipped = InvokeResult {
            did_mutate: false,
            commit: Some(Commit::<i32>::new(|_| Ok(()), |_| Ok(()))),
        };
        assert!(!skipped.is_undoable());
    }

    #[test]
    fn debug_hides_callbacks() {
        let commit = Commit::<i32>::new(|_| Ok(()), |_| Ok(())).with_label("x");
        let dbg = format!("{commit:?}");
        assert!(dbg.contains("Commit"));
        assert!(dbg.contains("\"x\""));
    }
}

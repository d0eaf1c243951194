#![forbid(unsafe_code)]

//! Composite commits for multi-object edits.
//!
//! A [`BulkComposer`] collects commits in the order their mutations were
//! applied and folds them into a single [`Commit`] so a multi-select edit is
//! one undo step. Undo replays the constituents in reverse order, redo in
//! original order. Each constituent receives its own freshly built context.
//!
//! # Failure Modes
//!
//! - **Constituent fails mid-replay**: the constituents already replayed by
//!   that call are driven back the other way (best effort, failures logged)
//!   and the first error is returned. The history manager then keeps the
//!   composite on the stack it came from.

use std::fmt;

use scenery_core::{Commit, ExecutionContext, SnapshotFn};

use super::sequence::{self, Step};
use crate::error::PipelineError;

/// Builder for a composite commit.
pub struct BulkComposer<S> {
    commits: Vec<Commit<S>>,
    snapshot_fn: Option<SnapshotFn<S>>,
}

impl<S> Default for BulkComposer<S> {
    fn default() -> Self {
        Self {
            commits: Vec::new(),
            snapshot_fn: None,
        }
    }
}

impl<S> fmt::Debug for BulkComposer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkComposer")
            .field("commits", &self.commits)
            .field("custom_snapshot", &self.snapshot_fn.is_some())
            .finish()
    }
}

impl<S: Clone + 'static> BulkComposer<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take per-constituent snapshots with `f` instead of `Clone`.
    #[must_use]
    pub fn with_snapshot_fn(mut self, f: SnapshotFn<S>) -> Self {
        self.snapshot_fn = Some(f);
        self
    }

    /// Append a commit. Commits are expected in application order.
    pub fn add(&mut self, commit: Commit<S>) {
        self.commits.push(commit);
    }

    #[must_use]
    pub fn with(mut self, commit: Commit<S>) -> Self {
        self.add(commit);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// Fold the collected commits into one.
    ///
    /// The label defaults to the single constituent's label, or
    /// `Bulk edit (<n> changes)`. The before snapshot comes from the first
    /// constituent and the after snapshot from the last.
    pub fn build(self, label: Option<String>) -> Result<Commit<S>, PipelineError> {
        let count = self.commits.len();
        let (Some(first), Some(last)) = (self.commits.first(), self.commits.last()) else {
            return Err(PipelineError::EmptyBulk);
        };
        let before = first.before_snapshot.clone();
        let after = last.after_snapshot.clone();
        let label = label.or_else(|| match (count, &first.label) {
            (1, Some(only)) => Some(only.clone()),
            _ => Some(format!("Bulk edit ({count} changes)")),
        });

        let steps = self
            .commits
            .into_iter()
            .map(|commit| Step {
                undo: commit.undo,
                redo: commit.redo,
            })
            .collect();

        let snapshot_fn = self.snapshot_fn;
        let (undo, redo) = sequence::compose(steps, move |ctx: &ExecutionContext<S>| {
            let mut next = match &snapshot_fn {
                Some(f) => ExecutionContext::new(&ctx.state, |doc| f(doc), &ctx.container),
                None => ExecutionContext::capture(&ctx.state, &ctx.container),
            };
            next.requested_at = ctx.requested_at;
            next
        });

        let mut commit = Commit::from_boxed(undo, redo);
        commit.label = label;
        commit.before_snapshot = before;
        commit.after_snapshot = after;
        Ok(commit)
    }
}

impl<S: Clone + 'static> Extend<Commit<S>> for BulkComposer<S> {
    fn extend<I: IntoIterator<Item = Commit<S>>>(&mut self, iter: I) {
        self.commits.extend(iter);
    }
}

impl<S: Clone + 'static> FromIterator<Commit<S>> for BulkComposer<S> {
    fn from_iter<I: IntoIterator<Item = Commit<S>>>(iter: I) -> Self {
        let mut composer = Self::new();
        composer.extend(iter);
        composer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use scenery_core::{OperationError, ServiceContainer, Store};
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    fn logged(log: &Log, name: &'static str) -> Commit<Vec<i32>> {
        let u = Rc::clone(log);
        let r = Rc::clone(log);
        Commit::new(
            move |_: &ExecutionContext<Vec<i32>>| {
                u.borrow_mut().push(format!("undo {name}"));
                Ok(())
            },
            move |_: &ExecutionContext<Vec<i32>>| {
                r.borrow_mut().push(format!("redo {name}"));
                Ok(())
            },
        )
        .with_label(name)
    }

    fn ctx(store: &Store<Vec<i32>>) -> ExecutionContext<Vec<i32>> {
        ExecutionContext::capture(store, &ServiceContainer::new())
    }

    #[test]
    fn empty_build_fails() {
        let err = BulkComposer::<i32>::new().build(None).unwrap_err();
        assert_eq!(err, PipelineError::EmptyBulk);
    }

    #[test]
    fn ordering_and_labels() {
        let log: Log = Rc::default();
        let composer: BulkComposer<Vec<i32>> = ["a", "b", "c"]
            .into_iter()
            .map(|n| logged(&log, n))
            .collect();
        assert_eq!(composer.len(), 3);

        let mut commit = composer.build(None).unwrap();
        assert_eq!(commit.label.as_deref(), Some("Bulk edit (3 changes)"));

        let store = Store::new(Vec::new());
        block_on(commit.run_undo(ctx(&store))).unwrap();
        block_on(commit.run_redo(ctx(&store))).unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["undo c", "undo b", "undo a", "redo a", "redo b", "redo c"]
        );
    }

    #[test]
    fn single_commit_keeps_label() {
        let log: Log = Rc::default();
        let commit = BulkComposer::new()
            .with(logged(&log, "only"))
            .build(None)
            .unwrap();
        assert_eq!(commit.label.as_deref(), Some("only"));

        let named = BulkComposer::new()
            .with(logged(&log, "x"))
            .build(Some("Align".into()))
            .unwrap();
        assert_eq!(named.label.as_deref(), Some("Align"));
    }

    #[test]
    fn snapshots_come_from_ends() {
        let first = Commit::<i32>::new(|_| Ok(()), |_| Ok(()))
            .with_before_snapshot(Rc::new(1))
            .with_after_snapshot(Rc::new(2));
        let second = Commit::<i32>::new(|_| Ok(()), |_| Ok(()))
            .with_before_snapshot(Rc::new(2))
            .with_after_snapshot(Rc::new(3));
        let commit = BulkComposer::new()
            .with(first)
            .with(second)
            .build(None)
            .unwrap();
        assert_eq!(commit.before_snapshot.as_deref(), Some(&1));
        assert_eq!(commit.after_snapshot.as_deref(), Some(&3));
    }

    #[test]
    fn each_constituent_sees_fresh_snapshot() {
        let store = Store::new(vec![0]);
        let push = |v: i32| {
            Commit::new(
                |ctx: &ExecutionContext<Vec<i32>>| {
                    ctx.state.update(|doc| doc.pop());
                    Ok(())
                },
                move |ctx: &ExecutionContext<Vec<i32>>| {
                    let current = ctx.state.read(|d| d.last().copied());
                    assert_eq!(ctx.snapshot.last(), current.as_ref());
                    ctx.state.update(|doc| doc.push(v));
                    Ok(())
                },
            )
        };
        let mut commit = BulkComposer::new()
            .with(push(1))
            .with(push(2))
            .build(None)
            .unwrap();

        block_on(commit.run_redo(ctx(&store))).unwrap();
        assert_eq!(store.get(), vec![0, 1, 2]);
        block_on(commit.run_undo(ctx(&store))).unwrap();
        assert_eq!(store.get(), vec![0]);
    }

    #[test]
    fn failed_constituent_rolls_back() {
        let store = Store::new(vec![1, 2]);
        let ok = Commit::new(
            |ctx: &ExecutionContext<Vec<i32>>| {
                ctx.state.update(|doc| doc.pop());
                Ok(())
            },
            |ctx: &ExecutionContext<Vec<i32>>| {
                ctx.state.update(|doc| doc.push(2));
                Ok(())
            },
        );
        let broken = Commit::new(
            |_: &ExecutionContext<Vec<i32>>| Err(OperationError::TargetNotFound("n0".into())),
            |_: &ExecutionContext<Vec<i32>>| Ok(()),
        );
        let mut commit = BulkComposer::new()
            .with(broken)
            .with(ok)
            .build(None)
            .unwrap();

        let err = block_on(commit.run_undo(ctx(&store))).unwrap_err();
        assert_eq!(err, OperationError::TargetNotFound("n0".into()));
        assert_eq!(store.get(), vec![1, 2]);
    }
}

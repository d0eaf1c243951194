#![forbid(unsafe_code)]

//! Ordered replay of several undo/redo pairs as one step.
//!
//! Shared by the bulk composer (steps take an execution context) and by
//! history coalescing (steps take nothing). Undo runs the steps newest
//! first, redo oldest first. When a step fails, the steps already replayed
//! in this call are driven back the other way before the error is returned.

use std::cell::RefCell;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::{self, LocalBoxFuture};
use scenery_core::OperationResult;

use crate::instrument::HISTORY_TARGET;

pub(crate) type StepFn<A> = Box<dyn FnMut(A) -> LocalBoxFuture<'static, OperationResult<()>>>;

pub(crate) struct Step<A> {
    pub undo: StepFn<A>,
    pub redo: StepFn<A>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Undo,
    Redo,
}

impl Direction {
    fn opposite(self) -> Self {
        match self {
            Self::Undo => Self::Redo,
            Self::Redo => Self::Undo,
        }
    }
}

/// Fold `steps` (oldest first) into one undo/redo pair.
///
/// `fresh` derives the argument handed to each individual step from the
/// argument the composite was called with.
pub(crate) fn compose<A, F>(steps: Vec<Step<A>>, fresh: F) -> (StepFn<A>, StepFn<A>)
where
    A: 'static,
    F: Fn(&A) -> A + 'static,
{
    let steps = Rc::new(RefCell::new(steps));
    let fresh = Rc::new(fresh);

    let undo: StepFn<A> = {
        let steps = Rc::clone(&steps);
        let fresh = Rc::clone(&fresh);
        Box::new(move |arg| {
            replay(Rc::clone(&steps), Rc::clone(&fresh), arg, Direction::Undo).boxed_local()
        })
    };
    let redo: StepFn<A> = Box::new(move |arg| {
        replay(Rc::clone(&steps), Rc::clone(&fresh), arg, Direction::Redo).boxed_local()
    });
    (undo, redo)
}

async fn replay<A, F>(
    steps: Rc<RefCell<Vec<Step<A>>>>,
    fresh: Rc<F>,
    arg: A,
    direction: Direction,
) -> OperationResult<()>
where
    F: Fn(&A) -> A,
{
    let len = steps.borrow().len();
    let order: Vec<usize> = match direction {
        Direction::Undo => (0..len).rev().collect(),
        Direction::Redo => (0..len).collect(),
    };

    for (done, &index) in order.iter().enumerate() {
        let Err(err) = call(&steps, index, direction, fresh(&arg)).await else {
            continue;
        };
        for &prev in order[..done].iter().rev() {
            if let Err(rollback) = call(&steps, prev, direction.opposite(), fresh(&arg)).await {
                tracing::error!(
                    target: HISTORY_TARGET,
                    step = prev,
                    error = %rollback,
                    "rollback of composite step failed"
                );
            }
        }
        return Err(err);
    }
    Ok(())
}

/// Start one step. The borrow ends before the returned future is polled.
fn call<A>(
    steps: &RefCell<Vec<Step<A>>>,
    index: usize,
    direction: Direction,
    arg: A,
) -> LocalBoxFuture<'static, OperationResult<()>> {
    let mut steps = steps.borrow_mut();
    match (steps.get_mut(index), direction) {
        (Some(step), Direction::Undo) => (step.undo)(arg),
        (Some(step), Direction::Redo) => (step.redo)(arg),
        (None, _) => future::ready(Ok(())).boxed_local(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use scenery_core::OperationError;

    type Log = Rc<RefCell<Vec<String>>>;

    fn step(log: &Log, name: &'static str, fail_undo: bool) -> Step<()> {
        let undo_log = Rc::clone(log);
        let redo_log = Rc::clone(log);
        Step {
            undo: Box::new(move |()| {
                undo_log.borrow_mut().push(format!("undo {name}"));
                let result = if fail_undo {
                    Err(OperationError::other(format!("{name} failed")))
                } else {
                    Ok(())
                };
                future::ready(result).boxed_local()
            }),
            redo: Box::new(move |()| {
                redo_log.borrow_mut().push(format!("redo {name}"));
                future::ready(Ok(())).boxed_local()
            }),
        }
    }

    #[test]
    fn undo_reverse_redo_forward() {
        let log: Log = Rc::default();
        let (mut undo, mut redo) = compose(
            vec![
                step(&log, "a", false),
                step(&log, "b", false),
                step(&log, "c", false),
            ],
            |_: &()| (),
        );

        block_on(undo(())).unwrap();
        block_on(redo(())).unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["undo c", "undo b", "undo a", "redo a", "redo b", "redo c"]
        );
    }

    #[test]
    fn failure_rolls_back_replayed_steps() {
        let log: Log = Rc::default();
        let (mut undo, _redo) = compose(
            vec![
                step(&log, "a", true),
                step(&log, "b", false),
                step(&log, "c", false),
            ],
            |_: &()| (),
        );

        let err = block_on(undo(())).unwrap_err();
        assert_eq!(err, OperationError::other("a failed"));
        assert_eq!(
            *log.borrow(),
            vec!["undo c", "undo b", "undo a", "redo b", "redo c"]
        );
    }

    #[test]
    fn empty_sequence_is_noop() {
        let (mut undo, mut redo) = compose(Vec::<Step<()>>::new(), |_: &()| ());
        assert!(block_on(undo(())).is_ok());
        assert!(block_on(redo(())).is_ok());
    }
}

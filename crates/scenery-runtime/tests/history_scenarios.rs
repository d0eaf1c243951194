#![forbid(unsafe_code)]

//! Scenario tests for [`HistoryManager`].
//!
//! Covers eviction order, spy-driven undo/redo, tail replacement, the
//! subscription lifecycle, and rollback after a failed reversal.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::executor::block_on;
use scenery_harness::{failing_entry, spy_entry};
use scenery_runtime::{HistoryEntry, HistoryManager, HistorySnapshot, PipelineError};

fn labels(snapshot: &HistorySnapshot) -> Vec<String> {
    snapshot
        .undo_entries
        .iter()
        .map(|e| e.metadata.label.clone())
        .collect()
}

#[test]
fn capacity_evicts_oldest_first() {
    let history = HistoryManager::with_capacity(3);
    for label in ["first", "second", "third"] {
        history.push(spy_entry(label).0);
    }
    history.push(spy_entry("fourth").0);

    let snapshot = history.snapshot();
    assert_eq!(labels(&snapshot), vec!["second", "third", "fourth"]);
    assert!(!snapshot.can_redo);
    assert_eq!(snapshot.capacity, 3);
}

#[test]
fn undo_then_redo_calls_each_spy_once() {
    let history = HistoryManager::with_capacity(10);
    let (entry, calls) = spy_entry("move");
    history.push(entry);

    assert!(block_on(history.undo()).unwrap());
    assert_eq!(calls.counts(), (1, 0));
    assert!(!history.can_undo());
    assert!(history.can_redo());

    assert!(block_on(history.redo()).unwrap());
    assert_eq!(calls.counts(), (1, 1));
    assert!(history.can_undo());
    assert!(!history.can_redo());
}

#[test]
fn empty_stacks_report_false() {
    let history = HistoryManager::with_capacity(2);
    assert!(!block_on(history.undo()).unwrap());
    assert!(!block_on(history.redo()).unwrap());
}

#[test]
fn replace_last_swaps_tail_only() {
    let history = HistoryManager::with_capacity(10);
    history.push(spy_entry("initial").0);
    history.push(spy_entry("replaceable").0);
    let replaced_id = history.last_entry().unwrap().id;

    let (replacement, calls) = spy_entry("replacement");
    history.replace_last(replacement);

    assert_eq!(history.undo_depth(), 2);
    let tail = history.last_entry().unwrap();
    assert_eq!(tail.metadata.label, "replacement");
    assert_eq!(tail.id, replaced_id);

    block_on(history.undo()).unwrap();
    assert_eq!(calls.counts(), (1, 0));
    assert_eq!(history.next_undo_label().as_deref(), Some("initial"));
}

#[test]
fn subscriber_lifecycle() {
    let history = HistoryManager::with_capacity(10);
    let seen: Rc<RefCell<Vec<HistorySnapshot>>> = Rc::default();

    let sink = Rc::clone(&seen);
    let sub = history.subscribe(move |snapshot| sink.borrow_mut().push(snapshot.clone()));
    assert_eq!(seen.borrow().len(), 1);
    assert!(seen.borrow()[0].undo_entries.is_empty());
    assert!(!seen.borrow()[0].can_undo);

    history.push(spy_entry("one").0);
    assert_eq!(seen.borrow().len(), 2);
    assert_eq!(labels(&seen.borrow()[1]), vec!["one"]);

    sub.unsubscribe();
    history.push(spy_entry("two").0);
    assert_eq!(seen.borrow().len(), 2);
}

#[test]
fn failed_undo_restores_entry() {
    let history = HistoryManager::with_capacity(10);
    history.push(spy_entry("safe").0);
    let (entry, calls) = failing_entry("locked");
    history.push(entry);

    let err = block_on(history.undo()).unwrap_err();
    assert!(matches!(err, PipelineError::Undo { ref label, .. } if label == "locked"));
    assert_eq!(calls.counts(), (1, 0));
    assert!(history.can_undo());
    assert!(!history.can_redo());
    assert_eq!(history.undo_labels(5), vec!["locked", "safe"]);
}

#[test]
fn failed_redo_stays_on_redo_stack() {
    let history = HistoryManager::with_capacity(10);
    let fail = Rc::new(Cell::new(false));
    let flag = Rc::clone(&fail);
    history.push(HistoryEntry::new(
        "flaky",
        || Ok(()),
        move || {
            if flag.get() {
                Err(scenery_core::OperationError::other("redo refused"))
            } else {
                Ok(())
            }
        },
    ));

    block_on(history.undo()).unwrap();
    fail.set(true);
    assert!(block_on(history.redo()).is_err());
    assert_eq!(history.redo_labels(5), vec!["flaky"]);
    assert!(!history.can_undo());

    fail.set(false);
    assert!(block_on(history.redo()).unwrap());
    assert!(history.can_undo());
}

#[test]
fn push_after_undo_discards_redo_branch() {
    let history = HistoryManager::with_capacity(10);
    for label in ["a", "b", "c"] {
        history.push(spy_entry(label).0);
    }
    block_on(history.undo()).unwrap();
    block_on(history.undo()).unwrap();
    assert_eq!(history.redo_labels(5), vec!["b", "c"]);

    history.push(spy_entry("d").0);
    assert!(!history.can_redo());
    assert_eq!(history.undo_labels(5), vec!["d", "a"]);
}

#[test]
fn merge_runs_both_halves() {
    let history = HistoryManager::with_capacity(10);
    let (first, first_calls) = spy_entry("drag");
    let (second, second_calls) = spy_entry("drag");
    history.push(first.with_coalesce_key("slider"));
    assert!(history.merge_into_last(second.with_coalesce_key("slider")));
    assert_eq!(history.undo_depth(), 1);

    block_on(history.undo()).unwrap();
    assert_eq!(first_calls.counts(), (1, 0));
    assert_eq!(second_calls.counts(), (1, 0));

    block_on(history.redo()).unwrap();
    assert_eq!(first_calls.counts(), (1, 1));
    assert_eq!(second_calls.counts(), (1, 1));
}

#[test]
fn shrinking_capacity_evicts() {
    let history = HistoryManager::with_capacity(5);
    for label in ["a", "b", "c", "d"] {
        history.push(spy_entry(label).0);
    }
    history.set_capacity(2);
    assert_eq!(history.undo_labels(10), vec!["d", "c"]);
    history.set_capacity(0);
    assert_eq!(history.capacity(), 1);
    assert_eq!(history.undo_depth(), 1);
}

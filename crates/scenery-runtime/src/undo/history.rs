#![forbid(unsafe_code)]

//! History stack for undo/redo.
//!
//! [`HistoryManager`] keeps two stacks of recorded entries:
//!
//! - **Capacity**: the oldest undo entries are evicted when the limit is
//!   exceeded
//! - **Branching**: any new entry clears the redo stack
//! - **Coalescing**: [`HistoryManager::merge_into_last`] folds an entry into
//!   the current tail so one undo step covers both
//!
//! # Invariants
//!
//! 1. `undo_depth() <= capacity()` after every call
//! 2. An entry is on at most one stack
//! 3. The redo stack is empty right after push, replace, or merge
//! 4. A failed or abandoned undo/redo leaves the entry on the stack it came
//!    from
//!
//! # Suspension
//!
//! Undo and redo closures may suspend. The entry is popped before its
//! closure runs and the `RefCell` borrow is released across the await, so
//! other calls (including queries from subscribers) see the entry as in
//! flight. If `push` or `clear` runs while a closure is suspended, the
//! in-flight entry belongs to a discarded branch and is dropped when the
//! closure finishes. If the caller drops the undo/redo future instead, the
//! entry goes back onto the stack it came from.
//!
//! ```text
//! push(e5)
//! ┌───────────────────────────────────┐
//! │ Undo: [e1, e2, e3, e4, e5]        │
//! │ Redo: []                          │
//! └───────────────────────────────────┘
//!
//! undo() x2
//! ┌───────────────────────────────────┐
//! │ Undo: [e1, e2, e3]                │
//! │ Redo: [e5, e4]                    │
//! └───────────────────────────────────┘
//!
//! push(e6)  <-- new branch, clears redo
//! ┌───────────────────────────────────┐
//! │ Undo: [e1, e2, e3, e6]            │
//! │ Redo: []                          │
//! └───────────────────────────────────┘
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::{self, LocalBoxFuture};
use scenery_core::OperationResult;
use web_time::SystemTime;

use super::sequence::{self, Step};
use crate::config::HistoryConfig;
use crate::error::PipelineError;
use crate::instrument::HISTORY_TARGET;

/// Zero-argument undo/redo callback stored in history.
pub type EntryFn = Box<dyn FnMut() -> LocalBoxFuture<'static, OperationResult<()>>>;

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

fn next_entry_id() -> String {
    format!("h-{}", NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed))
}

/// Display and lookup data for an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Id of the operation that produced the entry.
    pub command_id: Option<String>,
    pub label: String,
    pub description: Option<String>,
    pub coalesce_key: Option<String>,
    pub tags: Vec<String>,
}

/// A reversible step handed to [`HistoryManager::push`].
pub struct HistoryEntry {
    /// Generated as `h-<n>` when absent.
    pub id: Option<String>,
    /// Set to now when absent.
    pub timestamp: Option<SystemTime>,
    pub metadata: EntryMetadata,
    undo: EntryFn,
    redo: EntryFn,
}

impl fmt::Debug for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryEntry")
            .field("id", &self.id)
            .field("timestamp", &self.timestamp)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl HistoryEntry {
    /// Entry with synchronous callbacks.
    pub fn new<U, R>(label: impl Into<String>, mut undo: U, mut redo: R) -> Self
    where
        U: FnMut() -> OperationResult<()> + 'static,
        R: FnMut() -> OperationResult<()> + 'static,
    {
        Self::from_boxed(
            label,
            Box::new(move || future::ready(undo()).boxed_local()),
            Box::new(move || future::ready(redo()).boxed_local()),
        )
    }

    /// Entry with callbacks that may suspend.
    pub fn from_async<U, UF, R, RF>(label: impl Into<String>, mut undo: U, mut redo: R) -> Self
    where
        U: FnMut() -> UF + 'static,
        UF: Future<Output = OperationResult<()>> + 'static,
        R: FnMut() -> RF + 'static,
        RF: Future<Output = OperationResult<()>> + 'static,
    {
        Self::from_boxed(
            label,
            Box::new(move || undo().boxed_local()),
            Box::new(move || redo().boxed_local()),
        )
    }

    #[must_use]
    pub fn from_boxed(label: impl Into<String>, undo: EntryFn, redo: EntryFn) -> Self {
        Self {
            id: None,
            timestamp: None,
            metadata: EntryMetadata {
                label: label.into(),
                ..EntryMetadata::default()
            },
            undo,
            redo,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn with_command_id(mut self, command_id: impl Into<String>) -> Self {
        self.metadata.command_id = Some(command_id.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_coalesce_key(mut self, key: impl Into<String>) -> Self {
        self.metadata.coalesce_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.metadata.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.metadata.label
    }

    fn into_recorded(self) -> Recorded {
        Recorded {
            info: EntryInfo {
                id: self.id.unwrap_or_else(next_entry_id),
                timestamp: self.timestamp.unwrap_or_else(SystemTime::now),
                metadata: self.metadata,
            },
            undo: self.undo,
            redo: self.redo,
        }
    }
}

/// Owned description of a recorded entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub id: String,
    pub timestamp: SystemTime,
    pub metadata: EntryMetadata,
}

/// Owned copy of both stacks in stack order (the next step to undo or
/// redo is last).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySnapshot {
    pub undo_entries: Vec<EntryInfo>,
    pub redo_entries: Vec<EntryInfo>,
    pub capacity: usize,
    pub can_undo: bool,
    pub can_redo: bool,
}

struct Recorded {
    info: EntryInfo,
    undo: EntryFn,
    redo: EntryFn,
}

struct Stacks {
    /// Newest at back.
    undo: VecDeque<Recorded>,
    /// Next redo at back.
    redo: VecDeque<Recorded>,
    capacity: usize,
    /// Bumped whenever the redo branch is discarded.
    generation: u64,
}

impl Stacks {
    fn discard_redo(&mut self) {
        self.redo.clear();
        self.generation = self.generation.wrapping_add(1);
    }

    fn enforce_capacity(&mut self) {
        while self.undo.len() > self.capacity {
            if let Some(evicted) = self.undo.pop_front() {
                tracing::debug!(
                    target: HISTORY_TARGET,
                    id = %evicted.info.id,
                    label = %evicted.info.metadata.label,
                    "evicted oldest entry"
                );
            }
        }
    }

    fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            undo_entries: self.undo.iter().map(|r| r.info.clone()).collect(),
            redo_entries: self.redo.iter().map(|r| r.info.clone()).collect(),
            capacity: self.capacity,
            can_undo: !self.undo.is_empty(),
            can_redo: !self.redo.is_empty(),
        }
    }
}

type EntryFuture = LocalBoxFuture<'static, OperationResult<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Undo,
    Redo,
}

/// An entry popped for undo/redo whose closure has not finished.
///
/// Unless settled, it returns to the stack it came from when dropped. If the
/// redo branch was discarded in the meantime the entry is dropped instead.
struct InFlight<'a> {
    history: &'a HistoryManager,
    recorded: Option<Recorded>,
    origin: Side,
    generation: u64,
}

impl InFlight<'_> {
    fn label(&self) -> String {
        self.recorded
            .as_ref()
            .map(|r| r.info.metadata.label.clone())
            .unwrap_or_default()
    }

    fn settle(mut self, side: Side) {
        self.place(side);
    }

    fn place(&mut self, side: Side) {
        let Some(recorded) = self.recorded.take() else {
            return;
        };
        {
            let mut stacks = self.history.stacks.borrow_mut();
            if stacks.generation != self.generation {
                tracing::debug!(
                    target: HISTORY_TARGET,
                    label = %recorded.info.metadata.label,
                    "history branched while entry was in flight; entry dropped"
                );
            } else {
                match side {
                    Side::Undo => {
                        stacks.undo.push_back(recorded);
                        stacks.enforce_capacity();
                    }
                    Side::Redo => stacks.redo.push_back(recorded),
                }
            }
        }
        self.history.notify();
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(recorded) = &self.recorded {
            tracing::debug!(
                target: HISTORY_TARGET,
                label = %recorded.info.metadata.label,
                "call dropped while entry was in flight; restoring"
            );
            self.place(self.origin);
        }
    }
}

type ListenerRc = Rc<dyn Fn(&HistorySnapshot)>;
type ListenerWeak = Weak<dyn Fn(&HistorySnapshot)>;

/// Bounded undo/redo ledger.
pub struct HistoryManager {
    stacks: RefCell<Stacks>,
    listeners: RefCell<Vec<ListenerWeak>>,
}

impl fmt::Debug for HistoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stacks = self.stacks.borrow();
        f.debug_struct("HistoryManager")
            .field("undo_depth", &stacks.undo.len())
            .field("redo_depth", &stacks.redo.len())
            .field("capacity", &stacks.capacity)
            .finish_non_exhaustive()
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

impl HistoryManager {
    #[must_use]
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            stacks: RefCell::new(Stacks {
                undo: VecDeque::new(),
                redo: VecDeque::new(),
                capacity: config.capacity.max(1),
                generation: 0,
            }),
            listeners: RefCell::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(HistoryConfig::with_capacity(capacity))
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Record an already-applied entry.
    ///
    /// Clears the redo stack and evicts the oldest entries over capacity.
    pub fn push(&self, entry: HistoryEntry) {
        let recorded = entry.into_recorded();
        {
            let mut stacks = self.stacks.borrow_mut();
            tracing::debug!(
                target: HISTORY_TARGET,
                id = %recorded.info.id,
                label = %recorded.info.metadata.label,
                "push"
            );
            stacks.undo.push_back(recorded);
            stacks.discard_redo();
            stacks.enforce_capacity();
        }
        self.notify();
    }

    /// Replace the undo tail in place.
    ///
    /// The replaced entry's id and timestamp carry over unless `entry`
    /// supplies its own. With an empty undo stack this is [`push`](Self::push).
    pub fn replace_last(&self, entry: HistoryEntry) {
        let Some(previous) = self.stacks.borrow_mut().undo.pop_back() else {
            self.push(entry);
            return;
        };
        let recorded = inherit_identity(entry, &previous.info).into_recorded();
        self.install_tail(recorded, "replace_last");
    }

    /// Fold `entry` into the undo tail.
    ///
    /// The resulting entry keeps the tail's id and timestamp and `entry`'s
    /// metadata. Its undo runs `entry`'s undo and then the tail's; its redo
    /// runs the tail's redo and then `entry`'s. Returns `false` (and pushes)
    /// when there is nothing to merge into.
    pub fn merge_into_last(&self, entry: HistoryEntry) -> bool {
        let Some(previous) = self.stacks.borrow_mut().undo.pop_back() else {
            self.push(entry);
            return false;
        };
        let entry = inherit_identity(entry, &previous.info);
        let HistoryEntry {
            id,
            timestamp,
            metadata,
            undo,
            redo,
        } = entry;

        let (undo, redo) = sequence::compose(
            vec![
                Step {
                    undo: unit_step(previous.undo),
                    redo: unit_step(previous.redo),
                },
                Step {
                    undo: unit_step(undo),
                    redo: unit_step(redo),
                },
            ],
            |_: &()| (),
        );
        let merged = HistoryEntry {
            id,
            timestamp,
            metadata,
            undo: entry_step(undo),
            redo: entry_step(redo),
        };
        self.install_tail(merged.into_recorded(), "merge_into_last");
        true
    }

    fn install_tail(&self, recorded: Recorded, action: &'static str) {
        {
            let mut stacks = self.stacks.borrow_mut();
            tracing::debug!(
                target: HISTORY_TARGET,
                id = %recorded.info.id,
                label = %recorded.info.metadata.label,
                action,
                "tail replaced"
            );
            stacks.undo.push_back(recorded);
            stacks.discard_redo();
            stacks.enforce_capacity();
        }
        self.notify();
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Reverse the newest entry.
    ///
    /// `Ok(false)` when there is nothing to undo. On failure, or when the
    /// returned future is dropped before it finishes, the entry goes back
    /// onto the undo stack.
    pub async fn undo(&self) -> Result<bool, PipelineError> {
        let Some((in_flight, pending)) = self.begin(Side::Undo) else {
            return Ok(false);
        };
        let label = in_flight.label();

        match pending.await {
            Ok(()) => {
                in_flight.settle(Side::Redo);
                tracing::debug!(target: HISTORY_TARGET, label = %label, "undo");
                Ok(true)
            }
            Err(source) => {
                in_flight.settle(Side::Undo);
                Err(PipelineError::Undo { label, source })
            }
        }
    }

    /// Re-apply the most recently undone entry.
    ///
    /// `Ok(false)` when there is nothing to redo. On failure, or when the
    /// returned future is dropped before it finishes, the entry goes back
    /// onto the redo stack.
    pub async fn redo(&self) -> Result<bool, PipelineError> {
        let Some((in_flight, pending)) = self.begin(Side::Redo) else {
            return Ok(false);
        };
        let label = in_flight.label();

        match pending.await {
            Ok(()) => {
                in_flight.settle(Side::Undo);
                tracing::debug!(target: HISTORY_TARGET, label = %label, "redo");
                Ok(true)
            }
            Err(source) => {
                in_flight.settle(Side::Redo);
                Err(PipelineError::Redo { label, source })
            }
        }
    }

    /// Pop the tail of `origin` and start its closure.
    ///
    /// The borrow is released before the closure is called.
    fn begin(&self, origin: Side) -> Option<(InFlight<'_>, EntryFuture)> {
        let (mut recorded, generation) = {
            let mut stacks = self.stacks.borrow_mut();
            let recorded = match origin {
                Side::Undo => stacks.undo.pop_back(),
                Side::Redo => stacks.redo.pop_back(),
            }?;
            (recorded, stacks.generation)
        };
        let pending = match origin {
            Side::Undo => (recorded.undo)(),
            Side::Redo => (recorded.redo)(),
        };
        let in_flight = InFlight {
            history: self,
            recorded: Some(recorded),
            origin,
            generation,
        };
        Some((in_flight, pending))
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Change the undo limit (clamped to at least 1), evicting the oldest
    /// entries if needed.
    pub fn set_capacity(&self, capacity: usize) {
        {
            let mut stacks = self.stacks.borrow_mut();
            stacks.capacity = capacity.max(1);
            stacks.enforce_capacity();
        }
        self.notify();
    }

    /// Drop both stacks.
    pub fn clear(&self) {
        {
            let mut stacks = self.stacks.borrow_mut();
            stacks.undo.clear();
            stacks.discard_redo();
        }
        tracing::debug!(target: HISTORY_TARGET, "clear");
        self.notify();
    }

    /// Observe every change. The listener runs once immediately.
    ///
    /// Dropping the returned guard detaches the listener.
    pub fn subscribe(&self, listener: impl Fn(&HistorySnapshot) + 'static) -> HistorySubscription {
        let strong: ListenerRc = Rc::new(listener);
        self.listeners.borrow_mut().push(Rc::downgrade(&strong));
        strong(&self.snapshot());
        HistorySubscription { _guard: strong }
    }

    fn notify(&self) {
        // Collect first; listeners may query or subscribe.
        let live: Vec<ListenerRc> = {
            let mut listeners = self.listeners.borrow_mut();
            listeners.retain(|w| w.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        if live.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for listener in live {
            listener(&snapshot);
        }
    }

    // ========================================================================
    // Info
    // ========================================================================

    #[must_use]
    pub fn snapshot(&self) -> HistorySnapshot {
        self.stacks.borrow().snapshot()
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.stacks.borrow().undo.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.stacks.borrow().redo.is_empty()
    }

    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.stacks.borrow().undo.len()
    }

    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.stacks.borrow().redo.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.stacks.borrow().capacity
    }

    /// Labels of undo entries, most recent first.
    #[must_use]
    pub fn undo_labels(&self, limit: usize) -> Vec<String> {
        labels(&self.stacks.borrow().undo, limit)
    }

    /// Labels of redo entries, next redo first.
    #[must_use]
    pub fn redo_labels(&self, limit: usize) -> Vec<String> {
        labels(&self.stacks.borrow().redo, limit)
    }

    #[must_use]
    pub fn next_undo_label(&self) -> Option<String> {
        self.undo_labels(1).pop()
    }

    #[must_use]
    pub fn next_redo_label(&self) -> Option<String> {
        self.redo_labels(1).pop()
    }

    /// The undo tail.
    #[must_use]
    pub fn last_entry(&self) -> Option<EntryInfo> {
        self.stacks.borrow().undo.back().map(|r| r.info.clone())
    }

    /// The entry the next redo would re-apply.
    #[must_use]
    pub fn next_redo_entry(&self) -> Option<EntryInfo> {
        self.stacks.borrow().redo.back().map(|r| r.info.clone())
    }

    /// Coalesce key of the undo tail.
    #[must_use]
    pub fn last_coalesce_key(&self) -> Option<String> {
        self.stacks
            .borrow()
            .undo
            .back()
            .and_then(|r| r.info.metadata.coalesce_key.clone())
    }
}

fn labels(stack: &VecDeque<Recorded>, limit: usize) -> Vec<String> {
    stack
        .iter()
        .rev()
        .take(limit)
        .map(|r| r.info.metadata.label.clone())
        .collect()
}

fn inherit_identity(mut entry: HistoryEntry, previous: &EntryInfo) -> HistoryEntry {
    entry.id = entry.id.or_else(|| Some(previous.id.clone()));
    entry.timestamp = entry.timestamp.or(Some(previous.timestamp));
    entry
}

fn unit_step(mut f: EntryFn) -> sequence::StepFn<()> {
    Box::new(move |()| f())
}

fn entry_step(mut f: sequence::StepFn<()>) -> EntryFn {
    Box::new(move || f(()))
}

/// RAII guard for a history listener.
#[must_use = "dropping the subscription detaches the listener"]
pub struct HistorySubscription {
    _guard: ListenerRc,
}

impl HistorySubscription {
    /// Detach the listener now.
    pub fn unsubscribe(self) {}
}

impl fmt::Debug for HistorySubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistorySubscription")
            .finish_non_exhaustive()
    }
}

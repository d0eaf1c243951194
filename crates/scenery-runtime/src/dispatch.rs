#![forbid(unsafe_code)]

//! The dispatcher: sole entry point for running operations.
//!
//! # Lifecycle
//!
//! For every [`Dispatcher::invoke_and_push`]:
//!
//! 1. Build a fresh [`ExecutionContext`] (options may override parts of it)
//! 2. Bump `pending_command_count` and raise `is_executing`
//! 3. Emit `operation:invoked`
//! 4. Blocked precondition: release the counter, emit `operation:completed`
//!    (`operation:blocked` for commands), return `false`
//! 5. Perform error: release the counter, emit `operation:failed`, return
//!    [`PipelineError::Execution`]
//! 6. Apply label/snapshot overrides to the commit
//! 7. Mutated with a commit: merge into the tail when the effective
//!    coalesce key matches it, otherwise push
//! 8. Release the counter, emit `operation:completed`
//! 9. Return whether history recorded an entry
//!
//! Counters are released by guards, so they are consistent after success,
//! failure, or a dropped future.
//!
//! # Status
//!
//! `pending_command_count` is tracked on the store a call executes against,
//! which is the injected one when [`InvokeOptions::context`] overrides it.
//! History belongs to the dispatcher, so `last_undoable_command_id` and the
//! undo/redo busy flag always live on [`Dispatcher::store`].
//!
//! # Ordering
//!
//! By default concurrent invocations interleave at suspension points and the
//! last perform to run wins. With
//! [`PipelineConfig::serialize_invocations`](crate::PipelineConfig) every
//! invocation, undo, and redo waits its turn on a run queue. A listener must
//! not re-enter the dispatcher while the queue is enabled.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use futures::lock::{Mutex, MutexGuard};
use scenery_core::{
    Blocked, Command, Commit, ContextFactory, ContextOverride, ExecutionContext, InvokeResult,
    Operation, OperationMetadata, OperationResult, PipelineStatus, Precondition, ServiceContainer,
    SnapshotFn, Store,
};
use tracing::Instrument;
use web_time::Instant;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::instrument::{self, PIPELINE_TARGET, PipelineStats};
use crate::telemetry::{
    self, HookRegistry, HookResult, HookSubscription, PipelineEvent, PipelineEventKind,
};
use crate::undo::{HistoryEntry, HistoryManager};

/// Per-call options.
pub struct InvokeOptions<S> {
    /// Overrides the operation's own coalesce key.
    pub coalesce_key: Option<String>,
    /// Overrides the commit label.
    pub label: Option<String>,
    pub before_snapshot: Option<Rc<S>>,
    pub after_snapshot: Option<Rc<S>>,
    /// Replace parts of the execution context, e.g. a test store.
    pub context: ContextOverride<S>,
}

impl<S> Default for InvokeOptions<S> {
    fn default() -> Self {
        Self {
            coalesce_key: None,
            label: None,
            before_snapshot: None,
            after_snapshot: None,
            context: ContextOverride::default(),
        }
    }
}

impl<S> Clone for InvokeOptions<S> {
    fn clone(&self) -> Self {
        Self {
            coalesce_key: self.coalesce_key.clone(),
            label: self.label.clone(),
            before_snapshot: self.before_snapshot.clone(),
            after_snapshot: self.after_snapshot.clone(),
            context: self.context.clone(),
        }
    }
}

impl<S> fmt::Debug for InvokeOptions<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeOptions")
            .field("coalesce_key", &self.coalesce_key)
            .field("label", &self.label)
            .field("before_snapshot", &self.before_snapshot.is_some())
            .field("after_snapshot", &self.after_snapshot.is_some())
            .field("context", &self.context)
            .finish()
    }
}

impl<S> InvokeOptions<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_coalesce_key(mut self, key: impl Into<String>) -> Self {
        self.coalesce_key = Some(key.into());
        self
    }

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

    #[must_use]
    pub fn with_context(mut self, context: ContextOverride<S>) -> Self {
        self.context = context;
        self
    }
}

/// Result of [`Dispatcher::invoke`].
pub enum Invocation<S> {
    /// Preconditions refused; nothing ran.
    Blocked(Blocked),
    /// Perform ran. The commit is handed back unrecorded.
    Completed {
        did_mutate: bool,
        commit: Option<Commit<S>>,
    },
}

impl<S> fmt::Debug for Invocation<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked(blocked) => f.debug_tuple("Blocked").field(blocked).finish(),
            Self::Completed { did_mutate, commit } => f
                .debug_struct("Completed")
                .field("did_mutate", did_mutate)
                .field("commit", commit)
                .finish(),
        }
    }
}

impl<S> Invocation<S> {
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }

    #[must_use]
    pub fn did_mutate(&self) -> bool {
        match self {
            Self::Completed { did_mutate, .. } => *did_mutate,
            Self::Blocked(_) => false,
        }
    }

    #[must_use]
    pub fn blocked(&self) -> Option<&Blocked> {
        match self {
            Self::Blocked(blocked) => Some(blocked),
            Self::Completed { .. } => None,
        }
    }

    #[must_use]
    pub fn into_commit(self) -> Option<Commit<S>> {
        match self {
            Self::Completed { commit, .. } => commit,
            Self::Blocked(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Operation,
    Command,
}

struct Outcome<S> {
    invocation: Invocation<S>,
    pushed: bool,
}

/// Runs a [`Command`] through the operation lifecycle.
struct CommandAdapter<'a, C> {
    command: &'a mut C,
}

impl<S, C: Command<S>> Operation<S> for CommandAdapter<'_, C> {
    fn metadata(&self) -> &OperationMetadata {
        self.command.metadata()
    }

    async fn preconditions(&self, ctx: &ExecutionContext<S>) -> Precondition {
        self.command.can_execute(ctx).await
    }

    async fn perform(&mut self, ctx: &ExecutionContext<S>) -> OperationResult<InvokeResult<S>> {
        let commit = self.command.execute(ctx).await?;
        Ok(InvokeResult {
            did_mutate: true,
            commit,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    /// An invocation in flight.
    Pending,
    /// An undo or redo in flight.
    Busy,
}

/// Holds one unit of `is_executing` on a store until dropped.
struct ExecutionGuard<'a, S> {
    state: Store<S>,
    busy: &'a Cell<u32>,
    slot: Slot,
}

impl<'a, S> ExecutionGuard<'a, S> {
    fn enter(state: &Store<S>, busy: &'a Cell<u32>, slot: Slot) -> Self {
        if let Slot::Busy = slot {
            busy.set(busy.get() + 1);
        }
        state.update_status(|status| {
            if let Slot::Pending = slot {
                status.pending_command_count += 1;
            }
            status.is_executing = true;
        });
        Self {
            state: state.clone(),
            busy,
            slot,
        }
    }
}

impl<S> Drop for ExecutionGuard<'_, S> {
    fn drop(&mut self) {
        if let Slot::Busy = self.slot {
            self.busy.set(self.busy.get().saturating_sub(1));
        }
        let busy = self.busy.get();
        let slot = self.slot;
        self.state.update_status(|status| {
            if let Slot::Pending = slot {
                status.pending_command_count = status.pending_command_count.saturating_sub(1);
            }
            status.is_executing = status.pending_command_count > 0 || busy > 0;
        });
    }
}

/// Sequences operations against one store and owns its history.
pub struct Dispatcher<S> {
    factory: ContextFactory<S>,
    history: HistoryManager,
    listeners: HookRegistry,
    hooks: Option<HookRegistry>,
    config: PipelineConfig,
    run_queue: Mutex<()>,
    stats: Cell<PipelineStats>,
    busy: Cell<u32>,
}

impl<S> fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("history", &self.history)
            .field("listeners", &self.listeners)
            .field("config", &self.config)
            .field("stats", &self.stats.get())
            .finish_non_exhaustive()
    }
}

impl<S: Clone + 'static> Dispatcher<S> {
    #[must_use]
    pub fn new(state: Store<S>) -> Self {
        Self::with_config(state, PipelineConfig::default())
    }

    #[must_use]
    pub fn with_config(state: Store<S>, config: PipelineConfig) -> Self {
        Self {
            factory: ContextFactory::new(state, ServiceContainer::new()),
            history: HistoryManager::new(config.history.clone()),
            listeners: HookRegistry::new(),
            hooks: config.emit_global_hooks.then(telemetry::global),
            config,
            run_queue: Mutex::new(()),
            stats: Cell::new(PipelineStats::default()),
            busy: Cell::new(0),
        }
    }

    /// Services handed to every context.
    #[must_use]
    pub fn with_container(mut self, container: ServiceContainer) -> Self {
        self.factory = self.factory.with_container(container);
        self
    }

    /// Take snapshots with `f` instead of `Clone`.
    #[must_use]
    pub fn with_snapshot_fn(mut self, f: SnapshotFn<S>) -> Self {
        self.factory = self.factory.with_snapshot_fn(f);
        self
    }

    /// Emit to `registry` instead of the thread's global registry.
    #[must_use]
    pub fn with_hooks(mut self, registry: HookRegistry) -> Self {
        self.hooks = Some(registry);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn store(&self) -> &Store<S> {
        self.factory.state()
    }

    #[must_use]
    pub fn container(&self) -> &ServiceContainer {
        self.factory.container()
    }

    /// Read access to the ledger (queries and `subscribe`).
    #[must_use]
    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.stats.get()
    }

    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        self.store().status()
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ========================================================================
    // History controls
    // ========================================================================

    pub fn clear_history(&self) {
        self.history.clear();
        self.store()
            .update_status(|status| status.last_undoable_command_id = None);
    }

    pub fn set_history_capacity(&self, capacity: usize) {
        self.history.set_capacity(capacity);
    }

    /// Listen to this dispatcher's lifecycle events.
    pub fn add_listener(
        &self,
        listener: impl Fn(&PipelineEvent) -> HookResult + 'static,
    ) -> HookSubscription {
        self.listeners.register(listener)
    }

    pub fn add_async_listener<F, Fut>(&self, listener: F) -> HookSubscription
    where
        F: Fn(PipelineEvent) -> Fut + 'static,
        Fut: std::future::Future<Output = HookResult> + 'static,
    {
        self.listeners.register_async(listener)
    }

    // ========================================================================
    // Invocation
    // ========================================================================

    /// Run the lifecycle without recording. The commit, if any, is returned
    /// to the caller.
    pub async fn invoke<O: Operation<S>>(
        &self,
        operation: &mut O,
        options: &InvokeOptions<S>,
    ) -> Result<Invocation<S>, PipelineError> {
        let outcome = self
            .run(operation, Variant::Operation, options, false)
            .await?;
        Ok(outcome.invocation)
    }

    /// Run the lifecycle and record the commit. Returns whether history
    /// recorded an entry, which differs from `did_mutate` for blocked,
    /// no-op, and non-undoable results.
    pub async fn invoke_and_push<O: Operation<S>>(
        &self,
        operation: &mut O,
        options: &InvokeOptions<S>,
    ) -> Result<bool, PipelineError> {
        let outcome = self
            .run(operation, Variant::Operation, options, true)
            .await?;
        Ok(outcome.pushed)
    }

    /// Run a command and record its commit.
    pub async fn execute_command<C: Command<S>>(
        &self,
        command: &mut C,
        options: &InvokeOptions<S>,
    ) -> Result<bool, PipelineError> {
        let mut adapter = CommandAdapter { command };
        let outcome = self
            .run(&mut adapter, Variant::Command, options, true)
            .await?;
        Ok(outcome.pushed)
    }

    /// Record a commit assembled outside the lifecycle, e.g. a bulk commit.
    ///
    /// The mutation is assumed to be applied already.
    pub fn push_commit(
        &self,
        metadata: &OperationMetadata,
        commit: Commit<S>,
        options: &InvokeOptions<S>,
    ) {
        let commit = apply_overrides(commit, metadata, options);
        self.record(metadata, commit, options);
    }

    async fn run<O: Operation<S>>(
        &self,
        operation: &mut O,
        variant: Variant,
        options: &InvokeOptions<S>,
        record: bool,
    ) -> Result<Outcome<S>, PipelineError> {
        let _queue = self.enter_queue().await;
        let span = instrument::invoke_span(operation.metadata());
        self.lifecycle(operation, variant, options, record, span.clone())
            .instrument(span)
            .await
    }

    async fn lifecycle<O: Operation<S>>(
        &self,
        operation: &mut O,
        variant: Variant,
        options: &InvokeOptions<S>,
        record: bool,
        span: tracing::Span,
    ) -> Result<Outcome<S>, PipelineError> {
        let started = Instant::now();
        let meta = operation.metadata().clone();
        let ctx = self.factory.create_with(&options.context);
        let pending = ExecutionGuard::enter(&ctx.state, &self.busy, Slot::Pending);

        self.bump(|s| s.invoked += 1);
        tracing::debug!(target: PIPELINE_TARGET, command_id = %meta.id, "invoked");
        let invoked = PipelineEvent::new(PipelineEventKind::Invoked, &meta.id, &meta.title);
        self.emit(invoked).await;

        if let Precondition::Blocked(blocked) = operation.preconditions(&ctx).await {
            drop(pending);
            self.bump(|s| s.blocked += 1);
            tracing::debug!(
                target: PIPELINE_TARGET,
                command_id = %meta.id,
                reason = blocked.reason.as_deref().unwrap_or(""),
                "blocked by precondition"
            );
            let event = match variant {
                Variant::Operation => {
                    PipelineEvent::new(PipelineEventKind::Completed, &meta.id, &meta.title)
                        .with_did_mutate(false)
                        .with_pushed(false)
                }
                Variant::Command => {
                    PipelineEvent::new(PipelineEventKind::Blocked, &meta.id, &meta.title)
                }
            };
            self.emit(event.with_reason(blocked.reason.clone())).await;
            span.record("pushed", false);
            return Ok(Outcome {
                invocation: Invocation::Blocked(blocked),
                pushed: false,
            });
        }

        let result = match operation.perform(&ctx).await {
            Ok(result) => result,
            Err(source) => {
                drop(pending);
                self.bump(|s| s.failed += 1);
                tracing::debug!(
                    target: PIPELINE_TARGET,
                    command_id = %meta.id,
                    error = %source,
                    "perform failed"
                );
                self.emit(
                    PipelineEvent::new(PipelineEventKind::Failed, &meta.id, &meta.title)
                        .with_error(&source),
                )
                .await;
                return Err(PipelineError::Execution {
                    command_id: meta.id,
                    source,
                });
            }
        };

        let InvokeResult { did_mutate, commit } = result;
        let commit = commit.map(|c| apply_overrides(c, &meta, options));
        let label = commit.as_ref().and_then(|c| c.label.clone());

        if did_mutate && commit.is_none() {
            tracing::warn!(
                target: PIPELINE_TARGET,
                command_id = %meta.id,
                "operation mutated state without a commit; change is not undoable"
            );
        }

        let (pushed, returned) = match commit {
            Some(commit) if record && did_mutate => {
                self.record(&meta, commit, options);
                (true, None)
            }
            Some(_) if record => (false, None),
            other => (false, other),
        };

        drop(pending);
        self.bump(|s| s.completed += 1);
        let duration_us = started.elapsed().as_micros() as u64;
        span.record("pushed", pushed);
        span.record("duration_us", duration_us);
        tracing::debug!(
            target: PIPELINE_TARGET,
            command_id = %meta.id,
            did_mutate,
            pushed,
            duration_us,
            "completed"
        );

        let mut event = PipelineEvent::new(PipelineEventKind::Completed, &meta.id, &meta.title)
            .with_did_mutate(did_mutate)
            .with_pushed(pushed);
        if let Some(label) = label {
            event = event.with_label(label);
        }
        self.emit(event).await;

        Ok(Outcome {
            invocation: Invocation::Completed {
                did_mutate,
                commit: returned,
            },
            pushed,
        })
    }

    /// Push or merge `commit` and publish the new undoable id.
    fn record(&self, meta: &OperationMetadata, commit: Commit<S>, options: &InvokeOptions<S>) {
        let key = options
            .coalesce_key
            .clone()
            .or_else(|| meta.coalesce_key.clone());
        let coalesce =
            self.config.coalescing && key.is_some() && self.history.last_coalesce_key() == key;
        let entry = self.entry_from_commit(meta, commit, key, &options.context);

        if coalesce {
            self.history.merge_into_last(entry);
            self.bump(|s| s.coalesced += 1);
        } else {
            self.history.push(entry);
        }
        self.bump(|s| s.pushed += 1);

        self.store().update_status(|status| {
            status.last_undoable_command_id = Some(meta.id.clone());
        });
    }

    /// Wrap the commit's callbacks so each call gets a fresh context.
    fn entry_from_commit(
        &self,
        meta: &OperationMetadata,
        commit: Commit<S>,
        coalesce_key: Option<String>,
        overrides: &ContextOverride<S>,
    ) -> HistoryEntry {
        let label = commit.label.unwrap_or_else(|| meta.title.clone());
        let mut undo = commit.undo;
        let mut redo = commit.redo;
        let undo_factory = self.factory.scoped(overrides);
        let redo_factory = undo_factory.clone();

        let mut entry = HistoryEntry::from_boxed(
            label,
            Box::new(move || undo(undo_factory.create())),
            Box::new(move || redo(redo_factory.create())),
        )
        .with_command_id(meta.id.clone())
        .with_tags(meta.tags.iter().cloned());
        if let Some(description) = &meta.description {
            entry = entry.with_description(description.clone());
        }
        if let Some(key) = coalesce_key {
            entry = entry.with_coalesce_key(key);
        }
        entry
    }

    // ========================================================================
    // Undo / redo
    // ========================================================================

    /// Reverse the newest entry. `Ok(false)` when there is nothing to undo.
    pub async fn undo(&self) -> Result<bool, PipelineError> {
        if !self.history.can_undo() {
            return Ok(false);
        }
        let _queue = self.enter_queue().await;
        let Some(entry) = self.history.last_entry() else {
            return Ok(false);
        };
        let label = entry.metadata.label.clone();
        let command_id = entry.metadata.command_id.unwrap_or_default();

        let state = self.store().clone();
        let busy = ExecutionGuard::enter(&state, &self.busy, Slot::Busy);
        let result = self
            .history
            .undo()
            .instrument(instrument::undo_span(&label))
            .await;
        drop(busy);

        self.finish_transition(result, PipelineEventKind::Undone, &command_id, &label)
            .await
    }

    /// Re-apply the most recently undone entry. `Ok(false)` when there is
    /// nothing to redo.
    pub async fn redo(&self) -> Result<bool, PipelineError> {
        if !self.history.can_redo() {
            return Ok(false);
        }
        let _queue = self.enter_queue().await;
        let Some(entry) = self.history.next_redo_entry() else {
            return Ok(false);
        };
        let label = entry.metadata.label.clone();
        let command_id = entry.metadata.command_id.unwrap_or_default();

        let state = self.store().clone();
        let busy = ExecutionGuard::enter(&state, &self.busy, Slot::Busy);
        let result = self
            .history
            .redo()
            .instrument(instrument::redo_span(&label))
            .await;
        drop(busy);

        self.finish_transition(result, PipelineEventKind::Redone, &command_id, &label)
            .await
    }

    async fn finish_transition(
        &self,
        result: Result<bool, PipelineError>,
        kind: PipelineEventKind,
        command_id: &str,
        label: &str,
    ) -> Result<bool, PipelineError> {
        match result {
            Ok(true) => {
                self.sync_last_undoable();
                self.bump(|s| match kind {
                    PipelineEventKind::Redone => s.redone += 1,
                    _ => s.undone += 1,
                });
                tracing::debug!(
                    target: PIPELINE_TARGET,
                    command_id,
                    label,
                    kind = kind.as_str(),
                    "history transition"
                );
                let event = PipelineEvent::new(kind, command_id, label).with_label(label);
                self.emit(event).await;
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(err) => {
                self.bump(|s| s.failed += 1);
                tracing::debug!(
                    target: PIPELINE_TARGET,
                    command_id,
                    label,
                    error = %err,
                    "history transition failed"
                );
                self.emit(
                    PipelineEvent::new(PipelineEventKind::Failed, command_id, label)
                        .with_label(label)
                        .with_error(&err),
                )
                .await;
                Err(err)
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn enter_queue(&self) -> Option<MutexGuard<'_, ()>> {
        if self.config.serialize_invocations {
            Some(self.run_queue.lock().await)
        } else {
            None
        }
    }

    fn sync_last_undoable(&self) {
        let top = self
            .history
            .last_entry()
            .and_then(|entry| entry.metadata.command_id);
        self.store()
            .update_status(|status| status.last_undoable_command_id = top);
    }

    fn bump(&self, f: impl FnOnce(&mut PipelineStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    async fn emit(&self, event: PipelineEvent) {
        self.listeners.emit(&event).await;
        if let Some(hooks) = &self.hooks {
            hooks.emit(&event).await;
        }
    }
}

/// Apply caller overrides and the title fallback to a commit.
fn apply_overrides<S>(
    mut commit: Commit<S>,
    meta: &OperationMetadata,
    options: &InvokeOptions<S>,
) -> Commit<S> {
    if let Some(label) = &options.label {
        commit.label = Some(label.clone());
    } else if commit.label.is_none() {
        commit.label = Some(meta.title.clone());
    }
    if let Some(before) = &options.before_snapshot {
        commit.before_snapshot = Some(Rc::clone(before));
    }
    if let Some(after) = &options.after_snapshot {
        commit.after_snapshot = Some(Rc::clone(after));
    }
    commit
}

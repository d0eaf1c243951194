#![forbid(unsafe_code)]

//! Lifecycle telemetry hooks.
//!
//! A [`HookRegistry`] is a cloneable handle to a list of listeners. Every
//! listener is invoked with each [`PipelineEvent`] in registration order and
//! awaited before the next one runs. A listener that returns `Err` or panics
//! is logged and skipped; the pipeline never sees the failure.
//!
//! # Lifetime
//!
//! Registration returns a [`HookSubscription`] guard. The registry only
//! keeps a `Weak` reference, so dropping the guard detaches the listener.
//! Dead entries are pruned lazily on the next emit.
//!
//! # Global registry
//!
//! [`global()`] returns the registry shared by every dispatcher on the
//! current event-loop thread (the "process-wide" registry of a browser tab).
//! [`HookRegistry::reset`] exists for test isolation.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::rc::{Rc, Weak};

use futures::FutureExt;
use futures::future::{self, LocalBoxFuture};
use thiserror::Error;
use web_time::SystemTime;

use crate::instrument::{TELEMETRY_TARGET, panic_message};

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PipelineEventKind {
    #[cfg_attr(feature = "serde", serde(rename = "operation:invoked"))]
    Invoked,
    #[cfg_attr(feature = "serde", serde(rename = "operation:completed"))]
    Completed,
    #[cfg_attr(feature = "serde", serde(rename = "operation:blocked"))]
    Blocked,
    #[cfg_attr(feature = "serde", serde(rename = "operation:failed"))]
    Failed,
    #[cfg_attr(feature = "serde", serde(rename = "operation:undone"))]
    Undone,
    #[cfg_attr(feature = "serde", serde(rename = "operation:redone"))]
    Redone,
}

impl PipelineEventKind {
    /// Wire name, e.g. `operation:invoked`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invoked => "operation:invoked",
            Self::Completed => "operation:completed",
            Self::Blocked => "operation:blocked",
            Self::Failed => "operation:failed",
            Self::Undone => "operation:undone",
            Self::Redone => "operation:redone",
        }
    }
}

impl fmt::Display for PipelineEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineEvent {
    pub kind: PipelineEventKind,
    /// Operation id (or history entry's command id for undo/redo).
    pub command_id: String,
    pub title: String,
    /// History label, when the event concerns a recorded entry.
    pub label: Option<String>,
    pub did_mutate: Option<bool>,
    pub pushed: Option<bool>,
    /// Precondition reason for blocked invocations.
    pub reason: Option<String>,
    /// Rendered error for failed ones.
    pub error: Option<String>,
    pub at: SystemTime,
}

impl PipelineEvent {
    #[must_use]
    pub fn new(
        kind: PipelineEventKind,
        command_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            command_id: command_id.into(),
            title: title.into(),
            label: None,
            did_mutate: None,
            pushed: None,
            reason: None,
            error: None,
            at: SystemTime::now(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_did_mutate(mut self, did_mutate: bool) -> Self {
        self.did_mutate = Some(did_mutate);
        self
    }

    #[must_use]
    pub fn with_pushed(mut self, pushed: bool) -> Self {
        self.pushed = Some(pushed);
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Failure reported by a listener.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl From<String> for HookError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HookError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

pub type HookResult = Result<(), HookError>;

type HookFn = dyn Fn(&PipelineEvent) -> LocalBoxFuture<'static, HookResult>;

/// Cloneable handle to a listener list.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Rc<RefCell<Vec<Weak<HookFn>>>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous listener.
    pub fn register(
        &self,
        hook: impl Fn(&PipelineEvent) -> HookResult + 'static,
    ) -> HookSubscription {
        self.insert(Rc::new(move |event: &PipelineEvent| {
            future::ready(hook(event)).boxed_local()
        }))
    }

    /// Register a listener that may suspend. It receives an owned copy of
    /// the event.
    pub fn register_async<F, Fut>(&self, hook: F) -> HookSubscription
    where
        F: Fn(PipelineEvent) -> Fut + 'static,
        Fut: Future<Output = HookResult> + 'static,
    {
        self.insert(Rc::new(move |event: &PipelineEvent| {
            hook(event.clone()).boxed_local()
        }))
    }

    fn insert(&self, strong: Rc<HookFn>) -> HookSubscription {
        self.hooks.borrow_mut().push(Rc::downgrade(&strong));
        HookSubscription { _guard: strong }
    }

    /// Invoke every live listener in registration order.
    ///
    /// Never fails: listener errors and panics are logged.
    pub async fn emit(&self, event: &PipelineEvent) {
        // Collect first so listeners may register or drop guards while running.
        let live: Vec<Rc<HookFn>> = {
            let mut hooks = self.hooks.borrow_mut();
            hooks.retain(|w| w.strong_count() > 0);
            hooks.iter().filter_map(Weak::upgrade).collect()
        };

        for hook in live {
            let outcome = AssertUnwindSafe(async { hook(event).await })
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(
                        target: TELEMETRY_TARGET,
                        event = event.kind.as_str(),
                        command_id = %event.command_id,
                        error = %err,
                        "telemetry listener failed"
                    );
                }
                Err(payload) => {
                    tracing::error!(
                        target: TELEMETRY_TARGET,
                        event = event.kind.as_str(),
                        command_id = %event.command_id,
                        panic = %panic_message(payload.as_ref()),
                        "telemetry listener panicked"
                    );
                }
            }
        }
    }

    /// Drop every listener. Outstanding guards become inert.
    pub fn reset(&self) {
        self.hooks.borrow_mut().clear();
    }

    /// Number of live listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// RAII guard for a registered listener.
#[must_use = "dropping the subscription detaches the listener"]
pub struct HookSubscription {
    _guard: Rc<HookFn>,
}

impl HookSubscription {
    /// Detach the listener now.
    pub fn unsubscribe(self) {}
}

impl fmt::Debug for HookSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSubscription").finish_non_exhaustive()
    }
}

thread_local! {
    static GLOBAL_HOOKS: HookRegistry = HookRegistry::new();
}

/// Registry shared by every dispatcher on this thread.
#[must_use]
pub fn global() -> HookRegistry {
    GLOBAL_HOOKS.with(HookRegistry::clone)
}

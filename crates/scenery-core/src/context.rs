#![forbid(unsafe_code)]

//! Execution context handed to every perform, undo, and redo call.
//!
//! # Invariants
//!
//! 1. A context is built fresh for every call and never reused.
//! 2. `snapshot` is captured at construction, before the call mutates
//!    anything, and never reflects later mutations.
//! 3. Construction has no side effects and cannot fail.

use std::fmt;
use std::rc::Rc;

use web_time::SystemTime;

use crate::container::ServiceContainer;
use crate::store::Store;

/// Custom snapshot function used instead of `Clone`.
pub type SnapshotFn<S> = Rc<dyn Fn(&S) -> S>;

/// Immutable bundle passed to a unit of work.
pub struct ExecutionContext<S> {
    /// Mutable handle to the shared store.
    pub state: Store<S>,
    /// Document as it was when this context was created.
    pub snapshot: Rc<S>,
    /// Service locator.
    pub container: ServiceContainer,
    /// When the call was requested.
    pub requested_at: SystemTime,
}

impl<S> Clone for ExecutionContext<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            snapshot: Rc::clone(&self.snapshot),
            container: self.container.clone(),
            requested_at: self.requested_at,
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for ExecutionContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("snapshot", &self.snapshot)
            .field("container", &self.container)
            .field("requested_at", &self.requested_at)
            .finish_non_exhaustive()
    }
}

impl<S> ExecutionContext<S> {
    /// Build a context, taking the snapshot with `snapshot_fn`.
    #[must_use]
    pub fn new(
        state: &Store<S>,
        snapshot_fn: impl FnOnce(&S) -> S,
        container: &ServiceContainer,
    ) -> Self {
        let snapshot = Rc::new(state.read(snapshot_fn));
        Self {
            state: state.clone(),
            snapshot,
            container: container.clone(),
            requested_at: SystemTime::now(),
        }
    }
}

impl<S: Clone> ExecutionContext<S> {
    /// Build a context whose snapshot is a clone of the current document.
    #[must_use]
    pub fn capture(state: &Store<S>, container: &ServiceContainer) -> Self {
        Self::new(state, S::clone, container)
    }
}

/// Partial context supplied by a caller, e.g. to inject a store in tests.
///
/// Unset fields fall back to the dispatcher's own values.
pub struct ContextOverride<S> {
    pub state: Option<Store<S>>,
    pub snapshot: Option<Rc<S>>,
    pub container: Option<ServiceContainer>,
    pub requested_at: Option<SystemTime>,
}

impl<S> Default for ContextOverride<S> {
    fn default() -> Self {
        Self {
            state: None,
            snapshot: None,
            container: None,
            requested_at: None,
        }
    }
}

impl<S> Clone for ContextOverride<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            snapshot: self.snapshot.clone(),
            container: self.container.clone(),
            requested_at: self.requested_at,
        }
    }
}

impl<S> fmt::Debug for ContextOverride<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextOverride")
            .field("state", &self.state.is_some())
            .field("snapshot", &self.snapshot.is_some())
            .field("container", &self.container.is_some())
            .field("requested_at", &self.requested_at)
            .finish()
    }
}

impl<S> ContextOverride<S> {
    #[must_use]
    pub fn with_state(mut self, state: Store<S>) -> Self {
        self.state = Some(state);
        self
    }

    #[must_use]
    pub fn with_snapshot(mut self, snapshot: Rc<S>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    #[must_use]
    pub fn with_container(mut self, container: ServiceContainer) -> Self {
        self.container = Some(container);
        self
    }

    #[must_use]
    pub fn with_requested_at(mut self, at: SystemTime) -> Self {
        self.requested_at = Some(at);
        self
    }
}

/// Builds fresh contexts against one store and container.
///
/// The dispatcher keeps one factory and wraps every history closure with it,
/// so each undo and redo sees a snapshot taken just before that call.
pub struct ContextFactory<S> {
    state: Store<S>,
    container: ServiceContainer,
    snapshot_fn: Option<SnapshotFn<S>>,
}

impl<S> Clone for ContextFactory<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            container: self.container.clone(),
            snapshot_fn: self.snapshot_fn.clone(),
        }
    }
}

impl<S> fmt::Debug for ContextFactory<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextFactory")
            .field("container", &self.container)
            .field("custom_snapshot", &self.snapshot_fn.is_some())
            .finish_non_exhaustive()
    }
}

impl<S: Clone> ContextFactory<S> {
    #[must_use]
    pub fn new(state: Store<S>, container: ServiceContainer) -> Self {
        Self {
            state,
            container,
            snapshot_fn: None,
        }
    }

    /// Use `f` to take snapshots instead of `Clone`.
    #[must_use]
    pub fn with_snapshot_fn(mut self, f: SnapshotFn<S>) -> Self {
        self.snapshot_fn = Some(f);
        self
    }

    #[must_use]
    pub fn with_container(mut self, container: ServiceContainer) -> Self {
        self.container = container;
        self
    }

    #[must_use]
    pub fn state(&self) -> &Store<S> {
        &self.state
    }

    #[must_use]
    pub fn container(&self) -> &ServiceContainer {
        &self.container
    }

    /// Build a fresh context.
    #[must_use]
    pub fn create(&self) -> ExecutionContext<S> {
        self.create_on(&self.state, &self.container)
    }

    /// Factory for the same snapshot function over the store and container
    /// named by `overrides`, falling back to this factory's own.
    #[must_use]
    pub fn scoped(&self, overrides: &ContextOverride<S>) -> Self {
        Self {
            state: overrides
                .state
                .clone()
                .unwrap_or_else(|| self.state.clone()),
            container: overrides
                .container
                .clone()
                .unwrap_or_else(|| self.container.clone()),
            snapshot_fn: self.snapshot_fn.clone(),
        }
    }

    /// Build a fresh context, letting `overrides` replace any part of it.
    ///
    /// A supplied snapshot is used as-is; otherwise the snapshot is taken
    /// from whichever store ends up in the context.
    #[must_use]
    pub fn create_with(&self, overrides: &ContextOverride<S>) -> ExecutionContext<S> {
        let scoped = self.scoped(overrides);
        let mut ctx = match &overrides.snapshot {
            Some(snapshot) => ExecutionContext {
                state: scoped.state.clone(),
                snapshot: Rc::clone(snapshot),
                container: scoped.container.clone(),
                requested_at: SystemTime::now(),
            },
            None => scoped.create(),
        };
        if let Some(at) = overrides.requested_at {
            ctx.requested_at = at;
        }
        ctx
    }

    fn create_on(&self, state: &Store<S>, container: &ServiceContainer) -> ExecutionContext<S> {
        match &self.snapshot_fn {
            Some(f) => ExecutionContext::new(state, |doc| f(doc), container),
            None => ExecutionContext::capture(state, container),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use web_time::UNIX_EPOCH;

    #[test]
    fn snapshot_precedes_mutation() {
        let store = Store::new(vec![1]);
        let ctx = ExecutionContext::capture(&store, &ServiceContainer::new());
        ctx.state.update(|v| v.push(2));

        assert_eq!(*ctx.snapshot, vec![1]);
        assert_eq!(store.get(), vec![1, 2]);
    }

    #[test]
    fn custom_snapshot_fn_is_used() {
        let store = Store::new(vec![1, 2, 3]);
        let ctx = ExecutionContext::new(
            &store,
            |v: &Vec<i32>| vec![v.len() as i32],
            &ServiceContainer::new(),
        );
        assert_eq!(*ctx.snapshot, vec![3]);
    }

    #[test]
    fn factory_builds_fresh_snapshots() {
        let store = Store::new(0_u32);
        let factory = ContextFactory::new(store.clone(), ServiceContainer::new());

        let first = factory.create();
        store.set(7);
        let second = factory.create();

        assert_eq!(*first.snapshot, 0);
        assert_eq!(*second.snapshot, 7);
        assert!(first.state.ptr_eq(&second.state));
    }

    #[test]
    fn factory_snapshot_fn_applies() {
        let store = Store::new(String::from("abc"));
        let factory = ContextFactory::new(store, ServiceContainer::new())
            .with_snapshot_fn(Rc::new(|s: &String| s.to_uppercase()));
        assert_eq!(*factory.create().snapshot, "ABC");
    }

    #[test]
    fn overrides_replace_parts() {
        let store = Store::new(1_i32);
        let other = Store::new(99_i32);
        let factory = ContextFactory::new(store, ServiceContainer::new());
        let at = UNIX_EPOCH + Duration::from_secs(10);

        let ctx = factory.create_with(
            &ContextOverride::default()
                .with_state(other.clone())
                .with_requested_at(at),
        );
        assert!(ctx.state.ptr_eq(&other));
        assert_eq!(*ctx.snapshot, 99);
        assert_eq!(ctx.requested_at, at);

        let pinned = factory.create_with(&ContextOverride::default().with_snapshot(Rc::new(-1)));
        assert_eq!(*pinned.snapshot, -1);
        assert_eq!(pinned.state.get(), 1);
    }
}

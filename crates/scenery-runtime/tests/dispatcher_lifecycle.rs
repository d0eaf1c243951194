#![forbid(unsafe_code)]

//! End-to-end lifecycle tests for [`Dispatcher`] against the scene fixture.
//!
//! Each test checks three things after the call returns: the value handed
//! back to the caller, the events listeners saw, and the busy counters on the
//! shared store.

use futures::executor::block_on;
use scenery_core::{OperationError, ServiceContainer, Store};
use scenery_harness::{
    AddNode, EventRecorder, NamePolicy, PropertyValue, RemoveNode, RenameNode, SceneDocument,
    SceneNode, SetSelection, UpdateObjectProperty,
};
use scenery_runtime::{
    Dispatcher, HookRegistry, InvokeOptions, Invocation, PipelineConfig, PipelineError,
    PipelineEventKind,
};

fn scene() -> SceneDocument {
    SceneDocument::new()
        .with_node(SceneNode::new("root", "Root"))
        .with_node(
            SceneNode::new("cube", "Cube")
                .with_parent("root")
                .with_property("x", 0.0)
                .with_property("visible", true),
        )
}

fn dispatcher() -> (Dispatcher<SceneDocument>, EventRecorder, HookRegistry) {
    let hooks = HookRegistry::new();
    let dispatcher = Dispatcher::with_config(
        Store::new(scene()),
        PipelineConfig::default().with_global_hooks(false),
    )
    .with_hooks(hooks.clone());
    (dispatcher, EventRecorder::new(), hooks)
}

fn assert_idle(dispatcher: &Dispatcher<SceneDocument>) {
    let status = dispatcher.status();
    assert_eq!(status.pending_command_count, 0);
    assert!(!status.is_executing);
}

fn x(dispatcher: &Dispatcher<SceneDocument>) -> Option<PropertyValue> {
    dispatcher
        .store()
        .read(|doc| doc.property("cube", "x").cloned())
}

#[test]
fn successful_invocation_records_and_reports() {
    let (dispatcher, recorder, hooks) = dispatcher();
    let _sub = recorder.attach(&hooks);

    let mut op = UpdateObjectProperty::new("cube", "x", 4.0);
    let pushed = block_on(dispatcher.invoke_and_push(&mut op, &InvokeOptions::new())).unwrap();

    assert!(pushed);
    assert_eq!(x(&dispatcher), Some(4.0.into()));
    assert_eq!(
        recorder.kinds(),
        vec![PipelineEventKind::Invoked, PipelineEventKind::Completed]
    );
    let completed = &recorder.events()[1];
    assert_eq!(completed.command_id, "scene.update-object-property");
    assert_eq!(completed.did_mutate, Some(true));
    assert_eq!(completed.pushed, Some(true));
    assert_eq!(completed.label.as_deref(), Some("Update object property"));

    assert_idle(&dispatcher);
    let status = dispatcher.status();
    assert_eq!(
        status.last_undoable_command_id.as_deref(),
        Some("scene.update-object-property")
    );
    assert_eq!(
        dispatcher.history().next_undo_label().as_deref(),
        Some("Update object property")
    );
}

#[test]
fn undo_redo_symmetry() {
    let (dispatcher, _, _) = dispatcher();
    let before = dispatcher.store().get();

    block_on(dispatcher.invoke_and_push(&mut RemoveNode::new("cube"), &InvokeOptions::new()))
        .unwrap();
    let after = dispatcher.store().get();
    assert!(after.node("cube").is_none());

    assert!(block_on(dispatcher.undo()).unwrap());
    assert_eq!(dispatcher.store().get(), before);
    assert!(block_on(dispatcher.redo()).unwrap());
    assert_eq!(dispatcher.store().get(), after);
    assert_idle(&dispatcher);
}

#[test]
fn blocked_operation_is_a_result_not_an_error() {
    let (dispatcher, recorder, hooks) = dispatcher();
    let _sub = recorder.attach(&hooks);

    let mut op = UpdateObjectProperty::new("ghost", "x", 1.0);
    let invocation = block_on(dispatcher.invoke(&mut op, &InvokeOptions::new())).unwrap();

    let Invocation::Blocked(blocked) = invocation else {
        panic!("expected blocked invocation");
    };
    assert_eq!(
        blocked.reason.as_deref(),
        Some("node `ghost` does not exist")
    );
    assert_eq!(blocked.recoverable, Some(true));
    assert_eq!(blocked.scope.as_deref(), Some("scene"));

    let completed = recorder.of_kind(PipelineEventKind::Completed);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].did_mutate, Some(false));
    assert_eq!(completed[0].pushed, Some(false));
    assert_eq!(
        completed[0].reason.as_deref(),
        Some("node `ghost` does not exist")
    );
    assert!(!dispatcher.can_undo());
    assert_idle(&dispatcher);
}

#[test]
fn blocked_command_emits_blocked_event() {
    let (dispatcher, recorder, hooks) = dispatcher();
    let _sub = recorder.attach(&hooks);

    let mut command = RenameNode::new("ghost", "Phantom");
    let options = InvokeOptions::new();
    let pushed = block_on(dispatcher.execute_command(&mut command, &options)).unwrap();

    assert!(!pushed);
    assert_eq!(
        recorder.kinds(),
        vec![PipelineEventKind::Invoked, PipelineEventKind::Blocked]
    );
    assert_eq!(dispatcher.stats().blocked, 1);
    assert_idle(&dispatcher);
}

#[test]
fn command_success_is_undoable() {
    let (dispatcher, _, _) = dispatcher();
    let mut command = RenameNode::new("cube", "Box");
    assert!(block_on(dispatcher.execute_command(&mut command, &InvokeOptions::new())).unwrap());
    assert_eq!(
        dispatcher.history().next_undo_label().as_deref(),
        Some("Rename to Box")
    );

    block_on(dispatcher.undo()).unwrap();
    let name = dispatcher
        .store()
        .read(|doc| doc.node("cube").map(|n| n.name.clone()));
    assert_eq!(name.as_deref(), Some("Cube"));
}

#[test]
fn execution_failure_propagates_and_releases_counters() {
    let container = ServiceContainer::new().with(NamePolicy { max_len: 4 });
    let (dispatcher, recorder, hooks) = dispatcher();
    let dispatcher = dispatcher.with_container(container);
    let _sub = recorder.attach(&hooks);

    let mut command = RenameNode::new("cube", "Very long name");
    let err = block_on(dispatcher.execute_command(&mut command, &InvokeOptions::new()))
        .unwrap_err();

    let PipelineError::Execution { command_id, source } = &err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(command_id, "scene.rename-node");
    assert!(matches!(source, OperationError::InvalidState(_)));
    let failed = recorder.of_kind(PipelineEventKind::Failed);
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error.as_deref().unwrap_or("").contains("4 characters"));
    assert!(!dispatcher.can_undo());
    assert_idle(&dispatcher);
}

#[test]
fn no_op_never_reaches_history() {
    let (dispatcher, _, _) = dispatcher();
    let mut op = UpdateObjectProperty::new("cube", "x", 0.0);
    let pushed = block_on(dispatcher.invoke_and_push(&mut op, &InvokeOptions::new())).unwrap();
    assert!(!pushed);

    let mut select = SetSelection::new(Vec::<String>::new());
    assert!(!block_on(dispatcher.invoke_and_push(&mut select, &InvokeOptions::new())).unwrap());
    assert!(!dispatcher.can_undo());
    assert_eq!(dispatcher.stats().completed, 2);
}

#[test]
fn invoke_returns_commit_without_recording() {
    let (dispatcher, _, _) = dispatcher();
    let mut op = AddNode::new(SceneNode::new("light", "Light"));
    let invocation = block_on(dispatcher.invoke(&mut op, &InvokeOptions::new())).unwrap();

    assert!(invocation.did_mutate());
    let mut commit = invocation.into_commit().unwrap();
    assert_eq!(commit.label.as_deref(), Some("Add Light"));
    assert!(!dispatcher.can_undo());

    let ctx = scenery_core::ExecutionContext::capture(dispatcher.store(), dispatcher.container());
    block_on(commit.run_undo(ctx)).unwrap();
    assert!(dispatcher.store().read(|doc| doc.node("light").is_none()));
}

#[test]
fn label_override_wins() {
    let (dispatcher, _, _) = dispatcher();
    let options = InvokeOptions::new().with_label("Nudge cube");
    let mut op = UpdateObjectProperty::new("cube", "x", 1.0);
    block_on(dispatcher.invoke_and_push(&mut op, &options)).unwrap();
    assert_eq!(
        dispatcher.history().next_undo_label().as_deref(),
        Some("Nudge cube")
    );
}

#[test]
fn undo_failure_restores_entry_and_counters() {
    let (dispatcher, recorder, hooks) = dispatcher();
    let _sub = recorder.attach(&hooks);

    block_on(dispatcher.invoke_and_push(
        &mut AddNode::new(SceneNode::new("light", "Light")),
        &InvokeOptions::new(),
    ))
    .unwrap();
    // Remove the node behind the pipeline's back so the undo cannot find it.
    dispatcher.store().update(|doc| doc.nodes.remove("light"));

    let err = block_on(dispatcher.undo()).unwrap_err();
    assert!(matches!(err, PipelineError::Undo { ref label, .. } if label == "Add Light"));
    assert_eq!(
        err.operation_error(),
        Some(&OperationError::TargetNotFound("light".into()))
    );
    assert!(dispatcher.can_undo());
    assert_eq!(recorder.of_kind(PipelineEventKind::Failed).len(), 1);
    assert_idle(&dispatcher);
}

#[test]
fn undo_redo_events_carry_label() {
    let (dispatcher, recorder, hooks) = dispatcher();
    block_on(dispatcher.invoke_and_push(&mut RemoveNode::new("cube"), &InvokeOptions::new()))
        .unwrap();
    let _sub = recorder.attach(&hooks);

    block_on(dispatcher.undo()).unwrap();
    block_on(dispatcher.redo()).unwrap();
    assert!(!block_on(dispatcher.redo()).unwrap());

    let events = recorder.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, PipelineEventKind::Undone);
    assert_eq!(events[0].command_id, "scene.remove-node");
    assert_eq!(events[0].label.as_deref(), Some("Remove Cube"));
    assert_eq!(events[1].kind, PipelineEventKind::Redone);

    let stats = dispatcher.stats();
    assert_eq!((stats.undone, stats.redone), (1, 1));
}

#[test]
fn clear_history_resets_last_undoable() {
    let (dispatcher, _, _) = dispatcher();
    block_on(dispatcher.invoke_and_push(
        &mut UpdateObjectProperty::new("cube", "x", 3.0),
        &InvokeOptions::new(),
    ))
    .unwrap();
    assert!(dispatcher.status().last_undoable_command_id.is_some());

    dispatcher.clear_history();
    assert!(!dispatcher.can_undo());
    assert!(dispatcher.status().last_undoable_command_id.is_none());
}

#[test]
fn dispatcher_listener_detaches_on_drop() {
    let (dispatcher, _, _) = dispatcher();
    let seen = std::rc::Rc::new(std::cell::Cell::new(0));
    let counter = std::rc::Rc::clone(&seen);
    let sub = dispatcher.add_listener(move |_| {
        counter.set(counter.get() + 1);
        Ok(())
    });

    let mut op = UpdateObjectProperty::new("cube", "x", 1.0);
    block_on(dispatcher.invoke_and_push(&mut op, &InvokeOptions::new())).unwrap();
    assert_eq!(seen.get(), 2);

    drop(sub);
    let mut op = UpdateObjectProperty::new("cube", "x", 2.0);
    block_on(dispatcher.invoke_and_push(&mut op, &InvokeOptions::new())).unwrap();
    assert_eq!(seen.get(), 2);
}

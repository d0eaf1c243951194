#![forbid(unsafe_code)]

//! Reference scene document and operations.
//!
//! The document uses `im` collections so every context snapshot shares
//! structure with the live store. Each operation captures what it needs to
//! reverse itself (previous value, removed node, previous selection) and
//! restores the document's `dirty` flag on undo.

use std::rc::Rc;

use im::{OrdMap, Vector};
use scenery_core::{
    Blocked, Command, Commit, ExecutionContext, InvokeResult, Operation, OperationError,
    OperationMetadata, OperationResult, Precondition,
};

/// A property value on a node.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SceneNode {
    pub id: String,
    pub name: String,
    pub parent: Option<String>,
    pub properties: OrdMap<String, PropertyValue>,
}

impl SceneNode {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Scene graph plus editor selection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SceneDocument {
    pub nodes: OrdMap<String, SceneNode>,
    pub selection: Vector<String>,
    /// Unsaved changes marker, touched by every mutation.
    pub dirty: bool,
}

impl SceneDocument {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_node(mut self, node: SceneNode) -> Self {
        self.nodes.insert(node.id.clone(), node);
        self
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&SceneNode> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn property(&self, id: &str, key: &str) -> Option<&PropertyValue> {
        self.nodes.get(id).and_then(|n| n.properties.get(key))
    }

    fn node_mut(&mut self, id: &str) -> OperationResult<&mut SceneNode> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| OperationError::TargetNotFound(id.to_string()))
    }
}

/// Optional service limiting node names.
#[derive(Debug, Clone, Copy)]
pub struct NamePolicy {
    pub max_len: usize,
}

type SceneCtx = ExecutionContext<SceneDocument>;

fn set_property(
    doc: &mut SceneDocument,
    id: &str,
    key: &str,
    value: Option<PropertyValue>,
) -> OperationResult<()> {
    let node = doc.node_mut(id)?;
    match value {
        Some(value) => {
            node.properties.insert(key.to_string(), value);
        }
        None => {
            node.properties.remove(key);
        }
    }
    doc.dirty = true;
    Ok(())
}

fn missing_node(ctx: &SceneCtx, id: &str) -> Precondition {
    if ctx.snapshot.nodes.contains_key(id) {
        Precondition::Allowed
    } else {
        Precondition::Blocked(
            Blocked::new()
                .with_reason(format!("node `{id}` does not exist"))
                .with_recoverable(true)
                .with_scope("scene"),
        )
    }
}

// ============================================================================
// UpdateObjectProperty
// ============================================================================

/// Set one property on a node. Setting the current value is a no-op.
#[derive(Debug, Clone)]
pub struct UpdateObjectProperty {
    meta: OperationMetadata,
    pub node_id: String,
    pub key: String,
    pub value: PropertyValue,
}

impl UpdateObjectProperty {
    #[must_use]
    pub fn new(
        node_id: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        Self {
            meta: OperationMetadata::new("scene.update-object-property", "Update object property")
                .with_tag("scene")
                .with_keyword("property"),
            node_id: node_id.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    /// Default coalesce key, e.g. for a slider drag.
    #[must_use]
    pub fn with_coalesce_key(mut self, key: impl Into<String>) -> Self {
        self.meta.coalesce_key = Some(key.into());
        self
    }
}

impl Operation<SceneDocument> for UpdateObjectProperty {
    fn metadata(&self) -> &OperationMetadata {
        &self.meta
    }

    async fn preconditions(&self, ctx: &SceneCtx) -> Precondition {
        missing_node(ctx, &self.node_id)
    }

    async fn perform(&mut self, ctx: &SceneCtx) -> OperationResult<InvokeResult<SceneDocument>> {
        let previous = ctx.snapshot.property(&self.node_id, &self.key).cloned();
        if previous.as_ref() == Some(&self.value) {
            return Ok(InvokeResult::unchanged());
        }
        let was_dirty = ctx.snapshot.dirty;
        let value = self.value.clone();
        ctx.state
            .update(|doc| set_property(doc, &self.node_id, &self.key, Some(value.clone())))?;

        let (undo_id, undo_key) = (self.node_id.clone(), self.key.clone());
        let (redo_id, redo_key) = (self.node_id.clone(), self.key.clone());
        let commit = Commit::new(
            move |ctx: &SceneCtx| {
                ctx.state.update(|doc| {
                    set_property(doc, &undo_id, &undo_key, previous.clone())?;
                    doc.dirty = was_dirty;
                    Ok(())
                })
            },
            move |ctx: &SceneCtx| {
                ctx.state
                    .update(|doc| set_property(doc, &redo_id, &redo_key, Some(value.clone())))
            },
        )
        .with_before_snapshot(Rc::clone(&ctx.snapshot))
        .with_after_snapshot(ctx.state.snapshot());
        Ok(InvokeResult::mutated(commit))
    }
}

// ============================================================================
// AddNode
// ============================================================================

#[derive(Debug, Clone)]
pub struct AddNode {
    meta: OperationMetadata,
    pub node: SceneNode,
}

impl AddNode {
    #[must_use]
    pub fn new(node: SceneNode) -> Self {
        Self {
            meta: OperationMetadata::new("scene.add-node", "Add node").with_tag("scene"),
            node,
        }
    }
}

impl Operation<SceneDocument> for AddNode {
    fn metadata(&self) -> &OperationMetadata {
        &self.meta
    }

    async fn preconditions(&self, ctx: &SceneCtx) -> Precondition {
        if ctx.snapshot.nodes.contains_key(&self.node.id) {
            Precondition::blocked(format!("node `{}` already exists", self.node.id))
        } else {
            Precondition::Allowed
        }
    }

    async fn perform(&mut self, ctx: &SceneCtx) -> OperationResult<InvokeResult<SceneDocument>> {
        let was_dirty = ctx.snapshot.dirty;
        let node = self.node.clone();
        ctx.state.update(|doc| {
            doc.nodes.insert(node.id.clone(), node.clone());
            doc.dirty = true;
        });

        let id = node.id.clone();
        let label = format!("Add {}", node.name);
        let commit = Commit::new(
            move |ctx: &SceneCtx| {
                ctx.state.update(|doc| {
                    doc.nodes
                        .remove(&id)
                        .ok_or_else(|| OperationError::TargetNotFound(id.clone()))?;
                    doc.dirty = was_dirty;
                    Ok(())
                })
            },
            move |ctx: &SceneCtx| {
                ctx.state.update(|doc| {
                    doc.nodes.insert(node.id.clone(), node.clone());
                    doc.dirty = true;
                });
                Ok(())
            },
        )
        .with_label(label);
        Ok(InvokeResult::mutated(commit))
    }
}

// ============================================================================
// RemoveNode
// ============================================================================

/// Remove a node and drop it from the selection.
#[derive(Debug, Clone)]
pub struct RemoveNode {
    meta: OperationMetadata,
    pub node_id: String,
}

impl RemoveNode {
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            meta: OperationMetadata::new("scene.remove-node", "Remove node").with_tag("scene"),
            node_id: node_id.into(),
        }
    }
}

impl Operation<SceneDocument> for RemoveNode {
    fn metadata(&self) -> &OperationMetadata {
        &self.meta
    }

    async fn preconditions(&self, ctx: &SceneCtx) -> Precondition {
        missing_node(ctx, &self.node_id)
    }

    async fn perform(&mut self, ctx: &SceneCtx) -> OperationResult<InvokeResult<SceneDocument>> {
        let snapshot = Rc::clone(&ctx.snapshot);
        let Some(removed) = snapshot.node(&self.node_id).cloned() else {
            return Err(OperationError::TargetNotFound(self.node_id.clone()));
        };
        let previous_selection = snapshot.selection.clone();
        let was_dirty = snapshot.dirty;
        let id = self.node_id.clone();

        remove_node(ctx, &id)?;

        let redo_id = id.clone();
        let label = format!("Remove {}", removed.name);
        let commit = Commit::new(
            move |ctx: &SceneCtx| {
                ctx.state.update(|doc| {
                    doc.nodes.insert(removed.id.clone(), removed.clone());
                    doc.selection = previous_selection.clone();
                    doc.dirty = was_dirty;
                });
                Ok(())
            },
            move |ctx: &SceneCtx| remove_node(ctx, &redo_id),
        )
        .with_label(label)
        .with_before_snapshot(snapshot);
        Ok(InvokeResult::mutated(commit))
    }
}

fn remove_node(ctx: &SceneCtx, id: &str) -> OperationResult<()> {
    ctx.state.update(|doc| {
        doc.nodes
            .remove(id)
            .ok_or_else(|| OperationError::TargetNotFound(id.to_string()))?;
        doc.selection = doc.selection.iter().filter(|s| *s != id).cloned().collect();
        doc.dirty = true;
        Ok(())
    })
}

// ============================================================================
// SetSelection
// ============================================================================

/// Replace the selection. Selection changes do not mark the document dirty.
#[derive(Debug, Clone)]
pub struct SetSelection {
    meta: OperationMetadata,
    pub ids: Vector<String>,
}

impl SetSelection {
    #[must_use]
    pub fn new<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            meta: OperationMetadata::new("selection.set", "Select")
                .with_tag("selection")
                .with_coalesce_key("selection"),
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl Operation<SceneDocument> for SetSelection {
    fn metadata(&self) -> &OperationMetadata {
        &self.meta
    }

    async fn perform(&mut self, ctx: &SceneCtx) -> OperationResult<InvokeResult<SceneDocument>> {
        let previous = ctx.snapshot.selection.clone();
        if previous == self.ids {
            return Ok(InvokeResult::unchanged());
        }
        let next = self.ids.clone();
        ctx.state.update(|doc| doc.selection = next.clone());
        Ok(InvokeResult::mutated(Commit::new(
            move |ctx: &SceneCtx| {
                ctx.state.update(|doc| doc.selection = previous.clone());
                Ok(())
            },
            move |ctx: &SceneCtx| {
                ctx.state.update(|doc| doc.selection = next.clone());
                Ok(())
            },
        )))
    }
}

// ============================================================================
// RenameNode (command)
// ============================================================================

/// Command variant: rename a node. Honors [`NamePolicy`] when registered.
#[derive(Debug, Clone)]
pub struct RenameNode {
    meta: OperationMetadata,
    pub node_id: String,
    pub name: String,
}

impl RenameNode {
    #[must_use]
    pub fn new(node_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            meta: OperationMetadata::new("scene.rename-node", "Rename node").with_tag("scene"),
            node_id: node_id.into(),
            name: name.into(),
        }
    }
}

impl Command<SceneDocument> for RenameNode {
    fn metadata(&self) -> &OperationMetadata {
        &self.meta
    }

    async fn can_execute(&self, ctx: &SceneCtx) -> Precondition {
        missing_node(ctx, &self.node_id)
    }

    async fn execute(&mut self, ctx: &SceneCtx) -> OperationResult<Option<Commit<SceneDocument>>> {
        if let Some(policy) = ctx.container.resolve::<NamePolicy>() {
            if self.name.chars().count() > policy.max_len {
                return Err(OperationError::InvalidState(format!(
                    "name longer than {} characters",
                    policy.max_len
                )));
            }
        }

        let previous = ctx
            .snapshot
            .node(&self.node_id)
            .map(|n| n.name.clone())
            .ok_or_else(|| OperationError::TargetNotFound(self.node_id.clone()))?;
        let was_dirty = ctx.snapshot.dirty;
        rename(ctx, &self.node_id, &self.name)?;

        let (undo_id, redo_id) = (self.node_id.clone(), self.node_id.clone());
        let name = self.name.clone();
        let label = format!("Rename to {name}");
        Ok(Some(
            Commit::new(
                move |ctx: &SceneCtx| {
                    rename(ctx, &undo_id, &previous)?;
                    ctx.state.update(|doc| doc.dirty = was_dirty);
                    Ok(())
                },
                move |ctx: &SceneCtx| rename(ctx, &redo_id, &name),
            )
            .with_label(label),
        ))
    }
}

fn rename(ctx: &SceneCtx, id: &str, name: &str) -> OperationResult<()> {
    ctx.state.update(|doc| {
        doc.node_mut(id)?.name = name.to_string();
        doc.dirty = true;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use scenery_core::{ServiceContainer, Store};

    fn scene() -> Store<SceneDocument> {
        Store::new(
            SceneDocument::new()
                .with_node(SceneNode::new("root", "Root"))
                .with_node(
                    SceneNode::new("cube", "Cube")
                        .with_parent("root")
                        .with_property("x", 0.0),
                ),
        )
    }

    fn ctx(store: &Store<SceneDocument>) -> SceneCtx {
        ExecutionContext::capture(store, &ServiceContainer::new())
    }

    #[test]
    fn update_property_round_trip() {
        let store = scene();
        let mut op = UpdateObjectProperty::new("cube", "x", 2.5);
        let mut commit = block_on(op.perform(&ctx(&store))).unwrap().commit.unwrap();
        assert_eq!(
            store.read(|d| d.property("cube", "x").cloned()),
            Some(2.5.into())
        );
        assert!(store.read(|d| d.dirty));

        block_on(commit.run_undo(ctx(&store))).unwrap();
        assert_eq!(
            store.read(|d| d.property("cube", "x").cloned()),
            Some(0.0.into())
        );
        assert!(!store.read(|d| d.dirty));
    }

    #[test]
    fn update_same_value_is_noop() {
        let store = scene();
        let result =
            block_on(UpdateObjectProperty::new("cube", "x", 0.0).perform(&ctx(&store))).unwrap();
        assert!(!result.did_mutate);
    }

    #[test]
    fn remove_then_undo_restores_selection() {
        let store = scene();
        store.update(|d| d.selection.push_back("cube".into()));
        let mut commit = block_on(RemoveNode::new("cube").perform(&ctx(&store)))
            .unwrap()
            .commit
            .unwrap();
        assert!(store.read(|d| d.node("cube").is_none() && d.selection.is_empty()));

        block_on(commit.run_undo(ctx(&store))).unwrap();
        assert!(store.read(|d| d.node("cube").is_some()));
        assert_eq!(store.read(|d| d.selection.len()), 1);
    }

    #[test]
    fn rename_respects_policy() {
        let store = scene();
        let container = ServiceContainer::new().with(NamePolicy { max_len: 3 });
        let ctx = ExecutionContext::capture(&store, &container);
        let err = block_on(RenameNode::new("cube", "Cuboid").execute(&ctx)).unwrap_err();
        assert!(matches!(err, OperationError::InvalidState(_)));
        let name = store.read(|d| d.node("cube").map(|n| n.name.clone()));
        assert_eq!(name, Some("Cube".into()));
    }

    #[test]
    fn add_node_blocked_when_present() {
        let store = scene();
        let pre =
            block_on(AddNode::new(SceneNode::new("cube", "Again")).preconditions(&ctx(&store)));
        assert!(!pre.can_execute());
    }
}

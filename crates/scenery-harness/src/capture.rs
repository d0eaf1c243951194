#![forbid(unsafe_code)]

//! Recording of lifecycle events and tracing output.
//!
//! [`EventRecorder`] attaches to a [`HookRegistry`] and keeps every
//! [`PipelineEvent`] it sees. [`with_captured_tracing`] runs a closure under
//! a scoped subscriber whose layer stores spans (including fields recorded
//! later through `Span::record`) and events.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use scenery_runtime::{HookRegistry, HookSubscription, PipelineEvent, PipelineEventKind};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;

// ============================================================================
// Lifecycle events
// ============================================================================

/// Collects lifecycle events from a hook registry.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Rc<RefCell<Vec<PipelineEvent>>>,
}

impl EventRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start recording. Recording stops when the subscription drops.
    pub fn attach(&self, registry: &HookRegistry) -> HookSubscription {
        let events = Rc::clone(&self.events);
        registry.register(move |event| {
            events.borrow_mut().push(event.clone());
            Ok(())
        })
    }

    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.borrow().clone()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<PipelineEventKind> {
        self.events.borrow().iter().map(|e| e.kind).collect()
    }

    /// Events of one kind, in emission order.
    #[must_use]
    pub fn of_kind(&self, kind: PipelineEventKind) -> Vec<PipelineEvent> {
        self.events
            .borrow()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

// ============================================================================
// Tracing capture
// ============================================================================

#[derive(Debug, Clone)]
pub struct CapturedSpan {
    pub name: String,
    pub target: String,
    pub level: Level,
    pub fields: HashMap<String, String>,
}

impl CapturedSpan {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

type Shared<T> = Arc<Mutex<T>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read access to what a capture layer recorded.
#[derive(Debug, Clone, Default)]
pub struct CaptureHandle {
    spans: Shared<Vec<CapturedSpan>>,
    events: Shared<Vec<CapturedEvent>>,
}

impl CaptureHandle {
    #[must_use]
    pub fn spans(&self) -> Vec<CapturedSpan> {
        lock(&self.spans).clone()
    }

    #[must_use]
    pub fn spans_named(&self, name: &str) -> Vec<CapturedSpan> {
        lock(&self.spans)
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn events(&self) -> Vec<CapturedEvent> {
        lock(&self.events).clone()
    }

    /// Events whose target matches exactly.
    #[must_use]
    pub fn events_for(&self, target: &str) -> Vec<CapturedEvent> {
        lock(&self.events)
            .iter()
            .filter(|e| e.target == target)
            .cloned()
            .collect()
    }
}

struct CaptureLayer {
    handle: CaptureHandle,
    span_index: Shared<HashMap<u64, usize>>,
}

#[derive(Default)]
struct FieldVisitor(Vec<(String, String)>);

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        self.0.push((field.name().to_string(), format!("{value:?}")));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.push((field.name().to_string(), value.to_string()));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.push((field.name().to_string(), value.to_string()));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.push((field.name().to_string(), value.to_string()));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
}

impl<S> tracing_subscriber::Layer<S> for CaptureLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        let mut fields: HashMap<String, String> = visitor.0.into_iter().collect();
        // Declared but still empty fields show up with an empty value.
        for field in attrs.metadata().fields() {
            fields.entry(field.name().to_string()).or_default();
        }

        let mut spans = lock(&self.handle.spans);
        lock(&self.span_index).insert(id.into_u64(), spans.len());
        spans.push(CapturedSpan {
            name: attrs.metadata().name().to_string(),
            target: attrs.metadata().target().to_string(),
            level: *attrs.metadata().level(),
            fields,
        });
    }

    fn on_record(
        &self,
        id: &tracing::span::Id,
        values: &tracing::span::Record<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = FieldVisitor::default();
        values.record(&mut visitor);

        let Some(&idx) = lock(&self.span_index).get(&id.into_u64()) else {
            return;
        };
        if let Some(span) = lock(&self.handle.spans).get_mut(idx) {
            span.fields.extend(visitor.0);
        }
    }

    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        let fields: HashMap<String, String> = visitor.0.into_iter().collect();
        let message = fields.get("message").cloned().unwrap_or_default();

        lock(&self.handle.events).push(CapturedEvent {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message,
            fields,
        });
    }
}

/// Run `f` with a capturing subscriber as the thread's default.
pub fn with_captured_tracing<R>(f: impl FnOnce() -> R) -> (R, CaptureHandle) {
    let handle = CaptureHandle::default();
    let layer = CaptureLayer {
        handle: handle.clone(),
        span_index: Shared::default(),
    };
    let subscriber = tracing_subscriber::registry().with(layer);
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, handle)
}

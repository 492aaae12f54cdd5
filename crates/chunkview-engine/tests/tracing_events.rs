#![forbid(unsafe_code)]

//! Tracing integration tests.
//!
//! Every `CollectionEvent` is mirrored as a tracing event under the
//! `chunkview::collection` target: failures at WARN, everything else at
//! DEBUG. Scheduler passes and rejected completions trace at TRACE.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chunkview_core::{NavIntent, ViewportConfig};
use chunkview_engine::{
    CollectionMsg, DataItem, DataRequest, DataSource, ItemId, QueryState, SelectionOp,
    SelectionOutcome, SourceError, VecDataSource, VirtualCollection,
};
use chunkview_runtime::{ProgramSimulator, TaskMode};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

// ============================================================================
// Test Infrastructure
// ============================================================================

#[derive(Debug, Clone)]
struct CapturedEvent {
    target: String,
    level: Level,
    fields: HashMap<String, String>,
}

#[derive(Clone, Default)]
struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl EventCapture {
    fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    fn with_target(&self, target: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.target == target)
            .collect()
    }
}

/// Visitor that extracts event fields.
struct FieldVisitor(HashMap<String, String>);

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0
            .insert(field.name().to_string(), format!("{value:?}"));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventCapture {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = FieldVisitor(HashMap::new());
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            target: event.metadata().target().to_string(),
            level: *event.metadata().level(),
            fields: visitor.0,
        });
    }
}

fn with_capture<R>(f: impl FnOnce() -> R) -> (R, EventCapture) {
    let capture = EventCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, capture)
}

/// Source whose chunk at 50 is always offline.
struct HalfBroken(VecDataSource<u32>);

impl DataSource for HalfBroken {
    type Item = u32;

    fn load_chunk(&self, request: &DataRequest) -> Result<Vec<DataItem<u32>>, SourceError> {
        if request.start == 50 {
            return Err(SourceError::Unavailable("shard down".into()));
        }
        self.0.load_chunk(request)
    }

    fn total(&self, query: &QueryState) -> Result<usize, SourceError> {
        self.0.total(query)
    }

    fn apply_selection(
        &self,
        op: &SelectionOp,
        query: &QueryState,
    ) -> Result<SelectionOutcome, SourceError> {
        self.0.apply_selection(op, query)
    }

    fn item_id(&self, item: &u32) -> ItemId {
        self.0.item_id(item)
    }
}

fn half_broken(n: u32) -> HalfBroken {
    HalfBroken(VecDataSource::new((0..n).collect(), |i: &u32| {
        ItemId::new(format!("r{i}"))
    }))
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn collection_events_are_traced_by_kind() {
    let (_, capture) = with_capture(|| {
        let collection =
            VirtualCollection::new(half_broken(500), ViewportConfig::new(10, 50)).unwrap();
        let mut sim = ProgramSimulator::new(collection);
        sim.init();
        // Far enough that the broken chunk leaves the bounding area.
        sim.send(CollectionMsg::Navigate(NavIntent::JumpTo(400)));
    });

    let events = capture.with_target("chunkview::collection");
    let kinds: Vec<&str> = events
        .iter()
        .filter_map(|e| e.fields.get("kind").map(String::as_str))
        .collect();
    assert!(kinds.contains(&"total_received"), "kinds: {kinds:?}");
    assert!(kinds.contains(&"chunk_loading_started"));
    assert!(kinds.contains(&"chunk_loaded"));
    assert!(kinds.contains(&"cursor_moved"));

    let failures: Vec<_> = events
        .iter()
        .filter(|e| e.fields.get("kind").map(String::as_str) == Some("chunk_load_failed"))
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].level, Level::WARN);
    assert!(failures[0].fields["event"].contains("shard down"));

    let loaded = events
        .iter()
        .filter(|e| e.fields.get("kind").map(String::as_str) == Some("chunk_loaded"));
    for event in loaded {
        assert_eq!(event.level, Level::DEBUG);
    }
}

#[test]
fn scheduler_passes_trace_their_work() {
    let (_, capture) = with_capture(|| {
        let collection =
            VirtualCollection::new(half_broken(500), ViewportConfig::new(10, 50)).unwrap();
        let mut sim = ProgramSimulator::new(collection);
        sim.init();
    });

    let passes = capture.with_target("chunkview::scheduler");
    assert_eq!(passes.len(), 1, "one pass after the total arrives");
    assert_eq!(passes[0].level, Level::TRACE);
    assert_eq!(passes[0].fields["loads"], "3");
}

#[test]
fn stale_completions_are_traced() {
    let (_, capture) = with_capture(|| {
        let collection =
            VirtualCollection::new(half_broken(500), ViewportConfig::new(10, 50)).unwrap();
        let mut sim = ProgramSimulator::with_task_mode(collection, TaskMode::Deferred);
        sim.init();
        sim.run_next_task();
        sim.send(CollectionMsg::Refresh);
        sim.run_next_task();
    });

    let rejected: Vec<_> = capture
        .with_target("chunkview::collection")
        .into_iter()
        .filter(|e| e.fields.get("message").map(String::as_str) == Some("completion rejected"))
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].fields["reason"], "completion is stale");
}

#[test]
fn cursor_math_traces_jumps() {
    let (_, capture) = with_capture(|| {
        let collection =
            VirtualCollection::new(half_broken(500), ViewportConfig::new(10, 50)).unwrap();
        let mut sim = ProgramSimulator::new(collection);
        sim.init();
        sim.send(CollectionMsg::Navigate(NavIntent::JumpTo(250)));
    });

    let jumps: Vec<_> = capture
        .events()
        .into_iter()
        .filter(|e| e.fields.get("message").map(String::as_str) == Some("jump recentered viewport"))
        .collect();
    assert!(!jumps.is_empty());
    let last = jumps.last().unwrap();
    assert_eq!(last.fields["requested"], "250");
    assert_eq!(last.fields["start"], "245");
}

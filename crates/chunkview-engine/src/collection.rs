#![forbid(unsafe_code)]

//! The virtual collection model.
//!
//! [`VirtualCollection`] ties the pieces together inside the update loop. It
//! owns the viewport state, the chunk store and the query, and turns every
//! message into state changes plus [`Cmd::Task`]s that call the data source
//! off the loop. Results come back as [`CollectionMsg`]s.
//!
//! # Flow
//!
//! ```text
//! init ──► total task ──► TotalReceived ──► place cursor ──► scheduler pass
//!                                                                │
//!   Navigate ──► gate check ──► CursorEngine ──► scheduler pass ◄┘
//!                                                    │
//!                        load tasks ◄────────────────┘
//!                            │
//!                            ▼
//!              ChunkLoaded ──► store ──► evict if outside area
//! ```
//!
//! Completions never dispatch loads themselves. A chunk whose load failed is
//! requested again by the next pass that still finds it inside the bounding
//! area, so a source that keeps failing is retried at the pace of navigation.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chunkview_core::{
    BoundingArea, ConfigError, CursorEngine, Event, NavIntent, ViewportConfig, ViewportState,
};
use chunkview_runtime::{Cmd, Model};
use tracing::{debug, trace, warn};

use crate::item::DataItem;
use crate::msg::{BlockReason, CollectionEvent, CollectionMsg};
use crate::resolver::{VisibleItemsResolver, VisibleRow};
use crate::scheduler::{ChunkScheduler, LoadTicket};
use crate::source::{
    DataRequest, DataSource, QueryState, SelectionOp, SelectionOutcome, SourceError,
};
use crate::store::{ChunkStore, RequestId};

const EVENT_TARGET: &str = "chunkview::collection";

/// A virtualized view over a [`DataSource`].
pub struct VirtualCollection<S: DataSource> {
    source: Arc<S>,
    config: ViewportConfig,
    state: ViewportState,
    total: Option<usize>,
    store: ChunkStore<S::Item>,
    query: QueryState,
    /// Bumped whenever the cache is discarded; older totals are ignored.
    generation: u64,
    /// Cursor index to recenter on when the next total arrives.
    recenter_on: Option<usize>,
    scroll_blocked: bool,
    last_total_error: Option<SourceError>,
    events: Vec<CollectionEvent>,
}

impl<S: DataSource> std::fmt::Debug for VirtualCollection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualCollection")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("total", &self.total)
            .field("query", &self.query)
            .field("stats", &self.store.stats())
            .finish_non_exhaustive()
    }
}

impl<S: DataSource> VirtualCollection<S> {
    /// Create a collection over `source`.
    ///
    /// Nothing is fetched until [`Model::init`] runs.
    pub fn new(source: S, config: ViewportConfig) -> Result<Self, ConfigError> {
        Self::from_arc(Arc::new(source), config)
    }

    /// Create a collection over a shared source.
    pub fn from_arc(source: Arc<S>, config: ViewportConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            source,
            store: ChunkStore::new(config.chunk_size),
            recenter_on: Some(config.initial_index),
            config,
            state: ViewportState::EMPTY,
            total: None,
            query: QueryState::default(),
            generation: 0,
            scroll_blocked: true,
            last_total_error: None,
            events: Vec::new(),
        })
    }

    /// Start with a query other than the identity view.
    #[must_use]
    pub fn with_query(mut self, query: QueryState) -> Self {
        self.query = query;
        self
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn config(&self) -> &ViewportConfig {
        &self.config
    }

    pub fn state(&self) -> &ViewportState {
        &self.state
    }

    /// Dataset size, once known.
    pub fn total(&self) -> Option<usize> {
        self.total
    }

    pub fn store(&self) -> &ChunkStore<S::Item> {
        &self.store
    }

    pub fn query(&self) -> &QueryState {
        &self.query
    }

    /// Whether relative navigation is currently refused.
    pub fn is_scroll_blocked(&self) -> bool {
        self.scroll_blocked || self.total.is_none()
    }

    /// The error from the last failed total fetch, until a total arrives.
    pub fn total_error(&self) -> Option<&SourceError> {
        self.last_total_error.as_ref()
    }

    /// Rows of the current window.
    pub fn visible_rows(&self) -> Vec<VisibleRow<'_, S::Item>> {
        VisibleItemsResolver::resolve(
            &self.store,
            &self.state,
            self.config.height,
            self.total.unwrap_or(0),
        )
    }

    /// Item under the cursor, if loaded.
    pub fn cursor_item(&self) -> Option<&DataItem<S::Item>> {
        self.total.filter(|&t| t > 0)?;
        self.store.get(self.state.cursor_index)
    }

    /// Events recorded since the last drain.
    pub fn events(&self) -> &[CollectionEvent] {
        &self.events
    }

    /// Take the events recorded since the last drain.
    pub fn drain_events(&mut self) -> Vec<CollectionEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, event: CollectionEvent) {
        if event.is_error() {
            warn!(target: EVENT_TARGET, kind = event.kind(), ?event, "collection event");
        } else {
            debug!(target: EVENT_TARGET, kind = event.kind(), ?event, "collection event");
        }
        self.events.push(event);
    }

    // ── Task builders ────────────────────────────────────────────────────

    fn fetch_total(&self) -> Cmd<CollectionMsg<S::Item>> {
        let source = Arc::clone(&self.source);
        let query = self.query.clone();
        let generation = self.generation;
        Cmd::task_named("chunkview-total", move || CollectionMsg::TotalReceived {
            generation,
            result: guarded("total", || source.total(&query)),
        })
    }

    fn load_chunk(&self, ticket: LoadTicket) -> Cmd<CollectionMsg<S::Item>> {
        let source = Arc::clone(&self.source);
        let LoadTicket {
            request_id,
            request,
        } = ticket;
        let name = format!("chunkview-chunk-{}", request.start);
        Cmd::task_named(name, move || {
            let start = request.start;
            match guarded("load_chunk", || source.load_chunk(&request)) {
                Ok(items) => CollectionMsg::ChunkLoaded {
                    request_id,
                    start,
                    items,
                },
                Err(error) => CollectionMsg::ChunkLoadFailed {
                    request_id,
                    start,
                    error,
                },
            }
        })
    }

    fn apply_selection(&self, op: SelectionOp) -> Cmd<CollectionMsg<S::Item>> {
        let source = Arc::clone(&self.source);
        let query = self.query.clone();
        Cmd::task_named("chunkview-selection", move || {
            let result = guarded("apply_selection", || source.apply_selection(&op, &query));
            CollectionMsg::SelectionApplied { op, result }
        })
    }

    // ── Scheduling ───────────────────────────────────────────────────────

    fn run_pass(&mut self) -> Cmd<CollectionMsg<S::Item>> {
        let Some(total) = self.total else {
            return Cmd::none();
        };
        let pass = ChunkScheduler::run(
            &mut self.store,
            &self.state,
            &self.config,
            total,
            &self.query,
        );
        for start in pass.evicted {
            self.emit(CollectionEvent::ChunkUnloaded { start });
        }
        let mut cmds = Vec::with_capacity(pass.loads.len());
        for ticket in pass.loads {
            self.emit(CollectionEvent::ChunkLoadingStarted {
                start: ticket.request.start,
                request_id: ticket.request_id,
            });
            cmds.push(self.load_chunk(ticket));
        }
        self.set_scroll_blocked(pass.scroll_blocked);
        Cmd::batch(cmds)
    }

    /// Keep the store consistent after a completion without dispatching:
    /// drop anything that arrived for an area the viewport has left, then
    /// recompute the gate.
    fn settle(&mut self) {
        let Some(total) = self.total else {
            return;
        };
        let area = BoundingArea::compute(&self.state, &self.config, total);
        for start in ChunkScheduler::evict_outside(&mut self.store, area) {
            self.emit(CollectionEvent::ChunkUnloaded { start });
        }
        let blocked = ChunkScheduler::scroll_gate(&self.store, &self.state, &self.config, total);
        self.set_scroll_blocked(blocked);
    }

    fn set_scroll_blocked(&mut self, blocked: bool) {
        if self.scroll_blocked != blocked {
            self.scroll_blocked = blocked;
            self.emit(CollectionEvent::ScrollGateChanged { blocked });
        }
    }

    fn set_state(&mut self, next: ViewportState) {
        let from = self.state.cursor_index;
        self.state = next;
        if from != next.cursor_index {
            self.emit(CollectionEvent::CursorMoved {
                from,
                to: next.cursor_index,
            });
        }
    }

    /// Expected item count of the chunk at `start`, given the current total.
    fn expected_len(&self, start: usize) -> usize {
        let total = self.total.unwrap_or(0);
        self.config.chunk_size.min(total.saturating_sub(start))
    }

    /// Re-request a chunk whose content is known to be out of date.
    fn reload(&mut self, start: usize) -> Cmd<CollectionMsg<S::Item>> {
        let request = DataRequest::new(start, self.config.chunk_size, self.query.clone());
        let request_id = self.store.begin_load(request.clone());
        self.emit(CollectionEvent::ChunkLoadingStarted { start, request_id });
        self.load_chunk(LoadTicket {
            request_id,
            request,
        })
    }

    /// Discard every chunk and pending load and fetch the total again.
    fn reset(&mut self, recenter_on: Option<usize>) -> Cmd<CollectionMsg<S::Item>> {
        self.generation += 1;
        for start in self.store.clear() {
            self.emit(CollectionEvent::ChunkUnloaded { start });
        }
        self.total = None;
        self.recenter_on = recenter_on;
        self.set_scroll_blocked(true);
        self.fetch_total()
    }

    // ── Message handlers ─────────────────────────────────────────────────

    fn on_navigate(&mut self, intent: NavIntent) -> Cmd<CollectionMsg<S::Item>> {
        let Some(total) = self.total else {
            self.emit(CollectionEvent::NavigationBlocked {
                intent,
                reason: BlockReason::TotalUnknown,
            });
            return Cmd::none();
        };
        let next = CursorEngine::apply(intent, &self.state, &self.config, total);
        // A relative move may not reveal rows that are still in flight, so
        // the gate is checked against the window it would produce as well.
        if intent.is_relative()
            && (self.scroll_blocked
                || ChunkScheduler::scroll_gate(&self.store, &next, &self.config, total))
        {
            self.emit(CollectionEvent::NavigationBlocked {
                intent,
                reason: BlockReason::Loading,
            });
            return Cmd::none();
        }
        self.set_state(next);
        self.run_pass()
    }

    fn on_input(&mut self, event: Event) -> Cmd<CollectionMsg<S::Item>> {
        match event {
            Event::Key(key) => match NavIntent::from_key(&key) {
                Some(intent) => self.on_navigate(intent),
                None => Cmd::none(),
            },
            Event::Resize { height, .. } => self.on_resize(usize::from(height)),
            Event::Tick => Cmd::none(),
        }
    }

    fn on_resize(&mut self, height: usize) -> Cmd<CollectionMsg<S::Item>> {
        self.config.set_height(height);
        let Some(total) = self.total else {
            return Cmd::none();
        };
        let next = CursorEngine::place(&self.state, &self.config, total, self.state.cursor_index);
        self.set_state(next);
        self.run_pass()
    }

    fn on_total(
        &mut self,
        generation: u64,
        result: Result<usize, SourceError>,
    ) -> Cmd<CollectionMsg<S::Item>> {
        if generation != self.generation {
            trace!(target: EVENT_TARGET, generation, current = self.generation, "stale total dropped");
            return Cmd::none();
        }
        let total = match result {
            Ok(total) => total,
            Err(error) => {
                self.last_total_error = Some(error.clone());
                self.emit(CollectionEvent::TotalFailed { error });
                return Cmd::none();
            }
        };
        self.last_total_error = None;
        self.total = Some(total);
        self.emit(CollectionEvent::TotalReceived { total });

        let next = match self.recenter_on.take() {
            Some(index) => CursorEngine::jump_to_index(&self.state, &self.config, total, index),
            None => CursorEngine::place(&self.state, &self.config, total, self.state.cursor_index),
        };
        self.set_state(next);

        // Chunks that no longer fit the dataset are dropped, as are loads
        // for starts past its end.
        let misfits: Vec<usize> = self
            .store
            .iter()
            .filter(|chunk| chunk.start >= total || chunk.len() != self.expected_len(chunk.start))
            .map(|chunk| chunk.start)
            .collect();
        for start in misfits {
            self.store.evict(start);
            self.emit(CollectionEvent::ChunkUnloaded { start });
        }
        let orphaned: Vec<usize> = self.store.loading_starts().filter(|&s| s >= total).collect();
        for start in orphaned {
            self.store.abandon_load(start);
        }
        self.run_pass()
    }

    fn on_chunk_loaded(
        &mut self,
        request_id: RequestId,
        start: usize,
        items: Vec<DataItem<S::Item>>,
    ) -> Cmd<CollectionMsg<S::Item>> {
        let expected = self.expected_len(start);
        let refreshed = self.store.contains(start);
        match self.store.complete_load(request_id, start, items, expected) {
            Ok(chunk) => {
                let len = chunk.len();
                self.emit(CollectionEvent::ChunkLoaded {
                    start,
                    len,
                    refreshed,
                });
            }
            Err(reason) => {
                trace!(target: EVENT_TARGET, start, %request_id, %reason, "completion rejected");
                self.emit(CollectionEvent::ChunkRejected { start, reason });
            }
        }
        self.settle();
        Cmd::none()
    }

    fn on_chunk_failed(
        &mut self,
        request_id: RequestId,
        start: usize,
        error: SourceError,
    ) -> Cmd<CollectionMsg<S::Item>> {
        if self.store.fail_load(request_id, start) {
            self.emit(CollectionEvent::ChunkLoadFailed { start, error });
            self.settle();
        } else {
            trace!(target: EVENT_TARGET, start, %request_id, "stale failure dropped");
        }
        Cmd::none()
    }

    fn on_selection(
        &mut self,
        op: SelectionOp,
        result: Result<SelectionOutcome, SourceError>,
    ) -> Cmd<CollectionMsg<S::Item>> {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                self.emit(CollectionEvent::SelectionFailed { op, error });
                return Cmd::none();
            }
        };
        let Some(total) = self.total else {
            self.emit(CollectionEvent::SelectionApplied {
                op,
                refreshed: Vec::new(),
            });
            return Cmd::none();
        };

        let mut starts: Vec<usize> = if outcome.all {
            self.store
                .chunk_starts()
                .chain(self.store.loading_starts())
                .collect()
        } else {
            outcome
                .affected
                .iter()
                .filter_map(|affected| affected.index.or_else(|| self.store.find_id(&affected.id)))
                .filter(|&index| index < total)
                .map(|index| self.store.chunk_start(index))
                .collect()
        };
        starts.sort_unstable();
        starts.dedup();
        // Chunks not cached anywhere cannot be stale.
        starts.retain(|&s| self.store.contains(s) || self.store.is_loading(s));

        let cmds: Vec<_> = starts.iter().map(|&start| self.reload(start)).collect();
        self.emit(CollectionEvent::SelectionApplied {
            op,
            refreshed: starts,
        });
        Cmd::batch(cmds)
    }
}

/// Run a data source call off the loop. A panic becomes
/// [`SourceError::Backend`] so the affected chunk, total or selection fails
/// like any other error instead of taking the worker down with it.
fn guarded<R>(
    call: &'static str,
    f: impl FnOnce() -> Result<R, SourceError>,
) -> Result<R, SourceError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let detail = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_owned()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_owned()
            };
            warn!(target: EVENT_TARGET, call, %detail, "data source panicked");
            Err(SourceError::Backend(format!("{call} panicked: {detail}")))
        }
    }
}

impl<S: DataSource> Model for VirtualCollection<S> {
    type Message = CollectionMsg<S::Item>;

    fn init(&mut self) -> Cmd<Self::Message> {
        self.fetch_total()
    }

    fn update(&mut self, msg: Self::Message) -> Cmd<Self::Message> {
        match msg {
            CollectionMsg::Navigate(intent) => self.on_navigate(intent),
            CollectionMsg::Input(event) => self.on_input(event),
            CollectionMsg::Select(op) => self.apply_selection(op),
            CollectionMsg::Resize { height } => self.on_resize(height),
            CollectionMsg::SetQuery(query) => {
                self.query = query;
                self.reset(Some(0))
            }
            CollectionMsg::Refresh => self.reset(None),
            CollectionMsg::RefreshTotal => self.fetch_total(),
            CollectionMsg::TotalReceived { generation, result } => {
                self.on_total(generation, result)
            }
            CollectionMsg::ChunkLoaded {
                request_id,
                start,
                items,
            } => self.on_chunk_loaded(request_id, start, items),
            CollectionMsg::ChunkLoadFailed {
                request_id,
                start,
                error,
            } => self.on_chunk_failed(request_id, start, error),
            CollectionMsg::SelectionApplied { op, result } => self.on_selection(op, result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemId;
    use crate::source::{SortKey, VecDataSource};
    use chunkview_runtime::{ProgramSimulator, TaskMode};

    fn source(n: usize) -> VecDataSource<usize> {
        VecDataSource::new((0..n).collect(), |i: &usize| ItemId::new(format!("row-{i}")))
            .with_fields(|i: &usize, field: &str| (field == "n").then(|| i.to_string()))
    }

    fn sim(n: usize, mode: TaskMode) -> ProgramSimulator<VirtualCollection<VecDataSource<usize>>> {
        let collection = VirtualCollection::new(source(n), ViewportConfig::new(10, 50)).unwrap();
        let mut sim = ProgramSimulator::with_task_mode(collection, mode);
        sim.init();
        sim
    }

    #[test]
    fn rejects_invalid_config() {
        let err = VirtualCollection::new(source(1), ViewportConfig::new(0, 50)).unwrap_err();
        assert_eq!(err, ConfigError::ZeroHeight);
    }

    #[test]
    fn init_loads_total_and_bounding_chunks() {
        let sim = sim(1000, TaskMode::Immediate);
        let c = sim.model();
        assert_eq!(c.total(), Some(1000));
        assert_eq!(c.store().chunk_starts().collect::<Vec<_>>(), vec![0, 50, 100]);
        assert!(!c.is_scroll_blocked());
        assert_eq!(c.cursor_item().map(|i| i.payload), Some(0));
    }

    #[test]
    fn navigation_before_total_is_blocked() {
        let mut sim = sim(1000, TaskMode::Deferred);
        sim.send(CollectionMsg::Navigate(NavIntent::Down));
        let events = sim.model_mut().drain_events();
        assert_eq!(
            events,
            vec![CollectionEvent::NavigationBlocked {
                intent: NavIntent::Down,
                reason: BlockReason::TotalUnknown,
            }]
        );
        assert_eq!(sim.model().state().cursor_index, 0);
    }

    #[test]
    fn gate_blocks_steps_but_not_jumps() {
        let mut sim = sim(1000, TaskMode::Deferred);
        sim.run_next_task(); // total
        assert!(sim.model().is_scroll_blocked());
        sim.send(CollectionMsg::Navigate(NavIntent::Down));
        assert_eq!(sim.model().state().cursor_index, 0);
        sim.send(CollectionMsg::Navigate(NavIntent::JumpTo(300)));
        assert_eq!(sim.model().state().cursor_index, 300);
        let events = sim.model_mut().drain_events();
        assert!(events.contains(&CollectionEvent::NavigationBlocked {
            intent: NavIntent::Down,
            reason: BlockReason::Loading,
        }));
    }

    #[test]
    fn keys_navigate() {
        use chunkview_core::{KeyCode, KeyEvent};
        let mut sim = sim(1000, TaskMode::Immediate);
        sim.inject_event(Event::Key(KeyEvent::new(KeyCode::End)));
        assert_eq!(sim.model().state().cursor_index, 999);
        sim.inject_event(Event::Key(KeyEvent::new(KeyCode::Char('k'))));
        assert_eq!(sim.model().state().cursor_index, 998);
        sim.inject_event(Event::Tick);
        assert_eq!(sim.model().state().cursor_index, 998);
    }

    #[test]
    fn resize_keeps_cursor_and_schedules() {
        let mut sim = sim(1000, TaskMode::Immediate);
        sim.send(CollectionMsg::Navigate(NavIntent::JumpTo(200)));
        sim.send(CollectionMsg::Resize { height: 4 });
        let c = sim.model();
        assert_eq!(c.config().height, 4);
        assert_eq!(c.state().cursor_index, 200);
        assert!(c.state().cursor_viewport_index < 4);
        assert_eq!(c.visible_rows().len(), 4);
    }

    #[test]
    fn set_query_discards_cache_and_returns_to_start() {
        let mut sim = sim(1000, TaskMode::Immediate);
        sim.send(CollectionMsg::Navigate(NavIntent::JumpTo(400)));
        sim.model_mut().drain_events();
        sim.send(CollectionMsg::SetQuery(
            QueryState::default().sorted_by(SortKey::desc("n")),
        ));
        let c = sim.model();
        assert_eq!(c.state().cursor_index, 0);
        assert_eq!(c.cursor_item().map(|i| i.payload), Some(999));
        let events = sim.model().events();
        assert!(events.contains(&CollectionEvent::ChunkUnloaded { start: 400 }));
    }

    #[test]
    fn refresh_keeps_cursor_index() {
        let mut sim = sim(1000, TaskMode::Immediate);
        sim.send(CollectionMsg::Navigate(NavIntent::JumpTo(420)));
        let before = *sim.model().state();
        sim.send(CollectionMsg::Refresh);
        assert_eq!(*sim.model().state(), before);
        assert!(sim.model().store().contains(400));
    }

    #[test]
    fn embeds_in_host_model_via_map() {
        struct Host {
            list: VirtualCollection<VecDataSource<usize>>,
        }

        enum HostMsg {
            List(CollectionMsg<usize>),
        }

        impl Model for Host {
            type Message = HostMsg;

            fn init(&mut self) -> Cmd<HostMsg> {
                self.list.init().map(HostMsg::List)
            }

            fn update(&mut self, msg: HostMsg) -> Cmd<HostMsg> {
                match msg {
                    HostMsg::List(m) => self.list.update(m).map(HostMsg::List),
                }
            }
        }

        let list = VirtualCollection::new(source(120), ViewportConfig::new(10, 50)).unwrap();
        let mut sim = ProgramSimulator::new(Host { list });
        sim.init();
        sim.send(HostMsg::List(CollectionMsg::Navigate(NavIntent::End)));
        assert_eq!(sim.model().list.state().cursor_index, 119);
        assert_eq!(sim.model().list.cursor_item().map(|i| i.payload), Some(119));
    }
}

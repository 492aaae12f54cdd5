#![forbid(unsafe_code)]

//! Chunk scheduling.
//!
//! One pass of [`ChunkScheduler::run`] brings the store in line with the
//! viewport:
//!
//! 1. compute the bounding area,
//! 2. register a load for every chunk start intersecting it that is neither
//!    stored nor loading,
//! 3. evict every stored chunk lying wholly outside it,
//! 4. recompute the scroll gate.
//!
//! The pass never performs I/O. It returns the loads it registered and the
//! caller dispatches them.
//!
//! After a pass, every chunk start intersecting the bounding area is stored
//! or loading, and no stored chunk lies outside it.

use chunkview_core::{BoundingArea, ViewportConfig, ViewportState};
use tracing::trace;

use crate::source::{DataRequest, QueryState};
use crate::store::{ChunkStore, RequestId};

/// A load registered by a pass, waiting to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub request_id: RequestId,
    pub request: DataRequest,
}

/// What a pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerPass {
    pub area: Option<BoundingArea>,
    pub loads: Vec<LoadTicket>,
    /// Starts of evicted chunks, ascending.
    pub evicted: Vec<usize>,
    pub scroll_blocked: bool,
}

/// Stateless scheduler over a [`ChunkStore`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkScheduler;

impl ChunkScheduler {
    /// Run one pass for a dataset of `total` items.
    pub fn run<T>(
        store: &mut ChunkStore<T>,
        state: &ViewportState,
        config: &ViewportConfig,
        total: usize,
        query: &QueryState,
    ) -> SchedulerPass {
        let chunk_size = store.chunk_size();
        let area = BoundingArea::compute(state, config, total);

        let mut loads = Vec::new();
        if let Some(area) = area {
            for start in area.chunk_starts(chunk_size) {
                if store.contains(start) || store.is_loading(start) {
                    continue;
                }
                let request = DataRequest::new(start, chunk_size, query.clone());
                let request_id = store.begin_load(request.clone());
                loads.push(LoadTicket {
                    request_id,
                    request,
                });
            }
        }

        let stale = Self::evict_outside(store, area);
        let scroll_blocked = Self::scroll_gate(store, state, config, total);
        trace!(
            target: "chunkview::scheduler",
            area = ?area,
            loads = loads.len(),
            evicted = stale.len(),
            scroll_blocked,
            "scheduler pass"
        );
        SchedulerPass {
            area,
            loads,
            evicted: stale,
            scroll_blocked,
        }
    }

    /// Evict every stored chunk lying wholly outside `area`.
    ///
    /// With no area (empty dataset) everything goes. Returns the evicted
    /// starts, ascending.
    pub fn evict_outside<T>(store: &mut ChunkStore<T>, area: Option<BoundingArea>) -> Vec<usize> {
        let stale: Vec<usize> = store
            .iter()
            .filter(|chunk| !area.is_some_and(|a| a.intersects(&chunk.range())))
            .map(|chunk| chunk.start)
            .collect();
        for &start in &stale {
            store.evict(start);
        }
        stale
    }

    /// Whether relative scrolling must wait.
    ///
    /// Only chunks intersecting the visible rows count, and only when they
    /// are loading with nothing stored yet. Look-ahead loads and refreshes of
    /// stored chunks never block.
    pub fn scroll_gate<T>(
        store: &ChunkStore<T>,
        state: &ViewportState,
        config: &ViewportConfig,
        total: usize,
    ) -> bool {
        let visible = state.visible_range(config.height, total);
        if visible.is_empty() {
            return false;
        }
        let first = store.chunk_start(visible.start);
        (first..visible.end)
            .step_by(store.chunk_size())
            .any(|start| store.is_loading(start) && !store.contains(start))
    }
}

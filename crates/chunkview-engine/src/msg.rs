#![forbid(unsafe_code)]

//! Messages consumed by [`VirtualCollection`](crate::VirtualCollection) and
//! events it reports to the host.

use chunkview_core::{Event, NavIntent};

use crate::item::DataItem;
use crate::source::{QueryState, SelectionOp, SelectionOutcome, SourceError};
use crate::store::{LoadRejection, RequestId};

/// Input to the collection's update function.
///
/// Hosts send navigation, selection, resize and query messages. The
/// `*Received`, `*Loaded`, `*Failed` and `*Applied` variants are produced by
/// the collection's own tasks.
#[derive(Debug)]
pub enum CollectionMsg<T> {
    Navigate(NavIntent),
    /// Raw input; keys map through [`NavIntent::from_key`].
    Input(Event),
    Select(SelectionOp),
    /// New viewport height in rows.
    Resize { height: usize },
    /// Replace sort and filter state. Discards the cache and returns the
    /// cursor to the first row.
    SetQuery(QueryState),
    /// Discard the cache and reload, keeping the cursor index.
    Refresh,
    /// Re-fetch the total without discarding anything.
    RefreshTotal,

    TotalReceived {
        generation: u64,
        result: Result<usize, SourceError>,
    },
    ChunkLoaded {
        request_id: RequestId,
        start: usize,
        items: Vec<DataItem<T>>,
    },
    ChunkLoadFailed {
        request_id: RequestId,
        start: usize,
        error: SourceError,
    },
    SelectionApplied {
        op: SelectionOp,
        result: Result<SelectionOutcome, SourceError>,
    },
}

impl<T> From<Event> for CollectionMsg<T> {
    fn from(event: Event) -> Self {
        Self::Input(event)
    }
}

impl<T> From<NavIntent> for CollectionMsg<T> {
    fn from(intent: NavIntent) -> Self {
        Self::Navigate(intent)
    }
}

/// Why a navigation intent was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// The dataset size is not known yet, or fetching it failed.
    TotalUnknown,
    /// A visible chunk is still loading.
    Loading,
}

/// Observable lifecycle events, drained by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEvent {
    TotalReceived {
        total: usize,
    },
    TotalFailed {
        error: SourceError,
    },
    ChunkLoadingStarted {
        start: usize,
        request_id: RequestId,
    },
    ChunkLoaded {
        start: usize,
        len: usize,
        /// The chunk replaced a stored one.
        refreshed: bool,
    },
    ChunkLoadFailed {
        start: usize,
        error: SourceError,
    },
    ChunkUnloaded {
        start: usize,
    },
    ChunkRejected {
        start: usize,
        reason: LoadRejection,
    },
    SelectionApplied {
        op: SelectionOp,
        /// Chunk starts re-requested because of the change.
        refreshed: Vec<usize>,
    },
    SelectionFailed {
        op: SelectionOp,
        error: SourceError,
    },
    CursorMoved {
        from: usize,
        to: usize,
    },
    NavigationBlocked {
        intent: NavIntent,
        reason: BlockReason,
    },
    ScrollGateChanged {
        blocked: bool,
    },
}

impl CollectionEvent {
    /// Stable name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TotalReceived { .. } => "total_received",
            Self::TotalFailed { .. } => "total_failed",
            Self::ChunkLoadingStarted { .. } => "chunk_loading_started",
            Self::ChunkLoaded { .. } => "chunk_loaded",
            Self::ChunkLoadFailed { .. } => "chunk_load_failed",
            Self::ChunkUnloaded { .. } => "chunk_unloaded",
            Self::ChunkRejected { .. } => "chunk_rejected",
            Self::SelectionApplied { .. } => "selection_applied",
            Self::SelectionFailed { .. } => "selection_failed",
            Self::CursorMoved { .. } => "cursor_moved",
            Self::NavigationBlocked { .. } => "navigation_blocked",
            Self::ScrollGateChanged { .. } => "scroll_gate_changed",
        }
    }

    /// Whether the event reports a failure the host may want to surface.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::TotalFailed { .. } | Self::ChunkLoadFailed { .. } | Self::SelectionFailed { .. }
        )
    }
}

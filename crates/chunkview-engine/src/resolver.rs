#![forbid(unsafe_code)]

//! Materializes the visible rows from the store.
//!
//! Resolution is a pure read: it dispatches nothing, updates no timestamps,
//! and returns the same rows for the same state and store.

use std::fmt;

use chunkview_core::ViewportState;

use crate::item::{DataItem, ItemId};
use crate::store::ChunkStore;

/// Load status of one visible row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowStatus {
    Loaded,
    /// The owning chunk is in flight.
    Loading,
    /// The owning chunk is neither stored nor in flight.
    Missing,
}

/// Render key of a row: the item id, or a synthetic key derived from the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKey<'a> {
    Id(&'a ItemId),
    Placeholder(usize),
}

impl fmt::Display for RowKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Placeholder(index) => write!(f, "placeholder:{index}"),
        }
    }
}

/// One row of the window.
#[derive(Debug, PartialEq)]
pub struct VisibleRow<'a, T> {
    /// Absolute index in the dataset.
    pub index: usize,
    pub key: RowKey<'a>,
    pub status: RowStatus,
    pub item: Option<&'a DataItem<T>>,
    pub is_cursor: bool,
}

impl<T> Clone for VisibleRow<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for VisibleRow<'_, T> {}

/// Pure resolver from `(state, store)` to visible rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct VisibleItemsResolver;

impl VisibleItemsResolver {
    /// Exactly `min(height, total - viewport_start)` rows, in index order.
    pub fn resolve<'a, T>(
        store: &'a ChunkStore<T>,
        state: &ViewportState,
        height: usize,
        total: usize,
    ) -> Vec<VisibleRow<'a, T>> {
        state
            .visible_range(height, total)
            .map(|index| Self::row(store, index, state.cursor_index == index))
            .collect()
    }

    fn row<T>(store: &ChunkStore<T>, index: usize, is_cursor: bool) -> VisibleRow<'_, T> {
        if let Some(item) = store.get(index) {
            return VisibleRow {
                index,
                key: RowKey::Id(&item.id),
                status: RowStatus::Loaded,
                item: Some(item),
                is_cursor,
            };
        }
        let status = if store.is_loading(store.chunk_start(index)) {
            RowStatus::Loading
        } else {
            RowStatus::Missing
        };
        VisibleRow {
            index,
            key: RowKey::Placeholder(index),
            status,
            item: None,
            is_cursor,
        }
    }
}

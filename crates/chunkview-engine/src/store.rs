#![forbid(unsafe_code)]

//! Chunk store: the only owner of loaded chunks and in-flight loads.
//!
//! Chunks are keyed by their start index, `floor(i / chunk_size) * chunk_size`.
//! A chunk enters the store only as a whole: a completion that does not carry
//! exactly the expected number of items is rejected and the chunk stays
//! absent. Every dispatched load gets a fresh [`RequestId`]; a completion is
//! accepted only while it is still the pending load for its start.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::time::Instant;

use crate::item::{DataItem, ItemId};
use crate::source::DataRequest;

/// Identity of one dispatched load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// The raw sequence number. Ids increase in dispatch order.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a completion was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadRejection {
    /// The load was superseded, abandoned, or never dispatched.
    Stale,
    /// More items than the chunk can hold.
    Oversized { expected: usize, actual: usize },
    /// Fewer items than the chunk must hold.
    Partial { expected: usize, actual: usize },
}

impl fmt::Display for LoadRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stale => write!(f, "completion is stale"),
            Self::Oversized { expected, actual } => {
                write!(f, "chunk carried {actual} items, expected {expected}")
            }
            Self::Partial { expected, actual } => {
                write!(f, "chunk carried only {actual} of {expected} items")
            }
        }
    }
}

impl std::error::Error for LoadRejection {}

/// A loaded, contiguous run of items.
#[derive(Debug, Clone)]
pub struct Chunk<T> {
    /// First absolute index.
    pub start: usize,
    /// One past the last absolute index.
    pub end: usize,
    /// Items in index order; `items[i]` is the item at `start + i`.
    pub items: Vec<DataItem<T>>,
    /// When this chunk was (re)loaded. Reads never update it.
    pub loaded_at: Instant,
    /// The request that produced this chunk.
    pub origin: DataRequest,
    /// Id of the load that delivered this chunk.
    pub request_id: RequestId,
}

impl<T> Chunk<T> {
    #[inline]
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A dispatched load that has not completed yet.
#[derive(Debug, Clone)]
pub struct PendingLoad {
    /// Only a completion carrying this id is accepted.
    pub request_id: RequestId,
    /// What was asked of the data source.
    pub request: DataRequest,
    /// When the load was dispatched.
    pub started_at: Instant,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Chunks currently stored.
    pub chunks: usize,
    /// Items across all stored chunks.
    pub items: usize,
    /// Loads dispatched and not yet completed, failed or abandoned.
    pub loading: usize,
    /// Completions accepted since the store was created.
    pub loads_completed: u64,
    /// Chunks evicted since the store was created.
    pub evictions: u64,
}

/// Owner of loaded chunks and in-flight loads.
#[derive(Debug)]
pub struct ChunkStore<T> {
    chunk_size: usize,
    chunks: BTreeMap<usize, Chunk<T>>,
    loading: BTreeMap<usize, PendingLoad>,
    next_request: u64,
    loads_completed: u64,
    evictions: u64,
}

impl<T> ChunkStore<T> {
    /// Create an empty store. A chunk size of zero is treated as one.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunks: BTreeMap::new(),
            loading: BTreeMap::new(),
            next_request: 0,
            loads_completed: 0,
            evictions: 0,
        }
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Start of the chunk owning `index`.
    #[inline]
    pub fn chunk_start(&self, index: usize) -> usize {
        (index / self.chunk_size) * self.chunk_size
    }

    /// Register a dispatched load and return its id.
    ///
    /// A load already pending for the same start is superseded: its
    /// completion will be rejected as stale.
    pub fn begin_load(&mut self, request: DataRequest) -> RequestId {
        self.next_request += 1;
        let request_id = RequestId(self.next_request);
        let start = request.start;
        self.loading.insert(
            start,
            PendingLoad {
                request_id,
                request,
                started_at: Instant::now(),
            },
        );
        request_id
    }

    /// Store a completed load.
    ///
    /// `expected` is the exact number of items the chunk must hold. Stale
    /// completions leave the store untouched; size mismatches clear the
    /// pending entry and leave the chunk absent (or, for a refresh, keep the
    /// previous chunk).
    pub fn complete_load(
        &mut self,
        request_id: RequestId,
        start: usize,
        items: Vec<DataItem<T>>,
        expected: usize,
    ) -> Result<&Chunk<T>, LoadRejection> {
        let pending = match self.loading.entry(start) {
            Entry::Occupied(e) if e.get().request_id == request_id => e.remove(),
            _ => return Err(LoadRejection::Stale),
        };
        let actual = items.len();
        if actual > expected {
            return Err(LoadRejection::Oversized { expected, actual });
        }
        if actual < expected {
            return Err(LoadRejection::Partial { expected, actual });
        }
        self.loads_completed += 1;
        let chunk = Chunk {
            start,
            end: start + actual,
            items,
            loaded_at: Instant::now(),
            origin: pending.request,
            request_id,
        };
        Ok(match self.chunks.entry(start) {
            Entry::Occupied(mut e) => {
                e.insert(chunk);
                e.into_mut()
            }
            Entry::Vacant(e) => e.insert(chunk),
        })
    }

    /// Clear the pending entry for a failed load.
    ///
    /// Returns false when the failure is stale.
    pub fn fail_load(&mut self, request_id: RequestId, start: usize) -> bool {
        if self.loading.get(&start).map(|p| p.request_id) == Some(request_id) {
            self.loading.remove(&start);
            true
        } else {
            false
        }
    }

    /// Forget a pending load so its completion is rejected.
    pub fn abandon_load(&mut self, start: usize) -> Option<PendingLoad> {
        self.loading.remove(&start)
    }

    /// Remove a stored chunk.
    pub fn evict(&mut self, start: usize) -> Option<Chunk<T>> {
        let chunk = self.chunks.remove(&start)?;
        self.evictions += 1;
        Some(chunk)
    }

    /// Drop every chunk and pending load. Returns the starts of dropped chunks.
    pub fn clear(&mut self) -> Vec<usize> {
        self.loading.clear();
        let starts: Vec<usize> = self.chunks.keys().copied().collect();
        self.evictions += starts.len() as u64;
        self.chunks.clear();
        starts
    }

    /// Item at an absolute index, if its chunk is stored.
    pub fn get(&self, index: usize) -> Option<&DataItem<T>> {
        let chunk = self.chunks.get(&self.chunk_start(index))?;
        chunk.items.get(index - chunk.start)
    }

    pub fn chunk(&self, start: usize) -> Option<&Chunk<T>> {
        self.chunks.get(&start)
    }

    pub fn contains(&self, start: usize) -> bool {
        self.chunks.contains_key(&start)
    }

    pub fn is_loading(&self, start: usize) -> bool {
        self.loading.contains_key(&start)
    }

    pub fn pending(&self, start: usize) -> Option<&PendingLoad> {
        self.loading.get(&start)
    }

    /// Starts of in-flight loads, ascending.
    pub fn loading_starts(&self) -> impl Iterator<Item = usize> + '_ {
        self.loading.keys().copied()
    }

    /// Starts of stored chunks, ascending.
    pub fn chunk_starts(&self) -> impl Iterator<Item = usize> + '_ {
        self.chunks.keys().copied()
    }

    /// Stored chunks in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Chunk<T>> {
        self.chunks.values()
    }

    /// Absolute index of a stored item with this id.
    pub fn find_id(&self, id: &ItemId) -> Option<usize> {
        self.chunks.values().find_map(|chunk| {
            chunk
                .items
                .iter()
                .position(|item| item.id == *id)
                .map(|offset| chunk.start + offset)
        })
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            chunks: self.chunks.len(),
            items: self.chunks.values().map(|c| c.items.len()).sum(),
            loading: self.loading.len(),
            loads_completed: self.loads_completed,
            evictions: self.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::QueryState;

    fn items(start: usize, n: usize) -> Vec<DataItem<usize>> {
        (start..start + n)
            .map(|i| DataItem::new(format!("row-{i}"), i))
            .collect()
    }

    fn request(start: usize) -> DataRequest {
        DataRequest::new(start, 10, QueryState::default())
    }

    #[test]
    fn load_and_lookup() {
        let mut store = ChunkStore::new(10);
        let id = store.begin_load(request(20));
        assert!(store.is_loading(20));
        let chunk = store.complete_load(id, 20, items(20, 10), 10).unwrap();
        assert_eq!(chunk.range(), 20..30);
        assert!(!store.is_loading(20));
        assert_eq!(store.get(27).map(|i| i.payload), Some(27));
        assert_eq!(store.get(30), None);
        assert_eq!(store.find_id(&ItemId::new("row-23")), Some(23));
    }

    #[test]
    fn superseded_completion_is_stale() {
        let mut store = ChunkStore::new(10);
        let old = store.begin_load(request(0));
        let new = store.begin_load(request(0));
        assert_ne!(old, new);
        assert_eq!(
            store.complete_load(old, 0, items(0, 10), 10).err(),
            Some(LoadRejection::Stale)
        );
        assert!(store.is_loading(0));
        assert!(store.complete_load(new, 0, items(0, 10), 10).is_ok());
        assert!(!store.fail_load(new, 0));
    }

    #[test]
    fn partial_and_oversized_are_rejected_whole() {
        let mut store = ChunkStore::new(10);
        let id = store.begin_load(request(0));
        assert_eq!(
            store.complete_load(id, 0, items(0, 7), 10).err(),
            Some(LoadRejection::Partial {
                expected: 10,
                actual: 7
            })
        );
        assert!(!store.contains(0));
        assert!(!store.is_loading(0));

        let id = store.begin_load(request(0));
        assert_eq!(
            store.complete_load(id, 0, items(0, 11), 10).err(),
            Some(LoadRejection::Oversized {
                expected: 10,
                actual: 11
            })
        );
        assert!(!store.contains(0));
    }

    #[test]
    fn short_last_chunk_is_accepted() {
        let mut store = ChunkStore::new(10);
        let id = store.begin_load(request(90));
        let chunk = store.complete_load(id, 90, items(90, 5), 5).unwrap();
        assert_eq!(chunk.len(), 5);
    }

    #[test]
    fn failed_refresh_keeps_previous_chunk() {
        let mut store = ChunkStore::new(10);
        let first = store.begin_load(request(0));
        store.complete_load(first, 0, items(0, 10), 10).unwrap();
        let refresh = store.begin_load(request(0));
        assert!(store.fail_load(refresh, 0));
        assert_eq!(store.chunk(0).map(|c| c.request_id), Some(first));
    }

    #[test]
    fn stats_track_lifecycle() {
        let mut store = ChunkStore::new(10);
        for start in [0, 10, 20] {
            let id = store.begin_load(request(start));
            store.complete_load(id, start, items(start, 10), 10).unwrap();
        }
        store.begin_load(request(30));
        assert!(store.evict(10).is_some());
        assert!(store.evict(10).is_none());
        assert_eq!(
            store.stats(),
            StoreStats {
                chunks: 2,
                items: 20,
                loading: 1,
                loads_completed: 3,
                evictions: 1,
            }
        );
        assert_eq!(store.clear(), vec![0, 20]);
        assert_eq!(store.stats().loading, 0);
        assert_eq!(store.stats().evictions, 3);
    }
}

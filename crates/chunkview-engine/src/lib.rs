#![forbid(unsafe_code)]

//! chunkview engine
//!
//! The chunk cache behind a virtualized viewport: a [`ChunkStore`] holding
//! loaded chunks, a [`ChunkScheduler`] deciding what to load and evict, a
//! [`VisibleItemsResolver`] turning the store into rows, and the
//! [`VirtualCollection`] model running all of it inside the update loop.
//!
//! # Key Components
//!
//! - [`DataSource`] - Contract for whatever holds the data
//! - [`VecDataSource`] - In-memory source with sort, filter and selection
//! - [`VirtualCollection`] - The [`Model`](chunkview_runtime::Model) hosts embed
//! - [`CollectionMsg`] / [`CollectionEvent`] - Messages in, events out

pub mod collection;
pub mod item;
pub mod msg;
pub mod resolver;
pub mod scheduler;
pub mod source;
pub mod store;

pub use collection::VirtualCollection;
pub use item::{DataItem, ItemFlags, ItemId};
pub use msg::{BlockReason, CollectionEvent, CollectionMsg};
pub use resolver::{RowKey, RowStatus, VisibleItemsResolver, VisibleRow};
pub use scheduler::{ChunkScheduler, LoadTicket, SchedulerPass};
pub use source::{
    AffectedItem, DataRequest, DataSource, QueryState, SelectionOp, SelectionOutcome, SortDirection,
    SortKey, SourceError, VecDataSource,
};
pub use store::{Chunk, ChunkStore, LoadRejection, PendingLoad, RequestId, StoreStats};

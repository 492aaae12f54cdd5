#![forbid(unsafe_code)]

//! chunkview public facade crate.
//!
//! Re-exports the viewport math, the update loop and the chunk cache, and
//! offers a prelude for hosts that just want a scrolling list over a large
//! dataset.

use std::fmt;

// --- Core re-exports -------------------------------------------------------

pub use chunkview_core::{
    BoundingArea, ConfigError, CursorEngine, Event, KeyCode, KeyEvent, Modifiers, NavIntent,
    ViewportConfig, ViewportState,
};

// --- Runtime re-exports ----------------------------------------------------

pub use chunkview_runtime::{
    Cmd, MessageSender, Model, Program, ProgramConfig, ProgramSimulator, TaskMode, TaskSpec,
};

// --- Engine re-exports -----------------------------------------------------

pub use chunkview_engine::{
    Chunk, ChunkStore, CollectionEvent, CollectionMsg, DataItem, DataRequest, DataSource,
    ItemFlags, ItemId, QueryState, RowKey, RowStatus, SelectionOp, SelectionOutcome, SortKey,
    SourceError, VecDataSource, VirtualCollection, VisibleRow,
};

pub mod logging;

// --- Errors ---------------------------------------------------------------

/// Top-level error type for chunkview hosts.
#[derive(Debug)]
pub enum Error {
    /// Rejected viewport configuration.
    Config(ConfigError),
    /// Data source failure surfaced to the host.
    Source(SourceError),
    /// I/O failure starting the program or its worker.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid configuration: {err}"),
            Self::Source(err) => write!(f, "data source: {err}"),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Source(err) => Some(err),
            Self::Io(err) => Some(err),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<SourceError> for Error {
    fn from(err: SourceError) -> Self {
        Self::Source(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// Standard result type for chunkview APIs.
pub type Result<T> = std::result::Result<T, Error>;

/// Build a headless [`Program`] driving a [`VirtualCollection`] over `source`.
///
/// Configuration is validated first; the program is initialised, so the
/// total fetch is already queued when this returns.
pub fn program<S: DataSource>(
    source: S,
    config: ViewportConfig,
) -> Result<Program<VirtualCollection<S>>> {
    let collection = VirtualCollection::new(source, config)?;
    let mut program = Program::new(collection)?;
    program.init();
    Ok(program)
}

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        Cmd, CollectionEvent, CollectionMsg, DataItem, DataSource, Error, Event, ItemId, Model,
        NavIntent, Program, QueryState, Result, RowStatus, SelectionOp, VecDataSource,
        ViewportConfig, VirtualCollection,
    };

    pub use crate::{core, engine, runtime};
}

pub use chunkview_core as core;
pub use chunkview_engine as engine;
pub use chunkview_runtime as runtime;

#![forbid(unsafe_code)]

//! Core: viewport state, cursor transitions, bounding areas, and navigation input.
//!
//! Everything in this crate is plain data or a pure function. The chunk cache
//! lives in `chunkview-engine`; the update loop lives in `chunkview-runtime`.

pub mod bounding;
pub mod cursor;
pub mod event;
pub mod logging;
pub mod viewport;

pub use bounding::BoundingArea;
pub use cursor::CursorEngine;
pub use event::{Event, KeyCode, KeyEvent, Modifiers, NavIntent};
pub use viewport::{ConfigError, ViewportConfig, ViewportState};

// Re-export tracing macros at crate root for ergonomic use.
#[cfg(feature = "tracing")]
pub use logging::{debug, trace, warn};

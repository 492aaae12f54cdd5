#![forbid(unsafe_code)]

//! Viewport configuration and state.
//!
//! [`ViewportConfig`] holds the static tunables of a viewport (height,
//! thresholds, chunk size, and how far around the window data is kept warm).
//! [`ViewportState`] is the position of the window and cursor inside the
//! dataset. State is only ever produced by [`CursorEngine`](crate::CursorEngine).
//!
//! # Invariants
//!
//! For a state produced against a dataset of `total > 0` items:
//!
//! - `cursor_viewport_index < height`
//! - `viewport_start + cursor_viewport_index == cursor_index`
//! - `cursor_index < total`
//!
//! For `total == 0` the state is [`ViewportState::EMPTY`].

use std::fmt;

/// Environment variable overriding the chunk size.
pub const ENV_CHUNK_SIZE: &str = "CHUNKVIEW_CHUNK_SIZE";
/// Environment variable overriding the rows kept warm before the window.
pub const ENV_BOUNDING_BEFORE: &str = "CHUNKVIEW_BOUNDING_BEFORE";
/// Environment variable overriding the rows kept warm after the window.
pub const ENV_BOUNDING_AFTER: &str = "CHUNKVIEW_BOUNDING_AFTER";
/// Environment variable overriding the top threshold.
pub const ENV_TOP_THRESHOLD: &str = "CHUNKVIEW_TOP_THRESHOLD";
/// Environment variable overriding the bottom threshold.
pub const ENV_BOTTOM_THRESHOLD: &str = "CHUNKVIEW_BOTTOM_THRESHOLD";

const DEFAULT_HEIGHT: usize = 10;
const DEFAULT_CHUNK_SIZE: usize = 50;
const DEFAULT_THRESHOLD: usize = 2;

/// Errors produced while building or validating a [`ViewportConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The viewport must show at least one row.
    ZeroHeight,
    /// Chunks must hold at least one item.
    ZeroChunkSize,
    /// An environment override could not be parsed.
    InvalidEnv {
        /// The environment variable name.
        key: &'static str,
        /// The raw value found.
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroHeight => write!(f, "viewport height must be at least 1"),
            Self::ZeroChunkSize => write!(f, "chunk size must be at least 1"),
            Self::InvalidEnv { key, value } => {
                write!(f, "invalid value {value:?} for {key}: expected a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Static tunables of a viewport.
///
/// Immutable after construction except for an explicit resize through
/// [`set_height`](Self::set_height).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ViewportConfig {
    /// Number of visible rows.
    pub height: usize,
    /// Rows of margin kept between the cursor and the top edge while scrolling up.
    pub top_threshold: usize,
    /// Rows of margin kept between the cursor and the bottom edge while scrolling down.
    pub bottom_threshold: usize,
    /// Items per chunk.
    pub chunk_size: usize,
    /// Cursor index the viewport starts at.
    pub initial_index: usize,
    /// Rows kept warm before the window start.
    pub bounding_before: usize,
    /// Rows kept warm after the window end.
    pub bounding_after: usize,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HEIGHT, DEFAULT_CHUNK_SIZE)
    }
}

impl ViewportConfig {
    /// Create a config with the given height and chunk size.
    ///
    /// The bounding area defaults to one chunk before the window and two
    /// chunks after it.
    #[must_use]
    pub fn new(height: usize, chunk_size: usize) -> Self {
        Self {
            height,
            top_threshold: DEFAULT_THRESHOLD,
            bottom_threshold: DEFAULT_THRESHOLD,
            chunk_size,
            initial_index: 0,
            bounding_before: chunk_size,
            bounding_after: chunk_size.saturating_mul(2),
        }
    }

    /// Set both scroll thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, top: usize, bottom: usize) -> Self {
        self.top_threshold = top;
        self.bottom_threshold = bottom;
        self
    }

    /// Set the initial cursor index.
    #[must_use]
    pub fn with_initial_index(mut self, index: usize) -> Self {
        self.initial_index = index;
        self
    }

    /// Set the bounding area margins.
    #[must_use]
    pub fn with_bounding(mut self, before: usize, after: usize) -> Self {
        self.bounding_before = before;
        self.bounding_after = after;
        self
    }

    /// Set the chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Apply overrides from an environment lookup.
    ///
    /// Pass `|key| std::env::var(key).ok()` in production; tests inject a map.
    pub fn with_env_overrides<F>(mut self, get_env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env_usize(&get_env, ENV_CHUNK_SIZE)? {
            self.chunk_size = v;
        }
        if let Some(v) = env_usize(&get_env, ENV_BOUNDING_BEFORE)? {
            self.bounding_before = v;
        }
        if let Some(v) = env_usize(&get_env, ENV_BOUNDING_AFTER)? {
            self.bounding_after = v;
        }
        if let Some(v) = env_usize(&get_env, ENV_TOP_THRESHOLD)? {
            self.top_threshold = v;
        }
        if let Some(v) = env_usize(&get_env, ENV_BOTTOM_THRESHOLD)? {
            self.bottom_threshold = v;
        }
        Ok(self)
    }

    /// Check the config can drive a viewport.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.height == 0 {
            return Err(ConfigError::ZeroHeight);
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        Ok(())
    }

    /// Resize the viewport. A height of zero is stored as one row.
    pub fn set_height(&mut self, height: usize) {
        self.height = height.max(1);
    }

    /// Thresholds narrowed so that `top + bottom <= height - 1`.
    ///
    /// The top threshold keeps at most half of the spare rows; the bottom
    /// threshold gets whatever remains.
    #[must_use]
    pub fn effective_thresholds(&self) -> (usize, usize) {
        let spare = self.height.max(1) - 1;
        let top = self.top_threshold.min(spare / 2);
        let bottom = self.bottom_threshold.min(spare - top);
        (top, bottom)
    }

    /// Chunk start owning `index`.
    #[inline]
    #[must_use]
    pub fn chunk_start(&self, index: usize) -> usize {
        let size = self.chunk_size.max(1);
        (index / size) * size
    }
}

fn env_usize<F>(get_env: &F, key: &'static str) -> Result<Option<usize>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match get_env(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value: raw }),
    }
}

/// Position of the window and cursor inside the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ViewportState {
    /// Absolute index of the first visible row.
    pub viewport_start: usize,
    /// Absolute index of the cursor.
    pub cursor_index: usize,
    /// Cursor row relative to the window.
    pub cursor_viewport_index: usize,
    /// Cursor sits on or inside the top threshold margin.
    pub at_top_threshold: bool,
    /// Cursor sits on or inside the bottom threshold margin.
    pub at_bottom_threshold: bool,
    /// Cursor is on the first item.
    pub at_dataset_start: bool,
    /// Cursor is on the last item.
    pub at_dataset_end: bool,
}

impl ViewportState {
    /// State of a viewport over an empty dataset.
    pub const EMPTY: Self = Self {
        viewport_start: 0,
        cursor_index: 0,
        cursor_viewport_index: 0,
        at_top_threshold: true,
        at_bottom_threshold: true,
        at_dataset_start: true,
        at_dataset_end: true,
    };

    /// Absolute index range of the visible rows for a dataset of `total` items.
    #[must_use]
    pub fn visible_range(&self, height: usize, total: usize) -> std::ops::Range<usize> {
        let start = self.viewport_start.min(total);
        let end = self.viewport_start.saturating_add(height).min(total);
        start..end
    }

    /// Number of rows that render for a dataset of `total` items.
    #[must_use]
    pub fn visible_len(&self, height: usize, total: usize) -> usize {
        let range = self.visible_range(height, total);
        range.end - range.start
    }
}

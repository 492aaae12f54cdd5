#![forbid(unsafe_code)]

//! Bounding area: the index range kept warm around the viewport.
//!
//! The area spans `bounding_before` rows above the window and
//! `bounding_after` rows past its end, clipped to the dataset:
//!
//! ```text
//! [max(0, start - before), min(total - 1, start + height + after)]
//! ```
//!
//! Both ends are inclusive. The margins trade memory for latency: the further
//! ahead data is pre-warmed, the faster the user can scroll before reaching
//! rows that are still in flight.

use std::ops::{Range, RangeInclusive};

use crate::viewport::{ViewportConfig, ViewportState};

/// Inclusive index range that must stay loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingArea {
    /// First index in the area.
    pub start: usize,
    /// Last index in the area (inclusive).
    pub end: usize,
}

impl BoundingArea {
    /// Compute the bounding area for a viewport.
    ///
    /// Returns `None` for an empty dataset.
    #[must_use]
    pub fn compute(state: &ViewportState, config: &ViewportConfig, total: usize) -> Option<Self> {
        if total == 0 {
            return None;
        }
        let height = config.height.max(1);
        let start = state.viewport_start.saturating_sub(config.bounding_before);
        let end = state
            .viewport_start
            .saturating_add(height)
            .saturating_add(config.bounding_after)
            .min(total - 1);
        Some(Self {
            start: start.min(end),
            end,
        })
    }

    /// Whether `index` lies inside the area.
    #[inline]
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index <= self.end
    }

    /// Whether the half-open range `range` shares at least one index with the area.
    #[inline]
    #[must_use]
    pub fn intersects(&self, range: &Range<usize>) -> bool {
        range.start < range.end && range.start <= self.end && range.end > self.start
    }

    /// The area as an inclusive range.
    #[must_use]
    pub fn as_range(&self) -> RangeInclusive<usize> {
        self.start..=self.end
    }

    /// Number of indices in the area.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Always false: a bounding area holds at least one index.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Chunk starts whose chunks intersect the area, in ascending order.
    pub fn chunk_starts(&self, chunk_size: usize) -> impl Iterator<Item = usize> {
        let size = chunk_size.max(1);
        let first = (self.start / size) * size;
        let last = self.end;
        (first..=last).step_by(size)
    }
}

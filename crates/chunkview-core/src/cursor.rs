#![forbid(unsafe_code)]

//! Cursor and window transitions.
//!
//! [`CursorEngine`] turns a navigation intent into a new [`ViewportState`].
//! Every transition is a pure function of `(state, config, total)`.
//!
//! # Scrolling rule
//!
//! Relative moves (up, down, page up, page down) and the dataset-edge jumps
//! place the cursor first and then shift the window by the smallest amount
//! that keeps the cursor outside the threshold margins. Where the dataset
//! edge makes that impossible the window is clamped to `[0, total - height]`
//! instead. [`CursorEngine::jump_to_index`] is the exception: it recenters the
//! window on the target in one step.
//!
//! Because the minimal shift depends on where the window already is, two
//! different move histories can leave the cursor on the same index with
//! different windows. States anchored at a dataset edge and states produced
//! by `jump_to_index` are history independent.

use crate::event::NavIntent;
use crate::viewport::{ViewportConfig, ViewportState};

/// Pure viewport transitions for each navigation intent.
#[derive(Debug, Clone, Copy, Default)]
pub struct CursorEngine;

impl CursorEngine {
    /// The state a fresh viewport starts in: recentered on `config.initial_index`.
    #[must_use]
    pub fn initial(config: &ViewportConfig, total: usize) -> ViewportState {
        Self::jump_to_index(&ViewportState::EMPTY, config, total, config.initial_index)
    }

    /// Apply a navigation intent.
    #[must_use]
    pub fn apply(
        intent: NavIntent,
        state: &ViewportState,
        config: &ViewportConfig,
        total: usize,
    ) -> ViewportState {
        match intent {
            NavIntent::Up => Self::move_up(state, config, total),
            NavIntent::Down => Self::move_down(state, config, total),
            NavIntent::PageUp => Self::page_up(state, config, total),
            NavIntent::PageDown => Self::page_down(state, config, total),
            NavIntent::Home => Self::jump_to_start(state, config, total),
            NavIntent::End => Self::jump_to_end(state, config, total),
            NavIntent::JumpTo(index) => Self::jump_to_index(state, config, total, index),
        }
    }

    /// Move the cursor one row up.
    #[must_use]
    pub fn move_up(state: &ViewportState, config: &ViewportConfig, total: usize) -> ViewportState {
        Self::place(state, config, total, state.cursor_index.saturating_sub(1))
    }

    /// Move the cursor one row down.
    #[must_use]
    pub fn move_down(
        state: &ViewportState,
        config: &ViewportConfig,
        total: usize,
    ) -> ViewportState {
        Self::place(state, config, total, state.cursor_index.saturating_add(1))
    }

    /// Move the cursor one viewport height up.
    #[must_use]
    pub fn page_up(state: &ViewportState, config: &ViewportConfig, total: usize) -> ViewportState {
        let step = config.height.max(1);
        Self::place(state, config, total, state.cursor_index.saturating_sub(step))
    }

    /// Move the cursor one viewport height down.
    #[must_use]
    pub fn page_down(
        state: &ViewportState,
        config: &ViewportConfig,
        total: usize,
    ) -> ViewportState {
        let step = config.height.max(1);
        Self::place(state, config, total, state.cursor_index.saturating_add(step))
    }

    /// Move the cursor to the first item.
    #[must_use]
    pub fn jump_to_start(
        state: &ViewportState,
        config: &ViewportConfig,
        total: usize,
    ) -> ViewportState {
        Self::place(state, config, total, 0)
    }

    /// Move the cursor to the last item.
    #[must_use]
    pub fn jump_to_end(
        state: &ViewportState,
        config: &ViewportConfig,
        total: usize,
    ) -> ViewportState {
        Self::place(state, config, total, total.saturating_sub(1))
    }

    /// Move the cursor to `target` and recenter the window around it.
    ///
    /// `viewport_start = clamp(target - height / 2, 0, total - height)`.
    /// Out-of-range targets are clamped to the last item.
    #[must_use]
    pub fn jump_to_index(
        _state: &ViewportState,
        config: &ViewportConfig,
        total: usize,
        target: usize,
    ) -> ViewportState {
        if total == 0 {
            return ViewportState::EMPTY;
        }
        let height = config.height.max(1);
        let cursor = target.min(total - 1);
        let max_start = total.saturating_sub(height);
        let start = cursor.saturating_sub(height / 2).min(max_start);
        crate::trace!(requested = target, cursor, start, "jump recentered viewport");
        Self::finish(start, cursor, config, total)
    }

    /// Move the cursor to `target` with the minimal window shift.
    ///
    /// This is the primitive behind every relative move. It is also used to
    /// re-establish the invariants after the height or the total changes.
    #[must_use]
    pub fn place(
        state: &ViewportState,
        config: &ViewportConfig,
        total: usize,
        target: usize,
    ) -> ViewportState {
        if total == 0 {
            return ViewportState::EMPTY;
        }
        let height = config.height.max(1);
        let cursor = target.min(total - 1);
        let max_start = total.saturating_sub(height);
        let mut start = state.viewport_start.min(max_start);

        if height < total {
            let (top, bottom) = config.effective_thresholds();
            let lowest_row = height - 1 - bottom;
            if cursor > start + lowest_row {
                start = cursor - lowest_row;
            }
            if cursor < start + top {
                start = cursor.saturating_sub(top);
            }
            start = start.min(max_start);
        }

        if start != state.viewport_start {
            crate::trace!(
                from = state.viewport_start,
                to = start,
                cursor,
                "viewport shifted"
            );
        }
        Self::finish(start, cursor, config, total)
    }

    fn finish(
        start: usize,
        cursor: usize,
        config: &ViewportConfig,
        total: usize,
    ) -> ViewportState {
        let height = config.height.max(1);
        let (top, bottom) = config.effective_thresholds();
        let row = cursor - start;
        let rows = height.min(total - start);
        ViewportState {
            viewport_start: start,
            cursor_index: cursor,
            cursor_viewport_index: row,
            at_top_threshold: row <= top,
            at_bottom_threshold: row >= rows.saturating_sub(1).saturating_sub(bottom),
            at_dataset_start: cursor == 0,
            at_dataset_end: cursor == total - 1,
        }
    }
}

#![forbid(unsafe_code)]

//! Input events and navigation intents.
//!
//! Hosts feed [`Event`]s (or crossterm events, with the `crossterm` feature)
//! and the collection turns key presses into [`NavIntent`]s. Release events
//! never navigate.

use bitflags::bitflags;
#[cfg(all(feature = "crossterm", not(target_arch = "wasm32")))]
use crossterm::event as cte;

/// Canonical input event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A keyboard event.
    Key(KeyEvent),

    /// Terminal was resized.
    Resize {
        /// New terminal width in columns.
        width: u16,
        /// New terminal height in rows.
        height: u16,
    },

    /// A tick from the runtime.
    Tick,
}

impl Event {
    /// Convert a crossterm event into a chunkview [`Event`].
    ///
    /// Events chunkview has no use for (mouse, paste, focus) map to `None`.
    #[must_use]
    #[cfg(all(feature = "crossterm", not(target_arch = "wasm32")))]
    pub fn from_crossterm(event: cte::Event) -> Option<Self> {
        match event {
            cte::Event::Key(key) => map_key_event(key).map(Event::Key),
            cte::Event::Resize(width, height) => Some(Event::Resize { width, height }),
            _ => None,
        }
    }
}

/// A keyboard event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// The key code that was pressed.
    pub code: KeyCode,
    /// Modifier keys held during the event.
    pub modifiers: Modifiers,
    /// Whether the key was released rather than pressed or repeated.
    pub release: bool,
}

impl KeyEvent {
    /// Create a press event with no modifiers.
    #[must_use]
    pub const fn new(code: KeyCode) -> Self {
        Self {
            code,
            modifiers: Modifiers::NONE,
            release: false,
        }
    }

    /// Create a key event with modifiers.
    #[must_use]
    pub const fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    /// Mark the event as a key release.
    #[must_use]
    pub const fn released(mut self) -> Self {
        self.release = true;
        self
    }

    /// Check if Ctrl modifier is held.
    #[must_use]
    pub const fn ctrl(&self) -> bool {
        self.modifiers.contains(Modifiers::CTRL)
    }
}

/// Key codes relevant to list navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    /// A regular character key.
    Char(char),
    /// Enter/Return key.
    Enter,
    /// Escape key.
    Escape,
    /// Home key.
    Home,
    /// End key.
    End,
    /// Page Up key.
    PageUp,
    /// Page Down key.
    PageDown,
    /// Up arrow key.
    Up,
    /// Down arrow key.
    Down,
}

bitflags! {
    /// Modifier keys that can be held during a key event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Modifiers: u8 {
        /// No modifiers.
        const NONE  = 0b0000;
        /// Shift key.
        const SHIFT = 0b0001;
        /// Alt/Option key.
        const ALT   = 0b0010;
        /// Control key.
        const CTRL  = 0b0100;
    }
}

impl Default for Modifiers {
    fn default() -> Self {
        Self::NONE
    }
}

/// A navigation intent understood by [`CursorEngine`](crate::CursorEngine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavIntent {
    /// One row up.
    Up,
    /// One row down.
    Down,
    /// One viewport height up.
    PageUp,
    /// One viewport height down.
    PageDown,
    /// First item.
    Home,
    /// Last item.
    End,
    /// A specific absolute index, recentered.
    JumpTo(usize),
}

impl NavIntent {
    /// Map a key press to a navigation intent.
    ///
    /// Arrows and `j`/`k` step, PageUp/PageDown and `Ctrl+U`/`Ctrl+D` page,
    /// Home/End and `g`/`G` jump to the dataset edges.
    #[must_use]
    pub fn from_key(key: &KeyEvent) -> Option<Self> {
        if key.release {
            return None;
        }
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => Some(Self::Up),
            KeyCode::Down | KeyCode::Char('j') => Some(Self::Down),
            KeyCode::PageUp => Some(Self::PageUp),
            KeyCode::PageDown => Some(Self::PageDown),
            KeyCode::Char('u') if key.ctrl() => Some(Self::PageUp),
            KeyCode::Char('d') if key.ctrl() => Some(Self::PageDown),
            KeyCode::Home | KeyCode::Char('g') => Some(Self::Home),
            KeyCode::End | KeyCode::Char('G') => Some(Self::End),
            _ => None,
        }
    }

    /// Whether the intent moves relative to the current cursor.
    ///
    /// Relative moves are subject to the scroll gate; absolute jumps are not.
    #[must_use]
    pub const fn is_relative(self) -> bool {
        matches!(self, Self::Up | Self::Down | Self::PageUp | Self::PageDown)
    }
}

#[cfg(all(feature = "crossterm", not(target_arch = "wasm32")))]
fn map_key_event(event: cte::KeyEvent) -> Option<KeyEvent> {
    let code = map_key_code(event.code)?;
    Some(KeyEvent {
        code,
        modifiers: map_modifiers(event.modifiers),
        release: event.kind == cte::KeyEventKind::Release,
    })
}

#[cfg(all(feature = "crossterm", not(target_arch = "wasm32")))]
fn map_key_code(code: cte::KeyCode) -> Option<KeyCode> {
    match code {
        cte::KeyCode::Enter => Some(KeyCode::Enter),
        cte::KeyCode::Esc => Some(KeyCode::Escape),
        cte::KeyCode::Up => Some(KeyCode::Up),
        cte::KeyCode::Down => Some(KeyCode::Down),
        cte::KeyCode::Home => Some(KeyCode::Home),
        cte::KeyCode::End => Some(KeyCode::End),
        cte::KeyCode::PageUp => Some(KeyCode::PageUp),
        cte::KeyCode::PageDown => Some(KeyCode::PageDown),
        cte::KeyCode::Char(c) => Some(KeyCode::Char(c)),
        _ => None,
    }
}

#[cfg(all(feature = "crossterm", not(target_arch = "wasm32")))]
fn map_modifiers(modifiers: cte::KeyModifiers) -> Modifiers {
    let mut mapped = Modifiers::NONE;
    if modifiers.contains(cte::KeyModifiers::SHIFT) {
        mapped |= Modifiers::SHIFT;
    }
    if modifiers.contains(cte::KeyModifiers::ALT) {
        mapped |= Modifiers::ALT;
    }
    if modifiers.contains(cte::KeyModifiers::CONTROL) {
        mapped |= Modifiers::CTRL;
    }
    mapped
}

#![forbid(unsafe_code)]

//! Items as delivered by a data source.

use bitflags::bitflags;
use std::fmt;

/// Stable identity of an item.
///
/// Identity survives sorting and filtering; position does not.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ItemId(String);

impl ItemId {
    /// Create an id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

bitflags! {
    /// Per-item state reported by the source.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ItemFlags: u8 {
        const SELECTED = 0b0000_0001;
        const DISABLED = 0b0000_0010;
        const HIDDEN   = 0b0000_0100;
        const ERROR    = 0b0000_1000;
        const LOADING  = 0b0001_0000;
    }
}

/// One row of data. The engine never looks inside `payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItem<T> {
    pub id: ItemId,
    pub payload: T,
    pub flags: ItemFlags,
}

impl<T> DataItem<T> {
    pub fn new(id: impl Into<ItemId>, payload: T) -> Self {
        Self {
            id: id.into(),
            payload,
            flags: ItemFlags::empty(),
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: ItemFlags) -> Self {
        self.flags = flags;
        self
    }

    #[inline]
    pub fn is_selected(&self) -> bool {
        self.flags.contains(ItemFlags::SELECTED)
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.flags.contains(ItemFlags::DISABLED)
    }

    #[inline]
    pub fn is_hidden(&self) -> bool {
        self.flags.contains(ItemFlags::HIDDEN)
    }
}

//! Identifier types.
//!
//! The vector model and the neighbor cache number their words
//! independently. The two spaces only meet through a word-string lookup, so
//! they get distinct types that cannot be mixed up.

use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

/// Position of a word in a finalized [`StringIndex`](crate::StringIndex).
///
/// Ids are dense and 1-based. The on-disk value `0` means "no word" and is
/// represented as `Option::<WordId>::None` in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WordId(NonZeroU32);

impl WordId {
    /// Build an id from its raw on-disk value; `0` yields `None`.
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub(crate) fn from_index(index: usize) -> Option<Self> {
        u32::try_from(index).ok().and_then(Self::new)
    }

    /// The raw 1-based value.
    pub fn get(self) -> u32 {
        self.0.get()
    }

    pub(crate) fn index(self) -> usize {
        self.0.get() as usize
    }
}

impl fmt::Display for WordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 0-based row of the [`VectorModel`](crate::VectorModel) matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModelRowId(u32);

impl ModelRowId {
    pub(crate) fn new(row: usize) -> Option<Self> {
        u32::try_from(row).ok().map(Self)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A word id assigned by the [`NeighborCache`](crate::NeighborCache)'s own index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheWordId(WordId);

impl CacheWordId {
    pub fn new(id: WordId) -> Self {
        Self(id)
    }

    /// Raw on-disk encoding of an optional id.
    pub fn encode(id: Option<Self>) -> u32 {
        id.map_or(0, |id| id.0.get())
    }

    pub fn decode(raw: u32) -> Option<Self> {
        WordId::new(raw).map(Self)
    }

    pub fn word_id(self) -> WordId {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0.index()
    }
}

impl fmt::Display for CacheWordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

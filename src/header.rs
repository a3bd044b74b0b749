//! Header and entry types: the nodes of the undo DAG.
//!
//! Arena indices follow the pattern used by this codebase's own B-tree node handles
//! (`LeafIdx`/`NodeIdx`): a newtype around `usize` with a sentinel "doesn't exist" value and
//! `Index`/`IndexMut` impls on the arena, so call sites read `arena[idx]` instead of threading
//! `Option` checks through every dereference.

use std::ops::{Index, IndexMut};

use smallvec::SmallVec;

use crate::collaborators::{empty_named_marks, NamedMarks};
use crate::entry::Entry;

/// Index into [`crate::state::UndoState`]'s header arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeaderIdx(pub(crate) usize);

impl HeaderIdx {
    pub(crate) fn exists(&self) -> bool {
        self.0 != usize::MAX
    }
}

impl Default for HeaderIdx {
    fn default() -> Self {
        Self(usize::MAX)
    }
}

/// An `Option<HeaderIdx>` that round-trips through the wire format's `0 == null` convention.
pub type HeaderLink = Option<HeaderIdx>;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CursorPos {
    pub lnum: u32,
    pub col: u32,
    pub coladd: u32,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VisualSelection {
    pub start: CursorPos,
    pub end: CursorPos,
    pub mode: u32,
    pub curswant: u32,
}

/// Flag bits stored in [`Header::flags`].
pub mod flags {
    pub const CHANGED: u16 = 0x01;
    pub const EMPTYBUF: u16 = 0x02;
    pub const RELOAD: u16 = 0x04;
}

/// One atomic change step: a node in the undo DAG.
#[derive(Clone, Debug)]
pub struct Header {
    /// Newer sibling on the same branch (toward the leaf).
    pub prev: HeaderLink,
    /// Older sibling on the same branch (toward the root).
    pub next: HeaderLink,
    /// Head of an alternate branch that diverged at this point.
    pub alt_next: HeaderLink,
    /// The header this one is an alternate of.
    pub alt_prev: HeaderLink,

    pub seq: u32,
    pub time: i64,
    /// 0 means "not a save point".
    pub save_nr: u32,

    pub cursor: CursorPos,
    pub cursor_vcol: u32,

    pub flags: u16,

    pub named_marks: NamedMarks,
    pub visual: VisualSelection,

    /// Newest-first. Kept inline rather than in a second arena, since entries are never shared
    /// or addressed from outside their header. Most changes touch one contiguous range, so a
    /// `SmallVec` keeps the single-entry case allocation-free.
    pub entries: SmallVec<[Entry; 4]>,

    pub extmark_deltas: Vec<Vec<u8>>,

    /// Index into `entries` of the entry whose `bot` is still deferred, if any.
    pub getbot_entry: Option<usize>,

    /// Transient: stamped by the navigator/serializer during a walk. Carries no meaning between
    /// calls; never needs to be reset, only compared against the current walk's token.
    pub walk: u64,
}

impl Header {
    pub(crate) fn new(seq: u32, time: i64) -> Self {
        Header {
            prev: None,
            next: None,
            alt_next: None,
            alt_prev: None,
            seq,
            time,
            save_nr: 0,
            cursor: CursorPos::default(),
            cursor_vcol: 0,
            flags: 0,
            named_marks: empty_named_marks(),
            visual: VisualSelection::default(),
            entries: SmallVec::new(),
            extmark_deltas: Vec::new(),
            getbot_entry: None,
            walk: 0,
        }
    }
}

/// Slab of [`Header`]s, keyed by [`HeaderIdx`], with a free list so long editing sessions don't
/// grow the arena unboundedly as old branches are trimmed away.
#[derive(Clone, Debug, Default)]
pub struct HeaderArena {
    slots: Vec<Option<Header>>,
    free: Vec<usize>,
}

impl HeaderArena {
    pub fn alloc(&mut self, header: Header) -> HeaderIdx {
        if let Some(slot) = self.free.pop() {
            self.slots[slot] = Some(header);
            HeaderIdx(slot)
        } else {
            self.slots.push(Some(header));
            HeaderIdx(self.slots.len() - 1)
        }
    }

    pub fn free(&mut self, idx: HeaderIdx) -> Header {
        let header = self.slots[idx.0].take().expect("double free of HeaderIdx");
        self.free.push(idx.0);
        header
    }

    pub fn get(&self, idx: HeaderIdx) -> Option<&Header> {
        self.slots.get(idx.0).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, idx: HeaderIdx) -> Option<&mut Header> {
        self.slots.get_mut(idx.0).and_then(|s| s.as_mut())
    }

    pub fn contains(&self, idx: HeaderIdx) -> bool {
        matches!(self.slots.get(idx.0), Some(Some(_)))
    }
}

impl Index<HeaderIdx> for HeaderArena {
    type Output = Header;

    fn index(&self, idx: HeaderIdx) -> &Header {
        self.get(idx).expect("dangling HeaderIdx")
    }
}

impl IndexMut<HeaderIdx> for HeaderArena {
    fn index_mut(&mut self, idx: HeaderIdx) -> &mut Header {
        self.get_mut(idx).expect("dangling HeaderIdx")
    }
}

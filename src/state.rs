//! [`UndoState`]: the per-buffer owner of the undo DAG.

use crate::collaborators::NamedMarks;
use crate::header::{Header, HeaderArena, HeaderIdx, HeaderLink, VisualSelection};

/// One buffer's worth of undo history: the DAG root/leaf/cursor pointers, sequence/time/save
/// counters, and the arena that owns every reachable [`Header`].
///
/// `UndoState` exclusively owns all reachable headers and their entries; there is no sharing.
/// Dropping it (or calling [`UndoState::clear`]) walks the arena and frees every slot.
#[derive(Clone, Debug)]
pub struct UndoState {
    pub(crate) arena: HeaderArena,

    /// Root of the DAG: oldest header on the primary branch.
    pub(crate) oldhead: HeaderLink,
    /// Leaf of the primary branch: the most recent change.
    pub(crate) newhead: HeaderLink,
    /// The header *above* the current buffer state - the next step a plain undo would apply.
    /// `None` means "at the leaf".
    pub(crate) curhead: HeaderLink,

    pub(crate) num_heads: u32,

    pub(crate) seq_last: u32,
    pub(crate) seq_cur: u32,

    pub(crate) time_cur: i64,

    pub(crate) save_nr_last: u32,
    pub(crate) save_nr_cur: u32,

    /// When true, the next `record_change` opens a new header. When false, it appends an
    /// `Entry` to the existing `newhead`.
    pub(crate) synced: bool,

    /// The line-level "restore-this-line" slot, orthogonal to the DAG.
    pub(crate) u_line: ULineSlot,

    /// Monotonic counter handed out one value per tree walk (navigator, serializer, leaf
    /// enumeration). Lives on the state rather than as process-global mutable state - see
    /// why this crate keeps it per-state rather than using the source's process-wide globals.
    pub(crate) walk_token_counter: u64,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct ULineSlot {
    pub(crate) line: Option<Vec<u8>>,
    pub(crate) lnum: u32,
    pub(crate) colnr: u32,
}

impl Default for UndoState {
    fn default() -> Self {
        UndoState {
            arena: HeaderArena::default(),
            oldhead: None,
            newhead: None,
            curhead: None,
            num_heads: 0,
            seq_last: 0,
            seq_cur: 0,
            time_cur: 0,
            save_nr_last: 0,
            save_nr_cur: 0,
            synced: true,
            u_line: ULineSlot::default(),
            walk_token_counter: 0,
        }
    }
}

impl UndoState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out a fresh walk token. See `navigate.rs` / `format/mod.rs` for users.
    pub(crate) fn next_walk_token(&mut self) -> u64 {
        self.walk_token_counter += 1;
        self.walk_token_counter
    }

    pub fn num_heads(&self) -> u32 {
        self.num_heads
    }

    pub fn seq_cur(&self) -> u32 {
        self.seq_cur
    }

    pub fn seq_last(&self) -> u32 {
        self.seq_last
    }

    pub fn time_cur(&self) -> i64 {
        self.time_cur
    }

    pub fn save_nr_cur(&self) -> u32 {
        self.save_nr_cur
    }

    pub fn save_nr_last(&self) -> u32 {
        self.save_nr_last
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn curhead(&self) -> HeaderLink {
        self.curhead
    }

    pub fn oldhead(&self) -> HeaderLink {
        self.oldhead
    }

    pub fn newhead(&self) -> HeaderLink {
        self.newhead
    }

    pub fn header(&self, idx: HeaderIdx) -> Option<&Header> {
        self.arena.get(idx)
    }

    /// Increment and return the next file-write ordinal. Called by the host immediately before
    /// a successful save completes.
    pub fn bump_save_nr(&mut self) -> u32 {
        self.save_nr_last += 1;
        self.save_nr_cur = self.save_nr_last;
        if let Some(cur) = self.reference_header() {
            self.arena[cur].save_nr = self.save_nr_last;
        }
        self.save_nr_last
    }

    /// The header whose state the buffer currently matches - `newhead` if `curhead` is empty
    /// (we're at the leaf), else the header immediately newer than `curhead`.
    fn reference_header(&self) -> HeaderLink {
        match self.curhead {
            None => self.newhead,
            Some(cur) => self.arena.get(cur).and_then(|h| h.prev),
        }
    }

    /// Frees every reachable header, returning the arena to empty. Used before installing a
    /// freshly deserialized DAG, and by `Drop`.
    pub(crate) fn clear(&mut self) {
        if let Some(root) = self.oldhead {
            self.free_subdag(root);
        }
        self.arena = HeaderArena::default();
        self.oldhead = None;
        self.newhead = None;
        self.curhead = None;
        self.num_heads = 0;
        self.synced = true;
    }

    /// Post-order free of every header reachable from `root` via `prev`/`alt_next`.
    pub(crate) fn free_subdag(&mut self, root: HeaderIdx) {
        let mut stack = vec![root];
        let mut order = Vec::new();
        while let Some(idx) = stack.pop() {
            if !self.arena.contains(idx) {
                continue;
            }
            order.push(idx);
            let h = &self.arena[idx];
            if let Some(p) = h.prev {
                stack.push(p);
            }
            if let Some(a) = h.alt_next {
                stack.push(a);
            }
        }
        for idx in order {
            if self.arena.contains(idx) {
                self.arena.free(idx);
            }
        }
    }

    pub(crate) fn named_marks_of(&self, idx: HeaderIdx) -> NamedMarks {
        self.arena[idx].named_marks
    }

    pub(crate) fn visual_of(&self, idx: HeaderIdx) -> VisualSelection {
        self.arena[idx].visual
    }

    /// Debug-only consistency check over the DAG's structural invariants. A no-op in
    /// release builds.
    #[cfg(debug_assertions)]
    pub fn debug_check_invariants(&self) {
        use std::collections::HashSet;

        let mut seen_seq = HashSet::new();
        let mut reachable = HashSet::new();

        if let Some(root) = self.oldhead {
            let mut stack = vec![root];
            while let Some(idx) = stack.pop() {
                if !reachable.insert(idx) {
                    continue;
                }
                let h = &self.arena[idx];
                assert!(
                    seen_seq.insert(h.seq),
                    "duplicate seq {} in undo DAG",
                    h.seq
                );
                assert!(h.seq >= 1 && h.seq <= self.seq_last, "seq {} out of range", h.seq);

                if let Some(p) = h.prev {
                    assert_eq!(self.arena[p].next, Some(idx), "prev/next asymmetry at {:?}", idx);
                    stack.push(p);
                }
                if let Some(n) = h.next {
                    assert_eq!(self.arena[n].prev, Some(idx), "next/prev asymmetry at {:?}", idx);
                }
                if let Some(a) = h.alt_next {
                    assert_eq!(self.arena[a].alt_prev, Some(idx), "alt_next/alt_prev asymmetry at {:?}", idx);
                    stack.push(a);
                }
                if let Some(a) = h.alt_prev {
                    assert_eq!(self.arena[a].alt_next, Some(idx), "alt_prev/alt_next asymmetry at {:?}", idx);
                }
            }
        }

        assert_eq!(
            reachable.len() as u32,
            self.num_heads,
            "num_heads {} does not match reachable count {}",
            self.num_heads,
            reachable.len()
        );

        if let Some(new) = self.newhead {
            assert_eq!(self.arena[new].prev, None, "newhead must have prev == None");
        }
        if let Some(old) = self.oldhead {
            assert_eq!(self.arena[old].next, None, "oldhead must have next == None");
            assert_eq!(self.arena[old].alt_prev, None, "oldhead must not be an alternate");
        }
        if let Some(cur) = self.curhead {
            assert!(reachable.contains(&cur), "curhead must be reachable");
        }
    }

    #[cfg(not(debug_assertions))]
    pub fn debug_check_invariants(&self) {}
}

impl Drop for UndoState {
    fn drop(&mut self) {
        self.clear();
    }
}

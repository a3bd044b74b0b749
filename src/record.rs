//! The save path: `record_change` captures a pre-image before a mutation, and decides whether to
//! open a new header or extend the current one.

use crate::collaborators::{HostPolicy, LineStore, NamedMarks};
use crate::entry::Entry;
use crate::error::{UndoError, UndoResult};
use crate::header::{flags, CursorPos, Header, VisualSelection};
use crate::state::UndoState;

/// Snapshot of per-node state taken when a header is opened. The host supplies this (it owns
/// the cursor/marks/visual-selection storage the engine only snapshots, never interprets).
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    pub cursor: CursorPos,
    pub cursor_vcol: u32,
    pub named_marks: NamedMarks,
    pub visual: VisualSelection,
    /// The buffer's current `CHANGED`/`EMPTYBUF` bits (see [`crate::header::flags`]) at the
    /// moment this header opens.
    pub buffer_flags: u16,
}

/// How many of the most recently added entries in the current header are inspected for the
/// single-line coalescing optimization. The bound is arbitrary; named here so a future
/// audit has one place to change it.
const COALESCE_SEARCH_DEPTH: usize = 10;

impl UndoState {
    /// Marks the boundary between one logical change and the next. Must finalize `newhead`'s
    /// deferred `bot` (§4.4) here, too: within a header, `resolve_deferred_bot` only ever runs on
    /// the *next* `record_change`, before `push_new_entry` - but when `synced`, `record_change`
    /// opens a fresh header first, so that call resolves the wrong (new, empty) header. Left
    /// unresolved, the just-closed header's final entry keeps `bot == 0`, which replay reads as
    /// "to end of buffer" instead of its true range. Resolving also sets `synced = true`, but
    /// entry construction flips it back to false again before `record_change` returns - left
    /// alone, every subsequent call would keep extending the same header. The host calls this at
    /// its own sync points (leaving insert mode, a command boundary) so the *next*
    /// `record_change` opens a new one instead.
    pub fn sync<L: LineStore>(&mut self, buffer: &L) -> UndoResult<()> {
        self.resolve_deferred_bot(buffer.line_count())?;
        self.synced = true;
        Ok(())
    }

    /// Captures the pre-image of `[top+1, bot-1]` before the caller mutates it.
    ///
    /// `top` is the line above the first replaced line, `bot` the line below the last replaced
    /// line, `newbot` the already-known post-mutation value of `bot` (0 if not yet known), and
    /// `reload` marks a full-buffer reload.
    ///
    /// Preconditions (checked): `top < bot`, `bot <= buffer.line_count() + 1`, and the host's
    /// policy allows modification.
    pub fn record_change<L: LineStore, P: HostPolicy>(
        &mut self,
        buffer: &L,
        policy: &P,
        top: u32,
        bot: u32,
        newbot: u32,
        reload: bool,
        snapshot_at_open: impl FnOnce() -> Snapshot,
        now: i64,
    ) -> UndoResult<()> {
        if !policy.is_modifiable() {
            return Err(UndoError::PolicyDenied("buffer is not modifiable"));
        }
        if policy.is_restricted() {
            return Err(UndoError::PolicyDenied("restricted mode"));
        }
        let line_count = buffer.line_count();
        if top >= bot {
            return Err(UndoError::RangeInvalid("top must be < bot"));
        }
        if bot > line_count + 1 {
            return Err(UndoError::RangeInvalid("bot past end of buffer"));
        }
        let size = bot - top - 1;

        if self.synced {
            self.open_new_header(policy, snapshot_at_open, now)?;
        }

        // `open_new_header` may have flipped `synced` back to false via the disabled-undo path
        // (limit < 0): the mutation proceeds, but unrecorded.
        if self.newhead.is_none() {
            self.debug_check_invariants();
            return Ok(());
        }

        if !self.synced && size == 1 {
            if self.try_coalesce(top, bot, line_count).is_some() {
                // Coalescing reuses the entry's *original* pre-image (captured on the first of
                // the run of single-line overwrites) - it must not be recaptured from the
                // (already-mutated) live buffer here, or the whole point of the optimization
                // (one entry whose pre-image predates the entire run) is lost. Only bookkeeping
                // flags need updating.
                if reload {
                    let head = self.newhead.expect("coalesce requires an open header");
                    self.arena[head].flags |= flags::RELOAD;
                }
                let _ = policy.interrupted();
                self.debug_check_invariants();
                return Ok(());
            }
        }

        self.resolve_deferred_bot(line_count)?;
        self.push_new_entry(top, bot, newbot, line_count);
        let result = self.finish_entry_copy(buffer, policy, top, size, reload);
        self.debug_check_invariants();
        result
    }

    fn open_new_header<P: HostPolicy>(
        &mut self,
        policy: &P,
        snapshot_at_open: impl FnOnce() -> Snapshot,
        now: i64,
    ) -> UndoResult<()> {
        let limit = policy.history_depth();
        if limit < 0 {
            // A negative history depth disables undo altogether: the whole tree is discarded,
            // not just whatever this change would have displaced, freeing the memory it held.
            self.clear();
            self.synced = false;
            return Ok(());
        }

        let old_curhead = self.curhead;

        if let Some(cur) = old_curhead {
            // The path from curhead down to oldhead becomes an alternate branch of the new
            // header.
            self.newhead = self.arena[cur].next;
            self.curhead = None;
        }

        let protected = self.trim(limit as u32, old_curhead);

        let mut header = Header::new(self.seq_last + 1, now);
        let snap = snapshot_at_open();
        header.cursor = snap.cursor;
        header.cursor_vcol = snap.cursor_vcol;
        header.named_marks = snap.named_marks;
        header.visual = snap.visual;
        header.flags = snap.buffer_flags & (flags::CHANGED | flags::EMPTYBUF);

        header.next = self.newhead;
        header.alt_next = protected;
        header.alt_prev = protected.and_then(|p| self.arena.get(p).and_then(|h| h.alt_prev));

        let new_idx = self.arena.alloc(header);

        if let Some(p) = protected {
            if self.arena.contains(p) {
                self.arena[p].alt_prev = Some(new_idx);
            }
        }
        if let Some(ap) = self.arena[new_idx].alt_prev {
            if self.arena.contains(ap) {
                self.arena[ap].alt_next = Some(new_idx);
            }
        }
        if let Some(old_new) = self.newhead {
            self.arena[old_new].prev = Some(new_idx);
        }
        if self.oldhead == old_curhead {
            self.oldhead = Some(new_idx);
        }

        self.seq_last += 1;
        self.seq_cur = self.seq_last;
        let header_time = self.arena[new_idx].time;
        // Deliberate off-by-one: keeps `:earlier 1s`-style navigation compatible with time
        // semantics recorded upstream.
        self.time_cur = header_time + 1;

        self.newhead = Some(new_idx);
        if self.oldhead.is_none() {
            self.oldhead = Some(new_idx);
        }
        self.num_heads += 1;

        Ok(())
    }

    /// Tests whether the pending single-line change at `top` can reuse an existing entry near
    /// the front of `newhead`'s entry list, per the coalescing rule. Returns the entry's index
    /// if it promotes and updates one, after which the caller still needs to copy the live line
    /// into it via `finish_entry_copy`.
    fn try_coalesce(&mut self, top: u32, bot: u32, line_count: u32) -> Option<usize> {
        let head = self.newhead?;
        let depth = COALESCE_SEARCH_DEPTH.min(self.arena[head].entries.len());

        for i in 0..depth {
            let is_getbot = self.arena[head].getbot_entry == Some(i);
            let (e_top, e_size, e_bot, e_lcount) = {
                let e = &self.arena[head].entries[i];
                (e.top, e.size(), e.bot, e.lcount)
            };

            let shift_ok = if is_getbot {
                e_lcount == line_count
            } else {
                let resolved_bot = if e_bot == 0 { line_count + 1 } else { e_bot };
                e_top + e_size + 1 == resolved_bot
            };
            if !shift_ok {
                return None;
            }

            if e_size > 1 && top >= e_top && top <= e_top + e_size {
                return None;
            }

            if e_size == 1 && e_top == top {
                // Promote to front.
                let entry = self.arena[head].entries.remove(i);
                self.arena[head].entries.insert(0, entry);

                if let Some(g) = self.arena[head].getbot_entry {
                    self.arena[head].getbot_entry = Some(if g == i { 0 } else if g < i { g + 1 } else { g });
                }

                // Finalize whatever was previously deferred, unless it's this same entry (its
                // bot is about to be overwritten below anyway).
                if !is_getbot {
                    let _ = self.resolve_deferred_bot(line_count);
                }

                let e = &mut self.arena[head].entries[0];
                if bot > line_count {
                    e.bot = 0;
                    e.lcount = line_count;
                    self.arena[head].getbot_entry = Some(0);
                } else {
                    e.bot = bot;
                }
                return Some(0);
            }
        }
        None
    }

    /// Resolves `newhead`'s deferred-`bot` entry, if one exists, against the buffer's
    /// current line count.
    fn resolve_deferred_bot(&mut self, line_count: u32) -> UndoResult<()> {
        let Some(head) = self.newhead else { return Ok(()) };
        let Some(i) = self.arena[head].getbot_entry else {
            self.synced = true;
            return Ok(());
        };

        let e = &mut self.arena[head].entries[i];
        let extra = line_count as i64 - e.lcount as i64;
        let new_bot = e.top as i64 + e.size() as i64 + 1 + extra;
        if new_bot < 1 || new_bot > line_count as i64 + 1 {
            return Err(UndoError::Internal("resolve_bot: line missing"));
        }
        e.bot = new_bot as u32;
        self.arena[head].getbot_entry = None;
        self.synced = true;
        Ok(())
    }

    fn push_new_entry(&mut self, top: u32, bot: u32, newbot: u32, line_count: u32) {
        let head = self.newhead.expect("push_new_entry requires an open header");

        let mut entry = Entry {
            top,
            bot: 0,
            lcount: 0,
            lines: Vec::new(),
        };

        let needs_deferred_bot = if newbot != 0 {
            entry.bot = newbot;
            false
        } else if bot > line_count {
            // Resolved to `line_count + 1` at replay time; nothing left to defer.
            entry.bot = 0;
            false
        } else {
            entry.lcount = line_count;
            entry.bot = 0;
            true
        };

        self.arena[head].entries.insert(0, entry);
        if needs_deferred_bot {
            self.arena[head].getbot_entry = Some(0);
        }
    }

    /// Copies the pre-image lines into the head entry and marks the header RELOAD if asked.
    /// Polls the host's cooperative cancellation flag between lines.
    fn finish_entry_copy<L: LineStore, P: HostPolicy>(
        &mut self,
        buffer: &L,
        policy: &P,
        top: u32,
        size: u32,
        reload: bool,
    ) -> UndoResult<()> {
        let head = self.newhead.expect("finish_entry_copy requires an open header");

        let mut lines = Vec::with_capacity(size as usize);
        for offset in 1..=size {
            if policy.interrupted() {
                return Err(UndoError::Interrupted);
            }
            lines.push(buffer.get_line(top + offset));
        }

        let e = &mut self.arena[head].entries[0];
        e.lines = lines;

        if reload {
            self.arena[head].flags |= flags::RELOAD;
        }
        self.synced = false;
        Ok(())
    }

    /// Snapshots a single line into the `u_line_*` slot, independent of the DAG.
    pub fn u_line_save<L: LineStore>(&mut self, buffer: &L, lnum: u32, colnr: u32) {
        self.u_line.line = Some(buffer.get_line(lnum));
        self.u_line.lnum = lnum;
        self.u_line.colnr = colnr;
    }

    /// Swaps the saved line back into the buffer, toggling on repeated invocation.
    pub fn u_line_undo<L: LineStore>(&mut self, buffer: &mut L) -> UndoResult<u32> {
        let Some(saved) = self.u_line.line.take() else {
            return Err(UndoError::Internal("no line saved for u_line_undo"));
        };
        let lnum = self.u_line.lnum;
        let current = buffer.get_line(lnum);
        buffer.replace_line(lnum, saved);
        self.u_line.line = Some(current);
        Ok(lnum)
    }
}

//! The replay engine: executes a single undo or redo step.
//!
//! Each [`crate::entry::Entry`] is its own inverse once the recorded pre-image and the current
//! live range are swapped, so the same code path handles both directions.

use crate::collaborators::{CursorWindow, Direction, ExtmarkSink, LineStore, MarksState};
use crate::error::{UndoError, UndoResult};
use crate::header::HeaderIdx;
use crate::state::UndoState;

impl UndoState {
    /// Replays `target` in the given direction: swaps every entry's recorded pre-image with the
    /// buffer's live text (producing the inverse in place), replays extmark deltas, restores
    /// cursor/marks/visual selection, and updates `seq_cur`/`time_cur`/`save_nr_cur`.
    ///
    /// Does not move `curhead` - the navigator owns that bookkeeping since it knows
    /// whether it's mid-walk or single-stepping.
    pub fn apply_header<L: LineStore, W: CursorWindow, M: MarksState, X: ExtmarkSink>(
        &mut self,
        target: HeaderIdx,
        direction: Direction,
        buffer: &mut L,
        window: &mut W,
        marks: &mut M,
        extmarks: &mut X,
    ) -> UndoResult<()> {
        let num_entries = self.arena[target].entries.len();

        for i in 0..num_entries {
            self.apply_one_entry(target, i, buffer)?;
        }

        match direction {
            Direction::Undo => {
                for i in (0..self.arena[target].extmark_deltas.len()).rev() {
                    let delta = self.arena[target].extmark_deltas[i].clone();
                    extmarks.apply_extmark_delta(&delta, direction);
                }
            }
            Direction::Redo => {
                for i in 0..self.arena[target].extmark_deltas.len() {
                    let delta = self.arena[target].extmark_deltas[i].clone();
                    extmarks.apply_extmark_delta(&delta, direction);
                }
            }
        }

        self.swap_flags_and_marks(target, marks);

        let prev_cursor = window.cursor();
        let header_cursor = self.arena[target].cursor;
        let restore = if prev_cursor.lnum == header_cursor.lnum + 1 && prev_cursor.col == 0 {
            // "o-command friendliness": leave the cursor where it was rather than yanking it
            // back up one line.
            prev_cursor
        } else {
            header_cursor
        };
        window.set_cursor(restore);
        let _ = window.virtualedit_active(); // honored by the host when applying cursor_vcol.

        match direction {
            Direction::Undo => {
                self.seq_cur = self.arena[target].next.map(|n| self.arena[n].seq).unwrap_or(0);
                let save_nr = self.arena[target].save_nr;
                if save_nr != 0 {
                    self.save_nr_cur = save_nr - 1;
                }
                self.time_cur = self
                    .arena[target]
                    .next
                    .map(|n| self.arena[n].time)
                    .unwrap_or(0);
            }
            Direction::Redo => {
                self.seq_cur = self.arena[target].seq;
                let save_nr = self.arena[target].save_nr;
                if save_nr != 0 {
                    self.save_nr_cur = save_nr;
                }
                self.time_cur = self.arena[target].time;
            }
        }

        Ok(())
    }

    fn apply_one_entry<L: LineStore>(
        &mut self,
        target: HeaderIdx,
        entry_idx: usize,
        buffer: &mut L,
    ) -> UndoResult<()> {
        let line_count = buffer.line_count();

        let (top, bot, newsize) = {
            let e = &self.arena[target].entries[entry_idx];
            (e.top, e.bot, e.size())
        };
        let live_bot = if bot == 0 { line_count + 1 } else { bot };

        if top > live_bot || live_bot > line_count + 1 {
            return Err(UndoError::RangeInvalid("replay range out of buffer bounds"));
        }
        let oldsize = live_bot - top - 1;

        let mut saved_live = Vec::with_capacity(oldsize as usize);
        for offset in 1..=oldsize {
            saved_live.push(buffer.get_line(top + offset));
        }

        for _ in 0..oldsize {
            buffer.delete_line(top + 1);
        }

        let new_lines = self.arena[target].entries[entry_idx].lines.clone();
        insert_lines(buffer, top, &new_lines);

        buffer.adjust_marks_for_splice(top + 1, oldsize, newsize);

        let e = &mut self.arena[target].entries[entry_idx];
        e.lines = saved_live;
        e.bot = top + newsize + 1;

        Ok(())
    }

    /// The header's flags/marks/visual selection are themselves a record of what the buffer
    /// looked like on the *other* side of this step - swapping them with the live values is how
    /// the same header serves both undo and redo, exactly like an `Entry`'s pre-image swap.
    fn swap_flags_and_marks<M: MarksState>(&mut self, target: HeaderIdx, marks: &mut M) {
        let h = &mut self.arena[target];

        let live_flags = marks.buffer_flags();
        marks.set_buffer_flags(h.flags);
        h.flags = live_flags;

        let live_marks = marks.named_marks();
        marks.set_named_marks(h.named_marks);
        h.named_marks = live_marks;

        let live_visual = marks.visual();
        marks.set_visual(h.visual);
        h.visual = live_visual;
    }
}

/// Inserts `lines` starting after buffer line `top`. If the buffer reports zero lines, the
/// first inserted line replaces the (always-present, per host contract) line 1 rather than
/// being appended after a nonexistent `top` - the "empty buffer" case.
fn insert_lines<L: LineStore>(buffer: &mut L, top: u32, lines: &[Vec<u8>]) {
    let mut iter = lines.iter();
    let mut after = top;

    if buffer.line_count() == 0 {
        if let Some(first) = iter.next() {
            buffer.replace_line(1, first.clone());
            after = 1;
        } else {
            return;
        }
    }

    for l in iter {
        buffer.append_line(after, l.clone());
        after += 1;
    }
}

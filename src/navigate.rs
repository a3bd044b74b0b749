//! The navigator: walks the undo DAG toward a target expressed as a
//! step count, wall time, save count, or absolute sequence number, then drives the replay engine
//! one header at a time along the chosen path.

use crate::collaborators::{CursorWindow, Direction, ExtmarkSink, LineStore, MarksState};
use crate::error::UndoResult;
use crate::header::{HeaderIdx, HeaderLink};
use crate::state::UndoState;
use crate::walk;

/// The coordinate a [`navigate_to`] call is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigateMode {
    /// Relative to `seq_cur`.
    Count,
    /// Relative to `time_cur`, in seconds.
    Seconds,
    /// Relative to `save_nr_cur`, counting file-write ordinals.
    Saves,
    /// An absolute `seq` value.
    Absolute,
}

/// Which field of a [`crate::header::Header`] a round of the tree walk is comparing against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coordinate {
    Seq,
    Time,
    SaveNr,
}

fn value_of(state: &UndoState, idx: HeaderIdx, coord: Coordinate) -> i64 {
    let h = &state.arena[idx];
    match coord {
        Coordinate::Seq => h.seq as i64,
        Coordinate::Time => h.time,
        Coordinate::SaveNr => h.save_nr as i64,
    }
}

/// The header that a single further plain undo would apply - `curhead` if the buffer has been
/// undone partway, `newhead` if it's sitting at the leaf.
fn pending_undo_target(state: &UndoState) -> HeaderLink {
    state.curhead.or(state.newhead)
}

fn find_by_seq(state: &mut UndoState, seq: u32) -> HeaderLink {
    if seq == 0 {
        return None;
    }
    walk::enumerate_all(state).into_iter().find(|&idx| state.arena[idx].seq == seq)
}

/// Translates a navigation step and mode into a concrete target.
fn compute_target(state: &UndoState, step: i64, mode: NavigateMode) -> (i64, Coordinate) {
    match mode {
        NavigateMode::Absolute => (step, Coordinate::Seq),
        NavigateMode::Count => (state.seq_cur as i64 + step, Coordinate::Seq),
        NavigateMode::Seconds => (state.time_cur + step, Coordinate::Time),
        NavigateMode::Saves => {
            let has_save_marker = pending_undo_target(state)
                .map(|idx| state.arena[idx].save_nr != 0)
                .unwrap_or(false);

            let raw_target = if step < 0 && !has_save_marker {
                state.save_nr_cur as i64 + step + 1
            } else {
                state.save_nr_cur as i64 + step
            };

            let clamped = raw_target.clamp(0, state.save_nr_last as i64 + 1);
            if clamped != raw_target {
                let fallback = if step < 0 { 0 } else { state.seq_last as i64 + 1 };
                (fallback, Coordinate::Seq)
            } else {
                (clamped, Coordinate::SaveNr)
            }
        }
    }
}

struct Closest {
    idx: HeaderIdx,
    val: i64,
}

/// Round 1: a full walk of the reachable DAG, tracking the header whose
/// `coord` value is closest to `target` among those on the correct side of `seq_cur`.
fn search_closest(state: &mut UndoState, target: i64, coord: Coordinate, backward: bool) -> Option<Closest> {
    let order = walk::enumerate_all(state);
    let mut best: Option<Closest> = None;

    for idx in order {
        let seq = state.arena[idx].seq;
        let side_ok = if backward { seq <= state.seq_cur } else { seq >= state.seq_cur };
        if !side_ok {
            continue;
        }

        let val = value_of(state, idx, coord);
        let dist = (val - target).abs();

        let better = match &best {
            None => true,
            Some(b) => {
                let best_dist = (b.val - target).abs();
                if dist < best_dist {
                    true
                } else if dist == best_dist {
                    // Tie-break toward the more extreme seq in the direction of travel.
                    if backward { seq < state.arena[b.idx].seq } else { seq > state.arena[b.idx].seq }
                } else {
                    false
                }
            }
        };
        if better {
            best = Some(Closest { idx, val });
        }

        if coord != Coordinate::Time && val == target {
            break;
        }
    }

    best
}

/// The header's path back to `oldhead`, following `alt_prev` at an attachment point and plain
/// `next` everywhere else (the DAG's hierarchy is encoded this way so a header
/// that was displaced by a later edit no longer counts its displacer as an ancestor).
fn tree_path_to_root(state: &UndoState, mut idx: HeaderIdx) -> Vec<HeaderIdx> {
    let mut out = vec![idx];
    loop {
        let h = &state.arena[idx];
        let parent = match h.alt_prev {
            Some(ap) => ap,
            None => match h.next {
                Some(n) => n,
                None => break,
            },
        };
        out.push(parent);
        idx = parent;
    }
    out
}

/// Re-links `want` (currently reachable from `attach` via its `alt_next` sibling chain) to be
/// `attach`'s primary (`prev`) child, demoting whatever was previously `attach.prev` into the
/// alt-sibling chain in its place: rotates the alternate lists so the target's
/// branch becomes the first alt_* child, so future plain undo follows this path.
fn promote_alt_to_primary(state: &mut UndoState, attach: HeaderIdx, want: HeaderIdx) {
    if state.arena[attach].prev == Some(want) {
        return;
    }

    let want_alt_prev = state.arena[want].alt_prev;
    let want_alt_next = state.arena[want].alt_next;
    if let Some(wp) = want_alt_prev {
        state.arena[wp].alt_next = want_alt_next;
    }
    if let Some(wn) = want_alt_next {
        state.arena[wn].alt_prev = want_alt_prev;
    }

    if let Some(old_primary) = state.arena[attach].prev {
        // The demoted branch's true chronological parent is whatever `attach` shares with it,
        // not `attach` itself - matching how every other alt-branch head's `next` already skips
        // the header it diverged from.
        let shared_ancestor = state.arena[attach].next;
        state.arena[old_primary].next = shared_ancestor;
        state.arena[old_primary].alt_prev = Some(attach);
        state.arena[old_primary].alt_next = state.arena[attach].alt_next;
        if let Some(front) = state.arena[attach].alt_next {
            state.arena[front].alt_prev = Some(old_primary);
        }
        state.arena[attach].alt_next = Some(old_primary);
    }

    state.arena[attach].prev = Some(want);
    state.arena[want].next = Some(attach);
    state.arena[want].alt_prev = None;
}

fn apply_undo_step<L: LineStore, W: CursorWindow, M: MarksState, X: ExtmarkSink>(
    state: &mut UndoState,
    target: HeaderIdx,
    buffer: &mut L,
    window: &mut W,
    marks: &mut M,
    extmarks: &mut X,
) -> UndoResult<()> {
    state.apply_header(target, Direction::Undo, buffer, window, marks, extmarks)?;
    state.curhead = state.arena[target].next;
    Ok(())
}

fn apply_redo_step<L: LineStore, W: CursorWindow, M: MarksState, X: ExtmarkSink>(
    state: &mut UndoState,
    target: HeaderIdx,
    buffer: &mut L,
    window: &mut W,
    marks: &mut M,
    extmarks: &mut X,
) -> UndoResult<()> {
    state.apply_header(target, Direction::Redo, buffer, window, marks, extmarks)?;
    state.curhead = state.arena[target].prev;
    Ok(())
}

/// Drives the buffer from its current position to the header with `seq == target_seq`,
/// crossing into alternate branches (and rotating them to primary) as needed.
fn execute_path<L: LineStore, W: CursorWindow, M: MarksState, X: ExtmarkSink>(
    state: &mut UndoState,
    target_seq: u32,
    buffer: &mut L,
    window: &mut W,
    marks: &mut M,
    extmarks: &mut X,
) -> UndoResult<()> {
    if state.seq_cur == target_seq {
        return Ok(());
    }

    let target_idx = find_by_seq(state, target_seq);
    let current_idx = find_by_seq(state, state.seq_cur);

    let target_path = target_idx.map(|idx| tree_path_to_root(state, idx)).unwrap_or_default();
    let current_path = current_idx.map(|idx| tree_path_to_root(state, idx)).unwrap_or_default();

    // Reverse so index 0 is the shared root end; find the deepest common header (the LCA).
    let target_rev: Vec<_> = target_path.iter().rev().copied().collect();
    let current_rev: Vec<_> = current_path.iter().rev().copied().collect();
    let mut common_len = 0;
    while common_len < target_rev.len()
        && common_len < current_rev.len()
        && target_rev[common_len] == current_rev[common_len]
    {
        common_len += 1;
    }
    let lca = if common_len > 0 { Some(current_rev[common_len - 1]) } else { None };

    // Undo everything on the current branch newer than `lca` (exclusive of `lca` itself, which
    // both branches share and should remain applied).
    loop {
        let pending = pending_undo_target(state);
        if pending == lca || pending.is_none() {
            break;
        }
        apply_undo_step(state, pending.unwrap(), buffer, window, marks, extmarks)?;
    }

    // Redo down the target's branch, rotating at each attachment point that doesn't already
    // have the wanted child as its primary.
    let forward: Vec<HeaderIdx> = target_rev[common_len..].to_vec();
    let mut attach = lca;
    for &child in &forward {
        if let Some(a) = attach {
            promote_alt_to_primary(state, a, child);
        }
        state.curhead = Some(child);
        apply_redo_step(state, child, buffer, window, marks, extmarks)?;
        attach = Some(child);
    }

    Ok(())
}

/// `navigate(step, mode)`: the full count/seconds/saves/absolute
/// navigation entry point.
pub fn navigate_to<L: LineStore, W: CursorWindow, M: MarksState, X: ExtmarkSink>(
    state: &mut UndoState,
    step: i64,
    mode: NavigateMode,
    buffer: &mut L,
    window: &mut W,
    marks: &mut M,
    extmarks: &mut X,
) -> UndoResult<()> {
    let (target, coord) = compute_target(state, step, mode);
    let backward = match mode {
        NavigateMode::Absolute => target < state.seq_cur as i64,
        _ => step < 0,
    };

    let Some(closest) = search_closest(state, target, coord, backward) else {
        state.debug_check_invariants();
        return Ok(());
    };

    let target_seq = if closest.val == target {
        state.arena[closest.idx].seq
    } else {
        // Round 2: re-target on the closest candidate's own seq, exactly.
        let reseq_target = state.arena[closest.idx].seq as i64;
        match search_closest(state, reseq_target, Coordinate::Seq, backward) {
            Some(c) => state.arena[c.idx].seq,
            None => state.arena[closest.idx].seq,
        }
    };

    let result = execute_path(state, target_seq, buffer, window, marks, extmarks);
    state.debug_check_invariants();
    result
}

/// Undoes once, then forgets the branch that was just undone - promoting its
/// first alternate (if any) into its place, splicing the alt chain, and freeing the lone detached
/// header.
pub fn forget_current_branch<L: LineStore, W: CursorWindow, M: MarksState, X: ExtmarkSink>(
    state: &mut UndoState,
    buffer: &mut L,
    window: &mut W,
    marks: &mut M,
    extmarks: &mut X,
) -> UndoResult<()> {
    let Some(target) = pending_undo_target(state) else {
        state.debug_check_invariants();
        return Ok(());
    };
    state.apply_header(target, Direction::Undo, buffer, window, marks, extmarks)?;

    let target_seq = state.arena[target].seq;
    let older = state.arena[target].next;
    let newer = state.arena[target].prev;
    let first_alt = state.arena[target].alt_next;
    let target_alt_prev = state.arena[target].alt_prev;

    match first_alt {
        Some(alt) => {
            match newer {
                Some(n) => state.arena[n].next = Some(alt),
                None => state.newhead = Some(alt),
            }
            state.arena[alt].prev = newer;

            let remaining_alts = state.arena[alt].alt_next;
            state.arena[alt].alt_prev = target_alt_prev;
            if let Some(ap) = target_alt_prev {
                state.arena[ap].alt_next = Some(alt);
            }
            state.arena[alt].alt_next = remaining_alts;

            if state.oldhead == Some(target) {
                state.oldhead = Some(alt);
            }
            state.curhead = Some(alt);
        }
        None => {
            match newer {
                Some(n) => state.arena[n].next = older,
                None => state.newhead = older,
            }
            if let Some(o) = older {
                state.arena[o].prev = newer;
            }
            if let Some(ap) = target_alt_prev {
                state.arena[ap].alt_next = state.arena[target].alt_next;
            }
            if let Some(an) = state.arena[target].alt_next {
                state.arena[an].alt_prev = target_alt_prev;
            }
            if state.oldhead == Some(target) {
                state.oldhead = older;
            }
            state.curhead = older;
        }
    }

    state.arena.free(target);
    state.num_heads = state.num_heads.saturating_sub(1);
    if state.seq_last == target_seq {
        state.seq_last = state.seq_last.saturating_sub(1);
    }

    state.debug_check_invariants();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;

    #[derive(Clone)]
    struct FakeLines(Vec<Vec<u8>>);
    impl LineStore for FakeLines {
        fn get_line(&self, lnum: u32) -> Vec<u8> {
            self.0[(lnum - 1) as usize].clone()
        }
        fn replace_line(&mut self, lnum: u32, text: Vec<u8>) {
            self.0[(lnum - 1) as usize] = text;
        }
        fn append_line(&mut self, after: u32, text: Vec<u8>) {
            self.0.insert(after as usize, text);
        }
        fn delete_line(&mut self, lnum: u32) {
            self.0.remove((lnum - 1) as usize);
        }
        fn line_count(&self) -> u32 {
            self.0.len() as u32
        }
    }

    struct FakeWindow(crate::header::CursorPos);
    impl CursorWindow for FakeWindow {
        fn cursor(&self) -> crate::header::CursorPos {
            self.0
        }
        fn set_cursor(&mut self, pos: crate::header::CursorPos) {
            self.0 = pos;
        }
        fn virtualedit_active(&self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct FakeMarks {
        flags: u16,
        marks: crate::collaborators::NamedMarks,
        visual: crate::header::VisualSelection,
    }
    impl MarksState for FakeMarks {
        fn named_marks(&self) -> crate::collaborators::NamedMarks {
            self.marks
        }
        fn set_named_marks(&mut self, marks: crate::collaborators::NamedMarks) {
            self.marks = marks;
        }
        fn visual(&self) -> crate::header::VisualSelection {
            self.visual
        }
        fn set_visual(&mut self, visual: crate::header::VisualSelection) {
            self.visual = visual;
        }
        fn buffer_flags(&self) -> u16 {
            self.flags
        }
        fn set_buffer_flags(&mut self, flags: u16) {
            self.flags = flags;
        }
    }

    struct NoExtmarks;
    impl ExtmarkSink for NoExtmarks {
        fn apply_extmark_delta(&mut self, _delta: &[u8], _direction: Direction) {}
    }

    fn push(state: &mut UndoState, seq: u32, time: i64, top: u32, old: Vec<u8>) -> HeaderIdx {
        let mut h = Header::new(seq, time);
        h.entries.push(crate::entry::Entry { top, bot: top + 2, lcount: 0, lines: vec![old] });
        h.next = state.newhead;
        let idx = state.arena.alloc(h);
        if let Some(n) = state.newhead {
            state.arena[n].prev = Some(idx);
        }
        state.newhead = Some(idx);
        if state.oldhead.is_none() {
            state.oldhead = Some(idx);
        }
        state.num_heads += 1;
        state.seq_last = state.seq_last.max(seq);
        idx
    }

    #[test]
    fn linear_undo_redo_via_navigate() {
        let mut state = UndoState::new();
        let mut buffer = FakeLines(vec![b"a".to_vec(), b"B".to_vec(), b"C".to_vec()]);
        let mut window = FakeWindow(Default::default());
        let mut marks = FakeMarks::default();
        let mut extmarks = NoExtmarks;

        push(&mut state, 1, 10, 1, b"b".to_vec());
        push(&mut state, 2, 20, 2, b"c".to_vec());
        state.seq_cur = 2;
        state.time_cur = 21;

        navigate_to(&mut state, 0, NavigateMode::Absolute, &mut buffer, &mut window, &mut marks, &mut extmarks).unwrap();
        assert_eq!(state.seq_cur, 2);

        navigate_to(&mut state, -2, NavigateMode::Count, &mut buffer, &mut window, &mut marks, &mut extmarks).unwrap();
        assert_eq!(state.seq_cur, 0);
        assert_eq!(buffer.0, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        navigate_to(&mut state, 2, NavigateMode::Count, &mut buffer, &mut window, &mut marks, &mut extmarks).unwrap();
        assert_eq!(state.seq_cur, 2);
        assert_eq!(buffer.0, vec![b"a".to_vec(), b"B".to_vec(), b"C".to_vec()]);
    }

    #[test]
    fn navigates_across_a_branch_point() {
        let mut state = UndoState::new();
        let mut buffer = FakeLines(vec![b"x".to_vec()]);
        let mut window = FakeWindow(Default::default());
        let mut marks = FakeMarks::default();
        let mut extmarks = NoExtmarks;

        let root = push(&mut state, 1, 0, 0, b"r".to_vec());

        // A displaced alternate branch attached at `root`.
        let mut alt = Header::new(5, 50);
        alt.entries.push(crate::entry::Entry { top: 0, bot: 2, lcount: 0, lines: vec![b"alt".to_vec()] });
        alt.alt_prev = Some(root);
        let alt_idx = state.arena.alloc(alt);
        state.arena[root].alt_next = Some(alt_idx);
        state.num_heads += 1;
        state.seq_last = 5;

        state.seq_cur = 1;
        state.curhead = None;

        let moved = navigate_to(&mut state, 5, NavigateMode::Absolute, &mut buffer, &mut window, &mut marks, &mut extmarks);
        assert!(moved.is_ok());
        assert_eq!(state.seq_cur, 5);
        assert_eq!(state.arena[root].prev, Some(alt_idx));
    }
}

//! Interfaces to the external collaborators this crate does not own.
//!
//! The engine never touches a buffer, a window, or the extmark subsystem directly - it's handed
//! trait objects (or generic parameters, at call sites where that's cheaper) that speak for
//! them. This mirrors the pack's habit of wrapping a real resource behind a narrow trait so the
//! engine's tests can swap in an in-memory double ([`crate::file::UndoFile`] does the same thing
//! for the byte stream in `format`).

use crate::header::{CursorPos, VisualSelection};

/// The line store: the buffer itself. 1-indexed line numbers, matching the wire format.
pub trait LineStore {
    /// Returns the text of line `lnum` (1-indexed).
    fn get_line(&self, lnum: u32) -> Vec<u8>;

    /// Replaces the text of line `lnum` (1-indexed). `lnum` must already exist.
    fn replace_line(&mut self, lnum: u32, text: Vec<u8>);

    /// Appends a line after `after` (0 means "before line 1").
    fn append_line(&mut self, after: u32, text: Vec<u8>);

    /// Deletes line `lnum` (1-indexed).
    fn delete_line(&mut self, lnum: u32);

    /// Total number of lines currently in the buffer.
    fn line_count(&self) -> u32;

    /// Adjusts any marks the line store keeps internally (not named marks, which the engine
    /// owns) for a splice of `oldsize` lines replaced by `newsize` lines at `at`. Default no-op;
    /// most hosts have nothing of their own to adjust here.
    fn adjust_marks_for_splice(&mut self, at: u32, oldsize: u32, newsize: u32) {
        let _ = (at, oldsize, newsize);
    }
}

/// Cursor/window state the engine restores when traversing a header.
pub trait CursorWindow {
    fn cursor(&self) -> CursorPos;
    fn set_cursor(&mut self, pos: CursorPos);

    /// Whether virtual editing is active; governs whether `cursor_vcol` is honored.
    fn virtualedit_active(&self) -> bool;
}

/// Buffer-wide named marks and visual selection. Like [`LineStore`], this is live state the
/// host owns; the engine only ever swaps a header's snapshot of it in and out, the same way
/// it swaps an `Entry`'s pre-image with the live line range.
pub trait MarksState {
    fn named_marks(&self) -> NamedMarks;
    fn set_named_marks(&mut self, marks: NamedMarks);

    fn visual(&self) -> VisualSelection;
    fn set_visual(&mut self, visual: VisualSelection);

    /// Buffer-wide modified/empty bits, in the same encoding as [`crate::header::flags`].
    /// Swapped with the header's recorded flags on every replay, exactly like `Entry`'s
    /// pre-image swap.
    fn buffer_flags(&self) -> u16;
    fn set_buffer_flags(&mut self, flags: u16);
}

/// Direction a header is being replayed in; also the direction extmark deltas replay in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Undo,
    Redo,
}

/// Opaque extmark undo-delta storage. The engine stores whatever byte blob the host hands it
/// and replays the deltas back through this trait without inspecting their contents - hence
/// `&[u8]` rather than a host-defined type: the engine never needs to know the delta's shape,
/// only its bytes (which is also how it's persisted to the undo file, verbatim).
pub trait ExtmarkSink {
    fn apply_extmark_delta(&mut self, delta: &[u8], direction: Direction);
}

/// Read-only gates and configuration the host policy layer exposes.
pub trait HostPolicy {
    /// Is the buffer modifiable right now?
    fn is_modifiable(&self) -> bool;

    /// Are we in restricted/sandboxed mode (undo file writes forbidden)?
    fn is_restricted(&self) -> bool;

    /// Configured history depth. `-1` disables undo entirely. The host has already resolved
    /// any "defer to global default" sentinel before this is called.
    fn history_depth(&self) -> i64;

    /// Whether `u`/`u_line_undo` should use vi-compatible (linear, toggle) semantics.
    fn vi_compatible_undo(&self) -> bool;

    /// Cooperative cancellation flag, polled between lines of a long `record_change` copy.
    fn interrupted(&self) -> bool {
        false
    }
}

/// Named marks snapshot. `N_MARKS` mirrors the wire format's fixed-size array.
pub const N_MARKS: usize = 26;

pub type NamedMarks = [CursorPos; N_MARKS];

pub fn empty_named_marks() -> NamedMarks {
    [CursorPos::default(); N_MARKS]
}

pub use crate::header::CursorPos as Mark;
pub use VisualSelection as Visual;

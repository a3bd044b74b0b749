//! Error types returned by the undo engine.
//!
//! Mirrors the layered-error idiom used by the on-disk storage code this crate grew out of:
//! each layer gets its own small `enum` with hand-written `Display`/`Error` impls, and lower
//! layers convert into higher ones with `From`.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;

use crate::format::FormatError;

/// Top-level error returned by every fallible call into [`crate::UndoState`].
#[derive(Debug)]
#[non_exhaustive]
pub enum UndoError {
    /// The host's policy layer refused the operation (buffer not modifiable, sandboxed, etc).
    PolicyDenied(&'static str),

    /// `top`/`bot` were out of bounds for the buffer, or a replay computed an out-of-bounds
    /// range. In the latter case the buffer is marked changed rather than left half-applied.
    RangeInvalid(&'static str),

    /// Allocating a header or entry failed. The in-progress allocation has already been
    /// released; the `UndoState` is left in a consistent (pre-call) state.
    MemoryExhausted,

    /// The undo file (or a header/entry within it) failed to parse.
    Corruption(FormatError),

    /// The underlying file stream failed.
    IOFailure { path: String, source: io::Error },

    /// An internal consistency check failed (duplicate sequence number, dangling pointer, a
    /// deferred `bot` that never resolved). Not retryable; the caller should treat the
    /// `UndoState` as best-effort from here.
    Internal(&'static str),

    /// `record_change`'s line copy was cancelled by the host's cooperative interrupt flag.
    Interrupted,
}

impl Display for UndoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            UndoError::PolicyDenied(reason) => write!(f, "undo denied: {reason}"),
            UndoError::RangeInvalid(reason) => write!(f, "invalid range: {reason}"),
            UndoError::MemoryExhausted => write!(f, "out of memory while recording a change"),
            UndoError::Corruption(e) => write!(f, "undo file is corrupt: {e}"),
            UndoError::IOFailure { path, source } => write!(f, "I/O error on '{path}': {source}"),
            UndoError::Internal(reason) => write!(f, "internal undo error: {reason}"),
            UndoError::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl Error for UndoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            UndoError::Corruption(e) => Some(e),
            UndoError::IOFailure { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<FormatError> for UndoError {
    fn from(e: FormatError) -> Self {
        UndoError::Corruption(e)
    }
}

pub type UndoResult<T> = Result<T, UndoError>;

//! A branching, persistent undo tree for a line-oriented text buffer, and its durable on-disk
//! format. The engine itself never touches a buffer, a cursor, or a file
//! directly - it's driven through the [`collaborators`] traits and the [`file::UndoFile`] seam,
//! so a host supplies the line store, cursor/marks state, and byte stream.

pub mod collaborators;
pub mod entry;
pub mod error;
pub mod file;
pub mod format;
pub mod hash;
pub mod header;
pub mod navigate;
pub mod scripting;
pub mod state;
pub mod undofile_path;

mod record;
mod replay;
mod retain;
mod walk;

pub use collaborators::{CursorWindow, Direction, ExtmarkSink, HostPolicy, LineStore, MarksState};
pub use entry::Entry;
pub use error::{UndoError, UndoResult};
pub use format::{load_from_path, save_to_path, FormatError};
pub use hash::{hash_buffer, BufferHash};
pub use header::{flags, CursorPos, Header, HeaderIdx, HeaderLink, VisualSelection};
pub use navigate::{forget_current_branch, navigate_to, NavigateMode};
pub use record::Snapshot;
pub use scripting::{eval_tree, list_leaves, EvalNode, LeafInfo};
pub use state::UndoState;
pub use undofile_path::get_undofile_path;

//! `get_undofile_path` maps a buffer's file path to the path its undo file
//! lives at under one of the host's configured undo-directories.
//!
//! File-path mangling is otherwise out of scope - command dispatch and message formatting
//! around the undo file belong to the host - but this one mapping is named directly in the
//! navigator surface, so it's kept as a small, host-agnostic helper rather than omitted.

use std::path::{Path, PathBuf};

/// Turns an absolute buffer path into a same-directory-collision-free undo-file name: every path
/// separator becomes `%`, and a literal `%` is doubled first so the mangling is unambiguous to
/// reverse (not that anything here reverses it - this just has to not collide).
fn mangle_name(buffer_path: &Path) -> String {
    let mut out = String::from("%");
    for ch in buffer_path.to_string_lossy().chars() {
        match ch {
            '%' => out.push_str("%%"),
            '/' | '\\' => out.push('%'),
            ':' if cfg!(windows) => out.push('%'),
            other => out.push(other),
        }
    }
    out
}

/// Searches `undo_dirs` (a comma-separated list, matching the host policy layer's option string)
/// for the undo file belonging to `buffer_path`.
///
/// When `reading`, returns the first candidate that already exists, so multiple configured
/// directories are treated as a search path. When writing, returns the first candidate whose
/// parent directory exists, without checking whether the file itself is already there (callers
/// create it with exclusive-create semantics and surface any conflict as an `IOFailure`).
///
/// Returns `None` if `buffer_path` isn't absolute (matching the source's refusal to undo-file
/// unnamed or relative-only buffers) or if `undo_dirs` names no directory.
pub fn get_undofile_path(buffer_path: &Path, undo_dirs: &str, reading: bool) -> Option<PathBuf> {
    if !buffer_path.is_absolute() {
        return None;
    }
    let name = mangle_name(buffer_path);

    let mut first_viable = None;
    for dir in undo_dirs.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let dir = Path::new(dir);
        let candidate = dir.join(&name);

        if reading {
            if candidate.is_file() {
                return Some(candidate);
            }
        } else if dir.is_dir() {
            return Some(candidate);
        } else if first_viable.is_none() {
            first_viable = Some(candidate);
        }
    }

    if reading {
        None
    } else {
        first_viable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_buffer_path_has_no_undofile() {
        assert_eq!(get_undofile_path(Path::new("relative.txt"), "/tmp", false), None);
    }

    #[test]
    fn mangles_separators_and_escapes_percent() {
        let p = if cfg!(windows) { Path::new(r"C:\a\b%c.txt") } else { Path::new("/a/b%c.txt") };
        let name = mangle_name(p);
        assert!(name.starts_with('%'));
        assert!(!name.contains('/'));
        assert!(name.contains("%%"));
    }

    #[test]
    fn writing_prefers_first_existing_directory() {
        let dir = std::env::temp_dir();
        let dirs = format!("/does/not/exist,{}", dir.display());
        let path = get_undofile_path(Path::new("/some/buffer.txt"), &dirs, false).unwrap();
        assert_eq!(path.parent().unwrap(), dir);
    }
}

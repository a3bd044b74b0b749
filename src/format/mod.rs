//! The binary undo-file serializer/deserializer.
//!
//! All multi-byte integers are big-endian; pointers on disk are the target header's `seq` (0 for
//! null); the whole file is read up front and parsed from memory rather than streamed, matching
//! the "no partial/streamed loading" non-goal.

mod wire;

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use num_enum::TryFromPrimitive;

use crate::collaborators::{LineStore, NamedMarks, N_MARKS};
use crate::entry::Entry;
use crate::error::{UndoError, UndoResult};
use crate::file::UndoFile;
use crate::hash::{hash_buffer, BufferHash};
use crate::header::{CursorPos, Header, HeaderIdx, HeaderLink, VisualSelection};
use crate::state::UndoState;
use crate::walk;
use wire::{push_bytes_with_len, push_i64, push_optional_save_nr, push_u16, push_u32, Reader};

const START_MAGIC: [u8; 9] = *b"Vim\x9fUnDo\xe5";
const VERSION: u16 = 0x0003;

/// The chunk tags prefixing every variable-length block in the wire format. `#[repr(u16)]` plus
/// `TryFromPrimitive` lets a tag read off disk be validated against the set this reader
/// understands in one step, the same way this lineage's storage layer decodes its own on-disk
/// page-type tags.
#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive)]
#[repr(u16)]
enum ChunkTag {
    Header = 0x5fd0,
    Entry = 0xf518,
    EntryEnd = 0x3581,
    EndOfHeaders = 0xe7aa,
}

const HEADER_TAG: u16 = ChunkTag::Header as u16;
const ENTRY_TAG: u16 = ChunkTag::Entry as u16;
const ENTRY_END_MAGIC: u16 = ChunkTag::EntryEnd as u16;
const END_OF_HEADERS_MAGIC: u16 = ChunkTag::EndOfHeaders as u16;
const OPTIONAL_TAG_SAVE_NR: u8 = 0x01;

/// Parse/consistency failures specific to the binary format, distinct from `UndoError`'s
/// engine-level errors the same way `ParseError`/`SEError` are split in this lineage's storage
/// layer.
#[derive(Debug)]
#[non_exhaustive]
pub enum FormatError {
    BadMagic,
    UnsupportedVersion(u16),
    /// The stream ended before an expected field.
    Truncated,
    /// The buffer hash or line count recorded in the file doesn't match the live buffer.
    HashMismatch,
    /// A header-to-header pointer's `seq` wasn't found in the file's header table.
    DanglingPointer(u32),
    /// Two headers in the same file claimed the same `seq`.
    DuplicateSeq(u32),
    /// A chunk tag didn't match any tag this reader understands at strictness.
    UnknownChunk(u16),
    Io(io::Error),
}

impl Display for FormatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatError::BadMagic => write!(f, "not an undo file (bad magic)"),
            FormatError::UnsupportedVersion(v) => write!(f, "unsupported undo file version {v:#06x}"),
            FormatError::Truncated => write!(f, "undo file is truncated"),
            FormatError::HashMismatch => write!(f, "undo file does not match buffer contents"),
            FormatError::DanglingPointer(seq) => write!(f, "undo file refers to missing seq {seq}"),
            FormatError::DuplicateSeq(seq) => write!(f, "undo file has duplicate seq {seq}"),
            FormatError::UnknownChunk(tag) => write!(f, "unexpected chunk tag {tag:#06x}"),
            FormatError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl Error for FormatError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FormatError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FormatError {
    fn from(e: io::Error) -> Self {
        FormatError::Io(e)
    }
}

/// One header's worth of fields as read off disk, before its seq-valued pointers have been
/// resolved into [`HeaderIdx`]s.
struct RawHeader {
    seq: u32,
    next_seq: u32,
    prev_seq: u32,
    alt_next_seq: u32,
    alt_prev_seq: u32,
    cursor: CursorPos,
    cursor_vcol: u32,
    flags: u16,
    named_marks: NamedMarks,
    visual: VisualSelection,
    time: i64,
    save_nr: u32,
    entries: Vec<Entry>,
    extmark_deltas: Vec<Vec<u8>>,
}

/// Reads one chunk tag and validates it against [`ChunkTag`], carrying the raw value through so
/// a rejection names the tag that was actually on disk.
fn read_tag(r: &mut Reader<'_>) -> Result<ChunkTag, FormatError> {
    let raw = r.u16()?;
    ChunkTag::try_from_primitive(raw).map_err(|_| FormatError::UnknownChunk(raw))
}

fn seq_of(state: &UndoState, link: HeaderLink) -> u32 {
    link.map(|idx| state.arena[idx].seq).unwrap_or(0)
}

fn push_cursor(buf: &mut Vec<u8>, c: CursorPos) {
    push_u32(buf, c.lnum);
    push_u32(buf, c.col);
    push_u32(buf, c.coladd);
}

fn write_entry(buf: &mut Vec<u8>, e: &Entry) {
    push_u16(buf, ENTRY_TAG);
    push_u32(buf, e.top);
    push_u32(buf, e.bot);
    push_u32(buf, e.lcount);
    push_u32(buf, e.size());
    for line in &e.lines {
        push_bytes_with_len(buf, line);
    }
}

fn write_header(buf: &mut Vec<u8>, state: &UndoState, idx: HeaderIdx) {
    let h = &state.arena[idx];

    push_u16(buf, HEADER_TAG);
    push_u32(buf, seq_of(state, h.next));
    push_u32(buf, seq_of(state, h.prev));
    push_u32(buf, seq_of(state, h.alt_next));
    push_u32(buf, seq_of(state, h.alt_prev));
    push_u32(buf, h.seq);
    push_cursor(buf, h.cursor);
    push_u32(buf, h.cursor_vcol);
    push_u16(buf, h.flags);

    for m in h.named_marks.iter() {
        push_cursor(buf, *m);
    }

    push_cursor(buf, h.visual.start);
    push_cursor(buf, h.visual.end);
    push_u32(buf, h.visual.mode);
    push_u32(buf, h.visual.curswant);

    push_i64(buf, h.time);
    push_optional_save_nr(buf, h.save_nr);

    for e in h.entries.iter() {
        write_entry(buf, e);
    }
    push_u16(buf, ENTRY_END_MAGIC);

    for d in h.extmark_deltas.iter() {
        push_u16(buf, ENTRY_TAG);
        push_bytes_with_len(buf, d);
    }
    push_u16(buf, ENTRY_END_MAGIC);
}

/// Writes `state` (and the hash of `buffer`'s current contents) to an already-open file stream.
/// The caller owns opening the stream with create-exclusive semantics and
/// removing it on failure; see [`save_to_path`] for a convenience wrapper that does both.
pub fn write<L: LineStore, F: UndoFile>(
    state: &mut UndoState,
    buffer: &L,
    file: &mut F,
) -> Result<(), FormatError> {
    let hash = hash_buffer(buffer);

    let mut buf = Vec::new();
    buf.extend_from_slice(&START_MAGIC);
    push_u16(&mut buf, VERSION);
    buf.extend_from_slice(&hash);
    push_u32(&mut buf, buffer.line_count());

    match &state.u_line.line {
        Some(line) => push_bytes_with_len(&mut buf, line),
        None => push_u32(&mut buf, 0),
    }
    push_u32(&mut buf, state.u_line.lnum);
    push_u32(&mut buf, state.u_line.colnr);

    push_u32(&mut buf, seq_of(state, state.oldhead));
    push_u32(&mut buf, seq_of(state, state.newhead));
    push_u32(&mut buf, seq_of(state, state.curhead));
    push_u32(&mut buf, state.num_heads);
    push_u32(&mut buf, state.seq_last);
    push_u32(&mut buf, state.seq_cur);
    push_i64(&mut buf, state.time_cur);
    push_optional_save_nr(&mut buf, state.save_nr_last);

    let order = walk::enumerate_all(state);
    for idx in order {
        write_header(&mut buf, state, idx);
    }
    push_u16(&mut buf, END_OF_HEADERS_MAGIC);

    file.write_all_at(&buf, 0)?;
    file.write_barrier()?;
    file.sync_data()?;
    Ok(())
}

fn read_raw_header(r: &mut Reader<'_>) -> Result<RawHeader, FormatError> {
    let next_seq = r.u32()?;
    let prev_seq = r.u32()?;
    let alt_next_seq = r.u32()?;
    let alt_prev_seq = r.u32()?;
    let seq = r.u32()?;
    let cursor = CursorPos { lnum: r.u32()?, col: r.u32()?, coladd: r.u32()? };
    let cursor_vcol = r.u32()?;
    let flags = r.u16()?;

    let mut named_marks: NamedMarks = [CursorPos::default(); N_MARKS];
    for m in named_marks.iter_mut() {
        *m = CursorPos { lnum: r.u32()?, col: r.u32()?, coladd: r.u32()? };
    }

    let start = CursorPos { lnum: r.u32()?, col: r.u32()?, coladd: r.u32()? };
    let end = CursorPos { lnum: r.u32()?, col: r.u32()?, coladd: r.u32()? };
    let mode = r.u32()?;
    let curswant = r.u32()?;
    let visual = VisualSelection { start, end, mode, curswant };

    let time = r.i64()?;
    let save_nr = r.optional_fields()?.unwrap_or(0);

    let mut entries = Vec::new();
    loop {
        match read_tag(r)? {
            ChunkTag::EntryEnd => break,
            ChunkTag::Entry => {}
            other => return Err(FormatError::UnknownChunk(other as u16)),
        }
        let top = r.u32()?;
        let bot = r.u32()?;
        let lcount = r.u32()?;
        let size = r.u32()?;
        let mut lines = Vec::with_capacity(size as usize);
        for _ in 0..size {
            lines.push(r.bytes_with_len()?);
        }
        entries.push(Entry { top, bot, lcount, lines });
    }

    let mut extmark_deltas = Vec::new();
    loop {
        match read_tag(r)? {
            ChunkTag::EntryEnd => break,
            ChunkTag::Entry => {}
            other => return Err(FormatError::UnknownChunk(other as u16)),
        }
        extmark_deltas.push(r.bytes_with_len()?);
    }

    Ok(RawHeader {
        seq,
        next_seq,
        prev_seq,
        alt_next_seq,
        alt_prev_seq,
        cursor,
        cursor_vcol,
        flags,
        named_marks,
        visual,
        time,
        save_nr,
        entries,
        extmark_deltas,
    })
}

/// Reads an undo file from an already-open stream and, if the buffer hash and line count match,
/// atomically replaces `state`'s in-memory DAG with the one just read. On any
/// rejection the existing `state` is left untouched.
pub fn read<L: LineStore, F: UndoFile>(
    state: &mut UndoState,
    buffer: &L,
    file: &mut F,
) -> Result<(), FormatError> {
    let len = file.stream_len()?;
    let mut data = vec![0u8; len as usize];
    file.read_all_at(&mut data, 0)?;

    let mut r = Reader::new(&data);

    if r.bytes(START_MAGIC.len())? != START_MAGIC {
        return Err(FormatError::BadMagic);
    }
    let version = r.u16()?;
    if version != VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }

    let hash: BufferHash = r.bytes(32)?.try_into().unwrap();
    let line_count = r.u32()?;
    if hash != hash_buffer(buffer) || line_count != buffer.line_count() {
        return Err(FormatError::HashMismatch);
    }

    let u_line_bytes = r.bytes_with_len()?;
    let u_line_lnum = r.u32()?;
    let u_line_col = r.u32()?;

    let oldhead_seq = r.u32()?;
    let newhead_seq = r.u32()?;
    let curhead_seq = r.u32()?;
    let num_heads = r.u32()?;
    let seq_last = r.u32()?;
    let seq_cur = r.u32()?;
    let time_cur = r.i64()?;
    let save_nr_last = r.optional_fields()?.unwrap_or(0);

    let mut raw_headers = Vec::new();
    loop {
        let tag = r.u16()?;
        if tag == END_OF_HEADERS_MAGIC {
            break;
        }
        if tag != HEADER_TAG {
            return Err(FormatError::UnknownChunk(tag));
        }
        raw_headers.push(read_raw_header(&mut r)?);
    }

    // Build the new DAG into plain locals first - not into a second `UndoState`, since
    // `UndoState`'s `Drop` impl would forbid partially moving its fields out at the end.
    let mut arena = crate::header::HeaderArena::default();
    let mut seq_to_idx: HashMap<u32, HeaderIdx> = HashMap::with_capacity(raw_headers.len());

    for raw in &raw_headers {
        let mut h = Header::new(raw.seq, raw.time);
        h.cursor = raw.cursor;
        h.cursor_vcol = raw.cursor_vcol;
        h.flags = raw.flags;
        h.named_marks = raw.named_marks;
        h.visual = raw.visual;
        h.save_nr = raw.save_nr;
        h.entries = raw.entries.iter().cloned().collect();
        h.extmark_deltas = raw.extmark_deltas.clone();
        let idx = arena.alloc(h);
        if seq_to_idx.insert(raw.seq, idx).is_some() {
            return Err(FormatError::DuplicateSeq(raw.seq));
        }
    }

    let resolve = |seq_to_idx: &HashMap<u32, HeaderIdx>, s: u32| -> Result<HeaderLink, FormatError> {
        if s == 0 {
            Ok(None)
        } else {
            seq_to_idx.get(&s).copied().map(Some).ok_or(FormatError::DanglingPointer(s))
        }
    };

    for raw in &raw_headers {
        let idx = seq_to_idx[&raw.seq];
        let next = resolve(&seq_to_idx, raw.next_seq)?;
        let prev = resolve(&seq_to_idx, raw.prev_seq)?;
        let alt_next = resolve(&seq_to_idx, raw.alt_next_seq)?;
        let alt_prev = resolve(&seq_to_idx, raw.alt_prev_seq)?;
        let h = arena.get_mut(idx).expect("just allocated");
        h.next = next;
        h.prev = prev;
        h.alt_next = alt_next;
        h.alt_prev = alt_prev;
    }

    let oldhead = resolve(&seq_to_idx, oldhead_seq)?;
    let newhead = resolve(&seq_to_idx, newhead_seq)?;
    let curhead = resolve(&seq_to_idx, curhead_seq)?;

    let save_nr_cur = seq_to_idx.get(&seq_cur).map(|&idx| arena[idx].save_nr).unwrap_or(0);

    state.clear();
    state.arena = arena;
    state.oldhead = oldhead;
    state.newhead = newhead;
    state.curhead = curhead;
    state.num_heads = num_heads;
    state.seq_last = seq_last;
    state.seq_cur = seq_cur;
    state.time_cur = time_cur;
    state.save_nr_last = save_nr_last;
    state.save_nr_cur = save_nr_cur;
    state.synced = true;
    state.u_line.line = if u_line_bytes.is_empty() { None } else { Some(u_line_bytes) };
    state.u_line.lnum = u_line_lnum;
    state.u_line.colnr = u_line_col;

    state.debug_check_invariants();
    Ok(())
}

/// Opens `path` with create-exclusive semantics, writes `state`, and removes the partial file on
/// any failure.
pub fn save_to_path<L: LineStore>(state: &mut UndoState, buffer: &L, path: &Path) -> UndoResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| UndoError::IOFailure { path: path.display().to_string(), source: e })?;

    match write(state, buffer, &mut file) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = std::fs::remove_file(path);
            Err(wrap_io(e, path))
        }
    }
}

/// Opens `path` for reading and installs its contents into `state` if the buffer hash matches.
pub fn load_from_path<L: LineStore>(state: &mut UndoState, buffer: &L, path: &Path) -> UndoResult<()> {
    let mut file = File::open(path)
        .map_err(|e| UndoError::IOFailure { path: path.display().to_string(), source: e })?;

    read(state, buffer, &mut file).map_err(|e| wrap_io(e, path))
}

fn wrap_io(e: FormatError, path: &Path) -> UndoError {
    match e {
        FormatError::Io(source) => UndoError::IOFailure { path: path.display().to_string(), source },
        other => UndoError::Corruption(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::test::TestFile;

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

    fn one_header_state() -> (UndoState, FakeLines) {
        let mut state = UndoState::new();
        let buffer = FakeLines(vec![b"a".to_vec(), b"B".to_vec(), b"c".to_vec()]);

        let mut h = Header::new(1, 100);
        h.entries.push(Entry { top: 1, bot: 3, lcount: 0, lines: vec![b"b".to_vec()] });
        h.save_nr = 0;
        let idx = state.arena.alloc(h);
        state.oldhead = Some(idx);
        state.newhead = Some(idx);
        state.num_heads = 1;
        state.seq_last = 1;
        state.seq_cur = 1;
        state.time_cur = 101;

        (state, buffer)
    }

    #[test]
    fn round_trips_through_an_in_memory_file() {
        let (mut state, buffer) = one_header_state();

        let mut file = TestFile::new();
        write(&mut state, &buffer, &mut file).unwrap();
        file.sync_data().unwrap();

        let mut loaded = UndoState::new();
        read(&mut loaded, &buffer, &mut file).unwrap();

        assert_eq!(loaded.num_heads, 1);
        assert_eq!(loaded.seq_last, 1);
        assert_eq!(loaded.seq_cur, 1);
        assert_eq!(loaded.time_cur, 101);
        let root = loaded.oldhead.unwrap();
        assert_eq!(loaded.newhead, Some(root));
        assert_eq!(loaded.arena[root].entries.len(), 1);
        assert_eq!(loaded.arena[root].entries[0].lines, vec![b"b".to_vec()]);
    }

    #[test]
    fn rejects_on_hash_mismatch_and_leaves_existing_state_untouched() {
        let (mut state, buffer) = one_header_state();

        let mut file = TestFile::new();
        write(&mut state, &buffer, &mut file).unwrap();
        file.sync_data().unwrap();

        let mutated = FakeLines(vec![b"a".to_vec(), b"X".to_vec(), b"c".to_vec()]);
        let mut loaded = UndoState::new();
        let err = read(&mut loaded, &mutated, &mut file).unwrap_err();
        assert!(matches!(err, FormatError::HashMismatch));
        assert_eq!(loaded.num_heads, 0);
    }

    #[test]
    fn preserves_branch_structure_across_a_round_trip() {
        let mut state = UndoState::new();
        let buffer = FakeLines(vec![b"a".to_vec()]);

        let root = state.arena.alloc(Header::new(1, 0));
        state.oldhead = Some(root);
        state.newhead = Some(root);
        state.num_heads = 1;
        state.seq_last = 1;

        let alt = state.arena.alloc(Header::new(2, 1));
        state.arena[alt].alt_prev = Some(root);
        state.arena[root].alt_next = Some(alt);
        state.num_heads = 2;
        state.seq_last = 2;

        let mut file = TestFile::new();
        write(&mut state, &buffer, &mut file).unwrap();
        file.sync_data().unwrap();

        let mut loaded = UndoState::new();
        read(&mut loaded, &buffer, &mut file).unwrap();

        assert_eq!(loaded.num_heads, 2);
        let root2 = loaded.oldhead.unwrap();
        let alt2 = loaded.arena[root2].alt_next.unwrap();
        assert_eq!(loaded.arena[alt2].alt_prev, Some(root2));
    }
}

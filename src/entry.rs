//! [`Entry`]: one contiguous range replacement within a header.

/// The pre-image of one replaced line range.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Entry {
    /// Line index immediately above the first replaced line. 0 means "before line 1".
    pub top: u32,

    /// Line index immediately below the last replaced line. 0 is a sentinel meaning "past end
    /// of buffer at capture time"; must be resolved (see `resolve_bot` in `record.rs`) before
    /// the header closes.
    pub bot: u32,

    /// The buffer's line count when this entry was captured. Only meaningful while `bot == 0`;
    /// used to compute the real `bot` once the mutation's net line-count delta is known.
    pub lcount: u32,

    /// Pre-image lines, `size == lines.len()`.
    pub lines: Vec<Vec<u8>>,
}

impl Entry {
    pub fn size(&self) -> u32 {
        self.lines.len() as u32
    }

    /// True if `bot` is still waiting on `resolve_bot`.
    pub fn bot_deferred(&self) -> bool {
        self.bot == 0
    }
}

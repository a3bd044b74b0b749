//! Big-endian primitive encode/decode helpers for the undo file wire format.

use super::FormatError;

pub(super) fn push_u8(into: &mut Vec<u8>, val: u8) {
    into.push(val);
}

pub(super) fn push_u16(into: &mut Vec<u8>, val: u16) {
    into.extend_from_slice(&val.to_be_bytes());
}

pub(super) fn push_u32(into: &mut Vec<u8>, val: u32) {
    into.extend_from_slice(&val.to_be_bytes());
}

pub(super) fn push_i64(into: &mut Vec<u8>, val: i64) {
    into.extend_from_slice(&val.to_be_bytes());
}

pub(super) fn push_bytes_with_len(into: &mut Vec<u8>, data: &[u8]) {
    push_u32(into, data.len() as u32);
    into.extend_from_slice(data);
}

/// A cursor over an already fully-read file (loaded in full rather than streamed - the
/// whole stream is read up front, then parsed from this in-memory slice).
pub(super) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(super) fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        if self.pos + n > self.data.len() {
            return Err(FormatError::Truncated);
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub(super) fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    pub(super) fn u16(&mut self) -> Result<u16, FormatError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(super) fn u32(&mut self) -> Result<u32, FormatError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes(b.try_into().unwrap()))
    }

    pub(super) fn i64(&mut self) -> Result<i64, FormatError> {
        let b = self.take(8)?;
        Ok(i64::from_be_bytes(b.try_into().unwrap()))
    }

    pub(super) fn bytes(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        self.take(n)
    }

    pub(super) fn bytes_with_len(&mut self) -> Result<Vec<u8>, FormatError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// `OptionalFields ::= (len(1) tag(1) payload(len))* 0x00`. Only tag `0x01` (the save-nr
    /// ordinal, in either the file header or a `Header`) is understood; any other tag is skipped
    /// so future extensions stay forward-compatible rather than rejected outright.
    pub(super) fn optional_fields(&mut self) -> Result<Option<u32>, FormatError> {
        let mut save_nr = None;
        loop {
            let len = self.u8()? as usize;
            if len == 0 {
                break;
            }
            let tag = self.u8()?;
            let payload = self.take(len)?;
            if tag == super::OPTIONAL_TAG_SAVE_NR && len == 4 {
                save_nr = Some(u32::from_be_bytes(payload.try_into().unwrap()));
            }
        }
        Ok(save_nr)
    }
}

pub(super) fn push_optional_save_nr(into: &mut Vec<u8>, save_nr: u32) {
    push_u8(into, 4);
    push_u8(into, super::OPTIONAL_TAG_SAVE_NR);
    push_u32(into, save_nr);
    push_u8(into, 0);
}

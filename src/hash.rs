//! Buffer hash: SHA-256 over each line followed by a NUL byte.
//!
//! Used both to stamp the undo file header and to validate, on load, that the file still
//! matches the buffer it claims to belong to.

use sha2::{Digest, Sha256};

use crate::collaborators::LineStore;

pub type BufferHash = [u8; 32];

pub fn hash_buffer<L: LineStore>(buffer: &L) -> BufferHash {
    let mut hasher = Sha256::new();
    for lnum in 1..=buffer.line_count() {
        hasher.update(buffer.get_line(lnum));
        hasher.update([0u8]);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn hash_is_order_and_content_sensitive() {
        let a = FakeLines(vec![b"hello".to_vec(), b"world".to_vec()]);
        let b = FakeLines(vec![b"world".to_vec(), b"hello".to_vec()]);
        let c = FakeLines(vec![b"hello".to_vec(), b"world".to_vec()]);

        assert_ne!(hash_buffer(&a), hash_buffer(&b));
        assert_eq!(hash_buffer(&a), hash_buffer(&c));
    }

    #[test]
    fn empty_buffer_hashes_to_empty_sha256() {
        let empty = FakeLines(vec![]);
        let expected: BufferHash = Sha256::new().finalize().into();
        assert_eq!(hash_buffer(&empty), expected);
    }
}

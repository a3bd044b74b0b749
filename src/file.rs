//! The byte-stream seam between [`crate::format`] and the real filesystem.
//!
//! Wrapping `std::fs::File` behind a trait means the serializer/deserializer can be exercised
//! against an in-memory double that records uncommitted writes and can simulate a crash between
//! durability barriers, without ever touching the real filesystem.

use std::fs::File;
use std::io;
#[cfg(not(unix))]
use std::io::{Read, Write};
use std::io::{Seek, SeekFrom};
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "tvos", target_os = "watchos"))]
use std::os::fd::AsRawFd;
#[cfg(unix)]
use std::os::unix::fs::FileExt;

pub trait UndoFile {
    fn stream_len(&mut self) -> io::Result<u64>;

    fn write_all_at(&mut self, data: &[u8], offset: u64) -> io::Result<()>;
    fn read_all_at(&mut self, buffer: &mut [u8], offset: u64) -> io::Result<()>;

    /// A durability barrier weaker than a full `fsync`: enough to enforce write ordering for a
    /// finalized block, not a guarantee every prior byte has reached the platter.
    fn write_barrier(&mut self) -> io::Result<()>;
    fn sync_data(&mut self) -> io::Result<()>;
}

impl UndoFile for File {
    fn stream_len(&mut self) -> io::Result<u64> {
        self.seek(SeekFrom::End(0))
    }

    fn write_all_at(&mut self, data: &[u8], offset: u64) -> io::Result<()> {
        #[cfg(unix)]
        <Self as FileExt>::write_all_at(self, data, offset)?;
        #[cfg(not(unix))]
        {
            self.seek(SeekFrom::Start(offset))?;
            self.write_all(data)?;
        }

        Ok(())
    }

    fn read_all_at(&mut self, buffer: &mut [u8], offset: u64) -> io::Result<()> {
        #[cfg(unix)]
        <Self as FileExt>::read_exact_at(self, buffer, offset)?;
        #[cfg(not(unix))]
        {
            self.seek(SeekFrom::Start(offset))?;
            self.read_exact(buffer)?;
        }

        Ok(())
    }

    fn write_barrier(&mut self) -> io::Result<()> {
        // fsync is very slow on Apple hardware; F_BARRIERFSYNC enforces the same write ordering
        // without the full cost, but std doesn't expose it, so libc is needed directly.
        #[cfg(any(target_os = "macos", target_os = "ios", target_os = "tvos", target_os = "watchos"))]
        {
            let ret = unsafe { libc::fcntl(self.as_raw_fd(), libc::F_BARRIERFSYNC) };
            if ret == -1 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        }

        #[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "tvos", target_os = "watchos")))]
        File::sync_data(self)
    }

    fn sync_data(&mut self) -> io::Result<()> {
        File::sync_data(self)
    }
}

/// An in-memory double for [`UndoFile`], used only under test to exercise the round-trip and
/// fault-injection scenarios without touching the real filesystem.
#[cfg(test)]
pub mod test {
    use std::io::ErrorKind;
    use std::mem::replace;

    use rand::prelude::*;

    use super::*;

    #[derive(Debug, Clone, Eq, PartialEq)]
    enum UncommittedEntry {
        Barrier,
        Write(usize, Vec<u8>),
    }

    /// Two uses: repeatable round-trip tests that never touch a real path, and simulating a
    /// crash partway through a write so the reader's rejection path can be exercised.
    #[derive(Debug, Clone, Default)]
    pub struct TestFile {
        committed: Vec<u8>,
        uncommitted: Vec<UncommittedEntry>,
        failure_rng: Option<(SmallRng, f64)>,
    }

    impl TestFile {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn new_faulty(seed: u64, failure_rate: f64) -> Self {
            TestFile {
                committed: vec![],
                uncommitted: vec![],
                failure_rng: Some((SmallRng::seed_from_u64(seed), failure_rate)),
            }
        }

        pub fn contents(&mut self) -> &[u8] {
            self.sync_safe();
            &self.committed
        }

        fn sync_safe(&mut self) {
            let writes = replace(&mut self.uncommitted, vec![]);
            for e in writes {
                let UncommittedEntry::Write(offset, write_data) = e else { continue };
                let end = offset + write_data.len();
                if self.committed.len() < end {
                    self.committed.resize(end, 0);
                }
                self.committed[offset..end].copy_from_slice(&write_data);
            }
        }

        fn sync_and_maybe_crash(&mut self) -> io::Result<()> {
            let Some((rng, crash)) = self.failure_rng.as_mut() else {
                self.sync_safe();
                return Ok(());
            };
            let per_write_crash_chance = *crash;

            let writes = replace(&mut self.uncommitted, vec![]);

            for block in writes.split(|e| *e == UncommittedEntry::Barrier) {
                if block.is_empty() {
                    continue;
                }

                let crash_here = if per_write_crash_chance > 0.0 {
                    !rng.gen_bool((1.0 - per_write_crash_chance).powi(block.len() as i32))
                } else {
                    false
                };

                for e in block {
                    let UncommittedEntry::Write(offset, write_data) = e else { panic!("unreachable") };
                    if write_data.is_empty() {
                        continue;
                    }

                    let mut offset = *offset;
                    let mut data = &write_data[..];

                    if crash_here && rng.gen_bool(0.2) {
                        if rng.gen_bool(0.8) {
                            continue;
                        } else {
                            let skip_start = rng.gen_range(0..data.len());
                            let skip_end = if skip_start < data.len() {
                                rng.gen_range(0..data.len() - skip_start)
                            } else {
                                0
                            };
                            offset += skip_start;
                            data = &data[skip_start..data.len() - skip_end];
                        }
                    }

                    let end = offset + data.len();
                    if self.committed.len() < end {
                        self.committed.resize(end, 0);
                    }
                    self.committed[offset..end].copy_from_slice(data);
                }

                if crash_here {
                    return Err(io::Error::from(ErrorKind::Other));
                }
            }

            Ok(())
        }
    }

    impl UndoFile for TestFile {
        fn stream_len(&mut self) -> io::Result<u64> {
            Ok(self.committed.len() as u64)
        }

        fn write_all_at(&mut self, write_data: &[u8], offset: u64) -> io::Result<()> {
            self.uncommitted
                .push(UncommittedEntry::Write(offset as usize, write_data.into()));
            Ok(())
        }

        fn read_all_at(&mut self, buffer: &mut [u8], offset: u64) -> io::Result<()> {
            buffer.fill(0);
            let mut last_read_pos = 0;

            let start_req = offset as usize;
            let end_req = start_req + buffer.len();

            if start_req < self.committed.len() {
                let end_committed = usize::min(self.committed.len(), end_req);
                buffer[..end_committed - start_req].copy_from_slice(&self.committed[start_req..end_committed]);
                last_read_pos = end_committed;
            }

            for e in self.uncommitted.iter() {
                let UncommittedEntry::Write(offset, data) = e else { continue };
                let slice_start = *offset;
                let slice_end = slice_start + data.len();
                if slice_start < end_req && slice_end > start_req {
                    let s = slice_start.max(start_req);
                    let e = slice_end.min(end_req);
                    buffer[s - start_req..e - start_req].copy_from_slice(&data[s - slice_start..e - slice_start]);
                    last_read_pos = last_read_pos.max(e);
                }
            }

            if last_read_pos < end_req {
                Err(io::Error::from(ErrorKind::UnexpectedEof))
            } else {
                Ok(())
            }
        }

        fn write_barrier(&mut self) -> io::Result<()> {
            self.uncommitted.push(UncommittedEntry::Barrier);
            Ok(())
        }

        fn sync_data(&mut self) -> io::Result<()> {
            self.sync_and_maybe_crash()
        }
    }

    #[test]
    fn smoke_test_testing_filesystem() {
        let mut file = TestFile::new();

        file.write_all_at(&[1, 2, 3], 0).unwrap();

        let mut buf = [0u8; 3];
        file.read_all_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, &[1, 2, 3]);
        file.sync_data().unwrap();

        let mut buf = [0u8; 3];
        file.read_all_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, &[1, 2, 3]);
    }

    #[test]
    fn write_until_crash() {
        for seed in 0..100 {
            let mut file = TestFile::new_faulty(seed, 0.003);

            for i in 0..255u8 {
                file.write_all_at(&[i, i], i as u64 * 2).unwrap();
            }

            let succeeded = file.sync_and_maybe_crash().is_ok();

            let resulting_data = file.contents();
            for (pos, i) in resulting_data.iter().enumerate() {
                if succeeded {
                    assert_eq!(*i, (pos / 2) as u8);
                } else {
                    assert!(*i == 0 || *i == (pos / 2) as u8);
                }
            }
        }
    }
}

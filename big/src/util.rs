//! Shared primitives: CRC32, a windowed file-in-file view, chunked copying,
//! and timestamp conversion.

use std::io::{Read, Result, Seek, SeekFrom, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const CHUNK_SIZE: usize = 4 * 1024;

pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// A read/write window onto a region of a larger seekable store, with its
/// own independent cursor. Mirrors the source's private windowed-stream
/// helper, reimplemented as an explicit owned struct instead of relying on
/// a standard-library-internal type.
///
/// Borrows the parent store by value (often itself a borrow, e.g. `&mut
/// File`); callers must not interleave reads against the same underlying
/// store across multiple live views without re-seeking each view first.
pub struct FileInFile<S> {
    store: S,
    offset: u64,
    size: u64,
    position: u64,
}

impl<S: Read + Seek> FileInFile<S> {
    pub fn new(store: S, offset: u64, size: u64) -> Self {
        FileInFile {
            store,
            offset,
            size,
            position: 0,
        }
    }

    fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.position)
    }
}

impl<S: Read + Seek> Read for FileInFile<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(remaining) as usize;
        self.store.seek(SeekFrom::Start(self.offset + self.position))?;
        let read = self.store.read(&mut buf[..want])?;
        self.position += read as u64;
        Ok(read)
    }
}

impl<S: Read + Seek> Seek for FileInFile<S> {
    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(p) => self.position as i64 + p,
            SeekFrom::End(p) => self.size as i64 + p,
        };
        self.position = new_pos.clamp(0, self.size as i64) as u64;
        Ok(self.position)
    }
}

/// Copies `size` bytes from `input` to `output` in fixed-size chunks,
/// matching the chunked streaming pattern used for zlib (de)compression.
pub fn copy_chunked<R: Read, W: Write>(mut input: R, mut output: W, mut size: u64) -> Result<u64> {
    let mut buf = [0u8; CHUNK_SIZE];
    let mut copied = 0u64;
    while size > 0 {
        let want = (buf.len() as u64).min(size) as usize;
        input.read_exact(&mut buf[..want])?;
        output.write_all(&buf[..want])?;
        copied += want as u64;
        size -= want as u64;
    }
    Ok(copied)
}

/// Converts a `u32` seconds-since-epoch timestamp (as stored in `.big`
/// headers) to a `SystemTime`.
pub fn timestamp_to_system_time(ts: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(ts as u64)
}

/// Converts a `SystemTime` back to a `u32` seconds-since-epoch timestamp,
/// saturating at `u32::MAX` for times far in the future.
pub fn system_time_to_timestamp(t: SystemTime) -> u32 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs().min(u32::MAX as u64) as u32,
        Err(_) => 0,
    }
}

/// One year, in seconds, used as the grace window for "implausibly
/// future-dated" timestamp validation.
pub const ONE_YEAR_SECS: u64 = 365 * 24 * 60 * 60;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn crc32_known_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn file_in_file_reads_window() {
        let data = b"0123456789abcdef".to_vec();
        let mut view = FileInFile::new(Cursor::new(data), 4, 6);
        let mut out = Vec::new();
        view.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"456789");
    }

    #[test]
    fn file_in_file_is_bounded() {
        let data = b"0123456789".to_vec();
        let mut view = FileInFile::new(Cursor::new(data), 0, 3);
        let mut out = Vec::new();
        view.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"012");
    }

    #[test]
    fn chunked_copy_round_trip() {
        let data = vec![7u8; CHUNK_SIZE * 3 + 17];
        let mut out = Cursor::new(Vec::new());
        let n = copy_chunked(Cursor::new(data.clone()), &mut out, data.len() as u64).unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(out.into_inner(), data);
    }

    #[test]
    fn timestamp_round_trip() {
        let ts = 1_700_000_000u32;
        let t = timestamp_to_system_time(ts);
        assert_eq!(system_time_to_timestamp(t), ts);
    }
}

// Licensed under the MIT License.

use std::io::{self, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bucket::{Bucket, BucketReader, BucketWriter};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Empty,
    Writing,
    Written,
    Disposed,
}

#[derive(Debug)]
struct State {
    stage: Stage,
    data: Vec<u8>,
    read_only: bool,
}

/// An appendable, in-memory [`Bucket`].
///
/// The writer accumulates bytes in a private buffer and publishes them atomically to
/// the store on `close`, so concurrent readers (which can only exist after the writer
/// has closed, per the `Bucket` contract) always see a fully-written byte string.
#[derive(Debug, Clone)]
pub struct MemoryBucket {
    inner: Arc<Mutex<State>>,
}

impl Default for MemoryBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBucket {
    /// Creates a new, empty memory bucket.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(State {
                stage: Stage::Empty,
                data: Vec::new(),
                read_only: false,
            })),
        }
    }

    /// Creates a memory bucket pre-populated with `data`, already in the written state.
    ///
    /// Used by migration to copy bytes out of a RAM store without going through the
    /// writer-stream API.
    #[must_use]
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State {
                stage: Stage::Written,
                data,
                read_only: false,
            })),
        }
    }

    /// Returns a snapshot copy of the committed bytes, or `None` before the first write.
    #[must_use]
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        let state = self.inner.lock();
        matches!(state.stage, Stage::Written).then(|| state.data.clone())
    }
}

impl Bucket for MemoryBucket {
    fn open_writer(&self) -> Result<Box<dyn BucketWriter>> {
        let mut state = self.inner.lock();
        match state.stage {
            Stage::Disposed => return Err(Error::Disposed),
            Stage::Writing | Stage::Written => return Err(Error::AlreadyOpen),
            Stage::Empty => {}
        }
        if state.read_only {
            return Err(Error::ReadOnly);
        }
        state.stage = Stage::Writing;
        Ok(Box::new(MemoryWriter {
            inner: Arc::clone(&self.inner),
            buf: Vec::new(),
            closed: false,
        }))
    }

    fn open_reader(&self) -> Result<Box<dyn BucketReader>> {
        let state = self.inner.lock();
        match state.stage {
            Stage::Disposed => Err(Error::Disposed),
            Stage::Empty | Stage::Writing => Err(Error::NotWrittenYet),
            Stage::Written => Ok(Box::new(MemoryReader {
                inner: Arc::clone(&self.inner),
                pos: 0,
            })),
        }
    }

    fn size(&self) -> u64 {
        self.inner.lock().data.len() as u64
    }

    fn is_read_only(&self) -> bool {
        self.inner.lock().read_only
    }

    fn set_read_only(&self) {
        self.inner.lock().read_only = true;
    }

    fn is_disposed(&self) -> bool {
        self.inner.lock().stage == Stage::Disposed
    }

    fn close(&self) {
        // Closing the bucket (as opposed to closing the writer stream) has no external
        // resource to release for an in-memory store; it is a no-op.
    }

    fn dispose(&self) {
        let mut state = self.inner.lock();
        state.stage = Stage::Disposed;
        state.data = Vec::new();
    }

    fn create_shadow(&self) -> Result<Box<dyn Bucket>> {
        let state = self.inner.lock();
        if state.stage == Stage::Disposed {
            return Err(Error::Disposed);
        }
        let shadow = Self::from_bytes(state.data.clone());
        shadow.set_read_only();
        Ok(Box::new(shadow))
    }

    fn is_ram_backed(&self) -> bool {
        true
    }
}

struct MemoryWriter {
    inner: Arc<Mutex<State>>,
    buf: Vec<u8>,
    closed: bool,
}

impl Write for MemoryWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::other(Error::Closed));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BucketWriter for MemoryWriter {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.inner.lock();
        state.data = std::mem::take(&mut self.buf);
        state.stage = Stage::Written;
        Ok(())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        let _ = BucketWriter::close(self);
    }
}

struct MemoryReader {
    inner: Arc<Mutex<State>>,
    pos: usize,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.inner.lock();
        if state.stage == Stage::Disposed {
            return Err(io::Error::other(Error::Disposed));
        }
        let available = state.data.len().saturating_sub(self.pos);
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&state.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl BucketReader for MemoryReader {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_writer_only() {
        let bucket = MemoryBucket::new();
        let _w = bucket.open_writer().unwrap();
        assert!(matches!(bucket.open_writer(), Err(Error::AlreadyOpen)));
    }

    #[test]
    fn reader_before_write_fails() {
        let bucket = MemoryBucket::new();
        assert!(matches!(bucket.open_reader(), Err(Error::NotWrittenYet)));
    }

    #[test]
    fn write_then_read_round_trips() {
        let bucket = MemoryBucket::new();
        let mut w = bucket.open_writer().unwrap();
        w.write_all(b"hello world").unwrap();
        w.close().unwrap();
        assert_eq!(bucket.size(), 11);

        let mut r = bucket.open_reader().unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn drop_without_close_still_publishes() {
        let bucket = MemoryBucket::new();
        {
            let mut w = bucket.open_writer().unwrap();
            w.write_all(b"abc").unwrap();
        }
        assert_eq!(bucket.size(), 3);
    }

    #[test]
    fn dispose_is_idempotent_and_clears_data() {
        let bucket = MemoryBucket::new();
        let mut w = bucket.open_writer().unwrap();
        w.write_all(b"xyz").unwrap();
        w.close().unwrap();
        bucket.dispose();
        bucket.dispose();
        assert!(bucket.is_disposed());
        assert_eq!(bucket.size(), 0);
    }

    #[test]
    fn read_only_latch_blocks_writer() {
        let bucket = MemoryBucket::new();
        bucket.set_read_only();
        assert!(matches!(bucket.open_writer(), Err(Error::ReadOnly)));
    }

    #[test]
    fn shadow_is_read_only_and_independent() {
        let bucket = MemoryBucket::new();
        let mut w = bucket.open_writer().unwrap();
        w.write_all(b"shadowed").unwrap();
        w.close().unwrap();

        let shadow = bucket.create_shadow().unwrap();
        assert!(shadow.is_read_only());
        assert_eq!(shadow.size(), 8);
        bucket.dispose();
        // The shadow owns an independent copy and survives the original's disposal.
        assert_eq!(shadow.size(), 8);
    }
}

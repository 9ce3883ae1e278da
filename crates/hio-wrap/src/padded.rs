// Licensed under the MIT License.

use std::io::{self, Read, Write};
use std::sync::Arc;

use hio_store::{Bucket, BucketReader, BucketWriter, Error, Result};
use parking_lot::Mutex;

/// The minimum padded size, in bytes, for [`PaddedBucket`]'s output.
pub const MIN_PADDED: u64 = 1024;

/// Rounds `len` up to the next power of two, floored at `min`.
#[must_use]
pub fn padded_length(len: u64, min: u64) -> u64 {
    len.max(min).next_power_of_two()
}

struct State {
    store: Box<dyn Bucket>,
    data_length: Option<u64>,
}

/// Pads the written payload with random bytes up to the next power of two (at least
/// [`MIN_PADDED`]), so the on-disk size does not leak the payload's exact length.
/// Readers only ever see the original `data_length` bytes.
#[derive(Clone)]
pub struct PaddedBucket {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for PaddedBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaddedBucket").finish_non_exhaustive()
    }
}

impl PaddedBucket {
    /// Wraps `store`, which must not have been written to yet.
    #[must_use]
    pub fn new(store: Box<dyn Bucket>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                store,
                data_length: None,
            })),
        }
    }

    /// Rebuilds a padded bucket around an already-written `store`, with the logical
    /// `data_length` recovered from the wire format rather than rediscovered by writing.
    #[must_use]
    pub(crate) fn from_resumed(store: Box<dyn Bucket>, data_length: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                store,
                data_length: Some(data_length),
            })),
        }
    }

    /// The logical length recorded so far, for the persistence layer's wire format.
    #[must_use]
    pub(crate) fn data_length(&self) -> Option<u64> {
        self.state.lock().data_length
    }
}

impl Bucket for PaddedBucket {
    fn open_writer(&self) -> Result<Box<dyn BucketWriter>> {
        let state = self.state.lock();
        let inner = state.store.open_writer()?;
        Ok(Box::new(PaddedWriter {
            state: Arc::clone(&self.state),
            inner,
            written: 0,
            closed: false,
        }))
    }

    fn open_reader(&self) -> Result<Box<dyn BucketReader>> {
        let state = self.state.lock();
        let data_length = state.data_length.ok_or(Error::NotWrittenYet)?;
        let inner = state.store.open_reader()?;
        Ok(Box::new(PaddedReader {
            inner,
            remaining: data_length,
        }))
    }

    fn size(&self) -> u64 {
        self.state.lock().data_length.unwrap_or(0)
    }

    fn is_read_only(&self) -> bool {
        self.state.lock().store.is_read_only()
    }

    fn set_read_only(&self) {
        self.state.lock().store.set_read_only();
    }

    fn is_disposed(&self) -> bool {
        self.state.lock().store.is_disposed()
    }

    fn close(&self) {
        self.state.lock().store.close();
    }

    fn dispose(&self) {
        self.state.lock().store.dispose();
    }

    fn create_shadow(&self) -> Result<Box<dyn Bucket>> {
        let state = self.state.lock();
        let data_length = state.data_length.ok_or(Error::NotWrittenYet)?;
        let shadow_store = state.store.create_shadow()?;
        Ok(Box::new(Self {
            state: Arc::new(Mutex::new(State {
                store: shadow_store,
                data_length: Some(data_length),
            })),
        }))
    }

    fn is_ram_backed(&self) -> bool {
        self.state.lock().store.is_ram_backed()
    }
}

struct PaddedWriter {
    state: Arc<Mutex<State>>,
    inner: Box<dyn BucketWriter>,
    written: u64,
    closed: bool,
}

impl Write for PaddedWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::other(Error::Closed));
        }
        let n = self.inner.write(data)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl BucketWriter for PaddedWriter {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let target = padded_length(self.written, MIN_PADDED);
        let mut padding_remaining = target - self.written;
        let mut chunk = [0_u8; 256];
        while padding_remaining > 0 {
            let n = (padding_remaining as usize).min(chunk.len());
            fastrand::fill(&mut chunk[..n]);
            self.inner.write_all(&chunk[..n])?;
            padding_remaining -= n as u64;
        }
        self.inner.close()?;
        self.state.lock().data_length = Some(self.written);
        Ok(())
    }
}

impl Drop for PaddedWriter {
    fn drop(&mut self) {
        let _ = BucketWriter::close(self);
    }
}

struct PaddedReader {
    inner: Box<dyn BucketReader>,
    remaining: u64,
}

impl Read for PaddedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let cap = self.remaining.min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..cap])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl BucketReader for PaddedReader {}

#[cfg(test)]
mod tests {
    use super::*;
    use hio_store::MemoryBucket;

    #[test]
    fn padded_length_rounds_up_and_floors_at_min() {
        assert_eq!(padded_length(0, MIN_PADDED), 1024);
        assert_eq!(padded_length(1000, MIN_PADDED), 1024);
        assert_eq!(padded_length(1025, MIN_PADDED), 2048);
    }

    #[test]
    fn reader_sees_only_logical_length() {
        let bucket = PaddedBucket::new(Box::new(MemoryBucket::new()));
        let mut w = bucket.open_writer().unwrap();
        w.write_all(b"payload").unwrap();
        w.close().unwrap();

        assert_eq!(bucket.size(), 7);
        let mut r = bucket.open_reader().unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");
    }

    #[test]
    fn underlying_store_is_padded_to_power_of_two() {
        let inner = MemoryBucket::new();
        let bucket = PaddedBucket::new(Box::new(inner.clone()));
        let mut w = bucket.open_writer().unwrap();
        w.write_all(&vec![1_u8; 5]).unwrap();
        w.close().unwrap();

        let padded_size = inner.size();
        assert!(padded_size.is_power_of_two());
        assert!(padded_size >= MIN_PADDED);
    }
}

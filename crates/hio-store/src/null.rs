// Licensed under the MIT License.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::bucket::{Bucket, BucketReader, BucketWriter};
use crate::error::{Error, Result};

/// A bucket that discards everything written to it.
///
/// Used as a placeholder where the `Bucket` contract is required but no bytes are
/// actually needed — e.g. tests that only care about the write path, or callers that
/// intentionally want to skip persisting a result. Writes still advance `size()` so
/// callers measuring throughput see realistic numbers.
#[derive(Debug, Clone)]
pub struct NullBucket {
    size: Arc<AtomicU64>,
    disposed: Arc<AtomicBool>,
}

impl Default for NullBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl NullBucket {
    /// Creates a new null bucket.
    #[must_use]
    pub fn new() -> Self {
        Self {
            size: Arc::new(AtomicU64::new(0)),
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Bucket for NullBucket {
    fn open_writer(&self) -> Result<Box<dyn BucketWriter>> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        Ok(Box::new(NullWriter {
            size: Arc::clone(&self.size),
        }))
    }

    fn open_reader(&self) -> Result<Box<dyn BucketReader>> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        Ok(Box::new(NullReader))
    }

    fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn set_read_only(&self) {}

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn close(&self) {}

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn create_shadow(&self) -> Result<Box<dyn Bucket>> {
        Ok(Box::new(self.clone()))
    }
}

struct NullWriter {
    size: Arc<AtomicU64>,
}

impl Write for NullWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.size.fetch_add(data.len() as u64, Ordering::AcqRel);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BucketWriter for NullWriter {
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct NullReader;

impl Read for NullReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl BucketReader for NullReader {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_advance_size_but_discard_bytes() {
        let bucket = NullBucket::new();
        let mut w = bucket.open_writer().unwrap();
        w.write_all(b"discarded").unwrap();
        assert_eq!(bucket.size(), 9);
    }

    #[test]
    fn reader_is_immediately_exhausted() {
        let bucket = NullBucket::new();
        let mut r = bucket.open_reader().unwrap();
        let mut buf = [0_u8; 8];
        assert_eq!(r.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn disposed_rejects_new_streams() {
        let bucket = NullBucket::new();
        bucket.dispose();
        assert!(matches!(bucket.open_writer(), Err(Error::Disposed)));
        assert!(matches!(bucket.open_reader(), Err(Error::Disposed)));
    }
}

// Licensed under the MIT License.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bucket::{Bucket, BucketReader, BucketWriter};
use crate::error::{Error, Result};

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    offset: u64,
    length: u64,
    disposed: AtomicBool,
}

/// A read-only [`Bucket`] view over `[offset, offset + length)` of a file.
///
/// Used by [`FileBucket::split`](crate::FileBucket) to carve a large file into
/// independently addressable chunks without copying bytes. The view's data already
/// exists at construction time, so it behaves as if permanently in the written state;
/// `open_writer` always fails with [`Error::ReadOnly`].
#[derive(Debug, Clone)]
pub struct ReadOnlySliceBucket {
    inner: Arc<Inner>,
}

impl ReadOnlySliceBucket {
    /// Creates a slice view over `[offset, offset + length)` of the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, offset: u64, length: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.into(),
                offset,
                length,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// The path this slice is carved from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

impl Bucket for ReadOnlySliceBucket {
    fn open_writer(&self) -> Result<Box<dyn BucketWriter>> {
        Err(Error::ReadOnly)
    }

    fn open_reader(&self) -> Result<Box<dyn BucketReader>> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        let mut file = File::open(&self.inner.path)?;
        file.seek(SeekFrom::Start(self.inner.offset))?;
        Ok(Box::new(SliceReader {
            file,
            remaining: self.inner.length,
        }))
    }

    fn size(&self) -> u64 {
        self.inner.length
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn set_read_only(&self) {}

    fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    fn close(&self) {}

    fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Release);
    }

    fn create_shadow(&self) -> Result<Box<dyn Bucket>> {
        Ok(Box::new(self.clone()))
    }
}

struct SliceReader {
    file: File,
    remaining: u64,
}

impl Read for SliceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let cap = self.remaining.min(buf.len() as u64) as usize;
        let n = self.file.read(&mut buf[..cap])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl BucketReader for SliceReader {}

// Licensed under the MIT License.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

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
    size: u64,
    read_only: bool,
    reader_count: usize,
}

/// A file-backed [`Bucket`].
///
/// The writer streams into a sibling temp path (`<path>.tmp-<pid>`) and atomically
/// renames it onto `path` when closed, so a reader can never observe a partially
/// written file. Concurrent readers and a single writer cannot coexist: opening a
/// writer while readers are outstanding returns [`Error::ConcurrentWriter`].
#[derive(Debug, Clone)]
pub struct FileBucket {
    inner: Arc<FileBucketInner>,
}

#[derive(Debug)]
struct FileBucketInner {
    path: PathBuf,
    state: Mutex<State>,
}

impl FileBucket {
    /// Creates a bucket backed by a not-yet-existing file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(FileBucketInner {
                path: path.into(),
                state: Mutex::new(State {
                    stage: Stage::Empty,
                    size: 0,
                    read_only: false,
                    reader_count: 0,
                }),
            }),
        }
    }

    /// Opens an existing file at `path` as an already-written, read-only bucket.
    ///
    /// # Errors
    ///
    /// Returns the `io::Error` from the metadata lookup, wrapped as
    /// [`Error::Io`](crate::Error::Io), if `path` does not exist or cannot be read.
    pub fn from_existing(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let size = fs::metadata(&path)?.len();
        Ok(Self {
            inner: Arc::new(FileBucketInner {
                path,
                state: Mutex::new(State {
                    stage: Stage::Written,
                    size,
                    read_only: true,
                    reader_count: 0,
                }),
            }),
        })
    }

    /// The path this bucket is (or will be) backed by.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Whether a writer has ever committed bytes to this bucket.
    ///
    /// Used by the persistence layer's base-file serialization, which records this as
    /// the "closed" flag: a bucket serialized before its first writer commits has
    /// nothing on disk yet to resume from.
    #[must_use]
    pub fn is_written(&self) -> bool {
        self.inner.state.lock().stage == Stage::Written
    }

    /// Splits the committed bytes into consecutive read-only chunks of at most
    /// `chunk_size` bytes each, without copying data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotWrittenYet`] if no writer has committed yet, and
    /// [`Error::InvalidConfig`] if `chunk_size` is zero.
    pub fn split(&self, chunk_size: u64) -> Result<Vec<crate::ReadOnlySliceBucket>> {
        if chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be nonzero".to_owned()));
        }
        let state = self.inner.state.lock();
        if state.stage != Stage::Written {
            return Err(Error::NotWrittenYet);
        }
        let total = state.size;
        drop(state);

        let mut chunks = Vec::new();
        let mut offset = 0_u64;
        while offset < total {
            let length = chunk_size.min(total - offset);
            chunks.push(crate::ReadOnlySliceBucket::new(&self.inner.path, offset, length));
            offset += length;
        }
        Ok(chunks)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .inner
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".tmp-{}", std::process::id()));
        self.inner.path.with_file_name(name)
    }
}

impl Bucket for FileBucket {
    fn open_writer(&self) -> Result<Box<dyn BucketWriter>> {
        let mut state = self.inner.state.lock();
        match state.stage {
            Stage::Disposed => return Err(Error::Disposed),
            Stage::Writing => return Err(Error::AlreadyOpen),
            Stage::Written if state.reader_count > 0 => return Err(Error::ConcurrentWriter),
            Stage::Written | Stage::Empty => {}
        }
        if state.read_only {
            return Err(Error::ReadOnly);
        }
        let tmp_path = self.tmp_path();
        let file = File::create(&tmp_path)?;
        state.stage = Stage::Writing;
        trace!(path = %self.inner.path.display(), tmp = %tmp_path.display(), "opened file bucket writer");
        Ok(Box::new(FileBucketWriter {
            inner: Arc::clone(&self.inner),
            tmp_path,
            file,
            written: 0,
            closed: false,
        }))
    }

    fn open_reader(&self) -> Result<Box<dyn BucketReader>> {
        let mut state = self.inner.state.lock();
        match state.stage {
            Stage::Disposed => return Err(Error::Disposed),
            Stage::Empty | Stage::Writing => return Err(Error::NotWrittenYet),
            Stage::Written => {}
        }
        let file = File::open(&self.inner.path)?;
        state.reader_count += 1;
        Ok(Box::new(FileBucketReader {
            inner: Arc::clone(&self.inner),
            file,
        }))
    }

    fn size(&self) -> u64 {
        self.inner.state.lock().size
    }

    fn is_read_only(&self) -> bool {
        self.inner.state.lock().read_only
    }

    fn set_read_only(&self) {
        self.inner.state.lock().read_only = true;
    }

    fn is_disposed(&self) -> bool {
        self.inner.state.lock().stage == Stage::Disposed
    }

    fn close(&self) {}

    fn dispose(&self) {
        let mut state = self.inner.state.lock();
        if state.stage == Stage::Disposed {
            return;
        }
        state.stage = Stage::Disposed;
        state.size = 0;
        if let Err(err) = fs::remove_file(&self.inner.path) {
            if err.kind() != io::ErrorKind::NotFound {
                debug!(path = %self.inner.path.display(), %err, "failed to remove disposed file bucket");
            }
        }
    }

    fn create_shadow(&self) -> Result<Box<dyn Bucket>> {
        let state = self.inner.state.lock();
        if state.stage == Stage::Disposed {
            return Err(Error::Disposed);
        }
        let shadow = Self::from_existing(&self.inner.path)?;
        Ok(Box::new(shadow))
    }
}

struct FileBucketWriter {
    inner: Arc<FileBucketInner>,
    tmp_path: PathBuf,
    file: File,
    written: u64,
    closed: bool,
}

impl Write for FileBucketWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::other(Error::Closed));
        }
        let n = self.file.write(data)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl BucketWriter for FileBucketWriter {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.file.flush()?;
        self.file.sync_all()?;
        fs::rename(&self.tmp_path, &self.inner.path)?;
        let mut state = self.inner.state.lock();
        state.size = self.written;
        state.stage = Stage::Written;
        debug!(path = %self.inner.path.display(), size = self.written, "file bucket writer committed");
        Ok(())
    }
}

impl Drop for FileBucketWriter {
    fn drop(&mut self) {
        let _ = BucketWriter::close(self);
    }
}

struct FileBucketReader {
    inner: Arc<FileBucketInner>,
    file: File,
}

impl Read for FileBucketReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl BucketReader for FileBucketReader {}

impl Drop for FileBucketReader {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.reader_count = state.reader_count.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_renames_into_place_on_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bucket.dat");
        let bucket = FileBucket::new(&path);
        let mut w = bucket.open_writer().unwrap();
        w.write_all(b"persisted").unwrap();
        assert!(!path.exists());
        w.close().unwrap();
        assert!(path.exists());
        assert_eq!(bucket.size(), 9);
    }

    #[test]
    fn writer_blocked_while_readers_outstanding() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bucket.dat");
        let bucket = FileBucket::new(&path);
        let mut w = bucket.open_writer().unwrap();
        w.write_all(b"data").unwrap();
        w.close().unwrap();

        let _reader = bucket.open_reader().unwrap();
        assert!(matches!(bucket.open_writer(), Err(Error::ConcurrentWriter)));
    }

    #[test]
    fn dispose_removes_backing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bucket.dat");
        let bucket = FileBucket::new(&path);
        let mut w = bucket.open_writer().unwrap();
        w.write_all(b"gone").unwrap();
        w.close().unwrap();

        bucket.dispose();
        assert!(!path.exists());
        assert!(bucket.is_disposed());
    }

    #[test]
    fn split_carves_consecutive_chunks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bucket.dat");
        let bucket = FileBucket::new(&path);
        let mut w = bucket.open_writer().unwrap();
        w.write_all(b"0123456789").unwrap();
        w.close().unwrap();

        let chunks = bucket.split(4).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].size(), 4);
        assert_eq!(chunks[1].size(), 4);
        assert_eq!(chunks[2].size(), 2);
    }

    #[test]
    fn from_existing_is_read_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preexisting.dat");
        fs::write(&path, b"already here").unwrap();

        let bucket = FileBucket::from_existing(&path).unwrap();
        assert!(bucket.is_read_only());
        assert_eq!(bucket.size(), 12);
    }
}

// Licensed under the MIT License.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::rab::{Rab, RabLock};

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    size: u64,
    read_only: AtomicBool,
    disposed: AtomicBool,
    pool: Mutex<Vec<File>>,
    lock_count: AtomicUsize,
}

/// A fixed-size [`Rab`] backed by a single file, addressed with positional I/O through a
/// small pool of reusable file descriptors.
///
/// Descriptors are checked out of the pool for the duration of a single `pread`/`pwrite`
/// call and returned afterward, so concurrent callers each get their own descriptor
/// (growing the pool) rather than serializing on one shared seek position.
#[derive(Debug, Clone)]
pub struct FileRab {
    inner: Arc<Inner>,
}

impl FileRab {
    /// Creates a new file RAB of the given fixed size, truncating or creating `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file cannot be created or sized.
    pub fn create(path: impl Into<PathBuf>, size: u64) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(size)?;
        Ok(Self {
            inner: Arc::new(Inner {
                path,
                size,
                read_only: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                pool: Mutex::new(vec![file]),
                lock_count: AtomicUsize::new(0),
            }),
        })
    }

    /// Opens an existing file of known size as a file RAB.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if `path` cannot be opened.
    pub fn open_existing(path: impl Into<PathBuf>, size: u64, read_only: bool) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().read(true).write(!read_only).open(&path)?;
        Ok(Self {
            inner: Arc::new(Inner {
                path,
                size,
                read_only: AtomicBool::new(read_only),
                disposed: AtomicBool::new(false),
                pool: Mutex::new(vec![file]),
                lock_count: AtomicUsize::new(0),
            }),
        })
    }

    /// The path backing this RAB.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    fn acquire(&self) -> Result<File> {
        let mut pool = self.inner.pool.lock();
        if let Some(file) = pool.pop() {
            return Ok(file);
        }
        drop(pool);
        let file = OpenOptions::new()
            .read(true)
            .write(!self.inner.read_only.load(Ordering::Acquire))
            .open(&self.inner.path)?;
        Ok(file)
    }

    fn release(&self, file: File) {
        self.inner.pool.lock().push(file);
    }
}

impl Rab for FileRab {
    fn size(&self) -> u64 {
        self.inner.size
    }

    fn pread(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        let end = offset.checked_add(buf.len() as u64).ok_or(Error::OutOfBounds {
            offset: i64::try_from(offset).unwrap_or(i64::MAX),
            length: buf.len(),
            size: self.inner.size,
        })?;
        if end > self.inner.size {
            return Err(Error::OutOfBounds {
                offset: i64::try_from(offset).unwrap_or(i64::MAX),
                length: buf.len(),
                size: self.inner.size,
            });
        }
        let mut file = self.acquire()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        self.release(file);
        Ok(())
    }

    fn pwrite(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        if self.inner.read_only.load(Ordering::Acquire) {
            return Err(Error::ReadOnly);
        }
        let end = offset.checked_add(buf.len() as u64).ok_or(Error::OutOfBounds {
            offset: i64::try_from(offset).unwrap_or(i64::MAX),
            length: buf.len(),
            size: self.inner.size,
        })?;
        if end > self.inner.size {
            return Err(Error::OutOfBounds {
                offset: i64::try_from(offset).unwrap_or(i64::MAX),
                length: buf.len(),
                size: self.inner.size,
            });
        }
        let mut file = self.acquire()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        self.release(file);
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.inner.read_only.load(Ordering::Acquire)
    }

    fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    fn lock_open(&self) -> Result<RabLock> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        self.inner.lock_count.fetch_add(1, Ordering::AcqRel);
        let inner = Arc::clone(&self.inner);
        Ok(RabLock::new(move || {
            inner.lock_count.fetch_sub(1, Ordering::AcqRel);
        }))
    }

    fn close(&self) {
        self.inner.pool.lock().clear();
    }

    fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Release);
        self.inner.pool.lock().clear();
        let _ = std::fs::remove_file(&self.inner.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pwrite_then_pread_round_trips() {
        let dir = tempdir().unwrap();
        let rab = FileRab::create(dir.path().join("rab.dat"), 16).unwrap();
        rab.pwrite(4, b"data").unwrap();
        let mut buf = [0_u8; 4];
        rab.pread(4, &mut buf).unwrap();
        assert_eq!(&buf, b"data");
    }

    #[test]
    fn out_of_bounds_rejected() {
        let dir = tempdir().unwrap();
        let rab = FileRab::create(dir.path().join("rab.dat"), 8).unwrap();
        let mut buf = [0_u8; 4];
        assert!(matches!(rab.pread(6, &mut buf), Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn dispose_removes_file_and_blocks_io() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rab.dat");
        let rab = FileRab::create(&path, 8).unwrap();
        rab.dispose();
        assert!(!path.exists());
        assert!(matches!(rab.pwrite(0, b"x"), Err(Error::Disposed)));
    }

    #[test]
    fn concurrent_descriptors_do_not_interfere() {
        let dir = tempdir().unwrap();
        let rab = FileRab::create(dir.path().join("rab.dat"), 16).unwrap();
        let a = rab.acquire().unwrap();
        let b = rab.acquire().unwrap();
        rab.release(a);
        rab.release(b);
        assert_eq!(rab.inner.pool.lock().len(), 2);
    }
}

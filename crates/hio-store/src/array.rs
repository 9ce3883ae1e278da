// Licensed under the MIT License.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::rab::{Rab, RabLock};

#[derive(Debug)]
struct Inner {
    data: RwLock<Vec<u8>>,
    read_only: AtomicBool,
    disposed: AtomicBool,
    lock_count: AtomicUsize,
}

/// A fixed-size, in-memory [`Rab`].
///
/// Size is set at construction and never changes. Backed by a single `Vec<u8>` of that
/// exact length.
#[derive(Debug, Clone)]
pub struct ArrayRab {
    inner: Arc<Inner>,
}

impl ArrayRab {
    /// Creates a new, zero-filled array RAB of the given size.
    #[must_use]
    pub fn new(size: u64) -> Self {
        Self::from_bytes(vec![0_u8; usize::try_from(size).unwrap_or(usize::MAX)])
    }

    /// Creates an array RAB pre-populated with `data`; its size is fixed at `data.len()`.
    #[must_use]
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Inner {
                data: RwLock::new(data),
                read_only: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                lock_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Returns a copy of the current bytes, used by migration to move data into a
    /// successor store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if already disposed.
    pub fn copy_out(&self) -> Result<Vec<u8>> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        Ok(self.inner.data.read().clone())
    }
}

impl Rab for ArrayRab {
    fn size(&self) -> u64 {
        self.inner.data.read().len() as u64
    }

    fn pread(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        let data = self.inner.data.read();
        let size = data.len() as u64;
        let end = offset.checked_add(buf.len() as u64).ok_or(Error::OutOfBounds {
            offset: i64::try_from(offset).unwrap_or(i64::MAX),
            length: buf.len(),
            size,
        })?;
        if end > size {
            return Err(Error::OutOfBounds {
                offset: i64::try_from(offset).unwrap_or(i64::MAX),
                length: buf.len(),
                size,
            });
        }
        let start = offset as usize;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }

    fn pwrite(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        if self.inner.read_only.load(Ordering::Acquire) {
            return Err(Error::ReadOnly);
        }
        let mut data = self.inner.data.write();
        let size = data.len() as u64;
        let end = offset.checked_add(buf.len() as u64).ok_or(Error::OutOfBounds {
            offset: i64::try_from(offset).unwrap_or(i64::MAX),
            length: buf.len(),
            size,
        })?;
        if end > size {
            return Err(Error::OutOfBounds {
                offset: i64::try_from(offset).unwrap_or(i64::MAX),
                length: buf.len(),
                size,
            });
        }
        let start = offset as usize;
        data[start..start + buf.len()].copy_from_slice(buf);
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

    fn close(&self) {}

    fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Release);
        self.inner.data.write().clear();
    }
}

/// Sets the read-only latch on an array RAB.
///
/// Not part of the [`Rab`] trait, which has no setter of its own; exposed here for
/// callers that convert a bucket into a RAB and want to carry over its read-only state.
impl ArrayRab {
    /// Marks this RAB read-only. Monotonic: once set, never cleared.
    pub fn set_read_only(&self) {
        self.inner.read_only.store(true, Ordering::Release);
    }
}

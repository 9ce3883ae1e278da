// Licensed under the MIT License.

use std::fmt::Debug;

use crate::error::Result;

/// A fixed-size byte container supporting positional (offset-addressed) I/O.
///
/// Size is immutable after construction. Reads and writes must lie fully within `[0, size)`.
/// Dispose happens at most once and supersedes close. Locks acquired via [`lock_open`](Rab::lock_open)
/// are released in LIFO order with respect to their acquisition count.
pub trait Rab: Debug + Send + Sync {
    /// The fixed size of this container, set at construction.
    fn size(&self) -> u64;

    /// Reads exactly `buf.len()` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`](crate::Error::OutOfBounds) if `offset + buf.len() > size()`
    /// or the read would otherwise exceed the fixed size, and
    /// [`Error::Disposed`](crate::Error::Disposed) if disposed mid-flight.
    fn pread(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes `buf` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOnly`](crate::Error::ReadOnly) if latched read-only,
    /// [`Error::OutOfBounds`](crate::Error::OutOfBounds) if `offset + buf.len() > size()`, and
    /// [`Error::Disposed`](crate::Error::Disposed) if disposed mid-flight.
    fn pwrite(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Whether the read-only latch has been set.
    fn is_read_only(&self) -> bool;

    /// Whether this container has been disposed.
    fn is_disposed(&self) -> bool;

    /// Acquires a scoped lock that keeps the underlying resource (e.g. a file descriptor)
    /// resident for as long as the returned guard lives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`](crate::Error::Disposed) if already disposed.
    fn lock_open(&self) -> Result<RabLock>;

    /// Releases external resources, keeping the data. Idempotent.
    fn close(&self);

    /// Releases the underlying data. Idempotent and never fails; even while a lock is held,
    /// dispose must terminate the underlying resource cleanly, though a lock holder's mid-flight
    /// read or write may subsequently return [`Error::Disposed`](crate::Error::Disposed).
    fn dispose(&self);
}

/// A scoped handle returned by [`Rab::lock_open`].
///
/// Dropping the guard releases the lock. Guards do not implement `Clone`; reacquire via
/// `lock_open` to obtain another.
pub struct RabLock {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl RabLock {
    /// Constructs a lock guard from a release callback, invoked exactly once on drop.
    #[must_use]
    pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Debug for RabLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabLock").finish_non_exhaustive()
    }
}

impl Drop for RabLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

// Licensed under the MIT License.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hio_store::{Bucket, BucketReader, BucketWriter, Rab, RabLock, Result};
use tracing::debug;

struct Inner<T> {
    store: T,
    commit_id: u64,
    flagged: AtomicBool,
    really_disposed: AtomicBool,
}

/// Wraps a [`Bucket`] so `dispose()` only flags it for later release; the actual
/// release happens when a persistent-temp manager calls
/// [`real_dispose`](Self::real_dispose) after a checkpoint commits.
///
/// `commit_id` records the transaction the bucket was created under — transient
/// bookkeeping recovered from the manager's own state on resume, not persisted by this
/// wrapper itself.
#[derive(Clone)]
pub struct DelayedDisposeBucket {
    inner: Arc<Inner<Box<dyn Bucket>>>,
}

impl std::fmt::Debug for DelayedDisposeBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedDisposeBucket")
            .field("commit_id", &self.inner.commit_id)
            .field("flagged", &self.inner.flagged.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl DelayedDisposeBucket {
    /// Wraps `store`, recording `commit_id` as the transaction it was created under.
    #[must_use]
    pub fn new(store: Box<dyn Bucket>, commit_id: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                commit_id,
                flagged: AtomicBool::new(false),
                really_disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Rebuilds a delayed-dispose bucket around `store`, with the commit id and
    /// disposal flag recovered from the wire format rather than starting fresh.
    #[must_use]
    pub(crate) fn from_resumed(store: Box<dyn Bucket>, commit_id: u64, flagged: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                commit_id,
                flagged: AtomicBool::new(flagged),
                really_disposed: AtomicBool::new(false),
            }),
        }
    }

    /// The commit id this bucket was created under.
    #[must_use]
    pub fn commit_id(&self) -> u64 {
        self.inner.commit_id
    }

    /// Whether this bucket is flagged for disposal but has not yet actually been
    /// released; the condition [`finish_delayed_free`](https://docs.rs/hio-persist)
    /// checks for each item in a grabbed batch.
    #[must_use]
    pub fn to_dispose(&self) -> bool {
        self.inner.flagged.load(Ordering::Acquire) && !self.inner.really_disposed.load(Ordering::Acquire)
    }

    /// Actually releases the underlying store. Idempotent.
    pub fn real_dispose(&self) {
        if self.inner.really_disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(commit_id = self.inner.commit_id, "delayed-dispose bucket really disposing");
        self.inner.store.dispose();
    }
}

impl Bucket for DelayedDisposeBucket {
    fn open_writer(&self) -> Result<Box<dyn BucketWriter>> {
        self.inner.store.open_writer()
    }

    fn open_reader(&self) -> Result<Box<dyn BucketReader>> {
        self.inner.store.open_reader()
    }

    fn size(&self) -> u64 {
        self.inner.store.size()
    }

    fn is_read_only(&self) -> bool {
        self.inner.store.is_read_only()
    }

    fn set_read_only(&self) {
        self.inner.store.set_read_only();
    }

    fn is_disposed(&self) -> bool {
        self.inner.flagged.load(Ordering::Acquire) || self.inner.store.is_disposed()
    }

    fn close(&self) {
        self.inner.store.close();
    }

    fn dispose(&self) {
        self.inner.flagged.store(true, Ordering::Release);
    }

    fn create_shadow(&self) -> Result<Box<dyn Bucket>> {
        self.inner.store.create_shadow()
    }

    fn is_ram_backed(&self) -> bool {
        self.inner.store.is_ram_backed()
    }
}

/// Wraps a [`Rab`] with the same delayed-dispose semantics as [`DelayedDisposeBucket`].
#[derive(Clone)]
pub struct DelayedDisposeRab {
    inner: Arc<Inner<Box<dyn Rab>>>,
}

impl std::fmt::Debug for DelayedDisposeRab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedDisposeRab")
            .field("commit_id", &self.inner.commit_id)
            .field("flagged", &self.inner.flagged.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl DelayedDisposeRab {
    /// Wraps `store`, recording `commit_id` as the transaction it was created under.
    #[must_use]
    pub fn new(store: Box<dyn Rab>, commit_id: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                commit_id,
                flagged: AtomicBool::new(false),
                really_disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Rebuilds a delayed-dispose RAB around `store`, with the commit id and disposal
    /// flag recovered from the wire format rather than starting fresh.
    #[must_use]
    pub(crate) fn from_resumed(store: Box<dyn Rab>, commit_id: u64, flagged: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                commit_id,
                flagged: AtomicBool::new(flagged),
                really_disposed: AtomicBool::new(false),
            }),
        }
    }

    /// The commit id this RAB was created under.
    #[must_use]
    pub fn commit_id(&self) -> u64 {
        self.inner.commit_id
    }

    /// Whether this RAB is flagged for disposal but has not yet actually been released.
    #[must_use]
    pub fn to_dispose(&self) -> bool {
        self.inner.flagged.load(Ordering::Acquire) && !self.inner.really_disposed.load(Ordering::Acquire)
    }

    /// Actually releases the underlying store. Idempotent.
    pub fn real_dispose(&self) {
        if self.inner.really_disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(commit_id = self.inner.commit_id, "delayed-dispose rab really disposing");
        self.inner.store.dispose();
    }
}

impl Rab for DelayedDisposeRab {
    fn size(&self) -> u64 {
        self.inner.store.size()
    }

    fn pread(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if self.inner.really_disposed.load(Ordering::Acquire) {
            return Err(hio_store::Error::Disposed);
        }
        self.inner.store.pread(offset, buf)
    }

    fn pwrite(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if self.inner.really_disposed.load(Ordering::Acquire) {
            return Err(hio_store::Error::Disposed);
        }
        self.inner.store.pwrite(offset, buf)
    }

    fn is_read_only(&self) -> bool {
        self.inner.store.is_read_only()
    }

    fn is_disposed(&self) -> bool {
        self.inner.flagged.load(Ordering::Acquire) || self.inner.store.is_disposed()
    }

    fn lock_open(&self) -> Result<RabLock> {
        self.inner.store.lock_open()
    }

    fn close(&self) {
        self.inner.store.close();
    }

    fn dispose(&self) {
        self.inner.flagged.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hio_store::MemoryBucket;

    #[test]
    fn dispose_flags_without_releasing_until_real_dispose() {
        let store = MemoryBucket::new();
        let wrapped = DelayedDisposeBucket::new(Box::new(store.clone()), 5);

        wrapped.dispose();
        assert!(wrapped.is_disposed());
        assert!(wrapped.to_dispose());
        assert!(!store.is_disposed());

        wrapped.real_dispose();
        assert!(!wrapped.to_dispose());
        assert!(store.is_disposed());
    }

    #[test]
    fn real_dispose_is_idempotent() {
        let store = MemoryBucket::new();
        let wrapped = DelayedDisposeBucket::new(Box::new(store), 1);
        wrapped.dispose();
        wrapped.real_dispose();
        wrapped.real_dispose();
        assert!(!wrapped.to_dispose());
    }
}

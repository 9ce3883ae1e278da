// Licensed under the MIT License.

use hio_store::{Bucket, BucketReader, BucketWriter, Result};

/// Wraps a [`Bucket`] and suppresses `dispose()` entirely.
///
/// Used when the wrapped store's lifetime is owned elsewhere — e.g. a caller borrowing
/// a bucket it must not be allowed to tear down.
#[derive(Debug, Clone)]
pub struct NoDisposeBucket {
    inner: std::sync::Arc<Box<dyn Bucket>>,
}

impl NoDisposeBucket {
    /// Wraps `store`, suppressing any `dispose()` calls made through this handle.
    #[must_use]
    pub fn new(store: Box<dyn Bucket>) -> Self {
        Self {
            inner: std::sync::Arc::new(store),
        }
    }
}

impl Bucket for NoDisposeBucket {
    fn open_writer(&self) -> Result<Box<dyn BucketWriter>> {
        self.inner.open_writer()
    }

    fn open_reader(&self) -> Result<Box<dyn BucketReader>> {
        self.inner.open_reader()
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    fn set_read_only(&self) {
        self.inner.set_read_only();
    }

    fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    fn close(&self) {
        self.inner.close();
    }

    fn dispose(&self) {
        // Lifetime of the wrapped store is owned elsewhere; disposal through this
        // handle is intentionally a no-op.
    }

    fn create_shadow(&self) -> Result<Box<dyn Bucket>> {
        self.inner.create_shadow()
    }

    fn is_ram_backed(&self) -> bool {
        self.inner.is_ram_backed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hio_store::MemoryBucket;

    #[test]
    fn dispose_is_suppressed() {
        let store = MemoryBucket::new();
        let wrapped = NoDisposeBucket::new(Box::new(store.clone()));
        wrapped.dispose();
        assert!(!wrapped.is_disposed());
        assert!(!store.is_disposed());
    }

    #[test]
    fn other_operations_forward() {
        use std::io::Write;

        let store = MemoryBucket::new();
        let wrapped = NoDisposeBucket::new(Box::new(store));
        let mut w = wrapped.open_writer().unwrap();
        w.write_all(b"abc").unwrap();
        w.close().unwrap();
        assert_eq!(wrapped.size(), 3);
    }
}

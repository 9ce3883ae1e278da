// Licensed under the MIT License.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use hio_store::{Bucket, BucketReader, Error};
use tracing::trace;

struct Shared {
    store: Box<dyn Bucket>,
    refcount: AtomicUsize,
    closed: AtomicBool,
    dispose_requested: AtomicBool,
    disposed_once: AtomicBool,
}

impl Shared {
    fn release_one(&self) {
        let prev = self.refcount.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 && self.dispose_requested.load(Ordering::Acquire) {
            self.dispose_once();
        }
    }

    fn dispose_once(&self) {
        if self.disposed_once.swap(true, Ordering::AcqRel) {
            return;
        }
        trace!("shared reader source disposing underlying store");
        self.store.dispose();
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("refcount", &self.refcount.load(Ordering::Acquire))
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// A refcounted wrapper sharing one immutable, already-written store across many
/// independent readers.
///
/// No output streams: the inner store must already be fully written. When the last
/// outstanding reader is released after [`dispose`](Self::dispose) has been requested,
/// the underlying store is disposed exactly once.
#[derive(Debug, Clone)]
pub struct SharedReaderSource {
    shared: Arc<Shared>,
}

impl SharedReaderSource {
    /// Wraps `store`, which must already have been fully written.
    #[must_use]
    pub fn new(store: Box<dyn Bucket>) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                refcount: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                dispose_requested: AtomicBool::new(false),
                disposed_once: AtomicBool::new(false),
            }),
        }
    }

    /// Opens a new reader handle, or `None` if the wrapper has been closed.
    ///
    /// # Errors
    ///
    /// Returns whatever error the inner store's `open_reader` returns.
    pub fn get_reader(&self) -> Option<hio_store::Result<SharedReaderHandle>> {
        if self.shared.closed.load(Ordering::Acquire) {
            return None;
        }
        self.shared.refcount.fetch_add(1, Ordering::AcqRel);
        match self.shared.store.open_reader() {
            Ok(reader) => Some(Ok(SharedReaderHandle {
                shared: Arc::clone(&self.shared),
                reader,
                released: AtomicBool::new(false),
            })),
            Err(err) => {
                self.shared.release_one();
                Some(Err(err))
            }
        }
    }

    /// How many readers are currently outstanding.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.shared.refcount.load(Ordering::Acquire)
    }

    /// Prevents new readers from being opened, and disposes the underlying store
    /// immediately if none are outstanding, or as soon as the last one releases
    /// otherwise.
    pub fn dispose(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.dispose_requested.store(true, Ordering::Release);
        if self.shared.refcount.load(Ordering::Acquire) == 0 {
            self.shared.dispose_once();
        }
    }

    /// Prevents new readers from being opened without disposing the underlying store.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

/// A single reader obtained from [`SharedReaderSource::get_reader`].
///
/// Dropping the handle releases it; calling [`release`](Self::release) explicitly does
/// the same and is offered for callers that want the release to happen at a specific
/// point rather than at scope exit.
pub struct SharedReaderHandle {
    shared: Arc<Shared>,
    reader: Box<dyn BucketReader>,
    released: AtomicBool,
}

impl std::fmt::Debug for SharedReaderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedReaderHandle").finish_non_exhaustive()
    }
}

impl SharedReaderHandle {
    /// Releases this reader, decrementing the wrapper's refcount.
    pub fn release(self) {
        drop(self);
    }
}

impl Read for SharedReaderHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.released.load(Ordering::Acquire) {
            return Err(io::Error::other(Error::Closed));
        }
        if self.shared.disposed_once.load(Ordering::Acquire) {
            return Err(io::Error::other(Error::Disposed));
        }
        self.reader.read(buf)
    }
}

impl Drop for SharedReaderHandle {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.release_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hio_store::MemoryBucket;
    use std::io::Write;

    fn written_bucket(bytes: &[u8]) -> Box<dyn Bucket> {
        let bucket = MemoryBucket::new();
        let mut w = bucket.open_writer().unwrap();
        w.write_all(bytes).unwrap();
        w.close().unwrap();
        Box::new(bucket)
    }

    #[test]
    fn refcount_tracks_outstanding_readers() {
        let source = SharedReaderSource::new(written_bucket(b"hello"));
        let a = source.get_reader().unwrap().unwrap();
        let b = source.get_reader().unwrap().unwrap();
        assert_eq!(source.outstanding(), 2);
        a.release();
        assert_eq!(source.outstanding(), 1);
        drop(b);
        assert_eq!(source.outstanding(), 0);
    }

    #[test]
    fn dispose_waits_for_last_reader_then_frees() {
        let source = SharedReaderSource::new(written_bucket(b"0123456789"));
        let mut a = source.get_reader().unwrap().unwrap();
        let b = source.get_reader().unwrap().unwrap();
        drop(b);

        source.dispose();
        let mut out = Vec::new();
        a.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"0123456789");

        a.release();
        assert!(source.get_reader().is_none());
    }

    #[test]
    fn closed_wrapper_rejects_new_readers() {
        let source = SharedReaderSource::new(written_bucket(b"x"));
        source.close();
        assert!(source.get_reader().is_none());
    }
}

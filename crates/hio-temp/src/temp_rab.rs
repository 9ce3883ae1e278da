// Licensed under the MIT License.

use std::sync::Arc;

use hio_store::{ArrayRab, Error, Rab, RabLock, Result};
use hio_tracker::{EntryHandle, Migratable, RamTracker};
use parking_lot::RwLock;
use tracing::{info, instrument, warn};

use crate::file_factory::RabFactory;

struct RabState {
    underlying: Option<Box<dyn Rab>>,
    underlying_lock: Option<RabLock>,
    lock_open_count: usize,
    disposed: bool,
    read_only: bool,
    ram_backed: bool,
    /// The tracker's queue entry for this container, while it is RAM-backed.
    ///
    /// `None` for disk-backed containers, and for RAM-backed ones once migration or
    /// disposal has removed them from the queue.
    tracker_entry: Option<EntryHandle>,
}

/// The heap allocation a [`TempRab`] handle shares ownership of, and the same
/// allocation the RAM tracker holds a weak reference to (see the equivalent note on
/// [`crate::temp_bucket`]'s `Inner`).
struct Inner {
    state: RwLock<RabState>,
    tracker: RamTracker,
    rab_factory: Arc<dyn RabFactory>,
    size: u64,
}

/// A fixed-size [`Rab`] that starts backed by an [`ArrayRab`] and migrates itself to a
/// file-backed RAB under RAM pressure, without invalidating outstanding locks.
///
/// Mirrors [`crate::TempBucket`]'s switchable-proxy shape, specialized to the RAB
/// contract's read-write-lock discipline: ordinary `pread`/`pwrite` take the state's
/// read lock, while state transitions (`close`, `dispose`, `migrate`, `lock_open`) take
/// the write lock.
#[derive(Clone)]
pub struct TempRab {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TempRab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempRab")
            .field("size", &self.inner.size)
            .field("ram_backed", &self.is_ram_backed())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl TempRab {
    /// Creates a RAM-backed temp RAB of the given fixed `size`, registering it with
    /// `tracker`.
    #[must_use]
    pub fn new_ram_backed(tracker: RamTracker, rab_factory: Arc<dyn RabFactory>, size: u64) -> Self {
        let inner = Arc::new(Inner {
            state: RwLock::new(RabState {
                underlying: Some(Box::new(ArrayRab::new(size))),
                underlying_lock: None,
                lock_open_count: 0,
                disposed: false,
                read_only: false,
                ram_backed: true,
                tracker_entry: None,
            }),
            tracker: tracker.clone(),
            rab_factory,
            size,
        });
        let migratable: Arc<dyn Migratable> = inner.clone();
        let handle = tracker.enqueue(&migratable, size);
        inner.state.write().tracker_entry = Some(handle);
        Self { inner }
    }

    /// Creates a disk-backed temp RAB directly, bypassing RAM entirely.
    ///
    /// # Errors
    ///
    /// Returns whatever I/O error the backing file factory encounters.
    pub fn new_disk_backed(tracker: RamTracker, rab_factory: Arc<dyn RabFactory>, size: u64) -> Result<Self> {
        let file_rab = rab_factory.create_file_rab(size)?;
        let inner = Arc::new(Inner {
            state: RwLock::new(RabState {
                underlying: Some(file_rab),
                underlying_lock: None,
                lock_open_count: 0,
                disposed: false,
                read_only: false,
                ram_backed: false,
                tracker_entry: None,
            }),
            tracker,
            rab_factory,
            size,
        });
        Ok(Self { inner })
    }

    /// The fixed size of this container.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.inner.size
    }

    /// Whether the current underlying store lives in RAM.
    #[must_use]
    pub fn is_ram_backed(&self) -> bool {
        self.inner.state.read().ram_backed
    }
}

#[instrument(skip(inner, state))]
fn migrate_locked(inner: &Inner, state: &mut RabState) -> Result<()> {
    if !state.ram_backed || state.disposed {
        return Ok(());
    }
    info!(size = inner.size, "migrating temp rab to disk");

    let Some(old) = state.underlying.take() else {
        return Ok(());
    };

    // Copy through the Rab contract's own positional I/O rather than downcasting to
    // the concrete ArrayRab, so migration works for any future Rab implementation.
    let mut bytes = vec![0_u8; usize::try_from(inner.size).unwrap_or(usize::MAX)];
    old.pread(0, &mut bytes)?;

    let successor = inner.rab_factory.create_file_rab(inner.size)?;
    successor.pwrite(0, &bytes)?;

    let successor_lock = if state.lock_open_count > 0 {
        Some(successor.lock_open()?)
    } else {
        None
    };

    state.underlying_lock = successor_lock;
    old.dispose();
    state.underlying = Some(successor);
    state.ram_backed = false;

    inner.tracker.free(inner.size);
    if let Some(handle) = state.tracker_entry.take() {
        inner.tracker.remove(handle);
    }
    info!("temp rab migration complete");
    Ok(())
}

impl Migratable for Inner {
    fn migrate_to_disk(&self) -> Result<()> {
        let mut state = self.state.write();
        let result = migrate_locked(self, &mut state);
        if let Err(ref err) = result {
            warn!(%err, "temp rab migration attempt failed");
        }
        result
    }

    fn ram_size(&self) -> u64 {
        if self.state.read().ram_backed {
            self.size
        } else {
            0
        }
    }
}

impl Rab for TempRab {
    fn size(&self) -> u64 {
        self.inner.size
    }

    fn pread(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let state = self.inner.state.read();
        if state.disposed {
            return Err(Error::Disposed);
        }
        state.underlying.as_ref().ok_or(Error::Disposed)?.pread(offset, buf)
    }

    fn pwrite(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let state = self.inner.state.read();
        if state.disposed {
            return Err(Error::Disposed);
        }
        if state.read_only {
            return Err(Error::ReadOnly);
        }
        state.underlying.as_ref().ok_or(Error::Disposed)?.pwrite(offset, buf)
    }

    fn is_read_only(&self) -> bool {
        self.inner.state.read().read_only
    }

    fn is_disposed(&self) -> bool {
        self.inner.state.read().disposed
    }

    fn lock_open(&self) -> Result<RabLock> {
        let mut state = self.inner.state.write();
        if state.disposed {
            return Err(Error::Disposed);
        }
        if state.lock_open_count == 0 {
            let inner_lock = state.underlying.as_ref().ok_or(Error::Disposed)?.lock_open()?;
            state.underlying_lock = Some(inner_lock);
        }
        state.lock_open_count += 1;

        let inner = self.inner.clone();
        Ok(RabLock::new(move || {
            let mut state = inner.state.write();
            state.lock_open_count = state.lock_open_count.saturating_sub(1);
            if state.lock_open_count == 0 {
                state.underlying_lock = None;
            }
        }))
    }

    fn close(&self) {
        let state = self.inner.state.write();
        if let Some(underlying) = state.underlying.as_ref() {
            underlying.close();
        }
    }

    fn dispose(&self) {
        let mut state = self.inner.state.write();
        if state.disposed {
            return;
        }
        state.disposed = true;
        let was_ram = state.ram_backed;
        if let Some(underlying) = state.underlying.take() {
            underlying.dispose();
        }
        state.underlying_lock = None;
        if was_ram {
            self.inner.tracker.free(self.inner.size);
        }
        if let Some(handle) = state.tracker_entry.take() {
            self.inner.tracker.remove(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_factory::TempDirFileFactory;
    use tempfile::tempdir;

    fn harness() -> (TempRab, RamTracker, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let tracker = RamTracker::new();
        let factory: Arc<dyn RabFactory> = Arc::new(TempDirFileFactory::new(dir.path(), "r-"));
        let rab = TempRab::new_ram_backed(tracker.clone(), factory, 64);
        (rab, tracker, dir)
    }

    #[test]
    fn pwrite_then_pread_round_trips_ram_backed() {
        let (rab, _tracker, _dir) = harness();
        rab.pwrite(0, b"hello").unwrap();
        let mut buf = [0_u8; 5];
        rab.pread(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn migration_preserves_bytes_and_frees_tracker() {
        let (rab, tracker, _dir) = harness();
        tracker.take(64);
        rab.pwrite(10, b"world").unwrap();

        Migratable::migrate_to_disk(rab.inner.as_ref()).unwrap();
        assert!(!rab.is_ram_backed());
        assert_eq!(tracker.ram_in_use(), 0);

        let mut buf = [0_u8; 5];
        rab.pread(10, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn out_of_bounds_read_fails_without_mutating() {
        let (rab, _tracker, _dir) = harness();
        let mut buf = [0_u8; 8];
        assert!(matches!(rab.pread(60, &mut buf), Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn lock_open_survives_migration() {
        let (rab, _tracker, _dir) = harness();
        let lock = rab.lock_open().unwrap();
        Migratable::migrate_to_disk(rab.inner.as_ref()).unwrap();
        rab.pwrite(0, b"x").unwrap();
        drop(lock);
    }

    #[test]
    fn dispose_is_idempotent_and_frees_once() {
        let (rab, tracker, _dir) = harness();
        tracker.take(64);
        rab.dispose();
        assert_eq!(tracker.ram_in_use(), 0);
        rab.dispose();
        assert_eq!(tracker.ram_in_use(), 0);
    }

    #[test]
    fn tracker_queue_keeps_entry_alive_while_rab_handle_exists() {
        let (rab, tracker, _dir) = harness();
        assert_eq!(tracker.queue_len(), 1);
        assert!(tracker.pop_oldest().is_some());
        drop(rab);
    }

    #[test]
    fn migration_removes_the_queue_entry_even_though_the_handle_stays_alive() {
        let (rab, tracker, _dir) = harness();
        assert_eq!(tracker.queue_len(), 1);
        Migratable::migrate_to_disk(rab.inner.as_ref()).unwrap();
        // `rab` is still held by this test; a bug relying on the weak reference dying
        // would leave the entry in the queue indefinitely.
        assert_eq!(tracker.queue_len(), 0);
    }

    #[test]
    fn dispose_removes_the_queue_entry_even_though_the_handle_stays_alive() {
        let (rab, tracker, _dir) = harness();
        assert_eq!(tracker.queue_len(), 1);
        rab.dispose();
        assert_eq!(tracker.queue_len(), 0);
    }
}

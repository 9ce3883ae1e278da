// Licensed under the MIT License.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hio_store::{Bucket, DiskSpace, Error, Result};
use hio_tracker::RamTracker;
use hio_wrap::{EncryptedBucket, PaddedBucket};
use tracing::{debug, warn};

use crate::cleaner::Cleaner;
use crate::clock::Clock;
use crate::config::{Config, HIGH};
use crate::file_factory::{FileFactory, RabFactory};
use crate::scheduler::Scheduler;
use crate::temp_bucket::TempBucket;
use crate::temp_rab::TempRab;

/// Decides RAM-vs-disk backing for each new container, applies the optional
/// padding/encryption wrappers, and trips the background cleaner under pool pressure.
///
/// Analogous to the factory objects in Hyphanet's temp-bucket layer: a single
/// entry point that hides the backing-store decision from callers, who only ever see
/// the `Bucket`/`Rab` trait objects it returns.
pub struct TempFactory {
    config: Config,
    tracker: RamTracker,
    file_factory: Arc<dyn FileFactory>,
    rab_factory: Arc<dyn RabFactory>,
    disk_space: Arc<dyn DiskSpace>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    cleaner_running: Arc<AtomicBool>,
}

impl TempFactory {
    /// Builds a factory over `config`, using `file_factory`/`rab_factory` for disk
    /// backing, `disk_space` for the floor check, and `scheduler`/`clock` to drive the
    /// background cleaner.
    #[must_use]
    pub fn new(
        config: Config,
        tracker: RamTracker,
        file_factory: Arc<dyn FileFactory>,
        rab_factory: Arc<dyn RabFactory>,
        disk_space: Arc<dyn DiskSpace>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            tracker,
            file_factory,
            rab_factory,
            disk_space,
            scheduler,
            clock,
            cleaner_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a new temp bucket for a write of roughly `size_hint` bytes.
    ///
    /// `size_hint` only decides RAM eligibility; the container's actual RAM accounting
    /// is tracked exactly as its writer commits bytes. When not RAM-eligible, the
    /// container is created disk-backed directly, applying the disk-space precheck and,
    /// if enabled, the padding/encryption wrapping order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientDiskSpace`] if a disk-backed container is refused
    /// for lack of free space, or any I/O error encountered creating the backing file.
    pub fn make_bucket(&self, size_hint: u64) -> Result<Box<dyn Bucket>> {
        if self.is_ram_eligible(size_hint) {
            // `size_hint` only decides eligibility here; it is not reserved against the
            // tracker. Unlike a RAB, a bucket starts empty and grows through its writer,
            // which accounts for the exact bytes it commits as they are written (see
            // `TempBucketHandleWriter::write`). Reserving the hint here too would double
            // count every byte once it is actually written.
            debug!(size_hint, "creating ram-backed temp bucket");
            let bucket = TempBucket::new_ram_backed(self.tracker.clone(), self.file_factory.clone(), &self.config);
            self.maybe_trigger_cleaner();
            return Ok(Box::new(bucket));
        }

        self.check_disk_space(size_hint)?;
        debug!(size_hint, "creating disk-backed temp bucket");
        let bucket = TempBucket::new_disk_backed(self.tracker.clone(), self.file_factory.clone(), &self.config)?;
        self.wrap_for_disk(Box::new(bucket))
    }

    /// Creates a new fixed-size temp RAB, RAM-backed when eligible.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `size` is zero.
    pub fn make_rab(&self, size: u64) -> Result<TempRab> {
        if size == 0 {
            return Err(Error::InvalidConfig("rab size must be greater than zero".to_owned()));
        }
        // `try_take` folds the eligibility check and the reservation into one critical
        // section, so two callers racing this decision cannot both pass and jointly
        // overshoot `ram_pool_size` the way a separate read-then-take would allow.
        if size <= self.config.max_single_ram && self.tracker.try_take(size, self.config.ram_pool_size) {
            debug!(size, "creating ram-backed temp rab");
            let rab = TempRab::new_ram_backed(self.tracker.clone(), self.rab_factory.clone(), size);
            self.maybe_trigger_cleaner();
            return Ok(rab);
        }
        // Disk-backed RABs skip RAM entirely; the switchable proxy still applies so a
        // caller cannot tell the difference at the trait level.
        debug!(size, "creating disk-backed temp rab directly");
        TempRab::new_disk_backed(self.tracker.clone(), self.rab_factory.clone(), size)
    }

    fn is_ram_eligible(&self, size: u64) -> bool {
        let ram_in_use = self.tracker.ram_in_use();
        let eligible = size > 0
            && size <= self.config.max_single_ram
            && ram_in_use < self.config.ram_pool_size
            && ram_in_use + size <= self.config.ram_pool_size;
        debug!(
            size,
            ram_in_use,
            ram_pool_size = self.config.ram_pool_size,
            max_single_ram = self.config.max_single_ram,
            eligible,
            "ram-vs-disk decision"
        );
        eligible
    }

    fn check_disk_space(&self, size: u64) -> Result<()> {
        let usable = self.disk_space.free_bytes(&self.config.temp_dir)?;
        if usable < self.config.min_disk_space.saturating_add(size) {
            warn!(usable, size, floor = self.config.min_disk_space, "refusing disk-backed container");
            return Err(Error::InsufficientDiskSpace {
                needed: size,
                floor: self.config.min_disk_space,
            });
        }
        Ok(())
    }

    fn wrap_for_disk(&self, store: Box<dyn Bucket>) -> Result<Box<dyn Bucket>> {
        if !self.config.encrypt_temp_buckets {
            return Ok(store);
        }
        let padded = PaddedBucket::new(store);
        let encrypted = EncryptedBucket::with_random_key(Box::new(padded));
        Ok(Box::new(encrypted))
    }

    fn maybe_trigger_cleaner(&self) {
        let threshold = (self.config.ram_pool_size as f64 * HIGH) as u64;
        if self.tracker.ram_in_use() < threshold {
            return;
        }
        if self
            .cleaner_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        debug!("scheduling migration cleaner");
        let cleaner = Cleaner::new(
            self.tracker.clone(),
            self.clock.clone(),
            self.config.ram_pool_size,
            Arc::clone(&self.cleaner_running),
        );
        self.scheduler.schedule(Box::new(move || cleaner.run()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::file_factory::TempDirFileFactory;
    use crate::scheduler::InlineScheduler;
    use hio_store::testing::FakeDiskSpace;
    use tempfile::tempdir;

    fn harness(config: Config) -> (TempFactory, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let factory = Arc::new(TempDirFileFactory::new(dir.path(), "f-"));
        let temp_factory = TempFactory::new(
            config,
            RamTracker::new(),
            factory.clone(),
            factory,
            Arc::new(FakeDiskSpace::new(u64::MAX)),
            Arc::new(InlineScheduler),
            Arc::new(SystemClock),
        );
        (temp_factory, dir)
    }

    #[test]
    fn small_size_hint_yields_ram_backed_bucket() {
        let config = Config {
            max_single_ram: 1024,
            ram_pool_size: 4096,
            ..Config::default()
        };
        let (factory, _dir) = harness(config);
        let bucket = factory.make_bucket(100).unwrap();
        assert!(bucket.is_ram_backed());
    }

    #[test]
    fn oversized_size_hint_yields_disk_backed_bucket() {
        let config = Config {
            max_single_ram: 1024,
            ram_pool_size: 4096,
            ..Config::default()
        };
        let (factory, _dir) = harness(config);
        let bucket = factory.make_bucket(2048).unwrap();
        assert!(!bucket.is_ram_backed());
    }

    #[test]
    fn insufficient_disk_space_refuses_disk_backed_bucket() {
        let dir = tempdir().unwrap();
        let file_factory = Arc::new(TempDirFileFactory::new(dir.path(), "f-"));
        let config = Config {
            max_single_ram: 10,
            ram_pool_size: 10,
            min_disk_space: 1000,
            temp_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let factory = TempFactory::new(
            config,
            RamTracker::new(),
            file_factory.clone(),
            file_factory,
            Arc::new(FakeDiskSpace::new(500)),
            Arc::new(InlineScheduler),
            Arc::new(SystemClock),
        );
        assert!(matches!(
            factory.make_bucket(2048),
            Err(Error::InsufficientDiskSpace { .. })
        ));
    }

    #[test]
    fn encryption_wraps_disk_backed_bucket() {
        let config = Config {
            max_single_ram: 10,
            ram_pool_size: 10,
            encrypt_temp_buckets: true,
            ..Config::default()
        };
        let (factory, _dir) = harness(config);
        let bucket = factory.make_bucket(2048).unwrap();
        let mut w = bucket.open_writer().unwrap();
        use std::io::Write;
        w.write_all(b"secret payload").unwrap();
        w.close().unwrap();
        let mut r = bucket.open_reader().unwrap();
        let mut out = Vec::new();
        use std::io::Read;
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"secret payload");
    }

    #[test]
    fn high_water_mark_schedules_cleaner_inline() {
        let config = Config {
            max_single_ram: 100,
            ram_pool_size: 100,
            ..Config::default()
        };
        let (factory, _dir) = harness(config);
        let _first = factory.make_bucket(95).unwrap();
        assert!(!factory.cleaner_running.load(Ordering::Acquire));
    }

    #[test]
    fn make_rab_reserves_atomically_and_falls_back_to_disk_on_overshoot() {
        let config = Config {
            max_single_ram: 100,
            ram_pool_size: 100,
            ..Config::default()
        };
        let (factory, _dir) = harness(config);
        let first = factory.make_rab(60).unwrap();
        assert!(first.is_ram_backed());

        // 60 + 50 would overshoot the 100-byte pool; the reservation must fail as one
        // atomic unit rather than letting both callers pass a stale eligibility check.
        let second = factory.make_rab(50).unwrap();
        assert!(!second.is_ram_backed());
    }
}

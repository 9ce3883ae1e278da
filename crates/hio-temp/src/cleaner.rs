// Licensed under the MIT License.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hio_store::Error;
use hio_tracker::RamTracker;
use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::config::{LOW, RAM_MAX_AGE};

const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// One run of the background migration cleaner, spilling RAM-backed entries to disk
/// until pool pressure subsides.
///
/// Constructed fresh by the factory each time the high-water mark trips; `run` executes
/// synchronously on whatever thread the [`crate::scheduler::Scheduler`] hands it, and
/// clears `running` via an RAII guard so a panic mid-pass cannot wedge the "already
/// running" gate shut.
pub(crate) struct Cleaner {
    tracker: RamTracker,
    clock: Arc<dyn Clock>,
    ram_pool_size: u64,
    running: Arc<AtomicBool>,
}

struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Cleaner {
    pub(crate) fn new(tracker: RamTracker, clock: Arc<dyn Clock>, ram_pool_size: u64, running: Arc<AtomicBool>) -> Self {
        Self {
            tracker,
            clock,
            ram_pool_size,
            running,
        }
    }

    /// Runs both cleaner phases to convergence.
    #[instrument(skip(self), fields(reclaimed))]
    pub(crate) fn run(&self) {
        let _guard = RunningGuard(self.running.clone());
        debug!("migration cleaner pass starting");
        let before = self.tracker.ram_in_use();

        self.run_age_phase();
        self.run_pressure_phase();

        let reclaimed = before.saturating_sub(self.tracker.ram_in_use());
        tracing::Span::current().record("reclaimed", reclaimed);
        debug!(reclaimed, "migration cleaner pass stopped");
    }

    fn run_age_phase(&self) {
        loop {
            let Some((entry, created_at)) = self.tracker.peek_oldest_with_age() else {
                break;
            };
            if created_at + RAM_MAX_AGE > self.clock.now() {
                break;
            }
            let Some(popped) = self.tracker.pop_oldest() else {
                break;
            };
            self.migrate_with_retry(popped.as_ref());
        }
    }

    fn run_pressure_phase(&self) {
        let threshold = (self.ram_pool_size as f64 * LOW) as u64;
        while self.tracker.ram_in_use() > threshold {
            let Some(popped) = self.tracker.pop_oldest() else {
                break;
            };
            self.migrate_with_retry(popped.as_ref());
        }
    }

    fn migrate_with_retry(&self, entry: &dyn hio_tracker::Migratable) {
        loop {
            match entry.migrate_to_disk() {
                Ok(()) => return,
                Err(Error::InsufficientDiskSpace { needed, floor }) => {
                    warn!(needed, floor, "migration deferred for insufficient disk space, retrying");
                    thread::sleep(RETRY_BACKOFF);
                }
                Err(err) => {
                    warn!(%err, "migration failed, abandoning this entry for this pass");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::config::Config;
    use crate::file_factory::TempDirFileFactory;
    use crate::temp_bucket::TempBucket;
    use hio_store::Bucket;
    use std::io::Write;
    use tempfile::tempdir;

    fn make_bucket(tracker: &RamTracker, dir: &tempfile::TempDir, bytes: &[u8]) -> TempBucket {
        let factory: Arc<dyn crate::file_factory::FileFactory> =
            Arc::new(TempDirFileFactory::new(dir.path(), "c-"));
        let config = Config {
            max_single_ram: 1_000_000,
            ram_pool_size: 1_000_000,
            ..Config::default()
        };
        let bucket = TempBucket::new_ram_backed(tracker.clone(), factory, &config);
        let mut w = bucket.open_writer().unwrap();
        w.write_all(bytes).unwrap();
        w.close().unwrap();
        bucket
    }

    #[test]
    fn pressure_phase_migrates_until_below_low_watermark() {
        let dir = tempdir().unwrap();
        let tracker = RamTracker::new();
        let buckets: Vec<_> = (0..5).map(|_| make_bucket(&tracker, &dir, &[7_u8; 300])).collect();
        assert_eq!(tracker.ram_in_use(), 1500);

        let cleaner = Cleaner::new(tracker.clone(), Arc::new(FakeClock::new()), 1000, Arc::new(AtomicBool::new(false)));
        cleaner.run();

        assert!(tracker.ram_in_use() <= 800, "should have migrated down to the low watermark");
        assert!(buckets.iter().any(|b| !b.is_ram_backed()));
    }

    #[test]
    fn age_phase_migrates_entries_older_than_max_age() {
        let dir = tempdir().unwrap();
        let tracker = RamTracker::new();
        let clock = Arc::new(FakeClock::new());
        let bucket = make_bucket(&tracker, &dir, &[1_u8; 10]);

        clock.advance(crate::config::RAM_MAX_AGE + Duration::from_secs(1));

        let cleaner = Cleaner::new(tracker.clone(), clock, 1_000_000, Arc::new(AtomicBool::new(false)));
        cleaner.run();

        assert!(!bucket.is_ram_backed());
        assert_eq!(tracker.ram_in_use(), 0);
    }

    #[test]
    fn running_guard_clears_flag_after_run() {
        let tracker = RamTracker::new();
        let running = Arc::new(AtomicBool::new(true));
        let cleaner = Cleaner::new(tracker, Arc::new(FakeClock::new()), 1000, running.clone());
        cleaner.run();
        assert!(!running.load(Ordering::Acquire));
    }
}

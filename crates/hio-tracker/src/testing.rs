// Licensed under the MIT License.

//! Test-only introspection into [`RamTracker`], available behind the `test-util` feature.

use crate::RamTracker;

/// Returns the sizes of queued entries in FIFO order, without dropping them from the
/// tracker.
///
/// Pops every entry and re-enqueues it, so the tracker's weak references end up
/// re-registered at fresh ids; only appropriate for tests, which treat the tracker as
/// disposable afterward.
#[must_use]
pub fn queue_sizes_snapshot(tracker: &RamTracker) -> Vec<u64> {
    let mut popped = Vec::new();
    while let Some(entry) = tracker.pop_oldest() {
        popped.push(entry);
    }
    let sizes = popped.iter().map(|entry| entry.ram_size()).collect();
    for entry in popped {
        let size = entry.ram_size();
        tracker.enqueue(&entry, size);
    }
    sizes
}

/// Returns the current `ram_in_use` counter. Exposed in `testing` rather than the public
/// API proper, since production callers should react to tracker *events*, not poll state.
#[must_use]
pub fn ram_in_use(tracker: &RamTracker) -> u64 {
    tracker.ram_in_use()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::Migratable;

    #[derive(Debug)]
    struct FakeEntry {
        size: u64,
    }

    impl Migratable for FakeEntry {
        fn migrate_to_disk(&self) -> hio_store::Result<()> {
            Ok(())
        }

        fn ram_size(&self) -> u64 {
            self.size
        }
    }

    #[test]
    fn snapshot_preserves_order_and_leaves_queue_intact() {
        let tracker = RamTracker::new();
        let a: Arc<dyn Migratable> = Arc::new(FakeEntry { size: 3 });
        let b: Arc<dyn Migratable> = Arc::new(FakeEntry { size: 9 });
        tracker.enqueue(&a, 3);
        tracker.enqueue(&b, 9);

        assert_eq!(queue_sizes_snapshot(&tracker), vec![3, 9]);
        assert_eq!(tracker.queue_len(), 2);
    }
}

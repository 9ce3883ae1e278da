// Licensed under the MIT License.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::trace;

use crate::entry::{self, EntryHandle, Migratable, Slot};

#[derive(Debug, Default)]
struct State {
    ram_in_use: u64,
    queue: VecDeque<Slot>,
    next_id: u64,
}

/// Process-wide RAM accounting and migration-candidate queue.
///
/// Cheap to clone; clones share the same underlying counter and queue. Every
/// state-changing method takes the tracker's own mutex; callers must never hold a
/// container's mutex when calling in, to keep the lock order container → tracker.
#[derive(Debug, Clone, Default)]
pub struct RamTracker {
    state: Arc<Mutex<State>>,
}

impl RamTracker {
    /// Creates an empty tracker with `ram_in_use = 0`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of RAM bytes currently accounted for.
    #[must_use]
    pub fn ram_in_use(&self) -> u64 {
        self.state.lock().ram_in_use
    }

    /// Adds `n` bytes to the running total.
    pub fn take(&self, n: u64) {
        let mut state = self.state.lock();
        state.ram_in_use += n;
        trace!(n, ram_in_use = state.ram_in_use, "tracker took ram");
    }

    /// Subtracts `n` bytes from the running total, saturating at zero.
    pub fn free(&self, n: u64) {
        let mut state = self.state.lock();
        state.ram_in_use = state.ram_in_use.saturating_sub(n);
        trace!(n, ram_in_use = state.ram_in_use, "tracker freed ram");
    }

    /// Atomically reserves `n` bytes against the running total if, and only if, doing
    /// so would not push it past `max`. Returns whether the reservation succeeded.
    ///
    /// Unlike calling `ram_in_use()` followed by a separate `take(n)`, this holds the
    /// tracker's mutex across both the check and the update, so concurrent callers
    /// racing the same eligibility check cannot jointly overshoot `max`.
    #[must_use]
    pub fn try_take(&self, n: u64, max: u64) -> bool {
        let mut state = self.state.lock();
        if state.ram_in_use + n > max {
            return false;
        }
        state.ram_in_use += n;
        trace!(n, ram_in_use = state.ram_in_use, max, "tracker reserved ram");
        true
    }

    /// Enqueues a migration candidate, tagged with its current RAM size.
    ///
    /// The tracker holds only a weak reference to `entry`; it does not keep it alive.
    pub fn enqueue(&self, target: &Arc<dyn Migratable>, size: u64) -> EntryHandle {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.queue.push_back(Slot {
            weak: Arc::downgrade(target),
            id,
            size,
            created_at: Instant::now(),
        });
        EntryHandle(id)
    }

    /// Removes a specific entry from the queue. Idempotent: removing an already-removed
    /// or never-present handle is a no-op.
    pub fn remove(&self, handle: EntryHandle) {
        let mut state = self.state.lock();
        state.queue.retain(|slot| slot.id != handle.0);
    }

    /// Returns the oldest live entry without removing it from the queue, compacting any
    /// dead entries encountered ahead of it.
    #[must_use]
    pub fn peek_oldest(&self) -> Option<Arc<dyn Migratable>> {
        let mut state = self.state.lock();
        loop {
            let slot = state.queue.front()?;
            if let Some(strong) = entry::upgrade(slot) {
                return Some(strong);
            }
            trace!(id = slot.id, "compacting dead tracker entry");
            state.queue.pop_front();
        }
    }

    /// Returns the oldest live entry along with its enqueue time, without removing it,
    /// compacting any dead entries encountered ahead of it.
    ///
    /// Used by the migration cleaner's age-based phase to decide whether the oldest
    /// entry has crossed its maximum RAM age before committing to pop it off the queue.
    #[must_use]
    pub fn peek_oldest_with_age(&self) -> Option<(Arc<dyn Migratable>, Instant)> {
        let mut state = self.state.lock();
        loop {
            let slot = state.queue.front()?;
            if let Some(strong) = entry::upgrade(slot) {
                return Some((strong, slot.created_at));
            }
            trace!(id = slot.id, "compacting dead tracker entry");
            state.queue.pop_front();
        }
    }

    /// Removes and returns the oldest live entry, compacting any dead entries
    /// encountered ahead of it.
    #[must_use]
    pub fn pop_oldest(&self) -> Option<Arc<dyn Migratable>> {
        let mut state = self.state.lock();
        loop {
            let slot = state.queue.pop_front()?;
            if let Some(strong) = entry::upgrade(&slot) {
                return Some(strong);
            }
            trace!(id = slot.id, "compacting dead tracker entry");
        }
    }

    /// The number of entries currently in the queue, including any not-yet-compacted
    /// dead weak references.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }
}

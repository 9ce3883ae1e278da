// Licensed under the MIT License.

use std::sync::{Arc, Weak};
use std::time::Instant;

/// A RAM-backed container that the tracker can ask to migrate itself to disk.
///
/// Implemented by the temp-container proxy; the tracker only ever holds a weak
/// reference to implementors, so dropping the last strong reference removes the entry
/// from consideration without any explicit deregistration.
pub trait Migratable: std::fmt::Debug + Send + Sync {
    /// Moves this container's bytes to disk-backed storage in place.
    ///
    /// # Errors
    ///
    /// Returns the underlying store error if migration fails; the entry remains
    /// RAM-backed and stays in the tracker's queue in that case.
    fn migrate_to_disk(&self) -> hio_store::Result<()>;

    /// The number of RAM bytes this entry currently holds the tracker accountable for.
    fn ram_size(&self) -> u64;
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) weak: Weak<dyn Migratable>,
    pub(crate) id: u64,
    #[allow(dead_code)]
    pub(crate) size: u64,
    pub(crate) created_at: Instant,
}

/// An opaque handle identifying a queue entry, returned by [`RamTracker::enqueue`](crate::RamTracker::enqueue).
///
/// Used to remove a specific entry later, e.g. when a container is disposed or migrates
/// itself outside of the cleaner's own pop path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHandle(pub(crate) u64);

pub(crate) fn upgrade(slot: &Slot) -> Option<Arc<dyn Migratable>> {
    slot.weak.upgrade()
}

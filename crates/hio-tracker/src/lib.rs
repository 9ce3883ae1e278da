// Licensed under the MIT License.

//! Process-wide RAM accounting for Hyphanet's I/O support layer.
//!
//! [`RamTracker`] records a single monotonic byte counter and an ordered, FIFO queue of
//! weak references to RAM-backed containers eligible for migration to disk. The queue
//! never extends a container's lifetime: entries are [`std::sync::Weak`] and are
//! compacted out as dead weight is encountered during a scan.
//!
//! Lock ordering: callers must never hold a container's own mutex while entering the
//! tracker. The tracker's mutex is always the innermost lock acquired.

#![warn(missing_docs)]

mod entry;
mod tracker;

#[cfg(feature = "test-util")]
pub mod testing;

pub use entry::{EntryHandle, Migratable};
pub use tracker::RamTracker;

// Licensed under the MIT License.

//! Test doubles for the storage primitives, available behind the `test-util` feature.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::disk_space::DiskSpace;

/// Reports a caller-supplied constant capacity minus bytes claimed through
/// [`FakeDiskSpace::claim`]; intended for tests only.
#[derive(Debug, Clone)]
pub struct FakeDiskSpace {
    free: Arc<AtomicU64>,
}

impl FakeDiskSpace {
    /// Creates a fake volume that reports `free_bytes` of free space until claimed.
    #[must_use]
    pub fn new(free_bytes: u64) -> Self {
        Self {
            free: Arc::new(AtomicU64::new(free_bytes)),
        }
    }

    /// Reduces the reported free space by `bytes`, saturating at zero.
    pub fn claim(&self, bytes: u64) {
        self.free.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(v.saturating_sub(bytes))).ok();
    }

    /// Increases the reported free space by `bytes`.
    pub fn release(&self, bytes: u64) {
        self.free.fetch_add(bytes, Ordering::AcqRel);
    }
}

impl DiskSpace for FakeDiskSpace {
    fn free_bytes(&self, _path: &std::path::Path) -> std::io::Result<u64> {
        Ok(self.free.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_and_release_track_free_space() {
        let disk = FakeDiskSpace::new(1024);
        disk.claim(512);
        assert_eq!(disk.free_bytes(std::path::Path::new("/")).unwrap(), 512);
        disk.release(256);
        assert_eq!(disk.free_bytes(std::path::Path::new("/")).unwrap(), 768);
    }

    #[test]
    fn claim_saturates_at_zero() {
        let disk = FakeDiskSpace::new(100);
        disk.claim(500);
        assert_eq!(disk.free_bytes(std::path::Path::new("/")).unwrap(), 0);
    }
}

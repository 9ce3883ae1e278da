// Licensed under the MIT License.

use std::path::Path;

/// Reports free space on the volume backing a path.
///
/// Abstracted so that disk-space preflight checks (see [`Error::InsufficientDiskSpace`](crate::Error::InsufficientDiskSpace))
/// can be driven deterministically in tests via a fake implementation instead of the
/// real filesystem.
pub trait DiskSpace: std::fmt::Debug + Send + Sync {
    /// Bytes currently free on the volume backing `path`.
    ///
    /// # Errors
    ///
    /// Returns the underlying `io::Error` if the volume cannot be statted.
    fn free_bytes(&self, path: &Path) -> std::io::Result<u64>;
}

/// Queries free space from the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealDiskSpace;

impl DiskSpace for RealDiskSpace {
    fn free_bytes(&self, path: &Path) -> std::io::Result<u64> {
        available_space(path)
    }
}

#[cfg(unix)]
fn available_space(path: &Path) -> std::io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;
    // SAFETY: `c_path` is a valid NUL-terminated string and `stat` is zero-initialized
    // before the call; `statvfs` only reads `c_path` and writes into `stat`.
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
    }
}

#[cfg(not(unix))]
fn available_space(_path: &Path) -> std::io::Result<u64> {
    Ok(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_disk_space_reports_nonzero_on_cwd() {
        let free = RealDiskSpace.free_bytes(Path::new(".")).unwrap();
        assert!(free > 0);
    }
}

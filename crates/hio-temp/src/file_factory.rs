// Licensed under the MIT License.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use hio_store::{Bucket, FileBucket, FileRab, Rab, Result};

/// Creates fresh file-backed buckets for migration and for directly disk-backed temp
/// containers.
pub trait FileFactory: std::fmt::Debug + Send + Sync {
    /// Creates a new, empty file-backed bucket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](hio_store::Error::Io) if the backing file cannot be created.
    fn create_file_bucket(&self) -> Result<Box<dyn Bucket>>;
}

/// Creates fresh file-backed RABs of a given fixed size, for Temp-RAB migration.
pub trait RabFactory: std::fmt::Debug + Send + Sync {
    /// Creates a new file-backed RAB of exactly `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](hio_store::Error::Io) if the backing file cannot be created
    /// or sized.
    fn create_file_rab(&self, size: u64) -> Result<Box<dyn Rab>>;
}

/// Creates buckets backed by uniquely-named files under a fixed directory.
#[derive(Debug)]
pub struct TempDirFileFactory {
    dir: PathBuf,
    prefix: String,
    counter: AtomicU64,
}

impl TempDirFileFactory {
    /// Creates a factory rooted at `dir`, naming files `<prefix><n>.tmp`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl TempDirFileFactory {
    fn next_path(&self) -> PathBuf {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!("{}{id}.tmp", self.prefix))
    }
}

impl FileFactory for TempDirFileFactory {
    fn create_file_bucket(&self) -> Result<Box<dyn Bucket>> {
        Ok(Box::new(FileBucket::new(self.next_path())))
    }
}

impl RabFactory for TempDirFileFactory {
    fn create_file_rab(&self, size: u64) -> Result<Box<dyn Rab>> {
        Ok(Box::new(FileRab::create(self.next_path(), size)?))
    }
}

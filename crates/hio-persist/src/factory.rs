// Licensed under the MIT License.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use hio_store::{Bucket, FileBucket, FileRab, Rab, Result};

/// Creates the raw file-backed buckets and RABs a [`crate::PersistentTempManager`] wraps,
/// and enumerates whatever files a given prefix has already left behind in the temp
/// directory at startup.
///
/// Analogous to `hio_temp::file_factory::FileFactory`/`RabFactory`, merged into one trait
/// here since the persistent manager always needs both and, unlike the temp layer, never
/// chooses between RAM and file backing.
pub trait PersistentFileFactory: std::fmt::Debug + Send + Sync {
    /// The directory new files are created under, used for the disk-space precheck.
    fn temp_dir(&self) -> &Path;

    /// Creates a new, empty file-backed bucket, returning it alongside the path it was
    /// created at (needed so the manager can track it through `register`/orphan scanning).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](hio_store::Error::Io) if the backing file cannot be created.
    fn create_file_bucket(&self) -> Result<(Box<dyn Bucket>, PathBuf)>;

    /// Creates a new file-backed RAB of exactly `size` bytes, returning it alongside its
    /// path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](hio_store::Error::Io) if the backing file cannot be created
    /// or sized.
    fn create_file_rab(&self, size: u64) -> Result<(Box<dyn Rab>, PathBuf)>;

    /// Lists every file directly under [`temp_dir`](Self::temp_dir) whose name starts
    /// with this factory's configured prefix.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be read.
    fn scan_existing(&self) -> std::io::Result<HashSet<PathBuf>>;
}

/// Creates uniquely-named persistent files under a fixed directory.
#[derive(Debug)]
pub struct PersistentDirFactory {
    dir: PathBuf,
    prefix: String,
    counter: AtomicU64,
}

impl PersistentDirFactory {
    /// Creates a factory rooted at `dir`, naming files `<prefix><n>.tmp`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }

    fn next_path(&self) -> PathBuf {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!("{}{id}.tmp", self.prefix))
    }
}

impl PersistentFileFactory for PersistentDirFactory {
    fn temp_dir(&self) -> &Path {
        &self.dir
    }

    fn create_file_bucket(&self) -> Result<(Box<dyn Bucket>, PathBuf)> {
        let path = self.next_path();
        Ok((Box::new(FileBucket::new(path.clone())), path))
    }

    fn create_file_rab(&self, size: u64) -> Result<(Box<dyn Rab>, PathBuf)> {
        let path = self.next_path();
        let rab = FileRab::create(path.clone(), size)?;
        Ok((Box::new(rab), path))
    }

    fn scan_existing(&self) -> std::io::Result<HashSet<PathBuf>> {
        let mut found = HashSet::new();
        if !self.dir.exists() {
            return Ok(found);
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(&self.prefix) {
                found.insert(entry.path());
            }
        }
        Ok(found)
    }
}

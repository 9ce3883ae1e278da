// Licensed under the MIT License.

use std::path::PathBuf;

use thiserror::Error;

/// The single error type spanning every container, store, and wrapper in this
/// workspace.
///
/// Variants carry whatever context makes a log line self-sufficient (a path,
/// an offset/length pair, a magic number) rather than relying on a wrapped
/// context stack.
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A second writer was requested while one was already open.
    #[error("a writer is already open on this container")]
    AlreadyOpen,

    /// A reader was requested before any writer had ever been opened.
    #[error("no writer has been opened on this container yet")]
    NotWrittenYet,

    /// A write (or a writer-only operation) was attempted on a read-only container.
    #[error("container is marked read-only")]
    ReadOnly,

    /// The operation cannot proceed because the container has been disposed.
    #[error("container has been disposed")]
    Disposed,

    /// The operation cannot proceed because the container has been closed.
    #[error("container has been closed")]
    Closed,

    /// A conversion was requested while readers were still open.
    #[error("cannot convert: {count} reader(s) still open")]
    ConcurrentReaders {
        /// Number of readers observed still open.
        count: usize,
    },

    /// A conversion or exclusive operation was requested while a writer was still open.
    #[error("cannot convert: a writer is still open")]
    ConcurrentWriter,

    /// A positional read or write fell outside `[0, size)`.
    #[error("offset {offset} + length {length} is out of bounds for size {size}")]
    OutOfBounds {
        /// The requested offset (may be negative to represent a caller bug).
        offset: i64,
        /// The requested length in bytes.
        length: usize,
        /// The fixed size of the random-access container.
        size: u64,
    },

    /// A disk-space floor check failed, either at creation time or during a write.
    #[error("insufficient disk space: {needed} bytes needed, floor is {floor} bytes")]
    InsufficientDiskSpace {
        /// Bytes that would have been consumed by the refused operation.
        needed: u64,
        /// The configured minimum free-space floor.
        floor: u64,
    },

    /// A serialized container began with a magic number this crate does not recognize,
    /// or a recognized magic was followed by an unsupported version.
    #[error("unrecognized storage format: magic {magic:#010x}, version {version}")]
    StorageFormat {
        /// The 32-bit magic number read from the stream.
        magic: u32,
        /// The 32-bit version number read from the stream.
        version: u32,
    },

    /// A persistent container could not be resumed from disk.
    #[error("failed to resume persistent container at {}: {reason}", path.display())]
    ResumeFailed {
        /// The path the container expected to find its backing file at.
        path: PathBuf,
        /// A human-readable explanation.
        reason: String,
    },

    /// A cryptographic operation (cipher init or finalize) failed.
    #[error("cryptographic operation failed: {0}")]
    Crypto(String),

    /// A [`Config`](crate::config) failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// We are forwarding an I/O error from the standard library.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` for use with container and store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents any error in this crate as a standard I/O error, for interop with
/// callers that expect `std::io::Result`.
impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Io(error) => error,
            other => Self::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(Error: Send, Sync);
    }

    #[test]
    fn into_stdio_preserves_io_kind() {
        let e = Error::Io(std::io::Error::new(std::io::ErrorKind::AlreadyExists, "boom"));
        let io: std::io::Error = e.into();
        assert_eq!(io.kind(), std::io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn into_stdio_wraps_domain_errors() {
        let e = Error::ReadOnly;
        let io: std::io::Error = e.into();
        assert_eq!(io.kind(), std::io::ErrorKind::Other);
        assert!(io.to_string().contains("read-only"));
    }
}

// Licensed under the MIT License.

use std::fmt::Debug;
use std::io::{Read, Write};

use crate::error::Result;

/// An opaque byte container with a sequential writer and any number of sequential readers.
///
/// At most one writer may be open at a time ([`Error::AlreadyOpen`](crate::Error::AlreadyOpen)
/// otherwise). Readers may only be opened after the first writer has been closed
/// ([`Error::NotWrittenYet`](crate::Error::NotWrittenYet) otherwise). `close` releases external
/// streams but keeps the data; `dispose` releases the data and implies `close`. Both are
/// idempotent and never fail.
pub trait Bucket: Debug + Send + Sync {
    /// Opens the single writer for this bucket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyOpen`](crate::Error::AlreadyOpen) if a writer is already open,
    /// [`Error::ReadOnly`](crate::Error::ReadOnly) if the bucket is latched read-only, or
    /// [`Error::Disposed`](crate::Error::Disposed) if the bucket has been disposed.
    fn open_writer(&self) -> Result<Box<dyn BucketWriter>>;

    /// Opens a reader over the bytes committed so far.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotWrittenYet`](crate::Error::NotWrittenYet) if no writer has ever been
    /// opened, or [`Error::Disposed`](crate::Error::Disposed) if the bucket has been disposed.
    fn open_reader(&self) -> Result<Box<dyn BucketReader>>;

    /// The number of bytes committed by the writer so far.
    fn size(&self) -> u64;

    /// Whether the read-only latch has been set.
    fn is_read_only(&self) -> bool;

    /// Sets the read-only latch. Monotonic: once set, never cleared.
    fn set_read_only(&self);

    /// Whether this bucket has been disposed.
    fn is_disposed(&self) -> bool;

    /// Releases external streams and keeps the underlying data. Idempotent.
    fn close(&self);

    /// Releases the underlying data. Implies [`close`](Self::close). Idempotent and never fails;
    /// any underlying error is logged and swallowed.
    fn dispose(&self);

    /// Returns a read-only sibling sharing the same underlying data, if the concrete type
    /// supports it.
    ///
    /// # Errors
    ///
    /// Returns whatever error the concrete store encounters while preparing the shadow.
    fn create_shadow(&self) -> Result<Box<dyn Bucket>>;

    /// Whether this bucket's current backing store lives in RAM.
    ///
    /// Used by the migration machinery to decide whether a container is a migration
    /// candidate, expressed as a capability rather than a runtime type check.
    fn is_ram_backed(&self) -> bool {
        false
    }
}

/// A one-shot write stream obtained from [`Bucket::open_writer`].
///
/// Writes are append-only and monotonically increase the bucket's size. The writer must be
/// closed to publish its bytes to subsequent readers.
pub trait BucketWriter: Write + Send {
    /// Flushes and closes the writer, publishing the written bytes.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error, if any, encountered while finalizing the stream.
    fn close(&mut self) -> Result<()>;
}

/// A read stream obtained from [`Bucket::open_reader`].
pub trait BucketReader: Read + Send {}

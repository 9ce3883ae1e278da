// Licensed under the MIT License.

//! Composable wrappers around [`hio_store`]'s `Bucket` and `Rab` primitives.
//!
//! Each wrapper forwards most operations to an inner container and changes the
//! semantics of exactly one axis: [`SharedReaderSource`] shares one read-only store
//! across many independent readers; [`DelayedDisposeBucket`]/[`DelayedDisposeRab`] defer
//! the actual release of a persistent container's resources until a transaction
//! commits; [`EncryptedBucket`] encrypts the byte stream; [`PaddedBucket`] pads the
//! stream to the next power of two; [`NoDisposeBucket`] suppresses `dispose` entirely.
//!
//! Random-access positional I/O over a single file is not reimplemented here — use
//! [`hio_store::FileRab`], which already unifies that API with pooled descriptors and
//! [`hio_store::Rab::lock_open`] support.

#![warn(missing_docs)]

mod delayed_dispose;
mod encrypted;
mod format;
mod no_dispose;
mod padded;
mod persist_format;
mod shared_reader;

pub use delayed_dispose::{DelayedDisposeBucket, DelayedDisposeRab};
pub use encrypted::EncryptedBucket;
pub use format::{Magic, read_framed_header, write_framed_header};
pub use no_dispose::NoDisposeBucket;
pub use persist_format::{
    PersistentTempFileRecord, deserialize_base_file, deserialize_delayed_dispose_bucket, deserialize_delayed_dispose_rab,
    deserialize_no_dispose_bucket, deserialize_padded_encrypted, deserialize_persistent_temp_file, serialize_base_file,
    serialize_delayed_dispose_bucket, serialize_delayed_dispose_rab, serialize_no_dispose_bucket, serialize_padded_encrypted,
    serialize_persistent_temp_file,
};
pub use padded::{MIN_PADDED, PaddedBucket, padded_length};
pub use shared_reader::{SharedReaderHandle, SharedReaderSource};

// Licensed under the MIT License.

//! Byte-container storage primitives for Hyphanet's I/O support layer.
//!
//! This crate defines the two container contracts used throughout the workspace —
//! [`Bucket`] (sequential, stream-oriented) and [`Rab`] (fixed-size, positional) — and
//! provides the concrete storage primitives that back them: an in-memory store, a
//! fixed-size in-memory random-access buffer, a file-backed store with atomic
//! rename-on-close writes, a pooled random-access file store, a zero-cost null store,
//! and a read-only slice view over a file range.
//!
//! Higher layers ([`hio-temp`](https://docs.rs/hio-temp), [`hio-wrap`](https://docs.rs/hio-wrap),
//! [`hio-persist`](https://docs.rs/hio-persist)) compose these primitives; this crate knows
//! nothing about RAM tracking, migration, or persistence.

#![warn(missing_docs)]

mod array;
mod bucket;
mod disk_space;
mod error;
mod file_bucket;
mod file_rab;
mod memory;
mod null;
mod rab;
mod read_only_slice;

#[cfg(feature = "test-util")]
pub mod testing;

pub use array::ArrayRab;
pub use bucket::{Bucket, BucketReader, BucketWriter};
pub use disk_space::{DiskSpace, RealDiskSpace};
pub use error::{Error, Result};
pub use file_bucket::FileBucket;
pub use file_rab::FileRab;
pub use memory::MemoryBucket;
pub use null::NullBucket;
pub use rab::{Rab, RabLock};
pub use read_only_slice::ReadOnlySliceBucket;

// Licensed under the MIT License.

use std::io::{Read, Write};

use hio_store::{Error, Result};

/// Magic numbers identifying a serialized container's wrapper/store type.
///
/// Values are preserved exactly as specified; an unrecognized magic on deserialize is
/// always a [`Error::StorageFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Magic {
    /// A raw, file-backed store.
    BaseFile,
    /// A persistent temp-file bucket (base-file plus filename-id and flags).
    PersistentTempFile,
    /// A delayed-dispose wrapper around a bucket.
    DelayedDisposeBucket,
    /// A delayed-dispose wrapper around a RAB.
    DelayedDisposeRab,
    /// A no-dispose wrapper.
    NoDispose,
    /// A padded-to-power-of-two, ephemerally encrypted wrapper.
    PaddedEphemerallyEncrypted,
    /// A RAB-backed bucket view.
    RabBucket,
}

impl Magic {
    /// The 32-bit on-wire value for this magic.
    #[must_use]
    pub const fn value(self) -> u32 {
        match self {
            Self::BaseFile => 0xc4b7_533d,
            Self::PersistentTempFile => 0x2ffd_d4cf,
            Self::DelayedDisposeBucket => 0xa28f_2a2d,
            Self::DelayedDisposeRab => 0x3fb6_45de,
            Self::NoDispose => 0xa88d_a5c2,
            Self::PaddedEphemerallyEncrypted => 0x66c7_1fc9,
            Self::RabBucket => 0x892a_708a,
        }
    }

    fn from_value(value: u32) -> Option<Self> {
        Some(match value {
            0xc4b7_533d => Self::BaseFile,
            0x2ffd_d4cf => Self::PersistentTempFile,
            0xa28f_2a2d => Self::DelayedDisposeBucket,
            0x3fb6_45de => Self::DelayedDisposeRab,
            0xa88d_a5c2 => Self::NoDispose,
            0x66c7_1fc9 => Self::PaddedEphemerallyEncrypted,
            0x892a_708a => Self::RabBucket,
            _ => return None,
        })
    }
}

/// Writes the common `(magic, version)` header every serialized container begins with.
///
/// # Errors
///
/// Returns [`Error::Io`] if the write fails.
pub fn write_framed_header(out: &mut dyn Write, magic: Magic, version: u32) -> Result<()> {
    out.write_all(&magic.value().to_be_bytes())?;
    out.write_all(&version.to_be_bytes())?;
    Ok(())
}

/// Reads and validates the common `(magic, version)` header, returning the decoded
/// magic and the version that followed it.
///
/// # Errors
///
/// Returns [`Error::Io`] on a short read, and [`Error::StorageFormat`] if the magic is
/// not one of [`Magic`]'s known values.
pub fn read_framed_header(input: &mut dyn Read) -> Result<(Magic, u32)> {
    let mut buf = [0_u8; 4];
    input.read_exact(&mut buf)?;
    let magic_value = u32::from_be_bytes(buf);
    input.read_exact(&mut buf)?;
    let version = u32::from_be_bytes(buf);
    let magic = Magic::from_value(magic_value).ok_or(Error::StorageFormat {
        magic: magic_value,
        version,
    })?;
    Ok((magic, version))
}

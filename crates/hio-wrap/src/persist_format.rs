// Licensed under the MIT License.

//! Wire serialization for every registered wrapper format.
//!
//! A serialized container is a chain of `(magic, version, wrapper-specific fields)`
//! frames ending in the [`Magic::BaseFile`] leaf. [`Magic::PaddedEphemerallyEncrypted`]
//! and [`Magic::PersistentTempFile`] are fixed compositions — the exact shapes
//! `hio-persist`'s own wrapping order produces — so their `serialize`/`deserialize`
//! pairs are concretely typed over the wrapper structs involved.
//!
//! [`DelayedDisposeBucket`]/[`DelayedDisposeRab`]/[`NoDisposeBucket`] can wrap anything,
//! so their framing functions take the recursive step as a closure instead: the caller,
//! who still has the concrete inner type in hand, supplies a `write_inner`/`read_inner`
//! callback that recurses into whichever of these functions (or [`serialize_base_file`])
//! actually applies. This keeps recursion open-ended without adding a
//! `serialize`/`deserialize` method to the `Bucket`/`Rab` trait surface itself.

use std::io::{Read, Write};
use std::path::PathBuf;

use hio_store::{Bucket, Error, FileBucket, Result};

use crate::delayed_dispose::{DelayedDisposeBucket, DelayedDisposeRab};
use crate::encrypted::EncryptedBucket;
use crate::format::{Magic, read_framed_header, write_framed_header};
use crate::no_dispose::NoDisposeBucket;
use crate::padded::{MIN_PADDED, PaddedBucket};

/// Writes `bucket`'s base-file wire representation: magic, version 1, and a single
/// "closed" flag byte recording whether a writer has ever committed to it.
///
/// # Errors
///
/// Returns [`Error::Io`] if the write fails.
pub fn serialize_base_file(bucket: &FileBucket, out: &mut dyn Write) -> Result<()> {
    write_framed_header(out, Magic::BaseFile, 1)?;
    out.write_all(&[u8::from(bucket.is_written())])?;
    Ok(())
}

/// Reads a base-file wire representation produced by [`serialize_base_file`], rebinding
/// it to `path` (the backing path is a caller concern here — filename generation and
/// layout are an external collaborator's contract, out of scope for this crate).
///
/// # Errors
///
/// Returns [`Error::StorageFormat`] if the magic is not [`Magic::BaseFile`] or the
/// version is unrecognized, and [`Error::Io`] on a short read or if `path` does not
/// exist while the closed flag claims it should.
pub fn deserialize_base_file(input: &mut dyn Read, path: impl Into<PathBuf>) -> Result<FileBucket> {
    let (magic, version) = read_framed_header(input)?;
    if magic != Magic::BaseFile || version != 1 {
        return Err(Error::StorageFormat {
            magic: magic.value(),
            version,
        });
    }
    let mut flag = [0_u8; 1];
    input.read_exact(&mut flag)?;
    let path = path.into();
    if flag[0] != 0 {
        FileBucket::from_existing(path)
    } else {
        Ok(FileBucket::new(path))
    }
}

/// Writes the wire representation of an encrypted-and-padded bucket: the padding
/// floor, the encryption key, a (currently always unset) framed-IV flag, the logical
/// data length, a read-only flag, and the recursed base file.
///
/// The wrapped IV lives inline as the first bytes of the encrypted stream itself (see
/// `encrypted.rs`), not as separate framed metadata, so the IV flag is always `0`; the
/// byte is still reserved on the wire so a future keyed-IV scheme can turn it on without
/// a version bump. `hio-persist` always nests `EncryptedBucket(PaddedBucket(FileBucket))`
/// in exactly this shape (see `wrap_for_disk`), which is why this pair is concretely
/// typed instead of taking a recursion closure like the delayed-dispose formats.
///
/// # Errors
///
/// Returns [`Error::Io`] if the write fails.
pub fn serialize_padded_encrypted(
    encrypted: &EncryptedBucket,
    padded: &PaddedBucket,
    file: &FileBucket,
    out: &mut dyn Write,
) -> Result<()> {
    write_framed_header(out, Magic::PaddedEphemerallyEncrypted, 1)?;
    out.write_all(&u32::try_from(MIN_PADDED).unwrap_or(u32::MAX).to_be_bytes())?;
    out.write_all(&encrypted.key())?;
    out.write_all(&[0_u8])?;
    let data_length = padded.data_length().unwrap_or(0);
    out.write_all(&data_length.to_be_bytes())?;
    out.write_all(&[u8::from(encrypted.is_read_only())])?;
    serialize_base_file(file, out)
}

/// Reads a wire representation produced by [`serialize_padded_encrypted`], rebuilding
/// the `EncryptedBucket(PaddedBucket(FileBucket))` chain rebound to `path`.
///
/// # Errors
///
/// Returns [`Error::StorageFormat`] if the magic or version do not match, and
/// [`Error::Io`] on a short read or missing backing file.
pub fn deserialize_padded_encrypted(input: &mut dyn Read, path: impl Into<PathBuf>) -> Result<EncryptedBucket> {
    let (magic, version) = read_framed_header(input)?;
    if magic != Magic::PaddedEphemerallyEncrypted || version != 1 {
        return Err(Error::StorageFormat {
            magic: magic.value(),
            version,
        });
    }
    let mut min_padded_buf = [0_u8; 4];
    input.read_exact(&mut min_padded_buf)?;
    let mut key = [0_u8; 16];
    input.read_exact(&mut key)?;
    let mut iv_flag = [0_u8; 1];
    input.read_exact(&mut iv_flag)?;
    if iv_flag[0] != 0 {
        let mut discarded_iv = [0_u8; 32];
        input.read_exact(&mut discarded_iv)?;
    }
    let mut data_length_buf = [0_u8; 8];
    input.read_exact(&mut data_length_buf)?;
    let data_length = u64::from_be_bytes(data_length_buf);
    let mut read_only_buf = [0_u8; 1];
    input.read_exact(&mut read_only_buf)?;

    let file = deserialize_base_file(input, path)?;
    let padded = PaddedBucket::from_resumed(Box::new(file), data_length);
    let encrypted = EncryptedBucket::new(Box::new(padded), key);
    if read_only_buf[0] != 0 {
        encrypted.set_read_only();
    }
    Ok(encrypted)
}

/// Everything recovered from a [`Magic::PersistentTempFile`] wire record: the resumed
/// base file plus the identity and lifecycle fields a persistent-temp manager keeps
/// alongside it.
#[derive(Debug)]
pub struct PersistentTempFileRecord {
    /// The resumed base file.
    pub bucket: FileBucket,
    /// The manager's counter-assigned identity for this file, used to regenerate its
    /// path deterministically on a fresh run.
    pub filename_id: u64,
    /// Whether the owning manager should remove the backing file on disposal.
    pub delete_on_dispose: bool,
    /// The file name this record was resumed under.
    pub filename: String,
}

/// Writes a persistent temp-file bucket's wire representation: the base-file fields
/// inlined (no nested magic — there is exactly one base file here, not an arbitrary
/// recursion), then the filename id, read-only and delete-on-dispose flags, and the
/// filename as a length-prefixed UTF-8 string.
///
/// # Errors
///
/// Returns [`Error::Io`] if the write fails.
pub fn serialize_persistent_temp_file(
    bucket: &FileBucket,
    filename_id: u64,
    delete_on_dispose: bool,
    filename: &str,
    out: &mut dyn Write,
) -> Result<()> {
    write_framed_header(out, Magic::PersistentTempFile, 1)?;
    out.write_all(&[u8::from(bucket.is_written())])?;
    out.write_all(&filename_id.to_be_bytes())?;
    out.write_all(&[u8::from(bucket.is_read_only())])?;
    out.write_all(&[u8::from(delete_on_dispose)])?;
    let name_bytes = filename.as_bytes();
    out.write_all(&u32::try_from(name_bytes.len()).unwrap_or(u32::MAX).to_be_bytes())?;
    out.write_all(name_bytes)?;
    Ok(())
}

/// Reads a persistent temp-file bucket's wire representation, calling `path_for_filename`
/// with the recovered filename to regenerate the path to rebind the resumed file to.
///
/// # Errors
///
/// Returns [`Error::StorageFormat`] if the magic or version do not match,
/// [`Error::ResumeFailed`] if the filename is not valid UTF-8, and [`Error::Io`] on a
/// short read or missing backing file.
pub fn deserialize_persistent_temp_file(
    input: &mut dyn Read,
    path_for_filename: impl FnOnce(&str) -> PathBuf,
) -> Result<PersistentTempFileRecord> {
    let (magic, version) = read_framed_header(input)?;
    if magic != Magic::PersistentTempFile || version != 1 {
        return Err(Error::StorageFormat {
            magic: magic.value(),
            version,
        });
    }
    let mut closed = [0_u8; 1];
    input.read_exact(&mut closed)?;
    let mut id_buf = [0_u8; 8];
    input.read_exact(&mut id_buf)?;
    let filename_id = u64::from_be_bytes(id_buf);
    let mut read_only_buf = [0_u8; 1];
    input.read_exact(&mut read_only_buf)?;
    let mut delete_buf = [0_u8; 1];
    input.read_exact(&mut delete_buf)?;
    let mut len_buf = [0_u8; 4];
    input.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut name_buf = vec![0_u8; len];
    input.read_exact(&mut name_buf)?;
    let filename = String::from_utf8(name_buf).map_err(|_| Error::ResumeFailed {
        path: PathBuf::new(),
        reason: "persistent temp-file record's filename is not valid UTF-8".to_owned(),
    })?;

    let path = path_for_filename(&filename);
    let bucket = if closed[0] != 0 {
        FileBucket::from_existing(&path)?
    } else {
        FileBucket::new(&path)
    };
    if read_only_buf[0] != 0 {
        bucket.set_read_only();
    }
    Ok(PersistentTempFileRecord {
        bucket,
        filename_id,
        delete_on_dispose: delete_buf[0] != 0,
        filename,
    })
}

/// Writes a delayed-dispose bucket's wire representation: the commit id, the
/// to-dispose flag, then `write_inner` recurses into whichever format the wrapped
/// bucket actually is.
///
/// # Errors
///
/// Returns [`Error::Io`] if the write fails, or whatever error `write_inner` returns.
pub fn serialize_delayed_dispose_bucket(
    wrapper: &DelayedDisposeBucket,
    out: &mut dyn Write,
    write_inner: impl FnOnce(&mut dyn Write) -> Result<()>,
) -> Result<()> {
    write_framed_header(out, Magic::DelayedDisposeBucket, 1)?;
    out.write_all(&wrapper.commit_id().to_be_bytes())?;
    out.write_all(&[u8::from(wrapper.to_dispose())])?;
    write_inner(out)
}

/// Reads a delayed-dispose bucket's wire representation, calling `read_inner` to
/// recurse into the wrapped store and returning `(commit_id, to_dispose, inner)` for
/// the caller to rebuild a [`DelayedDisposeBucket`] with `from_resumed`-equivalent
/// state.
///
/// # Errors
///
/// Returns [`Error::StorageFormat`] if the magic or version do not match, and
/// [`Error::Io`] on a short read, or whatever error `read_inner` returns.
pub fn deserialize_delayed_dispose_bucket<T>(
    input: &mut dyn Read,
    read_inner: impl FnOnce(&mut dyn Read) -> Result<T>,
) -> Result<(u64, bool, T)> {
    let (magic, version) = read_framed_header(input)?;
    if magic != Magic::DelayedDisposeBucket || version != 1 {
        return Err(Error::StorageFormat {
            magic: magic.value(),
            version,
        });
    }
    let mut id_buf = [0_u8; 8];
    input.read_exact(&mut id_buf)?;
    let commit_id = u64::from_be_bytes(id_buf);
    let mut flag = [0_u8; 1];
    input.read_exact(&mut flag)?;
    let inner = read_inner(input)?;
    Ok((commit_id, flag[0] != 0, inner))
}

/// Writes a delayed-dispose RAB's wire representation. Mirrors
/// [`serialize_delayed_dispose_bucket`].
///
/// # Errors
///
/// Returns [`Error::Io`] if the write fails, or whatever error `write_inner` returns.
pub fn serialize_delayed_dispose_rab(
    wrapper: &DelayedDisposeRab,
    out: &mut dyn Write,
    write_inner: impl FnOnce(&mut dyn Write) -> Result<()>,
) -> Result<()> {
    write_framed_header(out, Magic::DelayedDisposeRab, 1)?;
    out.write_all(&wrapper.commit_id().to_be_bytes())?;
    out.write_all(&[u8::from(wrapper.to_dispose())])?;
    write_inner(out)
}

/// Reads a delayed-dispose RAB's wire representation. Mirrors
/// [`deserialize_delayed_dispose_bucket`].
///
/// # Errors
///
/// Returns [`Error::StorageFormat`] if the magic or version do not match, and
/// [`Error::Io`] on a short read, or whatever error `read_inner` returns.
pub fn deserialize_delayed_dispose_rab<T>(
    input: &mut dyn Read,
    read_inner: impl FnOnce(&mut dyn Read) -> Result<T>,
) -> Result<(u64, bool, T)> {
    let (magic, version) = read_framed_header(input)?;
    if magic != Magic::DelayedDisposeRab || version != 1 {
        return Err(Error::StorageFormat {
            magic: magic.value(),
            version,
        });
    }
    let mut id_buf = [0_u8; 8];
    input.read_exact(&mut id_buf)?;
    let commit_id = u64::from_be_bytes(id_buf);
    let mut flag = [0_u8; 1];
    input.read_exact(&mut flag)?;
    let inner = read_inner(input)?;
    Ok((commit_id, flag[0] != 0, inner))
}

/// Writes a no-dispose wrapper's wire representation: just the header, then
/// `write_inner` recurses into the wrapped store.
///
/// # Errors
///
/// Returns [`Error::Io`] if the write fails, or whatever error `write_inner` returns.
pub fn serialize_no_dispose_bucket(out: &mut dyn Write, write_inner: impl FnOnce(&mut dyn Write) -> Result<()>) -> Result<()> {
    write_framed_header(out, Magic::NoDispose, 1)?;
    write_inner(out)
}

/// Reads a no-dispose wrapper's wire representation, calling `read_inner` to recurse
/// into the wrapped store.
///
/// # Errors
///
/// Returns [`Error::StorageFormat`] if the magic or version do not match, and
/// [`Error::Io`] on a short read, or whatever error `read_inner` returns.
pub fn deserialize_no_dispose_bucket<T>(
    input: &mut dyn Read,
    read_inner: impl FnOnce(&mut dyn Read) -> Result<T>,
) -> Result<T> {
    let (magic, version) = read_framed_header(input)?;
    if magic != Magic::NoDispose || version != 1 {
        return Err(Error::StorageFormat {
            magic: magic.value(),
            version,
        });
    }
    read_inner(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::tempdir;

    #[test]
    fn round_trips_a_written_base_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.dat");
        let bucket = FileBucket::new(&path);
        let mut w = bucket.open_writer().unwrap();
        w.write_all(b"payload").unwrap();
        w.close().unwrap();

        let mut buf = Vec::new();
        serialize_base_file(&bucket, &mut buf).unwrap();

        let resumed = deserialize_base_file(&mut buf.as_slice(), &path).unwrap();
        assert!(resumed.is_read_only());
        assert_eq!(resumed.size(), 7);
    }

    #[test]
    fn round_trips_an_unwritten_base_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.dat");
        let bucket = FileBucket::new(&path);

        let mut buf = Vec::new();
        serialize_base_file(&bucket, &mut buf).unwrap();

        let resumed = deserialize_base_file(&mut buf.as_slice(), &path).unwrap();
        assert!(!resumed.is_read_only());
        assert_eq!(resumed.size(), 0);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let buf = [0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 1, 0];
        let err = deserialize_base_file(&mut &buf[..], "/tmp/unused").unwrap_err();
        assert!(matches!(err, Error::StorageFormat { .. }));
    }

    #[test]
    fn round_trips_a_padded_encrypted_bucket() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.dat");
        // `file`/`padded` are cloned (Arc-backed) before being boxed into the next
        // layer, so they keep observing the same state the `encrypted` handle writes
        // through, right up to the point where `serialize_padded_encrypted` reads it.
        let file = FileBucket::new(&path);
        let padded = PaddedBucket::new(Box::new(file.clone()));
        let encrypted = EncryptedBucket::with_random_key(Box::new(padded.clone()));

        let mut w = encrypted.open_writer().unwrap();
        w.write_all(b"top secret").unwrap();
        w.close().unwrap();

        let mut buf = Vec::new();
        serialize_padded_encrypted(&encrypted, &padded, &file, &mut buf).unwrap();

        let resumed = deserialize_padded_encrypted(&mut buf.as_slice(), &path).unwrap();
        let mut r = resumed.open_reader().unwrap();
        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut r, &mut out).unwrap();
        assert_eq!(out, b"top secret");
    }

    #[test]
    fn round_trips_a_persistent_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t-7.tmp");
        let bucket = FileBucket::new(&path);
        let mut w = bucket.open_writer().unwrap();
        w.write_all(b"resumable").unwrap();
        w.close().unwrap();

        let mut buf = Vec::new();
        serialize_persistent_temp_file(&bucket, 7, true, "t-7.tmp", &mut buf).unwrap();

        let dir_path = dir.path().to_path_buf();
        let record = deserialize_persistent_temp_file(&mut buf.as_slice(), |name| dir_path.join(name)).unwrap();
        assert_eq!(record.filename_id, 7);
        assert!(record.delete_on_dispose);
        assert_eq!(record.filename, "t-7.tmp");
        assert_eq!(record.bucket.size(), 9);
        assert!(record.bucket.is_read_only());
    }

    #[test]
    fn round_trips_a_delayed_dispose_bucket_over_a_base_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.dat");
        let file = FileBucket::new(&path);
        let mut w = file.open_writer().unwrap();
        w.write_all(b"abc").unwrap();
        w.close().unwrap();

        let wrapper = DelayedDisposeBucket::new(Box::new(file), 42);
        wrapper.dispose();

        let mut buf = Vec::new();
        serialize_delayed_dispose_bucket(&wrapper, &mut buf, |w| {
            let leaf = FileBucket::from_existing(&path).unwrap();
            serialize_base_file(&leaf, w)
        })
        .unwrap();

        let (commit_id, to_dispose, inner) =
            deserialize_delayed_dispose_bucket(&mut buf.as_slice(), |r| deserialize_base_file(r, &path)).unwrap();
        assert_eq!(commit_id, 42);
        assert!(to_dispose);
        assert_eq!(inner.size(), 3);

        let resumed = DelayedDisposeBucket::from_resumed(Box::new(inner), commit_id, to_dispose);
        assert!(resumed.to_dispose());
        assert_eq!(resumed.commit_id(), 42);
    }

    #[test]
    fn round_trips_a_delayed_dispose_rab_over_a_file_rab() {
        use hio_store::{FileRab, Rab as _};

        let dir = tempdir().unwrap();
        let path = dir.path().join("r.dat");
        let file_rab = FileRab::create(&path, 16).unwrap();
        file_rab.pwrite(0, b"0123456789abcdef").unwrap();

        let wrapper = DelayedDisposeRab::new(Box::new(file_rab), 9);

        let mut buf = Vec::new();
        serialize_delayed_dispose_rab(&wrapper, &mut buf, |w| {
            w.write_all(&16_u64.to_be_bytes())?;
            w.write_all(&[0_u8])?;
            Ok(())
        })
        .unwrap();

        let (commit_id, to_dispose, size) = deserialize_delayed_dispose_rab(&mut buf.as_slice(), |r| {
            let mut size_buf = [0_u8; 8];
            r.read_exact(&mut size_buf)?;
            let mut read_only_buf = [0_u8; 1];
            r.read_exact(&mut read_only_buf)?;
            Ok(u64::from_be_bytes(size_buf))
        })
        .unwrap();
        assert_eq!(commit_id, 9);
        assert!(!to_dispose);

        let resumed_rab = FileRab::open_existing(&path, size, false).unwrap();
        let resumed = DelayedDisposeRab::from_resumed(Box::new(resumed_rab), commit_id, to_dispose);
        let mut out = [0_u8; 16];
        resumed.pread(0, &mut out).unwrap();
        assert_eq!(&out, b"0123456789abcdef");
    }

    #[test]
    fn round_trips_a_no_dispose_bucket_over_a_base_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.dat");
        let file = FileBucket::new(&path);
        let mut w = file.open_writer().unwrap();
        w.write_all(b"xyz").unwrap();
        w.close().unwrap();

        let mut buf = Vec::new();
        serialize_no_dispose_bucket(&mut buf, |w| serialize_base_file(&file, w)).unwrap();

        let inner = deserialize_no_dispose_bucket(&mut buf.as_slice(), |r| deserialize_base_file(r, &path)).unwrap();
        assert_eq!(inner.size(), 3);

        let resumed = NoDisposeBucket::new(Box::new(inner));
        resumed.dispose();
        assert!(!resumed.is_disposed());
    }
}

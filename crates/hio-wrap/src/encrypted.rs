// Licensed under the MIT License.

use std::io::{self, Read, Write};
use std::sync::Arc;

use aes::Aes128;
use cfb_mode::cipher::KeyIvInit;
use cfb_mode::{BufDecryptor, BufEncryptor};
use hio_store::{Bucket, BucketReader, BucketWriter, Result};
use parking_lot::Mutex;

const IV_LEN: usize = 16;

type Aes128CfbEnc = BufEncryptor<Aes128>;
type Aes128CfbDec = BufDecryptor<Aes128>;

struct State {
    store: Box<dyn Bucket>,
    key: [u8; 16],
}

/// Encrypts a stream with AES-128 in CFB mode, using a random ephemeral key supplied at
/// construction and a random IV generated fresh for every writer.
///
/// The IV is written as a 16-byte header in front of the ciphertext, read back by the
/// reader to reconstruct the cipher state; [`Bucket::size`] reports the logical
/// (plaintext) length, excluding that header.
#[derive(Clone)]
pub struct EncryptedBucket {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for EncryptedBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedBucket").finish_non_exhaustive()
    }
}

impl EncryptedBucket {
    /// Wraps `store` with a caller-supplied 128-bit key.
    #[must_use]
    pub fn new(store: Box<dyn Bucket>, key: [u8; 16]) -> Self {
        Self {
            state: Arc::new(Mutex::new(State { store, key })),
        }
    }

    /// Wraps `store` with a freshly generated random key.
    #[must_use]
    pub fn with_random_key(store: Box<dyn Bucket>) -> Self {
        let mut key = [0_u8; 16];
        fastrand::fill(&mut key);
        Self::new(store, key)
    }

    /// The key this bucket encrypts with, for the persistence layer's wire format.
    #[must_use]
    pub(crate) fn key(&self) -> [u8; 16] {
        self.state.lock().key
    }
}

impl Bucket for EncryptedBucket {
    fn open_writer(&self) -> Result<Box<dyn BucketWriter>> {
        let state = self.state.lock();
        let mut inner = state.store.open_writer()?;
        let mut iv = [0_u8; IV_LEN];
        fastrand::fill(&mut iv);
        inner.write_all(&iv)?;
        let cipher = Aes128CfbEnc::new(&state.key.into(), &iv.into());
        Ok(Box::new(EncryptedWriter {
            inner,
            cipher,
            plaintext_len: 0,
        }))
    }

    fn open_reader(&self) -> Result<Box<dyn BucketReader>> {
        let state = self.state.lock();
        let mut inner = state.store.open_reader()?;
        let mut iv = [0_u8; IV_LEN];
        inner.read_exact(&mut iv)?;
        let cipher = Aes128CfbDec::new(&state.key.into(), &iv.into());
        Ok(Box::new(EncryptedReader { inner, cipher }))
    }

    fn size(&self) -> u64 {
        self.state.lock().store.size().saturating_sub(IV_LEN as u64)
    }

    fn is_read_only(&self) -> bool {
        self.state.lock().store.is_read_only()
    }

    fn set_read_only(&self) {
        self.state.lock().store.set_read_only();
    }

    fn is_disposed(&self) -> bool {
        self.state.lock().store.is_disposed()
    }

    fn close(&self) {
        self.state.lock().store.close();
    }

    fn dispose(&self) {
        self.state.lock().store.dispose();
    }

    fn create_shadow(&self) -> Result<Box<dyn Bucket>> {
        let state = self.state.lock();
        let shadow_store = state.store.create_shadow()?;
        Ok(Box::new(Self {
            state: Arc::new(Mutex::new(State {
                store: shadow_store,
                key: state.key,
            })),
        }))
    }

    fn is_ram_backed(&self) -> bool {
        self.state.lock().store.is_ram_backed()
    }
}

struct EncryptedWriter {
    inner: Box<dyn BucketWriter>,
    cipher: Aes128CfbEnc,
    plaintext_len: u64,
}

impl Write for EncryptedWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = data.to_vec();
        self.cipher.encrypt(&mut buf);
        self.inner.write_all(&buf)?;
        self.plaintext_len += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl BucketWriter for EncryptedWriter {
    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

impl Drop for EncryptedWriter {
    fn drop(&mut self) {
        let _ = BucketWriter::close(self);
    }
}

struct EncryptedReader {
    inner: Box<dyn BucketReader>,
    cipher: Aes128CfbDec,
}

impl Read for EncryptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.decrypt(&mut buf[..n]);
        Ok(n)
    }
}

impl BucketReader for EncryptedReader {}

//! Byte-stream cursor over the two halves of a live socket.
//!
//! [`WireReader`] and [`WireWriter`] are the only layer that touches raw
//! socket bytes. They support exact reads, raw writes, and varint
//! reads/writes, and share a [`StreamCrypto`] cell: once a shared secret
//! is armed, every subsequent byte is run through AES-128-CFB8 (read side
//! decrypts, write side encrypts) transparently to all call sites, which
//! only ever see plaintext logical bytes. Arming is one-way; encryption is
//! never removed for the life of the connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use aes::cipher::inout::InOutBuf;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::varint::MAX_VARINT_LEN;
use crate::error::{ProtocolError, Result};

type Aes128Cfb8Enc = cfb8::Encryptor<Aes128>;
type Aes128Cfb8Dec = cfb8::Decryptor<Aes128>;

/// Expected shared secret length: AES-128 key material, also used as the IV.
pub const SHARED_SECRET_LEN: usize = 16;

/// Shared cipher state for one connection's reader and writer.
///
/// Starts disarmed (all bytes pass through). [`StreamCrypto::arm`] installs
/// the read-side decryptor and write-side encryptor exactly once.
#[derive(Default)]
pub struct StreamCrypto {
    armed: AtomicBool,
    read: Mutex<Option<Aes128Cfb8Dec>>,
    write: Mutex<Option<Aes128Cfb8Enc>>,
}

impl StreamCrypto {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the shared secret, switching both directions into encrypted
    /// mode from the next byte onward.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::InvalidSecret`] if the secret is not 16 bytes.
    /// - [`ProtocolError::AlreadyEncrypted`] on a second call; arming is
    ///   deliberately not a no-op, since a renegotiation attempt is a
    ///   protocol violation worth surfacing.
    pub fn arm(&self, secret: &[u8]) -> Result<()> {
        if secret.len() != SHARED_SECRET_LEN {
            return Err(ProtocolError::InvalidSecret(secret.len()));
        }

        if self
            .armed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ProtocolError::AlreadyEncrypted);
        }

        // Key and IV are both the shared secret, per the modeled protocol.
        let dec = Aes128Cfb8Dec::new_from_slices(secret, secret)
            .map_err(|_| ProtocolError::InvalidSecret(secret.len()))?;
        let enc = Aes128Cfb8Enc::new_from_slices(secret, secret)
            .map_err(|_| ProtocolError::InvalidSecret(secret.len()))?;

        *self
            .read
            .lock()
            .map_err(|_| ProtocolError::Custom("cipher lock poisoned".into()))? = Some(dec);
        *self
            .write
            .lock()
            .map_err(|_| ProtocolError::Custom("cipher lock poisoned".into()))? = Some(enc);

        Ok(())
    }

    /// Whether a shared secret has been installed.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    fn decrypt(&self, data: &mut [u8]) -> Result<()> {
        let mut guard = self
            .read
            .lock()
            .map_err(|_| ProtocolError::Custom("cipher lock poisoned".into()))?;
        if let Some(cipher) = guard.as_mut() {
            let (chunks, _rest) = InOutBuf::from(data).into_chunks();
            cipher.decrypt_blocks_inout_mut(chunks);
        }
        Ok(())
    }

    fn encrypt(&self, data: &mut [u8]) -> Result<()> {
        let mut guard = self
            .write
            .lock()
            .map_err(|_| ProtocolError::Custom("cipher lock poisoned".into()))?;
        if let Some(cipher) = guard.as_mut() {
            let (chunks, _rest) = InOutBuf::from(data).into_chunks();
            cipher.encrypt_blocks_inout_mut(chunks);
        }
        Ok(())
    }
}

/// Read side of the cursor. Exclusively owned by the read loop.
pub struct WireReader<R> {
    inner: R,
    crypto: Arc<StreamCrypto>,
}

impl<R: AsyncRead + Unpin> WireReader<R> {
    pub fn new(inner: R, crypto: Arc<StreamCrypto>) -> Self {
        Self { inner, crypto }
    }

    /// Read exactly `buf.len()` bytes, decrypting in place when armed.
    pub async fn read_exact_into(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf).await?;
        if self.crypto.is_armed() {
            self.crypto.decrypt(buf)?;
        }
        Ok(())
    }

    /// Read exactly `n` plaintext bytes.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read_exact_into(&mut buf).await?;
        Ok(buf)
    }

    pub async fn read_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact_into(&mut byte).await?;
        Ok(byte[0])
    }

    /// Read a varint off the stream, returning the value and the number of
    /// bytes consumed.
    pub async fn read_varint(&mut self) -> Result<(i32, usize)> {
        let mut value: i32 = 0;
        let mut position: u32 = 0;
        let mut consumed = 0usize;

        loop {
            let byte = self.read_u8().await?;
            consumed += 1;
            value |= i32::from(byte & 0x7F) << position;

            if byte & 0x80 == 0 {
                break;
            }

            position += 7;
            if consumed >= MAX_VARINT_LEN {
                return Err(ProtocolError::MalformedVarint);
            }
        }

        Ok((value, consumed))
    }
}

/// Write side of the cursor. Exclusively owned by the write loop.
pub struct WireWriter<W> {
    inner: W,
    crypto: Arc<StreamCrypto>,
    scratch: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> WireWriter<W> {
    pub fn new(inner: W, crypto: Arc<StreamCrypto>) -> Self {
        Self {
            inner,
            crypto,
            scratch: Vec::new(),
        }
    }

    /// Write all of `data`, encrypting when armed. The caller's buffer is
    /// never mutated; ciphertext goes through an internal scratch buffer.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if self.crypto.is_armed() {
            self.scratch.clear();
            self.scratch.extend_from_slice(data);
            self.crypto.encrypt(&mut self.scratch)?;
            self.inner.write_all(&self.scratch).await?;
        } else {
            self.inner.write_all(data).await?;
        }
        Ok(())
    }

    pub async fn write_varint(&mut self, value: i32) -> Result<usize> {
        let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
        let written = crate::core::varint::write_varint(&mut buf, value);
        self.write_all(&buf).await?;
        Ok(written)
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the underlying stream, flushing buffered data first.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

//! Blob-level integrity hash over the ciphertext
//!
//! Unkeyed BLAKE2b with a 32-byte digest (libsodium `crypto_generichash`
//! defaults), one running context per record, fed each sealed chunk in index
//! order. This guards the stored object as a whole; per-chunk authenticity
//! comes from the AEAD tags.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use carechain_core::{CarechainError, CarechainResult};
use tokio::io::{AsyncRead, AsyncReadExt};

type Blake2b256 = Blake2b<U32>;

/// Read buffer for hashing a blob from a stream.
const READ_BUF: usize = 64 * 1024;

/// 32-byte digest of the concatenated ciphertext chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherHash([u8; 32]);

impl CipherHash {
    /// Lowercase hex (64 chars), as written to the descriptor
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex: &str) -> CarechainResult<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|e| CarechainError::metadata(format!("invalid cipher_hash '{hex}': {e}")))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash a whole ciphertext blob in one pass.
    pub fn of_blob(blob: &[u8]) -> Self {
        let mut hasher = CipherHasher::new();
        hasher.update(blob);
        hasher.finalize()
    }
}

/// Running hash context, order-dependent.
#[derive(Default, Clone)]
pub struct CipherHasher {
    inner: Blake2b256,
    chunks: u64,
}

impl CipherHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, sealed_chunk: &[u8]) {
        Digest::update(&mut self.inner, sealed_chunk);
        self.chunks += 1;
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn finalize(&self) -> CipherHash {
        let digest = self.inner.clone().finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        CipherHash(out)
    }
}

/// Compare a computed hash against the published one.
pub fn check_hash(actual: &CipherHash, expected: &CipherHash) -> CarechainResult<()> {
    if actual != expected {
        return Err(CarechainError::CipherHashMismatch {
            expected: expected.to_hex(),
            actual: actual.to_hex(),
        });
    }
    Ok(())
}

/// Recompute the blob hash and compare against the published one.
pub fn verify_blob(blob: &[u8], expected: &CipherHash) -> CarechainResult<()> {
    check_hash(&CipherHash::of_blob(blob), expected)
}

/// Hash a blob from a reader without holding it in memory. Returns the digest
/// and the number of bytes read.
pub async fn hash_reader<R>(reader: &mut R) -> CarechainResult<(CipherHash, u64)>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = CipherHasher::new();
    let mut buf = vec![0u8; READ_BUF];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    Ok((hasher.finalize(), total))
}

//! Per-chunk XChaCha20-Poly1305 encryption/decryption
//!
//! Encrypted chunk format (binary):
//! ```text
//! [N bytes: ciphertext][16 bytes: Poly1305 tag]
//! nonce = derive_nonce(base_nonce, chunk_index)   (not stored per chunk)
//! AAD   = record context string
//! ```
//!
//! Chunk position is bound through the nonce, so swapping two chunks fails
//! authentication just like flipping a bit.

use carechain_core::{CarechainError, CarechainResult};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};

use crate::keys::DataKey;
use crate::nonce::{derive_nonce, BaseNonce};
use crate::TAG_SIZE;

/// Chunk cipher bound to one record's data key and base nonce.
///
/// The key is expanded into a single AEAD instance here and shared by every
/// chunk of the record, so the caller's `DataKey` can be wiped right away.
#[derive(Clone)]
pub struct ChunkCipher {
    aead: XChaCha20Poly1305,
    base_nonce: BaseNonce,
}

impl ChunkCipher {
    pub fn new(key: &DataKey, base_nonce: BaseNonce) -> Self {
        Self {
            aead: XChaCha20Poly1305::new(key.as_bytes().into()),
            base_nonce,
        }
    }

    /// Encrypt one chunk. Returns `[ciphertext][16-byte tag]`.
    pub fn seal(&self, index: u64, aad: &[u8], plaintext: &[u8]) -> CarechainResult<Vec<u8>> {
        let nonce = derive_nonce(&self.base_nonce, index)?;

        self.aead
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| CarechainError::Other(anyhow::anyhow!("chunk {index} encryption failed: {e}")))
    }

    /// Decrypt one chunk. Fails closed: no plaintext on any mismatch.
    pub fn open(&self, index: u64, aad: &[u8], sealed: &[u8]) -> CarechainResult<Vec<u8>> {
        if sealed.len() < TAG_SIZE {
            return Err(CarechainError::Authentication { chunk: index });
        }

        let nonce = derive_nonce(&self.base_nonce, index)?;

        self.aead
            .decrypt(
                XNonce::from_slice(&nonce),
                Payload { msg: sealed, aad },
            )
            .map_err(|_| CarechainError::Authentication { chunk: index })
    }
}

impl std::fmt::Debug for ChunkCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCipher")
            .field("key", &"[REDACTED]")
            .field("base_nonce", &self.base_nonce)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NONCE_SIZE;

    const AAD: &[u8] = b"record_id=test-0001";

    fn test_cipher() -> ChunkCipher {
        ChunkCipher::new(&DataKey::generate(), BaseNonce::generate())
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = test_cipher();
        let plaintext = b"hello, encrypted world!";

        let sealed = cipher.seal(0, AAD, plaintext).unwrap();
        let opened = cipher.open(0, AAD, &sealed).unwrap();

        assert_eq!(&opened, plaintext);
    }

    #[test]
    fn test_seal_open_empty() {
        let cipher = test_cipher();

        let sealed = cipher.seal(0, AAD, b"").unwrap();
        assert_eq!(sealed.len(), TAG_SIZE);
        assert_eq!(cipher.open(0, AAD, &sealed).unwrap(), b"");
    }

    #[test]
    fn test_sealed_size() {
        let cipher = test_cipher();
        let sealed = cipher.seal(0, AAD, &vec![0u8; 1000]).unwrap();

        // plaintext (1000) + tag (16), nonce is derived not stored
        assert_eq!(sealed.len(), 1000 + TAG_SIZE);
    }

    #[test]
    fn test_open_wrong_key() {
        let base = BaseNonce::generate();
        let a = ChunkCipher::new(&DataKey::generate(), base);
        let b = ChunkCipher::new(&DataKey::generate(), base);

        let sealed = a.seal(0, AAD, b"secret data").unwrap();
        assert!(b.open(0, AAD, &sealed).is_err());
    }

    #[test]
    fn test_open_wrong_index() {
        let cipher = test_cipher();
        let sealed = cipher.seal(0, AAD, b"secret data").unwrap();

        let err = cipher.open(1, AAD, &sealed).unwrap_err();
        assert!(
            matches!(err, CarechainError::Authentication { chunk: 1 }),
            "wrong chunk index must fail (nonce mismatch)"
        );
    }

    #[test]
    fn test_open_wrong_aad() {
        let cipher = test_cipher();
        let sealed = cipher.seal(0, AAD, b"secret data").unwrap();

        assert!(cipher.open(0, b"record_id=other", &sealed).is_err());
    }

    #[test]
    fn test_open_wrong_base_nonce() {
        let key = DataKey::generate();
        let mut base = [3u8; NONCE_SIZE];
        let a = ChunkCipher::new(&key, BaseNonce::from_bytes(base));
        base[0] ^= 0x01;
        let b = ChunkCipher::new(&key, BaseNonce::from_bytes(base));

        let sealed = a.seal(0, AAD, b"secret data").unwrap();
        assert!(b.open(0, AAD, &sealed).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_and_tag() {
        let cipher = test_cipher();
        let sealed = cipher.seal(4, AAD, b"secret data").unwrap();

        for pos in [0, sealed.len() - 1] {
            let mut tampered = sealed.clone();
            tampered[pos] ^= 0x01;
            assert!(
                cipher.open(4, AAD, &tampered).is_err(),
                "bit flip at {pos} must fail"
            );
        }
    }

    #[test]
    fn test_cipher_independent_of_wiped_key() {
        use zeroize::Zeroize;

        let mut key = DataKey::generate();
        let base = BaseNonce::generate();
        let cipher = ChunkCipher::new(&key, base);
        key.zeroize();

        let sealed = cipher.seal(0, AAD, b"chunk body").unwrap();
        assert_eq!(cipher.open(0, AAD, &sealed).unwrap(), b"chunk body");

        let from_wiped = ChunkCipher::new(&key, base);
        assert!(from_wiped.open(0, AAD, &sealed).is_err());
        assert!(format!("{cipher:?}").contains("REDACTED"));
    }

    #[test]
    fn test_truncated_chunk_is_authentication_failure() {
        let cipher = test_cipher();
        let err = cipher.open(2, AAD, &[0u8; TAG_SIZE - 1]).unwrap_err();
        assert!(matches!(err, CarechainError::Authentication { chunk: 2 }));
    }
}

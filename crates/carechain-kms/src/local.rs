//! Development key service: a key-encryption key kept in a local file
//!
//! Wrapped key format (binary):
//! ```text
//! [24 bytes: random nonce][32 bytes: encrypted data key][16 bytes: tag]
//! AAD = record context
//! ```
//!
//! The KEK file holds 32 random bytes, base64-encoded.

use std::path::Path;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use carechain_core::{CarechainError, CarechainResult, KmsError};
use carechain_crypto::{DataKey, KeyManagement, WrappedKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Holds the KEK only as an expanded AEAD instance, built once.
pub struct LocalKms {
    cipher: XChaCha20Poly1305,
    key_ref: String,
}

impl LocalKms {
    /// The caller's `kek` is consumed and wiped here.
    pub fn new(kek: DataKey, name: &str) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(kek.as_bytes().into()),
            key_ref: format!("local:{name}"),
        }
    }

    /// Load the KEK from `path`, generating one (mode 0600) if the file is absent.
    pub fn load_or_create(path: &Path) -> CarechainResult<Self> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("kek")
            .to_string();

        if path.exists() {
            let encoded = Zeroizing::new(std::fs::read_to_string(path)?);
            let raw = STANDARD.decode(encoded.trim()).map_err(|e| {
                CarechainError::Config(format!("KEK file {} is not base64: {e}", path.display()))
            })?;
            let kek = DataKey::from_vec(raw).ok_or_else(|| {
                CarechainError::Config(format!("KEK file {} must hold 32 bytes", path.display()))
            })?;
            return Ok(Self::new(kek, &name));
        }

        warn!(
            "KEK file not found, generating a new development KEK at {}",
            path.display()
        );
        let kek = DataKey::generate();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let encoded = Zeroizing::new(STANDARD.encode(kek.as_bytes()));
        write_private(path, encoded.as_bytes())?;
        info!(path = %path.display(), "development KEK written");
        Ok(Self::new(kek, &name))
    }
}

impl std::fmt::Debug for LocalKms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKms")
            .field("key_ref", &self.key_ref)
            .field("kek", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl KeyManagement for LocalKms {
    fn key_ref(&self) -> &str {
        &self.key_ref
    }

    async fn wrap(&self, key: &DataKey, context: &str) -> Result<WrappedKey, KmsError> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: key.as_bytes(),
                    aad: context.as_bytes(),
                },
            )
            .map_err(|e| KmsError::Rejected(format!("local wrap failed: {e}")))?;

        let mut wrapped = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        wrapped.extend_from_slice(&nonce);
        wrapped.extend_from_slice(&ciphertext);
        Ok(WrappedKey::from_bytes(wrapped))
    }

    async fn unwrap(&self, wrapped: &WrappedKey, context: &str) -> Result<DataKey, KmsError> {
        let bytes = wrapped.as_bytes();
        if bytes.len() != NONCE_SIZE + KEY_SIZE + TAG_SIZE {
            return Err(KmsError::Rejected(format!(
                "wrapped key is {} bytes, expected {}",
                bytes.len(),
                NONCE_SIZE + KEY_SIZE + TAG_SIZE
            )));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);

        let plaintext = self
            .cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: context.as_bytes(),
                },
            )
            .map_err(|_| {
                KmsError::Rejected("local KEK cannot unwrap this key (wrong KEK or context)".into())
            })?;
        DataKey::from_vec(plaintext)
            .ok_or_else(|| KmsError::Rejected("unwrapped key is not 32 bytes".into()))
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

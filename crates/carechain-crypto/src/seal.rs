//! Per-recipient sealing of the wrapped data key
//!
//! Recipients are identified by Ed25519 public keys (wallet / signing keys).
//! Sealing converts the Edwards point to its Montgomery form and performs an
//! anonymous X25519 sealed box (libsodium `crypto_box_seal` layout):
//!
//! ```text
//! [32 bytes: ephemeral X25519 public key][N bytes: XSalsa20 ciphertext][16 bytes: Poly1305 tag]
//! ```
//!
//! The recipient opens it with the X25519 scalar derived from their Ed25519 seed
//! (SHA-512(seed)[0..32], clamped), the same conversion libsodium uses.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use carechain_core::{CarechainError, CarechainResult};
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use zeroize::Zeroize;

use crate::descriptor::MetadataDescriptor;
use crate::keys::{SealedKey, WrappedKey};
use crate::SEAL_OVERHEAD;

/// A recipient's Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecipientKey([u8; 32]);

impl RecipientKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_base64(s: &str) -> CarechainResult<Self> {
        let raw = STANDARD
            .decode(s.trim())
            .map_err(|e| CarechainError::input(format!("recipient key is not base64: {e}")))?;
        let bytes: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
            CarechainError::input(format!("recipient key is {} bytes, expected 32", raw.len()))
        })?;
        Ok(Self(bytes))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check that the key can be sealed to.
    pub fn validate(&self) -> CarechainResult<()> {
        self.to_box_public().map(|_| ())
    }

    /// Deterministic Edwards → Montgomery conversion.
    ///
    /// Rejects encodings that are not on the curve and small-order points.
    fn to_box_public(self) -> CarechainResult<crypto_box::PublicKey> {
        let point = CompressedEdwardsY(self.0)
            .decompress()
            .ok_or_else(|| CarechainError::input("recipient key is not a valid Ed25519 point"))?;
        if point.is_small_order() {
            return Err(CarechainError::input("recipient key is a small-order point"));
        }
        Ok(crypto_box::PublicKey::from(point.to_montgomery().to_bytes()))
    }
}

impl std::fmt::Debug for RecipientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RecipientKey({})", self.to_base64())
    }
}

/// Seal the wrapped key so only `recipient` can open it.
///
/// Randomized: sealing the same key twice yields different ciphertexts.
pub fn seal_for(wrapped: &WrappedKey, recipient: &RecipientKey) -> CarechainResult<SealedKey> {
    if wrapped.is_empty() {
        return Err(CarechainError::input("refusing to seal an empty wrapped key"));
    }
    let public = recipient.to_box_public()?;
    let sealed = public
        .seal(&mut OsRng, wrapped.as_bytes())
        .map_err(|e| CarechainError::Other(anyhow::anyhow!("sealed box encryption failed: {e}")))?;
    Ok(SealedKey::from_bytes(sealed))
}

/// A recipient's Ed25519 identity (holds the signing seed).
pub struct RecipientIdentity {
    signing: SigningKey,
}

impl RecipientIdentity {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// Parse a base64-encoded 32-byte seed (the `keygen` file format).
    pub fn from_base64(s: &str) -> CarechainResult<Self> {
        let mut raw = STANDARD
            .decode(s.trim())
            .map_err(|e| CarechainError::input(format!("identity is not base64: {e}")))?;
        let seed: Result<[u8; 32], _> = raw.as_slice().try_into();
        raw.zeroize();
        let mut seed = seed.map_err(|_| CarechainError::input("identity seed must be 32 bytes"))?;
        let identity = Self::from_seed(seed);
        seed.zeroize();
        Ok(identity)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.signing.to_bytes())
    }

    pub fn public_key(&self) -> RecipientKey {
        RecipientKey(self.signing.verifying_key().to_bytes())
    }

    /// Derive the X25519 opening key.
    pub fn secret(&self) -> RecipientSecret {
        let mut digest = Sha512::digest(self.signing.to_bytes());
        let mut scalar = [0u8; 32];
        scalar.copy_from_slice(&digest[..32]);
        digest.as_mut_slice().zeroize();

        scalar[0] &= 248;
        scalar[31] &= 127;
        scalar[31] |= 64;

        let secret = crypto_box::SecretKey::from(scalar);
        scalar.zeroize();
        RecipientSecret {
            secret,
            public: self.public_key(),
        }
    }
}

impl std::fmt::Debug for RecipientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipientIdentity")
            .field("public", &self.public_key())
            .field("seed", &"[REDACTED]")
            .finish()
    }
}

/// X25519 key that opens envelopes sealed to one recipient.
pub struct RecipientSecret {
    secret: crypto_box::SecretKey,
    public: RecipientKey,
}

impl RecipientSecret {
    pub fn public_key(&self) -> RecipientKey {
        self.public
    }

    /// Open a sealed key. Any tampering or wrong recipient fails.
    pub fn open(&self, sealed: &SealedKey) -> CarechainResult<WrappedKey> {
        if sealed.len() <= SEAL_OVERHEAD {
            return Err(CarechainError::input(format!(
                "sealed key is {} bytes, shorter than the sealed-box overhead",
                sealed.len()
            )));
        }
        self.secret
            .unseal(sealed.as_bytes())
            .map(WrappedKey::from_bytes)
            .map_err(|_| {
                CarechainError::input("sealed key does not open with this identity (wrong recipient or tampered envelope)")
            })
    }

    /// Recover the wrapped key from this recipient's envelope in `descriptor`.
    pub fn open_envelope(
        &self,
        descriptor: &MetadataDescriptor,
        role: &str,
    ) -> CarechainResult<WrappedKey> {
        let envelope = descriptor.dek_for.get(role).ok_or_else(|| {
            CarechainError::input(format!("descriptor has no envelope for recipient '{role}'"))
        })?;

        if let Some(pk) = &envelope.pk {
            if *pk != self.public.to_base64() {
                return Err(CarechainError::input(format!(
                    "envelope for '{role}' was sealed to a different key"
                )));
            }
        }

        let wrapped = self.open(&SealedKey::from_bytes(envelope.edek.clone()))?;
        if wrapped.as_bytes() != descriptor.wrapped_dek.as_slice() {
            return Err(CarechainError::metadata(format!(
                "envelope for '{role}' does not match wrapped_dek"
            )));
        }
        tracing::debug!(role, "opened recipient envelope");
        Ok(wrapped)
    }
}

impl std::fmt::Debug for RecipientSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipientSecret")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrapped() -> WrappedKey {
        WrappedKey::from_bytes(b"vault:v1:opaque-wrapped-data-key-bytes".to_vec())
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let patient = RecipientIdentity::generate();
        let sealed = seal_for(&wrapped(), &patient.public_key()).unwrap();

        assert_eq!(sealed.len(), wrapped().len() + SEAL_OVERHEAD);
        assert_eq!(patient.secret().open(&sealed).unwrap(), wrapped());
    }

    #[test]
    fn test_sealing_is_randomized() {
        let patient = RecipientIdentity::generate();
        let a = seal_for(&wrapped(), &patient.public_key()).unwrap();
        let b = seal_for(&wrapped(), &patient.public_key()).unwrap();

        assert_ne!(a, b, "sealed boxes use a fresh ephemeral key each time");
        let secret = patient.secret();
        assert_eq!(secret.open(&a).unwrap(), wrapped());
        assert_eq!(secret.open(&b).unwrap(), wrapped());
    }

    #[test]
    fn test_other_recipient_cannot_open() {
        let patient = RecipientIdentity::generate();
        let custodian = RecipientIdentity::generate();

        let for_patient = seal_for(&wrapped(), &patient.public_key()).unwrap();
        assert!(custodian.secret().open(&for_patient).is_err());
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let patient = RecipientIdentity::generate();
        let sealed = seal_for(&wrapped(), &patient.public_key()).unwrap();

        let mut bytes = sealed.as_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x80;
        assert!(patient.secret().open(&SealedKey::from_bytes(bytes)).is_err());
    }

    #[test]
    fn test_conversion_is_deterministic() {
        let id = RecipientIdentity::from_seed([42u8; 32]);
        let a = id.public_key().to_box_public().unwrap();
        let b = id.public_key().to_box_public().unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        // converted public key matches the converted secret
        assert_eq!(id.secret().secret.public_key().as_bytes(), a.as_bytes());
    }

    #[test]
    fn test_identity_base64_roundtrip() {
        let id = RecipientIdentity::generate();
        let restored = RecipientIdentity::from_base64(&id.to_base64()).unwrap();
        assert_eq!(id.public_key(), restored.public_key());
    }

    #[test]
    fn test_invalid_recipient_keys() {
        assert!(RecipientKey::from_base64("not base64!").is_err());
        assert!(RecipientKey::from_base64(&STANDARD.encode([1u8; 16])).is_err());

        // identity point is small-order
        let mut identity = [0u8; 32];
        identity[0] = 1;
        assert!(seal_for(&wrapped(), &RecipientKey::from_bytes(identity)).is_err());
    }

    #[test]
    fn test_empty_wrapped_key_rejected() {
        let patient = RecipientIdentity::generate();
        let empty = WrappedKey::from_bytes(Vec::new());
        assert!(seal_for(&empty, &patient.public_key()).is_err());
    }
}

//! Published metadata descriptor
//!
//! The descriptor travels unencrypted next to the ciphertext blob:
//!
//! ```json
//! {
//!   "alg": "xchacha20-poly1305",
//!   "chunk_size": 1048576,
//!   "nonce_base": "<base64, 24 bytes>",
//!   "aad": "record_id=...",
//!   "cipher_hash": "<hex, BLAKE2b-256 of the blob>",
//!   "kms_key_ref": "vault-transit:transit/carechain-records",
//!   "wrapped_dek": "<base64>",
//!   "dek_for": { "patient": { "type": "sealed-box", "edek": "<base64>", "pk": "<base64>" } },
//!   "original_content_type": "application/pdf",
//!   "created_at": 1735689600
//! }
//! ```
//!
//! Nothing here is secret: recovering the data key needs a recipient's private
//! key and a successful unwrap by the key service.
//!
//! Empty records: this crate seals an empty plaintext as one tag-only chunk, so
//! the record context is still authenticated. Writers that emit an empty blob
//! with no chunks are read back as empty plaintext once `cipher_hash` matches.

use std::collections::BTreeMap;

use carechain_core::{CarechainError, CarechainResult};
use serde::{Deserialize, Serialize};

use crate::hash::CipherHash;
use crate::nonce::BaseNonce;
use crate::{ALG_XCHACHA20_POLY1305, SEAL_OVERHEAD};

/// How an envelope's `edek` was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeType {
    /// Anonymous X25519 sealed box
    #[serde(rename = "sealed-box", alias = "x25519-sealedbox")]
    SealedBox,
}

/// One recipient's sealed copy of the wrapped data key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientEnvelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    #[serde(with = "b64")]
    pub edek: Vec<u8>,
    /// Recipient Ed25519 public key (base64) the envelope was sealed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataDescriptor {
    pub alg: String,
    /// Plaintext bytes per chunk
    pub chunk_size: u32,
    #[serde(with = "b64")]
    pub nonce_base: Vec<u8>,
    pub aad: String,
    pub cipher_hash: String,
    pub kms_key_ref: String,
    #[serde(with = "b64")]
    pub wrapped_dek: Vec<u8>,
    pub dek_for: BTreeMap<String, RecipientEnvelope>,
    pub original_content_type: String,
    /// Epoch seconds
    pub created_at: i64,
}

/// Cipher parameters extracted from a descriptor that passed validation.
#[derive(Debug, Clone)]
pub struct CipherParams {
    pub chunk_size: u32,
    pub base_nonce: BaseNonce,
    pub aad: String,
    pub cipher_hash: CipherHash,
}

impl MetadataDescriptor {
    /// Check every field before any cryptographic work starts.
    pub fn validate(&self) -> CarechainResult<CipherParams> {
        if self.alg != ALG_XCHACHA20_POLY1305 {
            return Err(CarechainError::metadata(format!(
                "unsupported alg '{}'",
                self.alg
            )));
        }
        if self.chunk_size == 0 {
            return Err(CarechainError::metadata("chunk_size must be > 0"));
        }
        let base_nonce = BaseNonce::from_slice(&self.nonce_base)?;
        if self.aad.is_empty() {
            return Err(CarechainError::metadata("aad is empty"));
        }
        let cipher_hash = CipherHash::from_hex(&self.cipher_hash)?;
        if self.kms_key_ref.is_empty() {
            return Err(CarechainError::metadata("kms_key_ref is empty"));
        }
        if self.wrapped_dek.is_empty() {
            return Err(CarechainError::metadata("wrapped_dek is empty"));
        }
        if self.dek_for.is_empty() {
            return Err(CarechainError::metadata("dek_for has no recipients"));
        }
        for (role, envelope) in &self.dek_for {
            if envelope.edek.len() < SEAL_OVERHEAD {
                return Err(CarechainError::metadata(format!(
                    "edek for '{role}' is {} bytes, shorter than a sealed box",
                    envelope.edek.len()
                )));
            }
        }

        Ok(CipherParams {
            chunk_size: self.chunk_size,
            base_nonce,
            aad: self.aad.clone(),
            cipher_hash,
        })
    }

    pub fn recipient(&self, role: &str) -> Option<&RecipientEnvelope> {
        self.dek_for.get(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.dek_for.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> CarechainResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| CarechainError::Other(anyhow::anyhow!("descriptor serialization: {e}")))
    }

    pub fn from_json(data: &[u8]) -> CarechainResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| CarechainError::metadata(format!("descriptor is not valid JSON: {e}")))
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD
            .decode(s.as_bytes())
            .map_err(|e| serde::de::Error::custom(format!("base64 decode: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NONCE_SIZE;

    fn sample() -> MetadataDescriptor {
        let mut dek_for = BTreeMap::new();
        dek_for.insert(
            "patient".to_string(),
            RecipientEnvelope {
                kind: EnvelopeType::SealedBox,
                edek: vec![7u8; 96],
                pk: None,
            },
        );
        MetadataDescriptor {
            alg: ALG_XCHACHA20_POLY1305.into(),
            chunk_size: 1024 * 1024,
            nonce_base: vec![1u8; NONCE_SIZE],
            aad: "record_id=1735689600000".into(),
            cipher_hash: CipherHash::of_blob(b"blob").to_hex(),
            kms_key_ref: "vault-transit:transit/carechain-records".into(),
            wrapped_dek: b"vault:v1:abc".to_vec(),
            dek_for,
            original_content_type: "application/pdf".into(),
            created_at: 1_735_689_600,
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let d = sample();
        let restored = MetadataDescriptor::from_json(&d.to_json().unwrap()).unwrap();
        assert_eq!(restored, d);
    }

    #[test]
    fn test_wire_field_shapes() {
        let json: serde_json::Value = serde_json::from_slice(&sample().to_json().unwrap()).unwrap();

        assert_eq!(json["alg"], "xchacha20-poly1305");
        assert_eq!(json["chunk_size"], 1048576);
        assert_eq!(json["nonce_base"], "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEB");
        assert_eq!(json["dek_for"]["patient"]["type"], "sealed-box");
        assert!(json["dek_for"]["patient"].get("pk").is_none());
        assert!(json["created_at"].is_i64());
    }

    #[test]
    fn test_legacy_envelope_type_accepted() {
        let json = r#"{"type":"x25519-sealedbox","edek":"AAAA"}"#;
        let env: RecipientEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(env.kind, EnvelopeType::SealedBox);
        assert_eq!(env.edek, vec![0u8; 3]);
    }

    #[test]
    fn test_validate_ok() {
        let params = sample().validate().unwrap();
        assert_eq!(params.chunk_size, 1024 * 1024);
        assert_eq!(params.base_nonce.as_bytes(), &[1u8; NONCE_SIZE]);
    }

    #[test]
    fn test_validate_rejects_inconsistent_fields() {
        let cases: Vec<(&str, Box<dyn Fn(&mut MetadataDescriptor)>)> = vec![
            ("alg", Box::new(|d| d.alg = "aes-256-gcm".into())),
            ("chunk_size", Box::new(|d| d.chunk_size = 0)),
            ("nonce_base", Box::new(|d| d.nonce_base.truncate(12))),
            ("aad", Box::new(|d| d.aad.clear())),
            ("cipher_hash", Box::new(|d| d.cipher_hash = "abcd".into())),
            ("kms_key_ref", Box::new(|d| d.kms_key_ref.clear())),
            ("wrapped_dek", Box::new(|d| d.wrapped_dek.clear())),
            ("dek_for", Box::new(|d| d.dek_for.clear())),
            (
                "edek",
                Box::new(|d| {
                    if let Some(env) = d.dek_for.get_mut("patient") {
                        env.edek.truncate(SEAL_OVERHEAD - 1);
                    }
                }),
            ),
        ];

        for (field, mutate) in cases {
            let mut d = sample();
            mutate(&mut d);
            let err = d.validate().unwrap_err();
            assert!(
                matches!(err, CarechainError::Metadata(_)),
                "bad {field} must be a metadata error, got {err:?}"
            );
        }
    }

    #[test]
    fn test_bad_base64_is_metadata_error() {
        let mut json: serde_json::Value =
            serde_json::from_slice(&sample().to_json().unwrap()).unwrap();
        json["wrapped_dek"] = "%%%".into();

        let err = MetadataDescriptor::from_json(json.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, CarechainError::Metadata(_)));
    }

    #[test]
    fn test_missing_field_is_metadata_error() {
        let err = MetadataDescriptor::from_json(br#"{"alg":"xchacha20-poly1305"}"#).unwrap_err();
        assert!(matches!(err, CarechainError::Metadata(_)));
    }
}

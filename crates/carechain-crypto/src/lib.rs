//! carechain-crypto: encrypted-record envelopes for untrusted blob storage
//!
//! Pipeline: plaintext → fixed-size chunks → XChaCha20-Poly1305 per chunk → BLAKE2b-256 over ciphertext → publish
//!
//! Key flow:
//! ```text
//! Data Key (per record, 256-bit random, zeroed after use)
//!   ├── Chunk AEAD: XChaCha20-Poly1305 (nonce=base_nonce with LE chunk index in last 4 bytes, AAD=record context)
//!   └── Wrapped by the external key-management service → WrappedKey (opaque)
//!         └── Sealed per recipient: X25519 sealed box to the recipient's Ed25519 key (converted to Montgomery form)
//! ```
//!
//! Decrypt mirrors it: open sealed box → KMS unwrap → verify blob hash → open chunks.

pub mod chunk;
pub mod descriptor;
pub mod hash;
pub mod keys;
pub mod kms;
pub mod nonce;
pub mod pipeline;
pub mod plan;
pub mod seal;

pub use chunk::ChunkCipher;
pub use descriptor::{CipherParams, EnvelopeType, MetadataDescriptor, RecipientEnvelope};
pub use hash::{hash_reader, CipherHash, CipherHasher};
pub use keys::{DataKey, SealedKey, WrappedKey};
pub use kms::KeyManagement;
pub use nonce::{derive_nonce, BaseNonce};
pub use pipeline::{new_record_context, EncryptRequest, EncryptedRecord, EnvelopePipeline};
pub use plan::{ChunkPlan, ChunkSpan};
pub use seal::{seal_for, RecipientIdentity, RecipientKey, RecipientSecret};

/// Size of a data key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Algorithm identifier written to the `alg` descriptor field
pub const ALG_XCHACHA20_POLY1305: &str = "xchacha20-poly1305";

/// Sealed-box overhead: ephemeral X25519 public key (32) + Poly1305 tag (16)
pub const SEAL_OVERHEAD: usize = 48;

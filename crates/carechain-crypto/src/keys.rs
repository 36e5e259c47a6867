//! Key material: the per-record data key and the opaque byte strings derived from it

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::KEY_SIZE;

/// A per-record 256-bit data encryption key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    bytes: [u8; KEY_SIZE],
}

impl DataKey {
    /// Generate a fresh random key. Never reuse one across records.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Copy a key out of a buffer returned by the key service, wiping the buffer.
    pub fn from_vec(mut buf: Vec<u8>) -> Option<Self> {
        if buf.len() != KEY_SIZE {
            buf.zeroize();
            return None;
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&buf);
        buf.zeroize();
        Some(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// True once the key has been wiped.
    pub fn is_zeroed(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Borrows a data key for one pipeline run and wipes it on every exit path.
pub struct KeyWipe<'a> {
    key: &'a mut DataKey,
}

impl<'a> KeyWipe<'a> {
    pub fn new(key: &'a mut DataKey) -> Self {
        Self { key }
    }
}

impl std::ops::Deref for KeyWipe<'_> {
    type Target = DataKey;

    fn deref(&self) -> &DataKey {
        self.key
    }
}

impl Drop for KeyWipe<'_> {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Data key as wrapped by the key-management service. Format is owned by that service.
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedKey(Vec<u8>);

impl WrappedKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WrappedKey({} bytes)", self.0.len())
    }
}

/// A wrapped key sealed to one recipient's public key.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedKey(Vec<u8>);

impl SealedKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SealedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SealedKey({} bytes)", self.0.len())
    }
}

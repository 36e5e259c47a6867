//! Per-chunk nonce derivation
//!
//! ```text
//! nonce(i) = base_nonce[0..20] || (i as u32).to_le_bytes()
//! ```
//!
//! The base nonce is random per record and the data key is fresh per record,
//! so (key, nonce) pairs never repeat as long as the chunk index fits in 32 bits.

use carechain_core::{CarechainError, CarechainResult};
use rand::RngCore;

use crate::NONCE_SIZE;

/// Random per-record base nonce, published in the descriptor.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BaseNonce([u8; NONCE_SIZE]);

impl BaseNonce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a descriptor field; the length must match the cipher's nonce.
    pub fn from_slice(bytes: &[u8]) -> CarechainResult<Self> {
        let arr: [u8; NONCE_SIZE] = bytes.try_into().map_err(|_| {
            CarechainError::metadata(format!(
                "nonce_base is {} bytes, cipher needs {NONCE_SIZE}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for BaseNonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BaseNonce(")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

/// Derive the nonce for chunk `index`.
///
/// Indices past `u32::MAX` are rejected rather than wrapped.
pub fn derive_nonce(base: &BaseNonce, index: u64) -> CarechainResult<[u8; NONCE_SIZE]> {
    let counter = u32::try_from(index).map_err(|_| {
        CarechainError::input(format!(
            "chunk index {index} exceeds the 32-bit nonce counter"
        ))
    })?;

    let mut nonce = base.0;
    nonce[NONCE_SIZE - 4..].copy_from_slice(&counter.to_le_bytes());
    Ok(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_counter_is_little_endian_tail() {
        let base = BaseNonce::from_bytes([0xEE; NONCE_SIZE]);
        let nonce = derive_nonce(&base, 0x0102_0304).unwrap();

        assert_eq!(&nonce[..NONCE_SIZE - 4], &[0xEE; NONCE_SIZE - 4]);
        assert_eq!(&nonce[NONCE_SIZE - 4..], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_index_zero_clears_tail() {
        let base = BaseNonce::from_bytes([0xFF; NONCE_SIZE]);
        let nonce = derive_nonce(&base, 0).unwrap();
        assert_eq!(&nonce[NONCE_SIZE - 4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_last_valid_index() {
        let base = BaseNonce::generate();
        let nonce = derive_nonce(&base, u32::MAX as u64).unwrap();
        assert_eq!(&nonce[NONCE_SIZE - 4..], &[0xFF; 4]);
    }

    #[test]
    fn test_index_overflow_rejected() {
        let base = BaseNonce::generate();
        let err = derive_nonce(&base, u32::MAX as u64 + 1).unwrap_err();
        assert!(matches!(err, CarechainError::Input(_)));
    }

    #[test]
    fn test_from_slice_wrong_length() {
        assert!(BaseNonce::from_slice(&[0u8; 12]).is_err());
        assert!(BaseNonce::from_slice(&[0u8; NONCE_SIZE]).is_ok());
    }

    proptest! {
        #[test]
        fn test_derivation_is_deterministic(base in any::<[u8; NONCE_SIZE]>(), i in any::<u32>()) {
            let base = BaseNonce::from_bytes(base);
            prop_assert_eq!(
                derive_nonce(&base, i as u64).unwrap(),
                derive_nonce(&base, i as u64).unwrap()
            );
        }

        #[test]
        fn test_distinct_indices_distinct_nonces(
            base in any::<[u8; NONCE_SIZE]>(),
            i in any::<u32>(),
            j in any::<u32>(),
        ) {
            prop_assume!(i != j);
            let base = BaseNonce::from_bytes(base);
            prop_assert_ne!(
                derive_nonce(&base, i as u64).unwrap(),
                derive_nonce(&base, j as u64).unwrap()
            );
        }
    }
}

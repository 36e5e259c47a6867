use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a blob on the content-addressed store.
///
/// Used verbatim in record pointers and resolved through the configured gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentAddress(String);

impl ContentAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where a published record lives: ciphertext blob plus its metadata descriptor.
///
/// This is what an uploader hands to the authorization ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPointer {
    pub cid_enc: ContentAddress,
    pub meta_cid: ContentAddress,
    /// Ciphertext blob length in bytes
    pub size_bytes: u64,
    /// Hex-encoded blob-level integrity hash
    pub cipher_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_json_shape() {
        let pointer = RecordPointer {
            cid_enc: ContentAddress::new("b3aa"),
            meta_cid: ContentAddress::new("b3bb"),
            size_bytes: 1040,
            cipher_hash: "ff".repeat(32),
        };

        let json = serde_json::to_value(&pointer).unwrap();
        assert_eq!(json["cid_enc"], "b3aa");
        assert_eq!(json["meta_cid"], "b3bb");
        assert_eq!(json["size_bytes"], 1040);
    }
}

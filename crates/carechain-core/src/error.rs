use thiserror::Error;

pub type CarechainResult<T> = Result<T, CarechainError>;

#[derive(Debug, Error)]
pub enum CarechainError {
    /// Missing or malformed file, recipient key, or AAD context.
    #[error("invalid input: {0}")]
    Input(String),

    /// A ciphertext chunk failed AEAD verification.
    #[error("chunk {chunk} failed authentication: record is corrupted or has been tampered with")]
    Authentication { chunk: u64 },

    /// The ciphertext blob does not hash to the descriptor's `cipher_hash`.
    #[error("cipher hash mismatch: descriptor says {expected}, blob hashes to {actual}")]
    CipherHashMismatch { expected: String, actual: String },

    #[error("key management error: {0}")]
    Kms(#[from] KmsError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Descriptor fields failed validation before any cryptographic work.
    #[error("metadata inconsistency: {0}")]
    Metadata(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures reported by the key-management boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KmsError {
    #[error("key management service unavailable: {0}")]
    Unavailable(String),

    #[error("key management service rejected the request: {0}")]
    Rejected(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),
}

/// Failures reported by the content-addressed blob store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("no blob stored at {0}")]
    NotFound(String),

    #[error("storage unreachable: {0}")]
    Unavailable(String),

    #[error("blob at {address} does not match its content address")]
    IntegrityMismatch { address: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Coarse classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller supplied bad input; do not retry.
    Input,
    /// Data is corrupted or was tampered with; never retried.
    Tampered,
    /// Not authorized, key missing, or key service unreachable.
    KeyAccess,
    /// Storage unreachable or returned nothing.
    Storage,
    /// Published descriptor is malformed.
    Metadata,
    Internal,
}

impl KmsError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, KmsError::Unavailable(_))
    }
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

impl CarechainError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CarechainError::Input(_) => ErrorClass::Input,
            CarechainError::Authentication { .. } | CarechainError::CipherHashMismatch { .. } => {
                ErrorClass::Tampered
            }
            CarechainError::Storage(StorageError::IntegrityMismatch { .. }) => ErrorClass::Tampered,
            CarechainError::Kms(_) => ErrorClass::KeyAccess,
            CarechainError::Storage(_) => ErrorClass::Storage,
            CarechainError::Metadata(_) => ErrorClass::Metadata,
            CarechainError::Config(_) | CarechainError::Io(_) | CarechainError::Other(_) => {
                ErrorClass::Internal
            }
        }
    }

    /// Only transient KMS and storage outages are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            CarechainError::Kms(e) => e.is_retryable(),
            CarechainError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn input(msg: impl Into<String>) -> Self {
        CarechainError::Input(msg.into())
    }

    pub fn metadata(msg: impl Into<String>) -> Self {
        CarechainError::Metadata(msg.into())
    }
}

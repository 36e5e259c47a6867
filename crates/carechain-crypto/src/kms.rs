//! Key-management boundary
//!
//! The service that wraps and unwraps data keys lives outside this crate;
//! `carechain-kms` provides the Vault transit and local-KEK clients.

use async_trait::async_trait;
use carechain_core::KmsError;

use crate::keys::{DataKey, WrappedKey};

/// Wrap/unwrap contract of an external key-management service.
///
/// `context` is an opaque string (the record context) passed through for audit
/// binding. A call happens at most once per record per direction.
#[async_trait]
pub trait KeyManagement: Send + Sync {
    /// Reference to the wrapping key, recorded as `kms_key_ref` in the descriptor.
    fn key_ref(&self) -> &str;

    async fn wrap(&self, key: &DataKey, context: &str) -> Result<WrappedKey, KmsError>;

    async fn unwrap(&self, wrapped: &WrappedKey, context: &str) -> Result<DataKey, KmsError>;
}

//! carechain-kms: clients for the key-management boundary
//!
//! - `vault`: HashiCorp Vault transit engine (production)
//! - `local`: key-encryption key kept in a local file (development)
//! - `directory`: recipient public-key lookup (config table, env, Vault KV v2)

pub mod directory;
pub mod local;
pub mod vault;

pub use directory::RecipientDirectory;
pub use local::LocalKms;
pub use vault::{VaultClient, VaultTransitKms};

use std::sync::Arc;

use carechain_core::config::{expand_tilde, KmsBackend, KmsConfig};
use carechain_core::CarechainResult;
use carechain_crypto::KeyManagement;

/// Build the key-management client selected by `[kms] backend`.
pub fn from_config(config: &KmsConfig) -> CarechainResult<Arc<dyn KeyManagement>> {
    match config.backend {
        KmsBackend::Vault => Ok(Arc::new(VaultTransitKms::from_config(config)?)),
        KmsBackend::Local => {
            let path = expand_tilde(&config.local_kek_file);
            Ok(Arc::new(LocalKms::load_or_create(&path)?))
        }
    }
}

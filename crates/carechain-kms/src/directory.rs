//! Recipient public-key directory
//!
//! Resolves a recipient reference (a custodian or hospital id) to its Ed25519
//! public key, in order:
//!   1. `[directory.keys]` in carechain.toml
//!   2. `$CARECHAIN_RECIPIENT_KEYS` (JSON object: ref -> base64 key)
//!   3. Vault KV v2: `{kv_mount}/data/{kv_path}/{ref}`, field `key_b64`

use std::collections::BTreeMap;

use carechain_core::config::{CarechainConfig, KmsBackend};
use carechain_core::{CarechainError, CarechainResult};
use carechain_crypto::RecipientKey;
use serde_json::Value;
use tracing::debug;

use crate::vault::VaultClient;

pub const RECIPIENT_KEYS_ENV: &str = "CARECHAIN_RECIPIENT_KEYS";

#[derive(Debug)]
struct VaultKv {
    client: VaultClient,
    mount: String,
    path: String,
}

#[derive(Debug, Default)]
pub struct RecipientDirectory {
    static_keys: BTreeMap<String, String>,
    env_keys: BTreeMap<String, String>,
    vault: Option<VaultKv>,
}

impl RecipientDirectory {
    pub fn new(static_keys: BTreeMap<String, String>) -> Self {
        Self {
            static_keys,
            ..Self::default()
        }
    }

    /// Add the fallback table from a JSON object of ref -> base64 key.
    pub fn with_env_keys(mut self, json: &str) -> CarechainResult<Self> {
        self.env_keys = serde_json::from_str(json).map_err(|e| {
            CarechainError::Config(format!("{RECIPIENT_KEYS_ENV} is not a JSON object of strings: {e}"))
        })?;
        Ok(self)
    }

    pub fn with_vault(mut self, client: VaultClient, mount: &str, path: &str) -> Self {
        self.vault = Some(VaultKv {
            client,
            mount: mount.trim_matches('/').to_string(),
            path: path.trim_matches('/').to_string(),
        });
        self
    }

    /// Static table, env fallback, and Vault KV when the Vault backend has a token.
    pub fn from_config(config: &CarechainConfig) -> CarechainResult<Self> {
        let mut directory = Self::new(config.directory.keys.clone());
        if let Ok(json) = std::env::var(RECIPIENT_KEYS_ENV) {
            directory = directory.with_env_keys(&json)?;
        }
        if config.kms.backend == KmsBackend::Vault {
            match VaultClient::from_config(&config.kms) {
                Ok(client) => {
                    directory =
                        directory.with_vault(client, &config.directory.kv_mount, &config.directory.kv_path)
                }
                Err(e) => debug!("recipient directory without Vault KV: {e}"),
            }
        }
        Ok(directory)
    }

    pub async fn resolve(&self, reference: &str) -> CarechainResult<RecipientKey> {
        if reference.is_empty() || reference.contains('/') || reference.contains("..") {
            return Err(CarechainError::input(format!(
                "invalid recipient reference '{reference}'"
            )));
        }

        if let Some(b64) = self.static_keys.get(reference) {
            debug!(reference, source = "config", "recipient key resolved");
            return RecipientKey::from_base64(b64);
        }
        if let Some(b64) = self.env_keys.get(reference) {
            debug!(reference, source = "env", "recipient key resolved");
            return RecipientKey::from_base64(b64);
        }
        if let Some(kv) = &self.vault {
            let path = format!("{}/data/{}/{}", kv.mount, kv.path, reference);
            if let Some(secret) = kv.client.get_json(&path).await? {
                let b64 = secret
                    .pointer("/data/data/key_b64")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        CarechainError::input(format!(
                            "vault secret {path} has no key_b64 field"
                        ))
                    })?;
                debug!(reference, source = "vault", "recipient key resolved");
                return RecipientKey::from_base64(b64);
            }
        }

        Err(CarechainError::input(format!(
            "no public key known for recipient '{reference}'"
        )))
    }
}

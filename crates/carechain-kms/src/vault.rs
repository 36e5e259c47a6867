//! HashiCorp Vault client and transit-engine key wrapping
//!
//! Wrap:   `POST {addr}/v1/{mount}/encrypt/{key}`  `{"plaintext": b64(dek), "context"?: b64(ctx)}`
//! Unwrap: `POST {addr}/v1/{mount}/decrypt/{key}`  `{"ciphertext": "vault:vN:...", "context"?: ...}`
//!
//! The wrapped key is the `vault:vN:...` ciphertext string as bytes. The data key
//! never leaves this process except inside the TLS request to Vault.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use carechain_core::config::KmsConfig;
use carechain_core::{CarechainError, CarechainResult, KmsError};
use carechain_crypto::{DataKey, KeyManagement, WrappedKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Maximum error body bytes kept in an error message
const MAX_ERROR_BODY_BYTES: usize = 4096;

/// Authenticated HTTP client for one Vault server.
#[derive(Clone)]
pub struct VaultClient {
    http: reqwest::Client,
    addr: String,
    token: SecretString,
    namespace: Option<String>,
}

impl VaultClient {
    pub fn new(
        addr: &str,
        token: SecretString,
        namespace: Option<String>,
        timeout: Duration,
    ) -> CarechainResult<Self> {
        if !addr.starts_with("https://") && !addr.starts_with("http://") {
            return Err(CarechainError::Config(format!(
                "vault_addr must start with http:// or https://, got: {addr}"
            )));
        }
        if addr.starts_with("http://") && !addr.contains("localhost") && !addr.contains("127.0.0.1")
        {
            warn!("vault_addr uses plain HTTP, the Vault token and data keys travel in cleartext");
        }
        if token.expose_secret().is_empty() {
            return Err(CarechainError::Config("Vault token must not be empty".into()));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CarechainError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            addr: addr.trim_end_matches('/').to_string(),
            token,
            namespace,
        })
    }

    /// Token comes from the environment variable named by `token_env`.
    pub fn from_config(config: &KmsConfig) -> CarechainResult<Self> {
        let token = std::env::var(&config.token_env).map_err(|_| {
            CarechainError::Config(format!(
                "Vault token not set (export {} or switch [kms] backend)",
                config.token_env
            ))
        })?;
        Self::new(
            &config.vault_addr,
            SecretString::from(token),
            config.vault_namespace.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/{}", self.addr, path.trim_start_matches('/'));
        let builder = self
            .http
            .request(method, url)
            .header("X-Vault-Token", self.token.expose_secret());
        match &self.namespace {
            Some(ns) => builder.header("X-Vault-Namespace", ns),
            None => builder,
        }
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Value, KmsError> {
        debug!(path, "vault POST");
        let resp = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await
            .map_err(|e| KmsError::Unavailable(format!("vault request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        resp.json()
            .await
            .map_err(|e| KmsError::Rejected(format!("malformed vault response: {e}")))
    }

    /// GET a secret. A 404 is `Ok(None)`.
    pub async fn get_json(&self, path: &str) -> Result<Option<Value>, KmsError> {
        debug!(path, "vault GET");
        let resp = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(|e| KmsError::Unavailable(format!("vault request failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        resp.json()
            .await
            .map(Some)
            .map_err(|e| KmsError::Rejected(format!("malformed vault response: {e}")))
    }
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("addr", &self.addr)
            .field("namespace", &self.namespace)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Deserialize)]
struct VaultErrors {
    #[serde(default)]
    errors: Vec<String>,
}

async fn error_from_response(resp: reqwest::Response) -> KmsError {
    let status = resp.status().as_u16();
    let body = match resp.bytes().await {
        Ok(b) => {
            let end = b.len().min(MAX_ERROR_BODY_BYTES);
            String::from_utf8_lossy(&b[..end]).to_string()
        }
        Err(_) => String::new(),
    };
    let message = match serde_json::from_str::<VaultErrors>(&body) {
        Ok(v) if !v.errors.is_empty() => v.errors.join("; "),
        _ => body,
    };
    classify_status(status, message)
}

/// Map a Vault HTTP failure onto the key-management error taxonomy.
pub fn classify_status(status: u16, message: String) -> KmsError {
    match status {
        404 => KmsError::KeyNotFound(message),
        // transit answers 400 for a missing key on decrypt
        400 if message.contains("not found") => KmsError::KeyNotFound(message),
        429 => KmsError::Unavailable(format!("rate limited: {message}")),
        500..=599 => KmsError::Unavailable(format!("server error ({status}): {message}")),
        _ => KmsError::Rejected(format!("{status}: {message}")),
    }
}

#[derive(Serialize)]
struct TransitEncrypt<'a> {
    plaintext: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<String>,
}

#[derive(Serialize)]
struct TransitDecrypt<'a> {
    ciphertext: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<String>,
}

/// Data-key wrapping through a Vault transit key.
#[derive(Debug, Clone)]
pub struct VaultTransitKms {
    client: VaultClient,
    mount: String,
    key: String,
    /// Send the record context (only valid for keys created with `derived=true`)
    derived: bool,
    key_ref: String,
}

impl VaultTransitKms {
    pub fn new(client: VaultClient, mount: &str, key: &str) -> Self {
        let mount = mount.trim_matches('/').to_string();
        Self {
            key_ref: format!("vault-transit:{mount}/{key}"),
            client,
            mount,
            key: key.to_string(),
            derived: false,
        }
    }

    pub fn derived(mut self, derived: bool) -> Self {
        self.derived = derived;
        self
    }

    pub fn from_config(config: &KmsConfig) -> CarechainResult<Self> {
        let client = VaultClient::from_config(config)?;
        Ok(Self::new(client, &config.transit_mount, &config.transit_key).derived(config.derived))
    }

    fn context(&self, context: &str) -> Option<String> {
        self.derived.then(|| STANDARD.encode(context))
    }
}

#[async_trait]
impl KeyManagement for VaultTransitKms {
    fn key_ref(&self) -> &str {
        &self.key_ref
    }

    async fn wrap(&self, key: &DataKey, context: &str) -> Result<WrappedKey, KmsError> {
        let plaintext = Zeroizing::new(STANDARD.encode(key.as_bytes()));
        let body = TransitEncrypt {
            plaintext: &plaintext,
            context: self.context(context),
        };
        let resp = self
            .client
            .post_json(&format!("{}/encrypt/{}", self.mount, self.key), &body)
            .await?;

        let ciphertext = resp
            .pointer("/data/ciphertext")
            .and_then(Value::as_str)
            .ok_or_else(|| KmsError::Rejected("vault response missing data.ciphertext".into()))?;
        debug!(key_ref = %self.key_ref, "data key wrapped");
        Ok(WrappedKey::from_bytes(ciphertext.as_bytes().to_vec()))
    }

    async fn unwrap(&self, wrapped: &WrappedKey, context: &str) -> Result<DataKey, KmsError> {
        let ciphertext = std::str::from_utf8(wrapped.as_bytes())
            .ok()
            .filter(|s| s.starts_with("vault:"))
            .ok_or_else(|| KmsError::Rejected("wrapped key is not a Vault transit ciphertext".into()))?;
        let body = TransitDecrypt {
            ciphertext,
            context: self.context(context),
        };
        let resp = self
            .client
            .post_json(&format!("{}/decrypt/{}", self.mount, self.key), &body)
            .await?;

        let plaintext = resp
            .pointer("/data/plaintext")
            .and_then(Value::as_str)
            .ok_or_else(|| KmsError::Rejected("vault response missing data.plaintext".into()))?;
        let raw = STANDARD
            .decode(plaintext)
            .map_err(|e| KmsError::Rejected(format!("vault plaintext is not base64: {e}")))?;
        let key = DataKey::from_vec(raw)
            .ok_or_else(|| KmsError::Rejected("unwrapped key is not 32 bytes".into()))?;
        debug!(key_ref = %self.key_ref, "data key unwrapped");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> VaultClient {
        VaultClient::new(
            "http://127.0.0.1:8200/",
            SecretString::from("s.test-token".to_string()),
            Some("hospital".into()),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(404, "x".into()), KmsError::KeyNotFound(_)));
        assert!(matches!(
            classify_status(400, "encryption key not found".into()),
            KmsError::KeyNotFound(_)
        ));
        assert!(matches!(classify_status(400, "bad input".into()), KmsError::Rejected(_)));
        assert!(matches!(classify_status(403, "permission denied".into()), KmsError::Rejected(_)));
        assert!(matches!(classify_status(429, "slow down".into()), KmsError::Unavailable(_)));
        assert!(matches!(classify_status(503, "sealed".into()), KmsError::Unavailable(_)));
    }

    #[test]
    fn test_key_ref_format() {
        let kms = VaultTransitKms::new(client(), "/transit/", "carechain-records");
        assert_eq!(kms.key_ref(), "vault-transit:transit/carechain-records");
    }

    #[test]
    fn test_addr_trimmed() {
        assert_eq!(client().addr(), "http://127.0.0.1:8200");
    }

    #[test]
    fn test_debug_redacts_token() {
        let out = format!("{:?}", client());
        assert!(out.contains("REDACTED"));
        assert!(!out.contains("s.test-token"));
    }

    #[test]
    fn test_rejects_bad_addr_and_empty_token() {
        let bad_addr = VaultClient::new(
            "vault.internal:8200",
            SecretString::from("t".to_string()),
            None,
            Duration::from_secs(1),
        );
        assert!(matches!(bad_addr, Err(CarechainError::Config(_))));

        let empty = VaultClient::new(
            "https://vault.internal:8200",
            SecretString::from(String::new()),
            None,
            Duration::from_secs(1),
        );
        assert!(matches!(empty, Err(CarechainError::Config(_))));
    }

    #[test]
    fn test_missing_token_env_is_config_error() {
        let config = KmsConfig {
            token_env: "CARECHAIN_TEST_TOKEN_THAT_IS_NEVER_SET".into(),
            ..KmsConfig::default()
        };
        assert!(matches!(
            VaultTransitKms::from_config(&config),
            Err(CarechainError::Config(_))
        ));
    }

    #[test]
    fn test_context_only_sent_when_derived() {
        let plain = VaultTransitKms::new(client(), "transit", "k");
        assert!(plain.context("record_id=1").is_none());

        let derived = VaultTransitKms::new(client(), "transit", "k").derived(true);
        assert_eq!(derived.context("record_id=1").as_deref(), Some("cmVjb3JkX2lkPTE="));
    }

    #[tokio::test]
    async fn test_unwrap_rejects_foreign_ciphertext() {
        let kms = VaultTransitKms::new(client(), "transit", "k");
        let err = kms
            .unwrap(&WrappedKey::from_bytes(vec![0xff, 0x00, 0x13]), "ctx")
            .await
            .unwrap_err();
        assert!(matches!(err, KmsError::Rejected(_)));
    }
}

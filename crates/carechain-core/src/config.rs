use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{CarechainError, CarechainResult};

/// Default plaintext bytes per chunk (1 MiB)
pub const DEFAULT_CHUNK_SIZE: u32 = 1024 * 1024;

/// Top-level configuration (loaded from carechain.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CarechainConfig {
    pub log: LogConfig,
    pub pipeline: PipelineConfig,
    pub kms: KmsConfig,
    pub storage: StorageConfig,
    pub directory: DirectoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Plaintext bytes per chunk (default: 1 MiB)
    pub chunk_size: u32,
    /// Chunk worker threads (0 = cpu_count)
    pub workers: usize,
    /// Chunks held in memory at once by the streaming encrypt/decrypt paths
    pub stream_window: usize,
    /// Content type recorded when the caller gives none
    pub default_content_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KmsBackend {
    /// HashiCorp Vault transit engine
    Vault,
    /// Key-encryption key kept in a local file (development only)
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KmsConfig {
    pub backend: KmsBackend,
    /// Vault address (e.g. https://vault.internal:8200)
    pub vault_addr: String,
    /// Vault Enterprise namespace (optional)
    pub vault_namespace: Option<String>,
    /// Transit secrets engine mount path
    pub transit_mount: String,
    /// Transit key name used to wrap data keys
    pub transit_key: String,
    /// Send the record context to Vault (only for keys created with derived=true)
    pub derived: bool,
    /// Environment variable holding the Vault token
    pub token_env: String,
    /// Local KEK file (backend = "local")
    pub local_kek_file: PathBuf,
    /// Request timeout for the key service
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fs,
    Memory,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// Key prefix for every blob
    pub prefix: String,
    /// Public gateway used to build shareable blob URLs
    pub gateway_url: String,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// S3 bucket name
    pub bucket: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
    /// Retry budget for transient storage failures
    pub max_retries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Vault KV v2 mount holding recipient public keys
    pub kv_mount: String,
    /// Path under the KV mount (keys live at {kv_path}/{ref})
    pub kv_path: String,
    /// Static recipient ref -> base64 public key entries
    pub keys: BTreeMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: 0,
            stream_window: 16,
            default_content_type: "application/octet-stream".into(),
        }
    }
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            backend: KmsBackend::Vault,
            vault_addr: "http://127.0.0.1:8200".into(),
            vault_namespace: None,
            transit_mount: "transit".into(),
            transit_key: "carechain-records".into(),
            derived: false,
            token_env: "VAULT_TOKEN".into(),
            local_kek_file: PathBuf::from("~/.config/carechain/kek"),
            timeout_secs: 10,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            root: PathBuf::from("~/.local/share/carechain/blobs"),
            prefix: "records".into(),
            gateway_url: "https://ipfs.io".into(),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "carechain".into(),
            enforce_tls: false,
            max_retries: 5,
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            kv_mount: "secret".into(),
            kv_path: "x25519".into(),
            keys: BTreeMap::new(),
        }
    }
}

impl CarechainConfig {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> CarechainResult<Self> {
        toml::from_str(content).map_err(|e| CarechainError::Config(e.to_string()))
    }

    /// Load from disk, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> CarechainResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| CarechainError::Config(format!("parsing {}: {e}", path.display())))
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}

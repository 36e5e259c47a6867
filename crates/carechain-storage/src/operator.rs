//! OpenDAL Operator factory for carechain blob backends

use carechain_core::config::{expand_tilde, StorageBackend, StorageConfig};
use carechain_core::{CarechainError, CarechainResult};
use opendal::Operator;

/// S3 connection settings with credentials already resolved
#[derive(Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

/// Build an operator for the configured backend.
///
/// S3 credentials come from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`.
pub fn build_operator(storage: &StorageConfig) -> CarechainResult<Operator> {
    let op = match storage.backend {
        StorageBackend::Memory => Operator::new(opendal::services::Memory::default())
            .map_err(operator_error)?
            .finish(),
        StorageBackend::Fs => {
            let root = expand_tilde(&storage.root);
            std::fs::create_dir_all(&root)?;
            let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
            Operator::new(builder).map_err(operator_error)?.finish()
        }
        StorageBackend::S3 => {
            check_tls(storage)?;
            let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default();
            let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default();
            if access_key_id.is_empty() {
                tracing::warn!("AWS_ACCESS_KEY_ID not set, S3 requests will be unsigned");
            }
            build_s3_operator(&S3Settings {
                endpoint: storage.endpoint.clone(),
                region: storage.region.clone(),
                bucket: storage.bucket.clone(),
                access_key_id,
                secret_access_key,
            })?
        }
    };
    Ok(with_layers(op, storage.max_retries))
}

/// Build an S3 (or S3-compatible) operator.
///
/// Path-style addressing is the opendal default, which MinIO and SeaweedFS need.
pub fn build_s3_operator(cfg: &S3Settings) -> CarechainResult<Operator> {
    let builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(&cfg.access_key_id)
        .secret_access_key(&cfg.secret_access_key);
    Ok(Operator::new(builder).map_err(operator_error)?.finish())
}

/// Reject plaintext HTTP when `enforce_tls` is set, warn otherwise.
pub fn check_tls(storage: &StorageConfig) -> CarechainResult<()> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            return Err(CarechainError::Config(format!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            )));
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP, credentials are transmitted unencrypted"
        );
    }
    Ok(())
}

fn operator_error(e: opendal::Error) -> CarechainError {
    CarechainError::Config(format!("creating OpenDAL operator: {e}"))
}

fn with_layers(op: Operator, max_retries: usize) -> Operator {
    op.layer(opendal::layers::LoggingLayer::default()).layer(
        opendal::layers::RetryLayer::new()
            .with_max_times(max_retries)
            .with_jitter(),
    )
}

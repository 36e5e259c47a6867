//! Storage health check

use carechain_core::{CarechainResult, StorageError};
use opendal::Operator;

/// Verify the storage endpoint is reachable by listing the root
pub async fn check_health(op: &Operator) -> CarechainResult<()> {
    op.list("/")
        .await
        .map(|_| ())
        .map_err(|e| StorageError::Unavailable(format!("storage health check failed: {e}")).into())
}

/// Returns true if storage is reachable, false otherwise (non-panicking)
pub async fn is_healthy(op: &Operator) -> bool {
    check_health(op).await.is_ok()
}

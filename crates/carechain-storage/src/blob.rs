//! Content-addressed blob store
//!
//! Address = `b3` + lowercase hex BLAKE3 of the stored bytes; objects live at
//! `{prefix}/{address}`. Reads re-hash so a store that returns the wrong bytes
//! is caught before anything downstream sees them.
//!
//! `put_file` and `get_to_file` move blobs between disk and the backend in
//! 1 MiB pieces, so record size is not bounded by memory.

use std::path::Path;

use bytes::Bytes;
use carechain_core::{CarechainError, CarechainResult, ContentAddress, StorageError};
use opendal::{ErrorKind, Operator};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

const ADDRESS_PREFIX: &str = "b3";

/// Piece size for file uploads and ranged downloads
const TRANSFER_SIZE: usize = 1024 * 1024;

/// Content address of `data`.
pub fn address_of(data: &[u8]) -> ContentAddress {
    address_from(blake3::hash(data))
}

/// Content address of the file at `path`, hashed as it is read.
pub async fn address_of_file(path: &Path) -> CarechainResult<ContentAddress> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(address_from(hasher.finalize()))
}

fn address_from(hash: blake3::Hash) -> ContentAddress {
    ContentAddress::new(format!("{ADDRESS_PREFIX}{}", hash.to_hex()))
}

fn digest_of(address: &ContentAddress) -> CarechainResult<blake3::Hash> {
    address
        .as_str()
        .strip_prefix(ADDRESS_PREFIX)
        .and_then(|hex| blake3::Hash::from_hex(hex).ok())
        .ok_or_else(|| CarechainError::input(format!("'{address}' is not a content address")))
}

fn storage_error(e: opendal::Error, address: &ContentAddress) -> CarechainError {
    let err = match e.kind() {
        ErrorKind::NotFound => StorageError::NotFound(address.to_string()),
        _ if e.is_temporary() => StorageError::Unavailable(e.to_string()),
        _ => StorageError::Backend(e.to_string()),
    };
    err.into()
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    op: Operator,
    prefix: String,
}

impl BlobStore {
    pub fn new(op: Operator, prefix: &str) -> Self {
        Self {
            op,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    fn path(&self, address: &ContentAddress) -> String {
        if self.prefix.is_empty() {
            address.to_string()
        } else {
            format!("{}/{}", self.prefix, address)
        }
    }

    /// Store `data`, returning its address. Writing the same bytes twice is a no-op.
    pub async fn put(&self, data: Bytes, name_hint: &str) -> CarechainResult<ContentAddress> {
        let address = address_of(&data);
        let path = self.path(&address);

        if self
            .op
            .exists(&path)
            .await
            .map_err(|e| storage_error(e, &address))?
        {
            debug!(%address, name_hint, "blob already stored");
            return Ok(address);
        }

        let size = data.len();
        self.op
            .write(&path, data)
            .await
            .map_err(|e| storage_error(e, &address))?;
        debug!(%address, name_hint, size, "blob stored");
        Ok(address)
    }

    /// Fetch and integrity-check a blob.
    pub async fn get(&self, address: &ContentAddress) -> CarechainResult<Bytes> {
        let expected = digest_of(address)?;
        let data = self
            .op
            .read(&self.path(address))
            .await
            .map_err(|e| storage_error(e, address))?
            .to_bytes();

        if blake3::hash(&data) != expected {
            return Err(StorageError::IntegrityMismatch {
                address: address.to_string(),
            }
            .into());
        }
        debug!(%address, size = data.len(), "blob fetched");
        Ok(data)
    }

    /// Store the file at `path` without holding it in memory.
    ///
    /// The file is hashed first to find its address, then uploaded; if its
    /// contents change in between, the upload is aborted.
    pub async fn put_file(&self, path: &Path, name_hint: &str) -> CarechainResult<ContentAddress> {
        let address = address_of_file(path).await?;
        let object = self.path(&address);

        if self
            .op
            .exists(&object)
            .await
            .map_err(|e| storage_error(e, &address))?
        {
            debug!(%address, name_hint, "blob already stored");
            return Ok(address);
        }

        let mut writer = self
            .op
            .writer(&object)
            .await
            .map_err(|e| storage_error(e, &address))?;
        let size = match upload(path, &mut writer, &address).await {
            Ok(size) => size,
            Err(e) => {
                // the original error is the one worth reporting
                let _ = writer.abort().await;
                return Err(e);
            }
        };
        writer
            .close()
            .await
            .map_err(|e| storage_error(e, &address))?;
        debug!(%address, name_hint, size, "blob stored from file");
        Ok(address)
    }

    /// Fetch a blob into `dest` with ranged reads, checking it against its
    /// address. On any failure `dest` is removed. Returns the blob size.
    pub async fn get_to_file(&self, address: &ContentAddress, dest: &Path) -> CarechainResult<u64> {
        let expected = digest_of(address)?;
        let object = self.path(address);
        let size = self
            .op
            .stat(&object)
            .await
            .map_err(|e| storage_error(e, address))?
            .content_length();
        let reader = self
            .op
            .reader(&object)
            .await
            .map_err(|e| storage_error(e, address))?;

        let result = download(&reader, size, dest, expected, address).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result?;
        debug!(%address, size, dest = %dest.display(), "blob fetched to file");
        Ok(size)
    }

    pub async fn exists(&self, address: &ContentAddress) -> CarechainResult<bool> {
        self.op
            .exists(&self.path(address))
            .await
            .map_err(|e| storage_error(e, address))
    }
}

async fn upload(
    path: &Path,
    writer: &mut opendal::Writer,
    address: &ContentAddress,
) -> CarechainResult<u64> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = blake3::Hasher::new();
    let mut size = 0u64;
    loop {
        let mut piece = Vec::with_capacity(TRANSFER_SIZE);
        (&mut file)
            .take(TRANSFER_SIZE as u64)
            .read_to_end(&mut piece)
            .await?;
        if piece.is_empty() {
            break;
        }
        hasher.update(&piece);
        size += piece.len() as u64;
        writer
            .write(Bytes::from(piece))
            .await
            .map_err(|e| storage_error(e, address))?;
    }
    if address_from(hasher.finalize()) != *address {
        return Err(CarechainError::input(format!(
            "{} changed while it was being stored",
            path.display()
        )));
    }
    Ok(size)
}

async fn download(
    reader: &opendal::Reader,
    size: u64,
    dest: &Path,
    expected: blake3::Hash,
    address: &ContentAddress,
) -> CarechainResult<()> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut hasher = blake3::Hasher::new();
    let mut offset = 0u64;
    while offset < size {
        let end = (offset + TRANSFER_SIZE as u64).min(size);
        let piece = reader
            .read(offset..end)
            .await
            .map_err(|e| storage_error(e, address))?
            .to_bytes();
        if piece.is_empty() {
            break;
        }
        hasher.update(&piece);
        file.write_all(&piece).await?;
        offset += piece.len() as u64;
    }
    file.flush().await?;

    if hasher.finalize() != expected {
        return Err(StorageError::IntegrityMismatch {
            address: address.to_string(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use carechain_core::ErrorClass;

    fn memory_store() -> BlobStore {
        let op = Operator::new(opendal::services::Memory::default())
            .expect("memory operator")
            .finish();
        BlobStore::new(op, "records")
    }

    #[test]
    fn test_address_format() {
        let addr = address_of(b"ciphertext");
        assert!(addr.as_str().starts_with("b3"));
        assert_eq!(addr.as_str().len(), 2 + 64);
        assert_eq!(addr, address_of(b"ciphertext"));
        assert_ne!(addr, address_of(b"ciphertexT"));
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = memory_store();
        let addr = store
            .put(Bytes::from_static(b"sealed chunks"), "record.enc")
            .await
            .unwrap();

        assert!(store.exists(&addr).await.unwrap());
        assert_eq!(store.get(&addr).await.unwrap(), Bytes::from_static(b"sealed chunks"));
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = memory_store();
        let a = store.put(Bytes::from_static(b"same"), "a").await.unwrap();
        let b = store.put(Bytes::from_static(b"same"), "b").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let store = memory_store();
        let err = store.get(&address_of(b"never stored")).await.unwrap_err();
        assert!(matches!(err, CarechainError::Storage(StorageError::NotFound(_))));
        assert_eq!(err.class(), ErrorClass::Storage);
    }

    #[tokio::test]
    async fn test_swapped_blob_is_integrity_mismatch() {
        let store = memory_store();
        let addr = address_of(b"original");
        store
            .operator()
            .write(&format!("records/{addr}"), b"replaced".to_vec())
            .await
            .unwrap();

        let err = store.get(&addr).await.unwrap_err();
        assert!(matches!(
            err,
            CarechainError::Storage(StorageError::IntegrityMismatch { .. })
        ));
        assert_eq!(err.class(), ErrorClass::Tampered);
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i.wrapping_mul(13) ^ (i >> 9)) as u8).collect()
    }

    #[tokio::test]
    async fn test_file_roundtrip_spans_several_pieces() {
        let store = memory_store();
        let dir = tempfile::tempdir().unwrap();
        let data = pattern(TRANSFER_SIZE * 2 + 777);
        let src = dir.path().join("record.enc");
        std::fs::write(&src, &data).unwrap();

        let addr = store.put_file(&src, "record.enc").await.unwrap();
        assert_eq!(addr, address_of(&data));
        assert_eq!(address_of_file(&src).await.unwrap(), addr);
        assert_eq!(store.get(&addr).await.unwrap(), Bytes::from(data.clone()));

        let dest = dir.path().join("fetched.enc");
        let size = store.get_to_file(&addr, &dest).await.unwrap();
        assert_eq!(size, data.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[tokio::test]
    async fn test_put_file_matches_put() {
        let store = memory_store();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("empty.enc");
        std::fs::write(&src, b"").unwrap();

        let from_file = store.put_file(&src, "empty.enc").await.unwrap();
        let from_bytes = store.put(Bytes::new(), "empty.enc").await.unwrap();
        assert_eq!(from_file, from_bytes);
    }

    #[tokio::test]
    async fn test_get_to_file_removes_swapped_blob() {
        let store = memory_store();
        let dir = tempfile::tempdir().unwrap();
        let addr = address_of(b"original");
        store
            .operator()
            .write(&format!("records/{addr}"), b"replaced".to_vec())
            .await
            .unwrap();

        let dest = dir.path().join("fetched.enc");
        let err = store.get_to_file(&addr, &dest).await.unwrap_err();
        assert!(matches!(
            err,
            CarechainError::Storage(StorageError::IntegrityMismatch { .. })
        ));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_get_to_file_missing_blob_is_not_found() {
        let store = memory_store();
        let dir = tempfile::tempdir().unwrap();
        let err = store
            .get_to_file(&address_of(b"never stored"), &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CarechainError::Storage(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_malformed_address_is_input_error() {
        let store = memory_store();
        let err = store.get(&ContentAddress::new("QmNotBlake3")).await.unwrap_err();
        assert!(matches!(err, CarechainError::Input(_)));
    }
}

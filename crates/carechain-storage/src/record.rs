//! Publishing and fetching whole encrypted records
//!
//! A record is two blobs: the ciphertext and its JSON descriptor. The ciphertext
//! goes first so a descriptor is never visible without the blob it describes.

use std::path::Path;

use bytes::Bytes;
use carechain_core::{CarechainResult, ContentAddress, RecordPointer};
use carechain_crypto::{EncryptedRecord, MetadataDescriptor};
use tracing::info;

use crate::blob::BlobStore;

/// Store ciphertext then descriptor; the pointer only exists once both landed.
pub async fn publish_record(
    store: &BlobStore,
    record: &EncryptedRecord,
) -> CarechainResult<RecordPointer> {
    let meta = record.descriptor.to_json()?;

    let cid_enc = store.put(record.ciphertext.clone(), "record.enc").await?;
    let meta_cid = store.put(Bytes::from(meta), "meta.json").await?;

    Ok(pointer_for(
        cid_enc,
        meta_cid,
        record.ciphertext.len() as u64,
        &record.descriptor,
    ))
}

/// [`publish_record`] for ciphertext already written to `ciphertext_path`.
pub async fn publish_record_file(
    store: &BlobStore,
    ciphertext_path: &Path,
    descriptor: &MetadataDescriptor,
) -> CarechainResult<RecordPointer> {
    let meta = descriptor.to_json()?;
    let size_bytes = tokio::fs::metadata(ciphertext_path).await?.len();

    let cid_enc = store.put_file(ciphertext_path, "record.enc").await?;
    let meta_cid = store.put(Bytes::from(meta), "meta.json").await?;

    Ok(pointer_for(cid_enc, meta_cid, size_bytes, descriptor))
}

fn pointer_for(
    cid_enc: ContentAddress,
    meta_cid: ContentAddress,
    size_bytes: u64,
    descriptor: &MetadataDescriptor,
) -> RecordPointer {
    let pointer = RecordPointer {
        cid_enc,
        meta_cid,
        size_bytes,
        cipher_hash: descriptor.cipher_hash.clone(),
    };
    info!(
        cid_enc = %pointer.cid_enc,
        meta_cid = %pointer.meta_cid,
        size = pointer.size_bytes,
        "record published"
    );
    pointer
}

/// Fetch descriptor and ciphertext. Cryptographic checks are left to the pipeline.
pub async fn fetch_record(
    store: &BlobStore,
    cid_enc: &ContentAddress,
    meta_cid: &ContentAddress,
) -> CarechainResult<(MetadataDescriptor, Bytes)> {
    let meta = store.get(meta_cid).await?;
    let descriptor = MetadataDescriptor::from_json(&meta)?;
    let ciphertext = store.get(cid_enc).await?;
    Ok((descriptor, ciphertext))
}

/// Fetch the descriptor and write the ciphertext to `ciphertext_path`.
pub async fn fetch_record_to_file(
    store: &BlobStore,
    cid_enc: &ContentAddress,
    meta_cid: &ContentAddress,
    ciphertext_path: &Path,
) -> CarechainResult<MetadataDescriptor> {
    let meta = store.get(meta_cid).await?;
    let descriptor = MetadataDescriptor::from_json(&meta)?;
    store.get_to_file(cid_enc, ciphertext_path).await?;
    Ok(descriptor)
}

/// `fetch_record` by pointer.
pub async fn fetch_pointer(
    store: &BlobStore,
    pointer: &RecordPointer,
) -> CarechainResult<(MetadataDescriptor, Bytes)> {
    fetch_record(store, &pointer.cid_enc, &pointer.meta_cid).await
}

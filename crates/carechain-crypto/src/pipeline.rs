//! Envelope pipeline: encrypt a record for a set of recipients and decrypt it back
//!
//! Encrypt:
//! ```text
//! DataKey + BaseNonce → ChunkPlan → seal chunks (rayon) → BLAKE2b in index order
//!   → KMS wrap (await) → wipe DataKey → seal wrapped key per recipient → descriptor
//! ```
//!
//! Decrypt:
//! ```text
//! validate descriptor → verify blob hash → KMS unwrap (await) → open chunks (rayon) → wipe DataKey
//! ```
//!
//! Both directions also come in a streaming form that works through the record
//! a window of chunks at a time, so memory stays bounded by
//! `stream_window * chunk_size` whatever the record size.
//!
//! Neither direction touches storage; the caller publishes or fetches the pair.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use carechain_core::config::PipelineConfig;
use carechain_core::{CarechainError, CarechainResult};
use rayon::prelude::*;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::chunk::ChunkCipher;
use crate::descriptor::{CipherParams, EnvelopeType, MetadataDescriptor, RecipientEnvelope};
use crate::hash::{check_hash, hash_reader, verify_blob, CipherHash, CipherHasher};
use crate::keys::{DataKey, KeyWipe, WrappedKey};
use crate::kms::KeyManagement;
use crate::nonce::BaseNonce;
use crate::plan::ChunkPlan;
use crate::seal::{seal_for, RecipientKey, RecipientSecret};
use crate::{ALG_XCHACHA20_POLY1305, TAG_SIZE};

/// What to encrypt a record for.
#[derive(Debug, Clone, Default)]
pub struct EncryptRequest {
    /// Record context bound into every chunk tag; generated when `None`
    pub aad: Option<String>,
    pub content_type: Option<String>,
    /// Role or identifier → recipient public key
    pub recipients: BTreeMap<String, RecipientKey>,
}

impl EncryptRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recipient(mut self, role: impl Into<String>, key: RecipientKey) -> Self {
        self.recipients.insert(role.into(), key);
        self
    }

    pub fn aad(mut self, aad: impl Into<String>) -> Self {
        self.aad = Some(aad.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A complete, publishable record. Only ever handed out whole.
#[derive(Debug, Clone)]
pub struct EncryptedRecord {
    pub ciphertext: Bytes,
    pub descriptor: MetadataDescriptor,
}

/// Fresh record context: `record_id=<uuid v4>`.
pub fn new_record_context() -> String {
    format!("record_id={}", uuid::Uuid::new_v4())
}

pub struct EnvelopePipeline {
    chunk_size: u32,
    /// Chunks held in memory at once on the streaming paths
    window: usize,
    default_content_type: String,
    /// Dedicated chunk workers; `None` uses the global rayon pool
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl EnvelopePipeline {
    pub fn new(chunk_size: u32) -> CarechainResult<Self> {
        if chunk_size == 0 {
            return Err(CarechainError::Config("chunk_size must be > 0".into()));
        }
        let defaults = PipelineConfig::default();
        Ok(Self {
            chunk_size,
            window: defaults.stream_window,
            default_content_type: defaults.default_content_type,
            pool: None,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> CarechainResult<Self> {
        let mut pipeline = Self::new(config.chunk_size)?.with_window(config.stream_window);
        pipeline.default_content_type = config.default_content_type.clone();
        if config.workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.workers)
                .thread_name(|i| format!("carechain-chunk-{i}"))
                .build()
                .map_err(|e| CarechainError::Config(format!("chunk worker pool: {e}")))?;
            pipeline.pool = Some(Arc::new(pool));
        }
        Ok(pipeline)
    }

    /// Chunks per streaming window (at least 1).
    pub fn with_window(mut self, chunks: usize) -> Self {
        self.window = chunks.max(1);
        self
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Encrypt `plaintext` under a fresh data key.
    pub async fn encrypt(
        &self,
        plaintext: Bytes,
        request: EncryptRequest,
        kms: &dyn KeyManagement,
    ) -> CarechainResult<EncryptedRecord> {
        let mut key = DataKey::generate();
        self.encrypt_with_key(&mut key, plaintext, request, kms)
            .await
    }

    /// Encrypt under a caller-supplied data key. The key is wiped before this
    /// returns, on success and on every error path.
    pub async fn encrypt_with_key(
        &self,
        key: &mut DataKey,
        plaintext: Bytes,
        request: EncryptRequest,
        kms: &dyn KeyManagement,
    ) -> CarechainResult<EncryptedRecord> {
        let key = KeyWipe::new(key);
        check_recipients(&request.recipients)?;
        let aad = record_context(request.aad.clone())?;

        let plan = ChunkPlan::for_plaintext(plaintext.len(), self.chunk_size)?;
        let base_nonce = BaseNonce::generate();
        let cipher = ChunkCipher::new(&key, base_nonce);
        let chunks = plan.len();

        let chunk_aad = aad.clone();
        let (ciphertext, cipher_hash) = self
            .run_chunk_work(move || seal_chunks(&cipher, &plan, chunk_aad.as_bytes(), &plaintext))
            .await?;
        debug!(chunks, bytes = ciphertext.len(), "chunks sealed");

        let wrapped = kms.wrap(&key, &aad).await?;
        drop(key);

        let descriptor =
            self.describe(request, aad, base_nonce, cipher_hash, wrapped, kms.key_ref())?;
        info!(
            chunks,
            bytes = ciphertext.len(),
            recipients = descriptor.dek_for.len(),
            kms_key_ref = %descriptor.kms_key_ref,
            "record encrypted"
        );

        Ok(EncryptedRecord {
            ciphertext: Bytes::from(ciphertext),
            descriptor,
        })
    }

    /// Encrypt from `reader` to `writer`, holding at most `window` chunks in memory.
    ///
    /// Ciphertext reaches `writer` window by window; the descriptor that makes
    /// it a record is returned only after the last chunk is sealed and the key
    /// wrapped. On error `writer` may hold a partial blob that nothing points to.
    pub async fn encrypt_stream<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        request: EncryptRequest,
        kms: &dyn KeyManagement,
    ) -> CarechainResult<MetadataDescriptor>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut key = DataKey::generate();
        let key = KeyWipe::new(&mut key);
        check_recipients(&request.recipients)?;
        let aad = record_context(request.aad.clone())?;

        let base_nonce = BaseNonce::generate();
        let cipher = Arc::new(ChunkCipher::new(&key, base_nonce));
        let window_bytes = self.window * self.chunk_size as usize;
        let mut hasher = CipherHasher::new();
        let mut next_index = 0u64;
        let mut bytes = 0u64;

        loop {
            let buf = read_window(reader, window_bytes).await?;
            let at_end = buf.len() < window_bytes;
            if buf.is_empty() && next_index > 0 {
                break;
            }
            // an empty stream still yields one tag-only chunk
            let plan = if buf.is_empty() {
                ChunkPlan::for_plaintext(0, self.chunk_size)?
            } else {
                ChunkPlan::plaintext_window(next_index, buf.len(), self.chunk_size)?
            };

            let window_cipher = Arc::clone(&cipher);
            let chunk_aad = aad.clone();
            let sealed = self
                .run_chunk_work(move || {
                    seal_spans(&window_cipher, &plan, chunk_aad.as_bytes(), &buf)
                })
                .await?;

            for chunk in &sealed {
                hasher.update(chunk);
                writer.write_all(chunk).await?;
                bytes += chunk.len() as u64;
            }
            next_index += sealed.len() as u64;
            if at_end {
                break;
            }
        }
        writer.flush().await?;
        drop(cipher);
        let cipher_hash = hasher.finalize();
        debug!(chunks = next_index, bytes, "chunks sealed");

        let wrapped = kms.wrap(&key, &aad).await?;
        drop(key);

        let descriptor =
            self.describe(request, aad, base_nonce, cipher_hash, wrapped, kms.key_ref())?;
        info!(
            chunks = next_index,
            bytes,
            recipients = descriptor.dek_for.len(),
            kms_key_ref = %descriptor.kms_key_ref,
            "record encrypted (streamed)"
        );
        Ok(descriptor)
    }

    /// Decrypt a record given the wrapped key recovered from a recipient envelope.
    ///
    /// All or nothing: any failure yields no plaintext. The blob hash is checked
    /// before the key service is called, so a blob altered in storage fails
    /// with `CipherHashMismatch`. A blob whose published hash was rewritten to
    /// match, or a changed `aad` or `nonce_base`, fails with `Authentication`
    /// for the lowest affected chunk. Both belong to `ErrorClass::Tampered`.
    pub async fn decrypt(
        &self,
        ciphertext: Bytes,
        descriptor: &MetadataDescriptor,
        wrapped: &WrappedKey,
        kms: &dyn KeyManagement,
    ) -> CarechainResult<Vec<u8>> {
        let params = descriptor.validate()?;
        check_key_service(descriptor, kms)?;
        verify_blob(&ciphertext, &params.cipher_hash)?;
        let plan = ChunkPlan::for_ciphertext(ciphertext.len(), params.chunk_size)?;

        let cipher = self.unwrap_cipher(wrapped, &params, kms).await?;
        let chunks = plan.len();

        let aad = params.aad;
        let plaintext = self
            .run_chunk_work(move || open_chunks(&cipher, &plan, aad.as_bytes(), &ciphertext))
            .await?;

        info!(chunks, bytes = plaintext.len(), "record decrypted");
        Ok(plaintext)
    }

    /// Open this recipient's envelope, then decrypt.
    pub async fn decrypt_for(
        &self,
        ciphertext: Bytes,
        descriptor: &MetadataDescriptor,
        secret: &RecipientSecret,
        role: &str,
        kms: &dyn KeyManagement,
    ) -> CarechainResult<Vec<u8>> {
        let wrapped = secret.open_envelope(descriptor, role)?;
        self.decrypt(ciphertext, descriptor, &wrapped, kms).await
    }

    /// Decrypt from `reader` into the file at `out`, holding at most `window`
    /// chunks in memory. Returns the plaintext length.
    ///
    /// Plaintext goes to a hidden sibling file that is renamed onto `out` only
    /// after every chunk authenticated and the blob hash matched. On any failure
    /// that file is removed, so no partial plaintext is left behind. Chunks are
    /// checked as they stream in, so a corrupted chunk is reported as
    /// `Authentication` before the whole-blob `CipherHashMismatch` could be.
    pub async fn decrypt_to_file<R>(
        &self,
        reader: &mut R,
        descriptor: &MetadataDescriptor,
        wrapped: &WrappedKey,
        kms: &dyn KeyManagement,
        out: &Path,
    ) -> CarechainResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        let params = descriptor.validate()?;
        check_key_service(descriptor, kms)?;
        let cipher = Arc::new(self.unwrap_cipher(wrapped, &params, kms).await?);

        let partial = partial_path(out);
        let result = match self.open_stream(reader, &cipher, &params, &partial).await {
            Ok(len) => tokio::fs::rename(&partial, out)
                .await
                .map(|_| len)
                .map_err(CarechainError::from),
            Err(e) => Err(e),
        };
        if result.is_err() {
            // may not exist yet; nothing to report either way
            let _ = tokio::fs::remove_file(&partial).await;
        }

        let len = result?;
        info!(bytes = len, out = %out.display(), "record decrypted (streamed)");
        Ok(len)
    }

    /// Open this recipient's envelope, then stream-decrypt into `out`.
    pub async fn decrypt_to_file_for<R>(
        &self,
        reader: &mut R,
        descriptor: &MetadataDescriptor,
        secret: &RecipientSecret,
        role: &str,
        kms: &dyn KeyManagement,
        out: &Path,
    ) -> CarechainResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        let wrapped = secret.open_envelope(descriptor, role)?;
        self.decrypt_to_file(reader, descriptor, &wrapped, kms, out)
            .await
    }

    /// Descriptor validation plus the blob-level hash check, without any key access.
    pub fn verify_cipher_hash(
        &self,
        ciphertext: &[u8],
        descriptor: &MetadataDescriptor,
    ) -> CarechainResult<CipherHash> {
        let params = descriptor.validate()?;
        verify_blob(ciphertext, &params.cipher_hash)?;
        Ok(params.cipher_hash)
    }

    /// [`EnvelopePipeline::verify_cipher_hash`] over a reader. Returns the hash
    /// and the blob length.
    pub async fn verify_cipher_hash_stream<R>(
        &self,
        reader: &mut R,
        descriptor: &MetadataDescriptor,
    ) -> CarechainResult<(CipherHash, u64)>
    where
        R: AsyncRead + Unpin,
    {
        let params = descriptor.validate()?;
        let (actual, len) = hash_reader(reader).await?;
        check_hash(&actual, &params.cipher_hash)?;
        Ok((actual, len))
    }

    /// Unwrap the data key and expand it into a chunk cipher; the key itself
    /// is wiped before this returns.
    async fn unwrap_cipher(
        &self,
        wrapped: &WrappedKey,
        params: &CipherParams,
        kms: &dyn KeyManagement,
    ) -> CarechainResult<ChunkCipher> {
        let mut key = kms.unwrap(wrapped, &params.aad).await?;
        let key = KeyWipe::new(&mut key);
        Ok(ChunkCipher::new(&key, params.base_nonce))
    }

    async fn open_stream<R>(
        &self,
        reader: &mut R,
        cipher: &Arc<ChunkCipher>,
        params: &CipherParams,
        partial: &Path,
    ) -> CarechainResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = create_private(partial).await?;
        let window_bytes = self.window * (params.chunk_size as usize + TAG_SIZE);
        let mut hasher = CipherHasher::new();
        let mut next_index = 0u64;
        let mut written = 0u64;

        loop {
            let buf = read_window(reader, window_bytes).await?;
            if buf.is_empty() {
                break;
            }
            let at_end = buf.len() < window_bytes;
            let plan = ChunkPlan::ciphertext_window(next_index, buf.len(), params.chunk_size)?;
            let chunks = plan.len() as u64;

            let window_cipher = Arc::clone(cipher);
            let aad = params.aad.clone();
            let (opened, window_hasher) = self
                .run_chunk_work(move || {
                    let opened = open_spans(&window_cipher, &plan, aad.as_bytes(), &buf)?;
                    hasher.update(&buf);
                    Ok((opened, hasher))
                })
                .await?;
            hasher = window_hasher;

            for chunk in &opened {
                file.write_all(chunk).await?;
                written += chunk.len() as u64;
            }
            next_index += chunks;
            if at_end {
                break;
            }
        }

        check_hash(&hasher.finalize(), &params.cipher_hash)?;
        file.flush().await?;
        file.sync_all().await?;
        debug!(chunks = next_index, bytes = written, "chunks opened");
        Ok(written)
    }

    /// Build the descriptor once the key is wrapped: one sealed envelope per recipient.
    fn describe(
        &self,
        request: EncryptRequest,
        aad: String,
        base_nonce: BaseNonce,
        cipher_hash: CipherHash,
        wrapped: WrappedKey,
        kms_key_ref: &str,
    ) -> CarechainResult<MetadataDescriptor> {
        let mut dek_for = BTreeMap::new();
        for (role, recipient) in &request.recipients {
            let sealed = seal_for(&wrapped, recipient)?;
            dek_for.insert(
                role.clone(),
                RecipientEnvelope {
                    kind: EnvelopeType::SealedBox,
                    edek: sealed.as_bytes().to_vec(),
                    pk: Some(recipient.to_base64()),
                },
            );
        }

        Ok(MetadataDescriptor {
            alg: ALG_XCHACHA20_POLY1305.to_string(),
            chunk_size: self.chunk_size,
            nonce_base: base_nonce.as_bytes().to_vec(),
            aad,
            cipher_hash: cipher_hash.to_hex(),
            kms_key_ref: kms_key_ref.to_string(),
            wrapped_dek: wrapped.into_bytes(),
            dek_for,
            original_content_type: request
                .content_type
                .unwrap_or_else(|| self.default_content_type.clone()),
            created_at: unix_now(),
        })
    }

    async fn run_chunk_work<T, F>(&self, work: F) -> CarechainResult<T>
    where
        F: FnOnce() -> CarechainResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || match pool {
            Some(pool) => pool.install(work),
            None => work(),
        })
        .await
        .map_err(|e| CarechainError::Other(anyhow::anyhow!("chunk worker task failed: {e}")))?
    }
}

impl std::fmt::Debug for EnvelopePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopePipeline")
            .field("chunk_size", &self.chunk_size)
            .field("window", &self.window)
            .field(
                "workers",
                &self.pool.as_ref().map(|p| p.current_num_threads()),
            )
            .finish()
    }
}

fn check_recipients(recipients: &BTreeMap<String, RecipientKey>) -> CarechainResult<()> {
    if recipients.is_empty() {
        return Err(CarechainError::input("at least one recipient is required"));
    }
    for (role, recipient) in recipients {
        recipient
            .validate()
            .map_err(|e| CarechainError::input(format!("recipient '{role}': {e}")))?;
    }
    Ok(())
}

fn record_context(aad: Option<String>) -> CarechainResult<String> {
    match aad {
        Some(aad) if aad.is_empty() => Err(CarechainError::input("record context (aad) is empty")),
        Some(aad) => Ok(aad),
        None => Ok(new_record_context()),
    }
}

fn check_key_service(
    descriptor: &MetadataDescriptor,
    kms: &dyn KeyManagement,
) -> CarechainResult<()> {
    if descriptor.kms_key_ref != kms.key_ref() {
        return Err(CarechainError::input(format!(
            "record was wrapped by '{}', configured key service is '{}'",
            descriptor.kms_key_ref,
            kms.key_ref()
        )));
    }
    Ok(())
}

/// Read up to `limit` bytes, fewer only at end of stream.
async fn read_window<R>(reader: &mut R, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(limit);
    (&mut *reader).take(limit as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}

/// `dir/.{name}.partial` next to `out`.
fn partial_path(out: &Path) -> PathBuf {
    let name = out
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "record".to_string());
    out.with_file_name(format!(".{name}.partial"))
}

async fn create_private(path: &Path) -> std::io::Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path).await
}

/// Seal every span in parallel; results come back in index order.
pub fn seal_spans(
    cipher: &ChunkCipher,
    plan: &ChunkPlan,
    aad: &[u8],
    plaintext: &[u8],
) -> CarechainResult<Vec<Vec<u8>>> {
    plan.spans()
        .par_iter()
        .map(|span| cipher.seal(u64::from(span.index), aad, &plaintext[span.range.clone()]))
        .collect()
}

/// Seal every chunk in parallel, then concatenate and hash in index order.
pub fn seal_chunks(
    cipher: &ChunkCipher,
    plan: &ChunkPlan,
    aad: &[u8],
    plaintext: &[u8],
) -> CarechainResult<(Vec<u8>, CipherHash)> {
    let sealed = seal_spans(cipher, plan, aad, plaintext)?;

    let mut hasher = CipherHasher::new();
    let mut blob = Vec::with_capacity(plaintext.len() + plan.len() * TAG_SIZE);
    for chunk in &sealed {
        hasher.update(chunk);
        blob.extend_from_slice(chunk);
    }
    Ok((blob, hasher.finalize()))
}

/// Open every span in parallel. The lowest failing index is reported.
pub fn open_spans(
    cipher: &ChunkCipher,
    plan: &ChunkPlan,
    aad: &[u8],
    ciphertext: &[u8],
) -> CarechainResult<Vec<Vec<u8>>> {
    let opened: Vec<CarechainResult<Vec<u8>>> = plan
        .spans()
        .par_iter()
        .map(|span| cipher.open(u64::from(span.index), aad, &ciphertext[span.range.clone()]))
        .collect();
    opened.into_iter().collect()
}

/// Open every chunk in parallel. The lowest failing index is reported and no
/// plaintext is returned.
pub fn open_chunks(
    cipher: &ChunkCipher,
    plan: &ChunkPlan,
    aad: &[u8],
    ciphertext: &[u8],
) -> CarechainResult<Vec<u8>> {
    let opened = open_spans(cipher, plan, aad, ciphertext)?;
    let mut plaintext = Vec::with_capacity(opened.iter().map(Vec::len).sum());
    for chunk in opened {
        plaintext.extend_from_slice(&chunk);
    }
    Ok(plaintext)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> ChunkCipher {
        ChunkCipher::new(&DataKey::generate(), BaseNonce::generate())
    }

    #[test]
    fn test_seal_chunks_layout() {
        let cipher = cipher();
        let plaintext = vec![5u8; 2500];
        let plan = ChunkPlan::for_plaintext(plaintext.len(), 1000).unwrap();

        let (blob, hash) = seal_chunks(&cipher, &plan, b"ctx", &plaintext).unwrap();
        assert_eq!(blob.len(), 2500 + 3 * TAG_SIZE);
        assert_eq!(hash, CipherHash::of_blob(&blob));
    }

    #[test]
    fn test_open_chunks_roundtrip() {
        let cipher = cipher();
        let plaintext: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let plan = ChunkPlan::for_plaintext(plaintext.len(), 1024).unwrap();
        let (blob, _) = seal_chunks(&cipher, &plan, b"ctx", &plaintext).unwrap();

        let ct_plan = ChunkPlan::for_ciphertext(blob.len(), 1024).unwrap();
        assert_eq!(ct_plan.len(), 4);
        assert_eq!(open_chunks(&cipher, &ct_plan, b"ctx", &blob).unwrap(), plaintext);
    }

    #[test]
    fn test_open_chunks_reports_lowest_failing_index() {
        let cipher = cipher();
        let plaintext = vec![1u8; 4000];
        let plan = ChunkPlan::for_plaintext(plaintext.len(), 1000).unwrap();
        let (mut blob, _) = seal_chunks(&cipher, &plan, b"ctx", &plaintext).unwrap();

        let stride = 1000 + TAG_SIZE;
        blob[stride + 3] ^= 1;
        blob[3 * stride + 3] ^= 1;

        let ct_plan = ChunkPlan::for_ciphertext(blob.len(), 1000).unwrap();
        let err = open_chunks(&cipher, &ct_plan, b"ctx", &blob).unwrap_err();
        assert!(matches!(err, CarechainError::Authentication { chunk: 1 }));
    }

    #[test]
    fn test_swapped_chunks_fail() {
        let cipher = cipher();
        let plaintext = vec![9u8; 2000];
        let plan = ChunkPlan::for_plaintext(plaintext.len(), 1000).unwrap();
        let (blob, _) = seal_chunks(&cipher, &plan, b"ctx", &plaintext).unwrap();

        let stride = 1000 + TAG_SIZE;
        let swapped = [&blob[stride..], &blob[..stride]].concat();
        let ct_plan = ChunkPlan::for_ciphertext(swapped.len(), 1000).unwrap();
        assert!(open_chunks(&cipher, &ct_plan, b"ctx", &swapped).is_err());
    }

    #[test]
    fn test_request_builder() {
        let key = crate::seal::RecipientIdentity::generate().public_key();
        let req = EncryptRequest::new()
            .recipient("patient", key)
            .aad("record_id=42")
            .content_type("application/pdf");

        assert_eq!(req.recipients.len(), 1);
        assert_eq!(req.aad.as_deref(), Some("record_id=42"));
    }

    #[test]
    fn test_record_context_format() {
        let ctx = new_record_context();
        assert!(ctx.starts_with("record_id="));
        assert_ne!(ctx, new_record_context());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(EnvelopePipeline::new(0).is_err());
    }

    #[test]
    fn test_from_config_builds_pool() {
        let config = PipelineConfig {
            chunk_size: 4096,
            workers: 2,
            ..PipelineConfig::default()
        };
        let pipeline = EnvelopePipeline::from_config(&config).unwrap();
        assert_eq!(pipeline.chunk_size(), 4096);
        assert_eq!(pipeline.window(), config.stream_window);
        assert!(format!("{pipeline:?}").contains("Some(2)"));
    }

    #[test]
    fn test_window_never_zero() {
        let pipeline = EnvelopePipeline::new(1024).unwrap().with_window(0);
        assert_eq!(pipeline.window(), 1);
    }

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        let out = Path::new("/records/out/scan.pdf");
        assert_eq!(
            partial_path(out),
            PathBuf::from("/records/out/.scan.pdf.partial")
        );
    }

    #[test]
    fn test_windowed_seal_matches_whole_record() {
        let cipher = cipher();
        let plaintext: Vec<u8> = (0..5000u32).map(|i| (i % 199) as u8).collect();
        let plan = ChunkPlan::for_plaintext(plaintext.len(), 1000).unwrap();
        let (whole, hash) = seal_chunks(&cipher, &plan, b"ctx", &plaintext).unwrap();

        let mut hasher = CipherHasher::new();
        let mut windowed = Vec::new();
        for (first, window) in plaintext.chunks(2000).enumerate() {
            let plan = ChunkPlan::plaintext_window(first as u64 * 2, window.len(), 1000).unwrap();
            for chunk in seal_spans(&cipher, &plan, b"ctx", window).unwrap() {
                hasher.update(&chunk);
                windowed.extend_from_slice(&chunk);
            }
        }
        assert_eq!(windowed, whole);
        assert_eq!(hasher.finalize(), hash);
    }
}

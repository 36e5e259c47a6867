//! carechain: encrypted medical-record envelopes on content-addressed storage
//!
//! Commands:
//!   keygen --out <file>                  - new Ed25519 recipient identity
//!   pubkey --identity <file>             - print an identity's public key
//!   encrypt <file> --recipient r=<key>   - encrypt, publish, print the record pointer
//!   decrypt --enc <cid> --meta <cid>     - fetch, unseal, unwrap, decrypt
//!   verify --enc <cid> --meta <cid>      - descriptor + blob hash check, no key access
//!   status                               - storage health and key service in use
//!   config show                          - display current configuration

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use zeroize::Zeroizing;

use carechain_core::config::{expand_tilde, CarechainConfig};
use carechain_core::{ContentAddress, RecordPointer};
use carechain_crypto::{
    CipherHash, EncryptRequest, EnvelopePipeline, RecipientIdentity, RecipientKey,
};
use carechain_kms::RecipientDirectory;
use carechain_storage::{gateway_url, BlobStore};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "carechain",
    version,
    about = "Encrypted record envelopes for untrusted blob storage",
    long_about = "carechain: encrypt records for named recipients, publish them to content-addressed storage, and decrypt them back"
)]
struct Cli {
    /// Path to carechain.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "CARECHAIN_CONFIG",
        default_value = "~/.config/carechain/carechain.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "CARECHAIN_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "CARECHAIN_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a recipient identity (Ed25519 seed, base64)
    Keygen {
        /// Where to write the identity (created with mode 0600)
        #[arg(long, short = 'o')]
        out: PathBuf,
        /// Overwrite an existing identity file
        #[arg(long)]
        force: bool,
    },

    /// Print the public key of an identity file
    Pubkey {
        #[arg(long, short = 'i', env = "CARECHAIN_IDENTITY")]
        identity: PathBuf,
    },

    /// Encrypt a file for one or more recipients and publish it
    ///
    /// Recipients are `role=<base64 public key>` or `role=@<directory ref>`.
    Encrypt {
        /// Plaintext file
        file: PathBuf,
        /// Recipient (repeatable): patient=<key> or rs_creator=@carechain-hosp-001
        #[arg(long = "recipient", short = 'r', required = true)]
        recipients: Vec<String>,
        /// Record context bound into every chunk (default: record_id=<uuid>)
        #[arg(long)]
        aad: Option<String>,
        /// Original content type (default: [pipeline] default_content_type)
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Fetch a published record and decrypt it as one recipient
    Decrypt {
        /// Ciphertext content address
        #[arg(long)]
        enc: String,
        /// Descriptor content address
        #[arg(long)]
        meta: String,
        /// Recipient role whose envelope to open
        #[arg(long)]
        role: String,
        /// Identity file of that recipient
        #[arg(long, short = 'i', env = "CARECHAIN_IDENTITY")]
        identity: PathBuf,
        /// Where to write the plaintext
        #[arg(long, short = 'o')]
        out: PathBuf,
    },

    /// Check a published record's descriptor and blob hash without key access
    Verify {
        #[arg(long)]
        enc: String,
        #[arg(long)]
        meta: String,
    },

    /// Show storage health and the configured key service
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = CarechainConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(if config.log.format == "json" {
        LogFormat::Json
    } else {
        LogFormat::Text
    });
    init_logging(&level, &format);

    match cli.command {
        Commands::Keygen { out, force } => cmd_keygen(&out, force),
        Commands::Pubkey { identity } => cmd_pubkey(&identity),
        Commands::Encrypt {
            file,
            recipients,
            aad,
            content_type,
        } => cmd_encrypt(&config, &file, &recipients, aad, content_type)
            .await
            .map(|_| ()),
        Commands::Decrypt {
            enc,
            meta,
            role,
            identity,
            out,
        } => cmd_decrypt(&config, &enc, &meta, &role, &identity, &out).await,
        Commands::Verify { enc, meta } => cmd_verify(&config, &enc, &meta).await.map(|_| ()),
        Commands::Status => cmd_status(&config).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // logs go to stderr so stdout stays machine-readable
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn open_store(config: &CarechainConfig) -> Result<BlobStore> {
    let op = carechain_storage::build_operator(&config.storage).context("building storage operator")?;
    Ok(BlobStore::new(op, &config.storage.prefix))
}

fn read_identity(path: &Path) -> Result<RecipientIdentity> {
    let path = expand_tilde(path);
    let contents = Zeroizing::new(
        std::fs::read_to_string(&path)
            .with_context(|| format!("reading identity: {}", path.display()))?,
    );
    RecipientIdentity::from_base64(&contents)
        .with_context(|| format!("parsing identity: {}", path.display()))
}

/// Where a recipient's public key comes from on the command line.
#[derive(Debug, PartialEq, Eq)]
enum RecipientArg {
    Key(String),
    Directory(String),
}

/// Parse `role=<base64>` or `role=@<ref>`.
fn parse_recipient(arg: &str) -> Result<(String, RecipientArg)> {
    let (role, value) = arg
        .split_once('=')
        .with_context(|| format!("recipient '{arg}' must look like role=<key> or role=@<ref>"))?;
    let role = role.trim();
    let value = value.trim();
    if role.is_empty() || value.is_empty() {
        anyhow::bail!("recipient '{arg}' has an empty role or key");
    }
    let arg = match value.strip_prefix('@') {
        Some(reference) => RecipientArg::Directory(reference.to_string()),
        None => RecipientArg::Key(value.to_string()),
    };
    Ok((role.to_string(), arg))
}

async fn resolve_recipients(
    config: &CarechainConfig,
    args: &[String],
) -> Result<BTreeMap<String, RecipientKey>> {
    let parsed = args
        .iter()
        .map(|a| parse_recipient(a))
        .collect::<Result<Vec<_>>>()?;

    let needs_directory = parsed
        .iter()
        .any(|(_, arg)| matches!(arg, RecipientArg::Directory(_)));
    let directory = if needs_directory {
        Some(RecipientDirectory::from_config(config)?)
    } else {
        None
    };

    let mut recipients = BTreeMap::new();
    for (role, arg) in parsed {
        let key = match (arg, &directory) {
            (RecipientArg::Directory(reference), Some(dir)) => dir
                .resolve(&reference)
                .await
                .with_context(|| format!("resolving recipient '{role}'"))?,
            (RecipientArg::Key(b64), _) | (RecipientArg::Directory(b64), None) => {
                RecipientKey::from_base64(&b64)
                    .with_context(|| format!("recipient '{role}' public key"))?
            }
        };
        if recipients.insert(role.clone(), key).is_some() {
            anyhow::bail!("recipient role '{role}' given twice");
        }
    }
    Ok(recipients)
}

// ── `carechain keygen` / `pubkey` ─────────────────────────────────────────────

fn cmd_keygen(out: &Path, force: bool) -> Result<()> {
    let out = expand_tilde(out);
    if out.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            out.display()
        );
    }
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let identity = RecipientIdentity::generate();
    let encoded = Zeroizing::new(identity.to_base64());
    write_private(&out, encoded.as_bytes())
        .with_context(|| format!("writing identity: {}", out.display()))?;

    tracing::info!(path = %out.display(), "identity written");
    println!("{}", identity.public_key().to_base64());
    Ok(())
}

fn cmd_pubkey(identity: &Path) -> Result<()> {
    println!("{}", read_identity(identity)?.public_key().to_base64());
    Ok(())
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

// ── `carechain encrypt` ───────────────────────────────────────────────────────

/// Records stream from disk to disk through a staging directory, so no step
/// holds a whole record in memory.
fn staging_dir() -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("carechain-")
        .tempdir()
        .context("creating staging directory")
}

async fn cmd_encrypt(
    config: &CarechainConfig,
    file: &Path,
    recipient_args: &[String],
    aad: Option<String>,
    content_type: Option<String>,
) -> Result<RecordPointer> {
    let recipients = resolve_recipients(config, recipient_args).await?;
    let mut plaintext = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;

    let kms = carechain_kms::from_config(&config.kms).context("configuring key service")?;
    let pipeline = EnvelopePipeline::from_config(&config.pipeline)?;
    let store = open_store(config)?;

    let staging = staging_dir()?;
    let sealed_path = staging.path().join("record.enc");
    let mut sealed = tokio::fs::File::create(&sealed_path)
        .await
        .context("creating staged ciphertext")?;

    let request = EncryptRequest {
        aad,
        content_type,
        recipients,
    };
    let descriptor = pipeline
        .encrypt_stream(&mut plaintext, &mut sealed, request, kms.as_ref())
        .await
        .with_context(|| format!("encrypting {}", file.display()))?;
    drop(sealed);

    let pointer = carechain_storage::publish_record_file(&store, &sealed_path, &descriptor)
        .await
        .context("publishing record")?;

    tracing::info!(
        enc_url = %gateway_url(&config.storage.gateway_url, &pointer.cid_enc),
        meta_url = %gateway_url(&config.storage.gateway_url, &pointer.meta_cid),
        "record available"
    );
    println!("{}", serde_json::to_string_pretty(&pointer)?);
    Ok(pointer)
}

// ── `carechain decrypt` ───────────────────────────────────────────────────────

async fn cmd_decrypt(
    config: &CarechainConfig,
    enc: &str,
    meta: &str,
    role: &str,
    identity: &Path,
    out: &Path,
) -> Result<()> {
    let identity = read_identity(identity)?;
    let store = open_store(config)?;
    let staging = staging_dir()?;
    let sealed_path = staging.path().join("record.enc");
    let descriptor = carechain_storage::fetch_record_to_file(
        &store,
        &ContentAddress::from(enc),
        &ContentAddress::from(meta),
        &sealed_path,
    )
    .await
    .context("fetching record")?;

    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let kms = carechain_kms::from_config(&config.kms).context("configuring key service")?;
    let pipeline = EnvelopePipeline::from_config(&config.pipeline)?;
    let mut sealed = tokio::fs::File::open(&sealed_path)
        .await
        .context("opening staged ciphertext")?;
    let len = pipeline
        .decrypt_to_file_for(
            &mut sealed,
            &descriptor,
            &identity.secret(),
            role,
            kms.as_ref(),
            out,
        )
        .await
        .map_err(|e| {
            let class = e.class();
            anyhow::Error::new(e).context(format!("decrypting record ({class:?})"))
        })?;

    println!(
        "decrypted {} bytes ({}) -> {}",
        len,
        descriptor.original_content_type,
        out.display()
    );
    Ok(())
}

// ── `carechain verify` ────────────────────────────────────────────────────────

async fn cmd_verify(config: &CarechainConfig, enc: &str, meta: &str) -> Result<CipherHash> {
    let store = open_store(config)?;
    let staging = staging_dir()?;
    let sealed_path = staging.path().join("record.enc");
    let descriptor = carechain_storage::fetch_record_to_file(
        &store,
        &ContentAddress::from(enc),
        &ContentAddress::from(meta),
        &sealed_path,
    )
    .await
    .context("fetching record")?;

    let pipeline = EnvelopePipeline::from_config(&config.pipeline)?;
    let mut sealed = tokio::fs::File::open(&sealed_path)
        .await
        .context("opening staged ciphertext")?;
    let (hash, size) = pipeline
        .verify_cipher_hash_stream(&mut sealed, &descriptor)
        .await?;

    println!("ok");
    println!("  cipher_hash:  {}", hash.to_hex());
    println!("  size:         {size} bytes");
    println!("  chunk_size:   {}", descriptor.chunk_size);
    println!("  kms_key_ref:  {}", descriptor.kms_key_ref);
    println!(
        "  recipients:   {}",
        descriptor.roles().collect::<Vec<_>>().join(", ")
    );
    println!("  content_type: {}", descriptor.original_content_type);
    Ok(hash)
}

// ── `carechain status` ────────────────────────────────────────────────────────

async fn cmd_status(config: &CarechainConfig) -> Result<()> {
    let store = open_store(config)?;
    let storage = match carechain_storage::check_health(store.operator()).await {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("unreachable ({e})"),
    };
    let kms = match carechain_kms::from_config(&config.kms) {
        Ok(kms) => kms.key_ref().to_string(),
        Err(e) => format!("not configured ({e})"),
    };

    println!("storage:  {:?} {}", config.storage.backend, storage);
    println!("kms:      {kms}");
    println!("gateway:  {}", config.storage.gateway_url);
    Ok(())
}

// ── `carechain config show` ───────────────────────────────────────────────────

fn cmd_config_show(config: &CarechainConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

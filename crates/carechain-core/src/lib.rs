//! carechain-core: types shared by every carechain crate
//!
//! - `error`: the error taxonomy callers branch on (input, tamper, key access, storage, metadata)
//! - `config`: `carechain.toml` schema
//! - `types`: record pointers and content addresses
//! - `grant`: the authorization ledger contract checked before any decrypt

pub mod config;
pub mod error;
pub mod grant;
pub mod types;

pub use error::{CarechainError, CarechainResult, ErrorClass, KmsError, StorageError};
pub use types::{ContentAddress, RecordPointer};

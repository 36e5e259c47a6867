//! Authorization ledger contract
//!
//! The ledger itself (grant creation, revocation, consensus) lives outside this
//! workspace. Callers look a grant up and run [`require_grant`] before invoking
//! any decrypt; the envelope pipeline performs no authorization of its own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

/// Access scope bit set carried by a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(u8);

impl Scope {
    pub const READ: Scope = Scope(1);
    pub const WRITE: Scope = Scope(2);
    pub const ADMIN: Scope = Scope(4);
    const ALL_BITS: u8 = 1 | 2 | 4;

    /// Rejects zero and any bit outside READ/WRITE/ADMIN.
    pub fn from_bits(bits: u8) -> Option<Scope> {
        if bits == 0 || bits & !Self::ALL_BITS != 0 {
            None
        } else {
            Some(Scope(bits))
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Scope) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Scope) -> Scope {
        Scope(self.0 | other.0)
    }
}

/// A grant as recorded by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Record owner (patient) identity
    pub patient: String,
    /// Party the grant was issued to
    pub grantee: String,
    pub scope: Scope,
    /// Unix seconds; `None` never expires
    pub expires_at: Option<i64>,
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessDenied {
    #[error("no grant from {patient} to {grantee}")]
    NoGrant { patient: String, grantee: String },

    #[error("grant is revoked")]
    Revoked,

    #[error("grant expired at {expires_at}")]
    Expired { expires_at: i64 },

    #[error("grant does not bind this patient/grantee pair")]
    Mismatch,

    #[error("grant scope {held:#05b} lacks required {required:#05b}")]
    InsufficientScope { held: u8, required: u8 },
}

impl Grant {
    /// Check that this grant lets `grantee` act on `patient`'s records with `required` scope at `now`.
    pub fn authorizes(
        &self,
        patient: &str,
        grantee: &str,
        required: Scope,
        now: i64,
    ) -> Result<(), AccessDenied> {
        if self.revoked {
            return Err(AccessDenied::Revoked);
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at <= now {
                return Err(AccessDenied::Expired { expires_at });
            }
        }
        if self.patient != patient || self.grantee != grantee {
            return Err(AccessDenied::Mismatch);
        }
        if !self.scope.contains(required) {
            return Err(AccessDenied::InsufficientScope {
                held: self.scope.bits(),
                required: required.bits(),
            });
        }
        Ok(())
    }
}

/// Read side of the external authorization ledger.
#[async_trait]
pub trait AuthorizationLedger: Send + Sync {
    async fn find_grant(&self, patient: &str, grantee: &str) -> anyhow::Result<Option<Grant>>;
}

/// Look up and check the grant binding (patient, grantee, scope).
///
/// Ledger lookup failures surface as `Err(anyhow)`; a missing or unusable
/// grant surfaces as `Ok(Err(AccessDenied))` so callers can tell the two apart.
pub async fn require_grant(
    ledger: &dyn AuthorizationLedger,
    patient: &str,
    grantee: &str,
    required: Scope,
    now: i64,
) -> anyhow::Result<Result<Grant, AccessDenied>> {
    let Some(grant) = ledger.find_grant(patient, grantee).await? else {
        tracing::debug!(patient, grantee, "no grant on ledger");
        return Ok(Err(AccessDenied::NoGrant {
            patient: patient.to_string(),
            grantee: grantee.to_string(),
        }));
    };

    match grant.authorizes(patient, grantee, required, now) {
        Ok(()) => Ok(Ok(grant)),
        Err(denied) => {
            tracing::debug!(patient, grantee, %denied, "grant check failed");
            Ok(Err(denied))
        }
    }
}

/// In-process ledger keyed by (patient, grantee).
#[derive(Debug, Default)]
pub struct MemoryLedger {
    grants: RwLock<HashMap<(String, String), Grant>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the grant for its (patient, grantee) pair.
    pub fn record(&self, grant: Grant) {
        let key = (grant.patient.clone(), grant.grantee.clone());
        self.grants
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, grant);
    }

    /// Mark a grant revoked. Returns false if none exists.
    pub fn revoke(&self, patient: &str, grantee: &str) -> bool {
        let mut grants = self
            .grants
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match grants.get_mut(&(patient.to_string(), grantee.to_string())) {
            Some(grant) => {
                grant.revoked = true;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl AuthorizationLedger for MemoryLedger {
    async fn find_grant(&self, patient: &str, grantee: &str) -> anyhow::Result<Option<Grant>> {
        let grants = self
            .grants
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(grants
            .get(&(patient.to_string(), grantee.to_string()))
            .cloned())
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Stable integer identity of a credential within the pool. Survives across
/// refreshes; only destroyed on reload.
pub type Slot = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthKind {
    Social,
    Idc,
}

/// Immutable, config-sourced credential identity (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialDescriptor {
    pub slot_index: Slot,
    pub auth_kind: AuthKind,
    pub refresh_secret: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub disabled: bool,
}

impl CredentialDescriptor {
    /// `client_id`/`client_secret` are required iff `auth_kind == Idc`.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.auth_kind == AuthKind::Idc
            && (self.client_id.is_none() || self.client_secret.is_none())
        {
            return Err("idc credential missing client_id/client_secret");
        }
        Ok(())
    }
}

/// Produced by a successful refresh (spec §3 `AccessCredential`). `Clone`
/// because the refresh coordinator fans one result out to every follower.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessCredential {
    pub access_secret: String,
    pub refresh_secret: String,
    /// Absolute unix-epoch seconds at which the credential expires.
    pub expires_at: i64,
    pub profile_identifier: Option<String>,
    pub auth_kind: AuthKind,
}

impl AccessCredential {
    pub fn is_live(&self, now: i64) -> bool {
        self.expires_at > now
    }

    /// `now >= expires_at - safety_margin` implies the cache should treat
    /// this as absent (spec §4.5 / §8 boundary).
    pub fn is_near_expiry(&self, now: i64, safety_margin: Duration) -> bool {
        now >= self.expires_at - safety_margin.as_secs() as i64
    }
}

/// Optional usage annotation attached to a slot by `UsageProbe` (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct UsageSnapshot {
    pub available_budget: f64,
    pub checked_at: i64,
    pub user_email: Option<String>,
    pub subscription_type: Option<String>,
    /// Set when the probe failed and the caller substituted a conservative
    /// unknown-but-probably-positive placeholder (spec §4.2).
    pub budget_unknown: bool,
}

impl UsageSnapshot {
    pub fn usable(&self, not_expired: bool) -> bool {
        not_expired && (self.available_budget > 0.0 || self.budget_unknown)
    }
}

/// Per-credential runtime state tracked by the pool (spec §3 `PoolSlot`).
#[derive(Debug, Clone)]
pub struct PoolSlot {
    pub descriptor: CredentialDescriptor,
    pub failure_count: u32,
    pub cursor_position: usize,
}

impl PoolSlot {
    pub fn new(descriptor: CredentialDescriptor) -> Self {
        Self {
            descriptor,
            failure_count: 0,
            cursor_position: 0,
        }
    }

    /// `failure_count == max_retries` makes the slot dead and it is skipped
    /// by both cursors until a successful refresh resets it.
    pub fn is_dead(&self, max_retries: u32) -> bool {
        self.descriptor.disabled || self.failure_count >= max_retries
    }
}

//! Time-limited access tokens for individual blobs.
//!
//! Every URL handed to a client carries a token that expires (7 days by
//! default). Rows store the token with its expiry, and readers call
//! [`refresh_if_needed`] before building a URL: the stored token is reused
//! while it is comfortably valid and reissued otherwise. The caller persists
//! the new token when `refreshed` is true.

use super::{BlobStore, StorageError};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Permissions carried by a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SasPermissions {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

impl SasPermissions {
    pub const READ: Self = Self {
        read: true,
        write: false,
        delete: false,
    };

    pub const WRITE: Self = Self {
        read: false,
        write: true,
        delete: false,
    };

    pub const DELETE: Self = Self {
        read: false,
        write: false,
        delete: true,
    };

    /// Canonical `sp` string (`r`, `w`, `d` in that order).
    pub fn as_sp(&self) -> String {
        let mut sp = String::with_capacity(3);
        if self.read {
            sp.push('r');
        }
        if self.write {
            sp.push('w');
        }
        if self.delete {
            sp.push('d');
        }
        sp
    }

    pub fn from_sp(sp: &str) -> Self {
        Self {
            read: sp.contains('r'),
            write: sp.contains('w'),
            delete: sp.contains('d'),
        }
    }
}

/// A signed query string plus the instant it stops working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SasToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl SasToken {
    /// Still usable for at least `margin` from `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin < self.expires_at
    }

    /// `blob_url?token`.
    pub fn url(&self, store: &dyn BlobStore, name: &str) -> String {
        format!("{}?{}", store.blob_url(name), self.token)
    }
}

/// Token lifetime rules, derived from [`crate::ServiceConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SasPolicy {
    pub ttl: Duration,
    pub refresh_margin: Duration,
}

impl SasPolicy {
    pub fn new(ttl_secs: u64, refresh_margin_secs: u64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs as i64),
            refresh_margin: Duration::seconds(refresh_margin_secs as i64),
        }
    }
}

impl From<&crate::config::ServiceConfig> for SasPolicy {
    fn from(c: &crate::config::ServiceConfig) -> Self {
        Self::new(c.sas_ttl_secs, c.sas_refresh_margin_secs)
    }
}

/// Issue a read token for `name` valid for `policy.ttl` from `now`.
pub fn issue(
    store: &dyn BlobStore,
    name: &str,
    policy: &SasPolicy,
    content_disposition: Option<&str>,
    now: DateTime<Utc>,
) -> Result<SasToken, StorageError> {
    let expires_at = (now + policy.ttl).trunc_subsecs(0);
    let token = store.sign(name, SasPermissions::READ, expires_at, content_disposition)?;
    Ok(SasToken { token, expires_at })
}

/// Result of [`refresh_if_needed`].
#[derive(Debug, Clone)]
pub struct Refreshed {
    pub token: SasToken,
    /// True when a new token was issued and should be persisted.
    pub refreshed: bool,
}

/// Reuse `current` while it is fresh; otherwise issue a new token.
pub fn refresh_if_needed(
    store: &dyn BlobStore,
    name: &str,
    current: Option<&SasToken>,
    policy: &SasPolicy,
    content_disposition: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Refreshed, StorageError> {
    match current {
        Some(t) if !t.token.is_empty() && t.is_fresh(now, policy.refresh_margin) => Ok(Refreshed {
            token: t.clone(),
            refreshed: false,
        }),
        _ => Ok(Refreshed {
            token: issue(store, name, policy, content_disposition, now)?,
            refreshed: true,
        }),
    }
}

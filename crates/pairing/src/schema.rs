//! Persisted state document for the pairing engine.
//!
//! The whole engine state lives in a single JSON file:
//!
//! ```json
//! {
//!   "version": 1,
//!   "pairing": {
//!     "version": 1,
//!     "channels": {
//!       "feishu": {
//!         "requests": [{ "id": "...", "code": "...", ... }],
//!         "allowFrom": ["alice"],
//!         "accountAllowFrom": { "bot-a": ["bob"] }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Unknown or malformed shapes deserialize to the empty default rather than
//! erroring, so a damaged file degrades to "nobody is paired yet".

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use {
    chrono::{DateTime, SecondsFormat, Utc},
    serde::{Deserialize, Serialize},
};

use crate::error::{Error, Result};

pub const STATE_VERSION: u32 = 1;

/// Meta key under which a request records its account scope.
pub const META_ACCOUNT_ID: &str = "accountId";

fn state_version() -> u32 {
    STATE_VERSION
}

// ── Document types ──────────────────────────────────────────────────────────

/// Root of the persisted state document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayState {
    #[serde(default = "state_version")]
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing: Option<PairingSection>,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            pairing: None,
        }
    }
}

impl GatewayState {
    /// Channel scope for reading; `None` when the channel has no state yet.
    pub fn channel(&self, key: &str) -> Option<&ChannelScope> {
        self.pairing.as_ref()?.channels.get(key)
    }

    /// Channel scope for mutation, created on first use.
    pub fn channel_mut(&mut self, key: &str) -> &mut ChannelScope {
        self.pairing
            .get_or_insert_with(PairingSection::default)
            .channels
            .entry(key.to_string())
            .or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PairingSection {
    #[serde(default = "state_version")]
    pub version: u32,
    pub channels: BTreeMap<String, ChannelScope>,
}

impl Default for PairingSection {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            channels: BTreeMap::new(),
        }
    }
}

/// Per-channel pairing state: pending requests plus the permanent
/// allow-from sets (channel-global and per-account overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelScope {
    pub requests: Vec<PairingRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allow_from: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub account_allow_from: BTreeMap<String, Vec<String>>,
}

impl ChannelScope {
    /// Merged allow-from view. With an account scope this is the union of
    /// the account overlay and the channel-global set; scoped membership is
    /// additive, not exclusive.
    pub fn allow_list(&self, account_scope: Option<&str>) -> Vec<String> {
        let mut merged: BTreeSet<String> =
            self.allow_from.iter().filter_map(|e| normalize_entry(e)).collect();
        if let Some(account) = account_scope {
            if let Some(scoped) = self.account_allow_from.get(account) {
                merged.extend(scoped.iter().filter_map(|e| normalize_entry(e)));
            }
        }
        merged.into_iter().collect()
    }

    /// Idempotent, case-insensitive add. Returns `true` if the set changed.
    pub fn insert_allow(&mut self, account_scope: Option<&str>, sender: &str) -> bool {
        let Some(entry) = normalize_entry(sender) else {
            return false;
        };
        let list = match account_scope {
            Some(account) => self.account_allow_from.entry(account.to_string()).or_default(),
            None => &mut self.allow_from,
        };
        if list.iter().any(|e| normalize_entry(e).as_deref() == Some(entry.as_str())) {
            return false;
        }
        list.push(entry);
        true
    }

    /// Remove an entry from the targeted set. Returns `true` if present.
    pub fn remove_allow(&mut self, account_scope: Option<&str>, sender: &str) -> bool {
        let Some(entry) = normalize_entry(sender) else {
            return false;
        };
        let list = match account_scope {
            Some(account) => match self.account_allow_from.get_mut(account) {
                Some(list) => list,
                None => return false,
            },
            None => &mut self.allow_from,
        };
        let before = list.len();
        list.retain(|e| normalize_entry(e).as_deref() != Some(entry.as_str()));
        let changed = list.len() != before;
        if changed {
            if let Some(account) = account_scope {
                if self.account_allow_from.get(account).is_some_and(Vec::is_empty) {
                    self.account_allow_from.remove(account);
                }
            }
        }
        changed
    }
}

/// A pending, unapproved sender awaiting administrator approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingRequest {
    pub id: String,
    pub code: String,
    pub created_at: String,
    pub last_seen_at: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl PairingRequest {
    /// Account scope recorded at creation time, if any.
    pub fn account_scope(&self) -> Option<&str> {
        self.meta.get(META_ACCOUNT_ID).map(String::as_str)
    }

    /// Age is measured against `created_at`; refreshes bump `last_seen_at`
    /// only, so an ignored request always dies `ttl` after first contact.
    /// Entries with an unparseable timestamp count as expired.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match DateTime::parse_from_rfc3339(&self.created_at) {
            Ok(created) => {
                let age = now.signed_duration_since(created.with_timezone(&Utc));
                age.num_milliseconds() > ttl.as_millis() as i64
            },
            Err(_) => true,
        }
    }
}

// ── Limits ──────────────────────────────────────────────────────────────────

pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_PENDING: usize = 3;

/// Admission-control knobs for the pending-request ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingLimits {
    pub ttl: Duration,
    pub max_pending: usize,
}

impl Default for PendingLimits {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_PENDING_TTL,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

impl PendingLimits {
    #[must_use]
    pub fn new(ttl_ms: u64, max_pending: usize) -> Self {
        Self {
            ttl: Duration::from_millis(ttl_ms),
            max_pending,
        }
    }
}

// ── Keys, identities, timestamps ────────────────────────────────────────────

/// Sanitize a caller-supplied channel name into a scope key: lowercased,
/// trimmed, everything outside `[a-z0-9._-]` mapped to `-`.
pub fn channel_key(channel: &str) -> Result<String> {
    let trimmed = channel.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err(Error::invalid_channel(channel));
    }
    let key: String = trimmed
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '-',
        })
        .collect();
    if !key.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::invalid_channel(channel));
    }
    Ok(key)
}

/// Normalize a sender identity: trimmed + lowercased, never empty.
pub fn normalize_sender(sender: &str) -> Result<String> {
    normalize_entry(sender).ok_or_else(|| Error::invalid_sender(sender))
}

/// Trim + lowercase; `None` for entries that collapse to nothing.
pub(crate) fn normalize_entry(entry: &str) -> Option<String> {
    let normalized = entry.trim().to_lowercase();
    if normalized.is_empty() { None } else { Some(normalized) }
}

/// Current time as an RFC 3339 timestamp with millisecond precision.
pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Drop expired requests in place.
pub(crate) fn prune_expired(requests: &mut Vec<PairingRequest>, now: DateTime<Utc>, ttl: Duration) {
    requests.retain(|r| !r.is_expired(now, ttl));
}

/// Stale-data safety net: when the stored set somehow exceeds
/// `max_pending`, keep only the most recently seen entries. This is never
/// the admission path; `upsert` refuses new senders instead of evicting.
/// Ties on `last_seen_at` keep stored order (stable sort).
pub(crate) fn trim_overflow(requests: &mut Vec<PairingRequest>, max_pending: usize) {
    if requests.len() <= max_pending {
        return;
    }
    requests.sort_by(|a, b| a.last_seen_at.cmp(&b.last_seen_at));
    let excess = requests.len() - max_pending;
    requests.drain(..excess);
}

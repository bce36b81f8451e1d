//! Pending pairing-request ledger.
//!
//! One entry per unpaired sender within a `(channel, accountScope)` pair.
//! Entries expire `ttl` after creation, and admission is hard-capped: once
//! `max_pending` requests are queued, new senders are refused outright. An
//! existing pending sender is never evicted to admit a new one, so a flood
//! of unknown senders cannot starve legitimate requests that are already
//! waiting for approval.

use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use {chrono::Utc, tracing::info};

use crate::{
    code::unique_code,
    error::Result,
    schema::{
        GatewayState, META_ACCOUNT_ID, PairingRequest, PendingLimits, channel_key, normalize_sender,
        now_iso, prune_expired, trim_overflow,
    },
    store::StateStore,
};

/// Outcome of [`PairingLedger::upsert`]. An empty `code` with
/// `created: false` signals a full queue (capacity sentinel, not an error).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub code: String,
    pub created: bool,
}

/// Durable ledger of pending pairing requests, backed by one state file.
#[derive(Debug, Clone)]
pub struct PairingLedger {
    store: Arc<StateStore>,
    path: PathBuf,
}

impl PairingLedger {
    #[must_use]
    pub fn new(store: Arc<StateStore>, path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            path: path.into(),
        }
    }

    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.path
    }

    /// Record contact from an unpaired sender.
    ///
    /// A sender already pending under the same account scope is refreshed:
    /// `lastSeenAt` bumped, `meta` merged, and the original code returned
    /// unchanged, so repeated messages always surface the same code. A new
    /// sender is admitted only below `max_pending`; at capacity the outcome
    /// carries an empty code and nothing is evicted.
    pub async fn upsert(
        &self,
        channel: &str,
        sender_id: &str,
        account_scope: Option<&str>,
        meta: BTreeMap<String, String>,
        limits: PendingLimits,
    ) -> Result<UpsertOutcome> {
        let key = channel_key(channel)?;
        let sender = normalize_sender(sender_id)?;
        let account_scope = clean_scope(account_scope);

        let mut meta = meta;
        if let Some(account) = account_scope {
            meta.insert(META_ACCOUNT_ID.to_string(), account.to_string());
        }

        self.store
            .update::<GatewayState, _, _>(&self.path, |state| {
                let now = Utc::now();
                let scope = state.channel_mut(&key);
                prune_expired(&mut scope.requests, now, limits.ttl);

                if let Some(existing) = scope
                    .requests
                    .iter_mut()
                    .find(|r| r.id == sender && r.account_scope() == account_scope)
                {
                    existing.last_seen_at = now_iso();
                    existing.meta.extend(meta);
                    return Ok(UpsertOutcome {
                        code: existing.code.clone(),
                        created: false,
                    });
                }

                // Stale overflow is trimmed, but never to make room: a queue
                // at capacity refuses the newcomer.
                trim_overflow(&mut scope.requests, limits.max_pending);
                if scope.requests.len() >= limits.max_pending {
                    return Ok(UpsertOutcome {
                        code: String::new(),
                        created: false,
                    });
                }

                let active: HashSet<String> =
                    scope.requests.iter().map(|r| r.code.to_uppercase()).collect();
                let code = unique_code(&active)?;
                let stamp = now_iso();
                scope.requests.push(PairingRequest {
                    id: sender.clone(),
                    code: code.clone(),
                    created_at: stamp.clone(),
                    last_seen_at: stamp,
                    meta,
                });
                Ok(UpsertOutcome {
                    code,
                    created: true,
                })
            })
            .await?
    }

    /// Pending requests for a channel, oldest first.
    ///
    /// Pruning and overflow trimming happen as a side effect, so a stale or
    /// oversized stored set heals on read.
    pub async fn list(
        &self,
        channel: &str,
        account_scope: Option<&str>,
        limits: PendingLimits,
    ) -> Result<Vec<PairingRequest>> {
        let key = channel_key(channel)?;
        let account_scope = clean_scope(account_scope);

        self.store
            .update::<GatewayState, _, _>(&self.path, |state| {
                let scope = state.channel_mut(&key);
                prune_expired(&mut scope.requests, Utc::now(), limits.ttl);
                trim_overflow(&mut scope.requests, limits.max_pending);

                let mut pending: Vec<PairingRequest> = scope
                    .requests
                    .iter()
                    .filter(|r| account_scope.is_none() || r.account_scope() == account_scope)
                    .cloned()
                    .collect();
                pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                pending
            })
            .await
    }

    /// Redeem a pairing code.
    ///
    /// Case-insensitive match within the channel (and account scope when
    /// given). On match the entry leaves the ledger and its sender is
    /// promoted into the allow-from set (under the supplied scope, else
    /// the scope recorded in the entry's meta, else channel-global) in the
    /// same atomic update. `None` when no active entry matches, including
    /// codes that expired before this call.
    pub async fn approve(
        &self,
        channel: &str,
        code: &str,
        account_scope: Option<&str>,
        limits: PendingLimits,
    ) -> Result<Option<PairingRequest>> {
        let key = channel_key(channel)?;
        let account_scope = clean_scope(account_scope);
        let code = code.trim();
        if code.is_empty() {
            return Ok(None);
        }

        let approved = self
            .store
            .update::<GatewayState, _, _>(&self.path, |state| {
                let scope = state.channel_mut(&key);
                prune_expired(&mut scope.requests, Utc::now(), limits.ttl);
                trim_overflow(&mut scope.requests, limits.max_pending);

                let position = scope.requests.iter().position(|r| {
                    r.code.eq_ignore_ascii_case(code)
                        && (account_scope.is_none() || r.account_scope() == account_scope)
                })?;
                let entry = scope.requests.remove(position);
                let target = account_scope
                    .map(str::to_string)
                    .or_else(|| entry.account_scope().map(str::to_string));
                scope.insert_allow(target.as_deref(), &entry.id);
                Some(entry)
            })
            .await?;

        if let Some(entry) = &approved {
            info!(channel = %key, sender = %entry.id, "pairing request approved");
        }
        Ok(approved)
    }
}

fn clean_scope(account_scope: Option<&str>) -> Option<&str> {
    account_scope.map(str::trim).filter(|s| !s.is_empty())
}

//! Durable allow-from registry: permanently approved sender identities.
//!
//! Entries live either in a channel-global set or under an account key in a
//! per-account overlay. There is no TTL; entries persist until explicitly
//! revoked. Everything is stored trimmed + lowercased and deduplicated.

use std::{
    path::PathBuf,
    sync::Arc,
};

use crate::{
    error::Result,
    schema::{GatewayState, channel_key, normalize_sender},
    store::StateStore,
};

#[derive(Debug, Clone)]
pub struct AllowFromRegistry {
    store: Arc<StateStore>,
    path: PathBuf,
}

impl AllowFromRegistry {
    #[must_use]
    pub fn new(store: Arc<StateStore>, path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            path: path.into(),
        }
    }

    /// Idempotently add a sender, channel-global or under an account scope.
    pub async fn add(
        &self,
        channel: &str,
        sender_id: &str,
        account_scope: Option<&str>,
    ) -> Result<()> {
        let key = channel_key(channel)?;
        let sender = normalize_sender(sender_id)?;
        let account = account_scope.map(str::to_string);

        self.store
            .update::<GatewayState, _, _>(&self.path, move |state| {
                state.channel_mut(&key).insert_allow(account.as_deref(), &sender);
            })
            .await
    }

    /// Remove a sender from the targeted set. `Ok(false)` when it was not
    /// present; a miss is a business outcome, not an error.
    pub async fn remove(
        &self,
        channel: &str,
        sender_id: &str,
        account_scope: Option<&str>,
    ) -> Result<bool> {
        let key = channel_key(channel)?;
        let sender = normalize_sender(sender_id)?;
        let account = account_scope.map(str::to_string);

        self.store
            .update::<GatewayState, _, _>(&self.path, move |state| {
                state.channel_mut(&key).remove_allow(account.as_deref(), &sender)
            })
            .await
    }

    /// Approved senders for a channel. With an account scope this is the
    /// union of the account overlay and the channel-global set; without, the
    /// global set alone. Fail-open: absent or damaged state reads as empty.
    pub async fn read(&self, channel: &str, account_scope: Option<&str>) -> Result<Vec<String>> {
        let key = channel_key(channel)?;
        let state: GatewayState = self.store.read(&self.path).await;
        Ok(state
            .channel(&key)
            .map(|scope| scope.allow_list(account_scope))
            .unwrap_or_default())
    }

    /// Membership check against the merged allow-from view.
    pub async fn contains(
        &self,
        channel: &str,
        sender_id: &str,
        account_scope: Option<&str>,
    ) -> Result<bool> {
        let sender = normalize_sender(sender_id)?;
        let entries = self.read(channel, account_scope).await?;
        Ok(entries.iter().any(|e| e == &sender))
    }
}

//! CLI subcommands for pairing administration.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result},
    clap::{Args, Subcommand},
};

use larkgate_pairing::{
    AllowFromRegistry, GatewayState, PairingLedger, PendingLimits, StateStore,
};

#[derive(Subcommand)]
pub enum PairingAction {
    /// List pending pairing requests for a channel.
    List(ScopeArgs),
    /// Approve a pending pairing code and allow its sender permanently.
    Approve {
        /// Pairing code shown to the sender (case-insensitive).
        code: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Revoke a previously approved sender.
    Revoke {
        /// Sender identity to remove from the allow-from list.
        sender_id: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
}

#[derive(Args, Clone)]
pub struct ScopeArgs {
    /// Channel the request belongs to (e.g. feishu, local-queue).
    #[arg(long)]
    channel: String,
    /// Restrict to one connected bot account.
    #[arg(long)]
    account: Option<String>,
    /// Pending-request TTL override, in milliseconds.
    #[arg(long)]
    ttl_ms: Option<u64>,
    /// Maximum simultaneously pending requests per channel scope.
    #[arg(long)]
    max_pending: Option<usize>,
}

impl ScopeArgs {
    fn limits(&self) -> PendingLimits {
        let mut limits = PendingLimits::default();
        if let Some(ttl_ms) = self.ttl_ms {
            limits.ttl = Duration::from_millis(ttl_ms);
        }
        if let Some(max_pending) = self.max_pending {
            limits.max_pending = max_pending;
        }
        limits
    }
}

pub async fn run(action: &PairingAction, state_file: Option<PathBuf>) -> Result<()> {
    let path = match state_file {
        Some(path) => path,
        None => default_state_file()?,
    };
    let store = Arc::new(StateStore::new());
    store
        .ensure_initialized(&path, &GatewayState::default())
        .await
        .with_context(|| format!("initializing state file {}", path.display()))?;

    let ledger = PairingLedger::new(Arc::clone(&store), path.clone());
    let registry = AllowFromRegistry::new(store, path);

    match action {
        PairingAction::List(scope) => {
            let pending = ledger
                .list(&scope.channel, scope.account.as_deref(), scope.limits())
                .await?;
            if pending.is_empty() {
                println!("No pending pairing requests for channel {}.", scope.channel);
                return Ok(());
            }
            println!("{:<24} {:<10} {:<26} {:<26}", "SENDER", "CODE", "CREATED", "LAST SEEN");
            for request in pending {
                println!(
                    "{:<24} {:<10} {:<26} {:<26}",
                    request.id, request.code, request.created_at, request.last_seen_at
                );
            }
        },
        PairingAction::Approve { code, scope } => {
            match ledger
                .approve(&scope.channel, code, scope.account.as_deref(), scope.limits())
                .await?
            {
                Some(entry) => println!(
                    "Approved {} on channel {}; future messages will reach the agent.",
                    entry.id, scope.channel
                ),
                None => println!(
                    "No pending request on channel {} matches code {} (it may have expired).",
                    scope.channel, code
                ),
            }
        },
        PairingAction::Revoke { sender_id, scope } => {
            let changed = registry
                .remove(&scope.channel, sender_id, scope.account.as_deref())
                .await?;
            if changed {
                println!("Revoked {sender_id} on channel {}.", scope.channel);
            } else {
                println!("{sender_id} was not on the allow-from list for channel {}.", scope.channel);
            }
        },
    }
    Ok(())
}

fn default_state_file() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "larkgate")
        .context("could not determine a home directory; pass --state-file")?;
    Ok(dirs.data_dir().join("state.json"))
}

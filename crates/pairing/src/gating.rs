//! Access policy decision engine.
//!
//! Stateless per evaluation: policy + the live stores decide whether one
//! inbound message may reach the agent. Under the `pairing` policy an
//! unknown sender is answered with a self-service pairing code that an
//! administrator redeems out-of-band.

use serde::{Deserialize, Serialize};

use tracing::{debug, warn};

use crate::{
    allow_from::AllowFromRegistry,
    error::Result,
    ledger::PairingLedger,
    schema::{PendingLimits, channel_key, normalize_sender},
};

/// How a channel admits senders.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PairingPolicy {
    /// Anyone may invoke the agent.
    #[default]
    Open,
    /// Only statically configured or previously approved senders.
    Allowlist,
    /// Like `allowlist`, but unknown senders receive a pairing code.
    Pairing,
    /// Channel refuses everyone.
    Disabled,
}

/// One inbound message as the gateway core presents it for evaluation.
#[derive(Debug, Clone)]
pub struct InboundMessage<'a> {
    pub channel: &'a str,
    pub sender_id: &'a str,
    pub account_id: Option<&'a str>,
}

/// Outcome of an access evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    DenySilent,
    /// Denied, with text the transport should send back to the sender.
    DenyWithReply(String),
}

impl Verdict {
    #[must_use]
    pub fn allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    #[must_use]
    pub fn reply(&self) -> Option<&str> {
        match self {
            Self::DenyWithReply(text) => Some(text),
            _ => None,
        }
    }
}

/// Admission control for one channel: policy, the static allow-list from
/// configuration, and the two durable stores.
pub struct AccessGate {
    policy: PairingPolicy,
    static_allow: Vec<String>,
    limits: PendingLimits,
    ledger: PairingLedger,
    registry: AllowFromRegistry,
}

impl AccessGate {
    #[must_use]
    pub fn new(policy: PairingPolicy, ledger: PairingLedger, registry: AllowFromRegistry) -> Self {
        Self {
            policy,
            static_allow: Vec::new(),
            limits: PendingLimits::default(),
            ledger,
            registry,
        }
    }

    /// Statically configured allow-list entries (may contain `*` patterns).
    #[must_use]
    pub fn with_static_allow(mut self, entries: Vec<String>) -> Self {
        self.static_allow = entries;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: PendingLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Decide whether `msg` may invoke the agent.
    ///
    /// Malformed identifiers raise; storage faults while deciding under
    /// `allowlist`/`pairing` fail closed (deny, logged). An I/O fault must
    /// never grant access.
    pub async fn evaluate(&self, msg: &InboundMessage<'_>) -> Result<Verdict> {
        let key = channel_key(msg.channel)?;
        let sender = normalize_sender(msg.sender_id)?;

        let verdict = match self.policy {
            PairingPolicy::Disabled => Verdict::DenySilent,
            PairingPolicy::Open => Verdict::Allow,
            PairingPolicy::Allowlist => {
                if self.is_member(&key, &sender, msg.account_id).await? {
                    Verdict::Allow
                } else {
                    Verdict::DenySilent
                }
            },
            PairingPolicy::Pairing => {
                if self.is_member(&key, &sender, msg.account_id).await? {
                    Verdict::Allow
                } else {
                    self.request_pairing(&key, &sender, msg.account_id).await?
                }
            },
        };

        debug!(
            channel = %key,
            sender = %sender,
            policy = ?self.policy,
            allowed = verdict.allowed(),
            "access evaluated"
        );
        Ok(verdict)
    }

    async fn is_member(&self, channel: &str, sender: &str, account: Option<&str>) -> Result<bool> {
        if matches_allowlist(sender, &self.static_allow) {
            return Ok(true);
        }
        // Registry reads fail open to empty, so an unreadable state file
        // denies unknown senders rather than erroring here.
        let approved = self.registry.read(channel, account).await?;
        Ok(approved.iter().any(|e| e == sender))
    }

    async fn request_pairing(
        &self,
        channel: &str,
        sender: &str,
        account: Option<&str>,
    ) -> Result<Verdict> {
        let outcome = match self
            .ledger
            .upsert(channel, sender, account, Default::default(), self.limits)
            .await
        {
            Ok(outcome) => outcome,
            Err(error) if error.is_validation() => return Err(error),
            Err(error) => {
                warn!(channel = %channel, sender = %sender, %error, "pairing upsert failed, denying");
                return Ok(Verdict::DenySilent);
            },
        };

        if outcome.code.is_empty() {
            return Ok(Verdict::DenyWithReply(queue_full_reply(channel)));
        }
        Ok(Verdict::DenyWithReply(pairing_reply(
            channel,
            sender,
            &outcome.code,
            account,
        )))
    }
}

/// Case-insensitive match of a sender against static allow-list entries.
/// Entries may use `*` as a wildcard for any run of characters. An empty
/// list matches nobody; openness is the policy's decision, not the list's.
pub fn matches_allowlist(sender_id: &str, entries: &[String]) -> bool {
    let sender = sender_id.trim().to_lowercase();
    entries
        .iter()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .any(|pattern| pattern_matches(&pattern, &sender))
}

fn pattern_matches(pattern: &str, text: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == text;
    }
    let mut rest = text;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        let Some(found) = rest.find(segment) else {
            return false;
        };
        // Leading segment must anchor at the start.
        if i == 0 && found != 0 {
            return false;
        }
        rest = &rest[found + segment.len()..];
    }
    // Trailing segment must anchor at the end unless the pattern ends in `*`.
    segments.last().is_some_and(|s| s.is_empty()) || rest.is_empty()
}

fn pairing_reply(channel: &str, sender: &str, code: &str, account: Option<&str>) -> String {
    let approve_command = match account {
        Some(account) => {
            format!("larkgate pairing approve --channel {channel} --account {account} {code}")
        },
        None => format!("larkgate pairing approve --channel {channel} {code}"),
    };
    format!(
        "Pairing required before this agent will respond.\n\
         Channel: {channel}\n\
         Sender: {sender}\n\
         Pairing code: {code}\n\
         Ask an administrator to run: {approve_command}"
    )
}

fn queue_full_reply(channel: &str) -> String {
    format!(
        "Too many pending pairing requests for channel {channel}. \
         Try again after an administrator approves one or a pending request expires."
    )
}

//! Pairing and access control for the Larkgate gateway.
//!
//! Every inbound chat message passes through the [`AccessGate`]: approved
//! senders reach the agent, unknown senders under the `pairing` policy get
//! a time-bounded, capacity-bounded approval code an administrator redeems
//! with `larkgate pairing approve`. State is one JSON document guarded by a
//! per-path write lock, so concurrent traffic never corrupts it.

pub mod allow_from;
pub mod code;
pub mod error;
pub mod gating;
pub mod ledger;
pub mod schema;
pub mod store;

pub use {
    allow_from::AllowFromRegistry,
    error::{Error, Result},
    gating::{AccessGate, InboundMessage, PairingPolicy, Verdict, matches_allowlist},
    ledger::{PairingLedger, UpsertOutcome},
    schema::{GatewayState, PairingRequest, PendingLimits},
    store::StateStore,
};

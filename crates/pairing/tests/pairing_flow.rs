//! End-to-end pairing handshake tests against a real state file.

use std::{collections::BTreeMap, sync::Arc};

use tempfile::TempDir;

use larkgate_pairing::{
    AccessGate, AllowFromRegistry, GatewayState, InboundMessage, PairingLedger, PairingPolicy,
    PendingLimits, StateStore, Verdict,
    schema::PairingRequest,
};

struct Fixture {
    store: Arc<StateStore>,
    ledger: PairingLedger,
    registry: AllowFromRegistry,
    path: std::path::PathBuf,
    _dir: TempDir,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    let store = Arc::new(StateStore::new());
    Fixture {
        ledger: PairingLedger::new(Arc::clone(&store), path.clone()),
        registry: AllowFromRegistry::new(Arc::clone(&store), path.clone()),
        store,
        path,
        _dir: dir,
    }
}

fn limits(max_pending: usize) -> PendingLimits {
    PendingLimits {
        max_pending,
        ..PendingLimits::default()
    }
}

fn meta() -> BTreeMap<String, String> {
    BTreeMap::new()
}

/// The canonical admission walkthrough: fill the queue, refuse an arrival,
/// refresh a queued sender, approve to free capacity, admit the refused one.
#[tokio::test]
async fn admission_scenario_at_capacity_two() {
    let f = fixture();
    let limits = limits(2);

    let a = f.ledger.upsert("feishu", "a", None, meta(), limits).await.unwrap();
    assert!(a.created);
    let b = f.ledger.upsert("feishu", "b", None, meta(), limits).await.unwrap();
    assert!(b.created);
    assert_ne!(a.code, b.code);

    // Queue is full: c is refused and nobody is evicted.
    let c = f.ledger.upsert("feishu", "c", None, meta(), limits).await.unwrap();
    assert_eq!(c.code, "");
    assert!(!c.created);

    // a again: refreshed, same code.
    let a_again = f.ledger.upsert("feishu", "a", None, meta(), limits).await.unwrap();
    assert!(!a_again.created);
    assert_eq!(a_again.code, a.code);

    // Approval removes a and promotes it into allow-from.
    let approved = f.ledger.approve("feishu", &a.code, None, limits).await.unwrap().unwrap();
    assert_eq!(approved.id, "a");
    let ids: Vec<_> = f
        .ledger
        .list("feishu", None, limits)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["b"]);
    assert_eq!(f.registry.read("feishu", None).await.unwrap(), vec!["a"]);

    // Capacity freed: c is admitted now.
    let c = f.ledger.upsert("feishu", "c", None, meta(), limits).await.unwrap();
    assert!(c.created);
    assert!(!c.code.is_empty());
}

#[tokio::test]
async fn concurrent_upserts_yield_distinct_codes() {
    let f = fixture();
    let limits = limits(16);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let ledger = f.ledger.clone();
        tasks.push(tokio::spawn(async move {
            ledger.upsert("feishu", &format!("sender-{i}"), None, BTreeMap::new(), limits).await
        }));
    }

    let mut codes = std::collections::HashSet::new();
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        assert!(outcome.created);
        assert!(codes.insert(outcome.code));
    }
    assert_eq!(codes.len(), 16);
    assert_eq!(f.ledger.list("feishu", None, limits).await.unwrap().len(), 16);
}

#[tokio::test]
async fn expired_entries_vanish_from_list() {
    let f = fixture();

    // Plant an entry created two hours ago directly in the state file.
    let mut state = GatewayState::default();
    let past = (chrono::Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
    state.channel_mut("feishu").requests.push(PairingRequest {
        id: "oldtimer".into(),
        code: "AAAA2222".into(),
        created_at: past.clone(),
        last_seen_at: past,
        meta: BTreeMap::new(),
    });
    std::fs::write(&f.path, serde_json::to_vec_pretty(&state).unwrap()).unwrap();

    let pending = f.ledger.list("feishu", None, PendingLimits::default()).await.unwrap();
    assert!(pending.is_empty());

    // The expired code is gone for good: approval misses too.
    assert!(
        f.ledger
            .approve("feishu", "AAAA2222", None, PendingLimits::default())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn expired_sender_gets_a_fresh_code_on_return() {
    let f = fixture();

    let mut state = GatewayState::default();
    let past = (chrono::Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
    state.channel_mut("feishu").requests.push(PairingRequest {
        id: "alice".into(),
        code: "AAAA2222".into(),
        created_at: past.clone(),
        last_seen_at: past,
        meta: BTreeMap::new(),
    });
    std::fs::write(&f.path, serde_json::to_vec_pretty(&state).unwrap()).unwrap();

    let outcome = f
        .ledger
        .upsert("feishu", "alice", None, meta(), PendingLimits::default())
        .await
        .unwrap();
    assert!(outcome.created);
    assert_ne!(outcome.code, "AAAA2222");
}

#[tokio::test]
async fn approval_promotes_sender_through_the_gate() {
    let f = fixture();
    let gate = AccessGate::new(
        PairingPolicy::Pairing,
        f.ledger.clone(),
        f.registry.clone(),
    );
    let alice = InboundMessage {
        channel: "feishu",
        sender_id: "alice",
        account_id: None,
    };

    let verdict = gate.evaluate(&alice).await.unwrap();
    assert!(!verdict.allowed());
    let code = f.ledger.list("feishu", None, PendingLimits::default()).await.unwrap()[0]
        .code
        .clone();

    f.ledger
        .approve("feishu", &code, None, PendingLimits::default())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(gate.evaluate(&alice).await.unwrap(), Verdict::Allow);
}

#[tokio::test]
async fn channels_are_isolated_scopes() {
    let f = fixture();
    let limits = limits(1);

    let feishu = f.ledger.upsert("feishu", "alice", None, meta(), limits).await.unwrap();
    // Same sender on another channel queues independently even at cap 1.
    let queue = f.ledger.upsert("local-queue", "alice", None, meta(), limits).await.unwrap();
    assert!(feishu.created && queue.created);

    f.ledger.approve("feishu", &feishu.code, None, limits).await.unwrap().unwrap();
    assert!(f.registry.read("local-queue", None).await.unwrap().is_empty());
    assert_eq!(f.registry.read("feishu", None).await.unwrap(), vec!["alice"]);
}

#[tokio::test]
async fn persisted_document_uses_the_published_shape() {
    let f = fixture();
    let outcome = f
        .ledger
        .upsert("feishu", "alice", Some("bot-a"), meta(), PendingLimits::default())
        .await
        .unwrap();
    f.ledger
        .approve("feishu", &outcome.code, Some("bot-a"), PendingLimits::default())
        .await
        .unwrap()
        .unwrap();

    let raw = std::fs::read_to_string(&f.path).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["version"], 1);
    assert_eq!(doc["pairing"]["version"], 1);
    assert_eq!(
        doc["pairing"]["channels"]["feishu"]["accountAllowFrom"]["bot-a"][0],
        "alice"
    );

    // A fresh store sees the same state (read path round-trips the write).
    let reread: GatewayState = f.store.read(&f.path).await;
    assert_eq!(reread.channel("feishu").unwrap().allow_list(Some("bot-a")), vec!["alice"]);
}

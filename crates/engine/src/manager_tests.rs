// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::{TimeDelta, TimeZone, Utc};
use std::time::Duration;
use viracochan_core::FakeClock;
use viracochan_storage::MemoryStorage;

fn fixture() -> (Manager<FakeClock>, FakeClock, Arc<MemoryStorage>) {
    let clock = FakeClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    let storage = Arc::new(MemoryStorage::new());
    let manager =
        Manager::new(Arc::clone(&storage) as Arc<dyn Storage>).with_clock(clock.clone());
    (manager, clock, storage)
}

async fn build_versions(manager: &Manager<FakeClock>, clock: &FakeClock, id: &str, n: u64) {
    for i in 1..=n {
        let content = serde_json::json!({"version": i});
        if i == 1 {
            manager.create(id, &content).await.unwrap();
        } else {
            clock.advance(TimeDelta::seconds(1));
            manager.update(id, &content).await.unwrap();
        }
    }
}

#[tokio::test]
async fn create_starts_at_version_one() {
    let (manager, _, _) = fixture();

    let cfg = manager
        .create("test-config", &serde_json::json!({"setting1": "value1", "setting2": 42}))
        .await
        .unwrap();

    assert_eq!(cfg.meta.version, 1);
    assert!(cfg.meta.prev_cs.is_empty());
    assert!(!cfg.meta.cs.is_empty());
    cfg.validate().unwrap();

    let content: serde_json::Value = serde_json::from_str(cfg.content.get()).unwrap();
    assert_eq!(content["setting1"], "value1");
}

#[tokio::test]
async fn update_links_to_its_predecessor() {
    let (manager, clock, _) = fixture();

    let v1 = manager.create("test", &serde_json::json!({"version": 1})).await.unwrap();
    clock.advance(TimeDelta::seconds(5));
    let v2 = manager
        .update("test", &serde_json::json!({"version": 2, "new": "field"}))
        .await
        .unwrap();

    assert_eq!(v2.meta.version, 2);
    assert_eq!(v2.meta.prev_cs, v1.meta.cs);
    v2.next_of(&v1).unwrap();
}

#[tokio::test]
async fn update_of_unknown_id_fails() {
    let (manager, _, _) = fixture();
    let err = manager.update("ghost", &serde_json::json!({})).await;
    assert!(matches!(
        err,
        Err(ManagerError::Journal(JournalError::Store(
            StoreError::NotFound { .. }
        )))
    ));
}

#[tokio::test]
async fn get_and_history_cover_all_versions() {
    let (manager, clock, _) = fixture();
    build_versions(&manager, &clock, "test", 5).await;

    let v3 = manager.get("test", 3).await.unwrap();
    assert_eq!(v3.meta.version, 3);

    let latest = manager.get_latest("test").await.unwrap();
    assert_eq!(latest.meta.version, 5);

    let history = manager.get_history("test").await.unwrap();
    assert_eq!(history.len(), 5);
    for (i, cfg) in history.iter().enumerate() {
        assert_eq!(cfg.meta.version, i as u64 + 1);
    }
    for pair in history.windows(2) {
        pair[1].next_of(&pair[0]).unwrap();
    }
}

#[tokio::test]
async fn history_skips_unloadable_snapshots() {
    let (manager, clock, storage) = fixture();
    build_versions(&manager, &clock, "test", 4).await;

    storage
        .write("configs/test/v2.json", b"{garbled")
        .await
        .unwrap();

    let history = manager.get_history("test").await.unwrap();
    let versions: Vec<u64> = history.iter().map(|c| c.meta.version).collect();
    assert_eq!(versions, vec![1, 3, 4]);
}

#[tokio::test]
async fn validate_chain_accepts_built_chains_and_empty_journals() {
    let (manager, clock, _) = fixture();
    build_versions(&manager, &clock, "chain", 3).await;

    manager.validate_chain("chain").await.unwrap();
    // no entries at all for this id is considered valid
    manager.validate_chain("never-created").await.unwrap();
}

#[tokio::test]
async fn reconstruct_rebuilds_the_latest_version() {
    let (manager, clock, _) = fixture();
    build_versions(&manager, &clock, "test", 4).await;

    let rebuilt = manager.reconstruct("test").await.unwrap();
    assert_eq!(rebuilt.meta.version, 4);
}

#[tokio::test]
async fn rollback_extends_the_chain_with_old_content() {
    let (manager, clock, storage) = fixture();
    build_versions(&manager, &clock, "rollback-test", 5).await;

    clock.advance(TimeDelta::seconds(1));
    let rolled = manager.rollback("rollback-test", 3).await.unwrap();

    assert_eq!(rolled.meta.version, 6);
    let content: serde_json::Value = serde_json::from_str(rolled.content.get()).unwrap();
    assert_eq!(content, serde_json::json!({"version": 3}));

    manager.validate_chain("rollback-test").await.unwrap();

    let journal_bytes = storage.read("journal.jsonl").await.unwrap();
    let journal_text = String::from_utf8(journal_bytes).unwrap();
    assert!(journal_text.contains(r#""op":"rollback_to_v3""#));
}

#[tokio::test]
async fn export_import_preserves_meta_verbatim() {
    let (manager, clock, _) = fixture();
    build_versions(&manager, &clock, "export-test", 2).await;
    let exported = manager.export("export-test").await.unwrap();

    let (other, _, _) = fixture();
    let imported = other.import("imported", &exported).await.unwrap();

    let latest = other.get_latest("imported").await.unwrap();
    assert_eq!(imported.meta.version, 2);
    assert_eq!(latest.meta.cs, manager.get_latest("export-test").await.unwrap().meta.cs);
}

#[tokio::test]
async fn import_rejects_tampered_payloads() {
    let (manager, clock, _) = fixture();
    build_versions(&manager, &clock, "t", 1).await;

    let exported = manager.export("t").await.unwrap();
    let tampered = String::from_utf8(exported)
        .unwrap()
        .replace(r#""version": 1"#, r#""version": 9"#)
        .replace(r#""version":1"#, r#""version":9"#);

    let (other, _, _) = fixture();
    assert!(other.import("t", tampered.as_bytes()).await.is_err());
}

#[tokio::test]
async fn list_returns_ids_in_first_seen_order() {
    let (manager, _, _) = fixture();
    for id in ["config1", "config2", "config3"] {
        manager.create(id, &serde_json::json!({"id": id})).await.unwrap();
    }

    assert_eq!(
        manager.list().await.unwrap(),
        vec!["config1".to_string(), "config2".to_string(), "config3".to_string()]
    );
}

#[tokio::test]
async fn compact_keeps_the_chain_usable() {
    let (manager, clock, storage) = fixture();
    build_versions(&manager, &clock, "compact-test", 20).await;

    manager.compact().await.unwrap();

    let journal_bytes = storage.read("journal.jsonl").await.unwrap();
    let lines = journal_bytes.split(|b| *b == b'\n').filter(|l| !l.is_empty()).count();
    assert_eq!(lines, 10);

    let rebuilt = manager.reconstruct("compact-test").await.unwrap();
    assert_eq!(rebuilt.meta.version, 20);
    manager.validate_chain("compact-test").await.unwrap();
}

#[tokio::test]
async fn signed_creates_verify_and_unsigned_managers_refuse() {
    let signer = viracochan_signing::Signer::generate();
    let public_key = signer.public_key().to_string();

    let (manager, _, _) = fixture();
    let manager = manager.with_signer(signer);

    let cfg = manager.create("signed", &serde_json::json!({"signed": true})).await.unwrap();
    assert!(!cfg.meta.signature.is_empty());
    manager.verify(&cfg, &public_key).unwrap();

    let (unsigned, _, _) = fixture();
    assert!(matches!(
        unsigned.verify(&cfg, &public_key),
        Err(ManagerError::NoSigner)
    ));
}

#[tokio::test]
async fn watch_emits_only_strictly_newer_versions() {
    let (manager, clock, _) = fixture();
    manager.create("watch-test", &serde_json::json!({"v": 1})).await.unwrap();

    let cancel = CancellationToken::new();
    let mut updates = manager
        .watch("watch-test", Duration::from_millis(10), cancel.clone())
        .await;

    clock.advance(TimeDelta::seconds(1));
    manager.update("watch-test", &serde_json::json!({"v": 2})).await.unwrap();

    let cfg = tokio::time::timeout(Duration::from_secs(2), updates.recv())
        .await
        .expect("timed out waiting for update")
        .expect("channel closed early");
    assert_eq!(cfg.meta.version, 2);

    cancel.cancel();
    let closed = tokio::time::timeout(Duration::from_secs(2), updates.recv())
        .await
        .expect("timed out waiting for close");
    assert!(closed.is_none());
}

#[tokio::test]
async fn watch_suppresses_the_initial_state() {
    let (manager, _, _) = fixture();
    manager.create("quiet", &serde_json::json!({"v": 1})).await.unwrap();

    let cancel = CancellationToken::new();
    let mut updates = manager
        .watch("quiet", Duration::from_millis(10), cancel.clone())
        .await;

    // several poll intervals pass without a mutation: nothing is emitted
    let outcome = tokio::time::timeout(Duration::from_millis(100), updates.recv()).await;
    assert!(outcome.is_err());

    cancel.cancel();
}

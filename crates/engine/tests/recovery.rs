// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Integration tests for recovery scenarios
//!
//! Journal-only reconstruction after snapshot loss, resequencing a
//! scrambled journal file, fork detection across independent managers, and
//! filesystem persistence across manager lifetimes.

use chrono::{TimeDelta, TimeZone, Utc};
use std::sync::Arc;
use viracochan_core::FakeClock;
use viracochan_engine::{Manager, ManagerError};
use viracochan_storage::{FileStorage, JournalError, MemoryStorage, Storage};

fn fixture() -> (Manager<FakeClock>, FakeClock, Arc<MemoryStorage>) {
    let clock = FakeClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    let storage = Arc::new(MemoryStorage::new());
    let manager =
        Manager::new(Arc::clone(&storage) as Arc<dyn Storage>).with_clock(clock.clone());
    (manager, clock, storage)
}

async fn build_versions(manager: &Manager<FakeClock>, clock: &FakeClock, id: &str, n: u64) {
    for i in 1..=n {
        let content = serde_json::json!({"iteration": i});
        if i == 1 {
            manager.create(id, &content).await.unwrap();
        } else {
            clock.advance(TimeDelta::seconds(1));
            manager.update(id, &content).await.unwrap();
        }
    }
}

#[tokio::test]
async fn reconstruction_survives_total_snapshot_loss() {
    let (manager, clock, storage) = fixture();
    build_versions(&manager, &clock, "test", 5).await;

    // lose every snapshot; the journal is the only survivor
    for path in storage.list("configs").await.unwrap() {
        storage.delete(&path).await.unwrap();
    }

    let recovered = manager.reconstruct("test").await.unwrap();
    assert_eq!(recovered.meta.version, 5);
    recovered.validate().unwrap();

    let content: serde_json::Value = serde_json::from_str(recovered.content.get()).unwrap();
    assert_eq!(content, serde_json::json!({"iteration": 5}));
}

#[tokio::test]
async fn a_scrambled_journal_file_still_reconstructs() {
    let (manager, clock, storage) = fixture();
    build_versions(&manager, &clock, "test", 5).await;

    // rewrite the journal with its lines in a fixed scramble
    let data = storage.read("journal.jsonl").await.unwrap();
    let text = String::from_utf8(data).unwrap();
    let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 5);
    let scrambled: String = [3usize, 0, 4, 1, 2]
        .iter()
        .map(|i| format!("{}\n", lines[*i]))
        .collect();
    storage.write("journal.jsonl", scrambled.as_bytes()).await.unwrap();

    // a fresh manager over the same storage has no cache to lean on
    let fresh = Manager::new(Arc::clone(&storage) as Arc<dyn Storage>);
    let latest = fresh.get_latest("test").await.unwrap();
    assert_eq!(latest.meta.version, 5);
    fresh.validate_chain("test").await.unwrap();
}

#[tokio::test]
async fn independent_managers_racing_one_id_produce_a_detectable_fork() {
    let clock = FakeClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    let storage = Arc::new(MemoryStorage::new());
    let a = Manager::new(Arc::clone(&storage) as Arc<dyn Storage>).with_clock(clock.clone());
    let b = Manager::new(Arc::clone(&storage) as Arc<dyn Storage>).with_clock(clock.clone());

    a.create("shared", &serde_json::json!({"writer": "none"})).await.unwrap();
    // both managers observe version 1, then update independently
    b.get_latest("shared").await.unwrap();
    clock.advance(TimeDelta::seconds(1));
    a.update("shared", &serde_json::json!({"writer": "a"})).await.unwrap();
    b.update("shared", &serde_json::json!({"writer": "b"})).await.unwrap();

    let err = a.validate_chain("shared").await;
    assert!(matches!(
        err,
        Err(ManagerError::Journal(JournalError::Fork { version: 1 }))
    ));
}

#[tokio::test]
async fn compaction_preserves_fork_evidence() {
    let clock = FakeClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    let storage = Arc::new(MemoryStorage::new());
    let a = Manager::new(Arc::clone(&storage) as Arc<dyn Storage>).with_clock(clock.clone());
    let b = Manager::new(Arc::clone(&storage) as Arc<dyn Storage>).with_clock(clock.clone());

    a.create("forked", &serde_json::json!({"n": 0})).await.unwrap();
    b.get_latest("forked").await.unwrap();
    clock.advance(TimeDelta::seconds(1));
    a.update("forked", &serde_json::json!({"n": 1})).await.unwrap();
    b.update("forked", &serde_json::json!({"n": 2})).await.unwrap();

    a.compact().await.unwrap();

    // all three entries survive compaction verbatim
    let data = storage.read("journal.jsonl").await.unwrap();
    let lines = data.split(|b| *b == b'\n').filter(|l| !l.is_empty()).count();
    assert_eq!(lines, 3);
}

#[tokio::test]
async fn state_survives_a_manager_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());

    {
        let storage = Arc::new(FileStorage::new(dir.path()).unwrap());
        let manager =
            Manager::new(storage as Arc<dyn Storage>).with_clock(clock.clone());
        build_versions(&manager, &clock, "durable", 3).await;
        clock.advance(TimeDelta::seconds(1));
        manager.rollback("durable", 1).await.unwrap();
    }

    assert!(dir.path().join("journal.jsonl").exists());
    assert!(dir.path().join("configs/durable/v4.json").exists());

    // a new manager over a fresh backend at the same root sees everything
    let storage = Arc::new(FileStorage::new(dir.path()).unwrap());
    let manager = Manager::new(storage as Arc<dyn Storage>).with_clock(clock);

    let latest = manager.get_latest("durable").await.unwrap();
    assert_eq!(latest.meta.version, 4);
    let content: serde_json::Value = serde_json::from_str(latest.content.get()).unwrap();
    assert_eq!(content, serde_json::json!({"iteration": 1}));

    manager.validate_chain("durable").await.unwrap();
    let history = manager.get_history("durable").await.unwrap();
    assert_eq!(history.len(), 4);
}

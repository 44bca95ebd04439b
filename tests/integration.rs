// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration tests for the sync layer.
//!
//! Every test drives the public API end to end against in-memory backends:
//! identity transitions through the coordinator, edits through the domain
//! stores, and assertions on the remote's call log and rows. Timing-sensitive
//! tests run on tokio's paused clock.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//!
//! # With logs
//! RUST_LOG=focus_sync=debug cargo test --test integration -- --nocapture
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: first sync, debounced pushes, isolation
//! - `failure_*` - Failure scenarios: push fallback, broken rows, offline
//! - `interleave_*` - Pulls and queue replays mixed with later local edits

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;

use common::{signed_in, Harness};
use focus_sync::model::{Preset, PresetLibrary, Session, Settings, Task};
use focus_sync::remote::{tables, CallKind, RemoteStore};
use focus_sync::storage::traits::set_json;
use focus_sync::storage::InMemoryLocalStore;
use focus_sync::LocalStore;
use focus_sync::{
    AccountId, Domain, DomainEngine, IdentityState, OperationStatus, PullOutcome, PushOutcome, SyncConfig,
};

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test(start_paused = true)]
async fn happy_sound_enabled_edit_pushes_once_after_debounce() {
    let h = Harness::new(SyncConfig::default());
    assert!(h.services.stores.settings.snapshot().sound_enabled);

    let report = h
        .services
        .coordinator
        .handle_identity(signed_in("u1"))
        .await
        .expect("sign-in starts sync");
    assert_eq!(
        report.outcome(Domain::Settings),
        Some(PullOutcome::Applied { rows: 0, local_ahead: false })
    );
    assert_eq!(h.writes(CallKind::Upsert, tables::SETTINGS), 0);

    h.services.stores.settings.update(|s| s.sound_enabled = false);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.writes(CallKind::Upsert, tables::SETTINGS), 0, "still inside the debounce window");

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(h.writes(CallKind::Upsert, tables::SETTINGS), 1);
    let rows = h.raw().rows(tables::SETTINGS);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["sound_enabled"], false);

    h.services.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn happy_unchanged_state_pushed_once() {
    let h = Harness::new(SyncConfig::default());
    h.sign_in("u1").await;

    h.services.stores.settings.update(|s| s.theme = "dark".into());
    assert_eq!(h.services.settings.push_to_remote().await.unwrap(), PushOutcome::Pushed);
    assert_eq!(h.services.settings.push_to_remote().await.unwrap(), PushOutcome::Unchanged);

    // The debounced push for the same edit finds nothing new
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.writes(CallKind::Upsert, tables::SETTINGS), 1);
    assert_eq!(h.raw().rows(tables::SETTINGS).len(), 1);

    h.services.coordinator.shutdown().await;
}

#[tokio::test]
async fn happy_initial_sync_runs_in_domain_order() {
    let h = Harness::new(SyncConfig::default());
    h.sign_in("u1").await;

    let selects: Vec<String> = h
        .raw()
        .calls()
        .into_iter()
        .filter(|c| c.kind == CallKind::Select)
        .map(|c| c.table)
        .collect();
    assert_eq!(
        selects,
        vec![
            tables::PROFILES,
            tables::SETTINGS,
            tables::PRESETS,
            tables::SESSIONS,
            tables::TASKS,
            tables::TASK_COMPLETIONS,
        ]
    );
    assert!(h.services.coordinator.status().last_synced_at.is_some());

    h.services.coordinator.shutdown().await;
}

#[tokio::test]
async fn happy_namespaces_are_isolated() {
    let h = Harness::new(SyncConfig::default());
    let stores = &h.services.stores;

    h.sign_in("alice").await;
    stores.settings.update(|s| s.theme = "alice-theme".into());
    stores.tasks.update(|book| book.upsert(Task::new("alice only")));

    h.sign_in("bob").await;
    assert_eq!(stores.settings.snapshot().theme, Settings::default().theme);
    assert!(stores.tasks.snapshot().tasks.is_empty());
    assert_eq!(h.services.coordinator.active_account(), Some(AccountId::new("bob")));

    h.sign_in("alice").await;
    assert_eq!(stores.settings.snapshot().theme, "alice-theme");
    assert_eq!(stores.tasks.snapshot().tasks[0].title, "alice only");

    h.services.coordinator.shutdown().await;
}

#[tokio::test]
async fn happy_guest_data_wiped_after_sign_out() {
    let h = Harness::new(SyncConfig::default());
    let coordinator = &h.services.coordinator;

    coordinator.handle_identity(IdentityState::Guest).await;
    h.services.stores.settings.update(|s| s.daily_goal_minutes = 45);
    h.services.stores.sessions.update(|log| log.record(Session::new(1_000, 60)));
    assert!(h.local.keys_in_namespace("guest").len() >= 2);

    h.sign_in("u1").await;
    h.sign_out().await;

    assert_eq!(h.services.stores.settings.snapshot().daily_goal_minutes, 120);
    assert!(h.services.stores.sessions.snapshot().sessions.is_empty());
    assert!(h.local.get("settings_guest").unwrap().is_none());
    assert!(h.local.get("sessions_guest").unwrap().is_none());
    assert!(!coordinator.is_running());
}

#[tokio::test]
async fn happy_preset_guard_keeps_custom_presets() {
    let h = Harness::new(SyncConfig::default());
    let custom = Preset::custom("Deep Work", 3_000);
    let library = PresetLibrary { presets: vec![custom.clone()] };
    set_json(h.local.as_ref(), "presets_u1", &library).unwrap();

    let defaults = Preset::system_defaults()
        .iter()
        .map(|p| serde_json::to_value(p.to_dto(&AccountId::new("u1"))).unwrap())
        .collect();
    h.raw().seed(tables::PRESETS, defaults);

    let report = h.services.coordinator.handle_identity(signed_in("u1")).await.unwrap();
    assert_eq!(report.outcome(Domain::Presets), Some(PullOutcome::Guarded));
    assert_eq!(h.services.stores.presets.snapshot(), library);

    // The custom preset was uploaded next to the defaults
    let remote_ids: Vec<String> = h
        .raw()
        .rows(tables::PRESETS)
        .iter()
        .filter_map(|r| r["id"].as_str().map(str::to_string))
        .collect();
    assert!(remote_ids.contains(&custom.id));

    h.services.coordinator.shutdown().await;
}

#[tokio::test]
async fn happy_second_device_receives_tasks_and_sessions() {
    let remote = Arc::new(common::FailingRemote::new());
    let phone = Harness::with_backends(SyncConfig::default(), Arc::new(InMemoryLocalStore::new()), remote.clone());
    let tablet = Harness::with_backends(SyncConfig::default(), Arc::new(InMemoryLocalStore::new()), remote.clone());

    phone.sign_in("u1").await;
    let task = Task::new("Write report");
    phone.services.stores.tasks.update(|book| book.upsert(task.clone()));
    let session = Session::new(1_000, 1_500);
    phone.services.stores.sessions.update(|log| log.record(session.clone()));
    phone.services.coordinator.force_push_all_pending().await;

    tablet.sign_in("u1").await;
    let book = tablet.services.stores.tasks.snapshot();
    assert_eq!(book.get(&task.id).map(|t| t.title.as_str()), Some("Write report"));
    assert!(tablet.services.stores.sessions.snapshot().contains(&session.id));

    // Exactly one copy of the session reached the remote
    assert_eq!(remote.inner.rows(tables::SESSIONS).len(), 1);

    phone.services.coordinator.shutdown().await;
    tablet.services.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn happy_periodic_pull_respects_push_cooldown() {
    let config = SyncConfig {
        periodic_interval_secs: 10,
        ..Default::default()
    };
    let h = Harness::new(config);
    h.sign_in("u1").await;
    h.services.coordinator.force_push_all_pending().await;
    h.raw().clear_calls();

    // First tick lands 10 s after the push, inside the 15 s cooldown
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.raw().count_kind(CallKind::Select), 0);

    // Second tick at 20 s pulls all four domains
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.raw().count_kind(CallKind::Select), 5);

    h.services.coordinator.shutdown().await;
}

// =============================================================================
// Failure Scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn failure_push_falls_back_to_queue_then_recovers() {
    let h = Harness::new(SyncConfig::default());
    h.sign_in("u1").await;

    h.remote.fail_table(tables::SETTINGS);
    h.services.stores.settings.update(|s| s.sound_enabled = false);
    h.services.coordinator.force_push_all_pending().await;

    let ops = h.services.queue.operations();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].domain, Domain::Settings);
    assert_eq!(ops[0].status, OperationStatus::Pending);
    assert_eq!(ops[0].retry_count, 1);
    assert!(ops[0].last_error.is_some());

    h.remote.heal();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(h.services.queue.stats().completed, 1);
    assert_eq!(h.raw().rows(tables::SETTINGS)[0]["sound_enabled"], false);

    h.services.coordinator.shutdown().await;
}

#[tokio::test]
async fn failure_broken_stage_does_not_abort_initial_sync() {
    let h = Harness::new(SyncConfig::default());
    h.raw().seed(tables::PRESETS, vec![serde_json::json!({"account_id": "u1", "id": 5})]);

    let report = h.services.coordinator.handle_identity(signed_in("u1")).await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].domain, Domain::Presets);
    assert!(!report.failures[0].network);
    for domain in [Domain::Settings, Domain::Sessions, Domain::Tasks] {
        assert!(report.outcome(domain).is_some(), "{} still synced", domain);
    }
    assert!(h.services.coordinator.status().message().starts_with("Sync error:"));

    h.services.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failure_queue_waits_for_reachability() {
    let h = Harness::new(SyncConfig::default());
    h.sign_in("u1").await;

    let (reachable_tx, reachable_rx) = watch::channel(false);
    let _follower = h.services.queue.watch_reachability(reachable_rx);

    h.remote.fail_next_writes(1);
    h.services.stores.sessions.update(|log| log.record(Session::new(1_000, 60)));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let stats = h.services.queue.stats();
    assert_eq!(stats.pending, 1);
    assert_eq!(h.services.queue.operations()[0].retry_count, 0, "never attempted while unreachable");

    reachable_tx.send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(h.services.queue.stats().completed, 1);
    assert_eq!(h.raw().rows(tables::SESSIONS).len(), 1);
    assert_eq!(h.raw().rows(tables::USER_STATS)[0]["total_sessions"], 1);

    h.services.coordinator.shutdown().await;
}

// =============================================================================
// Interleaved Edits
// =============================================================================

#[tokio::test]
async fn interleave_value_restored_after_remote_change_is_pushed() {
    let h = Harness::new(SyncConfig::default());
    h.sign_in("u1").await;
    let settings = &h.services.stores.settings;

    settings.update(|s| s.theme = "light".into());
    h.services.coordinator.force_push_all_pending().await;
    assert_eq!(h.raw().rows(tables::SETTINGS)[0]["theme"], "light");

    // Another device switches to dark
    h.raw()
        .upsert(tables::SETTINGS, vec![json!({"account_id": "u1", "theme": "dark"})], &["account_id"])
        .await
        .unwrap();
    h.services.coordinator.sync_settings().await.unwrap();
    assert_eq!(settings.snapshot().theme, "dark");

    settings.update(|s| s.theme = "light".into());
    h.services.coordinator.force_push_all_pending().await;
    assert_eq!(h.raw().rows(tables::SETTINGS)[0]["theme"], "light");

    h.services.coordinator.sync_settings().await.unwrap();
    assert_eq!(settings.snapshot().theme, "light");

    h.services.coordinator.shutdown().await;
}

#[tokio::test]
async fn interleave_offline_setting_does_not_replay_over_online_edit() {
    let h = Harness::new(SyncConfig { queue_auto_drain: false, ..Default::default() });
    h.sign_in("u1").await;
    let settings = &h.services.stores.settings;

    h.remote.fail_table(tables::SETTINGS);
    settings.update(|s| s.theme = "A".into());
    assert!(matches!(h.services.settings.push_to_remote().await.unwrap(), PushOutcome::Queued(_)));

    h.remote.heal();
    settings.update(|s| s.theme = "B".into());
    assert_eq!(h.services.settings.push_to_remote().await.unwrap(), PushOutcome::Deferred);
    assert_eq!(h.services.queue.stats().pending, 1, "B replaced A in the queue");

    let report = h.services.queue.process_queue().await;
    assert_eq!(report.completed, 1);
    assert_eq!(h.raw().rows(tables::SETTINGS)[0]["theme"], "B");

    h.services.coordinator.sync_settings().await.unwrap();
    assert_eq!(settings.snapshot().theme, "B");

    h.services.coordinator.shutdown().await;
}

#[tokio::test]
async fn interleave_queued_task_does_not_replay_over_newer_edit() {
    let h = Harness::new(SyncConfig { queue_auto_drain: false, ..Default::default() });
    h.sign_in("u1").await;
    let tasks = &h.services.stores.tasks;
    let task = Task::new("Old title");
    let id = task.id.clone();

    h.remote.fail_table(tables::TASKS);
    tasks.update(|book| book.upsert(task.clone()));
    assert!(matches!(h.services.tasks.push_to_remote().await.unwrap(), PushOutcome::Queued(_)));

    h.remote.heal();
    tasks.update(|book| book.upsert(Task { title: "New title".into(), ..task }));
    assert_eq!(h.services.tasks.push_to_remote().await.unwrap(), PushOutcome::Deferred);

    // Replayed in order: the old payload first, then the new one
    let report = h.services.queue.process_queue().await;
    assert_eq!(report.completed, 2);
    let rows = h.raw().rows(tables::TASKS);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["title"], "New title");

    h.services.coordinator.sync_tasks().await.unwrap();
    assert_eq!(tasks.snapshot().get(&id).unwrap().title, "New title");

    h.services.coordinator.shutdown().await;
}

#[tokio::test]
async fn interleave_push_after_queue_drains_goes_direct() {
    let h = Harness::new(SyncConfig { queue_auto_drain: false, ..Default::default() });
    h.sign_in("u1").await;
    let settings = &h.services.stores.settings;

    h.remote.fail_table(tables::SETTINGS);
    settings.update(|s| s.theme = "A".into());
    h.services.settings.push_to_remote().await.unwrap();
    h.remote.heal();
    assert_eq!(h.services.queue.process_queue().await.completed, 1);

    settings.update(|s| s.theme = "B".into());
    assert_eq!(h.services.settings.push_to_remote().await.unwrap(), PushOutcome::Pushed);
    assert_eq!(h.raw().rows(tables::SETTINGS)[0]["theme"], "B");

    h.services.coordinator.shutdown().await;
}

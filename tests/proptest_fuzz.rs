// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Property-based tests (fuzzing) for the sync layer.
//!
//! Uses proptest to generate random inputs and verify namespace isolation,
//! backoff bounds, queue supersession and that decoding remote rows never
//! panics, only returns clean errors.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::{json, Value};

use focus_sync::engine::RemoteExecutor;
use focus_sync::model::{PresetDto, SessionDto, Settings, SettingsDto, TaskDto};
use focus_sync::remote::{decode_rows, tables, InMemoryRemote};
use focus_sync::storage::InMemoryLocalStore;
use focus_sync::{
    AccountId, BackoffSchedule, Domain, DomainStore, Namespace, OperationKind, OperationStatus, SyncConfig,
    SyncOperation, SyncQueue, TimestampTracker,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn account_id_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9-]{1,24}".prop_filter("reserved namespace", |id| id != Namespace::GUEST)
}

fn domain_strategy() -> impl Strategy<Value = Domain> {
    prop::sample::select(Domain::ALL.to_vec())
}

/// Generate arbitrary JSON values (including invalid row shapes)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,  // depth
        64, // max nodes
        10, // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(
                    prop_oneof![
                        Just("account_id".to_string()),
                        Just("id".to_string()),
                        Just("title".to_string()),
                        Just("updated_at".to_string()),
                        "[a-z_]{1,12}",
                    ],
                    inner,
                    0..10
                )
                .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

fn settings_store() -> DomainStore<Settings> {
    let local = Arc::new(InMemoryLocalStore::new());
    let tracker = Arc::new(TimestampTracker::new(local.clone()));
    DomainStore::new(local, tracker, 16)
}

fn idle_queue() -> Arc<SyncQueue> {
    let config = SyncConfig { queue_auto_drain: false, ..Default::default() };
    let executor = Arc::new(RemoteExecutor::new(Arc::new(InMemoryRemote::new())));
    let queue = Arc::new(SyncQueue::new(Arc::new(InMemoryLocalStore::new()), executor, &config));
    queue.activate(&AccountId::new("u1"));
    queue
}

// =============================================================================
// Namespace Isolation
// =============================================================================

proptest! {
    /// Distinct accounts never share a storage key
    #[test]
    fn prop_scoped_keys_are_disjoint(
        a in account_id_strategy(),
        b in account_id_strategy(),
        base in "[a-z_]{1,20}",
    ) {
        let key_a = Namespace::Account(AccountId::new(a.clone())).scoped_key(&base);
        let key_b = Namespace::Account(AccountId::new(b.clone())).scoped_key(&base);
        prop_assert_eq!(a == b, key_a == key_b);
        prop_assert_ne!(key_a, Namespace::Guest.scoped_key(&base));
    }

    /// Edits in one namespace are invisible from another and survive the
    /// round trip back
    #[test]
    fn prop_store_edits_stay_in_namespace(
        a in account_id_strategy(),
        b in account_id_strategy(),
        theme in "[a-z]{1,12}",
        goal in 1u32..600,
    ) {
        prop_assume!(a != b);
        let store = settings_store();
        let ns_a = Namespace::Account(AccountId::new(a));
        let ns_b = Namespace::Account(AccountId::new(b));

        store.load(&ns_a);
        store.update(|s| {
            s.theme = theme.clone();
            s.daily_goal_minutes = goal;
        });

        store.load(&ns_b);
        prop_assert_eq!(store.snapshot(), Settings::default());

        store.load(&ns_a);
        let snapshot = store.snapshot();
        prop_assert_eq!(snapshot.theme, theme);
        prop_assert_eq!(snapshot.daily_goal_minutes, goal);
    }
}

// =============================================================================
// Backoff Invariants
// =============================================================================

proptest! {
    /// Delays stay within the table and never shrink as retries grow
    #[test]
    fn prop_backoff_bounded_and_monotonic(retry in 1u32..1_000) {
        let schedule = BackoffSchedule::default();
        let delay = schedule.delay_for(retry);
        prop_assert!(delay >= Duration::from_secs(1));
        prop_assert!(delay <= Duration::from_secs(16));
        prop_assert!(schedule.delay_for(retry + 1) >= delay);
    }

    /// An arbitrary table is indexed by retry count and capped at its end
    #[test]
    fn prop_backoff_caps_at_last_step(
        steps in prop::collection::vec(1u64..120, 1..8),
        retry in 1u32..50,
    ) {
        let schedule = BackoffSchedule::from_secs(&steps, 5);
        let index = (retry as usize - 1).min(steps.len() - 1);
        prop_assert_eq!(schedule.delay_for(retry), Duration::from_secs(steps[index]));
        prop_assert_eq!(schedule.is_exhausted(retry), retry >= 5);
    }
}

// =============================================================================
// Queue Supersession
// =============================================================================

proptest! {
    /// Latest-wins domains keep exactly their newest pending payload;
    /// append domains keep every operation in order
    #[test]
    fn prop_queue_supersession(writes in prop::collection::vec((domain_strategy(), 0u32..1_000), 1..40)) {
        let queue = idle_queue();
        for (domain, n) in &writes {
            queue.enqueue(*domain, OperationKind::Update, json!({"n": n}));
        }

        let ops = queue.operations();
        prop_assert!(ops.iter().all(|op| op.status == OperationStatus::Pending));
        for domain in Domain::ALL {
            let written: Vec<u32> = writes.iter().filter(|(d, _)| *d == domain).map(|(_, n)| *n).collect();
            let queued: Vec<u64> = ops
                .iter()
                .filter(|op| op.domain == domain)
                .filter_map(|op| op.payload["n"].as_u64())
                .collect();
            if domain.is_latest_wins() {
                prop_assert_eq!(queued, written.last().map(|n| vec![u64::from(*n)]).unwrap_or_default());
            } else {
                prop_assert_eq!(queued, written.iter().map(|n| u64::from(*n)).collect::<Vec<_>>());
            }
        }
    }
}

// =============================================================================
// Decoding Fuzz Tests
// =============================================================================

proptest! {
    /// Remote rows of any shape decode or fail cleanly
    #[test]
    fn fuzz_decode_arbitrary_rows(rows in prop::collection::vec(arbitrary_json_strategy(), 0..8)) {
        let _ = decode_rows::<SettingsDto>(tables::SETTINGS, rows.clone());
        let _ = decode_rows::<PresetDto>(tables::PRESETS, rows.clone());
        let _ = decode_rows::<SessionDto>(tables::SESSIONS, rows.clone());
        let _ = decode_rows::<TaskDto>(tables::TASKS, rows);
    }

    /// A persisted queue of random bytes never panics on load
    #[test]
    fn fuzz_queue_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..2_000)) {
        let result: Result<Vec<SyncOperation>, _> = serde_json::from_slice(&bytes);
        let _ = result;
    }

    /// Merging a remote row never touches fields it does not carry and
    /// never overwrites a field the caller keeps local
    #[test]
    fn prop_settings_merge_respects_keep_local(
        theme in proptest::option::of("[a-z]{1,8}"),
        goal in proptest::option::of(1u32..600),
        sound in proptest::option::of(any::<bool>()),
        keep_all in any::<bool>(),
    ) {
        let mut dto = SettingsDto::empty(&AccountId::new("u1"));
        dto.theme = theme.clone();
        dto.daily_goal_minutes = goal;
        dto.sound_enabled = sound;

        let mut local = Settings::default();
        let report = dto.merge_into(&mut local, |_| keep_all);

        if keep_all {
            prop_assert_eq!(local, Settings::default());
            prop_assert!(report.applied.is_empty());
        } else {
            prop_assert!(report.kept_local.is_empty());
            prop_assert_eq!(local.theme, theme.unwrap_or_else(|| Settings::default().theme));
            prop_assert_eq!(local.daily_goal_minutes, goal.unwrap_or(120));
            prop_assert_eq!(local.sound_enabled, sound.unwrap_or(true));
            prop_assert_eq!(local.haptics_enabled, true);
        }
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tasks and per-day completion keys.
//!
//! Task rows merge per record: the remote copy wins unless the task was
//! edited locally after the row's `updated_at`. Completion keys merge as
//! sets against the last-synced baseline:
//!
//! ```text
//! merged = (remote ∪ (local − baseline)) − (baseline − local)
//! ```
//!
//! Deleting a task archives it; rows are never hard-deleted remotely.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::identity::{AccountId, Namespace};
use crate::metrics::LatencyTimer;
use crate::model::{CompletionDto, Domain, TaskBook, TaskDto};
use crate::remote::{decode_rows, encode_rows, tables, Filter, Order, RemoteError, RemoteStore};
use crate::resilience::{OperationKind, SyncQueue};
use crate::store::{ChangeEvent, DomainStore};
use crate::timestamps::TimestampTracker;

use super::{DomainEngine, EngineContext, EngineCore, EnginePhase, PullOutcome, PushOutcome, SyncError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TaskPayload {
    #[serde(default)]
    pub tasks: Vec<TaskDto>,
    /// Synced tasks no longer present locally
    #[serde(default)]
    pub archived_ids: Vec<String>,
    #[serde(default)]
    pub completion_adds: Vec<CompletionDto>,
    #[serde(default)]
    pub completion_removes: Vec<String>,
}

impl TaskPayload {
    fn is_empty(&self) -> bool {
        self.tasks.is_empty()
            && self.archived_ids.is_empty()
            && self.completion_adds.is_empty()
            && self.completion_removes.is_empty()
    }
}

pub(crate) async fn write_payload(
    remote: &dyn RemoteStore,
    account: &AccountId,
    payload: TaskPayload,
) -> Result<(), RemoteError> {
    if !payload.tasks.is_empty() {
        let rows = encode_rows(tables::TASKS, &payload.tasks)?;
        remote.upsert(tables::TASKS, rows, &["account_id", "id"]).await?;
    }
    for id in &payload.archived_ids {
        let filter = Filter::eq("account_id", account.as_str()).and_eq("id", id.as_str());
        remote.update(tables::TASKS, json!({"archived": true}), &filter).await?;
    }
    if !payload.completion_adds.is_empty() {
        let rows = encode_rows(tables::TASK_COMPLETIONS, &payload.completion_adds)?;
        remote
            .upsert(tables::TASK_COMPLETIONS, rows, &["account_id", "completion_key"])
            .await?;
    }
    for key in &payload.completion_removes {
        let filter = Filter::eq("account_id", account.as_str()).and_eq("completion_key", key.as_str());
        remote.delete(tables::TASK_COMPLETIONS, &filter).await?;
    }
    Ok(())
}

enum Merge {
    Same,
    KeepLocal,
    TakeRemote,
}

pub struct TasksEngine {
    core: EngineCore,
    store: Arc<DomainStore<TaskBook>>,
    remote: Arc<dyn RemoteStore>,
    queue: Arc<SyncQueue>,
    timestamps: Arc<TimestampTracker>,
    synced_ids: Mutex<BTreeSet<String>>,
    /// Completion keys as of the last pull or push
    baseline: Mutex<BTreeSet<String>>,
}

impl TasksEngine {
    pub fn new(store: Arc<DomainStore<TaskBook>>, ctx: &EngineContext, config: &SyncConfig) -> Self {
        Self {
            core: EngineCore::new(Domain::Tasks, config.debounce_for(Domain::Tasks), ctx.clock.clone()),
            store,
            remote: ctx.remote.clone(),
            queue: ctx.queue.clone(),
            timestamps: ctx.timestamps.clone(),
            synced_ids: Mutex::new(BTreeSet::new()),
            baseline: Mutex::new(BTreeSet::new()),
        }
    }

    #[must_use]
    pub fn completion_baseline(&self) -> BTreeSet<String> {
        self.baseline.lock().clone()
    }

    async fn pull(&self, account: &AccountId) -> Result<PullOutcome, SyncError> {
        let filter = Filter::eq("account_id", account.as_str());
        let task_rows = self
            .remote
            .select(tables::TASKS, &filter, Some(&Order::asc("sort_index")))
            .await?;
        let completion_rows = self.remote.select(tables::TASK_COMPLETIONS, &filter, None).await?;
        let remote_tasks = decode_rows::<TaskDto>(tables::TASKS, task_rows)?;
        let remote_keys: BTreeSet<String> = decode_rows::<CompletionDto>(tables::TASK_COMPLETIONS, completion_rows)?
            .into_iter()
            .map(|c| c.completion_key)
            .collect();
        let rows = remote_tasks.len() + remote_keys.len();
        let remote_ids: BTreeSet<String> = remote_tasks.iter().map(|t| t.id.clone()).collect();

        let namespace = Namespace::Account(account.clone());
        let synced = self.synced_ids.lock().clone();
        let baseline = self.baseline.lock().clone();
        let (kept_local, drift) = self.store.apply_remote(|book| {
            let mut kept = 0;
            for dto in remote_tasks {
                let updated_at = dto.updated_at;
                let incoming = dto.into_local();
                let field = format!("task:{}", incoming.id);
                let merge = match book.get(&incoming.id) {
                    Some(existing) if *existing == incoming => Merge::Same,
                    Some(_) if self.timestamps.is_local_newer(&field, &namespace, updated_at) => Merge::KeepLocal,
                    _ => Merge::TakeRemote,
                };
                match merge {
                    Merge::Same => {}
                    Merge::KeepLocal => kept += 1,
                    Merge::TakeRemote => book.upsert(incoming),
                }
            }
            // Synced earlier but gone remotely: removed on another device
            book.tasks
                .retain(|t| remote_ids.contains(&t.id) || !synced.contains(&t.id));
            kept += book.tasks.iter().filter(|t| !remote_ids.contains(&t.id)).count();

            let adds: BTreeSet<String> = book.completions.difference(&baseline).cloned().collect();
            let removes: BTreeSet<String> = baseline.difference(&book.completions).cloned().collect();
            let merged: BTreeSet<String> = remote_keys
                .union(&adds)
                .filter(|k| !removes.contains(*k))
                .cloned()
                .collect();
            let drift = merged != remote_keys;
            book.completions = merged;
            book.sort();
            (kept, drift)
        });
        *self.synced_ids.lock() = remote_ids;
        *self.baseline.lock() = remote_keys;

        let local_ahead = kept_local > 0 || drift;
        if local_ahead {
            self.core.mark_dirty();
        }
        debug!(rows, kept_local, completion_drift = drift, "Merged remote tasks");
        Ok(PullOutcome::Applied { rows, local_ahead })
    }
}

#[async_trait]
impl DomainEngine for TasksEngine {
    fn core(&self) -> &EngineCore {
        &self.core
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.store.subscribe()
    }

    fn local_revision(&self) -> u64 {
        self.store.local_revision()
    }

    #[tracing::instrument(skip(self), fields(domain = "tasks"))]
    async fn pull_from_remote(&self) -> Result<PullOutcome, SyncError> {
        let account = self.core.account()?;
        let _lock = self.core.exclusive().await;
        let _phase = self.core.enter(EnginePhase::Pulling)?;
        let _timer = LatencyTimer::new("tasks", "pull");
        let result = self.pull(&account).await;
        self.core.finish_pull(&result);
        result
    }

    #[tracing::instrument(skip(self), fields(domain = "tasks"))]
    async fn push_to_remote(&self) -> Result<PushOutcome, SyncError> {
        let account = self.core.account()?;
        let _lock = self.core.exclusive().await;
        let _phase = self.core.enter(EnginePhase::Pushing)?;

        let synced = self.synced_ids.lock().clone();
        let baseline = self.baseline.lock().clone();
        let (tasks, local_ids, local_keys) = self.store.read(|book| {
            let tasks: Vec<TaskDto> = book.tasks.iter().map(|t| t.to_dto(&account)).collect();
            let ids: BTreeSet<String> = book.tasks.iter().map(|t| t.id.clone()).collect();
            (tasks, ids, book.completions.clone())
        });

        let completion_adds = local_keys
            .difference(&baseline)
            .filter_map(|key| {
                let dto = CompletionDto::from_key(&account, key);
                if dto.is_none() {
                    warn!(key = %key, "Skipping malformed completion key");
                }
                dto
            })
            .collect();
        let payload = TaskPayload {
            tasks,
            archived_ids: synced.difference(&local_ids).cloned().collect(),
            completion_adds,
            completion_removes: baseline.difference(&local_keys).cloned().collect(),
        };
        if payload.is_empty() {
            return Ok(PushOutcome::Skipped);
        }

        let value = serde_json::to_value(&payload)?;
        let write = write_payload(self.remote.as_ref(), &account, payload);
        let outcome = self
            .core
            .push_with_fallback(&self.queue, OperationKind::Update, value, write)
            .await?;
        if outcome.handed_off() {
            *self.synced_ids.lock() = local_ids;
            *self.baseline.lock() = local_keys;
        }
        Ok(outcome)
    }

    fn clear_caches(&self) {
        self.synced_ids.lock().clear();
        self.baseline.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{PushClock, RemoteExecutor};
    use crate::model::{completion_key, Task};
    use crate::remote::{CallKind, InMemoryRemote};
    use crate::storage::memory::InMemoryLocalStore;
    use serde_json::Value;

    struct Fixture {
        remote: Arc<InMemoryRemote>,
        store: Arc<DomainStore<TaskBook>>,
        tracker: Arc<TimestampTracker>,
        engine: Arc<TasksEngine>,
    }

    fn fixture() -> Fixture {
        let local = Arc::new(InMemoryLocalStore::new());
        let remote = Arc::new(InMemoryRemote::new());
        let tracker = Arc::new(TimestampTracker::new(local.clone()));
        let store = Arc::new(DomainStore::new(local.clone(), tracker.clone(), 16));
        store.load(&Namespace::Account(AccountId::new("u1")));
        let config = SyncConfig { queue_auto_drain: false, ..Default::default() };
        let queue = Arc::new(SyncQueue::new(local, Arc::new(RemoteExecutor::new(remote.clone())), &config));
        queue.activate(&AccountId::new("u1"));
        let ctx = EngineContext {
            remote: remote.clone(),
            queue,
            timestamps: tracker.clone(),
            clock: Arc::new(PushClock::default()),
        };
        let engine = Arc::new(TasksEngine::new(store.clone(), &ctx, &config));
        Fixture { remote, store, tracker, engine }
    }

    fn as_dyn(engine: &Arc<TasksEngine>) -> Arc<dyn DomainEngine> {
        engine.clone()
    }

    fn task_row(id: &str, title: &str, updated_at: i64) -> Value {
        json!({"account_id": "u1", "id": id, "title": title, "updated_at": updated_at})
    }

    fn completion_row(key: &str) -> Value {
        let (task_id, day) = crate::model::parse_completion_key(key).unwrap();
        json!({"account_id": "u1", "completion_key": key, "task_id": task_id, "day": day})
    }

    fn remote_keys(remote: &InMemoryRemote) -> BTreeSet<String> {
        remote
            .rows(tables::TASK_COMPLETIONS)
            .iter()
            .map(|r| r["completion_key"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_completion_reconciliation() {
        let f = fixture();
        f.remote.seed(tables::TASKS, vec![task_row("t1", "Read", 10)]);
        f.remote.seed(
            tables::TASK_COMPLETIONS,
            vec![completion_row("t1|2026-01-01"), completion_row("t1|2026-01-02")],
        );
        as_dyn(&f.engine).start(AccountId::new("u1")).await.unwrap();
        assert!(f.store.snapshot().is_completed("t1", "2026-01-01"));

        f.store.update(|book| {
            book.toggle_completion("t1", "2026-01-01");
            book.toggle_completion("t1", "2026-01-03");
        });
        assert_eq!(f.engine.push_to_remote().await.unwrap(), PushOutcome::Pushed);

        let expected: BTreeSet<String> = ["t1|2026-01-02", "t1|2026-01-03"].iter().map(|s| s.to_string()).collect();
        assert_eq!(remote_keys(&f.remote), expected);
        assert_eq!(f.remote.call_count(CallKind::Delete, tables::TASK_COMPLETIONS), 1);
        assert_eq!(f.engine.completion_baseline(), expected);
        as_dyn(&f.engine).stop();
    }

    #[tokio::test]
    async fn test_local_completions_survive_pull() {
        let f = fixture();
        let task = Task { id: "t1".into(), ..Task::new("Walk") };
        f.store.update(|book| {
            book.upsert(task);
            book.toggle_completion("t1", "2026-02-02");
        });
        f.remote.seed(tables::TASK_COMPLETIONS, vec![completion_row("t1|2026-02-01")]);

        let outcome = as_dyn(&f.engine).start(AccountId::new("u1")).await.unwrap();
        assert!(matches!(outcome, PullOutcome::Applied { local_ahead: true, .. }));
        let book = f.store.snapshot();
        assert!(book.is_completed("t1", "2026-02-01"));
        assert!(book.is_completed("t1", "2026-02-02"));
        // Pushed right after the pull
        assert!(remote_keys(&f.remote).contains(&completion_key("t1", "2026-02-02")));
        assert_eq!(f.remote.rows(tables::TASKS).len(), 1);
        as_dyn(&f.engine).stop();
    }

    #[tokio::test]
    async fn test_newer_local_task_wins() {
        let f = fixture();
        let ns = Namespace::Account(AccountId::new("u1"));
        f.store.update(|book| book.upsert(Task { id: "t1".into(), ..Task::new("Local title") }));
        f.tracker.record_at("task:t1", &ns, 1_000);
        f.remote.seed(tables::TASKS, vec![task_row("t1", "Remote title", 500), task_row("t2", "Other", 500)]);

        as_dyn(&f.engine).start(AccountId::new("u1")).await.unwrap();
        let book = f.store.snapshot();
        assert_eq!(book.get("t1").unwrap().title, "Local title");
        assert_eq!(book.get("t2").unwrap().title, "Other");
        as_dyn(&f.engine).stop();
    }

    #[tokio::test]
    async fn test_older_local_task_loses() {
        let f = fixture();
        let ns = Namespace::Account(AccountId::new("u1"));
        f.store.update(|book| book.upsert(Task { id: "t1".into(), ..Task::new("Local title") }));
        f.tracker.record_at("task:t1", &ns, 100);
        f.remote.seed(tables::TASKS, vec![task_row("t1", "Remote title", 500)]);

        as_dyn(&f.engine).start(AccountId::new("u1")).await.unwrap();
        assert_eq!(f.store.snapshot().get("t1").unwrap().title, "Remote title");
        as_dyn(&f.engine).stop();
    }

    #[tokio::test]
    async fn test_delete_is_soft() {
        let f = fixture();
        f.remote.seed(tables::TASKS, vec![task_row("t1", "Read", 10)]);
        as_dyn(&f.engine).start(AccountId::new("u1")).await.unwrap();

        f.store.update(|book| book.archive("t1"));
        f.engine.push_to_remote().await.unwrap();

        let rows = f.remote.rows(tables::TASKS);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["archived"], true);
        assert_eq!(f.remote.call_count(CallKind::Delete, tables::TASKS), 0);
        as_dyn(&f.engine).stop();
    }

    #[tokio::test]
    async fn test_removed_synced_task_is_archived_remotely() {
        let f = fixture();
        f.remote.seed(tables::TASKS, vec![task_row("t1", "Read", 10)]);
        as_dyn(&f.engine).start(AccountId::new("u1")).await.unwrap();

        f.store.update(|book| book.tasks.clear());
        f.engine.push_to_remote().await.unwrap();

        assert_eq!(f.remote.call_count(CallKind::Update, tables::TASKS), 1);
        assert_eq!(f.remote.rows(tables::TASKS)[0]["archived"], true);
        as_dyn(&f.engine).stop();
    }
}

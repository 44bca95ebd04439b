// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable, namespaced queue of pending remote mutations.
//!
//! When a direct push fails, the engine hands its payload to the queue.
//! Operations are persisted under `sync_queue_{account}` after every
//! mutation and drained in order against an [`OperationExecutor`]:
//!
//! ```text
//! pending ──drain──► syncing ──ok──► completed
//!    ▲                  │
//!    └──backoff─────────┤ err, retry_count < max
//!                       └──────────► failed   (retry_failed() → pending)
//! ```
//!
//! Settings and presets are latest-wins: a new operation replaces any
//! pending or failed one of the same domain. Backoff deadlines are tracked on
//! the tokio clock; after a restart every pending operation is due.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::identity::{AccountId, Namespace};
use crate::metrics;
use crate::model::Domain;
use crate::remote::RemoteError;
use crate::storage::traits::{get_json, set_json, LocalStore};
use crate::timestamps::now_millis;

use super::operation::{OperationKind, OperationStatus, QueueStats, SyncOperation};
use super::retry::BackoffSchedule;

pub const QUEUE_KEY: &str = "sync_queue";

/// Performs the remote effect of one queued operation.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, account: &AccountId, op: &SyncOperation) -> Result<(), RemoteError>;
}

/// Outcome counts of one `process_queue` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
}

#[derive(Default)]
struct QueueState {
    account: Option<AccountId>,
    ops: Vec<SyncOperation>,
    /// op id → earliest next attempt
    not_before: HashMap<String, Instant>,
}

/// Clears the processing flag on drop
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncQueue {
    local: Arc<dyn LocalStore>,
    executor: Arc<dyn OperationExecutor>,
    schedule: BackoffSchedule,
    retention: Duration,
    auto_drain: bool,
    state: Mutex<QueueState>,
    /// Bumped on every activate/deactivate so an in-flight drain for the
    /// previous account drops its results
    generation: AtomicU64,
    processing: AtomicBool,
    drain_requested: AtomicBool,
    reachable: AtomicBool,
}

impl SyncQueue {
    pub fn new(local: Arc<dyn LocalStore>, executor: Arc<dyn OperationExecutor>, config: &SyncConfig) -> Self {
        Self::with_schedule(local, executor, config, BackoffSchedule::from_config(config))
    }

    pub fn with_schedule(
        local: Arc<dyn LocalStore>,
        executor: Arc<dyn OperationExecutor>,
        config: &SyncConfig,
        schedule: BackoffSchedule,
    ) -> Self {
        Self {
            local,
            executor,
            schedule,
            retention: config.queue_retention(),
            auto_drain: config.queue_auto_drain,
            state: Mutex::new(QueueState::default()),
            generation: AtomicU64::new(0),
            processing: AtomicBool::new(false),
            drain_requested: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
        }
    }

    /// Load and own the queue of `account`. No-op if already active for it.
    ///
    /// Operations persisted mid-flight (`syncing`) are reset to `pending`.
    pub fn activate(&self, account: &AccountId) {
        let mut state = self.state.lock();
        if state.account.as_ref() == Some(account) {
            return;
        }
        self.generation.fetch_add(1, Ordering::AcqRel);

        let key = Namespace::Account(account.clone()).scoped_key(QUEUE_KEY);
        let mut ops = match get_json::<Vec<SyncOperation>>(self.local.as_ref(), &key) {
            Ok(ops) => ops.unwrap_or_default(),
            Err(e) => {
                warn!(account = %account, error = %e, "Discarding unreadable sync queue");
                Vec::new()
            }
        };
        let mut recovered = 0;
        for op in ops.iter_mut().filter(|op| op.status == OperationStatus::Syncing) {
            op.status = OperationStatus::Pending;
            recovered += 1;
        }

        *state = QueueState {
            account: Some(account.clone()),
            ops,
            not_before: HashMap::new(),
        };
        self.persist(&state);

        let stats = QueueStats::from_ops(&state.ops);
        if stats.outstanding() > 0 || recovered > 0 {
            info!(account = %account, pending = stats.pending, recovered, "Sync queue has operations from previous run");
        } else {
            debug!(account = %account, "Sync queue activated");
        }
    }

    /// Release the active account. Its operations stay persisted.
    pub fn deactivate(&self) {
        let mut state = self.state.lock();
        if let Some(account) = state.account.take() {
            self.generation.fetch_add(1, Ordering::AcqRel);
            debug!(account = %account, "Sync queue deactivated");
        }
        state.ops.clear();
        state.not_before.clear();
    }

    #[must_use]
    pub fn active_account(&self) -> Option<AccountId> {
        self.state.lock().account.clone()
    }

    /// Append an operation and persist. Returns its id, or `None` when no
    /// account is active.
    pub fn enqueue(self: &Arc<Self>, domain: Domain, kind: OperationKind, payload: Value) -> Option<String> {
        let mut op = SyncOperation::new(domain, kind, payload);
        let id = op.id.clone();
        {
            let mut state = self.state.lock();
            if state.account.is_none() {
                warn!(domain = %domain, "Sync queue inactive, dropping operation");
                return None;
            }

            if domain.is_latest_wins() {
                let (superseded, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.ops)
                    .into_iter()
                    .partition(|o| o.domain == domain && o.status.is_replaceable());
                state.ops = kept;
                for old in &superseded {
                    op.absorb_deletions(old);
                    state.not_before.remove(&old.id);
                }
                if !superseded.is_empty() {
                    debug!(domain = %domain, superseded = superseded.len(), "Replaced pending operations");
                }
            }

            state.ops.push(op);
            self.persist(&state);
        }
        metrics::record_queue_operation(domain.as_str(), "enqueued");
        debug!(domain = %domain, op_id = %id, "Operation enqueued");

        if self.auto_drain {
            self.schedule_drain(Duration::ZERO);
        }
        Some(id)
    }

    /// True while an operation of `domain` would still be written by a
    /// drain: pending or syncing, or failed for latest-wins domains, where
    /// the next enqueue replaces it.
    #[must_use]
    pub fn has_unfinished(&self, domain: Domain) -> bool {
        self.state.lock().ops.iter().any(|op| {
            op.domain == domain
                && match op.status {
                    OperationStatus::Pending | OperationStatus::Syncing => true,
                    OperationStatus::Failed => domain.is_latest_wins(),
                    OperationStatus::Completed => false,
                }
        })
    }

    /// Drain every due pending operation in order.
    ///
    /// No-op while another drain runs (the running drain makes one more
    /// pass), while inactive, or while unreachable.
    pub async fn process_queue(self: &Arc<Self>) -> DrainReport {
        if self.processing.swap(true, Ordering::AcqRel) {
            self.drain_requested.store(true, Ordering::Release);
            return DrainReport::default();
        }
        let _guard = ProcessingGuard(&self.processing);

        let mut report = DrainReport::default();
        loop {
            self.drain_requested.store(false, Ordering::Release);
            self.drain_pass(&mut report).await;
            if !self.drain_requested.load(Ordering::Acquire) {
                break;
            }
        }

        if report != DrainReport::default() {
            debug!(
                completed = report.completed,
                retried = report.retried,
                failed = report.failed,
                "Sync queue drain finished"
            );
        }
        report
    }

    async fn drain_pass(self: &Arc<Self>, report: &mut DrainReport) {
        let Some(account) = self.active_account() else {
            return;
        };
        if !self.is_reachable() {
            debug!("Network unreachable, queue drain deferred");
            return;
        }
        let generation = self.generation.load(Ordering::Acquire);
        let due = self.prune_and_collect_due();

        for id in due {
            if self.generation.load(Ordering::Acquire) != generation || !self.is_reachable() {
                return;
            }
            let Some(op) = self.mark_syncing(&id) else {
                continue;
            };
            let result = self.executor.execute(&account, &op).await;
            if self.generation.load(Ordering::Acquire) != generation {
                debug!(op_id = %id, "Queue account changed mid-drain, dropping result");
                return;
            }
            self.finish(&id, result, report);
        }
    }

    fn prune_and_collect_due(&self) -> Vec<String> {
        let mut state = self.state.lock();
        let cutoff = now_millis() - self.retention.as_millis() as i64;
        let before = state.ops.len();
        state
            .ops
            .retain(|op| !(op.status.is_terminal() && op.created_at < cutoff));
        let pruned = before - state.ops.len();
        if pruned > 0 {
            debug!(pruned, "Pruned old sync operations");
            self.persist(&state);
        }

        let now = Instant::now();
        let state = &*state;
        state
            .ops
            .iter()
            .filter(|op| op.status == OperationStatus::Pending)
            .filter(|op| state.not_before.get(&op.id).map_or(true, |at| *at <= now))
            .map(|op| op.id.clone())
            .collect()
    }

    fn mark_syncing(&self, id: &str) -> Option<SyncOperation> {
        let mut state = self.state.lock();
        let op = state
            .ops
            .iter_mut()
            .find(|op| op.id == id && op.status == OperationStatus::Pending)?;
        op.status = OperationStatus::Syncing;
        let op = op.clone();
        self.persist(&state);
        Some(op)
    }

    fn finish(self: &Arc<Self>, id: &str, result: Result<(), RemoteError>, report: &mut DrainReport) {
        let mut retry_in = None;
        {
            let mut state = self.state.lock();
            let Some(op) = state.ops.iter_mut().find(|op| op.id == id) else {
                return;
            };
            let domain = op.domain;
            match result {
                Ok(()) => {
                    op.status = OperationStatus::Completed;
                    op.last_error = None;
                    op.next_attempt_at = None;
                    report.completed += 1;
                    metrics::record_queue_operation(domain.as_str(), "completed");
                    debug!(op_id = %id, domain = %domain, "Queued operation completed");
                }
                Err(e) => {
                    op.retry_count += 1;
                    op.last_error = Some(e.to_string());
                    if self.schedule.is_exhausted(op.retry_count) {
                        op.status = OperationStatus::Failed;
                        op.next_attempt_at = None;
                        report.failed += 1;
                        metrics::record_queue_operation(domain.as_str(), "failed");
                        error!(
                            op_id = %id,
                            domain = %domain,
                            retries = op.retry_count,
                            error = %e,
                            "Queued operation failed permanently"
                        );
                    } else {
                        let delay = self.schedule.delay_for(op.retry_count);
                        op.status = OperationStatus::Pending;
                        op.next_attempt_at = Some(now_millis() + delay.as_millis() as i64);
                        report.retried += 1;
                        metrics::record_queue_operation(domain.as_str(), "retried");
                        warn!(
                            op_id = %id,
                            domain = %domain,
                            retry = op.retry_count,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Queued operation failed, will retry"
                        );
                        retry_in = Some(delay);
                    }
                }
            }
            if let Some(delay) = retry_in {
                state.not_before.insert(id.to_string(), Instant::now() + delay);
            }
            self.persist(&state);
        }
        if let Some(delay) = retry_in {
            self.schedule_drain(delay);
        }
    }

    /// Reset every failed operation to a fresh pending one, then drain.
    pub async fn retry_failed(self: &Arc<Self>) -> usize {
        let count = {
            let mut state = self.state.lock();
            let mut count = 0;
            let mut reset = Vec::new();
            for op in state.ops.iter_mut().filter(|op| op.status == OperationStatus::Failed) {
                op.status = OperationStatus::Pending;
                op.retry_count = 0;
                op.last_error = None;
                op.next_attempt_at = None;
                reset.push(op.id.clone());
                count += 1;
            }
            for id in &reset {
                state.not_before.remove(id);
            }
            if count > 0 {
                self.persist(&state);
            }
            count
        };
        if count > 0 {
            info!(count, "Retrying failed sync operations");
            self.process_queue().await;
        }
        count
    }

    /// Record reachability; an unreachable → reachable edge triggers a drain.
    pub fn set_reachable(self: &Arc<Self>, reachable: bool) {
        let was = self.reachable.swap(reachable, Ordering::AcqRel);
        if !was && reachable {
            info!("Network reachable, draining sync queue");
            self.schedule_drain(Duration::ZERO);
        } else if was && !reachable {
            debug!("Network unreachable");
        }
    }

    /// Follow a reachability channel until it closes or the queue drops.
    pub fn watch_reachability(self: &Arc<Self>, mut rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let initial = *rx.borrow_and_update();
        self.set_reachable(initial);
        let queue = Arc::downgrade(self);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let reachable = *rx.borrow_and_update();
                let Some(queue) = queue.upgrade() else {
                    break;
                };
                queue.set_reachable(reachable);
            }
        })
    }

    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn operations(&self) -> Vec<SyncOperation> {
        self.state.lock().ops.clone()
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats::from_ops(&self.state.lock().ops)
    }

    /// Backoff deadline of a pending operation.
    #[must_use]
    pub fn retry_deadline(&self, id: &str) -> Option<Instant> {
        self.state.lock().not_before.get(id).copied()
    }

    fn schedule_drain(self: &Arc<Self>, delay: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime, queue drain not scheduled");
            return;
        };
        let queue = Arc::downgrade(self);
        handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(queue) = queue.upgrade() {
                queue.process_queue().await;
            }
        });
    }

    fn persist(&self, state: &QueueState) {
        let Some(account) = &state.account else {
            return;
        };
        let key = Namespace::Account(account.clone()).scoped_key(QUEUE_KEY);
        if let Err(e) = set_json(self.local.as_ref(), &key, &state.ops) {
            warn!(account = %account, error = %e, "Failed to persist sync queue");
        }
        let stats = QueueStats::from_ops(&state.ops);
        metrics::set_queue_depth("pending", stats.pending);
        metrics::set_queue_depth("syncing", stats.syncing);
        metrics::set_queue_depth("completed", stats.completed);
        metrics::set_queue_depth("failed", stats.failed);
    }
}

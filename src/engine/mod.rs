// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-domain sync engines.
//!
//! Each engine owns pull-from-remote, push-to-remote and a change observer
//! for one [`Domain`]. The shared machinery lives in [`EngineCore`]:
//!
//! ```text
//! Stopped ──start(account)──► Running ──stop()──► Stopped
//!
//! Running:   Idle ──► Pulling ──► Idle
//!                 └─► Pushing ──► Idle
//! ```
//!
//! Pull and push are serialized by an async mutex, so entering a phase
//! from anything but `Idle` is a bug: it trips a debug assertion and is
//! reported as [`SyncError::IllegalTransition`] in release builds.
//!
//! A push that fails against the remote is handed to the [`SyncQueue`]
//! instead of being lost. While the queue still holds unfinished operations
//! for a domain, new pushes of that domain are queued behind them so writes
//! reach the remote in order. Identical consecutive payloads are written
//! once; a pull resets that check.

pub mod executor;
mod observer;
pub mod presets;
pub mod sessions;
pub mod settings;
pub mod tasks;

pub use executor::RemoteExecutor;
pub use presets::PresetsEngine;
pub use sessions::SessionsEngine;
pub use settings::SettingsEngine;
pub use tasks::TasksEngine;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{broadcast, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::identity::AccountId;
use crate::metrics;
use crate::model::Domain;
use crate::remote::{RemoteError, RemoteStore};
use crate::resilience::{OperationKind, SyncQueue};
use crate::storage::StorageError;
use crate::store::ChangeEvent;
use crate::timestamps::TimestampTracker;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Payload encoding failed: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Engine is not running")]
    NotRunning,
    #[error("Not signed in")]
    NotSignedIn,
    #[error("Illegal engine phase transition {from} -> {to}")]
    IllegalTransition { from: EnginePhase, to: EnginePhase },
}

impl SyncError {
    /// Connectivity failures, as opposed to rejected or malformed data.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Remote(e) if e.is_network())
    }
}

/// Activity phase of a running engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    /// Fetching and applying remote state; local writes are remote-origin
    Pulling,
    Pushing,
}

impl std::fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Pulling => write!(f, "Pulling"),
            Self::Pushing => write!(f, "Pushing"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Remote rows were read and merged. `local_ahead` means some local
    /// state is newer than the remote and still needs a push.
    Applied { rows: usize, local_ahead: bool },
    /// Pull deliberately skipped to protect local data
    Guarded,
    /// Engine was already running for the account; nothing was pulled
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// Same payload as the last push
    Unchanged,
    /// Direct write failed; the payload is on the sync queue
    Queued(RemoteError),
    /// Queued behind earlier operations of the same domain
    Deferred,
    /// Nothing to send
    Skipped,
}

impl PushOutcome {
    /// The change left the engine, directly or via the queue.
    #[must_use]
    pub fn handed_off(&self) -> bool {
        matches!(self, Self::Pushed | Self::Queued(_) | Self::Deferred)
    }
}

/// When anything was last pushed, shared by every engine and the
/// coordinator's cooldown checks.
#[derive(Debug, Default)]
pub struct PushClock {
    last: Mutex<Option<Instant>>,
}

impl PushClock {
    pub fn mark(&self) {
        *self.last.lock() = Some(Instant::now());
    }

    #[must_use]
    pub fn since_last_push(&self) -> Option<Duration> {
        self.last.lock().map(|at| at.elapsed())
    }

    /// True when a push happened less than `window` ago.
    #[must_use]
    pub fn within(&self, window: Duration) -> bool {
        self.since_last_push().is_some_and(|elapsed| elapsed < window)
    }
}

/// SHA-256 of a payload's canonical JSON encoding.
#[must_use]
pub fn fingerprint(payload: &Value) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Collaborators every engine needs.
#[derive(Clone)]
pub struct EngineContext {
    pub remote: Arc<dyn RemoteStore>,
    pub queue: Arc<SyncQueue>,
    pub timestamps: Arc<TimestampTracker>,
    pub clock: Arc<PushClock>,
}

/// Returns the phase to `Idle` on drop.
pub struct PhaseGuard<'a> {
    core: &'a EngineCore,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.core.phase.lock() = EnginePhase::Idle;
    }
}

/// Run state, phase machine, dirty flag and push fingerprint of one engine.
pub struct EngineCore {
    domain: Domain,
    debounce: Option<Duration>,
    clock: Arc<PushClock>,
    running: AtomicBool,
    account: RwLock<Option<AccountId>>,
    phase: Mutex<EnginePhase>,
    exclusive: tokio::sync::Mutex<()>,
    dirty: AtomicBool,
    /// Highest local revision already picked up for pushing
    observed: AtomicU64,
    last_fingerprint: Mutex<Option<String>>,
    observer: Mutex<Option<JoinHandle<()>>>,
}

impl EngineCore {
    pub fn new(domain: Domain, debounce: Option<Duration>, clock: Arc<PushClock>) -> Self {
        Self {
            domain,
            debounce,
            clock,
            running: AtomicBool::new(false),
            account: RwLock::new(None),
            phase: Mutex::new(EnginePhase::Idle),
            exclusive: tokio::sync::Mutex::new(()),
            dirty: AtomicBool::new(false),
            observed: AtomicU64::new(0),
            last_fingerprint: Mutex::new(None),
            observer: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn domain(&self) -> Domain {
        self.domain
    }

    #[must_use]
    pub fn debounce(&self) -> Option<Duration> {
        self.debounce
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Account the engine is running for.
    pub fn account(&self) -> Result<AccountId, SyncError> {
        if !self.is_running() {
            return Err(SyncError::NotRunning);
        }
        self.account.read().clone().ok_or(SyncError::NotRunning)
    }

    #[must_use]
    pub fn phase(&self) -> EnginePhase {
        *self.phase.lock()
    }

    /// True while pulled state is being written locally.
    #[must_use]
    pub fn is_applying_remote(&self) -> bool {
        self.phase() == EnginePhase::Pulling
    }

    /// Serializes pull and push within the engine.
    pub async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.exclusive.lock().await
    }

    /// Move from `Idle` to `to` until the guard drops.
    pub fn enter(&self, to: EnginePhase) -> Result<PhaseGuard<'_>, SyncError> {
        let mut phase = self.phase.lock();
        debug_assert!(*phase == EnginePhase::Idle, "illegal phase transition {} -> {}", *phase, to);
        if *phase != EnginePhase::Idle || to == EnginePhase::Idle {
            return Err(SyncError::IllegalTransition { from: *phase, to });
        }
        *phase = to;
        Ok(PhaseGuard { core: self })
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Record that local edits up to `revision` have been picked up.
    /// Returns false if they already were.
    pub fn observe(&self, revision: u64) -> bool {
        self.observed.fetch_max(revision, Ordering::AcqRel) < revision
    }

    #[must_use]
    pub fn observed_revision(&self) -> u64 {
        self.observed.load(Ordering::Acquire)
    }

    /// Write `payload` with `write`, falling back to the sync queue.
    ///
    /// A payload identical to the last one handed off is not written again.
    /// When the queue still holds unfinished operations of this domain the
    /// payload is queued after them instead of written.
    pub async fn push_with_fallback<W>(
        &self,
        queue: &Arc<SyncQueue>,
        kind: OperationKind,
        payload: Value,
        write: W,
    ) -> Result<PushOutcome, SyncError>
    where
        W: Future<Output = Result<(), RemoteError>> + Send,
    {
        let domain = self.domain.as_str();
        let print = fingerprint(&payload);
        if self.last_fingerprint.lock().as_deref() == Some(print.as_str()) {
            self.dirty.store(false, Ordering::Release);
            metrics::record_sync(domain, "push", "unchanged");
            debug!(domain, "Payload unchanged since last push");
            return Ok(PushOutcome::Unchanged);
        }

        let outcome = if queue.has_unfinished(self.domain) {
            debug!(domain, "Earlier operations still queued, queueing behind them");
            metrics::record_sync(domain, "push", "queued");
            queue.enqueue(self.domain, kind, payload);
            PushOutcome::Deferred
        } else {
            let _timer = metrics::LatencyTimer::new(domain, "push");
            match write.await {
                Ok(()) => {
                    self.clock.mark();
                    metrics::record_sync(domain, "push", "ok");
                    debug!(domain, "Pushed to remote");
                    PushOutcome::Pushed
                }
                Err(e) => {
                    warn!(domain, error = %e, "Push failed, queueing for retry");
                    metrics::record_sync(domain, "push", "queued");
                    metrics::record_queue_fallback(domain);
                    queue.enqueue(self.domain, kind, payload);
                    PushOutcome::Queued(e)
                }
            }
        };
        *self.last_fingerprint.lock() = Some(print);
        self.dirty.store(false, Ordering::Release);
        Ok(outcome)
    }

    /// Record a finished pull. The remote may no longer hold the last
    /// pushed payload, so a successful pull forgets its fingerprint.
    pub fn finish_pull(&self, result: &Result<PullOutcome, SyncError>) {
        let outcome = if result.is_ok() {
            *self.last_fingerprint.lock() = None;
            "ok"
        } else {
            "error"
        };
        metrics::record_sync(self.domain.as_str(), "pull", outcome);
    }

    fn activate(&self, account: AccountId) {
        *self.account.write() = Some(account);
        self.running.store(true, Ordering::Release);
    }

    /// Stop running, cancel the observer, drop caches. Returns whether the
    /// engine was running.
    fn deactivate(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        if let Some(handle) = self.observer.lock().take() {
            handle.abort();
        }
        *self.account.write() = None;
        *self.last_fingerprint.lock() = None;
        self.dirty.store(false, Ordering::Release);
        was_running
    }

    fn is_running_for(&self, account: &AccountId) -> bool {
        self.is_running() && self.account.read().as_ref() == Some(account)
    }
}

/// Domain-specific half of an engine.
#[async_trait]
pub trait DomainEngine: Send + Sync + 'static {
    fn core(&self) -> &EngineCore;

    /// Change events of the domain store this engine syncs.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;

    /// Revision of the store's latest local edit.
    fn local_revision(&self) -> u64;

    /// Fetch this account's rows and merge them into local state.
    async fn pull_from_remote(&self) -> Result<PullOutcome, SyncError>;

    /// Send local state to the remote, queueing it on failure.
    async fn push_to_remote(&self) -> Result<PushOutcome, SyncError>;

    /// Runs once per start, after the initial pull.
    async fn after_initial_pull(&self) -> Result<(), SyncError> {
        Ok(())
    }

    /// Drop engine-local caches such as synced-id sets.
    fn clear_caches(&self);

    fn domain(&self) -> Domain {
        self.core().domain()
    }
}

impl dyn DomainEngine {
    /// Pull once, then observe local changes. Idempotent while running for
    /// the same account; running for another account restarts the engine.
    #[tracing::instrument(skip(self), fields(domain = %self.domain()))]
    pub async fn start(self: Arc<Self>, account: AccountId) -> Result<PullOutcome, SyncError> {
        let core = self.core();
        if core.is_running_for(&account) {
            debug!("Engine already running");
            return Ok(PullOutcome::AlreadyRunning);
        }
        if core.is_running() {
            self.stop();
        }

        // Subscribe before pulling so edits made meanwhile are observed
        let events = self.subscribe();
        core.observe(self.local_revision());
        core.activate(account.clone());
        info!(account = %account, "Engine started");

        let pulled = self.pull_from_remote().await;
        if let Err(e) = &pulled {
            warn!(error = %e, "Initial pull failed");
        }
        if let Err(e) = self.after_initial_pull().await {
            warn!(error = %e, "Post-pull step failed");
        }
        if core.is_running() && core.is_dirty() {
            if let Err(e) = self.push_to_remote().await {
                warn!(error = %e, "Push of local-ahead state failed");
            }
        }

        if core.is_running_for(&account) {
            let handle = observer::spawn(Arc::clone(&self), events);
            if let Some(previous) = core.observer.lock().replace(handle) {
                previous.abort();
            }
        }
        pulled
    }

    /// Stop observing and clear caches. No-op when stopped.
    pub fn stop(&self) {
        if !self.core().deactivate() {
            return;
        }
        self.clear_caches();
        info!(domain = %self.domain(), "Engine stopped");
    }

    /// Push now if a debounced change is waiting, including edits the
    /// observer has not received yet.
    pub async fn flush_pending(&self) -> Result<PushOutcome, SyncError> {
        let core = self.core();
        let unobserved = core.observe(self.local_revision());
        if !core.is_running() || !(unobserved || core.is_dirty()) {
            return Ok(PushOutcome::Skipped);
        }
        debug!(domain = %self.domain(), "Flushing pending change");
        self.push_to_remote().await
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.core().is_running()
    }
}

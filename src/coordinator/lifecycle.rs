// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Coordinator lifecycle: identity transitions, initial sync, periodic loop,
//! shutdown.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::identity::{AccountId, IdentityState};
use crate::metrics;
use crate::timestamps::now_millis;

use super::{SyncCoordinator, SyncFailure, SyncNotification, SyncReport};

impl SyncCoordinator {
    /// Follow the identity stream until it closes, then shut down.
    #[tracing::instrument(skip_all)]
    pub async fn run(self: Arc<Self>, mut identity: watch::Receiver<IdentityState>) {
        let initial = identity.borrow_and_update().clone();
        self.handle_identity(initial).await;

        while identity.changed().await.is_ok() {
            let next = identity.borrow_and_update().clone();
            self.handle_identity(next).await;
        }
        info!("Identity stream closed");
        self.shutdown().await;
    }

    /// Apply one identity transition.
    ///
    /// Returns the initial sync report when this started sync for an account.
    #[tracing::instrument(skip_all, fields(identity = %identity))]
    pub async fn handle_identity(self: &Arc<Self>, identity: IdentityState) -> Option<SyncReport> {
        let _transition = self.transition.lock().await;
        match identity {
            IdentityState::SignedIn(ref account) => {
                if self.active_account().as_ref() == Some(account) {
                    debug!("Already running for account");
                    return None;
                }
                if self.is_running() {
                    self.stop_all();
                }
                self.resolver.resolve(&identity).await;
                Some(self.start_for(account.clone()).await)
            }
            IdentityState::Guest | IdentityState::SignedOut => {
                self.stop_all();
                self.resolver.resolve(&identity).await;
                None
            }
            IdentityState::Unknown => {
                if self.is_running() {
                    debug!("Identity unknown while signed in, keeping current account");
                } else {
                    self.resolver.resolve(&identity).await;
                }
                None
            }
        }
    }

    async fn start_for(self: &Arc<Self>, account: AccountId) -> SyncReport {
        info!(account = %account, "Starting sync");
        self.queue.activate(&account);
        *self.account.write() = Some(account.clone());
        self.status.send_modify(|status| {
            status.running = true;
            status.account = Some(account.clone());
            status.last_error = None;
            status.last_synced_at = None;
        });
        metrics::set_coordinator_running(true);
        self.start_periodic();

        let report = self.initial_sync(&account).await;
        let drained = self.queue.process_queue().await;
        debug!(completed = drained.completed, retried = drained.retried, "Post-sync queue drain");
        report
    }

    /// Start each engine in order. A failing stage is recorded and the next
    /// one still runs.
    async fn initial_sync(&self, account: &AccountId) -> SyncReport {
        self.begin_round();
        let mut report = SyncReport::new(account.clone());
        for engine in &self.engines {
            let domain = engine.domain();
            info!(domain = %domain, "Initial sync stage");
            match Arc::clone(engine).start(account.clone()).await {
                Ok(outcome) => {
                    self.announce_pull(domain, outcome);
                    report.pulled.push((domain, outcome));
                }
                Err(e) => {
                    warn!(domain = %domain, error = %e, "Initial sync stage failed");
                    report.failures.push(SyncFailure::from_error(domain, &e, now_millis()));
                }
            }
            if self.active_account().as_ref() != Some(account) {
                debug!("Account changed during initial sync, stopping");
                break;
            }
        }
        self.finish_round(&report);
        info!(
            account = %account,
            failures = report.failures.len(),
            "Initial sync finished"
        );
        self.notify(SyncNotification::InitialSyncCompleted {
            account: account.clone(),
            failures: report.failures.len(),
        });
        report
    }

    /// Stop the loop, the engines and the queue. No-op when stopped.
    pub(super) fn stop_all(&self) {
        if let Some(handle) = self.periodic.lock().take() {
            handle.abort();
        }
        let previous = self.account.write().take();
        for engine in &self.engines {
            engine.stop();
        }
        self.queue.deactivate();
        self.status.send_modify(|status| {
            status.running = false;
            status.account = None;
            status.syncing = false;
        });
        metrics::set_coordinator_running(false);
        if let Some(account) = previous {
            info!(account = %account, "Sync stopped");
        }
    }

    fn start_periodic(self: &Arc<Self>) {
        let period = self.config.periodic_interval();
        let coordinator = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                coordinator.periodic_pull().await;
            }
        });
        if let Some(previous) = self.periodic.lock().replace(handle) {
            previous.abort();
        }
        debug!(interval_secs = period.as_secs(), "Periodic sync loop started");
    }

    /// Push what is pending within the configured bound, then stop.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(self: &Arc<Self>) {
        info!("Sync coordinator shutting down");
        if self.is_running() {
            let timeout = self.config.force_push_timeout();
            if !self.force_push_all_pending_with_timeout(timeout).await {
                warn!("Final push did not finish, queue resumes on next start");
            }
        }
        let _transition = self.transition.lock().await;
        self.stop_all();
        info!("Sync coordinator shutdown complete");
    }
}

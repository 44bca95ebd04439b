// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Coordinator operations: cooldown-guarded pulls, force push, lifecycle
//! hooks and manual per-domain triggers.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{PullOutcome, SyncError};
use crate::identity::AccountId;
use crate::metrics;
use crate::model::Domain;
use crate::resilience::DrainReport;
use crate::timestamps::now_millis;

use super::{SyncCoordinator, SyncFailure, SyncNotification, SyncReport};

impl SyncCoordinator {
    /// Periodic reconciliation: pull every domain unless a push happened
    /// within the push cooldown.
    ///
    /// Returns `None` when stopped or inside the cooldown.
    pub async fn periodic_pull(&self) -> Option<SyncReport> {
        self.guarded_pull("periodic", self.config.push_cooldown()).await
    }

    /// Foreground variant of [`periodic_pull`](Self::periodic_pull) with
    /// the shorter foreground cooldown. Never pushes.
    #[tracing::instrument(skip(self))]
    pub async fn pull_from_remote(&self) -> Option<SyncReport> {
        self.guarded_pull("foreground", self.config.foreground_cooldown()).await
    }

    async fn guarded_pull(&self, caller: &'static str, window: Duration) -> Option<SyncReport> {
        let account = self.active_account()?;
        if self.clock.within(window) {
            metrics::record_cooldown_skip(caller);
            debug!(caller, window_secs = window.as_secs(), "Recent push, pull skipped");
            return None;
        }
        Some(self.pull_all(&account).await)
    }

    /// Pull every running engine in order. Failures are collected, not
    /// propagated.
    async fn pull_all(&self, account: &AccountId) -> SyncReport {
        self.begin_round();
        let mut report = SyncReport::new(account.clone());
        for engine in &self.engines {
            if !engine.is_running() {
                continue;
            }
            let domain = engine.domain();
            match engine.pull_from_remote().await {
                Ok(outcome) => {
                    self.announce_pull(domain, outcome);
                    report.pulled.push((domain, outcome));
                }
                Err(e) => {
                    warn!(domain = %domain, error = %e, "Pull failed");
                    report.failures.push(SyncFailure::from_error(domain, &e, now_millis()));
                }
            }
        }
        self.finish_round(&report);
        debug!(pulled = report.pulled.len(), failures = report.failures.len(), "Pull round finished");
        report
    }

    /// Push everything pending now: debounced changes bypass their timers,
    /// then the queue drains.
    ///
    /// Arms the push cooldown before any I/O so a concurrent periodic pull
    /// cannot read back stale remote state.
    #[tracing::instrument(skip(self))]
    pub async fn force_push_all_pending(&self) -> DrainReport {
        self.clock.mark();
        for engine in &self.engines {
            match engine.flush_pending().await {
                Ok(outcome) => debug!(domain = %engine.domain(), ?outcome, "Flushed"),
                Err(e) => {
                    warn!(domain = %engine.domain(), error = %e, "Flush failed");
                    self.record_failure(SyncFailure::from_error(engine.domain(), &e, now_millis()));
                }
            }
        }
        self.queue.process_queue().await
    }

    /// [`force_push_all_pending`](Self::force_push_all_pending) with a
    /// bounded wait. Returns false if the wait expired; the push keeps
    /// running in the background and whatever it could not hand off stays
    /// in the durable queue.
    pub async fn force_push_all_pending_with_timeout(self: &Arc<Self>, timeout: Duration) -> bool {
        let coordinator = Arc::clone(self);
        let task = tokio::spawn(async move { coordinator.force_push_all_pending().await });
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(report)) => {
                debug!(completed = report.completed, "Force push finished");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Force push task failed");
                false
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Force push abandoned after timeout");
                false
            }
        }
    }

    /// App moved to the background or is terminating.
    pub async fn on_background(self: &Arc<Self>) -> bool {
        info!("App backgrounded, pushing pending changes");
        self.force_push_all_pending_with_timeout(self.config.force_push_timeout()).await
    }

    /// App became active again.
    pub async fn on_foreground(&self) -> Option<SyncReport> {
        debug!("App foregrounded");
        self.pull_from_remote().await
    }

    pub async fn sync_settings(&self) -> Result<PullOutcome, SyncError> {
        self.sync_domain(Domain::Settings).await
    }

    pub async fn sync_presets(&self) -> Result<PullOutcome, SyncError> {
        self.sync_domain(Domain::Presets).await
    }

    pub async fn sync_sessions(&self) -> Result<PullOutcome, SyncError> {
        self.sync_domain(Domain::Sessions).await
    }

    pub async fn sync_tasks(&self) -> Result<PullOutcome, SyncError> {
        self.sync_domain(Domain::Tasks).await
    }

    /// Manual pull of one domain, without cooldown.
    #[tracing::instrument(skip(self))]
    pub async fn sync_domain(&self, domain: Domain) -> Result<PullOutcome, SyncError> {
        if !self.is_running() {
            return Err(SyncError::NotSignedIn);
        }
        let engine = self.engine(domain).ok_or(SyncError::NotRunning)?;
        match engine.pull_from_remote().await {
            Ok(outcome) => {
                self.announce_pull(domain, outcome);
                Ok(outcome)
            }
            Err(e) => {
                self.record_failure(SyncFailure::from_error(domain, &e, now_millis()));
                Err(e)
            }
        }
    }

    /// Reset failed queue operations and drain again.
    pub async fn retry_failed(&self) -> usize {
        self.queue.retry_failed().await
    }

    pub(super) fn begin_round(&self) {
        self.status.send_modify(|status| status.syncing = true);
    }

    pub(super) fn finish_round(&self, report: &SyncReport) {
        let at = now_millis();
        self.status.send_modify(|status| {
            status.syncing = false;
            match report.failures.last() {
                Some(failure) => status.last_error = Some(failure.clone()),
                None => {
                    status.last_error = None;
                    status.last_synced_at = Some(at);
                }
            }
        });
    }

    pub(super) fn record_failure(&self, failure: SyncFailure) {
        self.status.send_modify(|status| status.last_error = Some(failure));
    }

    pub(super) fn announce_pull(&self, domain: Domain, outcome: PullOutcome) {
        let PullOutcome::Applied { rows, .. } = outcome else {
            return;
        };
        if rows == 0 {
            return;
        }
        self.notify(SyncNotification::RemoteApplied(domain));
        if domain == Domain::Settings {
            self.notify(SyncNotification::RescheduleReminders);
        }
    }
}

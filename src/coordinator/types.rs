// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync coordinator.

use crate::engine::{PullOutcome, SyncError};
use crate::identity::AccountId;
use crate::model::Domain;

/// A failed pull or push, as remembered by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub domain: Domain,
    pub message: String,
    /// Transient connectivity problem rather than a rejected request
    pub network: bool,
    /// Unix millis
    pub at: i64,
}

impl SyncFailure {
    pub fn from_error(domain: Domain, error: &SyncError, at: i64) -> Self {
        Self {
            domain,
            message: error.to_string(),
            network: error.is_network(),
            at,
        }
    }
}

impl std::fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.domain, self.message)
    }
}

/// Snapshot of the coordinator for status displays.
///
/// Published on a `watch` channel; see
/// [`super::SyncCoordinator::status_receiver()`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// Signed in with engines started
    pub running: bool,
    pub account: Option<AccountId>,
    /// A pull round is in progress
    pub syncing: bool,
    /// Unix millis of the last round that finished without failures
    pub last_synced_at: Option<i64>,
    /// Most recent failure; cleared by the next clean round
    pub last_error: Option<SyncFailure>,
}

impl SyncStatus {
    /// Human-readable status line relative to `now` (Unix millis).
    ///
    /// Network failures never expose raw error text.
    #[must_use]
    pub fn message_at(&self, now: i64) -> String {
        if self.syncing {
            return "Syncing…".to_string();
        }
        if let Some(failure) = &self.last_error {
            if failure.network {
                return "Offline – changes will sync when connected".to_string();
            }
            return format!("Sync error: {}", failure.message);
        }
        match self.last_synced_at {
            Some(at) => format!("Last synced {}", relative_time(now - at)),
            None => "Not synced".to_string(),
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        self.message_at(crate::timestamps::now_millis())
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

fn relative_time(elapsed_ms: i64) -> String {
    let secs = elapsed_ms.max(0) / 1000;
    match secs {
        0..=59 => "just now".to_string(),
        60..=3_599 => format!("{} min ago", secs / 60),
        3_600..=86_399 => format!("{} h ago", secs / 3_600),
        _ => format!("{} d ago", secs / 86_400),
    }
}

/// Fire-and-forget side effects for the host app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotification {
    /// Remote data was written into a domain store; refresh widgets
    RemoteApplied(Domain),
    /// Settings changed from remote; reminder schedules may be stale
    RescheduleReminders,
    /// The ordered first sync for an account finished
    InitialSyncCompleted { account: AccountId, failures: usize },
}

/// Result of one pull round across the domains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub account: AccountId,
    pub pulled: Vec<(Domain, PullOutcome)>,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub(super) fn new(account: AccountId) -> Self {
        Self {
            account,
            pulled: Vec::new(),
            failures: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Outcome for `domain`, if its pull succeeded.
    #[must_use]
    pub fn outcome(&self, domain: Domain) -> Option<PullOutcome> {
        self.pulled.iter().find(|(d, _)| *d == domain).map(|(_, o)| *o)
    }
}

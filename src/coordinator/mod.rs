// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync coordinator.
//!
//! The [`SyncCoordinator`] ties the namespace resolver, the four domain
//! engines and the durable queue to the identity stream:
//!
//! ```text
//!                 ┌─ SignedIn(id) ─► resolve ─► queue.activate ─► periodic loop
//! identity ───────┤                    └─► Settings → Presets → Sessions → Tasks ─► drain
//!                 ├─ Guest/SignedOut ─► stop loop ─► stop engines ─► queue.deactivate ─► resolve
//!                 └─ Unknown ─► resolve
//! ```
//!
//! Pulls issued by the periodic loop and by foreground activation are
//! skipped for a short window after any push, so a value the app just wrote
//! is never pulled back while the remote may still be serving the old one.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use focus_sync::{IdentityState, SyncConfig, SyncServices};
//! use focus_sync::remote::InMemoryRemote;
//! use focus_sync::storage::InMemoryLocalStore;
//! use tokio::sync::watch;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let services = SyncServices::new(
//!     SyncConfig::default(),
//!     Arc::new(InMemoryLocalStore::new()),
//!     Arc::new(InMemoryRemote::new()),
//! );
//! let (_identity_tx, identity_rx) = watch::channel(IdentityState::Unknown);
//! let coordinator = services.coordinator.clone();
//! tokio::spawn(async move { coordinator.run(identity_rx).await });
//! # }
//! ```

mod types;
mod api;
mod lifecycle;

pub use types::{SyncFailure, SyncNotification, SyncReport, SyncStatus};

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::engine::{DomainEngine, PushClock};
use crate::identity::AccountId;
use crate::model::Domain;
use crate::namespace::NamespaceResolver;
use crate::resilience::SyncQueue;

const NOTIFICATION_CAPACITY: usize = 32;

/// Top-level orchestrator of the sync layer.
///
/// Shared as `Arc<SyncCoordinator>`; methods that spawn background work
/// take `self: &Arc<Self>`.
pub struct SyncCoordinator {
    pub(super) config: SyncConfig,

    /// One engine per domain, in initial-sync order
    pub(super) engines: Vec<Arc<dyn DomainEngine>>,

    pub(super) queue: Arc<SyncQueue>,

    pub(super) resolver: Arc<NamespaceResolver>,

    /// Last push time, shared with the engines
    pub(super) clock: Arc<PushClock>,

    /// Account the engines are running for
    pub(super) account: RwLock<Option<AccountId>>,

    /// Status snapshot (broadcast to watchers)
    pub(super) status: watch::Sender<SyncStatus>,

    pub(super) notifications: broadcast::Sender<SyncNotification>,

    /// Background reconciliation task
    pub(super) periodic: Mutex<Option<JoinHandle<()>>>,

    /// Serializes identity transitions
    pub(super) transition: tokio::sync::Mutex<()>,
}

impl SyncCoordinator {
    /// Create a stopped coordinator. `engines` must hold exactly one
    /// engine per domain; they are ordered by [`Domain::ALL`].
    pub fn new(
        config: SyncConfig,
        mut engines: Vec<Arc<dyn DomainEngine>>,
        queue: Arc<SyncQueue>,
        resolver: Arc<NamespaceResolver>,
        clock: Arc<PushClock>,
    ) -> Self {
        engines.sort_by_key(|engine| Domain::ALL.iter().position(|d| *d == engine.domain()));
        let (status, _) = watch::channel(SyncStatus::default());
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            config,
            engines,
            queue,
            resolver,
            clock,
            account: RwLock::new(None),
            status,
            notifications,
            periodic: Mutex::new(None),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    /// Running for a signed-in account.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.account.read().is_some()
    }

    #[must_use]
    pub fn active_account(&self) -> Option<AccountId> {
        self.account.read().clone()
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    #[must_use]
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<SyncNotification> {
        self.notifications.subscribe()
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    #[must_use]
    pub fn engine(&self, domain: Domain) -> Option<&Arc<dyn DomainEngine>> {
        self.engines.iter().find(|engine| engine.domain() == domain)
    }

    pub(super) fn notify(&self, notification: SyncNotification) {
        // Nobody listening is fine
        let _ = self.notifications.send(notification);
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self.periodic.lock().take() {
            handle.abort();
        }
    }
}

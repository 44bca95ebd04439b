// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The service graph, built once at process start.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::SyncConfig;
use crate::coordinator::SyncCoordinator;
use crate::engine::{
    DomainEngine, EngineContext, PresetsEngine, PushClock, RemoteExecutor, SessionsEngine, SettingsEngine,
    TasksEngine,
};
use crate::identity::IdentityState;
use crate::namespace::NamespaceResolver;
use crate::remote::RemoteStore;
use crate::resilience::{BackoffSchedule, SyncQueue};
use crate::storage::traits::LocalStore;
use crate::store::DomainStores;
use crate::timestamps::TimestampTracker;

/// Every component of the sync layer, wired together.
///
/// The host app reads and edits domain state through [`stores`](Self::stores)
/// and drives sync through [`coordinator`](Self::coordinator).
pub struct SyncServices {
    pub config: SyncConfig,
    pub local: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub timestamps: Arc<TimestampTracker>,
    pub stores: DomainStores,
    pub queue: Arc<SyncQueue>,
    pub settings: Arc<SettingsEngine>,
    pub presets: Arc<PresetsEngine>,
    pub sessions: Arc<SessionsEngine>,
    pub tasks: Arc<TasksEngine>,
    pub resolver: Arc<NamespaceResolver>,
    pub coordinator: Arc<SyncCoordinator>,
}

impl SyncServices {
    pub fn new(config: SyncConfig, local: Arc<dyn LocalStore>, remote: Arc<dyn RemoteStore>) -> Self {
        let schedule = BackoffSchedule::from_config(&config);
        Self::with_schedule(config, local, remote, schedule)
    }

    /// Like [`new`](Self::new) with an explicit queue backoff schedule.
    pub fn with_schedule(
        config: SyncConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        schedule: BackoffSchedule,
    ) -> Self {
        let timestamps = Arc::new(TimestampTracker::new(local.clone()));
        let stores = DomainStores::new(local.clone(), timestamps.clone(), config.change_channel_capacity);

        let executor = Arc::new(RemoteExecutor::new(remote.clone()));
        let queue = Arc::new(SyncQueue::with_schedule(local.clone(), executor, &config, schedule));

        let ctx = EngineContext {
            remote: remote.clone(),
            queue: queue.clone(),
            timestamps: timestamps.clone(),
            clock: Arc::new(PushClock::default()),
        };
        let settings = Arc::new(SettingsEngine::new(stores.settings.clone(), &ctx, &config));
        let presets = Arc::new(PresetsEngine::new(stores.presets.clone(), &ctx, &config));
        let sessions = Arc::new(SessionsEngine::new(stores.sessions.clone(), &ctx, &config));
        let tasks = Arc::new(TasksEngine::new(stores.tasks.clone(), &ctx, &config));
        let engines: Vec<Arc<dyn DomainEngine>> = vec![
            settings.clone(),
            presets.clone(),
            sessions.clone(),
            tasks.clone(),
        ];

        let resolver = Arc::new(NamespaceResolver::new(
            local.clone(),
            remote.clone(),
            stores.clone(),
            timestamps.clone(),
        ));
        let coordinator = Arc::new(SyncCoordinator::new(
            config.clone(),
            engines,
            queue.clone(),
            resolver.clone(),
            ctx.clock.clone(),
        ));

        Self {
            config,
            local,
            remote,
            timestamps,
            stores,
            queue,
            settings,
            presets,
            sessions,
            tasks,
            resolver,
            coordinator,
        }
    }

    /// Spawn the identity and reachability followers.
    ///
    /// The returned handles finish when their channels close.
    pub fn spawn(
        &self,
        identity: watch::Receiver<IdentityState>,
        reachability: watch::Receiver<bool>,
    ) -> (JoinHandle<()>, JoinHandle<()>) {
        info!("Starting sync services");
        let reachability = self.queue.watch_reachability(reachability);
        let coordinator = self.coordinator.clone();
        let identity = tokio::spawn(async move { coordinator.run(identity).await });
        (identity, reachability)
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Settings: one row per account, merged field by field.
//!
//! A remote field overwrites the local one unless the local timestamp for
//! that field is newer than the row's `updated_at`. Fields missing from the
//! remote row never touch local state.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::identity::{AccountId, Namespace};
use crate::metrics::LatencyTimer;
use crate::model::{Domain, Settings, SettingsDto};
use crate::remote::{decode_rows, tables, Filter, RemoteError, RemoteStore};
use crate::resilience::{OperationKind, SyncQueue};
use crate::store::{ChangeEvent, DomainStore};
use crate::timestamps::TimestampTracker;

use super::{DomainEngine, EngineContext, EngineCore, EnginePhase, PullOutcome, PushOutcome, SyncError};

/// Upsert a settings row. Shared by direct pushes and the queue.
pub(crate) async fn write_payload(remote: &dyn RemoteStore, payload: Value) -> Result<(), RemoteError> {
    remote.upsert(tables::SETTINGS, vec![payload], &["account_id"]).await
}

pub struct SettingsEngine {
    core: EngineCore,
    store: Arc<DomainStore<Settings>>,
    remote: Arc<dyn RemoteStore>,
    queue: Arc<SyncQueue>,
    timestamps: Arc<TimestampTracker>,
}

impl SettingsEngine {
    pub fn new(store: Arc<DomainStore<Settings>>, ctx: &EngineContext, config: &SyncConfig) -> Self {
        Self {
            core: EngineCore::new(Domain::Settings, config.debounce_for(Domain::Settings), ctx.clock.clone()),
            store,
            remote: ctx.remote.clone(),
            queue: ctx.queue.clone(),
            timestamps: ctx.timestamps.clone(),
        }
    }

    async fn pull(&self, account: &AccountId) -> Result<PullOutcome, SyncError> {
        let rows = self
            .remote
            .select(tables::SETTINGS, &Filter::eq("account_id", account.as_str()), None)
            .await?;
        let Some(dto) = decode_rows::<SettingsDto>(tables::SETTINGS, rows)?.into_iter().next() else {
            // First sign-in on this account: upload anything customized locally
            let customized = self.store.read(|s| *s != Settings::default());
            debug!(account = %account, customized, "No remote settings row");
            if customized {
                self.core.mark_dirty();
            }
            return Ok(PullOutcome::Applied { rows: 0, local_ahead: customized });
        };

        let namespace = Namespace::Account(account.clone());
        let report = self.store.apply_remote(|settings| {
            dto.merge_into(settings, |field| {
                self.timestamps.is_local_newer(field, &namespace, dto.updated_at)
            })
        });
        if report.local_ahead() {
            info!(fields = ?report.kept_local, "Local settings newer than remote");
            self.core.mark_dirty();
        } else if !report.applied.is_empty() {
            debug!(fields = ?report.applied, "Applied remote settings");
        }
        Ok(PullOutcome::Applied { rows: 1, local_ahead: report.local_ahead() })
    }
}

#[async_trait]
impl DomainEngine for SettingsEngine {
    fn core(&self) -> &EngineCore {
        &self.core
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.store.subscribe()
    }

    fn local_revision(&self) -> u64 {
        self.store.local_revision()
    }

    #[tracing::instrument(skip(self), fields(domain = "settings"))]
    async fn pull_from_remote(&self) -> Result<PullOutcome, SyncError> {
        let account = self.core.account()?;
        let _lock = self.core.exclusive().await;
        let _phase = self.core.enter(EnginePhase::Pulling)?;
        let _timer = LatencyTimer::new("settings", "pull");
        let result = self.pull(&account).await;
        self.core.finish_pull(&result);
        result
    }

    #[tracing::instrument(skip(self), fields(domain = "settings"))]
    async fn push_to_remote(&self) -> Result<PushOutcome, SyncError> {
        let account = self.core.account()?;
        let _lock = self.core.exclusive().await;
        let _phase = self.core.enter(EnginePhase::Pushing)?;
        let payload = serde_json::to_value(self.store.read(|s| s.to_dto(&account)))?;
        let write = write_payload(self.remote.as_ref(), payload.clone());
        self.core
            .push_with_fallback(&self.queue, OperationKind::Update, payload, write)
            .await
    }

    fn clear_caches(&self) {}
}

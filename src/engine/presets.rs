// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Presets: remote wins, with a data-loss guard.
//!
//! A fresh account's remote holds nothing but the system defaults. If the
//! device meanwhile has custom presets, replacing local state with the
//! remote would silently drop them, so that pull is skipped and the local
//! library is uploaded instead.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::identity::AccountId;
use crate::metrics::{self, LatencyTimer};
use crate::model::{Domain, PresetDto, PresetLibrary};
use crate::remote::{decode_rows, encode_rows, tables, Filter, Order, RemoteError, RemoteStore};
use crate::resilience::{OperationKind, SyncQueue};
use crate::store::{ChangeEvent, DomainStore};

use super::{DomainEngine, EngineContext, EngineCore, EnginePhase, PullOutcome, PushOutcome, SyncError};

/// Full preset list plus ids to delete remotely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PresetPayload {
    #[serde(default)]
    pub presets: Vec<PresetDto>,
    #[serde(default)]
    pub deleted_ids: Vec<String>,
}

pub(crate) async fn write_payload(
    remote: &dyn RemoteStore,
    account: &AccountId,
    payload: PresetPayload,
) -> Result<(), RemoteError> {
    if !payload.presets.is_empty() {
        let rows = encode_rows(tables::PRESETS, &payload.presets)?;
        remote.upsert(tables::PRESETS, rows, &["account_id", "id"]).await?;
    }
    for id in &payload.deleted_ids {
        let filter = Filter::eq("account_id", account.as_str()).and_eq("id", id.as_str());
        remote.delete(tables::PRESETS, &filter).await?;
    }
    Ok(())
}

pub struct PresetsEngine {
    core: EngineCore,
    store: Arc<DomainStore<PresetLibrary>>,
    remote: Arc<dyn RemoteStore>,
    queue: Arc<SyncQueue>,
    /// Ids confirmed present remotely
    synced_ids: Mutex<BTreeSet<String>>,
}

impl PresetsEngine {
    pub fn new(store: Arc<DomainStore<PresetLibrary>>, ctx: &EngineContext, config: &SyncConfig) -> Self {
        Self {
            core: EngineCore::new(Domain::Presets, config.debounce_for(Domain::Presets), ctx.clock.clone()),
            store,
            remote: ctx.remote.clone(),
            queue: ctx.queue.clone(),
            synced_ids: Mutex::new(BTreeSet::new()),
        }
    }

    #[must_use]
    pub fn synced_ids(&self) -> BTreeSet<String> {
        self.synced_ids.lock().clone()
    }

    async fn pull(&self, account: &AccountId) -> Result<PullOutcome, SyncError> {
        let rows = self
            .remote
            .select(
                tables::PRESETS,
                &Filter::eq("account_id", account.as_str()),
                Some(&Order::asc("created_at")),
            )
            .await?;
        let remote = decode_rows::<PresetDto>(tables::PRESETS, rows)?;
        if remote.is_empty() {
            debug!(account = %account, "No remote presets");
            return Ok(PullOutcome::Applied { rows: 0, local_ahead: false });
        }

        let remote_has_custom = remote.iter().any(|p| !p.is_default);
        if !remote_has_custom && self.store.read(PresetLibrary::has_custom) {
            warn!(
                account = %account,
                remote = remote.len(),
                "Remote has only default presets but local has custom ones, skipping pull"
            );
            metrics::record_preset_guard_skip();
            return Ok(PullOutcome::Guarded);
        }

        let count = remote.len();
        let remote_ids: BTreeSet<String> = remote.iter().map(|p| p.id.clone()).collect();
        let synced = self.synced_ids.lock().clone();
        let kept = self.store.apply_remote(|library| {
            // Local presets never seen remotely are still waiting for upload
            let unsynced: Vec<_> = library
                .presets
                .iter()
                .filter(|p| !remote_ids.contains(&p.id) && !synced.contains(&p.id))
                .cloned()
                .collect();
            let kept = unsynced.len();
            library.presets = remote.into_iter().map(PresetDto::into_local).collect();
            library.presets.extend(unsynced);
            kept
        });
        *self.synced_ids.lock() = remote_ids;

        if kept > 0 {
            self.core.mark_dirty();
        }
        debug!(rows = count, kept_local = kept, "Applied remote presets");
        Ok(PullOutcome::Applied { rows: count, local_ahead: kept > 0 })
    }
}

#[async_trait]
impl DomainEngine for PresetsEngine {
    fn core(&self) -> &EngineCore {
        &self.core
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.store.subscribe()
    }

    fn local_revision(&self) -> u64 {
        self.store.local_revision()
    }

    #[tracing::instrument(skip(self), fields(domain = "presets"))]
    async fn pull_from_remote(&self) -> Result<PullOutcome, SyncError> {
        let account = self.core.account()?;
        let _lock = self.core.exclusive().await;
        let _phase = self.core.enter(EnginePhase::Pulling)?;
        let _timer = LatencyTimer::new("presets", "pull");
        let result = self.pull(&account).await;
        self.core.finish_pull(&result);
        result
    }

    #[tracing::instrument(skip(self), fields(domain = "presets"))]
    async fn push_to_remote(&self) -> Result<PushOutcome, SyncError> {
        let account = self.core.account()?;
        let _lock = self.core.exclusive().await;
        let _phase = self.core.enter(EnginePhase::Pushing)?;

        let (presets, local_ids) = self.store.read(|library| {
            let presets: Vec<PresetDto> = library.presets.iter().map(|p| p.to_dto(&account)).collect();
            let ids: BTreeSet<String> = library.ids().map(str::to_string).collect();
            (presets, ids)
        });
        let deleted_ids: Vec<String> = self.synced_ids.lock().difference(&local_ids).cloned().collect();
        if !deleted_ids.is_empty() {
            debug!(count = deleted_ids.len(), "Presets deleted locally");
        }

        let payload = PresetPayload { presets, deleted_ids };
        let value = serde_json::to_value(&payload)?;
        let write = write_payload(self.remote.as_ref(), &account, payload);
        let outcome = self
            .core
            .push_with_fallback(&self.queue, OperationKind::Update, value, write)
            .await?;
        if outcome.handed_off() {
            *self.synced_ids.lock() = local_ids;
        }
        Ok(outcome)
    }

    /// Upload local presets the remote has never seen.
    async fn after_initial_pull(&self) -> Result<(), SyncError> {
        let synced = self.synced_ids.lock().clone();
        let missing = self.store.read(|library| library.ids().filter(|id| !synced.contains(*id)).count());
        if missing == 0 {
            return Ok(());
        }
        info!(count = missing, "Uploading local presets missing remotely");
        self.push_to_remote().await.map(|_| ())
    }

    fn clear_caches(&self) {
        self.synced_ids.lock().clear();
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sessions: append-only, union-merged by id.
//!
//! Pull adds remote sessions missing locally and never overwrites an
//! existing one. Push upserts only sessions not yet synced, keyed by
//! account and id so a replayed payload never duplicates a row, then upserts
//! the account's aggregate stats. New sessions are pushed without debounce.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::SyncConfig;
use crate::identity::AccountId;
use crate::metrics::LatencyTimer;
use crate::model::{Domain, SessionDto, SessionLog, UserStatsDto};
use crate::remote::{decode_rows, encode_rows, tables, Filter, Order, RemoteError, RemoteStore};
use crate::resilience::{OperationKind, SyncQueue};
use crate::store::{ChangeEvent, DomainStore};

use super::{DomainEngine, EngineContext, EngineCore, EnginePhase, PullOutcome, PushOutcome, SyncError};

/// Unsynced sessions plus the stats row computed with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SessionPayload {
    pub sessions: Vec<SessionDto>,
    pub stats: UserStatsDto,
}

pub(crate) async fn write_payload(remote: &dyn RemoteStore, payload: SessionPayload) -> Result<(), RemoteError> {
    if !payload.sessions.is_empty() {
        let rows = encode_rows(tables::SESSIONS, &payload.sessions)?;
        remote.upsert(tables::SESSIONS, rows, &["account_id", "id"]).await?;
    }
    let stats = encode_rows(tables::USER_STATS, &[payload.stats])?;
    remote.upsert(tables::USER_STATS, stats, &["account_id"]).await
}

pub struct SessionsEngine {
    core: EngineCore,
    store: Arc<DomainStore<SessionLog>>,
    remote: Arc<dyn RemoteStore>,
    queue: Arc<SyncQueue>,
    synced_ids: Mutex<BTreeSet<String>>,
}

impl SessionsEngine {
    pub fn new(store: Arc<DomainStore<SessionLog>>, ctx: &EngineContext, config: &SyncConfig) -> Self {
        Self {
            core: EngineCore::new(Domain::Sessions, config.debounce_for(Domain::Sessions), ctx.clock.clone()),
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
                tables::SESSIONS,
                &Filter::eq("account_id", account.as_str()),
                Some(&Order::asc("started_at")),
            )
            .await?;
        let remote = decode_rows::<SessionDto>(tables::SESSIONS, rows)?;
        let count = remote.len();
        self.synced_ids.lock().extend(remote.iter().map(|s| s.id.clone()));

        let added = self.store.apply_remote(|log| {
            let before = log.sessions.len();
            for dto in remote {
                log.record(dto.into_local());
            }
            log.sort();
            log.sessions.len() - before
        });

        let synced = self.synced_ids.lock().clone();
        let unsynced = self.store.read(|log| log.sessions.iter().filter(|s| !synced.contains(&s.id)).count());
        if unsynced > 0 {
            self.core.mark_dirty();
        }
        debug!(rows = count, added, unsynced, "Merged remote sessions");
        Ok(PullOutcome::Applied { rows: count, local_ahead: unsynced > 0 })
    }
}

#[async_trait]
impl DomainEngine for SessionsEngine {
    fn core(&self) -> &EngineCore {
        &self.core
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.store.subscribe()
    }

    fn local_revision(&self) -> u64 {
        self.store.local_revision()
    }

    #[tracing::instrument(skip(self), fields(domain = "sessions"))]
    async fn pull_from_remote(&self) -> Result<PullOutcome, SyncError> {
        let account = self.core.account()?;
        let _lock = self.core.exclusive().await;
        let _phase = self.core.enter(EnginePhase::Pulling)?;
        let _timer = LatencyTimer::new("sessions", "pull");
        let result = self.pull(&account).await;
        self.core.finish_pull(&result);
        result
    }

    #[tracing::instrument(skip(self), fields(domain = "sessions"))]
    async fn push_to_remote(&self) -> Result<PushOutcome, SyncError> {
        let account = self.core.account()?;
        let _lock = self.core.exclusive().await;
        let _phase = self.core.enter(EnginePhase::Pushing)?;

        let synced = self.synced_ids.lock().clone();
        let (sessions, stats) = self.store.read(|log| {
            let unsynced: Vec<SessionDto> = log
                .sessions
                .iter()
                .filter(|s| !synced.contains(&s.id))
                .map(|s| s.to_dto(&account))
                .collect();
            (unsynced, UserStatsDto::from_log(&account, log))
        });
        if sessions.is_empty() {
            return Ok(PushOutcome::Skipped);
        }

        let ids: Vec<String> = sessions.iter().map(|s| s.id.clone()).collect();
        let payload = SessionPayload { sessions, stats };
        let value = serde_json::to_value(&payload)?;
        let write = write_payload(self.remote.as_ref(), payload);
        let outcome = self
            .core
            .push_with_fallback(&self.queue, OperationKind::Create, value, write)
            .await?;
        if outcome.handed_off() {
            // Queued sessions are owned by the queue; never insert them twice
            self.synced_ids.lock().extend(ids);
        }
        Ok(outcome)
    }

    fn clear_caches(&self) {
        self.synced_ids.lock().clear();
    }
}

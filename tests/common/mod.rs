// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared test harness: in-memory backends plus a failure-injecting remote.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

use focus_sync::remote::{CallKind, Filter, InMemoryRemote, Order, RemoteError, RemoteStore};
use focus_sync::storage::InMemoryLocalStore;
use focus_sync::{AccountId, IdentityState, SyncConfig, SyncServices};

// =============================================================================
// FailingRemote
// =============================================================================

/// Wraps [`InMemoryRemote`] and fails writes on demand.
///
/// Failures are network errors unless `reject` is set. Reads pass through
/// unless the whole remote is offline (see [`InMemoryRemote::set_offline`]).
pub struct FailingRemote {
    pub inner: Arc<InMemoryRemote>,
    fail_next: AtomicUsize,
    fail_always: Mutex<BTreeSet<String>>,
    fail_once: Mutex<BTreeSet<String>>,
    reject: Mutex<bool>,
    failures: AtomicUsize,
    last_failure_at: Mutex<Option<Instant>>,
}

impl FailingRemote {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(InMemoryRemote::new()),
            fail_next: AtomicUsize::new(0),
            fail_always: Mutex::new(BTreeSet::new()),
            fail_once: Mutex::new(BTreeSet::new()),
            reject: Mutex::new(false),
            failures: AtomicUsize::new(0),
            last_failure_at: Mutex::new(None),
        }
    }

    /// Fail the next `n` writes, whatever the table.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every write to `table` until [`heal`](Self::heal).
    pub fn fail_table(&self, table: &str) {
        self.fail_always.lock().insert(table.to_string());
    }

    /// Fail only the next write to `table`.
    pub fn fail_table_once(&self, table: &str) {
        self.fail_once.lock().insert(table.to_string());
    }

    /// Fail with a server rejection instead of a network error.
    pub fn reject_instead(&self) {
        *self.reject.lock() = true;
    }

    pub fn heal(&self) {
        self.fail_next.store(0, Ordering::SeqCst);
        self.fail_always.lock().clear();
        self.fail_once.lock().clear();
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Tokio time of the most recent injected failure.
    pub fn last_failure_at(&self) -> Option<Instant> {
        *self.last_failure_at.lock()
    }

    fn check_write(&self, table: &str) -> Result<(), RemoteError> {
        let scripted = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let once = self.fail_once.lock().remove(table);
        if !scripted && !once && !self.fail_always.lock().contains(table) {
            return Ok(());
        }
        self.failures.fetch_add(1, Ordering::SeqCst);
        *self.last_failure_at.lock() = Some(Instant::now());
        if *self.reject.lock() {
            Err(RemoteError::Rejected {
                status: 400,
                message: format!("invalid row for {}", table),
            })
        } else {
            Err(RemoteError::Network(format!("injected failure writing {}", table)))
        }
    }
}

#[async_trait]
impl RemoteStore for FailingRemote {
    async fn select(&self, table: &str, filter: &Filter, order: Option<&Order>) -> Result<Vec<Value>, RemoteError> {
        self.inner.select(table, filter, order).await
    }

    async fn upsert(&self, table: &str, rows: Vec<Value>, on_conflict: &[&str]) -> Result<(), RemoteError> {
        self.check_write(table)?;
        self.inner.upsert(table, rows, on_conflict).await
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<(), RemoteError> {
        self.check_write(table)?;
        self.inner.insert(table, rows).await
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<(), RemoteError> {
        self.check_write(table)?;
        self.inner.delete(table, filter).await
    }

    async fn update(&self, table: &str, patch: Value, filter: &Filter) -> Result<(), RemoteError> {
        self.check_write(table)?;
        self.inner.update(table, patch, filter).await
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub local: Arc<InMemoryLocalStore>,
    pub remote: Arc<FailingRemote>,
    pub services: SyncServices,
}

impl Harness {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_local(config, Arc::new(InMemoryLocalStore::new()))
    }

    /// A fresh service graph over existing local storage, as after a
    /// process restart.
    pub fn with_local(config: SyncConfig, local: Arc<InMemoryLocalStore>) -> Self {
        Self::with_backends(config, local, Arc::new(FailingRemote::new()))
    }

    pub fn with_backends(config: SyncConfig, local: Arc<InMemoryLocalStore>, remote: Arc<FailingRemote>) -> Self {
        init_tracing();
        let services = SyncServices::new(config, local.clone(), remote.clone());
        Self { local, remote, services }
    }

    pub fn raw(&self) -> &InMemoryRemote {
        &self.remote.inner
    }

    pub fn writes(&self, kind: CallKind, table: &str) -> usize {
        self.raw().call_count(kind, table)
    }

    pub async fn sign_in(&self, id: &str) {
        self.services.coordinator.handle_identity(signed_in(id)).await;
    }

    pub async fn sign_out(&self) {
        self.services.coordinator.handle_identity(IdentityState::SignedOut).await;
    }
}

pub fn signed_in(id: &str) -> IdentityState {
    IdentityState::SignedIn(AccountId::new(id))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

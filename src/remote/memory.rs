// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::query::{Filter, Order};
use super::traits::{RemoteError, RemoteStore};

/// Kind of remote call, for assertions on [`InMemoryRemote::calls`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Select,
    Upsert,
    Insert,
    Delete,
    Update,
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Select => write!(f, "select"),
            Self::Upsert => write!(f, "upsert"),
            Self::Insert => write!(f, "insert"),
            Self::Delete => write!(f, "delete"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub kind: CallKind,
    pub table: String,
    /// Rows sent with upsert/insert, patch with update
    pub payload: Vec<Value>,
}

/// In-process tabular store with server-assigned timestamps.
///
/// Every call is logged (including calls that fail while offline), which
/// makes it the reference double for engine and coordinator tests.
pub struct InMemoryRemote {
    tables: Mutex<BTreeMap<String, Vec<Value>>>,
    calls: Mutex<Vec<RemoteCall>>,
    offline: AtomicBool,
    clock: AtomicI64,
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
            clock: AtomicI64::new(0),
        }
    }

    /// Simulate loss of connectivity: every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Replace a table's rows without recording a call.
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        self.tables.lock().insert(table.to_string(), rows);
    }

    /// Current rows of a table.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.lock().get(table).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn call_count(&self, kind: CallKind, table: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.kind == kind && c.table == table)
            .count()
    }

    #[must_use]
    pub fn count_kind(&self, kind: CallKind) -> usize {
        self.calls.lock().iter().filter(|c| c.kind == kind).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, kind: CallKind, table: &str, payload: Vec<Value>) -> Result<(), RemoteError> {
        self.calls.lock().push(RemoteCall {
            kind,
            table: table.to_string(),
            payload,
        });
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("remote offline".to_string()));
        }
        Ok(())
    }

    /// Strictly increasing epoch-millis server clock.
    fn server_now(&self) -> i64 {
        let wall = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        let mut prev = self.clock.load(Ordering::SeqCst);
        loop {
            let next = wall.max(prev + 1);
            match self.clock.compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_object(target: &mut Value, patch: &Value) {
    if let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) {
        for (k, v) in patch {
            target.insert(k.clone(), v.clone());
        }
    }
}

fn stamp(row: &mut Value, key: &str, now: i64) {
    if let Some(obj) = row.as_object_mut() {
        obj.insert(key.to_string(), Value::from(now));
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        order: Option<&Order>,
    ) -> Result<Vec<Value>, RemoteError> {
        self.record(CallKind::Select, table, Vec::new())?;
        let mut rows: Vec<Value> = self
            .rows(table)
            .into_iter()
            .filter(|row| filter.matches(row))
            .collect();
        if let Some(order) = order {
            rows.sort_by(|a, b| order.compare(a, b));
        }
        Ok(rows)
    }

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Value>,
        on_conflict: &[&str],
    ) -> Result<(), RemoteError> {
        self.record(CallKind::Upsert, table, rows.clone())?;
        let mut tables = self.tables.lock();
        let existing = tables.entry(table.to_string()).or_default();
        for mut row in rows {
            let now = self.server_now();
            let position = existing.iter().position(|candidate| {
                on_conflict
                    .iter()
                    .all(|col| candidate.get(*col).is_some() && candidate.get(*col) == row.get(*col))
            });
            match position {
                Some(idx) => {
                    // `created_at` stays server-owned
                    if let Some(obj) = row.as_object_mut() {
                        obj.remove("created_at");
                    }
                    merge_object(&mut existing[idx], &row);
                    stamp(&mut existing[idx], "updated_at", now);
                }
                None => {
                    stamp(&mut row, "created_at", now);
                    stamp(&mut row, "updated_at", now);
                    existing.push(row);
                }
            }
        }
        Ok(())
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<(), RemoteError> {
        self.record(CallKind::Insert, table, rows.clone())?;
        let mut tables = self.tables.lock();
        let existing = tables.entry(table.to_string()).or_default();
        for mut row in rows {
            let now = self.server_now();
            stamp(&mut row, "created_at", now);
            stamp(&mut row, "updated_at", now);
            existing.push(row);
        }
        Ok(())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<(), RemoteError> {
        self.record(CallKind::Delete, table, Vec::new())?;
        if let Some(rows) = self.tables.lock().get_mut(table) {
            rows.retain(|row| !filter.matches(row));
        }
        Ok(())
    }

    async fn update(&self, table: &str, patch: Value, filter: &Filter) -> Result<(), RemoteError> {
        self.record(CallKind::Update, table, vec![patch.clone()])?;
        let now = self.server_now();
        if let Some(rows) = self.tables.lock().get_mut(table) {
            for row in rows.iter_mut().filter(|row| filter.matches(row)) {
                merge_object(row, &patch);
                stamp(row, "updated_at", now);
            }
        }
        Ok(())
    }
}

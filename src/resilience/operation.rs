// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queued mutation operations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Domain;
use crate::timestamps::now_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Syncing,
    Completed,
    Failed,
}

impl OperationStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and failed operations are only kept for inspection.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Not yet written and not in flight, so a newer operation may take
    /// its place.
    #[must_use]
    pub fn is_replaceable(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durably persisted unit of pending remote work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: String,
    pub domain: Domain,
    pub kind: OperationKind,
    pub payload: Value,
    /// When the change was made locally (epoch millis)
    pub local_timestamp: i64,
    #[serde(default)]
    pub retry_count: u32,
    pub status: OperationStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: i64,
    /// Wall-clock backoff deadline, absent until the first failure
    #[serde(default)]
    pub next_attempt_at: Option<i64>,
}

impl SyncOperation {
    pub fn new(domain: Domain, kind: OperationKind, payload: Value) -> Self {
        let now = now_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            domain,
            kind,
            payload,
            local_timestamp: now,
            retry_count: 0,
            status: OperationStatus::Pending,
            last_error: None,
            created_at: now,
            next_attempt_at: None,
        }
    }

    /// Fold a superseded pending operation's deletion list into this one.
    ///
    /// Latest-wins domains replace older pending writes, but ids deleted in
    /// an older write must still be deleted remotely.
    pub fn absorb_deletions(&mut self, superseded: &SyncOperation) {
        let Some(old) = superseded.payload.get(DELETED_IDS).and_then(Value::as_array) else {
            return;
        };
        let Some(object) = self.payload.as_object_mut() else {
            return;
        };
        let list = object
            .entry(DELETED_IDS)
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(ids) = list {
            for id in old {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
        }
    }
}

/// Payload key listing record ids to delete remotely.
pub const DELETED_IDS: &str = "deleted_ids";

/// Operation counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub syncing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    #[must_use]
    pub fn from_ops(ops: &[SyncOperation]) -> Self {
        let mut stats = Self::default();
        for op in ops {
            match op.status {
                OperationStatus::Pending => stats.pending += 1,
                OperationStatus::Syncing => stats.syncing += 1,
                OperationStatus::Completed => stats.completed += 1,
                OperationStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Work not yet confirmed by the remote
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending + self.syncing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_operation_is_pending() {
        let op = SyncOperation::new(Domain::Tasks, OperationKind::Update, json!({}));
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert!(op.next_attempt_at.is_none());
    }

    #[test]
    fn test_absorb_deletions_unions_ids() {
        let old = SyncOperation::new(Domain::Presets, OperationKind::Update, json!({"presets": [], "deleted_ids": ["a", "b"]}));
        let mut new = SyncOperation::new(Domain::Presets, OperationKind::Update, json!({"presets": [], "deleted_ids": ["b", "c"]}));
        new.absorb_deletions(&old);
        assert_eq!(new.payload["deleted_ids"], json!(["b", "c", "a"]));
    }

    #[test]
    fn test_absorb_deletions_creates_list() {
        let old = SyncOperation::new(Domain::Presets, OperationKind::Update, json!({"deleted_ids": ["x"]}));
        let mut new = SyncOperation::new(Domain::Presets, OperationKind::Update, json!({"presets": []}));
        new.absorb_deletions(&old);
        assert_eq!(new.payload["deleted_ids"], json!(["x"]));
    }

    #[test]
    fn test_absorb_ignores_settings_payloads() {
        let old = SyncOperation::new(Domain::Settings, OperationKind::Update, json!({"theme": "dark"}));
        let mut new = SyncOperation::new(Domain::Settings, OperationKind::Update, json!({"theme": "light"}));
        new.absorb_deletions(&old);
        assert_eq!(new.payload, json!({"theme": "light"}));
    }

    #[test]
    fn test_stats() {
        let mut ops = vec![
            SyncOperation::new(Domain::Tasks, OperationKind::Update, json!({})),
            SyncOperation::new(Domain::Sessions, OperationKind::Create, json!({})),
        ];
        ops[1].status = OperationStatus::Failed;
        let stats = QueueStats::from_ops(&ops);
        assert_eq!(stats, QueueStats { pending: 1, syncing: 0, completed: 0, failed: 1 });
        assert_eq!(stats.outstanding(), 1);
    }

    #[test]
    fn test_wire_format() {
        let op = SyncOperation::new(Domain::Settings, OperationKind::Update, json!({}));
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["domain"], "settings");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["kind"], "update");
    }
}

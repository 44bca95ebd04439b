// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local modification timestamps, per `(field, namespace)`.
//!
//! Every local mutation that is not the result of applying a remote pull
//! records `now` for each field it touched. Engines consult the tracker on
//! pull: a field edited locally after the remote row was written keeps its
//! local value and is pushed instead.
//!
//! Entries are persisted under `local_timestamps_{namespace}` so the
//! decision survives a restart between an offline edit and the next pull.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::identity::Namespace;
use crate::storage::traits::{get_json, set_json, LocalStore};

pub const TIMESTAMPS_KEY: &str = "local_timestamps";

/// Wall-clock epoch millis.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub struct TimestampTracker {
    local: Arc<dyn LocalStore>,
    /// namespace → (field → last local modification)
    entries: DashMap<String, BTreeMap<String, i64>>,
}

impl TimestampTracker {
    pub fn new(local: Arc<dyn LocalStore>) -> Self {
        Self {
            local,
            entries: DashMap::new(),
        }
    }

    /// Load persisted entries for a namespace (idempotent).
    ///
    /// A corrupt entry set is discarded: losing it only degrades merges to
    /// remote-wins for the affected fields.
    pub fn load_namespace(&self, namespace: &Namespace) {
        if self.entries.contains_key(namespace.as_str()) {
            return;
        }
        let key = namespace.scoped_key(TIMESTAMPS_KEY);
        let map = match get_json::<BTreeMap<String, i64>>(self.local.as_ref(), &key) {
            Ok(map) => map.unwrap_or_default(),
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "Discarding unreadable local timestamps");
                BTreeMap::new()
            }
        };
        debug!(namespace = %namespace, fields = map.len(), "Loaded local timestamps");
        self.entries.insert(namespace.as_str().to_string(), map);
    }

    /// Record a local modification of `field` now.
    pub fn record(&self, field: &str, namespace: &Namespace) {
        self.record_at(field, namespace, now_millis());
    }

    pub fn record_at(&self, field: &str, namespace: &Namespace, at: i64) {
        self.record_many_at(std::iter::once(field), namespace, at);
    }

    /// Record several fields with one persist.
    pub fn record_many_at<'a>(&self, fields: impl IntoIterator<Item = &'a str>, namespace: &Namespace, at: i64) {
        self.load_namespace(namespace);
        let snapshot = {
            let mut map = self.entries.entry(namespace.as_str().to_string()).or_default();
            for field in fields {
                map.insert(field.to_string(), at);
            }
            map.clone()
        };
        self.persist(namespace, &snapshot);
    }

    #[must_use]
    pub fn last_modified(&self, field: &str, namespace: &Namespace) -> Option<i64> {
        self.load_namespace(namespace);
        self.entries
            .get(namespace.as_str())
            .and_then(|map| map.get(field).copied())
    }

    /// True when `field` was modified locally after `remote_updated_at`.
    ///
    /// Without a remote timestamp there is nothing to compare against and
    /// remote wins.
    #[must_use]
    pub fn is_local_newer(&self, field: &str, namespace: &Namespace, remote_updated_at: Option<i64>) -> bool {
        match (self.last_modified(field, namespace), remote_updated_at) {
            (Some(local), Some(remote)) => local > remote,
            _ => false,
        }
    }

    /// Fields with a recorded local modification, sorted.
    #[must_use]
    pub fn fields(&self, namespace: &Namespace) -> Vec<String> {
        self.load_namespace(namespace);
        self.entries
            .get(namespace.as_str())
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget every entry for a namespace, in memory and on disk.
    pub fn clear_namespace(&self, namespace: &Namespace) {
        self.entries.insert(namespace.as_str().to_string(), BTreeMap::new());
        if let Err(e) = self.local.remove(&namespace.scoped_key(TIMESTAMPS_KEY)) {
            warn!(namespace = %namespace, error = %e, "Failed to remove local timestamps");
        }
    }

    fn persist(&self, namespace: &Namespace, map: &BTreeMap<String, i64>) {
        let key = namespace.scoped_key(TIMESTAMPS_KEY);
        if let Err(e) = set_json(self.local.as_ref(), &key, map) {
            warn!(namespace = %namespace, error = %e, "Failed to persist local timestamps");
        }
    }
}

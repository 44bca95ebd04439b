// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory domain stores with an explicit change channel.
//!
//! Each domain's state lives in a [`DomainStore`], persisted under
//! `"{base_key}_{namespace}"` on every mutation. Mutations publish a
//! [`ChangeEvent`] on a broadcast channel tagged with its origin, which is
//! how engines tell a user edit ([`ChangeOrigin::Local`]) from a namespace
//! load or a pull being written back ([`ChangeOrigin::Load`],
//! [`ChangeOrigin::Remote`]).
//!
//! ```
//! use std::sync::Arc;
//! use focus_sync::store::{ChangeOrigin, DomainStores};
//! use focus_sync::storage::InMemoryLocalStore;
//! use focus_sync::timestamps::TimestampTracker;
//! use focus_sync::Namespace;
//!
//! let local = Arc::new(InMemoryLocalStore::new());
//! let tracker = Arc::new(TimestampTracker::new(local.clone()));
//! let stores = DomainStores::new(local.clone(), tracker, 16);
//! stores.load_all(&Namespace::Guest);
//!
//! let mut events = stores.settings.subscribe();
//! stores.settings.update(|s| s.sound_enabled = false);
//! assert_eq!(events.try_recv().unwrap().origin, ChangeOrigin::Local);
//! assert!(local.keys().contains(&"settings_guest".to_string()));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::identity::Namespace;
use crate::model::{PresetLibrary, SessionLog, Settings, TaskBook};
use crate::storage::traits::{get_json, set_json, LocalStore};
use crate::timestamps::{now_millis, TimestampTracker};

/// Why a store changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Reset to defaults or loaded from a namespace
    Load,
    /// Edited by the user / host app
    Local,
    /// Written by an engine applying a pull
    Remote,
}

/// Published after every store mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub origin: ChangeOrigin,
    pub revision: u64,
}

/// State held by a [`DomainStore`].
pub trait DomainState:
    Clone + Default + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Local storage base key
    const BASE_KEY: &'static str;

    /// Field identifiers that differ between two states, used as the
    /// `field` half of local timestamp entries.
    fn changed_fields(before: &Self, after: &Self) -> Vec<String>;
}

/// Top-level object keys whose values differ.
fn object_field_diff<T: Serialize>(before: &T, after: &T) -> Vec<String> {
    let (Ok(Value::Object(a)), Ok(Value::Object(b))) = (serde_json::to_value(before), serde_json::to_value(after))
    else {
        return Vec::new();
    };
    let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    keys.into_iter()
        .filter(|k| a.get(*k) != b.get(*k))
        .cloned()
        .collect()
}

/// `"{prefix}:{id}"` for every record added, removed or changed.
fn keyed_diff<R: PartialEq>(prefix: &str, before: &[R], after: &[R], id: impl Fn(&R) -> &str) -> Vec<String> {
    let a: BTreeMap<&str, &R> = before.iter().map(|r| (id(r), r)).collect();
    let b: BTreeMap<&str, &R> = after.iter().map(|r| (id(r), r)).collect();
    let ids: BTreeSet<&str> = a.keys().chain(b.keys()).copied().collect();
    ids.into_iter()
        .filter(|k| a.get(k) != b.get(k))
        .map(|k| format!("{}:{}", prefix, k))
        .collect()
}

impl DomainState for Settings {
    const BASE_KEY: &'static str = "settings";

    fn changed_fields(before: &Self, after: &Self) -> Vec<String> {
        object_field_diff(before, after)
    }
}

impl DomainState for PresetLibrary {
    const BASE_KEY: &'static str = "presets";

    fn changed_fields(before: &Self, after: &Self) -> Vec<String> {
        keyed_diff("preset", &before.presets, &after.presets, |p| p.id.as_str())
    }
}

impl DomainState for SessionLog {
    const BASE_KEY: &'static str = "sessions";

    fn changed_fields(before: &Self, after: &Self) -> Vec<String> {
        keyed_diff("session", &before.sessions, &after.sessions, |s| s.id.as_str())
    }
}

impl DomainState for TaskBook {
    const BASE_KEY: &'static str = "tasks";

    fn changed_fields(before: &Self, after: &Self) -> Vec<String> {
        let mut fields = keyed_diff("task", &before.tasks, &after.tasks, |t| t.id.as_str());
        fields.extend(
            before
                .completions
                .symmetric_difference(&after.completions)
                .map(|k| format!("completion:{}", k)),
        );
        fields
    }
}

pub struct DomainStore<T: DomainState> {
    local: Arc<dyn LocalStore>,
    timestamps: Arc<TimestampTracker>,
    state: RwLock<T>,
    namespace: RwLock<Namespace>,
    revision: AtomicU64,
    /// Revision of the most recent local edit
    local_revision: AtomicU64,
    events: broadcast::Sender<ChangeEvent>,
}

impl<T: DomainState> DomainStore<T> {
    pub fn new(local: Arc<dyn LocalStore>, timestamps: Arc<TimestampTracker>, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            local,
            timestamps,
            state: RwLock::new(T::default()),
            namespace: RwLock::new(Namespace::Guest),
            revision: AtomicU64::new(0),
            local_revision: AtomicU64::new(0),
            events,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> T {
        self.state.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.state.read())
    }

    #[must_use]
    pub fn namespace(&self) -> Namespace {
        self.namespace.read().clone()
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Revision of the latest local edit, 0 if none since construction.
    #[must_use]
    pub fn local_revision(&self) -> u64 {
        self.local_revision.load(Ordering::Acquire)
    }

    /// Subscribe to change events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Apply a local edit.
    ///
    /// Persists, records a local timestamp for every changed field and
    /// publishes a [`ChangeOrigin::Local`] event. An edit that changes
    /// nothing publishes nothing.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let (result, changed, snapshot) = {
            let mut state = self.state.write();
            let before = state.clone();
            let result = f(&mut *state);
            let changed = T::changed_fields(&before, &*state);
            (result, changed, state.clone())
        };
        if changed.is_empty() {
            return result;
        }
        let namespace = self.namespace();
        self.persist(&namespace, &snapshot);
        self.timestamps
            .record_many_at(changed.iter().map(String::as_str), &namespace, now_millis());
        let revision = self.publish(ChangeOrigin::Local);
        self.local_revision.fetch_max(revision, Ordering::AcqRel);
        result
    }

    /// Write pulled state. Persists and publishes [`ChangeOrigin::Remote`];
    /// no local timestamps are recorded.
    pub fn apply_remote<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let (result, changed, snapshot) = {
            let mut state = self.state.write();
            let before = state.clone();
            let result = f(&mut *state);
            let changed = before != *state;
            (result, changed, state.clone())
        };
        if changed {
            self.persist(&self.namespace(), &snapshot);
            self.publish(ChangeOrigin::Remote);
        }
        result
    }

    /// Back to hard-coded defaults, in memory only.
    pub fn reset(&self) {
        *self.state.write() = T::default();
        self.publish(ChangeOrigin::Load);
    }

    /// Switch to `namespace` and load its persisted state.
    ///
    /// Missing or unreadable state falls back to defaults.
    pub fn load(&self, namespace: &Namespace) {
        let key = namespace.scoped_key(T::BASE_KEY);
        let loaded = match get_json::<T>(self.local.as_ref(), &key) {
            Ok(Some(state)) => state,
            Ok(None) => T::default(),
            Err(e) => {
                warn!(key = %key, error = %e, "Local state unreadable, using defaults");
                T::default()
            }
        };
        *self.namespace.write() = namespace.clone();
        *self.state.write() = loaded;
        debug!(key = %key, "Domain store loaded");
        self.publish(ChangeOrigin::Load);
    }

    /// Remove this domain's persisted state for `namespace`.
    pub fn wipe(&self, namespace: &Namespace) {
        let key = namespace.scoped_key(T::BASE_KEY);
        if let Err(e) = self.local.remove(&key) {
            warn!(key = %key, error = %e, "Failed to wipe local state");
        }
    }

    fn persist(&self, namespace: &Namespace, state: &T) {
        let key = namespace.scoped_key(T::BASE_KEY);
        if let Err(e) = set_json(self.local.as_ref(), &key, state) {
            warn!(key = %key, error = %e, "Failed to persist local state");
        }
    }

    fn publish(&self, origin: ChangeOrigin) -> u64 {
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        // No subscribers is fine
        let _ = self.events.send(ChangeEvent { origin, revision });
        revision
    }
}

/// The four domain stores, shared by the resolver, engines and host app.
#[derive(Clone)]
pub struct DomainStores {
    pub settings: Arc<DomainStore<Settings>>,
    pub presets: Arc<DomainStore<PresetLibrary>>,
    pub sessions: Arc<DomainStore<SessionLog>>,
    pub tasks: Arc<DomainStore<TaskBook>>,
}

impl DomainStores {
    /// Base keys of every namespaced value owned by the domain stores.
    pub const BASE_KEYS: [&'static str; 4] = [
        Settings::BASE_KEY,
        PresetLibrary::BASE_KEY,
        SessionLog::BASE_KEY,
        TaskBook::BASE_KEY,
    ];

    pub fn new(local: Arc<dyn LocalStore>, timestamps: Arc<TimestampTracker>, capacity: usize) -> Self {
        Self {
            settings: Arc::new(DomainStore::new(local.clone(), timestamps.clone(), capacity)),
            presets: Arc::new(DomainStore::new(local.clone(), timestamps.clone(), capacity)),
            sessions: Arc::new(DomainStore::new(local.clone(), timestamps.clone(), capacity)),
            tasks: Arc::new(DomainStore::new(local, timestamps, capacity)),
        }
    }

    pub fn reset_all(&self) {
        self.settings.reset();
        self.presets.reset();
        self.sessions.reset();
        self.tasks.reset();
    }

    pub fn load_all(&self, namespace: &Namespace) {
        self.settings.load(namespace);
        self.presets.load(namespace);
        self.sessions.load(namespace);
        self.tasks.load(namespace);
    }

    pub fn wipe_all(&self, namespace: &Namespace) {
        self.settings.wipe(namespace);
        self.presets.wipe(namespace);
        self.sessions.wipe(namespace);
        self.tasks.wipe(namespace);
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Focus Sync
//!
//! Offline-first synchronization for a focus/productivity app: settings,
//! timer presets, completed focus sessions and tasks live in namespaced
//! local storage and reconcile with a remote tabular datastore in the
//! background.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Identity stream                         │
//! │  • Unknown / Guest / SignedIn(id) / SignedOut              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Namespace Resolver                       │
//! │  • "guest" or the account id, suffixed onto every key      │
//! │  • Reset + reload of all domain stores on every switch     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Sync Coordinator                        │
//! │  • Ordered first sync: Settings → Presets → Sessions → Tasks│
//! │  • 60 s periodic pull with a post-push cooldown            │
//! │  • Bounded force push at app-lifecycle boundaries          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              (change events → debounce → push)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Domain Sync Engines                       │
//! │  • Settings: per-field last-writer-wins                    │
//! │  • Presets: remote wins, guarded against data loss         │
//! │  • Sessions: append-only union                             │
//! │  • Tasks: per-record last-writer-wins, soft delete         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                    (failed pushes fall back)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Sync Queue                            │
//! │  • Durable per account, drained in order                   │
//! │  • Backoff 1/2/4/8/16 s, failed after 5 retries            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use focus_sync::{AccountId, IdentityState, SyncConfig, SyncServices};
//! use focus_sync::remote::InMemoryRemote;
//! use focus_sync::storage::InMemoryLocalStore;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() {
//!     let services = SyncServices::new(
//!         SyncConfig::default(),
//!         Arc::new(InMemoryLocalStore::new()),
//!         Arc::new(InMemoryRemote::new()),
//!     );
//!
//!     let (identity_tx, identity_rx) = watch::channel(IdentityState::Unknown);
//!     let (_reachable_tx, reachable_rx) = watch::channel(true);
//!     services.spawn(identity_rx, reachable_rx);
//!
//!     identity_tx.send(IdentityState::SignedIn(AccountId::new("acct-1"))).unwrap();
//!
//!     // Edits go through the domain stores; the engines push them
//!     services.stores.settings.update(|s| s.sound_enabled = false);
//!
//!     // Before the app is suspended
//!     services.coordinator.on_background().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`SyncCoordinator`] sequencing everything
//! - [`namespace`]: Identity → storage namespace switching
//! - [`engine`]: The four domain sync engines
//! - [`resilience`]: Durable retry queue and backoff
//! - [`store`]: In-memory domain stores with change events
//! - [`timestamps`]: Per-field local modification times
//! - [`storage`] / [`remote`]: Local and remote backend boundaries
//! - [`model`]: Domain records and remote DTOs

pub mod config;
pub mod identity;
pub mod model;
pub mod storage;
pub mod remote;
pub mod timestamps;
pub mod store;
pub mod resilience;
pub mod engine;
pub mod namespace;
pub mod coordinator;
pub mod services;
pub mod metrics;

pub use config::SyncConfig;
pub use identity::{AccountId, IdentityState, Namespace};
pub use model::Domain;
pub use storage::{LocalStore, StorageError};
pub use remote::{RemoteError, RemoteStore};
pub use store::{ChangeEvent, ChangeOrigin, DomainStore, DomainStores};
pub use timestamps::TimestampTracker;
pub use resilience::{BackoffSchedule, OperationKind, OperationStatus, QueueStats, SyncOperation, SyncQueue};
pub use engine::{DomainEngine, EnginePhase, PullOutcome, PushOutcome, SyncError};
pub use namespace::{NamespaceResolver, NamespaceTransition};
pub use coordinator::{SyncCoordinator, SyncFailure, SyncNotification, SyncReport, SyncStatus};
pub use services::SyncServices;
pub use metrics::LatencyTimer;

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote datastore boundary.
//!
//! The remote side is a generic tabular store (filtered select, upsert,
//! insert, delete, update). Table names used by the engines live in
//! [`tables`].

pub mod traits;
pub mod query;
pub mod memory;

pub use traits::{decode_rows, encode_rows, RemoteError, RemoteStore};
pub use query::{Filter, Order};
pub use memory::{CallKind, InMemoryRemote, RemoteCall};

/// Remote table names.
pub mod tables {
    pub const SETTINGS: &str = "user_settings";
    pub const PRESETS: &str = "presets";
    pub const SESSIONS: &str = "sessions";
    pub const USER_STATS: &str = "user_stats";
    pub const TASKS: &str = "tasks";
    pub const TASK_COMPLETIONS: &str = "task_completions";
    pub const PROFILES: &str = "profiles";
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the sync layer.
//!
//! # Example
//!
//! ```
//! use focus_sync::SyncConfig;
//! use std::time::Duration;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.periodic_interval(), Duration::from_secs(60));
//! assert_eq!(config.queue_max_retries, 5);
//!
//! // Tighter timings for a test harness
//! let config = SyncConfig {
//!     settings_debounce_ms: 100,
//!     periodic_interval_secs: 5,
//!     ..Default::default()
//! };
//! assert_eq!(config.settings_debounce(), Duration::from_millis(100));
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::model::Domain;

/// Configuration for the sync layer.
///
/// All fields have defaults matching production behaviour. Durations are
/// expressed as integer milliseconds or seconds so the struct can be loaded
/// from any serde format.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Quiet period before a settings edit is pushed
    #[serde(default = "default_settings_debounce_ms")]
    pub settings_debounce_ms: u64,

    /// Quiet period before a preset edit is pushed
    #[serde(default = "default_presets_debounce_ms")]
    pub presets_debounce_ms: u64,

    /// Quiet period before a task edit is pushed
    #[serde(default = "default_tasks_debounce_ms")]
    pub tasks_debounce_ms: u64,

    /// Background reconciliation interval
    #[serde(default = "default_periodic_interval_secs")]
    pub periodic_interval_secs: u64,

    /// Periodic pulls are skipped this long after a push
    #[serde(default = "default_push_cooldown_secs")]
    pub push_cooldown_secs: u64,

    /// Foreground pulls are skipped this long after a push
    #[serde(default = "default_foreground_cooldown_secs")]
    pub foreground_cooldown_secs: u64,

    /// Attempts before a queued operation is marked failed
    #[serde(default = "default_queue_max_retries")]
    pub queue_max_retries: u32,

    /// Backoff table in seconds, indexed by retry count
    #[serde(default = "default_queue_backoff_secs")]
    pub queue_backoff_secs: Vec<u64>,

    /// Completed and failed operations older than this are pruned
    #[serde(default = "default_queue_retention_hours")]
    pub queue_retention_hours: u64,

    /// Drain the queue right after every enqueue
    #[serde(default = "default_queue_auto_drain")]
    pub queue_auto_drain: bool,

    /// Bounded wait for a lifecycle force push
    #[serde(default = "default_force_push_timeout_secs")]
    pub force_push_timeout_secs: u64,

    /// Buffered change events per domain store
    #[serde(default = "default_change_channel_capacity")]
    pub change_channel_capacity: usize,
}

fn default_settings_debounce_ms() -> u64 { 1000 }
fn default_presets_debounce_ms() -> u64 { 1000 }
fn default_tasks_debounce_ms() -> u64 { 500 }
fn default_periodic_interval_secs() -> u64 { 60 }
fn default_push_cooldown_secs() -> u64 { 15 }
fn default_foreground_cooldown_secs() -> u64 { 10 }
fn default_queue_max_retries() -> u32 { 5 }
fn default_queue_backoff_secs() -> Vec<u64> { vec![1, 2, 4, 8, 16] }
fn default_queue_retention_hours() -> u64 { 24 }
fn default_queue_auto_drain() -> bool { true }
fn default_force_push_timeout_secs() -> u64 { 5 }
fn default_change_channel_capacity() -> usize { 64 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            settings_debounce_ms: default_settings_debounce_ms(),
            presets_debounce_ms: default_presets_debounce_ms(),
            tasks_debounce_ms: default_tasks_debounce_ms(),
            periodic_interval_secs: default_periodic_interval_secs(),
            push_cooldown_secs: default_push_cooldown_secs(),
            foreground_cooldown_secs: default_foreground_cooldown_secs(),
            queue_max_retries: default_queue_max_retries(),
            queue_backoff_secs: default_queue_backoff_secs(),
            queue_retention_hours: default_queue_retention_hours(),
            queue_auto_drain: default_queue_auto_drain(),
            force_push_timeout_secs: default_force_push_timeout_secs(),
            change_channel_capacity: default_change_channel_capacity(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn settings_debounce(&self) -> Duration {
        Duration::from_millis(self.settings_debounce_ms)
    }

    #[must_use]
    pub fn presets_debounce(&self) -> Duration {
        Duration::from_millis(self.presets_debounce_ms)
    }

    #[must_use]
    pub fn tasks_debounce(&self) -> Duration {
        Duration::from_millis(self.tasks_debounce_ms)
    }

    /// Debounce window for a domain. Sessions are pushed as soon as they
    /// are observed, so they have none.
    #[must_use]
    pub fn debounce_for(&self, domain: Domain) -> Option<Duration> {
        match domain {
            Domain::Settings => Some(self.settings_debounce()),
            Domain::Presets => Some(self.presets_debounce()),
            Domain::Tasks => Some(self.tasks_debounce()),
            Domain::Sessions => None,
        }
    }

    #[must_use]
    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_secs)
    }

    #[must_use]
    pub fn push_cooldown(&self) -> Duration {
        Duration::from_secs(self.push_cooldown_secs)
    }

    #[must_use]
    pub fn foreground_cooldown(&self) -> Duration {
        Duration::from_secs(self.foreground_cooldown_secs)
    }

    #[must_use]
    pub fn queue_retention(&self) -> Duration {
        Duration::from_secs(self.queue_retention_hours * 60 * 60)
    }

    #[must_use]
    pub fn force_push_timeout(&self) -> Duration {
        Duration::from_secs(self.force_push_timeout_secs)
    }
}

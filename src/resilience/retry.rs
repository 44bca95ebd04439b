// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Table-driven exponential backoff for queued operations.
//!
//! # Example
//!
//! ```
//! use focus_sync::resilience::BackoffSchedule;
//! use std::time::Duration;
//!
//! let schedule = BackoffSchedule::default();
//! assert_eq!(schedule.delay_for(1), Duration::from_secs(1));
//! assert_eq!(schedule.delay_for(3), Duration::from_secs(4));
//! // Capped at the last table entry
//! assert_eq!(schedule.delay_for(9), Duration::from_secs(16));
//! assert!(schedule.is_exhausted(5));
//! ```

use std::time::Duration;

use crate::config::SyncConfig;

/// Backoff table plus the retry ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    steps: Vec<Duration>,
    max_retries: u32,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::from_secs(&[1, 2, 4, 8, 16], 5)
    }
}

impl BackoffSchedule {
    #[must_use]
    pub fn from_secs(steps: &[u64], max_retries: u32) -> Self {
        Self {
            steps: steps.iter().copied().map(Duration::from_secs).collect(),
            max_retries,
        }
    }

    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::from_secs(&config.queue_backoff_secs, config.queue_max_retries)
    }

    /// Millisecond steps for tests
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            steps: vec![Duration::from_millis(1), Duration::from_millis(2)],
            max_retries: 3,
        }
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the next attempt of an operation that has failed
    /// `retry_count` times. Indexed by `retry_count - 1`, capped at the
    /// last entry.
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let Some(last) = self.steps.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let index = (retry_count.saturating_sub(1) as usize).min(last);
        self.steps[index]
    }

    #[must_use]
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}

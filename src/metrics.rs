// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for focus-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host app is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `focus_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `domain`: settings, presets, sessions, tasks, task_completions
//! - `direction`: pull, push
//! - `outcome`: ok, error, unchanged, queued

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record the outcome of a pull or push for a domain
pub fn record_sync(domain: &str, direction: &str, outcome: &str) {
    counter!(
        "focus_sync_operations_total",
        "domain" => domain.to_string(),
        "direction" => direction.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record pull/push latency
pub fn record_latency(domain: &str, direction: &str, duration: Duration) {
    histogram!(
        "focus_sync_operation_seconds",
        "domain" => domain.to_string(),
        "direction" => direction.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a pull skipped because remote presets would overwrite custom ones
pub fn record_preset_guard_skip() {
    counter!("focus_sync_preset_guard_skips_total").increment(1);
}

/// Record a pull skipped inside the push cooldown window
pub fn record_cooldown_skip(caller: &str) {
    counter!(
        "focus_sync_cooldown_skips_total",
        "caller" => caller.to_string()
    )
    .increment(1);
}

/// Record a queued operation reaching a status
pub fn record_queue_operation(domain: &str, status: &str) {
    counter!(
        "focus_sync_queue_operations_total",
        "domain" => domain.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Set queue depth per status
pub fn set_queue_depth(status: &str, count: usize) {
    gauge!(
        "focus_sync_queue_depth",
        "status" => status.to_string()
    )
    .set(count as f64);
}

/// Record a push that failed and fell back to the durable queue
pub fn record_queue_fallback(domain: &str) {
    counter!(
        "focus_sync_queue_fallbacks_total",
        "domain" => domain.to_string()
    )
    .increment(1);
}

/// Record a namespace switch
pub fn record_namespace_switch(wiped_guest: bool) {
    counter!(
        "focus_sync_namespace_switches_total",
        "wiped_guest" => wiped_guest.to_string()
    )
    .increment(1);
}

/// Set whether the coordinator is running (1) or stopped (0)
pub fn set_coordinator_running(running: bool) {
    gauge!("focus_sync_coordinator_running").set(if running { 1.0 } else { 0.0 });
}

/// Timer guard that records latency on drop.
pub struct LatencyTimer {
    domain: &'static str,
    direction: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    #[must_use]
    pub fn new(domain: &'static str, direction: &'static str) -> Self {
        Self {
            domain,
            direction,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.domain, self.direction, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder every call is a no-op; these only check
    // that the facade accepts our label sets.
    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_sync("settings", "pull", "ok");
        record_latency("tasks", "push", Duration::from_millis(3));
        record_preset_guard_skip();
        record_cooldown_skip("periodic");
        record_queue_operation("presets", "completed");
        set_queue_depth("pending", 2);
        record_queue_fallback("sessions");
        record_namespace_switch(true);
        set_coordinator_running(false);
    }

    #[test]
    fn test_latency_timer_drop() {
        let timer = LatencyTimer::new("settings", "pull");
        drop(timer);
    }
}

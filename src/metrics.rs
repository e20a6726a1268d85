// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the migration proxy.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `migrate_proxy_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for sizes
//!
//! # Labels
//! - `command`: lowercase client command name
//! - `status`: ok, error, nil
//! - `operation`: which best-effort target write failed

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// DISPATCHER
// ═══════════════════════════════════════════════════════════════════════════

/// Record a dispatched client command
pub fn record_command(command: &str, status: &str) {
    counter!(
        "migrate_proxy_commands_total",
        "command" => command.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record command latency (guard wait + store round-trips)
pub fn record_command_latency(command: &str, duration: Duration) {
    histogram!(
        "migrate_proxy_command_seconds",
        "command" => command.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A target write on the best-effort path failed (logged, not surfaced)
pub fn record_best_effort_failure(operation: &str) {
    counter!(
        "migrate_proxy_best_effort_failures_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// GET served from target, or healed from source
pub fn record_read_through(hit_target: bool) {
    counter!(
        "migrate_proxy_read_through_total",
        "result" => if hit_target { "target" } else { "source" }
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// MIGRATOR
// ═══════════════════════════════════════════════════════════════════════════

pub fn record_page_scanned(keys: usize) {
    counter!("migrate_proxy_pages_scanned_total").increment(1);
    counter!("migrate_proxy_keys_scanned_total").increment(keys as u64);
}

pub fn record_key_copied() {
    counter!("migrate_proxy_keys_copied_total").increment(1);
}

pub fn record_copy_failure() {
    counter!("migrate_proxy_copy_failures_total").increment(1);
}

/// Last `used_memory` read from target
pub fn set_target_used_memory(bytes: u64) {
    gauge!("migrate_proxy_target_used_memory_bytes").set(bytes as f64);
}

pub fn shard_started() {
    gauge!("migrate_proxy_shards_active").increment(1.0);
}

pub fn shard_finished(reason: &str) {
    gauge!("migrate_proxy_shards_active").decrement(1.0);
    counter!(
        "migrate_proxy_shards_finished_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_pass_duration(duration: Duration) {
    histogram!("migrate_proxy_pass_seconds").record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// SERVER
// ═══════════════════════════════════════════════════════════════════════════

pub fn connection_opened() {
    gauge!("migrate_proxy_connections_active").increment(1.0);
    counter!("migrate_proxy_connections_total").increment(1);
}

pub fn connection_closed() {
    gauge!("migrate_proxy_connections_active").decrement(1.0);
}

/// Records command latency on drop.
pub struct CommandTimer {
    command: &'static str,
    start: Instant,
}

impl CommandTimer {
    pub fn new(command: &'static str) -> Self {
        Self {
            command,
            start: Instant::now(),
        }
    }
}

impl Drop for CommandTimer {
    fn drop(&mut self) {
        record_command_latency(self.command, self.start.elapsed());
    }
}

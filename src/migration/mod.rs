// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background bulk migration from source to target.
//!
//! # Architecture
//!
//! ```text
//!   CLUSTER NODES ──► TopologyParser ──► [shard, shard, ...]
//!                                          │
//!                     one task per shard ◄─┘
//!                          │
//!          ┌───────────────┴───────────────┐
//!          │  loop {                       │
//!          │    page = scan(cursor)        │  NodeScanner (shard node)
//!          │    for key in page {          │
//!          │      exclusive guard          │  ConcurrencyGuard
//!          │      copy(key)                │  KeyCopier (source ─► target)
//!          │    }                          │
//!          │    governor.should_continue() │  Governor (target INFO memory)
//!          │  }                            │
//!          └───────────────────────────────┘
//! ```
//!
//! Pages are scanned on each shard node directly, but values and TTLs are
//! read through the shared source client, which routes every key to the
//! node that owns it. Each shard's cursor is local to its own task; there
//! is no shared progress state.
//!
//! A pass is always safe to repeat: copies re-read source immediately
//! before writing, so a re-run converges target onto the latest source
//! state and picks up keys missed by failed copies.

pub mod copier;
pub mod scanner;
pub mod topology;

use std::sync::Arc;
use std::time::Instant;

use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::backpressure::{Governor, StopReason, Verdict};
use crate::config::StoreMode;
use crate::context::ProxyContext;
use crate::storage::traits::{KvStore, ShardConnector, StoreError};

use copier::{CopyOutcome, KeyCopier};
use scanner::{NodeScanner, START_CURSOR};
use topology::{discover, RegexTopology, ShardDescriptor, TopologyParser};

/// Where one shard's loop currently is. Handed to the governor after
/// every page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardProgress {
    pub shard: String,
    /// Cursor returned by the last scan
    pub cursor: u64,
    pub pages: u64,
}

/// Result of migrating one shard for one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardReport {
    pub shard: String,
    pub pages: u64,
    pub keys_scanned: u64,
    pub copied: u64,
    /// Keys returned by SCAN that were gone by the time they were copied
    pub absent: u64,
    pub failed: u64,
    pub stop_reason: StopReason,
}

impl ShardReport {
    fn new(shard: &ShardDescriptor) -> Self {
        Self {
            shard: shard.addr.clone(),
            pages: 0,
            keys_scanned: 0,
            copied: 0,
            absent: 0,
            failed: 0,
            stop_reason: StopReason::Exhausted,
        }
    }
}

/// Result of one full pass over every shard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub shards: Vec<ShardReport>,
}

impl MigrationReport {
    #[must_use]
    pub fn copied(&self) -> u64 {
        self.shards.iter().map(|s| s.copied).sum()
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.shards.iter().map(|s| s.failed).sum()
    }

    #[must_use]
    pub fn pages(&self) -> u64 {
        self.shards.iter().map(|s| s.pages).sum()
    }

    /// Every shard ran to the end of its key space.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.shards
            .iter()
            .all(|s| s.stop_reason == StopReason::Exhausted)
    }

    /// The report for one shard address.
    #[must_use]
    pub fn shard(&self, addr: &str) -> Option<&ShardReport> {
        self.shards.iter().find(|s| s.shard == addr)
    }
}

/// Orchestrates per-shard copy loops.
pub struct Migrator {
    ctx: Arc<ProxyContext>,
    connector: Arc<dyn ShardConnector>,
    parser: Arc<dyn TopologyParser>,
}

impl Migrator {
    #[must_use]
    pub fn new(ctx: Arc<ProxyContext>, connector: Arc<dyn ShardConnector>) -> Self {
        Self {
            ctx,
            connector,
            parser: Arc::new(RegexTopology::default()),
        }
    }

    #[must_use]
    pub fn with_parser(mut self, parser: impl TopologyParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    /// Shards to migrate. A standalone source is its own single shard.
    pub async fn shards(&self) -> Vec<ShardDescriptor> {
        match self.ctx.config.source_mode {
            StoreMode::Standalone => vec![ShardDescriptor::new(self.ctx.config.source.clone())],
            StoreMode::Cluster => discover(self.ctx.source.as_ref(), self.parser.as_ref()).await,
        }
    }

    async fn open(&self, shard: &ShardDescriptor) -> Result<Arc<dyn KvStore>, StoreError> {
        match self.ctx.config.source_mode {
            StoreMode::Standalone => Ok(self.ctx.source.clone()),
            StoreMode::Cluster => self.connector.connect(shard).await,
        }
    }

    /// One pass over every shard, in parallel. Returns when every shard
    /// has stopped.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> MigrationReport {
        let start = Instant::now();
        let shards = self.shards().await;
        if shards.is_empty() {
            warn!("No shards discovered, nothing to migrate");
            return MigrationReport::default();
        }
        info!(shards = shards.len(), "Starting migration pass");

        let mut join_set: JoinSet<ShardReport> = JoinSet::new();
        for shard in shards {
            let store = match self.open(&shard).await {
                Ok(store) => store,
                Err(e) => {
                    error!(shard = %shard, error = %e, "Failed to connect to shard");
                    let mut report = ShardReport::new(&shard);
                    report.stop_reason = StopReason::ConnectFailed(e.to_string());
                    join_set.spawn(async move { report });
                    continue;
                }
            };
            let ctx = self.ctx.clone();
            join_set.spawn(async move { migrate_shard(ctx, store, shard).await });
        }

        let mut report = MigrationReport::default();
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(shard_report) => report.shards.push(shard_report),
                Err(e) => error!(error = %e, "Shard task panicked"),
            }
        }
        report.shards.sort_by(|a, b| a.shard.cmp(&b.shard));

        crate::metrics::record_pass_duration(start.elapsed());
        info!(
            shards = report.shards.len(),
            pages = report.pages(),
            copied = report.copied(),
            failed = report.failed(),
            complete = report.is_complete(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Migration pass finished"
        );
        report
    }

    /// Run one pass, or passes forever when a rescan interval is
    /// configured. Returns the report of the last pass.
    pub async fn run(&self) -> MigrationReport {
        loop {
            let report = self.run_once().await;
            let Some(interval) = self.ctx.config.rescan_interval() else {
                return report;
            };
            debug!(interval_secs = interval.as_secs(), "Waiting before next migration pass");
            tokio::time::sleep(interval).await;
        }
    }

    /// Run in the background.
    pub fn spawn(self) -> JoinHandle<MigrationReport> {
        tokio::spawn(async move { self.run().await })
    }
}

/// Scan one shard to exhaustion (or until the governor says stop),
/// copying every key under exclusive access.
async fn migrate_shard(
    ctx: Arc<ProxyContext>,
    shard_store: Arc<dyn KvStore>,
    shard: ShardDescriptor,
) -> ShardReport {
    let scanner = NodeScanner::new(shard_store, ctx.config.scan_pattern.clone(), ctx.config.scan_count);
    let copier = KeyCopier::new(ctx.source.clone(), ctx.target.clone());
    let governor = Governor::new(ctx.target.clone(), ctx.config.memory_ceiling());

    let mut report = ShardReport::new(&shard);
    let mut progress = ShardProgress {
        shard: shard.addr.clone(),
        cursor: START_CURSOR,
        pages: 0,
    };

    crate::metrics::shard_started();
    info!(shard = %shard, "Shard migration started");

    loop {
        let page = match scanner.scan(progress.cursor).await {
            Ok(page) => page,
            Err(e) => {
                error!(shard = %shard, cursor = progress.cursor, error = %e, "Scan failed, stopping shard");
                report.stop_reason = StopReason::ScanFailed(e.to_string());
                break;
            }
        };
        progress.cursor = page.cursor;
        progress.pages += 1;
        report.pages += 1;
        report.keys_scanned += page.keys.len() as u64;
        crate::metrics::record_page_scanned(page.keys.len());
        debug!(shard = %shard, cursor = page.cursor, keys = page.keys.len(), "Scanned page");

        for key in &page.keys {
            match copier.copy(&ctx.guard, key).await {
                Ok(CopyOutcome::Copied(_)) => {
                    report.copied += 1;
                    crate::metrics::record_key_copied();
                }
                Ok(CopyOutcome::Absent) => report.absent += 1,
                Err(e) => {
                    // Skipped for this pass; a later pass or a GET heals it.
                    warn!(shard = %shard, key = %String::from_utf8_lossy(key), error = %e, "Copy failed");
                    report.failed += 1;
                    crate::metrics::record_copy_failure();
                }
            }
        }

        match governor.should_continue(&progress).await {
            Verdict::Continue => {}
            Verdict::Stop(reason) => {
                report.stop_reason = reason;
                break;
            }
        }
    }

    crate::metrics::shard_finished(report.stop_reason.label());
    info!(
        shard = %shard,
        pages = report.pages,
        copied = report.copied,
        absent = report.absent,
        failed = report.failed,
        reason = %report.stop_reason,
        "Shard migration stopped"
    );
    report
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cursor-based pagination over one shard's key space.
//!
//! `SCAN` is not a snapshot: keys written or deleted during a pass may be
//! returned zero or one times, and a key can appear on more than one page.
//! The copier is idempotent, so duplicates are harmless.

use std::sync::Arc;

use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::traits::{KvStore, ScanPage, StoreError};

/// Cursor value that both starts a scan and, when returned, ends it.
pub const START_CURSOR: u64 = 0;

pub struct NodeScanner {
    shard: Arc<dyn KvStore>,
    pattern: String,
    count: usize,
    retry: RetryConfig,
}

impl NodeScanner {
    #[must_use]
    pub fn new(shard: Arc<dyn KvStore>, pattern: impl Into<String>, count: usize) -> Self {
        Self {
            shard,
            pattern: pattern.into(),
            count: count.max(1),
            retry: RetryConfig::query(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch the page after `cursor`. A returned cursor of
    /// [`START_CURSOR`] means the shard is exhausted.
    pub async fn scan(&self, cursor: u64) -> Result<ScanPage, StoreError> {
        retry("shard_scan", &self.retry, || {
            self.shard.scan(cursor, &self.pattern, self.count)
        })
        .await
    }

    /// The shard this scanner reads.
    pub fn shard(&self) -> &Arc<dyn KvStore> {
        &self.shard
    }
}

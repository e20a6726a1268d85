// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Single-key copy from source to target, preserving TTL.
//!
//! Idempotent: source is re-read immediately before every write, so
//! copying the same key twice leaves target with the latest source state.

use std::sync::Arc;

use tracing::trace;

use crate::guard::ConcurrencyGuard;
use crate::storage::traits::{KvStore, StoreError, Ttl};

/// What a copy did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Value written to target with the given TTL
    Copied(Ttl),
    /// Key not present in source (nothing written, no tombstone)
    Absent,
}

/// Write a value just read from `source` into `target` with source's TTL.
///
/// Returns `Absent` if the key vanished (expired or deleted) between the
/// value read and the TTL read, in which case nothing is written.
pub(crate) async fn write_with_source_ttl(
    source: &dyn KvStore,
    target: &dyn KvStore,
    key: &[u8],
    value: &[u8],
) -> Result<CopyOutcome, StoreError> {
    let ttl = source.ttl(key).await?;
    if ttl == Ttl::Missing {
        return Ok(CopyOutcome::Absent);
    }
    target.set(key, value, ttl.as_write_ttl()).await?;
    Ok(CopyOutcome::Copied(ttl))
}

/// Copies keys from one source shard into target.
pub struct KeyCopier {
    source: Arc<dyn KvStore>,
    target: Arc<dyn KvStore>,
}

impl KeyCopier {
    #[must_use]
    pub fn new(source: Arc<dyn KvStore>, target: Arc<dyn KvStore>) -> Self {
        Self { source, target }
    }

    /// Copy one key under exclusive access, so the copy cannot interleave
    /// with a client write to the same key.
    pub async fn copy(&self, guard: &ConcurrencyGuard, key: &[u8]) -> Result<CopyOutcome, StoreError> {
        let _exclusive = guard.exclusive().await;
        self.copy_unguarded(key).await
    }

    /// Copy one key. Caller must hold exclusive access.
    pub async fn copy_unguarded(&self, key: &[u8]) -> Result<CopyOutcome, StoreError> {
        let Some(value) = self.source.get(key).await? else {
            trace!(key = %String::from_utf8_lossy(key), "Key absent in source, skipping");
            return Ok(CopyOutcome::Absent);
        };
        write_with_source_ttl(self.source.as_ref(), self.target.as_ref(), key, &value).await
    }
}

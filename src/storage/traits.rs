// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::migration::topology::ShardDescriptor;
use crate::resilience::retry::Transient;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),
    #[error("Unexpected reply from store: {0}")]
    Protocol(String),
    #[error("Failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        // Redis client errors are flattened to text; connection-level
        // failures are the ones worth another attempt.
        match self {
            StoreError::Connect { .. } => true,
            StoreError::Backend(msg) => {
                let msg = msg.to_ascii_lowercase();
                ["io error", "connection", "timed out", "broken pipe", "tryagain", "loading"]
                    .iter()
                    .any(|needle| msg.contains(needle))
            }
            StoreError::Protocol(_) => false,
        }
    }
}

/// Remaining lifetime of a key, as reported by `PTTL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key does not exist (PTTL -2)
    Missing,
    /// The key exists without an expiry (PTTL -1)
    Persistent,
    /// The key expires after this duration
    Expires(Duration),
}

impl Ttl {
    /// Decode a raw `PTTL` reply.
    #[must_use]
    pub fn from_pttl(millis: i64) -> Self {
        match millis {
            -2 => Self::Missing,
            m if m < 0 => Self::Persistent,
            // PTTL 0 means "expiring right now"; keep at least 1ms so a copy
            // never turns it into a persistent key.
            m => Self::Expires(Duration::from_millis(m.max(1) as u64)),
        }
    }

    /// The TTL to apply when writing the key elsewhere.
    #[must_use]
    pub fn as_write_ttl(&self) -> Option<Duration> {
        match self {
            Self::Expires(d) => Some(*d),
            Self::Persistent | Self::Missing => None,
        }
    }
}

/// One page of a cursor-based key scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub keys: Vec<Vec<u8>>,
    /// Cursor for the next call; 0 once the key space is exhausted.
    pub cursor: u64,
}

/// A node serving a slot range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotNode {
    pub ip: String,
    pub port: u16,
    pub id: String,
}

/// One entry of `CLUSTER SLOTS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
    /// Master first, then replicas
    pub nodes: Vec<SlotNode>,
}

/// Client for one logical store endpoint (a cluster, or a single node).
///
/// Implementations must be safe for concurrent use by many tasks.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a value. `ttl = None` stores it without expiry (clearing any previous one).
    async fn set(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Returns the number of keys removed.
    async fn del(&self, key: &[u8]) -> Result<u64, StoreError>;

    /// Set a TTL in seconds. Non-positive values delete the key.
    /// Returns whether the key existed.
    async fn expire(&self, key: &[u8], seconds: i64) -> Result<bool, StoreError>;

    async fn exists(&self, key: &[u8]) -> Result<u64, StoreError>;

    async fn ttl(&self, key: &[u8]) -> Result<Ttl, StoreError>;

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, StoreError>;

    async fn info(&self, section: Option<&str>) -> Result<String, StoreError>;

    async fn cluster_nodes(&self) -> Result<String, StoreError>;

    async fn cluster_slots(&self) -> Result<Vec<SlotRange>, StoreError>;
}

/// Opens a direct connection to a single shard of the source cluster.
#[async_trait]
pub trait ShardConnector: Send + Sync {
    async fn connect(&self, shard: &ShardDescriptor) -> Result<Arc<dyn KvStore>, StoreError>;
}

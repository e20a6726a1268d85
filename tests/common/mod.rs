//! Shared fixtures for the integration-style tests.
//!
//! - [`FailingStore`]: an in-memory store with per-operation error and delay injection
//! - [`RecordingStore`]: counts every call that reaches a store
//! - [`StaticConnector`]: hands out pre-built shard stores by address

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use migrate_proxy::{
    InMemoryStore, KvStore, ProxyConfig, ProxyContext, ScanPage, ShardConnector, ShardDescriptor, SlotRange,
    StoreError, StoreMode, Ttl,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Set,
    Del,
    Expire,
    Exists,
    Ttl,
    Scan,
    Info,
    ClusterNodes,
    ClusterSlots,
}

/// In-memory store whose operations can be made to fail or stall on demand.
pub struct FailingStore {
    inner: Arc<InMemoryStore>,
    failing: Mutex<HashSet<Op>>,
    delays: Mutex<HashMap<Op, Duration>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::wrap(Arc::new(InMemoryStore::new()))
    }

    pub fn wrap(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail(&self, op: Op) {
        self.failing.lock().insert(op);
    }

    pub fn heal(&self, op: Op) {
        self.failing.lock().remove(&op);
    }

    /// Suspend every call to `op` for `delay` before it reaches the store.
    pub fn stall(&self, op: Op, delay: Duration) {
        self.delays.lock().insert(op, delay);
    }

    pub fn inner(&self) -> &Arc<InMemoryStore> {
        &self.inner
    }

    async fn check(&self, op: Op) -> Result<(), StoreError> {
        let delay = self.delays.lock().get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().contains(&op) {
            return Err(StoreError::Backend(format!("injected {:?} failure", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.check(Op::Get).await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError> {
        self.check(Op::Set).await?;
        self.inner.set(key, value, ttl).await
    }

    async fn del(&self, key: &[u8]) -> Result<u64, StoreError> {
        self.check(Op::Del).await?;
        self.inner.del(key).await
    }

    async fn expire(&self, key: &[u8], seconds: i64) -> Result<bool, StoreError> {
        self.check(Op::Expire).await?;
        self.inner.expire(key, seconds).await
    }

    async fn exists(&self, key: &[u8]) -> Result<u64, StoreError> {
        self.check(Op::Exists).await?;
        self.inner.exists(key).await
    }

    async fn ttl(&self, key: &[u8]) -> Result<Ttl, StoreError> {
        self.check(Op::Ttl).await?;
        self.inner.ttl(key).await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, StoreError> {
        self.check(Op::Scan).await?;
        self.inner.scan(cursor, pattern, count).await
    }

    async fn info(&self, section: Option<&str>) -> Result<String, StoreError> {
        self.check(Op::Info).await?;
        self.inner.info(section).await
    }

    async fn cluster_nodes(&self) -> Result<String, StoreError> {
        self.check(Op::ClusterNodes).await?;
        self.inner.cluster_nodes().await
    }

    async fn cluster_slots(&self) -> Result<Vec<SlotRange>, StoreError> {
        self.check(Op::ClusterSlots).await?;
        self.inner.cluster_slots().await
    }
}

/// Records every operation before forwarding it.
pub struct RecordingStore {
    inner: Arc<dyn KvStore>,
    calls: Mutex<Vec<Op>>,
}

impl RecordingStore {
    pub fn new(inner: Arc<dyn KvStore>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Op> {
        self.calls.lock().clone()
    }

    pub fn total(&self) -> usize {
        self.calls.lock().len()
    }

    fn record(&self, op: Op) {
        self.calls.lock().push(op);
    }
}

#[async_trait]
impl KvStore for RecordingStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.record(Op::Get);
        self.inner.get(key).await
    }

    async fn set(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError> {
        self.record(Op::Set);
        self.inner.set(key, value, ttl).await
    }

    async fn del(&self, key: &[u8]) -> Result<u64, StoreError> {
        self.record(Op::Del);
        self.inner.del(key).await
    }

    async fn expire(&self, key: &[u8], seconds: i64) -> Result<bool, StoreError> {
        self.record(Op::Expire);
        self.inner.expire(key, seconds).await
    }

    async fn exists(&self, key: &[u8]) -> Result<u64, StoreError> {
        self.record(Op::Exists);
        self.inner.exists(key).await
    }

    async fn ttl(&self, key: &[u8]) -> Result<Ttl, StoreError> {
        self.record(Op::Ttl);
        self.inner.ttl(key).await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, StoreError> {
        self.record(Op::Scan);
        self.inner.scan(cursor, pattern, count).await
    }

    async fn info(&self, section: Option<&str>) -> Result<String, StoreError> {
        self.record(Op::Info);
        self.inner.info(section).await
    }

    async fn cluster_nodes(&self) -> Result<String, StoreError> {
        self.record(Op::ClusterNodes);
        self.inner.cluster_nodes().await
    }

    async fn cluster_slots(&self) -> Result<Vec<SlotRange>, StoreError> {
        self.record(Op::ClusterSlots);
        self.inner.cluster_slots().await
    }
}

/// Hands out pre-built stores by shard address.
#[derive(Default)]
pub struct StaticConnector {
    shards: HashMap<String, Arc<dyn KvStore>>,
}

impl StaticConnector {
    pub fn with_shard(mut self, addr: &str, store: Arc<dyn KvStore>) -> Self {
        self.shards.insert(addr.to_string(), store);
        self
    }
}

#[async_trait]
impl ShardConnector for StaticConnector {
    async fn connect(&self, shard: &ShardDescriptor) -> Result<Arc<dyn KvStore>, StoreError> {
        self.shards.get(&shard.addr).cloned().ok_or_else(|| StoreError::Connect {
            addr: shard.addr.clone(),
            reason: "no such shard".into(),
        })
    }
}

/// Config for a single standalone source shard.
pub fn standalone_config() -> ProxyConfig {
    ProxyConfig {
        source: "127.0.0.1:6400".into(),
        target: "127.0.0.1:6401".into(),
        source_mode: StoreMode::Standalone,
        target_mode: StoreMode::Standalone,
        ..ProxyConfig::default()
    }
}

pub fn context(source: Arc<dyn KvStore>, target: Arc<dyn KvStore>, config: ProxyConfig) -> Arc<ProxyContext> {
    Arc::new(ProxyContext::new(source, target, config))
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis-backed [`KvStore`].
//!
//! Two connection shapes are kept per endpoint:
//! - a **data** connection for key commands: a `ConnectionManager` for a
//!   standalone node, or a slot-routing `ClusterConnection` for a cluster
//! - an **admin** connection to the configured seed node, used for
//!   `INFO`, `CLUSTER NODES`, `CLUSTER SLOTS` and `SCAN`, which are
//!   per-node commands and must not be routed by key slot

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{cmd, Client, Cmd, FromRedisValue, RedisResult, Value};
use tracing::{debug, info};

use super::traits::{KvStore, ScanPage, ShardConnector, SlotNode, SlotRange, StoreError, Ttl};
use crate::config::StoreMode;
use crate::migration::topology::ShardDescriptor;
use crate::resilience::retry::{retry, RetryConfig};

#[derive(Clone)]
enum DataConnection {
    Standalone(ConnectionManager),
    Cluster(ClusterConnection),
}

impl DataConnection {
    async fn query<T: FromRedisValue + Send>(&self, command: &Cmd) -> RedisResult<T> {
        match self {
            Self::Standalone(conn) => {
                let mut conn = conn.clone();
                command.query_async(&mut conn).await
            }
            Self::Cluster(conn) => {
                let mut conn = conn.clone();
                command.query_async(&mut conn).await
            }
        }
    }
}

pub struct RedisStore {
    addr: String,
    data: DataConnection,
    admin: ConnectionManager,
    retry: RetryConfig,
}

/// DEL and EXPIRE answer differently once applied: a retry after a dropped
/// reply would report 0 for a key the first attempt removed.
const UNREPLAYABLE: &[&str] = &["redis_del", "redis_expire"];

fn replay_policy(base: &RetryConfig, name: &str) -> RetryConfig {
    if UNREPLAYABLE.contains(&name) {
        RetryConfig::none()
    } else {
        base.clone()
    }
}

/// Accept both `host:port` and full `redis://` URLs.
fn to_url(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("redis://{}", addr)
    }
}

impl RedisStore {
    /// Connect to an endpoint, retrying with the startup preset.
    pub async fn connect(addr: &str, mode: StoreMode) -> Result<Self, StoreError> {
        let url = to_url(addr);
        let connect_err = |e: redis::RedisError| StoreError::Connect {
            addr: addr.to_string(),
            reason: e.to_string(),
        };

        let client = Client::open(url.as_str()).map_err(connect_err)?;
        let admin = retry("redis_connect", &RetryConfig::startup(), || {
            ConnectionManager::new(client.clone())
        })
        .await
        .map_err(connect_err)?;

        let data = match mode {
            StoreMode::Standalone => DataConnection::Standalone(admin.clone()),
            StoreMode::Cluster => {
                let cluster = ClusterClient::new(vec![url.clone()]).map_err(connect_err)?;
                let conn = retry("redis_cluster_connect", &RetryConfig::startup(), || {
                    cluster.get_async_connection()
                })
                .await
                .map_err(connect_err)?;
                DataConnection::Cluster(conn)
            }
        };

        info!(addr = %addr, mode = %mode, "Connected to store");
        Ok(Self {
            addr: addr.to_string(),
            data,
            admin,
            retry: RetryConfig::query(),
        })
    }

    /// Override the per-command retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn run<T: FromRedisValue + Send>(&self, name: &str, command: Cmd) -> Result<T, StoreError> {
        self.run_with(name, &self.retry, command).await
    }

    /// Single attempt for commands whose reply changes when replayed.
    async fn run_unreplayable<T: FromRedisValue + Send>(&self, name: &str, command: Cmd) -> Result<T, StoreError> {
        self.run_with(name, &replay_policy(&self.retry, name), command).await
    }

    async fn run_with<T: FromRedisValue + Send>(
        &self,
        name: &str,
        policy: &RetryConfig,
        command: Cmd,
    ) -> Result<T, StoreError> {
        retry(name, policy, || self.data.query(&command))
            .await
            .map_err(StoreError::from)
    }

    async fn run_admin<T: FromRedisValue + Send>(&self, name: &str, command: Cmd) -> Result<T, StoreError> {
        retry(name, &self.retry, || {
            let mut conn = self.admin.clone();
            let command = command.clone();
            async move { command.query_async(&mut conn).await }
        })
        .await
        .map_err(StoreError::from)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let mut c = cmd("GET");
        c.arg(key);
        self.run("redis_get", c).await
    }

    async fn set(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut c = cmd("SET");
        c.arg(key).arg(value);
        if let Some(ttl) = ttl {
            c.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        self.run("redis_set", c).await
    }

    async fn del(&self, key: &[u8]) -> Result<u64, StoreError> {
        let mut c = cmd("DEL");
        c.arg(key);
        self.run_unreplayable("redis_del", c).await
    }

    async fn expire(&self, key: &[u8], seconds: i64) -> Result<bool, StoreError> {
        let mut c = cmd("EXPIRE");
        c.arg(key).arg(seconds);
        let set: i64 = self.run_unreplayable("redis_expire", c).await?;
        Ok(set == 1)
    }

    async fn exists(&self, key: &[u8]) -> Result<u64, StoreError> {
        let mut c = cmd("EXISTS");
        c.arg(key);
        self.run("redis_exists", c).await
    }

    async fn ttl(&self, key: &[u8]) -> Result<Ttl, StoreError> {
        let mut c = cmd("PTTL");
        c.arg(key);
        let millis: i64 = self.run("redis_pttl", c).await?;
        Ok(Ttl::from_pttl(millis))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage, StoreError> {
        let mut c = cmd("SCAN");
        c.arg(cursor).arg("MATCH").arg(pattern).arg("COUNT").arg(count);
        let (cursor, keys): (u64, Vec<Vec<u8>>) = self.run_admin("redis_scan", c).await?;
        debug!(addr = %self.addr, cursor, keys = keys.len(), "Scanned page");
        Ok(ScanPage { keys, cursor })
    }

    async fn info(&self, section: Option<&str>) -> Result<String, StoreError> {
        let mut c = cmd("INFO");
        if let Some(section) = section {
            c.arg(section);
        }
        self.run_admin("redis_info", c).await
    }

    async fn cluster_nodes(&self) -> Result<String, StoreError> {
        let mut c = cmd("CLUSTER");
        c.arg("NODES");
        self.run_admin("redis_cluster_nodes", c).await
    }

    async fn cluster_slots(&self) -> Result<Vec<SlotRange>, StoreError> {
        let mut c = cmd("CLUSTER");
        c.arg("SLOTS");
        let raw: Value = self.run_admin("redis_cluster_slots", c).await?;
        parse_cluster_slots(raw)
    }
}

fn value_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::BulkString(b) => std::str::from_utf8(b).ok()?.parse().ok(),
        Value::SimpleString(s) => s.parse().ok(),
        _ => None,
    }
}

fn value_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(b) => Some(String::from_utf8_lossy(b).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

fn protocol(what: &str) -> StoreError {
    StoreError::Protocol(format!("malformed CLUSTER SLOTS reply: {}", what))
}

/// Decode a raw `CLUSTER SLOTS` reply:
/// `[[start, end, [ip, port, id, ...], [ip, port, id, ...]...], ...]`
pub(crate) fn parse_cluster_slots(raw: Value) -> Result<Vec<SlotRange>, StoreError> {
    let Value::Array(entries) = raw else {
        return Err(protocol("expected array"));
    };

    let mut ranges = Vec::with_capacity(entries.len());
    for entry in entries {
        let Value::Array(items) = entry else {
            return Err(protocol("expected slot entry array"));
        };
        if items.len() < 2 {
            return Err(protocol("slot entry too short"));
        }

        let start = value_int(&items[0]).ok_or_else(|| protocol("bad start slot"))?;
        let end = value_int(&items[1]).ok_or_else(|| protocol("bad end slot"))?;

        let mut nodes = Vec::with_capacity(items.len() - 2);
        for node in &items[2..] {
            let Value::Array(fields) = node else {
                return Err(protocol("expected node array"));
            };
            let ip = fields.first().and_then(value_string).ok_or_else(|| protocol("bad node ip"))?;
            let port = fields
                .get(1)
                .and_then(value_int)
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| protocol("bad node port"))?;
            let id = fields.get(2).and_then(value_string).unwrap_or_default();
            nodes.push(SlotNode { ip, port, id });
        }

        ranges.push(SlotRange {
            start: u16::try_from(start).map_err(|_| protocol("start slot out of range"))?,
            end: u16::try_from(end).map_err(|_| protocol("end slot out of range"))?,
            nodes,
        });
    }
    Ok(ranges)
}

/// Opens standalone connections to individual source shards.
#[derive(Debug, Clone, Default)]
pub struct RedisConnector;

#[async_trait]
impl ShardConnector for RedisConnector {
    async fn connect(&self, shard: &ShardDescriptor) -> Result<Arc<dyn KvStore>, StoreError> {
        let store = RedisStore::connect(&shard.addr, StoreMode::Standalone).await?;
        Ok(Arc::new(store))
    }
}

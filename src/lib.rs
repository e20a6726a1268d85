//! # Migrate Proxy
//!
//! A zero-downtime migration proxy between two Redis deployments.
//!
//! ## Architecture
//!
//! Clients talk to one endpoint while data moves from an old store
//! (`source`) to a new one (`target`). Source stays authoritative until
//! migration is complete, so it can be decommissioned afterwards.
//!
//! ```text
//!                    ┌──────────────────────────────────────┐
//!   clients ──RESP──►│  ProxyServer ──► Dispatcher          │
//!                    │                    │  GET  read-through
//!                    │                    │  SET  write-through
//!                    │                    │  DEL / EXPIRE  delete/expire-through
//!                    │                    │  EXISTS  source only
//!                    │                    ▼                 │
//!                    │            ConcurrencyGuard          │
//!                    │                    ▲                 │
//!                    │                    │ exclusive per key copy
//!                    │  Migrator ─► NodeScanner ─► KeyCopier│
//!                    │      │                      Governor │
//!                    └──────┼───────────────────────────────┘
//!                           ▼
//!                 source ════════════► target
//! ```
//!
//! There is no journal and no third system: correctness comes from access
//! ordering. Every mutation and every bulk copy takes exclusive access on
//! one shared [`ConcurrencyGuard`], so a copy can never overwrite a newer
//! client write.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use migrate_proxy::{Dispatcher, Migrator, ProxyConfig, ProxyContext, ProxyServer, RedisConnector};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ProxyConfig {
//!         source: "10.0.0.1:6379".into(),
//!         target: "10.0.1.1:6379".into(),
//!         memory_limit: 8 << 30,
//!         ..Default::default()
//!     };
//!
//!     let ctx = Arc::new(ProxyContext::connect(config.clone()).await?);
//!     Migrator::new(ctx.clone(), Arc::new(RedisConnector)).spawn();
//!
//!     let server = ProxyServer::bind(&config.listen, Dispatcher::new(ctx)).await?;
//!     server.serve().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Read-through / write-through**: GETs heal target lazily, writes
//!   reach source before target
//! - **Parallel bulk copy**: one task per source shard, TTLs preserved
//! - **Backpressure**: stops copying when target memory passes a ceiling
//! - **Periodic re-runs**: optional rescan interval to catch missed keys
//! - **Retry Logic**: bounded backoff for transient store failures
//!
//! ## Configuration
//!
//! See [`ProxyConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`dispatch`]: Per-command source/target routing
//! - [`migration`]: Topology discovery, scanning, copying, orchestration
//! - [`backpressure`]: Target memory governor
//! - [`guard`]: Shared/exclusive access domain
//! - [`storage`]: Store clients (Redis, in-memory)
//! - [`server`]: RESP2 TCP front end
//! - [`resilience`]: Retry logic

pub mod backpressure;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod guard;
pub mod metrics;
pub mod migration;
pub mod resilience;
pub mod server;
pub mod storage;

pub use backpressure::{Governor, MemoryPressure, StopReason, Verdict};
pub use config::{ProxyConfig, StoreMode};
pub use context::ProxyContext;
pub use dispatch::{AfterReply, Command, Dispatcher, Outcome, Reply};
pub use guard::ConcurrencyGuard;
pub use migration::copier::{CopyOutcome, KeyCopier};
pub use migration::scanner::NodeScanner;
pub use migration::topology::{RegexTopology, ShardDescriptor, TopologyParser};
pub use migration::{MigrationReport, Migrator, ShardProgress, ShardReport};
pub use resilience::retry::RetryConfig;
pub use server::{DetachedConn, LoggingHooks, ProxyServer, ServerError, ServerHooks};
pub use storage::traits::{KvStore, ScanPage, ShardConnector, SlotNode, SlotRange, StoreError, Ttl};
pub use storage::{InMemoryStore, RedisConnector, RedisStore};
pub use metrics::CommandTimer;

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-command routing between source and target.
//!
//! # Policy
//!
//! | Command | Guard | Source | Target |
//! |---------|-------|--------|--------|
//! | `GET` | shared | on target miss | read first, healed on miss |
//! | `SET` | exclusive | authoritative, first | best-effort, only after source succeeded |
//! | `DEL` | exclusive | authoritative | best-effort |
//! | `EXPIRE` | exclusive | authoritative | best-effort |
//! | `EXISTS` | exclusive | authoritative | never consulted |
//! | `INFO`, `CLUSTER` | none | proxied | - |
//!
//! Source stays the authority of record until migration completes. A
//! target failure on a best-effort path is logged and counted, never
//! surfaced to the client: a later `GET` or migration pass heals it.
//!
//! Arity is validated before any guard or store access.

pub mod reply;

use std::ops::RangeInclusive;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::context::ProxyContext;
use crate::metrics::{self, CommandTimer};
use crate::migration::copier::{write_with_source_ttl, CopyOutcome};
use crate::storage::traits::StoreError;

pub use reply::Reply;

/// One client command: name followed by positional arguments, all opaque
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    #[must_use]
    pub fn new(args: Vec<Bytes>) -> Self {
        Self { args }
    }

    /// Lowercased command name.
    #[must_use]
    pub fn name(&self) -> String {
        self.args
            .first()
            .map(|n| String::from_utf8_lossy(n).to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// Number of arguments including the name.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    fn arg(&self, i: usize) -> &[u8] {
        self.args.get(i).map(|a| &a[..]).unwrap_or_default()
    }
}

impl<T: Into<Bytes>> FromIterator<T> for Command {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

/// What the connection does after the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterReply {
    Continue,
    /// Flush the reply, then close (QUIT)
    Close,
    /// Hand the connection and the reply to the server's detach hook
    Detach,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub reply: Reply,
    pub after: AfterReply,
}

impl From<Reply> for Outcome {
    fn from(reply: Reply) -> Self {
        Self { reply, after: AfterReply::Continue }
    }
}

/// Static names for metric labels (unknown commands share one label).
fn metric_name(name: &str) -> &'static str {
    match name {
        "ping" => "ping",
        "info" => "info",
        "cluster" => "cluster",
        "get" => "get",
        "set" => "set",
        "del" => "del",
        "expire" => "expire",
        "exists" => "exists",
        "quit" => "quit",
        "detach" => "detach",
        _ => "unknown",
    }
}

/// Accepted argument counts, including the name. `None` for unknown commands.
fn expected_arity(name: &str) -> Option<RangeInclusive<usize>> {
    Some(match name {
        "ping" | "quit" | "detach" => 1..=1,
        "info" => 1..=2,
        "cluster" | "get" | "del" | "exists" => 2..=2,
        "set" | "expire" => 3..=3,
        _ => return None,
    })
}

fn source_error(e: &StoreError) -> Reply {
    Reply::error(format!("ERR source: {}", e))
}

/// Routes client commands to source and target.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<ProxyContext>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(ctx: Arc<ProxyContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ProxyContext> {
        &self.ctx
    }

    /// Produce exactly one reply for `cmd`.
    pub async fn dispatch(&self, cmd: &Command) -> Outcome {
        let name = cmd.name();
        let label = metric_name(&name);
        let _timer = CommandTimer::new(label);
        debug!(command = %name, arity = cmd.arity(), "Dispatching command");

        let outcome = match expected_arity(&name) {
            None => Reply::unknown_command(&name).into(),
            Some(range) if !range.contains(&cmd.arity()) => Reply::wrong_arity(&name).into(),
            Some(_) => self.execute(&name, cmd).await,
        };

        metrics::record_command(label, outcome.reply.status_label());
        outcome
    }

    /// Run a command whose arity has already been checked.
    async fn execute(&self, name: &str, cmd: &Command) -> Outcome {
        match name {
            "ping" => Reply::Status("PONG".into()).into(),
            "info" => self.info(cmd).await.into(),
            "cluster" => self.cluster(cmd).await.into(),
            "get" => self.get(cmd.arg(1)).await.into(),
            "set" => self.set(cmd.arg(1), cmd.arg(2)).await.into(),
            "del" => self.del(cmd.arg(1)).await.into(),
            "expire" => self.expire(cmd.arg(1), cmd.arg(2)).await.into(),
            "exists" => self.exists(cmd.arg(1)).await.into(),
            "quit" => Outcome { reply: Reply::ok(), after: AfterReply::Close },
            "detach" => Outcome { reply: Reply::ok(), after: AfterReply::Detach },
            _ => Reply::unknown_command(name).into(),
        }
    }

    async fn info(&self, cmd: &Command) -> Reply {
        let section = (cmd.arity() == 2).then(|| String::from_utf8_lossy(cmd.arg(1)).into_owned());
        match self.ctx.source.info(section.as_deref()).await {
            Ok(text) => Reply::bulk(text),
            Err(e) => source_error(&e),
        }
    }

    async fn cluster(&self, cmd: &Command) -> Reply {
        let sub = String::from_utf8_lossy(cmd.arg(1)).to_ascii_lowercase();
        match sub.as_str() {
            "nodes" => match self.ctx.source.cluster_nodes().await {
                Ok(text) => Reply::bulk(text),
                Err(e) => source_error(&e),
            },
            "slots" => match self.ctx.source.cluster_slots().await {
                Ok(slots) => Reply::from_slots(&slots),
                Err(e) => source_error(&e),
            },
            _ => Reply::error(format!("ERR unknown subcommand '{}' for 'cluster'", sub)),
        }
    }

    /// Read-through: target first, then source, healing target on the way.
    async fn get(&self, key: &[u8]) -> Reply {
        let _shared = self.ctx.guard.shared().await;

        match self.ctx.target.get(key).await {
            Ok(Some(value)) => {
                metrics::record_read_through(true);
                return Reply::bulk(value);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Target read failed, falling back to source"),
        }

        let value = match self.ctx.source.get(key).await {
            Ok(Some(value)) => value,
            Ok(None) => return Reply::Nil,
            Err(e) => {
                warn!(error = %e, "Source read failed");
                return source_error(&e);
            }
        };
        metrics::record_read_through(false);

        match write_with_source_ttl(self.ctx.source.as_ref(), self.ctx.target.as_ref(), key, &value).await {
            Ok(CopyOutcome::Copied(ttl)) => debug!(?ttl, "Healed key into target"),
            Ok(CopyOutcome::Absent) => debug!("Key vanished from source before heal"),
            Err(e) => {
                warn!(error = %e, "Lazy write-through to target failed");
                metrics::record_best_effort_failure("get");
            }
        }
        Reply::bulk(value)
    }

    /// Write-through: source must accept the write before target is touched.
    async fn set(&self, key: &[u8], value: &[u8]) -> Reply {
        let _exclusive = self.ctx.guard.exclusive().await;

        if let Err(e) = self.ctx.source.set(key, value, None).await {
            warn!(error = %e, "Source write failed, target untouched");
            return Reply::Nil;
        }
        if let Err(e) = self.ctx.target.set(key, value, None).await {
            warn!(error = %e, "Best-effort target write failed, invalidating target copy");
            metrics::record_best_effort_failure("set");
            // A stale target value would shadow source on every GET.
            if let Err(e) = self.ctx.target.del(key).await {
                warn!(error = %e, "Target invalidation failed, key may read stale");
                metrics::record_best_effort_failure("set_invalidate");
            }
        }
        Reply::ok()
    }

    async fn del(&self, key: &[u8]) -> Reply {
        let _exclusive = self.ctx.guard.exclusive().await;

        let removed = match self.ctx.source.del(key).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Source delete failed");
                return source_error(&e);
            }
        };
        if let Err(e) = self.ctx.target.del(key).await {
            warn!(error = %e, "Best-effort target delete failed");
            metrics::record_best_effort_failure("del");
        }
        Reply::Integer(removed as i64)
    }

    async fn expire(&self, key: &[u8], seconds: &[u8]) -> Reply {
        // Parsed before taking the guard: a client error never locks.
        let Some(seconds) = std::str::from_utf8(seconds).ok().and_then(|s| s.parse::<i64>().ok()) else {
            return Reply::not_an_integer();
        };
        let _exclusive = self.ctx.guard.exclusive().await;

        let existed = match self.ctx.source.expire(key, seconds).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!(error = %e, "Source expire failed");
                return Reply::Nil;
            }
        };
        if let Err(e) = self.ctx.target.expire(key, seconds).await {
            warn!(error = %e, "Best-effort target expire failed");
            metrics::record_best_effort_failure("expire");
        }
        Reply::Integer(i64::from(existed))
    }

    /// Source only: a target miss says nothing about an unmigrated key.
    async fn exists(&self, key: &[u8]) -> Reply {
        let _exclusive = self.ctx.guard.exclusive().await;

        match self.ctx.source.exists(key).await {
            Ok(n) => Reply::Integer(n as i64),
            Err(e) => {
                warn!(error = %e, "Source exists failed");
                source_error(&e)
            }
        }
    }
}

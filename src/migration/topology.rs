// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shard discovery from a `CLUSTER NODES` report.
//!
//! Each line of the report looks like:
//!
//! ```text
//! <id> <ip:port@cport> <flags> <master> <ping> <pong> <epoch> <state> <slots...>
//! ```
//!
//! Only the `ip:port` part is load-bearing; everything else on the line is
//! ignored. Parsing sits behind [`TopologyParser`] so the strategy can be
//! swapped without touching the migrator.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::storage::traits::KvStore;

/// Dotted-quad IPv4 address followed by a port of at most five digits.
const ADDR_PATTERN: &str =
    r"((2(5[0-5]|[0-4]\d))|[0-1]?\d{1,2})(\.((2(5[0-5]|[0-4]\d))|[0-1]?\d{1,2})){3}:\d{1,5}\b";

static ADDR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(ADDR_PATTERN).expect("address pattern is a valid regex"));

/// One source node scanned independently during migration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardDescriptor {
    /// host:port
    pub addr: String,
    /// 40-char cluster node id, when the report carried one
    pub node_id: Option<String>,
}

impl ShardDescriptor {
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), node_id: None }
    }
}

impl std::fmt::Display for ShardDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node_id {
            Some(id) => write!(f, "{} ({})", self.addr, &id[..id.len().min(8)]),
            None => write!(f, "{}", self.addr),
        }
    }
}

/// Turns raw topology text into an ordered list of distinct shards.
/// Never fails: unparseable input yields an empty list.
pub trait TopologyParser: Send + Sync {
    fn parse(&self, text: &str) -> Vec<ShardDescriptor>;
}

/// Regex-based address extraction.
#[derive(Debug, Clone)]
pub struct RegexTopology {
    re: Regex,
}

impl Default for RegexTopology {
    fn default() -> Self {
        Self { re: ADDR_RE.clone() }
    }
}

impl RegexTopology {
    /// Use a custom address pattern (must match `host:port` substrings).
    pub fn with_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self { re: Regex::new(pattern)? })
    }
}

fn node_id(line: &str) -> Option<String> {
    let first = line.split_whitespace().next()?;
    (first.len() == 40 && first.bytes().all(|b| b.is_ascii_hexdigit())).then(|| first.to_string())
}

impl TopologyParser for RegexTopology {
    fn parse(&self, text: &str) -> Vec<ShardDescriptor> {
        let mut seen = HashSet::new();
        let mut shards = Vec::new();

        for line in text.lines() {
            let id = node_id(line);
            for m in self.re.find_iter(line) {
                let addr = m.as_str();
                if seen.insert(addr.to_string()) {
                    shards.push(ShardDescriptor {
                        addr: addr.to_string(),
                        node_id: id.clone(),
                    });
                }
            }
        }
        shards
    }
}

/// Query the source topology and parse it. A failed query degrades to an
/// empty shard set (migration becomes a no-op).
pub async fn discover(source: &dyn KvStore, parser: &dyn TopologyParser) -> Vec<ShardDescriptor> {
    match source.cluster_nodes().await {
        Ok(text) => {
            let shards = parser.parse(&text);
            debug!(shards = shards.len(), "Parsed source topology");
            shards
        }
        Err(e) => {
            warn!(error = %e, "Failed to read source topology, nothing to migrate");
            Vec::new()
        }
    }
}

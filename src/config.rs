// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the migration proxy.
//!
//! # Example
//!
//! ```
//! use migrate_proxy::{ProxyConfig, StoreMode};
//!
//! // Minimal config (uses defaults)
//! let config = ProxyConfig::default();
//! assert_eq!(config.scan_count, 1000);
//! assert_eq!(config.memory_limit, 0); // unlimited
//!
//! // Full config
//! let config = ProxyConfig {
//!     listen: "0.0.0.0:6380".into(),
//!     source: "10.0.0.1:7000".into(),
//!     target: "10.0.1.1:7000".into(),
//!     target_mode: StoreMode::Standalone,
//!     memory_limit: 8 * 1024 * 1024 * 1024, // 8 GB
//!     ..Default::default()
//! };
//! assert!(config.memory_limit > 0);
//! ```

use std::time::Duration;

use serde::Deserialize;

/// How an endpoint should be talked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// Redis Cluster: key commands are routed by slot.
    #[default]
    Cluster,
    /// A single Redis node.
    Standalone,
}

impl std::str::FromStr for StoreMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cluster" => Ok(Self::Cluster),
            "standalone" => Ok(Self::Standalone),
            other => Err(format!("unknown store mode '{}' (expected cluster|standalone)", other)),
        }
    }
}

impl std::fmt::Display for StoreMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cluster => write!(f, "cluster"),
            Self::Standalone => write!(f, "standalone"),
        }
    }
}

/// Configuration for the migration proxy.
///
/// All fields have defaults. At minimum, `source` and `target` should be
/// pointed at real endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Address the proxy listens on (host:port)
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Source (old) endpoint, host:port
    #[serde(default = "default_source")]
    pub source: String,

    /// Target (new) endpoint, host:port
    #[serde(default = "default_target")]
    pub target: String,

    #[serde(default)]
    pub source_mode: StoreMode,

    #[serde(default)]
    pub target_mode: StoreMode,

    /// Target used-memory ceiling in bytes (0 = unlimited)
    #[serde(default)]
    pub memory_limit: u64,

    /// Keys requested per SCAN page
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,

    /// SCAN MATCH pattern
    #[serde(default = "default_scan_pattern")]
    pub scan_pattern: String,

    /// Pause between full migration passes. None = a single pass.
    #[serde(default)]
    pub rescan_interval_secs: Option<u64>,

    /// Start the background migrator together with the proxy
    #[serde(default = "default_migrate_on_start")]
    pub migrate_on_start: bool,
}

fn default_listen() -> String { "localhost:6379".to_string() }
fn default_source() -> String { "source.com:6379".to_string() }
fn default_target() -> String { "target.com:6379".to_string() }
fn default_scan_count() -> usize { 1000 }
fn default_scan_pattern() -> String { "*".to_string() }
fn default_migrate_on_start() -> bool { true }

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            source: default_source(),
            target: default_target(),
            source_mode: StoreMode::default(),
            target_mode: StoreMode::default(),
            memory_limit: 0,
            scan_count: default_scan_count(),
            scan_pattern: default_scan_pattern(),
            rescan_interval_secs: None,
            migrate_on_start: default_migrate_on_start(),
        }
    }
}

impl ProxyConfig {
    /// Pause between passes, if periodic re-migration is enabled.
    ///
    /// A zero interval is treated as "single pass".
    #[must_use]
    pub fn rescan_interval(&self) -> Option<Duration> {
        self.rescan_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Memory ceiling, `None` when unlimited.
    #[must_use]
    pub fn memory_ceiling(&self) -> Option<u64> {
        (self.memory_limit > 0).then_some(self.memory_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_cli_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.listen, "localhost:6379");
        assert_eq!(config.source, "source.com:6379");
        assert_eq!(config.target, "target.com:6379");
        assert_eq!(config.source_mode, StoreMode::Cluster);
        assert_eq!(config.scan_pattern, "*");
        assert!(config.migrate_on_start);
        assert_eq!(config.memory_ceiling(), None);
        assert_eq!(config.rescan_interval(), None);
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: ProxyConfig = serde_json::from_str(
            r#"{"source": "10.0.0.1:7000", "target_mode": "standalone", "memory_limit": 1024}"#,
        )
        .unwrap();

        assert_eq!(config.source, "10.0.0.1:7000");
        assert_eq!(config.target, "target.com:6379");
        assert_eq!(config.target_mode, StoreMode::Standalone);
        assert_eq!(config.memory_ceiling(), Some(1024));
        assert_eq!(config.scan_count, 1000);
    }

    #[test]
    fn test_zero_rescan_interval_is_single_pass() {
        let config = ProxyConfig {
            rescan_interval_secs: Some(0),
            ..Default::default()
        };
        assert_eq!(config.rescan_interval(), None);

        let config = ProxyConfig {
            rescan_interval_secs: Some(30),
            ..Default::default()
        };
        assert_eq!(config.rescan_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_store_mode_from_str() {
        assert_eq!("Cluster".parse::<StoreMode>(), Ok(StoreMode::Cluster));
        assert_eq!("standalone".parse::<StoreMode>(), Ok(StoreMode::Standalone));
        assert!("sentinel".parse::<StoreMode>().is_err());
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backpressure for the bulk copier, driven by target memory usage.
//!
//! After every scanned page the governor reads `used_memory` from the
//! target's `INFO memory` and halts the shard once a configured ceiling
//! is exceeded. This is a coarse safety valve against filling a target
//! that is smaller than source, not a rate limiter.
//!
//! # Example
//!
//! ```
//! use migrate_proxy::MemoryPressure;
//!
//! // Well below the ceiling
//! let level = MemoryPressure::from_usage(500, 1000);
//! assert_eq!(level, MemoryPressure::Normal);
//! assert!(level.should_continue());
//!
//! // Approaching it - keep copying, but warn
//! let level = MemoryPressure::from_usage(850, 1000);
//! assert_eq!(level, MemoryPressure::Warn);
//! assert!(level.should_continue());
//!
//! // Over it - stop
//! let level = MemoryPressure::from_usage(1001, 1000);
//! assert_eq!(level, MemoryPressure::Halt);
//! assert!(!level.should_continue());
//! ```

use std::sync::Arc;

use tracing::{debug, warn};

use crate::migration::ShardProgress;
use crate::migration::scanner::START_CURSOR;
use crate::storage::traits::KvStore;

/// Fraction of the ceiling at which a warning is logged.
const WARN_RATIO: f64 = 0.8;

/// Target memory pressure relative to the configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    Normal = 0,
    Warn = 1,
    Halt = 2,
}

impl MemoryPressure {
    /// Classify `used` bytes against a non-zero `ceiling`.
    #[must_use]
    pub fn from_usage(used: u64, ceiling: u64) -> Self {
        if ceiling == 0 {
            return Self::Normal;
        }
        if used > ceiling {
            return Self::Halt;
        }
        match used as f64 / ceiling as f64 {
            r if r < WARN_RATIO => Self::Normal,
            _ => Self::Warn,
        }
    }

    #[must_use]
    pub fn should_continue(&self) -> bool {
        !matches!(self, Self::Halt)
    }
}

impl std::fmt::Display for MemoryPressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Why a shard stopped copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Cursor came back to the start value
    Exhausted,
    /// Target used memory exceeded the ceiling
    MemoryCeiling { used: u64, ceiling: u64 },
    /// SCAN kept failing
    ScanFailed(String),
    /// Could not open a connection to the shard
    ConnectFailed(String),
}

impl StopReason {
    /// Short metric label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::MemoryCeiling { .. } => "memory_ceiling",
            Self::ScanFailed(_) => "scan_failed",
            Self::ConnectFailed(_) => "connect_failed",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted => write!(f, "exhausted"),
            Self::MemoryCeiling { used, ceiling } => {
                write!(f, "memory ceiling (used {} > {})", used, ceiling)
            }
            Self::ScanFailed(e) => write!(f, "scan failed: {}", e),
            Self::ConnectFailed(e) => write!(f, "connect failed: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Stop(StopReason),
}

/// Extract `used_memory` from `INFO` text.
///
/// Matches the exact field (not `used_memory_rss`, `used_memory_peak`, ...).
#[must_use]
pub fn parse_used_memory(info: &str) -> Option<u64> {
    info.lines()
        .filter_map(|line| line.trim().split_once(':'))
        .find(|(field, _)| *field == "used_memory")
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Decides, after each page, whether a shard keeps copying.
pub struct Governor {
    target: Arc<dyn KvStore>,
    ceiling: Option<u64>,
}

impl Governor {
    /// `ceiling = None` (or 0) disables the memory check.
    #[must_use]
    pub fn new(target: Arc<dyn KvStore>, ceiling: Option<u64>) -> Self {
        Self {
            target,
            ceiling: ceiling.filter(|c| *c > 0),
        }
    }

    #[must_use]
    pub fn ceiling(&self) -> Option<u64> {
        self.ceiling
    }

    /// Stop when the scan is exhausted or target is over the ceiling.
    ///
    /// A failing `INFO` is logged and treated as "continue": the check is
    /// advisory and must not wedge migration on a flaky admin call.
    pub async fn should_continue(&self, progress: &ShardProgress) -> Verdict {
        if progress.cursor == START_CURSOR {
            return Verdict::Stop(StopReason::Exhausted);
        }
        let Some(ceiling) = self.ceiling else {
            return Verdict::Continue;
        };

        let used = match self.target.info(Some("memory")).await {
            Ok(info) => match parse_used_memory(&info) {
                Some(used) => used,
                None => {
                    warn!(shard = %progress.shard, "Target INFO has no used_memory field");
                    return Verdict::Continue;
                }
            },
            Err(e) => {
                warn!(shard = %progress.shard, error = %e, "Failed to read target memory");
                return Verdict::Continue;
            }
        };

        crate::metrics::set_target_used_memory(used);
        let pressure = MemoryPressure::from_usage(used, ceiling);
        debug!(shard = %progress.shard, used, ceiling, %pressure, "Target memory");

        match pressure {
            MemoryPressure::Normal => Verdict::Continue,
            MemoryPressure::Warn => {
                warn!(shard = %progress.shard, used, ceiling, "Target memory approaching ceiling");
                Verdict::Continue
            }
            MemoryPressure::Halt => Verdict::Stop(StopReason::MemoryCeiling { used, ceiling }),
        }
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The single reader/writer exclusion domain shared by the dispatcher and
//! the migrator.
//!
//! - `GET` (read-through) takes **shared** access
//! - `SET`, `DEL`, `EXPIRE`, `EXISTS` and every migrator key copy take
//!   **exclusive** access
//!
//! The lock is coarse (not per key): an exclusive operation fully precedes
//! or fully follows any other operation, so a bulk copy can never
//! interleave with a client write to the same key.
//!
//! Guards are held only around the store round-trips of one operation,
//! never across a client reply.
//!
//! ```
//! use migrate_proxy::ConcurrencyGuard;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let guard = ConcurrencyGuard::new();
//! {
//!     let _a = guard.shared().await;
//!     let _b = guard.shared().await; // readers coexist
//! }
//! let _w = guard.exclusive().await;
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Reader/writer exclusion domain. Tokio's lock is fair: a waiting writer
/// blocks new readers, so a stream of GETs cannot starve the migrator.
#[derive(Debug, Default)]
pub struct ConcurrencyGuard {
    lock: RwLock<()>,
    exclusive_acquisitions: AtomicU64,
    shared_acquisitions: AtomicU64,
}

/// Held while an operation reads through.
pub type SharedAccess<'a> = RwLockReadGuard<'a, ()>;

/// Held while an operation mutates either store.
pub type ExclusiveAccess<'a> = RwLockWriteGuard<'a, ()>;

impl ConcurrencyGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn shared(&self) -> SharedAccess<'_> {
        let guard = self.lock.read().await;
        self.shared_acquisitions.fetch_add(1, Ordering::Relaxed);
        guard
    }

    pub async fn exclusive(&self) -> ExclusiveAccess<'_> {
        let guard = self.lock.write().await;
        self.exclusive_acquisitions.fetch_add(1, Ordering::Relaxed);
        guard
    }

    /// Non-blocking exclusive attempt (used by tests and diagnostics).
    pub fn try_exclusive(&self) -> Option<ExclusiveAccess<'_>> {
        let guard = self.lock.try_write().ok()?;
        self.exclusive_acquisitions.fetch_add(1, Ordering::Relaxed);
        Some(guard)
    }

    /// (shared, exclusive) acquisitions since creation
    #[must_use]
    pub fn acquisitions(&self) -> (u64, u64) {
        (
            self.shared_acquisitions.load(Ordering::Relaxed),
            self.exclusive_acquisitions.load(Ordering::Relaxed),
        )
    }
}

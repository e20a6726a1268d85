// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared state handed to both the dispatcher and the migrator.

use std::sync::Arc;

use tracing::info;

use crate::config::ProxyConfig;
use crate::guard::ConcurrencyGuard;
use crate::storage::redis::RedisStore;
use crate::storage::traits::{KvStore, StoreError};

/// Built once at startup. Holds the two store clients and the only
/// synchronization primitive the proxy introduces.
pub struct ProxyContext {
    pub source: Arc<dyn KvStore>,
    pub target: Arc<dyn KvStore>,
    pub guard: ConcurrencyGuard,
    pub config: ProxyConfig,
}

impl ProxyContext {
    #[must_use]
    pub fn new(source: Arc<dyn KvStore>, target: Arc<dyn KvStore>, config: ProxyConfig) -> Self {
        Self {
            source,
            target,
            guard: ConcurrencyGuard::new(),
            config,
        }
    }

    /// Connect to source and target as configured.
    pub async fn connect(config: ProxyConfig) -> Result<Self, StoreError> {
        info!(source = %config.source, target = %config.target, "Connecting to stores");
        let source = RedisStore::connect(&config.source, config.source_mode).await?;
        let target = RedisStore::connect(&config.target, config.target_mode).await?;
        Ok(Self::new(Arc::new(source), Arc::new(target), config))
    }
}

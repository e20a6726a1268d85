//! Binary entrypoint: parse flags, connect both stores, start the
//! background migrator, then serve clients until Ctrl-C / SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use migrate_proxy::{
    Dispatcher, LoggingHooks, Migrator, ProxyConfig, ProxyContext, ProxyServer, RedisConnector, StoreMode,
};

/// Zero-downtime migration proxy between two Redis deployments.
#[derive(Parser, Debug)]
#[command(name = "migrate-proxy", version, about)]
struct Args {
    /// Proxy listen address
    #[arg(short = 'p', long, env = "MIGRATE_PROXY_LISTEN", default_value = "localhost:6379")]
    listen: String,

    /// Source (old) endpoint
    #[arg(short = 's', long, env = "MIGRATE_PROXY_SOURCE", default_value = "source.com:6379")]
    source: String,

    /// Target (new) endpoint
    #[arg(short = 't', long, env = "MIGRATE_PROXY_TARGET", default_value = "target.com:6379")]
    target: String,

    /// Stop bulk copy once target used memory exceeds this many bytes (0 = unlimited)
    #[arg(short = 'l', long, env = "MIGRATE_PROXY_MEMORY_LIMIT", default_value_t = 0)]
    memory_limit: u64,

    #[arg(long, env = "MIGRATE_PROXY_SOURCE_MODE", default_value_t = StoreMode::Cluster)]
    source_mode: StoreMode,

    #[arg(long, env = "MIGRATE_PROXY_TARGET_MODE", default_value_t = StoreMode::Cluster)]
    target_mode: StoreMode,

    /// Keys requested per SCAN page
    #[arg(long, env = "MIGRATE_PROXY_SCAN_COUNT", default_value_t = 1000)]
    scan_count: usize,

    /// SCAN MATCH pattern
    #[arg(long, env = "MIGRATE_PROXY_SCAN_PATTERN", default_value = "*")]
    scan_pattern: String,

    /// Re-run the migration with this pause between passes
    #[arg(long, env = "MIGRATE_PROXY_RESCAN_INTERVAL_SECS")]
    rescan_interval_secs: Option<u64>,

    /// Only proxy; don't start the background migrator
    #[arg(long, env = "MIGRATE_PROXY_NO_MIGRATE")]
    no_migrate: bool,
}

impl From<Args> for ProxyConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            source: args.source,
            target: args.target,
            source_mode: args.source_mode,
            target_mode: args.target_mode,
            memory_limit: args.memory_limit,
            scan_count: args.scan_count,
            scan_pattern: args.scan_pattern,
            rescan_interval_secs: args.rescan_interval_secs,
            migrate_on_start: !args.no_migrate,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ProxyConfig::from(Args::parse());
    info!(
        listen = %config.listen,
        source = %config.source,
        target = %config.target,
        memory_limit = config.memory_limit,
        "Starting migrate-proxy"
    );

    let ctx = Arc::new(
        ProxyContext::connect(config.clone())
            .await
            .context("connecting to source and target")?,
    );

    if config.migrate_on_start {
        Migrator::new(ctx.clone(), Arc::new(RedisConnector)).spawn();
    } else {
        info!("Background migration disabled");
    }

    let server = match ProxyServer::bind(&config.listen, Dispatcher::new(ctx)).await {
        Ok(server) => server.with_hooks(LoggingHooks),
        Err(e) => {
            error!(error = %e, "Cannot listen, exiting");
            return Err(e.into());
        }
    };
    server.serve_with_shutdown(shutdown_signal()).await?;
    info!("Stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

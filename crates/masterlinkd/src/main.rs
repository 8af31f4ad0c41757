//! masterlinkd — the masterlink daemon.
//!
//! Listens on one stable address and relays every client connection to
//! whichever node the sentinel currently names as master. When the master
//! fails over, connections still bridged to the old one are closed so
//! clients reconnect and land on the new one.
//!
//! # Usage
//!
//! ```text
//! masterlinkd --listen :6380 --sentinel sentinel.internal:26379 --master mymaster
//! masterlinkd --config /etc/masterlink.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use masterlink_core::RelayConfig;
use masterlink_proxy::{RelayContext, RelaySettings};
use masterlink_sentinel::{DiscoverySettings, MasterAddressResolver, SentinelAddress};
use masterlink_watcher::MasterWatcher;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "masterlinkd",
    about = "Failover-aware TCP relay for a sentinel-managed master"
)]
struct Cli {
    /// Path to a masterlink.toml config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Local address to listen on (default ":9999").
    #[arg(long)]
    listen: Option<String>,

    /// Sentinel address (default ":26379").
    #[arg(long)]
    sentinel: Option<String>,

    /// Name of the master as monitored by the sentinel.
    #[arg(long)]
    master: Option<String>,

    /// How often to poll the sentinel, e.g. "2s".
    #[arg(long)]
    poll_interval: Option<String>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = load_config(&cli)?;
    if cli.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    run(config).await
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,masterlinkd=debug,masterlink=debug".into());

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

/// Read the config file (if any) and layer command-line flags on top.
fn load_config(cli: &Cli) -> anyhow::Result<RelayConfig> {
    let mut config = match &cli.config {
        Some(path) => RelayConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RelayConfig::default(),
    };

    if let Some(listen) = &cli.listen {
        config.listen = listen.clone();
    }
    if let Some(sentinel) = &cli.sentinel {
        config.sentinel = sentinel.clone();
    }
    if let Some(master) = &cli.master {
        config.master = Some(master.clone());
    }
    if let Some(interval) = &cli.poll_interval {
        config.watch.interval = interval.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let master_name = config.master_name()?.to_string();
    let listen_addr = config.listen_addr();
    let sentinel_addr = config.sentinel_addr();

    let listen = tokio::net::lookup_host(&listen_addr)
        .await
        .with_context(|| format!("failed to resolve local address {listen_addr}"))?
        .next()
        .with_context(|| format!("local address {listen_addr} resolved to nothing"))?;

    let sentinel = SentinelAddress::resolve(&sentinel_addr).await?;
    info!(sentinel = %sentinel.current(), master = %master_name, "sentinel resolved");

    // ── Discovery and watcher ──────────────────────────────────

    let discovery = DiscoverySettings {
        query: config.discovery_policy()?,
        reresolve: config.reresolve_policy()?,
        verify_master: config.discovery.verify_master,
        reply_buffer: config.discovery.reply_buffer,
    };
    let resolver = Arc::new(MasterAddressResolver::new(sentinel, &master_name, discovery));
    let watcher = MasterWatcher::new(resolver.clone(), config.poll_interval()?);

    let settings = RelaySettings {
        unknown_wait: config.unknown_wait_policy()?,
        dial: config.dial_policy()?,
    };
    let ctx = RelayContext::new(watcher.handle(), resolver, settings);
    let stats = ctx.stats.clone();

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher_handle = tokio::spawn(watcher.run(shutdown_rx.clone()));

    // ── Listener ───────────────────────────────────────────────

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    info!(%listen, "startup ok");

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!(error = %e, "failed to listen for ctrl-c, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    masterlink_proxy::serve(listener, ctx, shutdown_rx).await;

    let _ = watcher_handle.await;

    let summary = stats.snapshot();
    info!(
        accepted = summary.accepted,
        completed = summary.completed,
        drained = summary.drained,
        failed = summary.failed,
        "masterlink stopped"
    );
    Ok(())
}

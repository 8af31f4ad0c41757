//! Per-connection relay: wait for a master, dial it, bridge bytes, drain
//! on failover.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use masterlink_core::{RetryPolicy, dial};
use masterlink_sentinel::MasterLookup;
use masterlink_watcher::{Generation, MasterHandle, MasterSnapshot};
use tokio::net::TcpStream;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::error::{RelayError, RelayResult};
use crate::forward::forward;
use crate::stats::RelayStats;

/// Retry budgets for one relay.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// How long to wait for a master that is not known yet.
    pub unknown_wait: RetryPolicy,
    /// Attempts, per-dial timeout, and backoff for reaching the master.
    pub dial: RetryPolicy,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            unknown_wait: RetryPolicy::fixed(5, Duration::from_secs(2), Duration::from_secs(2)),
            dial: RetryPolicy::fixed(5, Duration::from_secs(1), Duration::from_secs(10)),
        }
    }
}

/// Everything a relay needs, shared by all connections.
#[derive(Clone)]
pub struct RelayContext {
    pub master: MasterHandle,
    /// Consulted after a failed dial, in case the master moved between
    /// watcher polls.
    pub lookup: Arc<dyn MasterLookup>,
    pub settings: RelaySettings,
    pub stats: Arc<RelayStats>,
}

impl RelayContext {
    pub fn new(master: MasterHandle, lookup: Arc<dyn MasterLookup>, settings: RelaySettings) -> Self {
        Self {
            master,
            lookup,
            settings,
            stats: Arc::new(RelayStats::new()),
        }
    }
}

/// How a relay that reached the master ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Both directions finished on their own.
    Completed { to_master: u64, to_client: u64 },
    /// The master changed; the client socket was closed.
    Drained { generation: u64 },
}

/// Relay one accepted client connection.
///
/// On error the client socket has already been dropped, which closes it.
pub async fn relay(client: TcpStream, ctx: &RelayContext) -> RelayResult<RelayOutcome> {
    let (address, generation) = wait_for_master(&ctx.master, &ctx.settings.unknown_wait).await?;
    let master = dial_master(address, ctx).await?;
    Ok(bridge(client, master, generation).await)
}

/// Relay with logging and stats. This is what the listener spawns.
pub async fn handle_connection(client: TcpStream, peer: SocketAddr, ctx: RelayContext) {
    ctx.stats.record_accept();
    debug!(%peer, "client connected");

    match relay(client, &ctx).await {
        Ok(RelayOutcome::Completed {
            to_master,
            to_client,
        }) => {
            ctx.stats.record_completed();
            debug!(%peer, to_master, to_client, "connection closed");
        }
        Ok(RelayOutcome::Drained { generation }) => {
            ctx.stats.record_drained();
            info!(%peer, generation, "connection dropped after master change");
        }
        Err(e) => {
            ctx.stats.record_failed();
            warn!(%peer, error = %e, "failed to establish master connection, closing client");
        }
    }
}

/// Read a known master and its generation, waiting in bounded steps if the
/// watcher has not learned one yet.
async fn wait_for_master(
    master: &MasterHandle,
    policy: &RetryPolicy,
) -> RelayResult<(SocketAddr, Generation)> {
    let mut master = master.clone();
    let mut attempt = 1;
    loop {
        let MasterSnapshot { state, generation } = master.snapshot();
        if let Some(address) = state.address() {
            return Ok((address, generation));
        }
        if policy.is_last(attempt) {
            return Err(RelayError::MasterUnknown { attempts: attempt });
        }

        let delay = policy.delay_after(attempt);
        info!(attempt, retry_in = ?delay, "master address unknown, waiting");
        // Wake early if the watcher publishes.
        let _ = tokio::time::timeout(delay, master.changed()).await;
        attempt += 1;
    }
}

/// Dial the master, asking the lookup for a fresh address after each
/// failure. Never writes the shared master address.
async fn dial_master(mut address: SocketAddr, ctx: &RelayContext) -> RelayResult<TcpStream> {
    let policy = &ctx.settings.dial;
    let mut attempt = 1;
    loop {
        let source = match dial(address, policy.attempt_timeout).await {
            Ok(stream) => {
                debug!(%address, attempt, "connected to master");
                return Ok(stream);
            }
            Err(source) => source,
        };

        if policy.is_last(attempt) {
            return Err(RelayError::MasterUnreachable {
                address,
                attempts: attempt,
                source,
            });
        }
        warn!(%address, error = %source, attempt, "failed to connect to master, obtaining new master address");

        let result = ctx.lookup.lookup().await;
        match result {
            Ok(resolution) if resolution.address != address => {
                info!(from = %address, to = %resolution.address, "retrying against updated master address");
                address = resolution.address;
            }
            Ok(_) => {
                tokio::time::sleep(policy.delay_after(attempt)).await;
            }
            Err(e) => {
                warn!(error = %e, "master lookup failed during dial retry");
                tokio::time::sleep(policy.delay_after(attempt)).await;
            }
        }
        attempt += 1;
    }
}

/// Forward both directions until the master side ends or `generation` is
/// superseded.
///
/// A client that half-closes still receives the rest of the master's
/// replies. Once the master side ends (EOF or error) or the client side
/// fails, the other direction is aborted so both sockets close.
async fn bridge(client: TcpStream, master: TcpStream, generation: Generation) -> RelayOutcome {
    let _ = client.set_nodelay(true);
    let _ = master.set_nodelay(true);

    let (client_read, client_write) = client.into_split();
    let (master_read, master_write) = master.into_split();

    let mut upstream = tokio::spawn(forward(client_read, master_write));
    let mut downstream = tokio::spawn(forward(master_read, client_write));

    let superseded = generation.superseded();
    tokio::pin!(superseded);

    // Set once the client has finished sending cleanly.
    let mut to_master: Option<u64> = None;
    loop {
        tokio::select! {
            up = &mut upstream, if to_master.is_none() => match up {
                Ok(Ok(copied)) => to_master = Some(copied),
                failed => {
                    downstream.abort();
                    return RelayOutcome::Completed {
                        to_master: bytes_copied(failed),
                        to_client: bytes_copied(downstream.await),
                    };
                }
            },
            down = &mut downstream => {
                let to_master = match to_master {
                    Some(copied) => copied,
                    None => {
                        upstream.abort();
                        bytes_copied(upstream.await)
                    }
                };
                return RelayOutcome::Completed {
                    to_master,
                    to_client: bytes_copied(down),
                };
            }
            _ = &mut superseded => {
                // Aborting drops every socket half, which closes both sockets.
                downstream.abort();
                let _ = downstream.await;
                if to_master.is_none() {
                    upstream.abort();
                    let _ = upstream.await;
                }
                return RelayOutcome::Drained {
                    generation: generation.id(),
                };
            }
        }
    }
}

fn bytes_copied(result: Result<io::Result<u64>, JoinError>) -> u64 {
    result.ok().and_then(Result::ok).unwrap_or(0)
}

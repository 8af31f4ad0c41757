//! Accept loop that hands each client connection to its own relay.

use std::io;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::relay::{RelayContext, handle_connection};

/// Pause after a failed accept before trying again.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Accept connections until `shutdown` flips, spawning one relay each.
///
/// Accept errors are logged and the loop keeps going.
pub async fn serve(listener: TcpListener, ctx: RelayContext, mut shutdown: watch::Receiver<bool>) {
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "waiting for TCP connections"),
        Err(e) => debug!(error = %e, "listener has no local address"),
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_connection(stream, peer, ctx.clone()));
                }
                Err(e) => accept_failed(&e).await,
            },
            _ = shutdown.changed() => {
                info!("listener shutting down");
                break;
            }
        }
    }
}

/// Log a failed accept and pause. EMFILE and friends persist across
/// immediate retries.
async fn accept_failed(error: &io::Error) {
    warn!(%error, retry_in = ?ACCEPT_ERROR_BACKOFF, "failed to accept connection");
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

//! Discovery error types.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for master discovery.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Errors that can occur while asking the sentinel for the master.
///
/// None of these are fatal once the relay is running: the watcher keeps
/// its last known master and relays fall back to their own retry budget.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("sentinel {addr} unreachable: {source}")]
    DiscoveryUnreachable {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("sentinel {addr} query failed: {source}")]
    DiscoveryIo {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("malformed sentinel reply: expected at least 5 fields, got {fields}")]
    MalformedReply { fields: usize },

    #[error("cannot resolve master address {address:?}: {reason}")]
    UnresolvableAddress { address: String, reason: String },

    #[error("cannot resolve sentinel address {address:?}: {reason}")]
    InvalidSentinel { address: String, reason: String },
}

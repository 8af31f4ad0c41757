//! Relay error types.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

pub type RelayResult<T> = Result<T, RelayError>;

/// Why a single client connection was given up on.
///
/// Both are terminal for that connection only: the client socket is closed
/// and the listener carries on.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("master address still unknown after {attempts} attempts")]
    MasterUnknown { attempts: u32 },

    #[error("master {address} unreachable after {attempts} attempts: {source}")]
    MasterUnreachable {
        address: SocketAddr,
        attempts: u32,
        #[source]
        source: io::Error,
    },
}

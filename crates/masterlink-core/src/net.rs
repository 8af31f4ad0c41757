//! TCP helpers shared by the sentinel client and the relay.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

/// Connect to `addr`, giving up after `timeout`.
///
/// A dead host otherwise holds the caller for the kernel's SYN retry
/// window, which is far longer than any retry loop here wants to wait.
pub async fn dial(addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect to {addr} timed out after {timeout:?}"),
        )),
    }
}

/// Fill in the host of a Go-style `:port` address.
///
/// `":9999"` becomes `"<default_host>:9999"`; anything with a host is
/// returned trimmed but otherwise untouched.
pub fn normalize_addr(addr: &str, default_host: &str) -> String {
    let addr = addr.trim();
    match addr.strip_prefix(':') {
        Some(port) => format!("{default_host}:{port}"),
        None => addr.to_string(),
    }
}

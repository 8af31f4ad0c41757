//! Master address discovery through the sentinel.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use masterlink_core::{RetryPolicy, dial};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::address::SentinelAddress;
use crate::error::{ResolveError, ResolveResult};
use crate::reply;

/// Whether something was listening at the advertised master address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    /// The probe connection was accepted.
    Listening,
    /// The probe failed; carries the reason.
    Unreachable(String),
    /// Probing is disabled.
    Skipped,
}

/// A master address as reported by the sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub address: SocketAddr,
    pub liveness: Liveness,
}

impl Resolution {
    /// True unless the liveness probe ran and failed.
    pub fn is_trusted(&self) -> bool {
        !matches!(self.liveness, Liveness::Unreachable(_))
    }
}

/// Boxed future returned by [`MasterLookup::lookup`].
pub type LookupFuture<'a> =
    Pin<Box<dyn Future<Output = ResolveResult<Resolution>> + Send + 'a>>;

/// Source of the current master address — injected for testability.
///
/// The watcher polls it on every tick and relays call it after a failed
/// dial to pick up a master that moved between ticks.
pub trait MasterLookup: Send + Sync {
    fn lookup(&self) -> LookupFuture<'_>;
}

/// Tunables for a sentinel query.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    /// Bounds the sentinel dial, the query write, and the reply read.
    pub query: RetryPolicy,
    /// Governs sentinel host re-resolution after a failed dial.
    pub reresolve: RetryPolicy,
    /// Probe the advertised master before returning it.
    pub verify_master: bool,
    /// Size of the reply buffer.
    pub reply_buffer: usize,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            query: RetryPolicy::fixed(1, Duration::ZERO, Duration::from_secs(2)),
            reresolve: RetryPolicy::unbounded(Duration::from_secs(10), Duration::from_secs(2)),
            verify_master: true,
            reply_buffer: 256,
        }
    }
}

/// Asks the sentinel where the named master currently lives.
#[derive(Debug, Clone)]
pub struct MasterAddressResolver {
    sentinel: SentinelAddress,
    master_name: String,
    settings: DiscoverySettings,
}

impl MasterAddressResolver {
    pub fn new(sentinel: SentinelAddress, master_name: &str, settings: DiscoverySettings) -> Self {
        Self {
            sentinel,
            master_name: master_name.to_string(),
            settings,
        }
    }

    /// The shared sentinel address this resolver dials.
    pub fn sentinel(&self) -> &SentinelAddress {
        &self.sentinel
    }

    pub fn master_name(&self) -> &str {
        &self.master_name
    }

    /// Query the sentinel once.
    ///
    /// If the sentinel cannot be dialed its host is re-resolved before the
    /// error is returned, so the next call uses the fresh address. A failed
    /// liveness probe does not fail the call; it is reported in
    /// [`Resolution::liveness`].
    pub async fn resolve(&self) -> ResolveResult<Resolution> {
        let sentinel_addr = self.sentinel.current();
        let query = &self.settings.query;

        let mut conn = match dial(sentinel_addr, query.attempt_timeout).await {
            Ok(conn) => conn,
            Err(source) => {
                warn!(sentinel = %sentinel_addr, error = %source, "sentinel unreachable, updating sentinel address");
                self.sentinel.refresh(&self.settings.reresolve).await;
                return Err(ResolveError::DiscoveryUnreachable {
                    addr: sentinel_addr,
                    source,
                });
            }
        };

        let raw = query
            .timed(self.exchange(&mut conn))
            .await
            .map_err(|source| ResolveError::DiscoveryIo {
                addr: sentinel_addr,
                source,
            })?;

        let master = reply::parse_master_addr(&raw)?;
        let address = resolve_master(&master).await?;

        let liveness = if self.settings.verify_master {
            match dial(address, query.attempt_timeout).await {
                Ok(_probe) => Liveness::Listening,
                Err(e) => {
                    debug!(%address, error = %e, "master liveness probe failed");
                    Liveness::Unreachable(e.to_string())
                }
            }
        } else {
            Liveness::Skipped
        };

        debug!(master = %self.master_name, %address, ?liveness, "sentinel reported master");
        Ok(Resolution { address, liveness })
    }

    /// Send the query and read until the reply is complete, the sentinel
    /// closes, or the buffer fills. The sentinel leaves the connection open
    /// after answering.
    async fn exchange(&self, conn: &mut tokio::net::TcpStream) -> std::io::Result<String> {
        conn.write_all(reply::query(&self.master_name).as_bytes())
            .await?;

        let mut buf = vec![0u8; self.settings.reply_buffer.max(1)];
        let mut filled = 0;
        loop {
            let n = conn.read(&mut buf[filled..]).await?;
            filled += n;
            let text = String::from_utf8_lossy(&buf[..filled]);
            if n == 0 || filled == buf.len() || reply::is_complete(&text) {
                return Ok(text.into_owned());
            }
        }
    }
}

impl MasterLookup for MasterAddressResolver {
    fn lookup(&self) -> LookupFuture<'_> {
        Box::pin(self.resolve())
    }
}

async fn resolve_master(master: &str) -> ResolveResult<SocketAddr> {
    let unresolvable = |reason: String| ResolveError::UnresolvableAddress {
        address: master.to_string(),
        reason,
    };
    let mut addrs = tokio::net::lookup_host(master)
        .await
        .map_err(|e| unresolvable(e.to_string()))?;
    addrs
        .next()
        .ok_or_else(|| unresolvable("no addresses returned".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn fast_settings(verify_master: bool) -> DiscoverySettings {
        DiscoverySettings {
            query: RetryPolicy::fixed(1, Duration::ZERO, Duration::from_secs(1)),
            reresolve: RetryPolicy::unbounded(Duration::from_millis(10), Duration::from_secs(1)),
            verify_master,
            reply_buffer: 256,
        }
    }

    /// Serve one canned reply per connection, recording each query.
    async fn fake_sentinel(reply: String) -> (SocketAddr, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((mut conn, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = [0u8; 128];
                let n = conn.read(&mut buf).await.unwrap_or(0);
                let _ = tx.send(String::from_utf8_lossy(&buf[..n]).into_owned());
                let _ = conn.write_all(reply.as_bytes()).await;
            }
        });

        (addr, rx)
    }

    /// Write `parts` with a pause between each, then keep the connection
    /// open the way a real sentinel does.
    async fn lingering_sentinel(parts: Vec<&'static str>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut conn, _)) = listener.accept().await {
                let parts = parts.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 128];
                    let _ = conn.read(&mut buf).await;
                    for (i, part) in parts.iter().enumerate() {
                        if i > 0 {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                        let _ = conn.write_all(part.as_bytes()).await;
                    }
                    // Hold until the client hangs up.
                    let _ = conn.read(&mut buf).await;
                });
            }
        });

        addr
    }

    fn master_reply(addr: SocketAddr) -> String {
        let host = addr.ip().to_string();
        let port = addr.port().to_string();
        format!("*2\r\n${}\r\n{host}\r\n${}\r\n{port}\r\n", host.len(), port.len())
    }

    fn resolver_for(sentinel: SocketAddr, verify_master: bool) -> MasterAddressResolver {
        MasterAddressResolver::new(
            SentinelAddress::with_resolved(&sentinel.to_string(), sentinel),
            "mymaster",
            fast_settings(verify_master),
        )
    }

    #[tokio::test]
    async fn resolves_live_master() {
        let master = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let master_addr = master.local_addr().unwrap();
        let (sentinel, mut queries) = fake_sentinel(master_reply(master_addr)).await;

        let resolution = resolver_for(sentinel, true).resolve().await.unwrap();

        assert_eq!(resolution.address, master_addr);
        assert_eq!(resolution.liveness, Liveness::Listening);
        assert!(resolution.is_trusted());
        assert_eq!(
            queries.recv().await.unwrap(),
            "sentinel get-master-addr-by-name mymaster\n"
        );
    }

    #[tokio::test]
    async fn dead_master_is_returned_with_probe_failure() {
        let master = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let master_addr = master.local_addr().unwrap();
        drop(master);
        let (sentinel, _queries) = fake_sentinel(master_reply(master_addr)).await;

        let resolution = resolver_for(sentinel, true).resolve().await.unwrap();

        assert_eq!(resolution.address, master_addr);
        assert!(matches!(resolution.liveness, Liveness::Unreachable(_)));
        assert!(!resolution.is_trusted());
    }

    #[tokio::test]
    async fn probe_can_be_skipped() {
        let master_addr: SocketAddr = "127.0.0.1:7000".parse().unwrap();
        let (sentinel, _queries) = fake_sentinel(master_reply(master_addr)).await;

        let resolution = resolver_for(sentinel, false).resolve().await.unwrap();

        assert_eq!(resolution.address, master_addr);
        assert_eq!(resolution.liveness, Liveness::Skipped);
        assert!(resolution.is_trusted());
    }

    #[tokio::test]
    async fn short_reply_is_malformed() {
        let (sentinel, _queries) = fake_sentinel("*-1\r\n".to_string()).await;

        let result = resolver_for(sentinel, false).resolve().await;
        assert!(matches!(result, Err(ResolveError::MalformedReply { .. })));
    }

    #[tokio::test]
    async fn unresolvable_host_is_reported() {
        let (sentinel, _queries) =
            fake_sentinel("*2\r\n$7\r\nbad host\r\n$2\r\nxx\r\n".to_string()).await;

        let result = resolver_for(sentinel, false).resolve().await;
        assert!(matches!(
            result,
            Err(ResolveError::UnresolvableAddress { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_sentinel_triggers_reresolution() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let sentinel_addr = listener.local_addr().unwrap();
        drop(listener);

        let resolver = resolver_for(sentinel_addr, false);
        match resolver.resolve().await {
            Err(ResolveError::DiscoveryUnreachable { addr, .. }) => {
                assert_eq!(addr, sentinel_addr);
            }
            other => panic!("expected DiscoveryUnreachable, got {other:?}"),
        }
        // The configured host:port resolves back to the same literal address.
        assert_eq!(resolver.sentinel().current(), sentinel_addr);
    }

    #[tokio::test]
    async fn silent_sentinel_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let sentinel_addr = listener.local_addr().unwrap();
        // Accept and hold connections without replying.
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((conn, _)) = listener.accept().await {
                held.push(conn);
            }
        });

        let mut settings = fast_settings(false);
        settings.query = RetryPolicy::fixed(1, Duration::ZERO, Duration::from_millis(100));
        let resolver = MasterAddressResolver::new(
            SentinelAddress::with_resolved(&sentinel_addr.to_string(), sentinel_addr),
            "mymaster",
            settings,
        );

        assert!(matches!(
            resolver.resolve().await,
            Err(ResolveError::DiscoveryIo { .. })
        ));
    }

    #[tokio::test]
    async fn lookup_trait_delegates_to_resolve() {
        let master_addr: SocketAddr = "127.0.0.1:7001".parse().unwrap();
        let (sentinel, _queries) = fake_sentinel(master_reply(master_addr)).await;

        let lookup: std::sync::Arc<dyn MasterLookup> =
            std::sync::Arc::new(resolver_for(sentinel, false));
        assert_eq!(lookup.lookup().await.unwrap().address, master_addr);
    }

    #[tokio::test]
    async fn reply_split_inside_port_is_read_whole() {
        let sentinel = lingering_sentinel(vec!["*2\r\n$9\r\n127.0.0.1\r\n$4\r\n70", "01\r\n"]).await;

        let resolution = resolver_for(sentinel, false).resolve().await.unwrap();
        assert_eq!(resolution.address, "127.0.0.1:7001".parse().unwrap());
    }

    #[tokio::test]
    async fn full_reply_on_open_connection_resolves_promptly() {
        let sentinel = lingering_sentinel(vec!["*2\r\n$9\r\n127.0.0.1\r\n$4\r\n7002\r\n"]).await;

        let resolution = tokio::time::timeout(
            Duration::from_millis(500),
            resolver_for(sentinel, false).resolve(),
        )
        .await
        .expect("a complete reply must not wait for the query timeout")
        .unwrap();
        assert_eq!(resolution.address, "127.0.0.1:7002".parse().unwrap());
    }

    #[tokio::test]
    async fn nil_reply_on_open_connection_is_malformed() {
        let sentinel = lingering_sentinel(vec!["*-1\r\n"]).await;

        let result = tokio::time::timeout(
            Duration::from_millis(500),
            resolver_for(sentinel, false).resolve(),
        )
        .await
        .expect("a nil reply must not wait for the query timeout");
        assert!(matches!(result, Err(ResolveError::MalformedReply { fields: 2 })));
    }

    #[tokio::test]
    async fn error_line_on_open_connection_is_malformed() {
        let sentinel = lingering_sentinel(vec!["-ERR No such master with that name\r\n"]).await;

        let result = tokio::time::timeout(
            Duration::from_millis(500),
            resolver_for(sentinel, false).resolve(),
        )
        .await
        .expect("an error reply must not wait for the query timeout");
        assert!(matches!(result, Err(ResolveError::MalformedReply { .. })));
    }
}

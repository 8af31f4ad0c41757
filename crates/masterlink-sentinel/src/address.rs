//! Shared, re-resolvable sentinel address.
//!
//! The sentinel is configured by `host:port` text. Its resolved socket
//! address is cached and shared by every caller; when the sentinel stops
//! answering, the host is looked up again and the cache is replaced.
//! Readers take a copy under a short-lived lock and never hold it across
//! an await point.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use masterlink_core::RetryPolicy;
use tracing::{info, warn};

use crate::error::{ResolveError, ResolveResult};

/// The sentinel's configured address and its current resolution.
#[derive(Debug, Clone)]
pub struct SentinelAddress {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    /// `host:port` as configured.
    host_port: String,
    /// Most recent successful resolution.
    resolved: RwLock<SocketAddr>,
    /// Serializes re-resolution so concurrent failures do one lookup at a time.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl SentinelAddress {
    /// Resolve `host_port` once. Used at startup, where failure is fatal.
    pub async fn resolve(host_port: &str) -> ResolveResult<Self> {
        let addr = lookup(host_port)
            .await
            .map_err(|reason| ResolveError::InvalidSentinel {
                address: host_port.to_string(),
                reason,
            })?;
        Ok(Self::with_resolved(host_port, addr))
    }

    /// Build from an already-resolved address.
    pub fn with_resolved(host_port: &str, addr: SocketAddr) -> Self {
        Self {
            inner: Arc::new(Inner {
                host_port: host_port.to_string(),
                resolved: RwLock::new(addr),
                refresh_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// The configured `host:port`.
    pub fn host_port(&self) -> &str {
        &self.inner.host_port
    }

    /// The current resolution.
    pub fn current(&self) -> SocketAddr {
        *self
            .inner
            .resolved
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look the configured host up again until it resolves.
    ///
    /// Retries under `policy` (the default policy never gives up) and stores
    /// the new address for every other holder of this handle. Returns `None`
    /// only when a bounded policy runs out.
    pub async fn refresh(&self, policy: &RetryPolicy) -> Option<SocketAddr> {
        let _gate = self.inner.refresh_gate.lock().await;
        info!(sentinel = %self.inner.host_port, "resolving sentinel address");

        let mut attempt = 1;
        while policy.allows(attempt) {
            let result = policy
                .timed(async {
                    lookup(&self.inner.host_port)
                        .await
                        .map_err(std::io::Error::other)
                })
                .await;

            match result {
                Ok(addr) => {
                    let previous = self.store(addr);
                    if previous != addr {
                        info!(sentinel = %self.inner.host_port, from = %previous, to = %addr, "sentinel address updated");
                    } else {
                        info!(sentinel = %self.inner.host_port, %addr, "sentinel address unchanged");
                    }
                    return Some(addr);
                }
                Err(e) => {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        sentinel = %self.inner.host_port,
                        error = %e,
                        attempt,
                        retry_in = ?delay,
                        "failed to resolve sentinel address"
                    );
                    if policy.is_last(attempt) {
                        break;
                    }
                    tokio::time::sleep(delay).await;
                }
            }
            attempt += 1;
        }

        None
    }

    fn store(&self, addr: SocketAddr) -> SocketAddr {
        let mut resolved = self
            .inner
            .resolved
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *resolved, addr)
    }
}

async fn lookup(host_port: &str) -> Result<SocketAddr, String> {
    let mut addrs = tokio::net::lookup_host(host_port)
        .await
        .map_err(|e| e.to_string())?;
    addrs
        .next()
        .ok_or_else(|| "no addresses returned".to_string())
}

//! masterlink.toml configuration parser.
//!
//! Every key is optional in the file. Missing keys fall back to the
//! defaults below, and the daemon's command-line flags override whatever
//! the file says. Durations are strings such as `"500ms"`, `"2s"`, `"1m"`,
//! or a bare number of seconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::net::normalize_addr;
use crate::retry::RetryPolicy;

pub const DEFAULT_LISTEN: &str = ":9999";
pub const DEFAULT_SENTINEL: &str = ":26379";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address clients connect to.
    pub listen: String,
    /// Sentinel `host:port`. The host may be a DNS name; it is re-resolved
    /// whenever the sentinel stops answering.
    pub sentinel: String,
    /// Name of the monitored master, as known to the sentinel.
    pub master: Option<String>,
    pub watch: WatchConfig,
    pub discovery: DiscoveryConfig,
    pub relay: RelaySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// How often the sentinel is polled for the current master.
    pub interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Bound on dialing and querying the sentinel.
    pub timeout: String,
    /// Wait between attempts to re-resolve an unreachable sentinel's host.
    pub reresolve_backoff: String,
    /// Probe the advertised master before trusting it.
    pub verify_master: bool,
    /// Size of the buffer the sentinel reply is read into.
    pub reply_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    pub unknown_attempts: u32,
    pub unknown_backoff: String,
    pub dial_attempts: u32,
    pub dial_backoff: String,
    pub dial_timeout: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            sentinel: DEFAULT_SENTINEL.to_string(),
            master: None,
            watch: WatchConfig::default(),
            discovery: DiscoveryConfig::default(),
            relay: RelaySection::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: "2s".to_string(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout: "2s".to_string(),
            reresolve_backoff: "10s".to_string(),
            verify_master: true,
            reply_buffer: 256,
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            unknown_attempts: 5,
            unknown_backoff: "2s".to_string(),
            dial_attempts: 5,
            dial_backoff: "1s".to_string(),
            dial_timeout: "10s".to_string(),
        }
    }
}

impl RelayConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every value the relay will need, reporting the first problem.
    pub fn validate(&self) -> ConfigResult<()> {
        self.master_name()?;
        if self.listen.trim().is_empty() {
            return Err(ConfigError::InvalidAddress {
                key: "listen",
                value: self.listen.clone(),
            });
        }
        if self.sentinel.trim().is_empty() {
            return Err(ConfigError::InvalidAddress {
                key: "sentinel",
                value: self.sentinel.clone(),
            });
        }
        self.poll_interval()?;
        self.discovery_policy()?;
        self.reresolve_policy()?;
        self.unknown_wait_policy()?;
        self.dial_policy()?;
        Ok(())
    }

    /// The configured master name, rejecting empty values.
    pub fn master_name(&self) -> ConfigResult<&str> {
        match self.master.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(ConfigError::MissingMaster),
        }
    }

    /// Listen address with an empty host meaning all interfaces.
    pub fn listen_addr(&self) -> String {
        normalize_addr(&self.listen, "0.0.0.0")
    }

    /// Sentinel address with an empty host meaning localhost.
    pub fn sentinel_addr(&self) -> String {
        normalize_addr(&self.sentinel, "127.0.0.1")
    }

    pub fn poll_interval(&self) -> ConfigResult<Duration> {
        duration_field("watch.interval", &self.watch.interval)
    }

    /// Policy for one sentinel query: a single timed attempt. The watcher's
    /// poll loop is what retries.
    pub fn discovery_policy(&self) -> ConfigResult<RetryPolicy> {
        let timeout = duration_field("discovery.timeout", &self.discovery.timeout)?;
        Ok(RetryPolicy::fixed(1, Duration::ZERO, timeout))
    }

    /// Policy for re-resolving an unreachable sentinel's host. Never gives up.
    pub fn reresolve_policy(&self) -> ConfigResult<RetryPolicy> {
        let backoff = duration_field(
            "discovery.reresolve_backoff",
            &self.discovery.reresolve_backoff,
        )?;
        let timeout = duration_field("discovery.timeout", &self.discovery.timeout)?;
        Ok(RetryPolicy::unbounded(backoff, timeout))
    }

    /// Policy for waiting on a master that is not known yet.
    pub fn unknown_wait_policy(&self) -> ConfigResult<RetryPolicy> {
        if self.relay.unknown_attempts == 0 {
            return Err(ConfigError::ZeroAttempts("relay.unknown_attempts"));
        }
        let backoff = duration_field("relay.unknown_backoff", &self.relay.unknown_backoff)?;
        Ok(RetryPolicy::fixed(self.relay.unknown_attempts, backoff, backoff))
    }

    /// Policy for dialing the master.
    pub fn dial_policy(&self) -> ConfigResult<RetryPolicy> {
        if self.relay.dial_attempts == 0 {
            return Err(ConfigError::ZeroAttempts("relay.dial_attempts"));
        }
        let backoff = duration_field("relay.dial_backoff", &self.relay.dial_backoff)?;
        let timeout = duration_field("relay.dial_timeout", &self.relay.dial_timeout)?;
        Ok(RetryPolicy::fixed(self.relay.dial_attempts, backoff, timeout))
    }
}

fn duration_field(key: &'static str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        key,
        value: value.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

//! masterlink-core — shared building blocks for the failover relay.
//!
//! - **`retry`** — the single retry policy used by sentinel dials, sentinel
//!   re-resolution, the unknown-master wait, and master dials
//! - **`net`** — timed TCP dials and Go-style address normalization
//! - **`config`** — `masterlink.toml` parsing, defaults, and validation

pub mod config;
pub mod error;
pub mod net;
pub mod retry;

pub use config::{RelayConfig, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use net::{dial, normalize_addr};
pub use retry::{Backoff, RetryPolicy};

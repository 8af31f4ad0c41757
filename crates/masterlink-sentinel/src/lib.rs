//! masterlink-sentinel — asks a sentinel where the master is.
//!
//! # Components
//!
//! - **`address`** — the sentinel's socket address, shared and re-resolvable
//! - **`reply`** — parsing of the `get-master-addr-by-name` reply
//! - **`resolver`** — [`MasterAddressResolver`] and the [`MasterLookup`]
//!   seam the watcher and relays call through
//!
//! # Query flow
//!
//! ```text
//! resolve()
//!   ├── dial SentinelAddress ──(fails)──▶ re-resolve sentinel host, return DiscoveryUnreachable
//!   ├── write "sentinel get-master-addr-by-name <name>\n"
//!   ├── read reply, split on \r\n, take fields 2 and 4
//!   ├── resolve host:port
//!   └── probe the master (optional) → Resolution { address, liveness }
//! ```

pub mod address;
pub mod error;
pub mod reply;
pub mod resolver;

pub use address::SentinelAddress;
pub use error::{ResolveError, ResolveResult};
pub use resolver::{
    DiscoverySettings, Liveness, LookupFuture, MasterAddressResolver, MasterLookup, Resolution,
};

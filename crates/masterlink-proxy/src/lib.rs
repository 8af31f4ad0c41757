//! masterlink-proxy — bridges client connections to the current master.
//!
//! # Components
//!
//! - **`forward`** — one-directional copy that closes its destination
//! - **`relay`** — per-connection wait, dial with re-resolution, bridge,
//!   and drain on master change
//! - **`listener`** — accept loop used by the daemon
//! - **`stats`** — connection counters
//!
//! # Connection lifecycle
//!
//! ```text
//! accept ──▶ wait for master (bounded) ──▶ dial (bounded, re-resolving)
//!                 │                            │
//!           MasterUnknown                MasterUnreachable
//!                                              │
//!                                   spawn client→master, master→client
//!                                              │
//!            master side ends ◀────────────┴────────▶ generation fired
//!            abort client side: Completed                 abort, close: Drained
//! ```

pub mod error;
pub mod forward;
pub mod listener;
pub mod relay;
pub mod stats;

pub use error::{RelayError, RelayResult};
pub use forward::forward;
pub use listener::serve;
pub use relay::{RelayContext, RelayOutcome, RelaySettings, handle_connection, relay};
pub use stats::{RelayStats, StatsSnapshot};

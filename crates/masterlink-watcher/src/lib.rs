//! masterlink-watcher — tracks the current master and drains stale relays.
//!
//! # Architecture
//!
//! ```text
//! MasterWatcher (one background task)
//!   ├── MasterLookup::lookup() every poll interval
//!   ├── GenerationSource: mint on change, fire the retired generation
//!   └── watch::Sender<MasterSnapshot> ──▶ MasterHandle (one per relay)
//! ```
//!
//! Relays read the address and generation in a single snapshot and wait on
//! [`Generation::superseded`] while they forward bytes. A master change
//! fires the old generation, which wakes all of them at once.

pub mod generation;
pub mod watcher;

pub use generation::{Generation, GenerationSource, RetiredGeneration};
pub use watcher::{
    MasterHandle, MasterSnapshot, MasterState, MasterWatcher, WatchCallback, WatchEvent,
};

//! Master watcher — background task that tracks the current master.
//!
//! The `MasterWatcher` polls a [`MasterLookup`] on a fixed interval and
//! publishes `(MasterState, Generation)` snapshots through a watch channel.
//! It is the only writer of the master address. When the address changes
//! it mints a new generation, publishes it, and then fires the previous one
//! so every relay still bridged to the old master drains.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use masterlink_sentinel::{Liveness, MasterLookup};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::generation::{Generation, GenerationSource};

/// What the watcher currently believes about the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    /// No master learned yet.
    Unknown,
    Known(SocketAddr),
}

impl MasterState {
    pub fn address(&self) -> Option<SocketAddr> {
        match self {
            MasterState::Unknown => None,
            MasterState::Known(addr) => Some(*addr),
        }
    }
}

/// One consistent view of the master and its generation.
#[derive(Debug, Clone)]
pub struct MasterSnapshot {
    pub state: MasterState,
    pub generation: Generation,
}

/// Outcome of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// First master learned (`Unknown → Known`).
    Discovered { address: SocketAddr, generation: u64 },
    /// The master moved; the previous generation has been fired.
    Changed {
        from: SocketAddr,
        to: SocketAddr,
        generation: u64,
    },
    Unchanged { address: SocketAddr },
    /// The sentinel named a master that did not accept a probe connection.
    Unverified { address: SocketAddr, reason: String },
    /// The lookup itself failed; the previous state stands.
    LookupFailed { error: String },
}

/// Callback invoked with every poll outcome.
///
/// Lets callers observe transitions without scraping logs.
pub type WatchCallback = Arc<dyn Fn(&WatchEvent) + Send + Sync>;

/// Read side of the watcher. Cheap to clone; one per relay is fine.
#[derive(Debug, Clone)]
pub struct MasterHandle {
    rx: watch::Receiver<MasterSnapshot>,
}

impl MasterHandle {
    /// The latest snapshot, read in one step.
    pub fn snapshot(&self) -> MasterSnapshot {
        self.rx.borrow().clone()
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.rx.borrow().state.address()
    }

    pub fn generation(&self) -> Generation {
        self.rx.borrow().generation.clone()
    }

    /// Wait for the next published snapshot.
    ///
    /// Returns `false` once the watcher is gone and nothing new can arrive.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Polls for the master and owns its published state.
pub struct MasterWatcher {
    lookup: Arc<dyn MasterLookup>,
    interval: Duration,
    generations: GenerationSource,
    tx: watch::Sender<MasterSnapshot>,
    on_event: Option<WatchCallback>,
}

impl MasterWatcher {
    /// Create a watcher in the `Unknown` state at generation 0.
    pub fn new(lookup: Arc<dyn MasterLookup>, interval: Duration) -> Self {
        let generations = GenerationSource::new();
        let (tx, _rx) = watch::channel(MasterSnapshot {
            state: MasterState::Unknown,
            generation: generations.current(),
        });
        Self {
            lookup,
            interval,
            generations,
            tx,
            on_event: None,
        }
    }

    /// Set a callback for poll outcomes.
    pub fn with_callback(mut self, callback: WatchCallback) -> Self {
        self.on_event = Some(callback);
        self
    }

    /// A read handle for relays and the listener.
    pub fn handle(&self) -> MasterHandle {
        MasterHandle {
            rx: self.tx.subscribe(),
        }
    }

    pub fn state(&self) -> MasterState {
        self.tx.borrow().state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll once and apply the result.
    pub async fn tick(&mut self) -> WatchEvent {
        let result = self.lookup.lookup().await;
        let event = match result {
            Ok(resolution) => match resolution.liveness {
                Liveness::Unreachable(reason) => WatchEvent::Unverified {
                    address: resolution.address,
                    reason,
                },
                Liveness::Listening | Liveness::Skipped => self.observe(resolution.address),
            },
            Err(e) => WatchEvent::LookupFailed {
                error: e.to_string(),
            },
        };

        log_event(&event);
        if let Some(ref cb) = self.on_event {
            cb(&event);
        }
        event
    }

    /// Run until `shutdown` flips. The first poll happens immediately.
    ///
    /// Shutdown also interrupts a poll in flight; a sentinel lookup may
    /// retry DNS indefinitely.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "master watcher started");

        loop {
            tokio::select! {
                _ = self.tick() => {}
                _ = shutdown.changed() => break,
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        debug!("master watcher shutting down");
    }

    fn observe(&mut self, address: SocketAddr) -> WatchEvent {
        let previous = self.state();
        if previous == MasterState::Known(address) {
            return WatchEvent::Unchanged { address };
        }

        let (generation, retired) = self.generations.advance();
        let id = generation.id();
        self.tx.send_replace(MasterSnapshot {
            state: MasterState::Known(address),
            generation,
        });
        retired.fire();

        match previous {
            MasterState::Unknown => WatchEvent::Discovered {
                address,
                generation: id,
            },
            MasterState::Known(from) => WatchEvent::Changed {
                from,
                to: address,
                generation: id,
            },
        }
    }
}

fn log_event(event: &WatchEvent) {
    match event {
        WatchEvent::Discovered {
            address,
            generation,
        } => {
            info!(%address, generation, "master discovered");
        }
        WatchEvent::Changed {
            from,
            to,
            generation,
        } => {
            info!(%from, %to, generation, "master changed, draining connections");
        }
        WatchEvent::Unchanged { address } => {
            debug!(%address, "master unchanged");
        }
        WatchEvent::Unverified { address, reason } => {
            warn!(%address, %reason, "sentinel reported a master that is not accepting connections");
        }
        WatchEvent::LookupFailed { error } => {
            warn!(%error, "master lookup failed, keeping last known master");
        }
    }
}

//! Generation tokens — broadcast cancellation replaced on every master change.
//!
//! A [`Generation`] stands for "every connection dialed against the master
//! that was current when this generation was minted". The watcher owns a
//! [`GenerationSource`]; minting a new generation retires the previous one,
//! and firing a retired generation wakes every holder at once.
//!
//! The signal is level-triggered: a holder that starts waiting after the
//! generation fired returns immediately, so there is no window between
//! taking a token and starting to wait in which a firing can be missed.

use tokio::sync::watch;

/// A cloneable handle on one generation.
#[derive(Debug, Clone)]
pub struct Generation {
    id: u64,
    fired: watch::Receiver<bool>,
}

impl Generation {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this generation has been superseded.
    pub fn is_superseded(&self) -> bool {
        *self.fired.borrow() || self.fired.has_changed().is_err()
    }

    /// Resolve once this generation has been superseded.
    ///
    /// Also resolves if the watcher that minted it is gone, since nothing
    /// can vouch for the master any more.
    pub async fn superseded(&self) {
        let mut fired = self.fired.clone();
        let _ = fired.wait_for(|fired| *fired).await;
    }
}

impl PartialEq for Generation {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Generation {}

/// A generation that has been replaced but not yet fired.
#[derive(Debug)]
#[must_use = "a retired generation wakes nobody until it is fired"]
pub struct RetiredGeneration {
    id: u64,
    tx: watch::Sender<bool>,
}

impl RetiredGeneration {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wake every holder of this generation. Firing again is a no-op.
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }
}

/// Mints generations. Owned exclusively by the watcher.
#[derive(Debug)]
pub struct GenerationSource {
    id: u64,
    tx: watch::Sender<bool>,
}

impl GenerationSource {
    /// Start at generation 0.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { id: 0, tx }
    }

    /// A handle on the live generation.
    pub fn current(&self) -> Generation {
        Generation {
            id: self.id,
            fired: self.tx.subscribe(),
        }
    }

    /// Mint the next generation and hand back the one it replaces.
    ///
    /// The caller publishes the new generation first and fires the retired
    /// one afterwards, so woken holders already see the new state.
    pub fn advance(&mut self) -> (Generation, RetiredGeneration) {
        let (tx, _rx) = watch::channel(false);
        let retired = RetiredGeneration {
            id: self.id,
            tx: std::mem::replace(&mut self.tx, tx),
        };
        self.id += 1;
        (self.current(), retired)
    }
}

impl Default for GenerationSource {
    fn default() -> Self {
        Self::new()
    }
}

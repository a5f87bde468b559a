//! Process-wide shutdown coordination.
//!
//! A single flag, set once and never reset. The accept loop and every
//! forwarder observe it cooperatively: long-running loops `select!` on the
//! signal, and the bounded read timeout keeps a quiet connection from
//! blocking past one tick.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

/// Owner side of the shutdown flag.
///
/// Constructed once at startup and handed (via [`ShutdownSignal`]) to every
/// component that needs to observe shutdown.
#[derive(Debug)]
pub struct ShutdownController {
    triggered: AtomicBool,
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            triggered: AtomicBool::new(false),
            tx,
        }
    }

    /// Set the shutdown flag and wake all observers.
    ///
    /// Idempotent: returns true only for the invocation that actually
    /// triggered shutdown; duplicate signal deliveries are no-ops.
    pub fn trigger(&self) -> bool {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.tx.send(true);
        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Create a new observer of the shutdown flag.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of the shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once shutdown has been triggered.
    ///
    /// Resolves immediately when the flag is already set.
    pub async fn cancelled(&mut self) {
        // Err means the controller is gone; treat that as shutdown too.
        let _ = self.rx.wait_for(|&v| v).await;
    }

    /// Snapshot read of the flag.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }
}

//! Tick generation for the poll loops.
//!
//! A [`TickGen`] is a cancellable timer that can also be advanced manually
//! through its [`TickHandle`]. The loop that owns it picks the delay each
//! round, which is where poll cadence and failure backoff are applied; tests
//! drive the loop by poking instead of waiting out real time.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Why the tick fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The scheduled delay elapsed.
    Scheduled,
    /// Someone asked for an immediate cycle.
    Poked,
    /// The generator was shut down; the loop should exit.
    Shutdown,
}

/// Consumer side; owned by the loop being driven.
#[derive(Debug)]
pub struct TickGen {
    poke_rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
}

/// Producer side; pokes and shuts down the loop.
#[derive(Debug, Clone)]
pub struct TickHandle {
    poke_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
}

impl TickGen {
    pub fn new() -> (TickHandle, TickGen) {
        // Capacity one collapses poke bursts into a single extra cycle.
        let (poke_tx, poke_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        (
            TickHandle {
                poke_tx,
                cancel: cancel.clone(),
            },
            TickGen { poke_rx, cancel },
        )
    }

    /// Waits out `delay`, a poke, or shutdown, whichever comes first.
    pub async fn next(&mut self, delay: Duration) -> Tick {
        tokio::select! {
            _ = self.cancel.cancelled() => Tick::Shutdown,
            poked = self.poke_rx.recv() => match poked {
                Some(()) => Tick::Poked,
                None => Tick::Shutdown,
            },
            _ = tokio::time::sleep(delay) => Tick::Scheduled,
        }
    }
}

impl TickHandle {
    /// Requests an immediate cycle. Lost pokes are fine: one queued poke
    /// already guarantees a cycle is coming.
    pub fn poke(&self) {
        let _ = self.poke_tx.try_send(());
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use amber_model::{AmberError, ContentHash, ErrorKind, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::fetch::GetResult;
use crate::pkgfs::PackageFs;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// A resolved package should begin being made available. The caller awaits
/// `done` for the outcome; no activation notification is requested.
pub struct StartUpdateRequest {
    pub result: GetResult,
    pub done: oneshot::Sender<Result<()>>,
}

impl std::fmt::Debug for StartUpdateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartUpdateRequest")
            .field("hash", &self.result.update.content_hash())
            .finish()
    }
}

/// A client intends to use the artifact as soon as it is active. The monitor
/// owns `reply` from this point on: it either delivers the hash bytes and
/// closes, or closes without data.
pub struct CompleteUpdateRequest {
    pub result: GetResult,
    pub reply: oneshot::Sender<Vec<u8>>,
}

impl std::fmt::Debug for CompleteUpdateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompleteUpdateRequest")
            .field("hash", &self.result.update.content_hash())
            .finish()
    }
}

/// Producer side of the monitor's three input streams.
///
/// Dropping every clone of the handle (and every clone of the activation
/// sender) closes the streams and shuts the monitor down.
#[derive(Clone)]
pub struct MonitorHandle {
    start_tx: mpsc::Sender<StartUpdateRequest>,
    complete_tx: mpsc::Sender<CompleteUpdateRequest>,
    activation_tx: mpsc::Sender<ContentHash>,
}

impl std::fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandle").finish()
    }
}

impl MonitorHandle {
    /// Submits a start request and awaits its outcome.
    pub async fn start_update(&self, result: GetResult) -> Result<()> {
        let (done, done_rx) = oneshot::channel();
        self.start_tx
            .send(StartUpdateRequest { result, done })
            .await
            .map_err(|_| monitor_gone())?;
        done_rx.await.map_err(|_| monitor_gone())?
    }

    /// Hands a reply endpoint to the monitor. The endpoint resolves with
    /// the hash bytes on activation, or closes without data on failure or
    /// shutdown.
    pub async fn complete_update(
        &self,
        result: GetResult,
        reply: oneshot::Sender<Vec<u8>>,
    ) -> Result<()> {
        self.complete_tx
            .send(CompleteUpdateRequest { result, reply })
            .await
            .map_err(|_| monitor_gone())
    }

    /// The sender the activation feed watcher pushes into.
    pub fn activation_sender(&self) -> mpsc::Sender<ContentHash> {
        self.activation_tx.clone()
    }

    /// Injects one activation; used by tests and by in-process feeds.
    pub async fn activate(&self, hash: ContentHash) -> Result<()> {
        self.activation_tx
            .send(hash)
            .await
            .map_err(|_| monitor_gone())
    }
}

fn monitor_gone() -> AmberError {
    AmberError::new(ErrorKind::Cancelled, "activation monitor has shut down")
}

/// The single-worker coordinator for package filesystem writes.
///
/// All waitlist state lives on the loop task; producers reach it only
/// through bounded channels, so no lock is ever held and processing is one
/// event at a time. The per-hash states are derived from the map:
///
/// - absent key: nothing in flight
/// - key with empty list: write in progress, nobody waiting
/// - key with endpoints: write in progress, waiters queued in
///   registration order
pub struct ActivationMonitor {
    pkgfs: Arc<dyn PackageFs>,
    start_rx: mpsc::Receiver<StartUpdateRequest>,
    complete_rx: mpsc::Receiver<CompleteUpdateRequest>,
    activation_rx: mpsc::Receiver<ContentHash>,
    waiters: HashMap<ContentHash, Vec<oneshot::Sender<Vec<u8>>>>,
}

impl std::fmt::Debug for ActivationMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationMonitor")
            .field("in_flight", &self.waiters.len())
            .finish()
    }
}

impl ActivationMonitor {
    pub fn new(
        pkgfs: Arc<dyn PackageFs>,
        capacity: usize,
    ) -> (MonitorHandle, Self) {
        let (start_tx, start_rx) = mpsc::channel(capacity);
        let (complete_tx, complete_rx) = mpsc::channel(capacity);
        let (activation_tx, activation_rx) = mpsc::channel(capacity);
        let handle = MonitorHandle {
            start_tx,
            complete_tx,
            activation_tx,
        };
        let monitor = Self {
            pkgfs,
            start_rx,
            complete_rx,
            activation_rx,
            waiters: HashMap::new(),
        };
        (handle, monitor)
    }

    /// Spawns the monitor loop onto the runtime.
    pub fn spawn(
        pkgfs: Arc<dyn PackageFs>,
        capacity: usize,
    ) -> (MonitorHandle, tokio::task::JoinHandle<()>) {
        let (handle, monitor) = Self::new(pkgfs, capacity);
        (handle, tokio::spawn(monitor.run()))
    }

    /// Runs until all three input streams are closed, then flushes
    /// in-flight waiters by closing their endpoints without data.
    pub async fn run(mut self) {
        let mut start_open = true;
        let mut complete_open = true;
        let mut activation_open = true;
        loop {
            tokio::select! {
                request = self.start_rx.recv(), if start_open => {
                    match request {
                        Some(request) => self.handle_start(request).await,
                        None => start_open = false,
                    }
                }
                request = self.complete_rx.recv(), if complete_open => {
                    match request {
                        Some(request) => self.handle_complete(request).await,
                        None => complete_open = false,
                    }
                }
                hash = self.activation_rx.recv(), if activation_open => {
                    match hash {
                        Some(hash) => self.handle_activation(hash),
                        None => activation_open = false,
                    }
                }
            }
            if !start_open && !complete_open && !activation_open {
                break;
            }
        }
        if !self.waiters.is_empty() {
            warn!(
                pending = self.waiters.len(),
                "monitor shutting down with unactivated artifacts"
            );
        }
        // Dropping the map closes every queued endpoint without data.
        self.waiters.clear();
        debug!("activation monitor exited");
    }

    async fn handle_start(&mut self, request: StartUpdateRequest) {
        let hash = request.result.update.content_hash();
        let outcome = if self.waiters.contains_key(&hash) {
            // A write is already in flight; the start is satisfied by it.
            Ok(())
        } else {
            match self.pkgfs.create_install(hash).await {
                Ok(()) => {
                    self.waiters.insert(hash, Vec::new());
                    Ok(())
                }
                // Already installed or another writer owns it: success for
                // this caller, and no activation will be routed here.
                Err(e) if e.kind == ErrorKind::Conflict => Ok(()),
                Err(e) => Err(e),
            }
        };
        // The requester may have given up; a dead listener is fine.
        let _ = request.done.send(outcome);
    }

    async fn handle_complete(&mut self, request: CompleteUpdateRequest) {
        let hash = request.result.update.content_hash();
        if let Some(queue) = self.waiters.get_mut(&hash) {
            queue.push(request.reply);
            return;
        }
        match self.pkgfs.create_install(hash).await {
            Ok(()) => {
                self.waiters.insert(hash, vec![request.reply]);
            }
            Err(e) if e.kind == ErrorKind::Conflict => {
                // No wait entry and the artifact already exists on disk: no
                // activation will ever arrive, so answer immediately.
                let _ = request.reply.send(hash.as_hex_bytes());
            }
            Err(e) => {
                warn!(%hash, error = %e, "install create failed");
                // Closing without data is the failure signal.
                drop(request.reply);
            }
        }
    }

    fn handle_activation(&mut self, hash: ContentHash) {
        match self.waiters.remove(&hash) {
            Some(queue) => {
                let waiters = queue.len();
                for endpoint in queue {
                    // A waiter that went away is a no-op; everyone else is
                    // notified exactly once, in registration order.
                    let _ = endpoint.send(hash.as_hex_bytes());
                }
                debug!(%hash, waiters, "artifact activated");
            }
            None => {
                debug!(%hash, "activation for unknown artifact dropped");
            }
        }
    }
}

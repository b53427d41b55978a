use std::path::Path;

use amber_model::{AmberError, ContentHash, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Watches the package filesystem's activation directory and forwards each
/// newly activated content hash onto a channel.
///
/// The feed preserves per-hash order (each hash is activated once) and makes
/// no ordering promise across hashes. Dropping the watcher closes the feed.
pub struct ActivationWatcher {
    // Held for its Drop; the watch lapses when this goes away.
    _watcher: notify::RecommendedWatcher,
}

impl std::fmt::Debug for ActivationWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationWatcher").finish()
    }
}

impl ActivationWatcher {
    /// Starts watching `active_dir`, sending each activated hash to `tx`.
    pub fn spawn(
        active_dir: &Path,
        tx: mpsc::Sender<ContentHash>,
    ) -> Result<Self> {
        let mut watcher = notify::recommended_watcher(
            move |event: std::result::Result<Event, notify::Error>| {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "activation watch error");
                        return;
                    }
                };
                if !matches!(event.kind, EventKind::Create(_)) {
                    return;
                }
                for path in event.paths {
                    let Some(name) =
                        path.file_name().and_then(|n| n.to_str())
                    else {
                        continue;
                    };
                    match name.parse::<ContentHash>() {
                        Ok(hash) => {
                            debug!(%hash, "activation observed");
                            // The receiver lives on the runtime; this
                            // callback runs on notify's own thread.
                            if tx.blocking_send(hash).is_err() {
                                return;
                            }
                        }
                        Err(_) => {
                            debug!(entry = %name, "ignoring non-hash entry");
                        }
                    }
                }
            },
        )
        .map_err(|e| {
            AmberError::io(format!("cannot create activation watcher: {e}"))
        })?;
        watcher
            .watch(active_dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                AmberError::io(format!(
                    "cannot watch {}: {e}",
                    active_dir.display()
                ))
            })?;
        Ok(Self { _watcher: watcher })
    }
}

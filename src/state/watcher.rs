//! Debounced file watcher for the pane snapshot file, so a TUI in one
//! process picks up changes written by a worker or the HTTP server in
//! another (spec.md §4.1: "other processes reload and re-render").
//!
//! No file in the workmux lineage watches its own state file (each
//! invocation is a fresh read), so this is grounded directly on the
//! `notify` crate's own debounce-by-hand recommendation rather than a
//! lineage precedent.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use notify::{Event, RecursiveMode, Watcher};
use tracing::{debug, warn};

use super::{StateStore, BROADCAST_DEBOUNCE};

/// Spawn a background thread that watches the project's `.dmux/` directory
/// and calls `store.reload()` at most once per debounce window after a
/// burst of filesystem events quiesces.
pub fn spawn_watcher(store: Arc<StateStore>, project_root: &Path) -> notify::Result<()> {
    let watch_dir = crate::config::dmux_dir(project_root);
    std::fs::create_dir_all(&watch_dir).ok();

    let (tx, rx) = std::sync::mpsc::channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })?;
    watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

    thread::spawn(move || {
        // Keep the watcher alive for the life of the thread.
        let _watcher = watcher;
        loop {
            match rx.recv() {
                Ok(Ok(_event)) => {
                    // Drain any further events that arrive within the debounce
                    // window so a burst of writes triggers a single reload.
                    while rx.recv_timeout(BROADCAST_DEBOUNCE).is_ok() {}
                    debug!("state:watcher debounced burst settled, reloading");
                    if let Err(e) = store.reload() {
                        warn!(error = %e, "state:watcher reload failed");
                    }
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "state:watcher observed an error event");
                }
                Err(_) => {
                    debug!("state:watcher channel closed, exiting thread");
                    break;
                }
            }
        }
    });

    Ok(())
}

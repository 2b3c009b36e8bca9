//! Keeps exactly one [`PaneWorker`] task alive per live, non-welcome pane
//! (spec.md §5: "one task per pane"), started and stopped as panes are
//! created and closed.
//!
//! No lineage counterpart — the workmux dashboard re-scans every refresh
//! instead of holding a standing task per window. Grounded on the same
//! `tokio::select!` + `CancellationToken` shape [`PaneWorker::run`] already
//! uses, one layer up: this just decides which pane ids currently deserve a
//! task.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::multiplexer::TmuxService;
use crate::pane::PaneKind;
use crate::state::StateStore;

use super::llm::LlmAnalyzer;
use super::PaneWorker;

const RESCAN_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

struct Handle {
    cancel: tokio_util::sync::CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// Runs until `shutdown` fires. Subscribes to store change events to react
/// quickly to new/closed panes, with a bounded rescan as a backstop in case
/// a notification is ever missed (debounced broadcasts can coalesce events,
/// per spec.md §5's "state store broadcaster debounces bursts").
pub async fn run(tmux: Arc<TmuxService>, store: Arc<StateStore>, llm: Arc<LlmAnalyzer>, shutdown: tokio_util::sync::CancellationToken) {
    let mut workers: HashMap<String, Handle> = HashMap::new();
    let mut events = store.subscribe();

    loop {
        reconcile_workers(&tmux, &store, &llm, &mut workers);

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(RESCAN_INTERVAL) => {}
            recv = events.recv() => {
                if recv.is_err() {
                    // Lagged or closed sender: fall through to the next
                    // rescan rather than tearing the supervisor down.
                    continue;
                }
            }
        }
    }

    for (pane_id, handle) in workers {
        handle.cancel.cancel();
        let _ = handle.task.await;
        debug!(pane_id, "supervisor:worker stopped on shutdown");
    }
}

fn reconcile_workers(tmux: &Arc<TmuxService>, store: &Arc<StateStore>, llm: &Arc<LlmAnalyzer>, workers: &mut HashMap<String, Handle>) {
    let wanted: HashMap<String, ()> = store
        .list_panes()
        .into_iter()
        .filter(|p| p.kind != PaneKind::Welcome && p.is_live())
        .map(|p| (p.id, ()))
        .collect();

    workers.retain(|pane_id, handle| {
        if wanted.contains_key(pane_id) {
            true
        } else {
            handle.cancel.cancel();
            info!(pane_id, "supervisor:stopping worker for a pane that is no longer live");
            false
        }
    });

    for pane_id in wanted.keys() {
        if workers.contains_key(pane_id) {
            continue;
        }
        info!(pane_id, "supervisor:starting worker");
        let worker = PaneWorker::new(pane_id.clone(), Arc::clone(tmux), Arc::clone(store), Arc::clone(llm));
        let cancel = worker.cancellation();
        let task = worker.spawn();
        workers.insert(pane_id.clone(), Handle { cancel, task });
    }
}

//! Callback registry for the HTTP adapter (spec.md §4.7): pending
//! continuations are opaque, short-lived, and do not survive a process
//! restart.
//!
//! Grounded on nothing in the workmux lineage (it's CLI/TUI only); modeled
//! as an in-memory `Mutex<HashMap>` keyed by `uuid`, TTL-swept the same
//! shape as the state store's debounce timer.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;

use super::{ChoiceContinuation, Continuation, InputContinuation};

const CALLBACK_TTL: Duration = Duration::from_secs(5 * 60);

pub enum PendingCallback {
    Confirm { on_confirm: Continuation, on_cancel: Continuation },
    Choice { on_select: ChoiceContinuation },
    Input { on_submit: InputContinuation },
}

struct Entry {
    callback: PendingCallback,
    registered_at: Instant,
}

pub struct CallbackRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a pending callback, returning the opaque id a client must
    /// present to `/api/callbacks/{kind}/{id}`.
    pub fn register(&self, callback: PendingCallback) -> String {
        let id = Uuid::new_v4().to_string();
        let mut entries = self.entries.lock().expect("callback registry lock poisoned");
        entries.insert(
            id.clone(),
            Entry {
                callback,
                registered_at: Instant::now(),
            },
        );
        id
    }

    /// Consume a pending callback by id. Returns `None` if the id is
    /// unknown or already expired — callers should treat this as "the
    /// dialog is stale, please retry the action from scratch".
    pub fn consume(&self, id: &str) -> Option<PendingCallback> {
        let mut entries = self.entries.lock().expect("callback registry lock poisoned");
        let entry = entries.remove(id)?;
        if entry.registered_at.elapsed() > CALLBACK_TTL {
            None
        } else {
            Some(entry.callback)
        }
    }

    /// Drop expired entries. Intended to run periodically on a background
    /// timer, mirroring the state store's debounce thread.
    pub fn sweep(&self) {
        let mut entries = self.entries.lock().expect("callback registry lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| entry.registered_at.elapsed() <= CALLBACK_TTL);
        let swept = before - entries.len();
        if swept > 0 {
            debug!(swept, "callback_registry:swept expired entries");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("callback registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawn a background thread sweeping the registry every minute. Returned
/// thread is detached; it runs for the life of the process.
pub fn spawn_sweeper(registry: std::sync::Arc<CallbackRegistry>) {
    std::thread::spawn(move || loop {
        std::thread::sleep(Duration::from_secs(60));
        registry.sweep();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionResult;

    #[test]
    fn register_then_consume_round_trips() {
        let registry = CallbackRegistry::new();
        let id = registry.register(PendingCallback::Confirm {
            on_confirm: Box::new(|| ActionResult::success("confirmed")),
            on_cancel: Box::new(|| ActionResult::info("cancelled")),
        });
        assert!(registry.consume(&id).is_some());
    }

    #[test]
    fn consuming_twice_returns_none_the_second_time() {
        let registry = CallbackRegistry::new();
        let id = registry.register(PendingCallback::Input {
            on_submit: Box::new(|_value| ActionResult::success("ok")),
        });
        assert!(registry.consume(&id).is_some());
        assert!(registry.consume(&id).is_none());
    }

    #[test]
    fn unknown_id_is_none() {
        let registry = CallbackRegistry::new();
        assert!(registry.consume("does-not-exist").is_none());
    }

    #[test]
    fn sweep_removes_nothing_when_fresh() {
        let registry = CallbackRegistry::new();
        registry.register(PendingCallback::Choice {
            on_select: Box::new(|_id| ActionResult::success("chosen")),
        });
        registry.sweep();
        assert_eq!(registry.len(), 1);
    }
}

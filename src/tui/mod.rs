//! TUI state model (spec.md §4.7, §2 Non-goals: "rendering of the TUI
//! widgets themselves; we specify only the state they render"). This module
//! owns the dialog-transition discipline and the toast queue; drawing them
//! to the terminal is an adapter this crate doesn't implement.
//!
//! Grounded on `command::dashboard::App`'s dialog-state field in the
//! workmux lineage, generalized from "one `Option<Dialog>` set directly" to
//! the clear → paint-tick → set discipline spec.md §4.7 calls for, since
//! the lineage renders every frame from scratch and never had two dialogs
//! to transition between in the same tick.

use std::collections::VecDeque;

use crate::action::{ActionResult, ChoiceContinuation, ChoiceOption, Continuation, InputContinuation};

/// A transient, self-dismissing message (spec.md §7: "error and success
/// results are dismissable toasts; info is a status-line message").
#[derive(Debug)]
pub enum Toast {
    Success(String),
    Error(String),
    Info(String),
}

/// A blocking dialog: the TUI equivalent of the HTTP adapter's
/// `requiresInteraction` response, minus the callback-registry id — the
/// continuation lives in-process instead of being handed back over the
/// wire.
pub enum DialogState {
    Confirm {
        message: String,
        title: Option<String>,
        confirm_label: String,
        cancel_label: String,
        on_confirm: Continuation,
        on_cancel: Continuation,
    },
    Choice {
        message: String,
        title: Option<String>,
        options: Vec<ChoiceOption>,
        on_select: ChoiceContinuation,
    },
    Input {
        message: String,
        title: Option<String>,
        placeholder: Option<String>,
        default_value: Option<String>,
        on_submit: InputContinuation,
    },
    Progress {
        message: String,
        progress: Option<f32>,
    },
}

impl std::fmt::Debug for DialogState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialogState::Confirm { message, .. } => write!(f, "Confirm({message})"),
            DialogState::Choice { message, options, .. } => write!(f, "Choice({message}, {} options)", options.len()),
            DialogState::Input { message, .. } => write!(f, "Input({message})"),
            DialogState::Progress { message, progress } => write!(f, "Progress({message}, {progress:?})"),
        }
    }
}

/// What happened to the active pane view after dispatching an action.
/// `None` means the result only produced a toast or dialog; the caller's
/// current pane selection is unaffected.
pub struct Outcome {
    pub navigate_to: Option<String>,
}

/// Holds the dialog-transition state machine plus the toast queue for one
/// TUI session. Not `Send` by design — the TUI runs on its own cooperative,
/// single-threaded context (spec.md §5) and hands off anything blocking to
/// the dispatcher instead of doing it inline.
#[derive(Default)]
pub struct TuiState {
    current: Option<DialogState>,
    pending: Option<Option<DialogState>>,
    toasts: VecDeque<Toast>,
}

impl TuiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_dialog(&self) -> Option<&DialogState> {
        self.current.as_ref()
    }

    pub fn pop_toast(&mut self) -> Option<Toast> {
        self.toasts.pop_front()
    }

    /// Feed an [`ActionResult`] into the TUI's view of the world: toasts
    /// enqueue, navigation is reported back to the caller, and dialogs go
    /// through the clear → paint-tick → set transition (spec.md §4.7).
    pub fn apply(&mut self, result: ActionResult) -> Outcome {
        match result {
            ActionResult::Success { message, .. } => {
                self.toasts.push_back(Toast::Success(message));
                Outcome { navigate_to: None }
            }
            ActionResult::Error { message, .. } => {
                self.toasts.push_back(Toast::Error(message));
                Outcome { navigate_to: None }
            }
            ActionResult::Info { message, .. } => {
                self.toasts.push_back(Toast::Info(message));
                Outcome { navigate_to: None }
            }
            ActionResult::Navigation { target_pane_id } => Outcome { navigate_to: Some(target_pane_id) },
            ActionResult::Confirm { message, title, confirm_label, cancel_label, on_confirm, on_cancel } => {
                self.transition(DialogState::Confirm { message, title, confirm_label, cancel_label, on_confirm, on_cancel });
                Outcome { navigate_to: None }
            }
            ActionResult::Choice { message, title, options, on_select } => {
                self.transition(DialogState::Choice { message, title, options, on_select });
                Outcome { navigate_to: None }
            }
            ActionResult::Input { message, title, placeholder, default_value, on_submit } => {
                self.transition(DialogState::Input { message, title, placeholder, default_value, on_submit });
                Outcome { navigate_to: None }
            }
            ActionResult::Progress { message, progress } => {
                self.transition(DialogState::Progress { message, progress });
                Outcome { navigate_to: None }
            }
        }
    }

    /// Replacing an already-open dialog clears first and defers the new one
    /// to the next [`TuiState::tick`] — this is what avoids the rendering
    /// artifact from drawing two dialogs' content in the same frame. An
    /// empty slot accepts the new dialog immediately.
    fn transition(&mut self, next: DialogState) {
        if self.current.is_some() {
            self.current = None;
            self.pending = Some(Some(next));
        } else {
            self.current = Some(next);
        }
    }

    /// Drive the clear → set half of the transition. Call once per render
    /// tick; a no-op unless a transition is mid-flight.
    pub fn tick(&mut self) {
        if let Some(next) = self.pending.take() {
            self.current = next;
        }
    }

    /// Dismiss the active dialog without resolving its continuation — the
    /// TUI's own escape-key handling, distinct from answering `Cancel`.
    pub fn dismiss(&mut self) {
        self.current = None;
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toast_results_enqueue_without_touching_the_dialog_slot() {
        let mut state = TuiState::new();
        state.apply(ActionResult::success("done"));
        assert!(state.current_dialog().is_none());
        assert!(matches!(state.pop_toast(), Some(Toast::Success(_))));
    }

    #[test]
    fn navigation_is_reported_through_the_outcome_not_the_dialog() {
        let mut state = TuiState::new();
        let outcome = state.apply(ActionResult::navigation("pane-1"));
        assert_eq!(outcome.navigate_to.as_deref(), Some("pane-1"));
        assert!(state.current_dialog().is_none());
    }

    #[test]
    fn first_dialog_into_an_empty_slot_sets_immediately() {
        let mut state = TuiState::new();
        state.apply(ActionResult::Progress { message: "working".into(), progress: None });
        assert!(state.current_dialog().is_some());
    }

    #[test]
    fn replacing_an_open_dialog_clears_before_the_next_tick() {
        let mut state = TuiState::new();
        state.apply(ActionResult::Progress { message: "first".into(), progress: None });
        state.apply(ActionResult::Progress { message: "second".into(), progress: None });

        // Cleared immediately, not yet showing "second".
        assert!(state.current_dialog().is_none());

        state.tick();
        match state.current_dialog() {
            Some(DialogState::Progress { message, .. }) => assert_eq!(message, "second"),
            other => panic!("expected the deferred dialog to commit on tick, got {other:?}"),
        }
    }

    #[test]
    fn dismiss_drops_both_current_and_pending() {
        let mut state = TuiState::new();
        state.apply(ActionResult::Progress { message: "first".into(), progress: None });
        state.apply(ActionResult::Progress { message: "second".into(), progress: None });
        state.dismiss();
        state.tick();
        assert!(state.current_dialog().is_none());
    }
}

//! The action dispatcher and dialog protocol (spec.md §4.7): the uniform
//! way any surface — TUI, HTTP, background monitor — requests an action on
//! a pane and drives it through interactive steps.
//!
//! Grounded on `command::dashboard::actions::apply_action`'s `Action` enum
//! + dispatch function in the workmux lineage, generalized from "mutate
//! `App` in place, return a bool" into "return an `ActionResult`
//! continuation" so a step doesn't need to complete synchronously.

pub mod callback;
pub mod dispatch;

use std::fmt;

use crate::pane::Pane;

/// A deferred next step. Boxed rather than generic since the registry (and
/// the TUI's dialog-state record) need to store heterogeneous continuations
/// in one collection.
pub type Continuation = Box<dyn FnOnce() -> ActionResult + Send>;
pub type ChoiceContinuation = Box<dyn FnOnce(&str) -> ActionResult + Send>;
pub type InputContinuation = Box<dyn FnOnce(&str) -> ActionResult + Send>;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceOption {
    pub id: String,
    pub label: String,
    pub description: Option<String>,
    pub danger: bool,
    pub default: bool,
}

pub enum ActionResult {
    Success { message: String, title: Option<String> },
    Error { message: String, title: Option<String> },
    Info { message: String, title: Option<String> },
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
    Progress { message: String, progress: Option<f32> },
    Navigation { target_pane_id: String },
}

impl fmt::Debug for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionResult::Success { message, .. } => write!(f, "Success({message})"),
            ActionResult::Error { message, .. } => write!(f, "Error({message})"),
            ActionResult::Info { message, .. } => write!(f, "Info({message})"),
            ActionResult::Confirm { message, .. } => write!(f, "Confirm({message})"),
            ActionResult::Choice { message, options, .. } => {
                write!(f, "Choice({message}, {} options)", options.len())
            }
            ActionResult::Input { message, .. } => write!(f, "Input({message})"),
            ActionResult::Progress { message, progress } => write!(f, "Progress({message}, {progress:?})"),
            ActionResult::Navigation { target_pane_id } => write!(f, "Navigation({target_pane_id})"),
        }
    }
}

impl ActionResult {
    pub fn success(message: impl Into<String>) -> Self {
        ActionResult::Success { message: message.into(), title: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ActionResult::Error { message: message.into(), title: None }
    }

    pub fn info(message: impl Into<String>) -> Self {
        ActionResult::Info { message: message.into(), title: None }
    }

    pub fn navigation(target_pane_id: impl Into<String>) -> Self {
        ActionResult::Navigation { target_pane_id: target_pane_id.into() }
    }
}

/// The fixed set the dispatcher registers (spec.md §4.7). `OpenPr` and
/// `Merge` are the only ones with nontrivial branching; the rest are near
/// one-liners over the state store or tmux service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionId {
    View,
    Close,
    Merge,
    Rename,
    Duplicate,
    CopyPath,
    OpenEditor,
    ToggleAutopilot,
    OpenPr,
}

impl ActionId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionId::View => "VIEW",
            ActionId::Close => "CLOSE",
            ActionId::Merge => "MERGE",
            ActionId::Rename => "RENAME",
            ActionId::Duplicate => "DUPLICATE",
            ActionId::CopyPath => "COPY_PATH",
            ActionId::OpenEditor => "OPEN_EDITOR",
            ActionId::ToggleAutopilot => "TOGGLE_AUTOPILOT",
            ActionId::OpenPr => "OPEN_PR",
        }
    }

    pub fn all() -> &'static [ActionId] {
        &[
            ActionId::View,
            ActionId::Close,
            ActionId::Merge,
            ActionId::Rename,
            ActionId::Duplicate,
            ActionId::CopyPath,
            ActionId::OpenEditor,
            ActionId::ToggleAutopilot,
            ActionId::OpenPr,
        ]
    }

    pub fn parse(name: &str) -> Option<ActionId> {
        Self::all().iter().copied().find(|a| a.as_str() == name)
    }
}

/// Turn a pattern-detected option dialog into the keystrokes for the chosen
/// option, routed through the tmux service — spec.md §4.7's "dispatcher
/// also routes pattern-detected option dialogs as actions".
pub fn send_option_keys(tmux: &crate::multiplexer::TmuxService, pane: &Pane, keys: &[String]) {
    for key in keys {
        let _ = tmux.send_key(&pane.terminal_pane_id, key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_id_round_trips_through_its_wire_name() {
        for action in ActionId::all() {
            assert_eq!(ActionId::parse(action.as_str()), Some(*action));
        }
    }

    #[test]
    fn unknown_action_name_does_not_parse() {
        assert_eq!(ActionId::parse("DELETE_EVERYTHING"), None);
    }
}

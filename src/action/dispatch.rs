//! The fixed action registry (spec.md §4.7): `(pane, context, params?) →
//! ActionResult`. Grounded on `command::dashboard::actions::apply_action`
//! in the workmux lineage, generalized to return a continuation instead of
//! mutating a dashboard `App` struct in place.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::manager::{self, CloseMode};
use crate::merge;
use crate::multiplexer::TmuxService;
use crate::pane::Pane;
use crate::state::StateStore;

use super::{ActionId, ActionResult, ChoiceOption};

pub struct ActionContext {
    pub tmux: Arc<TmuxService>,
    pub store: Arc<StateStore>,
    /// The dashboard's own pane id, used as the welcome pane's anchor when
    /// the last agent pane closes. `None` in contexts with no dashboard
    /// pane of their own (e.g. a headless HTTP-only invocation).
    pub control_pane_id: Option<String>,
}

/// Dispatch a registered action by id. `params` carries the adapter-supplied
/// argument for actions that need one up front (e.g. a prospective new slug
/// for `RENAME` submitted directly rather than via the `input` dialog step).
pub fn dispatch(action: ActionId, pane: &Pane, ctx: &ActionContext, params: Option<&Value>) -> ActionResult {
    match action {
        ActionId::View => ActionResult::navigation(pane.id.clone()),
        ActionId::Close => close_dialog(pane.id.clone(), ctx),
        ActionId::Merge => merge::start(ctx, pane),
        ActionId::Rename => rename(pane, ctx, params),
        ActionId::Duplicate => duplicate(pane, ctx),
        ActionId::CopyPath => copy_path(pane, ctx),
        ActionId::OpenEditor => open_editor(pane),
        ActionId::ToggleAutopilot => toggle_autopilot(pane, ctx),
        ActionId::OpenPr => merge::open_pr(ctx, pane),
    }
}

/// The four-way close choice spec.md §4.3 describes: kill the terminal pane
/// only, remove the worktree too, delete everything including the branch,
/// or cancel.
fn close_dialog(pane_id: String, ctx: &ActionContext) -> ActionResult {
    let tmux = Arc::clone(&ctx.tmux);
    let store = Arc::clone(&ctx.store);
    let control_pane_id = ctx.control_pane_id.clone();
    let options = vec![
        ChoiceOption {
            id: "kill_only".into(),
            label: "Close pane".into(),
            description: Some("Keep the worktree and branch".into()),
            danger: false,
            default: true,
        },
        ChoiceOption {
            id: "remove_worktree".into(),
            label: "Close pane and remove worktree".into(),
            description: Some("Keeps the branch".into()),
            danger: false,
            default: false,
        },
        ChoiceOption {
            id: "delete_everything".into(),
            label: "Close pane, remove worktree, delete branch".into(),
            description: None,
            danger: true,
            default: false,
        },
        ChoiceOption {
            id: "cancel".into(),
            label: "Cancel".into(),
            description: None,
            danger: false,
            default: false,
        },
    ];

    ActionResult::Choice {
        message: "Close this pane?".into(),
        title: None,
        options,
        on_select: Box::new(move |choice| {
            let anchor = control_pane_id.as_deref();
            match choice {
                "kill_only" => manager::close_with_mode(&tmux, &store, &pane_id, CloseMode::KillOnly, anchor),
                "remove_worktree" => manager::close_with_mode(&tmux, &store, &pane_id, CloseMode::RemoveWorktree, anchor),
                "delete_everything" => manager::close_with_mode(&tmux, &store, &pane_id, CloseMode::DeleteEverything, anchor),
                _ => ActionResult::info("Cancelled"),
            }
        }),
    }
}

fn rename(pane: &Pane, ctx: &ActionContext, params: Option<&Value>) -> ActionResult {
    if let Some(slug) = params.and_then(|p| p.get("slug")).and_then(|v| v.as_str()) {
        return apply_rename(pane, ctx, slug);
    }

    let pane_id = pane.id.clone();
    let store = Arc::clone(&ctx.store);
    ActionResult::Input {
        message: "New name for this pane".into(),
        title: None,
        placeholder: Some("kebab-case-slug".into()),
        default_value: Some(pane.slug.clone()),
        on_submit: Box::new(move |value| {
            let store = Arc::clone(&store);
            match store.get_pane(&pane_id) {
                Some(pane) => apply_rename(&pane, &ActionContext { tmux: Arc::new(TmuxService::new()), store, control_pane_id: None }, value),
                None => ActionResult::error("Pane no longer exists"),
            }
        }),
    }
}

fn apply_rename(pane: &Pane, ctx: &ActionContext, new_slug: &str) -> ActionResult {
    let mut snapshot = ctx.store.list_panes();
    let Some(entry) = snapshot.iter_mut().find(|p| p.id == pane.id) else {
        return ActionResult::error("Pane no longer exists");
    };
    entry.slug = new_slug.to_string();
    let slug_for_title = new_slug.to_string();
    match ctx.store.apply_panes(snapshot) {
        Ok(()) => {
            let _ = ctx.tmux.set_pane_title(&pane.terminal_pane_id, &slug_for_title);
            ActionResult::success(format!("Renamed to {new_slug}"))
        }
        Err(e) => {
            warn!(pane_id = %pane.id, error = %e, "action:rename failed to persist");
            ActionResult::error("Failed to save the new name")
        }
    }
}

fn duplicate(pane: &Pane, ctx: &ActionContext) -> ActionResult {
    let pane_id = pane.id.clone();
    let tmux = Arc::clone(&ctx.tmux);
    let store = Arc::clone(&ctx.store);
    ActionResult::Confirm {
        message: format!("Create a new pane branched from {}'s current work?", pane.slug),
        title: None,
        confirm_label: "Duplicate".into(),
        cancel_label: "Cancel".into(),
        on_confirm: Box::new(move || match store.get_pane(&pane_id) {
            Some(pane) => manager::duplicate(&tmux, &store, &pane),
            None => ActionResult::error("Pane no longer exists"),
        }),
        on_cancel: Box::new(|| ActionResult::info("Cancelled")),
    }
}

/// Copies the worktree path into tmux's own paste buffer rather than
/// reaching for a platform clipboard crate — the multiplexer is already
/// the thing this crate talks to for everything else.
fn copy_path(pane: &Pane, ctx: &ActionContext) -> ActionResult {
    let Some(path) = &pane.worktree_path else {
        return ActionResult::error("This pane has no worktree");
    };
    let path_str = path.display().to_string();
    match ctx.tmux.set_buffer(&path_str) {
        Ok(_buffer) => ActionResult::success(format!("Copied {path_str}")),
        Err(e) => {
            warn!(pane_id = %pane.id, error = %e, "action:copy_path failed");
            ActionResult::error("Failed to copy path")
        }
    }
}

fn open_editor(pane: &Pane) -> ActionResult {
    let Some(path) = &pane.worktree_path else {
        return ActionResult::error("This pane has no worktree");
    };
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    match std::process::Command::new(&editor).arg(path).spawn() {
        Ok(_child) => ActionResult::success(format!("Opened {editor}")),
        Err(e) => {
            warn!(pane_id = %pane.id, editor, error = %e, "action:open_editor failed to spawn");
            ActionResult::error(format!("Failed to launch {editor}"))
        }
    }
}

fn toggle_autopilot(pane: &Pane, ctx: &ActionContext) -> ActionResult {
    let new_value = !pane.autopilot;
    // autopilot is user-set rather than analyzer-set, so it's flipped
    // directly on a full snapshot instead of going through
    // `update_pane_status`'s analyzer-field merge.
    let mut snapshot = ctx.store.list_panes();
    if let Some(entry) = snapshot.iter_mut().find(|p| p.id == pane.id) {
        entry.autopilot = new_value;
    }
    match ctx.store.apply_panes(snapshot) {
        Ok(()) => ActionResult::success(if new_value { "Autopilot enabled" } else { "Autopilot disabled" }),
        Err(e) => {
            warn!(pane_id = %pane.id, error = %e, "action:toggle_autopilot failed to persist");
            ActionResult::error("Failed to toggle autopilot")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pane::PaneKind;
    use std::path::PathBuf;

    fn ctx() -> (ActionContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::load(dir.path()).unwrap();
        (
            ActionContext {
                tmux: Arc::new(TmuxService::new()),
                store,
                control_pane_id: None,
            },
            dir,
        )
    }

    fn sample_pane() -> Pane {
        Pane {
            id: "pane-1".into(),
            slug: "fix-login".into(),
            kind: PaneKind::Worktree,
            prompt: String::new(),
            terminal_pane_id: "%1".into(),
            worktree_path: Some(PathBuf::from("/tmp/wt/fix-login")),
            agent: Some("claude".into()),
            project_root: PathBuf::from("/tmp/proj"),
            project_name: "proj".into(),
            agent_status: crate::pane::AgentStatus::Idle,
            options_question: None,
            options: Vec::new(),
            potential_harm: None,
            agent_summary: None,
            autopilot: false,
            dev_window_id: None,
            test_window_id: None,
            dev_status: None,
            test_status: None,
            dev_url: None,
            orphaned: false,
        }
    }

    #[test]
    fn view_action_is_navigation() {
        let (ctx, _dir) = ctx();
        let pane = sample_pane();
        let result = dispatch(ActionId::View, &pane, &ctx, None);
        assert!(matches!(result, ActionResult::Navigation { .. }));
    }

    #[test]
    fn close_action_offers_four_choices() {
        let (ctx, _dir) = ctx();
        let pane = sample_pane();
        let result = dispatch(ActionId::Close, &pane, &ctx, None);
        match result {
            ActionResult::Choice { options, .. } => assert_eq!(options.len(), 4),
            other => panic!("expected choice, got {other:?}"),
        }
    }

    #[test]
    fn rename_without_params_asks_for_input() {
        let (ctx, _dir) = ctx();
        ctx.store.apply_panes(vec![sample_pane()]).unwrap();
        let pane = sample_pane();
        let result = dispatch(ActionId::Rename, &pane, &ctx, None);
        assert!(matches!(result, ActionResult::Input { .. }));
    }

    #[test]
    fn toggle_autopilot_flips_and_persists() {
        let (ctx, _dir) = ctx();
        ctx.store.apply_panes(vec![sample_pane()]).unwrap();
        let pane = ctx.store.get_pane("pane-1").unwrap();
        assert!(!pane.autopilot);
        dispatch(ActionId::ToggleAutopilot, &pane, &ctx, None);
        assert!(ctx.store.get_pane("pane-1").unwrap().autopilot);
    }
}

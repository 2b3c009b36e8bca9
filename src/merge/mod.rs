//! The merge orchestrator (spec.md §4.6): an explicit state machine,
//! `VALIDATE → CONFIRM → RUN → CLEANUP/RESOLVE_* → DONE`, expressed as a
//! chain of `ActionResult` continuations.
//!
//! Grounded directly on `workflow::merge::merge` and `workflow::cleanup` in
//! the workmux lineage, restructured from a single synchronous function
//! returning `Result` into the explicit states spec.md draws, with each arm
//! returning an `ActionResult` instead of printing to stdout or blocking on
//! an editor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::action::dispatch::ActionContext;
use crate::action::{ActionResult, ChoiceOption, Continuation, InputContinuation};
use crate::agent::{self, CliHarness};
use crate::cmd::Cmd;
use crate::git;
use crate::multiplexer::TmuxService;
use crate::pane::Pane;
use crate::state::StateStore;

/// VALIDATE: check the worktree actually exists and has something to merge,
/// then hand off to CONFIRM. `next` is `Some` when this merge is one step in
/// a queued batch (see `merge_all`) and should chain into the next pane on
/// success rather than stopping at a plain `success` result.
pub fn start(ctx: &ActionContext, pane: &Pane) -> ActionResult {
    start_queued(ctx, pane, None)
}

fn start_queued(ctx: &ActionContext, pane: &Pane, next: Option<Continuation>) -> ActionResult {
    let Some(worktree_path) = pane.worktree_path.clone() else {
        return ActionResult::error("This pane has no worktree to merge");
    };
    if !worktree_path.exists() {
        return ActionResult::error(format!("Worktree path {} no longer exists", worktree_path.display()));
    }

    let base_branch = match ctx.store.get_settings() {
        Ok(settings) => settings.base_branch().unwrap_or("main").to_string(),
        Err(_) => "main".to_string(),
    };

    let repo_root = match git::repo_root(&pane.project_root) {
        Ok(r) => r,
        Err(e) => return ActionResult::error(format!("Could not resolve repository root: {e}")),
    };

    // VALIDATE: main_dirty takes priority — merging into a dirty main branch
    // would clobber whatever's sitting there uncommitted.
    match git::has_uncommitted_changes(&repo_root) {
        Ok(true) => return resolve_main(&ctx.tmux, &ctx.store, pane.clone(), repo_root, next),
        Ok(false) => {}
        Err(e) => return ActionResult::error(format!("Failed to check the main branch's status: {e}")),
    }

    // VALIDATE: nothing_to_merge — no commits ahead of base and nothing
    // uncommitted in the worktree either.
    if let Ok(branch) = git::current_branch(&worktree_path) {
        let ahead = git::commits_ahead(&repo_root, &base_branch, &branch).unwrap_or(1);
        let worktree_dirty = git::has_uncommitted_changes(&worktree_path).unwrap_or(true);
        if ahead == 0 && !worktree_dirty {
            return ActionResult::info(format!(
                "{} has no commits ahead of {base_branch} and nothing uncommitted — nothing to merge",
                pane.slug
            ));
        }
    }

    confirm(ctx, pane.clone(), worktree_path, base_branch, next)
}

/// RESOLVE_MAIN: the target repo itself has uncommitted changes. Offers the
/// same menu spec.md §8 scenario 2 names, then re-enters VALIDATE.
fn resolve_main(tmux: &Arc<TmuxService>, store: &Arc<StateStore>, pane: Pane, repo_root: PathBuf, next: Option<Continuation>) -> ActionResult {
    let diff = git::diff_summary(&repo_root, false).unwrap_or_default();
    let tmux = Arc::clone(tmux);
    let store = Arc::clone(store);

    ActionResult::Choice {
        message: "Continuing would merge on top of uncommitted changes on the main branch.".into(),
        title: Some("Main Branch Has Uncommitted Changes".into()),
        options: vec![
            ChoiceOption { id: "commit_automatic".into(), label: "Commit automatically (AI)".into(), description: None, danger: false, default: true },
            ChoiceOption { id: "commit_editable".into(), label: "Commit with an editable AI message".into(), description: None, danger: false, default: false },
            ChoiceOption { id: "manual_message".into(), label: "Write a commit message".into(), description: None, danger: false, default: false },
            ChoiceOption { id: "stash".into(), label: "Stash the changes".into(), description: None, danger: false, default: false },
            ChoiceOption { id: "cancel".into(), label: "Cancel".into(), description: None, danger: true, default: false },
        ],
        on_select: Box::new(move |choice| {
            let ctx = ActionContext { tmux: Arc::clone(&tmux), store: Arc::clone(&store), control_pane_id: None };
            match choice {
                "commit_automatic" => match suggest_commit_message(pane.agent.as_deref(), &diff) {
                    Some(message) => match stage_and_commit(&repo_root, &message) {
                        Ok(()) => start_queued(&ctx, &pane, next),
                        Err(e) => ActionResult::error(format!("Commit failed: {e}")),
                    },
                    None => manual_commit_input(ctx, pane, repo_root, diff.clone(), next),
                },
                "commit_editable" => {
                    let suggestion = suggest_commit_message(pane.agent.as_deref(), &diff).unwrap_or_else(|| diff.clone());
                    manual_commit_input(ctx, pane, repo_root, suggestion, next)
                }
                "manual_message" => manual_commit_input(ctx, pane, repo_root, diff.clone(), next),
                "stash" => match git::stash(&repo_root, "dmux: stash before merge") {
                    Ok(()) => start_queued(&ctx, &pane, next),
                    Err(e) => ActionResult::error(format!("git stash failed: {e}")),
                },
                _ => ActionResult::info("Merge cancelled"),
            }
        }),
    }
}

fn suggest_commit_message(agent_name: Option<&str>, diff: &str) -> Option<String> {
    agent_name.and_then(|name| {
        let profile = agent::profile::resolve(name);
        let harness = CliHarness::new(profile.launch_command.clone());
        agent::generate_commit_message(&harness, diff)
    })
}

fn manual_commit_input(ctx: ActionContext, pane: Pane, repo_root: PathBuf, default_value: String, next: Option<Continuation>) -> ActionResult {
    ActionResult::Input {
        message: "The main branch has uncommitted changes; describe this commit".into(),
        title: Some("Commit message".into()),
        placeholder: Some("Describe the change".into()),
        default_value: Some(default_value),
        on_submit: Box::new(move |message| match stage_and_commit(&repo_root, message) {
            Ok(()) => start_queued(&ctx, &pane, next),
            Err(e) => ActionResult::error(format!("Commit failed: {e}")),
        }),
    }
}

/// CONFIRM: ask the user before mutating the main worktree.
fn confirm(ctx: &ActionContext, pane: Pane, worktree_path: PathBuf, base_branch: String, next: Option<Continuation>) -> ActionResult {
    let tmux = Arc::clone(&ctx.tmux);
    let store = Arc::clone(&ctx.store);

    ActionResult::Confirm {
        message: format!("Merge {} into {base_branch}?", pane.slug),
        title: Some("Merge".into()),
        confirm_label: "Merge".into(),
        cancel_label: "Cancel".into(),
        on_confirm: Box::new(move || run(&tmux, &store, pane, worktree_path, base_branch, next)),
        on_cancel: Box::new(|| ActionResult::info("Merge cancelled")),
    }
}

/// RUN: if the worktree has uncommitted changes, route through the
/// commit-message handler first; otherwise merge directly.
fn run(tmux: &Arc<TmuxService>, store: &Arc<StateStore>, pane: Pane, worktree_path: PathBuf, base_branch: String, next: Option<Continuation>) -> ActionResult {
    match git::has_uncommitted_changes(&worktree_path) {
        Ok(true) => {
            let tmux = Arc::clone(tmux);
            let store = Arc::clone(store);
            commit_message_step(
                &worktree_path,
                pane.agent.as_deref(),
                Box::new(move |message| {
                    if let Err(e) = stage_and_commit(&worktree_path, message) {
                        return ActionResult::error(format!("Commit failed: {e}"));
                    }
                    perform_merge(&tmux, &store, pane, worktree_path, base_branch, next)
                }),
            )
        }
        Ok(false) => perform_merge(tmux, store, pane, worktree_path, base_branch, next),
        Err(e) => ActionResult::error(format!("Failed to check worktree status: {e}")),
    }
}

fn stage_and_commit(worktree_path: &Path, message: &str) -> anyhow::Result<()> {
    git::add_all(worktree_path)?;
    git::commit(worktree_path, message)
}

/// Shared commit-message step (spec.md §4.6): stage, diff-summarize, ask the
/// agent harness for a message with a bounded deadline, falling back to an
/// `input` dialog pre-filled with the diff summary. Used by both the merge
/// flow and the manager's `delete_everything` close path.
pub fn commit_message_step(worktree_path: &Path, agent_name: Option<&str>, on_commit: InputContinuation) -> ActionResult {
    let diff = git::diff_summary(worktree_path, false).unwrap_or_default();

    let suggestion = agent_name.and_then(|name| {
        let profile = agent::profile::resolve(name);
        let harness = CliHarness::new(profile.launch_command.clone());
        agent::generate_commit_message(&harness, &diff)
    });

    if let Some(message) = suggestion {
        return on_commit(&message);
    }

    ActionResult::Input {
        message: "Uncommitted changes need a commit message before merging".into(),
        title: Some("Commit message".into()),
        placeholder: Some("Describe the change".into()),
        default_value: Some(diff),
        on_submit: on_commit,
    }
}

fn perform_merge(
    tmux: &Arc<TmuxService>,
    store: &Arc<StateStore>,
    pane: Pane,
    worktree_path: PathBuf,
    base_branch: String,
    next: Option<Continuation>,
) -> ActionResult {
    let Some(branch) = git::current_branch(&worktree_path).ok() else {
        return ActionResult::error("Could not determine the worktree's branch");
    };

    let repo_root = match git::repo_root(&pane.project_root) {
        Ok(r) => r,
        Err(e) => return ActionResult::error(format!("Could not resolve repository root: {e}")),
    };

    match git::merge(&repo_root, &branch, true) {
        Ok(()) => {
            info!(pane_id = %pane.id, branch, "merge:succeeded");
            cleanup(tmux, store, &pane, &worktree_path, &branch, next)
        }
        Err(e) => {
            warn!(pane_id = %pane.id, branch, error = %e, "merge:conflict, routing to resolution");
            // A conflict pauses the queue: the remaining panes wait for a
            // human (or the attached agent) to finish resolving this one.
            resolve_conflict(tmux, store, pane, repo_root, branch, base_branch)
        }
    }
}

/// CLEANUP: the happy path. Removes the worktree; branch deletion is left
/// to the user via a follow-up CLOSE action rather than done silently here.
/// When `next` is set (queued batch), success routes into a continue/abort
/// choice instead of a plain terminal `success`.
fn cleanup(
    tmux: &Arc<TmuxService>,
    store: &Arc<StateStore>,
    pane: &Pane,
    worktree_path: &Path,
    branch: &str,
    next: Option<Continuation>,
) -> ActionResult {
    if let Ok(repo_root) = git::repo_root(&pane.project_root)
        && let Err(e) = git::worktree_remove_force(&repo_root, worktree_path)
    {
        warn!(pane_id = %pane.id, error = %e, "merge:cleanup failed to remove worktree");
    }

    if pane.is_live() {
        tmux.kill_pane_non_blocking(&pane.terminal_pane_id);
    }

    let remaining: Vec<_> = store.list_panes().into_iter().filter(|p| p.id != pane.id).collect();
    if let Err(e) = store.apply_panes(remaining) {
        warn!(pane_id = %pane.id, error = %e, "merge:failed to persist cleanup");
    }

    let message = format!("Merged {branch} and cleaned up the worktree");
    match next {
        None => ActionResult::success(message),
        Some(next) => ActionResult::Choice {
            message: format!("{message}. Continue to the next pane?"),
            title: Some("Merge queue".into()),
            options: vec![
                ChoiceOption { id: "continue".into(), label: "Continue".into(), description: None, danger: false, default: true },
                ChoiceOption { id: "abort_all".into(), label: "Stop here".into(), description: None, danger: true, default: false },
            ],
            on_select: Box::new(move |choice| {
                if choice == "continue" {
                    next()
                } else {
                    ActionResult::info("Remaining merges in the queue were left untouched")
                }
            }),
        },
    }
}

/// RESOLVE_CONFLICT: create a dedicated pane in the target repo, abort any
/// leftover merge state, re-attempt inside the pane with an agent attached,
/// and hand back a navigation result so the UI focuses it.
fn resolve_conflict(
    tmux: &Arc<TmuxService>,
    store: &Arc<StateStore>,
    pane: Pane,
    repo_root: PathBuf,
    branch: String,
    base_branch: String,
) -> ActionResult {
    let _ = git::merge_abort(&repo_root);

    let conflict_pane_id = store.next_pane_id();
    let split = tmux.split(&pane.terminal_pane_id, crate::multiplexer::SplitDirection::Horizontal, &repo_root, Some(50));
    let terminal_pane_id = match split {
        Ok(id) => id,
        Err(e) => return ActionResult::error(format!("Could not open a conflict-resolution pane: {e}")),
    };

    let prompt = format!(
        "Resolve the merge conflicts from merging `{branch}` into `{base_branch}`. \
         Run `git merge {branch} --no-edit`, fix any conflicts, `git add` the \
         resolved files, and commit. Do not push."
    );
    if let Err(e) = tmux.paste_prompt(&terminal_pane_id, &prompt) {
        warn!(error = %e, "merge:failed to inject conflict-resolution prompt");
    }

    let mut conflict_pane = pane.clone();
    conflict_pane.id = conflict_pane_id.clone();
    conflict_pane.kind = crate::pane::PaneKind::ConflictResolution;
    conflict_pane.terminal_pane_id = terminal_pane_id;
    conflict_pane.slug = format!("{}-resolve", pane.slug);
    conflict_pane.agent_status = crate::pane::AgentStatus::Working;

    let mut snapshot = store.list_panes();
    snapshot.push(conflict_pane);
    if let Err(e) = store.apply_panes(snapshot) {
        warn!(error = %e, "merge:failed to register conflict-resolution pane");
    }

    ActionResult::Navigation { target_pane_id: conflict_pane_id }
}

/// Queue multiple panes for merge, deepest-worktree-first so nested
/// worktrees (rare, but possible under custom branch layouts) merge before
/// their parents. Each pane's own VALIDATE→CONFIRM→RUN→CLEANUP chain runs
/// to completion before the next one starts; a conflict pauses the queue at
/// `RESOLVE_CONFLICT` until a human clears it by re-running this action.
pub fn merge_all(ctx: &ActionContext, mut panes: Vec<Pane>) -> ActionResult {
    panes.sort_by_key(|p| std::cmp::Reverse(p.worktree_path.as_ref().map(path_depth).unwrap_or(0)));

    let Some(first) = panes.first().cloned() else {
        return ActionResult::info("No panes to merge");
    };
    merge_queue_step(ctx, first, panes[1..].to_vec())
}

fn merge_queue_step(ctx: &ActionContext, pane: Pane, rest: Vec<Pane>) -> ActionResult {
    let next: Option<Continuation> = if rest.is_empty() {
        None
    } else {
        let ctx_tmux = Arc::clone(&ctx.tmux);
        let ctx_store = Arc::clone(&ctx.store);
        Some(Box::new(move || {
            let ctx = ActionContext { tmux: ctx_tmux, store: ctx_store, control_pane_id: None };
            let next_pane = rest[0].clone();
            merge_queue_step(&ctx, next_pane, rest[1..].to_vec())
        }))
    };
    start_queued(ctx, &pane, next)
}

fn path_depth(path: &PathBuf) -> usize {
    path.components().count()
}

/// OPEN_PR: generate a description via the agent harness, then shell out to
/// the `gh` CLI — not part of the workmux lineage's stack, but the natural
/// external tool for this, invoked the same way git itself is (`Cmd`).
pub fn open_pr(_ctx: &ActionContext, pane: &Pane) -> ActionResult {
    let Some(worktree_path) = pane.worktree_path.as_deref() else {
        return ActionResult::error("This pane has no worktree");
    };

    let diff = git::diff_summary(worktree_path, false).unwrap_or_default();
    let description = pane
        .agent
        .as_deref()
        .and_then(|name| {
            let profile = agent::profile::resolve(name);
            let harness = CliHarness::new(profile.launch_command.clone());
            agent::generate_commit_message(&harness, &diff)
        })
        .unwrap_or_else(|| format!("Changes from {}", pane.slug));

    let result = Cmd::new("gh")
        .args(&["pr", "create", "--fill", "--body", description.as_str()])
        .workdir(worktree_path)
        .run();

    match result {
        Ok(_) => ActionResult::success("Pull request created"),
        Err(e) => ActionResult::error(format!("gh pr create failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_depth_orders_nested_paths_first() {
        let shallow = PathBuf::from("/proj/.dmux/worktrees/a");
        let deep = PathBuf::from("/proj/.dmux/worktrees/a/nested/b");
        assert!(path_depth(&deep) > path_depth(&shallow));
    }
}

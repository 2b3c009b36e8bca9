//! Thin wrapper around the git plumbing operations spec.md §6 lists.
//!
//! Git itself is an out-of-scope external collaborator; this module is the
//! narrow adapter the rest of the crate calls through, grounded on
//! `vcs::git` in the workmux lineage (same shell-out-and-parse style via
//! `Cmd`), trimmed to exactly the operation list spec.md names (no jj
//! support — the lineage's multi-VCS abstraction doesn't apply here).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::cmd::Cmd;

pub fn is_git_repo(dir: &Path) -> Result<bool> {
    Cmd::new("git")
        .args(&["rev-parse", "--is-inside-work-tree"])
        .workdir(dir)
        .run_as_check()
}

pub fn repo_root(dir: &Path) -> Result<PathBuf> {
    let out = Cmd::new("git")
        .args(&["rev-parse", "--show-toplevel"])
        .workdir(dir)
        .run_and_capture_stdout()
        .context("failed to resolve repository root")?;
    Ok(PathBuf::from(out))
}

pub fn git_common_dir(dir: &Path) -> Result<PathBuf> {
    let out = Cmd::new("git")
        .args(&["rev-parse", "--git-common-dir"])
        .workdir(dir)
        .run_and_capture_stdout()?;
    let path = PathBuf::from(out);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(dir.join(path))
    }
}

pub fn current_branch(dir: &Path) -> Result<String> {
    Cmd::new("git")
        .args(&["branch", "--show-current"])
        .workdir(dir)
        .run_and_capture_stdout()
}

pub fn worktree_add(
    repo_root: &Path,
    worktree_path: &Path,
    branch: &str,
    base: Option<&str>,
) -> Result<()> {
    let path_str = worktree_path
        .to_str()
        .ok_or_else(|| anyhow!("worktree path is not valid UTF-8"))?;
    let mut args = vec!["worktree", "add", path_str, "-b", branch];
    if let Some(base) = base {
        args.push(base);
    }
    Cmd::new("git")
        .args(&args)
        .workdir(repo_root)
        .run()
        .with_context(|| format!("git worktree add failed for branch '{branch}'"))?;
    Ok(())
}

pub fn worktree_remove_force(repo_root: &Path, worktree_path: &Path) -> Result<()> {
    let path_str = worktree_path
        .to_str()
        .ok_or_else(|| anyhow!("worktree path is not valid UTF-8"))?;
    Cmd::new("git")
        .args(&["worktree", "remove", "--force", path_str])
        .workdir(repo_root)
        .run()
        .context("git worktree remove --force failed")?;
    Ok(())
}

pub fn branch_delete(repo_root: &Path, branch: &str) -> Result<()> {
    Cmd::new("git")
        .args(&["branch", "-d", branch])
        .workdir(repo_root)
        .run()
        .with_context(|| format!("failed to delete branch '{branch}'"))?;
    Ok(())
}

pub fn status_porcelain(dir: &Path) -> Result<String> {
    Cmd::new("git")
        .args(&["status", "--porcelain"])
        .workdir(dir)
        .run_and_capture_stdout()
}

pub fn has_uncommitted_changes(dir: &Path) -> Result<bool> {
    Ok(!status_porcelain(dir)?.trim().is_empty())
}

pub fn diff_summary(dir: &Path, staged: bool) -> Result<String> {
    let mut args = vec!["diff", "--stat"];
    if staged {
        args.insert(1, "--cached");
    }
    Cmd::new("git").args(&args).workdir(dir).run_and_capture_stdout()
}

pub fn add_all(dir: &Path) -> Result<()> {
    Cmd::new("git")
        .args(&["add", "-A"])
        .workdir(dir)
        .run()
        .context("git add -A failed")?;
    Ok(())
}

pub fn commit(dir: &Path, message: &str) -> Result<()> {
    Cmd::new("git")
        .args(&["commit", "-m", message])
        .workdir(dir)
        .run()
        .context("git commit failed")?;
    Ok(())
}

pub fn merge(dir: &Path, branch: &str, no_edit: bool) -> Result<()> {
    let mut args = vec!["merge", branch];
    if no_edit {
        args.push("--no-edit");
    }
    Cmd::new("git")
        .args(&args)
        .workdir(dir)
        .run()
        .with_context(|| format!("git merge {branch} failed"))?;
    Ok(())
}

pub fn merge_abort(dir: &Path) -> Result<()> {
    Cmd::new("git")
        .args(&["merge", "--abort"])
        .workdir(dir)
        .run()
        .context("git merge --abort failed")?;
    Ok(())
}

pub fn stash(dir: &Path, message: &str) -> Result<()> {
    Cmd::new("git")
        .args(&["stash", "push", "-m", message])
        .workdir(dir)
        .run()
        .context("git stash push failed")?;
    Ok(())
}

/// Count commits reachable from `branch` but not from `base` — used to tell
/// a pane with nothing to merge apart from one that's genuinely ahead.
pub fn commits_ahead(repo_root: &Path, base: &str, branch: &str) -> Result<usize> {
    let out = Cmd::new("git")
        .args(&["rev-list", "--count", &format!("{base}..{branch}")])
        .workdir(repo_root)
        .run_and_capture_stdout()
        .with_context(|| format!("failed to count commits ahead of '{base}' on '{branch}'"))?;
    out.trim().parse::<usize>().context("unexpected output from git rev-list --count")
}

/// List worktrees as `(path, branch)` pairs by parsing `git worktree list --porcelain`.
pub fn list_worktrees(repo_root: &Path) -> Result<Vec<(PathBuf, String)>> {
    let out = Cmd::new("git")
        .args(&["worktree", "list", "--porcelain"])
        .workdir(repo_root)
        .run_and_capture_stdout()?;

    let mut result = Vec::new();
    let mut current_path: Option<PathBuf> = None;
    for line in out.lines() {
        if let Some(p) = line.strip_prefix("worktree ") {
            current_path = Some(PathBuf::from(p));
        } else if let Some(b) = line.strip_prefix("branch refs/heads/")
            && let Some(path) = current_path.take()
        {
            result.push((path, b.to_string()));
        }
    }
    Ok(result)
}

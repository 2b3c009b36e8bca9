//! Thin process-execution builder shared by the git and tmux layers.
//!
//! This is the same shape as every shell-out helper in the workmux lineage:
//! build up a command, run it, and turn a non-zero exit into a descriptive
//! `anyhow::Error`. Retry and deadline behavior live one layer up, in
//! [`crate::multiplexer::TmuxService`], because only the tmux layer needs
//! them (git operations in this crate are all either idempotent reads or
//! one-shot mutations the caller decides how to retry).

use std::path::Path;
use std::process::{Command, Output};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, trace};

pub struct Cmd<'a> {
    command: &'a str,
    args: Vec<&'a str>,
    workdir: Option<&'a Path>,
    deadline: Option<Duration>,
}

impl<'a> Cmd<'a> {
    pub fn new(command: &'a str) -> Self {
        Self {
            command,
            args: Vec::new(),
            workdir: None,
            deadline: None,
        }
    }

    pub fn arg(mut self, arg: &'a str) -> Self {
        self.args.push(arg);
        self
    }

    pub fn args(mut self, args: &[&'a str]) -> Self {
        self.args.extend_from_slice(args);
        self
    }

    pub fn workdir(mut self, path: &'a Path) -> Self {
        self.workdir = Some(path);
        self
    }

    /// Bound the command's wall-clock time. On overrun the child is killed
    /// and the call fails with a timeout error rather than hanging forever.
    pub fn deadline(mut self, d: Duration) -> Self {
        self.deadline = Some(d);
        self
    }

    pub fn run(self) -> Result<Output> {
        let Cmd {
            command,
            args,
            workdir,
            deadline,
        } = self;
        let workdir_display = workdir.map(|p| p.display().to_string());
        trace!(command, args = ?args, workdir = ?workdir_display, "cmd:run start");

        let mut cmd = Command::new(command);
        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }

        let output = if let Some(d) = deadline {
            run_with_deadline(cmd.args(&args), d)?
        } else {
            cmd.args(&args).output().with_context(|| {
                format!("failed to execute command: {} {}", command, args.join(" "))
            })?
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(
                command,
                args = ?args,
                status = ?output.status.code(),
                stderr = %stderr.trim(),
                "cmd:run failure"
            );
            return Err(anyhow!(
                "command failed: {} {}\n{}",
                command,
                args.join(" "),
                stderr.trim()
            ));
        }
        trace!(command, "cmd:run success");
        Ok(output)
    }

    pub fn run_and_capture_stdout(self) -> Result<String> {
        let output = self.run()?;
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }

    pub fn run_as_check(self) -> Result<bool> {
        let Cmd {
            command,
            args,
            workdir,
            deadline,
        } = self;
        trace!(command, args = ?args, "cmd:check start");
        let mut cmd = Command::new(command);
        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }
        let output = if let Some(d) = deadline {
            run_with_deadline(cmd.args(&args), d)?
        } else {
            cmd.args(&args).output().with_context(|| {
                format!("failed to execute command: {} {}", command, args.join(" "))
            })?
        };
        Ok(output.status.success())
    }
}

/// Run a child process, killing it if it outlives `deadline`.
///
/// `std::process::Command` has no built-in timeout, so this polls
/// `try_wait` on a spawned child at a short interval. Good enough for the
/// sub-second to low-second deadlines the tmux service uses; not meant for
/// long-running children.
fn run_with_deadline(cmd: &mut Command, deadline: Duration) -> Result<Output> {
    use std::process::Stdio;

    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("failed to spawn command")?;

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            let mut out = child.wait_with_output()?;
            out.status = status;
            return Ok(out);
        }
        if start.elapsed() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("command timed out after {:?}", deadline));
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Run a shell command with extra environment variables set (used for
/// pane-created/worktree-created user hooks and pre-merge hooks).
pub fn shell_command_with_env(command: &str, workdir: &Path, env_vars: &[(&str, &str)]) -> Result<()> {
    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(command).current_dir(workdir);
    for (key, value) in env_vars {
        cmd.env(key, value);
    }
    let status = cmd
        .status()
        .with_context(|| format!("failed to execute shell command: {}", command))?;
    if !status.success() {
        return Err(anyhow!(
            "shell command failed with exit code {}: {}",
            status.code().unwrap_or(-1),
            command
        ));
    }
    Ok(())
}

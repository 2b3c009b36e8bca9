//! Agent harness: invokes an already-installed agent CLI and reads its
//! response. Used for launching sessions, slug generation, commit-message
//! generation, PR descriptions, and the LLM analyzer (spec.md §4.9, §6).
//!
//! Grounded on `agent_setup::{claude, opencode}`'s detection pattern in the
//! workmux lineage, generalized from "detect and install status hooks" into
//! "invoke and capture stdout", since this crate treats the agent CLI as a
//! pluggable subprocess rather than a fixed `claude` binary.

pub mod profile;

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};

pub use profile::AgentProfile;

/// A pluggable harness for invoking an agent CLI in "one-shot" mode: feed it
/// a prompt, read back its textual response. Distinct from launching the
/// agent interactively inside a pane (that's the multiplexer's job via
/// `paste_prompt`).
pub trait AgentHarness: Send + Sync {
    fn run(&self, prompt: &str, deadline: Duration) -> Result<Option<String>>;
}

/// Default harness: runs `<command> --print` (or equivalent) with the
/// prompt on stdin, matching the "prompt on stdin or as an argument" wire
/// shape from spec.md §6.
pub struct CliHarness {
    pub command: String,
    pub extra_args: Vec<String>,
}

impl CliHarness {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            extra_args: Vec::new(),
        }
    }
}

impl AgentHarness for CliHarness {
    fn run(&self, prompt: &str, deadline: Duration) -> Result<Option<String>> {
        let mut child = Command::new(&self.command)
            .args(&self.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn agent harness '{}'", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(prompt.as_bytes());
        }

        let start = std::time::Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                let output = child.wait_with_output()?;
                if !status.success() {
                    return Ok(None);
                }
                let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
                return Ok(if text.is_empty() { None } else { Some(text) });
            }
            if start.elapsed() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(25));
        }
    }
}

/// Generate a filesystem/branch-safe slug from a prompt via the harness,
/// falling back to a timestamp-based name on any failure (spec.md §4.3 step 2).
pub fn generate_slug(harness: &dyn AgentHarness, prompt: &str) -> String {
    let ask = format!(
        "Generate a short (2-4 word) kebab-case slug suitable for a git branch name, \
         summarizing this task. Reply with only the slug.\n\nTask: {prompt}"
    );
    match harness.run(&ask, Duration::from_secs(8)) {
        Ok(Some(text)) => {
            let slug = sanitize_slug(&text);
            if slug.is_empty() { fallback_slug() } else { slug }
        }
        _ => fallback_slug(),
    }
}

fn fallback_slug() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("dmux-{now}")
}

fn sanitize_slug(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    let mut out = String::new();
    let mut last_dash = false;
    for ch in lower.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash && !out.is_empty() {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out.chars().take(40).collect()
}

/// Generate a conventional-commit message from a diff summary, with a
/// bounded deadline per spec.md §4.6.
pub fn generate_commit_message(harness: &dyn AgentHarness, diff_summary: &str) -> Option<String> {
    let ask = format!(
        "Write a single-line conventional-commit message for this diff. \
         Reply with only the commit message.\n\n{diff_summary}"
    );
    harness.run(&ask, Duration::from_secs(15)).ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_whitespace_and_case() {
        assert_eq!(sanitize_slug("Fix Login   Bug!!"), "fix-login-bug");
    }

    #[test]
    fn sanitize_trims_trailing_dashes() {
        assert_eq!(sanitize_slug("fix---"), "fix");
    }

    #[test]
    fn fallback_slug_has_prefix() {
        assert!(fallback_slug().starts_with("dmux-"));
    }
}

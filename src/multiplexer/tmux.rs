//! The tmux service: the only component in this crate that issues commands
//! to the host multiplexer (spec.md §4.2).
//!
//! Grounded on `multiplexer::tmux::TmuxBackend`'s `tmux_cmd`/`tmux_query`
//! pair in the workmux lineage, generalized with the retry-class policy
//! spec.md §4.2 describes (the lineage's `Cmd` has no retry logic at all —
//! this is the clearest instance of spec.md §9's "may consolidate" type of
//! redesign).

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

use crate::cmd::Cmd;
use crate::error::{TmuxError, classify_tmux_failure};

use super::types::{Dimensions, PaneInfo, RetryClass, SplitDirection};

fn parse_pane_list(out: &str) -> Vec<PaneInfo> {
    let mut panes = Vec::new();
    for line in out.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 5 {
            continue;
        }
        panes.push(PaneInfo {
            pane_id: fields[0].to_string(),
            title: fields[1].to_string(),
            active: fields[2] == "1",
            width: fields[3].parse().unwrap_or(0),
            height: fields[4].parse().unwrap_or(0),
        });
    }
    panes
}

#[derive(Debug, Default, Clone)]
pub struct TmuxService;

impl TmuxService {
    pub fn new() -> Self {
        Self
    }

    /// Run a tmux command under a retry class, returning stdout.
    fn run(&self, class: RetryClass, args: &[&str]) -> Result<String> {
        let budget_deadline = Instant::now() + class.total_budget();
        let mut attempt = 0u32;
        loop {
            let result = Cmd::new("tmux").args(args).run();
            match result {
                Ok(output) => {
                    return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
                }
                Err(e) => {
                    let stderr = e.to_string();
                    let classified = classify_tmux_failure(&stderr);
                    match classified {
                        TmuxError::Permanent(_) => {
                            debug!(?args, "tmux:permanent failure, not retrying");
                            return Err(e);
                        }
                        _ => {
                            if attempt >= class.max_retries() || Instant::now() >= budget_deadline {
                                warn!(?args, attempt, "tmux:retry budget exhausted");
                                return Err(e);
                            }
                            attempt += 1;
                            debug!(?args, attempt, "tmux:retrying transient failure");
                            thread::sleep(Duration::from_millis(20 * attempt as u64));
                        }
                    }
                }
            }
        }
    }

    // === Server ===

    pub fn is_running(&self) -> Result<bool> {
        Cmd::new("tmux").args(&["has-session"]).run_as_check()
    }

    // === Pane management ===

    pub fn split(
        &self,
        target_pane_id: &str,
        direction: SplitDirection,
        cwd: &Path,
        percentage: Option<u8>,
    ) -> Result<String> {
        let split_arg = match direction {
            SplitDirection::Horizontal => "-h",
            SplitDirection::Vertical => "-v",
        };
        let cwd_str = cwd
            .to_str()
            .ok_or_else(|| anyhow!("working directory is not valid UTF-8"))?;
        let pct_str;
        let mut args = vec!["split-window", split_arg, "-t", target_pane_id, "-c", cwd_str, "-P", "-F", "#{pane_id}"];
        if let Some(p) = percentage {
            pct_str = format!("{p}%");
            args.push("-l");
            args.push(&pct_str);
        }
        self.run(RetryClass::Fast, &args)
    }

    pub fn split_blocking(
        &self,
        target_pane_id: &str,
        direction: SplitDirection,
        cwd: &Path,
        percentage: Option<u8>,
    ) -> Result<String> {
        self.split(target_pane_id, direction, cwd, percentage)
    }

    pub fn kill_pane(&self, pane_id: &str) -> Result<()> {
        self.run(RetryClass::None, &["kill-pane", "-t", pane_id])?;
        Ok(())
    }

    pub fn kill_pane_non_blocking(&self, pane_id: &str) {
        let pane_id = pane_id.to_string();
        let svc = self.clone();
        thread::spawn(move || {
            if let Err(e) = svc.kill_pane(&pane_id) {
                warn!(error = %e, pane_id, "tmux:kill-pane failed in background");
            }
        });
    }

    pub fn select_layout(&self, window: &str, layout: &str) -> Result<()> {
        self.run(RetryClass::Fast, &["select-layout", "-t", window, layout])?;
        Ok(())
    }

    pub fn select_layout_builtin(&self, window: &str, name: &str) -> Result<()> {
        self.run(RetryClass::Fast, &["select-layout", "-t", window, name])?;
        Ok(())
    }

    pub fn resize_pane(&self, pane_id: &str, width: Option<u16>, height: Option<u16>) -> Result<()> {
        if let Some(w) = width {
            self.run(RetryClass::Fast, &["resize-pane", "-t", pane_id, "-x", &w.to_string()])?;
        }
        if let Some(h) = height {
            self.run(RetryClass::Fast, &["resize-pane", "-t", pane_id, "-y", &h.to_string()])?;
        }
        Ok(())
    }

    pub fn send_keys(&self, pane_id: &str, keys: &str) -> Result<()> {
        self.run(RetryClass::Fast, &["send-keys", "-t", pane_id, keys, "Enter"])?;
        Ok(())
    }

    pub fn send_key(&self, pane_id: &str, key: &str) -> Result<()> {
        self.run(RetryClass::Fast, &["send-keys", "-t", pane_id, key])?;
        Ok(())
    }

    pub fn capture_pane(&self, pane_id: &str, lines: u16) -> Result<String> {
        let start = format!("-{lines}");
        self.run(
            RetryClass::Idempotent,
            &["capture-pane", "-t", pane_id, "-p", "-S", &start],
        )
    }

    pub fn capture_cursor(&self, pane_id: &str) -> Result<(u16, u16)> {
        let out = self.run(
            RetryClass::Idempotent,
            &["display-message", "-p", "-t", pane_id, "#{cursor_x},#{cursor_y}"],
        )?;
        let mut parts = out.split(',');
        let x = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let y = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        Ok((x, y))
    }

    pub fn list_panes(&self, window: &str) -> Result<Vec<PaneInfo>> {
        let out = self.run(
            RetryClass::Idempotent,
            &[
                "list-panes",
                "-t",
                window,
                "-F",
                "#{pane_id}\t#{pane_title}\t#{pane_active}\t#{pane_width}\t#{pane_height}",
            ],
        )?;
        Ok(parse_pane_list(&out))
    }

    /// Server-wide pane listing (`-a`), used by orphan reconciliation to
    /// check liveness of panes that may live in any window.
    pub fn list_all_panes(&self) -> Result<Vec<PaneInfo>> {
        let out = self.run(
            RetryClass::Idempotent,
            &[
                "list-panes",
                "-a",
                "-F",
                "#{pane_id}\t#{pane_title}\t#{pane_active}\t#{pane_width}\t#{pane_height}",
            ],
        )?;
        Ok(parse_pane_list(&out))
    }

    pub fn pane_dimensions(&self, pane_id: &str) -> Result<Dimensions> {
        let out = self.run(
            RetryClass::Idempotent,
            &["display-message", "-p", "-t", pane_id, "#{pane_width},#{pane_height}"],
        )?;
        let mut parts = out.split(',');
        let width = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let height = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        Ok(Dimensions { width, height })
    }

    pub fn window_dimensions(&self, window: &str) -> Result<Dimensions> {
        let out = self.run(
            RetryClass::Idempotent,
            &["display-message", "-p", "-t", window, "#{window_width},#{window_height}"],
        )?;
        let mut parts = out.split(',');
        let width = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let height = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        Ok(Dimensions { width, height })
    }

    pub fn window_id_for_pane(&self, pane_id: &str) -> Result<String> {
        self.run(RetryClass::Idempotent, &["display-message", "-p", "-t", pane_id, "#{window_id}"])
    }

    pub fn set_option(&self, pane_id: &str, option: &str, value: &str) -> Result<()> {
        self.run(RetryClass::Fast, &["set-option", "-t", pane_id, option, value])?;
        Ok(())
    }

    pub fn set_window_option(&self, window: &str, option: &str, value: &str) -> Result<()> {
        self.run(RetryClass::Fast, &["set-window-option", "-t", window, option, value])?;
        Ok(())
    }

    pub fn set_buffer(&self, content: &str) -> Result<String> {
        // tmux load-buffer reads from stdin via `-`; we use a temp file for
        // reliability across very large payloads.
        let tmp = tempfile::NamedTempFile::new().context("failed to create temp buffer file")?;
        std::fs::write(tmp.path(), content).context("failed to write buffer contents")?;
        let path_str = tmp
            .path()
            .to_str()
            .ok_or_else(|| anyhow!("temp buffer path is not valid UTF-8"))?;
        let buffer_name = format!("dmux-{}", uuid::Uuid::new_v4());
        self.run(RetryClass::Fast, &["load-buffer", "-b", &buffer_name, path_str])?;
        Ok(buffer_name)
    }

    pub fn paste_buffer(&self, pane_id: &str, buffer_name: &str) -> Result<()> {
        self.run(RetryClass::Fast, &["paste-buffer", "-b", buffer_name, "-t", pane_id])?;
        Ok(())
    }

    pub fn delete_buffer(&self, buffer_name: &str) -> Result<()> {
        self.run(RetryClass::None, &["delete-buffer", "-b", buffer_name])?;
        Ok(())
    }

    /// Inject a prompt without relying on the shell's interpretation of the
    /// text (spec.md §4.3 step 8): set-buffer, paste-buffer, delete-buffer.
    pub fn paste_prompt(&self, pane_id: &str, prompt: &str) -> Result<()> {
        let buffer = self.set_buffer(prompt)?;
        let result = self.paste_buffer(pane_id, &buffer);
        let _ = self.delete_buffer(&buffer);
        result
    }

    pub fn refresh_client(&self) -> Result<()> {
        self.run(RetryClass::Fast, &["refresh-client"])?;
        Ok(())
    }

    pub fn display_message(&self, pane_id: &str, message: &str) -> Result<()> {
        self.run(RetryClass::Fast, &["display-message", "-t", pane_id, message])?;
        Ok(())
    }

    pub fn select_pane(&self, pane_id: &str) -> Result<()> {
        self.run(RetryClass::Fast, &["select-pane", "-t", pane_id])?;
        Ok(())
    }

    pub fn set_pane_title(&self, pane_id: &str, title: &str) -> Result<()> {
        self.run(RetryClass::Fast, &["select-pane", "-t", pane_id, "-T", title])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_class_budgets_are_monotone() {
        assert!(RetryClass::None.max_retries() < RetryClass::Fast.max_retries());
        assert!(RetryClass::Fast.max_retries() < RetryClass::Idempotent.max_retries());
        assert!(RetryClass::Fast.total_budget() < RetryClass::Idempotent.total_budget());
    }
}

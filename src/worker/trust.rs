//! Trust-prompt auto-acknowledger (spec.md §4.5.1): on agent launch, watch
//! for first-run consent dialogs and clear them once their content is
//! stable across two consecutive captures.
//!
//! Grounded on `multiplexer::handshake::PaneHandshake::wait`'s
//! wait-for-stable-marker idiom in the workmux lineage — that code waits
//! for a shell marker to settle before proceeding; this reuses the same
//! "stable across two reads" concept for a different marker catalog.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, info};

use crate::multiplexer::TmuxService;

const POLL_INTERVAL: Duration = Duration::from_millis(300);
const TRUST_WINDOW: Duration = Duration::from_secs(10);

struct TrustMarker {
    pattern: &'static str,
    keys: &'static str,
}

const MARKERS: &[TrustMarker] = &[
    TrustMarker { pattern: r"(?i)trust the files in this (folder|directory)", keys: "Enter" },
    TrustMarker { pattern: r"(?i)do you trust", keys: "y\nEnter" },
    TrustMarker { pattern: r"\[y/n\]", keys: "y\nEnter" },
    TrustMarker { pattern: r"(?i)yes,\s*proceed", keys: "Enter" },
    TrustMarker { pattern: r"(?i)enter to confirm", keys: "Enter" },
];

static COMPILED: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    MARKERS
        .iter()
        .map(|m| (Regex::new(m.pattern).expect("static trust pattern"), m.keys))
        .collect()
});

fn matching_keys(capture: &str) -> Option<&'static str> {
    COMPILED.iter().find(|(re, _)| re.is_match(capture)).map(|(_, keys)| *keys)
}

/// Pure decision step, exercised directly by tests: given the previous
/// capture (if any) and the current one, decide whether to submit keys.
/// Returns `Some(keys)` only when the current capture matches a known
/// marker *and* is identical to the previous capture (the stability rule).
fn decide(previous: Option<&str>, current: &str) -> Option<&'static str> {
    let keys = matching_keys(current)?;
    if previous == Some(current) { Some(keys) } else { None }
}

/// Blocking poll loop, run on a dedicated thread for up to `TRUST_WINDOW`
/// from pane launch. Sends the stable marker's keystrokes once, then
/// re-verifies the prompt cleared before returning. Never retried after the
/// window elapses or after the agent has produced unrelated output.
pub fn poll_for_trust_prompt(tmux: &TmuxService, pane_id: &str) {
    let deadline = Instant::now() + TRUST_WINDOW;
    let mut previous: Option<String> = None;

    while Instant::now() < deadline {
        std::thread::sleep(POLL_INTERVAL);
        let capture = match tmux.capture_pane(pane_id, 15) {
            Ok(c) => c,
            Err(e) => {
                debug!(pane_id, error = %e, "trust:capture failed, retrying");
                continue;
            }
        };

        if let Some(keys) = decide(previous.as_deref(), &capture) {
            info!(pane_id, "trust:submitting stable trust prompt acknowledgement");
            for line in keys.split('\n') {
                if line == "Enter" {
                    let _ = tmux.send_key(pane_id, "Enter");
                } else {
                    let _ = tmux.send_key(pane_id, line);
                }
            }
            // Re-verify: give the agent a moment, then confirm the prompt
            // text is gone. Either way this is a one-shot action.
            std::thread::sleep(POLL_INTERVAL);
            if let Ok(after) = tmux.capture_pane(pane_id, 15)
                && matching_keys(&after).is_none()
            {
                debug!(pane_id, "trust:prompt cleared");
            }
            return;
        }

        previous = Some(capture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unstable_capture_does_not_submit() {
        assert_eq!(decide(None, "Do you trust the files in this folder? [y/n]"), None);
    }

    #[test]
    fn stable_capture_submits_matching_keys() {
        let capture = "Do you trust the files in this folder? [y/n]";
        assert_eq!(decide(Some(capture), capture), Some("y\nEnter"));
    }

    #[test]
    fn non_matching_capture_never_submits() {
        assert_eq!(decide(Some("building..."), "building..."), None);
    }

    #[test]
    fn changed_capture_resets_stability() {
        assert_eq!(decide(Some("Enter to confirm"), "Enter to confirm\nmore output"), None);
    }
}

//! Typed errors for module boundaries that need to match on failure class.
//!
//! Everything above these boundaries (the CLI, the HTTP handlers, the action
//! dispatcher) deals in `anyhow::Result` like the rest of the codebase; these
//! types exist only where a caller needs to distinguish permanent from
//! transient failures (the tmux service) or persistence from in-memory
//! fallback (the state store).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("watcher error: {0}")]
    Watch(String),
}

/// Classification of a tmux command failure, used by [`crate::multiplexer::TmuxService`]
/// to decide whether a failed command is worth retrying.
#[derive(Debug, Error)]
pub enum TmuxError {
    /// The host reported a condition that retrying cannot fix (no such pane,
    /// no such session, command not found, permission denied, invalid
    /// argument). Never retried.
    #[error("permanent tmux error: {0}")]
    Permanent(String),

    /// Busy, timed out, or failed for a reason that may clear up on its own.
    #[error("transient tmux error: {0}")]
    Transient(String),

    /// The command was signalled after exceeding its deadline.
    #[error("tmux command timed out after {0:?}")]
    Timeout(std::time::Duration),
}

const PERMANENT_MARKERS: &[&str] = &[
    "can't find pane",
    "can't find window",
    "no such session",
    "no current session",
    "unknown command",
    "command not found",
    "permission denied",
    "invalid",
];

/// Classify raw stderr text from a failed tmux invocation.
pub fn classify_tmux_failure(stderr: &str) -> TmuxError {
    let lower = stderr.to_ascii_lowercase();
    if PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
        TmuxError::Permanent(stderr.trim().to_string())
    } else {
        TmuxError::Transient(stderr.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_such_pane_is_permanent() {
        assert!(matches!(
            classify_tmux_failure("can't find pane: %99"),
            TmuxError::Permanent(_)
        ));
    }

    #[test]
    fn busy_is_transient() {
        assert!(matches!(
            classify_tmux_failure("server busy, try again"),
            TmuxError::Transient(_)
        ));
    }

    #[test]
    fn permission_denied_is_permanent() {
        assert!(matches!(
            classify_tmux_failure("open terminal failed: permission denied"),
            TmuxError::Permanent(_)
        ));
    }
}

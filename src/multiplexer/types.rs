//! Shared value types for the tmux service and the layout engine.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitDirection {
    Horizontal,
    Vertical,
}

/// The three retry classes from spec.md §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Destructive operations: kill, delete. Never retried.
    None,
    /// UI mutations: split, resize, layout. ≤2 retries, ≤200ms total budget.
    Fast,
    /// Reads: list, capture, dimensions. ≤3 retries, ≤500ms total budget.
    Idempotent,
}

impl RetryClass {
    pub fn max_retries(self) -> u32 {
        match self {
            RetryClass::None => 0,
            RetryClass::Fast => 2,
            RetryClass::Idempotent => 3,
        }
    }

    pub fn total_budget(self) -> std::time::Duration {
        match self {
            RetryClass::None => std::time::Duration::ZERO,
            RetryClass::Fast => std::time::Duration::from_millis(200),
            RetryClass::Idempotent => std::time::Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Clone)]
pub struct PaneInfo {
    pub pane_id: String,
    pub title: String,
    pub active: bool,
    pub width: u16,
    pub height: u16,
}

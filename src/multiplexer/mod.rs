//! The tmux service layer (spec.md §4.2) and its shared value types.

pub mod tmux;
pub mod types;

pub use tmux::TmuxService;
pub use types::{Dimensions, PaneInfo, RetryClass, SplitDirection};

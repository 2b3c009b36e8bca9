//! The terminal streamer (spec.md §4.8): one `INIT` full-buffer snapshot per
//! subscriber, then periodic `PATCH`/`RESIZE`/`HEARTBEAT` frames built from
//! nothing but [`TmuxService::capture_pane`] and [`TmuxService::pane_dimensions`].
//!
//! The line-range diff itself has no lineage counterpart (the workmux
//! lineage has no video stream at all); it's a direct implementation of the
//! spec's "diff the previous and current captured buffer, emit only changed
//! regions" description, built as a `futures_util::stream::unfold` state
//! machine rather than pulling in a generator-macro crate for one stream.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::response::sse::Event;
use futures_util::stream::{self, Stream};
use serde_json::json;
use tracing::warn;

use crate::multiplexer::types::Dimensions;
use crate::multiplexer::TmuxService;
use crate::state::StateStore;

const TICK_INTERVAL: Duration = Duration::from_millis(400);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

struct StreamState {
    tmux: Arc<TmuxService>,
    store: Arc<StateStore>,
    pane_id: String,
    seeded: bool,
    previous_lines: Vec<String>,
    previous_dims: Dimensions,
    last_heartbeat: Instant,
}

/// Build the SSE byte stream for one subscriber. Ends (closing the
/// connection) once the pane's terminal id is gone; the client is expected
/// to reconnect and receive a fresh `INIT`.
pub fn terminal_stream(tmux: Arc<TmuxService>, store: Arc<StateStore>, pane_id: String) -> impl Stream<Item = Result<Event, Infallible>> {
    let state = StreamState {
        tmux,
        store,
        pane_id,
        seeded: false,
        previous_lines: Vec::new(),
        previous_dims: Dimensions { width: 0, height: 0 },
        last_heartbeat: Instant::now(),
    };
    stream::unfold(state, |mut state| async move {
        loop {
            tokio::time::sleep(TICK_INTERVAL).await;

            let Some(pane) = state.store.get_pane(&state.pane_id) else {
                return None;
            };
            if !pane.is_live() {
                return None;
            }

            let dims = match state.tmux.pane_dimensions(&pane.terminal_pane_id) {
                Ok(d) => d,
                Err(e) => {
                    warn!(pane_id = %state.pane_id, error = %e, "stream:failed to read pane dimensions");
                    continue;
                }
            };
            let captured = match state.tmux.capture_pane(&pane.terminal_pane_id, dims.height) {
                Ok(c) => c,
                Err(e) => {
                    warn!(pane_id = %state.pane_id, error = %e, "stream:failed to capture pane");
                    continue;
                }
            };
            let (cursor_col, cursor_row) = state.tmux.capture_cursor(&pane.terminal_pane_id).unwrap_or((0, 0));
            let lines: Vec<String> = captured.lines().map(str::to_string).collect();

            if !state.seeded {
                state.seeded = true;
                state.previous_lines = lines.clone();
                state.previous_dims = dims;
                state.last_heartbeat = Instant::now();
                let frame = wire_frame("INIT", &json!({
                    "width": dims.width,
                    "height": dims.height,
                    "content": lines.join("\n"),
                    "cursorRow": cursor_row,
                    "cursorCol": cursor_col,
                }));
                return Some((Ok(Event::default().data(frame)), state));
            }

            if dims != state.previous_dims {
                state.previous_lines = lines.clone();
                state.previous_dims = dims;
                state.last_heartbeat = Instant::now();
                let frame = wire_frame("RESIZE", &json!({
                    "width": dims.width,
                    "height": dims.height,
                    "content": lines.join("\n"),
                    "cursorRow": cursor_row,
                    "cursorCol": cursor_col,
                }));
                return Some((Ok(Event::default().data(frame)), state));
            }

            if let Some((start, changed)) = line_range_diff(&state.previous_lines, &lines) {
                state.previous_lines = lines;
                state.last_heartbeat = Instant::now();
                let frame = wire_frame("PATCH", &json!({
                    "startLine": start,
                    "lines": changed,
                    "cursorRow": cursor_row,
                    "cursorCol": cursor_col,
                }));
                return Some((Ok(Event::default().data(frame)), state));
            }

            if state.last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                state.last_heartbeat = Instant::now();
                let frame = wire_frame("HEARTBEAT", &json!({}));
                return Some((Ok(Event::default().data(frame)), state));
            }
        }
    })
}

fn wire_frame(kind: &str, payload: &serde_json::Value) -> String {
    format!("{kind}:{payload}")
}

/// Common-prefix/common-suffix line diff. Returns `None` when the two
/// buffers are identical; otherwise the changed line range `[start, ...)`
/// in `current` and the replacement lines themselves. Assumes `previous`
/// and `current` have equal length — a dimension change is handled
/// upstream as a `RESIZE`, not a patch, so this never needs to reason
/// about a buffer that grew or shrank.
fn line_range_diff(previous: &[String], current: &[String]) -> Option<(usize, Vec<String>)> {
    if previous == current {
        return None;
    }
    let len = previous.len().min(current.len());
    let mut prefix = 0;
    while prefix < len && previous[prefix] == current[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < len - prefix && previous[previous.len() - 1 - suffix] == current[current.len() - 1 - suffix] {
        suffix += 1;
    }
    let end = current.len() - suffix;
    Some((prefix, current[prefix..end].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_buffers_produce_no_diff() {
        let a = vec!["one".to_string(), "two".to_string()];
        assert_eq!(line_range_diff(&a, &a.clone()), None);
    }

    #[test]
    fn single_changed_middle_line_is_isolated() {
        let prev = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let curr = vec!["a".to_string(), "B".to_string(), "c".to_string()];
        assert_eq!(line_range_diff(&prev, &curr), Some((1, vec!["B".to_string()])));
    }

    #[test]
    fn trailing_change_extends_to_the_end() {
        let prev = vec!["a".to_string(), "b".to_string()];
        let curr = vec!["a".to_string(), "x".to_string()];
        assert_eq!(line_range_diff(&prev, &curr), Some((1, vec!["x".to_string()])));
    }

    #[test]
    fn wire_frame_joins_kind_and_json_with_a_colon() {
        let frame = wire_frame("HEARTBEAT", &json!({}));
        assert_eq!(frame, "HEARTBEAT:{}");
    }
}

//! The sidebar-plus-grid layout engine (spec.md §4.4).
//!
//! No file in the workmux lineage builds a tmux layout string from scratch;
//! `multiplexer::tmux::split_pane_internal`'s `-l <size>` sizing is the only
//! precedent for "how panes get told their size", reused here as the
//! fallback application strategy. The column-selection scoring and the
//! checksummed layout-string format are original to satisfy spec.md's
//! algorithm, tested the way the lineage tests pure functions: synthetic
//! inputs, no live tmux process.

use std::path::Path;

use tracing::{info, warn};

use crate::multiplexer::TmuxService;

pub const SIDEBAR_WIDTH: u16 = 40;
pub const MIN_CONTENT_WIDTH: u16 = 60;
pub const MAX_COMFORTABLE_WIDTH: u16 = 120;
pub const MIN_COMFORTABLE_HEIGHT: u16 = 15;

#[derive(Debug, Clone, Copy)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
}

/// Score a candidate column count for the content area. Higher is better;
/// candidates under any comfortable minimum are rejected before scoring.
fn score_columns(content_w: u16, content_h: u16, cols: u16, rows: u16) -> Option<f64> {
    if cols == 0 || rows == 0 {
        return None;
    }
    // one border column/row between each sibling
    let pane_w = content_w.saturating_sub(cols.saturating_sub(1)) / cols;
    let pane_h = content_h.saturating_sub(rows.saturating_sub(1)) / rows;

    if pane_w < MIN_CONTENT_WIDTH || pane_h < MIN_COMFORTABLE_HEIGHT {
        return None;
    }

    let width_score = if pane_w <= MAX_COMFORTABLE_WIDTH { 1.0 } else { 0.5 };
    let height_score = if pane_h as f64 >= 1.5 * MIN_COMFORTABLE_HEIGHT as f64 {
        1.0
    } else {
        0.7
    };
    Some(width_score * height_score)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectedLayout {
    Grid { cols: u16, rows: u16 },
    MainVertical,
}

/// Column-selection step of spec.md §4.4's algorithm.
pub fn select_layout(content_panes: u16, window_w: u16, window_h: u16) -> SelectedLayout {
    if content_panes == 0 {
        return SelectedLayout::Grid { cols: 0, rows: 0 };
    }
    let content_w = window_w.saturating_sub(SIDEBAR_WIDTH);

    let mut best: Option<(u16, f64)> = None;
    for k in 1..=content_panes {
        // k is the column count candidate directly, per spec.md's
        // "for k = 1..n" column sweep; rows is derived to fit all panes.
        let cols = k;
        let rows = content_panes.div_ceil(cols);
        if let Some(score) = score_columns(content_w, window_h, cols, rows)
            && best.is_none_or(|(_, best_score)| score > best_score)
        {
            best = Some((cols, score));
        }
    }

    if let Some((cols, _)) = best {
        let rows = content_panes.div_ceil(cols);
        return SelectedLayout::Grid { cols, rows };
    }

    // No candidate cleared the comfortable minimums: fall back to the
    // largest k whose width is >= 80% of the minimum, else main-vertical.
    for k in (1..=content_panes).rev() {
        let pane_w = content_w.saturating_sub(k.saturating_sub(1)) / k;
        if pane_w as f64 >= 0.8 * MIN_CONTENT_WIDTH as f64 {
            let rows = content_panes.div_ceil(k);
            return SelectedLayout::Grid { cols: k, rows };
        }
    }
    SelectedLayout::MainVertical
}

/// 16-bit checksum over the layout body, per spec.md §4.4: "low bit rotation
/// plus sum" (the same flavor of checksum tmux itself uses for its native
/// layout strings, reimplemented here rather than imported since it's a
/// handful of lines).
pub fn layout_checksum(body: &str) -> u16 {
    let mut csum: u16 = 0;
    for byte in body.bytes() {
        csum = (csum >> 1) | ((csum & 1) << 15);
        csum = csum.wrapping_add(byte as u16);
    }
    csum
}

/// Build the nested container-tree layout string: root = horizontal split
/// of [sidebar, content]; content = vertical split of rows; each row =
/// horizontal split of cells. A single-cell row collapses to a leaf.
pub fn build_layout_string(window_w: u16, window_h: u16, layout: SelectedLayout) -> String {
    let sidebar = Rect {
        x: 0,
        y: 0,
        w: SIDEBAR_WIDTH.min(window_w),
        h: window_h,
    };
    let content_x = sidebar.w.saturating_add(1).min(window_w);
    let content_w = window_w.saturating_sub(content_x);

    let body = match layout {
        SelectedLayout::Grid { cols, rows } if cols > 0 && rows > 0 => {
            let sidebar_leaf = leaf(sidebar);
            let content_leaf = build_grid(content_x, 0, content_w, window_h, cols, rows);
            format!("{window_w}x{window_h},0,0{{{sidebar_leaf},{content_leaf}}}")
        }
        _ => leaf(sidebar),
    };

    let checksum = layout_checksum(&body);
    format!("{checksum:04x},{body}")
}

fn leaf(r: Rect) -> String {
    format!("{}x{},{},{}", r.w, r.h, r.x, r.y)
}

/// Build the vertical stack of rows, each row a horizontal split of cells.
/// The last row and the last column in each row absorb rounding remainders.
fn build_grid(x: u16, y: u16, w: u16, h: u16, cols: u16, rows: u16) -> String {
    if rows == 1 {
        return build_row(x, y, w, h, cols);
    }

    let row_h = h / rows;
    let mut parts = Vec::new();
    for r in 0..rows {
        let this_y = y + row_h * r;
        // Last row absorbs the rounding remainder so rows always sum to h.
        let this_h = if r == rows - 1 { h - row_h * r } else { row_h };
        parts.push(build_row(x, this_y, w, this_h, cols));
    }
    format!("{w}x{h},{x},{y}[{}]", parts.join(","))
}

fn build_row(x: u16, y: u16, w: u16, h: u16, cols: u16) -> String {
    if cols <= 1 {
        return leaf(Rect { x, y, w, h });
    }
    let cell_w = w / cols;
    let mut parts = Vec::new();
    for c in 0..cols {
        let this_x = x + cell_w * c;
        let this_w = if c == cols - 1 { w - cell_w * c } else { cell_w };
        parts.push(leaf(Rect {
            x: this_x,
            y,
            w: this_w,
            h,
        }));
    }
    format!("{w}x{h},{x},{y}{{{}}}", parts.join(","))
}

/// Apply the computed layout, falling back through spec.md §4.4's chain:
/// custom string -> built-in main-vertical -> direct sidebar resize.
pub fn apply_layout(
    tmux: &TmuxService,
    window: &str,
    sidebar_pane_id: &str,
    _cwd: &Path,
    window_w: u16,
    window_h: u16,
    content_panes: u16,
) -> SelectedLayout {
    let selected = select_layout(content_panes, window_w, window_h);
    let layout_string = build_layout_string(window_w, window_h, selected);

    match tmux.select_layout(window, &layout_string) {
        Ok(()) => {
            info!(window, layout = %layout_string, "layout:applied custom layout");
            selected
        }
        Err(e) => {
            warn!(window, error = %e, "layout:custom layout rejected, falling back to main-vertical");
            match tmux.select_layout_builtin(window, "main-vertical") {
                Ok(()) => {
                    let _ = tmux.resize_pane(sidebar_pane_id, Some(SIDEBAR_WIDTH), None);
                    SelectedLayout::MainVertical
                }
                Err(e2) => {
                    warn!(window, error = %e2, "layout:main-vertical rejected, resizing sidebar directly");
                    let _ = tmux.resize_pane(sidebar_pane_id, Some(SIDEBAR_WIDTH), None);
                    SelectedLayout::MainVertical
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_content_panes_only_pins_sidebar() {
        let layout = select_layout(0, 200, 50);
        assert_eq!(layout, SelectedLayout::Grid { cols: 0, rows: 0 });
    }

    #[test]
    fn comfortable_window_picks_single_row() {
        let layout = select_layout(3, 200, 50);
        assert_eq!(layout, SelectedLayout::Grid { cols: 3, rows: 1 });
    }

    #[test]
    fn narrow_window_falls_back_to_main_vertical() {
        let layout = select_layout(3, 60, 50);
        assert_eq!(layout, SelectedLayout::MainVertical);
    }

    #[test]
    fn checksum_is_deterministic() {
        let a = layout_checksum("200x50,0,0");
        let b = layout_checksum("200x50,0,0");
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_differs_for_different_bodies() {
        let a = layout_checksum("200x50,0,0");
        let b = layout_checksum("200x51,0,0");
        assert_ne!(a, b);
    }

    #[test]
    fn layout_string_is_well_formed() {
        let s = build_layout_string(200, 50, SelectedLayout::Grid { cols: 3, rows: 1 });
        let (checksum, body) = s.split_once(',').unwrap();
        assert_eq!(checksum.len(), 4);
        assert!(body.starts_with("200x50,0,0{"));
    }

    #[test]
    fn one_content_pane_is_degenerate_horizontal_split() {
        let s = build_layout_string(140, 50, SelectedLayout::Grid { cols: 1, rows: 1 });
        assert!(s.contains("40x50,0,0"));
    }
}

//! HTTP/SSE server + terminal streamer (spec.md §4.8): the web adapter over
//! the same action dispatcher and pane manager the TUI drives.
//!
//! No file in the workmux lineage runs a server at all (it's TUI/CLI only),
//! so the stack is grounded on the wider retrieval pack instead: the
//! `groblegark-coop` manifest's `axum` + `tokio` + `tower-http` combination,
//! and its `axum::serve`/`TcpListener`/`with_graceful_shutdown` spawn idiom
//! in `cli/src/run.rs`. Routes are thin `axum::routing` handlers that
//! delegate to [`crate::action::dispatch`] and [`crate::manager`]; nothing
//! web-specific leaks below this module.

mod stream;

use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::action::callback::{CallbackRegistry, PendingCallback};
use crate::action::dispatch::{dispatch, ActionContext};
use crate::action::{ActionId, ActionResult};
use crate::manager;
use crate::multiplexer::TmuxService;
use crate::pane::Pane;
use crate::state::StateStore;

/// Capabilities threaded to every handler (spec.md §9: "expose singletons
/// through a small capability object"). `control_pane_id` anchors CREATE's
/// split-origin and the welcome-pane policy; a headless server started
/// without a dashboard pane of its own leaves it `None` and CREATE/DUPLICATE
/// degrade to reporting an error rather than guessing a pane to split from.
#[derive(Clone)]
pub struct AppState {
    pub tmux: Arc<TmuxService>,
    pub store: Arc<StateStore>,
    pub callbacks: Arc<CallbackRegistry>,
    pub control_pane_id: Option<String>,
}

impl AppState {
    fn action_context(&self) -> ActionContext {
        ActionContext {
            tmux: Arc::clone(&self.tmux),
            store: Arc::clone(&self.store),
            control_pane_id: self.control_pane_id.clone(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/panes", get(list_panes).post(create_pane))
        .route("/api/actions", get(list_actions))
        .route("/api/panes/{id}/actions", get(actions_for_pane))
        .route("/api/panes/{id}/actions/{action_id}", post(start_action))
        .route("/api/callbacks/{kind}/{id}", post(resolve_callback))
        .route("/api/keys/{id}", post(send_key))
        .route("/api/stream/{id}", get(stream_pane))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on `addr` until `shutdown` fires, mirroring the lineage's
/// graceful-shutdown spawn shape.
pub async fn serve(state: AppState, addr: std::net::SocketAddr, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http:listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[derive(Serialize)]
struct PaneListResponse {
    panes: Vec<Pane>,
}

async fn list_panes(State(state): State<AppState>) -> Json<PaneListResponse> {
    Json(PaneListResponse {
        panes: state.store.list_panes(),
    })
}

#[derive(Serialize)]
struct ActionDescriptor {
    id: &'static str,
}

async fn list_actions() -> Json<Vec<ActionDescriptor>> {
    Json(ActionId::all().iter().map(|a| ActionDescriptor { id: a.as_str() }).collect())
}

/// Which registered actions make sense for this pane right now. `OpenPr`
/// and `Merge` require an existing worktree; everything else applies to any
/// pane with a live terminal.
fn valid_actions_for(pane: &Pane) -> Vec<&'static str> {
    ActionId::all()
        .iter()
        .filter(|a| match a {
            ActionId::Merge | ActionId::OpenPr | ActionId::Duplicate | ActionId::CopyPath | ActionId::OpenEditor => pane.worktree_path.is_some(),
            _ => true,
        })
        .map(|a| a.as_str())
        .collect()
}

async fn actions_for_pane(State(state): State<AppState>, AxumPath(id): AxumPath<String>) -> impl IntoResponse {
    match state.store.get_pane(&id) {
        Some(pane) => Json(json!({ "actions": valid_actions_for(&pane) })).into_response(),
        None => error_response("Pane not found").into_response(),
    }
}

async fn start_action(State(state): State<AppState>, AxumPath((id, action_id)): AxumPath<(String, String)>) -> impl IntoResponse {
    let Some(action) = ActionId::parse(&action_id) else {
        return error_response("Unknown action id").into_response();
    };
    let Some(pane) = state.store.get_pane(&id) else {
        return error_response("Pane not found").into_response();
    };
    let ctx = state.action_context();
    let result = dispatch(action, &pane, &ctx, None);
    action_result_response(&state, result).into_response()
}

#[derive(Deserialize)]
struct CreatePaneRequest {
    prompt: String,
    #[serde(default)]
    agent: Option<String>,
}

/// `POST /api/panes`: the same entry point the TUI's CREATE action uses.
/// Requires a control pane to split from; a headless server with none
/// configured reports that as an error rather than guessing one.
async fn create_pane(State(state): State<AppState>, Json(req): Json<CreatePaneRequest>) -> impl IntoResponse {
    let Some(control_pane_id) = state.control_pane_id.clone() else {
        return error_response("This server has no control pane to attach new panes to").into_response();
    };
    let project_root = state.store.list_panes().first().map(|p| p.project_root.clone()).unwrap_or_else(|| std::path::PathBuf::from("."));
    let ctx = state.action_context();
    let result = manager::create(&ctx, &control_pane_id, &project_root, req.prompt, req.agent);
    action_result_response(&state, result).into_response()
}

#[derive(Deserialize)]
struct CallbackBody {
    #[serde(default)]
    confirm: Option<bool>,
    #[serde(default, rename = "optionId")]
    option_id: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

/// `POST /api/callbacks/{kind}/{id}`: resume a continuation the dispatcher
/// handed out earlier. Consuming twice, or an id past its TTL, is the same
/// "expired or not found" error both times (spec.md's continuation
/// idempotence property).
async fn resolve_callback(State(state): State<AppState>, AxumPath((kind, id)): AxumPath<(String, String)>, Json(body): Json<CallbackBody>) -> impl IntoResponse {
    let Some(pending) = state.callbacks.consume(&id) else {
        return error_response("Callback expired or not found").into_response();
    };

    let result = match (kind.as_str(), pending) {
        ("confirm", PendingCallback::Confirm { on_confirm, on_cancel }) => {
            if body.confirm.unwrap_or(false) {
                on_confirm()
            } else {
                on_cancel()
            }
        }
        ("choice", PendingCallback::Choice { on_select }) => match body.option_id {
            Some(option_id) => on_select(&option_id),
            None => return error_response("Missing optionId").into_response(),
        },
        ("input", PendingCallback::Input { on_submit }) => match body.value {
            Some(value) => on_submit(&value),
            None => return error_response("Missing value").into_response(),
        },
        _ => return error_response("Callback kind does not match the pending interaction").into_response(),
    };

    action_result_response(&state, result).into_response()
}

#[derive(Deserialize)]
struct KeyRequest {
    key: String,
    #[serde(default)]
    shift: bool,
    #[serde(default)]
    ctrl: bool,
    #[serde(default)]
    alt: bool,
    #[serde(default)]
    meta: bool,
}

/// Translate a JSON keystroke descriptor into tmux's `send-keys` vocabulary
/// (spec.md §4.8 "key handling from web"). Shift+Enter is the one composite
/// `send-keys` can't express unambiguously across agent CLIs, so it goes
/// through the paste-buffer path as a literal newline instead.
async fn send_key(State(state): State<AppState>, AxumPath(id): AxumPath<String>, Json(req): Json<KeyRequest>) -> impl IntoResponse {
    let Some(pane) = state.store.get_pane(&id) else {
        return error_response("Pane not found").into_response();
    };
    if !pane.is_live() {
        return error_response("Pane is not currently open").into_response();
    }

    if req.key == "Enter" && req.shift {
        return match state.tmux.paste_prompt(&pane.terminal_pane_id, "\n") {
            Ok(()) => success_response("ok").into_response(),
            Err(e) => {
                warn!(pane_id = %id, error = %e, "http:shift-enter paste failed");
                error_response("Failed to send key").into_response()
            }
        };
    }

    let key = tmux_key_name(&req);
    match state.tmux.send_key(&pane.terminal_pane_id, &key) {
        Ok(()) => success_response("ok").into_response(),
        Err(e) => {
            warn!(pane_id = %id, error = %e, key, "http:send_key failed");
            error_response("Failed to send key").into_response()
        }
    }
}

fn tmux_key_name(req: &KeyRequest) -> String {
    let mut prefix = String::new();
    if req.ctrl {
        prefix.push_str("C-");
    }
    if req.alt {
        prefix.push_str("M-");
    }
    if req.meta {
        prefix.push_str("M-");
    }
    if req.shift && req.key.chars().count() > 1 {
        prefix.push_str("S-");
    }
    format!("{prefix}{}", req.key)
}

/// `GET /api/stream/{id}`: the terminal video stream. Frames are
/// newline-delimited `TYPE:JSON` lines (spec.md §4.8), carried as SSE `data`
/// payloads so intermediary proxies still see a standard event stream.
async fn stream_pane(State(state): State<AppState>, AxumPath(id): AxumPath<String>) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let stream = stream::terminal_stream(Arc::clone(&state.tmux), Arc::clone(&state.store), id);
    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default())
}

fn success_response(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "success": true, "type": "success", "message": message.into() }))
}

fn error_response(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "success": false, "type": "error", "message": message.into() }))
}

/// Translate an [`ActionResult`] into the wire shape spec.md §6 describes:
/// interactive results register a continuation and carry a `callbackId`;
/// everything else is a flat JSON object.
fn action_result_response(state: &AppState, result: ActionResult) -> Json<Value> {
    match result {
        ActionResult::Success { message, title } => Json(json!({ "success": true, "type": "success", "message": message, "title": title })),
        ActionResult::Error { message, title } => Json(json!({ "success": false, "type": "error", "message": message, "title": title })),
        ActionResult::Info { message, title } => Json(json!({ "success": true, "type": "info", "message": message, "title": title })),
        ActionResult::Progress { message, progress } => Json(json!({ "success": true, "type": "progress", "message": message, "progress": progress })),
        ActionResult::Navigation { target_pane_id } => Json(json!({ "success": true, "type": "navigation", "targetPaneId": target_pane_id })),
        ActionResult::Confirm { message, title, confirm_label, cancel_label, on_confirm, on_cancel } => {
            let callback_id = state.callbacks.register(PendingCallback::Confirm { on_confirm, on_cancel });
            Json(json!({
                "success": true,
                "type": "confirm",
                "message": message,
                "title": title,
                "confirmLabel": confirm_label,
                "cancelLabel": cancel_label,
                "requiresInteraction": true,
                "interactionType": "confirm",
                "callbackId": callback_id,
            }))
        }
        ActionResult::Choice { message, title, options, on_select } => {
            let callback_id = state.callbacks.register(PendingCallback::Choice { on_select });
            Json(json!({
                "success": true,
                "type": "choice",
                "message": message,
                "title": title,
                "options": options,
                "requiresInteraction": true,
                "interactionType": "choice",
                "callbackId": callback_id,
            }))
        }
        ActionResult::Input { message, title, placeholder, default_value, on_submit } => {
            let callback_id = state.callbacks.register(PendingCallback::Input { on_submit });
            Json(json!({
                "success": true,
                "type": "input",
                "message": message,
                "title": title,
                "placeholder": placeholder,
                "defaultValue": default_value,
                "requiresInteraction": true,
                "interactionType": "input",
                "callbackId": callback_id,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_name_applies_modifier_prefixes() {
        let req = KeyRequest { key: "c".into(), shift: false, ctrl: true, alt: false, meta: false };
        assert_eq!(tmux_key_name(&req), "C-c");
    }

    #[test]
    fn shift_prefix_only_applies_to_named_keys() {
        let named = KeyRequest { key: "Tab".into(), shift: true, ctrl: false, alt: false, meta: false };
        assert_eq!(tmux_key_name(&named), "S-Tab");
        let single_char = KeyRequest { key: "a".into(), shift: true, ctrl: false, alt: false, meta: false };
        assert_eq!(tmux_key_name(&single_char), "a");
    }

    #[test]
    fn valid_actions_exclude_worktree_only_actions_without_a_worktree() {
        let pane = Pane {
            id: "pane-1".into(),
            slug: "x".into(),
            kind: crate::pane::PaneKind::Welcome,
            prompt: String::new(),
            terminal_pane_id: "%1".into(),
            worktree_path: None,
            agent: None,
            project_root: std::path::PathBuf::from("/tmp/proj"),
            project_name: "proj".into(),
            agent_status: crate::pane::AgentStatus::Idle,
            options_question: None,
            options: Vec::new(),
            potential_harm: None,
            agent_summary: None,
            autopilot: false,
            dev_window_id: None,
            test_window_id: None,
            dev_status: None,
            test_status: None,
            dev_url: None,
            orphaned: false,
        };
        let actions = valid_actions_for(&pane);
        assert!(!actions.contains(&"MERGE"));
        assert!(actions.contains(&"VIEW"));
    }
}

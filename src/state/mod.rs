//! The state store: single source of truth for the pane list, watched
//! across processes via the persisted config file (spec.md §4.1).
//!
//! Grounded on `state::persist_agent_update`'s merge-don't-clobber update
//! style in the workmux lineage, generalized from a single best-effort
//! function into a full store with atomic persistence, a debounced file
//! watcher, and pub/sub broadcast — the lineage has no watcher or broadcast
//! of its own (it re-reads the sqlite-ish store on each CLI invocation), so
//! those pieces are grounded on `notify`'s own recommended usage pattern
//! (the crate pulled in from the wider pack for exactly this purpose).

mod watcher;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config;
use crate::pane::{AgentStatus, LayeredSettings, Pane, PaneIdGenerator};

pub use watcher::spawn_watcher;

#[derive(Debug, Clone)]
pub enum StoreEvent {
    PanesChanged,
}

/// Shallow-mergeable fields an analyzer may publish for a pane. `None`
/// means "leave unchanged" so a worker updating one field doesn't clobber
/// another's recent write.
#[derive(Debug, Clone, Default)]
pub struct PaneStatusUpdate {
    pub agent_status: Option<AgentStatus>,
    pub options_question: Option<Option<String>>,
    pub options: Option<Vec<crate::pane::PaneOption>>,
    pub potential_harm: Option<Option<crate::pane::PotentialHarm>>,
    pub agent_summary: Option<Option<String>>,
}

struct Inner {
    panes: Vec<Pane>,
}

pub struct StateStore {
    project_root: PathBuf,
    inner: Mutex<Inner>,
    tx: broadcast::Sender<StoreEvent>,
    id_gen: PaneIdGenerator,
}

impl StateStore {
    /// Load (or initialize) the store for a project root.
    pub fn load(project_root: &Path) -> Result<Arc<Self>> {
        let path = config::pane_config_path(project_root);
        let panes = read_panes(&path).unwrap_or_else(|e| {
            warn!(error = %e, "state:read failure, falling back to empty in-memory state");
            Vec::new()
        });
        let id_gen = PaneIdGenerator::from_existing(panes.iter());
        let (tx, _rx) = broadcast::channel(64);
        Ok(Arc::new(Self {
            project_root: project_root.to_path_buf(),
            inner: Mutex::new(Inner { panes }),
            tx,
            id_gen,
        }))
    }

    pub fn next_pane_id(&self) -> String {
        self.id_gen.next_id()
    }

    pub fn list_panes(&self) -> Vec<Pane> {
        self.inner.lock().expect("state store lock poisoned").panes.clone()
    }

    pub fn get_pane(&self, id: &str) -> Option<Pane> {
        self.inner
            .lock()
            .expect("state store lock poisoned")
            .panes
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    /// Atomic replace: persists the whole snapshot, then broadcasts once.
    pub fn apply_panes(&self, snapshot: Vec<Pane>) -> Result<()> {
        {
            let mut inner = self.inner.lock().expect("state store lock poisoned");
            inner.panes = snapshot;
        }
        self.persist()?;
        self.broadcast();
        Ok(())
    }

    /// Shallow-merge update for one pane's analyzer-produced fields. Unknown
    /// pane ids are rejected silently (spec.md §4.1).
    pub fn update_pane_status(&self, pane_id: &str, update: PaneStatusUpdate) {
        let mut changed = false;
        {
            let mut inner = self.inner.lock().expect("state store lock poisoned");
            if let Some(pane) = inner.panes.iter_mut().find(|p| p.id == pane_id) {
                if let Some(status) = update.agent_status {
                    pane.agent_status = status;
                }
                if let Some(q) = update.options_question {
                    pane.options_question = q;
                }
                if let Some(opts) = update.options {
                    pane.options = opts;
                }
                if let Some(harm) = update.potential_harm {
                    pane.potential_harm = harm;
                }
                if let Some(summary) = update.agent_summary {
                    pane.agent_summary = summary;
                }
                changed = true;
            } else {
                debug!(pane_id, "state:update for unknown pane id, ignored");
            }
        }
        if changed {
            if let Err(e) = self.persist() {
                warn!(error = %e, "state:failed to persist status update");
            }
            self.broadcast();
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    fn broadcast(&self) {
        let _ = self.tx.send(StoreEvent::PanesChanged);
    }

    fn persist(&self) -> Result<()> {
        let panes = self.inner.lock().expect("state store lock poisoned").panes.clone();
        let path = config::pane_config_path(&self.project_root);
        write_panes(&path, &panes)
    }

    /// Re-read from disk (called by the file watcher on external changes).
    pub fn reload(&self) -> Result<()> {
        let path = config::pane_config_path(&self.project_root);
        let panes = read_panes(&path)?;
        {
            let mut inner = self.inner.lock().expect("state store lock poisoned");
            inner.panes = panes;
        }
        self.broadcast();
        Ok(())
    }

    pub fn get_settings(&self) -> Result<LayeredSettings> {
        config::load_settings(&self.project_root)
    }

    pub fn set_setting(&self, scope: config::Scope, key: &str, value: serde_json::Value) -> Result<()> {
        config::set_setting(&self.project_root, scope, key, value)
    }

    /// Reconciliation pass (spec.md §4.1, §4.3 "Orphan reconciliation"):
    /// compares persisted panes against a caller-supplied set of live
    /// terminal pane ids and worktree directories.
    ///
    /// - Panes whose `terminal_pane_id` is no longer live are marked orphaned.
    /// - Worktree directories with no matching pane get a new orphaned pane.
    pub fn reconcile(
        &self,
        live_terminal_ids: &std::collections::HashSet<String>,
        worktree_dirs: &[(String, PathBuf)],
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("state store lock poisoned");

        for pane in inner.panes.iter_mut() {
            if pane.is_live() && !live_terminal_ids.contains(&pane.terminal_pane_id) {
                info!(pane_id = %pane.id, slug = %pane.slug, "state:marking pane orphaned");
                pane.orphaned = true;
                pane.terminal_pane_id.clear();
            }
        }

        let known_slugs: std::collections::HashSet<String> =
            inner.panes.iter().map(|p| p.slug.clone()).collect();

        for (slug, path) in worktree_dirs {
            if known_slugs.contains(slug) {
                continue;
            }
            info!(slug, path = %path.display(), "state:adopting orphan worktree as pane");
            let id = self.id_gen.next_id();
            inner.panes.push(Pane {
                id,
                slug: slug.clone(),
                kind: crate::pane::PaneKind::Worktree,
                prompt: String::new(),
                terminal_pane_id: String::new(),
                worktree_path: Some(path.clone()),
                agent: None,
                project_root: self.project_root.clone(),
                project_name: project_name(&self.project_root),
                agent_status: AgentStatus::Unknown,
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
                orphaned: true,
            });
        }

        drop(inner);
        self.persist()?;
        self.broadcast();
        Ok(())
    }
}

fn project_name(root: &Path) -> String {
    root.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("project")
        .to_string()
}

fn read_panes(path: &Path) -> Result<Vec<Pane>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read pane snapshot at {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse pane snapshot at {}", path.display()))
}

/// Atomic write: temp file + rename, eliminating torn reads for concurrent
/// watchers (spec.md §4.1).
fn write_panes(path: &Path, panes: &[Pane]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create state directory at {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(panes)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).context("failed to write temp pane snapshot")?;
    fs::rename(&tmp, path).context("failed to atomically replace pane snapshot")?;
    Ok(())
}

/// Debounce window for coalescing bursts of rapid status updates into a
/// single broadcast (spec.md §4.1: "a worker updating five panes in quick
/// succession produces one notification").
pub const BROADCAST_DEBOUNCE: Duration = Duration::from_millis(150);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pane::PaneKind;
    use tempfile::tempdir;

    fn sample_pane(id: &str, slug: &str) -> Pane {
        Pane {
            id: id.to_string(),
            slug: slug.to_string(),
            kind: PaneKind::Worktree,
            prompt: String::new(),
            terminal_pane_id: "%1".into(),
            worktree_path: None,
            agent: None,
            project_root: PathBuf::from("/tmp/proj"),
            project_name: "proj".into(),
            agent_status: AgentStatus::Working,
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
        }
    }

    #[test]
    fn apply_then_list_round_trips() {
        let dir = tempdir().unwrap();
        let store = StateStore::load(dir.path()).unwrap();
        store.apply_panes(vec![sample_pane("pane-1", "fix-login")]).unwrap();
        let panes = store.list_panes();
        assert_eq!(panes.len(), 1);
        assert_eq!(panes[0].slug, "fix-login");
    }

    #[test]
    fn update_unknown_pane_is_a_silent_noop() {
        let dir = tempdir().unwrap();
        let store = StateStore::load(dir.path()).unwrap();
        store.apply_panes(vec![sample_pane("pane-1", "fix-login")]).unwrap();
        store.update_pane_status(
            "pane-999",
            PaneStatusUpdate {
                agent_status: Some(AgentStatus::Idle),
                ..Default::default()
            },
        );
        assert_eq!(store.list_panes()[0].agent_status, AgentStatus::Working);
    }

    #[test]
    fn shallow_merge_preserves_untouched_fields() {
        let dir = tempdir().unwrap();
        let store = StateStore::load(dir.path()).unwrap();
        let mut pane = sample_pane("pane-1", "fix-login");
        pane.agent_summary = Some("did the thing".into());
        store.apply_panes(vec![pane]).unwrap();

        store.update_pane_status(
            "pane-1",
            PaneStatusUpdate {
                agent_status: Some(AgentStatus::Idle),
                ..Default::default()
            },
        );

        let panes = store.list_panes();
        assert_eq!(panes[0].agent_status, AgentStatus::Idle);
        assert_eq!(panes[0].agent_summary.as_deref(), Some("did the thing"));
    }

    #[test]
    fn reload_picks_up_external_writes() {
        let dir = tempdir().unwrap();
        let store = StateStore::load(dir.path()).unwrap();
        let path = config::pane_config_path(dir.path());
        write_panes(&path, &[sample_pane("pane-2", "other")]).unwrap();
        store.reload().unwrap();
        assert_eq!(store.list_panes()[0].slug, "other");
    }

    #[test]
    fn reconcile_marks_dead_terminal_panes_orphaned() {
        let dir = tempdir().unwrap();
        let store = StateStore::load(dir.path()).unwrap();
        store.apply_panes(vec![sample_pane("pane-1", "fix-login")]).unwrap();
        store.reconcile(&Default::default(), &[]).unwrap();
        assert!(store.list_panes()[0].orphaned);
        assert!(store.list_panes()[0].terminal_pane_id.is_empty());
    }

    #[test]
    fn reconcile_adopts_unknown_worktree_directories() {
        let dir = tempdir().unwrap();
        let store = StateStore::load(dir.path()).unwrap();
        let wt = dir.path().join(".dmux/worktrees/orphan-slug");
        store
            .reconcile(&Default::default(), &[("orphan-slug".to_string(), wt.clone())])
            .unwrap();
        let panes = store.list_panes();
        assert_eq!(panes.len(), 1);
        assert!(panes[0].orphaned);
        assert_eq!(panes[0].worktree_path.as_deref(), Some(wt.as_path()));
    }
}

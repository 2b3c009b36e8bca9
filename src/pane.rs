//! The core data model: `Pane` and the settings map it lives alongside.
//!
//! Mirrors the shape of `state::AgentState`/`config::Config` in the workmux
//! lineage (plain serde structs, persisted as JSON), generalized to the
//! richer pane record spec.md §3 describes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaneKind {
    Worktree,
    Shell,
    Welcome,
    ConflictResolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Working,
    Waiting,
    Idle,
    Analyzing,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideStatus {
    Stopped,
    Starting,
    Running,
    Failed,
}

/// A single selectable response to an `optionsQuestion`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneOption {
    pub action: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PotentialHarm {
    #[serde(default)]
    pub has_risk: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pane {
    pub id: String,
    pub slug: String,
    pub kind: PaneKind,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub terminal_pane_id: String,
    #[serde(default)]
    pub worktree_path: Option<PathBuf>,
    #[serde(default)]
    pub agent: Option<String>,
    pub project_root: PathBuf,
    pub project_name: String,
    #[serde(default = "default_status")]
    pub agent_status: AgentStatus,
    #[serde(default)]
    pub options_question: Option<String>,
    #[serde(default)]
    pub options: Vec<PaneOption>,
    #[serde(default)]
    pub potential_harm: Option<PotentialHarm>,
    #[serde(default)]
    pub agent_summary: Option<String>,
    #[serde(default)]
    pub autopilot: bool,
    #[serde(default)]
    pub dev_window_id: Option<String>,
    #[serde(default)]
    pub test_window_id: Option<String>,
    #[serde(default)]
    pub dev_status: Option<SideStatus>,
    #[serde(default)]
    pub test_status: Option<SideStatus>,
    #[serde(default)]
    pub dev_url: Option<String>,
    #[serde(default)]
    pub orphaned: bool,
}

fn default_status() -> AgentStatus {
    AgentStatus::Unknown
}

impl Pane {
    /// Invariant from spec.md §3: `agentStatus == waiting` implies a
    /// non-empty `options` list.
    pub fn is_consistent(&self) -> bool {
        if self.agent_status == AgentStatus::Waiting && self.options.is_empty() {
            return false;
        }
        true
    }

    pub fn is_live(&self) -> bool {
        !self.terminal_pane_id.is_empty()
    }
}

/// Process-wide monotonic id generator. Seeded from the highest id found in
/// a loaded snapshot so ids never collide across a restart (spec.md: "never
/// reused").
pub struct PaneIdGenerator {
    next: AtomicU64,
}

impl PaneIdGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            next: AtomicU64::new(seed),
        }
    }

    /// Seed from the highest numeric suffix among existing pane ids.
    pub fn from_existing<'a>(panes: impl Iterator<Item = &'a Pane>) -> Self {
        let max = panes
            .filter_map(|p| p.id.strip_prefix("pane-"))
            .filter_map(|n| n.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Self::new(max + 1)
    }

    pub fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        format!("pane-{n}")
    }
}

/// Two-scope settings map: global + project, with built-in defaults filling
/// the rest. Mirrors `config::Config`'s layering but generalized to an open
/// key set (spec.md names `defaultAgent`, `permissionMode`,
/// `enableAutopilotByDefault`, `baseBranch`, `branchPrefix`, `useTmuxHooks`
/// as "recognized keys", implying others may exist).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsMap {
    #[serde(flatten)]
    pub values: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct LayeredSettings {
    pub global: SettingsMap,
    pub project: SettingsMap,
}

impl LayeredSettings {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.project.values.get(key).or_else(|| self.global.values.get(key))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn default_agent(&self) -> Option<&str> {
        self.get_str("defaultAgent")
    }

    pub fn permission_mode(&self) -> &str {
        self.get_str("permissionMode").unwrap_or("default")
    }

    pub fn autopilot_by_default(&self) -> bool {
        self.get_bool("enableAutopilotByDefault", false)
    }

    pub fn base_branch(&self) -> Option<&str> {
        self.get_str("baseBranch")
    }

    pub fn branch_prefix(&self) -> &str {
        self.get_str("branchPrefix").unwrap_or("dmux-")
    }

    pub fn use_tmux_hooks(&self) -> bool {
        self.get_bool("useTmuxHooks", false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pane(id: &str, status: AgentStatus, options: Vec<PaneOption>) -> Pane {
        Pane {
            id: id.to_string(),
            slug: "x".into(),
            kind: PaneKind::Worktree,
            prompt: String::new(),
            terminal_pane_id: "%1".into(),
            worktree_path: None,
            agent: None,
            project_root: PathBuf::from("/tmp/proj"),
            project_name: "proj".into(),
            agent_status: status,
            options_question: None,
            options,
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
    fn waiting_requires_options() {
        assert!(!pane("pane-1", AgentStatus::Waiting, vec![]).is_consistent());
        let opt = PaneOption {
            action: "Yes".into(),
            keys: vec!["Enter".into()],
        };
        assert!(pane("pane-1", AgentStatus::Waiting, vec![opt]).is_consistent());
    }

    #[test]
    fn id_generator_seeds_from_existing() {
        let panes = vec![pane("pane-3", AgentStatus::Idle, vec![]), pane("pane-7", AgentStatus::Idle, vec![])];
        let gen = PaneIdGenerator::from_existing(panes.iter());
        assert_eq!(gen.next_id(), "pane-8");
    }

    #[test]
    fn id_generator_never_repeats() {
        let gen = PaneIdGenerator::new(1);
        let a = gen.next_id();
        let b = gen.next_id();
        assert_ne!(a, b);
    }
}

//! Per-pane worker: one cooperative loop per live agent pane, tailing its
//! buffer, classifying state, and driving autopilot (spec.md §4.5).
//!
//! Grounded on `command::dashboard::monitor::AgentMonitor`'s content-hash
//! stall detection in the workmux lineage, generalized from a single
//! dashboard-refresh pass into a standing per-pane `tokio` task (the
//! lineage has no async runtime of its own; `tokio` is pulled in from the
//! wider pack per DESIGN.md).

pub mod llm;
pub mod pattern;
pub mod supervisor;
pub mod trust;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::multiplexer::TmuxService;
use crate::pane::{AgentStatus, PaneOption, PotentialHarm};
use crate::state::{PaneStatusUpdate, StateStore};

use llm::{content_hash, LlmAnalysis, LlmAnalyzer};
use pattern::PatternAnalysis;

const TICK_INTERVAL: Duration = Duration::from_millis(800);
const WORKING_SLEEP: Duration = Duration::from_millis(500);
const CAPTURE_LINES: u16 = 15;
const CACHE_REUSE_TTL: Duration = Duration::from_secs(5);

/// Words whose presence in a deterministic option dialog's question text
/// disqualifies it from autopilot, no matter how safe the agent's own
/// options look (spec.md §4.5: "any hint of risk falls back to
/// human-in-the-loop"). Matched case-insensitively against the raw question.
const DANGER_KEYWORDS: &[&str] = &["delete", "remove", "rm ", "overwrite", "force", "push", "destroy", "drop", "wipe"];

fn question_is_risky(question: &str) -> bool {
    let lower = question.to_lowercase();
    DANGER_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

struct LastAnalysis {
    content_hash: u64,
    at: Instant,
}

/// Outcome of one tick, surfaced for tests without needing a live tmux pane.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Working,
    Waiting { question: String, options: Vec<PaneOption> },
    Idle { summary: Option<String> },
    Unchanged,
    AutopilotAdvanced { action: String },
}

pub struct PaneWorker {
    pane_id: String,
    tmux: Arc<TmuxService>,
    store: Arc<StateStore>,
    llm: Arc<LlmAnalyzer>,
    cancel: CancellationToken,
}

impl PaneWorker {
    pub fn new(pane_id: String, tmux: Arc<TmuxService>, store: Arc<StateStore>, llm: Arc<LlmAnalyzer>) -> Self {
        Self {
            pane_id,
            tmux,
            store,
            llm,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the ticker loop as a tokio task. Returns the handle so callers
    /// (the pane manager) can hold it and abort via the cancellation token
    /// rather than dropping the future directly.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        trust::poll_for_trust_prompt(&self.tmux, &self.pane_id);

        let mut last: Option<LastAnalysis> = None;
        loop {
            if self.cancel.is_cancelled() {
                info!(pane_id = %self.pane_id, "worker:cancelled, stopping");
                return;
            }

            match self.tick(&mut last).await {
                Ok(TickOutcome::Working) => {
                    tokio::select! {
                        _ = tokio::time::sleep(WORKING_SLEEP) => {}
                        _ = self.cancel.cancelled() => return,
                    }
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(pane_id = %self.pane_id, error = %e, "worker:tick failed, will retry");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(TICK_INTERVAL) => {}
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    async fn tick(&self, last: &mut Option<LastAnalysis>) -> anyhow::Result<TickOutcome> {
        let pane = match self.store.get_pane(&self.pane_id) {
            Some(p) => p,
            None => return Ok(TickOutcome::Unchanged),
        };

        let captured = self.tmux.capture_pane(&pane.terminal_pane_id, CAPTURE_LINES)?;
        let lines: Vec<&str> = captured.lines().collect();
        let hash = content_hash(&captured);

        if let Some(deterministic) = pattern::analyze(pane.agent.as_deref(), &lines) {
            return Ok(self.apply_deterministic(&pane, deterministic));
        }

        if let Some(prior) = last
            && prior.content_hash == hash
            && prior.at.elapsed() < CACHE_REUSE_TTL
        {
            return Ok(TickOutcome::Unchanged);
        }

        if let Some(analysis) = self.llm.analyze(&self.pane_id, &captured).await {
            *last = Some(LastAnalysis { content_hash: hash, at: Instant::now() });
            return Ok(self.apply_llm(&pane.id, analysis));
        }

        *last = Some(LastAnalysis { content_hash: hash, at: Instant::now() });
        Ok(TickOutcome::Unchanged)
    }

    fn apply_deterministic(&self, pane: &crate::pane::Pane, analysis: PatternAnalysis) -> TickOutcome {
        match analysis {
            PatternAnalysis::InProgress => {
                self.store.update_pane_status(
                    &pane.id,
                    PaneStatusUpdate {
                        agent_status: Some(AgentStatus::Working),
                        options_question: Some(None),
                        options: Some(Vec::new()),
                        ..Default::default()
                    },
                );
                TickOutcome::Working
            }
            PatternAnalysis::OptionDialog { question, options } => {
                if pane.autopilot
                    && !question_is_risky(&question)
                    && let Some(default_option) = options.first()
                {
                    info!(
                        pane_id = %pane.id,
                        action = %default_option.action,
                        "worker:autopilot advancing deterministic option dialog"
                    );
                    for key in &default_option.keys {
                        let _ = self.tmux.send_key(&pane.terminal_pane_id, key);
                    }
                    self.store.update_pane_status(
                        &pane.id,
                        PaneStatusUpdate {
                            agent_status: Some(AgentStatus::Working),
                            options_question: Some(None),
                            options: Some(Vec::new()),
                            ..Default::default()
                        },
                    );
                    return TickOutcome::AutopilotAdvanced {
                        action: default_option.action.clone(),
                    };
                }

                self.store.update_pane_status(
                    &pane.id,
                    PaneStatusUpdate {
                        agent_status: Some(AgentStatus::Waiting),
                        options_question: Some(Some(question.clone())),
                        options: Some(options.clone()),
                        ..Default::default()
                    },
                );
                TickOutcome::Waiting { question, options }
            }
            PatternAnalysis::OpenPrompt => {
                self.store.update_pane_status(
                    &pane.id,
                    PaneStatusUpdate {
                        agent_status: Some(AgentStatus::Idle),
                        options_question: Some(None),
                        options: Some(Vec::new()),
                        ..Default::default()
                    },
                );
                TickOutcome::Idle { summary: None }
            }
        }
    }

    /// LLM-derived classifications are display-only: autopilot never fires
    /// here even if `state == "option_dialog"` and the pane has autopilot
    /// enabled (spec.md §4.5.3, load-bearing).
    fn apply_llm(&self, pane_id: &str, analysis: LlmAnalysis) -> TickOutcome {
        let status = match analysis.state.as_str() {
            "working" | "in_progress" => AgentStatus::Working,
            "option_dialog" | "waiting" => AgentStatus::Waiting,
            "idle" => AgentStatus::Idle,
            _ => AgentStatus::Analyzing,
        };

        let options: Vec<PaneOption> = analysis
            .options
            .iter()
            .map(|o| PaneOption {
                action: o.action.clone(),
                keys: o.keys.clone(),
            })
            .collect();

        let harm = analysis.potential_harm.clone().map(|h| PotentialHarm {
            has_risk: h.has_risk,
            description: h.description,
        });

        self.store.update_pane_status(
            pane_id,
            PaneStatusUpdate {
                agent_status: Some(status),
                options_question: Some(analysis.question.clone()),
                options: Some(options.clone()),
                potential_harm: Some(harm),
                agent_summary: Some(analysis.summary.clone()),
            },
        );

        match status {
            AgentStatus::Working => TickOutcome::Working,
            AgentStatus::Waiting => TickOutcome::Waiting {
                question: analysis.question.unwrap_or_default(),
                options,
            },
            _ => TickOutcome::Idle { summary: analysis.summary },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentHarness;
    use crate::pane::PaneKind;
    use std::path::PathBuf;

    struct NoHarness;
    impl AgentHarness for NoHarness {
        fn run(&self, _prompt: &str, _deadline: Duration) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
    }

    fn sample_pane(autopilot: bool) -> crate::pane::Pane {
        crate::pane::Pane {
            id: "pane-1".into(),
            slug: "fix-login".into(),
            kind: PaneKind::Worktree,
            prompt: String::new(),
            terminal_pane_id: "%1".into(),
            worktree_path: None,
            agent: Some("claude".into()),
            project_root: PathBuf::from("/tmp/proj"),
            project_name: "proj".into(),
            agent_status: AgentStatus::Unknown,
            options_question: None,
            options: Vec::new(),
            potential_harm: None,
            agent_summary: None,
            autopilot,
            dev_window_id: None,
            test_window_id: None,
            dev_status: None,
            test_status: None,
            dev_url: None,
            orphaned: false,
        }
    }

    fn worker_for_store(store: Arc<StateStore>) -> PaneWorker {
        PaneWorker::new(
            "pane-1".into(),
            Arc::new(TmuxService::new()),
            store,
            Arc::new(LlmAnalyzer::new(vec![Arc::new(NoHarness)])),
        )
    }

    #[test]
    fn question_is_risky_matches_danger_keywords_case_insensitively() {
        assert!(question_is_risky("Delete all uncommitted changes? [y/n]"));
        assert!(question_is_risky("Force push to origin/main? [y/n]"));
        assert!(!question_is_risky("Run the test suite now? [y/n]"));
    }

    #[test]
    fn llm_option_dialog_never_marks_autopilot_advanced() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::load(dir.path()).unwrap();
        store.apply_panes(vec![sample_pane(true)]).unwrap();
        let worker = worker_for_store(store.clone());

        let analysis = LlmAnalysis {
            state: "option_dialog".into(),
            question: Some("Proceed?".into()),
            options: vec![llm::LlmOption { action: "Yes".into(), keys: vec!["y".into()] }],
            potential_harm: Some(PotentialHarm { has_risk: false, description: None }),
            summary: None,
        };

        let outcome = worker.apply_llm("pane-1", analysis);
        assert!(matches!(outcome, TickOutcome::Waiting { .. }));
        assert_eq!(store.get_pane("pane-1").unwrap().agent_status, AgentStatus::Waiting);
    }

    #[test]
    fn deterministic_option_dialog_with_autopilot_advances() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::load(dir.path()).unwrap();
        store.apply_panes(vec![sample_pane(true)]).unwrap();
        let worker = worker_for_store(store.clone());
        let pane = store.get_pane("pane-1").unwrap();

        let analysis = PatternAnalysis::OptionDialog {
            question: "Proceed?".into(),
            options: vec![PaneOption { action: "Yes".into(), keys: vec!["Enter".into()] }],
        };

        // send_key will fail against a nonexistent tmux pane, which is fine:
        // the autopilot decision and status update happen regardless.
        let outcome = worker.apply_deterministic(&pane, analysis);
        assert!(matches!(outcome, TickOutcome::AutopilotAdvanced { .. }));
    }

    #[test]
    fn deterministic_option_dialog_with_dangerous_question_never_autopilots() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::load(dir.path()).unwrap();
        store.apply_panes(vec![sample_pane(true)]).unwrap();
        let worker = worker_for_store(store.clone());
        let pane = store.get_pane("pane-1").unwrap();

        let analysis = PatternAnalysis::OptionDialog {
            question: "Delete all uncommitted changes? [y/n]".into(),
            options: vec![PaneOption { action: "Yes".into(), keys: vec!["y".into(), "Enter".into()] }],
        };

        let outcome = worker.apply_deterministic(&pane, analysis);
        assert!(matches!(outcome, TickOutcome::Waiting { .. }));
        assert_eq!(store.get_pane("pane-1").unwrap().agent_status, AgentStatus::Waiting);
    }

    #[test]
    fn deterministic_option_dialog_without_autopilot_waits_for_human() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::load(dir.path()).unwrap();
        store.apply_panes(vec![sample_pane(false)]).unwrap();
        let worker = worker_for_store(store.clone());
        let pane = store.get_pane("pane-1").unwrap();

        let analysis = PatternAnalysis::OptionDialog {
            question: "Proceed?".into(),
            options: vec![PaneOption { action: "Yes".into(), keys: vec!["Enter".into()] }],
        };

        let outcome = worker.apply_deterministic(&pane, analysis);
        assert!(matches!(outcome, TickOutcome::Waiting { .. }));
        assert_eq!(store.get_pane("pane-1").unwrap().agent_status, AgentStatus::Waiting);
    }
}

//! The deterministic pattern analyzer (spec.md §4.5.2): the only component
//! in this crate permitted to drive autopilot keystrokes. Terminal content
//! is untrusted, so this table stays narrow and regex-based rather than
//! reaching for anything that interprets the content as instructions.
//!
//! Grounded on `agent_setup::claude`'s hook-detection regexes in the
//! workmux lineage, generalized into the three-class result spec.md names.

use std::sync::LazyLock;

use regex::Regex;

use crate::pane::PaneOption;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternAnalysis {
    InProgress,
    OptionDialog { question: String, options: Vec<PaneOption> },
    OpenPrompt,
}

struct AgentPatterns {
    agent: &'static str,
    working: &'static [&'static str],
    /// `(question_marker_regex, options)` — when the marker matches, this
    /// fixed option set is reported. Real agents' numbered menus vary in
    /// wording but converge on a handful of shapes per CLI.
    option_dialogs: &'static [(&'static str, &'static [(&'static str, &'static [&'static str])])],
    open_prompt: &'static [&'static str],
}

const CLAUDE: AgentPatterns = AgentPatterns {
    agent: "claude",
    working: &[r"esc to interrupt", r"\besc\b.*interrupt"],
    option_dialogs: &[(
        r"(?i)do you want to proceed\?",
        &[("Yes", &["1", "Enter"]), ("Yes, and don't ask again", &["2", "Enter"]), ("No", &["3", "Enter"])],
    )],
    open_prompt: &[r"^>\s*$", r"Human:\s*$"],
};

const CODEX: AgentPatterns = AgentPatterns {
    agent: "codex",
    working: &[r"Thinking", r"Working"],
    option_dialogs: &[(
        r"(?i)allow this (command|action)\?",
        &[("Allow", &["y", "Enter"]), ("Deny", &["n", "Enter"])],
    )],
    open_prompt: &[r"^›\s*$", r"^>\s*$"],
};

const OPENCODE: AgentPatterns = AgentPatterns {
    agent: "opencode",
    working: &[r"Generating", r"spinner"],
    option_dialogs: &[(r"(?i)\[y/n\]", &[("Yes", &["y", "Enter"]), ("No", &["n", "Enter"])])],
    open_prompt: &[r"^>\s*$"],
};

const GENERIC: AgentPatterns = AgentPatterns {
    agent: "generic",
    working: &[r"esc to interrupt"],
    option_dialogs: &[(r"(?i)\[y/n\]", &[("Yes", &["y", "Enter"]), ("No", &["n", "Enter"])])],
    open_prompt: &[r"^>\s*$"],
};

const TABLES: &[AgentPatterns] = &[CLAUDE, CODEX, OPENCODE, GENERIC];

fn table_for(agent: Option<&str>) -> &'static AgentPatterns {
    match agent {
        Some(name) => TABLES.iter().find(|t| t.agent == name).unwrap_or(&GENERIC),
        None => &GENERIC,
    }
}

struct CompiledTable {
    working: Vec<Regex>,
    option_dialogs: Vec<(Regex, Vec<PaneOption>)>,
    open_prompt: Vec<Regex>,
}

fn compile(table: &AgentPatterns) -> CompiledTable {
    CompiledTable {
        working: table.working.iter().map(|p| Regex::new(p).expect("static pattern")).collect(),
        option_dialogs: table
            .option_dialogs
            .iter()
            .map(|(marker, opts)| {
                let re = Regex::new(marker).expect("static pattern");
                let options = opts
                    .iter()
                    .map(|(action, keys)| PaneOption {
                        action: action.to_string(),
                        keys: keys.iter().map(|k| k.to_string()).collect(),
                    })
                    .collect();
                (re, options)
            })
            .collect(),
        open_prompt: table.open_prompt.iter().map(|p| Regex::new(p).expect("static pattern")).collect(),
    }
}

static COMPILED: LazyLock<Vec<CompiledTable>> = LazyLock::new(|| TABLES.iter().map(compile).collect());

fn compiled_for(agent: Option<&str>) -> &'static CompiledTable {
    let table = table_for(agent);
    let idx = TABLES.iter().position(|t| t.agent == table.agent).unwrap_or(TABLES.len() - 1);
    &COMPILED[idx]
}

/// Classify the last ~15 lines of a pane's rendered buffer (spec.md §4.5.2).
/// `None` means "no deterministic match", the caller should fall through to
/// the LLM analyzer.
pub fn analyze(agent: Option<&str>, last_lines: &[&str]) -> Option<PatternAnalysis> {
    let joined = last_lines.join("\n");
    let compiled = compiled_for(agent);

    if compiled.working.iter().any(|re| re.is_match(&joined)) {
        return Some(PatternAnalysis::InProgress);
    }

    for (re, options) in &compiled.option_dialogs {
        if re.is_match(&joined) {
            let question = last_lines
                .iter()
                .find(|l| re.is_match(l))
                .map(|l| l.trim().to_string())
                .unwrap_or_default();
            return Some(PatternAnalysis::OptionDialog {
                question,
                options: options.clone(),
            });
        }
    }

    if compiled.open_prompt.iter().any(|re| last_lines.last().is_some_and(|l| re.is_match(l))) {
        return Some(PatternAnalysis::OpenPrompt);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_working_indicator_matches() {
        let lines = vec!["some output", "(esc to interrupt)"];
        assert_eq!(analyze(Some("claude"), &lines), Some(PatternAnalysis::InProgress));
    }

    #[test]
    fn claude_proceed_dialog_extracts_options() {
        let lines = vec!["Do you want to proceed?", "1. Yes", "2. Yes, and don't ask again", "3. No"];
        let result = analyze(Some("claude"), &lines);
        match result {
            Some(PatternAnalysis::OptionDialog { options, .. }) => {
                assert_eq!(options.len(), 3);
                assert_eq!(options[0].action, "Yes");
            }
            other => panic!("expected option dialog, got {other:?}"),
        }
    }

    #[test]
    fn unknown_agent_falls_back_to_generic_table() {
        let lines = vec!["waiting...", "[y/n]"];
        let result = analyze(Some("some-future-agent"), &lines);
        assert!(matches!(result, Some(PatternAnalysis::OptionDialog { .. })));
    }

    #[test]
    fn no_match_returns_none() {
        let lines = vec!["building project...", "compiling foo v0.1.0"];
        assert_eq!(analyze(Some("claude"), &lines), None);
    }

    #[test]
    fn bare_prompt_is_open_prompt() {
        let lines = vec!["previous output", ">"];
        assert_eq!(analyze(Some("codex"), &lines), Some(PatternAnalysis::OpenPrompt));
    }
}

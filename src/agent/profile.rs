//! Per-agent profiles: the open, enumerated set of supported agent names
//! (spec.md §3 `agent` field) plus their launch command and model-tier map.
//!
//! Grounded on `agent_setup::Agent`'s enum-with-serde-rename shape in the
//! workmux lineage, generalized to an open registry (spec.md: "one of an
//! open, enumerated set") rather than a closed two-variant enum.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    pub launch_command: String,
    pub cheap_model: Option<String>,
    pub mid_model: Option<String>,
}

impl AgentProfile {
    pub fn launch_command_for(&self, permission_mode: &str) -> String {
        match permission_mode {
            "yolo" => format!("{} --dangerously-skip-permissions", self.launch_command),
            "plan" => format!("{} --permission-mode plan", self.launch_command),
            _ => self.launch_command.clone(),
        }
    }
}

pub fn builtin_profiles() -> Vec<AgentProfile> {
    vec![
        AgentProfile {
            name: "claude".into(),
            launch_command: "claude".into(),
            cheap_model: Some("claude-haiku".into()),
            mid_model: Some("claude-sonnet".into()),
        },
        AgentProfile {
            name: "opencode".into(),
            launch_command: "opencode".into(),
            cheap_model: None,
            mid_model: None,
        },
        AgentProfile {
            name: "codex".into(),
            launch_command: "codex".into(),
            cheap_model: Some("gpt-5-mini".into()),
            mid_model: Some("gpt-5".into()),
        },
    ]
}

pub fn resolve(name: &str) -> AgentProfile {
    builtin_profiles()
        .into_iter()
        .find(|p| p.name == name)
        .unwrap_or(AgentProfile {
            name: name.to_string(),
            launch_command: name.to_string(),
            cheap_model: None,
            mid_model: None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_agent_falls_back_to_its_own_name_as_command() {
        let p = resolve("some-future-agent");
        assert_eq!(p.launch_command, "some-future-agent");
    }

    #[test]
    fn yolo_mode_adds_skip_permissions_flag() {
        let p = resolve("claude");
        assert!(p.launch_command_for("yolo").contains("--dangerously-skip-permissions"));
    }
}

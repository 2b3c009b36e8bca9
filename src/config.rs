//! Loading and persisting the two-scope settings map plus the pane snapshot
//! file path conventions from spec.md §6.
//!
//! Grounded on `config::Config`'s file-discovery shape in the workmux
//! lineage, narrowed from YAML to JSON (spec.md §6 names `.json` files
//! explicitly) and split into global (`~/.dmux.global.json`) and project
//! (`<project>/.dmux/settings.json`) scopes instead of a single file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

use crate::pane::{LayeredSettings, SettingsMap};

pub const DMUX_DIR: &str = ".dmux";
pub const CONFIG_FILE: &str = "dmux.config.json";
pub const PROJECT_SETTINGS_FILE: &str = "settings.json";

pub fn dmux_dir(project_root: &Path) -> PathBuf {
    project_root.join(DMUX_DIR)
}

pub fn worktrees_dir(project_root: &Path) -> PathBuf {
    dmux_dir(project_root).join("worktrees")
}

pub fn pane_config_path(project_root: &Path) -> PathBuf {
    dmux_dir(project_root).join(CONFIG_FILE)
}

pub fn project_settings_path(project_root: &Path) -> PathBuf {
    dmux_dir(project_root).join(PROJECT_SETTINGS_FILE)
}

pub fn global_settings_path() -> Result<PathBuf> {
    let home = home::home_dir().context("could not determine home directory")?;
    Ok(home.join(".dmux.global.json"))
}

fn load_map(path: &Path) -> Result<SettingsMap> {
    if !path.exists() {
        return Ok(SettingsMap::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file at {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(SettingsMap::default());
    }
    let values: HashMap<String, Value> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse settings file at {}", path.display()))?;
    Ok(SettingsMap { values })
}

fn save_map(path: &Path, map: &SettingsMap) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create settings directory at {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(&map.values)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).context("failed to write temp settings file")?;
    fs::rename(&tmp, path).context("failed to atomically replace settings file")?;
    Ok(())
}

pub fn load_settings(project_root: &Path) -> Result<LayeredSettings> {
    let global = global_settings_path()
        .ok()
        .map(|p| load_map(&p))
        .transpose()?
        .unwrap_or_default();
    let project = load_map(&project_settings_path(project_root))?;
    Ok(LayeredSettings { global, project })
}

pub fn set_setting(project_root: &Path, scope: Scope, key: &str, value: Value) -> Result<()> {
    let path = match scope {
        Scope::Global => global_settings_path()?,
        Scope::Project => project_settings_path(project_root),
    };
    let mut map = load_map(&path)?;
    map.values.insert(key.to_string(), value);
    save_map(&path, &map)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Project,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_settings_file_yields_empty_map() {
        let dir = tempdir().unwrap();
        let settings = load_map(&dir.path().join("nope.json")).unwrap();
        assert!(settings.values.is_empty());
    }

    #[test]
    fn set_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut map = SettingsMap::default();
        map.values.insert("defaultAgent".into(), Value::String("claude".into()));
        save_map(&path, &map).unwrap();

        let loaded = load_map(&path).unwrap();
        assert_eq!(loaded.values.get("defaultAgent").unwrap(), "claude");
    }

    #[test]
    fn project_overrides_global() {
        let mut global = SettingsMap::default();
        global.values.insert("defaultAgent".into(), Value::String("opencode".into()));
        let mut project = SettingsMap::default();
        project.values.insert("defaultAgent".into(), Value::String("claude".into()));

        let layered = LayeredSettings { global, project };
        assert_eq!(layered.default_agent(), Some("claude"));
    }

    #[test]
    fn falls_back_to_global_when_project_silent() {
        let mut global = SettingsMap::default();
        global.values.insert("branchPrefix".into(), Value::String("feature/".into()));
        let layered = LayeredSettings {
            global,
            project: SettingsMap::default(),
        };
        assert_eq!(layered.branch_prefix(), "feature/");
    }
}

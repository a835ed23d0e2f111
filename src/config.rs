//! Session and stage configuration.
//!
//! Loaded from camelCase JSON. Every field except stage names has a
//! default, so a minimal file only lists its stages.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::sync_policy::{Role, SyncMode, SyncTimings};
use crate::vocabulary::CommandVocabulary;

fn default_role() -> Role {
    Role::Master
}

fn default_mode() -> SyncMode {
    SyncMode::StepSwitching
}

/// Default board edge length for grid avatars.
fn default_grid_size() -> i32 {
    6
}

/// One playable stage: a problem statement, a map, and the script each
/// side starts from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageConfig {
    pub name: String,

    /// Problem text shown to the players.
    #[serde(default)]
    pub problem: String,

    /// Name of the map scene.
    #[serde(default)]
    pub map: String,

    #[serde(default)]
    pub master_script: Option<PathBuf>,

    #[serde(default)]
    pub slave_script: Option<PathBuf>,

    /// Whether the stage is driven with arrow keys instead of scripts.
    #[serde(default)]
    pub arrow_keys: bool,

    /// Whether the developer panel is shown.
    #[serde(default)]
    pub developer_panel: bool,

    /// Trap cells on the grid, as `[x, z]` pairs.
    #[serde(default)]
    pub traps: Vec<[i32; 2]>,
}

impl StageConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            problem: String::new(),
            map: String::new(),
            master_script: None,
            slave_script: None,
            arrow_keys: false,
            developer_panel: false,
            traps: Vec::new(),
        }
    }

    /// The script this role starts from, if the stage has one.
    pub fn script_for(&self, role: Role) -> Option<&Path> {
        match role {
            Role::Master => self.master_script.as_deref(),
            Role::Slave => self.slave_script.as_deref(),
        }
    }

    pub fn trap_cells(&self) -> Vec<(i32, i32)> {
        self.traps.iter().map(|[x, z]| (*x, *z)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default = "default_role")]
    pub role: Role,

    #[serde(default = "default_mode")]
    pub mode: SyncMode,

    #[serde(default)]
    pub timings: SyncTimings,

    #[serde(default)]
    pub vocabulary: CommandVocabulary,

    #[serde(default = "default_grid_size")]
    pub grid_size: i32,

    #[serde(default)]
    pub stages: Vec<StageConfig>,

    /// Directory relative script paths resolve against. Set by `from_file`.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: default_role(),
            mode: default_mode(),
            timings: SyncTimings::default(),
            vocabulary: CommandVocabulary::default(),
            grid_size: default_grid_size(),
            stages: Vec::new(),
            base_dir: PathBuf::new(),
        }
    }
}

impl SessionConfig {
    /// Load a session config from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {:?}: {}", path, e))?;
        let mut config: SessionConfig = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {:?}: {}", path, e))?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.timings.validate()?;
        self.vocabulary.validate()?;
        if self.grid_size <= 0 {
            return Err("Grid size must be positive".to_string());
        }
        let mut names = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err("Stage name cannot be empty".to_string());
            }
            if !names.insert(stage.name.as_str()) {
                return Err(format!("Duplicate stage name: {}", stage.name));
            }
        }
        Ok(())
    }

    pub fn stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Resolve a stage script path against the config directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"stages":[{"name":"Puzzle1"}]}"#).unwrap();
        assert_eq!(config.role, Role::Master);
        assert_eq!(config.mode, SyncMode::StepSwitching);
        assert_eq!(config.timings, SyncTimings::default());
        assert_eq!(config.timings.step_timeout, 3.0);
        assert_eq!(config.timings.command_timeout, 100.0);
        assert_eq!(config.vocabulary, CommandVocabulary::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stage_fields() {
        let json = r#"{
            "role": "slave",
            "mode": "cmd_switching",
            "timings": { "stepTimeout": 5.0 },
            "stages": [{
                "name": "Puzzle1",
                "problem": "Meet in the middle",
                "map": "Map1",
                "masterScript": "scripts/OgScript-Puzzle1-M.txt",
                "arrowKeys": true,
                "traps": [[2, 3]]
            }]
        }"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.role, Role::Slave);
        assert_eq!(config.mode, SyncMode::CmdSwitching);
        assert_eq!(config.timings.step_timeout, 5.0);
        assert_eq!(config.timings.command_delay, 0.5);

        let stage = config.stage("Puzzle1").unwrap();
        assert!(stage.arrow_keys);
        assert!(!stage.developer_panel);
        assert_eq!(stage.trap_cells(), vec![(2, 3)]);
        assert_eq!(
            stage.script_for(Role::Master),
            Some(Path::new("scripts/OgScript-Puzzle1-M.txt"))
        );
        assert_eq!(stage.script_for(Role::Slave), None);
    }

    #[test]
    fn test_validate_rejects_duplicate_stages() {
        let config = SessionConfig {
            stages: vec![StageConfig::new("A"), StageConfig::new("A")],
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("Duplicate"));
    }

    #[test]
    fn test_validate_rejects_bad_timings() {
        let mut config = SessionConfig::default();
        config.timings.wait_quantum = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_undeclared_wait_command() {
        let mut config = SessionConfig::default();
        config.vocabulary.wait_command = "Sleep".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_relative_paths() {
        let config = SessionConfig {
            base_dir: PathBuf::from("config"),
            ..Default::default()
        };
        assert_eq!(
            config.resolve(Path::new("a.txt")),
            PathBuf::from("config").join("a.txt")
        );
    }
}

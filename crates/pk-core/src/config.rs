//! Bridge configuration (pokelink.toml)
//!
//! Lookup order:
//! 1. explicit path passed by the caller
//! 2. `POKELINK_CONFIG` environment variable
//! 3. `./pokelink.toml`
//! 4. built-in defaults
//!
//! Configuration and layout problems are the only errors allowed to stop
//! the bridge, and only at startup.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::command::DEFAULT_MAX_HOLD_FRAMES;
use crate::error::ConfigError;
use crate::layout::{FieldSpec, GameVersion, Layout, LayoutMap};
use crate::rules::{EvolutionRule, DEFAULT_RULE_INTERVAL};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "POKELINK_CONFIG";

/// Config file looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "pokelink.toml";

/// Complete bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub mailbox: MailboxConfig,
    pub emulator: EmulatorConfig,
    pub agent: AgentConfig,
    pub rules: Vec<EvolutionRule>,
    pub layout: LayoutConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mailbox: MailboxConfig::default(),
            emulator: EmulatorConfig::default(),
            agent: AgentConfig::default(),
            rules: EvolutionRule::trade_evolutions(),
            layout: LayoutConfig::default(),
        }
    }
}

/// Where the mailbox documents live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    pub directory: PathBuf,
    pub snapshot_file: String,
    pub action_file: String,
    pub reset_file: String,
    pub memory_edit_file: String,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            directory: default_mailbox_dir(),
            snapshot_file: "emulator_state.json".into(),
            action_file: "input_command.json".into(),
            reset_file: "reset_command.json".into(),
            memory_edit_file: "memory_edit.json".into(),
        }
    }
}

impl MailboxConfig {
    /// All four mailboxes inside `directory` with the default file names
    pub fn in_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.directory.join(&self.snapshot_file)
    }

    pub fn action_path(&self) -> PathBuf {
        self.directory.join(&self.action_file)
    }

    pub fn reset_path(&self) -> PathBuf {
        self.directory.join(&self.reset_file)
    }

    pub fn memory_edit_path(&self) -> PathBuf {
        self.directory.join(&self.memory_edit_file)
    }
}

/// Default mailbox directory under the user's local data dir
pub fn default_mailbox_dir() -> PathBuf {
    let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("pokelink");
    path.push("mailbox");
    path
}

/// Emulator-side loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Hold duration when an action command has no usable `frames`
    pub default_hold_frames: u32,
    /// Longest hold one action may request; longer requests are clamped
    pub max_hold_frames: u32,
    /// Press A whenever a new text box opens and no command is pending
    pub auto_advance: bool,
    pub auto_advance_frames: u32,
    /// Frames between forced-evolution passes
    pub rule_interval_frames: u64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            default_hold_frames: 8,
            max_hold_frames: DEFAULT_MAX_HOLD_FRAMES,
            auto_advance: false,
            auto_advance_frames: 1,
            rule_interval_frames: DEFAULT_RULE_INTERVAL,
        }
    }
}

/// Agent-side loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub frames_per_action: u32,
    /// Save state slot holding the training checkpoint
    pub save_slot: u8,
    /// Snapshot frame unchanged for this long means the bridge is stale
    pub stale_after_ms: u64,
    pub decision_interval_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            frames_per_action: 4,
            save_slot: 1,
            stale_after_ms: 5_000,
            decision_interval_ms: 120,
        }
    }
}

/// Memory layout selection plus per-field overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub version: GameVersion,
    pub slot_stride: Option<u16>,
    pub overrides: HashMap<String, FieldSpec>,
}

impl BridgeConfig {
    /// Load using the lookup order above and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match find_config_file()? {
                Some(path) => Self::from_file(&path),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.emulator.default_hold_frames == 0 {
            return Err(ConfigError::Invalid(
                "emulator.default_hold_frames must be positive".into(),
            ));
        }
        if self.emulator.max_hold_frames < self.emulator.default_hold_frames {
            return Err(ConfigError::Invalid(format!(
                "emulator.max_hold_frames ({}) is below default_hold_frames ({})",
                self.emulator.max_hold_frames, self.emulator.default_hold_frames
            )));
        }
        if self.emulator.auto_advance_frames == 0 {
            return Err(ConfigError::Invalid(
                "emulator.auto_advance_frames must be positive".into(),
            ));
        }
        if self.emulator.rule_interval_frames == 0 {
            return Err(ConfigError::Invalid(
                "emulator.rule_interval_frames must be positive".into(),
            ));
        }
        if self.agent.frames_per_action == 0 {
            return Err(ConfigError::Invalid(
                "agent.frames_per_action must be positive".into(),
            ));
        }
        if self.agent.save_slot == 0 {
            return Err(ConfigError::Invalid("agent.save_slot must be positive".into()));
        }
        for rule in &self.rules {
            if rule.trigger == rule.replacement {
                return Err(ConfigError::Invalid(format!(
                    "rule for species {} replaces it with itself",
                    rule.trigger
                )));
            }
        }
        self.layout()?;
        Ok(())
    }

    /// Built-in layout with overrides applied, fully validated.
    pub fn layout(&self) -> Result<Layout, ConfigError> {
        let mut map = LayoutMap::builtin(self.layout.version).with_overrides(&self.layout.overrides)?;
        if let Some(stride) = self.layout.slot_stride {
            map.set_slot_stride(stride);
        }
        Ok(map.resolve()?)
    }
}

/// Config file from `POKELINK_CONFIG` or the working directory.
///
/// A `POKELINK_CONFIG` pointing at a missing file is an error rather than a
/// silent fallback to defaults.
pub fn find_config_file() -> Result<Option<PathBuf>, ConfigError> {
    if let Ok(env_path) = env::var(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        return if path.exists() {
            Ok(Some(path))
        } else {
            Err(ConfigError::NotFound(path))
        };
    }
    let local = PathBuf::from(CONFIG_FILE_NAME);
    Ok(local.exists().then_some(local))
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::{mlog_debug, Error, Result};

fn default_max_in_flight() -> usize {
    4
}

fn default_approval_ratio() -> f64 {
    0.7
}

fn default_max_retries() -> u32 {
    2
}

fn default_consensus_deadline_ms() -> u64 {
    30_000
}

fn default_pattern_size_limit() -> usize {
    1 << 16
}

/// Policy knobs for the orchestration core.
///
/// The consensus threshold and pattern limits are deliberately configuration
/// rather than constants: different hosts tune them differently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Maximum number of workflow steps dispatched concurrently per run.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Fraction of consensus participants that must approve (required
    /// approvals = ceil(ratio * participants)).
    #[serde(default = "default_approval_ratio")]
    pub approval_ratio: f64,
    /// Default retry budget for a failing workflow step.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Default consensus deadline in milliseconds.
    #[serde(default = "default_consensus_deadline_ms")]
    pub consensus_deadline_ms: u64,
    /// Compiled-size cap for learned rule patterns. Learned patterns are
    /// untrusted input; anything larger is rejected at promotion time.
    #[serde(default = "default_pattern_size_limit")]
    pub pattern_size_limit: usize,
    /// Override for the rule persistence file.
    pub rules_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            approval_ratio: default_approval_ratio(),
            max_retries: default_max_retries(),
            consensus_deadline_ms: default_consensus_deadline_ms(),
            pattern_size_limit: default_pattern_size_limit(),
            rules_path: None,
        }
    }
}

impl Config {
    pub fn maestro_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".maestro"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::maestro_dir()?.join("maestro.toml"))
    }

    /// Default location of the persisted rule store.
    pub fn rules_file(&self) -> Result<PathBuf> {
        match &self.rules_path {
            Some(path) => Ok(expand_tilde(path)),
            None => Ok(Self::maestro_dir()?.join("rules.json")),
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        mlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            mlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        mlog_debug!(
            "Config loaded: max_in_flight={}, approval_ratio={}, max_retries={}",
            config.max_in_flight,
            config.approval_ratio,
            config.max_retries
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let maestro_dir = Self::maestro_dir()?;
        if !maestro_dir.exists() {
            mlog_debug!("Creating maestro directory: {}", maestro_dir.display());
            fs::create_dir_all(&maestro_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        mlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn ensure_dirs() -> Result<()> {
        let maestro_dir = Self::maestro_dir()?;
        if !maestro_dir.exists() {
            fs::create_dir_all(&maestro_dir)?;
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

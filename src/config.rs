use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{alog_debug, Error, Result};

/// Scheduler limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum tasks a single team may have in flight at once.
    pub max_concurrent_per_team: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_team: 1,
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_concurrent(max: usize) -> Self {
        Self {
            max_concurrent_per_team: max.max(1),
        }
    }
}

/// Validation gate settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Minimum overall quality score for technical review.
    pub threshold: f64,
    /// Rejections allowed before a task fails.
    pub max_retries: u32,
    /// Fraction of requirements a deliverable must cover in business review.
    pub min_coverage: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            max_retries: 3,
            min_coverage: 0.8,
        }
    }
}

impl ValidationConfig {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold,
            ..Default::default()
        }
    }
}

/// Weights of the three quality checks. Normalized when scoring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScorerWeights {
    pub grounding: f64,
    pub consistency: f64,
    pub completeness: f64,
}

impl Default for ScorerWeights {
    fn default() -> Self {
        Self {
            grounding: 0.5,
            consistency: 0.3,
            completeness: 0.2,
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound for a single team call.
    pub team_timeout_secs: u64,
    /// Team that receives escalations and unrouted help requests.
    pub escalation_team: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            team_timeout_secs: 600,
            escalation_team: "architecture".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn team_timeout(&self) -> Duration {
        Duration::from_secs(self.team_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// TOML file with extra accepted terms per domain.
    pub knowledge_file: Option<String>,
    /// Where project snapshots are written. Defaults to ~/.agency/projects.
    pub projects_dir: Option<String>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub scorer: ScorerWeights,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Team id to the command line that runs it.
    #[serde(default)]
    pub teams: BTreeMap<String, String>,
}

impl Config {
    pub fn agency_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".agency"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::agency_dir()?.join("agency.toml"))
    }

    pub fn projects_dir(&self) -> Result<PathBuf> {
        match &self.projects_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::agency_dir()?.join("projects")),
        }
    }

    pub fn knowledge_path(&self) -> Option<PathBuf> {
        self.knowledge_file.as_deref().map(expand_tilde)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from an explicit path, falling back to defaults if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        alog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            alog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        alog_debug!(
            "Config loaded: threshold={}, max_retries={}, teams={}",
            config.validation.threshold,
            config.validation.max_retries,
            config.teams.len()
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let agency_dir = Self::agency_dir()?;
        if !agency_dir.exists() {
            alog_debug!("Creating agency directory");
            fs::create_dir_all(&agency_dir)?;
        }
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        alog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

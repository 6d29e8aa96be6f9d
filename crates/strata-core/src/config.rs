//! Orchestrator configuration
//!
//! Loaded from `strata.toml` at the repository root. Every field has a
//! default, so a missing file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strata_artifact::{tag_set, Tag, TagSet};
use strata_delta::{DeltaConfig, DeltaError};
use strata_dispatch::{BudgetConfig, RetryPolicy};

/// Default configuration file name
pub const CONFIG_FILE: &str = "strata.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    /// Delta Engine thresholds
    pub delta: DeltaConfig,
    /// Estimator constants and capacity ceilings
    pub budget: BudgetConfig,
    /// Worker retry policy
    pub retry: RetryPolicy,
    /// Deduplication
    pub dedup: DedupSettings,
    /// Lineage tracking
    pub lineage: LineageSettings,
    /// Verification subsystem
    pub verification: VerificationSettings,
    /// Run-level settings
    pub run: RunSettings,
    /// External worker process
    pub worker: WorkerSettings,
    /// Configured focus areas
    pub focus: Vec<FocusArea>,
    /// Knowledge references handed to workers
    pub reference: Vec<ReferenceSource>,
    /// Path prefixes restricting the tracked set (empty = everything)
    pub include: Vec<String>,
}

/// `[dedup]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    /// Minimum share of proposed novel hypotheses always preserved, in percent
    pub novel_floor_percent: u32,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self { novel_floor_percent: 20 }
    }
}

/// `[lineage]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineageSettings {
    /// Findings whose consecutive-run streak exceeds this are flagged
    pub persistence_threshold: u32,
}

impl Default for LineageSettings {
    fn default() -> Self {
        Self {
            persistence_threshold: 2,
        }
    }
}

/// `[verification]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSettings {
    /// Verify unchanged regions instead of re-analyzing them
    pub enabled: bool,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// How broad a run is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeTier {
    /// Few hypotheses per focus area
    Quick,
    /// Default
    #[default]
    Standard,
    /// No cap on hypotheses
    Deep,
}

impl ScopeTier {
    /// Cap on investigated worker-proposed hypotheses per focus area
    #[must_use]
    pub fn max_hypotheses_per_focus(self) -> Option<usize> {
        match self {
            Self::Quick => Some(5),
            Self::Standard => Some(20),
            Self::Deep => None,
        }
    }
}

impl Display for ScopeTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Quick => "quick",
            Self::Standard => "standard",
            Self::Deep => "deep",
        };
        f.write_str(s)
    }
}

impl FromStr for ScopeTier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "standard" => Ok(Self::Standard),
            "deep" => Ok(Self::Deep),
            other => Err(ConfigError::Invalid(format!("unknown scope tier {other:?}"))),
        }
    }
}

/// `[run]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Scope tier
    pub scope: ScopeTier,
    /// Worker tier per phase (`analyze = "large"`)
    pub tiers: BTreeMap<String, String>,
}

/// `[worker]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Worker argv; the task is written to its stdin
    pub command: Vec<String>,
    /// Per-invocation timeout
    pub timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 600,
        }
    }
}

/// `[[focus]]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusArea {
    /// Focus area name
    pub name: String,
    /// Path prefixes belonging to it
    #[serde(default)]
    pub paths: Vec<String>,
}

impl FocusArea {
    /// True if `path` falls under one of the prefixes
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| path.starts_with(p.as_str()))
    }
}

/// `[[reference]]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSource {
    /// Reference name
    pub name: String,
    /// Path relative to the repository root
    pub path: PathBuf,
    /// Tags it serves; empty serves every task
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ReferenceSource {
    /// Tag set
    #[must_use]
    pub fn tag_set(&self) -> TagSet {
        tag_set(&self.tags)
    }

    /// True if the reference should accompany a task with these tags
    #[must_use]
    pub fn serves(&self, tags: &TagSet) -> bool {
        let own = self.tag_set();
        own.is_empty() || own.iter().any(|t| tags.contains(t))
    }
}

impl StrataConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a configuration file
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - `ConfigError::Parse` if it is not valid TOML for this schema
    /// - `ConfigError::Invalid` / `ConfigError::Delta` if validation fails
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `explicit` if given, else `<root>/strata.toml` if present, else defaults
    ///
    /// # Errors
    /// Same as [`StrataConfig::load`]; an explicit path must exist
    pub fn discover(root: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let default = root.join(CONFIG_FILE);
        if default.is_file() {
            Self::load(&default)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate thresholds and ceilings
    ///
    /// # Errors
    /// Returns the first violated constraint
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.delta.validate()?;
        let budget = &self.budget;
        if budget.task_ceiling <= budget.fixed_cost {
            return Err(ConfigError::Invalid(format!(
                "budget.task_ceiling ({}) must exceed budget.fixed_cost ({})",
                budget.task_ceiling, budget.fixed_cost
            )));
        }
        if budget.batch_ceiling < budget.task_ceiling {
            return Err(ConfigError::Invalid(format!(
                "budget.batch_ceiling ({}) must be at least budget.task_ceiling ({})",
                budget.batch_ceiling, budget.task_ceiling
            )));
        }
        if budget.max_batch_size == 0 {
            return Err(ConfigError::Invalid("budget.max_batch_size must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.dedup.novel_floor_percent > 100 {
            return Err(ConfigError::Invalid(format!(
                "dedup.novel_floor_percent ({}) must be at most 100",
                self.dedup.novel_floor_percent
            )));
        }
        let mut names = std::collections::BTreeSet::new();
        for focus in &self.focus {
            if focus.name.trim().is_empty() {
                return Err(ConfigError::Invalid("focus area with empty name".into()));
            }
            if !names.insert(Tag::focus(&focus.name)) {
                return Err(ConfigError::Invalid(format!("duplicate focus area {:?}", focus.name)));
            }
        }
        for reference in &self.reference {
            if let Some(bad) = reference.tags.iter().find(|t| Tag::new(t.as_str()).is_err()) {
                return Err(ConfigError::Invalid(format!(
                    "reference {:?} has invalid tag {bad:?}",
                    reference.name
                )));
            }
        }
        Ok(())
    }

    /// Worker tier configured for a phase
    #[must_use]
    pub fn tier_for(&self, phase: &str) -> Option<String> {
        self.run.tiers.get(phase).cloned()
    }

    /// With delta thresholds
    #[inline]
    #[must_use]
    pub fn with_delta(mut self, delta: DeltaConfig) -> Self {
        self.delta = delta;
        self
    }

    /// With budget
    #[inline]
    #[must_use]
    pub fn with_budget(mut self, budget: BudgetConfig) -> Self {
        self.budget = budget;
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// With novel floor
    #[inline]
    #[must_use]
    pub fn with_novel_floor(mut self, percent: u32) -> Self {
        self.dedup.novel_floor_percent = percent;
        self
    }

    /// With verification on or off
    #[inline]
    #[must_use]
    pub fn with_verification(mut self, enabled: bool) -> Self {
        self.verification.enabled = enabled;
        self
    }

    /// With scope tier
    #[inline]
    #[must_use]
    pub fn with_scope(mut self, scope: ScopeTier) -> Self {
        self.run.scope = scope;
        self
    }

    /// With worker command
    #[inline]
    #[must_use]
    pub fn with_worker_command(mut self, command: Vec<String>) -> Self {
        self.worker.command = command;
        self
    }

    /// With an additional focus area
    #[must_use]
    pub fn with_focus(mut self, name: impl Into<String>, paths: Vec<String>) -> Self {
        self.focus.push(FocusArea {
            name: name.into(),
            paths,
        });
        self
    }

    /// With an additional knowledge reference
    #[must_use]
    pub fn with_reference(mut self, name: impl Into<String>, path: impl Into<PathBuf>, tags: Vec<String>) -> Self {
        self.reference.push(ReferenceSource {
            name: name.into(),
            path: path.into(),
            tags,
        });
        self
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for the schema
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Delta thresholds out of range
    #[error(transparent)]
    Delta(#[from] DeltaError),

    /// Other constraint violated
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

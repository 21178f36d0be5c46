//! Tiering configuration.
//!
//! ## TOML format
//!
//! ```toml
//! compilation_threshold = 32
//! tiering_enabled = true
//! scheduler = "rayon"     # rayon | dedicated | deferred
//! compile_threads = 0     # dedicated pool size, 0 = one per CPU
//! ```
//!
//! Every key is optional. Environment variables override file values:
//!
//! | Variable | Key |
//! |---|---|
//! | `TIERED_LAMBDA_COMPILE_THRESHOLD` | `compilation_threshold` |
//! | `TIERED_LAMBDA_TIERING` | `tiering_enabled` (`true`/`false`/`1`/`0`) |
//! | `TIERED_LAMBDA_SCHEDULER` | `scheduler` |
//! | `TIERED_LAMBDA_COMPILE_THREADS` | `compile_threads` |

use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::tiered::{
    CompileScheduler, CompileWorkerPool, DeferredScheduler, PromotionPolicy, RayonScheduler,
    DEFAULT_COMPILATION_THRESHOLD,
};

pub const ENV_COMPILE_THRESHOLD: &str = "TIERED_LAMBDA_COMPILE_THRESHOLD";
pub const ENV_TIERING: &str = "TIERED_LAMBDA_TIERING";
pub const ENV_SCHEDULER: &str = "TIERED_LAMBDA_SCHEDULER";
pub const ENV_COMPILE_THREADS: &str = "TIERED_LAMBDA_COMPILE_THREADS";

/// Where background compilation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// rayon's global pool
    #[default]
    Rayon,
    /// A private pool of compile threads
    Dedicated,
    /// Queued until the host drains it
    Deferred,
}

impl FromStr for SchedulerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rayon" => Ok(SchedulerKind::Rayon),
            "dedicated" => Ok(SchedulerKind::Dedicated),
            "deferred" => Ok(SchedulerKind::Deferred),
            _ => Err(ConfigError::InvalidEnv {
                var: ENV_SCHEDULER,
                value: s.to_string(),
            }),
        }
    }
}

/// Configuration of a tiered engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Interpreted invocations before compilation is scheduled
    pub compilation_threshold: u32,

    /// `false` keeps every function on the interpreter
    pub tiering_enabled: bool,

    pub scheduler: SchedulerKind,

    /// Worker count for [`SchedulerKind::Dedicated`] (0 = one per CPU)
    pub compile_threads: usize,
}

impl Default for TierConfig {
    fn default() -> Self {
        TierConfig {
            compilation_threshold: DEFAULT_COMPILATION_THRESHOLD,
            tiering_enabled: true,
            scheduler: SchedulerKind::Rayon,
            compile_threads: 0,
        }
    }
}

impl TierConfig {
    /// Compile on first call
    pub fn eager() -> Self {
        TierConfig {
            compilation_threshold: 1,
            ..Default::default()
        }
    }

    /// Never compile in the background
    pub fn interpret_only() -> Self {
        TierConfig {
            tiering_enabled: false,
            ..Default::default()
        }
    }

    /// Parse TOML configuration text
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: TierConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_toml_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Apply `TIERED_LAMBDA_*` environment overrides
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_COMPILE_THRESHOLD) {
            self.compilation_threshold = parse_env(ENV_COMPILE_THRESHOLD, &value)?;
        }
        if let Some(value) = lookup(ENV_TIERING) {
            let enabled = match value.trim() {
                "1" | "true" | "on" => Some(true),
                "0" | "false" | "off" => Some(false),
                _ => None,
            };
            self.tiering_enabled = enabled.ok_or(ConfigError::InvalidEnv {
                var: ENV_TIERING,
                value,
            })?;
        }
        if let Some(value) = lookup(ENV_SCHEDULER) {
            self.scheduler = value.parse()?;
        }
        if let Some(value) = lookup(ENV_COMPILE_THREADS) {
            self.compile_threads = parse_env(ENV_COMPILE_THREADS, &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compilation_threshold == 0 {
            return Err(ConfigError::Invalid(
                "compilation_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn policy(&self) -> PromotionPolicy {
        PromotionPolicy {
            threshold: self.compilation_threshold,
            enabled: self.tiering_enabled,
        }
    }

    /// Build the configured scheduler
    ///
    /// A deferred scheduler is also returned by itself so the host can drain
    /// it.
    pub fn build_scheduler(&self) -> Result<BuiltScheduler, ConfigError> {
        Ok(match self.scheduler {
            SchedulerKind::Rayon => BuiltScheduler {
                scheduler: Arc::new(RayonScheduler),
                deferred: None,
            },
            SchedulerKind::Dedicated => BuiltScheduler {
                scheduler: Arc::new(CompileWorkerPool::new(self.compile_threads)?),
                deferred: None,
            },
            SchedulerKind::Deferred => {
                let deferred = Arc::new(DeferredScheduler::new());
                BuiltScheduler {
                    scheduler: deferred.clone(),
                    deferred: Some(deferred),
                }
            }
        })
    }
}

/// Scheduler produced from a [`TierConfig`]
pub struct BuiltScheduler {
    pub scheduler: Arc<dyn CompileScheduler>,
    pub deferred: Option<Arc<DeferredScheduler>>,
}

fn parse_env<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}

/// Error loading or applying configuration
#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(toml::de::Error),
    InvalidEnv { var: &'static str, value: String },
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Config I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "Config parse error: {}", e),
            ConfigError::InvalidEnv { var, value } => {
                write!(f, "Invalid value for {}: {:?}", var, value)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

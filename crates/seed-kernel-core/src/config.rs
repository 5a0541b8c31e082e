use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::drift::DriftConfig;
use crate::validate::ValidationLimits;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Consecutive failures that trip the controller into mechanical-only mode.
    pub failure_threshold: u32,
    /// Newest revisions inspected during one recovery attempt.
    pub history_limit: usize,
    pub history_timeout_ms: u64,
}

impl RecoveryConfig {
    #[must_use]
    pub fn history_timeout(&self) -> Duration {
        Duration::from_millis(self.history_timeout_ms)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            history_limit: 10,
            history_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Defaults to `.seed-backups` next to the document.
    pub backup_dir: Option<PathBuf>,
}

impl MigrationConfig {
    pub const DEFAULT_BACKUP_DIR: &'static str = ".seed-backups";

    #[must_use]
    pub fn backup_dir_for(&self, document: &Path) -> PathBuf {
        self.backup_dir.clone().unwrap_or_else(|| {
            document
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(Self::DEFAULT_BACKUP_DIR)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub validation: ValidationLimits,
    pub recovery: RecoveryConfig,
    pub drift: DriftConfig,
    pub migration: MigrationConfig,
}

impl KernelConfig {
    /// Load a JSON config. `None` or a path that does not exist yields defaults.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read, parsed, or
    /// fails [`KernelConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found; using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first inconsistent value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::Invalid(message.to_string()));

        if self.validation.soft_limit_bytes >= self.validation.hard_limit_bytes {
            return invalid("validation.soft_limit_bytes MUST be below hard_limit_bytes");
        }
        if self.recovery.failure_threshold == 0 {
            return invalid("recovery.failure_threshold MUST be at least 1");
        }
        if self.recovery.history_timeout_ms == 0 {
            return invalid("recovery.history_timeout_ms MUST be positive");
        }

        let drift = &self.drift;
        let positive = [
            ("drift.per_tick_cap", drift.per_tick_cap),
            ("drift.per_hour_cap", drift.per_hour_cap),
            ("drift.gravity_threshold", drift.gravity_threshold),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{name} MUST be a positive number")));
            }
        }
        if !(drift.gravity_pull.is_finite() && drift.gravity_pull >= 0.0) {
            return invalid("drift.gravity_pull MUST be a non-negative number");
        }
        if drift.history_len == 0 {
            return invalid("drift.history_len MUST be at least 1");
        }
        for (name, range) in [("valence", drift.valence_range), ("energy", drift.energy_range)] {
            if !(range.min.is_finite() && range.max.is_finite() && range.min < range.max) {
                return Err(ConfigError::Invalid(format!(
                    "drift.{name}_range MUST have min below max"
                )));
            }
        }
        if !drift.valence_range.contains(drift.baseline.valence)
            || !drift.energy_range.contains(drift.baseline.energy)
        {
            return invalid("drift.baseline MUST lie inside the legal ranges");
        }
        Ok(())
    }
}

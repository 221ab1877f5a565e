use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::features::{Column, ColumnKind};

pub const CONFIG_PATH_ENV: &str = "WINRATE_CONFIG";
pub const LOG_LEVEL_ENV: &str = "WINRATE_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "WINRATE_LOG_FORMAT";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Candidate drivers, in the order they are encoded.
    pub drivers: Vec<Column>,
    pub periods: PeriodConfig,
    pub thresholds: ThresholdConfig,
    pub model: ModelConfig,
    pub trend: TrendConfig,
    pub ranking: RankingConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodConfig {
    pub baseline_quarters: u32,
    pub recent_quarters: u32,
    /// Last day of the recent window; defaults to the latest creation date.
    pub reference_end: Option<NaiveDate>,
    pub min_closed_deals: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Closed deals a segment or rep needs before its win rate is trusted.
    pub min_segment_deals: usize,
    /// Grouping column for WRΔ and LCR in the metrics report.
    pub segment_column: Column,
    pub loss_concentration_top_n: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub max_iterations: usize,
    /// Largest gradient component accepted as converged.
    pub tolerance: f64,
    pub l2_penalty: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Coefficient changes inside this band count as stable.
    pub tolerance: f64,
    pub amplify: f64,
    pub dampen: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub top_n: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride {
        key: String,
        value: String,
    },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            drivers: vec![
                Column::Industry,
                Column::Region,
                Column::ProductType,
                Column::LeadSource,
                Column::DealStage,
                Column::AcvBucket,
                Column::CycleBucket,
                Column::DealAmount,
                Column::SalesCycleDays,
            ],
            periods: PeriodConfig::default(),
            thresholds: ThresholdConfig::default(),
            model: ModelConfig::default(),
            trend: TrendConfig::default(),
            ranking: RankingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PeriodConfig {
    fn default() -> Self {
        Self {
            baseline_quarters: 2,
            recent_quarters: 2,
            reference_end: None,
            min_closed_deals: 20,
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            min_segment_deals: 5,
            segment_column: Column::AcvBucket,
            loss_concentration_top_n: 3,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-8,
            l2_penalty: 0.01,
        }
    }
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.02,
            amplify: 1.5,
            dampen: 0.8,
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self { top_n: 5 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unsupported log format `{other}`")),
        }
    }
}

impl EngineConfig {
    /// Defaults, then the TOML file (explicit path or `WINRATE_CONFIG`), then env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = path
            .map(Path::to_path_buf)
            .or_else(|| read_env(CONFIG_PATH_ENV).map(PathBuf::from));
        let mut config = match resolved {
            Some(path) => read_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(level) = read_env(LOG_LEVEL_ENV) {
            self.logging.level = level;
        }
        if let Some(format) = read_env(LOG_FORMAT_ENV) {
            self.logging.format = format
                .parse()
                .map_err(|_| ConfigError::InvalidEnvOverride {
                    key: LOG_FORMAT_ENV.to_string(),
                    value: format.clone(),
                })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.drivers.is_empty() {
            return Err(invalid("at least one driver is required"));
        }
        let mut seen = std::collections::HashSet::new();
        for driver in &self.drivers {
            if !seen.insert(driver) {
                return Err(invalid(format!("driver `{driver}` is listed twice")));
            }
        }
        if self.periods.baseline_quarters == 0 || self.periods.recent_quarters == 0 {
            return Err(invalid("period windows must span at least one quarter"));
        }
        if self.thresholds.segment_column.kind() != ColumnKind::Categorical {
            return Err(invalid(format!(
                "segment column `{}` must be categorical",
                self.thresholds.segment_column
            )));
        }
        if self.thresholds.loss_concentration_top_n == 0 {
            return Err(invalid("loss_concentration_top_n must be positive"));
        }
        if self.model.max_iterations == 0 {
            return Err(invalid("model max_iterations must be positive"));
        }
        if !(self.model.l2_penalty >= 0.0) || !(self.model.tolerance > 0.0) {
            return Err(invalid("model l2_penalty must be >= 0 and tolerance > 0"));
        }
        if !(self.trend.tolerance >= 0.0) {
            return Err(invalid("trend tolerance must be non-negative"));
        }
        if !(self.trend.amplify > 1.0) || !(self.trend.dampen > 0.0 && self.trend.dampen < 1.0) {
            return Err(invalid(
                "trend amplify must be > 1 and dampen must lie in (0, 1)",
            ));
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(invalid(format!(
                "unknown log level `{}`",
                self.logging.level
            )));
        }
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<EngineConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::ParseFile {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation(message.into())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

use crate::{
    error::{EtlError, EtlResult},
    source::Source,
    store::WriteMode,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File names of the five raw sources, relative to `input_data_path`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourceFiles {
    pub user_identity: String,
    pub user_level: String,
    pub withdrawals: String,
    pub deposits: String,
    pub events: String,
}

impl Default for SourceFiles {
    fn default() -> Self {
        Self {
            user_identity: Source::UserIdentity.default_file_name().into(),
            user_level: Source::UserLevel.default_file_name().into(),
            withdrawals: Source::Withdrawals.default_file_name().into(),
            deposits: Source::Deposits.default_file_name().into(),
            events: Source::Events.default_file_name().into(),
        }
    }
}

impl SourceFiles {
    pub fn file_name(&self, source: Source) -> &str {
        match source {
            Source::UserIdentity => &self.user_identity,
            Source::UserLevel => &self.user_level,
            Source::Withdrawals => &self.withdrawals,
            Source::Deposits => &self.deposits,
            Source::Events => &self.events,
        }
    }
}

/// Warehouse connection. The warehouse is an SQLite database, so the
/// connection collapses to a path; `:memory:` gives a throwaway store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "warehouse.db".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoadConfig {
    /// Write mode for fact tables. Dimensions are always replaced.
    pub fact_mode: WriteMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityConfig {
    pub amount_min: f64,
    pub amount_max: f64,
    pub date_window_start: NaiveDate,
    pub date_window_end: NaiveDate,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            amount_min: 0.0,
            amount_max: 1e9,
            date_window_start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            date_window_end: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or_default(),
        }
    }
}

impl QualityConfig {
    /// The plausible-date window as instants; both bounds are midnight.
    pub fn date_window(&self) -> (NaiveDateTime, NaiveDateTime) {
        (
            self.date_window_start.and_time(chrono::NaiveTime::MIN),
            self.date_window_end.and_time(chrono::NaiveTime::MIN),
        )
    }
}

/// Everything a run needs, loaded once before the run starts and passed
/// explicitly to every component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub input_data_path: PathBuf,
    #[serde(default)]
    pub sources: SourceFiles,
    /// When set, every loaded table is also exported as CSV here.
    #[serde(default)]
    pub output_data_path: Option<PathBuf>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub quality: QualityConfig,
}

fn default_state_file() -> PathBuf {
    PathBuf::from("last_update.json")
}

impl PipelineConfig {
    /// Load from a JSON config file.
    /// In tests, use PipelineConfig::default_test().
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {e}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EtlResult<()> {
        if self.quality.amount_min > self.quality.amount_max {
            return Err(EtlError::Config(format!(
                "quality.amount_min ({}) exceeds quality.amount_max ({})",
                self.quality.amount_min, self.quality.amount_max
            )));
        }
        if self.quality.date_window_start > self.quality.date_window_end {
            return Err(EtlError::Config(
                "quality.date_window_start is after quality.date_window_end".into(),
            ));
        }
        if self.database.path.trim().is_empty() {
            return Err(EtlError::Config("database.path is empty".into()));
        }
        Ok(())
    }

    pub fn source_path(&self, source: Source) -> PathBuf {
        self.input_data_path.join(self.sources.file_name(source))
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            input_data_path: PathBuf::from("./data"),
            sources: SourceFiles::default(),
            output_data_path: None,
            log_file: None,
            state_file: default_state_file(),
            database: DatabaseConfig {
                path: ":memory:".into(),
            },
            load: LoadConfig::default(),
            quality: QualityConfig::default(),
        }
    }
}

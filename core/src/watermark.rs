//! Watermark persistence and advancement.
//!
//! RULES:
//!   - The watermark is the largest `event_timestamp` already committed.
//!   - It is written only after every table of a run has loaded.
//!   - It never moves backwards.
//!   - A run with no fact rows leaves it untouched.
//!
//! There is no locking here. At most one run may use a store at a time;
//! the scheduler that triggers runs is responsible for that.

use crate::{
    error::{EtlError, EtlResult},
    extract::EVENT_TIMESTAMP,
    table::Table,
    value::{format_timestamp, parse_timestamp},
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Watermark(NaiveDateTime);

impl Watermark {
    pub fn new(ts: NaiveDateTime) -> Self {
        Self(ts)
    }

    pub fn as_datetime(&self) -> NaiveDateTime {
        self.0
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_timestamp(&self.0))
    }
}

impl FromStr for Watermark {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_timestamp(s)
            .map(Watermark)
            .ok_or_else(|| EtlError::Watermark(format!("unparseable watermark '{s}'")))
    }
}

impl Serialize for Watermark {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Watermark {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Where the committed watermark lives between runs.
pub trait WatermarkStore {
    /// `None` on the very first run: process everything.
    fn read(&self) -> EtlResult<Option<Watermark>>;

    fn write(&mut self, watermark: &Watermark) -> EtlResult<()>;
}

/// On-disk layout of the state file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    last_update_timestamp: Option<Watermark>,
}

/// JSON state file holding `{"last_update_timestamp": "..."}`.
pub struct FileWatermarkStore {
    path: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WatermarkStore for FileWatermarkStore {
    fn read(&self) -> EtlResult<Option<Watermark>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let state: StateFile = serde_json::from_str(&content)?;
        Ok(state.last_update_timestamp)
    }

    fn write(&mut self, watermark: &Watermark) -> EtlResult<()> {
        let state = StateFile {
            last_update_timestamp: Some(*watermark),
        };
        // Write-then-rename so a crash never leaves a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string(&state)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Process-local store, used for embedding and in tests.
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    current: Option<Watermark>,
}

impl MemoryWatermarkStore {
    pub fn new(initial: Option<Watermark>) -> Self {
        Self { current: initial }
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn read(&self) -> EtlResult<Option<Watermark>> {
        Ok(self.current)
    }

    fn write(&mut self, watermark: &Watermark) -> EtlResult<()> {
        self.current = Some(*watermark);
        Ok(())
    }
}

/// Compute the watermark a run would commit.
///
/// Returns `None` when no fact table has a timestamp, meaning nothing should
/// be written. A candidate below `current` is ignored with a warning.
pub fn advance(current: Option<&Watermark>, facts: &[&Table]) -> Option<Watermark> {
    let observed = facts
        .iter()
        .filter(|t| !t.is_empty())
        .filter_map(|t| t.max_timestamp(EVENT_TIMESTAMP))
        .max()
        .map(Watermark)?;

    match current {
        Some(cur) if observed < *cur => {
            log::warn!("Computed watermark {observed} is behind committed {cur}; keeping {cur}");
            None
        }
        Some(cur) if observed == *cur => None,
        _ => Some(observed),
    }
}

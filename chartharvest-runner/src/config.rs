//! Run configuration, loaded from TOML.
//!
//! ```toml
//! [run]
//! start_date = "2022-01-27"
//! end_date = "2022-04-01"
//! kind = "song"
//! region = "global"        # or: all_regions = true
//! worker_count = 2
//! max_login_retries = 1
//!
//! [session]
//! login_backoff_ms = 500
//! ```
//!
//! Instead of a date range, a run may list anchor dates (e.g. album release
//! dates). Each anchor is harvested over a `window_days` window, on the
//! regions valid on the anchor:
//!
//! ```toml
//! [run]
//! dates = ["2019-08-23", "2020-12-11"]
//! window_days = 7
//! kind = "song"
//! all_regions = true
//! ```

use std::path::Path;
use std::time::Duration;

use chartharvest_core::{ChartKind, DateRange, Schedule};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What to harvest and how many sessions to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSection {
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Anchor dates, harvested as windows instead of a range.
    #[serde(default)]
    pub dates: Vec<NaiveDate>,
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    pub kind: ChartKind,
    /// Single region abbreviation (e.g. `global`, `us`).
    #[serde(default)]
    pub region: Option<String>,
    /// Harvest every registry region valid on each date instead.
    #[serde(default)]
    pub all_regions: bool,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_max_login_retries")]
    pub max_login_retries: u32,
}

/// Session tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSection {
    /// Base login retry delay in milliseconds, doubled per retry.
    #[serde(default = "default_login_backoff_ms")]
    pub login_backoff_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            login_backoff_ms: default_login_backoff_ms(),
        }
    }
}

fn default_worker_count() -> usize {
    2
}

fn default_window_days() -> u32 {
    7
}

fn default_max_login_retries() -> u32 {
    1
}

fn default_login_backoff_ms() -> u64 {
    500
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub run: RunSection,
    #[serde(default)]
    pub session: SessionSection,
}

impl RunConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let run = &self.run;
        match (run.start_date, run.end_date, run.dates.is_empty()) {
            (Some(start), Some(end), true) => {
                if start > end {
                    return Err(ConfigError::Invalid(format!(
                        "start_date {start} is after end_date {end}"
                    )));
                }
            }
            (None, None, false) => {
                if run.window_days == 0 {
                    return Err(ConfigError::Invalid("window_days must be at least 1".into()));
                }
            }
            (None, None, true) => {
                return Err(ConfigError::Invalid(
                    "one of start_date/end_date or dates is required".into(),
                ))
            }
            (_, _, false) => {
                return Err(ConfigError::Invalid(
                    "dates cannot be combined with start_date/end_date".into(),
                ))
            }
            _ => {
                return Err(ConfigError::Invalid(
                    "start_date and end_date must be given together".into(),
                ))
            }
        }
        if run.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count must be at least 1".into()));
        }
        match (&run.region, run.all_regions) {
            (Some(_), true) => Err(ConfigError::Invalid(
                "region and all_regions are mutually exclusive".into(),
            )),
            (None, false) => Err(ConfigError::Invalid(
                "one of region or all_regions = true is required".into(),
            )),
            (Some(r), false) if r.trim().is_empty() => {
                Err(ConfigError::Invalid("region must not be empty".into()))
            }
            _ => Ok(()),
        }
    }

    /// The dates this run harvests.
    pub fn schedule(&self) -> Result<Schedule, ConfigError> {
        match (self.run.start_date, self.run.end_date) {
            (Some(start), Some(end)) => DateRange::new(start, end)
                .map(Schedule::Daily)
                .map_err(|e| ConfigError::Invalid(e.to_string())),
            _ if !self.run.dates.is_empty() => Ok(Schedule::Windows {
                anchors: self.run.dates.clone(),
                window_days: self.run.window_days,
            }),
            _ => Err(ConfigError::Invalid("run has no dates".into())),
        }
    }

    pub fn login_backoff(&self) -> Duration {
        Duration::from_millis(self.session.login_backoff_ms)
    }
}

//! Region registry: which chart regions exist and since when.
//!
//! The registry is a JSON object mapping a region's display name to its
//! abbreviation and the first date a chart is available for it:
//!
//! ```json
//! { "Argentina": ["ar", "2017-01-01"], "Global": ["global", "2017-01-01"] }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("read region registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse region registry: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One chart region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub name: String,
    pub abbreviation: String,
    pub earliest_available: NaiveDate,
}

/// All known chart regions, keyed and ordered by display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionRegistry {
    regions: BTreeMap<String, (String, NaiveDate)>,
}

impl RegionRegistry {
    pub fn from_file(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, RegistryError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_json_string(&self) -> Result<String, RegistryError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn insert(&mut self, name: impl Into<String>, abbreviation: impl Into<String>, earliest: NaiveDate) {
        self.regions
            .insert(name.into(), (abbreviation.into(), earliest));
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn abbreviation(&self, name: &str) -> Option<&str> {
        self.regions.get(name).map(|(abbr, _)| abbr.as_str())
    }

    pub fn regions(&self) -> impl Iterator<Item = Region> + '_ {
        self.regions.iter().map(|(name, (abbr, earliest))| Region {
            name: name.clone(),
            abbreviation: abbr.clone(),
            earliest_available: *earliest,
        })
    }

    /// Regions with a chart on `date`, in name order.
    pub fn valid_regions(&self, date: NaiveDate) -> Vec<Region> {
        self.regions()
            .filter(|r| r.earliest_available <= date)
            .collect()
    }
}

/// Which regions a run harvests on each date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionSelection {
    /// One region abbreviation for every date.
    Single(String),
    /// Every registry region whose chart exists on the date.
    Registry(RegionRegistry),
}

/// One region to harvest on a date.
///
/// The chart is addressed by `abbreviation`; records are labelled with
/// `label`, the registry display name (or the configured region string for a
/// single-region run).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionTarget {
    pub label: String,
    pub abbreviation: String,
}

impl RegionTarget {
    pub fn new(label: impl Into<String>, abbreviation: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            abbreviation: abbreviation.into(),
        }
    }
}

impl From<Region> for RegionTarget {
    fn from(region: Region) -> Self {
        Self {
            label: region.name,
            abbreviation: region.abbreviation,
        }
    }
}

impl RegionSelection {
    /// Regions to harvest on `date`, in registry (display name) order.
    pub fn regions_on(&self, date: NaiveDate) -> Vec<RegionTarget> {
        match self {
            RegionSelection::Single(region) => vec![RegionTarget::new(region.clone(), region.clone())],
            RegionSelection::Registry(registry) => registry
                .valid_regions(date)
                .into_iter()
                .map(RegionTarget::from)
                .collect(),
        }
    }
}

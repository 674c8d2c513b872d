//! Inclusive calendar date ranges and the per-worker slices cut from them.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors constructing a date range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateRangeError {
    #[error("start date {start} is after end date {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },
}

/// Inclusive range of calendar dates, `start <= end`.
///
/// Deserialization goes through [`DateRange::new`], so an inverted range is
/// rejected there too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct RawDateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = DateRangeError;

    fn try_from(raw: RawDateRange) -> Result<Self, Self::Error> {
        DateRange::new(raw.start, raw.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if start > end {
            return Err(DateRangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// A range covering exactly one day.
    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of calendar days in the range (always at least 1).
    pub fn day_count(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Every date in the range, one per day, ascending.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

/// Which dates a run harvests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Every date of the range, each on the regions valid that day.
    Daily(DateRange),
    /// A `window_days` window starting at each anchor (e.g. a release
    /// date), on the regions valid on the anchor.
    Windows {
        anchors: Vec<NaiveDate>,
        window_days: u32,
    },
}

impl Schedule {
    /// The dates partitioned across workers: the range's days, or the anchors.
    pub fn entries(&self) -> Vec<NaiveDate> {
        match self {
            Schedule::Daily(range) => range.dates().collect(),
            Schedule::Windows { anchors, .. } => anchors.clone(),
        }
    }

    /// The chart dates harvested for one entry.
    pub fn expand(&self, entry: NaiveDate) -> Vec<NaiveDate> {
        match self {
            Schedule::Daily(_) => vec![entry],
            Schedule::Windows { window_days, .. } => {
                let span = u64::from(window_days.saturating_sub(1));
                let end = entry.checked_add_days(Days::new(span)).unwrap_or(NaiveDate::MAX);
                DateRange { start: entry, end }.dates().collect()
            }
        }
    }

    /// The first entry, as logged when a run starts.
    pub fn first_date(&self) -> Option<NaiveDate> {
        match self {
            Schedule::Daily(range) => Some(range.start()),
            Schedule::Windows { anchors, .. } => anchors.first().copied(),
        }
    }
}

/// A contiguous run of dates owned by one worker for the duration of a run.
///
/// Slices are produced by [`crate::partition::partition`] and are not cloneable:
/// each one is handed to exactly one worker.
#[derive(Debug, PartialEq, Eq)]
pub struct DateSlice {
    index: usize,
    dates: Vec<NaiveDate>,
}

impl DateSlice {
    pub fn new(index: usize, dates: Vec<NaiveDate>) -> Self {
        Self { index, dates }
    }

    /// Position of this slice within its partition (0-based).
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn first(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }
}

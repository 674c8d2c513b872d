//! Splits a run's dates into one contiguous slice per worker.
//!
//! Every slice but the last gets `len / n` dates; the last slice takes the
//! remainder. Concatenating the slices in order reproduces the range exactly.
//! When the range is shorter than `n`, the leading slices are empty.

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{DateRange, DateSlice};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    #[error("cannot partition a date range across zero workers")]
    NoWorkers,
}

/// Partition `range` into exactly `n` ordered slices.
pub fn partition(range: &DateRange, n: usize) -> Result<Vec<DateSlice>, PartitionError> {
    partition_dates(range.dates().collect(), n)
}

/// Partition an arbitrary ordered date list into exactly `n` slices.
pub fn partition_dates(dates: Vec<NaiveDate>, n: usize) -> Result<Vec<DateSlice>, PartitionError> {
    if n == 0 {
        return Err(PartitionError::NoWorkers);
    }

    let base = dates.len() / n;
    let mut dates = dates.into_iter();

    let slices = (0..n)
        .map(|i| {
            let take = if i + 1 == n { usize::MAX } else { base };
            DateSlice::new(i, dates.by_ref().take(take).collect())
        })
        .collect();

    Ok(slices)
}

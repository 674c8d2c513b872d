//! Domain types shared by every stage of a harvest.

pub mod chart;
pub mod dates;

pub use chart::{ChartKind, ChartRecord, RecordLayout};
pub use dates::{DateRange, DateRangeError, DateSlice, Schedule};

/// Raw text payload of one `(date, region, kind)` chart snapshot.
pub type RawBlob = String;

//! ChartHarvest Core: domain types, parsing, sinks, and session contracts.
//!
//! This crate contains everything a harvest needs that is not concurrency:
//! - Date ranges and per-worker date slices
//! - The fixed-stride chart text parser
//! - Record sinks (CSV, in-memory, and a mutex-serialized shared sink)
//! - The `ChartSession` contract and a file-backed replay session
//! - The region registry

pub mod domain;
pub mod parser;
pub mod partition;
pub mod regions;
pub mod replay;
pub mod session;
pub mod sink;

pub use domain::{
    ChartKind, ChartRecord, DateRange, DateRangeError, DateSlice, RawBlob, Schedule,
};
pub use parser::{parse, ChartRecords};
pub use partition::{partition, partition_dates, PartitionError};
pub use regions::{Region, RegionRegistry, RegionSelection, RegionTarget, RegistryError};
pub use replay::ReplaySession;
pub use session::{ChartSession, Credentials, SessionError};
pub use sink::{read_records, CsvSink, MemorySink, RecordSink, SharedSink, SinkError, WriteMode};

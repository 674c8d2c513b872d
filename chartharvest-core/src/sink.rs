//! Record sinks: durable destinations for decoded chart records.
//!
//! [`CsvSink`] writes the tabular layout downstream consumers expect
//! (one header row, then one row per record). [`SharedSink`] wraps any sink
//! behind a mutex so concurrent workers can share one growing destination
//! without interleaving rows.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::NaiveDate;
use thiserror::Error;
use tracing::debug;

use crate::domain::{ChartKind, ChartRecord};

/// How a write treats existing destination content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Truncate the destination and start a fresh table.
    Overwrite,
    /// Add rows after whatever is already there.
    Append,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("malformed row {row}: {reason}")]
    Format { row: usize, reason: String },
}

/// Destination for decoded chart records.
pub trait RecordSink: Send {
    fn write(&mut self, records: &[ChartRecord], mode: WriteMode) -> Result<(), SinkError>;
}

// ─── CSV sink ────────────────────────────────────────────────────────

/// Appends records to a CSV file laid out for one chart kind.
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
    kind: ChartKind,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>, kind: ChartKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn open(&self, mode: WriteMode) -> Result<(File, bool), SinkError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }

        let file = match mode {
            WriteMode::Overwrite => File::create(&self.path),
            WriteMode::Append => OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path),
        }
        .map_err(|e| self.io_err(e))?;

        // An appended-to file that is still empty needs its header too.
        let needs_header = file.metadata().map_err(|e| self.io_err(e))?.len() == 0;
        Ok((file, needs_header))
    }
}

impl RecordSink for CsvSink {
    fn write(&mut self, records: &[ChartRecord], mode: WriteMode) -> Result<(), SinkError> {
        let (file, needs_header) = self.open(mode)?;
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if needs_header {
            wtr.write_record(self.kind.columns())?;
        }
        for record in records {
            wtr.write_record(to_row(record, self.kind))?;
        }
        wtr.flush().map_err(|e| self.io_err(e))?;

        debug!(
            path = %self.path.display(),
            ?mode,
            rows = records.len(),
            "wrote chart rows"
        );
        Ok(())
    }
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(T::to_string).unwrap_or_default()
}

/// Render a record as one row of the `kind` column layout.
pub fn to_row(record: &ChartRecord, kind: ChartKind) -> Vec<String> {
    let mut row = vec![
        record.date.format("%Y-%m-%d").to_string(),
        record.region.clone(),
        record.position.to_string(),
        record.change.clone(),
    ];
    if kind.has_title() {
        row.push(record.title.clone().unwrap_or_default());
    }
    row.push(record.name.clone());
    row.push(opt(&record.peak));
    row.push(opt(&record.previous));
    row.push(opt(&record.streak));
    if kind.has_streams() {
        row.push(opt(&record.streams));
    }
    row
}

/// Read back a CSV file written by [`CsvSink`].
pub fn read_records(path: &Path, kind: ChartKind) -> Result<Vec<ChartRecord>, SinkError> {
    let file = File::open(path).map_err(|source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(file);

    let headers = rdr.headers()?.clone();
    if headers.iter().ne(kind.columns().iter().copied()) {
        return Err(SinkError::Format {
            row: 0,
            reason: format!("header does not match the {kind} chart layout"),
        });
    }

    rdr.records()
        .enumerate()
        .map(|(i, row)| from_row(&row?, kind, i + 1))
        .collect()
}

fn from_row(row: &csv::StringRecord, kind: ChartKind, line: usize) -> Result<ChartRecord, SinkError> {
    let bad = |reason: String| SinkError::Format { row: line, reason };
    let field = |i: usize| row.get(i).unwrap_or_default();
    fn number<T: std::str::FromStr>(s: &str) -> Result<Option<T>, String> {
        if s.is_empty() {
            return Ok(None);
        }
        s.parse().map(Some).map_err(|_| format!("'{s}' is not a number"))
    }

    if row.len() != kind.columns().len() {
        return Err(bad(format!(
            "expected {} fields, found {}",
            kind.columns().len(),
            row.len()
        )));
    }

    let date = NaiveDate::parse_from_str(field(0), "%Y-%m-%d")
        .map_err(|e| bad(format!("date '{}': {e}", field(0))))?;
    let position = field(2)
        .parse::<u32>()
        .map_err(|_| bad(format!("position '{}' is not a number", field(2))))?;

    let (title, rest) = if kind.has_title() {
        (Some(field(4).to_string()), 5)
    } else {
        (None, 4)
    };

    Ok(ChartRecord {
        date,
        region: field(1).to_string(),
        position,
        change: field(3).to_string(),
        title,
        name: field(rest).to_string(),
        peak: number(field(rest + 1)).map_err(bad)?,
        previous: number(field(rest + 2)).map_err(bad)?,
        streak: number(field(rest + 3)).map_err(bad)?,
        streams: if kind.has_streams() {
            number(field(rest + 4)).map_err(bad)?
        } else {
            None
        },
    })
}

// ─── In-memory sink ──────────────────────────────────────────────────

/// Keeps every write in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub writes: Vec<(WriteMode, Vec<ChartRecord>)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records as a reader of the destination would see them: everything
    /// since the last overwrite.
    pub fn contents(&self) -> Vec<ChartRecord> {
        let start = self
            .writes
            .iter()
            .rposition(|(mode, _)| *mode == WriteMode::Overwrite)
            .unwrap_or(0);
        self.writes[start..]
            .iter()
            .flat_map(|(_, records)| records.iter().cloned())
            .collect()
    }
}

impl RecordSink for MemorySink {
    fn write(&mut self, records: &[ChartRecord], mode: WriteMode) -> Result<(), SinkError> {
        self.writes.push((mode, records.to_vec()));
        Ok(())
    }
}

// ─── Shared sink ─────────────────────────────────────────────────────

struct SharedState<K> {
    sink: K,
    started: bool,
    batches: usize,
    records: usize,
}

/// Serializes writes from concurrent workers into one destination.
///
/// Callers never pick a mode. The first write that reaches the destination
/// overwrites it and every later write appends, so a run produces a single
/// table no matter which worker finishes a fetch first. [`SharedSink::reset`]
/// performs that overwrite up front, leaving an empty table even when the
/// run writes nothing.
pub struct SharedSink<K> {
    state: Mutex<SharedState<K>>,
}

impl<K: RecordSink> SharedSink<K> {
    pub fn new(sink: K) -> Self {
        Self {
            state: Mutex::new(SharedState {
                sink,
                started: false,
                batches: 0,
                records: 0,
            }),
        }
    }

    /// Truncate the destination to an empty table. Every later write appends.
    pub fn reset(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.sink.write(&[], WriteMode::Overwrite)?;
        state.started = true;
        debug!("shared sink reset");
        Ok(())
    }

    /// Write one batch, returning the mode applied.
    pub fn write(&self, records: &[ChartRecord]) -> Result<WriteMode, SinkError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let mode = if state.started {
            WriteMode::Append
        } else {
            WriteMode::Overwrite
        };
        state.sink.write(records, mode)?;
        state.started = true;
        state.batches += 1;
        state.records += records.len();
        Ok(mode)
    }

    /// `(batches, records)` written so far.
    pub fn totals(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        (state.batches, state.records)
    }

    pub fn into_inner(self) -> K {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .sink
    }
}

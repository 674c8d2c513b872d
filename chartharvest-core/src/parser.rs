//! Chart text parser: decodes a raw chart snapshot into ranked records.
//!
//! A snapshot is the visible text of a chart table. Everything before the
//! first line consisting solely of `1` is page chrome and is skipped. From
//! that marker on, the text is a fixed-stride sequence of lines, one stride
//! per ranked entry (see [`RecordLayout`]):
//!
//! ```text
//! 1              position
//! =              change
//! Song A         title        (song charts only)
//! Artist A       artist / name
//! 10 12 5 100000 peak previous streak [streams]
//! ```
//!
//! Decoding is lazy: [`parse`] returns an iterator that yields one record per
//! complete stride.
//!
//! Malformed input policy:
//! - no marker: zero records, logged as a warning;
//! - a metrics line with the wrong token count: the record is still emitted,
//!   metric fields are filled left to right from the tokens present;
//! - a position line that is not the next rank: decoding stops, since every
//!   later stride would be misaligned;
//! - a truncated final stride: dropped with a warning.

use std::iter::FusedIterator;
use std::str::{FromStr, Lines};
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, warn};

use crate::domain::{ChartKind, ChartRecord, RecordLayout};

fn rank_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"(?m)^1\r?$").expect("rank marker pattern is valid"))
}

/// Parse a numeric chart token, tolerating thousands separators.
fn parse_count<T: FromStr>(token: &str) -> Option<T> {
    let token = token.trim();
    if token.contains(',') {
        token.replace(',', "").parse().ok()
    } else {
        token.parse().ok()
    }
}

/// Decode `blob` into the ranked records of a `kind` chart for `date`/`region`.
pub fn parse<'a>(blob: &'a str, kind: ChartKind, date: NaiveDate, region: &str) -> ChartRecords<'a> {
    let lines = match rank_marker().find(blob) {
        Some(m) => {
            debug!(%date, region, %kind, offset = m.start(), "rank marker found");
            Some(blob[m.start()..].lines())
        }
        None => {
            warn!(%date, region, %kind, "no rank marker in chart snapshot; nothing to parse");
            None
        }
    };

    ChartRecords {
        marker_found: lines.is_some(),
        lines,
        kind,
        date,
        region: region.to_string(),
        emitted: 0,
        anomalies: 0,
    }
}

/// Lazy, finite iterator over the records of one snapshot.
pub struct ChartRecords<'a> {
    lines: Option<Lines<'a>>,
    marker_found: bool,
    kind: ChartKind,
    date: NaiveDate,
    region: String,
    emitted: u32,
    anomalies: usize,
}

impl ChartRecords<'_> {
    /// Whether the snapshot contained a rank marker at all.
    pub fn marker_found(&self) -> bool {
        self.marker_found
    }

    /// Number of strides so far that were emitted best-effort or dropped.
    pub fn anomalies(&self) -> usize {
        self.anomalies
    }

    fn finish(&mut self) -> Option<ChartRecord> {
        self.lines = None;
        None
    }

    fn decode(&mut self, stride: &[&str], layout: RecordLayout) -> Option<ChartRecord> {
        let expected = self.emitted + 1;
        let position = match parse_count::<u32>(stride[0]) {
            Some(p) if p == expected => p,
            _ => {
                self.anomalies += 1;
                warn!(
                    date = %self.date,
                    region = %self.region,
                    expected,
                    line = stride[0],
                    "position line out of sequence; stopping decode"
                );
                return None;
            }
        };

        let text = &stride[2..2 + layout.text_fields];
        let (title, name) = match text {
            [title, name] => (Some(title.to_string()), name.to_string()),
            [name] => (None, name.to_string()),
            _ => (None, text.join(" ")),
        };

        let metrics_line = stride[layout.stride - 1];
        let tokens: Vec<&str> = metrics_line.split(' ').collect();
        if tokens.len() != layout.metric_tokens {
            self.anomalies += 1;
            warn!(
                date = %self.date,
                region = %self.region,
                position,
                expected = layout.metric_tokens,
                found = tokens.len(),
                line = metrics_line,
                "metrics line has unexpected token count; emitting best-effort record"
            );
        }

        let metric = |i: usize| tokens.get(i).and_then(|t| parse_count::<u32>(t));
        let streams = if self.kind.has_streams() {
            tokens.get(3).and_then(|t| parse_count::<u64>(t))
        } else {
            None
        };

        Some(ChartRecord {
            date: self.date,
            region: self.region.clone(),
            position,
            change: stride[1].to_string(),
            title,
            name,
            peak: metric(0),
            previous: metric(1),
            streak: metric(2),
            streams,
        })
    }
}

impl Iterator for ChartRecords<'_> {
    type Item = ChartRecord;

    fn next(&mut self) -> Option<ChartRecord> {
        let layout = self.kind.layout();
        let lines = self.lines.as_mut()?;

        let stride: Vec<&str> = lines.by_ref().take(layout.stride).collect();
        if stride.len() < layout.stride {
            if stride.iter().any(|line| !line.trim().is_empty()) {
                self.anomalies += 1;
                warn!(
                    date = %self.date,
                    region = %self.region,
                    lines = stride.len(),
                    stride = layout.stride,
                    "truncated final record dropped"
                );
            }
            return self.finish();
        }

        match self.decode(&stride, layout) {
            Some(record) => {
                self.emitted = record.position;
                Some(record)
            }
            None => self.finish(),
        }
    }
}

impl FusedIterator for ChartRecords<'_> {}

//! Harvest worker: drives one authenticated session through its date slice.
//!
//! Slice entries are processed strictly in order because a session's
//! navigation state carries over from one fetch to the next. Each entry is
//! resolved to its regions and chart dates through the run's [`Schedule`]:
//! a daily run fetches the entry itself on the regions valid that day, a
//! window run fetches every day of the window on the regions valid on the
//! anchor. Each snapshot is fetched, decoded and handed to the shared sink.
//!
//! Failure containment:
//! - a recoverable fetch error skips that date and the slice continues;
//! - a sink error is recorded against the date and the slice continues;
//! - an unrecoverable fetch error (session rejected or closed) ends the slice;
//! - an unauthenticated session skips the whole slice without fetching.

use std::fmt;

use chartharvest_core::{
    parse, ChartKind, ChartSession, DateSlice, RecordSink, RegionSelection, RegionTarget,
    Schedule, SessionError, SharedSink, SinkError,
};
use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::pool::{Session, SessionState};

// ─── Report types ────────────────────────────────────────────────────

/// Why one `(date, region)` snapshot was not harvested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Fetch(SessionError),
    Write(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Fetch(e) => write!(f, "fetch failed: {e}"),
            FailureReason::Write(e) => write!(f, "write failed: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFailure {
    pub date: NaiveDate,
    /// Region label, as written on records.
    pub region: String,
    pub reason: FailureReason,
}

/// How a slice ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceOutcome {
    /// Every entry was attempted.
    Completed,
    /// The session never authenticated; nothing was fetched.
    Skipped { state: SessionState },
    /// Cancellation was observed before `remaining` entries were started.
    Cancelled { remaining: usize },
    /// The session became unusable with `remaining` entries left.
    Aborted { reason: String, remaining: usize },
}

/// What one worker did with its slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceReport {
    pub worker: usize,
    pub dates: usize,
    pub outcome: SliceOutcome,
    /// Snapshots fetched and decoded (including empty ones).
    pub snapshots: usize,
    /// Snapshots without a rank marker.
    pub empty_snapshots: usize,
    pub records_written: usize,
    pub failures: Vec<DateFailure>,
}

impl SliceReport {
    pub fn new(worker: usize, dates: usize) -> Self {
        Self {
            worker,
            dates,
            outcome: SliceOutcome::Completed,
            snapshots: 0,
            empty_snapshots: 0,
            records_written: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, SliceOutcome::Skipped { .. })
    }

    pub fn is_clean(&self) -> bool {
        self.outcome == SliceOutcome::Completed && self.failures.is_empty()
    }
}

enum SnapshotError {
    Fetch(SessionError),
    Write(SinkError),
}

// ─── Worker ──────────────────────────────────────────────────────────

/// Per-run harvesting parameters shared by every worker.
#[derive(Debug, Clone, Copy)]
pub struct HarvestWorker<'a> {
    kind: ChartKind,
    regions: &'a RegionSelection,
    schedule: &'a Schedule,
    cancel: &'a CancelToken,
}

impl<'a> HarvestWorker<'a> {
    pub fn new(
        kind: ChartKind,
        regions: &'a RegionSelection,
        schedule: &'a Schedule,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            kind,
            regions,
            schedule,
            cancel,
        }
    }

    /// Harvest every date in `slice` through `session`, writing to `sink`.
    pub fn run<S, K>(&self, session: &mut Session<S>, slice: &DateSlice, sink: &SharedSink<K>) -> SliceReport
    where
        S: ChartSession,
        K: RecordSink,
    {
        let worker = slice.index();
        let mut report = SliceReport::new(worker, slice.len());

        if !session.is_authenticated() {
            warn!(
                worker,
                state = ?session.state(),
                dates = slice.len(),
                first = ?slice.first(),
                "session is not authenticated; slice dropped"
            );
            report.outcome = SliceOutcome::Skipped {
                state: session.state(),
            };
            return report;
        }

        info!(
            worker,
            kind = %self.kind,
            first = ?slice.first(),
            last = ?slice.last(),
            dates = slice.len(),
            "starting slice"
        );

        for (i, &entry) in slice.dates().iter().enumerate() {
            if self.cancel.is_cancelled() {
                let remaining = slice.len() - i;
                info!(worker, %entry, remaining, "cancellation requested; stopping slice");
                report.outcome = SliceOutcome::Cancelled { remaining };
                return report;
            }

            let days = self.schedule.expand(entry);
            for target in self.regions.regions_on(entry) {
                for &date in &days {
                    let failure = match self.harvest_snapshot(session, date, &target, sink, &mut report) {
                        Ok(()) => continue,
                        Err(e) => e,
                    };
                    let region = target.label.clone();
                    match failure {
                        SnapshotError::Fetch(e) if !e.is_recoverable() => {
                            warn!(worker, %date, region = %region, error = %e, "session unusable; abandoning slice");
                            report.outcome = SliceOutcome::Aborted {
                                reason: e.to_string(),
                                remaining: slice.len() - i,
                            };
                            report.failures.push(DateFailure {
                                date,
                                region,
                                reason: FailureReason::Fetch(e),
                            });
                            return report;
                        }
                        SnapshotError::Fetch(e) => {
                            warn!(worker, %date, region = %region, error = %e, "fetch failed; skipping date");
                            report.failures.push(DateFailure {
                                date,
                                region,
                                reason: FailureReason::Fetch(e),
                            });
                        }
                        SnapshotError::Write(e) => {
                            warn!(worker, %date, region = %region, error = %e, "write failed; skipping date");
                            report.failures.push(DateFailure {
                                date,
                                region,
                                reason: FailureReason::Write(e.to_string()),
                            });
                        }
                    }
                }
            }
        }

        info!(
            worker,
            records = report.records_written,
            failures = report.failures.len(),
            "slice finished"
        );
        report
    }

    /// Fetch → parse → write for one `(date, region)`. The chart is addressed
    /// by the region's abbreviation and the records carry its label.
    fn harvest_snapshot<S, K>(
        &self,
        session: &mut Session<S>,
        date: NaiveDate,
        target: &RegionTarget,
        sink: &SharedSink<K>,
        report: &mut SliceReport,
    ) -> Result<(), SnapshotError>
    where
        S: ChartSession,
        K: RecordSink,
    {
        let blob = session
            .handle()
            .and_then(|inner| inner.fetch_blob(date, &target.abbreviation, self.kind))
            .map_err(SnapshotError::Fetch)?;

        let mut decoded = parse(&blob, self.kind, date, &target.label);
        let records: Vec<_> = decoded.by_ref().collect();
        report.snapshots += 1;

        if !decoded.marker_found() {
            report.empty_snapshots += 1;
            return Ok(());
        }
        if decoded.anomalies() > 0 {
            debug!(
                worker = report.worker,
                %date,
                region = %target.label,
                anomalies = decoded.anomalies(),
                "snapshot decoded best-effort"
            );
        }
        if records.is_empty() {
            return Ok(());
        }

        let applied = sink.write(&records).map_err(SnapshotError::Write)?;
        report.records_written += records.len();
        debug!(
            worker = report.worker,
            %date,
            region = %target.label,
            records = records.len(),
            mode = ?applied,
            "snapshot written"
        );
        Ok(())
    }
}

//! Run orchestrator.
//!
//! One run is: partition the schedule's dates, acquire a session per slice,
//! reset the destination, log every session in behind the latch, harvest
//! each slice on its own thread, then release the pool. Only pool
//! construction, the destination reset and invalid plans fail the run;
//! everything else ends up in the [`RunSummary`].

use std::io;
use std::thread;

use chartharvest_core::{
    partition_dates, ChartKind, ChartSession, Credentials, RecordSink, RegionRegistry,
    RegionSelection, Schedule, SessionError, SharedSink,
};
use tracing::{error, info, warn};

use crate::cancel::CancelToken;
use crate::config::RunConfig;
use crate::latch::CountDownLatch;
use crate::login::{LoginCoordinator, SessionOutcome};
use crate::pool::SessionPool;
use crate::worker::{DateFailure, HarvestWorker, SliceOutcome, SliceReport};
use crate::HarvestError;

// ─── Plan ────────────────────────────────────────────────────────────

/// Everything a run needs, resolved from configuration.
#[derive(Debug, Clone)]
pub struct HarvestPlan {
    pub schedule: Schedule,
    pub kind: ChartKind,
    pub regions: RegionSelection,
    pub worker_count: usize,
    pub login: LoginCoordinator,
}

impl HarvestPlan {
    /// Resolve a validated config. `registry` is required when the config
    /// asks for `all_regions`, and ignored otherwise.
    pub fn from_config(
        config: &RunConfig,
        credentials: Credentials,
        registry: Option<RegionRegistry>,
    ) -> Result<Self, HarvestError> {
        config.validate()?;
        let schedule = config.schedule()?;

        let regions = match (&config.run.region, config.run.all_regions) {
            (Some(region), false) => RegionSelection::Single(region.clone()),
            _ => RegionSelection::Registry(registry.ok_or(HarvestError::MissingRegistry)?),
        };

        Ok(Self {
            schedule,
            kind: config.run.kind,
            regions,
            worker_count: config.run.worker_count,
            login: LoginCoordinator::new(
                credentials,
                config.run.max_login_retries,
                config.login_backoff(),
            ),
        })
    }
}

// ─── Summary ─────────────────────────────────────────────────────────

/// Per-slice and per-session results of one run, ordered by worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub slices: Vec<SliceReport>,
    pub sessions: Vec<SessionOutcome>,
}

impl RunSummary {
    pub fn records_written(&self) -> usize {
        self.slices.iter().map(|s| s.records_written).sum()
    }

    pub fn skipped_slices(&self) -> impl Iterator<Item = &SliceReport> {
        self.slices.iter().filter(|s| s.is_skipped())
    }

    pub fn failed_dates(&self) -> impl Iterator<Item = &DateFailure> {
        self.slices.iter().flat_map(|s| s.failures.iter())
    }

    /// True if every slice completed with no per-date failures.
    pub fn all_succeeded(&self) -> bool {
        self.slices.iter().all(SliceReport::is_clean)
    }
}

// ─── Run ─────────────────────────────────────────────────────────────

/// Execute `plan` with sessions built by `factory` (called once per worker
/// with the worker index), writing every decoded record to `sink`.
///
/// The destination is reset once the pool is up, so a run that writes
/// nothing still leaves an empty table rather than the previous run's rows.
pub fn run_harvest<S, F, K>(
    plan: &HarvestPlan,
    factory: F,
    sink: &SharedSink<K>,
    cancel: &CancelToken,
) -> Result<RunSummary, HarvestError>
where
    S: ChartSession,
    F: FnMut(usize) -> Result<S, SessionError>,
    K: RecordSink,
{
    let slices = partition_dates(plan.schedule.entries(), plan.worker_count)?;
    let mut pool = SessionPool::acquire(slices.len(), factory)?;
    sink.reset()?;

    info!(
        kind = %plan.kind,
        first = ?plan.schedule.first_date(),
        entries = slices.iter().map(|s| s.len()).sum::<usize>(),
        workers = pool.len(),
        "starting harvest"
    );

    let latch = CountDownLatch::new(pool.len());
    let worker = HarvestWorker::new(plan.kind, &plan.regions, &plan.schedule, cancel);
    let login = &plan.login;

    let joined: Vec<Result<(SessionOutcome, SliceReport), Unjoined>> = thread::scope(|scope| {
        let handles: Vec<_> = pool
            .sessions_mut()
            .zip(&slices)
            .map(|(session, slice)| {
                let latch = &latch;
                spawn_gated(latch, slice.index(), move || {
                    thread::Builder::new()
                        .name(format!("harvest-{}", slice.index()))
                        .spawn_scoped(scope, move || {
                            let arrival = latch.arrival();
                            let outcome = login.authenticate(session);
                            arrival.arrive_and_wait();
                            let report = worker.run(session, slice, sink);
                            (outcome, report)
                        })
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| match h {
                Some(h) => h.join().map_err(|_| Unjoined::Panicked),
                None => Err(Unjoined::NotSpawned),
            })
            .collect()
    });

    let mut summary = RunSummary {
        slices: Vec::with_capacity(slices.len()),
        sessions: Vec::with_capacity(slices.len()),
    };
    for ((result, slice), session) in joined.into_iter().zip(&slices).zip(pool.sessions()) {
        match result {
            Ok((outcome, report)) => {
                if report.is_skipped() {
                    warn!(worker = report.worker, dates = report.dates, "slice skipped");
                }
                summary.sessions.push(outcome);
                summary.slices.push(report);
            }
            Err(reason) => {
                error!(worker = slice.index(), %reason, "slice abandoned");
                summary.sessions.push(SessionOutcome {
                    session: session.id(),
                    state: session.state(),
                    attempts: 0,
                    error: None,
                });
                let mut report = SliceReport::new(slice.index(), slice.len());
                report.outcome = SliceOutcome::Aborted {
                    reason: reason.to_string(),
                    remaining: slice.len(),
                };
                summary.slices.push(report);
            }
        }
    }

    pool.release_all();

    info!(
        records = summary.records_written(),
        skipped = summary.skipped_slices().count(),
        failed_dates = summary.failed_dates().count(),
        "harvest finished"
    );
    Ok(summary)
}

/// Why a worker thread produced no report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unjoined {
    Panicked,
    NotSpawned,
}

impl std::fmt::Display for Unjoined {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unjoined::Panicked => f.write_str("worker panicked"),
            Unjoined::NotSpawned => f.write_str("worker thread could not be spawned"),
        }
    }
}

/// Spawn one gated worker. If the OS refuses the thread, arrive at the latch
/// on its behalf so the workers already running are not held at the gate.
fn spawn_gated<H>(
    latch: &CountDownLatch,
    worker: usize,
    spawn: impl FnOnce() -> io::Result<H>,
) -> Option<H> {
    match spawn() {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!(worker, error = %e, "could not spawn worker thread");
            latch.count_down();
            None
        }
    }
}

//! End-to-end harvest runs against scripted sessions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chartharvest_core::{
    read_records, ChartKind, ChartRecord, ChartSession, Credentials, CsvSink, DateRange,
    MemorySink, RawBlob, RecordSink, RegionRegistry, RegionSelection, ReplaySession, Schedule,
    SessionError, SharedSink, WriteMode,
};
use chartharvest_runner::{
    run_harvest, CancelToken, FailureReason, HarvestError, HarvestPlan, LoginCoordinator,
    SessionState, SliceOutcome,
};
use chrono::NaiveDate;

// ── Scripted session ──

type FetchFn = dyn Fn(usize, NaiveDate, &str) -> Result<RawBlob, SessionError> + Send + Sync;

/// Counters shared by every session of one run.
#[derive(Clone, Default)]
struct Tally {
    logins: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    logins_seen_at_fetch: Arc<Mutex<Vec<usize>>>,
    fetched: Arc<Mutex<Vec<(usize, NaiveDate, String)>>>,
}

impl Tally {
    fn fetched(&self) -> Vec<(usize, NaiveDate, String)> {
        self.fetched.lock().unwrap().clone()
    }
}

struct ScriptedSession {
    id: usize,
    tally: Tally,
    login_fails: bool,
    fetch: Arc<FetchFn>,
}

impl ChartSession for ScriptedSession {
    fn login(&mut self, _: &Credentials) -> Result<(), SessionError> {
        // Slow the logins down a little so a missing barrier would show.
        std::thread::sleep(Duration::from_millis(5 * self.id as u64));
        self.tally.logins.fetch_add(1, Ordering::SeqCst);
        if self.login_fails {
            Err(SessionError::Timeout("login form never appeared".into()))
        } else {
            Ok(())
        }
    }

    fn fetch_blob(&mut self, date: NaiveDate, region: &str, _: ChartKind) -> Result<RawBlob, SessionError> {
        self.tally
            .logins_seen_at_fetch
            .lock()
            .unwrap()
            .push(self.tally.logins.load(Ordering::SeqCst));
        self.tally
            .fetched
            .lock()
            .unwrap()
            .push((self.id, date, region.to_string()));
        (self.fetch)(self.id, date, region)
    }

    fn close(&mut self) {
        self.tally.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn factory<'a>(
    tally: &'a Tally,
    failing_logins: &'a [usize],
    fetch: Arc<FetchFn>,
) -> impl FnMut(usize) -> Result<ScriptedSession, SessionError> + 'a {
    move |id| {
        Ok(ScriptedSession {
            id,
            tally: tally.clone(),
            login_fails: failing_logins.contains(&id),
            fetch: Arc::clone(&fetch),
        })
    }
}

// ── Helpers ──

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, d).unwrap()
}

fn song_blob(date: NaiveDate, region: &str) -> RawBlob {
    format!(
        "Daily chart\n1\n=\nSong {date}\nArtist {region}\n1 1 3 1,000\n2\n+1\nOther {date}\nBand\n2 3 1 900\n"
    )
}

fn good_fetch() -> Arc<FetchFn> {
    Arc::new(|_, date, region| Ok(song_blob(date, region)))
}

fn plan(first: u32, last: u32, workers: usize, max_retries: u32) -> HarvestPlan {
    HarvestPlan {
        schedule: Schedule::Daily(DateRange::new(date(first), date(last)).unwrap()),
        kind: ChartKind::Song,
        regions: RegionSelection::Single("global".into()),
        worker_count: workers,
        login: LoginCoordinator::new(Credentials::new("user", "pass"), max_retries, Duration::ZERO),
    }
}

fn record_dates(records: &[ChartRecord]) -> Vec<NaiveDate> {
    let mut dates: Vec<_> = records.iter().map(|r| r.date).collect();
    dates.sort();
    dates.dedup();
    dates
}

// ── Scenarios ──

#[test]
fn failed_login_skips_only_that_slice() {
    let tally = Tally::default();
    let sink = SharedSink::new(MemorySink::new());

    let summary = run_harvest(
        &plan(1, 9, 3, 2),
        factory(&tally, &[1], good_fetch()),
        &sink,
        &CancelToken::new(),
    )
    .unwrap();

    // Session 1 tried 1 + 2 retries; the others logged in first time.
    let attempts: Vec<_> = summary.sessions.iter().map(|s| s.attempts).collect();
    assert_eq!(attempts, vec![1, 3, 1]);
    assert_eq!(summary.sessions[1].state, SessionState::Failed);
    assert!(matches!(summary.sessions[1].error, Some(SessionError::Timeout(_))));

    // No fetch started before every login reached a terminal state.
    let seen = tally.logins_seen_at_fetch.lock().unwrap().clone();
    assert_eq!(seen.len(), 6);
    assert!(seen.iter().all(|&n| n == 5), "fetched before barrier: {seen:?}");

    assert_eq!(
        summary.slices[1].outcome,
        SliceOutcome::Skipped {
            state: SessionState::Failed
        }
    );
    assert_eq!(summary.slices[0].outcome, SliceOutcome::Completed);
    assert_eq!(summary.slices[2].outcome, SliceOutcome::Completed);
    assert_eq!(summary.skipped_slices().count(), 1);
    assert!(!summary.all_succeeded());

    let fetched = tally.fetched();
    assert!(fetched.iter().all(|(id, _, _)| *id != 1));

    let records = sink.into_inner().contents();
    assert_eq!(
        record_dates(&records),
        vec![date(1), date(2), date(3), date(7), date(8), date(9)]
    );
    assert_eq!(summary.records_written(), 12);
    assert_eq!(tally.closes.load(Ordering::SeqCst), 3);
}

#[test]
fn dates_within_a_slice_are_fetched_in_order() {
    let tally = Tally::default();
    let sink = SharedSink::new(MemorySink::new());

    run_harvest(&plan(1, 10, 3, 0), factory(&tally, &[], good_fetch()), &sink, &CancelToken::new())
        .unwrap();

    for worker in 0..3 {
        let dates: Vec<_> = tally
            .fetched()
            .into_iter()
            .filter(|(id, _, _)| *id == worker)
            .map(|(_, d, _)| d)
            .collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);
    }
    assert_eq!(tally.fetched().len(), 10);
}

#[test]
fn run_resets_the_destination_then_appends() {
    let tally = Tally::default();
    let sink = SharedSink::new(MemorySink::new());

    let summary = run_harvest(
        &plan(1, 6, 2, 0),
        factory(&tally, &[], good_fetch()),
        &sink,
        &CancelToken::new(),
    )
    .unwrap();
    assert!(summary.all_succeeded());

    let memory = sink.into_inner();
    assert_eq!(memory.writes.len(), 7);
    assert_eq!(memory.writes[0], (WriteMode::Overwrite, Vec::new()));
    assert!(memory.writes[1..].iter().all(|(mode, _)| *mode == WriteMode::Append));
    assert_eq!(memory.contents().len(), 12);
}

#[test]
fn recoverable_fetch_failure_skips_the_date() {
    let tally = Tally::default();
    let sink = SharedSink::new(MemorySink::new());
    let fetch: Arc<FetchFn> = Arc::new(|_, d, region| {
        if d == date(2) {
            Err(SessionError::Timeout("chart table".into()))
        } else {
            Ok(song_blob(d, region))
        }
    });

    let summary = run_harvest(&plan(1, 4, 1, 0), factory(&tally, &[], fetch), &sink, &CancelToken::new())
        .unwrap();

    let slice = &summary.slices[0];
    assert_eq!(slice.outcome, SliceOutcome::Completed);
    assert_eq!(slice.failures.len(), 1);
    assert_eq!(slice.failures[0].date, date(2));
    assert!(matches!(
        slice.failures[0].reason,
        FailureReason::Fetch(SessionError::Timeout(_))
    ));
    assert_eq!(
        record_dates(&sink.into_inner().contents()),
        vec![date(1), date(3), date(4)]
    );
}

#[test]
fn rejected_fetch_abandons_the_slice() {
    let tally = Tally::default();
    let sink = SharedSink::new(MemorySink::new());
    let fetch: Arc<FetchFn> = Arc::new(|_, d, region| {
        if d == date(2) {
            Err(SessionError::Rejected("logged out".into()))
        } else {
            Ok(song_blob(d, region))
        }
    });

    let summary = run_harvest(&plan(1, 4, 1, 0), factory(&tally, &[], fetch), &sink, &CancelToken::new())
        .unwrap();

    assert!(matches!(
        summary.slices[0].outcome,
        SliceOutcome::Aborted { remaining: 3, .. }
    ));
    assert_eq!(tally.fetched().len(), 2);
    assert_eq!(summary.records_written(), 2);
    assert_eq!(tally.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn empty_snapshot_writes_nothing() {
    let tally = Tally::default();
    let sink = SharedSink::new(MemorySink::new());
    let fetch: Arc<FetchFn> = Arc::new(|_, d, region| {
        if d == date(1) {
            Ok("Chart not available for this date".to_string())
        } else {
            Ok(song_blob(d, region))
        }
    });

    let summary = run_harvest(&plan(1, 2, 1, 0), factory(&tally, &[], fetch), &sink, &CancelToken::new())
        .unwrap();

    let slice = &summary.slices[0];
    assert!(slice.is_clean());
    assert_eq!(slice.snapshots, 2);
    assert_eq!(slice.empty_snapshots, 1);

    // Only the run's reset and the second date reach the sink.
    let memory = sink.into_inner();
    assert_eq!(memory.writes.len(), 2);
    assert_eq!(memory.writes[0], (WriteMode::Overwrite, Vec::new()));
    assert_eq!(memory.writes[1].0, WriteMode::Append);
    assert_eq!(memory.contents().len(), 2);
}

#[test]
fn cancellation_stops_before_the_next_date() {
    let tally = Tally::default();
    let sink = SharedSink::new(MemorySink::new());
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let fetch: Arc<FetchFn> = Arc::new(move |_, d, region| {
        if d == date(2) {
            trigger.cancel();
        }
        Ok(song_blob(d, region))
    });

    let summary = run_harvest(&plan(1, 5, 1, 0), factory(&tally, &[], fetch), &sink, &cancel).unwrap();

    // Date 2 finishes its fetch, parse and write; date 3 never starts.
    assert_eq!(summary.slices[0].outcome, SliceOutcome::Cancelled { remaining: 3 });
    assert_eq!(record_dates(&sink.into_inner().contents()), vec![date(1), date(2)]);
    assert_eq!(tally.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn registry_runs_cover_every_valid_region() {
    let tally = Tally::default();
    let sink = SharedSink::new(MemorySink::new());

    let mut registry = RegionRegistry::default();
    registry.insert("Global", "global", NaiveDate::from_ymd_opt(2017, 1, 1).unwrap());
    registry.insert("Ukraine", "ua", date(3));
    let mut plan = plan(1, 4, 1, 0);
    plan.regions = RegionSelection::Registry(registry);

    let summary = run_harvest(&plan, factory(&tally, &[], good_fetch()), &sink, &CancelToken::new())
        .unwrap();
    assert!(summary.all_succeeded());

    let fetched: Vec<_> = tally.fetched().into_iter().map(|(_, d, r)| (d, r)).collect();
    assert_eq!(
        fetched,
        vec![
            (date(1), "global".to_string()),
            (date(2), "global".to_string()),
            (date(3), "global".to_string()),
            (date(3), "ua".to_string()),
            (date(4), "global".to_string()),
            (date(4), "ua".to_string()),
        ]
    );

    // Fetched by abbreviation, recorded under the display name.
    let records = sink.into_inner().contents();
    assert_eq!(records.len(), 12);
    assert_eq!(records.iter().filter(|r| r.region == "Ukraine").count(), 4);
    assert_eq!(records.iter().filter(|r| r.region == "Global").count(), 8);
    assert!(records.iter().all(|r| r.region != "ua"));
}

#[test]
fn release_windows_follow_each_anchor() {
    let tally = Tally::default();
    let sink = SharedSink::new(MemorySink::new());

    let mut registry = RegionRegistry::default();
    registry.insert("Global", "global", NaiveDate::from_ymd_opt(2017, 1, 1).unwrap());
    registry.insert("Ukraine", "ua", date(3));
    let mut plan = plan(1, 1, 2, 0);
    plan.schedule = Schedule::Windows {
        anchors: vec![date(1), date(3)],
        window_days: 3,
    };
    plan.regions = RegionSelection::Registry(registry);

    let summary = run_harvest(&plan, factory(&tally, &[], good_fetch()), &sink, &CancelToken::new())
        .unwrap();
    assert!(summary.all_succeeded());
    let sizes: Vec<_> = summary.slices.iter().map(|s| s.dates).collect();
    assert_eq!(sizes, vec![1, 1]);

    let fetched_by = |worker: usize| -> Vec<(NaiveDate, String)> {
        tally
            .fetched()
            .into_iter()
            .filter(|(id, _, _)| *id == worker)
            .map(|(_, d, r)| (d, r))
            .collect()
    };
    // Ukraine is not valid on the first anchor, even though its window reaches day 3.
    assert_eq!(
        fetched_by(0),
        vec![
            (date(1), "global".to_string()),
            (date(2), "global".to_string()),
            (date(3), "global".to_string()),
        ]
    );
    assert_eq!(
        fetched_by(1),
        vec![
            (date(3), "global".to_string()),
            (date(4), "global".to_string()),
            (date(5), "global".to_string()),
            (date(3), "ua".to_string()),
            (date(4), "ua".to_string()),
            (date(5), "ua".to_string()),
        ]
    );

    let records = sink.into_inner().contents();
    assert_eq!(records.len(), 18);
    assert_eq!(records.iter().filter(|r| r.region == "Ukraine").count(), 6);
}

#[test]
fn more_workers_than_dates() {
    let tally = Tally::default();
    let sink = SharedSink::new(MemorySink::new());

    let summary = run_harvest(&plan(1, 2, 3, 0), factory(&tally, &[], good_fetch()), &sink, &CancelToken::new())
        .unwrap();

    let sizes: Vec<_> = summary.slices.iter().map(|s| s.dates).collect();
    assert_eq!(sizes, vec![0, 0, 2]);
    assert!(summary.all_succeeded());
    assert_eq!(tally.closes.load(Ordering::SeqCst), 3);
}

#[test]
fn construction_failure_releases_built_sessions() {
    let tally = Tally::default();
    let sink = SharedSink::new(MemorySink::new());
    let mut build = factory(&tally, &[], good_fetch());

    let result = run_harvest(
        &plan(1, 9, 3, 0),
        |id| {
            if id == 2 {
                Err(SessionError::Rejected("browser did not start".into()))
            } else {
                build(id)
            }
        },
        &sink,
        &CancelToken::new(),
    );

    assert!(matches!(
        result,
        Err(HarvestError::SessionConstruction { index: 2, .. })
    ));
    assert_eq!(tally.closes.load(Ordering::SeqCst), 2);
    assert_eq!(tally.logins.load(Ordering::SeqCst), 0);
}

#[test]
fn zero_workers_is_rejected() {
    let tally = Tally::default();
    let sink = SharedSink::new(MemorySink::new());
    let result = run_harvest(&plan(1, 3, 0, 0), factory(&tally, &[], good_fetch()), &sink, &CancelToken::new());
    assert!(matches!(result, Err(HarvestError::Partition(_))));
}

#[test]
fn panicking_worker_is_contained() {
    let tally = Tally::default();
    let sink = SharedSink::new(MemorySink::new());
    let fetch: Arc<FetchFn> = Arc::new(|id, d, region| {
        if id == 0 {
            panic!("session crashed");
        }
        Ok(song_blob(d, region))
    });

    let summary = run_harvest(&plan(1, 4, 2, 0), factory(&tally, &[], fetch), &sink, &CancelToken::new())
        .unwrap();

    assert!(matches!(
        summary.slices[0].outcome,
        SliceOutcome::Aborted { remaining: 2, .. }
    ));
    assert_eq!(summary.slices[1].outcome, SliceOutcome::Completed);
    assert_eq!(tally.closes.load(Ordering::SeqCst), 2);
}

#[test]
fn replay_sessions_harvest_into_csv() {
    let snapshots = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    for d in [1, 2, 4] {
        let path = ReplaySession::snapshot_path(snapshots.path(), date(d), "global", ChartKind::Song);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, song_blob(date(d), "global")).unwrap();
    }

    let csv_path = out.path().join("charts.csv");
    let sink = SharedSink::new(CsvSink::new(&csv_path, ChartKind::Song));
    let root = snapshots.path().to_path_buf();

    let summary = run_harvest(
        &plan(1, 4, 2, 0),
        |_| Ok(ReplaySession::new(&root)),
        &sink,
        &CancelToken::new(),
    )
    .unwrap();

    // Date 3 was never captured.
    let failures: Vec<_> = summary.failed_dates().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].date, date(3));
    assert!(matches!(
        failures[0].reason,
        FailureReason::Fetch(SessionError::Navigation(_))
    ));

    let records = read_records(&csv_path, ChartKind::Song).unwrap();
    assert_eq!(records.len(), 6);
    assert_eq!(record_dates(&records), vec![date(1), date(2), date(4)]);
    let first = records
        .iter()
        .find(|r| r.date == date(1) && r.position == 1)
        .unwrap();
    assert_eq!(first.title.as_deref(), Some("Song 2022-01-01"));
    assert_eq!(first.streams, Some(1000));
}

#[test]
fn run_without_snapshots_clears_a_previous_file() {
    let snapshots = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let csv_path = out.path().join("charts.csv");

    let stale = chartharvest_core::parse(&song_blob(date(1), "global"), ChartKind::Song, date(1), "global")
        .collect::<Vec<_>>();
    let mut previous = CsvSink::new(&csv_path, ChartKind::Song);
    previous.write(&stale, WriteMode::Overwrite).unwrap();
    assert_eq!(read_records(&csv_path, ChartKind::Song).unwrap().len(), 2);

    let sink = SharedSink::new(CsvSink::new(&csv_path, ChartKind::Song));
    let root = snapshots.path().to_path_buf();
    let summary = run_harvest(
        &plan(1, 3, 2, 0),
        |_| Ok(ReplaySession::new(&root)),
        &sink,
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(summary.failed_dates().count(), 3);
    assert_eq!(summary.records_written(), 0);
    assert!(read_records(&csv_path, ChartKind::Song).unwrap().is_empty());
}

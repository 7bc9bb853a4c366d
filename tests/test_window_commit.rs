//! Integration tests for the window commit sequence
//!
//! Key behaviours covered:
//! - Earliest-first extraction and boundary-triggered commits
//! - Archive write, sink fan-out and checkpoint update once per commit
//! - Failed sinks leave the checkpoint untouched and the commit retryable
//! - Resume from a stored checkpoint without re-counting committed records
//! - Late records, unrepresentable timestamps and read-only timeframe lookups

use serde_json::json;
use std::cell::RefCell;
use std::fs::File;
use std::rc::Rc;
use usageflow::{
    AggregatorError, AggregatorState, Checkpoint, CheckpointMetadata, CheckpointStore, FsBackend,
    MemoryCheckpointStore, PeriodRecord, SinkError, SqliteCheckpointStore, TransientArchive,
    UsageEntry, UsageMap, WindowAggregator, WindowSink,
};

const P: i64 = 3600;

#[derive(Debug, Clone, PartialEq)]
struct Delivery {
    sink: &'static str,
    start: i64,
    end: i64,
    entries: usize,
}

type DeliveryLog = Rc<RefCell<Vec<Delivery>>>;

struct RecordingSink {
    name: &'static str,
    log: DeliveryLog,
    fail_remaining: Rc<RefCell<u32>>,
    closed: Rc<RefCell<Vec<&'static str>>>,
}

impl WindowSink for RecordingSink {
    fn append(&mut self, usage: &UsageMap, start: i64, end: i64) -> Result<(), SinkError> {
        let mut fail = self.fail_remaining.borrow_mut();
        if *fail > 0 {
            *fail -= 1;
            return Err(SinkError::Rejected(format!("{} unavailable", self.name)));
        }
        self.log.borrow_mut().push(Delivery {
            sink: self.name,
            start,
            end,
            entries: usage.values().map(Vec::len).sum(),
        });
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.closed.borrow_mut().push(self.name);
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        self.name
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    data_dir: std::path::PathBuf,
    log: DeliveryLog,
    closed: Rc<RefCell<Vec<&'static str>>>,
    failures: Rc<RefCell<u32>>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_path_buf();
        Self {
            _dir: dir,
            data_dir,
            log: Rc::new(RefCell::new(Vec::new())),
            closed: Rc::new(RefCell::new(Vec::new())),
            failures: Rc::new(RefCell::new(0)),
        }
    }

    fn backend(&self) -> FsBackend {
        FsBackend::new(&self.data_dir).unwrap()
    }

    fn register<C: CheckpointStore>(
        &self,
        aggregator: &mut WindowAggregator<FsBackend, C>,
        name: &'static str,
        failing: bool,
    ) {
        let log = self.log.clone();
        let closed = self.closed.clone();
        let fail_remaining = if failing {
            self.failures.clone()
        } else {
            Rc::new(RefCell::new(0))
        };
        aggregator
            .add_writer(move |ctx| {
                assert_eq!(ctx.identity, "tenant");
                let sink: Box<dyn WindowSink> = Box::new(RecordingSink {
                    name,
                    log,
                    fail_remaining,
                    closed,
                });
                Ok(sink)
            })
            .unwrap();
    }

    fn aggregator(&self) -> WindowAggregator<FsBackend, MemoryCheckpointStore> {
        let mut aggregator =
            WindowAggregator::new("tenant", P, self.backend(), MemoryCheckpointStore::new()).unwrap();
        self.register(&mut aggregator, "first", false);
        self.register(&mut aggregator, "second", false);
        aggregator
    }

    fn archived(&self, start: i64) -> Option<UsageMap> {
        let name = TransientArchive::<File>::container_name("tenant", start).unwrap();
        let mut archive = TransientArchive::open(&self.backend(), &name).unwrap();
        archive.get(start).unwrap()
    }

    fn deliveries(&self) -> Vec<Delivery> {
        self.log.borrow().clone()
    }
}

fn record(begin: i64, entries: &[(&str, f64)]) -> PeriodRecord {
    let mut usage = UsageMap::new();
    for (service, price) in entries {
        usage
            .entry(service.to_string())
            .or_default()
            .push(UsageEntry::new(json!({
                "billing": {"price": price},
                "desc": {"begin": begin},
            })));
    }
    PeriodRecord::new(begin, begin + P, usage)
}

#[test]
fn test_boundary_crossing_commits_earlier_window_first() {
    let h = Harness::new();
    let mut aggregator = h.aggregator();

    let mut batch = vec![record(4000, &[("compute", 2.0)]), record(0, &[("compute", 1.0)])];
    aggregator.append(&mut batch).unwrap();
    assert!(batch.is_empty());

    assert_eq!(
        h.deliveries(),
        vec![
            Delivery { sink: "first", start: 0, end: 3600, entries: 1 },
            Delivery { sink: "second", start: 0, end: 3600, entries: 1 },
        ]
    );

    let archived = h.archived(0).unwrap();
    assert_eq!(archived["compute"].len(), 1);
    assert_eq!(archived["compute"][0].as_value()["desc"]["begin"], 0);

    let window = aggregator.window().unwrap();
    assert_eq!((window.start, window.end), (4000, 7600));
    assert_eq!(aggregator.checkpoints().get_state().unwrap(), Some(3600));
    assert_eq!(aggregator.checkpoints().get_metadata().unwrap().total, 1.0);
    assert_eq!(aggregator.total(), 3.0);
}

#[test]
fn test_empty_batch_is_noop() {
    let h = Harness::new();
    let mut aggregator = h.aggregator();

    aggregator.append(&mut Vec::new()).unwrap();

    assert_eq!(aggregator.state(), AggregatorState::Empty);
    assert_eq!(aggregator.commits(), 0);
    assert!(h.deliveries().is_empty());
    assert_eq!(aggregator.checkpoints().writes(), 0);
}

#[test]
fn test_unwritten_timeframe_formats_with_empty_usage() {
    let h = Harness::new();
    let mut aggregator = h.aggregator();

    let formatted = aggregator.get_timeframe(7200).unwrap();
    assert_eq!(formatted.len(), 1);
    assert_eq!(formatted[0].period.begin, 7200);
    assert_eq!(formatted[0].period.end, 10800);
    assert!(formatted[0].usage.is_empty());

    aggregator.append(&mut vec![record(7200, &[("volume", 0.5)])]).unwrap();
    aggregator.commit().unwrap();

    let formatted = aggregator.get_timeframe(7200).unwrap();
    assert_eq!(formatted[0].usage["volume"].len(), 1);
}

#[test]
fn test_out_of_order_batch_merges_ascending() {
    let h = Harness::new();
    let mut aggregator = h.aggregator();

    let mut batch = vec![record(100, &[("compute", 1.0)]), record(50, &[("compute", 1.0)])];
    aggregator.append(&mut batch).unwrap();

    let window = aggregator.window().unwrap();
    assert_eq!(window.start, 50);
    let order: Vec<i64> = window.usage["compute"]
        .iter()
        .map(|e| e.as_value()["desc"]["begin"].as_i64().unwrap())
        .collect();
    assert_eq!(order, vec![50, 100]);
    assert!(h.deliveries().is_empty());
}

#[test]
fn test_multi_window_batch_and_total() {
    let h = Harness::new();
    let mut aggregator = h.aggregator();

    let mut batch = vec![
        record(7300, &[("compute", 4.0)]),
        record(0, &[("compute", 1.0), ("volume", 0.25)]),
        record(3700, &[("compute", 2.0)]),
        record(1800, &[("compute", 1.0)]),
    ];
    aggregator.append(&mut batch).unwrap();
    aggregator.commit().unwrap();

    let starts: Vec<i64> = h
        .deliveries()
        .iter()
        .filter(|d| d.sink == "first")
        .map(|d| d.start)
        .collect();
    assert_eq!(starts, vec![0, 3700, 7300]);
    assert_eq!(aggregator.commits(), 3);
    assert_eq!(aggregator.checkpoints().writes(), 3);
    assert_eq!(aggregator.checkpoints().get_state().unwrap(), Some(7300 + P));
    assert_eq!(aggregator.checkpoints().get_metadata().unwrap().total, 8.25);
    assert_eq!(h.archived(0).unwrap()["compute"].len(), 2);
    assert_eq!(aggregator.state(), AggregatorState::Empty);
}

#[test]
fn test_repeated_appends_accumulate_without_dedup() {
    let h = Harness::new();
    let mut aggregator = h.aggregator();

    aggregator.append(&mut vec![record(0, &[("compute", 1.0)])]).unwrap();
    aggregator.append(&mut vec![record(0, &[("compute", 1.0)])]).unwrap();

    assert_eq!(aggregator.window().unwrap().usage["compute"].len(), 2);
    assert_eq!(aggregator.total(), 2.0);
}

#[test]
fn test_commit_without_window_is_noop() {
    let h = Harness::new();
    let mut aggregator = h.aggregator();

    assert!(!aggregator.commit().unwrap());
    assert!(h.deliveries().is_empty());
    assert_eq!(aggregator.checkpoints().writes(), 0);
}

#[test]
fn test_failing_sink_blocks_checkpoint_and_retry_succeeds() {
    let h = Harness::new();
    let mut aggregator =
        WindowAggregator::new("tenant", P, h.backend(), MemoryCheckpointStore::new()).unwrap();
    h.register(&mut aggregator, "first", false);
    h.register(&mut aggregator, "flaky", true);
    *h.failures.borrow_mut() = 1;

    aggregator.append(&mut vec![record(0, &[("compute", 1.0)])]).unwrap();

    let mut batch = vec![record(3600, &[("compute", 2.0)])];
    let err = aggregator.append(&mut batch).unwrap_err();
    assert!(matches!(err, AggregatorError::Pipeline(ref e) if e.index == 1));

    // Nothing advanced, the triggering record is still pending
    assert_eq!(batch.len(), 1);
    assert_eq!(aggregator.checkpoints().writes(), 0);
    assert_eq!(aggregator.window().unwrap().start, 0);
    assert!(h.archived(0).is_some());

    aggregator.append(&mut batch).unwrap();
    assert!(batch.is_empty());
    assert_eq!(aggregator.checkpoints().get_state().unwrap(), Some(3600));
    assert_eq!(aggregator.checkpoints().writes(), 1);
    assert_eq!(aggregator.window().unwrap().start, 3600);

    // The sink ahead of the failure saw the window twice, the flaky one once
    let flaky: Vec<Delivery> = h.deliveries().into_iter().filter(|d| d.sink == "flaky").collect();
    assert_eq!(flaky.len(), 1);
}

#[test]
fn test_unpriced_entry_rejected_and_kept_in_batch() {
    let h = Harness::new();
    let mut aggregator = h.aggregator();

    let mut usage = UsageMap::new();
    usage.insert("compute".to_string(), vec![UsageEntry::new(json!({"vol": 1}))]);
    let mut batch = vec![record(100, &[("compute", 1.0)]), PeriodRecord::new(50, 50 + P, usage)];

    let err = aggregator.append(&mut batch).unwrap_err();
    assert!(matches!(err, AggregatorError::InvalidEntry { begin: 50, .. }));
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].begin(), 50);
    assert_eq!(aggregator.state(), AggregatorState::Empty);
    assert_eq!(aggregator.total(), 0.0);
}

#[test]
fn test_resume_primes_window_and_total() {
    let h = Harness::new();
    let checkpoints = MemoryCheckpointStore::with_checkpoint(7200, 10.0);
    let mut aggregator = WindowAggregator::resume("tenant", P, h.backend(), checkpoints).unwrap();
    h.register(&mut aggregator, "first", false);

    assert_eq!(aggregator.state(), AggregatorState::Accumulating);
    assert_eq!(aggregator.window().unwrap().start, 7200);
    assert_eq!(aggregator.total(), 10.0);

    aggregator.append(&mut vec![record(7300, &[("compute", 1.5)])]).unwrap();
    aggregator.commit().unwrap();

    assert_eq!(
        h.deliveries(),
        vec![Delivery { sink: "first", start: 7200, end: 10800, entries: 1 }]
    );
    assert_eq!(aggregator.checkpoints().get_metadata().unwrap().total, 11.5);
}

#[test]
fn test_new_keeps_cumulative_total_but_no_window() {
    let h = Harness::new();
    let checkpoints = MemoryCheckpointStore::with_checkpoint(3600, 4.0);
    let aggregator = WindowAggregator::new("tenant", P, h.backend(), checkpoints).unwrap();

    assert_eq!(aggregator.state(), AggregatorState::Empty);
    assert_eq!(aggregator.total(), 4.0);
}

#[test]
fn test_replayed_commit_keeps_first_archive_content() {
    let h = Harness::new();
    let mut aggregator = h.aggregator();
    aggregator.append(&mut vec![record(0, &[("compute", 1.0)])]).unwrap();
    aggregator.commit().unwrap();

    // A fresh instance replays the same window with different content
    let mut replay = h.aggregator();
    replay.append(&mut vec![record(0, &[("compute", 9.0), ("volume", 1.0)])]).unwrap();
    replay.commit().unwrap();

    let archived = h.archived(0).unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived["compute"][0].price(), Some(1.0));
}

#[test]
fn test_month_change_switches_container() {
    let h = Harness::new();
    let mut aggregator = h.aggregator();

    // 2024-01-31 23:00 UTC and 2024-02-01 00:00 UTC
    let jan = 1_706_742_000;
    let feb = jan + P;
    aggregator
        .append(&mut vec![record(jan, &[("compute", 1.0)]), record(feb, &[("compute", 1.0)])])
        .unwrap();
    aggregator.commit().unwrap();

    assert!(h.data_dir.join("tenant-2024-01.zip").exists());
    assert!(h.data_dir.join("tenant-2024-02.zip").exists());
    assert!(h.archived(jan).is_some());
    assert!(h.archived(feb).is_some());
}

#[test]
fn test_close_reaches_sinks_in_order() {
    let h = Harness::new();
    let mut aggregator = h.aggregator();

    assert_eq!(aggregator.identity(), "tenant");
    assert_eq!(aggregator.period(), P);
    assert_eq!(aggregator.sink_count(), 2);

    aggregator.close().unwrap();
    assert_eq!(*h.closed.borrow(), vec!["first", "second"]);
}

#[test]
fn test_invalid_period_rejected() {
    let h = Harness::new();
    let result = WindowAggregator::new("tenant", 0, h.backend(), MemoryCheckpointStore::new());
    assert!(matches!(result, Err(AggregatorError::InvalidPeriod(0))));
}

#[test]
fn test_sqlite_checkpoint_metadata_contract() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = SqliteCheckpointStore::new(dir.path().join("cp.db"), "tenant").unwrap();
    store
        .record_commit(3600, &CheckpointMetadata { total: 2.5 })
        .unwrap();

    let backend = FsBackend::new(dir.path()).unwrap();
    let aggregator = WindowAggregator::resume("tenant", P, backend, store).unwrap();
    assert_eq!(aggregator.window().unwrap().start, 3600);
    assert_eq!(aggregator.total(), 2.5);
}

fn committed_batch() -> Vec<PeriodRecord> {
    vec![
        record(0, &[("compute", 1.0)]),
        record(1800, &[("compute", 2.0)]),
        record(3700, &[("compute", 4.0)]),
    ]
}

#[test]
fn test_resumed_runner_skips_replayed_records() {
    let h = Harness::new();
    let db = h.data_dir.join("checkpoints.db");
    {
        let store = SqliteCheckpointStore::new(&db, "tenant").unwrap();
        let mut first = WindowAggregator::new("tenant", P, h.backend(), store).unwrap();
        h.register(&mut first, "first", false);
        first.append(&mut committed_batch()).unwrap();
        first.commit().unwrap();
        first.close().unwrap();
    }

    let store = SqliteCheckpointStore::new(&db, "tenant").unwrap();
    let mut resumed = WindowAggregator::resume("tenant", P, h.backend(), store).unwrap();
    h.register(&mut resumed, "first", false);
    assert_eq!(resumed.committed_end(), Some(3700 + P));

    // The input file is read again from the top, followed by one new record
    let mut replay = committed_batch();
    replay.push(record(7400, &[("compute", 0.5)]));
    resumed.append(&mut replay).unwrap();

    assert!(replay.is_empty());
    assert_eq!(resumed.skipped(), 3);
    assert_eq!(resumed.total(), 7.5);
    assert_eq!(resumed.window().unwrap().entry_count(), 1);
    assert_eq!(
        resumed.checkpoints().checkpoint().unwrap(),
        Some(Checkpoint { last_committed_end: 3700 + P, cumulative_total: 7.0 })
    );

    resumed.commit().unwrap();
    let starts: Vec<i64> = h.deliveries().iter().map(|d| d.start).collect();
    assert_eq!(starts, vec![0, 3700, 7300]);
    assert_eq!(
        resumed.checkpoints().checkpoint().unwrap(),
        Some(Checkpoint { last_committed_end: 7300 + P, cumulative_total: 7.5 })
    );
}

#[test]
fn test_late_record_after_gap_merges_into_open_window() {
    let h = Harness::new();
    let mut aggregator = h.aggregator();

    aggregator
        .append(&mut vec![record(0, &[("compute", 1.0)]), record(4000, &[("compute", 2.0)])])
        .unwrap();
    assert_eq!(aggregator.committed_end(), Some(3600));

    // Before the open window but after everything committed
    aggregator.append(&mut vec![record(3700, &[("volume", 0.5)])]).unwrap();
    let window = aggregator.window().unwrap();
    assert_eq!((window.start, window.end), (4000, 7600));
    assert_eq!(window.entry_count(), 2);
    assert_eq!(window.usage["volume"][0].as_value()["desc"]["begin"], 3700);
    assert_eq!(aggregator.total(), 3.5);

    // Inside the committed window: dropped
    aggregator.append(&mut vec![record(100, &[("compute", 9.0)])]).unwrap();
    assert_eq!(aggregator.skipped(), 1);
    assert_eq!(aggregator.total(), 3.5);

    aggregator.commit().unwrap();
    assert_eq!(
        h.deliveries().last(),
        Some(&Delivery { sink: "second", start: 4000, end: 7600, entries: 2 })
    );
    assert_eq!(aggregator.checkpoints().get_metadata().unwrap().total, 3.5);
    assert_eq!(h.archived(0).unwrap()["compute"].len(), 1);
}

#[test]
fn test_resumed_late_record_merges_but_committed_one_is_skipped() {
    let h = Harness::new();
    let checkpoints = MemoryCheckpointStore::with_checkpoint(7200, 10.0);
    let mut aggregator = WindowAggregator::resume("tenant", P, h.backend(), checkpoints).unwrap();
    h.register(&mut aggregator, "first", false);

    // Jumps past the primed window, which commits empty
    aggregator.append(&mut vec![record(11000, &[("compute", 1.0)])]).unwrap();
    assert_eq!(aggregator.committed_end(), Some(10800));

    let mut batch = vec![record(10900, &[("compute", 2.0)]), record(7000, &[("compute", 4.0)])];
    aggregator.append(&mut batch).unwrap();

    assert_eq!(aggregator.skipped(), 1);
    assert_eq!(aggregator.window().unwrap().start, 11000);
    assert_eq!(aggregator.window().unwrap().entry_count(), 2);
    assert_eq!(aggregator.total(), 13.0);

    aggregator.commit().unwrap();
    assert_eq!(
        h.deliveries(),
        vec![
            Delivery { sink: "first", start: 7200, end: 10800, entries: 0 },
            Delivery { sink: "first", start: 11000, end: 14600, entries: 2 },
        ]
    );
}

#[test]
fn test_unrepresentable_timestamp_rejected_and_kept_in_batch() {
    let h = Harness::new();
    let mut aggregator = h.aggregator();

    let far = i64::MAX - 10;
    let usage = record(0, &[("compute", 1.0)]).usage;
    let mut batch = vec![PeriodRecord::new(far, i64::MAX, usage), record(0, &[("compute", 1.0)])];

    let err = aggregator.append(&mut batch).unwrap_err();
    assert!(matches!(err, AggregatorError::InvalidTimestamp(ts) if ts == far));
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].begin(), far);

    // The valid record was merged but nothing was committed on its behalf
    assert_eq!(aggregator.window().unwrap().start, 0);
    assert_eq!(aggregator.total(), 1.0);
    assert_eq!(aggregator.commits(), 0);
    assert!(h.deliveries().is_empty());

    assert!(matches!(
        aggregator.get_timeframe(far),
        Err(AggregatorError::InvalidTimestamp(ts)) if ts == far
    ));

    let checkpoints = MemoryCheckpointStore::with_checkpoint(far, 0.0);
    let resumed = WindowAggregator::resume("tenant", P, h.backend(), checkpoints);
    assert!(matches!(resumed, Err(AggregatorError::InvalidTimestamp(ts)) if ts == far));
}

#[test]
fn test_timeframe_read_leaves_commit_container_alone() {
    let h = Harness::new();
    // 2023-12-31 00:00 UTC
    let dec = 1_703_980_800;
    // 2024-01-31 21:00 UTC
    let jan = 1_706_734_800;
    // 2023-11-14 22:13:20 UTC
    let nov = 1_700_000_000;

    let mut december = h.aggregator();
    december.append(&mut vec![record(dec, &[("compute", 5.0)])]).unwrap();
    december.commit().unwrap();

    let mut aggregator = h.aggregator();
    aggregator
        .append(&mut vec![record(jan, &[("compute", 1.0)]), record(jan + P, &[("compute", 1.0)])])
        .unwrap();

    assert!(aggregator.get_timeframe(nov).unwrap()[0].usage.is_empty());
    assert!(!h.data_dir.join("tenant-2023-11.zip").exists());

    let formatted = aggregator.get_timeframe(dec).unwrap();
    assert_eq!(formatted[0].usage["compute"][0].price(), Some(5.0));

    aggregator.commit().unwrap();
    let mut archive = TransientArchive::open(&h.backend(), "tenant-2024-01.zip").unwrap();
    let mut names = archive.entry_names().unwrap();
    names.sort();
    assert_eq!(names, vec!["2024-01-31-21-0.json", "2024-01-31-22-0.json"]);
}

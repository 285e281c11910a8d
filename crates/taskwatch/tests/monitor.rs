use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use taskwatch::config::{Config, RefreshInterval, SortRule};
use taskwatch::controller::{Ack, ProcessController, ProcessSignaller};
use taskwatch::error::{CollectError, TerminationError};
use taskwatch::monitor::{Monitor, Presenter, Sampler};
use taskwatch::process::{ProcessRecord, ProcessSnapshotProvider};
use taskwatch::system::{SystemMetrics, SystemMetricsProvider};
use taskwatch::table::{SortColumn, SortDirection};

type Step = Result<Vec<ProcessRecord>, CollectError>;

/// Hands out queued results; once the queue runs dry the last good rows
/// repeat.
#[derive(Clone, Default)]
struct ScriptedProcesses {
    script: Arc<Mutex<VecDeque<Option<Step>>>>,
    last: Arc<Mutex<Vec<ProcessRecord>>>,
}

impl ScriptedProcesses {
    fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(Some(step));
    }

    fn push_panic(&self) {
        self.script.lock().unwrap().push_back(None);
    }
}

impl ProcessSnapshotProvider for ScriptedProcesses {
    fn collect(&mut self) -> Result<Vec<ProcessRecord>, CollectError> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Some(Ok(rows))) => {
                *self.last.lock().unwrap() = rows.clone();
                Ok(rows)
            }
            Some(Some(Err(err))) => Err(err),
            Some(None) => panic!("scripted provider failure"),
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }
}

struct StubSystem;

impl SystemMetricsProvider for StubSystem {
    fn collect(&mut self) -> Result<SystemMetrics, CollectError> {
        Ok(SystemMetrics {
            cpu_percent: 42.0,
            memory_used_bytes: 4_000_000_000,
            memory_total_bytes: 16_000_000_000,
            sampled_at: Local::now(),
        })
    }
}

/// 404 is gone, 403 belongs to someone else, everything else exits at once.
struct StubSignaller {
    signalled: Arc<Mutex<Vec<u32>>>,
}

impl ProcessSignaller for StubSignaller {
    fn send_terminate(&mut self, pid: u32) -> Result<(), TerminationError> {
        self.signalled.lock().unwrap().push(pid);
        match pid {
            404 => Err(TerminationError::NotFound),
            403 => Err(TerminationError::AccessDenied),
            _ => Ok(()),
        }
    }

    fn has_exited(&mut self, _pid: u32) -> bool {
        true
    }
}

#[derive(Default)]
struct Recorder {
    // makes the next snapshot callback linger before recording
    stall_next: AtomicBool,
    snapshots: Mutex<Vec<Vec<u32>>>,
    errors: Mutex<Vec<CollectError>>,
    terminations: Mutex<Vec<(u32, Result<Ack, TerminationError>)>>,
}

impl Presenter for Recorder {
    fn on_snapshot_updated(&self, _metrics: &SystemMetrics, rows: &[ProcessRecord]) {
        if self.stall_next.swap(false, Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(200));
        }
        let pids = rows.iter().map(|row| row.pid).collect();
        self.snapshots.lock().unwrap().push(pids);
    }

    fn on_collection_error(&self, error: &CollectError) {
        self.errors.lock().unwrap().push(error.clone());
    }

    fn on_termination_result(&self, pid: u32, outcome: &Result<Ack, TerminationError>) {
        self.terminations.lock().unwrap().push((pid, outcome.clone()));
    }
}

struct Harness {
    monitor: Monitor,
    processes: ScriptedProcesses,
    recorder: Arc<Recorder>,
    signalled: Arc<Mutex<Vec<u32>>>,
}

impl Harness {
    fn start(rule: SortRule, first: Vec<ProcessRecord>) -> Self {
        let config = Config {
            // long enough that no timer tick lands during a test
            refresh_interval: RefreshInterval::clamped(60),
            sort_rule: rule,
            ..Config::default()
        };
        let processes = ScriptedProcesses::default();
        processes.push(Ok(first));
        let recorder = Arc::new(Recorder::default());
        let signalled = Arc::new(Mutex::new(Vec::new()));
        let controller = ProcessController::new(
            StubSignaller {
                signalled: Arc::clone(&signalled),
            },
            Duration::from_millis(200),
        );

        let monitor = Monitor::with_parts(
            &config,
            Sampler::new(processes.clone(), StubSystem),
            controller,
            Arc::clone(&recorder) as Arc<dyn Presenter>,
        )
        .expect("monitor starts");
        assert!(wait_until(|| monitor.completed_passes() == 1));

        Self {
            monitor,
            processes,
            recorder,
            signalled,
        }
    }

    fn refresh_with(&self, step: Step) {
        let before = self.monitor.completed_passes();
        self.processes.push(step);
        self.monitor.refresh_now().expect("refresh queued");
        assert!(wait_until(|| self.monitor.completed_passes() == before + 1));
    }

    fn pids(&self) -> Vec<u32> {
        self.monitor.sorted_rows().iter().map(|row| row.pid).collect()
    }
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(3) {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn mixed_cpu_rows() -> Vec<ProcessRecord> {
    vec![
        ProcessRecord::new(1, "a", 10.0, 50),
        ProcessRecord::new(2, "b", 5.0, 200),
        ProcessRecord::unmeasured(3, "c", 10),
    ]
}

#[test]
fn cpu_ascending_places_unmeasured_rows_last() {
    let harness = Harness::start(SortRule::Typed, mixed_cpu_rows());
    assert_eq!(harness.pids(), vec![1, 2, 3]);

    // already on cpu (descending), so the same column flips to ascending
    harness.monitor.request_sort(SortColumn::Cpu);
    assert_eq!(
        harness.monitor.sort(),
        (SortColumn::Cpu, SortDirection::Ascending)
    );
    assert_eq!(harness.pids(), vec![2, 1, 3]);
    assert_eq!(harness.monitor.completed_passes(), 1);
    assert_eq!(
        harness.monitor.last_metrics().map(|metrics| metrics.cpu_percent),
        Some(42.0)
    );

    harness.monitor.shutdown();
}

#[test]
fn rendered_text_rule_falls_back_to_lexicographic_order() {
    let harness = Harness::start(SortRule::Text, mixed_cpu_rows());

    harness.monitor.request_sort(SortColumn::Cpu);
    // "10.0" < "5.0" < "n/a"
    assert_eq!(harness.pids(), vec![1, 2, 3]);

    harness.monitor.request_sort(SortColumn::Cpu);
    assert_eq!(
        harness.monitor.sort(),
        (SortColumn::Cpu, SortDirection::Descending)
    );
    assert_eq!(harness.pids(), vec![3, 2, 1]);

    harness.monitor.shutdown();
}

#[test]
fn sort_requests_are_pushed_to_the_presenter_without_sampling() {
    let harness = Harness::start(SortRule::Typed, mixed_cpu_rows());
    harness.monitor.request_sort(SortColumn::Pid);
    harness.monitor.request_sort(SortColumn::Pid);

    let snapshots = harness.recorder.snapshots.lock().unwrap().clone();
    assert_eq!(snapshots.len(), 3);
    assert_eq!(snapshots[1], vec![1, 2, 3]);
    assert_eq!(snapshots[2], vec![3, 2, 1]);
    assert_eq!(harness.monitor.completed_passes(), 1);

    harness.monitor.shutdown();
}

#[test]
fn a_slow_sort_delivery_is_never_overtaken_by_an_older_table() {
    let harness = Harness::start(SortRule::Typed, mixed_cpu_rows());
    harness
        .processes
        .push(Ok(vec![ProcessRecord::new(2, "b", 5.0, 200)]));
    harness.recorder.stall_next.store(true, Ordering::SeqCst);

    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(50));
            harness.monitor.refresh_now().expect("refresh queued");
        });
        harness.monitor.request_sort(SortColumn::Pid);
    });
    assert!(wait_until(|| harness.monitor.completed_passes() == 2));

    let snapshots = harness.recorder.snapshots.lock().unwrap().clone();
    assert_eq!(snapshots.last(), Some(&harness.pids()));
    assert_eq!(snapshots, vec![vec![1, 2, 3], vec![1, 2, 3], vec![2]]);

    harness.monitor.shutdown();
}

#[test]
fn selection_survives_refreshes_even_when_the_process_is_gone() {
    let harness = Harness::start(SortRule::Typed, mixed_cpu_rows());
    harness.monitor.request_select(2);

    harness.refresh_with(Ok(vec![
        ProcessRecord::new(2, "b", 7.0, 200),
        ProcessRecord::new(4, "d", 1.0, 80),
    ]));
    assert_eq!(harness.monitor.selected_pid(), Some(2));

    harness.refresh_with(Ok(vec![ProcessRecord::new(4, "d", 1.0, 80)]));
    assert_eq!(harness.monitor.selected_pid(), Some(2));
    assert_eq!(harness.pids(), vec![4]);

    harness.monitor.clear_selection();
    assert_eq!(harness.monitor.selected_pid(), None);

    harness.monitor.shutdown();
}

#[test]
fn failed_terminations_leave_the_table_alone() {
    let rows = vec![
        ProcessRecord::new(403, "root-owned", 2.0, 100),
        ProcessRecord::new(404, "vanished", 1.0, 100),
    ];
    let harness = Harness::start(SortRule::Typed, rows);
    harness.monitor.request_select(403);
    let before = harness.pids();

    assert_eq!(
        harness.monitor.request_terminate(404),
        Err(TerminationError::NotFound)
    );
    assert_eq!(
        harness.monitor.request_terminate(403),
        Err(TerminationError::AccessDenied)
    );

    assert_eq!(harness.pids(), before);
    assert_eq!(harness.monitor.selected_pid(), Some(403));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(harness.monitor.completed_passes(), 1);

    let reported = harness.recorder.terminations.lock().unwrap().clone();
    assert_eq!(
        reported,
        vec![
            (404, Err(TerminationError::NotFound)),
            (403, Err(TerminationError::AccessDenied)),
        ]
    );
    assert_eq!(harness.monitor.termination_history().len(), 2);

    harness.monitor.shutdown();
}

#[test]
fn successful_termination_clears_selection_and_refreshes() {
    let harness = Harness::start(
        SortRule::Typed,
        vec![
            ProcessRecord::new(500, "worker", 3.0, 100),
            ProcessRecord::new(501, "other", 1.0, 100),
        ],
    );
    harness.monitor.request_select(500);
    harness
        .processes
        .push(Ok(vec![ProcessRecord::new(501, "other", 1.0, 100)]));

    let ack = harness.monitor.request_terminate(500).expect("terminated");
    assert_eq!(ack.pid, 500);
    assert_eq!(harness.monitor.selected_pid(), None);
    assert_eq!(*harness.signalled.lock().unwrap(), vec![500]);

    assert!(wait_until(|| harness.monitor.completed_passes() == 2));
    assert_eq!(harness.pids(), vec![501]);

    harness.monitor.shutdown();
}

#[test]
fn collection_failures_are_reported_and_the_loop_keeps_going() {
    let harness = Harness::start(SortRule::Typed, mixed_cpu_rows());

    harness.refresh_with(Err(CollectError::ProcessTableUnavailable));
    assert_eq!(
        *harness.recorder.errors.lock().unwrap(),
        vec![CollectError::ProcessTableUnavailable]
    );
    // the previous snapshot stays on screen
    assert_eq!(harness.pids(), vec![1, 2, 3]);

    harness.processes.push_panic();
    let before = harness.monitor.completed_passes();
    harness.monitor.refresh_now().expect("refresh queued");
    assert!(wait_until(|| harness.monitor.completed_passes() == before + 1));
    assert!(matches!(
        harness.recorder.errors.lock().unwrap().last(),
        Some(CollectError::Worker(_))
    ));

    harness.refresh_with(Ok(vec![ProcessRecord::new(9, "fresh", 0.0, 1)]));
    assert_eq!(harness.pids(), vec![9]);

    harness.monitor.shutdown();
}

#[test]
fn refresh_interval_is_clamped_into_range() {
    let harness = Harness::start(SortRule::Typed, mixed_cpu_rows());

    assert_eq!(harness.monitor.set_refresh_interval(0).secs(), 1);
    assert_eq!(harness.monitor.set_refresh_interval(61).secs(), 60);
    assert_eq!(harness.monitor.set_refresh_interval(30).secs(), 30);
    assert_eq!(harness.monitor.refresh_interval().secs(), 30);

    harness.monitor.shutdown();
}

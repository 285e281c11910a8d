//! Core facade tying providers, table, scheduler and controller together
//! behind the calls a presentation layer makes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use crate::config::{Config, RefreshInterval};
use crate::controller::{Ack, NixSignaller, ProcessController, TerminationEvent};
use crate::error::{CollectError, Result, TerminationError};
use crate::process::{ProcessRecord, ProcessSnapshotProvider, SysinfoProcessProvider};
use crate::scheduler::{RefreshScheduler, SchedulerState};
use crate::system::{SysinfoSystemProvider, SystemMetrics, SystemMetricsProvider};
use crate::table::{SortColumn, SortDirection, SortStrategy, TableModel};

/// Receives everything the core has to show. Called from the refresh worker
/// as well as from whichever thread issued a request.
///
/// Snapshot deliveries are serialized and arrive in the order the table
/// changed. Read-only `Monitor` calls are fine from inside a callback;
/// calls that publish (`request_sort`) would deadlock.
pub trait Presenter: Send + Sync {
    fn on_snapshot_updated(&self, metrics: &SystemMetrics, rows: &[ProcessRecord]);

    fn on_collection_error(&self, error: &CollectError);

    fn on_termination_result(&self, pid: u32, outcome: &std::result::Result<Ack, TerminationError>);
}

/// One complete sampling pass.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub metrics: SystemMetrics,
    pub rows: Vec<ProcessRecord>,
}

pub struct Sampler {
    processes: Box<dyn ProcessSnapshotProvider>,
    system: Box<dyn SystemMetricsProvider>,
}

impl Sampler {
    pub fn new(
        processes: impl ProcessSnapshotProvider + 'static,
        system: impl SystemMetricsProvider + 'static,
    ) -> Self {
        Self {
            processes: Box::new(processes),
            system: Box::new(system),
        }
    }

    pub fn from_os(config: &Config) -> Self {
        Self::new(
            SysinfoProcessProvider::new(),
            SysinfoSystemProvider::new(config.cpu_window),
        )
    }

    /// System metrics first: their CPU window doubles as the delta window
    /// for the per-process figures read right after.
    pub fn sample(&mut self) -> std::result::Result<Snapshot, CollectError> {
        let metrics = self.system.collect()?;
        let rows = self.processes.collect()?;
        Ok(Snapshot { metrics, rows })
    }
}

struct View {
    table: TableModel,
    metrics: Option<SystemMetrics>,
}

struct Shared {
    view: Mutex<View>,
    // held from copying rows until the presenter returns
    publishing: Mutex<()>,
    sampler: Mutex<Sampler>,
    presenter: Arc<dyn Presenter>,
}

impl Shared {
    fn view(&self) -> MutexGuard<'_, View> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_pass(&self) {
        let mut sampler = self.sampler.lock().unwrap_or_else(PoisonError::into_inner);
        // a panicking provider is reported like any other failed pass
        let sampled = panic::catch_unwind(AssertUnwindSafe(|| sampler.sample()))
            .unwrap_or_else(|_| Err(CollectError::Worker("provider panicked".to_string())));
        drop(sampler);

        let _publishing = self.publishing();
        match sampled {
            Ok(snapshot) => {
                let count = snapshot.rows.len();
                let (metrics, rows) = {
                    let mut view = self.view();
                    view.table.replace(snapshot.rows);
                    view.metrics = Some(snapshot.metrics.clone());
                    (snapshot.metrics, view.table.sorted_rows().to_vec())
                };
                debug!(
                    "snapshot applied: {count} processes, cpu {:.1}%",
                    metrics.cpu_percent
                );
                self.presenter.on_snapshot_updated(&metrics, &rows);
            }
            Err(err) => {
                warn!("sampling pass failed: {err}");
                self.presenter.on_collection_error(&err);
            }
        }
    }

    fn publishing(&self) -> MutexGuard<'_, ()> {
        self.publishing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_current(&self) {
        let _publishing = self.publishing();
        let current = {
            let view = self.view();
            view.metrics
                .clone()
                .map(|metrics| (metrics, view.table.sorted_rows().to_vec()))
        };
        if let Some((metrics, rows)) = current {
            self.presenter.on_snapshot_updated(&metrics, &rows);
        }
    }
}

pub struct Monitor {
    shared: Arc<Shared>,
    controller: Mutex<ProcessController>,
    interval: Mutex<RefreshInterval>,
    scheduler: RefreshScheduler,
}

impl Monitor {
    /// Real OS sources; the first sample starts immediately.
    pub fn start(config: &Config, presenter: Arc<dyn Presenter>) -> Result<Self> {
        let controller = ProcessController::new(NixSignaller::new(), config.terminate_timeout);
        Self::with_parts(config, Sampler::from_os(config), controller, presenter)
    }

    pub fn with_parts(
        config: &Config,
        sampler: Sampler,
        controller: ProcessController,
        presenter: Arc<dyn Presenter>,
    ) -> Result<Self> {
        let direction = if config.sort_descending {
            SortDirection::Descending
        } else {
            SortDirection::Ascending
        };
        let table = TableModel::new(
            SortColumn::from(config.initial_sort),
            direction,
            SortStrategy::from(config.sort_rule),
        );

        let shared = Arc::new(Shared {
            view: Mutex::new(View {
                table,
                metrics: None,
            }),
            publishing: Mutex::new(()),
            sampler: Mutex::new(sampler),
            presenter,
        });

        let pass_shared = Arc::clone(&shared);
        let scheduler = RefreshScheduler::start(
            move || pass_shared.run_pass(),
            config.refresh_interval.as_duration(),
        )?;
        info!(
            "monitor started, refreshing every {}",
            config.refresh_interval
        );

        Ok(Self {
            shared,
            controller: Mutex::new(controller),
            interval: Mutex::new(config.refresh_interval),
            scheduler,
        })
    }

    /// Same column flips the direction, a new column starts ascending.
    /// Re-sorts the rows already held; no new sample is taken.
    pub fn request_sort(&self, column: SortColumn) {
        {
            let mut view = self.shared.view();
            let (current, direction) = view.table.sort();
            let direction = if current == column {
                direction.flipped()
            } else {
                SortDirection::Ascending
            };
            view.table.set_sort(column, direction);
        }
        self.shared.publish_current();
    }

    pub fn request_select(&self, pid: u32) {
        self.shared.view().table.select(pid);
    }

    pub fn clear_selection(&self) {
        self.shared.view().table.clear_selection();
    }

    pub fn selected_pid(&self) -> Option<u32> {
        self.shared.view().table.selected_pid()
    }

    pub fn sort(&self) -> (SortColumn, SortDirection) {
        self.shared.view().table.sort()
    }

    pub fn sorted_rows(&self) -> Vec<ProcessRecord> {
        self.shared.view().table.sorted_rows().to_vec()
    }

    pub fn last_metrics(&self) -> Option<SystemMetrics> {
        self.shared.view().metrics.clone()
    }

    /// Blocks for at most the controller's timeout. On success the selection
    /// is cleared if it pointed at `pid` and an out-of-band refresh is queued.
    /// The table itself is untouched until that refresh lands.
    pub fn request_terminate(&self, pid: u32) -> std::result::Result<Ack, TerminationError> {
        let outcome = self
            .controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .terminate(pid);

        if outcome.is_ok() {
            {
                let mut view = self.shared.view();
                if view.table.selected_pid() == Some(pid) {
                    view.table.clear_selection();
                }
            }
            if let Err(err) = self.scheduler.refresh_now() {
                warn!("could not queue refresh after terminating {pid}: {err}");
            }
        }

        self.shared.presenter.on_termination_result(pid, &outcome);
        outcome
    }

    pub fn termination_history(&self) -> Vec<TerminationEvent> {
        self.controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .history()
            .cloned()
            .collect()
    }

    /// Clamps into the supported range and applies from the next tick.
    pub fn set_refresh_interval(&self, secs: u64) -> RefreshInterval {
        let interval = RefreshInterval::clamped(secs);
        if interval.secs() != secs {
            warn!("refresh interval {secs}s out of range, using {interval}");
        }
        *self.interval.lock().unwrap_or_else(PoisonError::into_inner) = interval;
        if let Err(err) = self.scheduler.set_period(interval.as_duration()) {
            warn!("could not update refresh interval: {err}");
        }
        interval
    }

    pub fn refresh_interval(&self) -> RefreshInterval {
        *self.interval.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn refresh_now(&self) -> Result<()> {
        self.scheduler.refresh_now()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn completed_passes(&self) -> u64 {
        self.scheduler.completed_passes()
    }

    pub fn shutdown(self) {
        self.scheduler.shutdown();
    }
}

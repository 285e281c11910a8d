//! Timer driving the sample-render cycle.
//!
//! The loop runs on its own small tokio runtime. Each pass executes on the
//! blocking pool and the loop awaits it before looking at the timer or the
//! command queue again, so at most one pass is ever in flight. Ticks fall on
//! a fixed grid of periods from the moment the loop (or the latest period
//! change) started; grid points that pass while sampling are dropped, and
//! "refresh now" requests that queue up during a pass are answered by that
//! pass instead of starting another one.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use crate::error::{Result, TaskwatchError};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Work performed once per tick.
pub trait SamplePass: Send + Sync + 'static {
    fn run(&self);
}

impl<F> SamplePass for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn run(&self) {
        self()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SchedulerState {
    /// No timer armed: not started yet, or shut down.
    Idle,
    /// Waiting for the next tick or an explicit refresh.
    Scheduled,
    /// A pass is in flight.
    Sampling,
}

#[derive(Debug)]
enum Command {
    RefreshNow,
    SetPeriod(Duration),
}

pub struct RefreshScheduler {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<SchedulerState>,
    passes_rx: watch::Receiver<u64>,
    shutdown_tx: broadcast::Sender<()>,
    loop_handle: Option<JoinHandle<()>>,
    runtime: Option<Runtime>,
}

impl RefreshScheduler {
    /// Starts ticking immediately; the first pass runs right away.
    pub fn start<P: SamplePass>(pass: P, period: Duration) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .thread_name("taskwatch-refresh")
            .build()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let (passes_tx, passes_rx) = watch::channel(0u64);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let loop_handle = runtime.spawn(refresh_loop(
            Arc::new(pass),
            non_zero(period),
            command_rx,
            state_tx,
            passes_tx,
            shutdown_rx,
        ));

        Ok(Self {
            commands,
            state_rx,
            passes_rx,
            shutdown_tx,
            loop_handle: Some(loop_handle),
            runtime: Some(runtime),
        })
    }

    /// Requests an out-of-band pass. Coalesced into the current pass if one
    /// is already running.
    pub fn refresh_now(&self) -> Result<()> {
        self.send(Command::RefreshNow)
    }

    /// Takes effect from the next tick; a running pass is not interrupted.
    pub fn set_period(&self, period: Duration) -> Result<()> {
        self.send(Command::SetPeriod(non_zero(period)))
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_rx.borrow()
    }

    pub fn completed_passes(&self) -> u64 {
        *self.passes_rx.borrow()
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| TaskwatchError::runtime("refresh loop has stopped"))
    }

    /// Inside another tokio runtime blocking is not allowed, so the loop is
    /// abandoned without waiting and the state may not reach `Idle`.
    fn stop(&mut self) {
        let _ = self.shutdown_tx.send(());
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        let handle = self.loop_handle.take();
        if Handle::try_current().is_ok() {
            debug!("stopping refresh loop from async context without waiting");
            runtime.shutdown_background();
            return;
        }
        // let an in-flight pass finish so the loop can report Idle
        if let Some(handle) = handle {
            let _ = runtime.block_on(async { tokio::time::timeout(SHUTDOWN_GRACE, handle).await });
        }
        runtime.shutdown_timeout(SHUTDOWN_GRACE);
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn non_zero(period: Duration) -> Duration {
    period.max(Duration::from_millis(1))
}

/// Fixed tick grid anchored at `start`.
#[derive(Debug, Clone, Copy)]
struct Cadence {
    start: Instant,
    period: Duration,
}

impl Cadence {
    fn from_now(period: Duration) -> Self {
        Self {
            start: Instant::now(),
            period,
        }
    }

    /// First grid point strictly after `now`.
    fn next_after(&self, now: Instant) -> Instant {
        let elapsed = now.saturating_duration_since(self.start).as_nanos();
        let period = self.period.as_nanos().max(1);
        let periods = elapsed / period + 1;
        let offset = u64::try_from(periods.saturating_mul(period)).unwrap_or(u64::MAX);
        self.start + Duration::from_nanos(offset)
    }
}

async fn refresh_loop(
    pass: Arc<dyn SamplePass>,
    period: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<SchedulerState>,
    passes_tx: watch::Sender<u64>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut cadence = Cadence::from_now(period);
    // the first pass runs right away
    let mut due = cadence.start;
    let _ = state_tx.send(SchedulerState::Scheduled);

    loop {
        tokio::select! {
            _ = sleep_until(due) => {}
            command = commands.recv() => match command {
                Some(Command::RefreshNow) => debug!("explicit refresh requested"),
                Some(Command::SetPeriod(next)) => {
                    info!("refresh period set to {} ms", next.as_millis());
                    cadence = Cadence::from_now(next);
                    due = cadence.next_after(cadence.start);
                    continue;
                }
                None => break,
            },
            _ = shutdown.recv() => break,
        }

        let _ = state_tx.send(SchedulerState::Sampling);
        let job = Arc::clone(&pass);
        if let Err(err) = tokio::task::spawn_blocking(move || job.run()).await {
            warn!("sampling pass aborted: {err}");
        }
        passes_tx.send_modify(|count| *count += 1);

        // whatever queued up while sampling was answered by this pass
        let mut next_period = None;
        while let Ok(command) = commands.try_recv() {
            match command {
                Command::RefreshNow => trace!("refresh request coalesced into finished pass"),
                Command::SetPeriod(next) => next_period = Some(next),
            }
        }
        if let Some(next) = next_period {
            info!("refresh period set to {} ms", next.as_millis());
            cadence = Cadence::from_now(next);
        }
        // grid points that went by mid-pass are dropped, not replayed
        due = cadence.next_after(Instant::now());

        let _ = state_tx.send(SchedulerState::Scheduled);
    }

    let _ = state_tx.send(SchedulerState::Idle);
    debug!("refresh loop stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant as StdInstant;

    use super::*;

    #[derive(Default)]
    struct Probe {
        running: AtomicUsize,
        max_running: AtomicUsize,
        runs: AtomicUsize,
    }

    impl Probe {
        fn pass(self: &Arc<Self>, work: Duration) -> impl Fn() + Send + Sync + 'static {
            let probe = Arc::clone(self);
            move || {
                let now = probe.running.fetch_add(1, Ordering::SeqCst) + 1;
                probe.max_running.fetch_max(now, Ordering::SeqCst);
                thread::sleep(work);
                probe.running.fetch_sub(1, Ordering::SeqCst);
                probe.runs.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = StdInstant::now();
        while start.elapsed() < limit {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn passes_never_overlap_when_ticks_outpace_sampling() {
        let probe = Arc::new(Probe::default());
        let scheduler =
            RefreshScheduler::start(probe.pass(Duration::from_millis(40)), Duration::from_millis(5))
                .expect("scheduler");

        for _ in 0..20 {
            let _ = scheduler.refresh_now();
            thread::sleep(Duration::from_millis(10));
        }
        scheduler.shutdown();

        assert_eq!(probe.max_running.load(Ordering::SeqCst), 1);
        assert!(probe.runs() >= 2);
    }

    #[test]
    fn passes_keep_the_configured_cadence() {
        let probe = Arc::new(Probe::default());
        let scheduler = RefreshScheduler::start(
            probe.pass(Duration::from_millis(60)),
            Duration::from_millis(100),
        )
        .expect("scheduler");

        thread::sleep(Duration::from_millis(1_050));
        scheduler.shutdown();

        // ticks at 0, 100, ..., 1000; restarting the timer after each pass
        // would stretch the cycle to 160 ms and give about 7
        let runs = probe.runs();
        assert!((10..=12).contains(&runs), "unexpected pass count {runs}");
    }

    #[test]
    fn ticks_during_a_pass_are_dropped() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&starts);
        let scheduler = RefreshScheduler::start(
            move || {
                recorded.lock().unwrap().push(StdInstant::now());
                thread::sleep(Duration::from_millis(100));
            },
            Duration::from_millis(70),
        )
        .expect("scheduler");

        thread::sleep(Duration::from_millis(600));
        scheduler.shutdown();

        // a 100 ms pass on a 70 ms grid skips the point at 70 and resumes at
        // 140; replaying it would start the next pass right at 100
        let starts = starts.lock().unwrap();
        assert!(starts.len() >= 3, "only {} passes", starts.len());
        assert!(starts.len() <= 5, "{} passes", starts.len());
        for pair in starts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(130), "gap of {gap:?}");
        }
    }

    #[test]
    fn next_grid_point_is_strictly_after_now() {
        let cadence = Cadence::from_now(Duration::from_millis(100));
        let start = cadence.start;
        assert_eq!(cadence.next_after(start), start + Duration::from_millis(100));
        assert_eq!(
            cadence.next_after(start + Duration::from_millis(250)),
            start + Duration::from_millis(300)
        );
        assert_eq!(
            cadence.next_after(start + Duration::from_millis(300)),
            start + Duration::from_millis(400)
        );
    }

    #[test]
    fn refresh_requests_during_a_pass_are_coalesced() {
        let probe = Arc::new(Probe::default());
        let scheduler =
            RefreshScheduler::start(probe.pass(Duration::from_millis(150)), Duration::from_secs(60))
                .expect("scheduler");

        assert!(wait_until(Duration::from_secs(1), || {
            scheduler.state() == SchedulerState::Sampling
        }));
        for _ in 0..3 {
            scheduler.refresh_now().expect("send");
        }

        assert!(wait_until(Duration::from_secs(2), || scheduler.completed_passes() == 1));
        thread::sleep(Duration::from_millis(200));
        assert_eq!(probe.runs(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Scheduled);
    }

    #[test]
    fn explicit_refresh_runs_when_idle() {
        let probe = Arc::new(Probe::default());
        let scheduler =
            RefreshScheduler::start(probe.pass(Duration::from_millis(1)), Duration::from_secs(60))
                .expect("scheduler");

        assert!(wait_until(Duration::from_secs(1), || scheduler.completed_passes() == 1));
        scheduler.refresh_now().expect("send");
        assert!(wait_until(Duration::from_secs(1), || scheduler.completed_passes() == 2));
        assert_eq!(probe.runs(), 2);
    }

    #[test]
    fn shorter_period_applies_to_the_next_tick() {
        let probe = Arc::new(Probe::default());
        let scheduler =
            RefreshScheduler::start(probe.pass(Duration::from_millis(1)), Duration::from_secs(60))
                .expect("scheduler");

        assert!(wait_until(Duration::from_secs(1), || scheduler.completed_passes() == 1));
        scheduler
            .set_period(Duration::from_millis(20))
            .expect("send");
        assert!(wait_until(Duration::from_secs(2), || scheduler.completed_passes() >= 3));
    }

    #[test]
    fn shutdown_leaves_loop_idle() {
        let probe = Arc::new(Probe::default());
        let scheduler =
            RefreshScheduler::start(probe.pass(Duration::from_millis(1)), Duration::from_secs(60))
                .expect("scheduler");
        assert!(wait_until(Duration::from_secs(1), || scheduler.completed_passes() == 1));

        let state = scheduler.state_rx.clone();
        scheduler.shutdown();
        assert_eq!(*state.borrow(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn stopping_from_async_context_does_not_panic() {
        let probe = Arc::new(Probe::default());
        let scheduler =
            RefreshScheduler::start(probe.pass(Duration::from_millis(1)), Duration::from_secs(60))
                .expect("scheduler");
        scheduler.refresh_now().expect("send");
        scheduler.shutdown();
    }
}

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use log::{info, warn};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid as NixPid;
use sysinfo::{Pid, ProcessRefreshKind, System};

use crate::error::TerminationError;
use crate::process::has_exited;

const HISTORY_LEN: usize = 10;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The process is gone after a graceful termination request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub pid: u32,
    pub waited: Duration,
}

#[derive(Debug, Clone)]
pub struct TerminationEvent {
    pub timestamp: DateTime<Local>,
    pub pid: u32,
    pub process_name: String,
    pub outcome: Result<Ack, TerminationError>,
}

/// OS side of termination: deliver the request, then answer whether the
/// target is still around.
pub trait ProcessSignaller: Send {
    fn send_terminate(&mut self, pid: u32) -> Result<(), TerminationError>;

    /// Zombies count as exited; only their parent can reap them.
    fn has_exited(&mut self, pid: u32) -> bool;

    fn process_name(&mut self, _pid: u32) -> Option<String> {
        None
    }
}

/// SIGTERM through `kill(2)`, exit observed through sysinfo.
pub struct NixSignaller {
    system: System,
}

impl NixSignaller {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn refresh(&mut self, pid: u32) -> bool {
        self.system
            .refresh_process_specifics(Pid::from_u32(pid), ProcessRefreshKind::new())
    }
}

impl Default for NixSignaller {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSignaller for NixSignaller {
    fn send_terminate(&mut self, pid: u32) -> Result<(), TerminationError> {
        match kill(NixPid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(TerminationError::NotFound),
            Err(Errno::EPERM) => Err(TerminationError::AccessDenied),
            Err(err) => Err(TerminationError::unknown(format!(
                "failed to send SIGTERM: {err}"
            ))),
        }
    }

    fn has_exited(&mut self, pid: u32) -> bool {
        if let Err(Errno::ESRCH) = kill(NixPid::from_raw(pid as i32), None) {
            return true;
        }
        if !self.refresh(pid) {
            return true;
        }
        self.system
            .process(Pid::from_u32(pid))
            .map(|process| has_exited(process.status()))
            .unwrap_or(true)
    }

    fn process_name(&mut self, pid: u32) -> Option<String> {
        if !self.refresh(pid) {
            return None;
        }
        self.system
            .process(Pid::from_u32(pid))
            .map(|process| process.name().to_string())
    }
}

/// Graceful termination with a bounded wait for the exit.
pub struct ProcessController {
    signaller: Box<dyn ProcessSignaller>,
    timeout: Duration,
    poll_interval: Duration,
    history: VecDeque<TerminationEvent>,
}

impl ProcessController {
    pub fn new(signaller: impl ProcessSignaller + 'static, timeout: Duration) -> Self {
        Self {
            signaller: Box::new(signaller),
            timeout,
            poll_interval: POLL_INTERVAL,
            history: VecDeque::with_capacity(HISTORY_LEN),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    /// Newest first.
    pub fn history(&self) -> impl Iterator<Item = &TerminationEvent> {
        self.history.iter().rev()
    }

    pub fn terminate(&mut self, pid: u32) -> Result<Ack, TerminationError> {
        let process_name = self
            .signaller
            .process_name(pid)
            .unwrap_or_else(|| "unknown".to_string());

        let outcome = self.terminate_and_wait(pid);
        match &outcome {
            Ok(ack) => info!(
                "pid {pid} ({process_name}) exited {} ms after SIGTERM",
                ack.waited.as_millis()
            ),
            Err(err) => warn!("terminating pid {pid} ({process_name}) failed: {err}"),
        }

        self.push_event(TerminationEvent {
            timestamp: Local::now(),
            pid,
            process_name,
            outcome: outcome.clone(),
        });
        outcome
    }

    fn terminate_and_wait(&mut self, pid: u32) -> Result<Ack, TerminationError> {
        validate_target(pid)?;
        self.signaller.send_terminate(pid)?;

        let started = Instant::now();
        loop {
            if self.signaller.has_exited(pid) {
                return Ok(Ack {
                    pid,
                    waited: started.elapsed(),
                });
            }
            let waited = started.elapsed();
            if waited >= self.timeout {
                return Err(TerminationError::Timeout { waited });
            }
            thread::sleep(self.poll_interval.min(self.timeout - waited));
        }
    }

    fn push_event(&mut self, event: TerminationEvent) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }
}

fn validate_target(pid: u32) -> Result<(), TerminationError> {
    // 0 and anything past i32::MAX would address process groups in kill(2)
    if pid == 0 || pid > i32::MAX as u32 {
        return Err(TerminationError::NotFound);
    }
    if pid == 1 {
        return Err(TerminationError::unknown("refusing to signal pid 1"));
    }
    if pid == std::process::id() {
        return Err(TerminationError::unknown("refusing to signal taskwatch itself"));
    }
    Ok(())
}

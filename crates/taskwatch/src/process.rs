use std::collections::HashSet;

use log::trace;
use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessStatus, RefreshKind, System};

use crate::error::CollectError;

/// One row of a snapshot. Rebuilt from scratch on every sampling pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub name: String,
    /// `None` until the process has been seen across two refreshes. Not
    /// normalised to a single core, so values above 100 are legitimate.
    pub cpu_percent: Option<f32>,
    /// Resident set size.
    pub memory_bytes: u64,
}

impl ProcessRecord {
    pub fn new(pid: u32, name: impl Into<String>, cpu_percent: f32, memory_bytes: u64) -> Self {
        Self {
            pid,
            name: name.into(),
            cpu_percent: Some(cpu_percent),
            memory_bytes,
        }
    }

    pub fn unmeasured(pid: u32, name: impl Into<String>, memory_bytes: u64) -> Self {
        Self {
            pid,
            name: name.into(),
            cpu_percent: None,
            memory_bytes,
        }
    }
}

/// Source of the per-process table.
///
/// The returned rows carry no ordering guarantee. Processes that disappear,
/// turn into zombies or refuse inspection while the scan runs are left out of
/// the result; only a failure of the enumeration itself is an error.
pub trait ProcessSnapshotProvider: Send {
    fn collect(&mut self) -> Result<Vec<ProcessRecord>, CollectError>;
}

pub struct SysinfoProcessProvider {
    system: System,
    refresh: ProcessRefreshKind,
    seen: HashSet<Pid>,
}

impl SysinfoProcessProvider {
    pub fn new() -> Self {
        let refresh = ProcessRefreshKind::new().with_cpu().with_memory();
        let mut system = System::new_with_specifics(RefreshKind::new().with_processes(refresh));
        system.refresh_processes_specifics(refresh);
        let seen = system.processes().keys().copied().collect();
        Self {
            system,
            refresh,
            seen,
        }
    }
}

impl Default for SysinfoProcessProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSnapshotProvider for SysinfoProcessProvider {
    fn collect(&mut self) -> Result<Vec<ProcessRecord>, CollectError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(CollectError::Unsupported);
        }

        self.system.refresh_processes_specifics(self.refresh);
        let processes = self.system.processes();
        // at the very least this process is running, so an empty table means
        // the enumeration itself did not work.
        if processes.is_empty() {
            return Err(CollectError::ProcessTableUnavailable);
        }

        let mut rows = Vec::with_capacity(processes.len());
        let mut seen = HashSet::with_capacity(processes.len());
        for (pid, process) in processes {
            seen.insert(*pid);
            // omit on transient per-item failure
            let Some(record) = record_for(process, self.seen.contains(pid)) else {
                trace!("skipping pid {pid}: exited during scan");
                continue;
            };
            rows.push(record);
        }

        self.seen = seen;
        Ok(rows)
    }
}

fn record_for(process: &Process, sampled_before: bool) -> Option<ProcessRecord> {
    if has_exited(process.status()) {
        return None;
    }

    let cpu_percent = sampled_before.then(|| normalize_cpu(process.cpu_usage()));
    Some(ProcessRecord {
        pid: process.pid().as_u32(),
        name: process.name().to_string(),
        cpu_percent,
        memory_bytes: process.memory(),
    })
}

pub(crate) fn has_exited(status: ProcessStatus) -> bool {
    matches!(status, ProcessStatus::Zombie | ProcessStatus::Dead)
}

fn normalize_cpu(value: f32) -> f32 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

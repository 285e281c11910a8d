use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

use crate::error::CollectError;

/// Machine-wide load at the end of one sampling pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemMetrics {
    /// 0-100 across all cores.
    pub cpu_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub sampled_at: DateTime<Local>,
}

impl SystemMetrics {
    pub fn memory_used_percent(&self) -> f32 {
        if self.memory_total_bytes == 0 {
            return 0.0;
        }
        let ratio = self.memory_used_bytes as f64 / self.memory_total_bytes as f64;
        (ratio * 100.0) as f32
    }
}

pub trait SystemMetricsProvider: Send {
    fn collect(&mut self) -> Result<SystemMetrics, CollectError>;
}

/// Reads aggregate CPU and memory through sysinfo.
///
/// CPU usage is measured across a deliberate blocking window so the figure
/// is stable even when the previous call was only moments ago. Memory is
/// read instantaneously at the end of the window.
pub struct SysinfoSystemProvider {
    system: System,
    window: Duration,
}

impl SysinfoSystemProvider {
    pub fn new(window: Duration) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::new().with_cpu_usage())
                .with_memory(MemoryRefreshKind::new().with_ram()),
        );
        Self {
            system,
            window: window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }
}

impl Default for SysinfoSystemProvider {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl SystemMetricsProvider for SysinfoSystemProvider {
    fn collect(&mut self) -> Result<SystemMetrics, CollectError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(CollectError::Unsupported);
        }

        self.system.refresh_cpu();
        thread::sleep(self.window);
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let memory_total_bytes = self.system.total_memory();
        if memory_total_bytes == 0 {
            return Err(CollectError::MemoryUnavailable);
        }

        let cpu = self.system.global_cpu_info().cpu_usage();
        Ok(SystemMetrics {
            cpu_percent: if cpu.is_finite() { cpu.clamp(0.0, 100.0) } else { 0.0 },
            memory_used_bytes: self.system.used_memory().min(memory_total_bytes),
            memory_total_bytes,
            sampled_at: Local::now(),
        })
    }
}

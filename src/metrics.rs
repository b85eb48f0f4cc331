//! Per-process resource sampling behind a small probe seam.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

/// One resource reading for a single process.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessSample {
    pub cpu_percent: f32,
    pub rss_bytes: u64,
}

/// Source of per-process resource readings.
///
/// Implementations keep whatever state repeated CPU readings require, so
/// sampling takes `&mut self`.
pub trait ResourceProbe: Send {
    /// Sample the process, or `None` when it cannot be observed.
    fn sample(&mut self, pid: u32) -> Option<ProcessSample>;
}

/// Probe backed by the sysinfo crate.
///
/// The first CPU reading for a process is always zero; meaningful numbers
/// need two samples separated by some interval.
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new_with_specifics(RefreshKind::nothing()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&mut self, pid: u32) -> Option<ProcessSample> {
        let pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            false,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
        let process = self.system.process(pid)?;
        Some(ProcessSample {
            cpu_percent: process.cpu_usage(),
            rss_bytes: process.memory(),
        })
    }
}

/// Probe that observes nothing.
#[derive(Debug, Default)]
pub struct NullProbe;

impl ResourceProbe for NullProbe {
    fn sample(&mut self, _pid: u32) -> Option<ProcessSample> {
        None
    }
}

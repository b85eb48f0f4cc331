//! Self-observation for the worker process.
//!
//! The done report carries RSS and CPU-time readings taken at job start and
//! end. CPU times come from `getrusage` on unix; RSS comes from the same
//! sysinfo probe the controller uses, pointed at our own pid.

use crate::metrics::{ResourceProbe, SysinfoProbe};

/// One reading of this process's resource usage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageSnapshot {
    pub rss_bytes: u64,
    /// Cumulative user-mode CPU seconds.
    pub cpu_user: f64,
    /// Cumulative kernel-mode CPU seconds.
    pub cpu_system: f64,
}

/// Take a usage reading for the current process. Readings that cannot be
/// made are reported as zero rather than failing the job.
pub fn snapshot(probe: &mut SysinfoProbe) -> UsageSnapshot {
    let rss_bytes = sysinfo::get_current_pid()
        .ok()
        .and_then(|pid| probe.sample(pid.as_u32()))
        .map(|sample| sample.rss_bytes)
        .unwrap_or(0);
    let (cpu_user, cpu_system) = cpu_times();
    UsageSnapshot {
        rss_bytes,
        cpu_user,
        cpu_system,
    }
}

#[cfg(unix)]
fn cpu_times() -> (f64, f64) {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return (0.0, 0.0);
    }
    (timeval_secs(usage.ru_utime), timeval_secs(usage.ru_stime))
}

#[cfg(unix)]
fn timeval_secs(tv: libc::timeval) -> f64 {
    tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0
}

#[cfg(not(unix))]
fn cpu_times() -> (f64, f64) {
    (0.0, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_sees_own_process() {
        let mut probe = SysinfoProbe::new();
        let reading = snapshot(&mut probe);
        assert!(reading.rss_bytes > 0);
        assert!(reading.cpu_user >= 0.0);
        assert!(reading.cpu_system >= 0.0);
    }

    #[cfg(unix)]
    #[test]
    fn test_cpu_times_monotone() {
        let (user_a, _) = cpu_times();
        // Burn a little user time.
        let mut total = 0u64;
        for i in 0..2_000_000u64 {
            total = total.wrapping_add(i);
        }
        std::hint::black_box(total);
        let (user_b, _) = cpu_times();
        assert!(user_b >= user_a);
    }
}

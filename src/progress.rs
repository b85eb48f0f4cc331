//! Wall-clock progress estimation for running tasks.
//!
//! OCR tools give no machine-readable progress, so displayed percentages are
//! estimated from input size and elapsed time. Estimates cap at 95 percent;
//! only a real terminal state moves a task to 100.

use std::time::Instant;

/// Estimated processing seconds for an input of the given size.
///
/// Unknown sizes assume a 5 MiB document. The result is clamped to
/// 8..=240 seconds so tiny files still show motion and huge files do not
/// flatline the bar.
pub fn estimate_seconds(input_size: Option<u64>) -> f64 {
    let size_mb = match input_size {
        Some(bytes) => bytes as f64 / (1024.0 * 1024.0),
        None => 5.0,
    };
    (size_mb.max(1.0) * 2.2).clamp(8.0, 240.0)
}

/// Advances a task's displayed percentage while its worker runs.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    started: Instant,
    estimated_secs: f64,
    last_bump: Option<Instant>,
}

impl ProgressEstimator {
    pub fn new(estimated_secs: f64, now: Instant) -> Self {
        Self {
            started: now,
            estimated_secs,
            last_bump: None,
        }
    }

    /// Compute the next displayed percentage.
    ///
    /// The elapsed-time target never exceeds 95. When the target falls at or
    /// below the current value the estimate has stalled; in that case the
    /// value creeps up by one point at most once per second so long jobs
    /// still visibly move.
    pub fn advance(&mut self, current: u8, now: Instant) -> u8 {
        let elapsed = now.duration_since(self.started).as_secs_f64();
        let ratio = elapsed / self.estimated_secs.max(1.0);
        let mut target = (ratio * 95.0).min(95.0) as u8;

        if target <= current {
            if let Some(last) = self.last_bump {
                if now.duration_since(last).as_secs_f64() < 1.0 {
                    return current;
                }
            }
            target = (current + 1).min(95);
        }
        self.last_bump = Some(now);
        target
    }
}

// src/poll.rs
//! Deadline-bounded polling of a remote count
//!
//! The deadline is a no-progress window: it restarts whenever a read gets closer to
//! the target than any earlier read, so a slow but advancing controller can finish.

use std::time::{Duration, Instant};
use tracing::debug;

use crate::constants::{DEFAULT_DISCOVERY_DEADLINE_MS, DEFAULT_POLL_INTERVAL};
use crate::remote::pause;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Longest stretch without progress before giving up
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            deadline: Duration::from_millis(DEFAULT_DISCOVERY_DEADLINE_MS),
        }
    }
}

impl PollPolicy {
    pub fn new(interval: Duration, deadline_ms: u64) -> Self {
        Self {
            interval,
            deadline: Duration::from_millis(deadline_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollOutcome {
    /// Target read; `elapsed` is measured from the caller's start instant
    Reached { elapsed: Duration, max: i64 },
    DeadlineExceeded { last: i64, max: i64 },
}

impl PollOutcome {
    /// Elapsed seconds, or -1.0 when the deadline elapsed.
    pub fn secs_or_sentinel(&self) -> f64 {
        match self {
            PollOutcome::Reached { elapsed, .. } => elapsed.as_secs_f64(),
            PollOutcome::DeadlineExceeded { .. } => crate::constants::SENTINEL_F64,
        }
    }

    pub fn max(&self) -> i64 {
        match self {
            PollOutcome::Reached { max, .. } | PollOutcome::DeadlineExceeded { max, .. } => *max,
        }
    }
}

/// Read `read()` until it equals `target` or no progress was made for `policy.deadline`.
///
/// Negative reads are transport failures: they never count as progress.
pub fn poll_until<F>(policy: &PollPolicy, t_start: Instant, target: i64, mut read: F) -> PollOutcome
where
    F: FnMut() -> i64,
{
    let mut last_progress = Instant::now();
    let mut best_gap: Option<u64> = None;
    let mut max = -1i64;

    loop {
        let n = read();
        max = max.max(n);
        if n == target {
            return PollOutcome::Reached {
                elapsed: t_start.elapsed(),
                max,
            };
        }
        if n >= 0 {
            let gap = target.abs_diff(n);
            if best_gap.map_or(true, |best| gap < best) {
                debug!("poll progress: {} (target {})", n, target);
                best_gap = Some(gap);
                last_progress = Instant::now();
            }
        }
        if last_progress.elapsed() >= policy.deadline {
            debug!("poll deadline: {} without progress at {}", policy.deadline.as_millis(), n);
            return PollOutcome::DeadlineExceeded { last: n, max };
        }
        pause(policy.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(deadline_ms: u64) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(1), deadline_ms)
    }

    #[test]
    fn test_reaches_target() {
        let mut n = 0;
        let out = poll_until(&fast(1_000), Instant::now(), 5, || {
            n += 1;
            n
        });
        assert!(matches!(out, PollOutcome::Reached { max: 5, .. }));
        assert!(out.secs_or_sentinel() >= 0.0);
    }

    #[test]
    fn test_stalled_count_hits_deadline() {
        let out = poll_until(&fast(20), Instant::now(), 50, || 49);
        assert_eq!(out, PollOutcome::DeadlineExceeded { last: 49, max: 49 });
        assert_eq!(out.secs_or_sentinel(), -1.0);
    }

    #[test]
    fn test_progress_extends_deadline() {
        // one step every 5 ms, deadline 15 ms: total run time well beyond the deadline
        let t0 = Instant::now();
        let out = poll_until(&PollPolicy::new(Duration::from_millis(5), 15), t0, 10, || {
            ((t0.elapsed().as_millis() / 5) as i64).min(10)
        });
        assert!(matches!(out, PollOutcome::Reached { .. }));
    }

    #[test]
    fn test_countdown_to_zero_and_failures() {
        let mut n = 4;
        let out = poll_until(&fast(1_000), Instant::now(), 0, || {
            n -= 1;
            n
        });
        assert!(matches!(out, PollOutcome::Reached { max: 3, .. }));

        let out = poll_until(&fast(10), Instant::now(), 3, || -1);
        assert_eq!(out, PollOutcome::DeadlineExceeded { last: -1, max: -1 });
    }
}

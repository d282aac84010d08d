// src/monitor.rs
//! Monitors paired with a generator run
//!
//! - `ThroughputMonitor` follows the flood generator's stdout line by line and takes
//!   one sample per `total = <x> per ms` line until a termination sentinel arrives
//! - `DiscoveryMonitor` polls the controller's switch count until the expected
//!   topology is discovered or the no-progress deadline elapses

use crossbeam_channel::{Receiver, RecvTimeoutError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::constants::*;
use crate::poll::{poll_until, PollOutcome, PollPolicy};
use crate::sample::Sample;

const THROUGHPUT_PATTERN: &str = r"total = (.+) per ms";

static THROUGHPUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(THROUGHPUT_PATTERN).expect("THROUGHPUT_PATTERN is a valid regex"));

/// Responses per second from one generator line, if it is a throughput line.
pub fn parse_throughput(line: &str) -> Option<f64> {
    let caps = THROUGHPUT_RE.captures(line)?;
    let per_ms: f64 = caps.get(1)?.as_str().trim().parse().ok()?;
    Some(per_ms * 1000.0)
}

/// How a throughput monitor run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Successful,
    Failed,
    /// No line within the line timeout
    TimedOut,
    /// Producer went away without a sentinel
    Disconnected,
}

#[derive(Debug)]
pub struct MonitorOutcome {
    pub samples: Vec<Sample>,
    pub termination: Termination,
}

impl MonitorOutcome {
    pub fn is_success(&self) -> bool {
        self.termination == Termination::Successful
    }
}

pub struct ThroughputMonitor {
    line_timeout: Duration,
}

impl Default for ThroughputMonitor {
    fn default() -> Self {
        Self::new(MONITOR_LINE_TIMEOUT)
    }
}

impl ThroughputMonitor {
    pub fn new(line_timeout: Duration) -> Self {
        Self { line_timeout }
    }

    fn record(snapshot: &mut impl FnMut() -> Sample, throughput: f64) -> Sample {
        let mut sample = snapshot();
        sample.insert("throughput_responses_sec", throughput);
        sample.insert("failed_flow_operations", 0);
        sample
    }

    /// Consume `lines` until a sentinel; `snapshot` supplies dimensions and statistics.
    pub fn run<F>(&self, lines: &Receiver<String>, mut snapshot: F) -> MonitorOutcome
    where
        F: FnMut() -> Sample,
    {
        let mut samples = Vec::new();
        let termination = loop {
            let line = match lines.recv_timeout(self.line_timeout) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => break Termination::TimedOut,
                Err(RecvTimeoutError::Disconnected) => break Termination::Disconnected,
            };
            if line == SUCCESSFUL_TERMINATION {
                break Termination::Successful;
            }
            if line == FAILED_TERMINATION {
                break Termination::Failed;
            }
            if let Some(rate) = parse_throughput(&line) {
                info!("[monitor] throughput {:.1} responses/s", rate);
                samples.push(Self::record(&mut snapshot, rate));
            }
        };

        if termination != Termination::Successful {
            warn!("[monitor] generator ended with {:?}", termination);
            samples.push(Self::record(&mut snapshot, SENTINEL_F64));
        }
        MonitorOutcome {
            samples,
            termination,
        }
    }
}

/// Result of a topology discovery wait
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscoveryResult {
    pub bootup_time_secs: f64,
    pub discovered_switches: i64,
    pub max_discovered_switches: i64,
    /// `ERR_DISCOVERY_DEADLINE` when the target was not reached
    pub error_code: Option<u16>,
}

impl DiscoveryResult {
    pub fn succeeded(&self) -> bool {
        self.error_code.is_none()
    }

    pub fn write_into(&self, sample: &mut Sample) {
        sample.insert("bootup_time_secs", self.bootup_time_secs);
        sample.insert("discovered_switches", self.discovered_switches);
        sample.insert("max_discovered_switches", self.max_discovered_switches);
        sample.insert("discovered_switches_error_code", self.error_code.unwrap_or(0));
        let successful = if self.succeeded() {
            self.bootup_time_secs
        } else {
            SENTINEL_F64
        };
        sample.insert("successful_bootup_time", successful);
    }
}

pub struct DiscoveryMonitor {
    policy: PollPolicy,
}

impl DiscoveryMonitor {
    pub fn new(policy: PollPolicy) -> Self {
        Self { policy }
    }

    /// Poll `read_switches` until it returns `expected`; time is measured from `t_start`.
    pub fn run<F>(&self, expected: u64, t_start: Instant, mut read_switches: F) -> DiscoveryResult
    where
        F: FnMut() -> i64,
    {
        let mut last = SENTINEL_I64;
        let outcome = poll_until(&self.policy, t_start, expected as i64, || {
            last = read_switches();
            debug!("[monitor] discovered {}/{} switches", last, expected);
            last
        });
        match outcome {
            PollOutcome::Reached { elapsed, max } => {
                info!("[monitor] {} switches discovered in {:.1}s", expected, elapsed.as_secs_f64());
                DiscoveryResult {
                    bootup_time_secs: elapsed.as_secs_f64(),
                    discovered_switches: last,
                    max_discovered_switches: max,
                    error_code: None,
                }
            }
            PollOutcome::DeadlineExceeded { last, max } => {
                warn!(
                    "[monitor] discovery stalled at {}/{} switches (max {})",
                    last, expected, max
                );
                DiscoveryResult {
                    bootup_time_secs: SENTINEL_F64,
                    discovered_switches: last,
                    max_discovered_switches: max,
                    error_code: Some(ERR_DISCOVERY_DEADLINE),
                }
            }
        }
    }
}

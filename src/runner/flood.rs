// src/runner/flood.rs
//! Active flood generator scenario (scalability and stability)

use crossbeam_channel::unbounded;
use std::thread;
use tracing::{debug, info, warn};

use super::{start_controller, Handles, PointCtx};
use crate::config::TestType;
use crate::constants::*;
use crate::error::{NstatError, Result};
use crate::monitor::ThroughputMonitor;
use crate::sample::ResultSeries;

/// One flood run per repeat, sampled line by line by the throughput monitor.
pub(super) fn run_active(ctx: &PointCtx<'_>, h: &mut Handles, series: &mut ResultSeries) -> Result<()> {
    start_controller(ctx, &mut h.controller)?;

    let controller = &h.controller;
    let flood = h.emulator.as_flood_mut()?;
    let ip = controller.ip().to_string();
    let port = controller.sb_port();
    let monitor = ThroughputMonitor::new(ctx.opts.line_timeout);

    for repeat in 0..ctx.cfg.scenario.repeats {
        info!("[flood] repeat {}/{}", repeat + 1, ctx.cfg.scenario.repeats);
        let (tx, rx) = unbounded::<String>();

        let (outcome, run_res) = thread::scope(|s| {
            let flood = &mut *flood;
            let ip = ip.as_str();
            let generator = s.spawn(move || {
                let res = flood.run(ip, port, Some(&tx));
                let sentinel = if res.is_ok() {
                    SUCCESSFUL_TERMINATION
                } else {
                    FAILED_TERMINATION
                };
                if tx.send(sentinel.to_string()).is_err() {
                    debug!("[flood] monitor went away before the {} sentinel", sentinel);
                }
                res
            });
            let outcome = monitor.run(&rx, || ctx.snapshot(controller, repeat));
            let run_res = generator
                .join()
                .unwrap_or_else(|_| Err(NstatError::Config("flood generator thread panicked".into())));
            (outcome, run_res)
        });

        for sample in outcome.samples {
            series.push(sample);
        }
        if let Err(e) = run_res {
            warn!("[flood] repeat {} failed", repeat + 1);
            return Err(e);
        }
    }

    if ctx.test_type != TestType::SbActiveStabilityMtcbench {
        h.controller.stop()?;
    }
    Ok(())
}

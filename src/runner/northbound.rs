// src/runner/northbound.rs
//! Northbound flow scenario: flows pushed over RESTCONF, confirmed on the switches

use std::time::Instant;
use tracing::info;

use super::discovery::{boot_topology, prepare_topology};
use super::{missing, Handles, PointCtx};
use crate::constants::*;
use crate::error::Result;
use crate::poll::poll_until;
use crate::sample::ResultSeries;

pub(super) fn run(ctx: &PointCtx<'_>, h: &mut Handles, series: &mut ResultSeries) -> Result<()> {
    prepare_topology(ctx, h)?;

    let controller = &h.controller;
    let topo = h.emulator.as_topo_mut()?;
    let discovery = boot_topology(ctx, controller, topo)?;

    let nb = h.nb.as_mut().ok_or_else(|| missing("nb_emulator"))?;
    let cfg = controller.config();
    let t_start = Instant::now();
    let report = nb.run(
        controller.ip(),
        controller.restconf_port(),
        &cfg.restconf_user,
        &cfg.restconf_password,
    )?;

    // switches hold every flow after ADD, none after DELETE
    let target = if nb.flow_delete { 0 } else { nb.total_flows as i64 };
    let probe = topo.mint_session()?;
    let outcome = poll_until(&ctx.poll_policy(), t_start, target, || {
        topo.get_flows(Some(probe.as_ref()))
            .map(|n| n as i64)
            .unwrap_or(SENTINEL_I64)
    });
    let end_to_end = outcome.secs_or_sentinel();
    info!(
        "[nb] {} flows, end-to-end {:.3}s (max seen on switches {})",
        nb.total_flows,
        end_to_end,
        outcome.max()
    );

    let mut sample = ctx.snapshot(controller, 0);
    discovery.write_into(&mut sample);
    sample.merge_object(&report);
    sample.insert("end_to_end_flows_operation_time", end_to_end);
    series.push(sample);

    drop(probe);
    topo.stop_topos()?;
    topo.cleanup()?;
    h.controller.stop()
}

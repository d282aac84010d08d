// src/runner/discovery.rs
//! Idle scalability scenarios: how long the controller takes to discover a topology

use std::thread;
use std::time::Instant;
use tracing::{info, warn};

use super::{start_controller, Handles, PointCtx};
use crate::error::{NstatError, Result};
use crate::handle::{ControllerHandle, TopoGenHandle};
use crate::monitor::{DiscoveryMonitor, DiscoveryResult};
use crate::sample::ResultSeries;

/// Flood generator switches connect while the monitor polls the controller.
pub(super) fn run_flood_idle(ctx: &PointCtx<'_>, h: &mut Handles, series: &mut ResultSeries) -> Result<()> {
    start_controller(ctx, &mut h.controller)?;

    let controller = &h.controller;
    let flood = h.emulator.as_flood_mut()?;
    let expected = flood.get_overall_topo_size();
    let stopper = flood.stopper()?;
    let probe = controller.mint_session()?;
    let ip = controller.ip().to_string();
    let port = controller.sb_port();
    info!(
        "[discovery] expecting {} switches, boot estimate {} ms",
        expected,
        flood.get_topo_bootup_ms()
    );

    let (result, run_res) = thread::scope(|s| {
        let t_start = Instant::now();
        let flood = &mut *flood;
        let ip = ip.as_str();
        let generator = s.spawn(move || flood.run(ip, port, None));
        let result = DiscoveryMonitor::new(ctx.poll_policy())
            .run(expected, t_start, || controller.get_oper_switches(Some(probe.as_ref())));
        if let Err(e) = stopper.stop() {
            warn!("[discovery] flood stop failed: {}", e);
        }
        let run_res = generator
            .join()
            .unwrap_or_else(|_| Err(NstatError::Config("flood generator thread panicked".into())));
        (result, run_res)
    });
    if let Err(e) = run_res {
        // the stop handler may end the generator with a non-zero status
        warn!(code = e.code(), "[discovery] flood generator ended with error: {}", e);
    }

    let mut sample = ctx.snapshot(controller, 0);
    result.write_into(&mut sample);
    series.push(sample);

    drop(probe);
    h.controller.stop()
}

/// Start the already-initialized topology while the monitor polls the controller.
pub(super) fn boot_topology(
    ctx: &PointCtx<'_>,
    controller: &ControllerHandle,
    topo: &mut TopoGenHandle,
) -> Result<DiscoveryResult> {
    let expected = topo.get_overall_topo_size();
    let probe = controller.mint_session()?;
    info!(
        "[discovery] expecting {} switches over {} worker(s), boot estimate {} ms",
        expected,
        topo.worker_count(),
        topo.get_topo_bootup_ms()
    );

    let (result, start_res) = thread::scope(|s| {
        let t_start = Instant::now();
        let starter = s.spawn(|| topo.start_topos());
        let result = DiscoveryMonitor::new(ctx.poll_policy())
            .run(expected, t_start, || controller.get_oper_switches(Some(probe.as_ref())));
        let start_res = starter
            .join()
            .unwrap_or_else(|_| Err(NstatError::Config("start_topos thread panicked".into())));
        (result, start_res)
    });
    start_res?;
    Ok(result)
}

/// Deploy the topology generator, start the controller and initialize the topology.
pub(super) fn prepare_topology(ctx: &PointCtx<'_>, h: &mut Handles) -> Result<()> {
    let ip = h.controller.ip().to_string();
    let port = h.controller.sb_port();
    h.emulator.as_topo_mut()?.deploy(&ip, port)?;
    start_controller(ctx, &mut h.controller)?;
    h.emulator.as_topo_mut()?.init_topos()
}

pub(super) fn run_topo_idle(ctx: &PointCtx<'_>, h: &mut Handles, series: &mut ResultSeries) -> Result<()> {
    prepare_topology(ctx, h)?;

    let controller = &h.controller;
    let topo = h.emulator.as_topo_mut()?;
    let result = boot_topology(ctx, controller, topo)?;

    let mut sample = ctx.snapshot(controller, 0);
    result.write_into(&mut sample);
    series.push(sample);

    topo.stop_topos()?;
    topo.cleanup()?;
    h.controller.stop()
}

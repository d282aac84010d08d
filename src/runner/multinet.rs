// src/runner/multinet.rs
//! Topology generator scenarios measured with the OpenFlow packet sniffer

use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::discovery::{boot_topology, prepare_topology};
use super::{missing, Handles, PointCtx};
use crate::error::Result;
use crate::handle::sniffer::{OfCounts, OfRates};
use crate::handle::SnifferHandle;
use crate::remote::pause;
use crate::sample::{ResultSeries, Sample};

fn rates_between(before: Option<OfCounts>, after: Option<OfCounts>, elapsed: Duration) -> OfRates {
    match (before, after) {
        (Some(b), Some(a)) => b.rates_to(&a, elapsed.as_secs_f64()),
        _ => {
            warn!("[sniffer] counters unavailable, recording sentinels");
            OfRates::unavailable()
        }
    }
}

fn write_rates(sample: &mut Sample, rates: &OfRates) {
    if let Ok(v) = serde_json::to_value(rates) {
        sample.merge_object(&v);
    }
}

fn start_sniffer(h: &mut Handles) -> Result<()> {
    let of_port = h.controller.sb_port();
    h.sniffer
        .as_mut()
        .ok_or_else(|| missing("sniffer"))?
        .start(of_port)
}

fn sniffer(h: &Handles) -> Result<&SnifferHandle> {
    h.sniffer.as_ref().ok_or_else(|| missing("sniffer"))
}

/// Tear the topology down, then the sniffer and the controller.
fn finish(h: &mut Handles) -> Result<()> {
    let topo = h.emulator.as_topo_mut()?;
    topo.stop_topos()?;
    topo.cleanup()?;
    if let Some(sn) = h.sniffer.as_mut() {
        sn.stop()?;
    }
    h.controller.stop()
}

/// Boot an idle topology, then take one OpenFlow rate sample per repeat.
pub(super) fn run_idle_stability(ctx: &PointCtx<'_>, h: &mut Handles, series: &mut ResultSeries) -> Result<()> {
    prepare_topology(ctx, h)?;
    start_sniffer(h)?;

    let discovery = {
        let controller = &h.controller;
        let topo = h.emulator.as_topo_mut()?;
        boot_topology(ctx, controller, topo)?
    };

    let interval = Duration::from_millis(ctx.cfg.scenario.sample_interval_ms);
    let sn = sniffer(h)?;
    for repeat in 0..ctx.cfg.scenario.repeats {
        let before = sn.read_counts();
        let t0 = Instant::now();
        pause(interval);
        let after = sn.read_counts();
        let rates = rates_between(before, after, t0.elapsed());
        info!(
            "[sniffer] sample {}: {:.1} pkt/s in, {:.1} pkt/s out",
            repeat, rates.of_in_packets_per_sec, rates.of_out_packets_per_sec
        );

        let mut sample = ctx.snapshot(&h.controller, repeat);
        discovery.write_into(&mut sample);
        write_rates(&mut sample, &rates);
        sample.insert("current_oper_switches", h.controller.get_oper_switches(None));
        series.push(sample);
    }

    finish(h)
}

/// Boot a topology, run host traffic and sample OpenFlow rates over the traffic window.
pub(super) fn run_active(ctx: &PointCtx<'_>, h: &mut Handles, series: &mut ResultSeries) -> Result<()> {
    prepare_topology(ctx, h)?;
    start_sniffer(h)?;

    let controller = &h.controller;
    let topo = h.emulator.as_topo_mut()?;
    let discovery = boot_topology(ctx, controller, topo)?;

    let sn = h.sniffer.as_ref().ok_or_else(|| missing("sniffer"))?;
    let before = sn.read_counts();
    let t0 = Instant::now();
    topo.generate_traffic()?;
    let after = sn.read_counts();
    let rates = rates_between(before, after, t0.elapsed());

    let mut sample = ctx.snapshot(controller, 0);
    discovery.write_into(&mut sample);
    write_rates(&mut sample, &rates);
    series.push(sample);

    finish(h)
}

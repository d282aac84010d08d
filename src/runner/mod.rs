// src/runner/mod.rs
//! Test runner: setup, Cartesian sweep, per-point scenario, teardown
//!
//! The runner owns every handle and the result series. A failing point is logged
//! with its error code, torn down and counted; the sweep then moves on. Setup
//! failures skip the sweep but still reach the final best-effort cleanup.

mod discovery;
mod flood;
mod multinet;
mod northbound;

use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{EmulatorFamily, TestConfig, TestType};
use crate::constants::*;
use crate::error::{NstatError, Result};
use crate::handle::{ControllerHandle, Lifecycle, NbGenHandle, SbEmulator, SnifferHandle};
use crate::poll::PollPolicy;
use crate::remote::SharedConnector;
use crate::sample::{ResultSeries, Sample};
use crate::stats::StatSampler;
use crate::sweep::{axes_for, cartesian, SweepPoint};

/// Cadences the runner hands to handles and monitors
#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    pub poll_interval: Duration,
    pub line_timeout: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            line_timeout: MONITOR_LINE_TIMEOUT,
        }
    }
}

/// Every handle of a run, owned by the runner
pub struct Handles {
    pub controller: ControllerHandle,
    pub emulator: SbEmulator,
    pub nb: Option<NbGenHandle>,
    pub sniffer: Option<SnifferHandle>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub setup_ok: bool,
    pub points: usize,
    pub failed_points: usize,
    pub samples: usize,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.setup_ok && self.failed_points == 0
    }
}

/// What a scenario needs to know about the point it runs
pub(crate) struct PointCtx<'a> {
    pub test_type: TestType,
    pub cfg: &'a TestConfig,
    pub opts: &'a RunnerOptions,
    pub point: &'a SweepPoint,
}

impl PointCtx<'_> {
    /// Identity, scenario constants and dimension values of the point.
    pub fn base_sample(&self, repeat_id: u32) -> Sample {
        let mut s = Sample::new();
        s.insert("test_type", self.test_type.as_str());
        s.insert("controller_name", self.cfg.controller.name.as_str());
        s.insert("sb_emulator_name", self.cfg.sb_emulator.name.as_str());
        s.insert("repeat_id", repeat_id);
        if let Ok(Value::Object(scenario)) = serde_json::to_value(&self.cfg.scenario) {
            s.extend(scenario);
        }
        self.point.annotate(&mut s);
        s
    }

    /// Base sample plus controller-host statistics.
    pub fn snapshot(&self, controller: &ControllerHandle, repeat_id: u32) -> Sample {
        let mut s = self.base_sample(repeat_id);
        s.extend(StatSampler::new(controller.session().ok()).sample(controller.pid()));
        s
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(self.opts.poll_interval, self.cfg.scenario.discovery_deadline_ms)
    }
}

/// Start, or restart when the config asks for a fresh controller every point.
pub(crate) fn start_controller(ctx: &PointCtx<'_>, controller: &mut ControllerHandle) -> Result<()> {
    if ctx.cfg.controller.restart {
        controller.restart()
    } else {
        controller.start()
    }
}

fn best_effort(what: &str, res: Result<()>) {
    if let Err(e) = res {
        warn!(code = e.code(), "{} failed during teardown: {}", what, e);
    }
}

pub struct TestRunner {
    test_type: TestType,
    cfg: TestConfig,
    connector: SharedConnector,
    opts: RunnerOptions,
    series: ResultSeries,
}

impl TestRunner {
    pub fn new(test_type: TestType, cfg: TestConfig, connector: SharedConnector) -> Self {
        Self {
            test_type,
            cfg,
            connector,
            opts: RunnerOptions::default(),
            series: ResultSeries::new(),
        }
    }

    pub fn with_options(mut self, opts: RunnerOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn series(&self) -> &ResultSeries {
        &self.series
    }

    fn create_handles(&self) -> Result<Handles> {
        let controller = ControllerHandle::new(&self.cfg.controller, self.connector.clone())?
            .with_poll_interval(self.opts.poll_interval);
        let emulator = SbEmulator::new(&self.cfg.sb_emulator, self.connector.clone())?;
        let nb = match (&self.cfg.nb_emulator, self.test_type.requires_nb_emulator()) {
            (Some(nb), true) => {
                let mut h = NbGenHandle::new(nb, self.connector.clone())?;
                h.set_scenario(&self.cfg.scenario);
                Some(h)
            }
            _ => None,
        };
        let sniffer = match (&self.cfg.sniffer, self.test_type.requires_sniffer()) {
            (Some(sn), true) => Some(SnifferHandle::new(sn, self.connector.clone())?),
            _ => None,
        };
        Ok(Handles {
            controller,
            emulator,
            nb,
            sniffer,
        })
    }

    /// Open sessions, build everything and apply the one-time controller configuration.
    fn setup(&self, h: &mut Handles) -> Result<()> {
        h.controller.init_ssh()?;
        h.emulator.init_ssh()?;
        if let Some(nb) = h.nb.as_mut() {
            nb.init_ssh()?;
        }
        if let Some(sn) = h.sniffer.as_mut() {
            sn.init_ssh()?;
        }

        h.controller.build()?;
        h.emulator.build()?;
        if let Some(nb) = h.nb.as_mut() {
            nb.build()?;
        }
        if let Some(sn) = h.sniffer.as_mut() {
            sn.build()?;
        }
        if let SbEmulator::TopoGen(topo) = &mut h.emulator {
            topo.copy_local_handlers()?;
        }

        let handlers = &self.cfg.controller.handlers;
        let wants_flowmods = self.test_type.requires_nb_emulator() && handlers.flowmods_config.is_some();
        let reconfigures = !self.cfg.controller.persistence
            || wants_flowmods
            || !self.cfg.dimensions.controller_statistics_period_ms.is_empty();
        if reconfigures {
            // configuration files exist only after a first boot
            h.controller.generate_xmls()?;
        }
        if !self.cfg.controller.persistence {
            h.controller.disable_persistence()?;
        }
        if wants_flowmods {
            h.controller.flowmods_config()?;
        }
        Ok(())
    }

    fn apply_point(&self, h: &mut Handles, point: &SweepPoint) -> Result<()> {
        match &mut h.emulator {
            SbEmulator::FloodGen(flood) => {
                flood.set_scenario(&self.cfg.scenario);
                flood.threads = point.require_u64("mtcbench_threads")?;
                flood.switches_per_thread = point.require_u64("mtcbench_switches_per_thread")?;
                flood.thread_creation_delay_ms = point.require_u64("mtcbench_thread_creation_delay_ms")?;
                flood.delay_before_traffic_ms = point.require_u64("mtcbench_delay_before_traffic_ms")?;
                flood.simulated_hosts = point.require_u64("mtcbench_simulated_hosts")?;
            }
            SbEmulator::TopoGen(topo) => {
                topo.topo_size = point.require_u64("topology_size")?;
                if let Some(t) = point.get_str("topology_type") {
                    topo.topo_type = t.to_string();
                }
                topo.hosts_per_switch = point.require_u64("topology_hosts_per_switch")?;
                topo.group_size = point.require_u64("topology_group_size")?;
                topo.group_delay_ms = point.require_u64("topology_group_delay_ms")?;
                if let Some(v) = point.get_u64("multinet_traffic_gen_duration_ms") {
                    topo.traffic_gen_duration_ms = v;
                }
                if let Some(v) = point.get_u64("interpacket_delay_ms") {
                    topo.interpacket_delay_ms = v;
                }
            }
        }
        if let Some(nb) = h.nb.as_mut() {
            nb.total_flows = point.require_u64("total_flows")?;
            nb.flow_workers = point.require_u64("flow_workers")?;
            nb.flow_operations_delay_ms = point.require_u64("flow_operations_delay_ms")?;
        }
        Ok(())
    }

    fn run_point(&mut self, h: &mut Handles, point: &SweepPoint) -> Result<()> {
        self.apply_point(h, point)?;
        if let Some(ms) = point.get_u64("controller_statistics_period_ms") {
            h.controller.change_stats_period(ms)?;
        }

        let ctx = PointCtx {
            test_type: self.test_type,
            cfg: &self.cfg,
            opts: &self.opts,
            point,
        };
        let series = &mut self.series;
        match self.test_type {
            TestType::SbActiveScalabilityMtcbench | TestType::SbActiveStabilityMtcbench => {
                flood::run_active(&ctx, h, series)
            }
            TestType::SbIdleScalabilityMtcbench => discovery::run_flood_idle(&ctx, h, series),
            TestType::SbIdleScalabilityMultinet => discovery::run_topo_idle(&ctx, h, series),
            TestType::SbIdleStabilityMultinet => multinet::run_idle_stability(&ctx, h, series),
            TestType::SbActiveScalabilityMultinet => multinet::run_active(&ctx, h, series),
            TestType::NbActiveScalabilityMultinet => northbound::run(&ctx, h, series),
        }
    }

    /// Undo whatever the failed or finished point left running.
    fn teardown_point(h: &mut Handles, keep_controller: bool) {
        if let SbEmulator::TopoGen(topo) = &mut h.emulator {
            if topo.topology_up() {
                best_effort("stop_topos", topo.stop_topos());
                best_effort("topology cleanup", topo.cleanup());
            }
        }
        if let Some(sn) = h.sniffer.as_mut() {
            if sn.is_running() {
                best_effort("sniffer stop", sn.stop());
            }
        }
        if !keep_controller && h.controller.is_running() {
            best_effort("controller stop", h.controller.stop());
        }
    }

    fn teardown(h: &mut Handles) {
        Self::teardown_point(h, false);
        best_effort("controller clean", h.controller.clean());
        best_effort("sb_emulator clean", h.emulator.clean());
        if let Some(nb) = h.nb.as_mut() {
            best_effort("nb_emulator clean", nb.clean());
        }
        if let Some(sn) = h.sniffer.as_mut() {
            best_effort("sniffer clean", sn.clean());
        }
        h.controller.close();
        h.emulator.core_mut().close();
        if let Some(nb) = h.nb.as_mut() {
            nb.core_mut().close();
        }
        if let Some(sn) = h.sniffer.as_mut() {
            sn.core_mut().close();
        }
    }

    /// Run the whole sweep; samples accumulate in `series()`.
    pub fn run(&mut self) -> RunSummary {
        let mut summary = RunSummary {
            setup_ok: false,
            points: 0,
            failed_points: 0,
            samples: 0,
        };

        let points = match self.cfg.validate(self.test_type).and_then(|_| {
            axes_for(self.test_type, &self.cfg.dimensions).map(|axes| cartesian(&axes))
        }) {
            Ok(points) => points,
            Err(e) => {
                error!(code = e.code(), kind = e.kind(), "invalid configuration: {}", e);
                return summary;
            }
        };
        summary.points = points.len();

        let mut handles = match self.create_handles() {
            Ok(h) => h,
            Err(e) => {
                error!(code = e.code(), kind = e.kind(), "cannot create handles: {}", e);
                return summary;
            }
        };

        info!("{}: {} sweep point(s)", self.test_type, points.len());
        match self.setup(&mut handles) {
            Ok(()) => {
                summary.setup_ok = true;
                let keep_controller = self.test_type == TestType::SbActiveStabilityMtcbench;
                for (i, point) in points.iter().enumerate() {
                    info!("point {}/{}: {}", i + 1, points.len(), point);
                    if let Err(e) = self.run_point(&mut handles, point) {
                        summary.failed_points += 1;
                        error!(
                            code = e.code(),
                            kind = e.kind(),
                            "point {}/{} ({}) failed: {}",
                            i + 1,
                            points.len(),
                            point,
                            e
                        );
                        Self::teardown_point(&mut handles, false);
                    } else {
                        Self::teardown_point(&mut handles, keep_controller);
                    }
                }
            }
            Err(e) => {
                error!(code = e.code(), kind = e.kind(), "setup failed: {}", e);
            }
        }

        Self::teardown(&mut handles);
        summary.samples = self.series.len();
        info!(
            "{} done: {}/{} point(s) ok, {} sample(s)",
            self.test_type,
            summary.points - summary.failed_points,
            summary.points,
            summary.samples
        );
        summary
    }

    /// `run`, then write the result document whatever happened.
    pub fn run_to(&mut self, output: &Path) -> Result<RunSummary> {
        let summary = self.run();
        self.series.write_json(output)?;
        Ok(summary)
    }

    pub fn emulator_family(&self) -> EmulatorFamily {
        self.test_type.emulator_family()
    }
}

/// Config error for a handle a scenario needs but the run does not have.
pub(crate) fn missing(what: &str) -> NstatError {
    NstatError::Config(format!("{} is not configured for this test type", what))
}

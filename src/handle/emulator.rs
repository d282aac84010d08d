// src/handle/emulator.rs
//! Southbound switch emulators
//!
//! Two families share one lifecycle:
//! - `FloodGenHandle` (MT-Cbench): a single blocking run whose stdout carries
//!   throughput lines
//! - `TopoGenHandle` (Multinet): deploy, staged topology boot, traffic generation
//!   and per-worker queries, every step going through the venv wrapper
//!
//! `SbEmulator` is the sum type the runner holds; `SbEmulator::new` dispatches on the
//! configured emulator name.

use crossbeam_channel::Sender;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

use super::{HandleCore, Lifecycle, Status, Transition};
use crate::config::{ScenarioConfig, SbEmulatorConfig};
use crate::constants::*;
use crate::error::{NstatError, Result};
use crate::remote::{shell_quote, RunOptions, SharedConnector, Shell};

// =============================================================================
// FloodGen
// =============================================================================

const FLOOD_RUN: Transition = Transition {
    running: Status::Started,
    done: Status::Stopped,
    failed: Status::NotStarted,
};

/// Synthetic OpenFlow flood generator (MT-Cbench)
pub struct FloodGenHandle {
    core: HandleCore,
    cfg: SbEmulatorConfig,
    pub threads: u64,
    pub switches_per_thread: u64,
    pub thread_creation_delay_ms: u64,
    pub delay_before_traffic_ms: u64,
    pub simulated_hosts: u64,
    pub ms_per_test: u64,
    pub internal_repeats: u64,
    pub warmup: u64,
    pub mode: String,
}

impl FloodGenHandle {
    pub fn new(cfg: &SbEmulatorConfig, connector: SharedConnector) -> Self {
        let scenario = ScenarioConfig::default();
        Self {
            core: HandleCore::new("mtcbench", cfg.node.clone(), &cfg.base_dir, connector),
            cfg: cfg.clone(),
            threads: 1,
            switches_per_thread: 1,
            thread_creation_delay_ms: 0,
            delay_before_traffic_ms: 0,
            simulated_hosts: 1,
            ms_per_test: scenario.ms_per_test,
            internal_repeats: scenario.internal_repeats,
            warmup: scenario.warmup,
            mode: scenario.mode,
        }
    }

    /// Copy the scenario constants the generator is invoked with.
    pub fn set_scenario(&mut self, scenario: &ScenarioConfig) {
        self.ms_per_test = scenario.ms_per_test;
        self.internal_repeats = scenario.internal_repeats;
        self.warmup = scenario.warmup;
        self.mode = scenario.mode.clone();
    }

    pub fn get_topo_bootup_ms(&self) -> u64 {
        self.threads * self.thread_creation_delay_ms
    }

    pub fn get_overall_topo_size(&self) -> u64 {
        self.threads * self.switches_per_thread
    }

    /// Handler arguments in invocation order.
    pub fn run_args(&self, controller_ip: &str, sb_port: u16) -> Vec<String> {
        vec![
            controller_ip.to_string(),
            sb_port.to_string(),
            self.threads.to_string(),
            self.switches_per_thread.to_string(),
            self.get_overall_topo_size().to_string(),
            self.thread_creation_delay_ms.to_string(),
            self.delay_before_traffic_ms.to_string(),
            self.ms_per_test.to_string(),
            self.internal_repeats.to_string(),
            self.simulated_hosts.to_string(),
            self.warmup.to_string(),
            self.mode.clone(),
        ]
    }

    /// Blocking run; every output line goes to `lines` as it arrives.
    pub fn run(&mut self, controller_ip: &str, sb_port: u16, lines: Option<&Sender<String>>) -> Result<()> {
        let run = self.cfg.handlers.run.clone().ok_or_else(|| {
            self.core
                .funnel(NstatError::Config("sb_emulator.handlers.run is not set".into()))
        })?;
        info!(
            "[mtcbench] run: {} threads x {} switches, {} ms per test, {} repeats",
            self.threads, self.switches_per_thread, self.ms_per_test, self.internal_repeats
        );
        let args = self.run_args(controller_ip, sb_port);
        let mut opts = RunOptions::new().prefix("[mtcbench]");
        if let Some(tx) = lines {
            opts = opts.lines(tx);
        }
        self.core.run_transition(&run, &args, FLOOD_RUN, &opts).map(|_| ())
    }

    /// Stopper bound to a fresh session, usable while `run` blocks on another thread.
    pub fn stopper(&self) -> Result<FloodGenStopper> {
        let path = self.cfg.handlers.stop.as_deref().map(|h| self.core.resolve(h));
        Ok(FloodGenStopper {
            shell: self.core.mint_session()?,
            path,
        })
    }

    pub fn mint_session(&self) -> Result<Box<dyn Shell>> {
        self.core.mint_session()
    }
}

/// Ends a running flood early through the optional stop handler.
pub struct FloodGenStopper {
    shell: Box<dyn Shell>,
    path: Option<String>,
}

impl FloodGenStopper {
    pub fn stop(&self) -> Result<()> {
        let Some(path) = &self.path else {
            debug!("[mtcbench] no stop handler, waiting for the run to finish");
            return Ok(());
        };
        let out = self.shell.exec(&shell_quote(path))?;
        if !out.success() {
            warn!("[mtcbench] stop handler exited {}: {}", out.status, out.trimmed());
        }
        Ok(())
    }
}

impl Lifecycle for FloodGenHandle {
    fn core(&self) -> &HandleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut HandleCore {
        &mut self.core
    }

    fn build_handler(&self) -> Option<String> {
        self.cfg.handlers.build.clone()
    }

    fn clean_handler(&self) -> Option<String> {
        self.cfg.handlers.clean.clone()
    }
}

// =============================================================================
// TopoGen
// =============================================================================

const INIT_TOPOS: Transition = Transition {
    running: Status::Starting,
    done: Status::ToposInitialized,
    failed: Status::ToposNotInitialized,
};

const START_TOPOS: Transition = Transition {
    running: Status::Starting,
    done: Status::ToposStarted,
    failed: Status::NotStarted,
};

const TRAFFIC: Transition = Transition {
    running: Status::TrafficUp,
    done: Status::TrafficDown,
    failed: Status::TrafficDown,
};

const STOP_TOPOS: Transition = Transition {
    running: Status::Stopping,
    done: Status::ToposStopped,
    failed: Status::NotStopped,
};

const CLEANUP_TOPOS: Transition = Transition {
    running: Status::Cleaning,
    done: Status::ToposCleaned,
    failed: Status::NotCleaned,
};

/// Credentials and location of the emulator installation on every worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyDeploy {
    pub multinet_base_dir: String,
    pub ssh_port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// Topology parameters for one sweep point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyParams {
    pub controller_ip_address: String,
    pub controller_of_port: u16,
    pub switch_type: String,
    pub topo_type: String,
    pub topo_size: u64,
    pub group_size: u64,
    pub group_delay: u64,
    pub hosts_per_switch: u64,
}

/// Document shipped to the emulator master before `deploy`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub master_ip: String,
    pub master_port: u16,
    pub worker_ip_list: Vec<String>,
    pub worker_port_list: Vec<u16>,
    pub deploy: TopologyDeploy,
    pub topo: TopologyParams,
    pub traffic_generation_duration_ms: u64,
    pub interpacket_delay_ms: u64,
}

impl TopologyConfig {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Sum the per-worker values tagged `[<name>][response data] [...]` in `output`.
///
/// Each array element is a single-entry object (`{"<worker>": n}`) or a bare number.
pub fn parse_tagged_sum(name: &str, output: &str) -> Option<u64> {
    let pattern = format!(
        r"\[{}\]{}\s*(\[.*\])",
        regex::escape(name),
        regex::escape(TOPOGEN_RESPONSE_TAG)
    );
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures_iter(output).last()?;
    let items: Vec<Value> = serde_json::from_str(caps.get(1)?.as_str()).ok()?;
    let mut total = 0u64;
    for item in items {
        total += match item {
            Value::Object(map) => map.values().map(|v| v.as_u64()).sum::<Option<u64>>()?,
            other => other.as_u64()?,
        };
    }
    Some(total)
}

/// Topology emulator (Multinet) driven through a venv wrapper
pub struct TopoGenHandle {
    core: HandleCore,
    cfg: SbEmulatorConfig,
    pub topo_size: u64,
    pub topo_type: String,
    pub hosts_per_switch: u64,
    pub group_size: u64,
    pub group_delay_ms: u64,
    pub traffic_gen_duration_ms: u64,
    pub interpacket_delay_ms: u64,
    controller_ip: String,
    controller_sb_port: u16,
    /// Set by a successful `init_topos`, cleared by a successful `cleanup`
    topos_initialized: bool,
}

impl TopoGenHandle {
    pub fn new(cfg: &SbEmulatorConfig, connector: SharedConnector) -> Self {
        Self {
            core: HandleCore::new("multinet", cfg.node.clone(), &cfg.base_dir, connector),
            cfg: cfg.clone(),
            topo_size: 0,
            topo_type: "Linear".to_string(),
            hosts_per_switch: 0,
            group_size: 1,
            group_delay_ms: 0,
            traffic_gen_duration_ms: 0,
            interpacket_delay_ms: 0,
            controller_ip: String::new(),
            controller_sb_port: 0,
            topos_initialized: false,
        }
    }

    pub fn worker_count(&self) -> u64 {
        self.cfg.worker_ips.len().max(1) as u64
    }

    /// Boot time of one worker's topology in groups of `group_size`.
    pub fn get_topo_bootup_ms(&self) -> u64 {
        if self.group_size == 0 {
            return 0;
        }
        (self.topo_size / self.group_size) * self.group_delay_ms
    }

    pub fn get_overall_topo_size(&self) -> u64 {
        self.topo_size * self.worker_count()
    }

    pub fn render_config(&self) -> TopologyConfig {
        TopologyConfig {
            master_ip: self.cfg.node.ip.clone(),
            master_port: self.cfg.master_port,
            worker_ip_list: self.cfg.worker_ips.clone(),
            worker_port_list: self.cfg.worker_ports.clone(),
            deploy: TopologyDeploy {
                multinet_base_dir: self.core.base_dir().to_string(),
                ssh_port: self.cfg.node.ssh_port,
                username: self.cfg.node.username.clone(),
                password: self.cfg.node.password.clone(),
            },
            topo: TopologyParams {
                controller_ip_address: self.controller_ip.clone(),
                controller_of_port: self.controller_sb_port,
                switch_type: self.cfg.switch_type.clone(),
                topo_type: self.topo_type.clone(),
                topo_size: self.topo_size,
                group_size: self.group_size,
                group_delay: self.group_delay_ms,
                hosts_per_switch: self.hosts_per_switch,
            },
            traffic_generation_duration_ms: self.traffic_gen_duration_ms,
            interpacket_delay_ms: self.interpacket_delay_ms,
        }
    }

    pub fn remote_config_path(&self) -> String {
        self.core.resolve(TOPOGEN_REMOTE_CONFIG)
    }

    /// Copy `local_handlers_dir` (if configured) onto the remote base dir.
    pub fn copy_local_handlers(&self) -> Result<()> {
        let Some(dir) = &self.cfg.local_handlers_dir else {
            return Ok(());
        };
        info!("[multinet] copying {} to {}", dir.display(), self.core.base_dir());
        self.core
            .session()?
            .copy_dir_to(dir, self.core.base_dir())
            .map_err(|e| self.core.funnel(e))
    }

    fn ship_config(&self) -> Result<()> {
        let text = self.render_config().to_json()?;
        let mut tmp = tempfile::NamedTempFile::new()
            .map_err(|e| NstatError::io("creating topology config", e))?;
        tmp.write_all(text.as_bytes())
            .map_err(|e| NstatError::io("writing topology config", e))?;
        let remote = self.remote_config_path();
        debug!("[multinet] shipping config to {}", remote);
        self.core.session()?.copy_file_to(tmp.path(), &remote)
    }

    /// Wrapper invocation `wrapper <handler> <config>`, or the handler alone without a wrapper.
    fn wrapped(&self, shell: &dyn Shell, handler: &str) -> Result<(String, Vec<String>)> {
        let handler_path = self.core.ensure_handler(shell, handler)?;
        match &self.cfg.handlers.venv_wrapper {
            Some(wrapper) => Ok((wrapper.clone(), vec![handler_path, self.remote_config_path()])),
            None => Ok((handler.to_string(), vec![self.remote_config_path()])),
        }
    }

    fn step(&mut self, handler: Option<String>, what: &str, tr: Transition) -> Result<()> {
        let handler = handler.ok_or_else(|| {
            self.core.funnel(NstatError::Config(format!(
                "sb_emulator.handlers.{} is not set",
                what
            )))
        })?;
        let (cmd, args) = match self.core.session().and_then(|s| self.wrapped(s, &handler)) {
            Ok(v) => v,
            Err(e) => {
                self.core.set_status(tr.failed);
                return Err(self.core.funnel(e));
            }
        };
        info!("[multinet] {}", what);
        self.core
            .run_transition(&cmd, &args, tr, &RunOptions::new().prefix("[multinet]"))
            .map(|_| ())
    }

    /// Render and ship the topology config, then run the deploy handler.
    pub fn deploy(&mut self, controller_ip: &str, sb_port: u16) -> Result<()> {
        self.controller_ip = controller_ip.to_string();
        self.controller_sb_port = sb_port;
        if let Err(e) = self.ship_config() {
            self.core.set_status(Status::NotDeployed);
            return Err(self.core.funnel(e));
        }
        self.step(self.cfg.handlers.deploy.clone(), "deploy", Transition::DEPLOY)
    }

    pub fn init_topos(&mut self) -> Result<()> {
        self.step(self.cfg.handlers.init_topos.clone(), "init_topos", INIT_TOPOS)?;
        self.topos_initialized = true;
        Ok(())
    }

    pub fn start_topos(&mut self) -> Result<()> {
        self.step(self.cfg.handlers.start_topos.clone(), "start_topos", START_TOPOS)
    }

    pub fn generate_traffic(&mut self) -> Result<()> {
        self.step(self.cfg.handlers.traffic_gen.clone(), "traffic_gen", TRAFFIC)
    }

    pub fn stop_topos(&mut self) -> Result<()> {
        self.step(self.cfg.handlers.stop_topos.clone(), "stop_topos", STOP_TOPOS)
    }

    pub fn cleanup(&mut self) -> Result<()> {
        self.step(self.cfg.handlers.cleanup.clone(), "cleanup", CLEANUP_TOPOS)?;
        self.topos_initialized = false;
        Ok(())
    }

    fn query(&mut self, handler: Option<String>, what: &str, shell: Option<&dyn Shell>, done: Status) -> Result<u64> {
        let handler = handler.ok_or_else(|| {
            self.core.funnel(NstatError::Config(format!(
                "sb_emulator.handlers.{} is not set",
                what
            )))
        })?;
        let shell = match shell {
            Some(s) => s,
            None => self.core.session()?,
        };
        let (cmd, args) = self.wrapped(shell, &handler).map_err(|e| self.core.funnel(e))?;
        let out = self
            .core
            .invoke(Some(shell), &cmd, &args, &RunOptions::new())
            .map_err(|e| self.core.funnel(e))?;
        if !out.success() {
            return Err(self.core.funnel(NstatError::HandlerFailed {
                handle: self.core.name().to_string(),
                path: self.core.resolve(&handler),
                status: out.status,
                output: out.output,
            }));
        }
        let tag = Path::new(&handler)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&handler)
            .to_string();
        match parse_tagged_sum(&tag, &out.output) {
            Some(n) => {
                self.core.set_status(done);
                Ok(n)
            }
            None => Err(self.core.funnel(NstatError::OutputParse {
                handle: self.core.name().to_string(),
                handler: tag,
                output: out.output,
            })),
        }
    }

    /// Switches booted across all workers; `shell` is an optional minted session.
    pub fn get_switches(&mut self, shell: Option<&dyn Shell>) -> Result<u64> {
        self.query(self.cfg.handlers.get_switches.clone(), "get_switches", shell, Status::GotSwitches)
    }

    /// Flows installed across all worker switches.
    pub fn get_flows(&mut self, shell: Option<&dyn Shell>) -> Result<u64> {
        self.query(self.cfg.handlers.get_flows.clone(), "get_flows", shell, Status::GotFlows)
    }

    pub fn mint_session(&self) -> Result<Box<dyn Shell>> {
        self.core.mint_session()
    }

    /// Topology initialized on the workers and not cleaned up yet.
    pub fn topology_up(&self) -> bool {
        self.topos_initialized
    }
}

impl Lifecycle for TopoGenHandle {
    fn core(&self) -> &HandleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut HandleCore {
        &mut self.core
    }

    fn build_handler(&self) -> Option<String> {
        self.cfg.handlers.build.clone()
    }

    fn clean_handler(&self) -> Option<String> {
        self.cfg.handlers.clean.clone()
    }
}

impl Drop for TopoGenHandle {
    fn drop(&mut self) {
        if !self.core.has_session() {
            return;
        }
        if self.topology_up() {
            if let Err(e) = self.stop_topos() {
                warn!("[multinet] stop_topos on drop failed: {}", e);
            }
            if let Err(e) = self.cleanup() {
                warn!("[multinet] cleanup on drop failed: {}", e);
            }
        }
        self.core.close();
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Southbound emulator selected by `sb_emulator.name`
pub enum SbEmulator {
    FloodGen(FloodGenHandle),
    TopoGen(TopoGenHandle),
}

impl SbEmulator {
    pub fn new(cfg: &SbEmulatorConfig, connector: SharedConnector) -> Result<Self> {
        match cfg.name.as_str() {
            "MTCBENCH" => Ok(SbEmulator::FloodGen(FloodGenHandle::new(cfg, connector))),
            "MULTINET" => Ok(SbEmulator::TopoGen(TopoGenHandle::new(cfg, connector))),
            other => Err(NstatError::Config(format!(
                "unsupported sb_emulator '{}'",
                other
            ))),
        }
    }

    pub fn get_topo_bootup_ms(&self) -> u64 {
        match self {
            SbEmulator::FloodGen(h) => h.get_topo_bootup_ms(),
            SbEmulator::TopoGen(h) => h.get_topo_bootup_ms(),
        }
    }

    pub fn get_overall_topo_size(&self) -> u64 {
        match self {
            SbEmulator::FloodGen(h) => h.get_overall_topo_size(),
            SbEmulator::TopoGen(h) => h.get_overall_topo_size(),
        }
    }

    pub fn as_flood_mut(&mut self) -> Result<&mut FloodGenHandle> {
        match self {
            SbEmulator::FloodGen(h) => Ok(h),
            SbEmulator::TopoGen(_) => Err(NstatError::Config(
                "test type needs MTCBENCH, MULTINET configured".into(),
            )),
        }
    }

    pub fn as_topo_mut(&mut self) -> Result<&mut TopoGenHandle> {
        match self {
            SbEmulator::TopoGen(h) => Ok(h),
            SbEmulator::FloodGen(_) => Err(NstatError::Config(
                "test type needs MULTINET, MTCBENCH configured".into(),
            )),
        }
    }
}

impl Lifecycle for SbEmulator {
    fn core(&self) -> &HandleCore {
        match self {
            SbEmulator::FloodGen(h) => h.core(),
            SbEmulator::TopoGen(h) => h.core(),
        }
    }

    fn core_mut(&mut self) -> &mut HandleCore {
        match self {
            SbEmulator::FloodGen(h) => h.core_mut(),
            SbEmulator::TopoGen(h) => h.core_mut(),
        }
    }

    fn build_handler(&self) -> Option<String> {
        match self {
            SbEmulator::FloodGen(h) => h.build_handler(),
            SbEmulator::TopoGen(h) => h.build_handler(),
        }
    }

    fn clean_handler(&self) -> Option<String> {
        match self {
            SbEmulator::FloodGen(h) => h.clean_handler(),
            SbEmulator::TopoGen(h) => h.clean_handler(),
        }
    }
}

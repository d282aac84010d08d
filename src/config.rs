// src/config.rs
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{NstatError, Result};

/// Test types the runner knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum TestType {
    SbActiveScalabilityMtcbench,
    SbActiveStabilityMtcbench,
    SbIdleScalabilityMtcbench,
    SbIdleScalabilityMultinet,
    SbIdleStabilityMultinet,
    SbActiveScalabilityMultinet,
    NbActiveScalabilityMultinet,
}

/// Emulator family a test type drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorFamily {
    FloodGen,
    TopoGen,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::SbActiveScalabilityMtcbench => "sb_active_scalability_mtcbench",
            TestType::SbActiveStabilityMtcbench => "sb_active_stability_mtcbench",
            TestType::SbIdleScalabilityMtcbench => "sb_idle_scalability_mtcbench",
            TestType::SbIdleScalabilityMultinet => "sb_idle_scalability_multinet",
            TestType::SbIdleStabilityMultinet => "sb_idle_stability_multinet",
            TestType::SbActiveScalabilityMultinet => "sb_active_scalability_multinet",
            TestType::NbActiveScalabilityMultinet => "nb_active_scalability_multinet",
        }
    }

    pub fn emulator_family(&self) -> EmulatorFamily {
        match self {
            TestType::SbActiveScalabilityMtcbench
            | TestType::SbActiveStabilityMtcbench
            | TestType::SbIdleScalabilityMtcbench => EmulatorFamily::FloodGen,
            _ => EmulatorFamily::TopoGen,
        }
    }

    pub fn requires_sniffer(&self) -> bool {
        matches!(
            self,
            TestType::SbIdleStabilityMultinet | TestType::SbActiveScalabilityMultinet
        )
    }

    pub fn requires_nb_emulator(&self) -> bool {
        matches!(self, TestType::NbActiveScalabilityMultinet)
    }

    /// Dimension vectors that must be non-empty for this test type.
    pub fn required_dimensions(&self) -> &'static [&'static str] {
        const FLOOD: &[&str] = &[
            "mtcbench_threads",
            "mtcbench_switches_per_thread",
            "mtcbench_thread_creation_delay_ms",
            "mtcbench_delay_before_traffic_ms",
            "mtcbench_simulated_hosts",
        ];
        const TOPO: &[&str] = &[
            "topology_size",
            "topology_type",
            "topology_hosts_per_switch",
            "topology_group_size",
            "topology_group_delay_ms",
        ];
        const TOPO_TRAFFIC: &[&str] = &[
            "topology_size",
            "topology_type",
            "topology_hosts_per_switch",
            "topology_group_size",
            "topology_group_delay_ms",
            "multinet_traffic_gen_duration_ms",
            "interpacket_delay_ms",
        ];
        const TOPO_NB: &[&str] = &[
            "topology_size",
            "topology_type",
            "topology_hosts_per_switch",
            "topology_group_size",
            "topology_group_delay_ms",
            "total_flows",
            "flow_workers",
            "flow_operations_delay_ms",
        ];
        match self {
            TestType::SbActiveScalabilityMtcbench
            | TestType::SbActiveStabilityMtcbench
            | TestType::SbIdleScalabilityMtcbench => FLOOD,
            TestType::SbIdleScalabilityMultinet | TestType::SbIdleStabilityMultinet => TOPO,
            TestType::SbActiveScalabilityMultinet => TOPO_TRAFFIC,
            TestType::NbActiveScalabilityMultinet => TOPO_NB,
        }
    }
}

impl std::fmt::Display for TestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Test configuration document.
///
/// Immutable once loaded; the runner copies dimension values into handles per point.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TestConfig {
    pub controller: ControllerConfig,

    pub sb_emulator: SbEmulatorConfig,

    /// Northbound flow generator (nb_* test types only)
    #[serde(default)]
    pub nb_emulator: Option<NbEmulatorConfig>,

    /// On-controller packet counter (sniffer test types only)
    #[serde(default)]
    pub sniffer: Option<SnifferConfig>,

    /// Sweep axes; the Cartesian product of the vectors a test type uses is the sweep
    #[serde(default)]
    pub dimensions: Dimensions,

    #[serde(default)]
    pub scenario: ScenarioConfig,
}

/// Remote host of one component
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeConfig {
    pub ip: String,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    pub username: String,

    /// Password authentication; key authentication is used when absent
    #[serde(default)]
    pub password: Option<String>,

    /// Private key for key authentication (default: ~/.ssh/id_rsa)
    #[serde(default)]
    pub key_path: Option<String>,

    /// Run handlers on this machine instead of over SSH
    #[serde(default)]
    pub local: bool,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// Controller section
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ControllerConfig {
    /// Controller flavour: "ODL" or "ONOS"
    pub name: String,

    pub node: NodeConfig,

    /// Base directory on the controller host; handler paths resolve against it
    pub base_dir: String,

    pub handlers: ControllerHandlers,

    /// OpenFlow (southbound) listening port
    #[serde(default = "default_sb_port")]
    pub sb_port: u16,

    /// RESTCONF (northbound) port
    #[serde(default = "default_restconf_port")]
    pub restconf_port: u16,

    #[serde(default = "default_restconf_user")]
    pub restconf_user: String,

    #[serde(default = "default_restconf_password")]
    pub restconf_password: String,

    /// Keep datastore persistence on (false runs the persistence handler at setup)
    #[serde(default = "default_true")]
    pub persistence: bool,

    /// JVM options exported as JAVA_OPTS on every start
    #[serde(default)]
    pub java_opts: Vec<String>,

    /// Restart the controller between sweep points
    #[serde(default)]
    pub restart: bool,

    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,

    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

/// Controller handler scripts, relative to `controller.base_dir`
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ControllerHandlers {
    pub build: String,
    pub start: String,
    pub stop: String,
    pub status: String,
    pub clean: String,
    #[serde(default)]
    pub statistics: Option<String>,
    #[serde(default)]
    pub persistence: Option<String>,
    #[serde(default)]
    pub flowmods_config: Option<String>,
    #[serde(default)]
    pub oper_hosts: Option<String>,
    #[serde(default)]
    pub oper_switches: Option<String>,
    #[serde(default)]
    pub oper_links: Option<String>,
    #[serde(default)]
    pub oper_flows: Option<String>,
}

fn default_sb_port() -> u16 {
    6653
}

fn default_restconf_port() -> u16 {
    8181
}

fn default_restconf_user() -> String {
    "admin".to_string()
}

fn default_restconf_password() -> String {
    "admin".to_string()
}

fn default_true() -> bool {
    true
}

fn default_start_timeout_ms() -> u64 {
    DEFAULT_CONTROLLER_START_TIMEOUT_MS
}

fn default_stop_timeout_ms() -> u64 {
    DEFAULT_CONTROLLER_STOP_TIMEOUT_MS
}

/// Southbound emulator section ("MTCBENCH" flood generator or "MULTINET" topology generator)
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SbEmulatorConfig {
    pub name: String,

    pub node: NodeConfig,

    pub base_dir: String,

    #[serde(default)]
    pub handlers: SbEmulatorHandlers,

    /// Topology master REST port (MULTINET)
    #[serde(default = "default_topogen_port")]
    pub master_port: u16,

    /// Topology worker hosts (MULTINET); defaults to the emulator node alone
    #[serde(default)]
    pub worker_ips: Vec<String>,

    /// Topology worker REST ports, one per worker ip
    #[serde(default)]
    pub worker_ports: Vec<u16>,

    /// Emulated switch type passed to the topology generator
    #[serde(default = "default_switch_type")]
    pub switch_type: String,

    /// Local directory copied onto `base_dir` during setup
    #[serde(default)]
    pub local_handlers_dir: Option<PathBuf>,
}

/// Southbound emulator handlers; which ones are required depends on `name`
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SbEmulatorHandlers {
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub clean: Option<String>,
    /// Flood generator run script
    #[serde(default)]
    pub run: Option<String>,
    /// Optional flood generator stop script
    #[serde(default)]
    pub stop: Option<String>,
    /// Topology generator venv wrapper every operation goes through
    #[serde(default)]
    pub venv_wrapper: Option<String>,
    #[serde(default)]
    pub deploy: Option<String>,
    #[serde(default)]
    pub init_topos: Option<String>,
    #[serde(default)]
    pub start_topos: Option<String>,
    #[serde(default)]
    pub stop_topos: Option<String>,
    #[serde(default)]
    pub cleanup: Option<String>,
    #[serde(default)]
    pub traffic_gen: Option<String>,
    #[serde(default)]
    pub get_switches: Option<String>,
    #[serde(default)]
    pub get_flows: Option<String>,
}

fn default_topogen_port() -> u16 {
    DEFAULT_TOPOGEN_PORT
}

fn default_switch_type() -> String {
    "ovsk".to_string()
}

/// Northbound generator section
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NbEmulatorConfig {
    pub name: String,
    pub node: NodeConfig,
    pub base_dir: String,
    pub handlers: NbEmulatorHandlers,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NbEmulatorHandlers {
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub clean: Option<String>,
    pub run: String,
}

/// Packet sniffer section
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SnifferConfig {
    pub name: String,
    pub node: NodeConfig,
    pub base_dir: String,
    pub handlers: SnifferHandlers,

    #[serde(default = "default_sniffer_port")]
    pub rest_port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SnifferHandlers {
    #[serde(default)]
    pub build: Option<String>,
    pub start: String,
    pub stop: String,
    #[serde(default)]
    pub clean: Option<String>,
}

fn default_sniffer_port() -> u16 {
    DEFAULT_SNIFFER_PORT
}

/// Sweep dimension vectors, iterated in the order written
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Dimensions {
    #[serde(default)]
    pub controller_statistics_period_ms: Vec<u64>,

    #[serde(default)]
    pub mtcbench_threads: Vec<u64>,
    #[serde(default)]
    pub mtcbench_switches_per_thread: Vec<u64>,
    #[serde(default)]
    pub mtcbench_thread_creation_delay_ms: Vec<u64>,
    #[serde(default)]
    pub mtcbench_delay_before_traffic_ms: Vec<u64>,
    #[serde(default)]
    pub mtcbench_simulated_hosts: Vec<u64>,

    #[serde(default)]
    pub topology_size: Vec<u64>,
    #[serde(default)]
    pub topology_type: Vec<String>,
    #[serde(default)]
    pub topology_hosts_per_switch: Vec<u64>,
    #[serde(default)]
    pub topology_group_size: Vec<u64>,
    #[serde(default)]
    pub topology_group_delay_ms: Vec<u64>,
    #[serde(default)]
    pub multinet_traffic_gen_duration_ms: Vec<u64>,
    #[serde(default)]
    pub interpacket_delay_ms: Vec<u64>,

    #[serde(default)]
    pub total_flows: Vec<u64>,
    #[serde(default)]
    pub flow_workers: Vec<u64>,
    #[serde(default)]
    pub flow_operations_delay_ms: Vec<u64>,
}

impl Dimensions {
    /// Number of values configured for a named dimension (None if the name is unknown).
    pub fn len_of(&self, name: &str) -> Option<usize> {
        let n = match name {
            "controller_statistics_period_ms" => self.controller_statistics_period_ms.len(),
            "mtcbench_threads" => self.mtcbench_threads.len(),
            "mtcbench_switches_per_thread" => self.mtcbench_switches_per_thread.len(),
            "mtcbench_thread_creation_delay_ms" => self.mtcbench_thread_creation_delay_ms.len(),
            "mtcbench_delay_before_traffic_ms" => self.mtcbench_delay_before_traffic_ms.len(),
            "mtcbench_simulated_hosts" => self.mtcbench_simulated_hosts.len(),
            "topology_size" => self.topology_size.len(),
            "topology_type" => self.topology_type.len(),
            "topology_hosts_per_switch" => self.topology_hosts_per_switch.len(),
            "topology_group_size" => self.topology_group_size.len(),
            "topology_group_delay_ms" => self.topology_group_delay_ms.len(),
            "multinet_traffic_gen_duration_ms" => self.multinet_traffic_gen_duration_ms.len(),
            "interpacket_delay_ms" => self.interpacket_delay_ms.len(),
            "total_flows" => self.total_flows.len(),
            "flow_workers" => self.flow_workers.len(),
            "flow_operations_delay_ms" => self.flow_operations_delay_ms.len(),
            _ => return None,
        };
        Some(n)
    }
}

/// Scenario constants shared by every sweep point
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScenarioConfig {
    /// Generator runs (or periodic samples) per sweep point
    #[serde(default = "default_repeats")]
    pub repeats: u32,

    /// Flood generator mode ("RR" throughput or "Latency")
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Flood generator warmup iterations discarded by the generator
    #[serde(default = "default_warmup")]
    pub warmup: u64,

    #[serde(default = "default_ms_per_test")]
    pub ms_per_test: u64,

    #[serde(default = "default_internal_repeats")]
    pub internal_repeats: u64,

    /// Run the DELETE phase after ADD in northbound tests
    #[serde(default = "default_true")]
    pub flow_delete: bool,

    #[serde(default = "default_flows_per_request")]
    pub flows_per_request: usize,

    /// No-progress deadline of discovery / confirmation pollers
    #[serde(default = "default_discovery_deadline_ms")]
    pub discovery_deadline_ms: u64,

    /// Interval between the two sniffer reads of a periodic sample
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// Log level handed to the northbound generator
    #[serde(default = "default_nb_log_level")]
    pub nb_log_level: String,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            repeats: default_repeats(),
            mode: default_mode(),
            warmup: default_warmup(),
            ms_per_test: default_ms_per_test(),
            internal_repeats: default_internal_repeats(),
            flow_delete: true,
            flows_per_request: default_flows_per_request(),
            discovery_deadline_ms: default_discovery_deadline_ms(),
            sample_interval_ms: default_sample_interval_ms(),
            nb_log_level: default_nb_log_level(),
        }
    }
}

fn default_repeats() -> u32 {
    1
}

fn default_mode() -> String {
    "RR".to_string()
}

fn default_warmup() -> u64 {
    2
}

fn default_ms_per_test() -> u64 {
    10_000
}

fn default_internal_repeats() -> u64 {
    1
}

fn default_flows_per_request() -> usize {
    DEFAULT_FLOWS_PER_REQUEST
}

fn default_discovery_deadline_ms() -> u64 {
    DEFAULT_DISCOVERY_DEADLINE_MS
}

fn default_sample_interval_ms() -> u64 {
    DEFAULT_SNIFFER_SAMPLE_INTERVAL_MS
}

fn default_nb_log_level() -> String {
    "INFO".to_string()
}

const CONTROLLER_NAMES: &[&str] = &["ODL", "ONOS"];
const NB_EMULATOR_NAMES: &[&str] = &["NB_GENERATOR"];
const SNIFFER_NAMES: &[&str] = &["OFTRAF"];

impl TestConfig {
    /// Load a JSON (`.json`) or YAML (anything else) document.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| NstatError::io(format!("reading {}", path.display()), e))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_yaml_str(&text)
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| NstatError::Config(e.to_string()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| NstatError::Config(e.to_string()))
    }

    /// Replace component base directories with values given on the command line.
    pub fn override_base_dirs(
        &mut self,
        controller: Option<&str>,
        sb_emulator: Option<&str>,
        nb_emulator: Option<&str>,
        sniffer: Option<&str>,
    ) {
        if let Some(dir) = controller {
            self.controller.base_dir = dir.to_string();
        }
        if let Some(dir) = sb_emulator {
            self.sb_emulator.base_dir = dir.to_string();
        }
        if let (Some(dir), Some(nb)) = (nb_emulator, self.nb_emulator.as_mut()) {
            nb.base_dir = dir.to_string();
        }
        if let (Some(dir), Some(sn)) = (sniffer, self.sniffer.as_mut()) {
            sn.base_dir = dir.to_string();
        }
    }

    /// Check everything the given test type needs before the sweep starts.
    pub fn validate(&self, test_type: TestType) -> Result<()> {
        if !CONTROLLER_NAMES.contains(&self.controller.name.as_str()) {
            return Err(NstatError::Config(format!(
                "controller.name '{}' is not one of {:?}",
                self.controller.name, CONTROLLER_NAMES
            )));
        }

        let expected_emu = match test_type.emulator_family() {
            EmulatorFamily::FloodGen => "MTCBENCH",
            EmulatorFamily::TopoGen => "MULTINET",
        };
        if self.sb_emulator.name != expected_emu {
            return Err(NstatError::Config(format!(
                "{} needs sb_emulator.name '{}', found '{}'",
                test_type, expected_emu, self.sb_emulator.name
            )));
        }

        for name in test_type.required_dimensions() {
            if self.dimensions.len_of(name) == Some(0) {
                return Err(NstatError::Config(format!(
                    "{} needs a non-empty dimensions.{}",
                    test_type, name
                )));
            }
        }

        if test_type.requires_nb_emulator() {
            let nb = self.nb_emulator.as_ref().ok_or_else(|| {
                NstatError::Config(format!("{} needs an nb_emulator section", test_type))
            })?;
            if !NB_EMULATOR_NAMES.contains(&nb.name.as_str()) {
                return Err(NstatError::Config(format!(
                    "nb_emulator.name '{}' is not one of {:?}",
                    nb.name, NB_EMULATOR_NAMES
                )));
            }
        }

        if test_type.requires_sniffer() {
            let sn = self.sniffer.as_ref().ok_or_else(|| {
                NstatError::Config(format!("{} needs a sniffer section", test_type))
            })?;
            if !SNIFFER_NAMES.contains(&sn.name.as_str()) {
                return Err(NstatError::Config(format!(
                    "sniffer.name '{}' is not one of {:?}",
                    sn.name, SNIFFER_NAMES
                )));
            }
        }

        if self.scenario.repeats == 0 {
            return Err(NstatError::Config("scenario.repeats must be >= 1".into()));
        }
        if self.sb_emulator.worker_ips.len() != self.sb_emulator.worker_ports.len() {
            return Err(NstatError::Config(format!(
                "sb_emulator.worker_ips ({}) and worker_ports ({}) differ in length",
                self.sb_emulator.worker_ips.len(),
                self.sb_emulator.worker_ports.len()
            )));
        }

        for path in self.handler_paths() {
            if path.starts_with('/') {
                return Err(NstatError::Config(format!(
                    "handler path '{}' must be relative to its base_dir",
                    path
                )));
            }
        }

        Ok(())
    }

    /// Every configured handler path, across all components.
    pub fn handler_paths(&self) -> Vec<&str> {
        let c = &self.controller.handlers;
        let mut out: Vec<&str> = vec![&c.build, &c.start, &c.stop, &c.status, &c.clean];
        out.extend(
            [
                &c.statistics,
                &c.persistence,
                &c.flowmods_config,
                &c.oper_hosts,
                &c.oper_switches,
                &c.oper_links,
                &c.oper_flows,
            ]
            .into_iter()
            .flatten()
            .map(String::as_str),
        );

        let s = &self.sb_emulator.handlers;
        out.extend(
            [
                &s.build,
                &s.clean,
                &s.run,
                &s.stop,
                &s.venv_wrapper,
                &s.deploy,
                &s.init_topos,
                &s.start_topos,
                &s.stop_topos,
                &s.cleanup,
                &s.traffic_gen,
                &s.get_switches,
                &s.get_flows,
            ]
            .into_iter()
            .flatten()
            .map(String::as_str),
        );

        if let Some(nb) = &self.nb_emulator {
            out.push(&nb.handlers.run);
            out.extend([&nb.handlers.build, &nb.handlers.clean].into_iter().flatten().map(String::as_str));
        }
        if let Some(sn) = &self.sniffer {
            out.push(&sn.handlers.start);
            out.push(&sn.handlers.stop);
            out.extend([&sn.handlers.build, &sn.handlers.clean].into_iter().flatten().map(String::as_str));
        }
        out
    }
}

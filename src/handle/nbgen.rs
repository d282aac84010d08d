// src/handle/nbgen.rs
//! Northbound flow generator handle
//!
//! Runs the generator handler on its own host with the current flow dimensions and
//! returns the JSON report it prints as its last document.

use serde_json::Value;
use tracing::info;

use super::{HandleCore, Lifecycle, Status, Transition};
use crate::config::{NbEmulatorConfig, ScenarioConfig};
use crate::error::{NstatError, Result};
use crate::remote::{RunOptions, SharedConnector};

const NB_RUN: Transition = Transition {
    running: Status::Started,
    done: Status::Stopped,
    failed: Status::NotStarted,
};

/// Extract the last JSON object printed in `output`.
pub fn parse_report(output: &str) -> Option<Value> {
    if let Some(v) = output
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .find_map(|l| serde_json::from_str::<Value>(l).ok())
    {
        return Some(v);
    }
    // pretty-printed report spanning several lines
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<Value>(&output[start..=end])
        .ok()
        .filter(Value::is_object)
}

pub struct NbGenHandle {
    core: HandleCore,
    cfg: NbEmulatorConfig,
    pub total_flows: u64,
    pub flow_workers: u64,
    pub flow_operations_delay_ms: u64,
    pub flow_delete: bool,
    pub flows_per_request: usize,
    pub log_level: String,
    pub discovery_deadline_ms: u64,
}

impl NbGenHandle {
    pub fn new(cfg: &NbEmulatorConfig, connector: SharedConnector) -> Result<Self> {
        if cfg.name != "NB_GENERATOR" {
            return Err(NstatError::Config(format!(
                "unsupported nb_emulator '{}'",
                cfg.name
            )));
        }
        let scenario = ScenarioConfig::default();
        Ok(Self {
            core: HandleCore::new("nb_generator", cfg.node.clone(), &cfg.base_dir, connector),
            cfg: cfg.clone(),
            total_flows: 0,
            flow_workers: 1,
            flow_operations_delay_ms: 0,
            flow_delete: scenario.flow_delete,
            flows_per_request: scenario.flows_per_request,
            log_level: scenario.nb_log_level,
            discovery_deadline_ms: scenario.discovery_deadline_ms,
        })
    }

    pub fn set_scenario(&mut self, scenario: &ScenarioConfig) {
        self.flow_delete = scenario.flow_delete;
        self.flows_per_request = scenario.flows_per_request;
        self.log_level = scenario.nb_log_level.clone();
        self.discovery_deadline_ms = scenario.discovery_deadline_ms;
    }

    /// Handler arguments in invocation order.
    pub fn run_args(&self, ctrl_ip: &str, restconf_port: u16, user: &str, password: &str) -> Vec<String> {
        vec![
            ctrl_ip.to_string(),
            restconf_port.to_string(),
            self.total_flows.to_string(),
            self.flow_workers.to_string(),
            self.flow_operations_delay_ms.to_string(),
            self.flow_delete.to_string(),
            user.to_string(),
            password.to_string(),
            self.flows_per_request.to_string(),
            self.log_level.clone(),
            self.discovery_deadline_ms.to_string(),
        ]
    }

    /// Run the generator against the controller's northbound interface.
    pub fn run(&mut self, ctrl_ip: &str, restconf_port: u16, user: &str, password: &str) -> Result<Value> {
        info!(
            "[nb_generator] {} flows, {} workers, {} ms delay, {} per request",
            self.total_flows, self.flow_workers, self.flow_operations_delay_ms, self.flows_per_request
        );
        let args = self.run_args(ctrl_ip, restconf_port, user, password);
        let run = self.cfg.handlers.run.clone();
        let out = self
            .core
            .run_transition(&run, &args, NB_RUN, &RunOptions::new().prefix("[nb_generator]"))?;
        parse_report(&out.output).ok_or_else(|| {
            self.core.funnel(NstatError::OutputParse {
                handle: self.core.name().to_string(),
                handler: run,
                output: out.output,
            })
        })
    }
}

impl Lifecycle for NbGenHandle {
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

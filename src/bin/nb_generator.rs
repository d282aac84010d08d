// src/bin/nb_generator.rs
//
// Northbound flow generator: pushes flows to the controller over RESTCONF,
// waits for the operational datastore to confirm them and prints a JSON report.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use nstat::constants::{DEFAULT_DISCOVERY_DEADLINE_MS, DEFAULT_POLL_INTERVAL};
use nstat::datastore::OperationalClient;
use nstat::flow::{FlowDriver, FlowDriverConfig, RestconfTransport};
use nstat::poll::PollPolicy;
use nstat::pool::Assignment;

#[derive(Parser, Debug)]
#[command(name = "nb_generator", version, about = "Northbound flow generator")]
struct Cli {
    /// Controller IP
    controller_ip: String,

    /// RESTCONF port
    restconf_port: u16,

    /// Flows to add (and delete)
    total_flows: u64,

    /// Concurrent flow workers
    flow_workers: usize,

    /// Pause after every flow request (ms)
    op_delay_ms: u64,

    /// Delete the flows after adding them
    #[arg(value_parser = parse_flag)]
    delete: bool,

    restconf_user: String,

    restconf_password: String,

    /// Flows per request; 1 sends every flow on its own
    flows_per_request: usize,

    /// Log level (ERROR, WARN, INFO, DEBUG, TRACE)
    log_level: String,

    /// No-progress deadline of the datastore confirmation (ms)
    discovery_deadline_ms: Option<u64>,

    /// Bind each switch's flows to one worker instead of round-robin on flow index
    #[arg(long = "node-affinity")]
    node_affinity: bool,
}

fn parse_flag(s: &str) -> std::result::Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(format!("expected true or false, found '{}'", other)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("nstat={}", cli.log_level.to_lowercase())));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let datastore = OperationalClient::new(
        &cli.controller_ip,
        cli.restconf_port,
        &cli.restconf_user,
        &cli.restconf_password,
    )
    .context("Failed to create RESTCONF client")?;
    let nodes = datastore.switch_ids();
    if nodes.is_empty() && cli.total_flows > 0 {
        bail!(
            "no openflow nodes in the inventory of {}:{}",
            cli.controller_ip,
            cli.restconf_port
        );
    }
    info!("Discovered {} switch node(s)", nodes.len());

    let initial = datastore.oper_flows();
    if initial > 0 {
        warn!("{} flows already installed before the run", initial);
    }

    let transport = RestconfTransport::new(
        &cli.controller_ip,
        cli.restconf_port,
        &cli.restconf_user,
        &cli.restconf_password,
    )
    .context("Failed to create flow transport")?;

    let deadline_ms = cli.discovery_deadline_ms.unwrap_or(DEFAULT_DISCOVERY_DEADLINE_MS);
    let cfg = FlowDriverConfig {
        total_flows: cli.total_flows,
        flow_workers: cli.flow_workers.max(1),
        op_delay_ms: cli.op_delay_ms,
        flows_per_request: cli.flows_per_request,
        delete: cli.delete,
        assignment: if cli.node_affinity {
            Assignment::NodeAffinity
        } else {
            Assignment::FlowIndex
        },
        poll: PollPolicy::new(DEFAULT_POLL_INTERVAL, deadline_ms),
    };
    let driver = FlowDriver::new(cfg, nodes, Arc::new(transport), Arc::new(datastore));
    info!(
        "{} flows, {} worker(s), {} variant",
        cli.total_flows,
        cli.flow_workers,
        if driver.is_batching() { "batching" } else { "plain" }
    );

    let report = driver.run().context("Flow run failed")?;
    println!("{}", serde_json::to_string(&report).context("Failed to serialize report")?);
    Ok(())
}

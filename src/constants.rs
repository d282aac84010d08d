// src/constants.rs
//
// Central location for all constants used throughout nstat
// This makes tuning and maintenance easier by having all magic numbers in one place

use std::time::Duration;

// =============================================================================
// Remote Execution
// =============================================================================

/// Default SSH port when a node entry omits `ssh_port`
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Connection attempts before giving up with NodeConnection
pub const DEFAULT_SSH_MAX_RETRIES: u32 = 10;

/// Sleep between two SSH connection attempts
pub const SSH_RETRY_SLEEP: Duration = Duration::from_secs(2);

/// TCP connect timeout for a single SSH attempt
pub const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Size of a single read from a remote command's output stream
pub const REMOTE_READ_CHUNK_BYTES: usize = 4096;

/// Default private key used when a node has no password
pub const DEFAULT_SSH_KEY_PATH: &str = "~/.ssh/id_rsa";

// =============================================================================
// Controller lifecycle
// =============================================================================

/// Poll cadence of wait_until_listens / wait_until_up / stop
pub const CONTROLLER_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on wait_until_listens and wait_until_up (milliseconds)
pub const DEFAULT_CONTROLLER_START_TIMEOUT_MS: u64 = 420_000;

/// Default bound on waiting for the controller PID to disappear after stop (milliseconds)
pub const DEFAULT_CONTROLLER_STOP_TIMEOUT_MS: u64 = 120_000;

/// Status handler output meaning "controller is running"
pub const CONTROLLER_STATUS_UP: &str = "1";

/// Environment variable carrying JVM options to the start handler
pub const JAVA_OPTS_ENV: &str = "JAVA_OPTS";

// =============================================================================
// Polling / discovery
// =============================================================================

/// Default poll cadence for datastore pollers and discovery monitors
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Historical no-progress deadline of the idle discovery monitor (milliseconds).
/// `scenario.discovery_deadline_ms` is authoritative when present.
pub const DEFAULT_DISCOVERY_DEADLINE_MS: u64 = 120_000;

/// Blocking timeout of the throughput monitor's line channel
pub const MONITOR_LINE_TIMEOUT: Duration = Duration::from_secs(10_000);

/// Sentinel the generator side pushes after a clean run
pub const SUCCESSFUL_TERMINATION: &str = "__successful_termination__";

/// Sentinel the generator side pushes after a failed run
pub const FAILED_TERMINATION: &str = "__failed_termination__";

/// Floating point sentinel for "not measured / deadline elapsed"
pub const SENTINEL_F64: f64 = -1.0;

/// Integer sentinel for "not measured / parse failure"
pub const SENTINEL_I64: i64 = -1;

// =============================================================================
// Error codes (stable, written into logs and samples)
// =============================================================================

pub const ERR_NODE_CONNECTION: u16 = 101;
pub const ERR_HANDLER_MISSING: u16 = 102;
pub const ERR_HANDLER_FAILED: u16 = 103;
pub const ERR_PORT_CONFLICT: u16 = 104;
pub const ERR_READY_STATE: u16 = 105;
pub const ERR_OUTPUT_PARSE: u16 = 106;
pub const ERR_CONFIG: u16 = 107;
pub const ERR_NO_SESSION: u16 = 108;
pub const ERR_IO: u16 = 109;
pub const ERR_SSH: u16 = 110;
pub const ERR_HTTP: u16 = 111;
pub const ERR_SERIALIZATION: u16 = 112;

/// Written to `discovered_switches_error_code` when discovery did not reach its target
pub const ERR_DISCOVERY_DEADLINE: u16 = 201;

// =============================================================================
// Northbound flows
// =============================================================================

/// RESTCONF config path prefix for inventory nodes
pub const RESTCONF_CONFIG_NODES: &str = "restconf/config/opendaylight-inventory:nodes/node";

/// RESTCONF operational topology document
pub const RESTCONF_OPER_TOPOLOGY: &str =
    "restconf/operational/network-topology:network-topology/network-topology:topology/flow:1";

/// RESTCONF operational inventory document
pub const RESTCONF_OPER_INVENTORY: &str = "restconf/operational/opendaylight-inventory:nodes";

/// HTTP timeout for a single flow request
pub const FLOW_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP timeout for one operational datastore read
pub const DATASTORE_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default flows per request (1 = plain, non-batching workers)
pub const DEFAULT_FLOWS_PER_REQUEST: usize = 1;

/// Default number of flow workers in the northbound generator
pub const DEFAULT_FLOW_WORKERS: usize = 1;

// =============================================================================
// Southbound emulators
// =============================================================================

/// Remote path (relative to the emulator base dir) the topology config is shipped to
pub const TOPOGEN_REMOTE_CONFIG: &str = "nstat_topology_config.json";

/// Default topology emulator REST port on the master/workers
pub const DEFAULT_TOPOGEN_PORT: u16 = 3300;

/// Tag fragment anchoring the JSON payload of TopoGen query handlers
pub const TOPOGEN_RESPONSE_TAG: &str = "[response data]";

// =============================================================================
// Sniffer
// =============================================================================

/// REST endpoint of the on-controller packet counter
pub const SNIFFER_COUNTS_PATH: &str = "get_of_counts";

/// Default sniffer REST port
pub const DEFAULT_SNIFFER_PORT: u16 = 5555;

/// HTTP timeout for one sniffer counter read
pub const SNIFFER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between two sniffer counter reads (milliseconds)
pub const DEFAULT_SNIFFER_SAMPLE_INTERVAL_MS: u64 = 10_000;

// =============================================================================
// Output
// =============================================================================

/// Metadata file written next to the result document
pub const RUN_METADATA_FILE: &str = "run_metadata.json";

/// Default output document file name inside the output directory
pub const DEFAULT_RESULTS_FILE: &str = "results.json";

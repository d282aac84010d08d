// src/datastore.rs
//! Operational datastore reads over RESTCONF
//!
//! Two documents are used: the `flow:1` network topology (hosts, switches, links)
//! and the opendaylight inventory (switch node ids, installed flows). The parsers
//! are pure; the client degrades every transport or parse failure to -1.

use reqwest::blocking::Client;
use serde_json::Value;
use tracing::debug;

use crate::constants::*;
use crate::error::Result;
use crate::flow::FlowCounter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopologyCounts {
    pub hosts: i64,
    pub switches: i64,
    pub links: i64,
}

/// Count hosts (`node-id` starting with `host:`), switches and links in `flow:1`.
pub fn parse_topology(doc: &Value) -> Option<TopologyCounts> {
    let topo = doc.get("topology")?.as_array()?.first()?;
    let (mut hosts, mut switches) = (0, 0);
    if let Some(nodes) = topo.get("node").and_then(Value::as_array) {
        for node in nodes {
            match node.get("node-id").and_then(Value::as_str) {
                Some(id) if id.starts_with("host:") => hosts += 1,
                Some(_) => switches += 1,
                None => {}
            }
        }
    }
    let links = topo
        .get("link")
        .and_then(Value::as_array)
        .map(|l| l.len() as i64)
        .unwrap_or(0);
    Some(TopologyCounts {
        hosts,
        switches,
        links,
    })
}

fn inventory_nodes(doc: &Value) -> Option<&Vec<Value>> {
    doc.get("nodes")?.get("node")?.as_array()
}

/// Switch node ids (e.g. `openflow:1`) in inventory order.
pub fn parse_inventory_nodes(doc: &Value) -> Vec<String> {
    inventory_nodes(doc)
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|n| n.get("id").and_then(Value::as_str))
                .filter(|id| id.starts_with("openflow:"))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Total flows over every table of every node.
///
/// Uses the `flow` arrays when present, the table statistics' `active-flows` otherwise.
pub fn parse_inventory_flows(doc: &Value) -> Option<i64> {
    let nodes = inventory_nodes(doc)?;
    let mut total = 0i64;
    for node in nodes {
        let Some(tables) = node.get("flow-node-inventory:table").and_then(Value::as_array) else {
            continue;
        };
        for table in tables {
            if let Some(flows) = table.get("flow").and_then(Value::as_array) {
                total += flows.len() as i64;
            } else if let Some(active) = table
                .get("opendaylight-flow-table-statistics:flow-table-statistics")
                .and_then(|s| s.get("active-flows"))
                .and_then(Value::as_i64)
            {
                total += active;
            }
        }
    }
    Some(total)
}

/// Reads the controller's operational datastore
pub struct OperationalClient {
    client: Client,
    base: String,
    user: String,
    password: String,
}

impl OperationalClient {
    pub fn new(ip: &str, port: u16, user: &str, password: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(DATASTORE_REQUEST_TIMEOUT)
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            base: format!("http://{}:{}", ip, port),
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}/{}", self.base, path);
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.user, Some(&self.password))
            .header("Accept", "application/json")
            .send()?
            .error_for_status()?;
        Ok(resp.json()?)
    }

    pub fn topology(&self) -> Option<TopologyCounts> {
        match self.get(RESTCONF_OPER_TOPOLOGY) {
            Ok(doc) => parse_topology(&doc),
            Err(e) => {
                debug!("operational topology read failed: {}", e);
                None
            }
        }
    }

    pub fn oper_hosts(&self) -> i64 {
        self.topology().map(|t| t.hosts).unwrap_or(SENTINEL_I64)
    }

    pub fn oper_switches(&self) -> i64 {
        self.topology().map(|t| t.switches).unwrap_or(SENTINEL_I64)
    }

    pub fn oper_links(&self) -> i64 {
        self.topology().map(|t| t.links).unwrap_or(SENTINEL_I64)
    }

    /// Switch node ids from the inventory (empty on failure).
    pub fn switch_ids(&self) -> Vec<String> {
        match self.get(RESTCONF_OPER_INVENTORY) {
            Ok(doc) => parse_inventory_nodes(&doc),
            Err(e) => {
                debug!("operational inventory read failed: {}", e);
                Vec::new()
            }
        }
    }

    pub fn oper_flows(&self) -> i64 {
        match self.get(RESTCONF_OPER_INVENTORY) {
            Ok(doc) => parse_inventory_flows(&doc).unwrap_or(SENTINEL_I64),
            Err(e) => {
                debug!("operational inventory read failed: {}", e);
                SENTINEL_I64
            }
        }
    }
}

impl FlowCounter for OperationalClient {
    fn flow_count(&self) -> i64 {
        self.oper_flows()
    }
}

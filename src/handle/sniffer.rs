// src/handle/sniffer.rs
//! On-controller OpenFlow packet counter (oftraf)
//!
//! Lifecycle goes through handlers like every other handle; counts are read over
//! its small HTTP surface.

use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::{HandleCore, Lifecycle, Status, Transition};
use crate::config::SnifferConfig;
use crate::constants::*;
use crate::error::{NstatError, Result};
use crate::remote::{RunOptions, SharedConnector};

/// Aggregated OpenFlow in/out counters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OfCounts {
    pub in_packets: f64,
    pub in_bytes: f64,
    pub out_packets: f64,
    pub out_bytes: f64,
}

/// Per-second rates between two counter reads
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OfRates {
    pub of_in_packets_per_sec: f64,
    pub of_out_packets_per_sec: f64,
    pub of_in_bytes_per_sec: f64,
    pub of_out_bytes_per_sec: f64,
}

impl OfRates {
    /// All rates at the -1 sentinel.
    pub fn unavailable() -> Self {
        Self {
            of_in_packets_per_sec: SENTINEL_F64,
            of_out_packets_per_sec: SENTINEL_F64,
            of_in_bytes_per_sec: SENTINEL_F64,
            of_out_bytes_per_sec: SENTINEL_F64,
        }
    }
}

fn pair(doc: &Value, keys: &[&str]) -> Option<(f64, f64)> {
    let v = keys.iter().find_map(|k| doc.get(*k))?;
    let arr = v.as_array()?;
    Some((arr.first()?.as_f64()?, arr.get(1)?.as_f64()?))
}

impl OfCounts {
    /// Parse a `get_of_counts` body; both key spellings are accepted.
    pub fn from_value(doc: &Value) -> Option<Self> {
        let (in_packets, in_bytes) = pair(doc, &["OF_in_counts", "of_in_counts"])?;
        let (out_packets, out_bytes) = pair(doc, &["OF_out_counts", "of_out_counts"])?;
        Some(Self {
            in_packets,
            in_bytes,
            out_packets,
            out_bytes,
        })
    }

    /// Rates from `self` to a later read `after`, `secs` apart.
    pub fn rates_to(&self, after: &OfCounts, secs: f64) -> OfRates {
        if secs <= 0.0 {
            return OfRates::unavailable();
        }
        OfRates {
            of_in_packets_per_sec: (after.in_packets - self.in_packets) / secs,
            of_out_packets_per_sec: (after.out_packets - self.out_packets) / secs,
            of_in_bytes_per_sec: (after.in_bytes - self.in_bytes) / secs,
            of_out_bytes_per_sec: (after.out_bytes - self.out_bytes) / secs,
        }
    }
}

pub struct SnifferHandle {
    core: HandleCore,
    cfg: SnifferConfig,
    client: Client,
}

impl SnifferHandle {
    pub fn new(cfg: &SnifferConfig, connector: SharedConnector) -> Result<Self> {
        if cfg.name != "OFTRAF" {
            return Err(NstatError::Config(format!("unsupported sniffer '{}'", cfg.name)));
        }
        let client = Client::builder()
            .timeout(SNIFFER_REQUEST_TIMEOUT)
            .no_proxy()
            .build()?;
        Ok(Self {
            core: HandleCore::new("oftraf", cfg.node.clone(), &cfg.base_dir, connector),
            cfg: cfg.clone(),
            client,
        })
    }

    pub fn counts_url(&self) -> String {
        format!(
            "http://{}:{}/{}",
            self.cfg.node.ip, self.cfg.rest_port, SNIFFER_COUNTS_PATH
        )
    }

    /// Start sniffing OpenFlow traffic on `of_port`.
    pub fn start(&mut self, of_port: u16) -> Result<()> {
        info!("[oftraf] start, REST on port {}", self.cfg.rest_port);
        let args = [
            self.cfg.node.ip.clone(),
            self.cfg.rest_port.to_string(),
            of_port.to_string(),
        ];
        let start = self.cfg.handlers.start.clone();
        self.core
            .run_transition(&start, &args, Transition::START, &RunOptions::new().prefix("[oftraf]"))
            .map(|_| ())
    }

    pub fn stop(&mut self) -> Result<()> {
        let stop = self.cfg.handlers.stop.clone();
        let args = [self.cfg.node.ip.clone(), self.cfg.rest_port.to_string()];
        self.core
            .run_transition(&stop, &args, Transition::STOP, &RunOptions::new().prefix("[oftraf]"))
            .map(|_| ())
    }

    /// Raw JSON body of `GET /get_of_counts`.
    pub fn get_counts(&self) -> Result<Value> {
        let url = self.counts_url();
        debug!("[oftraf] GET {}", url);
        let resp = self
            .client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| self.core.funnel(NstatError::Http(e)))?;
        resp.json::<Value>().map_err(|e| self.core.funnel(NstatError::Http(e)))
    }

    /// Parsed counters, or None when the sniffer is unreachable or answers garbage.
    pub fn read_counts(&self) -> Option<OfCounts> {
        self.get_counts().ok().as_ref().and_then(OfCounts::from_value)
    }

    pub fn is_running(&self) -> bool {
        self.core.status() == Status::Started
    }
}

impl Lifecycle for SnifferHandle {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnifferHandlers;
    use crate::testkit::{node, ScriptedConnector, ScriptedShell};
    use serde_json::json;
    use std::sync::Arc;

    fn sniffer_cfg() -> SnifferConfig {
        SnifferConfig {
            name: "OFTRAF".into(),
            node: node("10.0.0.1"),
            base_dir: "/opt/oftraf".into(),
            handlers: SnifferHandlers {
                build: Some("build.sh".into()),
                start: "start.sh".into(),
                stop: "stop.sh".into(),
                clean: None,
            },
            rest_port: 5555,
        }
    }

    #[test]
    fn test_counts_both_spellings() {
        let upper = json!({"OF_in_counts": [100, 6400], "OF_out_counts": [50, 3200]});
        let lower = json!({"of_in_counts": [100, 6400], "of_out_counts": [50, 3200]});
        assert_eq!(OfCounts::from_value(&upper), OfCounts::from_value(&lower));
        assert!(OfCounts::from_value(&json!({"OF_in_counts": [1]})).is_none());
    }

    #[test]
    fn test_rates_between_reads() {
        let a = OfCounts::from_value(&json!({"OF_in_counts": [100, 1000], "OF_out_counts": [10, 100]})).unwrap();
        let b = OfCounts::from_value(&json!({"OF_in_counts": [300, 3000], "OF_out_counts": [30, 300]})).unwrap();
        let r = a.rates_to(&b, 10.0);
        assert_eq!(r.of_in_packets_per_sec, 20.0);
        assert_eq!(r.of_out_bytes_per_sec, 20.0);
        assert_eq!(a.rates_to(&b, 0.0), OfRates::unavailable());
    }

    #[test]
    fn test_start_stop_transitions() {
        let shell = ScriptedShell::new();
        let probe = shell.clone();
        let mut h = SnifferHandle::new(&sniffer_cfg(), Arc::new(ScriptedConnector::single(shell))).unwrap();
        h.init_ssh().unwrap();
        h.start(6653).unwrap();
        assert!(h.is_running());
        assert_eq!(probe.count("'/opt/oftraf/start.sh' '10.0.0.1' '5555' '6653'"), 1);
        h.stop().unwrap();
        assert_eq!(h.status(), Status::Stopped);
        assert_eq!(h.counts_url(), "http://10.0.0.1:5555/get_of_counts");
    }
}

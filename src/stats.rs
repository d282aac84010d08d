// src/stats.rs
//
// Host and controller-process statistics attached to every sample.
// Each value comes from its own shell fragment, run over the controller session
// (or locally when no session is given). Anything that fails to parse degrades to
// -1 / -1.0 instead of an error.

use chrono::Local;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::constants::{SENTINEL_F64, SENTINEL_I64};
use crate::remote::{LocalShell, Shell};

/// CPU times of a process from /proc/<pid>/stat, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcCpuTimes {
    pub user_secs: f64,
    pub system_secs: f64,
}

/// Parse utime/stime (fields 14/15) from a /proc/<pid>/stat line.
///
/// The command name may contain spaces, so fields are counted after the closing paren.
pub fn parse_proc_stat(line: &str, clock_ticks: f64) -> Option<ProcCpuTimes> {
    if clock_ticks <= 0.0 {
        return None;
    }
    let rest = &line[line.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // rest starts at field 3 (state); utime is field 14, stime field 15
    let utime: f64 = fields.get(11)?.parse().ok()?;
    let stime: f64 = fields.get(12)?.parse().ok()?;
    Some(ProcCpuTimes {
        user_secs: utime / clock_ticks,
        system_secs: stime / clock_ticks,
    })
}

/// Parse "/proc/loadavg" into (1, 5, 15) minute loads.
pub fn parse_loadavg(text: &str) -> Option<(f64, f64, f64)> {
    let mut it = text.split_whitespace();
    let one = it.next()?.parse().ok()?;
    let five = it.next()?.parse().ok()?;
    let fifteen = it.next()?.parse().ok()?;
    Some((one, five, fifteen))
}

/// Parse a "Key:   <value> [kB]" line of /proc/<pid>/status.
pub fn parse_status_field(text: &str, key: &str) -> Option<i64> {
    let line = text.lines().find(|l| l.starts_with(key))?;
    let mut parts = line[key.len()..].trim_start_matches(':').split_whitespace();
    let value: i64 = parts.next()?.parse().ok()?;
    match parts.next() {
        Some(unit) if unit.eq_ignore_ascii_case("kb") => Some(value * 1024),
        _ => Some(value),
    }
}

/// Parse the `Mem:` row of `free -b` into (total, used, free).
pub fn parse_free(text: &str) -> Option<(i64, i64, i64)> {
    let line = text.lines().find(|l| l.starts_with("Mem:"))?;
    let cols: Vec<i64> = line
        .split_whitespace()
        .skip(1)
        .take(3)
        .filter_map(|c| c.parse().ok())
        .collect();
    match cols.as_slice() {
        [total, used, free] => Some((*total, *used, *free)),
        _ => None,
    }
}

/// Collects per-sample statistics on the controller host
pub struct StatSampler<'a> {
    shell: Option<&'a dyn Shell>,
}

impl<'a> StatSampler<'a> {
    pub fn new(shell: Option<&'a dyn Shell>) -> Self {
        Self { shell }
    }

    fn read(&self, cmd: &str) -> Option<String> {
        let out = match self.shell {
            Some(shell) => shell.exec(cmd),
            None => LocalShell.exec(cmd),
        };
        match out {
            Ok(o) if o.success() => Some(o.output),
            Ok(_) | Err(_) => None,
        }
    }

    /// Gather every statistic; `pid` is the controller process, if running.
    pub fn sample(&self, pid: Option<i64>) -> BTreeMap<String, Value> {
        let mut stats = BTreeMap::new();
        let now = Local::now();
        stats.insert("timestamp".to_string(), json!(now.timestamp()));
        stats.insert(
            "date".to_string(),
            json!(now.format("%a %b %d %H:%M:%S %Y").to_string()),
        );

        let (total, used, free) = self
            .read("free -b")
            .and_then(|t| parse_free(&t))
            .unwrap_or((SENTINEL_I64, SENTINEL_I64, SENTINEL_I64));
        stats.insert("total_memory_bytes".to_string(), json!(total));
        stats.insert("used_memory_bytes".to_string(), json!(used));
        stats.insert("free_memory_bytes".to_string(), json!(free));

        let (one, five, fifteen) = self
            .read("cat /proc/loadavg")
            .and_then(|t| parse_loadavg(&t))
            .unwrap_or((SENTINEL_F64, SENTINEL_F64, SENTINEL_F64));
        stats.insert("one_minute_load".to_string(), json!(one));
        stats.insert("five_minute_load".to_string(), json!(five));
        stats.insert("fifteen_minute_load".to_string(), json!(fifteen));

        let pid = pid.filter(|p| *p > 0);
        let cwd = pid
            .and_then(|p| self.read(&format!("readlink /proc/{}/cwd", p)))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| SENTINEL_I64.to_string());
        stats.insert("controller_cwd".to_string(), json!(cwd));

        let xopts = pid
            .and_then(|p| self.read(&format!("tr '\\0' '\\n' < /proc/{}/cmdline", p)))
            .map(|s| {
                s.lines()
                    .filter(|a| a.starts_with("-X"))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_else(|| SENTINEL_I64.to_string());
        stats.insert("controller_java_xopts".to_string(), json!(xopts));

        let ticks: f64 = self
            .read("getconf CLK_TCK")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(SENTINEL_F64);
        let cpu = pid
            .and_then(|p| self.read(&format!("cat /proc/{}/stat", p)))
            .and_then(|s| parse_proc_stat(s.trim(), ticks));
        stats.insert(
            "controller_cpu_user_time".to_string(),
            json!(cpu.map(|c| c.user_secs).unwrap_or(SENTINEL_F64)),
        );
        stats.insert(
            "controller_cpu_system_time".to_string(),
            json!(cpu.map(|c| c.system_secs).unwrap_or(SENTINEL_F64)),
        );

        let status = pid.and_then(|p| self.read(&format!("cat /proc/{}/status", p)));
        let vm_size = status
            .as_deref()
            .and_then(|s| parse_status_field(s, "VmSize"))
            .unwrap_or(SENTINEL_I64);
        let threads = status
            .as_deref()
            .and_then(|s| parse_status_field(s, "Threads"))
            .unwrap_or(SENTINEL_I64);
        stats.insert("controller_vm_size".to_string(), json!(vm_size));
        stats.insert("controller_num_threads".to_string(), json!(threads));

        let fds: i64 = pid
            .and_then(|p| self.read(&format!("ls /proc/{}/fd | wc -l", p)))
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(SENTINEL_I64);
        stats.insert("controller_num_fds".to_string(), json!(fds));

        stats
    }
}

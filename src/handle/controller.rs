// src/handle/controller.rs
//! Controller handle (ODL / ONOS)
//!
//! Build/start/stop/clean the controller through its handlers, wait for it to
//! listen on the OpenFlow port and report status "1", and read the operational
//! datastore through counting handlers.

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{HandleCore, Lifecycle, Status, Transition};
use crate::config::ControllerConfig;
use crate::constants::*;
use crate::error::{NstatError, Result};
use crate::remote::{pause, RunOptions, SharedConnector, Shell};

const CONTROLLER_NAMES: &[&str] = &["ODL", "ONOS"];

/// Handler runs while the controller boots; success is decided by the waits that follow.
const LAUNCH: Transition = Transition {
    running: Status::Starting,
    done: Status::Starting,
    failed: Status::NotStarted,
};

const HALT: Transition = Transition {
    running: Status::Stopping,
    done: Status::Stopping,
    failed: Status::NotStopped,
};

/// PID of the process listening on `port` from `ss -H -ltnp` output.
///
/// `-1`: nobody listens; `0`: a listener exists but its owner is not visible to us;
/// otherwise the PID.
pub fn parse_listening_pid(output: &str, port: u16) -> i64 {
    let suffix = format!(":{}", port);
    let mut seen_listener = false;
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(local) = fields.get(3) else { continue };
        if !local.ends_with(&suffix) {
            continue;
        }
        seen_listener = true;
        if let Some(idx) = line.find("pid=") {
            let digits: String = line[idx + 4..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(pid) = digits.parse::<i64>() {
                return pid;
            }
        }
    }
    if seen_listener {
        0
    } else {
        SENTINEL_I64
    }
}

/// Non-negative integer printed by a counting handler, or -1.
pub fn parse_count(output: &str) -> i64 {
    match output.trim().lines().last().map(str::trim).map(str::parse::<i64>) {
        Some(Ok(n)) if n >= 0 => n,
        _ => SENTINEL_I64,
    }
}

pub struct ControllerHandle {
    core: HandleCore,
    cfg: ControllerConfig,
    pid: Option<i64>,
    poll_interval: Duration,
    /// Statistics period for the current sweep point
    pub stats_period_ms: Option<u64>,
}

impl ControllerHandle {
    /// Build a controller handle; the name must be a supported controller.
    pub fn new(cfg: &ControllerConfig, connector: SharedConnector) -> Result<Self> {
        if !CONTROLLER_NAMES.contains(&cfg.name.as_str()) {
            return Err(NstatError::Config(format!(
                "unsupported controller '{}'",
                cfg.name
            )));
        }
        Ok(Self {
            core: HandleCore::new("controller", cfg.node.clone(), &cfg.base_dir, connector),
            cfg: cfg.clone(),
            pid: None,
            poll_interval: CONTROLLER_POLL_INTERVAL,
            stats_period_ms: None,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.cfg
    }

    pub fn ip(&self) -> &str {
        &self.cfg.node.ip
    }

    pub fn sb_port(&self) -> u16 {
        self.cfg.sb_port
    }

    pub fn restconf_port(&self) -> u16 {
        self.cfg.restconf_port
    }

    pub fn pid(&self) -> Option<i64> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        matches!(self.core.status(), Status::Started | Status::Restarted)
    }

    pub fn mint_session(&self) -> Result<Box<dyn Shell>> {
        self.core.mint_session()
    }

    pub fn session(&self) -> Result<&dyn Shell> {
        self.core.session()
    }

    /// -1 for a free port, 0 when held by another user, else the owner PID.
    pub fn getpid_listening_on_port(&self, port: u16) -> Result<i64> {
        let out = self
            .core
            .session()?
            .exec(&format!("ss -H -ltnp 'sport = :{}'", port))?;
        Ok(parse_listening_pid(&out.output, port))
    }

    /// Fail with PortConflict if anything already listens on the southbound port.
    pub fn check_other_controller(&self) -> Result<()> {
        let pid = self.getpid_listening_on_port(self.cfg.sb_port)?;
        if pid != SENTINEL_I64 {
            return Err(self.core.funnel(NstatError::PortConflict {
                handle: self.core.name().to_string(),
                port: self.cfg.sb_port,
                pid,
            }));
        }
        Ok(())
    }

    /// Status handler prints "1" while the controller is up.
    pub fn is_up(&self) -> Result<bool> {
        let out = self
            .core
            .invoke(None, &self.cfg.handlers.status, &[], &RunOptions::new())?;
        Ok(out.trimmed() == CONTROLLER_STATUS_UP)
    }

    fn pid_exists(&self, pid: i64) -> Result<bool> {
        Ok(self
            .core
            .session()?
            .exec(&format!("kill -0 {}", pid))?
            .success())
    }

    pub fn start(&mut self) -> Result<()> {
        if self.is_up()? {
            info!("[controller] already running, start is a no-op");
            if self.pid.is_none() {
                self.pid = Some(self.getpid_listening_on_port(self.cfg.sb_port)?).filter(|p| *p > 0);
            }
            self.core.set_status(Status::Started);
            return Ok(());
        }
        if let Err(e) = self.check_other_controller() {
            self.core.set_status(Status::NotStarted);
            return Err(e);
        }

        info!("[controller] starting {} on {}", self.cfg.name, self.cfg.node.ip);
        let java_opts = self.cfg.java_opts.join(" ");
        let opts = RunOptions::new()
            .prefix("[start]")
            .env(JAVA_OPTS_ENV, &java_opts);
        let start = self.cfg.handlers.start.clone();
        self.core.run_transition(&start, &[], LAUNCH, &opts)?;

        let timeout = self.cfg.start_timeout_ms;
        let pid = self.wait_until_listens(timeout)?;
        self.wait_until_up(timeout)?;
        self.core.set_status(Status::Started);
        info!("[controller] started, pid {}", pid);
        Ok(())
    }

    /// Poll the southbound port every second until a PID shows up.
    pub fn wait_until_listens(&mut self, timeout_ms: u64) -> Result<i64> {
        let deadline = Duration::from_millis(timeout_ms);
        let t0 = Instant::now();
        while t0.elapsed() < deadline {
            let pid = self.getpid_listening_on_port(self.cfg.sb_port)?;
            if pid > 0 {
                self.pid = Some(pid);
                return Ok(pid);
            }
            if pid == 0 {
                self.core.set_status(Status::NotStarted);
                return Err(self.core.funnel(NstatError::PortConflict {
                    handle: self.core.name().to_string(),
                    port: self.cfg.sb_port,
                    pid,
                }));
            }
            debug!("[controller] port {} not listening yet", self.cfg.sb_port);
            pause(self.poll_interval);
        }
        self.core.set_status(Status::NotStarted);
        Err(self.core.funnel(NstatError::ReadyState {
            handle: self.core.name().to_string(),
            what: format!("listening on port {}", self.cfg.sb_port),
            timeout_ms,
        }))
    }

    /// Poll the status handler every second until it prints "1".
    pub fn wait_until_up(&mut self, timeout_ms: u64) -> Result<()> {
        let deadline = Duration::from_millis(timeout_ms);
        let t0 = Instant::now();
        while t0.elapsed() < deadline {
            if self.is_up()? {
                return Ok(());
            }
            pause(self.poll_interval);
        }
        self.core.set_status(Status::NotStarted);
        Err(self.core.funnel(NstatError::ReadyState {
            handle: self.core.name().to_string(),
            what: "status 1".to_string(),
            timeout_ms,
        }))
    }

    pub fn stop(&mut self) -> Result<()> {
        if !self.is_up()? {
            debug!("[controller] not running, nothing to stop");
            self.pid = None;
            self.core.set_status(Status::Stopped);
            return Ok(());
        }

        info!("[controller] stopping");
        let stop = self.cfg.handlers.stop.clone();
        self.core
            .run_transition(&stop, &[], HALT, &RunOptions::new().prefix("[stop]"))?;

        if let Some(pid) = self.pid {
            let deadline = Duration::from_millis(self.cfg.stop_timeout_ms);
            let t0 = Instant::now();
            while self.pid_exists(pid)? {
                if t0.elapsed() >= deadline {
                    self.core.set_status(Status::NotStopped);
                    return Err(self.core.funnel(NstatError::ReadyState {
                        handle: self.core.name().to_string(),
                        what: format!("exit of pid {}", pid),
                        timeout_ms: self.cfg.stop_timeout_ms,
                    }));
                }
                pause(self.poll_interval);
            }
        }
        self.pid = None;
        self.core.set_status(Status::Stopped);
        Ok(())
    }

    pub fn restart(&mut self) -> Result<()> {
        self.core.set_status(Status::Restarting);
        self.stop()?;
        self.start()?;
        self.core.set_status(Status::Restarted);
        Ok(())
    }

    /// Start then stop, so the controller writes out its configuration files.
    pub fn generate_xmls(&mut self) -> Result<()> {
        self.start()?;
        self.stop()
    }

    fn run_config_handler(&self, rel: Option<&str>, what: &str, args: &[String]) -> Result<()> {
        let Some(rel) = rel else {
            warn!("[controller] no {} handler configured, skipping", what);
            return Ok(());
        };
        let out = self
            .core
            .invoke(None, rel, args, &RunOptions::new().prefix(what))
            .map_err(|e| self.core.funnel(e))?;
        if !out.success() {
            return Err(self.core.funnel(NstatError::HandlerFailed {
                handle: self.core.name().to_string(),
                path: self.core.resolve(rel),
                status: out.status,
                output: out.output,
            }));
        }
        Ok(())
    }

    pub fn change_stats_period(&mut self, period_ms: u64) -> Result<()> {
        info!("[controller] statistics period -> {} ms", period_ms);
        self.run_config_handler(
            self.cfg.handlers.statistics.as_deref(),
            "statistics",
            &[period_ms.to_string()],
        )?;
        self.stats_period_ms = Some(period_ms);
        Ok(())
    }

    pub fn disable_persistence(&mut self) -> Result<()> {
        info!("[controller] disabling datastore persistence");
        self.run_config_handler(self.cfg.handlers.persistence.as_deref(), "persistence", &[])
    }

    pub fn flowmods_config(&mut self) -> Result<()> {
        self.run_config_handler(
            self.cfg.handlers.flowmods_config.as_deref(),
            "flowmods_config",
            &[],
        )
    }

    fn oper_count(&self, rel: Option<&str>, shell: Option<&dyn Shell>) -> i64 {
        let Some(rel) = rel else {
            warn!("[controller] datastore handler not configured");
            return SENTINEL_I64;
        };
        let args = [
            self.cfg.node.ip.clone(),
            self.cfg.restconf_port.to_string(),
            self.cfg.restconf_user.clone(),
            self.cfg.restconf_password.clone(),
        ];
        match self.core.invoke(shell, rel, &args, &RunOptions::new()) {
            Ok(out) if out.success() => parse_count(&out.output),
            Ok(out) => {
                debug!("[controller] {} exited {}", rel, out.status);
                SENTINEL_I64
            }
            Err(e) => {
                debug!("[controller] {} failed: {}", rel, e);
                SENTINEL_I64
            }
        }
    }

    pub fn get_oper_hosts(&self, shell: Option<&dyn Shell>) -> i64 {
        self.oper_count(self.cfg.handlers.oper_hosts.as_deref(), shell)
    }

    pub fn get_oper_switches(&self, shell: Option<&dyn Shell>) -> i64 {
        self.oper_count(self.cfg.handlers.oper_switches.as_deref(), shell)
    }

    pub fn get_oper_links(&self, shell: Option<&dyn Shell>) -> i64 {
        self.oper_count(self.cfg.handlers.oper_links.as_deref(), shell)
    }

    pub fn get_oper_flows(&self, shell: Option<&dyn Shell>) -> i64 {
        self.oper_count(self.cfg.handlers.oper_flows.as_deref(), shell)
    }

    pub fn close(&mut self) {
        self.core.close();
    }
}

impl Lifecycle for ControllerHandle {
    fn core(&self) -> &HandleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut HandleCore {
        &mut self.core
    }

    fn build_handler(&self) -> Option<String> {
        Some(self.cfg.handlers.build.clone())
    }

    fn clean_handler(&self) -> Option<String> {
        Some(self.cfg.handlers.clean.clone())
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        if !self.core.has_session() {
            return;
        }
        if self.is_running() {
            if let Err(e) = self.stop() {
                warn!("[controller] stop on drop failed: {}", e);
            }
        }
        if !matches!(self.core.status(), Status::Cleaned | Status::Unknown) {
            if let Err(e) = self.clean() {
                warn!("[controller] clean on drop failed: {}", e);
            }
        }
        self.core.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{node, ScriptedConnector, ScriptedShell};
    use crate::config::ControllerHandlers;
    use crate::remote::CommandOutput;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    pub(crate) fn controller_cfg() -> ControllerConfig {
        ControllerConfig {
            name: "ODL".into(),
            node: node("10.0.0.1"),
            base_dir: "/opt/odl".into(),
            handlers: ControllerHandlers {
                build: "build.sh".into(),
                start: "start.sh".into(),
                stop: "stop.sh".into(),
                status: "status.sh".into(),
                clean: "clean.sh".into(),
                statistics: Some("change_stats.sh".into()),
                persistence: None,
                flowmods_config: None,
                oper_hosts: None,
                oper_switches: Some("oper_switches.sh".into()),
                oper_links: None,
                oper_flows: None,
            },
            sb_port: 6653,
            restconf_port: 8181,
            restconf_user: "admin".into(),
            restconf_password: "admin".into(),
            persistence: true,
            java_opts: vec!["-Xmx4G".into()],
            restart: false,
            start_timeout_ms: 200,
            stop_timeout_ms: 200,
        }
    }

    fn handle(shell: ScriptedShell) -> ControllerHandle {
        let mut h = ControllerHandle::new(&controller_cfg(), Arc::new(ScriptedConnector::single(shell)))
            .unwrap()
            .with_poll_interval(Duration::from_millis(5));
        h.init_ssh().unwrap();
        h
    }

    #[test]
    fn test_parse_listening_pid() {
        assert_eq!(parse_listening_pid("", 6653), -1);
        let other_user = "LISTEN 0 50 *:6653 *:*\n";
        assert_eq!(parse_listening_pid(other_user, 6653), 0);
        let ours = "LISTEN 0 50 [::ffff:10.0.0.1]:6653 *:* users:((\"java\",pid=4242,fd=312))\n";
        assert_eq!(parse_listening_pid(ours, 6653), 4242);
        assert_eq!(parse_listening_pid(ours, 8181), -1);
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("42\n"), 42);
        assert_eq!(parse_count("noise\n17"), 17);
        assert_eq!(parse_count("-3"), -1);
        assert_eq!(parse_count("error"), -1);
    }

    #[test]
    fn test_unknown_controller_rejected() {
        let mut cfg = controller_cfg();
        cfg.name = "RYU".into();
        let res = ControllerHandle::new(&cfg, Arc::new(ScriptedConnector::single(ScriptedShell::new())));
        assert!(matches!(res, Err(NstatError::Config(_))));
    }

    #[test]
    fn test_start_exports_java_opts_and_waits() {
        let started = Arc::new(AtomicUsize::new(0));
        let s1 = started.clone();
        let s2 = started.clone();
        let shell = ScriptedShell::new()
            .reply_with("status.sh", move |_| CommandOutput {
                status: 0,
                output: if s1.load(Ordering::SeqCst) > 0 { "1" } else { "0" }.into(),
            })
            .reply_with("ss -H", move |_| CommandOutput {
                status: 0,
                output: if s2.load(Ordering::SeqCst) > 0 {
                    "LISTEN 0 50 *:6653 *:* users:((\"java\",pid=777,fd=1))".into()
                } else {
                    String::new()
                },
            })
            .reply_with("start.sh", move |_| {
                started.fetch_add(1, Ordering::SeqCst);
                CommandOutput::default()
            });
        let log = shell.log();
        let mut h = handle(shell);
        h.start().unwrap();
        assert_eq!(h.status(), Status::Started);
        assert_eq!(h.pid(), Some(777));
        let cmds = log.lock().unwrap();
        assert!(cmds.iter().any(|c| c.starts_with("export JAVA_OPTS='-Xmx4G';") && c.contains("start.sh")));
    }

    #[test]
    fn test_start_port_conflict() {
        let shell = ScriptedShell::new()
            .reply("status.sh", 0, "0")
            .reply("ss -H", 0, "LISTEN 0 50 *:6653 *:*");
        let start_calls = shell.clone();
        let mut h = handle(shell);
        let err = h.start().unwrap_err();
        assert!(matches!(err, NstatError::PortConflict { pid: 0, .. }));
        assert_eq!(h.status(), Status::NotStarted);
        assert_eq!(start_calls.count("start.sh"), 0);
    }

    #[test]
    fn test_wait_until_listens_zero_timeout() {
        let shell = ScriptedShell::new().reply("ss -H", 0, "");
        let mut h = handle(shell);
        let err = h.wait_until_listens(0).unwrap_err();
        assert!(matches!(err, NstatError::ReadyState { timeout_ms: 0, .. }));
    }

    #[test]
    fn test_wait_until_up_times_out() {
        let shell = ScriptedShell::new().reply("status.sh", 0, "0");
        let mut h = handle(shell);
        let err = h.wait_until_up(30).unwrap_err();
        assert!(matches!(err, NstatError::ReadyState { .. }));
    }

    #[test]
    fn test_stop_tolerates_already_stopped() {
        let shell = ScriptedShell::new().reply("status.sh", 0, "0");
        let probe = shell.clone();
        let mut h = handle(shell);
        h.stop().unwrap();
        assert_eq!(h.status(), Status::Stopped);
        assert_eq!(probe.count("stop.sh"), 0);
    }

    #[test]
    fn test_datastore_getter_over_minted_session() {
        let shell = ScriptedShell::new().reply("oper_switches.sh", 0, "128\n");
        let h = handle(shell);
        let minted = h.mint_session().unwrap();
        assert_eq!(h.get_oper_switches(Some(minted.as_ref())), 128);
        assert_eq!(h.get_oper_links(None), -1);
    }

    #[test]
    fn test_change_stats_period_passes_value() {
        let shell = ScriptedShell::new();
        let probe = shell.clone();
        let mut h = handle(shell);
        h.change_stats_period(5000).unwrap();
        assert_eq!(h.stats_period_ms, Some(5000));
        assert_eq!(probe.count("change_stats.sh' '5000'"), 1);
    }
}

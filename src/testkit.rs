// src/testkit.rs
//! Scripted stand-ins for remote hosts, used by unit and integration tests.
//!
//! A `ScriptedShell` answers commands from a list of (substring, reply) rules and
//! records every command it receives. Clones share rules, log and file store, so a
//! `ScriptedConnector` can hand out "new sessions" that all talk to the same fake host.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::config::NodeConfig;
use crate::error::{NstatError, Result};
use crate::remote::{CommandOutput, Connector, RunOptions, Shell};

type Reply = Arc<dyn Fn(&str) -> CommandOutput + Send + Sync>;

#[derive(Clone, Default)]
pub struct ScriptedShell {
    rules: Arc<Mutex<Vec<(String, Reply)>>>,
    missing: Arc<Mutex<Vec<String>>>,
    log: Arc<Mutex<Vec<String>>>,
    files: Arc<Mutex<BTreeMap<String, String>>>,
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `needle` exit with `status` and print `output`.
    pub fn reply(self, needle: &str, status: i32, output: &str) -> Self {
        let output = output.to_string();
        self.reply_with(needle, move |_| CommandOutput {
            status,
            output: output.clone(),
        })
    }

    /// Commands containing `needle` are answered by `f`.
    pub fn reply_with<F>(self, needle: &str, f: F) -> Self
    where
        F: Fn(&str) -> CommandOutput + Send + Sync + 'static,
    {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push((needle.to_string(), Arc::new(f)));
        }
        self
    }

    /// Handler paths containing `needle` do not exist.
    pub fn missing(self, needle: &str) -> Self {
        if let Ok(mut m) = self.missing.lock() {
            m.push(needle.to_string());
        }
        self
    }

    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        self.log.clone()
    }

    pub fn files(&self) -> Arc<Mutex<BTreeMap<String, String>>> {
        self.files.clone()
    }

    /// Number of recorded commands containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.log
            .lock()
            .map(|l| l.iter().filter(|c| c.contains(needle)).count())
            .unwrap_or(0)
    }

    fn answer(&self, cmd: &str) -> CommandOutput {
        if cmd.starts_with("test -f") || cmd.starts_with("test -x") {
            let missing = self
                .missing
                .lock()
                .map(|m| m.iter().any(|n| cmd.contains(n.as_str())))
                .unwrap_or(false);
            return CommandOutput {
                status: if missing { 1 } else { 0 },
                output: String::new(),
            };
        }
        let reply = self.rules.lock().ok().and_then(|rules| {
            rules
                .iter()
                .find(|(needle, _)| cmd.contains(needle.as_str()))
                .map(|(_, r)| r.clone())
        });
        match reply {
            Some(r) => r(cmd),
            None => CommandOutput::default(),
        }
    }
}

impl Shell for ScriptedShell {
    fn target(&self) -> String {
        "scripted".to_string()
    }

    fn run(&self, cmd: &str, opts: &RunOptions<'_>) -> Result<CommandOutput> {
        let full = crate::remote::compose_command(cmd, &opts.env);
        if let Ok(mut log) = self.log.lock() {
            log.push(full.clone());
        }
        let out = self.answer(&full);
        if let Some(tx) = opts.lines {
            for line in out.output.lines() {
                let _ = tx.send(line.to_string());
            }
        }
        if !opts.block {
            return Ok(CommandOutput::default());
        }
        Ok(out)
    }

    fn copy_file_to(&self, local: &Path, remote: &str) -> Result<()> {
        let text = std::fs::read_to_string(local)
            .map_err(|e| NstatError::io(format!("reading {}", local.display()), e))?;
        if let Ok(mut files) = self.files.lock() {
            files.insert(remote.to_string(), text);
        }
        if let Ok(mut log) = self.log.lock() {
            log.push(format!("copy {} -> {}", local.display(), remote));
        }
        Ok(())
    }

    fn copy_dir_to(&self, local: &Path, remote: &str) -> Result<()> {
        if let Ok(mut log) = self.log.lock() {
            log.push(format!("copy_dir {} -> {}", local.display(), remote));
        }
        Ok(())
    }

    fn copy_dir_from(&self, remote: &str, local: &Path) -> Result<()> {
        if let Ok(mut log) = self.log.lock() {
            log.push(format!("copy_dir_from {} -> {}", remote, local.display()));
        }
        Ok(())
    }
}

/// Hands out clones of scripted shells keyed by node ip
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    shells: BTreeMap<String, ScriptedShell>,
    fallback: Option<ScriptedShell>,
}

impl ScriptedConnector {
    /// Every node maps to the same fake host.
    pub fn single(shell: ScriptedShell) -> Self {
        Self {
            shells: BTreeMap::new(),
            fallback: Some(shell),
        }
    }

    pub fn with_host(mut self, ip: &str, shell: ScriptedShell) -> Self {
        self.shells.insert(ip.to_string(), shell);
        self
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, node: &NodeConfig) -> Result<Box<dyn Shell>> {
        match self.shells.get(&node.ip).or(self.fallback.as_ref()) {
            Some(shell) => Ok(Box::new(shell.clone())),
            None => Err(NstatError::NodeConnection {
                host: node.ip.clone(),
                port: node.ssh_port,
                attempts: 1,
                reason: "no scripted host".into(),
            }),
        }
    }
}

pub fn node(ip: &str) -> NodeConfig {
    NodeConfig {
        ip: ip.to_string(),
        ssh_port: 22,
        username: "nstat".to_string(),
        password: Some("nstat".to_string()),
        key_path: None,
        local: false,
    }
}

/// Controller host that tracks up/down across start, stop and status handlers.
///
/// Handlers are expected at `<base_dir>/{start,stop,status}.sh`; the controller
/// listens on 6653 with pid 4242 while up. The first `foreign_listener_reads`
/// port checks made while down report a listener owned by another user.
pub fn controller_host(base_dir: &str, foreign_listener_reads: usize) -> ScriptedShell {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    let up = Arc::new(AtomicBool::new(false));
    let foreign = Arc::new(AtomicUsize::new(foreign_listener_reads));
    let base = base_dir.trim_end_matches('/');

    let (u_start, u_stop, u_status, u_ss, u_kill) = (up.clone(), up.clone(), up.clone(), up.clone(), up);
    ScriptedShell::new()
        .reply_with(&format!("{}/start.sh", base), move |_| {
            u_start.store(true, Ordering::SeqCst);
            CommandOutput::default()
        })
        .reply_with(&format!("{}/stop.sh", base), move |_| {
            u_stop.store(false, Ordering::SeqCst);
            CommandOutput::default()
        })
        .reply_with(&format!("{}/status.sh", base), move |_| CommandOutput {
            status: 0,
            output: if u_status.load(Ordering::SeqCst) { "1" } else { "0" }.to_string(),
        })
        .reply_with("ss -H -ltnp", move |_| {
            let output = if u_ss.load(Ordering::SeqCst) {
                "LISTEN 0 50 *:6653 *:* users:((\"java\",pid=4242,fd=120))".to_string()
            } else if foreign
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                "LISTEN 0 50 *:6653 *:*".to_string()
            } else {
                String::new()
            };
            CommandOutput { status: 0, output }
        })
        .reply_with("kill -0", move |_| CommandOutput {
            status: if u_kill.load(Ordering::SeqCst) { 0 } else { 1 },
            output: String::new(),
        })
}

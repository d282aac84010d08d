// src/handle/mod.rs
//! Lifecycle-bearing handles around remote processes
//!
//! A handle owns exactly one session to its host and drives the process living
//! there through handler scripts resolved against the component's base directory.
//! Every lifecycle step moves the status through `…ING` → success / `NOT_…` and
//! failures go through one error funnel that logs kind, code, handle and remote
//! output before handing the typed error back to the caller.

pub mod controller;
pub mod emulator;
pub mod nbgen;
pub mod sniffer;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::NodeConfig;
use crate::error::{NstatError, Result};
use crate::remote::{shell_quote, CommandOutput, RunOptions, SharedConnector, Shell};

pub use controller::ControllerHandle;
pub use emulator::{FloodGenHandle, SbEmulator, TopoGenHandle};
pub use nbgen::NbGenHandle;
pub use sniffer::SnifferHandle;

/// Handle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Unknown,
    Building,
    Built,
    NotBuilt,
    Starting,
    Started,
    NotStarted,
    Stopping,
    Stopped,
    NotStopped,
    Cleaning,
    Cleaned,
    NotCleaned,
    Restarting,
    Restarted,
    Deploying,
    Deployed,
    NotDeployed,
    ToposInitialized,
    ToposNotInitialized,
    ToposStarted,
    ToposStopped,
    ToposCleaned,
    TrafficUp,
    TrafficDown,
    GotSwitches,
    GotFlows,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unknown => "UNKNOWN",
            Status::Building => "BUILDING",
            Status::Built => "BUILT",
            Status::NotBuilt => "NOT_BUILT",
            Status::Starting => "STARTING",
            Status::Started => "STARTED",
            Status::NotStarted => "NOT_STARTED",
            Status::Stopping => "STOPPING",
            Status::Stopped => "STOPPED",
            Status::NotStopped => "NOT_STOPPED",
            Status::Cleaning => "CLEANING",
            Status::Cleaned => "CLEANED",
            Status::NotCleaned => "NOT_CLEANED",
            Status::Restarting => "RESTARTING",
            Status::Restarted => "RESTARTED",
            Status::Deploying => "DEPLOYING",
            Status::Deployed => "DEPLOYED",
            Status::NotDeployed => "NOT_DEPLOYED",
            Status::ToposInitialized => "TOPOS_INITIALIZED",
            Status::ToposNotInitialized => "TOPOS_NOT_INITIALIZED",
            Status::ToposStarted => "TOPOS_STARTED",
            Status::ToposStopped => "TOPOS_STOPPED",
            Status::ToposCleaned => "TOPOS_CLEANED",
            Status::TrafficUp => "TRAFFIC_UP",
            Status::TrafficDown => "TRAFFIC_DOWN",
            Status::GotSwitches => "GOT_SWITCHES",
            Status::GotFlows => "GOT_FLOWS",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status triple of one guarded lifecycle step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub running: Status,
    pub done: Status,
    pub failed: Status,
}

impl Transition {
    pub const BUILD: Transition = Transition {
        running: Status::Building,
        done: Status::Built,
        failed: Status::NotBuilt,
    };
    pub const START: Transition = Transition {
        running: Status::Starting,
        done: Status::Started,
        failed: Status::NotStarted,
    };
    pub const STOP: Transition = Transition {
        running: Status::Stopping,
        done: Status::Stopped,
        failed: Status::NotStopped,
    };
    pub const CLEAN: Transition = Transition {
        running: Status::Cleaning,
        done: Status::Cleaned,
        failed: Status::NotCleaned,
    };
    pub const DEPLOY: Transition = Transition {
        running: Status::Deploying,
        done: Status::Deployed,
        failed: Status::NotDeployed,
    };
}

/// State and session shared by every handle kind
pub struct HandleCore {
    name: String,
    node: NodeConfig,
    base_dir: String,
    connector: SharedConnector,
    session: Option<Box<dyn Shell>>,
    status: Status,
}

impl HandleCore {
    pub fn new(name: &str, node: NodeConfig, base_dir: &str, connector: SharedConnector) -> Self {
        Self {
            name: name.to_string(),
            node,
            base_dir: base_dir.trim_end_matches('/').to_string(),
            connector,
            session: None,
            status: Status::Unknown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> &NodeConfig {
        &self.node
    }

    pub fn base_dir(&self) -> &str {
        &self.base_dir
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn set_status(&mut self, status: Status) {
        debug!("[{}] status {} -> {}", self.name, self.status, status);
        self.status = status;
    }

    /// Open the owned session if it is not open yet.
    pub fn init_ssh(&mut self) -> Result<()> {
        if self.session.is_none() {
            info!("[{}] opening session to {}", self.name, self.node.ip);
            let shell = self.connector.connect(&self.node).map_err(|e| self.funnel(e))?;
            self.session = Some(shell);
        }
        Ok(())
    }

    /// A fresh session for concurrent queries; the caller closes it by dropping it.
    pub fn mint_session(&self) -> Result<Box<dyn Shell>> {
        self.connector.connect(&self.node)
    }

    pub fn session(&self) -> Result<&dyn Shell> {
        self.session.as_deref().ok_or_else(|| NstatError::NoSession {
            handle: self.name.clone(),
        })
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn close(&mut self) {
        if self.session.take().is_some() {
            debug!("[{}] session closed", self.name);
        }
    }

    /// Absolute handler path on the remote host.
    pub fn resolve(&self, rel: &str) -> String {
        format!("{}/{}", self.base_dir, rel.trim_start_matches("./"))
    }

    /// Verify the handler exists, making it executable if needed.
    pub fn ensure_handler(&self, shell: &dyn Shell, rel: &str) -> Result<String> {
        let path = self.resolve(rel);
        if !shell.isfile(&path)? {
            return Err(NstatError::HandlerMissing {
                handle: self.name.clone(),
                path,
            });
        }
        if !shell.is_executable(&path)? {
            debug!("[{}] chmod +x {}", self.name, path);
            shell.chmod_exec(&path)?;
        }
        Ok(path)
    }

    /// Invoke a handler without touching the status.
    ///
    /// Runs over `shell` when given (a minted session), else over the owned session.
    pub fn invoke(
        &self,
        shell: Option<&dyn Shell>,
        rel: &str,
        args: &[String],
        opts: &RunOptions<'_>,
    ) -> Result<CommandOutput> {
        let shell = match shell {
            Some(s) => s,
            None => self.session()?,
        };
        let path = self.ensure_handler(shell, rel)?;
        let mut cmd = shell_quote(&path);
        for arg in args {
            cmd.push(' ');
            cmd.push_str(&shell_quote(arg));
        }
        shell.run(&cmd, opts)
    }

    /// Invoke a handler as a guarded lifecycle step.
    pub fn run_transition(
        &mut self,
        rel: &str,
        args: &[String],
        tr: Transition,
        opts: &RunOptions<'_>,
    ) -> Result<CommandOutput> {
        self.set_status(tr.running);
        match self.invoke(None, rel, args, opts) {
            Ok(out) if out.success() => {
                self.set_status(tr.done);
                Ok(out)
            }
            Ok(out) => {
                self.set_status(tr.failed);
                Err(self.funnel(NstatError::HandlerFailed {
                    handle: self.name.clone(),
                    path: self.resolve(rel),
                    status: out.status,
                    output: out.output,
                }))
            }
            Err(e) => {
                self.set_status(tr.failed);
                Err(self.funnel(e))
            }
        }
    }

    /// Log a failure once and hand it back.
    pub fn funnel(&self, err: NstatError) -> NstatError {
        error!(
            handle = %self.name,
            code = err.code(),
            kind = err.kind(),
            "{}{}",
            err,
            err.remote_output()
                .map(|o| format!(" | remote output: {}", o.trim()))
                .unwrap_or_default()
        );
        let bt = std::backtrace::Backtrace::capture();
        if bt.status() == std::backtrace::BacktraceStatus::Captured {
            debug!("[{}] backtrace:\n{}", self.name, bt);
        }
        err
    }
}

/// Operations every handle supports
pub trait Lifecycle {
    fn core(&self) -> &HandleCore;

    fn core_mut(&mut self) -> &mut HandleCore;

    fn build_handler(&self) -> Option<String>;

    fn clean_handler(&self) -> Option<String>;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn status(&self) -> Status {
        self.core().status()
    }

    fn init_ssh(&mut self) -> Result<()> {
        self.core_mut().init_ssh()
    }

    fn build(&mut self) -> Result<()> {
        match self.build_handler() {
            Some(h) => self
                .core_mut()
                .run_transition(&h, &[], Transition::BUILD, &RunOptions::new().prefix("[build]"))
                .map(|_| ()),
            None => {
                self.core_mut().set_status(Status::Built);
                Ok(())
            }
        }
    }

    fn clean(&mut self) -> Result<()> {
        match self.clean_handler() {
            Some(h) => self
                .core_mut()
                .run_transition(&h, &[], Transition::CLEAN, &RunOptions::new().prefix("[clean]"))
                .map(|_| ()),
            None => {
                self.core_mut().set_status(Status::Cleaned);
                Ok(())
            }
        }
    }
}

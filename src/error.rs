// src/error.rs
//! Typed error taxonomy shared by every handle, the flow driver and the runner.
//!
//! Each variant carries a stable numeric code (see `constants`) that is logged by the
//! error funnel and can be correlated across runs.

use thiserror::Error;

use crate::constants::*;

pub type Result<T> = std::result::Result<T, NstatError>;

#[derive(Debug, Error)]
pub enum NstatError {
    /// SSH connect/authenticate failed after all retries
    #[error("cannot connect to {host}:{port} after {attempts} attempt(s): {reason}")]
    NodeConnection {
        host: String,
        port: u16,
        attempts: u32,
        reason: String,
    },

    /// Handler script does not exist on the remote host
    #[error("[{handle}] handler {path} does not exist on the remote host")]
    HandlerMissing { handle: String, path: String },

    /// Handler ran and returned a non-zero exit status
    #[error("[{handle}] handler {path} exited with status {status}: {output}")]
    HandlerFailed {
        handle: String,
        path: String,
        status: i32,
        output: String,
    },

    /// Another process already listens on the controller port (`pid == 0` means
    /// the owner is not visible to the SSH user)
    #[error("[{handle}] port {port} is already held by another process (pid {pid})")]
    PortConflict { handle: String, port: u16, pid: i64 },

    /// Controller did not start listening / report status 1 in time
    #[error("[{handle}] {what} not reached within {timeout_ms} ms")]
    ReadyState {
        handle: String,
        what: String,
        timeout_ms: u64,
    },

    /// Handler output did not match the expected protocol
    #[error("[{handle}] cannot parse output of {handler}: {output}")]
    OutputParse {
        handle: String,
        handler: String,
        output: String,
    },

    /// Missing/invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Handle used before `init_ssh`
    #[error("[{handle}] no SSH session, call init_ssh first")]
    NoSession { handle: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ssh: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl NstatError {
    /// Stable error code written into logs.
    pub fn code(&self) -> u16 {
        match self {
            NstatError::NodeConnection { .. } => ERR_NODE_CONNECTION,
            NstatError::HandlerMissing { .. } => ERR_HANDLER_MISSING,
            NstatError::HandlerFailed { .. } => ERR_HANDLER_FAILED,
            NstatError::PortConflict { .. } => ERR_PORT_CONFLICT,
            NstatError::ReadyState { .. } => ERR_READY_STATE,
            NstatError::OutputParse { .. } => ERR_OUTPUT_PARSE,
            NstatError::Config(_) => ERR_CONFIG,
            NstatError::NoSession { .. } => ERR_NO_SESSION,
            NstatError::Io { .. } => ERR_IO,
            NstatError::Ssh(_) => ERR_SSH,
            NstatError::Http(_) => ERR_HTTP,
            NstatError::Json(_) | NstatError::Yaml(_) => ERR_SERIALIZATION,
        }
    }

    /// Short kind label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            NstatError::NodeConnection { .. } => "NodeConnection",
            NstatError::HandlerMissing { .. } => "HandlerMissing",
            NstatError::HandlerFailed { .. } => "HandlerFailed",
            NstatError::PortConflict { .. } => "PortConflict",
            NstatError::ReadyState { .. } => "ReadyState",
            NstatError::OutputParse { .. } => "OutputParse",
            NstatError::Config(_) => "Config",
            NstatError::NoSession { .. } => "NoSession",
            NstatError::Io { .. } => "Io",
            NstatError::Ssh(_) => "Ssh",
            NstatError::Http(_) => "Http",
            NstatError::Json(_) => "Json",
            NstatError::Yaml(_) => "Yaml",
        }
    }

    /// Remote output attached to the error, if any.
    pub fn remote_output(&self) -> Option<&str> {
        match self {
            NstatError::HandlerFailed { output, .. } | NstatError::OutputParse { output, .. } => {
                Some(output.as_str())
            }
            _ => None,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        NstatError::Io {
            context: context.into(),
            source,
        }
    }
}

// src/remote.rs
//! Remote execution for nstat handles
//!
//! A `Shell` runs commands on one host and moves files to and from it:
//! - `SshSession` talks to a remote node over ssh2 (password or key auth)
//! - `LocalShell` runs the same commands through `sh -c` on this machine
//!
//! Output is streamed in bounded 4 KiB reads with stderr merged into stdout. When a
//! line queue is supplied every complete line is pushed as soon as it arrives, so a
//! consumer on another thread can follow a long-running handler.

use crossbeam_channel::Sender;
use ssh2::{ExtendedData, Session};
use std::fs;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::NodeConfig;
use crate::constants::*;
use crate::error::{NstatError, Result};

/// Exit status and combined stdout/stderr of a command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub status: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn trimmed(&self) -> &str {
        self.output.trim()
    }
}

/// Per-invocation options of `Shell::run`
#[derive(Debug, Clone)]
pub struct RunOptions<'a> {
    /// Tag prepended to logged output lines
    pub prefix: &'a str,
    /// Receives every complete output line while the command runs
    pub lines: Option<&'a Sender<String>>,
    /// Log output lines at info instead of debug
    pub print: bool,
    /// Wait for completion; false returns status 0 right after launch
    pub block: bool,
    /// Request a pseudo-terminal (SSH only)
    pub pty: bool,
    /// Variables exported into the command's environment
    pub env: Vec<(String, String)>,
}

impl Default for RunOptions<'_> {
    fn default() -> Self {
        Self {
            prefix: "",
            lines: None,
            print: false,
            block: true,
            pty: false,
            env: Vec::new(),
        }
    }
}

impl<'a> RunOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: &'a str) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn lines(mut self, tx: &'a Sender<String>) -> Self {
        self.lines = Some(tx);
        self
    }

    pub fn print(mut self, print: bool) -> Self {
        self.print = print;
        self
    }

    pub fn fire_and_forget(mut self) -> Self {
        self.block = false;
        self
    }

    pub fn pty(mut self, pty: bool) -> Self {
        self.pty = pty;
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }
}

/// Quote a string for POSIX sh.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Prefix `cmd` with `export` statements for `env`.
pub fn compose_command(cmd: &str, env: &[(String, String)]) -> String {
    if env.is_empty() {
        return cmd.to_string();
    }
    let exports: Vec<String> = env
        .iter()
        .map(|(k, v)| format!("export {}={};", k, shell_quote(v)))
        .collect();
    format!("{} {}", exports.join(" "), cmd)
}

/// Detach `cmd` from the session; its output is discarded.
pub fn background_command(cmd: &str) -> String {
    format!("nohup sh -c {} </dev/null >/dev/null 2>&1 &", shell_quote(cmd))
}

/// Splits a byte stream into lines across chunk boundaries.
#[derive(Default)]
struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            out.push(clean_line(&line));
        }
        out
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = clean_line(&self.pending);
        self.pending.clear();
        Some(line)
    }
}

fn clean_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

/// Read `reader` to EOF in bounded chunks, forwarding lines as they complete.
fn pump<R: Read>(reader: &mut R, opts: &RunOptions<'_>, host: &str) -> std::io::Result<String> {
    let mut buf = [0u8; REMOTE_READ_CHUNK_BYTES];
    let mut combined = String::new();
    let mut splitter = LineSplitter::default();

    let emit = |line: String, combined: &mut String| {
        if opts.print {
            info!("[{}]{} {}", host, opts.prefix, line);
        } else {
            debug!("[{}]{} {}", host, opts.prefix, line);
        }
        if let Some(tx) = opts.lines {
            if tx.send(line.clone()).is_err() {
                debug!("[{}] line consumer went away", host);
            }
        }
        combined.push_str(&line);
        combined.push('\n');
    };

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        for line in splitter.push(&buf[..n]) {
            emit(line, &mut combined);
        }
    }
    if let Some(line) = splitter.finish() {
        emit(line, &mut combined);
    }
    Ok(combined)
}

/// Command execution and file transfer on one host.
pub trait Shell: Send + Sync {
    /// Human readable target, e.g. `user@10.0.0.1:22`
    fn target(&self) -> String;

    /// Run `cmd`; a non-zero exit status is returned, not raised.
    fn run(&self, cmd: &str, opts: &RunOptions<'_>) -> Result<CommandOutput>;

    fn copy_file_to(&self, local: &Path, remote: &str) -> Result<()>;

    /// Recursive copy of a local directory; names are preserved under `remote`.
    fn copy_dir_to(&self, local: &Path, remote: &str) -> Result<()>;

    /// Recursive copy of a remote directory, creating missing local directories.
    fn copy_dir_from(&self, remote: &str, local: &Path) -> Result<()>;

    fn exec(&self, cmd: &str) -> Result<CommandOutput> {
        self.run(cmd, &RunOptions::default())
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        self.checked(&format!("mkdir -p {}", shell_quote(path)))
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        self.checked(&format!("rm -rf {}", shell_quote(path)))
    }

    fn chmod_exec(&self, path: &str) -> Result<()> {
        self.checked(&format!("chmod +x {}", shell_quote(path)))
    }

    fn isfile(&self, path: &str) -> Result<bool> {
        Ok(self.exec(&format!("test -f {}", shell_quote(path)))?.success())
    }

    fn isdir(&self, path: &str) -> Result<bool> {
        Ok(self.exec(&format!("test -d {}", shell_quote(path)))?.success())
    }

    fn is_executable(&self, path: &str) -> Result<bool> {
        Ok(self.exec(&format!("test -x {}", shell_quote(path)))?.success())
    }

    #[doc(hidden)]
    fn checked(&self, cmd: &str) -> Result<()> {
        let out = self.exec(cmd)?;
        if out.success() {
            Ok(())
        } else {
            Err(NstatError::HandlerFailed {
                handle: self.target(),
                path: cmd.to_string(),
                status: out.status,
                output: out.output,
            })
        }
    }
}

/// SSH session to a remote node
pub struct SshSession {
    session: Session,
    host: String,
}

impl SshSession {
    /// Connect with up to `max_retries` attempts, sleeping 2 s in between.
    pub fn connect(node: &NodeConfig, max_retries: u32) -> Result<Self> {
        let attempts = max_retries.max(1);
        let mut last_err = String::new();
        for attempt in 1..=attempts {
            match Self::connect_once(node) {
                Ok(sess) => return Ok(sess),
                Err(e) => {
                    warn!(
                        "SSH attempt {}/{} to {}@{}:{} failed: {}",
                        attempt, attempts, node.username, node.ip, node.ssh_port, e
                    );
                    last_err = e.to_string();
                    if attempt < attempts {
                        std::thread::sleep(SSH_RETRY_SLEEP);
                    }
                }
            }
        }
        Err(NstatError::NodeConnection {
            host: node.ip.clone(),
            port: node.ssh_port,
            attempts,
            reason: last_err,
        })
    }

    fn connect_once(node: &NodeConfig) -> Result<Self> {
        let addr = format!("{}:{}", node.ip, node.ssh_port);
        let sock = addr
            .to_socket_addrs()
            .map_err(|e| NstatError::io(format!("resolving {}", addr), e))?
            .next()
            .ok_or_else(|| NstatError::NodeConnection {
                host: node.ip.clone(),
                port: node.ssh_port,
                attempts: 1,
                reason: "address did not resolve".into(),
            })?;
        let tcp = TcpStream::connect_timeout(&sock, SSH_CONNECT_TIMEOUT)
            .map_err(|e| NstatError::io(format!("connecting to {}", addr), e))?;

        let mut sess = Session::new()?;
        sess.set_tcp_stream(tcp);
        sess.handshake()?;

        match &node.password {
            Some(password) => sess.userauth_password(&node.username, password)?,
            None => {
                let key_path = node.key_path.as_deref().unwrap_or(DEFAULT_SSH_KEY_PATH);
                let expanded = shellexpand::tilde(key_path);
                let key_file = Path::new(expanded.as_ref());
                if !key_file.exists() {
                    return Err(NstatError::Config(format!(
                        "SSH key not found: {}",
                        key_file.display()
                    )));
                }
                debug!("Authenticating with key: {}", key_file.display());
                sess.userauth_pubkey_file(&node.username, None, key_file, None)?;
            }
        }

        if !sess.authenticated() {
            return Err(NstatError::NodeConnection {
                host: node.ip.clone(),
                port: node.ssh_port,
                attempts: 1,
                reason: format!("authentication failed for {}", node.username),
            });
        }

        info!("SSH connected to {}@{}", node.username, addr);
        Ok(SshSession {
            session: sess,
            host: format!("{}@{}", node.username, addr),
        })
    }

    fn copy_remote_tree(&self, sftp: &ssh2::Sftp, remote: &Path, local: &Path) -> Result<()> {
        fs::create_dir_all(local)
            .map_err(|e| NstatError::io(format!("creating {}", local.display()), e))?;
        for (path, stat) in sftp.readdir(remote)? {
            let Some(name) = path.file_name() else { continue };
            let target = local.join(name);
            if stat.is_dir() {
                self.copy_remote_tree(sftp, &path, &target)?;
            } else {
                let mut src = sftp.open(&path)?;
                let mut bytes = Vec::new();
                src.read_to_end(&mut bytes)
                    .map_err(|e| NstatError::io(format!("reading {}", path.display()), e))?;
                fs::write(&target, bytes)
                    .map_err(|e| NstatError::io(format!("writing {}", target.display()), e))?;
            }
        }
        Ok(())
    }
}

impl Shell for SshSession {
    fn target(&self) -> String {
        self.host.clone()
    }

    fn run(&self, cmd: &str, opts: &RunOptions<'_>) -> Result<CommandOutput> {
        let full = compose_command(cmd, &opts.env);
        debug!("SSH exec on {}: {}", self.host, full);

        let mut channel = self.session.channel_session()?;
        channel.handle_extended_data(ExtendedData::Merge)?;

        if !opts.block {
            channel.exec(&background_command(&full))?;
            let closed = channel
                .wait_eof()
                .and_then(|_| channel.close())
                .and_then(|_| channel.wait_close());
            if let Err(e) = closed {
                debug!("[{}] closing background channel: {}", self.host, e);
            }
            return Ok(CommandOutput::default());
        }

        if opts.pty {
            channel.request_pty("xterm", None, None)?;
        }
        channel.exec(&full)?;

        let output = pump(&mut channel, opts, &self.host)
            .map_err(|e| NstatError::io(format!("reading output of '{}'", cmd), e))?;
        channel.wait_close()?;
        let status = channel.exit_status()?;
        Ok(CommandOutput { status, output })
    }

    fn copy_file_to(&self, local: &Path, remote: &str) -> Result<()> {
        let bytes = fs::read(local)
            .map_err(|e| NstatError::io(format!("reading {}", local.display()), e))?;
        let sftp = self.session.sftp()?;
        let mut file = sftp.create(Path::new(remote))?;
        file.write_all(&bytes)
            .map_err(|e| NstatError::io(format!("writing {}:{}", self.host, remote), e))?;
        debug!("Copied {} -> {}:{}", local.display(), self.host, remote);
        Ok(())
    }

    fn copy_dir_to(&self, local: &Path, remote: &str) -> Result<()> {
        self.mkdir(remote)?;
        for entry in WalkDir::new(local).min_depth(1) {
            let entry = entry.map_err(|e| {
                NstatError::io(format!("walking {}", local.display()), std::io::Error::other(e))
            })?;
            let rel = entry.path().strip_prefix(local).unwrap_or(entry.path());
            let dest = format!("{}/{}", remote.trim_end_matches('/'), rel.to_string_lossy());
            if entry.file_type().is_dir() {
                self.mkdir(&dest)?;
            } else {
                self.copy_file_to(entry.path(), &dest)?;
            }
        }
        Ok(())
    }

    fn copy_dir_from(&self, remote: &str, local: &Path) -> Result<()> {
        let sftp = self.session.sftp()?;
        self.copy_remote_tree(&sftp, Path::new(remote), local)
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Err(e) = self.session.disconnect(None, "nstat session closed", None) {
            debug!("SSH disconnect from {}: {}", self.host, e);
        }
    }
}

/// Runs commands on this machine
#[derive(Debug, Default, Clone)]
pub struct LocalShell;

impl Shell for LocalShell {
    fn target(&self) -> String {
        "localhost".to_string()
    }

    fn run(&self, cmd: &str, opts: &RunOptions<'_>) -> Result<CommandOutput> {
        let full = format!("( {} ) 2>&1", compose_command(cmd, &opts.env));
        debug!("Local exec: {}", full);

        if !opts.block {
            let mut child = Command::new("sh")
                .arg("-c")
                .arg(&full)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| NstatError::io(format!("spawning '{}'", cmd), e))?;
            let label = cmd.to_string();
            // Reaper; nobody joins it
            thread::spawn(move || match child.wait() {
                Ok(status) => debug!("Background '{}' exited: {}", label, status),
                Err(e) => debug!("Background '{}' wait failed: {}", label, e),
            });
            return Ok(CommandOutput::default());
        }

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&full)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| NstatError::io(format!("spawning '{}'", cmd), e))?;

        let output = match child.stdout.take() {
            Some(mut stdout) => pump(&mut stdout, opts, "localhost")
                .map_err(|e| NstatError::io(format!("reading output of '{}'", cmd), e))?,
            None => String::new(),
        };
        let status = child
            .wait()
            .map_err(|e| NstatError::io(format!("waiting for '{}'", cmd), e))?;
        Ok(CommandOutput {
            status: status.code().unwrap_or(-1),
            output,
        })
    }

    fn copy_file_to(&self, local: &Path, remote: &str) -> Result<()> {
        fs::copy(local, remote)
            .map_err(|e| NstatError::io(format!("copying {} to {}", local.display(), remote), e))?;
        Ok(())
    }

    fn copy_dir_to(&self, local: &Path, remote: &str) -> Result<()> {
        copy_local_tree(local, Path::new(remote))
    }

    fn copy_dir_from(&self, remote: &str, local: &Path) -> Result<()> {
        copy_local_tree(Path::new(remote), local)
    }
}

fn copy_local_tree(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).map_err(|e| NstatError::io(format!("creating {}", to.display()), e))?;
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|e| {
            NstatError::io(format!("walking {}", from.display()), std::io::Error::other(e))
        })?;
        let rel = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)
                .map_err(|e| NstatError::io(format!("creating {}", dest.display()), e))?;
        } else {
            fs::copy(entry.path(), &dest)
                .map_err(|e| NstatError::io(format!("copying {}", entry.path().display()), e))?;
        }
    }
    Ok(())
}

/// Mints sessions for handles.
pub trait Connector: Send + Sync {
    fn connect(&self, node: &NodeConfig) -> Result<Box<dyn Shell>>;
}

/// SSH for remote nodes, `LocalShell` for nodes marked `local`
#[derive(Debug, Clone)]
pub struct DefaultConnector {
    pub max_retries: u32,
}

impl Default for DefaultConnector {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_SSH_MAX_RETRIES,
        }
    }
}

impl Connector for DefaultConnector {
    fn connect(&self, node: &NodeConfig) -> Result<Box<dyn Shell>> {
        if node.local {
            return Ok(Box::new(LocalShell));
        }
        Ok(Box::new(SshSession::connect(node, self.max_retries)?))
    }
}

pub type SharedConnector = Arc<dyn Connector>;

/// Sleep helper used by every poll loop; a zero interval returns immediately.
pub fn pause(interval: Duration) {
    if !interval.is_zero() {
        std::thread::sleep(interval);
    }
}

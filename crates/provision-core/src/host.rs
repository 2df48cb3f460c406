//! The seam between provisioning logic and the machine being provisioned.
//!
//! Predicates, effects, service operations and probes only touch the host
//! through [`Host`]. [`SystemHost`] is the real implementation: subprocesses
//! via `std::process`, HTTP via a blocking `reqwest` client, files via
//! `std::fs`.

use crate::environment::Platform;
use crate::error::{ProvisionError, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Cap on captured command output, keeping the tail.
const MAX_OUTPUT: usize = 10 * 1024;

/// How long to keep reading output after the direct child has exited.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// CommandSpec / ExecOutput
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn exec(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            timeout: None,
        }
    }

    /// Run `command` through the platform shell.
    pub fn shell(command: &str, platform: Platform) -> Self {
        match platform {
            Platform::Windows => Self::exec("cmd", vec!["/C".to_string(), command.to_string()]),
            Platform::Linux | Platform::Macos => {
                Self::exec("sh", vec!["-c".to_string(), command.to_string()])
            }
        }
    }

    pub fn in_dir(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout = if seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(seconds as u64))
        };
        self
    }

    pub fn display(&self) -> String {
        let mut s = self.program.clone();
        for a in &self.args {
            s.push(' ');
            s.push_str(a);
        }
        s
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutput {
    /// `None` when the process was killed by a signal or by the timeout.
    pub exit_code: Option<i32>,
    pub output: String,
    pub timed_out: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// One-line description suitable for an Outcome detail.
    pub fn summary(&self) -> String {
        if self.timed_out {
            return if self.output.is_empty() {
                "timed out".to_string()
            } else {
                self.output.clone()
            };
        }
        let status = match self.exit_code {
            Some(code) => format!("exit {code}"),
            None => "terminated by signal".to_string(),
        };
        let tail = last_line(&self.output);
        if tail.is_empty() {
            status
        } else {
            format!("{status}: {tail}")
        }
    }
}

fn last_line(output: &str) -> &str {
    output.trim().lines().last().unwrap_or("").trim()
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

pub trait Host {
    /// Run a command to completion. `Err` only when the process could not be
    /// spawned; a non-zero exit is reported through `ExecOutput`.
    fn execute(&self, spec: &CommandSpec) -> Result<ExecOutput>;

    /// Issue a GET. `Err` carries a transport error message (connection
    /// refused, timeout, TLS failure).
    fn http_get(&self, url: &str, timeout: Duration) -> std::result::Result<HttpResponse, String>;

    fn read_file(&self, path: &Path) -> std::io::Result<String>;

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()>;

    fn file_exists(&self, path: &Path) -> bool;

    /// Whether an executable named `name` resolves on `PATH`.
    fn command_available(&self, name: &str) -> bool;
}

// ---------------------------------------------------------------------------
// SystemHost
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct SystemHost;

impl SystemHost {
    pub fn new() -> Self {
        Self
    }
}

impl Host for SystemHost {
    fn execute(&self, spec: &CommandSpec) -> Result<ExecOutput> {
        run_command(spec)
    }

    fn http_get(&self, url: &str, timeout: Duration) -> std::result::Result<HttpResponse, String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("http client: {e}"))?;
        let resp = client.get(url).send().map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        let body = resp.text().map_err(|e| e.to_string())?;
        Ok(HttpResponse { status, body })
    }

    fn read_file(&self, path: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        crate::io::atomic_write(path, contents)
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn command_available(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }
}

/// Execute a command with an optional timeout.
///
/// stdout/stderr are read on dedicated threads that forward chunks over a
/// channel, so a chatty child cannot fill a pipe buffer and deadlock. With a
/// timeout, the child is waited on from a separate thread and `recv_timeout`
/// bounds the wait; on expiry the process is killed by PID.
///
/// Background processes started by the command inherit its pipes and may
/// hold them open indefinitely. Once the direct child has exited, output is
/// collected for at most [`OUTPUT_GRACE`] and whatever arrived is kept.
fn run_command(spec: &CommandSpec) -> Result<ExecOutput> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| ProvisionError::effect(spec.display(), format!("failed to spawn: {e}")))?;
    let child_pid = child.id();

    let (tx, rx) = mpsc::channel();
    spawn_reader(child.stdout.take(), tx.clone(), Chunk::Stdout);
    spawn_reader(child.stderr.take(), tx, Chunk::Stderr);

    let wait_result = match spec.timeout {
        None => child.wait(),
        Some(timeout) => {
            let (wait_tx, wait_rx) = mpsc::channel();
            std::thread::spawn(move || {
                let _ = wait_tx.send(child.wait());
            });
            match wait_rx.recv_timeout(timeout) {
                Ok(result) => result,
                Err(_) => {
                    kill_process(child_pid);
                    return Ok(ExecOutput {
                        exit_code: None,
                        output: format!("timed out after {}s", timeout.as_secs()),
                        timed_out: true,
                    });
                }
            }
        }
    };

    let (stdout_buf, stderr_buf) = collect_output(&rx, OUTPUT_GRACE);
    let status = wait_result
        .map_err(|e| ProvisionError::effect(spec.display(), format!("wait failed: {e}")))?;

    Ok(ExecOutput {
        exit_code: status.code(),
        output: combine_output(&stdout_buf, &stderr_buf),
        timed_out: false,
    })
}

enum Chunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

fn spawn_reader<R: Read + Send + 'static>(
    handle: Option<R>,
    tx: mpsc::Sender<Chunk>,
    wrap: fn(Vec<u8>) -> Chunk,
) {
    let Some(mut reader) = handle else {
        return;
    };
    std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(wrap(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Gather output until every reader has hit EOF or `grace` has passed.
fn collect_output(rx: &mpsc::Receiver<Chunk>, grace: Duration) -> (String, String) {
    let deadline = Instant::now() + grace;
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match rx.recv_timeout(remaining) {
            Ok(Chunk::Stdout(bytes)) => stdout.extend(bytes),
            Ok(Chunk::Stderr(bytes)) => stderr.extend(bytes),
            // Disconnected: both pipes closed. Timeout: something still holds them.
            Err(_) => break,
        }
    }
    (
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    )
}

/// Combine stdout/stderr and cap the result, keeping the tail.
fn combine_output(stdout: &str, stderr: &str) -> String {
    let output = if stderr.is_empty() {
        stdout.to_string()
    } else if stdout.is_empty() {
        stderr.to_string()
    } else {
        format!("{stdout}\n{stderr}")
    };
    let trimmed = output.trim();
    if trimmed.len() <= MAX_OUTPUT {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - MAX_OUTPUT;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

/// Best-effort forced termination; errors are ignored.
fn kill_process(pid: u32) {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("taskkill");
        c.args(["/F", "/T", "/PID", &pid.to_string()]);
        c
    } else {
        let mut c = Command::new("kill");
        c.args(["-9", &pid.to_string()]);
        c
    };
    let _ = cmd.stdout(Stdio::null()).stderr(Stdio::null()).status();
}

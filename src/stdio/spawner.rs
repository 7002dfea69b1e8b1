//! Server process spawner.
//!
//! Launches the server under test with:
//! - piped stdin, stdout, and stderr;
//! - `kill_on_drop(true)` so the process never outlives the tool;
//! - either the full inherited environment or `env_clear()` plus
//!   [`ALLOWED_ENV_VARS`], with configured variables layered on top;
//! - startup detection: wait for a stderr line matching the ready pattern,
//!   or sleep a fixed delay and confirm the process is still alive.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use crate::config::{compile_pattern, SmokeConfig};
use crate::stdio::stderr::decode_line;
use crate::{AppError, Result};

/// Environment variables inherited when `inherit_env` is disabled.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Upper bound on collecting stderr from a server that died during startup.
const EXIT_STDERR_WINDOW: Duration = Duration::from_millis(500);

/// How the spawner decides the server is ready for its first request.
#[derive(Debug, Clone)]
pub enum Readiness {
    /// Sleep, then check the process has not exited.
    Delay(Duration),
    /// Read stderr until a line matches, bounded by the timeout.
    Pattern {
        /// Compiled ready pattern.
        pattern: Regex,
        /// Maximum time to wait for a match.
        timeout: Duration,
    },
}

/// Configuration for spawning the server process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Program to execute.
    pub command: String,
    /// Program arguments.
    pub args: Vec<String>,
    /// Working directory, if any.
    pub cwd: Option<PathBuf>,
    /// Variables set on top of the (possibly filtered) environment.
    pub env: BTreeMap<String, String>,
    /// Inherit the tool's full environment.
    pub inherit_env: bool,
    /// Startup detection strategy.
    pub readiness: Readiness,
}

impl SpawnConfig {
    /// Derive spawn settings from a validated run configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the ready pattern does not compile.
    pub fn from_config(config: &SmokeConfig) -> Result<Self> {
        let readiness = match &config.startup.ready_pattern {
            Some(pattern) => Readiness::Pattern {
                pattern: compile_pattern("startup.ready_pattern", pattern)?,
                timeout: Duration::from_millis(config.startup.timeout_ms),
            },
            None => Readiness::Delay(Duration::from_millis(config.startup.delay_ms)),
        };

        Ok(Self {
            command: config.server.command.clone(),
            args: config.server.args.clone(),
            cwd: config.server.cwd.clone(),
            env: config.server.env.clone(),
            inherit_env: config.server.inherit_env,
            readiness,
        })
    }
}

/// Stdio handles of a server that passed startup detection.
///
/// The caller keeps `child` alive; dropping it kills the process.
#[derive(Debug)]
pub struct ServerConnection {
    /// Child process handle.
    pub child: Child,
    /// OS process id, when still known.
    pub pid: Option<u32>,
    /// Server stdin for outbound messages.
    pub stdin: ChildStdin,
    /// Raw server stdout, framed later by the reader task.
    pub stdout: ChildStdout,
    /// Buffered server stderr; may hold data read past the ready line.
    pub stderr: BufReader<ChildStderr>,
    /// Stderr lines consumed while waiting for the ready pattern.
    pub startup_stderr: Vec<String>,
}

/// Spawn the server and wait until it is ready.
///
/// # Errors
///
/// - `AppError::Spawn("failed to spawn …")`: OS spawn failure, e.g. not found.
/// - `AppError::Spawn("server exited during startup …")`: the process died
///   before it became ready; the message carries its stderr.
/// - `AppError::Timeout("server did not become ready …")`: the ready pattern
///   was not seen in time; the process is killed first.
pub async fn spawn_server(config: &SpawnConfig) -> Result<ServerConnection> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    if !config.inherit_env {
        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
    }
    cmd.envs(&config.env);

    if let Some(cwd) = &config.cwd {
        cmd.current_dir(cwd);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!("failed to spawn `{}`: {err}", config.command))
    })?;
    let pid = child.id();

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture server stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture server stdout".into()))?;
    let stderr_raw = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture server stderr".into()))?;
    let mut stderr = BufReader::new(stderr_raw);

    info!(pid, command = %config.command, "server process spawned");

    let startup_stderr = match &config.readiness {
        Readiness::Delay(delay) => {
            tokio::time::sleep(*delay).await;
            ensure_running(&mut child, &mut stderr).await?;
            Vec::new()
        }
        Readiness::Pattern { pattern, timeout } => {
            wait_for_pattern(&mut child, &mut stderr, pattern, *timeout).await?
        }
    };

    info!(pid, "server ready");

    Ok(ServerConnection {
        child,
        pid,
        stdin,
        stdout,
        stderr,
        startup_stderr,
    })
}

/// Read stderr lines until one matches `pattern`.
async fn wait_for_pattern(
    child: &mut Child,
    stderr: &mut BufReader<ChildStderr>,
    pattern: &Regex,
    timeout: Duration,
) -> Result<Vec<String>> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut seen = Vec::new();

    loop {
        let mut raw = Vec::new();
        match tokio::time::timeout_at(deadline, stderr.read_until(b'\n', &mut raw)).await {
            Err(_elapsed) => {
                child.kill().await.ok();
                return Err(AppError::Timeout(format!(
                    "server did not become ready within {timeout:?}: no stderr line matched `{pattern}`"
                )));
            }
            Ok(Err(err)) => {
                return Err(AppError::Spawn(format!(
                    "failed to read server stderr during startup: {err}"
                )));
            }
            Ok(Ok(0)) => {
                // stderr closed: the server is gone or about to be.
                return Err(exit_error(child, seen).await);
            }
            Ok(Ok(_)) => {
                let line = decode_line(&raw).trim_end().to_owned();
                debug!(line = %line, "startup stderr");
                let ready = pattern.is_match(&line);
                seen.push(line);
                if ready {
                    return Ok(seen);
                }
            }
        }
    }
}

/// Fail if the process has already exited, attaching whatever it logged.
async fn ensure_running(
    child: &mut Child,
    stderr: &mut BufReader<ChildStderr>,
) -> Result<()> {
    match child.try_wait() {
        Ok(None) => Ok(()),
        Ok(Some(_)) => {
            let mut rest = Vec::new();
            // Bounded: a grandchild may still hold the pipe open.
            let _ = tokio::time::timeout(EXIT_STDERR_WINDOW, stderr.read_to_end(&mut rest)).await;
            let seen = String::from_utf8_lossy(&rest)
                .lines()
                .map(str::to_owned)
                .collect();
            Err(exit_error(child, seen).await)
        }
        Err(err) => Err(AppError::Spawn(format!(
            "failed to poll server process: {err}"
        ))),
    }
}

async fn exit_error(child: &mut Child, stderr: Vec<String>) -> AppError {
    let status = match tokio::time::timeout(EXIT_STDERR_WINDOW, child.wait()).await {
        Ok(Ok(status)) => describe_exit(status.code()),
        Ok(Err(err)) => format!("wait error: {err}"),
        Err(_) => "stderr closed".to_owned(),
    };

    let detail = if stderr.is_empty() {
        String::new()
    } else {
        format!("; stderr: {}", stderr.join(" | "))
    };

    AppError::Spawn(format!("server exited during startup ({status}){detail}"))
}

/// Human-readable description of an exit code.
#[must_use]
pub fn describe_exit(code: Option<i32>) -> String {
    code.map_or_else(
        || "terminated by signal".to_owned(),
        |c| format!("exited with code {c}"),
    )
}

//! Smoke-run configuration parsing and validation.
//!
//! A run is described either by a TOML scenario file or by the quick form
//! built from the command line (`mcp-smoke --method tools/list -- node server.js`).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::{AppError, Result};

/// Method sent when a run has no configured steps.
pub const DEFAULT_METHOD: &str = "tools/list";

/// MCP protocol revision offered during `initialize` unless overridden.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

/// How to launch the server under test.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Program to execute (resolved through `PATH`).
    pub command: String,
    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; inherits the tool's own when unset.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Extra environment variables set on the child.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Inherit the full environment. When false only a small allowlist
    /// plus `env` reaches the child.
    #[serde(default = "default_true")]
    pub inherit_env: bool,
}

impl ServerConfig {
    /// Render the command line for logs and reports.
    #[must_use]
    pub fn display_command(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Startup detection settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StartupConfig {
    /// Fixed delay before the first request when no `ready_pattern` is set.
    #[serde(default = "default_startup_delay_ms")]
    pub delay_ms: u64,
    /// Regex matched against stderr lines; the first match marks the server ready.
    #[serde(default)]
    pub ready_pattern: Option<String>,
    /// Upper bound on waiting for `ready_pattern`.
    #[serde(default = "default_startup_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_startup_delay_ms(),
            ready_pattern: None,
            timeout_ms: default_startup_timeout_ms(),
        }
    }
}

/// Bounded waits applied during the run (milliseconds).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Default time to wait for each response.
    #[serde(default = "default_request_ms")]
    pub request_ms: u64,
    /// Grace period for each shutdown phase (close stdin, terminate).
    #[serde(default = "default_shutdown_ms")]
    pub shutdown_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: default_request_ms(),
            shutdown_ms: default_shutdown_ms(),
        }
    }
}

/// MCP `initialize` exchange settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HandshakeConfig {
    /// Perform `initialize` + `notifications/initialized` before the steps.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Protocol revision offered to the server.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// `clientInfo.name` sent to the server.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// `clientInfo.version` sent to the server.
    #[serde(default = "default_client_version")]
    pub client_version: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            protocol_version: default_protocol_version(),
            client_name: default_client_name(),
            client_version: default_client_version(),
        }
    }
}

/// Checks applied to a step's response.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExpectConfig {
    /// Substrings that must appear in the serialized response.
    #[serde(default)]
    pub contains: Vec<String>,
    /// Substrings that must not appear in the serialized response.
    #[serde(default)]
    pub not_contains: Vec<String>,
    /// Regex the serialized response must match.
    #[serde(default)]
    pub matches: Option<String>,
    /// Expect a JSON-RPC error response instead of a result.
    #[serde(default)]
    pub error: bool,
    /// Required error code; implies `error`.
    #[serde(default)]
    pub error_code: Option<i64>,
    /// JSON pointers (RFC 6901) that must resolve inside `result`.
    #[serde(default)]
    pub result_pointers: Vec<String>,
}

impl ExpectConfig {
    /// Whether any check beyond the default "no error" is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contains.is_empty()
            && self.not_contains.is_empty()
            && self.matches.is_none()
            && !self.error
            && self.error_code.is_none()
            && self.result_pointers.is_empty()
    }
}

/// One request or notification sent to the server.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StepConfig {
    /// Label shown in the report; defaults to the method.
    #[serde(default)]
    pub name: Option<String>,
    /// JSON-RPC method.
    pub method: String,
    /// JSON-RPC params; omitted from the message when unset.
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    /// Send as a notification (no id, no response awaited).
    #[serde(default)]
    pub notification: bool,
    /// Per-step override of `timeouts.request_ms`.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Response checks.
    #[serde(default)]
    pub expect: ExpectConfig,
}

impl StepConfig {
    /// Plain request step with empty params.
    #[must_use]
    pub fn request(method: impl Into<String>) -> Self {
        Self {
            name: None,
            method: method.into(),
            params: Some(serde_json::Value::Object(serde_json::Map::new())),
            notification: false,
            timeout_ms: None,
            expect: ExpectConfig::default(),
        }
    }

    /// Label used in reports.
    #[must_use]
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.method)
    }
}

/// Complete description of one smoke run.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SmokeConfig {
    /// Server launch settings.
    pub server: ServerConfig,
    /// Startup detection.
    #[serde(default)]
    pub startup: StartupConfig,
    /// Response and shutdown timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// MCP handshake settings.
    #[serde(default)]
    pub handshake: HandshakeConfig,
    /// Ordered steps; a single `tools/list` request when empty.
    ///
    /// Request ids are shared with the handshake: with it enabled,
    /// `initialize` is id 1 and the first step id 2. Disable the handshake
    /// (`--no-handshake`) to send exactly one `tools/list` request with id 1.
    #[serde(default)]
    pub steps: Vec<StepConfig>,
    /// Optional JSONL transcript destination.
    #[serde(default)]
    pub transcript: Option<PathBuf>,
    /// `steps` holds only the implicit `tools/list` default.
    #[serde(skip)]
    implicit_steps: bool,
}

fn default_true() -> bool {
    true
}

fn default_startup_delay_ms() -> u64 {
    2000
}

fn default_startup_timeout_ms() -> u64 {
    10_000
}

fn default_request_ms() -> u64 {
    5000
}

fn default_shutdown_ms() -> u64 {
    5000
}

fn default_protocol_version() -> String {
    DEFAULT_PROTOCOL_VERSION.into()
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").into()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

impl SmokeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.apply_default_steps();
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from a command line and a list of methods.
    ///
    /// `command[0]` is the program, the rest are its arguments. With no
    /// methods a single `tools/list` request is sent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `command` is empty or validation fails.
    pub fn for_command(command: &[String], methods: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| AppError::Config("no server command given".into()))?;

        let mut config = Self {
            server: ServerConfig {
                command: program.clone(),
                args: args.to_vec(),
                cwd: None,
                env: BTreeMap::new(),
                inherit_env: true,
            },
            startup: StartupConfig::default(),
            timeouts: TimeoutConfig::default(),
            handshake: HandshakeConfig::default(),
            steps: methods.iter().map(StepConfig::request).collect(),
            transcript: None,
            implicit_steps: false,
        };
        config.apply_default_steps();
        config.validate()?;
        Ok(config)
    }

    /// Replace the server command line, keeping every other setting.
    pub fn override_command(&mut self, command: &[String]) {
        if let Some((program, args)) = command.split_first() {
            self.server.command.clone_from(program);
            self.server.args = args.to_vec();
        }
    }

    /// Append plain request steps, replacing the implicit default step.
    pub fn append_methods(&mut self, methods: &[String]) {
        if methods.is_empty() {
            return;
        }
        if self.implicit_steps {
            self.steps.clear();
            self.implicit_steps = false;
        }
        self.steps.extend(methods.iter().map(StepConfig::request));
    }

    fn apply_default_steps(&mut self) {
        if self.steps.is_empty() {
            self.steps.push(StepConfig::request(DEFAULT_METHOD));
            self.implicit_steps = true;
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.server.command.trim().is_empty() {
            return Err(AppError::Config("server.command must not be empty".into()));
        }
        if self.timeouts.request_ms == 0 {
            return Err(AppError::Config("timeouts.request_ms must be > 0".into()));
        }
        if self.timeouts.shutdown_ms == 0 {
            return Err(AppError::Config("timeouts.shutdown_ms must be > 0".into()));
        }
        if let Some(pattern) = &self.startup.ready_pattern {
            compile_pattern("startup.ready_pattern", pattern)?;
            if self.startup.timeout_ms == 0 {
                return Err(AppError::Config(
                    "startup.timeout_ms must be > 0 when ready_pattern is set".into(),
                ));
            }
        }
        if self.handshake.enabled && self.handshake.protocol_version.trim().is_empty() {
            return Err(AppError::Config(
                "handshake.protocol_version must not be empty".into(),
            ));
        }

        for (index, step) in self.steps.iter().enumerate() {
            let position = index + 1;
            if step.method.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "step {position}: method must not be empty"
                )));
            }
            if step.timeout_ms == Some(0) {
                return Err(AppError::Config(format!(
                    "step {position} ({}): timeout_ms must be > 0",
                    step.label()
                )));
            }
            if step.notification && !step.expect.is_empty() {
                return Err(AppError::Config(format!(
                    "step {position} ({}): notifications receive no response, remove `expect`",
                    step.label()
                )));
            }
            if let Some(pattern) = &step.expect.matches {
                compile_pattern(&format!("step {position} expect.matches"), pattern)?;
            }
            for pointer in &step.expect.result_pointers {
                if !pointer.is_empty() && !pointer.starts_with('/') {
                    return Err(AppError::Config(format!(
                        "step {position}: result pointer `{pointer}` must start with '/'"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Time to wait for the given step's response.
    #[must_use]
    pub fn request_timeout(&self, step: &StepConfig) -> Duration {
        Duration::from_millis(step.timeout_ms.unwrap_or(self.timeouts.request_ms))
    }

    /// Grace period for each shutdown phase.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.timeouts.shutdown_ms)
    }
}

/// Compile a user-supplied regex, naming the offending field on failure.
///
/// # Errors
///
/// Returns `AppError::Config` if `pattern` is not a valid regex.
pub fn compile_pattern(field: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|err| AppError::Config(format!("{field}: invalid regex: {err}")))
}

//! Run report: per-step outcomes plus what the server did around them.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::StepConfig;
use crate::handshake::InitializeOutcome;
use crate::jsonrpc::RequestId;
use crate::mode::OutputFormat;
use crate::session::{Exchange, ExitReport, SessionSummary, ShutdownMethod};
use crate::{AppError, Result};

/// Outcome of a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    /// Response received and every expectation held.
    Passed,
    /// Response received but some expectations failed.
    Failed {
        /// One entry per failed check.
        reasons: Vec<String>,
    },
    /// No usable response (timeout, stream closed, interrupted).
    Errored {
        /// Error description.
        error: String,
    },
    /// Not attempted.
    Skipped {
        /// Why the step was not run.
        reason: String,
    },
    /// Notification written; nothing to check.
    Sent,
}

impl StepStatus {
    /// Whether this outcome counts as success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Passed | Self::Sent)
    }
}

/// Report entry for one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    /// Step label.
    pub name: String,
    /// JSON-RPC method.
    pub method: String,
    /// Request id, when a request was sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Outcome.
    #[serde(flatten)]
    pub status: StepStatus,
    /// Round-trip time in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    /// Notifications received while waiting for the response.
    pub notifications: usize,
    /// Raw response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl StepReport {
    fn base(step: &StepConfig, status: StepStatus) -> Self {
        Self {
            name: step.label().to_owned(),
            method: step.method.clone(),
            id: None,
            status,
            elapsed_ms: None,
            notifications: 0,
            response: None,
        }
    }

    /// Report for a completed exchange, given the failed checks.
    #[must_use]
    pub fn from_exchange(step: &StepConfig, exchange: &Exchange, failures: Vec<String>) -> Self {
        let status = if failures.is_empty() {
            StepStatus::Passed
        } else {
            StepStatus::Failed { reasons: failures }
        };
        Self {
            id: Some(exchange.id.clone()),
            elapsed_ms: Some(millis(exchange.elapsed)),
            notifications: exchange.notifications.len(),
            response: Some(exchange.response.raw.clone()),
            ..Self::base(step, status)
        }
    }

    /// Report for a step whose request failed outright.
    #[must_use]
    pub fn errored(step: &StepConfig, error: &AppError) -> Self {
        Self::base(
            step,
            StepStatus::Errored {
                error: error.to_string(),
            },
        )
    }

    /// Report for a step that was not attempted.
    #[must_use]
    pub fn skipped(step: &StepConfig, reason: &str) -> Self {
        Self::base(
            step,
            StepStatus::Skipped {
                reason: reason.to_owned(),
            },
        )
    }

    /// Report for a notification step.
    #[must_use]
    pub fn sent(step: &StepConfig) -> Self {
        Self::base(step, StepStatus::Sent)
    }
}

/// Complete result of one smoke run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Server command line.
    pub command: String,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Total run time in milliseconds.
    pub duration_ms: u64,
    /// Handshake result, when performed and successful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake: Option<InitializeOutcome>,
    /// Fatal failure that stopped the run (startup, handshake, interrupt).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Step outcomes in order.
    pub steps: Vec<StepReport>,
    /// How the server process ended, when it was started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitReport>,
    /// Tail of the server's stderr.
    pub stderr_tail: Vec<String>,
    /// Stdout lines that were not valid JSON-RPC.
    pub protocol_violations: Vec<String>,
    /// Messages that matched no outstanding request.
    pub stray_messages: Vec<Value>,
}

impl RunReport {
    /// Empty report for a run starting now.
    #[must_use]
    pub fn new(command: String) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            command,
            started_at: Utc::now(),
            duration_ms: 0,
            handshake: None,
            failure: None,
            steps: Vec::new(),
            exit: None,
            stderr_tail: Vec::new(),
            protocol_violations: Vec::new(),
            stray_messages: Vec::new(),
        }
    }

    /// Record a fatal failure; the first one wins.
    pub fn fail(&mut self, error: &AppError) {
        if self.failure.is_none() {
            self.failure = Some(error.to_string());
        }
    }

    /// Merge what the session observed.
    pub fn absorb_summary(&mut self, summary: SessionSummary) {
        self.exit = Some(summary.exit);
        self.stderr_tail = summary.stderr_tail;
        self.protocol_violations = summary.violations;
        self.stray_messages = summary.strays;
    }

    /// Record the total run time.
    pub fn set_duration(&mut self, elapsed: Duration) {
        self.duration_ms = millis(elapsed);
    }

    /// Number of successful steps.
    #[must_use]
    pub fn passed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.status.is_success()).count()
    }

    /// The run passed: no fatal failure and every step succeeded.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failure.is_none() && self.steps.iter().all(|s| s.status.is_success())
    }
}

/// Render `report` in the requested format.
///
/// # Errors
///
/// Returns `AppError::Io` if JSON serialization fails.
pub fn render(report: &RunReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(report)),
        OutputFormat::Json => serde_json::to_string_pretty(report)
            .map_err(|e| AppError::Io(format!("failed to serialize report: {e}"))),
    }
}

/// Human-readable rendering.
#[must_use]
pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "mcp-smoke run {}: {}", report.run_id, report.command);

    if let Some(hs) = &report.handshake {
        let _ = writeln!(
            out,
            "handshake: ok {} {}, protocol {}, capabilities [{}] ({} ms)",
            hs.server_name.as_deref().unwrap_or("<unnamed>"),
            hs.server_version.as_deref().unwrap_or("?"),
            hs.protocol_version.as_deref().unwrap_or("?"),
            hs.capability_names().join(", "),
            hs.elapsed_ms
        );
    }

    if let Some(failure) = &report.failure {
        let _ = writeln!(out, "failure: {failure}");
    }

    for step in &report.steps {
        let elapsed = step
            .elapsed_ms
            .map(|ms| format!(" ({ms} ms)"))
            .unwrap_or_default();
        match &step.status {
            StepStatus::Passed => {
                let _ = writeln!(out, "  [ok]   {}{elapsed}", step.name);
            }
            StepStatus::Sent => {
                let _ = writeln!(out, "  [sent] {}", step.name);
            }
            StepStatus::Failed { reasons } => {
                let _ = writeln!(out, "  [FAIL] {}{elapsed}", step.name);
                for reason in reasons {
                    let _ = writeln!(out, "         - {reason}");
                }
            }
            StepStatus::Errored { error } => {
                let _ = writeln!(out, "  [ERR]  {}: {error}", step.name);
            }
            StepStatus::Skipped { reason } => {
                let _ = writeln!(out, "  [skip] {}: {reason}", step.name);
            }
        }
    }

    if let Some(exit) = &report.exit {
        let phase = match exit.method {
            ShutdownMethod::StdinClosed => "after stdin closed",
            ShutdownMethod::Terminated => "after terminate",
            ShutdownMethod::Killed => "killed",
        };
        let _ = writeln!(out, "server: {} {phase}", exit.description);
    }

    if !report.protocol_violations.is_empty() {
        let _ = writeln!(
            out,
            "protocol violations: {}",
            report.protocol_violations.len()
        );
        for violation in &report.protocol_violations {
            let _ = writeln!(out, "  - {violation}");
        }
    }

    if !report.stray_messages.is_empty() {
        let _ = writeln!(out, "stray messages: {}", report.stray_messages.len());
    }

    if !report.stderr_tail.is_empty() {
        let _ = writeln!(out, "stderr (last {} lines):", report.stderr_tail.len());
        for line in &report.stderr_tail {
            let _ = writeln!(out, "  | {line}");
        }
    }

    let verdict = if report.passed() { "PASS" } else { "FAIL" };
    let _ = writeln!(
        out,
        "result: {verdict} ({}/{} steps passed, {} ms)",
        report.passed_steps(),
        report.steps.len(),
        report.duration_ms
    );

    out
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

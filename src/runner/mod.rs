//! Smoke-run orchestration.
//!
//! Drives one [`ServerSession`] through startup, the optional handshake, the
//! configured steps, and shutdown, producing a [`RunReport`]. Failures are
//! recorded in the report rather than returned: a server that does not start
//! is a test result, not a tool error.

pub mod expect;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::{SmokeConfig, StepConfig};
use crate::handshake;
use crate::report::{RunReport, StepReport};
use crate::session::ServerSession;
use crate::stdio::spawner::SpawnConfig;
use crate::transcript::TranscriptSink;
use crate::{AppError, Result};

/// Window for trailing output after the last step, before shutdown begins.
const SETTLE_WINDOW: Duration = Duration::from_millis(100);

/// Execute a complete smoke run.
///
/// `cancel` interrupts startup, the handshake, or the current step; the
/// server is still shut down and the report marks the run as interrupted.
pub async fn run(
    config: &SmokeConfig,
    transcript: Option<Arc<dyn TranscriptSink>>,
    cancel: CancellationToken,
) -> RunReport {
    let command = config.server.display_command();
    let span = info_span!("smoke_run", command = %command);

    async move {
        let clock = Instant::now();
        let mut report = RunReport::new(command);
        execute(config, transcript, &cancel, &mut report).await;
        report.set_duration(clock.elapsed());
        info!(
            passed = report.passed(),
            steps = report.steps.len(),
            duration_ms = report.duration_ms,
            "smoke run finished"
        );
        report
    }
    .instrument(span)
    .await
}

async fn execute(
    config: &SmokeConfig,
    transcript: Option<Arc<dyn TranscriptSink>>,
    cancel: &CancellationToken,
    report: &mut RunReport,
) {
    let spawn = match SpawnConfig::from_config(config) {
        Ok(spawn) => spawn,
        Err(err) => {
            abort(report, &config.steps, &err, "invalid configuration");
            return;
        }
    };

    let started = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AppError::Interrupted("signal received during startup".into())),
        result = ServerSession::start(&spawn, transcript) => result,
    };

    let mut session = match started {
        Ok(session) => session,
        Err(err) => {
            warn!(%err, "server failed to start");
            abort(report, &config.steps, &err, "server failed to start");
            return;
        }
    };

    let request_timeout = Duration::from_millis(config.timeouts.request_ms);

    if config.handshake.enabled {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AppError::Interrupted("signal received during handshake".into())),
            result = handshake::initialize(&mut session, &config.handshake, request_timeout) => result,
        };

        match result {
            Ok(outcome) => report.handshake = Some(outcome),
            Err(err) => {
                warn!(%err, "handshake failed");
                abort(report, &config.steps, &err, "handshake failed");
                let summary = session.shutdown(config.shutdown_grace()).await;
                report.absorb_summary(summary);
                return;
            }
        }
    }

    let mut halted: Option<&str> = None;

    for step in &config.steps {
        if let Some(reason) = halted {
            report.steps.push(StepReport::skipped(step, reason));
            continue;
        }

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AppError::Interrupted("signal received".into())),
            result = execute_step(&mut session, config, step) => result,
        };

        match outcome {
            Ok(step_report) => {
                info!(step = %step_report.name, status = ?step_report.status, "step finished");
                report.steps.push(step_report);
            }
            Err(err) => {
                warn!(step = step.label(), %err, "step errored");
                report.steps.push(StepReport::errored(step, &err));
                if matches!(err, AppError::Interrupted(_)) {
                    report.fail(&err);
                    halted = Some("run interrupted");
                } else if session.is_stdout_closed() {
                    halted = Some("server stdout closed");
                }
            }
        }
    }

    if halted.is_none() {
        session.drain(SETTLE_WINDOW).await;
    }

    let summary = session.shutdown(config.shutdown_grace()).await;
    report.absorb_summary(summary);
}

/// Send one step and evaluate its expectations.
async fn execute_step(
    session: &mut ServerSession,
    config: &SmokeConfig,
    step: &StepConfig,
) -> Result<StepReport> {
    if step.notification {
        session.notify(&step.method, step.params.clone()).await?;
        return Ok(StepReport::sent(step));
    }

    let exchange = session
        .request(&step.method, step.params.clone(), config.request_timeout(step))
        .await?;
    let failures = expect::evaluate(&step.expect, &exchange.response)?;
    Ok(StepReport::from_exchange(step, &exchange, failures))
}

/// Record a fatal failure and mark every step as skipped.
fn abort(report: &mut RunReport, steps: &[StepConfig], err: &AppError, reason: &str) {
    report.fail(err);
    report
        .steps
        .extend(steps.iter().map(|step| StepReport::skipped(step, reason)));
}

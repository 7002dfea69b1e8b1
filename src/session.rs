//! A live session with the server under test.
//!
//! [`ServerSession`] owns the child process and the three stdio tasks. It
//! sends requests with sequential integer ids, waits for the matching
//! response, answers server-originated requests, and keeps a bounded tail of
//! the server's stderr. Everything exchanged is mirrored to the optional
//! transcript sink.
//!
//! Only one request is outstanding at a time; the session is driven from a
//! single task and needs no pending-request map.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::jsonrpc::{
    self, InboundMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
    METHOD_NOT_FOUND,
};
use crate::stdio::spawner::{describe_exit, spawn_server, SpawnConfig};
use crate::stdio::{reader, stderr, writer, ServerEvent};
use crate::transcript::{Direction, TranscriptEntry, TranscriptSink};
use crate::{AppError, Result};

/// Number of stderr lines retained for the report.
pub const STDERR_TAIL_LINES: usize = 50;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const OUTBOUND_CHANNEL_CAPACITY: usize = 32;

/// How long shutdown waits for the stdio tasks after the process exited.
const TASK_JOIN_WINDOW: Duration = Duration::from_secs(1);

/// One completed request/response pair.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Id the request was sent with.
    pub id: RequestId,
    /// Request exactly as written to stdin.
    pub request: Value,
    /// The server's answer.
    pub response: JsonRpcResponse,
    /// Notifications that arrived while waiting.
    pub notifications: Vec<JsonRpcNotification>,
    /// Time from send to response.
    pub elapsed: Duration,
}

/// Which shutdown phase ended the server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMethod {
    /// The server exited after its stdin was closed.
    StdinClosed,
    /// The server exited after SIGTERM (or the platform equivalent).
    Terminated,
    /// The server had to be killed.
    Killed,
}

/// How the server process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitReport {
    /// Exit code; `None` when ended by a signal or unknown.
    pub code: Option<i32>,
    /// Human-readable status.
    pub description: String,
    /// Phase that ended the process.
    pub method: ShutdownMethod,
}

/// Everything the session observed, returned by [`ServerSession::shutdown`].
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Process exit.
    pub exit: ExitReport,
    /// Last [`STDERR_TAIL_LINES`] stderr lines.
    pub stderr_tail: Vec<String>,
    /// Stdout lines that were not valid JSON-RPC.
    pub violations: Vec<String>,
    /// Messages that matched no outstanding request.
    pub strays: Vec<Value>,
}

/// Live connection to the server under test.
pub struct ServerSession {
    child: Child,
    pid: Option<u32>,
    outbound: Option<mpsc::Sender<Value>>,
    events: mpsc::Receiver<ServerEvent>,
    next_id: i64,
    cancel: CancellationToken,
    reader_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    writer_task: JoinHandle<Result<()>>,
    stdout_closed: Option<String>,
    stderr_tail: VecDeque<String>,
    violations: Vec<String>,
    strays: Vec<Value>,
    transcript: Option<Arc<dyn TranscriptSink>>,
}

impl ServerSession {
    /// Spawn the server, wait for readiness, and start the stdio tasks.
    ///
    /// # Errors
    ///
    /// Propagates [`spawn_server`] failures (`AppError::Spawn`,
    /// `AppError::Timeout`).
    pub async fn start(
        config: &SpawnConfig,
        transcript: Option<Arc<dyn TranscriptSink>>,
    ) -> Result<Self> {
        let command = std::iter::once(config.command.as_str())
            .chain(config.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        record_to(
            transcript.as_deref(),
            TranscriptEntry::new(Direction::Lifecycle).with_text(format!("spawn {command}")),
        );

        let conn = match spawn_server(config).await {
            Ok(conn) => conn,
            Err(err) => {
                record_to(
                    transcript.as_deref(),
                    TranscriptEntry::new(Direction::Lifecycle).with_text(err.to_string()),
                );
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        let (event_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

        let reader_task = tokio::spawn(reader::run_reader(
            conn.stdout,
            event_tx.clone(),
            cancel.clone(),
        ));
        let stderr_task = tokio::spawn(stderr::run_stderr(conn.stderr, event_tx, cancel.clone()));
        let writer_task = tokio::spawn(writer::run_writer(conn.stdin, outbound_rx, cancel.clone()));

        let mut session = Self {
            child: conn.child,
            pid: conn.pid,
            outbound: Some(outbound_tx),
            events,
            next_id: 1,
            cancel,
            reader_task,
            stderr_task,
            writer_task,
            stdout_closed: None,
            stderr_tail: VecDeque::with_capacity(STDERR_TAIL_LINES),
            violations: Vec::new(),
            strays: Vec::new(),
            transcript,
        };

        for line in conn.startup_stderr {
            session.push_stderr(line);
        }
        session.record(
            TranscriptEntry::new(Direction::Lifecycle)
                .with_text(format!("ready (pid {})", session.pid.unwrap_or(0))),
        );

        Ok(session)
    }

    /// OS process id of the server.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the server's stdout has closed; no further responses can arrive.
    #[must_use]
    pub fn is_stdout_closed(&self) -> bool {
        self.stdout_closed.is_some()
    }

    /// Send a request and wait up to `timeout` for its response.
    ///
    /// Events that arrive meanwhile are handled in place: notifications are
    /// attached to the returned [`Exchange`], server requests are answered,
    /// unmatched responses are kept as strays, and non-JSON-RPC stdout lines
    /// are kept as violations. An error response carrying `"id": null`
    /// (the server could not parse our request) is taken as the answer.
    ///
    /// # Errors
    ///
    /// - `AppError::Timeout`: no response within `timeout`.
    /// - `AppError::Protocol`: stdout closed (server exited) before the
    ///   response arrived, or stdin is no longer writable.
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Exchange> {
        self.ensure_stdout_open(method)?;

        let id = RequestId::Number(self.next_id);
        self.next_id += 1;

        let request = jsonrpc::request(&id, method, params);
        let started = Instant::now();
        self.send(request.clone()).await?;
        debug!(%id, method, "request sent");

        let deadline = tokio::time::Instant::now() + timeout;
        let mut notifications = Vec::new();

        loop {
            let event = match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Err(_elapsed) => {
                    return Err(AppError::Timeout(format!(
                        "no response to `{method}` (id {id}) within {timeout:?}"
                    )))
                }
                Ok(None) => {
                    return Err(AppError::Protocol(format!(
                        "server streams closed before responding to `{method}` (id {id})"
                    )))
                }
                Ok(Some(event)) => event,
            };

            match event {
                ServerEvent::Message(InboundMessage::Response(response))
                    if response.id.as_ref() == Some(&id)
                        || (response.id.is_none() && response.is_error()) =>
                {
                    self.record(
                        TranscriptEntry::new(Direction::Inbound).with_message(response.raw.clone()),
                    );
                    let elapsed = started.elapsed();
                    debug!(%id, method, elapsed_ms = elapsed.as_millis(), "response received");
                    return Ok(Exchange {
                        id,
                        request,
                        response,
                        notifications,
                        elapsed,
                    });
                }
                ServerEvent::Message(InboundMessage::Notification(notification)) => {
                    self.record(
                        TranscriptEntry::new(Direction::Inbound).with_message(
                            jsonrpc::notification(
                                &notification.method,
                                notification.params.clone(),
                            ),
                        ),
                    );
                    debug!(method = %notification.method, "notification received");
                    notifications.push(notification);
                }
                other => self.absorb(other).await,
            }

            self.ensure_stdout_open(method)?;
        }
    }

    /// Send a notification; no response is expected.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if stdin is no longer writable.
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        let message = jsonrpc::notification(method, params);
        self.send(message.clone()).await?;
        debug!(method, "notification sent");
        Ok(message)
    }

    /// Handle whatever the server emits during `window`.
    pub async fn drain(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.events.recv()).await {
            self.absorb(event).await;
        }
    }

    /// Stop the server and collect what the session observed.
    ///
    /// Escalates in three phases, each bounded by `grace`: close stdin and
    /// wait; send SIGTERM (unix) or start a kill (elsewhere) and wait; kill.
    pub async fn shutdown(mut self, grace: Duration) -> SessionSummary {
        // Dropping the sender lets the writer flush and close stdin.
        self.outbound.take();

        let exit = if let Some(code) = wait_exit(&mut self.child, grace).await {
            exit_report(code, ShutdownMethod::StdinClosed)
        } else {
            info!(pid = self.pid, "server still running after stdin closed, terminating");
            self.terminate();
            if let Some(code) = wait_exit(&mut self.child, grace).await {
                exit_report(code, ShutdownMethod::Terminated)
            } else {
                warn!(pid = self.pid, "server ignored terminate, killing");
                if let Err(err) = self.child.kill().await {
                    warn!(%err, "failed to kill server process");
                }
                let code = self.child.wait().await.ok().and_then(|s| s.code());
                exit_report(code, ShutdownMethod::Killed)
            }
        };

        info!(
            pid = self.pid,
            code = exit.code,
            method = ?exit.method,
            "server process exited"
        );

        // Let the readers reach EOF so late output is not lost.
        let _ = tokio::time::timeout(TASK_JOIN_WINDOW, &mut self.reader_task).await;
        let _ = tokio::time::timeout(TASK_JOIN_WINDOW, &mut self.stderr_task).await;
        match tokio::time::timeout(TASK_JOIN_WINDOW, &mut self.writer_task).await {
            Ok(Ok(Err(err))) => debug!(%err, "stdin writer ended with error"),
            Ok(Err(err)) => warn!(%err, "stdin writer task panicked"),
            _ => {}
        }
        self.cancel.cancel();

        while let Ok(event) = self.events.try_recv() {
            self.absorb(event).await;
        }

        self.record(
            TranscriptEntry::new(Direction::Lifecycle).with_text(format!(
                "{} ({:?})",
                exit.description, exit.method
            )),
        );

        SessionSummary {
            exit,
            stderr_tail: std::mem::take(&mut self.stderr_tail).into(),
            violations: std::mem::take(&mut self.violations),
            strays: std::mem::take(&mut self.strays),
        }
    }

    // ── Private helpers ──────────────────────────────────────────────────────

    fn ensure_stdout_open(&self, method: &str) -> Result<()> {
        match &self.stdout_closed {
            Some(reason) => Err(AppError::Protocol(format!(
                "server stdout closed ({reason}) while handling `{method}`"
            ))),
            None => Ok(()),
        }
    }

    async fn send(&mut self, message: Value) -> Result<()> {
        let tx = self
            .outbound
            .as_ref()
            .ok_or_else(|| AppError::Protocol("server stdin already closed".into()))?;
        tx.send(message.clone())
            .await
            .map_err(|_| AppError::Protocol("server stdin closed: writer stopped".into()))?;
        self.record(TranscriptEntry::new(Direction::Outbound).with_message(message));
        Ok(())
    }

    /// Handle an event that is not the awaited response.
    async fn absorb(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Message(InboundMessage::Response(response)) => {
                warn!(id = ?response.id, "response matches no outstanding request");
                self.record(
                    TranscriptEntry::new(Direction::Inbound).with_message(response.raw.clone()),
                );
                self.strays.push(response.raw);
            }
            ServerEvent::Message(InboundMessage::Notification(notification)) => {
                let raw = jsonrpc::notification(&notification.method, notification.params);
                self.record(TranscriptEntry::new(Direction::Inbound).with_message(raw.clone()));
                self.strays.push(raw);
            }
            ServerEvent::Message(InboundMessage::Request(request)) => {
                self.record(TranscriptEntry::new(Direction::Inbound).with_message(
                    jsonrpc::request(&request.id, &request.method, request.params.clone()),
                ));
                self.answer(request).await;
            }
            ServerEvent::Unparsed { line, error } => {
                self.record(
                    TranscriptEntry::new(Direction::Inbound)
                        .with_text(format!("{error}: {line}")),
                );
                self.violations.push(if line.is_empty() {
                    error
                } else {
                    format!("{error}: {line}")
                });
            }
            ServerEvent::Stderr(line) => self.push_stderr(line),
            ServerEvent::StdoutClosed { reason } => {
                debug!(reason = %reason, "server stdout closed");
                self.record(
                    TranscriptEntry::new(Direction::Lifecycle)
                        .with_text(format!("stdout closed: {reason}")),
                );
                self.stdout_closed = Some(reason);
            }
        }
    }

    /// Reply to a server-originated request: `ping` succeeds, anything else
    /// is reported as unsupported.
    async fn answer(&mut self, request: JsonRpcRequest) {
        if self.outbound.is_none() {
            debug!(method = %request.method, "server request after stdin closed, not answering");
            return;
        }

        let reply = if request.method == "ping" {
            jsonrpc::result_response(&request.id, json!({}))
        } else {
            jsonrpc::error_response(
                &request.id,
                METHOD_NOT_FOUND,
                &format!("method `{}` is not supported by this client", request.method),
            )
        };

        if let Err(err) = self.send(reply).await {
            warn!(%err, method = %request.method, "failed to answer server request");
        }
    }

    fn push_stderr(&mut self, line: String) {
        self.record(TranscriptEntry::new(Direction::Stderr).with_text(line.clone()));
        if self.stderr_tail.len() == STDERR_TAIL_LINES {
            self.stderr_tail.pop_front();
        }
        self.stderr_tail.push_back(line);
    }

    fn record(&self, entry: TranscriptEntry) {
        record_to(self.transcript.as_deref(), entry);
    }

    #[cfg(unix)]
    fn terminate(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match self.pid.and_then(|pid| i32::try_from(pid).ok()) {
            Some(raw) => {
                if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                    warn!(%err, pid = raw, "failed to send SIGTERM");
                }
            }
            None => {
                if let Err(err) = self.child.start_kill() {
                    warn!(%err, "failed to start kill");
                }
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) {
        if let Err(err) = self.child.start_kill() {
            warn!(%err, "failed to start kill");
        }
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        // The child itself is killed by `kill_on_drop`.
        self.cancel.cancel();
    }
}

fn record_to(sink: Option<&dyn TranscriptSink>, entry: TranscriptEntry) {
    if let Some(sink) = sink {
        if let Err(err) = sink.record(entry) {
            warn!(%err, "failed to write transcript entry");
        }
    }
}

/// Wait up to `grace` for the child to exit. `Some(code)` on exit.
async fn wait_exit(child: &mut Child, grace: Duration) -> Option<Option<i32>> {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(status.code()),
        Ok(Err(err)) => {
            warn!(%err, "error waiting for server process");
            Some(None)
        }
        Err(_elapsed) => None,
    }
}

fn exit_report(code: Option<i32>, method: ShutdownMethod) -> ExitReport {
    ExitReport {
        code,
        description: describe_exit(code),
        method,
    }
}

#![forbid(unsafe_code)]

//! `mcp-smoke`: smoke-test an MCP server over stdio.
//!
//! Loads a scenario (TOML file or command-line quick form), runs it against
//! the server, prints the report on stdout, and exits 0 on pass, 1 on fail,
//! 2 on usage or configuration errors. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use mcp_smoke::config::SmokeConfig;
use mcp_smoke::mode::OutputFormat;
use mcp_smoke::transcript::{JsonlTranscriptWriter, TranscriptSink};
use mcp_smoke::{report, runner, AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "mcp-smoke",
    about = "Smoke-test an MCP server over stdio",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML scenario file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Request to send (repeatable); appended to the scenario's steps.
    #[arg(long = "method", value_name = "METHOD")]
    methods: Vec<String>,

    /// Skip the MCP initialize handshake.
    #[arg(long)]
    no_handshake: bool,

    /// Override the per-request timeout in milliseconds.
    #[arg(long, value_name = "MS")]
    request_timeout_ms: Option<u64>,

    /// Write a JSONL transcript of the session to this file.
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Report output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Server command and arguments (after `--`); overrides the scenario's.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::from(2);
    }

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            eprintln!("mcp-smoke: {err}");
            return ExitCode::from(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("mcp-smoke: failed to build tokio runtime: {err}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(run(config, args.output)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(%err, "smoke run failed");
            eprintln!("mcp-smoke: {err}");
            ExitCode::from(2)
        }
    }
}

/// Merge the scenario file (if any) with command-line overrides.
fn build_config(args: &Cli) -> Result<SmokeConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = SmokeConfig::load_from_path(path)?;
            config.override_command(&args.command);
            config.append_methods(&args.methods);
            config
        }
        None => SmokeConfig::for_command(&args.command, &args.methods)?,
    };

    if args.no_handshake {
        config.handshake.enabled = false;
    }
    if let Some(ms) = args.request_timeout_ms {
        config.timeouts.request_ms = ms;
    }
    if let Some(path) = &args.transcript {
        config.transcript = Some(path.clone());
    }

    config.validate()?;
    Ok(config)
}

async fn run(config: SmokeConfig, output: OutputFormat) -> Result<bool> {
    let transcript: Option<Arc<dyn TranscriptSink>> = match &config.transcript {
        Some(path) => {
            let writer = JsonlTranscriptWriter::new(path)?;
            info!(path = %writer.path().display(), "writing transcript");
            let sink: Arc<dyn TranscriptSink> = Arc::new(writer);
            Some(sink)
        }
        None => None,
    };

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    let signal_handle = tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    let report = runner::run(&config, transcript, ct).await;
    signal_handle.abort();

    let rendered = report::render(&report, output)?;
    print!("{rendered}");
    if output == OutputFormat::Json {
        println!();
    }

    Ok(report.passed())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

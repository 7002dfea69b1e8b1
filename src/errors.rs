//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all failure modes of a smoke run.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The server process could not be started or died during startup.
    Spawn(String),
    /// JSON-RPC framing or protocol failure on the server's stdio.
    Protocol(String),
    /// A bounded wait elapsed (startup, request, or shutdown).
    Timeout(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// The run was cancelled by a shutdown signal.
    Interrupted(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Interrupted(msg) => write!(f, "interrupted: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

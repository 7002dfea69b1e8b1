#![forbid(unsafe_code)]

//! `mcp-smoke`: smoke-test MCP servers over their stdio transport.
//!
//! Spawns the server under test, optionally performs the MCP `initialize`
//! handshake, sends a scripted sequence of JSON-RPC requests, checks the
//! responses against expectations, and shuts the process down within a
//! bounded grace period.

pub mod config;
pub mod errors;
pub mod handshake;
pub mod jsonrpc;
pub mod mode;
pub mod report;
pub mod runner;
pub mod session;
pub mod stdio;
pub mod transcript;

pub use config::SmokeConfig;
pub use errors::{AppError, Result};

//! MCP initialization handshake.
//!
//! Before any other request an MCP client performs:
//!
//! 1. **`initialize`**: a request carrying `protocolVersion`, the client's
//!    `capabilities` (none here), and `clientInfo`.
//! 2. **`notifications/initialized`**: sent once the server's result has
//!    been received.
//!
//! The server's result is summarized as an [`InitializeOutcome`] for the
//! report.

use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::HandshakeConfig;
use crate::session::ServerSession;
use crate::{AppError, Result};

/// Method of the initialization request.
pub const INITIALIZE: &str = "initialize";

/// Notification sent after a successful `initialize`.
pub const INITIALIZED: &str = "notifications/initialized";

/// What the server reported during initialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitializeOutcome {
    /// Protocol revision the server chose.
    pub protocol_version: Option<String>,
    /// `serverInfo.name`.
    pub server_name: Option<String>,
    /// `serverInfo.version`.
    pub server_version: Option<String>,
    /// Server capabilities object (empty object when absent).
    pub capabilities: Value,
    /// Optional usage instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Round-trip time of the `initialize` request in milliseconds.
    pub elapsed_ms: u64,
}

impl InitializeOutcome {
    /// Build from an `initialize` result object.
    #[must_use]
    pub fn from_result(result: &Value, elapsed: Duration) -> Self {
        let text = |pointer: &str| {
            result
                .pointer(pointer)
                .and_then(Value::as_str)
                .map(str::to_owned)
        };

        Self {
            protocol_version: text("/protocolVersion"),
            server_name: text("/serverInfo/name"),
            server_version: text("/serverInfo/version"),
            capabilities: result
                .get("capabilities")
                .cloned()
                .unwrap_or_else(|| json!({})),
            instructions: text("/instructions"),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Capability names advertised by the server, sorted.
    #[must_use]
    pub fn capability_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .capabilities
            .as_object()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

/// Build the `initialize` params for `config`.
#[must_use]
pub fn initialize_params(config: &HandshakeConfig) -> Value {
    json!({
        "protocolVersion": config.protocol_version,
        "capabilities": {},
        "clientInfo": {
            "name": config.client_name,
            "version": config.client_version
        }
    })
}

/// Run the `initialize` / `notifications/initialized` exchange.
///
/// A protocol version different from the one offered is logged, not
/// rejected: the server is allowed to counter-offer.
///
/// # Errors
///
/// - `AppError::Protocol("initialize rejected: …")` on an error response.
/// - `AppError::Protocol("initialize result is not an object")`.
/// - Any `request` / `notify` failure (timeout, stream closed).
pub async fn initialize(
    session: &mut ServerSession,
    config: &HandshakeConfig,
    timeout: Duration,
) -> Result<InitializeOutcome> {
    let exchange = session
        .request(INITIALIZE, Some(initialize_params(config)), timeout)
        .await?;

    if let Some(error) = &exchange.response.error {
        return Err(AppError::Protocol(format!(
            "initialize rejected: {} ({})",
            error.message, error.code
        )));
    }

    let result = exchange
        .response
        .result
        .as_ref()
        .filter(|r| r.is_object())
        .ok_or_else(|| AppError::Protocol("initialize result is not an object".into()))?;

    let outcome = InitializeOutcome::from_result(result, exchange.elapsed);

    if outcome.protocol_version.as_deref() != Some(config.protocol_version.as_str()) {
        warn!(
            offered = %config.protocol_version,
            chosen = ?outcome.protocol_version,
            "server negotiated a different protocol version"
        );
    }

    session.notify(INITIALIZED, None).await?;

    info!(
        server = ?outcome.server_name,
        version = ?outcome.server_version,
        protocol = ?outcome.protocol_version,
        "handshake complete"
    );

    Ok(outcome)
}

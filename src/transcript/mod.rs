//! Transcript of everything exchanged with the server.
//!
//! Provides the [`TranscriptSink`] trait and associated types. The primary
//! implementation, [`JsonlTranscriptWriter`], appends one JSON record per
//! line to a file chosen by the operator.

pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which way a transcript record travelled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Written by the tool to the server's stdin.
    Outbound,
    /// Read from the server's stdout.
    Inbound,
    /// Read from the server's stderr.
    Stderr,
    /// Process lifecycle (spawned, ready, exited).
    Lifecycle,
}

/// A single transcript record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// ISO 8601 timestamp with timezone.
    pub timestamp: DateTime<Utc>,
    /// Record direction.
    pub direction: Direction,
    /// JSON-RPC message, for outbound and parsed inbound records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    /// Raw text, for stderr, unparsed stdout, and lifecycle records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl TranscriptEntry {
    /// Construct an empty record stamped with the current time.
    #[must_use]
    pub fn new(direction: Direction) -> Self {
        Self {
            timestamp: Utc::now(),
            direction,
            message: None,
            text: None,
        }
    }

    /// Attach a JSON message.
    #[must_use]
    pub fn with_message(mut self, message: Value) -> Self {
        self.message = Some(message);
        self
    }

    /// Attach a text payload.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Destination for transcript records.
///
/// Implementations must be [`Send`] and [`Sync`] so a sink can be shared
/// via [`std::sync::Arc`].
pub trait TranscriptSink: Send + Sync {
    /// Record a single entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    fn record(&self, entry: TranscriptEntry) -> crate::Result<()>;
}

pub use writer::JsonlTranscriptWriter;

//! Stdio stream handling for the server under test.
//!
//! The server is spawned with piped stdin, stdout, and stderr. Each pipe is
//! owned by its own task so that a chatty stream can never block another:
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based NDJSON framing.
//! - `reader`: decodes stdout into JSON-RPC messages and emits [`ServerEvent`]s.
//! - `stderr`: forwards the server's log lines as [`ServerEvent::Stderr`].
//! - `writer`: serializes outbound messages onto stdin.
//! - `spawner`: process launch, environment filtering, and startup detection.

pub mod codec;
pub mod reader;
pub mod spawner;
pub mod stderr;
pub mod writer;

use crate::jsonrpc::InboundMessage;

/// Events produced by the stdio tasks for the session that owns the server.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A well-formed JSON-RPC message arrived on stdout.
    Message(InboundMessage),
    /// A stdout line that is not a valid JSON-RPC message.
    Unparsed {
        /// The line as received.
        line: String,
        /// Why it was rejected.
        error: String,
    },
    /// A line the server wrote to stderr.
    Stderr(String),
    /// Stdout reached EOF or failed; no further messages will arrive.
    StdoutClosed {
        /// Human-readable reason (`stream closed`, `stream error: ...`).
        reason: String,
    },
}

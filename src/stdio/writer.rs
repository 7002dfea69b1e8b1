//! Stdin writer task.
//!
//! Receives outbound JSON messages from a tokio [`mpsc`] channel, serializes
//! each value to a single compact line, and writes it to the server's stdin.
//!
//! When the channel closes the task returns and drops its stdin handle,
//! which closes the pipe. For an MCP stdio server, EOF on stdin is the
//! polite request to exit.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Stdin writer task.
///
/// Exits cleanly when `cancel` fires or every sender of `msg_rx` is dropped.
///
/// # Errors
///
/// - [`AppError::Protocol`]`("failed to serialize outbound message: …")`.
/// - [`AppError::Io`]`("write failed: …")` if the server closed its stdin
///   (usually because it exited).
pub async fn run_writer<W>(
    stdin: W,
    mut msg_rx: mpsc::Receiver<serde_json::Value>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut stdin = stdin;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("stdin writer: cancellation received, stopping");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(value) = msg else {
                    debug!("stdin writer: message channel closed, closing stdin");
                    break;
                };

                let mut bytes = serde_json::to_vec(&value).map_err(|e| {
                    AppError::Protocol(format!("failed to serialize outbound message: {e}"))
                })?;
                bytes.push(b'\n');

                stdin.write_all(&bytes).await.map_err(|e| {
                    warn!(error = %e, "stdin writer: write failed");
                    AppError::Io(format!("write failed: {e}"))
                })?;
                stdin.flush().await.map_err(|e| AppError::Io(format!("flush failed: {e}")))?;
            }
        }
    }

    stdin.shutdown().await.ok();
    Ok(())
}

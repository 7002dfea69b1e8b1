//! Stderr reader task.
//!
//! MCP servers log to stderr. Draining it continuously keeps the pipe from
//! filling up and stalling the server; each line is forwarded as a
//! [`ServerEvent::Stderr`].

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::stdio::ServerEvent;

/// Forward stderr lines until EOF, a read error, or cancellation.
///
/// Lines are decoded lossily: bytes that are not valid UTF-8 become
/// `U+FFFD` and draining continues, so a server that logs binary noise
/// never sees its stderr pipe closed under it.
pub async fn run_stderr<R>(mut stderr: R, event_tx: mpsc::Sender<ServerEvent>, cancel: CancellationToken)
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut buf = Vec::new();

    loop {
        buf.clear();
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            read = stderr.read_until(b'\n', &mut buf) => match read {
                Ok(0) => {
                    debug!("stderr reader: EOF detected");
                    break;
                }
                Ok(_) => {
                    let line = decode_line(&buf);
                    debug!(line = %line, "server stderr");
                    if event_tx.send(ServerEvent::Stderr(line)).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!(%err, "stderr reader: read error, stopping");
                    break;
                }
            },
        }
    }
}

/// Decode one raw stderr line, dropping the trailing `\n` or `\r\n`.
pub(crate) fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

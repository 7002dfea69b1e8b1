//! Stdout reader task.
//!
//! Reads newline-delimited JSON-RPC messages from the server's stdout,
//! classifies each line with [`parse_inbound_line`], and forwards the result
//! through a tokio [`mpsc`] channel as a [`ServerEvent`].
//!
//! The reader is driven by [`FramedRead`] backed by [`NdjsonCodec`], which
//! enforces the per-line limit before any JSON parsing happens.
//!
//! | Input                    | Emitted event                       |
//! |--------------------------|-------------------------------------|
//! | valid JSON-RPC message   | [`ServerEvent::Message`]            |
//! | blank line               | nothing                             |
//! | non-JSON / wrong shape   | [`ServerEvent::Unparsed`]           |
//! | over-long line           | [`ServerEvent::Unparsed`]           |
//! | invalid UTF-8            | [`ServerEvent::Unparsed`]           |
//! | EOF or I/O error         | [`ServerEvent::StdoutClosed`], stop |

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::jsonrpc::parse_inbound_line;
use crate::stdio::codec::NdjsonCodec;
use crate::stdio::ServerEvent;
use crate::AppError;

/// Stdout reader task.
///
/// Exits on EOF (after emitting [`ServerEvent::StdoutClosed`]), on an
/// unrecoverable I/O error (same), when `event_tx` is closed, or when
/// `cancel` fires (no event).
pub async fn run_reader<R>(stdout: R, event_tx: mpsc::Sender<ServerEvent>, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send,
{
    run_reader_with_codec(stdout, NdjsonCodec::new(), event_tx, cancel).await;
}

/// [`run_reader`] with an explicit codec (custom line limit).
pub async fn run_reader_with_codec<R>(
    stdout: R,
    codec: NdjsonCodec,
    event_tx: mpsc::Sender<ServerEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, codec);
    // FramedRead yields a single `None` after a decode error before reading resumes.
    let mut resyncing = false;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("stdout reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                let event = match item {
                    None if resyncing => {
                        resyncing = false;
                        continue;
                    }

                    None => {
                        debug!("stdout reader: EOF detected");
                        send(&event_tx, ServerEvent::StdoutClosed {
                            reason: "stream closed".into(),
                        })
                        .await;
                        break;
                    }

                    Some(Err(AppError::Protocol(msg))) => {
                        // Over-long or non-UTF-8 line; the codec resyncs at the next newline.
                        warn!(error = msg.as_str(), "stdout reader: framing error, skipping");
                        resyncing = true;
                        ServerEvent::Unparsed { line: String::new(), error: msg }
                    }

                    Some(Err(e)) => {
                        warn!(error = %e, "stdout reader: IO error, stopping");
                        send(&event_tx, ServerEvent::StdoutClosed {
                            reason: format!("stream error: {e}"),
                        })
                        .await;
                        break;
                    }

                    Some(Ok(line)) => match parse_inbound_line(&line) {
                        Ok(Some(message)) => {
                            debug!(raw = %line, "stdout reader: message received");
                            ServerEvent::Message(message)
                        }
                        Ok(None) => continue,
                        Err(e) => {
                            warn!(error = %e, raw_line = %line, "stdout reader: not a JSON-RPC message");
                            ServerEvent::Unparsed { line, error: e.to_string() }
                        }
                    },
                };

                if event_tx.send(event).await.is_err() {
                    debug!("stdout reader: event_tx closed, stopping");
                    break;
                }
            }
        }
    }
}

async fn send(event_tx: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    if event_tx.send(event).await.is_err() {
        debug!("stdout reader: event_tx closed before event could be delivered");
    }
}

//! Line framing for the server's stdout.
//!
//! MCP's stdio transport puts one JSON-RPC message per line. A server that
//! never writes a newline must not make the tool buffer without bound, so
//! decoding goes through a length-limited [`LinesCodec`].

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted on inbound streams: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// NDJSON codec: each `\n`-terminated UTF-8 line is one JSON-RPC message.
///
/// Inbound lines longer than [`MAX_LINE_BYTES`] decode to
/// [`AppError::Protocol`]`("line too long: …")`; the codec then discards
/// input up to the next newline and resumes. A line that is not valid UTF-8
/// decodes to [`AppError::Protocol`]`("invalid utf-8: …")` and is dropped.
/// Other I/O errors map to [`AppError::Io`].
///
/// ```rust,ignore
/// use tokio_util::codec::FramedRead;
/// use mcp_smoke::stdio::codec::NdjsonCodec;
///
/// let reader = FramedRead::new(child_stdout, NdjsonCodec::new());
/// ```
#[derive(Debug)]
pub struct NdjsonCodec(LinesCodec);

impl NdjsonCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom inbound line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max_length))
    }
}

impl Default for NdjsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NdjsonCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol("line too long: exceeded max line length".into())
        }
        // LinesCodec has already consumed the offending line.
        LinesCodecError::Io(io_err) if io_err.kind() == io::ErrorKind::InvalidData => {
            AppError::Protocol(format!("invalid utf-8: {io_err}"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}

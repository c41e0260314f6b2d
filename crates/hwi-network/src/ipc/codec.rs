//! Line framing for the IPC socket.
//!
//! `FramedRead` ends the stream after the first decoder error, so a single
//! oversized line from a peer would cost the whole connection. This codec
//! reports it as an item instead; `LinesCodec` keeps discarding until the
//! next newline and the lines after it decode normally.

use super::MAX_IPC_LINE;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// One line read from an IPC peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IpcLine {
    Line(String),

    /// Longer than [`MAX_IPC_LINE`]; its content is dropped
    Oversized,
}

#[derive(Debug)]
pub(crate) struct IpcLineCodec {
    lines: LinesCodec,
}

impl IpcLineCodec {
    pub(crate) fn new() -> Self {
        Self::with_max_length(MAX_IPC_LINE)
    }

    pub(crate) fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }
}

fn keep_going(
    decoded: Result<Option<String>, LinesCodecError>,
) -> Result<Option<IpcLine>, LinesCodecError> {
    match decoded {
        Ok(line) => Ok(line.map(IpcLine::Line)),
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(IpcLine::Oversized)),
        Err(e) => Err(e),
    }
}

impl Decoder for IpcLineCodec {
    type Item = IpcLine;
    type Error = LinesCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<IpcLine>, LinesCodecError> {
        keep_going(self.lines.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<IpcLine>, LinesCodecError> {
        keep_going(self.lines.decode_eof(src))
    }
}

impl Encoder<String> for IpcLineCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), LinesCodecError> {
        self.lines.encode(line, dst)
    }
}

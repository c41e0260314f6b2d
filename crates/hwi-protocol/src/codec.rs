//! Tokio codec for the panel connection.
//!
//! `LightingCodec` plugs the [`StreamDecoder`] and [`Command`] encoding into
//! Tokio's `FramedRead`/`FramedWrite`:
//!
//! ```text
//! TCP Stream -> Decoder -> DecodedFrame
//! Command -> Encoder -> TCP Stream (text + CR)
//! ```
//!
//! # Usage with Tokio Framed
//!
//! ```rust,no_run
//! use futures::{SinkExt, StreamExt};
//! use hwi_protocol::{Command, LightingCodec};
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//!
//! # async fn example() -> hwi_core::Result<()> {
//! let stream = TcpStream::connect("192.168.1.40:23").await?;
//! let mut framed = Framed::new(stream, LightingCodec::new());
//!
//! framed.send(Command::monitor_dim_levels()).await?;
//!
//! while let Some(Ok(frame)) = framed.next().await {
//!     println!("Received: {frame}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Decoding never fails: text that matches no grammar stays buffered in the
//! decoder. Encoding fails only for command text containing a line break,
//! which would otherwise smuggle a second command onto the wire.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{Command, DecodedFrame, StreamDecoder};
use hwi_core::constants::LINE_TERMINATOR;
use hwi_core::{Error, Result};

#[derive(Debug, Default)]
pub struct LightingCodec {
    decoder: StreamDecoder,
}

impl LightingCodec {
    /// Create a codec with the built-in grammars.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec around a preconfigured decoder.
    pub fn with_decoder(decoder: StreamDecoder) -> Self {
        Self { decoder }
    }

    /// Access the underlying decoder.
    pub fn decoder(&self) -> &StreamDecoder {
        &self.decoder
    }
}

impl Decoder for LightingCodec {
    type Item = DecodedFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if !src.is_empty() {
            // All bytes now belong to the decoder's text buffer.
            self.decoder.feed(src);
            src.clear();
        }

        Ok(self.decoder.next_frame())
    }
}

impl Encoder<Command> for LightingCodec {
    type Error = Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<()> {
        if item.text().contains(['\r', '\n']) {
            return Err(Error::InvalidFrame(format!(
                "command contains a line break: {:?}",
                item.text()
            )));
        }

        dst.reserve(item.text().len() + 1);
        dst.put_slice(item.text().as_bytes());
        dst.put_u8(LINE_TERMINATOR as u8);
        Ok(())
    }
}

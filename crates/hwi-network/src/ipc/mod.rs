//! IPC bridge between the process that owns the panel link and satellites.
//!
//! ```text
//!   satellite A ─┐                       ┌──> FADEDIM ... (TCP)
//!   satellite B ─┼──(unix socket)──> IpcServer ──> ProtocolClient
//!   satellite C ─┘        ^                              │
//!                         └────── broadcast frames <─────┘
//! ```
//!
//! Each line on the socket is one JSON message. Satellites send
//! [`IpcRequest`]s and receive [`IpcOutput`] broadcasts. Delivery is
//! at-most-once: there is no acknowledgement, and a satellite that is not
//! connected when a frame is broadcast never sees it.

mod codec;
mod messages;
mod satellite;
mod server;

pub(crate) use codec::{IpcLine, IpcLineCodec};
pub use messages::{IpcOutput, IpcRequest};
pub use satellite::{IpcSatellite, SatelliteConfig};
pub use server::{IpcServer, SatelliteInfo};

use std::path::PathBuf;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Longest accepted IPC line. Requests and broadcasts are a few hundred bytes.
pub const MAX_IPC_LINE: usize = 64 * 1024;

/// Errors raised by the IPC bridge.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Socket could not be bound
    #[error("Failed to bind IPC channel at {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Satellite buffer is full; the command was dropped
    #[error("Satellite command buffer full, dropped: {0}")]
    QueueFull(String),

    /// Satellite link task has stopped
    #[error("Satellite link closed")]
    Closed,

    /// Message body could not be encoded or decoded
    #[error("Invalid IPC message: {0}")]
    Message(#[from] serde_json::Error),

    /// Line framing failed
    #[error("IPC framing error: {0}")]
    Framing(#[from] LinesCodecError),

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

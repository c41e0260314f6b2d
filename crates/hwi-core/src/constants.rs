//! Core constants for the lighting panel protocol.
//!
//! The panel speaks a line-oriented ASCII protocol over a telnet-style TCP
//! connection. Commands are single lines terminated by a carriage return:
//!
//! ```text
//! FADEDIM, 50, 2, 0, [01:01:00:02:04]<CR>
//! RDL, [01:01:00:02:04]<CR>
//! DLMON<CR>
//! ```
//!
//! Responses and unsolicited notifications arrive with mixed CR/LF line
//! endings and no framing beyond the line break:
//!
//! ```text
//! DL, [01:01:00:02:04], 50<CR><LF>
//! ```
//!
//! # Usage
//!
//! ```
//! use hwi_core::constants::*;
//! use std::time::Duration;
//!
//! assert_eq!(LINE_TERMINATOR, '\r');
//! let settle = Duration::from_millis(DEFAULT_SETTLE_DELAY_MS);
//! assert_eq!(settle.as_millis(), 200);
//! ```

// ============================================================================
// Wire format
// ============================================================================

/// Terminator appended to every outbound command line.
pub const LINE_TERMINATOR: char = '\r';

/// Separator the stream decoder substitutes for every run of line breaks.
///
/// Also re-inserted between the unmatched prefix and suffix after a frame
/// body is consumed, so text on either side never fuses into a false match.
pub const FRAME_SEPARATOR: char = ';';

/// Command that enables live dim-level monitoring on the panel.
pub const MONITOR_DIM_LEVELS_COMMAND: &str = "DLMON";

/// Bare line used to surface the panel prompt after connecting.
pub const WAKE_COMMAND: &str = "";

/// Highest dim level the panel accepts or reports.
pub const MAX_DIM_LEVEL: u8 = 100;

/// Fade time used for dimmable circuits (seconds).
pub const DEFAULT_FADE_SECS: u32 = 2;

// ============================================================================
// Timing
// ============================================================================

/// Default settle delay after each transmitted command (milliseconds).
///
/// The panel relays commands over RS-232 and needs time to act on each one
/// before the next is written.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 200;

/// Upper bound accepted for a configured settle delay (milliseconds).
pub const MAX_SETTLE_DELAY_MS: u64 = 10_000;

/// Default transport connect timeout (milliseconds).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1500;

/// Default interval between satellite reconnect attempts (milliseconds).
pub const DEFAULT_IPC_RETRY_MS: u64 = 1500;

// ============================================================================
// Endpoints
// ============================================================================

/// Default panel host.
pub const DEFAULT_TELNET_HOST: &str = "127.0.0.1";

/// Default panel port.
pub const DEFAULT_TELNET_PORT: u16 = 23;

/// Logical name of the IPC channel shared by server and satellites.
pub const IPC_CHANNEL_ID: &str = "homebridge_lutron_hwi";

/// Capacity of a satellite's outbound command buffer.
pub const SATELLITE_QUEUE_CAPACITY: usize = 64;

/// Capacity of the decoded-frame broadcast channel.
pub const FRAME_BROADCAST_CAPACITY: usize = 256;

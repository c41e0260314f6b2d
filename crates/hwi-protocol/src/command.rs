//! Outbound panel commands.
//!
//! A [`Command`] is one line of text plus the admission priority it should
//! be scheduled with. The line terminator is not part of the text; it is
//! appended by [`LightingCodec`](crate::LightingCodec) on the way out.
//!
//! # Example
//!
//! ```
//! use hwi_protocol::Command;
//! use hwi_core::Priority;
//!
//! let cmd = Command::fade_dim(50, 2, "1.1.2.4");
//! assert_eq!(cmd.text(), "FADEDIM, 50, 2, 0, [1.1.2.4]");
//! assert_eq!(cmd.priority(), Priority::High);
//!
//! let query = Command::read_dim_level("1.1.2.4");
//! assert_eq!(query.text(), "RDL, [1.1.2.4]");
//! ```

use hwi_core::constants::{
    DEFAULT_FADE_SECS, LINE_TERMINATOR, MAX_DIM_LEVEL, MONITOR_DIM_LEVELS_COMMAND, WAKE_COMMAND,
};
use hwi_core::{Circuit, Priority};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    priority: Priority,
}

impl Command {
    pub fn new(text: impl Into<String>, priority: Priority) -> Self {
        Self {
            text: text.into(),
            priority,
        }
    }

    /// Fade a circuit to `level` (clamped to 0-100) over `fade_secs`.
    pub fn fade_dim(level: u8, fade_secs: u32, address: &str) -> Self {
        let level = level.min(MAX_DIM_LEVEL);
        Self::new(
            format!("FADEDIM, {level}, {fade_secs}, 0, [{address}]"),
            Priority::High,
        )
    }

    /// Ask the panel to report a circuit's current level.
    pub fn read_dim_level(address: &str) -> Self {
        Self::new(format!("RDL, [{address}]"), Priority::Standard)
    }

    /// Empty line that brings up the panel prompt.
    pub fn wake() -> Self {
        Self::new(WAKE_COMMAND, Priority::High)
    }

    /// Turn on unsolicited dim-level notifications.
    pub fn monitor_dim_levels() -> Self {
        Self::new(MONITOR_DIM_LEVELS_COMMAND, Priority::High)
    }

    /// Drive a configured circuit to a brightness level.
    ///
    /// Non-dimmable circuits only know fully on or off and switch without a
    /// fade; any non-zero level turns them fully on.
    pub fn for_circuit_level(circuit: &Circuit, level: u8) -> Self {
        if circuit.dimmable {
            Self::fade_dim(level, DEFAULT_FADE_SECS, &circuit.configured_address)
        } else {
            let level = if level > 0 { MAX_DIM_LEVEL } else { 0 };
            Self::fade_dim(level, 0, &circuit.configured_address)
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Text with the line terminator appended.
    pub fn to_wire(&self) -> String {
        let mut line = String::with_capacity(self.text.len() + 1);
        line.push_str(&self.text);
        line.push(LINE_TERMINATOR);
        line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

//! Decoded frames.
//!
//! [`DecodedFrame`] is the untyped result of a grammar match: the frame kind,
//! the decoder's running counter, the ordered capture fields and the matched
//! body text. It is what
//! travels over the IPC bridge. [`LightingEvent`] is the typed view used by
//! consumers.

use crate::FrameKind;
use hwi_core::constants::MAX_DIM_LEVEL;
use hwi_core::{CanonicalAddress, Error, Result};
use std::fmt;

/// One frame extracted from the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Which grammar matched
    pub kind: FrameKind,

    /// Decoder counter at the time of the match (starts at 1)
    pub counter: u64,

    /// Capture fields in grammar order
    pub fields: Vec<String>,

    /// The matched frame body, e.g. `DL, [01:01:00:02:04], 50`
    pub text: String,
}

impl DecodedFrame {
    pub fn new(kind: FrameKind, counter: u64, fields: Vec<String>) -> Self {
        Self {
            kind,
            counter,
            fields,
            text: String::new(),
        }
    }

    /// Attach the matched body text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Get a capture field by position.
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Interpret the frame.
    pub fn event(&self) -> Result<LightingEvent> {
        LightingEvent::try_from(self)
    }
}

impl fmt::Display for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{} {} [{}]", self.counter, self.kind, self.fields.join(", "))
    }
}

/// Typed frame contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LightingEvent {
    /// Circuit at `address` is now at `level` (0-100).
    DimLevel {
        address: CanonicalAddress,
        level: u8,
    },
}

impl TryFrom<&DecodedFrame> for LightingEvent {
    type Error = Error;

    fn try_from(frame: &DecodedFrame) -> Result<Self> {
        match frame.kind {
            FrameKind::DimLevel => {
                let [address, level] = frame.fields.as_slice() else {
                    return Err(Error::InvalidFrame(format!(
                        "dim-level frame needs 2 fields, got {}",
                        frame.fields.len()
                    )));
                };

                let address = CanonicalAddress::parse(address)?;
                let level: u32 = level
                    .parse()
                    .map_err(|_| Error::InvalidFrame(format!("invalid dim level: {level}")))?;

                Ok(LightingEvent::DimLevel {
                    address,
                    level: level.min(u32::from(MAX_DIM_LEVEL)) as u8,
                })
            }
        }
    }
}

use crate::{Result, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Admission priority for outbound commands.
///
/// Lower numeric value means more urgent. The derived ordering follows the
/// declaration order, so `High < Standard < Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Priority {
    /// Interactive changes and connection priming.
    High = 1,
    /// Status queries.
    #[default]
    Standard = 2,
    /// Background refresh.
    Low = 3,
}

impl Priority {
    /// Get the wire value (1-3).
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Priority::High),
            2 => Ok(Priority::Standard),
            3 => Ok(Priority::Low),
            other => Err(Error::InvalidPriority(other)),
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.as_u8()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Standard => write!(f, "standard"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// How a process reaches the panel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommMode {
    /// Owns the TCP link to the panel and serves satellites over IPC.
    #[default]
    Telnet,
    /// Satellite: forwards commands through the process that owns the link.
    Ipc,
}

impl fmt::Display for CommMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CommMode::Telnet => write!(f, "telnet"),
            CommMode::Ipc => write!(f, "ipc"),
        }
    }
}

/// Lifecycle of the protocol client's link.
///
/// There is no automatic transition back to `Connected` once the link is
/// lost; a new `connect()` call is required.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Canonical circuit address (two-digit, zero-padded, colon-delimited).
///
/// Circuit addresses are configured in dotted form (`1.1.2.4`) but the panel
/// reports them in canonical form (`01:01:02:04`). The canonical string is
/// the key used to correlate decoded frames with configured circuits.
///
/// Parsing is idempotent: an already-canonical address parses to itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalAddress(String);

impl CanonicalAddress {
    /// Canonicalize a dot- or colon-delimited address.
    ///
    /// Surrounding whitespace and square brackets are ignored.
    ///
    /// # Errors
    /// Returns `Error::InvalidAddress` if any component is empty or not a
    /// non-negative integer.
    ///
    /// # Example
    /// ```
    /// use hwi_core::CanonicalAddress;
    ///
    /// let adr = CanonicalAddress::parse("1.1.2.4").unwrap();
    /// assert_eq!(adr.as_str(), "01:01:02:04");
    /// ```
    pub fn parse(address: &str) -> Result<Self> {
        let trimmed = address.trim().trim_matches(['[', ']']).trim();

        let parts = trimmed
            .split(['.', ':'])
            .map(|part| {
                part.trim()
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidAddress(address.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let canonical = parts
            .iter()
            .map(|part| format!("{part:02}"))
            .collect::<Vec<_>>()
            .join(":");

        Ok(CanonicalAddress(canonical))
    }

    /// Get the canonical string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CanonicalAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CanonicalAddress::parse(s)
    }
}

impl TryFrom<String> for CanonicalAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        CanonicalAddress::parse(&value)
    }
}

impl From<CanonicalAddress> for String {
    fn from(address: CanonicalAddress) -> Self {
        address.0
    }
}

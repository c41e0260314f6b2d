//! Bridge configuration.
//!
//! Configuration is read from a JSON document using the key names of the
//! platform configuration the bridge plugs into:
//!
//! ```json
//! {
//!   "commMode": "telnet",
//!   "telnetIP": "192.168.1.40",
//!   "telnetPort": 23,
//!   "minInterCmdTime": 200,
//!   "circuitsFile": "/etc/hwi/circuits.json"
//! }
//! ```
//!
//! Every key is optional; missing keys take the defaults in
//! [`crate::constants`].

use crate::{
    CommMode, Result,
    constants::{
        DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_IPC_RETRY_MS, DEFAULT_SETTLE_DELAY_MS,
        DEFAULT_TELNET_HOST, DEFAULT_TELNET_PORT, IPC_CHANNEL_ID, MAX_SETTLE_DELAY_MS,
    },
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Whether this process owns the panel link or forwards through IPC
    pub comm_mode: CommMode,

    /// Panel host name or IP address
    #[serde(rename = "telnetIP")]
    pub telnet_ip: String,

    /// Panel TCP port
    pub telnet_port: u16,

    /// Settle delay after each command, in milliseconds
    #[serde(rename = "minInterCmdTime")]
    pub settle_delay_ms: u64,

    /// Transport connect timeout, in milliseconds
    #[serde(rename = "connectTimeout")]
    pub connect_timeout_ms: u64,

    /// Socket path of the IPC channel
    pub ipc_path: PathBuf,

    /// Satellite reconnect interval, in milliseconds
    #[serde(rename = "ipcRetry")]
    pub ipc_retry_ms: u64,

    /// JSON circuit list
    pub circuits_file: Option<PathBuf>,

    /// Never connect; commands are logged only
    pub disabled: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            comm_mode: CommMode::default(),
            telnet_ip: DEFAULT_TELNET_HOST.to_string(),
            telnet_port: DEFAULT_TELNET_PORT,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            ipc_path: default_ipc_path(),
            ipc_retry_ms: DEFAULT_IPC_RETRY_MS,
            circuits_file: None,
            disabled: false,
        }
    }
}

/// Socket path used when `ipcPath` is not configured.
pub fn default_ipc_path() -> PathBuf {
    std::env::temp_dir().join(format!("{IPC_CHANNEL_ID}.sock"))
}

impl BridgeConfig {
    /// Parse and validate a JSON configuration document.
    ///
    /// # Errors
    /// Returns `Error::Config` if the document is not valid JSON for this
    /// schema or fails [`validate`](Self::validate).
    pub fn from_json(json: &str) -> Result<Self> {
        let config: BridgeConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.comm_mode == CommMode::Telnet && self.telnet_port == 0 {
            return Err(Error::Config("telnetPort must be non-zero".to_string()));
        }
        if self.settle_delay_ms > MAX_SETTLE_DELAY_MS {
            return Err(Error::Config(format!(
                "minInterCmdTime must be at most {MAX_SETTLE_DELAY_MS}ms, got {}",
                self.settle_delay_ms
            )));
        }
        if self.telnet_ip.trim().is_empty() {
            return Err(Error::Config("telnetIP must not be empty".to_string()));
        }
        Ok(())
    }

    /// `host:port` of the panel.
    #[must_use]
    pub fn panel_addr(&self) -> String {
        format!("{}:{}", self.telnet_ip, self.telnet_port)
    }

    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn ipc_retry(&self) -> Duration {
        Duration::from_millis(self.ipc_retry_ms)
    }
}

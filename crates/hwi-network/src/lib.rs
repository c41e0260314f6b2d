//! Network layer for the lighting bridge.
//!
//! - [`ProtocolClient`]: owns the panel connection (or an IPC satellite
//!   link), orders outbound commands and dispatches decoded frames
//! - [`AdmissionQueue`]: one-at-a-time, priority-ordered command turns
//! - [`IpcServer`] / [`IpcSatellite`]: share one panel connection between
//!   processes over a Unix domain socket
//!
//! The IPC bridge uses Unix domain sockets, so this crate targets Unix.
//!
//! # Example
//!
//! ```no_run
//! use hwi_core::BridgeConfig;
//! use hwi_network::{IpcServer, ProtocolClient, ProtocolClientConfig};
//! use hwi_protocol::FrameRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BridgeConfig::load("bridge.json")?;
//!
//! let client = ProtocolClient::new(ProtocolClientConfig::from(&config), FrameRegistry::new());
//! client.connect().await?;
//!
//! let _server = IpcServer::bind(&config.ipc_path, client.clone()).await?;
//! # Ok(())
//! # }
//! ```

mod admission;
mod client;
pub mod ipc;

pub use admission::{AdmissionClosed, AdmissionGrant, AdmissionQueue, AdmissionTicket};
pub use client::{ClientError, ProtocolClient, ProtocolClientConfig, SendOutcome};
pub use ipc::{IpcError, IpcOutput, IpcRequest, IpcSatellite, IpcServer, SatelliteConfig, SatelliteInfo};

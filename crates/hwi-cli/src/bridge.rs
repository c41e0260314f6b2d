//! Subcommand implementations.

use anyhow::{Context, Result};
use hwi_core::constants::DEFAULT_FADE_SECS;
use hwi_core::{BridgeConfig, CanonicalAddress, CircuitTable, CommMode, Priority};
use hwi_network::{IpcServer, ProtocolClient, ProtocolClientConfig, SendOutcome};
use hwi_protocol::{Command, DecodedFrame, FrameKind, FrameRegistry, LightingEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// How long one-shot commands wait for a reply frame.
const QUERY_REPLY_TIMEOUT: Duration = Duration::from_secs(3);

/// Load the configured circuit list. Failures are logged and leave the
/// table empty; the bridge still runs, it just cannot name circuits.
pub fn load_circuits(config: &BridgeConfig) -> CircuitTable {
    let Some(path) = &config.circuits_file else {
        warn!("No circuits file configured; level updates will not be named");
        return CircuitTable::new();
    };

    match CircuitTable::load(path) {
        Ok(table) => table,
        Err(e) => {
            error!(path = %path.display(), "Failed to load circuits: {}", e);
            CircuitTable::new()
        }
    }
}

/// Build the command for `dim`: an explicit fade wins, otherwise configured
/// circuits follow their dimmable setting.
pub fn dim_command(circuits: &CircuitTable, address: &str, level: u8, fade: Option<u32>) -> Command {
    if let Some(fade) = fade {
        return Command::fade_dim(level, fade, address);
    }

    let circuit = CanonicalAddress::parse(address)
        .ok()
        .and_then(|canonical| circuits.get(&canonical));

    match circuit {
        Some(circuit) => Command::for_circuit_level(circuit, level),
        None => Command::fade_dim(level, DEFAULT_FADE_SECS, address),
    }
}

/// Log a dim-level frame against the circuit list.
pub fn report_dim_level(circuits: &CircuitTable, frame: &DecodedFrame) -> Option<String> {
    let event = match frame.event() {
        Ok(event) => event,
        Err(e) => {
            warn!(counter = frame.counter, "Unusable frame {}: {}", frame, e);
            return None;
        }
    };

    let LightingEvent::DimLevel { address, level } = event;
    match circuits.get(&address) {
        Some(circuit) => {
            let line = format!("UPD Dim level for {}[{}] to {}", circuit.name, address, level);
            info!("{}", line);
            Some(line)
        }
        None => {
            debug!("Level {} for unknown circuit {}", level, address);
            None
        }
    }
}

/// Connect, share the link with satellites and log level changes until
/// Ctrl-C.
pub async fn serve(config: BridgeConfig) -> Result<()> {
    let circuits = Arc::new(load_circuits(&config));

    let mut registry = FrameRegistry::new();
    let table = Arc::clone(&circuits);
    registry.register(FrameKind::DimLevel, move |frame| {
        report_dim_level(&table, frame);
    });

    let client = ProtocolClient::new(ProtocolClientConfig::from(&config), registry);
    client.connect().await.context("connecting to panel")?;

    let server = match config.comm_mode {
        CommMode::Telnet if !config.disabled => Some(
            IpcServer::bind(&config.ipc_path, client.clone())
                .await
                .context("starting IPC server")?,
        ),
        _ => None,
    };

    // Current levels, behind anything interactive
    for circuit in circuits.iter() {
        let command = Command::read_dim_level(&circuit.configured_address)
            .with_priority(Priority::Low);
        drop(client.submit(command));
    }

    info!(circuits = circuits.len(), mode = %config.comm_mode, "Bridge running");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    if let Some(server) = &server {
        debug!(satellites = server.satellite_count(), "Closing IPC server");
    }
    drop(server);
    client.close().await;
    Ok(())
}

/// Send one command and wait briefly for the panel's level report for
/// `address`. Reports for other circuits are ignored.
pub async fn one_shot(
    config: BridgeConfig,
    command: Command,
    address: &CanonicalAddress,
) -> Result<Option<LightingEvent>> {
    let client = ProtocolClient::new(ProtocolClientConfig::from(&config), FrameRegistry::new());
    let mut frames = client.subscribe();

    client.connect().await.context("connecting to panel")?;
    tokio::time::timeout(config.connect_timeout(), client.wait_linked())
        .await
        .context("IPC server not reachable")??;

    let outcome = client.send(command).await?;
    info!(?outcome, "Command finished");

    let reply = match outcome {
        SendOutcome::Skipped => None,
        SendOutcome::Transmitted | SendOutcome::Forwarded => {
            wait_for_level(&mut frames, address).await
        }
    };

    client.close().await;
    Ok(reply)
}

async fn wait_for_level(
    frames: &mut tokio::sync::broadcast::Receiver<DecodedFrame>,
    address: &CanonicalAddress,
) -> Option<LightingEvent> {
    let wait = async {
        loop {
            match frames.recv().await {
                Ok(frame) => {
                    let Ok(event) = frame.event() else {
                        continue;
                    };
                    let LightingEvent::DimLevel { address: reported, .. } = &event;
                    if reported == address {
                        return Some(event);
                    }
                    trace!(counter = frame.counter, "Level for another circuit: {}", frame);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    };

    tokio::time::timeout(QUERY_REPLY_TIMEOUT, wait)
        .await
        .ok()
        .flatten()
}

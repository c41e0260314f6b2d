//! Server side of the IPC bridge.
//!
//! Lives next to the [`ProtocolClient`] that owns the panel link. Every
//! accepted satellite gets its own task, which
//!
//! - submits each forwarded [`IpcRequest`] to the client (no reply is sent)
//! - writes every frame the client decodes to the satellite as an [`IpcOutput`]
//!
//! A satellite subscribes to the client's frame broadcast when it is
//! accepted, so it only ever sees frames decoded after it connected.
//!
//! # Example
//!
//! ```no_run
//! use hwi_network::{IpcServer, ProtocolClient, ProtocolClientConfig};
//! use hwi_protocol::FrameRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ProtocolClient::new(ProtocolClientConfig::default(), FrameRegistry::new());
//! client.connect().await?;
//!
//! let server = IpcServer::bind("/tmp/homebridge_lutron_hwi.sock", client.clone()).await?;
//! println!("{} satellites", server.satellite_count());
//! # Ok(())
//! # }
//! ```

use super::{IpcError, IpcLine, IpcLineCodec, IpcOutput, IpcRequest};
use crate::ProtocolClient;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use hwi_protocol::{Command, DecodedFrame};
use std::collections::HashMap;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, trace, warn};

/// Snapshot of one connected satellite.
#[derive(Debug, Clone)]
pub struct SatelliteInfo {
    /// Server-assigned id, unique for the server's lifetime
    pub id: u64,

    /// When the satellite connected
    pub connected_at: DateTime<Utc>,
}

impl SatelliteInfo {
    /// How long the satellite has been connected.
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.connected_at
    }
}

type SatelliteTable = Arc<Mutex<HashMap<u64, SatelliteInfo>>>;

/// IPC server bound to a Unix domain socket.
///
/// Dropping the server stops accepting, disconnects every satellite and
/// removes the socket file.
pub struct IpcServer {
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
    satellites: SatelliteTable,
    accept_task: JoinHandle<()>,
}

impl IpcServer {
    /// Bind the socket and start accepting satellites.
    ///
    /// A stale socket left at `path` by a previous run is removed first.
    /// Any other kind of file at `path` is left alone and binding fails.
    pub async fn bind(path: impl AsRef<Path>, client: ProtocolClient) -> Result<Self, IpcError> {
        let path = path.as_ref().to_path_buf();
        let bind_error = |source: std::io::Error| IpcError::Bind {
            path: path.clone(),
            source,
        };

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if metadata.file_type().is_socket() {
                debug!(?path, "Removing stale socket");
                std::fs::remove_file(&path).map_err(bind_error)?;
            } else {
                return Err(bind_error(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
        }

        let listener = UnixListener::bind(&path).map_err(bind_error)?;
        let created_inode = std::fs::symlink_metadata(&path)
            .ok()
            .map(|metadata| (metadata.dev(), metadata.ino()));

        info!(?path, "IPC server listening");

        let satellites = SatelliteTable::default();
        let accept_task = tokio::spawn(accept_loop(listener, client, Arc::clone(&satellites)));

        Ok(Self {
            path,
            created_inode,
            satellites,
            accept_task,
        })
    }

    /// Socket path the server is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of connected satellites.
    pub fn satellite_count(&self) -> usize {
        self.lock_satellites().len()
    }

    /// Connected satellites, oldest first.
    pub fn satellites(&self) -> Vec<SatelliteInfo> {
        let mut satellites: Vec<_> = self.lock_satellites().values().cloned().collect();
        satellites.sort_by_key(|info| info.id);
        satellites
    }

    fn lock_satellites(&self) -> std::sync::MutexGuard<'_, HashMap<u64, SatelliteInfo>> {
        self.satellites.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.accept_task.abort();

        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };

        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "Removing socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "Socket path replaced; leaving it");
            }
        }
    }
}

async fn accept_loop(listener: UnixListener, client: ProtocolClient, satellites: SatelliteTable) {
    let next_id = AtomicU64::new(1);
    // Satellite tasks end with the accept loop
    let mut tasks = tokio::task::JoinSet::new();

    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                error!("Failed to accept satellite: {}", e);
                continue;
            }
        };

        let id = next_id.fetch_add(1, Ordering::Relaxed);
        let info = SatelliteInfo {
            id,
            connected_at: Utc::now(),
        };

        // Subscribe before registering so no frame slips between the two
        let frames = client.subscribe();
        satellites
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, info);
        info!(satellite = id, "Satellite connected");

        let client = client.clone();
        let satellites = Arc::clone(&satellites);
        tasks.spawn(async move {
            serve_satellite(id, stream, &client, frames).await;
            satellites
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            info!(satellite = id, "Satellite disconnected");
        });

        // Reap finished satellites
        while tasks.try_join_next().is_some() {}
    }
}

async fn serve_satellite(
    id: u64,
    stream: UnixStream,
    client: &ProtocolClient,
    mut frames: broadcast::Receiver<DecodedFrame>,
) {
    let (read, write) = stream.into_split();
    let mut lines_in = FramedRead::new(read, IpcLineCodec::new());
    let mut lines_out = FramedWrite::new(write, IpcLineCodec::new());

    loop {
        tokio::select! {
            line = lines_in.next() => match line {
                Some(Ok(IpcLine::Line(line))) => handle_request(id, &line, client),
                Some(Ok(IpcLine::Oversized)) => {
                    warn!(satellite = id, "Discarding oversized request");
                }
                Some(Err(e)) => {
                    debug!(satellite = id, "IPC read failed: {}", e);
                    return;
                }
                None => return,
            },

            frame = frames.recv() => match frame {
                Ok(frame) => {
                    let line = match serde_json::to_string(&IpcOutput::from(&frame)) {
                        Ok(line) => line,
                        Err(e) => {
                            error!(satellite = id, "Failed to encode broadcast: {}", e);
                            continue;
                        }
                    };

                    if let Err(e) = lines_out.send(line).await {
                        // Satellite went away mid-broadcast; not an error for the server
                        debug!(satellite = id, "Broadcast not delivered: {}", e);
                        return;
                    }
                    trace!(satellite = id, counter = frame.counter, "Broadcast delivered");
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(satellite = id, missed, "Satellite fell behind; frames skipped");
                }
                Err(RecvError::Closed) => return,
            },
        }
    }
}

fn handle_request(id: u64, line: &str, client: &ProtocolClient) {
    let request: IpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!(satellite = id, "Ignoring malformed request: {}", e);
            return;
        }
    };

    info!(
        satellite = id,
        counter = request.counter,
        priority = %request.priority,
        "IPC RCV {}",
        request.cmd
    );

    // No reply; the outcome is logged by the client
    drop(client.submit(Command::new(request.cmd, request.priority)));
}

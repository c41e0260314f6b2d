//! Satellite side of the IPC bridge.
//!
//! A satellite has no panel link of its own. It keeps one connection to the
//! [`IpcServer`](super::IpcServer), reconnecting every `retry` interval while
//! the server is unreachable, forwards commands as [`IpcRequest`]s and hands
//! every broadcast frame to a callback.
//!
//! Commands are buffered in a bounded queue while the link is down and go
//! out once it is back. Frames broadcast while the link is down are lost.

use super::{IpcError, IpcLine, IpcLineCodec, IpcOutput, IpcRequest};
use futures::{SinkExt, StreamExt};
use hwi_core::constants::SATELLITE_QUEUE_CAPACITY;
use hwi_protocol::{Command, DecodedFrame};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone)]
pub struct SatelliteConfig {
    /// Socket path of the server
    pub path: PathBuf,

    /// Wait between connection attempts
    pub retry: Duration,
}

/// Handle to a running satellite link.
///
/// The link task stops when the handle is dropped.
#[derive(Debug)]
pub struct IpcSatellite {
    requests: mpsc::Sender<IpcRequest>,
    counter: AtomicU64,
    linked: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

/// Why a link ended.
enum LinkEnd {
    Disconnected,
    Shutdown,
}

impl IpcSatellite {
    /// Start the link task. `on_frame` runs for every broadcast frame, in
    /// arrival order, on the link task.
    pub fn spawn<F>(config: SatelliteConfig, on_frame: F) -> Self
    where
        F: Fn(DecodedFrame) + Send + Sync + 'static,
    {
        let (requests, queue) = mpsc::channel(SATELLITE_QUEUE_CAPACITY);
        let (linked_tx, linked) = watch::channel(false);

        let task = tokio::spawn(run_link(config, queue, linked_tx, on_frame));

        Self {
            requests,
            counter: AtomicU64::new(0),
            linked,
            task,
        }
    }

    /// Queue a command for the server.
    ///
    /// Returns the request counter assigned to it.
    ///
    /// # Errors
    /// [`IpcError::QueueFull`] if the buffer is full, [`IpcError::Closed`]
    /// if the link task has stopped. Either way the command is dropped.
    pub fn forward(&self, command: &Command) -> Result<u64, IpcError> {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let request = IpcRequest {
            counter,
            priority: command.priority(),
            cmd: command.text().to_string(),
        };

        info!(counter, priority = %request.priority, "IPC XMT {}", request.cmd);

        self.requests.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(request) => {
                warn!(counter, "Satellite buffer full, dropping {}", request.cmd);
                IpcError::QueueFull(request.cmd)
            }
            mpsc::error::TrySendError::Closed(_) => IpcError::Closed,
        })?;

        Ok(counter)
    }

    /// Whether the link to the server is currently up.
    pub fn is_linked(&self) -> bool {
        *self.linked.borrow()
    }

    /// Wait until the link to the server is up.
    pub async fn wait_linked(&self) -> Result<(), IpcError> {
        let mut linked = self.linked.clone();
        linked
            .wait_for(|up| *up)
            .await
            .map(|_| ())
            .map_err(|_| IpcError::Closed)
    }

    /// Stop the link task.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for IpcSatellite {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_link<F>(
    config: SatelliteConfig,
    mut queue: mpsc::Receiver<IpcRequest>,
    linked: watch::Sender<bool>,
    on_frame: F,
) where
    F: Fn(DecodedFrame) + Send + Sync + 'static,
{
    loop {
        match UnixStream::connect(&config.path).await {
            Ok(stream) => {
                info!(path = ?config.path, "Connected to IPC server");
                linked.send_replace(true);

                let end = serve_link(stream, &mut queue, &on_frame).await;
                linked.send_replace(false);

                match end {
                    LinkEnd::Shutdown => return,
                    LinkEnd::Disconnected => {
                        warn!(path = ?config.path, "Disconnected from IPC server");
                    }
                }
            }
            Err(e) => {
                debug!(path = ?config.path, "IPC server not reachable: {}", e);
            }
        }

        tokio::time::sleep(config.retry).await;
    }
}

async fn serve_link<F>(
    stream: UnixStream,
    queue: &mut mpsc::Receiver<IpcRequest>,
    on_frame: &F,
) -> LinkEnd
where
    F: Fn(DecodedFrame),
{
    let (read, write) = stream.into_split();
    let mut lines_in = FramedRead::new(read, IpcLineCodec::new());
    let mut lines_out = FramedWrite::new(write, IpcLineCodec::new());

    loop {
        tokio::select! {
            request = queue.recv() => {
                let Some(request) = request else {
                    return LinkEnd::Shutdown;
                };

                let line = match serde_json::to_string(&request) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(counter = request.counter, "Failed to encode request: {}", e);
                        continue;
                    }
                };

                if let Err(e) = lines_out.send(line).await {
                    warn!(counter = request.counter, "Request lost: {}", e);
                    return LinkEnd::Disconnected;
                }
            }

            line = lines_in.next() => match line {
                Some(Ok(IpcLine::Line(line))) => handle_broadcast(&line, on_frame),
                Some(Ok(IpcLine::Oversized)) => {
                    warn!("Discarding oversized broadcast");
                }
                Some(Err(e)) => {
                    debug!("IPC read failed: {}", e);
                    return LinkEnd::Disconnected;
                }
                None => return LinkEnd::Disconnected,
            },
        }
    }
}

fn handle_broadcast<F>(line: &str, on_frame: &F)
where
    F: Fn(DecodedFrame),
{
    let output: IpcOutput = match serde_json::from_str(line) {
        Ok(output) => output,
        Err(e) => {
            warn!("Ignoring malformed broadcast: {}", e);
            return;
        }
    };

    match output.to_frame() {
        Some(frame) => {
            trace!(counter = frame.counter, kind = %frame.kind, "IPC RCV");
            on_frame(frame);
        }
        None => debug!(out_type = output.out_type, "Ignoring broadcast of unknown kind"),
    }
}

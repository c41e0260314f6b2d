//! Protocol client for the lighting panel.
//!
//! `ProtocolClient` owns the panel connection, or, in satellite mode, the
//! link to the process that does. It composes the [`AdmissionQueue`], the
//! [`LightingCodec`] and the [`FrameRegistry`]:
//!
//! ```text
//!  send(cmd) ──> AdmissionQueue ──> XMT ──> settle delay ──> release
//!                                    │
//!                                    v
//!                              panel (TCP)
//!                                    │
//!  FrameRegistry <── RCV <── LightingCodec
//!        └── broadcast ──> IpcServer ──> satellites
//! ```
//!
//! In satellite mode `send` forwards the command over IPC and frames arrive
//! as server broadcasts; handlers see the same frames either way.
//!
//! # Example
//!
//! ```no_run
//! use hwi_network::{ProtocolClient, ProtocolClientConfig};
//! use hwi_protocol::{Command, FrameKind, FrameRegistry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = FrameRegistry::new();
//! registry.register(FrameKind::DimLevel, |frame| println!("{frame}"));
//!
//! let config = ProtocolClientConfig {
//!     panel_addr: "192.168.1.40:23".to_string(),
//!     ..Default::default()
//! };
//!
//! let client = ProtocolClient::new(config, registry);
//! client.connect().await?;
//! client.send(Command::fade_dim(40, 2, "1.1.2.4")).await?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Failure handling
//!
//! Connection attempts fail with a [`ClientError`] and are not retried.
//! A lost panel connection moves the client to `Disconnected`, after which
//! `send` returns [`SendOutcome::Skipped`]. A failed write is logged and
//! returned, and the admission turn is still released after the settle
//! delay so later commands are not blocked.

use crate::admission::{AdmissionClosed, AdmissionGrant, AdmissionQueue, AdmissionTicket};
use crate::ipc::{IpcError, IpcSatellite, SatelliteConfig};
use futures::{SinkExt, StreamExt};
use hwi_core::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_IPC_RETRY_MS, DEFAULT_SETTLE_DELAY_MS,
    DEFAULT_TELNET_HOST, DEFAULT_TELNET_PORT, FRAME_BROADCAST_CAPACITY,
};
use hwi_core::config::default_ipc_path;
use hwi_core::{BridgeConfig, CommMode, ConnectionState};
use hwi_protocol::{Command, DecodedFrame, FrameRegistry, LightingCodec};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, trace, warn};

/// Configuration for [`ProtocolClient`].
#[derive(Debug, Clone)]
pub struct ProtocolClientConfig {
    /// Direct panel link or IPC satellite
    pub mode: CommMode,

    /// Panel address as `host:port`
    pub panel_addr: String,

    /// Timeout for the panel connection attempt
    pub connect_timeout: Duration,

    /// Wait after each transmission before the next command is admitted
    pub settle_delay: Duration,

    /// Where to find the IPC server in satellite mode
    pub satellite: SatelliteConfig,

    /// Log commands instead of sending them
    pub disabled: bool,
}

impl Default for ProtocolClientConfig {
    fn default() -> Self {
        Self {
            mode: CommMode::Telnet,
            panel_addr: format!("{DEFAULT_TELNET_HOST}:{DEFAULT_TELNET_PORT}"),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            satellite: SatelliteConfig {
                path: default_ipc_path(),
                retry: Duration::from_millis(DEFAULT_IPC_RETRY_MS),
            },
            disabled: false,
        }
    }
}

impl From<&BridgeConfig> for ProtocolClientConfig {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            mode: config.comm_mode,
            panel_addr: config.panel_addr(),
            connect_timeout: config.connect_timeout(),
            settle_delay: config.settle_delay(),
            satellite: SatelliteConfig {
                path: config.ipc_path.clone(),
                retry: config.ipc_retry(),
            },
            disabled: config.disabled,
        }
    }
}

/// Errors that can occur during protocol client operations
#[derive(Debug, Error)]
pub enum ClientError {
    /// No transport is attached
    #[error("Not connected to panel")]
    NotConnected,

    /// Connection attempt timed out
    #[error("Connection timeout after {0}ms")]
    ConnectionTimeout(u64),

    /// Writing a command to the panel failed
    #[error("Failed to send {command:?}: {source}")]
    Send {
        command: String,
        #[source]
        source: hwi_core::Error,
    },

    /// Admission queue went away while waiting for a turn
    #[error(transparent)]
    Admission(#[from] AdmissionClosed),

    /// Satellite could not forward the command
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What happened to a command handed to [`ProtocolClient::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the panel
    Transmitted,
    /// Queued for the IPC server
    Forwarded,
    /// Not sent: client disabled or not connected
    Skipped,
}

type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;
type PanelWriter = FramedWrite<BoxedWriter, LightingCodec>;

/// Protocol client. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct ProtocolClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ProtocolClientConfig,
    registry: FrameRegistry,
    queue: AdmissionQueue,
    state: watch::Sender<ConnectionState>,
    frames: broadcast::Sender<DecodedFrame>,

    /// Panel writer; `None` while disconnected
    writer: tokio::sync::Mutex<Option<PanelWriter>>,

    reader: Mutex<Option<JoinHandle<()>>>,
    satellite: Mutex<Option<Arc<IpcSatellite>>>,

    /// Time of the last transmission, for RCV latency logging
    last_transmit: Mutex<Instant>,
}

impl ProtocolClient {
    /// Create a disconnected client. Handlers must be registered before this
    /// call.
    pub fn new(config: ProtocolClientConfig, registry: FrameRegistry) -> Self {
        debug!(mode = %config.mode, panel = %config.panel_addr, "Creating protocol client");

        let (frames, _) = broadcast::channel(FRAME_BROADCAST_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(ClientInner {
                config,
                registry,
                queue: AdmissionQueue::new(),
                state,
                frames,
                writer: tokio::sync::Mutex::new(None),
                reader: Mutex::new(None),
                satellite: Mutex::new(None),
                last_transmit: Mutex::new(Instant::now()),
            }),
        }
    }

    pub fn config(&self) -> &ProtocolClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Receive every frame decoded from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DecodedFrame> {
        self.inner.frames.subscribe()
    }

    /// The queue that orders outbound commands.
    pub fn admission(&self) -> &AdmissionQueue {
        &self.inner.queue
    }

    /// Connect according to the configured mode.
    ///
    /// In direct mode this opens the panel connection and queues the two
    /// priming commands ahead of any later traffic. In satellite mode it
    /// starts the IPC link, which connects in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the panel refuses the connection or does not
    /// answer within the connect timeout. The client stays `Disconnected`
    /// and does not retry.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.inner.config.disabled {
            info!("[CONNECTION DISABLED] Not connecting to panel");
            return Ok(());
        }

        if self.is_connected() {
            debug!("Already connected, ignoring connect");
            return Ok(());
        }

        match self.inner.config.mode {
            CommMode::Telnet => self.connect_panel().await,
            CommMode::Ipc => {
                self.connect_satellite();
                Ok(())
            }
        }
    }

    async fn connect_panel(&self) -> Result<(), ClientError> {
        let addr = self.inner.config.panel_addr.clone();
        let timeout = self.inner.config.connect_timeout;

        info!("Connecting to panel at {}", addr);
        self.inner.set_state(ConnectionState::Connecting);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                info!("Connected to {}", addr);
                stream
            }
            Ok(Err(e)) => {
                error!("Connection to {} failed: {}", addr, e);
                self.inner.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
            Err(_) => {
                warn!("Connection timeout after {}ms", timeout.as_millis());
                self.inner.set_state(ConnectionState::Disconnected);
                return Err(ClientError::ConnectionTimeout(timeout.as_millis() as u64));
            }
        };

        // Commands are tiny; don't let Nagle hold them back
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        let (read, write) = stream.into_split();
        self.attach(read, write).await;
        Ok(())
    }

    /// Take over an established panel transport.
    ///
    /// Starts the reader task, moves to `Connected` and queues the priming
    /// commands (wake, then live dim-level monitoring) at high priority.
    pub async fn attach<R, W>(&self, reader: R, writer: W)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let writer: BoxedWriter = Box::pin(writer);
        *self.inner.writer.lock().await = Some(FramedWrite::new(writer, LightingCodec::new()));

        // Priming takes its place in line before anyone can see Connected
        let priming = [Command::wake(), Command::monitor_dim_levels()].map(|command| {
            let ticket = self.inner.queue.ticket(command.priority());
            (command, ticket)
        });

        // Connected before the reader starts, so a quick EOF is not overwritten
        self.inner.set_state(ConnectionState::Connected);

        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(read_panel(weak, FramedRead::new(reader, LightingCodec::new())));
        if let Some(previous) = self.inner.lock_reader().replace(task) {
            previous.abort();
        }
        debug!("Panel transport attached");

        for (command, ticket) in priming {
            drop(self.spawn_queued(command, ticket));
        }
    }

    fn connect_satellite(&self) {
        let config = self.inner.config.satellite.clone();
        info!(path = ?config.path, "Starting IPC satellite link");

        let weak = Arc::downgrade(&self.inner);
        let satellite = IpcSatellite::spawn(config, move |frame| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_frame(frame);
            }
        });

        *self.inner.lock_satellite() = Some(Arc::new(satellite));
        self.inner.set_state(ConnectionState::Connected);
    }

    /// Wait until the satellite link reaches the server.
    ///
    /// Returns immediately in direct mode.
    pub async fn wait_linked(&self) -> Result<(), ClientError> {
        let satellite = self.inner.lock_satellite().clone();
        match satellite {
            Some(satellite) => Ok(satellite.wait_linked().await?),
            None => Ok(()),
        }
    }

    /// Send a command and wait for it to complete.
    ///
    /// In direct mode this waits for an admission turn, writes the command,
    /// waits out the settle delay and releases the turn. In satellite mode it
    /// queues the command for the IPC server.
    ///
    /// Returns [`SendOutcome::Skipped`] without sending when the client is
    /// disabled or not connected.
    pub async fn send(&self, command: Command) -> Result<SendOutcome, ClientError> {
        match self.prepare(command) {
            Prepared::Queued(command, ticket) => {
                let grant = ticket.granted().await?;
                self.inner.transmit(command, grant).await
            }
            Prepared::Done(result) => result,
        }
    }

    /// Start sending a command without waiting.
    ///
    /// The command's place in the admission order is fixed when this
    /// returns. The handle resolves to the same result `send` would return;
    /// dropping it does not cancel the command.
    pub fn submit(&self, command: Command) -> JoinHandle<Result<SendOutcome, ClientError>> {
        match self.prepare(command) {
            Prepared::Queued(command, ticket) => self.spawn_queued(command, ticket),
            Prepared::Done(result) => tokio::spawn(async move { result }),
        }
    }

    fn spawn_queued(
        &self,
        command: Command,
        ticket: AdmissionTicket,
    ) -> JoinHandle<Result<SendOutcome, ClientError>> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let grant = ticket.granted().await?;
            inner.transmit(command, grant).await
        })
    }

    fn prepare(&self, command: Command) -> Prepared {
        if self.inner.config.disabled {
            info!("[CONNECTION DISABLED] {}", command);
            return Prepared::Done(Ok(SendOutcome::Skipped));
        }

        if !self.is_connected() {
            debug!("Not connected, skipping {}", command);
            return Prepared::Done(Ok(SendOutcome::Skipped));
        }

        let satellite = self.inner.lock_satellite().clone();
        if let Some(satellite) = satellite {
            let result = satellite
                .forward(&command)
                .map(|_| SendOutcome::Forwarded)
                .map_err(ClientError::from);
            return Prepared::Done(result);
        }

        let ticket = self.inner.queue.ticket(command.priority());
        Prepared::Queued(command, ticket)
    }

    /// Close the connection and return to `Disconnected`.
    ///
    /// Idempotent. Commands still waiting for a turn are skipped.
    pub async fn close(&self) {
        if let Some(reader) = self.inner.lock_reader().take() {
            reader.abort();
        }

        if let Some(satellite) = self.inner.lock_satellite().take() {
            info!("Stopping IPC satellite link");
            satellite.shutdown();
        }

        let writer = self.inner.writer.lock().await.take();
        if let Some(writer) = writer {
            info!("Closing connection to {}", self.inner.config.panel_addr);

            let mut stream = writer.into_inner();
            let shutdown_timeout = Duration::from_millis(500);
            match tokio::time::timeout(shutdown_timeout, stream.shutdown()).await {
                Ok(Ok(())) => debug!("Shutdown completed"),
                Ok(Err(e)) => warn!("Error during shutdown: {}", e),
                Err(_) => warn!(
                    "Shutdown timeout during close ({}ms)",
                    shutdown_timeout.as_millis()
                ),
            }
        }

        self.inner.set_state(ConnectionState::Disconnected);
    }
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .field("registry", &self.inner.registry)
            .finish()
    }
}

enum Prepared {
    Queued(Command, AdmissionTicket),
    Done(Result<SendOutcome, ClientError>),
}

impl ClientInner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            trace!(?previous, ?state, "Connection state changed");
        }
    }

    fn lock_reader(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_satellite(&self) -> std::sync::MutexGuard<'_, Option<Arc<IpcSatellite>>> {
        self.satellite.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn elapsed_ms(&self) -> u128 {
        self.last_transmit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
            .as_millis()
    }

    /// Write one command while holding the turn, then settle and release.
    async fn transmit(
        &self,
        command: Command,
        grant: AdmissionGrant,
    ) -> Result<SendOutcome, ClientError> {
        // The connection may have dropped while waiting for the turn
        if *self.state.borrow() != ConnectionState::Connected {
            debug!("Connection lost while queued, skipping {}", command);
            return Ok(SendOutcome::Skipped);
        }

        *self.last_transmit.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        info!(priority = %command.priority(), sequence = grant.sequence(), "XMT {}", command);

        let text = command.text().to_string();
        let result = {
            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                Some(writer) => writer.send(command).await.map_err(|source| ClientError::Send {
                    command: text,
                    source,
                }),
                None => Err(ClientError::NotConnected),
            }
        };

        if let Err(e) = &result {
            error!(elapsed_ms = self.elapsed_ms() as u64, "ERR {}", e);
        }

        tokio::time::sleep(self.config.settle_delay).await;
        grant.release();

        result.map(|()| SendOutcome::Transmitted)
    }

    fn handle_frame(&self, frame: DecodedFrame) {
        info!(
            counter = frame.counter,
            kind = %frame.kind,
            elapsed_ms = self.elapsed_ms() as u64,
            "RCV {}",
            frame.fields.join(", ")
        );

        if !self.registry.dispatch(&frame) {
            debug!(kind = %frame.kind, "No handler registered, frame dropped");
        }

        // Nobody listening is fine
        let _ = self.frames.send(frame);
    }

    async fn connection_lost(&self, reason: &str) {
        error!("Connection to panel lost: {}", reason);
        self.writer.lock().await.take();
        self.set_state(ConnectionState::Disconnected);
    }
}

/// Reader task: decode panel output until the connection ends.
async fn read_panel<R>(inner: Weak<ClientInner>, mut frames: FramedRead<R, LightingCodec>)
where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        let next = frames.next().await;
        let Some(client) = inner.upgrade() else {
            return;
        };

        match next {
            Some(Ok(frame)) => client.handle_frame(frame),
            Some(Err(e)) => break e.to_string(),
            None => break "panel closed the connection".to_string(),
        }
    };

    if let Some(inner) = inner.upgrade() {
        inner.connection_lost(&reason).await;
    }
}

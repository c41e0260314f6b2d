//! Integration tests for the IPC bridge
//!
//! A server-side ProtocolClient is attached to an in-memory panel; satellites
//! connect over a Unix socket in a temporary directory.

use hwi_core::{CanonicalAddress, CommMode, Priority};
use hwi_network::{IpcServer, ProtocolClient, ProtocolClientConfig, SatelliteConfig, SendOutcome};
use hwi_protocol::{Command, DecodedFrame, FrameKind, FrameRegistry, LightingEvent};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// Panel end of the server's connection.
struct MockPanel {
    stream: DuplexStream,
    pending: Vec<u8>,
}

impl MockPanel {
    async fn next_command(&mut self) -> String {
        loop {
            if let Some(end) = self.pending.iter().position(|b| *b == b'\r') {
                let line: Vec<u8> = self.pending.drain(..=end).collect();
                return String::from_utf8_lossy(&line[..end]).into_owned();
            }

            let mut buf = [0u8; 256];
            let n = timeout(WAIT, self.stream.read(&mut buf))
                .await
                .expect("Panel read timeout")
                .unwrap();
            assert!(n > 0, "client closed the connection");
            self.pending.extend_from_slice(&buf[..n]);
        }
    }

    async fn emit(&mut self, output: &str) {
        self.stream.write_all(output.as_bytes()).await.unwrap();
    }
}

struct Bridge {
    client: ProtocolClient,
    server: IpcServer,
    panel: MockPanel,
    _dir: TempDir,
}

impl Bridge {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bridge.sock");

        let config = ProtocolClientConfig {
            settle_delay: Duration::from_millis(5),
            ..Default::default()
        };
        let client = ProtocolClient::new(config, FrameRegistry::new());

        let (ours, panel) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(ours);
        client.attach(read, write).await;

        let mut panel = MockPanel {
            stream: panel,
            pending: Vec::new(),
        };
        assert_eq!(panel.next_command().await, "");
        assert_eq!(panel.next_command().await, "DLMON");

        let server = IpcServer::bind(&path, client.clone()).await.unwrap();

        Self {
            client,
            server,
            panel,
            _dir: dir,
        }
    }

    fn path(&self) -> PathBuf {
        self.server.path().to_path_buf()
    }

    async fn until_satellites(&self, count: usize) {
        timeout(WAIT, async {
            while self.server.satellite_count() != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("satellite count never settled");
    }
}

/// Satellite-mode client whose dim-level handler feeds a channel.
async fn satellite(path: &Path) -> (ProtocolClient, mpsc::UnboundedReceiver<LightingEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut registry = FrameRegistry::new();
    registry.register(FrameKind::DimLevel, move |frame: &DecodedFrame| {
        if let Ok(event) = frame.event() {
            let _ = tx.send(event);
        }
    });

    let config = ProtocolClientConfig {
        mode: CommMode::Ipc,
        satellite: SatelliteConfig {
            path: path.to_path_buf(),
            retry: Duration::from_millis(20),
        },
        ..Default::default()
    };

    let client = ProtocolClient::new(config, registry);
    client.connect().await.unwrap();
    timeout(WAIT, client.wait_linked())
        .await
        .expect("satellite never linked")
        .unwrap();

    (client, rx)
}

fn level(level: u8) -> LightingEvent {
    LightingEvent::DimLevel {
        address: CanonicalAddress::parse("1.1.0.2.4").unwrap(),
        level,
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<LightingEvent>) -> LightingEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("no event received")
        .unwrap()
}

#[tokio::test]
async fn test_satellite_command_reaches_panel() {
    let mut bridge = Bridge::start().await;
    let (satellite, _events) = satellite(&bridge.path()).await;
    bridge.until_satellites(1).await;

    let outcome = satellite
        .send(Command::fade_dim(40, 2, "1.1.2.4"))
        .await
        .unwrap();
    assert_eq!(outcome, SendOutcome::Forwarded);

    assert_eq!(bridge.panel.next_command().await, "FADEDIM, 40, 2, 0, [1.1.2.4]");
}

#[tokio::test]
async fn test_raw_requests_are_executed() {
    let mut bridge = Bridge::start().await;
    let path = bridge.path();

    // Hand-written requests in the deployed wire format
    let mut raw = UnixStream::connect(&path).await.unwrap();
    bridge.until_satellites(1).await;
    raw.write_all(
        b"{\"ipcCounter\":1,\"priority\":3,\"cmd\":\"RDL, [1.1.2.4]\"}\n\
          {\"ipcCounter\":2,\"priority\":1,\"cmd\":\"FADEDIM, 0, 0, 0, [1.1.2.4]\"}\n",
    )
    .await
    .unwrap();

    let first = bridge.panel.next_command().await;
    let second = bridge.panel.next_command().await;
    let mut commands = vec![first, second];
    commands.sort();
    assert_eq!(commands, vec!["FADEDIM, 0, 0, 0, [1.1.2.4]", "RDL, [1.1.2.4]"]);
}

#[tokio::test]
async fn test_frames_broadcast_to_every_satellite() {
    let mut bridge = Bridge::start().await;
    let (_first, mut first_events) = satellite(&bridge.path()).await;
    let (_second, mut second_events) = satellite(&bridge.path()).await;
    bridge.until_satellites(2).await;

    let infos = bridge.server.satellites();
    assert_eq!(infos.len(), 2);
    assert!(infos[0].id < infos[1].id);

    bridge.panel.emit("DL, [01:01:00:02:04], 65\r\n").await;

    assert_eq!(next_event(&mut first_events).await, level(65));
    assert_eq!(next_event(&mut second_events).await, level(65));
}

#[tokio::test]
async fn test_reconnected_satellite_misses_frames_broadcast_while_away() {
    let mut bridge = Bridge::start().await;
    let mut seen = bridge.client.subscribe();

    let (satellite, mut events) = satellite(&bridge.path()).await;
    bridge.until_satellites(1).await;

    bridge.panel.emit("DL, [01:01:00:02:04], 10\r").await;
    assert_eq!(next_event(&mut events).await, level(10));

    satellite.close().await;
    bridge.until_satellites(0).await;

    // Decoded and broadcast while nobody is connected
    bridge.panel.emit("DL, [01:01:00:02:04], 20\r").await;
    assert_eq!(seen.recv().await.unwrap().field(1), Some("10"));
    assert_eq!(seen.recv().await.unwrap().field(1), Some("20"));

    satellite.connect().await.unwrap();
    timeout(WAIT, satellite.wait_linked()).await.unwrap().unwrap();
    bridge.until_satellites(1).await;

    bridge.panel.emit("DL, [01:01:00:02:04], 30\r").await;
    assert_eq!(next_event(&mut events).await, level(30));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err(), "missed frame was replayed");
}

#[tokio::test]
async fn test_malformed_request_is_ignored() {
    let mut bridge = Bridge::start().await;

    let mut raw = UnixStream::connect(bridge.path()).await.unwrap();
    bridge.until_satellites(1).await;

    raw.write_all(b"not json\n{\"ipcCounter\":1}\n").await.unwrap();
    raw.write_all(b"{\"ipcCounter\":2,\"priority\":2,\"cmd\":\"RDL, [1.1.2.4]\"}\n")
        .await
        .unwrap();

    assert_eq!(bridge.panel.next_command().await, "RDL, [1.1.2.4]");
    assert_eq!(bridge.server.satellite_count(), 1);
}

#[tokio::test]
async fn test_oversized_request_keeps_connection() {
    let mut bridge = Bridge::start().await;

    let mut raw = UnixStream::connect(bridge.path()).await.unwrap();
    bridge.until_satellites(1).await;

    let mut oversized = vec![b'x'; 70 * 1024];
    oversized.push(b'\n');
    raw.write_all(&oversized).await.unwrap();
    raw.write_all(b"{\"ipcCounter\":2,\"priority\":2,\"cmd\":\"RDL, [1.1.2.4]\"}\n")
        .await
        .unwrap();

    assert_eq!(bridge.panel.next_command().await, "RDL, [1.1.2.4]");
    assert_eq!(bridge.server.satellite_count(), 1);
}

#[tokio::test]
async fn test_broadcast_wire_layout() {
    let mut bridge = Bridge::start().await;

    let raw = UnixStream::connect(bridge.path()).await.unwrap();
    bridge.until_satellites(1).await;

    bridge.panel.emit("L232> DL, [01:01:00:02:04], 40\r\n").await;

    let mut lines = BufReader::new(raw).lines();
    let line = timeout(WAIT, lines.next_line())
        .await
        .expect("no broadcast received")
        .unwrap()
        .unwrap();

    let output: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(output["outType"], 1);
    assert_eq!(
        output["matches"],
        serde_json::json!(["DL, [01:01:00:02:04], 40", "01:01:00:02:04", "40"])
    );
}

#[tokio::test]
async fn test_satellite_disconnect_during_broadcast_is_harmless() {
    let mut bridge = Bridge::start().await;

    let raw = UnixStream::connect(bridge.path()).await.unwrap();
    let (_satellite, mut events) = satellite(&bridge.path()).await;
    bridge.until_satellites(2).await;

    drop(raw);
    bridge.panel.emit("DL, [01:01:00:02:04], 5\r").await;

    assert_eq!(next_event(&mut events).await, level(5));
    bridge.until_satellites(1).await;
}

#[tokio::test]
async fn test_satellite_buffers_until_server_appears() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("late.sock");

    let config = ProtocolClientConfig {
        mode: CommMode::Ipc,
        satellite: SatelliteConfig {
            path: path.clone(),
            retry: Duration::from_millis(20),
        },
        ..Default::default()
    };
    let satellite = ProtocolClient::new(config, FrameRegistry::new());
    satellite.connect().await.unwrap();

    let outcome = satellite
        .send(Command::new("RDL, [1.1.2.4]", Priority::Standard))
        .await
        .unwrap();
    assert_eq!(outcome, SendOutcome::Forwarded);

    // Server comes up afterwards
    let client = ProtocolClient::new(
        ProtocolClientConfig {
            settle_delay: Duration::from_millis(5),
            ..Default::default()
        },
        FrameRegistry::new(),
    );
    let (ours, panel) = tokio::io::duplex(4096);
    let (read, write) = tokio::io::split(ours);
    client.attach(read, write).await;
    let mut panel = MockPanel {
        stream: panel,
        pending: Vec::new(),
    };
    let _server = IpcServer::bind(&path, client.clone()).await.unwrap();

    assert_eq!(panel.next_command().await, "");
    assert_eq!(panel.next_command().await, "DLMON");
    assert_eq!(panel.next_command().await, "RDL, [1.1.2.4]");
}

#[tokio::test]
async fn test_socket_lifecycle() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stale.sock");

    // Stale socket from an earlier run
    let stale = std::os::unix::net::UnixListener::bind(&path).unwrap();
    drop(stale);
    assert!(path.exists());

    let client = ProtocolClient::new(ProtocolClientConfig::default(), FrameRegistry::new());
    let server = IpcServer::bind(&path, client.clone()).await.unwrap();
    assert!(path.exists());

    drop(server);
    assert!(!path.exists(), "socket file should be removed on drop");

    // Never clobber a regular file
    let file = dir.path().join("config.json");
    std::fs::write(&file, "{}").unwrap();
    assert!(IpcServer::bind(&file, client).await.is_err());
    assert!(file.exists());
}

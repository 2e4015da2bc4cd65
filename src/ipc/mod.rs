//! IPC between the bubble daemon and host applications
//!
//! Uses a Unix socket with one JSON document per line. Every command gets
//! one response line; a `subscribe` command turns the connection into an
//! event stream.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeCommand, BridgeResponse, E_BAD_REQUEST, OverlayBridge};
use crate::events::BridgeEvent;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("Failed to bind socket at {path:?}: {source}")]
    Bind { path: PathBuf, source: io::Error },
    #[error("Socket I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Daemon closed the connection")]
    Closed,
}

/// Socket path for IPC
pub fn socket_path() -> PathBuf {
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/run/user/{}/spark-bubble.sock", uid))
}

/// Bind the daemon socket, removing a stale one first.
pub fn bind(path: &Path) -> Result<UnixListener, IpcError> {
    let _ = std::fs::remove_file(path);
    UnixListener::bind(path).map_err(|source| IpcError::Bind {
        path: path.to_path_buf(),
        source,
    })
}

/// Accept connections until the listener fails.
pub async fn serve(listener: UnixListener, bridge: OverlayBridge) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let bridge = bridge.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, bridge).await {
                        debug!("Connection ended: {}", e);
                    }
                });
            }
            Err(e) => {
                warn!("Failed to accept IPC connection: {}", e);
                return;
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, bridge: OverlayBridge) -> Result<(), IpcError> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match serde_json::from_str::<BridgeCommand>(&line) {
            Ok(command) => command,
            Err(e) => {
                warn!("Rejecting malformed command: {}", e);
                write_line(&mut write, &BridgeResponse::error(E_BAD_REQUEST, e.to_string())).await?;
                continue;
            }
        };

        if command == BridgeCommand::Subscribe {
            // listening starts before the ack so nothing emitted after it is missed
            let (events, pending) = bridge.subscribe();
            info!("Host subscribed to bubble events");
            write_line(&mut write, &BridgeResponse::Ack).await?;
            if let Some(intent) = pending {
                write_line(&mut write, &BridgeEvent::RouteIntent(intent)).await?;
            }
            return stream_events(lines, write, events).await;
        }
        let response = bridge.handle(command).await;
        write_line(&mut write, &response).await?;
    }
    Ok(())
}

/// Forward events until the subscriber hangs up.
async fn stream_events<W: AsyncWrite + Unpin>(
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    mut write: W,
    mut events: broadcast::Receiver<BridgeEvent>,
) -> Result<(), IpcError> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => write_line(&mut write, &event).await?,
                Err(RecvError::Lagged(missed)) => warn!("Subscriber missed {} events", missed),
                Err(RecvError::Closed) => return Ok(()),
            },
            line = lines.next_line() => {
                if line?.is_none() {
                    info!("Host unsubscribed");
                    return Ok(());
                }
            }
        }
    }
}

async fn write_line<W, T>(write: &mut W, value: &T) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    write.write_all(&line).await?;
    write.flush().await?;
    Ok(())
}

/// Send one command to the running daemon and wait for its response
pub async fn send_command(path: &Path, command: &BridgeCommand) -> Result<BridgeResponse, IpcError> {
    let stream = UnixStream::connect(path).await?;
    let (read, mut write) = stream.into_split();
    write_line(&mut write, command).await?;

    let mut lines = BufReader::new(read).lines();
    let line = lines.next_line().await?.ok_or(IpcError::Closed)?;
    Ok(serde_json::from_str(&line)?)
}

/// Client side of a `subscribe` connection
pub struct EventStream {
    lines: Lines<BufReader<OwnedReadHalf>>,
    // keeps the connection open; dropping it unsubscribes
    _write: tokio::net::unix::OwnedWriteHalf,
}

impl EventStream {
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(path).await?;
        let (read, mut write) = stream.into_split();
        write_line(&mut write, &BridgeCommand::Subscribe).await?;

        let mut lines = BufReader::new(read).lines();
        let ack = lines.next_line().await?.ok_or(IpcError::Closed)?;
        match serde_json::from_str::<BridgeResponse>(&ack)? {
            BridgeResponse::Ack => Ok(Self {
                lines,
                _write: write,
            }),
            other => Err(IpcError::Io(io::Error::other(format!(
                "unexpected subscribe response: {:?}",
                other
            )))),
        }
    }

    /// Next event, or `None` once the daemon goes away.
    pub async fn next(&mut self) -> Result<Option<BridgeEvent>, IpcError> {
        match self.lines.next_line().await? {
            Some(line) => Ok(Some(serde_json::from_str(&line)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventEmitter;
    use crate::menu::RouteIntent;
    use crate::permission::{OverlayPermissions, PermissionGate, SettingsReturn};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Granted;

    impl OverlayPermissions for Granted {
        fn can_draw_overlays(&self) -> bool {
            true
        }
        fn has_foreground_host(&self) -> bool {
            true
        }
        fn launch_settings(&self, _on_return: SettingsReturn) -> Result<(), String> {
            Ok(())
        }
    }

    /// Daemon socket backed by a bridge whose UI side is never drained
    fn daemon(dir: &Path) -> (PathBuf, OverlayBridge, mpsc::UnboundedReceiver<crate::service::UiRequest>) {
        let path = dir.join("bubble.sock");
        let events = EventEmitter::new();
        let gate = PermissionGate::new(Arc::new(Granted), events.clone(), Duration::from_secs(20));
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let bridge = OverlayBridge::new(ui_tx, gate, events, None);
        let listener = bind(&path).unwrap();
        tokio::spawn(serve(listener, bridge.clone()));
        (path, bridge, ui_rx)
    }

    #[tokio::test]
    async fn malformed_lines_get_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _bridge, _ui) = daemon(dir.path());

        let stream = UnixStream::connect(&path).await.unwrap();
        let (read, mut write) = stream.into_split();
        write.write_all(b"{\"type\":\"explode\"}\n").await.unwrap();
        let mut lines = BufReader::new(read).lines();
        let reply: BridgeResponse = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        match reply {
            BridgeResponse::Error(body) => assert_eq!(body.code, E_BAD_REQUEST),
            other => panic!("unexpected response {other:?}"),
        }

        // the connection stays usable
        write_line(&mut write, &BridgeCommand::CanDrawOverlays).await.unwrap();
        let reply: BridgeResponse = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply, BridgeResponse::Bool(true));
    }

    #[tokio::test]
    async fn subscriber_receives_held_route_then_live_events() {
        let dir = tempfile::tempdir().unwrap();
        let (path, bridge, _ui) = daemon(dir.path());

        let held = BridgeCommand::RouteIntent {
            route: "CBTGuide".into(),
            auto_record: false,
        };
        assert_eq!(send_command(&path, &held).await.unwrap(), BridgeResponse::Ack);

        let mut stream = EventStream::connect(&path).await.unwrap();
        assert_eq!(
            stream.next().await.unwrap(),
            Some(BridgeEvent::RouteIntent(RouteIntent::new("CBTGuide", false).unwrap()))
        );

        bridge.deliver_route(RouteIntent::new("Tasks", true).unwrap());
        assert_eq!(
            stream.next().await.unwrap(),
            Some(BridgeEvent::RouteIntent(RouteIntent::new("Tasks", true).unwrap()))
        );
    }

    #[tokio::test]
    async fn stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bubble.sock");
        std::fs::write(&path, b"stale").unwrap();
        assert!(bind(&path).is_ok());
    }
}

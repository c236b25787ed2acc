//! TCP client for a Parla server
//!
//! Used by speaker/viewer front-ends and by the server's own tests. Every
//! server push and reply is surfaced through [`Client::next_event`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parla_core::LangCode;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{ClientMessage, ServerMessage};

/// Keepalive ping interval, well under the server's idle timeout
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Default read limit; join replies carry the whole room history
pub const CLIENT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Connection settings
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub keepalive: Duration,
    /// Largest frame accepted from the server
    pub max_frame_bytes: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            keepalive: KEEPALIVE_INTERVAL,
            max_frame_bytes: CLIENT_MAX_FRAME_SIZE,
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Client handle for network operations
pub struct Client {
    state: Arc<RwLock<ConnectionState>>,
    event_rx: mpsc::Receiver<ServerMessage>,
    cmd_tx: mpsc::Sender<ClientCommand>,
    next_request_id: AtomicU64,
}

enum ClientCommand {
    Send(ClientMessage),
    Disconnect,
}

impl Client {
    /// Connect to a server
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with(addr, ClientOptions::default()).await
    }

    pub async fn connect_with(addr: SocketAddr, options: ClientOptions) -> Result<Self> {
        info!(addr = %addr, "Connecting to server");

        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = tokio::io::split(stream);

        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let (event_tx, event_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        tokio::spawn(connection_task(
            reader,
            writer,
            state.clone(),
            event_tx,
            cmd_rx,
            options,
        ));

        Ok(Client {
            state,
            event_rx,
            cmd_tx,
            next_request_id: AtomicU64::new(1),
        })
    }

    /// Get the next message from the server; `None` once disconnected
    pub async fn next_event(&mut self) -> Option<ServerMessage> {
        self.event_rx.recv().await
    }

    /// Send a raw protocol message
    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        self.cmd_tx
            .send(ClientCommand::Send(msg))
            .await
            .map_err(|_| Error::NotConnected)
    }

    fn request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Pre-register a room; returns the request id echoed in the reply
    pub async fn create_room(&self, room_id: &str, password: &str) -> Result<u64> {
        let request_id = self.request_id();
        self.send(ClientMessage::CreateRoom {
            request_id,
            room_id: room_id.to_string(),
            password: password.to_string(),
        })
        .await?;
        Ok(request_id)
    }

    pub async fn join_as_speaker(
        &self,
        room_id: &str,
        password: &str,
        admin_secret: Option<&str>,
    ) -> Result<u64> {
        let request_id = self.request_id();
        self.send(ClientMessage::JoinRoom {
            request_id,
            room_id: room_id.to_string(),
            password: Some(password.to_string()),
            is_speaker: true,
            admin_secret: admin_secret.map(str::to_string),
        })
        .await?;
        Ok(request_id)
    }

    pub async fn join_as_viewer(&self, room_id: &str) -> Result<u64> {
        let request_id = self.request_id();
        self.send(ClientMessage::JoinRoom {
            request_id,
            room_id: room_id.to_string(),
            password: None,
            is_speaker: false,
            admin_secret: None,
        })
        .await?;
        Ok(request_id)
    }

    pub async fn get_rooms(&self) -> Result<u64> {
        let request_id = self.request_id();
        self.send(ClientMessage::GetRooms { request_id }).await?;
        Ok(request_id)
    }

    pub async fn transcribe(&self, room_id: &str, transcript: &str, source_lang: &str) -> Result<()> {
        self.send(ClientMessage::TranscribeData {
            room_id: room_id.to_string(),
            transcript: transcript.to_string(),
            source_lang: source_lang.to_string(),
        })
        .await
    }

    pub async fn request_translation(
        &self,
        room_id: &str,
        message_id: Uuid,
        target_lang: LangCode,
    ) -> Result<()> {
        self.send(ClientMessage::RequestTranslation {
            room_id: room_id.to_string(),
            message_id,
            target_lang,
        })
        .await
    }

    /// Send a ping
    pub async fn ping(&self) -> Result<()> {
        self.send(ClientMessage::Ping).await
    }

    /// Disconnect from the server
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect).await;
    }

    /// Get current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }
}

/// Forward decoded frames so the main loop never cancels a partial read
async fn reader_task(
    mut reader: ReadHalf<TcpStream>,
    frames: mpsc::Sender<Result<ServerMessage>>,
    max_frame: u32,
) {
    loop {
        let result = read_frame(&mut reader, max_frame).await;
        let failed = result.is_err();
        if frames.send(result).await.is_err() || failed {
            break;
        }
    }
}

/// Main connection task
async fn connection_task(
    reader: ReadHalf<TcpStream>,
    mut writer: WriteHalf<TcpStream>,
    state: Arc<RwLock<ConnectionState>>,
    event_tx: mpsc::Sender<ServerMessage>,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
    options: ClientOptions,
) {
    let (frame_tx, mut frame_rx) = mpsc::channel(64);
    let reader_handle = tokio::spawn(reader_task(reader, frame_tx, options.max_frame_bytes));

    let mut keepalive = tokio::time::interval(options.keepalive);
    keepalive.tick().await;

    loop {
        tokio::select! {
            // Incoming message from server
            frame = frame_rx.recv() => {
                match frame {
                    Some(Ok(msg)) => {
                        if event_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(Error::ConnectionClosed)) | None => {
                        debug!("Server closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Read error");
                        break;
                    }
                }
            }

            // Outgoing command
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Send(msg)) => {
                        if let Err(e) = write_frame(&mut writer, &msg).await {
                            warn!(error = %e, "Write error");
                            break;
                        }
                    }
                    Some(ClientCommand::Disconnect) | None => {
                        debug!("Disconnect requested");
                        break;
                    }
                }
            }

            _ = keepalive.tick() => {
                if let Err(e) = write_frame(&mut writer, &ClientMessage::Ping).await {
                    warn!(error = %e, "Keepalive failed");
                    break;
                }
            }
        }
    }

    reader_handle.abort();
    let _ = writer.shutdown().await;
    *state.write().await = ConnectionState::Disconnected;
    info!("Disconnected from server");
}

//! TCP server for the room coordinator
//!
//! Each connection gets a writer task fed by an outbound queue and a
//! transcription worker that ingests that connection's utterances one at a
//! time, in the order they arrived. Everything else is answered inline.
//!
//! Delivery never waits on a peer: a connection whose outbound queue is full
//! or whose socket write fails is evicted and handled as a disconnect.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use parla_core::{ConnId, Coordinator, Departure, JoinOutcome};
use tokio::io::WriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Notify, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::DEFAULT_PORT;

/// Outbound messages buffered per connection
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// Utterances buffered per connection while a previous one is translated
const INGEST_QUEUE: usize = 64;

/// How long a closing connection may spend flushing its outbound queue
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Listener settings
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub bind_addr: SocketAddr,
    /// A connection that sends nothing for this long is dropped
    pub idle_timeout: Duration,
    /// Largest inbound frame; outbound frames are not limited
    pub max_frame_bytes: u32,
    /// Pending outbound messages before a client counts as stalled
    pub outbound_queue: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            idle_timeout: Duration::from_secs(60),
            max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

struct Utterance {
    room_id: String,
    transcript: String,
    source_lang: String,
}

/// Live connection as seen by the delivery helpers
#[derive(Clone)]
struct Peer {
    tx: mpsc::Sender<ServerMessage>,
    /// Wakes the connection task to close the connection
    evict: Arc<Notify>,
}

/// Server state shared across tasks
struct ServerState {
    coordinator: Arc<Coordinator>,
    peers: RwLock<HashMap<ConnId, Peer>>,
    options: ServerOptions,
}

/// Server handle
pub struct Server {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind and start accepting connections
    pub async fn start(coordinator: Arc<Coordinator>, options: ServerOptions) -> Result<Self> {
        let listener = TcpListener::bind(options.bind_addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "Server started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(ServerState {
            coordinator,
            peers: RwLock::new(HashMap::new()),
            options,
        });

        tokio::spawn(accept_loop(listener, state.clone(), shutdown_tx.clone()));

        Ok(Server {
            addr: bound_addr,
            state,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.state.coordinator
    }

    /// Number of live connections
    pub async fn connection_count(&self) -> usize {
        self.state.peers.read().await.len()
    }

    /// Tell every client the server is going away, then close all connections
    pub async fn shutdown(&self) {
        broadcast_all(&self.state, ServerMessage::ServerShutdown).await;
        let _ = self.shutdown_tx.send(());
        info!("Server shutdown initiated");
    }
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "Accepted connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            state.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept error");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let conn = ConnId::new();
    let (mut reader, writer) = tokio::io::split(stream);
    let max_frame = state.options.max_frame_bytes;

    let evict = Arc::new(Notify::new());
    let (msg_tx, msg_rx) = mpsc::channel(state.options.outbound_queue);
    state.peers.write().await.insert(
        conn,
        Peer {
            tx: msg_tx.clone(),
            evict: evict.clone(),
        },
    );
    let mut writer_handle = tokio::spawn(writer_task(writer, msg_rx, conn, evict.clone()));

    let (ingest_tx, ingest_rx) = mpsc::channel(INGEST_QUEUE);
    tokio::spawn(transcription_worker(state.clone(), conn, ingest_rx));

    info!(addr = %addr, conn_id = %conn, "Client connected");

    loop {
        let frame = tokio::select! {
            result = tokio::time::timeout(
                state.options.idle_timeout,
                read_frame::<_, ClientMessage>(&mut reader, max_frame),
            ) => result,
            _ = evict.notified() => {
                info!(conn_id = %conn, "Evicting client that stopped accepting messages");
                break;
            }
            _ = shutdown_rx.recv() => {
                debug!(conn_id = %conn, "Closing connection for shutdown");
                break;
            }
        };

        match frame {
            Ok(Ok(msg)) => {
                if dispatch(msg, conn, &state, &ingest_tx).await.is_break() {
                    break;
                }
            }
            Ok(Err(Error::ConnectionClosed)) => {
                debug!(conn_id = %conn, "Client closed connection");
                break;
            }
            Ok(Err(e)) => {
                warn!(conn_id = %conn, error = %e, "Dropping client after read error");
                break;
            }
            Err(_) => {
                let e = Error::IdleTimeout(state.options.idle_timeout);
                info!(conn_id = %conn, error = %e, "Dropping idle client");
                break;
            }
        }
    }

    drop(ingest_tx);
    state.peers.write().await.remove(&conn);

    if let Some(departure) = state.coordinator.presence().on_disconnect(conn).await {
        announce_departure(&state, &departure).await;
    }

    // Let queued replies (e.g. server_shutdown) reach the socket
    drop(msg_tx);
    if tokio::time::timeout(WRITER_DRAIN, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    info!(addr = %addr, conn_id = %conn, "Client disconnected");
}

/// Route one request; transcripts go to the connection's ingest worker
async fn dispatch(
    msg: ClientMessage,
    conn: ConnId,
    state: &ServerState,
    ingest_tx: &mpsc::Sender<Utterance>,
) -> ControlFlow<()> {
    let coordinator = &state.coordinator;

    match msg {
        ClientMessage::TranscribeData {
            room_id,
            transcript,
            source_lang,
        } => {
            let utterance = Utterance {
                room_id,
                transcript,
                source_lang,
            };
            if ingest_tx.send(utterance).await.is_err() {
                return ControlFlow::Break(());
            }
        }

        ClientMessage::CreateRoom {
            request_id,
            room_id,
            password,
        } => match coordinator.authority().create_room(&room_id, &password).await {
            Ok(room_id) => {
                send_to(
                    state,
                    conn,
                    ServerMessage::CreateRoomResult {
                        request_id,
                        success: true,
                        room_id: Some(room_id),
                        message: None,
                    },
                )
                .await;
                publish_directory(state).await;
            }
            Err(e) => {
                debug!(conn_id = %conn, room_id = %room_id, error = %e, "Room creation refused");
                send_to(
                    state,
                    conn,
                    ServerMessage::CreateRoomResult {
                        request_id,
                        success: false,
                        room_id: None,
                        message: Some(e.to_string()),
                    },
                )
                .await;
            }
        },

        ClientMessage::JoinRoom {
            request_id,
            room_id,
            password,
            is_speaker,
            admin_secret,
        } => {
            let authority = coordinator.authority();
            let result = if is_speaker {
                authority
                    .join_as_speaker(
                        &room_id,
                        password.as_deref().unwrap_or_default(),
                        conn,
                        admin_secret.as_deref(),
                    )
                    .await
            } else {
                authority.join_as_viewer(&room_id, conn).await
            };

            match result {
                Ok(outcome) => {
                    let stale = outcome.created || outcome.membership_changed;
                    if let Some(previous) = &outcome.previous {
                        notify_speaker_left(state, previous).await;
                    }
                    send_to(state, conn, join_reply(request_id, outcome)).await;
                    if stale {
                        publish_directory(state).await;
                    }
                }
                Err(e) => {
                    debug!(conn_id = %conn, room_id = %room_id, error = %e, "Join refused");
                    send_to(state, conn, ServerMessage::join_failed(request_id, e.to_string())).await;
                }
            }
        }

        ClientMessage::GetRooms { request_id } => {
            let rooms = coordinator.directory().snapshot().await;
            send_to(state, conn, ServerMessage::RoomList { request_id, rooms }).await;
        }

        ClientMessage::RequestTranslation {
            room_id,
            message_id,
            target_lang,
        } => {
            let reply = match coordinator
                .request_translation(&room_id, conn, message_id, &target_lang)
                .await
            {
                Ok(translated_text) => ServerMessage::TranslatedMessage {
                    original_message_id: message_id,
                    translated_text,
                    target_lang,
                },
                Err(e) => ServerMessage::TranslationError {
                    message_id,
                    error: e.to_string(),
                    target_lang,
                },
            };
            send_to(state, conn, reply).await;
        }

        ClientMessage::Ping => send_to(state, conn, ServerMessage::Pong).await,
    }

    ControlFlow::Continue(())
}

fn join_reply(request_id: u64, outcome: JoinOutcome) -> ServerMessage {
    ServerMessage::JoinRoomResult {
        request_id,
        success: true,
        room_id: Some(outcome.room_id),
        is_speaker: outcome.is_speaker,
        messages: outcome.messages,
        message: outcome.notice,
    }
}

/// Ingest one connection's utterances sequentially
async fn transcription_worker(
    state: Arc<ServerState>,
    conn: ConnId,
    mut utterances: mpsc::Receiver<Utterance>,
) {
    let pipeline = state.coordinator.pipeline();

    while let Some(utterance) = utterances.recv().await {
        let result = pipeline
            .ingest(
                &utterance.room_id,
                conn,
                &utterance.transcript,
                &utterance.source_lang,
            )
            .await;

        match result {
            Ok(ingested) => {
                let msg = ServerMessage::NewTranscription(ingested.message.clone());
                send_to_many(&state, &ingested.recipients, msg).await;
                // The room's next utterance may proceed once `ingested` drops
            }
            Err(e) => {
                debug!(conn_id = %conn, room_id = %utterance.room_id, error = %e, "Transcript rejected");
                send_to(
                    &state,
                    conn,
                    ServerMessage::TranscriptionError {
                        error: e.to_string(),
                    },
                )
                .await;
            }
        }
    }
}

/// Drain one connection's outbound queue onto its socket
async fn writer_task(
    mut writer: WriteHalf<TcpStream>,
    mut rx: mpsc::Receiver<ServerMessage>,
    conn: ConnId,
    evict: Arc<Notify>,
) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            warn!(conn_id = %conn, error = %e, "Write error, closing connection");
            evict.notify_one();
            break;
        }
    }
}

async fn announce_departure(state: &ServerState, departure: &Departure) {
    notify_speaker_left(state, departure).await;
    publish_directory(state).await;
}

async fn notify_speaker_left(state: &ServerState, departure: &Departure) {
    if let Some(notice) = departure.speaker_left_notice() {
        let msg = ServerMessage::SpeakerLeft {
            message: notice.to_string(),
        };
        send_to_many(state, &departure.remaining, msg).await;
    }
}

/// Push the current directory to every connection
async fn publish_directory(state: &ServerState) {
    let rooms = state.coordinator.directory().snapshot().await;
    broadcast_all(state, ServerMessage::RoomsUpdated { rooms }).await;
}

async fn send_to(state: &ServerState, conn: ConnId, msg: ServerMessage) {
    send_to_many(state, &[conn], msg).await;
}

async fn send_to_many(state: &ServerState, conns: &[ConnId], msg: ServerMessage) {
    let targets: Vec<_> = {
        let peers = state.peers.read().await;
        conns
            .iter()
            .filter_map(|c| peers.get(c).map(|p| (*c, p.clone())))
            .collect()
    };
    deliver(targets, &msg);
}

async fn broadcast_all(state: &ServerState, msg: ServerMessage) {
    let targets: Vec<_> = state
        .peers
        .read()
        .await
        .iter()
        .map(|(c, p)| (*c, p.clone()))
        .collect();
    deliver(targets, &msg);
}

/// Queue `msg` for each peer without waiting; stalled peers are evicted
fn deliver(targets: Vec<(ConnId, Peer)>, msg: &ServerMessage) {
    for (conn, peer) in targets {
        match peer.tx.try_send(msg.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %conn, "Outbound queue full, evicting slow client");
                peer.evict.notify_one();
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = %conn, "Peer queue closed, message dropped");
            }
        }
    }
}

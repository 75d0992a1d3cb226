use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use glam::Vec3;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};

use physync::codec::framing;
use physync::{ClientId, CodecError, Frame, Message, RoomManagerError};

use crate::events::ServerEvent;
use crate::room_actor::{self, RoomCommand};

pub struct Shared {
    next_client_id: AtomicU64,
    rooms: Mutex<HashMap<String, mpsc::Sender<RoomCommand>>>,
    connections: Mutex<HashMap<ClientId, ConnectionInfo>>,
    pub events: broadcast::Sender<ServerEvent>,
    pub tick_rate: u32,
}

struct ConnectionInfo {
    room_id: Option<String>,
}

impl Shared {
    pub fn new(tick_rate: u32) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            next_client_id: AtomicU64::new(1),
            rooms: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            events,
            tick_rate,
        })
    }

    fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }
}

/// Drives one accepted TCP connection for its whole lifetime: a reader loop
/// decoding inbound frames and a writer task draining an outbound mailbox.
/// The two run concurrently so a slow reader never blocks a broadcast and
/// vice versa.
pub async fn handle_connection(stream: TcpStream, shared: Arc<Shared>) {
    let addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    let client_id = shared.next_client_id.fetch_add(1, Ordering::SeqCst);
    shared.emit(ServerEvent::ClientConnected { client_id, addr: addr.clone() });

    let (reader, writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel::<Vec<u8>>(256);
    spawn_writer(writer, rx);

    shared
        .connections
        .lock()
        .await
        .insert(client_id, ConnectionInfo { room_id: None });

    if let Err(err) = read_loop(reader, client_id, tx.clone(), &shared).await {
        log::warn!("connection {client_id} ({addr}) read error: {err}");
    }

    let info = shared.connections.lock().await.remove(&client_id);
    if let Some(ConnectionInfo { room_id: Some(room_id) }) = info {
        leave_room(&shared, &room_id, client_id).await;
    }
    shared.emit(ServerEvent::ClientDisconnected { client_id });
}

fn spawn_writer(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<Vec<u8>>) {
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if framing::write_frame(&mut writer, &bytes).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });
}

async fn read_loop(
    mut reader: ReadHalf<TcpStream>,
    client_id: ClientId,
    outbound: mpsc::Sender<Vec<u8>>,
    shared: &Arc<Shared>,
) -> std::io::Result<()> {
    loop {
        match framing::read_decoded(&mut reader).await? {
            None => return Ok(()),
            Some(Ok(Frame::Message(message))) => {
                handle_message(client_id, message, &outbound, shared).await;
            }
            Some(Ok(Frame::RoomState(_))) => {
                send_error(&outbound, "Invalid message format").await;
            }
            Some(Err(CodecError::Truncated | CodecError::Malformed(_))) => {
                send_error(&outbound, "Invalid message format").await;
            }
        }
    }
}

async fn send_error(outbound: &mpsc::Sender<Vec<u8>>, message: &str) {
    if let Ok(bytes) = physync::encode_message(&Message::Error { message: message.to_string() }) {
        let _ = outbound.send(bytes).await;
    }
}

async fn send_message(outbound: &mpsc::Sender<Vec<u8>>, message: &Message) {
    if let Ok(bytes) = physync::encode_message(message) {
        let _ = outbound.send(bytes).await;
    }
}

async fn handle_message(
    client_id: ClientId,
    message: Message,
    outbound: &mpsc::Sender<Vec<u8>>,
    shared: &Arc<Shared>,
) {
    match message {
        Message::ClockSyncRequest { client_timestamp } => {
            send_message(
                outbound,
                &Message::ClockSyncResponse { client_timestamp, server_timestamp: now_ms() },
            )
            .await;
        }
        Message::CreateRoom { room_id, initial_bodies, gravity, initial_constraints } => {
            let mut rooms = shared.rooms.lock().await;
            if rooms.contains_key(&room_id) {
                drop(rooms);
                send_error(outbound, &RoomManagerError::DuplicateRoomId(room_id).to_string()).await;
                return;
            }
            let mailbox = room_actor::spawn(
                room_id.clone(),
                initial_bodies,
                initial_constraints,
                gravity.unwrap_or(Vec3::new(0.0, -9.81, 0.0)),
                shared.tick_rate,
            );
            rooms.insert(room_id.clone(), mailbox);
            drop(rooms);
            shared.emit(ServerEvent::RoomCreated { room_id: room_id.clone() });
            send_message(outbound, &Message::RoomCreated { room_id }).await;
        }
        Message::JoinRoom { room_id } => {
            let mailbox = shared.rooms.lock().await.get(&room_id).cloned();
            let Some(mailbox) = mailbox else {
                send_error(outbound, &format!("room '{room_id}' does not exist")).await;
                return;
            };
            let (reply_tx, reply_rx) = oneshot::channel();
            if mailbox
                .send(RoomCommand::Join { client_id, sender: outbound.clone(), reply: reply_tx })
                .await
                .is_err()
            {
                send_error(outbound, "room is no longer available").await;
                return;
            }
            let Ok((snapshot, body_id_map, simulation_running)) = reply_rx.await else {
                send_error(outbound, "room is no longer available").await;
                return;
            };

            if let Some(info) = shared.connections.lock().await.get_mut(&client_id) {
                info.room_id = Some(room_id.clone());
            }
            shared.emit(ServerEvent::ClientJoinedRoom { client_id, room_id: room_id.clone() });
            send_message(
                outbound,
                &Message::RoomJoined { room_id, snapshot, client_id, simulation_running, body_id_map },
            )
            .await;
        }
        Message::LeaveRoom => {
            let room_id = shared
                .connections
                .lock()
                .await
                .get_mut(&client_id)
                .and_then(|info| info.room_id.take());
            if let Some(room_id) = room_id {
                leave_room(shared, &room_id, client_id).await;
            }
        }
        Message::ClientInput { input } => {
            if let Some(mailbox) = current_room_mailbox(shared, client_id).await {
                let _ = mailbox.send(RoomCommand::ClientInput { client_id, input }).await;
            }
        }
        Message::AddBody { body } => {
            if let Some(mailbox) = current_room_mailbox(shared, client_id).await {
                let (reply_tx, reply_rx) = oneshot::channel();
                if mailbox.send(RoomCommand::AddBody { body, reply: reply_tx }).await.is_ok() {
                    if let Ok(Err(err)) = reply_rx.await {
                        send_error(outbound, &err.to_string()).await;
                    }
                }
            }
        }
        Message::RemoveBody { body_id } => {
            if let Some(mailbox) = current_room_mailbox(shared, client_id).await {
                let (reply_tx, reply_rx) = oneshot::channel();
                if mailbox.send(RoomCommand::RemoveBody { body_id, reply: reply_tx }).await.is_ok() {
                    if let Ok(Err(err)) = reply_rx.await {
                        send_error(outbound, &err.to_string()).await;
                    }
                }
            }
        }
        Message::StartSimulation => {
            if let Some(mailbox) = current_room_mailbox(shared, client_id).await {
                let _ = mailbox.send(RoomCommand::StartSimulation).await;
            }
        }
        Message::BodyEvent { .. } => {
            // Accepted as a known wire verb; not wired to an effect. See
            // the input-tick-mapping note in DESIGN.md.
        }
        _ => {
            send_error(outbound, "Invalid message format").await;
        }
    }
}

async fn current_room_mailbox(shared: &Arc<Shared>, client_id: ClientId) -> Option<mpsc::Sender<RoomCommand>> {
    let room_id = shared.connections.lock().await.get(&client_id)?.room_id.clone()?;
    shared.rooms.lock().await.get(&room_id).cloned()
}

async fn leave_room(shared: &Arc<Shared>, room_id: &str, client_id: ClientId) {
    if let Some(mailbox) = shared.rooms.lock().await.get(room_id).cloned() {
        let _ = mailbox.send(RoomCommand::Leave { client_id }).await;
        shared.emit(ServerEvent::ClientLeftRoom { client_id, room_id: room_id.to_string() });
    }
}

fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}

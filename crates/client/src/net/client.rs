//! Sync client facade: owns the transport, clock sync, reconciler (which
//! owns the interpolator), and input manager; maintains the full-state merge
//! cache and the id<->index maps installed by `room_joined`/
//! `simulation_started`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use glam::Vec3;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use physync::codec::framing;
use physync::codec::message::{CollisionEventWire, SnapshotBody};
use physync::{
    BodyDescriptor, BodyState, ClientId, ClockSync, CodecError, ConstraintDescriptor, Frame,
    InputAction, InputBatch, Message, decode_payload,
};

use super::config::ClientConfig;
use super::input_manager::InputManager;
use super::reconciler::StateReconciler;

/// Caller-facing requests. Mirrors the shape of the server's room mailbox:
/// one command applied at a time by the client's own task, so the public
/// API never races the background read loop.
pub enum ClientCommand {
    CreateRoom {
        room_id: String,
        initial_bodies: Vec<BodyDescriptor>,
        gravity: Option<Vec3>,
        initial_constraints: Vec<ConstraintDescriptor>,
    },
    JoinRoom {
        room_id: String,
    },
    LeaveRoom,
    AddBody {
        body: BodyDescriptor,
    },
    RemoveBody {
        body_id: String,
    },
    StartSimulation,
    QueueInput {
        action: InputAction,
    },
    SetLocalBodies {
        ids: Vec<String>,
    },
    /// Pull-based network byte counters, mirroring the teacher's
    /// `stats()` accessor -- the client's state lives on the background
    /// task, so this crosses the mailbox as a reply instead of a method.
    QueryStats {
        reply: oneshot::Sender<ClientStats>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Total bytes moved over the transport in each direction, across every
/// frame class (binary `room_state` and CBOR messages alike).
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Everything the background task hands back to the caller as it happens.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    RoomCreated { room_id: String },
    RoomJoined { room_id: String, client_id: ClientId, simulation_running: bool, body_count: usize },
    SimulationStarted { body_count: usize },
    BodyAdded { body_id: String, body_index: u16 },
    BodyRemoved { body_id: String },
    CollisionEvents { tick: u32, events: Vec<CollisionEventWire> },
    /// The merged, complete state list after applying one delta frame --
    /// what a renderer or test harness actually consumes.
    StateUpdated { local: Vec<(String, BodyState)>, remote: Vec<(String, BodyState)> },
    ServerError { message: String },
    Disconnected,
}

/// Spawns the background task and returns a handle for sending commands plus
/// a channel of events as they occur.
pub fn spawn(addr: SocketAddr, config: ClientConfig) -> (mpsc::Sender<ClientCommand>, mpsc::Receiver<ClientEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let (event_tx, event_rx) = mpsc::channel(256);
    tokio::spawn(async move {
        match TcpStream::connect(addr).await {
            Ok(stream) => run(stream, config, cmd_rx, event_tx).await,
            Err(err) => {
                let _ = event_tx
                    .send(ClientEvent::ServerError { message: format!("connect failed: {err}") })
                    .await;
            }
        }
    });
    (cmd_tx, event_rx)
}

struct ClientState {
    full_state: HashMap<String, BodyState>,
    id_to_index: HashMap<String, u16>,
    index_to_id: HashMap<u16, String>,
    clock: ClockSync,
    reconciler: StateReconciler,
    input_manager: InputManager,
    config: ClientConfig,
    client_id: Option<ClientId>,
    simulation_running: bool,
    bytes_sent: u64,
    bytes_received: u64,
}

impl ClientState {
    fn new(config: ClientConfig) -> Self {
        Self {
            full_state: HashMap::new(),
            id_to_index: HashMap::new(),
            index_to_id: HashMap::new(),
            clock: ClockSync::new(),
            reconciler: StateReconciler::new(config.interpolation_buffer_size),
            input_manager: InputManager::new(config.max_input_buffer),
            config,
            client_id: None,
            simulation_running: false,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    fn install_id_map(&mut self, body_id_map: &HashMap<String, u16>) {
        self.id_to_index.clear();
        self.index_to_id.clear();
        for (id, &index) in body_id_map {
            self.id_to_index.insert(id.clone(), index);
            self.index_to_id.insert(index, id.clone());
        }
    }

    fn install_snapshot(&mut self, snapshot: &[SnapshotBody]) {
        self.full_state.clear();
        for body in snapshot {
            self.full_state.insert(
                body.id.clone(),
                BodyState {
                    position: body.position,
                    orientation: body.orientation,
                    linear_velocity: body.linear_velocity,
                    angular_velocity: body.angular_velocity,
                    sleeping: false,
                },
            );
        }
    }

    /// Merges one delta/full `room_state` frame into the full-state cache,
    /// resolving numeric indices back to ids via the installed map.
    fn merge_room_state(&mut self, frame: &physync::RoomStateFrame) -> Vec<(String, BodyState)> {
        let mut merged = Vec::with_capacity(frame.bodies.len());
        for wire_body in &frame.bodies {
            let id = match &wire_body.ident {
                physync::BodyIdent::Id(id) => id.clone(),
                physync::BodyIdent::Index(index) => match self.index_to_id.get(index) {
                    Some(id) => id.clone(),
                    None => continue,
                },
            };

            let entry = self.full_state.entry(id.clone()).or_insert(BodyState::IDENTITY);
            if wire_body.mask.contains(physync::FieldMask::POSITION) {
                entry.position = wire_body.state.position;
            }
            if wire_body.mask.contains(physync::FieldMask::ROTATION) {
                entry.orientation = wire_body.state.orientation;
            }
            if wire_body.mask.contains(physync::FieldMask::LIN_VEL) {
                entry.linear_velocity = wire_body.state.linear_velocity;
            }
            if wire_body.mask.contains(physync::FieldMask::ANG_VEL) {
                entry.angular_velocity = wire_body.state.angular_velocity;
            }
            merged.push((id, *entry));
        }
        merged
    }
}

async fn run(
    stream: TcpStream,
    config: ClientConfig,
    mut commands: mpsc::Receiver<ClientCommand>,
    events: mpsc::Sender<ClientEvent>,
) {
    let (mut reader, writer) = tokio::io::split(stream);
    let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(256);
    spawn_writer(writer, outbound_rx);

    let mut state = ClientState::new(config);
    let mut clock_sync_ticker = tokio::time::interval(Duration::from_secs(config.clock_sync_interval_secs));
    let mut input_ticker =
        tokio::time::interval(Duration::from_secs_f64(1.0 / config.input_rate_hz as f64));

    loop {
        tokio::select! {
            frame = framing::read_frame(&mut reader) => {
                match frame {
                    Ok(Some(bytes)) => {
                        state.bytes_received += bytes.len() as u64;
                        match decode_payload(&bytes) {
                            Ok(decoded) => handle_inbound(&mut state, decoded, &events).await,
                            Err(CodecError::Truncated | CodecError::Malformed(_)) => {
                                log::warn!("discarding malformed frame from server");
                            }
                        }
                    }
                    Ok(None) | Err(_) => {
                        let _ = events.send(ClientEvent::Disconnected).await;
                        return;
                    }
                }
            }
            Some(cmd) = commands.recv() => {
                if !handle_command(&mut state, cmd, &outbound_tx).await {
                    return;
                }
            }
            _ = clock_sync_ticker.tick() => {
                send_message(&outbound_tx, &Message::ClockSyncRequest { client_timestamp: now_ms() }, &mut state).await;
            }
            _ = input_ticker.tick() => {
                let tick = state.clock.estimated_server_tick(now_ms());
                if let Some(batch) = state.input_manager.build_batch(tick) {
                    state.reconciler.record_pending_input(tick, batch.clone());
                    send_message(&outbound_tx, &Message::ClientInput { input: batch }, &mut state).await;
                }
            }
        }
    }
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

async fn send_message(outbound: &mpsc::Sender<Vec<u8>>, message: &Message, state: &mut ClientState) {
    if let Ok(bytes) = physync::encode_message(message) {
        state.bytes_sent += bytes.len() as u64;
        let _ = outbound.send(bytes).await;
    }
}

async fn handle_command(
    state: &mut ClientState,
    cmd: ClientCommand,
    outbound: &mpsc::Sender<Vec<u8>>,
) -> bool {
    match cmd {
        ClientCommand::CreateRoom { room_id, initial_bodies, gravity, initial_constraints } => {
            send_message(
                outbound,
                &Message::CreateRoom { room_id, initial_bodies, gravity, initial_constraints },
                state,
            )
            .await;
        }
        ClientCommand::JoinRoom { room_id } => {
            send_message(outbound, &Message::JoinRoom { room_id }, state).await;
        }
        ClientCommand::LeaveRoom => {
            send_message(outbound, &Message::LeaveRoom, state).await;
        }
        ClientCommand::AddBody { body } => {
            send_message(outbound, &Message::AddBody { body }, state).await;
        }
        ClientCommand::RemoveBody { body_id } => {
            send_message(outbound, &Message::RemoveBody { body_id }, state).await;
        }
        ClientCommand::StartSimulation => {
            send_message(outbound, &Message::StartSimulation, state).await;
        }
        ClientCommand::QueueInput { action } => {
            state.input_manager.queue_action(action);
        }
        ClientCommand::SetLocalBodies { ids } => {
            state.reconciler.set_local_bodies(ids);
        }
        ClientCommand::QueryStats { reply } => {
            let _ = reply.send(ClientStats { bytes_sent: state.bytes_sent, bytes_received: state.bytes_received });
        }
        ClientCommand::Shutdown { ack } => {
            let _ = ack.send(());
            return false;
        }
    }
    true
}

async fn handle_inbound(state: &mut ClientState, frame: Frame, events: &mpsc::Sender<ClientEvent>) {
    match frame {
        Frame::RoomState(room_state) => {
            let merged = state.merge_room_state(&room_state);
            let now = now_ms();
            let processed = state.reconciler.process_frame(
                room_state.tick,
                room_state.timestamp_ms,
                &merged,
                now,
                state.config.render_delay_ms(),
            );
            let _ = events
                .send(ClientEvent::StateUpdated {
                    local: processed.local_corrections,
                    remote: processed.remote_states,
                })
                .await;
        }
        Frame::Message(message) => handle_message(state, message, events).await,
    }
}

async fn handle_message(state: &mut ClientState, message: Message, events: &mpsc::Sender<ClientEvent>) {
    match message {
        Message::ClockSyncResponse { client_timestamp, server_timestamp } => {
            state.clock.record(client_timestamp, server_timestamp, now_ms());
        }
        Message::RoomCreated { room_id } => {
            let _ = events.send(ClientEvent::RoomCreated { room_id }).await;
        }
        Message::RoomJoined { room_id, snapshot, client_id, simulation_running, body_id_map } => {
            state.client_id = Some(client_id);
            state.simulation_running = simulation_running;
            state.install_id_map(&body_id_map);
            state.install_snapshot(&snapshot);
            state.reconciler.reset();
            let _ = events
                .send(ClientEvent::RoomJoined {
                    room_id,
                    client_id,
                    simulation_running,
                    body_count: snapshot.len(),
                })
                .await;
        }
        Message::SimulationStarted { snapshot, body_id_map } => {
            state.install_id_map(&body_id_map);
            state.install_snapshot(&snapshot);
            state.reconciler.reset();
            let _ = events.send(ClientEvent::SimulationStarted { body_count: snapshot.len() }).await;
        }
        Message::BodyAdded { body, body_index } => {
            state.id_to_index.insert(body.id.clone(), body_index);
            state.index_to_id.insert(body_index, body.id.clone());
            let _ = events
                .send(ClientEvent::BodyAdded { body_id: body.id, body_index })
                .await;
        }
        Message::BodyRemoved { body_id } => {
            state.full_state.remove(&body_id);
            let _ = events.send(ClientEvent::BodyRemoved { body_id }).await;
        }
        Message::CollisionEvents { tick, events: collision_events } => {
            let _ = events.send(ClientEvent::CollisionEvents { tick, events: collision_events }).await;
        }
        Message::Error { message } => {
            log::error!("server error: {message}");
            let _ = events.send(ClientEvent::ServerError { message }).await;
        }
        _ => {
            log::warn!("client received an unexpected verb");
        }
    }
}

fn now_ms() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(id: &str, index: u16) -> (String, u16) {
        (id.to_string(), index)
    }

    #[test]
    fn merge_inserts_new_body_on_full_mask() {
        let mut state = ClientState::new(ClientConfig::default());
        let (id, index) = body("a", 0);
        state.index_to_id.insert(index, id.clone());

        let frame = physync::RoomStateFrame {
            tick: 1,
            timestamp_ms: 0.0,
            is_delta: true,
            bodies: vec![physync::WireBody {
                ident: physync::BodyIdent::Index(index),
                mask: physync::FieldMask::all(),
                state: BodyState { position: Vec3::new(1.0, 0.0, 0.0), ..BodyState::IDENTITY },
            }],
        };
        let merged = state.merge_room_state(&frame);
        assert_eq!(merged.len(), 1);
        assert_eq!(state.full_state.get(&id).unwrap().position, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn merge_only_overwrites_masked_fields() {
        let mut state = ClientState::new(ClientConfig::default());
        state.index_to_id.insert(0, "a".to_string());
        state.full_state.insert(
            "a".to_string(),
            BodyState { position: Vec3::new(1.0, 2.0, 3.0), ..BodyState::IDENTITY },
        );

        let frame = physync::RoomStateFrame {
            tick: 2,
            timestamp_ms: 0.0,
            is_delta: true,
            bodies: vec![physync::WireBody {
                ident: physync::BodyIdent::Index(0),
                mask: physync::FieldMask::LIN_VEL,
                state: BodyState { linear_velocity: Vec3::new(5.0, 0.0, 0.0), ..BodyState::IDENTITY },
            }],
        };
        state.merge_room_state(&frame);
        let cached = state.full_state.get("a").unwrap();
        assert_eq!(cached.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(cached.linear_velocity, Vec3::new(5.0, 0.0, 0.0));
    }

    #[tokio::test]
    async fn body_added_installs_index_mapping_so_later_deltas_resolve() {
        let mut state = ClientState::new(ClientConfig::default());
        let (event_tx, mut event_rx) = mpsc::channel(8);

        handle_message(
            &mut state,
            Message::BodyAdded {
                body: BodyDescriptor {
                    id: "new-box".to_string(),
                    shape: physync::Shape::Box { half_extents: Vec3::splat(0.5) },
                    motion_type: physync::MotionType::Dynamic,
                    position: Vec3::ZERO,
                    orientation: glam::Quat::IDENTITY,
                    mass: None,
                    center_of_mass: None,
                    restitution: 0.0,
                    friction: 0.0,
                    is_trigger: false,
                },
                body_index: 7,
            },
            &event_tx,
        )
        .await;
        assert!(matches!(event_rx.recv().await, Some(ClientEvent::BodyAdded { body_index: 7, .. })));

        let frame = physync::RoomStateFrame {
            tick: 10,
            timestamp_ms: 0.0,
            is_delta: true,
            bodies: vec![physync::WireBody {
                ident: physync::BodyIdent::Index(7),
                mask: physync::FieldMask::POSITION,
                state: BodyState { position: Vec3::new(3.0, 0.0, 0.0), ..BodyState::IDENTITY },
            }],
        };
        let merged = state.merge_room_state(&frame);
        assert_eq!(merged.len(), 1, "index 7 should now resolve to 'new-box' instead of being dropped");
        assert_eq!(merged[0].0, "new-box");
    }

    #[tokio::test]
    async fn send_message_accumulates_actual_byte_length_not_frame_count() {
        let mut state = ClientState::new(ClientConfig::default());
        let (outbound_tx, mut outbound_rx) = mpsc::channel(8);

        send_message(&outbound_tx, &Message::LeaveRoom, &mut state).await;
        send_message(&outbound_tx, &Message::JoinRoom { room_id: "a-somewhat-longer-room-id".into() }, &mut state).await;

        let first = outbound_rx.recv().await.unwrap().len() as u64;
        let second = outbound_rx.recv().await.unwrap().len() as u64;
        assert_eq!(state.bytes_sent, first + second);
        assert_ne!(first, second, "the two encoded messages should differ in size");
    }

    #[test]
    fn unresolvable_index_is_skipped_not_panicking() {
        let mut state = ClientState::new(ClientConfig::default());
        let frame = physync::RoomStateFrame {
            tick: 1,
            timestamp_ms: 0.0,
            is_delta: true,
            bodies: vec![physync::WireBody {
                ident: physync::BodyIdent::Index(99),
                mask: physync::FieldMask::all(),
                state: BodyState::IDENTITY,
            }],
        };
        assert!(state.merge_room_state(&frame).is_empty());
    }
}

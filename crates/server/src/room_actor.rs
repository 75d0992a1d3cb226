use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use glam::Vec3;
use tokio::sync::{mpsc, oneshot};

use physync::codec::message::{CollisionEventWire, Message, SnapshotBody};
use physync::{BodyDescriptor, ClientId, ConstraintDescriptor, Room, RoomError, encode_message, encode_room_state};

/// One message landing in a room's mailbox. The room task applies these one
/// at a time between ticks -- never concurrently with its own tick work, and
/// never interleaved with another command -- satisfying the "one verb at a
/// time" ordering guarantee without a lock.
pub enum RoomCommand {
    Join {
        client_id: ClientId,
        sender: mpsc::Sender<Vec<u8>>,
        reply: oneshot::Sender<(Vec<SnapshotBody>, HashMap<String, u16>, bool)>,
    },
    Leave {
        client_id: ClientId,
    },
    ClientInput {
        client_id: ClientId,
        input: physync::InputBatch,
    },
    AddBody {
        body: BodyDescriptor,
        reply: oneshot::Sender<Result<u16, RoomError>>,
    },
    RemoveBody {
        body_id: String,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    StartSimulation,
}

const WAKEUPS_PER_TICK: u32 = 10;

pub fn spawn(
    room_id: String,
    initial_bodies: Vec<BodyDescriptor>,
    initial_constraints: Vec<ConstraintDescriptor>,
    gravity: Vec3,
    tick_rate: u32,
) -> mpsc::Sender<RoomCommand> {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(run(room_id, initial_bodies, initial_constraints, gravity, tick_rate, rx));
    tx
}

async fn run(
    room_id: String,
    initial_bodies: Vec<BodyDescriptor>,
    initial_constraints: Vec<ConstraintDescriptor>,
    gravity: Vec3,
    tick_rate: u32,
    mut mailbox: mpsc::Receiver<RoomCommand>,
) {
    let mut room = Room::new(room_id.clone(), initial_bodies, initial_constraints, gravity, tick_rate);
    let mut senders: HashMap<ClientId, mpsc::Sender<Vec<u8>>> = HashMap::new();

    let wakeup = Duration::from_secs_f64(1.0 / (tick_rate as f64 * WAKEUPS_PER_TICK as f64));
    let mut ticker = tokio::time::interval(wakeup);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_wake = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !room.is_running() {
                    last_wake = Instant::now();
                    continue;
                }
                let now = Instant::now();
                let elapsed = now.duration_since(last_wake).as_secs_f32();
                last_wake = now;
                room.accumulate(elapsed);

                let now_ms = now_ms();
                for outcome in room.drain_ticks(now_ms) {
                    if let Some(frame) = outcome.state_frame {
                        let bytes = encode_room_state(&frame, true);
                        broadcast_bytes(&senders, &bytes).await;
                    }
                    if !outcome.collision_events.is_empty() {
                        broadcast_collision_events(&senders, room.tick_count(), outcome.collision_events).await;
                    }
                }
            }
            Some(cmd) = mailbox.recv() => {
                handle_command(&mut room, &mut senders, cmd).await;
            }
            else => break,
        }
    }
}

async fn handle_command(
    room: &mut Room,
    senders: &mut HashMap<ClientId, mpsc::Sender<Vec<u8>>>,
    cmd: RoomCommand,
) {
    match cmd {
        RoomCommand::Join { client_id, sender, reply } => {
            room.add_client(client_id);
            senders.insert(client_id, sender);
            let (snapshot, id_map) = room.snapshot();
            let _ = reply.send((snapshot, id_map, room.is_running()));
        }
        RoomCommand::Leave { client_id } => {
            senders.remove(&client_id);
            if room.remove_client(client_id) {
                room.stop();
            }
        }
        RoomCommand::ClientInput { client_id, input } => {
            room.buffer_input(client_id, input);
        }
        RoomCommand::AddBody { body, reply } => match room.add_body(body.clone()) {
            Ok(index) => {
                let _ = reply.send(Ok(index));
                broadcast_message(senders, &Message::BodyAdded { body, body_index: index }).await;
            }
            Err(err) => {
                let _ = reply.send(Err(err));
            }
        },
        RoomCommand::RemoveBody { body_id, reply } => match room.remove_body(&body_id) {
            Ok(()) => {
                let _ = reply.send(Ok(()));
                broadcast_message(senders, &Message::BodyRemoved { body_id }).await;
            }
            Err(err) => {
                let _ = reply.send(Err(err));
            }
        },
        RoomCommand::StartSimulation => {
            room.reset();
            room.start();
            let (snapshot, id_map) = room.snapshot();
            broadcast_message(
                senders,
                &Message::SimulationStarted { snapshot, body_id_map: id_map },
            )
            .await;
        }
    }
}

async fn broadcast_message(senders: &HashMap<ClientId, mpsc::Sender<Vec<u8>>>, message: &Message) {
    let Ok(bytes) = encode_message(message) else {
        return;
    };
    broadcast_bytes(senders, &bytes).await;
}

async fn broadcast_collision_events(
    senders: &HashMap<ClientId, mpsc::Sender<Vec<u8>>>,
    tick: u32,
    events: Vec<CollisionEventWire>,
) {
    broadcast_message(senders, &Message::CollisionEvents { tick, events }).await;
}

/// Fire-and-forget to every client in the room. A client whose send queue is
/// saturated has its frame dropped rather than stalling this room's tick.
async fn broadcast_bytes(senders: &HashMap<ClientId, mpsc::Sender<Vec<u8>>>, bytes: &[u8]) {
    for sender in senders.values() {
        let _ = sender.try_send(bytes.to_vec());
    }
}

fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}

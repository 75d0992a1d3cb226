//! The self-describing (opcode `0x02`) message set -- everything on the wire
//! that is not a `room_state` frame.

use std::collections::HashMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::body::BodyDescriptor;
use crate::constraint::ConstraintDescriptor;
use crate::input::InputBatch;
use crate::physics::PhysicsEventKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotBody {
    pub id: String,
    pub index: u16,
    pub position: Vec3,
    pub orientation: glam::Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionEventKind {
    CollisionStarted,
    CollisionFinished,
    TriggerEntered,
    TriggerExited,
}

impl From<PhysicsEventKind> for CollisionEventKind {
    fn from(kind: PhysicsEventKind) -> Self {
        match kind {
            PhysicsEventKind::CollisionStarted => CollisionEventKind::CollisionStarted,
            PhysicsEventKind::CollisionFinished => CollisionEventKind::CollisionFinished,
            PhysicsEventKind::TriggerEntered => CollisionEventKind::TriggerEntered,
            PhysicsEventKind::TriggerExited => CollisionEventKind::TriggerExited,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollisionEventWire {
    pub kind: CollisionEventKind,
    pub body_a: String,
    pub body_b: String,
    pub point: Option<Vec3>,
    pub normal: Option<Vec3>,
    pub impulse: Option<f32>,
}

/// Every structured message other than `room_state`, tagged by `type` on the
/// wire as a closed sum: no unknown verb is ever silently accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    // Client -> server
    ClockSyncRequest {
        client_timestamp: f64,
    },
    CreateRoom {
        room_id: String,
        initial_bodies: Vec<BodyDescriptor>,
        gravity: Option<Vec3>,
        #[serde(default)]
        initial_constraints: Vec<ConstraintDescriptor>,
    },
    JoinRoom {
        room_id: String,
    },
    LeaveRoom,
    ClientInput {
        input: InputBatch,
    },
    AddBody {
        body: BodyDescriptor,
    },
    RemoveBody {
        body_id: String,
    },
    StartSimulation,
    BodyEvent {
        body_id: String,
        event_type: String,
        data: serde_json::Value,
    },

    // Server -> client
    ClockSyncResponse {
        client_timestamp: f64,
        server_timestamp: f64,
    },
    RoomCreated {
        room_id: String,
    },
    RoomJoined {
        room_id: String,
        snapshot: Vec<SnapshotBody>,
        client_id: u64,
        simulation_running: bool,
        body_id_map: HashMap<String, u16>,
    },
    SimulationStarted {
        snapshot: Vec<SnapshotBody>,
        body_id_map: HashMap<String, u16>,
    },
    BodyAdded {
        body: BodyDescriptor,
        body_index: u16,
    },
    BodyRemoved {
        body_id: String,
    },
    CollisionEvents {
        tick: u32,
        events: Vec<CollisionEventWire>,
    },
    Error {
        message: String,
    },
}

use super::CodecError;

pub fn encode_cbor(message: &Message) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    ciborium::into_writer(message, &mut out).map_err(|_| CodecError::Malformed("cbor encode failed"))?;
    Ok(out)
}

pub fn decode_cbor(bytes: &[u8]) -> Result<Message, CodecError> {
    ciborium::from_reader(bytes).map_err(|_| CodecError::Malformed("cbor decode failed"))
}

/// Fallback decode path for legacy peers sending raw JSON with no opcode
/// prefix at all.
pub fn decode_json(bytes: &[u8]) -> Result<Message, CodecError> {
    serde_json::from_slice(bytes).map_err(|_| CodecError::Malformed("json decode failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbor_round_trip() {
        let msg = Message::JoinRoom {
            room_id: "lobby".into(),
        };
        let encoded = encode_cbor(&msg).unwrap();
        let decoded = decode_cbor(&encoded).unwrap();
        match decoded {
            Message::JoinRoom { room_id } => assert_eq!(room_id, "lobby"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn json_fallback_round_trip() {
        let msg = Message::LeaveRoom;
        let json = serde_json::to_vec(&msg).unwrap();
        let decoded = decode_json(&json).unwrap();
        assert!(matches!(decoded, Message::LeaveRoom));
    }

    #[test]
    fn malformed_cbor_is_reported_not_panicking() {
        let garbage = [0xff, 0x00, 0x01];
        assert!(decode_cbor(&garbage).is_err());
    }
}

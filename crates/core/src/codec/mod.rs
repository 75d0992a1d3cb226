//! Binary wire codec: opcode-tagged framing over a length-prefixed stream.
//!
//! Two message classes share the wire: the custom `ROOM_STATE` binary frame
//! (opcode `0x01`) and everything else, CBOR-encoded (opcode `0x02`). A raw
//! JSON payload with no opcode prefix is also accepted on decode, for
//! compatibility with older peers.

pub mod framing;
pub mod message;
pub mod quat;
pub mod room_state;

pub use message::Message;
pub use room_state::RoomStateFrame;

use thiserror::Error;

pub const OPCODE_MESSAGE: u8 = 0x02;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("input ended before a full frame was available")]
    Truncated,
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

/// Anything decoded off the wire, before routing.
pub enum Frame {
    RoomState(RoomStateFrame),
    Message(Message),
}

/// Decodes one already-length-delimited payload (opcode byte included, for
/// the two binary classes). Falls back to a raw-JSON parse if the first byte
/// doesn't match a known opcode -- JSON's first byte is always ASCII
/// whitespace or `{`/`[`, neither of which collides with `0x01`/`0x02`.
pub fn decode_payload(bytes: &[u8]) -> Result<Frame, CodecError> {
    match bytes.first() {
        Some(&room_state::OPCODE) => room_state::decode(bytes).map(Frame::RoomState),
        Some(&OPCODE_MESSAGE) => message::decode_cbor(&bytes[1..]).map(Frame::Message),
        _ => message::decode_json(bytes).map(Frame::Message),
    }
}

pub fn encode_message(message: &Message) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![OPCODE_MESSAGE];
    out.extend(message::encode_cbor(message)?);
    Ok(out)
}

pub fn encode_room_state(frame: &RoomStateFrame, numeric_ids: bool) -> Vec<u8> {
    room_state::encode(frame, numeric_ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_payload_round_trips_through_decode_payload() {
        let msg = Message::StartSimulation;
        let payload = encode_message(&msg).unwrap();
        match decode_payload(&payload).unwrap() {
            Frame::Message(Message::StartSimulation) => {}
            _ => panic!("expected StartSimulation"),
        }
    }

    #[test]
    fn raw_json_without_opcode_still_decodes() {
        let json = serde_json::to_vec(&Message::LeaveRoom).unwrap();
        match decode_payload(&json).unwrap() {
            Frame::Message(Message::LeaveRoom) => {}
            _ => panic!("expected LeaveRoom"),
        }
    }
}

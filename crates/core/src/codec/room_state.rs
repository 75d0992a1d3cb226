//! The custom `ROOM_STATE` (opcode `0x01`) binary frame: a 16-byte header
//! followed by one variable-length record per body.

use crate::body::BodyState;
use crate::codec::quat;
use crate::room::state_tracker::FieldMask;

use super::CodecError;

pub const OPCODE: u8 = 0x01;

const FLAG_IS_DELTA: u8 = 0b01;
const FLAG_NUMERIC_IDS: u8 = 0b10;

#[derive(Debug, Clone)]
pub enum BodyIdent {
    Index(u16),
    Id(String),
}

#[derive(Debug, Clone)]
pub struct WireBody {
    pub ident: BodyIdent,
    pub mask: FieldMask,
    pub state: BodyState,
}

#[derive(Debug, Clone)]
pub struct RoomStateFrame {
    pub tick: u32,
    pub timestamp_ms: f64,
    pub is_delta: bool,
    pub bodies: Vec<WireBody>,
}

pub fn encode(frame: &RoomStateFrame, numeric_ids: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + frame.bodies.len() * 24);

    out.push(OPCODE);
    out.extend_from_slice(&frame.tick.to_le_bytes());
    out.extend_from_slice(&frame.timestamp_ms.to_le_bytes());

    let mut flags = 0u8;
    if frame.is_delta {
        flags |= FLAG_IS_DELTA;
    }
    if numeric_ids {
        flags |= FLAG_NUMERIC_IDS;
    }
    out.push(flags);
    out.extend_from_slice(&(frame.bodies.len() as u16).to_le_bytes());

    for body in &frame.bodies {
        match &body.ident {
            BodyIdent::Index(index) => out.extend_from_slice(&index.to_le_bytes()),
            BodyIdent::Id(id) => {
                out.push(id.len() as u8);
                out.extend_from_slice(id.as_bytes());
            }
        }

        out.push(body.mask.bits());

        if body.mask.contains(FieldMask::POSITION) {
            write_vec3(&mut out, body.state.position);
        }
        if body.mask.contains(FieldMask::ROTATION) {
            out.extend_from_slice(&quat::encode(body.state.orientation));
        }
        if body.mask.contains(FieldMask::LIN_VEL) {
            write_vec3(&mut out, body.state.linear_velocity);
        }
        if body.mask.contains(FieldMask::ANG_VEL) {
            write_vec3(&mut out, body.state.angular_velocity);
        }
    }

    out
}

pub fn decode(bytes: &[u8]) -> Result<RoomStateFrame, CodecError> {
    let mut cursor = Cursor::new(bytes);

    let opcode = cursor.read_u8()?;
    if opcode != OPCODE {
        return Err(CodecError::Malformed("unexpected room_state opcode"));
    }
    let tick = cursor.read_u32()?;
    let timestamp_ms = cursor.read_f64()?;
    let flags = cursor.read_u8()?;
    let is_delta = flags & FLAG_IS_DELTA != 0;
    let numeric_ids = flags & FLAG_NUMERIC_IDS != 0;
    let body_count = cursor.read_u16()?;

    let mut bodies = Vec::with_capacity(body_count as usize);
    for _ in 0..body_count {
        let ident = if numeric_ids {
            BodyIdent::Index(cursor.read_u16()?)
        } else {
            let len = cursor.read_u8()? as usize;
            let raw = cursor.read_bytes(len)?;
            let id = String::from_utf8(raw.to_vec())
                .map_err(|_| CodecError::Malformed("body id is not valid utf-8"))?;
            BodyIdent::Id(id)
        };

        let mask = FieldMask::from_bits_truncate(cursor.read_u8()?);
        let mut state = BodyState::IDENTITY;

        if mask.contains(FieldMask::POSITION) {
            state.position = cursor.read_vec3()?;
        }
        if mask.contains(FieldMask::ROTATION) {
            let raw: [u8; quat::ENCODED_LEN] = cursor
                .read_bytes(quat::ENCODED_LEN)?
                .try_into()
                .expect("length checked by read_bytes");
            state.orientation = quat::decode(&raw);
        }
        if mask.contains(FieldMask::LIN_VEL) {
            state.linear_velocity = cursor.read_vec3()?;
        }
        if mask.contains(FieldMask::ANG_VEL) {
            state.angular_velocity = cursor.read_vec3()?;
        }

        bodies.push(WireBody { ident, mask, state });
    }

    Ok(RoomStateFrame {
        tick,
        timestamp_ms,
        is_delta,
        bodies,
    })
}

fn write_vec3(out: &mut Vec<u8>, v: glam::Vec3) {
    out.extend_from_slice(&v.x.to_le_bytes());
    out.extend_from_slice(&v.y.to_le_bytes());
    out.extend_from_slice(&v.z.to_le_bytes());
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + len > self.bytes.len() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_f64(&mut self) -> Result<f64, CodecError> {
        let b = self.read_bytes(8)?;
        Ok(f64::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_f32(&mut self) -> Result<f32, CodecError> {
        let b = self.read_bytes(4)?;
        Ok(f32::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_vec3(&mut self) -> Result<glam::Vec3, CodecError> {
        Ok(glam::Vec3::new(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn round_trip_full_body() {
        let frame = RoomStateFrame {
            tick: 42,
            timestamp_ms: 12345.5,
            is_delta: false,
            bodies: vec![WireBody {
                ident: BodyIdent::Index(7),
                mask: FieldMask::all(),
                state: BodyState {
                    position: Vec3::new(1.0, 2.0, 3.0),
                    ..BodyState::IDENTITY
                },
            }],
        };
        let encoded = encode(&frame, true);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.tick, 42);
        assert_eq!(decoded.bodies.len(), 1);
        assert!((decoded.bodies[0].state.position - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-5);
    }

    #[test]
    fn position_only_mask_leaves_other_fields_default() {
        let frame = RoomStateFrame {
            tick: 1,
            timestamp_ms: 0.0,
            is_delta: true,
            bodies: vec![WireBody {
                ident: BodyIdent::Index(0),
                mask: FieldMask::POSITION,
                state: BodyState {
                    position: Vec3::new(9.0, 0.0, 0.0),
                    ..BodyState::IDENTITY
                },
            }],
        };
        let decoded = decode(&encode(&frame, true)).unwrap();
        assert_eq!(decoded.bodies[0].state.linear_velocity, Vec3::ZERO);
        assert_eq!(decoded.bodies[0].state.orientation, glam::Quat::IDENTITY);
    }

    #[test]
    fn empty_delta_round_trips() {
        let frame = RoomStateFrame {
            tick: 3,
            timestamp_ms: 0.0,
            is_delta: true,
            bodies: vec![],
        };
        let decoded = decode(&encode(&frame, true)).unwrap();
        assert!(decoded.bodies.is_empty());
    }

    #[test]
    fn truncated_input_is_reported() {
        let bytes = [OPCODE, 0, 0];
        assert!(matches!(decode(&bytes), Err(CodecError::Truncated)));
    }
}

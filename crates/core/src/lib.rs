pub mod body;
pub mod clock;
pub mod codec;
pub mod constraint;
pub mod input;
pub mod physics;
pub mod room;
pub mod simulation;

pub const DEFAULT_PORT: u16 = 8080;

pub use body::{BodyDescriptor, BodyState, MotionType, Shape};
pub use clock::ClockSync;
pub use codec::{CodecError, Frame, Message, RoomStateFrame, decode_payload, encode_message, encode_room_state};
pub use codec::room_state::{BodyIdent, WireBody};
pub use room::state_tracker::FieldMask;
pub use constraint::{AxisLimit, ConstraintDescriptor, ConstraintKind};
pub use input::{InputAction, InputBatch};
pub use physics::{PhysicsEvent, PhysicsEventKind, PhysicsWorld};
pub use room::manager::{RoomManager, RoomManagerError};
pub use room::{ClientId, Room, RoomError, TickOutcome};
pub use simulation::FixedTimestep;

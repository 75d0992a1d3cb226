use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// One action to apply to a single body during a tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum InputAction {
    Impulse { body_id: String, value: Vec3 },
    Force { body_id: String, value: Vec3 },
    SetVelocity { body_id: String, value: Vec3 },
    SetPose { body_id: String, position: Vec3, orientation: Quat },
}

impl InputAction {
    pub fn body_id(&self) -> &str {
        match self {
            InputAction::Impulse { body_id, .. }
            | InputAction::Force { body_id, .. }
            | InputAction::SetVelocity { body_id, .. }
            | InputAction::SetPose { body_id, .. } => body_id,
        }
    }
}

/// A batch of actions a client sent together, targeted at a single tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputBatch {
    pub tick: u32,
    pub actions: Vec<InputAction>,
}

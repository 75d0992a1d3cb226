use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// A closed sum of the shapes the physics facade can construct a collider from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shape {
    Box { half_extents: Vec3 },
    Sphere { radius: f32 },
    Capsule { half_height: f32, radius: f32 },
    Trimesh { vertices: usize, indices: usize },
}

/// How the physics engine is allowed to move a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionType {
    Dynamic,
    Static,
    KinematicPosition,
}

/// Caller-supplied description of a body to add to a room. Shape parameters
/// live here and nowhere else on the wire -- see the codec module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyDescriptor {
    pub id: String,
    pub shape: Shape,
    pub motion_type: MotionType,
    pub position: Vec3,
    #[serde(default = "default_orientation")]
    pub orientation: Quat,
    pub mass: Option<f32>,
    pub center_of_mass: Option<Vec3>,
    #[serde(default)]
    pub restitution: f32,
    #[serde(default)]
    pub friction: f32,
    #[serde(default)]
    pub is_trigger: bool,
}

fn default_orientation() -> Quat {
    Quat::IDENTITY
}

impl BodyDescriptor {
    pub fn new(id: impl Into<String>, shape: Shape, motion_type: MotionType, position: Vec3) -> Self {
        Self {
            id: id.into(),
            shape,
            motion_type,
            position,
            orientation: Quat::IDENTITY,
            mass: None,
            center_of_mass: None,
            restitution: 0.0,
            friction: 0.5,
            is_trigger: false,
        }
    }
}

/// Runtime pose/velocity snapshot of one body, as read from the physics facade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    pub position: Vec3,
    pub orientation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub sleeping: bool,
}

impl BodyState {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
        linear_velocity: Vec3::ZERO,
        angular_velocity: Vec3::ZERO,
        sleeping: false,
    };
}

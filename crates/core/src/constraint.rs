use glam::Vec3;
use serde::{Deserialize, Serialize};

/// A per-axis limit entry for a six-dof constraint. An axis with no entry in
/// the limits list is locked; an entry with both bounds absent is free.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AxisLimit {
    pub axis: u8,
    pub min_limit: Option<f32>,
    pub max_limit: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintKind {
    BallAndSocket,
    Hinge {
        axis: Vec3,
    },
    Distance {
        max_distance: f32,
    },
    /// `slider` is accepted as an alternate wire name for this variant on
    /// decode; always encoded back out as `prismatic`.
    #[serde(alias = "slider")]
    Prismatic {
        axis: Vec3,
    },
    Lock {
        perpendicular_axis: Option<Vec3>,
    },
    Spring {
        max_distance: f32,
        stiffness: f32,
        damping: f32,
    },
    SixDof {
        axis: Vec3,
        limits: Vec<AxisLimit>,
    },
}

/// Binds two bodies by id. `local_pivot_a`/`local_pivot_b` are in each body's
/// own local frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintDescriptor {
    pub id: String,
    pub body_a: String,
    pub body_b: String,
    pub local_pivot_a: Vec3,
    pub local_pivot_b: Vec3,
    pub kind: ConstraintKind,
    #[serde(default = "default_collision")]
    pub collision: bool,
}

fn default_collision() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slider_is_an_alias_for_prismatic() {
        let json = r#"{"type": "slider", "axis": [0.0, 1.0, 0.0]}"#;
        let kind: ConstraintKind = serde_json::from_str(json).unwrap();
        assert!(matches!(kind, ConstraintKind::Prismatic { .. }));
    }
}

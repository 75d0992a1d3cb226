use std::collections::HashMap;

use bitflags::bitflags;

use crate::body::BodyState;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldMask: u8 {
        const POSITION = 0b0001;
        const ROTATION = 0b0010;
        const LIN_VEL  = 0b0100;
        const ANG_VEL  = 0b1000;
    }
}

/// Absolute-difference threshold below which a field is considered unchanged.
const EPSILON: f32 = 1e-4;

#[derive(Debug, Clone)]
pub struct BodyDelta {
    pub id: String,
    pub index: u16,
    pub mask: FieldMask,
    pub state: BodyState,
}

/// Per-room bookkeeping of what was last broadcast to clients, plus the
/// stable numeric index every body id is assigned on first sight.
#[derive(Default)]
pub struct StateTracker {
    last_broadcast: HashMap<String, BodyState>,
    id_to_index: HashMap<String, u16>,
    index_to_id: HashMap<u16, String>,
    next_index: u16,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the body's existing numeric index, allocating the next free
    /// one if this is the first time `id` has been seen. Indices are never
    /// reused even after the body is removed.
    pub fn ensure_body_index(&mut self, id: &str) -> u16 {
        if let Some(&index) = self.id_to_index.get(id) {
            return index;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.id_to_index.insert(id.to_string(), index);
        self.index_to_id.insert(index, id.to_string());
        index
    }

    pub fn index_for(&self, id: &str) -> Option<u16> {
        self.id_to_index.get(id).copied()
    }

    pub fn id_for(&self, index: u16) -> Option<&str> {
        self.index_to_id.get(&index).map(String::as_str)
    }

    /// Every live body, unconditionally, tagged `ALL`. Used for join/reset
    /// frames where the receiver has no prior state to diff against.
    pub fn snapshot<'a>(&mut self, bodies: impl Iterator<Item = (&'a str, BodyState)>) -> Vec<BodyDelta> {
        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for (id, state) in bodies {
            let index = self.ensure_body_index(id);
            self.last_broadcast.insert(id.to_string(), state);
            seen.insert(id.to_string());
            out.push(BodyDelta {
                id: id.to_string(),
                index,
                mask: FieldMask::all(),
                state,
            });
        }
        self.prune_missing(&seen);
        out
    }

    /// Field-level delta against `last_broadcast`, eliding sleeping bodies
    /// and bodies whose tracked fields did not change beyond `EPSILON`.
    pub fn delta<'a>(&mut self, bodies: impl Iterator<Item = (&'a str, BodyState)>) -> Vec<BodyDelta> {
        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let bodies: Vec<(&str, BodyState)> = bodies.collect();

        for &(id, state) in &bodies {
            seen.insert(id.to_string());
            let index = self.ensure_body_index(id);

            match self.last_broadcast.get(id) {
                None => {
                    out.push(BodyDelta {
                        id: id.to_string(),
                        index,
                        mask: FieldMask::all(),
                        state,
                    });
                }
                Some(_) if state.sleeping => {
                    // Skip: elided from the wire, but last_broadcast is
                    // still refreshed below so the cache stays current.
                }
                Some(prev) => {
                    let mask = Self::diff_mask(prev, &state);
                    if !mask.is_empty() {
                        out.push(BodyDelta {
                            id: id.to_string(),
                            index,
                            mask,
                            state,
                        });
                    }
                }
            }
        }

        // Refresh the cache for every live body, sleeping or not.
        for &(id, state) in &bodies {
            self.last_broadcast.insert(id.to_string(), state);
        }
        self.prune_missing(&seen);

        out
    }

    fn diff_mask(prev: &BodyState, next: &BodyState) -> FieldMask {
        let mut mask = FieldMask::empty();
        if !near(prev.position.x, next.position.x)
            || !near(prev.position.y, next.position.y)
            || !near(prev.position.z, next.position.z)
        {
            mask |= FieldMask::POSITION;
        }
        if !near(prev.orientation.x, next.orientation.x)
            || !near(prev.orientation.y, next.orientation.y)
            || !near(prev.orientation.z, next.orientation.z)
            || !near(prev.orientation.w, next.orientation.w)
        {
            mask |= FieldMask::ROTATION;
        }
        if !near(prev.linear_velocity.x, next.linear_velocity.x)
            || !near(prev.linear_velocity.y, next.linear_velocity.y)
            || !near(prev.linear_velocity.z, next.linear_velocity.z)
        {
            mask |= FieldMask::LIN_VEL;
        }
        if !near(prev.angular_velocity.x, next.angular_velocity.x)
            || !near(prev.angular_velocity.y, next.angular_velocity.y)
            || !near(prev.angular_velocity.z, next.angular_velocity.z)
        {
            mask |= FieldMask::ANG_VEL;
        }
        mask
    }

    /// Drops the `last_broadcast` entry for a removed body. The index
    /// mapping is intentionally left in place.
    pub fn remove(&mut self, id: &str) {
        self.last_broadcast.remove(id);
    }

    fn prune_missing(&mut self, live_ids: &std::collections::HashSet<String>) {
        self.last_broadcast.retain(|id, _| live_ids.contains(id));
    }
}

fn near(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    fn state(pos: Vec3) -> BodyState {
        BodyState {
            position: pos,
            ..BodyState::IDENTITY
        }
    }

    #[test]
    fn first_sight_is_full_mask() {
        let mut tracker = StateTracker::new();
        let out = tracker.delta(std::iter::once(("a", state(Vec3::ZERO))));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mask, FieldMask::all());
    }

    #[test]
    fn unchanged_body_produces_no_delta() {
        let mut tracker = StateTracker::new();
        tracker.delta(std::iter::once(("a", state(Vec3::ZERO))));
        let out = tracker.delta(std::iter::once(("a", state(Vec3::ZERO))));
        assert!(out.is_empty());
    }

    #[test]
    fn position_only_change_sets_position_and_linvel_not_rotation() {
        let mut tracker = StateTracker::new();
        tracker.delta(std::iter::once(("a", state(Vec3::ZERO))));
        let mut moved = state(Vec3::new(1.0, 0.0, 0.0));
        moved.linear_velocity = Vec3::new(1.0, 0.0, 0.0);
        let out = tracker.delta(std::iter::once(("a", moved)));
        assert_eq!(out.len(), 1);
        assert!(out[0].mask.contains(FieldMask::POSITION));
        assert!(out[0].mask.contains(FieldMask::LIN_VEL));
        assert!(!out[0].mask.contains(FieldMask::ROTATION));
    }

    #[test]
    fn sleeping_body_elided_after_initial_full_entry() {
        let mut tracker = StateTracker::new();
        tracker.delta(std::iter::once(("a", state(Vec3::ZERO))));
        let mut sleeping = state(Vec3::new(5.0, 0.0, 0.0));
        sleeping.sleeping = true;
        let out = tracker.delta(std::iter::once(("a", sleeping)));
        assert!(out.is_empty());
    }

    #[test]
    fn index_is_stable_and_never_reused() {
        let mut tracker = StateTracker::new();
        let idx = tracker.ensure_body_index("a");
        tracker.remove("a");
        assert_eq!(tracker.ensure_body_index("a"), idx);
        let other = tracker.ensure_body_index("b");
        assert_ne!(idx, other);
    }

    #[test]
    fn orientation_default_is_identity() {
        assert_eq!(BodyState::IDENTITY.orientation, Quat::IDENTITY);
    }
}

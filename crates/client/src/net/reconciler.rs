//! Partitions authoritative server state into locally predicted bodies
//! (blended for display smoothing) versus remote bodies (interpolated), and
//! retires pending inputs the authority has already observed.

use std::collections::{HashMap, HashSet};

use glam::Vec3;

use physync::{BodyState, InputBatch};

use super::interpolation::InterpolationBuffer;

pub struct PendingInput {
    pub tick: u32,
    pub batch: InputBatch,
}

pub struct ProcessedFrame {
    pub local_corrections: Vec<(String, BodyState)>,
    pub remote_states: Vec<(String, BodyState)>,
}

pub struct StateReconciler {
    local_ids: HashSet<String>,
    pending_inputs: Vec<PendingInput>,
    interpolators: HashMap<String, InterpolationBuffer>,
    interpolation_buffer_size: usize,
}

impl StateReconciler {
    pub fn new(interpolation_buffer_size: usize) -> Self {
        Self {
            local_ids: HashSet::new(),
            pending_inputs: Vec::new(),
            interpolators: HashMap::new(),
            interpolation_buffer_size,
        }
    }

    pub fn set_local_bodies(&mut self, ids: impl IntoIterator<Item = String>) {
        self.local_ids = ids.into_iter().collect();
    }

    pub fn is_local(&self, id: &str) -> bool {
        self.local_ids.contains(id)
    }

    pub fn record_pending_input(&mut self, tick: u32, batch: InputBatch) {
        self.pending_inputs.push(PendingInput { tick, batch });
    }

    pub fn pending_input_count(&self) -> usize {
        self.pending_inputs.len()
    }

    pub fn reset(&mut self) {
        self.pending_inputs.clear();
        self.interpolators.clear();
    }

    /// Feeds one server frame through reconciliation: drops acknowledged
    /// pending inputs, partitions bodies into local corrections vs remote
    /// interpolated states (sampled immediately at `now_ms`).
    pub fn process_frame(
        &mut self,
        server_tick: u32,
        timestamp_ms: f64,
        bodies: &[(String, BodyState)],
        now_ms: f64,
        render_delay_ms: f64,
    ) -> ProcessedFrame {
        self.pending_inputs.retain(|pending| pending.tick > server_tick);

        let mut local_corrections = Vec::new();
        let mut remote_states = Vec::new();

        for (id, state) in bodies {
            if self.local_ids.contains(id) {
                local_corrections.push((id.clone(), *state));
                continue;
            }

            let buffer = self
                .interpolators
                .entry(id.clone())
                .or_insert_with(|| InterpolationBuffer::new(self.interpolation_buffer_size));
            buffer.push(timestamp_ms, *state);

            if let Some(interpolated) = buffer.sample(now_ms - render_delay_ms) {
                remote_states.push((id.clone(), interpolated));
            }
        }

        ProcessedFrame { local_corrections, remote_states }
    }

    /// Queries a remote body's interpolation buffer at an arbitrary render
    /// time, independent of the last `process_frame` call -- this is what a
    /// render loop running at its own frame rate calls every frame.
    pub fn sample_remote(&self, id: &str, render_time_ms: f64) -> Option<BodyState> {
        self.interpolators.get(id)?.sample(render_time_ms)
    }
}

/// True iff the squared position difference exceeds `threshold^2`.
pub fn needs_correction(predicted: Vec3, authoritative: Vec3, threshold: f32) -> bool {
    predicted.distance_squared(authoritative) > threshold * threshold
}

/// Lerps position, slerps orientation, and snaps velocities straight to the
/// authoritative target.
pub fn blend_body_state(
    current: &BodyState,
    target: &BodyState,
    position_lerp_speed: f32,
    rotation_slerp_speed: f32,
) -> BodyState {
    BodyState {
        position: current.position.lerp(target.position, position_lerp_speed),
        orientation: current.orientation.slerp(target.orientation, rotation_slerp_speed),
        linear_velocity: target.linear_velocity,
        angular_velocity: target.angular_velocity,
        sleeping: target.sleeping,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(tick: u32) -> InputBatch {
        InputBatch { tick, actions: vec![] }
    }

    #[test]
    fn pending_inputs_at_or_below_server_tick_are_dropped() {
        let mut reconciler = StateReconciler::new(3);
        reconciler.record_pending_input(5, batch(5));
        reconciler.record_pending_input(10, batch(10));

        reconciler.process_frame(5, 0.0, &[], 0.0, 0.0);
        assert_eq!(reconciler.pending_input_count(), 1);
    }

    #[test]
    fn local_bodies_go_to_corrections_not_interpolation() {
        let mut reconciler = StateReconciler::new(3);
        reconciler.set_local_bodies(["player-1".to_string()]);

        let frame = reconciler.process_frame(
            1,
            0.0,
            &[("player-1".to_string(), BodyState::IDENTITY)],
            0.0,
            0.0,
        );
        assert_eq!(frame.local_corrections.len(), 1);
        assert!(frame.remote_states.is_empty());
    }

    #[test]
    fn remote_body_is_interpolated_and_sampleable_later() {
        let mut reconciler = StateReconciler::new(3);
        let state = BodyState { position: Vec3::new(2.0, 0.0, 0.0), ..BodyState::IDENTITY };
        let frame = reconciler.process_frame(1, 0.0, &[("box".to_string(), state)], 0.0, 0.0);
        assert_eq!(frame.remote_states.len(), 1);
        assert!(reconciler.sample_remote("box", 0.0).is_some());
    }

    #[test]
    fn needs_correction_respects_threshold() {
        assert!(!needs_correction(Vec3::ZERO, Vec3::new(0.05, 0.0, 0.0), 0.1));
        assert!(needs_correction(Vec3::ZERO, Vec3::new(0.2, 0.0, 0.0), 0.1));
    }

    #[test]
    fn blend_snaps_velocity_and_eases_position() {
        let current = BodyState::IDENTITY;
        let target = BodyState {
            position: Vec3::new(10.0, 0.0, 0.0),
            linear_velocity: Vec3::new(1.0, 0.0, 0.0),
            ..BodyState::IDENTITY
        };
        let blended = blend_body_state(&current, &target, 0.3, 0.3);
        assert!((blended.position.x - 3.0).abs() < 1e-4);
        assert_eq!(blended.linear_velocity, target.linear_velocity);
    }
}

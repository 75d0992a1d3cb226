pub mod input_buffer;
pub mod manager;
pub mod state_tracker;

use std::collections::HashMap;

use glam::Vec3;
use rapier3d::dynamics::{ImpulseJointHandle, RigidBodyHandle};
use thiserror::Error;

use crate::body::BodyDescriptor;
use crate::codec::message::{CollisionEventWire, SnapshotBody};
use crate::codec::room_state::{BodyIdent, RoomStateFrame, WireBody};
use crate::constraint::ConstraintDescriptor;
use crate::input::InputBatch;
use crate::physics::PhysicsWorld;
use crate::simulation::FixedTimestep;

use input_buffer::InputBuffer;
use state_tracker::StateTracker;

pub type ClientId = u64;

pub const BROADCAST_INTERVAL_TICKS: u32 = crate::clock::BROADCAST_INTERVAL_TICKS;

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("body id '{0}' already exists in this room")]
    DuplicateBodyId(String),
    #[error("body id '{0}' does not exist in this room")]
    UnknownBodyId(String),
    #[error("constraint references an unknown body")]
    UnknownConstraintBody,
}

/// Everything produced by one tick that the dispatcher may need to
/// broadcast.
#[derive(Default)]
pub struct TickOutcome {
    pub state_frame: Option<RoomStateFrame>,
    pub collision_events: Vec<CollisionEventWire>,
}

/// Owns one physics world, its client set, per-client input buffers, and the
/// bookkeeping needed to reconstruct state on reset.
pub struct Room {
    pub id: String,
    physics: PhysicsWorld,
    gravity: Vec3,
    handles: HashMap<String, RigidBodyHandle>,
    handle_to_id: HashMap<RigidBodyHandle, String>,
    descriptors: HashMap<String, BodyDescriptor>,
    constraints: HashMap<String, ImpulseJointHandle>,
    initial_bodies: Vec<BodyDescriptor>,
    initial_constraints: Vec<ConstraintDescriptor>,
    clients: std::collections::HashSet<ClientId>,
    input_buffers: HashMap<ClientId, InputBuffer>,
    tick: u32,
    ticks_since_broadcast: u32,
    pending_events: Vec<CollisionEventWire>,
    tracker: StateTracker,
    timestep: FixedTimestep,
    running: bool,
}

impl Room {
    pub fn new(
        id: String,
        initial_bodies: Vec<BodyDescriptor>,
        initial_constraints: Vec<ConstraintDescriptor>,
        gravity: Vec3,
        tick_rate: u32,
    ) -> Self {
        let mut room = Self {
            id,
            physics: PhysicsWorld::new(gravity),
            gravity,
            handles: HashMap::new(),
            handle_to_id: HashMap::new(),
            descriptors: HashMap::new(),
            constraints: HashMap::new(),
            initial_bodies,
            initial_constraints,
            clients: std::collections::HashSet::new(),
            input_buffers: HashMap::new(),
            tick: 0,
            ticks_since_broadcast: 0,
            pending_events: Vec::new(),
            tracker: StateTracker::new(),
            timestep: FixedTimestep::new(tick_rate),
            running: false,
        };
        room.rebuild_world();
        room
    }

    fn rebuild_world(&mut self) {
        self.physics = PhysicsWorld::new(self.gravity);
        self.handles.clear();
        self.handle_to_id.clear();
        self.descriptors.clear();
        self.constraints.clear();

        let initial_bodies = self.initial_bodies.clone();
        for desc in &initial_bodies {
            self.insert_body(desc.clone());
        }
        let initial_constraints = self.initial_constraints.clone();
        for desc in &initial_constraints {
            let _ = self.insert_constraint(desc);
        }
    }

    fn insert_body(&mut self, desc: BodyDescriptor) -> RigidBodyHandle {
        let handle = self.physics.add_body(&desc);
        self.handles.insert(desc.id.clone(), handle);
        self.handle_to_id.insert(handle, desc.id.clone());
        self.descriptors.insert(desc.id.clone(), desc);
        handle
    }

    fn insert_constraint(&mut self, desc: &ConstraintDescriptor) -> Result<(), RoomError> {
        let (&body_a, &body_b) = (
            self.handles.get(&desc.body_a).ok_or(RoomError::UnknownConstraintBody)?,
            self.handles.get(&desc.body_b).ok_or(RoomError::UnknownConstraintBody)?,
        );
        let handle = self.physics.add_constraint(desc, body_a, body_b);
        self.constraints.insert(desc.id.clone(), handle);
        Ok(())
    }

    pub fn add_body(&mut self, desc: BodyDescriptor) -> Result<u16, RoomError> {
        if self.handles.contains_key(&desc.id) {
            return Err(RoomError::DuplicateBodyId(desc.id));
        }
        let id = desc.id.clone();
        self.insert_body(desc);
        Ok(self.tracker.ensure_body_index(&id))
    }

    pub fn remove_body(&mut self, id: &str) -> Result<(), RoomError> {
        let handle = self
            .handles
            .remove(id)
            .ok_or_else(|| RoomError::UnknownBodyId(id.to_string()))?;
        self.handle_to_id.remove(&handle);
        self.descriptors.remove(id);
        self.physics.remove_body(handle);
        self.tracker.remove(id);
        Ok(())
    }

    pub fn add_client(&mut self, client_id: ClientId) {
        self.clients.insert(client_id);
        self.input_buffers.insert(client_id, InputBuffer::new());
    }

    /// Returns true if the room has no clients left, the signal to stop its
    /// simulation loop.
    pub fn remove_client(&mut self, client_id: ClientId) -> bool {
        self.clients.remove(&client_id);
        self.input_buffers.remove(&client_id);
        self.clients.is_empty()
    }

    /// Stamps the batch with the room's current tick regardless of whatever
    /// tick the client attached, then buffers it -- inputs are applied on
    /// the next tick that runs, not replayed against a client-requested one.
    pub fn buffer_input(&mut self, client_id: ClientId, mut batch: InputBatch) {
        batch.tick = self.tick;
        if let Some(buffer) = self.input_buffers.get_mut(&client_id) {
            buffer.push(batch);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self) {
        self.running = true;
        self.timestep.reset();
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Stops the loop if running, rebuilds the world from the initial
    /// descriptors, and clears every client's input buffer and the state
    /// tracker, leaving the room ready to `start()` again at tick zero.
    pub fn reset(&mut self) {
        self.stop();
        self.rebuild_world();
        for buffer in self.input_buffers.values_mut() {
            buffer.clear();
        }
        self.tracker = StateTracker::new();
        self.tick = 0;
        self.ticks_since_broadcast = 0;
        self.pending_events.clear();
    }

    pub fn accumulate(&mut self, elapsed_secs: f32) {
        self.timestep.accumulate(elapsed_secs);
    }

    /// Runs every tick that has accumulated, returning the outcome of the
    /// last tick that produced a broadcast (if any ran).
    pub fn drain_ticks(&mut self, now_ms: f64) -> Vec<TickOutcome> {
        let mut outcomes = Vec::new();
        while self.timestep.consume_tick() {
            outcomes.push(self.tick_once(now_ms));
        }
        outcomes
    }

    fn tick_once(&mut self, now_ms: f64) -> TickOutcome {
        let client_ids: Vec<ClientId> = self.input_buffers.keys().copied().collect();
        for client_id in client_ids {
            let batches = self
                .input_buffers
                .get_mut(&client_id)
                .map(|b| b.take(self.tick))
                .unwrap_or_default();
            for batch in batches {
                for action in &batch.actions {
                    if let Some(&handle) = self.handles.get(action.body_id()) {
                        self.physics.apply_action(handle, action);
                    }
                }
            }
        }

        let raw_events = self.physics.step();
        for event in raw_events {
            let (Some(body_a), Some(body_b)) = (
                self.handle_to_id.get(&event.body_a).cloned(),
                self.handle_to_id.get(&event.body_b).cloned(),
            ) else {
                continue;
            };
            self.pending_events.push(CollisionEventWire {
                kind: event.kind.into(),
                body_a,
                body_b,
                point: event.point,
                normal: event.normal,
                impulse: event.impulse,
            });
        }

        self.tick += 1;
        self.ticks_since_broadcast += 1;

        let mut outcome = TickOutcome::default();
        if self.ticks_since_broadcast >= BROADCAST_INTERVAL_TICKS {
            self.ticks_since_broadcast = 0;

            let live: Vec<(String, crate::body::BodyState)> = self
                .handles
                .iter()
                .filter_map(|(id, &handle)| self.physics.body_state(handle).map(|s| (id.clone(), s)))
                .collect();
            let deltas = self
                .tracker
                .delta(live.iter().map(|(id, state)| (id.as_str(), *state)));

            if !deltas.is_empty() {
                outcome.state_frame = Some(RoomStateFrame {
                    tick: self.tick,
                    timestamp_ms: now_ms,
                    is_delta: true,
                    bodies: deltas
                        .into_iter()
                        .map(|d| WireBody {
                            ident: BodyIdent::Index(d.index),
                            mask: d.mask,
                            state: d.state,
                        })
                        .collect(),
                });
            }

            outcome.collision_events = std::mem::take(&mut self.pending_events);
        }

        outcome
    }

    /// A full snapshot and id map, for `join_room`/`simulation_started`.
    pub fn snapshot(&mut self) -> (Vec<SnapshotBody>, HashMap<String, u16>) {
        let live: Vec<(String, crate::body::BodyState)> = self
            .handles
            .iter()
            .filter_map(|(id, &handle)| self.physics.body_state(handle).map(|s| (id.clone(), s)))
            .collect();
        let deltas = self
            .tracker
            .snapshot(live.iter().map(|(id, state)| (id.as_str(), *state)));

        let mut id_map = HashMap::new();
        let snapshot = deltas
            .into_iter()
            .map(|d| {
                id_map.insert(d.id.clone(), d.index);
                SnapshotBody {
                    id: d.id,
                    index: d.index,
                    position: d.state.position,
                    orientation: d.state.orientation,
                    linear_velocity: d.state.linear_velocity,
                    angular_velocity: d.state.angular_velocity,
                }
            })
            .collect();
        (snapshot, id_map)
    }

    pub fn tick_count(&self) -> u32 {
        self.tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{MotionType, Shape};
    use crate::codec::message::CollisionEventKind;
    use crate::input::InputAction;

    const TICK_RATE: u32 = 60;
    const DT: f32 = 1.0 / TICK_RATE as f32;

    fn run_ticks(room: &mut Room, count: u32) -> Vec<TickOutcome> {
        let mut outcomes = Vec::new();
        for i in 0..count {
            room.accumulate(DT);
            outcomes.extend(room.drain_ticks(i as f64 * (DT as f64 * 1000.0)));
        }
        outcomes
    }

    fn falling_box(id: &str, height: f32) -> BodyDescriptor {
        BodyDescriptor::new(id, Shape::Box { half_extents: Vec3::splat(0.5) }, MotionType::Dynamic, Vec3::new(0.0, height, 0.0))
    }

    fn static_floor(id: &str) -> BodyDescriptor {
        BodyDescriptor::new(
            id,
            Shape::Box { half_extents: Vec3::new(10.0, 0.5, 10.0) },
            MotionType::Static,
            Vec3::new(0.0, -0.5, 0.0),
        )
    }

    #[test]
    fn gravity_pulls_a_falling_body_down_and_it_lands_on_the_floor() {
        let mut room = Room::new(
            "falling".into(),
            vec![falling_box("cube", 5.0), static_floor("floor")],
            vec![],
            Vec3::new(0.0, -9.81, 0.0),
            TICK_RATE,
        );
        room.add_client(1);

        let outcomes = run_ticks(&mut room, 180);

        let collided = outcomes
            .iter()
            .flat_map(|o| o.collision_events.iter())
            .any(|e| matches!(e.kind, CollisionEventKind::CollisionStarted));
        assert!(collided, "expected at least one collision-started event as the cube lands");

        let frames: Vec<_> = outcomes.iter().filter_map(|o| o.state_frame.as_ref()).collect();
        assert!(!frames.is_empty(), "expected at least one broadcast state frame");
    }

    #[test]
    fn two_static_bodies_produce_one_full_delta_then_no_further_broadcast() {
        let mut room = Room::new(
            "statics".into(),
            vec![static_floor("floor"), static_floor("wall")],
            vec![],
            Vec3::ZERO,
            TICK_RATE,
        );
        room.add_client(1);

        let outcomes = run_ticks(&mut room, 3);
        let frames: Vec<_> = outcomes.iter().filter_map(|o| o.state_frame.as_ref()).collect();
        assert_eq!(frames.len(), 1, "only the broadcast tick should have produced a frame");
        assert_eq!(frames[0].bodies.len(), 2);
        for body in &frames[0].bodies {
            assert_eq!(body.mask, state_tracker::FieldMask::all());
        }

        let outcomes = run_ticks(&mut room, 3);
        let frames: Vec<_> = outcomes.iter().filter_map(|o| o.state_frame.as_ref()).collect();
        assert!(frames.is_empty(), "static bodies that have not moved produce no further broadcast");
    }

    #[test]
    fn snapshot_lists_every_body_with_a_permutation_of_indices() {
        let mut room = Room::new(
            "snapshot-room".into(),
            vec![falling_box("a", 1.0), falling_box("b", 2.0), falling_box("c", 3.0)],
            vec![],
            Vec3::ZERO,
            TICK_RATE,
        );

        let (bodies, id_map) = room.snapshot();
        assert_eq!(bodies.len(), 3);
        assert_eq!(id_map.len(), 3);

        let mut indices: Vec<u16> = id_map.values().copied().collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);

        let ids: std::collections::HashSet<&str> = id_map.keys().map(String::as_str).collect();
        assert_eq!(ids, std::collections::HashSet::from(["a", "b", "c"]));

        for body in &bodies {
            assert_eq!(id_map.get(&body.id).copied(), Some(body.index));
        }
    }

    #[test]
    fn reset_restores_initial_poses_after_ticking() {
        let mut room = Room::new(
            "resettable".into(),
            vec![falling_box("cube", 5.0), static_floor("floor")],
            vec![],
            Vec3::new(0.0, -9.81, 0.0),
            TICK_RATE,
        );

        room.start();
        run_ticks(&mut room, 60);
        assert!(room.tick_count() > 0);

        room.reset();
        room.start();

        let (bodies, _) = room.snapshot();
        let cube = bodies.iter().find(|b| b.id == "cube").expect("cube body present after reset");
        assert!((cube.position - Vec3::new(0.0, 5.0, 0.0)).length() < 1e-3);
        assert_eq!(cube.orientation, glam::Quat::IDENTITY);
        assert_eq!(cube.linear_velocity, Vec3::ZERO);
        assert_eq!(room.tick_count(), 0);
    }

    #[test]
    fn buffered_input_is_applied_on_the_next_tick_regardless_of_requested_tick() {
        let mut room = Room::new(
            "impulse-room".into(),
            vec![falling_box("cube", 0.0)],
            vec![],
            Vec3::ZERO,
            TICK_RATE,
        );
        room.add_client(1);

        // A client-requested tick far in the future should still land on
        // the very next tick the room runs, not be held until then.
        room.buffer_input(
            1,
            InputBatch {
                tick: 999,
                actions: vec![InputAction::Impulse { body_id: "cube".into(), value: Vec3::new(5.0, 0.0, 0.0) }],
            },
        );

        run_ticks(&mut room, 1);

        let (bodies, _) = room.snapshot();
        let cube = bodies.iter().find(|b| b.id == "cube").unwrap();
        assert!(cube.linear_velocity.x > 0.0, "impulse should have given the cube positive x velocity");
    }

    #[test]
    fn joined_room_constraint_links_two_bodies() {
        let room = Room::new(
            "constrained".into(),
            vec![falling_box("a", 5.0), falling_box("b", 5.5)],
            vec![ConstraintDescriptor {
                id: "link".into(),
                body_a: "a".into(),
                body_b: "b".into(),
                local_pivot_a: Vec3::ZERO,
                local_pivot_b: Vec3::ZERO,
                kind: crate::constraint::ConstraintKind::Distance { max_distance: 1.0 },
                collision: true,
            }],
            Vec3::new(0.0, -9.81, 0.0),
            TICK_RATE,
        );
        assert_eq!(room.id, "constrained");
    }

    #[test]
    fn unknown_body_id_on_remove_is_rejected() {
        let mut room = Room::new("empty".into(), vec![], vec![], Vec3::ZERO, TICK_RATE);
        assert!(room.remove_body("ghost").is_err());
    }

    #[test]
    fn removing_the_last_client_signals_the_room_is_now_empty() {
        let mut room = Room::new("solo".into(), vec![], vec![], Vec3::ZERO, TICK_RATE);
        room.add_client(1);
        room.add_client(2);
        assert!(!room.remove_client(1));
        assert!(room.remove_client(2));
    }
}

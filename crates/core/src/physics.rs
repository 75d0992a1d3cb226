//! Black-box physics facade. Everything above this module talks in terms of
//! caller-supplied body ids; everything at and below it talks rapier handles.

use std::collections::HashMap;

use crossbeam_channel::{Receiver, bounded};
use glam::{Quat, Vec3};
use rapier3d::pipeline::{ChannelEventCollector, CollisionEvent};
use rapier3d::prelude::*;

use crate::body::{BodyDescriptor, BodyState, MotionType, Shape};
use crate::constraint::{ConstraintDescriptor, ConstraintKind};
use crate::input::InputAction;

/// Cap on collision events drained per tick; a pathological tick that trips
/// more than this many contact transitions drops the remainder rather than
/// stalling the step.
const MAX_EVENTS_PER_TICK: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicsEventKind {
    CollisionStarted,
    CollisionFinished,
    TriggerEntered,
    TriggerExited,
}

#[derive(Debug, Clone, Copy)]
pub struct PhysicsEvent {
    pub kind: PhysicsEventKind,
    pub body_a: RigidBodyHandle,
    pub body_b: RigidBodyHandle,
    pub point: Option<Vec3>,
    pub normal: Option<Vec3>,
    pub impulse: Option<f32>,
}

pub struct PhysicsWorld {
    pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    gravity: Vector<Real>,
    collider_owner: HashMap<ColliderHandle, RigidBodyHandle>,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, -9.81, 0.0))
    }
}

impl PhysicsWorld {
    const TICK_RATE: Real = 1.0 / 60.0;

    pub fn new(gravity: Vec3) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = Self::TICK_RATE;
        integration_parameters.min_ccd_dt = Self::TICK_RATE / 100.0;

        Self {
            pipeline: PhysicsPipeline::new(),
            integration_parameters,
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            gravity: Vector::new(gravity.x, gravity.y, gravity.z),
            collider_owner: HashMap::new(),
        }
    }

    /// A fixed joint anchors a full relative pose, not just a point, so a
    /// lock constraint's optional perpendicular axis becomes the local
    /// frame's orientation (both bodies share it) rather than a point.
    fn lock_frame_rotation(perpendicular_axis: Option<Vec3>) -> Rotation {
        perpendicular_axis
            .filter(|axis| axis.length_squared() > 0.0)
            .map(|axis| {
                let q = Quat::from_rotation_arc(Vec3::Z, axis.normalize());
                Rotation::from_xyzw(q.x, q.y, q.z, q.w).normalize()
            })
            .unwrap_or_else(Rotation::identity)
    }

    fn joint_axis_from_index(index: u8) -> Option<JointAxis> {
        match index {
            0 => Some(JointAxis::X),
            1 => Some(JointAxis::Y),
            2 => Some(JointAxis::Z),
            3 => Some(JointAxis::AngX),
            4 => Some(JointAxis::AngY),
            5 => Some(JointAxis::AngZ),
            _ => None,
        }
    }

    fn axis_mask(axis: JointAxis) -> JointAxesMask {
        match axis {
            JointAxis::X => JointAxesMask::X,
            JointAxis::Y => JointAxesMask::Y,
            JointAxis::Z => JointAxesMask::Z,
            JointAxis::AngX => JointAxesMask::ANG_X,
            JointAxis::AngY => JointAxesMask::ANG_Y,
            JointAxis::AngZ => JointAxesMask::ANG_Z,
        }
    }

    fn shared_shape(shape: &Shape) -> SharedShape {
        match *shape {
            Shape::Box { half_extents } => {
                SharedShape::cuboid(half_extents.x, half_extents.y, half_extents.z)
            }
            Shape::Sphere { radius } => SharedShape::ball(radius),
            Shape::Capsule { half_height, radius } => SharedShape::capsule_y(half_height, radius),
            Shape::Trimesh { .. } => {
                // Mesh geometry is out of the physics facade's contract here:
                // trimesh colliders are constructed by the caller's asset
                // pipeline and handed in fully built. A unit cube stands in
                // so the body still exists and can be stepped/queried.
                SharedShape::cuboid(0.5, 0.5, 0.5)
            }
        }
    }

    pub fn add_body(&mut self, desc: &BodyDescriptor) -> RigidBodyHandle {
        let rotation = Rotation::from_xyzw(
            desc.orientation.x,
            desc.orientation.y,
            desc.orientation.z,
            desc.orientation.w,
        )
        .normalize();
        let translation = Vector::new(desc.position.x, desc.position.y, desc.position.z);

        let body_builder = match desc.motion_type {
            MotionType::Dynamic => RigidBodyBuilder::dynamic().ccd_enabled(true),
            MotionType::Static => RigidBodyBuilder::fixed(),
            MotionType::KinematicPosition => RigidBodyBuilder::kinematic_position_based(),
        };
        let body = body_builder
            .position(Pose::from_parts(translation, rotation))
            .build();
        let handle = self.bodies.insert(body);

        let mut collider_builder = ColliderBuilder::new(Self::shared_shape(&desc.shape))
            .friction(desc.friction)
            .restitution(desc.restitution)
            .sensor(desc.is_trigger);
        match (desc.mass, desc.center_of_mass) {
            (Some(mass), Some(com)) => {
                collider_builder = collider_builder.mass_properties(MassProperties::new(
                    Point::new(com.x, com.y, com.z),
                    mass,
                    Vector::zeros(),
                ));
            }
            (Some(mass), None) => {
                collider_builder = collider_builder.mass(mass);
            }
            (None, Some(com)) => {
                collider_builder = collider_builder.mass_properties(MassProperties::new(
                    Point::new(com.x, com.y, com.z),
                    1.0,
                    Vector::zeros(),
                ));
            }
            (None, None) => {}
        }
        let collider = collider_builder.build();
        let collider_handle = self
            .colliders
            .insert_with_parent(collider, handle, &mut self.bodies);
        self.collider_owner.insert(collider_handle, handle);

        handle
    }

    pub fn remove_body(&mut self, handle: RigidBodyHandle) {
        self.bodies.remove(
            handle,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
        self.collider_owner.retain(|_, owner| *owner != handle);
    }

    pub fn add_constraint(
        &mut self,
        desc: &ConstraintDescriptor,
        body_a: RigidBodyHandle,
        body_b: RigidBodyHandle,
    ) -> ImpulseJointHandle {
        let pivot_a = Point::new(desc.local_pivot_a.x, desc.local_pivot_a.y, desc.local_pivot_a.z);
        let pivot_b = Point::new(desc.local_pivot_b.x, desc.local_pivot_b.y, desc.local_pivot_b.z);

        let joint: GenericJoint = match &desc.kind {
            ConstraintKind::BallAndSocket => {
                SphericalJointBuilder::new().local_anchor1(pivot_a).local_anchor2(pivot_b).build().into()
            }
            ConstraintKind::Hinge { axis } => RevoluteJointBuilder::new(UnitVector::new_normalize(
                Vector::new(axis.x, axis.y, axis.z),
            ))
            .local_anchor1(pivot_a)
            .local_anchor2(pivot_b)
            .build()
            .into(),
            ConstraintKind::Distance { max_distance } => RopeJointBuilder::new(*max_distance)
                .local_anchor1(pivot_a)
                .local_anchor2(pivot_b)
                .build()
                .into(),
            ConstraintKind::Prismatic { axis } => PrismaticJointBuilder::new(UnitVector::new_normalize(
                Vector::new(axis.x, axis.y, axis.z),
            ))
            .local_anchor1(pivot_a)
            .local_anchor2(pivot_b)
            .build()
            .into(),
            ConstraintKind::Lock { perpendicular_axis } => {
                let rotation = Self::lock_frame_rotation(*perpendicular_axis);
                FixedJointBuilder::new()
                    .local_frame1(Pose::from_parts(pivot_a.coords, rotation))
                    .local_frame2(Pose::from_parts(pivot_b.coords, rotation))
                    .build()
                    .into()
            }
            ConstraintKind::Spring {
                max_distance,
                stiffness,
                damping,
            } => SpringJointBuilder::new(*max_distance, *stiffness, *damping)
                .local_anchor1(pivot_a)
                .local_anchor2(pivot_b)
                .build()
                .into(),
            ConstraintKind::SixDof { axis, limits } => {
                // An axis absent from `limits` is locked; a present entry
                // with both bounds absent is left free; a present entry
                // with either bound set gets that bound applied.
                let mut locked = JointAxesMask::all();
                for limit in limits {
                    if let Some(axis_enum) = Self::joint_axis_from_index(limit.axis) {
                        locked.remove(Self::axis_mask(axis_enum));
                    }
                }
                let mut builder = GenericJointBuilder::new(locked)
                    .local_anchor1(pivot_a)
                    .local_anchor2(pivot_b)
                    .local_axis1(UnitVector::new_normalize(Vector::new(axis.x, axis.y, axis.z)))
                    .local_axis2(UnitVector::new_normalize(Vector::new(axis.x, axis.y, axis.z)));
                for limit in limits {
                    if limit.min_limit.is_none() && limit.max_limit.is_none() {
                        continue;
                    }
                    if let Some(axis_enum) = Self::joint_axis_from_index(limit.axis) {
                        let min = limit.min_limit.unwrap_or(f32::NEG_INFINITY);
                        let max = limit.max_limit.unwrap_or(f32::INFINITY);
                        builder = builder.limits(axis_enum, [min, max]);
                    }
                }
                builder.build()
            }
        };

        let mut joint = joint;
        joint.set_contacts_enabled(desc.collision);
        self.impulse_joints.insert(body_a, body_b, joint, true)
    }

    pub fn remove_constraint(&mut self, handle: ImpulseJointHandle) {
        self.impulse_joints.remove(handle, true);
    }

    pub fn apply_action(&mut self, handle: RigidBodyHandle, action: &InputAction) {
        let Some(body) = self.bodies.get_mut(handle) else {
            return;
        };
        match action {
            InputAction::Impulse { value, .. } => {
                body.apply_impulse(Vector::new(value.x, value.y, value.z), true);
            }
            InputAction::Force { value, .. } => {
                body.reset_forces(false);
                body.add_force(Vector::new(value.x, value.y, value.z), true);
            }
            InputAction::SetVelocity { value, .. } => {
                body.set_linvel(Vector::new(value.x, value.y, value.z), true);
            }
            InputAction::SetPose {
                position,
                orientation,
                ..
            } => {
                let rotation =
                    Rotation::from_xyzw(orientation.x, orientation.y, orientation.z, orientation.w)
                        .normalize();
                let pose = Pose::from_parts(Vector::new(position.x, position.y, position.z), rotation);
                if body.is_kinematic() {
                    body.set_next_kinematic_position(pose);
                } else {
                    body.set_position(pose, true);
                }
            }
        }
    }

    /// Steps the world by exactly one fixed timestep and returns every
    /// collision/trigger transition observed during the step.
    pub fn step(&mut self) -> Vec<PhysicsEvent> {
        let (collision_tx, collision_rx) = bounded(MAX_EVENTS_PER_TICK);
        let (contact_tx, _contact_rx) = bounded(MAX_EVENTS_PER_TICK);
        let collector = ChannelEventCollector::new(collision_tx, contact_tx);

        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            &(),
            &collector,
        );

        self.drain_events(collision_rx)
    }

    fn drain_events(&self, rx: Receiver<CollisionEvent>) -> Vec<PhysicsEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            let (c1, c2, started) = match event {
                CollisionEvent::Started(c1, c2, _) => (c1, c2, true),
                CollisionEvent::Stopped(c1, c2, _) => (c1, c2, false),
            };
            let (Some(&body_a), Some(&body_b)) =
                (self.collider_owner.get(&c1), self.collider_owner.get(&c2))
            else {
                continue;
            };
            let is_sensor = self
                .colliders
                .get(c1)
                .map(|c| c.is_sensor())
                .unwrap_or(false)
                || self
                    .colliders
                    .get(c2)
                    .map(|c| c.is_sensor())
                    .unwrap_or(false);

            let kind = match (is_sensor, started) {
                (true, true) => PhysicsEventKind::TriggerEntered,
                (true, false) => PhysicsEventKind::TriggerExited,
                (false, true) => PhysicsEventKind::CollisionStarted,
                (false, false) => PhysicsEventKind::CollisionFinished,
            };

            let (point, normal, impulse) = if started && !is_sensor {
                self.first_contact(c1, c2)
            } else {
                (None, None, None)
            };

            events.push(PhysicsEvent {
                kind,
                body_a,
                body_b,
                point,
                normal,
                impulse,
            });
        }
        events
    }

    fn first_contact(
        &self,
        c1: ColliderHandle,
        c2: ColliderHandle,
    ) -> (Option<Vec3>, Option<Vec3>, Option<f32>) {
        let Some(pair) = self.narrow_phase.contact_pair(c1, c2) else {
            return (None, None, None);
        };
        let Some(manifold) = pair.manifolds.first() else {
            return (None, None, None);
        };
        let point = manifold.points.first().map(|p| {
            let local = p.local_p1;
            Vec3::new(local.x, local.y, local.z)
        });
        let normal = Some(Vec3::new(
            manifold.local_n1.x,
            manifold.local_n1.y,
            manifold.local_n1.z,
        ));
        let impulse = manifold.points.first().map(|p| p.data.impulse);
        (point, normal, impulse)
    }

    pub fn body_state(&self, handle: RigidBodyHandle) -> Option<BodyState> {
        self.bodies.get(handle).map(|body| {
            let t = body.translation();
            let r = body.rotation();
            let lv = body.linvel();
            let av = body.angvel();
            BodyState {
                position: Vec3::new(t.x, t.y, t.z),
                orientation: Quat::from_xyzw(r.i, r.j, r.k, r.w),
                linear_velocity: Vec3::new(lv.x, lv.y, lv.z),
                angular_velocity: Vec3::new(av.x, av.y, av.z),
                sleeping: body.is_sleeping(),
            }
        })
    }
}

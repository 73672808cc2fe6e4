// src/physics.rs
//
// Rapier-backed contact provider: one dynamic chassis body per rig, raycast
// suspension per wheel, a spinning-wheel tire model and ground patches that
// carry a material id.
//
// Per frame:
//   world.sense(dt)                  raycasts, loads, slips
//   vehicle.tick(dt, input, &mut world.link(id)?)
//   world.step(dt)                   suspension + tire + anti-roll impulses, integrate
//
// Rapier is right-handed. Chassis-local rapier axes are +Z forward, +Y up,
// +X left; the crate frame is +X right. Linear vectors flip x, angular
// vectors flip y and z.

use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::Arc;

use log::{debug, info, warn};
use rapier3d::prelude::*;

use crate::config::VehicleConfig;
use crate::contact::{ChassisMotion, ContactProvider, GroundMaterials, Side, WheelCommand, WheelContact, WheelSlot};
use crate::error::{ConfigError, ConfigResult};

const GROUP_GROUND: Group = Group::from_bits_truncate(0b0001);
const GROUP_CHASSIS: Group = Group::from_bits_truncate(0b0010);

const RAY_LIFT: Real = 0.02;          // ray starts just above the wheel top
const DAMPER_DEADZONE: Real = 0.05;   // m/s
const REBOUND_SCALE: Real = 0.15;     // one-way damper
const DAMPER_CAP: Real = 0.6;         // fraction of the spring force
const MAX_NORMAL_FORCE: Real = 25_000.0;
const MIN_NORMAL_FORCE: Real = 200.0; // keeps grounded wheels supporting
const MAX_FORWARD_SLIP: f32 = 5.0;
const ROLLING_DAMPING: f32 = 0.05;    // per unit of material damping
const WORLD_LIMIT: Real = 1_000.0;

type LocalVec = ::nalgebra::Vector3<f32>;

pub type RigId = usize;

// ============================================
// Rigs
// ============================================

#[derive(Debug, Clone)]
struct RigWheel {
    slot: WheelSlot,
    mount: Point<Real>,     // chassis-local (rapier axes)
    radius: Real,           // nominal, commands may shrink it

    contact: WheelContact,
    hit: Option<Point<Real>>,
    normal_force: Real,     // N
    spin: f32,              // rad/s, > 0 rolling forward
    command: WheelCommand,
    vertical: f32,          // N, anti-roll queued for the next step
}

#[derive(Debug, Clone)]
struct Rig {
    body: RigidBodyHandle,
    wheels: Vec<RigWheel>,

    stiffness: Real,
    damping: Real,
    rest_length: Real,
    max_length: Real,
    wheel_inertia: f32,
    tire_friction: f32,
}

impl Rig {
    fn wheel(&self, slot: WheelSlot) -> Option<&RigWheel> {
        self.wheels.iter().find(|w| w.slot == slot)
    }

    fn wheel_mut(&mut self, slot: WheelSlot) -> Option<&mut RigWheel> {
        self.wheels.iter_mut().find(|w| w.slot == slot)
    }
}

// ============================================
// World
// ============================================

pub struct PhysicsWorld {
    gravity: Vector<Real>,
    pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd: CCDSolver,
    query_pipeline: QueryPipeline,

    ground_body: RigidBodyHandle,
    ground: HashMap<ColliderHandle, usize>,   // collider -> material id
    materials: Arc<GroundMaterials>,
    rigs: Vec<Rig>,
}

impl PhysicsWorld {
    /// Flat ground of material 0 with its top surface at y = 0.
    pub fn new(materials: Arc<GroundMaterials>) -> Self {
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        let ground_body = bodies.insert(RigidBodyBuilder::fixed().translation(vector![0.0, -1.0, 0.0]).build());
        let floor = ColliderBuilder::cuboid(500.0, 1.0, 500.0)
            .collision_groups(InteractionGroups::new(GROUP_GROUND, GROUP_CHASSIS))
            .friction(1.2)
            .restitution(0.0)
            .build();
        let floor = colliders.insert_with_parent(floor, ground_body, &mut bodies);

        let mut ground = HashMap::new();
        ground.insert(floor, 0);

        info!("ground inserted ({} materials)", materials.len());

        Self {
            gravity: vector![0.0, -9.81, 0.0],
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders,
            joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            ground_body,
            ground,
            materials,
            rigs: Vec::new(),
        }
    }

    /// Box of `material` on the ground, e.g. a sand trap or an ice sheet.
    pub fn add_ground_patch(
        &mut self,
        center: [f32; 3],
        half_extents: [f32; 3],
        material: usize,
    ) -> ConfigResult<ColliderHandle> {
        if material >= self.materials.len() {
            return Err(ConfigError::UnknownGroundMaterial(material));
        }
        // the ground body sits 1 m down
        let [x, y, z] = center;
        let [hx, hy, hz] = half_extents;
        let patch = ColliderBuilder::cuboid(hx, hy, hz)
            .translation(vector![x, y + 1.0, z])
            .collision_groups(InteractionGroups::new(GROUP_GROUND, GROUP_CHASSIS))
            .friction(1.2)
            .restitution(0.0)
            .build();
        let handle = self.colliders.insert_with_parent(patch, self.ground_body, &mut self.bodies);
        self.ground.insert(handle, material);
        debug!("ground patch '{}' at {center:?}", self.materials.get(material).name);
        Ok(handle)
    }

    /// Chassis body plus one raycast wheel per axle side.
    pub fn spawn(&mut self, config: &VehicleConfig, position: [f32; 3]) -> RigId {
        let chassis = &config.chassis;
        let [hx, hy, hz] = chassis.half_extents;
        let [cx, cy, cz] = chassis.com_offset;
        let volume = 8.0 * hx * hy * hz;

        let rb = RigidBodyBuilder::dynamic()
            .translation(vector![position[0], position[1], position[2]])
            .linear_damping(chassis.linear_damping)
            .angular_damping(chassis.angular_damping)
            .ccd_enabled(true)
            .build();
        let collider = ColliderBuilder::cuboid(hx, hy, hz)
            .translation(vector![-cx, cy, cz])
            .collision_groups(InteractionGroups::new(GROUP_CHASSIS, GROUP_GROUND))
            .active_events(ActiveEvents::empty())
            .density(chassis.mass / volume.max(1e-3))
            .friction(0.0)
            .restitution(0.0)
            .build();

        let body = self.bodies.insert(rb);
        self.colliders.insert_with_parent(collider, body, &mut self.bodies);

        let mut wheels = Vec::with_capacity(config.axles.len() * 2);
        for (i, axle) in config.axles.iter().enumerate() {
            for side in [Side::Left, Side::Right] {
                // crate +X right is rapier -X
                let x = -side.sign() * axle.track_width * 0.5;
                wheels.push(RigWheel {
                    slot: WheelSlot::new(i, side),
                    mount: point![x, -chassis.wheel_mount_height, axle.position_z],
                    radius: axle.wheel.radius,
                    contact: WheelContact::airborne(),
                    hit: None,
                    normal_force: 0.0,
                    spin: 0.0,
                    command: WheelCommand { radius: axle.wheel.radius, ..WheelCommand::default() },
                    vertical: 0.0,
                });
            }
        }

        let (stiffness, damping) = chassis.suspension(wheels.len());
        debug!("suspension: k = {stiffness:.1} N/m, c = {damping:.1} N s/m");

        self.rigs.push(Rig {
            body,
            wheels,
            stiffness,
            damping,
            rest_length: chassis.suspension_rest_length,
            max_length: chassis.suspension_max_length,
            wheel_inertia: chassis.wheel_inertia.max(1e-3),
            tire_friction: chassis.tire_friction,
        });
        info!("spawned '{}' at {position:?} (rig {})", config.name, self.rigs.len() - 1);
        self.rigs.len() - 1
    }

    /// Puts a rig back at `position`, at rest and upright.
    pub fn reset(&mut self, id: RigId, position: [f32; 3]) -> bool {
        let Some(rig) = self.rigs.get_mut(id) else {
            return false;
        };
        let Some(body) = self.bodies.get_mut(rig.body) else {
            return false;
        };
        body.set_position(Isometry::translation(position[0], position[1], position[2]), true);
        body.set_linvel(vector![0.0, 0.0, 0.0], true);
        body.set_angvel(vector![0.0, 0.0, 0.0], true);
        for w in rig.wheels.iter_mut() {
            w.spin = 0.0;
            w.vertical = 0.0;
            w.contact = WheelContact::airborne();
            w.hit = None;
        }
        true
    }

    pub fn rig_count(&self) -> usize {
        self.rigs.len()
    }

    pub fn materials(&self) -> &Arc<GroundMaterials> {
        &self.materials
    }

    pub fn chassis_position(&self, id: RigId) -> Option<[f32; 3]> {
        let body = self.bodies.get(self.rigs.get(id)?.body)?;
        let t = body.translation();
        Some([t.x, t.y, t.z])
    }

    /// Provider view of one rig for a vehicle tick.
    pub fn link(&mut self, id: RigId) -> Option<ChassisLink<'_>> {
        let rig = self.rigs.get_mut(id)?;
        let body = self.bodies.get_mut(rig.body)?;
        Some(ChassisLink { rig, body })
    }

    // -------------------------
    // Sense
    // -------------------------

    /// Raycasts every wheel and refreshes loads, slips and wheel rpm.
    pub fn sense(&mut self, _dt: Real) {
        self.query_pipeline.update(&self.colliders);

        for rig in self.rigs.iter_mut() {
            let Some(body) = self.bodies.get(rig.body) else {
                continue;
            };
            let pos = *body.position();
            let linvel = *body.linvel();
            let angvel = *body.angvel();
            let com = *body.center_of_mass();
            let up = pos.rotation * vector![0.0, 1.0, 0.0];
            let filter = QueryFilter::default().exclude_rigid_body(rig.body);

            for wheel in rig.wheels.iter_mut() {
                let radius = wheel.command.radius.max(0.05);
                let origin = pos * (wheel.mount + vector![0.0, wheel.radius + RAY_LIFT, 0.0]);
                let dir = -up;
                let ray = Ray::new(origin, dir);
                let max_dist = rig.rest_length + rig.max_length + wheel.radius + RAY_LIFT;

                wheel.hit = None;
                wheel.normal_force = 0.0;

                let hit = self
                    .query_pipeline
                    .cast_ray(&self.bodies, &self.colliders, &ray, max_dist, true, filter);

                let Some((collider, toi)) = hit else {
                    wheel.contact = WheelContact { rpm: wheel.spin * 60.0 / TAU, ..WheelContact::airborne() };
                    continue;
                };

                let length = toi - wheel.radius - RAY_LIFT;
                let compression = (rig.rest_length - length).clamp(0.0, rig.max_length);
                if compression <= 0.0 {
                    wheel.contact = WheelContact { rpm: wheel.spin * 60.0 / TAU, ..WheelContact::airborne() };
                    continue;
                }

                let hit_point = origin + dir * toi;
                let r = hit_point.coords - com.coords;
                let point_vel = linvel + angvel.cross(&r);

                // spring + one-way damper
                let mut v_n = point_vel.dot(&up);
                if v_n.abs() < DAMPER_DEADZONE {
                    v_n = 0.0;
                }
                if v_n > 0.0 {
                    v_n *= REBOUND_SCALE;
                }
                let spring = rig.stiffness * compression;
                let damper = (-rig.damping * v_n).clamp(-spring * DAMPER_CAP, spring * DAMPER_CAP);
                let normal_force = (spring + damper).clamp(MIN_NORMAL_FORCE, MAX_NORMAL_FORCE);

                // slips along the steered wheel axes
                let (forward, right) = wheel_axes(&pos, wheel.command.steer_angle);
                let v_long = point_vel.dot(&forward);
                let v_lat = point_vel.dot(&right);
                let reference = v_long.abs().max(1.0);
                let forward_slip = ((wheel.spin * radius - v_long) / reference).clamp(-MAX_FORWARD_SLIP, MAX_FORWARD_SLIP);
                let sideways_slip = v_lat.atan2(reference);

                wheel.hit = Some(hit_point);
                wheel.normal_force = normal_force;
                wheel.contact = WheelContact {
                    grounded: true,
                    forward_slip,
                    sideways_slip,
                    normal: LocalVec::y(),
                    compression: compression / rig.max_length.max(1e-3),
                    material: self.ground.get(&collider).copied().unwrap_or(0),
                    rpm: wheel.spin * 60.0 / TAU,
                    load: normal_force,
                };
            }
        }
    }

    // -------------------------
    // Step
    // -------------------------

    /// Applies the queued wheel commands as impulses, then integrates.
    pub fn step(&mut self, dt: Real) {
        if !(dt.is_finite() && dt > 0.0) {
            return;
        }

        for rig in self.rigs.iter_mut() {
            let Some(body) = self.bodies.get_mut(rig.body) else {
                continue;
            };
            let impulses = tire_impulses(rig, body, dt);
            for (impulse, point) in impulses {
                body.apply_impulse_at_point(impulse, point, true);
            }
        }

        self.pipeline.step(
            &self.gravity,
            &IntegrationParameters { dt, ..IntegrationParameters::default() },
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );

        // exploded bodies go back near the origin
        for (_, body) in self.bodies.iter_mut() {
            let t = *body.translation();
            let bad = !(t.x.is_finite() && t.y.is_finite() && t.z.is_finite())
                || t.x.abs() > WORLD_LIMIT
                || t.y.abs() > WORLD_LIMIT
                || t.z.abs() > WORLD_LIMIT;
            if bad {
                body.set_translation(vector![0.0, 1.0, 0.0], true);
                body.set_linvel(vector![0.0, 0.0, 0.0], true);
                body.set_angvel(vector![0.0, 0.0, 0.0], true);
                warn!("body at {t:?} reset to the origin");
            }
        }
    }
}

/// World-space forward and right axes of a wheel steered by `steer_deg` (> 0 right).
fn wheel_axes(pos: &Isometry<Real>, steer_deg: f32) -> (Vector<Real>, Vector<Real>) {
    let (s, c) = steer_deg.to_radians().sin_cos();
    let forward = pos.rotation * vector![-s, 0.0, c];
    let right = pos.rotation * vector![-c, 0.0, -s];
    (forward, right)
}

/// Suspension, anti-roll and tire impulses for one rig; also integrates wheel spin.
fn tire_impulses(rig: &mut Rig, body: &RigidBody, dt: Real) -> Vec<(Vector<Real>, Point<Real>)> {
    let pos = *body.position();
    let linvel = *body.linvel();
    let angvel = *body.angvel();
    let com = *body.center_of_mass();
    let up = pos.rotation * vector![0.0, 1.0, 0.0];
    let share = body.mass() / rig.wheels.len().max(1) as Real;
    let inertia = rig.wheel_inertia;

    let mut out = Vec::with_capacity(rig.wheels.len() * 2);
    for wheel in rig.wheels.iter_mut() {
        let cmd = wheel.command;
        let radius = cmd.radius.max(0.05);

        // drive and brake act on the wheel alone
        wheel.spin += cmd.motor_torque / inertia * dt;
        let brake_dw = cmd.brake_torque.max(0.0) / inertia * dt;
        wheel.spin -= wheel.spin.clamp(-brake_dw, brake_dw);
        wheel.spin /= 1.0 + cmd.damping.max(0.0) * ROLLING_DAMPING * dt;

        let vertical = std::mem::take(&mut wheel.vertical);
        let Some(hit) = wheel.hit else {
            continue;
        };

        out.push((up * ((wheel.normal_force + vertical) * dt), hit));

        let r = hit.coords - com.coords;
        let point_vel = linvel + angvel.cross(&r);
        let (forward, right) = wheel_axes(&pos, cmd.steer_angle);
        let v_long = point_vel.dot(&forward);
        let v_lat = point_vel.dot(&right);

        // longitudinal: ground pulls the wheel toward rolling speed
        let mu_long = rig.tire_friction * cmd.forward_stiffness;
        let max_long = (mu_long * wheel.normal_force * dt).max(1e-6);
        let max_dw = max_long * radius / inertia;
        let dw = (v_long / radius - wheel.spin).clamp(-max_dw, max_dw);
        wheel.spin += dw;
        let j_long = -dw * inertia / radius;

        // lateral: brush impulse inside the friction ellipse
        let mu_lat = rig.tire_friction * cmd.sideways_stiffness;
        let max_lat = (mu_lat * wheel.normal_force * dt).max(1e-6);
        let used = (j_long / max_long).clamp(-1.0, 1.0);
        let lat_cap = max_lat * (1.0 - used * used).max(0.0).sqrt();
        let j_lat = (-v_lat * share).clamp(-lat_cap, lat_cap);

        out.push((forward * j_long + right * j_lat, hit));
    }
    out
}

// ============================================
// Provider view
// ============================================

/// One rig plus its chassis body, borrowed for a vehicle tick.
pub struct ChassisLink<'a> {
    rig: &'a mut Rig,
    body: &'a mut RigidBody,
}

impl ContactProvider for ChassisLink<'_> {
    fn contact(&self, wheel: WheelSlot) -> WheelContact {
        self.rig.wheel(wheel).map(|w| w.contact).unwrap_or_default()
    }

    fn motion(&self) -> ChassisMotion {
        let inv = self.body.rotation().inverse();
        let v = inv * *self.body.linvel();
        let w = inv * *self.body.angvel();
        ChassisMotion {
            local_velocity: LocalVec::new(-v.x, v.y, v.z),
            local_angular_velocity: LocalVec::new(w.x, -w.y, -w.z),
        }
    }

    fn set_motion(&mut self, motion: ChassisMotion) {
        let v = motion.local_velocity;
        let w = motion.local_angular_velocity;
        if !(v.iter().all(|c| c.is_finite()) && w.iter().all(|c| c.is_finite())) {
            return;
        }
        let rot = *self.body.rotation();
        self.body.set_linvel(rot * vector![-v.x, v.y, v.z], true);
        self.body.set_angvel(rot * vector![w.x, -w.y, -w.z], true);
    }

    fn command(&mut self, wheel: WheelSlot, command: &WheelCommand) {
        if let Some(w) = self.rig.wheel_mut(wheel) {
            w.command = *command;
        }
    }

    fn push_vertical(&mut self, wheel: WheelSlot, force: f32) {
        if let Some(w) = self.rig.wheel_mut(wheel) {
            if force.is_finite() {
                w.vertical += force;
            }
        }
    }
}

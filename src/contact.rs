// ==============================================================================
// contact.rs — BOUNDARY TO THE RIGID-BODY / CONTACT PROVIDER
// ------------------------------------------------------------------------------
// The drivetrain never integrates rigid bodies. Each tick it:
// - reads one WheelContact per wheel (slip, load, grounded, wheel rpm)
// - reads the chassis motion in chassis-local space
// - writes one WheelCommand per wheel (torques, steer angle, stiffness)
// - writes anti-roll vertical forces and helper velocity nudges
//
// Local frame used everywhere in this crate:
//   +X right, +Y up, +Z forward; yaw rate > 0 turns right (same sign as steer).
//
// GroundMaterials is the only data shared between vehicles; it is read-only
// after construction and handed around as Arc<GroundMaterials>.
// ==============================================================================

use std::fmt;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

// ============================================
// Wheel identification
// ============================================

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// -1 for left, +1 for right (matches the +X right convention).
    pub fn sign(self) -> f32 {
        match self {
            Side::Left => -1.0,
            Side::Right => 1.0,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct WheelSlot {
    pub axle: usize,
    pub side: Side,
}

impl WheelSlot {
    pub fn new(axle: usize, side: Side) -> Self {
        Self { axle, side }
    }

    pub fn left(axle: usize) -> Self {
        Self::new(axle, Side::Left)
    }

    pub fn right(axle: usize) -> Self {
        Self::new(axle, Side::Right)
    }
}

impl fmt::Display for WheelSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self.side {
            Side::Left => "L",
            Side::Right => "R",
        };
        write!(f, "A{}{s}", self.axle)
    }
}

// ============================================
// ----- provider -> drivetrain ---------------
// ============================================

/// Contact query result for a single wheel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelContact {
    pub grounded: bool,
    pub forward_slip: f32,   // signed, > 0 = wheel surface faster than ground
    pub sideways_slip: f32,  // signed, > 0 = contact patch sliding right
    pub normal: Vector3<f32>,
    pub compression: f32,    // 0..1 suspension compression
    pub material: usize,     // ground material id
    pub rpm: f32,            // wheel angular speed (signed, > 0 = rolling forward)
    pub load: f32,           // N
}

impl Default for WheelContact {
    fn default() -> Self {
        Self::airborne()
    }
}

impl WheelContact {
    pub fn airborne() -> Self {
        Self {
            grounded: false,
            forward_slip: 0.0,
            sideways_slip: 0.0,
            normal: Vector3::zeros(),
            compression: 0.0,
            material: 0,
            rpm: 0.0,
            load: 0.0,
        }
    }

    pub fn grounded(compression: f32) -> Self {
        Self {
            grounded: true,
            normal: Vector3::y(),
            compression,
            ..Self::airborne()
        }
    }
}

/// Chassis velocities in chassis-local space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChassisMotion {
    pub local_velocity: Vector3<f32>,         // m/s
    pub local_angular_velocity: Vector3<f32>, // rad/s
}

impl Default for ChassisMotion {
    fn default() -> Self {
        Self {
            local_velocity: Vector3::zeros(),
            local_angular_velocity: Vector3::zeros(),
        }
    }
}

impl ChassisMotion {
    pub fn forward_speed(&self) -> f32 {
        self.local_velocity.z
    }

    pub fn speed_kmh(&self) -> f32 {
        self.local_velocity.norm() * 3.6
    }

    pub fn yaw_rate(&self) -> f32 {
        self.local_angular_velocity.y
    }
}

// ============================================
// ----- drivetrain -> provider ---------------
// ============================================

/// Everything the contact solver needs to resolve a wheel this tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WheelCommand {
    pub motor_torque: f32,       // Nm, signed
    pub brake_torque: f32,       // Nm, >= 0 (brake + handbrake + ESP)
    pub steer_angle: f32,        // degrees, > 0 = right
    pub radius: f32,             // m, effective (deflation applied)
    pub forward_stiffness: f32,
    pub sideways_stiffness: f32,
    pub damping: f32,            // wheel damping rate from the ground material
}

pub trait ContactProvider {
    fn contact(&self, wheel: WheelSlot) -> WheelContact;

    fn motion(&self) -> ChassisMotion;

    /// Overwrite chassis velocities (steering helper nudges).
    fn set_motion(&mut self, motion: ChassisMotion);

    fn command(&mut self, wheel: WheelSlot, command: &WheelCommand);

    /// Vertical force along the wheel's up axis, applied at the wheel position.
    fn push_vertical(&mut self, wheel: WheelSlot, force: f32);
}

// ============================================
// Ground materials
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundMaterial {
    pub name: String,
    pub forward_stiffness: f32,
    pub sideways_stiffness: f32,
    pub slip_threshold: f32, // total slip above this = skidding
    pub damping: f32,
}

impl GroundMaterial {
    pub fn new(name: &str, forward: f32, sideways: f32, slip_threshold: f32, damping: f32) -> Self {
        Self {
            name: name.to_string(),
            forward_stiffness: forward,
            sideways_stiffness: sideways,
            slip_threshold,
            damping,
        }
    }
}

/// Static lookup table, indexed by `WheelContact::material`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<GroundMaterial>", into = "Vec<GroundMaterial>")]
pub struct GroundMaterials {
    materials: Vec<GroundMaterial>,
}

impl Default for GroundMaterials {
    fn default() -> Self {
        Self {
            materials: vec![
                GroundMaterial::new("asphalt", 1.0, 1.0, 0.25, 1.0),
                GroundMaterial::new("grass", 0.7, 0.65, 0.15, 5.0),
                GroundMaterial::new("sand", 0.45, 0.45, 0.1, 25.0),
                GroundMaterial::new("gravel", 0.6, 0.55, 0.15, 10.0),
                GroundMaterial::new("ice", 0.15, 0.12, 0.05, 0.5),
            ],
        }
    }
}

impl GroundMaterials {
    pub fn new(materials: Vec<GroundMaterial>) -> ConfigResult<Self> {
        if materials.is_empty() {
            return Err(ConfigError::NoGroundMaterials);
        }
        for m in &materials {
            if !(m.forward_stiffness > 0.0 && m.sideways_stiffness > 0.0) {
                return Err(ConfigError::NegativeValue {
                    field: "ground_material.stiffness",
                    value: m.forward_stiffness.min(m.sideways_stiffness),
                });
            }
        }
        Ok(Self { materials })
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.materials.iter().position(|m| m.name == name)
    }

    /// Unknown ids fall back to the first material.
    pub fn get(&self, id: usize) -> &GroundMaterial {
        self.materials.get(id).unwrap_or(&self.materials[0])
    }
}

impl TryFrom<Vec<GroundMaterial>> for GroundMaterials {
    type Error = ConfigError;

    fn try_from(materials: Vec<GroundMaterial>) -> Result<Self, Self::Error> {
        Self::new(materials)
    }
}

impl From<GroundMaterials> for Vec<GroundMaterial> {
    fn from(table: GroundMaterials) -> Self {
        table.materials
    }
}

// ============================================
// Scripted provider
// ============================================

/// Provider with externally scripted contacts: headless runs, AI previews and tests.
/// Commands and forces written by the vehicle are recorded for inspection.
#[derive(Debug, Clone, Default)]
pub struct ScriptedContact {
    pub contacts: Vec<(WheelSlot, WheelContact)>,
    pub motion: ChassisMotion,
    pub commands: Vec<(WheelSlot, WheelCommand)>,
    pub vertical: Vec<(WheelSlot, f32)>,
}

impl ScriptedContact {
    /// Every wheel of `axles` axles grounded on material 0 at half compression.
    pub fn grounded(axles: usize) -> Self {
        let mut s = Self::default();
        for axle in 0..axles {
            s.set(WheelSlot::left(axle), WheelContact::grounded(0.5));
            s.set(WheelSlot::right(axle), WheelContact::grounded(0.5));
        }
        s
    }

    pub fn set(&mut self, wheel: WheelSlot, contact: WheelContact) {
        match self.contacts.iter_mut().find(|(w, _)| *w == wheel) {
            Some((_, c)) => *c = contact,
            None => self.contacts.push((wheel, contact)),
        }
    }

    pub fn update(&mut self, wheel: WheelSlot, f: impl FnOnce(&mut WheelContact)) {
        let mut c = self.contact(wheel);
        f(&mut c);
        self.set(wheel, c);
    }

    /// Every wheel spins at `rpm` and the chassis moves forward at the matching speed.
    pub fn rolling(&mut self, rpm: f32, radius: f32) {
        for (_, c) in self.contacts.iter_mut() {
            c.rpm = rpm;
        }
        self.motion.local_velocity = Vector3::new(0.0, 0.0, rpm * radius * std::f32::consts::TAU / 60.0);
    }

    pub fn last_command(&self, wheel: WheelSlot) -> Option<WheelCommand> {
        self.commands.iter().rev().find(|(w, _)| *w == wheel).map(|(_, c)| *c)
    }

    pub fn clear_outputs(&mut self) {
        self.commands.clear();
        self.vertical.clear();
    }
}

impl ContactProvider for ScriptedContact {
    fn contact(&self, wheel: WheelSlot) -> WheelContact {
        self.contacts
            .iter()
            .find(|(w, _)| *w == wheel)
            .map(|(_, c)| *c)
            .unwrap_or_default()
    }

    fn motion(&self) -> ChassisMotion {
        self.motion
    }

    fn set_motion(&mut self, motion: ChassisMotion) {
        self.motion = motion;
    }

    fn command(&mut self, wheel: WheelSlot, command: &WheelCommand) {
        self.commands.push((wheel, *command));
    }

    fn push_vertical(&mut self, wheel: WheelSlot, force: f32) {
        self.vertical.push((wheel, force));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_material_falls_back_to_first() {
        let table = GroundMaterials::default();
        assert_eq!(table.get(99).name, "asphalt");
        assert_eq!(table.index_of("ice"), Some(4));
    }

    #[test]
    fn empty_material_table_is_rejected() {
        assert!(matches!(GroundMaterials::new(vec![]), Err(ConfigError::NoGroundMaterials)));
    }

    #[test]
    fn scripted_contact_defaults_to_airborne() {
        let s = ScriptedContact::grounded(1);
        assert!(s.contact(WheelSlot::left(0)).grounded);
        assert!(!s.contact(WheelSlot::left(3)).grounded);
    }

    #[test]
    fn wheel_slot_display() {
        assert_eq!(WheelSlot::right(1).to_string(), "A1R");
    }
}

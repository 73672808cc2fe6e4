// ==============================================================================
// wheel.rs — PER-WHEEL PHYSICS (SLIP, GRIP, TORQUE -> COMMAND)
// ==============================================================================
// A wheel runs twice per tick:
//
// sense():  read the contact provider, low-pass the slips, flag skidding,
//           update tire temperature, clear last tick's stability corrections.
// apply():  turn drive/brake/steer + corrections into one WheelCommand and
//           hand it to the provider.
//
// Between the two calls the axle writes drive/brake/steer and the stability
// controller writes its cut fractions and grip multiplier.
//
// Cuts:
// - motor cut (TCS + ESP) scales torque toward zero, never past it
// - ABS cut scales the service brake only; handbrake and ESP brake are kept
// Guards zero the motor torque when the engine is off or out of gear, the
// wheel is over its rpm limit, or the vehicle is at top speed and the torque
// would push it faster.
// ==============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::contact::{ContactProvider, GroundMaterial, GroundMaterials, WheelCommand, WheelContact, WheelSlot};
use crate::drivetrain::engine::{finite_or, unit};
use crate::error::{grip_factor, non_negative, ConfigError, ConfigResult};

/// Lowest stiffness ever sent to the provider.
pub const MIN_STIFFNESS: f32 = 1e-3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WheelConfig {
    pub radius: f32,                         // m
    pub deflated_radius_multiplier: f32,
    pub deflated_stiffness_multiplier: f32,
    pub slip_smoothing: f32,                 // s, time constant of the slip filter
    pub handbrake_sideways_grip: f32,        // sideways stiffness factor while handbraking and sliding
    pub handbrake_slip_threshold: f32,       // |sideways slip| above this counts as sliding
    pub max_wheel_rpm: f32,                  // motor torque is cut above this

    pub ambient_temperature: f32,            // °C
    pub max_temperature: f32,                // °C
    pub heat_rate: f32,                      // °C / s per unit of total slip
    pub cool_rate: f32,                      // 1/s toward ambient
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            radius: 0.35,
            deflated_radius_multiplier: 0.5,
            deflated_stiffness_multiplier: 0.5,
            slip_smoothing: 0.1,
            handbrake_sideways_grip: 0.5,
            handbrake_slip_threshold: 0.1,
            max_wheel_rpm: 3000.0,

            ambient_temperature: 20.0,
            max_temperature: 125.0,
            heat_rate: 40.0,
            cool_rate: 0.1,
        }
    }
}

impl WheelConfig {
    pub fn validate(&self, axle: usize) -> ConfigResult<()> {
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(ConfigError::InvalidWheelRadius { axle, radius: self.radius });
        }
        let deflated = self.radius * self.deflated_radius_multiplier;
        if !(deflated.is_finite() && deflated > 0.0) {
            return Err(ConfigError::InvalidWheelRadius { axle, radius: deflated });
        }
        grip_factor("wheel.deflated_stiffness_multiplier", self.deflated_stiffness_multiplier)?;
        non_negative("wheel.slip_smoothing", self.slip_smoothing)?;
        grip_factor("wheel.handbrake_sideways_grip", self.handbrake_sideways_grip)?;
        non_negative("wheel.handbrake_slip_threshold", self.handbrake_slip_threshold)?;
        non_negative("wheel.max_wheel_rpm", self.max_wheel_rpm)?;
        non_negative("wheel.heat_rate", self.heat_rate)?;
        non_negative("wheel.cool_rate", self.cool_rate)?;
        if !(self.max_temperature >= self.ambient_temperature) {
            return Err(ConfigError::NegativeValue {
                field: "wheel.max_temperature - ambient_temperature",
                value: self.max_temperature - self.ambient_temperature,
            });
        }
        Ok(())
    }
}

/// Vehicle-wide conditions that can veto motor torque this tick.
#[derive(Debug, Clone, Copy)]
pub struct TorqueGuards {
    pub engaged: bool,        // engine running and a gear engaged
    pub over_speed: bool,     // at or above top speed
    pub direction: f32,       // sign of travel, 0 when stopped
}

impl Default for TorqueGuards {
    fn default() -> Self {
        Self { engaged: true, over_speed: false, direction: 0.0 }
    }
}

#[derive(Debug, Clone)]
pub struct WheelPhysics {
    slot: WheelSlot,
    config: WheelConfig,
    materials: Arc<GroundMaterials>,

    contact: WheelContact,
    forward_slip: f32,
    sideways_slip: f32,
    total_slip: f32,
    skidding: bool,
    temperature: f32,
    deflated: bool,

    // axle -> wheel
    drive_torque: f32,
    brake_torque: f32,
    handbrake_torque: f32,
    steer_angle: f32,

    // stability -> wheel, cleared by sense()
    abs_cut: f32,
    motor_cut: f32,
    esp_brake: f32,
    grip_multiplier: f32,

    // outputs
    command: WheelCommand,
}

impl WheelPhysics {
    pub fn new(slot: WheelSlot, config: WheelConfig, materials: Arc<GroundMaterials>) -> Self {
        let ambient = config.ambient_temperature;
        Self {
            slot,
            config,
            materials,
            contact: WheelContact::airborne(),
            forward_slip: 0.0,
            sideways_slip: 0.0,
            total_slip: 0.0,
            skidding: false,
            temperature: ambient,
            deflated: false,
            drive_torque: 0.0,
            brake_torque: 0.0,
            handbrake_torque: 0.0,
            steer_angle: 0.0,
            abs_cut: 0.0,
            motor_cut: 0.0,
            esp_brake: 0.0,
            grip_multiplier: 1.0,
            command: WheelCommand::default(),
        }
    }

    pub fn reload(&mut self) {
        *self = Self::new(self.slot, self.config.clone(), Arc::clone(&self.materials));
    }

    // -------------------------
    // Sense
    // -------------------------

    pub fn sense<P: ContactProvider + ?Sized>(&mut self, dt: f32, provider: &P) {
        let mut c = provider.contact(self.slot);
        c.forward_slip = finite_or(c.forward_slip, 0.0);
        c.sideways_slip = finite_or(c.sideways_slip, 0.0);
        c.rpm = finite_or(c.rpm, 0.0);
        c.load = finite_or(c.load, 0.0).max(0.0);
        c.compression = finite_or(c.compression, 0.0).clamp(0.0, 1.0);
        if !c.grounded {
            c.forward_slip = 0.0;
            c.sideways_slip = 0.0;
        }
        self.contact = c;

        self.abs_cut = 0.0;
        self.motor_cut = 0.0;
        self.esp_brake = 0.0;
        self.grip_multiplier = 1.0;

        if !(dt.is_finite() && dt > 0.0) {
            return;
        }

        let alpha = if self.config.slip_smoothing > 0.0 {
            1.0 - (-dt / self.config.slip_smoothing).exp()
        } else {
            1.0
        };
        self.forward_slip += (c.forward_slip - self.forward_slip) * alpha;
        self.sideways_slip += (c.sideways_slip - self.sideways_slip) * alpha;
        self.total_slip = self.forward_slip.hypot(self.sideways_slip);

        let threshold = self.material().slip_threshold;
        self.skidding = c.grounded && self.total_slip > threshold;

        self.update_temperature(dt);
    }

    fn update_temperature(&mut self, dt: f32) {
        let ambient = self.config.ambient_temperature;
        let heat = if self.contact.grounded { self.config.heat_rate * self.total_slip } else { 0.0 };
        let cool = (self.temperature - ambient) * self.config.cool_rate;
        self.temperature = (self.temperature + (heat - cool) * dt).clamp(ambient, self.config.max_temperature);
    }

    // -------------------------
    // Inputs from the axle
    // -------------------------

    pub fn set_drive_torque(&mut self, torque: f32) {
        self.drive_torque = finite_or(torque, 0.0);
    }

    pub fn set_brakes(&mut self, brake: f32, handbrake: f32) {
        self.brake_torque = finite_or(brake, 0.0).max(0.0);
        self.handbrake_torque = finite_or(handbrake, 0.0).max(0.0);
    }

    pub fn set_steer_angle(&mut self, degrees: f32) {
        self.steer_angle = finite_or(degrees, 0.0);
    }

    // -------------------------
    // Corrections from stability
    // -------------------------

    pub fn set_abs_cut(&mut self, fraction: f32) {
        self.abs_cut = unit(fraction);
    }

    /// Adds to the motor cut; TCS and ESP both land here.
    pub fn add_motor_cut(&mut self, fraction: f32) {
        self.motor_cut = (self.motor_cut + unit(fraction)).min(1.0);
    }

    pub fn set_esp_brake(&mut self, torque: f32) {
        self.esp_brake = finite_or(torque, 0.0).max(0.0);
    }

    pub fn set_grip_multiplier(&mut self, multiplier: f32) {
        self.grip_multiplier = unit(multiplier);
    }

    pub fn deflate(&mut self) {
        self.deflated = true;
    }

    pub fn inflate(&mut self) {
        self.deflated = false;
    }

    // -------------------------
    // Apply
    // -------------------------

    fn motor_torque(&self, guards: &TorqueGuards) -> f32 {
        let t = self.drive_torque * (1.0 - self.motor_cut);
        if !guards.engaged || self.contact.rpm.abs() >= self.config.max_wheel_rpm {
            return 0.0;
        }
        if guards.over_speed && guards.direction != 0.0 && t.signum() == guards.direction {
            return 0.0;
        }
        t
    }

    pub fn apply<P: ContactProvider + ?Sized>(&mut self, guards: &TorqueGuards, provider: &mut P) {
        let (forward, sideways, damping) = {
            let m = self.material();
            (m.forward_stiffness, m.sideways_stiffness, m.damping)
        };
        let deflation = if self.deflated { self.config.deflated_stiffness_multiplier } else { 1.0 };
        let handbrake_grip = if self.handbrake_torque > 0.0
            && self.sideways_slip.abs() > self.config.handbrake_slip_threshold
        {
            self.config.handbrake_sideways_grip
        } else {
            1.0
        };

        let brake = self.brake_torque * (1.0 - self.abs_cut) + self.handbrake_torque + self.esp_brake;

        self.command = WheelCommand {
            motor_torque: self.motor_torque(guards),
            brake_torque: brake.max(0.0),
            steer_angle: self.steer_angle,
            radius: self.radius(),
            forward_stiffness: (forward * deflation).max(MIN_STIFFNESS),
            sideways_stiffness: (sideways * handbrake_grip * self.grip_multiplier * deflation).max(MIN_STIFFNESS),
            damping,
        };
        provider.command(self.slot, &self.command);
    }

    // -------------------------
    // Read-outs
    // -------------------------

    pub fn slot(&self) -> WheelSlot {
        self.slot
    }

    pub fn config(&self) -> &WheelConfig {
        &self.config
    }

    pub fn material(&self) -> &GroundMaterial {
        self.materials.get(self.contact.material)
    }

    pub fn contact(&self) -> &WheelContact {
        &self.contact
    }

    pub fn is_grounded(&self) -> bool {
        self.contact.grounded
    }

    pub fn rpm(&self) -> f32 {
        self.contact.rpm
    }

    pub fn forward_slip(&self) -> f32 {
        self.forward_slip
    }

    pub fn sideways_slip(&self) -> f32 {
        self.sideways_slip
    }

    pub fn total_slip(&self) -> f32 {
        self.total_slip
    }

    pub fn is_skidding(&self) -> bool {
        self.skidding
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn is_deflated(&self) -> bool {
        self.deflated
    }

    pub fn radius(&self) -> f32 {
        if self.deflated {
            self.config.radius * self.config.deflated_radius_multiplier
        } else {
            self.config.radius
        }
    }

    pub fn drive_torque(&self) -> f32 {
        self.drive_torque
    }

    /// Service brake before ABS.
    pub fn brake_torque(&self) -> f32 {
        self.brake_torque
    }

    pub fn steer_angle(&self) -> f32 {
        self.steer_angle
    }

    pub fn abs_cut(&self) -> f32 {
        self.abs_cut
    }

    pub fn motor_cut(&self) -> f32 {
        self.motor_cut
    }

    pub fn esp_brake(&self) -> f32 {
        self.esp_brake
    }

    /// Last command handed to the provider.
    pub fn command(&self) -> &WheelCommand {
        &self.command
    }

    /// Tractive force at the contact patch for the last command.
    pub fn drive_force(&self) -> f32 {
        self.command.motor_torque / self.radius()
    }
}

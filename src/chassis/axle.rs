// ==============================================================================
// axle.rs — WHEEL PAIR: STEERING, BRAKES, ANTI-ROLL, DRIVE SPLIT
// ------------------------------------------------------------------------------
// An axle owns its two wheels and, when powered, its differential. Per tick:
//   drive(): gearbox torque -> differential -> left/right wheel drive torque
//   step():  steer angle (rate limited), brake/handbrake torque, anti-roll
// Axles with position_z > 0 count as front axles.
// ==============================================================================

use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::chassis::anti_roll::{anti_roll_forces, AntiRollForces};
use crate::chassis::wheel::{TorqueGuards, WheelConfig, WheelPhysics};
use crate::contact::{ContactProvider, GroundMaterials, Side, WheelSlot};
use crate::drivetrain::differential::{Differential, DifferentialConfig};
use crate::drivetrain::engine::{finite_or, unit};
use crate::error::{non_negative, ConfigError, ConfigResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxleConfig {
    pub position_z: f32,            // m from the chassis origin, > 0 = front
    pub track_width: f32,           // m

    pub is_power: bool,
    pub is_steer: bool,
    pub is_brake: bool,
    pub is_handbrake: bool,

    pub power_multiplier: f32,      // -1..1
    pub steer_multiplier: f32,      // -1..1
    pub brake_multiplier: f32,      // 0..1
    pub handbrake_multiplier: f32,  // 0..1

    pub max_steer_angle: f32,       // deg
    pub steer_speed: f32,           // deg/s, 0 = instant
    pub max_brake_torque: f32,      // Nm, brake and handbrake
    pub anti_roll_force: f32,       // N per unit of compression difference

    pub wheel: WheelConfig,
    pub differential: Option<DifferentialConfig>,
}

impl Default for AxleConfig {
    fn default() -> Self {
        Self::front()
    }
}

impl AxleConfig {
    /// Steered, braked, unpowered front axle.
    pub fn front() -> Self {
        Self {
            position_z: 1.25,
            track_width: 1.5,
            is_power: false,
            is_steer: true,
            is_brake: true,
            is_handbrake: false,
            power_multiplier: 1.0,
            steer_multiplier: 1.0,
            brake_multiplier: 1.0,
            handbrake_multiplier: 1.0,
            max_steer_angle: 40.0,
            steer_speed: 200.0,
            max_brake_torque: 3000.0,
            anti_roll_force: 500.0,
            wheel: WheelConfig::default(),
            differential: None,
        }
    }

    /// Powered rear axle with handbrake and an open differential.
    pub fn rear() -> Self {
        Self {
            position_z: -1.25,
            is_power: true,
            is_steer: false,
            is_handbrake: true,
            brake_multiplier: 0.7,
            differential: Some(DifferentialConfig::default()),
            ..Self::front()
        }
    }

    pub fn validate(&self, axle: usize) -> ConfigResult<()> {
        self.wheel.validate(axle)?;
        if let Some(d) = &self.differential {
            d.validate(axle)?;
        }
        for (field, value, lo) in [
            ("axle.power_multiplier", self.power_multiplier, -1.0),
            ("axle.steer_multiplier", self.steer_multiplier, -1.0),
            ("axle.brake_multiplier", self.brake_multiplier, 0.0),
            ("axle.handbrake_multiplier", self.handbrake_multiplier, 0.0),
        ] {
            if !(lo..=1.0).contains(&value) {
                return Err(ConfigError::NegativeValue { field, value });
            }
        }
        non_negative("axle.track_width", self.track_width)?;
        non_negative("axle.max_steer_angle", self.max_steer_angle)?;
        non_negative("axle.steer_speed", self.steer_speed)?;
        non_negative("axle.max_brake_torque", self.max_brake_torque)?;
        non_negative("axle.anti_roll_force", self.anti_roll_force)?;
        if !self.position_z.is_finite() {
            return Err(ConfigError::NegativeValue { field: "axle.position_z", value: self.position_z });
        }
        Ok(())
    }
}

/// Per-tick driver commands as seen by an axle.
#[derive(Debug, Clone, Copy, Default)]
pub struct AxleInputs {
    pub steer: f32,     // -1..1
    pub brake: f32,     // 0..1
    pub handbrake: f32, // 0..1
    pub park: bool,     // gearbox in Park: full brake
}

#[derive(Debug, Clone)]
pub struct Axle {
    index: usize,
    config: AxleConfig,
    left: WheelPhysics,
    right: WheelPhysics,
    differential: Option<Differential>,

    steer_angle: f32,
    brake_torque: f32,
    handbrake_torque: f32,
    anti_roll: AntiRollForces,
}

impl Axle {
    pub fn new(index: usize, config: AxleConfig, materials: Arc<GroundMaterials>) -> ConfigResult<Self> {
        config.validate(index)?;
        let left = WheelPhysics::new(WheelSlot::left(index), config.wheel.clone(), Arc::clone(&materials));
        let right = WheelPhysics::new(WheelSlot::right(index), config.wheel.clone(), materials);
        let differential = match (&config.differential, config.is_power) {
            (Some(d), true) => Some(Differential::new(d.clone())),
            (None, true) => {
                debug!("axle {index} is powered but has no differential; it will not be driven");
                None
            }
            (_, false) => None,
        };
        Ok(Self {
            index,
            config,
            left,
            right,
            differential,
            steer_angle: 0.0,
            brake_torque: 0.0,
            handbrake_torque: 0.0,
            anti_roll: AntiRollForces::default(),
        })
    }

    pub fn reload(&mut self) {
        self.left.reload();
        self.right.reload();
        if let Some(d) = self.differential.as_mut() {
            d.reload();
        }
        self.steer_angle = 0.0;
        self.brake_torque = 0.0;
        self.handbrake_torque = 0.0;
        self.anti_roll = AntiRollForces::default();
    }

    pub fn sense<P: ContactProvider + ?Sized>(&mut self, dt: f32, provider: &P) {
        self.left.sense(dt, provider);
        self.right.sense(dt, provider);
    }

    /// Splits the gearbox share through the differential. Unpowered axles ignore it.
    pub fn drive(&mut self, torque: f32) {
        let multiplier = self.config.power_multiplier;
        let (l_rpm, r_rpm) = (self.left.rpm(), self.right.rpm());
        let (l, r) = match self.differential.as_mut() {
            Some(d) => d.split(l_rpm, r_rpm, torque * multiplier),
            None => (0.0, 0.0),
        };
        self.left.set_drive_torque(l);
        self.right.set_drive_torque(r);
    }

    pub fn step<P: ContactProvider + ?Sized>(&mut self, dt: f32, inputs: AxleInputs, provider: &mut P) {
        let cfg = &self.config;

        // steering
        let target = if cfg.is_steer {
            finite_or(inputs.steer, 0.0).clamp(-1.0, 1.0) * cfg.max_steer_angle * cfg.steer_multiplier
        } else {
            0.0
        };
        if cfg.steer_speed <= 0.0 {
            self.steer_angle = target;
        } else if dt.is_finite() && dt > 0.0 {
            let step = cfg.steer_speed * dt;
            self.steer_angle += (target - self.steer_angle).clamp(-step, step);
        }

        // brakes
        let brake = if inputs.park { 1.0 } else { unit(inputs.brake) };
        self.brake_torque = if cfg.is_brake || inputs.park {
            brake * cfg.max_brake_torque * if cfg.is_brake { cfg.brake_multiplier } else { 1.0 }
        } else {
            0.0
        };
        self.handbrake_torque = if cfg.is_handbrake {
            unit(inputs.handbrake) * cfg.max_brake_torque * cfg.handbrake_multiplier
        } else {
            0.0
        };

        for w in [&mut self.left, &mut self.right] {
            w.set_steer_angle(self.steer_angle);
            w.set_brakes(self.brake_torque, self.handbrake_torque);
        }

        // anti-roll
        self.anti_roll = anti_roll_forces(self.left.contact(), self.right.contact(), self.config.anti_roll_force);
        if !self.anti_roll.is_zero() {
            provider.push_vertical(self.left.slot(), self.anti_roll.left);
            provider.push_vertical(self.right.slot(), self.anti_roll.right);
        }
    }

    pub fn apply<P: ContactProvider + ?Sized>(&mut self, guards: &TorqueGuards, provider: &mut P) {
        self.left.apply(guards, provider);
        self.right.apply(guards, provider);
    }

    // -------------------------
    // Read-outs
    // -------------------------

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn config(&self) -> &AxleConfig {
        &self.config
    }

    pub fn is_front(&self) -> bool {
        self.config.position_z > 0.0
    }

    /// Powered and able to receive torque.
    pub fn is_powered(&self) -> bool {
        self.differential.is_some()
    }

    pub fn wheel(&self, side: Side) -> &WheelPhysics {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn wheel_mut(&mut self, side: Side) -> &mut WheelPhysics {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    pub fn wheels(&self) -> [&WheelPhysics; 2] {
        [&self.left, &self.right]
    }

    pub fn wheels_mut(&mut self) -> [&mut WheelPhysics; 2] {
        [&mut self.left, &mut self.right]
    }

    pub fn differential(&self) -> Option<&Differential> {
        self.differential.as_ref()
    }

    pub fn differential_mut(&mut self) -> Option<&mut Differential> {
        self.differential.as_mut()
    }

    pub fn mean_wheel_rpm(&self) -> f32 {
        (self.left.rpm().abs() + self.right.rpm().abs()) * 0.5
    }

    pub fn steer_angle(&self) -> f32 {
        self.steer_angle
    }

    pub fn brake_torque(&self) -> f32 {
        self.brake_torque
    }

    pub fn handbrake_torque(&self) -> f32 {
        self.handbrake_torque
    }

    pub fn anti_roll(&self) -> AntiRollForces {
        self.anti_roll
    }

    pub fn all_grounded(&self) -> bool {
        self.left.is_grounded() && self.right.is_grounded()
    }
}

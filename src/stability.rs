// ==============================================================================
// stability.rs — ABS / TCS / ESP + STEERING AND TRACTION HELPERS
// ==============================================================================
// Runs after the axles have written drive/brake/steer into the wheels and
// before the wheels build their commands, so every correction lands on the
// same tick's torque.
//
// ABS  (braked axles):   |forward slip| * brake >= threshold
//                        => cut the service brake by abs_intensity
// TCS  (powered axles):  |forward slip| >= threshold, slip sign == travel
//                        => cut motor torque by tcs_intensity
// ESP  (all axles):      summed sideways slip, front vs rear
//                        understeer => brake a front wheel
//                        oversteer  => brake a rear wheel
//                        the braked wheel is on the side opposite the slip
//                        sign; powered wheels also lose motor torque
//
// Steering helper: pulls lateral velocity and yaw rate toward what the front
// steer angle asks for (kinematic bicycle model). Its strength is scaled by a
// grounded factor that ramps in while every wheel is down and is capped while
// the handbrake is pulled.
//
// Traction helper: while the body's yaw relative to its velocity opposes the
// steer angle, front sideways grip drops with yaw rate, never below min_grip.
// ==============================================================================

use log::debug;
use serde::{Deserialize, Serialize};

use crate::chassis::Axle;
use crate::contact::{ContactProvider, Side};
use crate::drivetrain::engine::{finite_or, mean, unit};
use crate::error::{grip_factor, non_negative, ConfigError, ConfigResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub abs: bool,
    pub esp: bool,
    pub tcs: bool,
    pub steering_helper: bool,
    pub traction_helper: bool,

    pub abs_threshold: f32,     // (0, 0.5]
    pub abs_intensity: f32,     // 0..1
    pub esp_threshold: f32,
    pub esp_intensity: f32,
    pub tcs_threshold: f32,
    pub tcs_intensity: f32,

    pub steer_helper_linear_strength: f32,
    pub steer_helper_angular_strength: f32,
    pub traction_helper_strength: f32,
    pub traction_helper_min_grip: f32,

    pub helper_ramp_rate: f32,           // 1/s, grounded factor ramp
    pub handbrake_helper_ceiling: f32,   // grounded factor cap while handbraking
    pub helper_min_speed: f32,           // m/s
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            abs: true,
            esp: true,
            tcs: true,
            steering_helper: true,
            traction_helper: true,

            abs_threshold: 0.35,
            abs_intensity: 1.0,
            esp_threshold: 0.5,
            esp_intensity: 1.0,
            tcs_threshold: 0.35,
            tcs_intensity: 1.0,

            steer_helper_linear_strength: 0.1,
            steer_helper_angular_strength: 0.1,
            traction_helper_strength: 0.1,
            traction_helper_min_grip: 0.1,

            helper_ramp_rate: 1.0,
            handbrake_helper_ceiling: 0.25,
            helper_min_speed: 1.0,
        }
    }
}

impl StabilityConfig {
    /// Everything off: the driver is on their own.
    pub fn disabled() -> Self {
        Self {
            abs: false,
            esp: false,
            tcs: false,
            steering_helper: false,
            traction_helper: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        for (system, value) in [
            ("abs", self.abs_threshold),
            ("esp", self.esp_threshold),
            ("tcs", self.tcs_threshold),
        ] {
            if !(value > 0.0 && value <= 0.5) {
                return Err(ConfigError::InvalidThreshold { system, value });
            }
        }
        for (system, value) in [
            ("abs", self.abs_intensity),
            ("esp", self.esp_intensity),
            ("tcs", self.tcs_intensity),
            ("handbrake helper ceiling", self.handbrake_helper_ceiling),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidIntensity { system, value });
            }
        }
        grip_factor("stability.traction_helper_min_grip", self.traction_helper_min_grip)?;
        non_negative("stability.steer_helper_linear_strength", self.steer_helper_linear_strength)?;
        non_negative("stability.steer_helper_angular_strength", self.steer_helper_angular_strength)?;
        non_negative("stability.traction_helper_strength", self.traction_helper_strength)?;
        non_negative("stability.helper_ramp_rate", self.helper_ramp_rate)?;
        non_negative("stability.helper_min_speed", self.helper_min_speed)?;
        Ok(())
    }
}

/// Which systems intervened this tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StabilityFlags {
    pub abs: bool,
    pub esp: bool,
    pub tcs: bool,
    pub understeer: bool,
    pub oversteer: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StabilityInputs {
    pub brake: f32,            // effective brake pedal 0..1
    pub handbrake: f32,        // 0..1
    pub gear_direction: f32,   // -1 reverse, 1 forward, 0 neutral
}

#[derive(Debug, Clone)]
pub struct StabilityController {
    config: StabilityConfig,
    grounded_factor: f32,
    flags: StabilityFlags,
}

impl StabilityController {
    pub fn new(config: StabilityConfig) -> Self {
        Self { config, grounded_factor: 0.0, flags: StabilityFlags::default() }
    }

    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    pub fn reload(&mut self) {
        self.grounded_factor = 0.0;
        self.flags = StabilityFlags::default();
    }

    pub fn flags(&self) -> StabilityFlags {
        self.flags
    }

    pub fn grounded_factor(&self) -> f32 {
        self.grounded_factor
    }

    pub fn step<P: ContactProvider + ?Sized>(
        &mut self,
        dt: f32,
        axles: &mut [Axle],
        inputs: StabilityInputs,
        provider: &mut P,
    ) {
        let before = self.flags;
        self.flags = StabilityFlags::default();

        let forward_speed = finite_or(provider.motion().forward_speed(), 0.0);
        let direction = if forward_speed.abs() > 0.5 {
            forward_speed.signum()
        } else if inputs.gear_direction != 0.0 {
            inputs.gear_direction.signum()
        } else {
            0.0
        };

        if self.config.abs {
            self.abs(axles, unit(inputs.brake));
        }
        if self.config.tcs {
            self.tcs(axles, direction);
        }
        if self.config.esp {
            self.esp(axles);
        }

        if dt.is_finite() && dt > 0.0 {
            self.steering_helper(dt, axles, inputs, provider);
            if self.config.traction_helper {
                self.traction_helper(axles, provider);
            }
        }

        self.log_edges(before);
    }

    fn abs(&mut self, axles: &mut [Axle], brake: f32) {
        let cfg = &self.config;
        for axle in axles.iter_mut().filter(|a| a.config().is_brake) {
            for wheel in axle.wheels_mut() {
                if wheel.forward_slip().abs() * brake >= cfg.abs_threshold {
                    wheel.set_abs_cut(cfg.abs_intensity);
                    self.flags.abs = true;
                }
            }
        }
    }

    fn tcs(&mut self, axles: &mut [Axle], direction: f32) {
        if direction == 0.0 {
            return;
        }
        let cfg = &self.config;
        for axle in axles.iter_mut().filter(|a| a.is_powered()) {
            for wheel in axle.wheels_mut() {
                let slip = wheel.forward_slip();
                if slip.abs() >= cfg.tcs_threshold && slip.signum() == direction {
                    wheel.add_motor_cut(cfg.tcs_intensity);
                    self.flags.tcs = true;
                }
            }
        }
    }

    fn esp(&mut self, axles: &mut [Axle]) {
        let sideways_sum = |axles: &[Axle], front: bool| -> f32 {
            axles
                .iter()
                .filter(|a| a.is_front() == front)
                .flat_map(|a| a.wheels())
                .map(|w| w.sideways_slip())
                .sum()
        };
        let front = sideways_sum(&*axles, true);
        let rear = sideways_sum(&*axles, false);
        let threshold = self.config.esp_threshold;

        self.flags.understeer = front.abs() >= threshold && front.abs() > rear.abs();
        self.flags.oversteer = rear.abs() >= threshold && rear.abs() > front.abs();

        let (slip, on_front) = match (self.flags.understeer, self.flags.oversteer) {
            (true, _) => (front, true),
            (_, true) => (rear, false),
            _ => return,
        };
        self.flags.esp = true;

        let amount = slip.abs().min(1.0) * self.config.esp_intensity;
        let side = if slip > 0.0 { Side::Left } else { Side::Right };

        for axle in axles.iter_mut() {
            if axle.is_front() == on_front && axle.config().is_brake {
                let torque = amount * axle.config().max_brake_torque;
                axle.wheel_mut(side).set_esp_brake(torque);
            }
            if axle.is_powered() {
                for wheel in axle.wheels_mut() {
                    wheel.add_motor_cut(amount);
                }
            }
        }
    }

    fn steering_helper<P: ContactProvider + ?Sized>(
        &mut self,
        dt: f32,
        axles: &[Axle],
        inputs: StabilityInputs,
        provider: &mut P,
    ) {
        let cfg = &self.config;
        let grounded = !axles.is_empty() && axles.iter().all(Axle::all_grounded);

        if !cfg.steering_helper || !grounded {
            self.grounded_factor = 0.0;
            return;
        }
        self.grounded_factor = (self.grounded_factor + cfg.helper_ramp_rate * dt).min(1.0);
        if unit(inputs.handbrake) > 0.0 {
            self.grounded_factor = self.grounded_factor.min(cfg.handbrake_helper_ceiling);
        }

        let mut motion = provider.motion();
        let v_fwd = motion.forward_speed();
        if !(v_fwd.abs() > cfg.helper_min_speed) {
            return;
        }
        let Some(geometry) = Geometry::of(axles) else { return };

        let delta = geometry.front_steer_deg.to_radians();
        let yaw_target = v_fwd * delta.tan() / geometry.wheelbase;
        let lateral_target = yaw_target * geometry.rear_distance;

        let scale = |strength: f32| (strength * self.grounded_factor * dt * 60.0).clamp(0.0, 1.0);
        let lin = scale(cfg.steer_helper_linear_strength);
        let ang = scale(cfg.steer_helper_angular_strength);

        motion.local_velocity.x += (lateral_target - motion.local_velocity.x) * lin;
        motion.local_angular_velocity.y += (yaw_target - motion.local_angular_velocity.y) * ang;
        if motion.local_velocity.iter().all(|c| c.is_finite())
            && motion.local_angular_velocity.iter().all(|c| c.is_finite())
        {
            provider.set_motion(motion);
        }
    }

    fn traction_helper<P: ContactProvider + ?Sized>(&mut self, axles: &mut [Axle], provider: &P) {
        let cfg = &self.config;
        let motion = provider.motion();
        let v = motion.local_velocity;
        if !(v.norm() > cfg.helper_min_speed) {
            return;
        }

        // body heading relative to the velocity vector, > 0 = nose right of travel
        let body_yaw = -v.x.atan2(v.z.abs());
        let steer = mean(axles.iter().filter(|a| a.is_front()).map(Axle::steer_angle)).unwrap_or(0.0);
        if body_yaw * steer >= 0.0 {
            return;
        }

        let grip = (1.0 - (cfg.traction_helper_strength * motion.yaw_rate().abs()).clamp(0.0, 1.0))
            .max(cfg.traction_helper_min_grip);
        for axle in axles.iter_mut().filter(|a| a.is_front()) {
            for wheel in axle.wheels_mut() {
                wheel.set_grip_multiplier(grip);
            }
        }
    }

    fn log_edges(&self, before: StabilityFlags) {
        let now = self.flags;
        for (name, was, is) in [
            ("abs", before.abs, now.abs),
            ("tcs", before.tcs, now.tcs),
            ("esp", before.esp, now.esp),
        ] {
            if was != is {
                debug!("{name} {}", if is { "engaged" } else { "released" });
            }
        }
    }
}

/// Wheelbase data for the kinematic bicycle model.
struct Geometry {
    wheelbase: f32,
    rear_distance: f32,   // chassis origin to the rearmost axle
    front_steer_deg: f32, // mean angle of steered front axles
}

impl Geometry {
    fn of(axles: &[Axle]) -> Option<Self> {
        let zs = axles.iter().map(|a| a.config().position_z);
        let front = zs.clone().fold(f32::MIN, f32::max);
        let rear = zs.fold(f32::MAX, f32::min);
        let wheelbase = front - rear;
        if !(wheelbase > 0.1) {
            return None;
        }

        let front_steer_deg = mean(
            axles
                .iter()
                .filter(|a| a.is_front() && a.config().is_steer)
                .map(Axle::steer_angle),
        )?;

        Some(Self { wheelbase, rear_distance: (-rear).max(0.0), front_steer_deg })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use nalgebra::Vector3;

    use crate::chassis::{AxleConfig, AxleInputs, TorqueGuards};
    use crate::contact::{GroundMaterials, ScriptedContact, WheelContact, WheelSlot};

    const DT: f32 = 1.0 / 60.0;

    fn axles() -> Vec<Axle> {
        let materials = Arc::new(GroundMaterials::default());
        vec![
            Axle::new(0, AxleConfig::front(), Arc::clone(&materials)).unwrap(),
            Axle::new(1, AxleConfig::rear(), materials).unwrap(),
        ]
    }

    /// Senses `ticks` times so the slip filters settle on the scripted values.
    fn settle(axles: &mut [Axle], p: &ScriptedContact, ticks: usize) {
        for _ in 0..ticks {
            for a in axles.iter_mut() {
                a.sense(DT, p);
            }
        }
    }

    fn only(config: StabilityConfig) -> StabilityController {
        StabilityController::new(config)
    }

    #[test]
    fn abs_reduces_brake_torque() {
        let mut axles = axles();
        let mut p = ScriptedContact::grounded(2);
        p.update(WheelSlot::left(0), |c| c.forward_slip = -0.8);
        settle(&mut axles, &p, 120);

        let brake = AxleInputs { brake: 1.0, ..AxleInputs::default() };
        for a in axles.iter_mut() {
            a.step(DT, brake, &mut p);
        }
        let pre = axles[0].wheel(Side::Left).brake_torque();

        let mut s = only(StabilityConfig { abs: true, abs_intensity: 0.8, ..StabilityConfig::disabled() });
        s.step(DT, &mut axles, StabilityInputs { brake: 1.0, ..StabilityInputs::default() }, &mut p);
        for a in axles.iter_mut() {
            a.apply(&TorqueGuards::default(), &mut p);
        }

        let post = p.last_command(WheelSlot::left(0)).unwrap().brake_torque;
        assert!(s.flags().abs);
        assert!(post < pre);
        assert!((post - pre * 0.2).abs() < 1e-2);
        // the gripping wheel keeps its full brake
        assert_eq!(p.last_command(WheelSlot::right(0)).unwrap().brake_torque, pre);
    }

    #[test]
    fn tcs_only_cuts_spin_in_travel_direction() {
        let mut axles = axles();
        let mut p = ScriptedContact::grounded(2);
        p.motion.local_velocity = Vector3::new(0.0, 0.0, 5.0);
        p.update(WheelSlot::left(1), |c| c.forward_slip = 1.0);
        p.update(WheelSlot::right(1), |c| c.forward_slip = -1.0);
        settle(&mut axles, &p, 120);

        let mut s = only(StabilityConfig { tcs: true, ..StabilityConfig::disabled() });
        s.step(DT, &mut axles, StabilityInputs::default(), &mut p);
        assert!(s.flags().tcs);
        assert_eq!(axles[1].wheel(Side::Left).motor_cut(), 1.0);
        assert_eq!(axles[1].wheel(Side::Right).motor_cut(), 0.0);
    }

    #[test]
    fn esp_brakes_front_wheel_opposite_slip_on_understeer() {
        let mut axles = axles();
        let mut p = ScriptedContact::grounded(2);
        p.update(WheelSlot::left(0), |c| c.sideways_slip = 0.4);
        p.update(WheelSlot::right(0), |c| c.sideways_slip = 0.4);
        settle(&mut axles, &p, 120);

        let mut s = only(StabilityConfig { esp: true, ..StabilityConfig::disabled() });
        s.step(DT, &mut axles, StabilityInputs::default(), &mut p);
        let flags = s.flags();
        assert!(flags.esp && flags.understeer && !flags.oversteer);
        assert!(axles[0].wheel(Side::Left).esp_brake() > 0.0);
        assert_eq!(axles[0].wheel(Side::Right).esp_brake(), 0.0);
        assert_eq!(axles[1].wheel(Side::Left).esp_brake(), 0.0);
        assert!(axles[1].wheel(Side::Left).motor_cut() > 0.0);
    }

    #[test]
    fn esp_brakes_rear_wheel_on_oversteer() {
        let mut axles = axles();
        let mut p = ScriptedContact::grounded(2);
        p.update(WheelSlot::left(1), |c| c.sideways_slip = -0.5);
        p.update(WheelSlot::right(1), |c| c.sideways_slip = -0.5);
        settle(&mut axles, &p, 120);

        let mut s = only(StabilityConfig { esp: true, ..StabilityConfig::disabled() });
        s.step(DT, &mut axles, StabilityInputs::default(), &mut p);
        assert!(s.flags().oversteer);
        assert!(axles[1].wheel(Side::Right).esp_brake() > 0.0);
        assert_eq!(axles[1].wheel(Side::Left).esp_brake(), 0.0);
    }

    #[test]
    fn steering_helper_pulls_yaw_toward_steer() {
        let mut axles = axles();
        let mut p = ScriptedContact::grounded(2);
        p.motion.local_velocity = Vector3::new(0.0, 0.0, 15.0);
        settle(&mut axles, &p, 1);
        for _ in 0..30 {
            for a in axles.iter_mut() {
                a.step(DT, AxleInputs { steer: 0.5, ..AxleInputs::default() }, &mut p);
            }
        }

        let mut s = only(StabilityConfig { steering_helper: true, ..StabilityConfig::disabled() });
        for _ in 0..60 {
            s.step(DT, &mut axles, StabilityInputs::default(), &mut p);
        }
        assert!(s.grounded_factor() > 0.9);
        assert!(p.motion.yaw_rate() > 0.0);
        assert!(p.motion.local_velocity.x > 0.0);
    }

    #[test]
    fn steering_helper_is_capped_while_handbraking_and_off_in_the_air() {
        let mut axles = axles();
        let mut p = ScriptedContact::grounded(2);
        settle(&mut axles, &p, 1);
        let mut s = only(StabilityConfig { steering_helper: true, ..StabilityConfig::disabled() });
        let handbrake = StabilityInputs { handbrake: 1.0, ..StabilityInputs::default() };
        for _ in 0..120 {
            s.step(DT, &mut axles, handbrake, &mut p);
        }
        assert!(s.grounded_factor() <= 0.25 + 1e-6);

        p.set(WheelSlot::left(1), WheelContact::airborne());
        settle(&mut axles, &p, 1);
        s.step(DT, &mut axles, StabilityInputs::default(), &mut p);
        assert_eq!(s.grounded_factor(), 0.0);
    }

    #[test]
    fn traction_helper_reduces_front_grip_when_countersteering() {
        let mut axles = axles();
        let mut p = ScriptedContact::grounded(2);
        // sliding left relative to the body while spinning right, steering left
        p.motion.local_velocity = Vector3::new(-4.0, 0.0, 10.0);
        p.motion.local_angular_velocity = Vector3::new(0.0, 2.0, 0.0);
        settle(&mut axles, &p, 1);
        for _ in 0..30 {
            for a in axles.iter_mut() {
                a.step(DT, AxleInputs { steer: -1.0, ..AxleInputs::default() }, &mut p);
            }
        }

        let mut s = only(StabilityConfig { traction_helper: true, ..StabilityConfig::disabled() });
        s.step(DT, &mut axles, StabilityInputs::default(), &mut p);
        for a in axles.iter_mut() {
            a.apply(&TorqueGuards::default(), &mut p);
        }
        let front = p.last_command(WheelSlot::left(0)).unwrap().sideways_stiffness;
        let rear = p.last_command(WheelSlot::left(1)).unwrap().sideways_stiffness;
        assert!((front - 0.8).abs() < 1e-4);
        assert_eq!(rear, 1.0);
    }

    #[test]
    fn thresholds_and_intensities_are_validated() {
        let bad = StabilityConfig { abs_threshold: 0.7, ..StabilityConfig::default() };
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidThreshold { system: "abs", .. })));
        let bad = StabilityConfig { tcs_intensity: 1.5, ..StabilityConfig::default() };
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidIntensity { system: "tcs", .. })));
        assert!(StabilityConfig::default().validate().is_ok());
    }

    #[test]
    fn traction_helper_min_grip_must_be_positive() {
        let bad = StabilityConfig { traction_helper_min_grip: 0.0, ..StabilityConfig::default() };
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::InvalidGripFactor { field: "stability.traction_helper_min_grip", .. })
        ));
        let ok = StabilityConfig { traction_helper_min_grip: 1.0, ..StabilityConfig::default() };
        assert!(ok.validate().is_ok());
    }
}

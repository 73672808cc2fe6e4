// ==============================================================================
// engine.rs — ENGINE RPM + TORQUE MODEL
// ==============================================================================
// Per tick:
// 1) starter countdown (engine cranks for `starter_time` before it runs)
// 2) idle compensation: extra fuel while rpm sits near min_rpm
// 3) rev limiter with hysteresis: cut at max_rpm, release below 99.5 %
// 4) wanted rpm integrates three terms:
//      + free revving    (clutch + (1 - gear_engaged)) * fuel * max_rpm * accel
//      + wheel coupling  (1 - clutch) * gear_engaged * (wheel_rpm - wanted)
//      - deceleration    rpm * decel * (clutch + (1 - gear_engaged))
// 5) rpm follows wanted through a first-order lag; the lag shortens with
//    throttle (the engine feels lighter when the pedal is down)
// 6) torque = curve(rpm) * max_torque * fuel * turbo * nos, then scaled down
//    when the wheels drag the engine far above its own rpm (bogging)
// ==============================================================================

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::drivetrain::torque_curve::TorqueCurve;
use crate::error::{non_negative, ConfigError, ConfigResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub min_rpm: f32,
    pub max_rpm: f32,
    pub max_torque: f32,              // Nm where the curve reads 1.0
    pub torque_curve: TorqueCurve,

    pub rev_limiter: bool,
    pub rev_limiter_release: f32,     // fraction of max_rpm where fuel comes back
    pub rpm_overshoot: f32,           // rpm allowed above max_rpm

    pub acceleration_rate: f32,       // fraction of max_rpm per second, free revving
    pub coupling_rate: f32,           // 1/s, pull towards wheel-derived rpm
    pub deceleration_rate: f32,       // 1/s
    pub inertia: f32,                 // s, rpm lag off throttle
    pub inertia_full_throttle: f32,   // s, rpm lag at full throttle

    pub idle_throttle: f32,           // fuel added at min_rpm
    pub idle_band: f32,               // fraction above min_rpm where idle help fades out
    pub starter_time: f32,            // s

    pub turbo: bool,
    pub max_turbo_psi: f32,
    pub turbo_coefficient: f32,       // torque multiplier at full boost
    pub turbo_spool_rate: f32,        // psi / s
    pub nos_multiplier: f32,          // torque multiplier at full nos

    pub load_feedback_ratio: f32,     // wheel rpm above engine rpm * ratio => bogging
    pub load_feedback_floor: f32,     // smallest torque fraction left while bogging
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_rpm: 800.0,
            max_rpm: 7000.0,
            max_torque: 300.0,
            torque_curve: TorqueCurve::from_peak(800.0, 4500.0, 7000.0),

            rev_limiter: true,
            rev_limiter_release: 0.995,
            rpm_overshoot: 100.0,

            acceleration_rate: 1.5,
            coupling_rate: 12.0,
            deceleration_rate: 1.2,
            inertia: 0.15,
            inertia_full_throttle: 0.06,

            idle_throttle: 0.15,
            idle_band: 0.1,
            starter_time: 0.5,

            turbo: false,
            max_turbo_psi: 6.0,
            turbo_coefficient: 1.5,
            turbo_spool_rate: 12.0,
            nos_multiplier: 1.5,

            load_feedback_ratio: 1.5,
            load_feedback_floor: 0.1,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.min_rpm.is_finite() && self.max_rpm.is_finite())
            || self.min_rpm <= 0.0
            || self.max_rpm <= self.min_rpm
        {
            return Err(ConfigError::InvalidRpmRange { min: self.min_rpm, max: self.max_rpm });
        }
        non_negative("engine.max_torque", self.max_torque)?;
        non_negative("engine.rpm_overshoot", self.rpm_overshoot)?;
        non_negative("engine.acceleration_rate", self.acceleration_rate)?;
        non_negative("engine.coupling_rate", self.coupling_rate)?;
        non_negative("engine.deceleration_rate", self.deceleration_rate)?;
        non_negative("engine.inertia", self.inertia)?;
        non_negative("engine.inertia_full_throttle", self.inertia_full_throttle)?;
        non_negative("engine.idle_throttle", self.idle_throttle)?;
        non_negative("engine.starter_time", self.starter_time)?;
        non_negative("engine.max_turbo_psi", self.max_turbo_psi)?;
        non_negative("engine.load_feedback_floor", self.load_feedback_floor)?;
        if !(self.rev_limiter_release > 0.0 && self.rev_limiter_release <= 1.0) {
            return Err(ConfigError::NegativeValue {
                field: "engine.rev_limiter_release",
                value: self.rev_limiter_release,
            });
        }
        if !(self.turbo_coefficient >= 1.0 && self.nos_multiplier >= 1.0) {
            return Err(ConfigError::NegativeValue {
                field: "engine.turbo_coefficient / nos_multiplier (>= 1)",
                value: self.turbo_coefficient.min(self.nos_multiplier),
            });
        }
        if !(self.load_feedback_ratio >= 1.0) {
            return Err(ConfigError::NegativeValue {
                field: "engine.load_feedback_ratio (>= 1)",
                value: self.load_feedback_ratio,
            });
        }
        Ok(())
    }
}

/// What the rest of the drivetrain tells the engine this tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineInputs {
    pub throttle: f32,     // 0..1
    pub nos: f32,          // 0..1
    pub clutch: f32,       // clutch engagement, 0 = locked, 1 = open
    pub gear_engaged: f32, // gearbox gear input, 0 = neutral / shifting
    pub wheel_rpm: f32,    // driven wheel rpm seen through the gearbox
}

#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,

    running: bool,
    starter_remaining: f32,   // > 0 while cranking

    rpm: f32,
    wanted_rpm: f32,

    fuel_input: f32,
    idle_input: f32,
    nos_active: bool,

    turbo_psi: f32,
    turbo_blow_off: bool,
    rev_limiter_active: bool,

    produced_torque: f32,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let min = config.min_rpm;
        Self {
            config,
            running: false,
            starter_remaining: 0.0,
            rpm: min,
            wanted_rpm: min,
            fuel_input: 0.0,
            idle_input: 0.0,
            nos_active: false,
            turbo_psi: 0.0,
            turbo_blow_off: false,
            rev_limiter_active: false,
            produced_torque: 0.0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -------------------------
    // Lifecycle
    // -------------------------

    /// Starts cranking; the engine runs once the starter countdown reaches zero.
    pub fn start(&mut self) {
        if self.running || self.is_starting() {
            return;
        }
        if self.config.starter_time <= 0.0 {
            self.running = true;
            info!("engine running");
        } else {
            self.starter_remaining = self.config.starter_time;
            info!("engine cranking for {:.2}s", self.config.starter_time);
        }
    }

    pub fn stop(&mut self) {
        if self.running || self.is_starting() {
            info!("engine stopped at {:.0} rpm", self.rpm);
        }
        self.running = false;
        self.starter_remaining = 0.0;
    }

    /// Spawn defaults: stopped, sitting at idle rpm, no boost.
    pub fn reload(&mut self) {
        self.running = false;
        self.starter_remaining = 0.0;
        self.rpm = self.config.min_rpm;
        self.wanted_rpm = self.config.min_rpm;
        self.fuel_input = 0.0;
        self.idle_input = 0.0;
        self.nos_active = false;
        self.turbo_psi = 0.0;
        self.turbo_blow_off = false;
        self.rev_limiter_active = false;
        self.produced_torque = 0.0;
    }

    // -------------------------
    // Step
    // -------------------------

    pub fn step(&mut self, dt: f32, inputs: EngineInputs) -> f32 {
        if !(dt.is_finite() && dt > 0.0) {
            return self.produced_torque;
        }

        let throttle = unit(inputs.throttle);
        let clutch = unit(inputs.clutch);
        let gear_engaged = unit(inputs.gear_engaged);
        let wheel_rpm = if inputs.wheel_rpm.is_finite() { inputs.wheel_rpm.abs() } else { 0.0 };

        if self.is_starting() {
            self.starter_remaining -= dt;
            if self.starter_remaining <= 1e-6 {
                self.starter_remaining = 0.0;
                self.running = true;
                info!("engine running");
            }
        }

        let min = self.config.min_rpm;
        let max = self.config.max_rpm;
        let ceiling = max + self.config.rpm_overshoot;

        // idle compensation
        self.idle_input = if self.running {
            let band = (min * self.config.idle_band).max(1.0);
            self.config.idle_throttle * (1.0 - ((self.rpm - min) / band).clamp(0.0, 1.0))
        } else {
            0.0
        };

        // rev limiter (hysteresis)
        if self.config.rev_limiter {
            let was = self.rev_limiter_active;
            if self.rpm >= max {
                self.rev_limiter_active = true;
            } else if self.rpm < max * self.config.rev_limiter_release {
                self.rev_limiter_active = false;
            }
            if was != self.rev_limiter_active {
                debug!("rev limiter {} at {:.0} rpm", if self.rev_limiter_active { "cut" } else { "released" }, self.rpm);
            }
        } else {
            self.rev_limiter_active = false;
        }

        self.fuel_input = if self.running && !self.rev_limiter_active {
            (throttle + self.idle_input).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.nos_active = self.running && inputs.nos > 0.0 && self.fuel_input > 0.0;

        // wanted rpm
        let free = (clutch + (1.0 - gear_engaged)).clamp(0.0, 1.0);
        let coupling = (1.0 - clutch) * gear_engaged;

        let mut wanted = self.wanted_rpm;
        wanted += free * self.fuel_input * max * self.config.acceleration_rate * dt;
        wanted += coupling * (wheel_rpm - wanted) * (self.config.coupling_rate * dt).min(1.0);
        wanted -= self.rpm * self.config.deceleration_rate * free * dt;

        let floor = if self.running || self.is_starting() { min } else { 0.0 };
        self.wanted_rpm = finite_or(wanted, floor).clamp(floor, ceiling);

        // rpm lag
        let tau = lerp(self.config.inertia, self.config.inertia_full_throttle, throttle).max(1e-3);
        let alpha = 1.0 - (-dt / tau).exp();
        let rpm = self.rpm + (self.wanted_rpm - self.rpm) * alpha;
        self.rpm = finite_or(rpm, floor).clamp(0.0, ceiling);

        self.update_turbo(dt, throttle);

        let torque = self.output_torque(self.rpm, self.fuel_input, self.turbo_psi, inputs.nos)
            * self.load_feedback(wheel_rpm, coupling);

        let limit = self.config.max_torque * self.config.turbo_coefficient * self.config.nos_multiplier;
        self.produced_torque = finite_or(torque, 0.0).clamp(0.0, limit);
        self.produced_torque
    }

    fn update_turbo(&mut self, dt: f32, throttle: f32) {
        self.turbo_blow_off = false;
        if !self.config.turbo {
            self.turbo_psi = 0.0;
            return;
        }

        let max_psi = self.config.max_turbo_psi;
        if throttle < 0.25 && self.turbo_psi > max_psi * 0.5 {
            self.turbo_blow_off = true;
            self.turbo_psi = 0.0;
            return;
        }

        let target = max_psi * self.fuel_input * (self.rpm / self.config.max_rpm).clamp(0.0, 1.0);
        let step = self.config.turbo_spool_rate * dt;
        self.turbo_psi += (target - self.turbo_psi).clamp(-step, step);
        self.turbo_psi = self.turbo_psi.clamp(0.0, max_psi);
    }

    /// Torque at an arbitrary operating point, before load feedback.
    pub fn output_torque(&self, rpm: f32, fuel: f32, turbo_psi: f32, nos: f32) -> f32 {
        let cfg = &self.config;
        let turbo = if cfg.turbo && cfg.max_turbo_psi > 0.0 {
            1.0 + (cfg.turbo_coefficient - 1.0) * (turbo_psi / cfg.max_turbo_psi).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let nos = 1.0 + (cfg.nos_multiplier - 1.0) * unit(nos);
        cfg.torque_curve.evaluate(rpm) * cfg.max_torque * unit(fuel) * turbo * nos
    }

    /// Torque at `rpm` for a given throttle, using the engine's current idle and boost state.
    pub fn torque_at(&self, rpm: f32, throttle: f32) -> f32 {
        let fuel = if self.running && !self.rev_limiter_active {
            (unit(throttle) + self.idle_input).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.output_torque(rpm, fuel, self.turbo_psi, 0.0)
    }

    fn load_feedback(&self, wheel_rpm: f32, coupling: f32) -> f32 {
        let limit = self.rpm * self.config.load_feedback_ratio;
        if coupling <= 0.0 || wheel_rpm <= limit || wheel_rpm <= 0.0 {
            return 1.0;
        }
        let bogged = (limit / wheel_rpm).max(self.config.load_feedback_floor);
        lerp(1.0, bogged, coupling)
    }

    // -------------------------
    // Read-outs
    // -------------------------

    pub fn rpm(&self) -> f32 {
        self.rpm
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_starting(&self) -> bool {
        self.starter_remaining > 0.0
    }

    pub fn fuel_input(&self) -> f32 {
        self.fuel_input
    }

    pub fn idle_input(&self) -> f32 {
        self.idle_input
    }

    pub fn turbo_psi(&self) -> f32 {
        self.turbo_psi
    }

    pub fn turbo_blow_off(&self) -> bool {
        self.turbo_blow_off
    }

    pub fn nos_active(&self) -> bool {
        self.nos_active
    }

    pub fn rev_limiter_active(&self) -> bool {
        self.rev_limiter_active
    }

    pub fn produced_torque(&self) -> f32 {
        self.produced_torque
    }
}

#[inline]
pub(crate) fn unit(v: f32) -> f32 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}

#[inline]
pub(crate) fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[inline]
pub(crate) fn finite_or(v: f32, fallback: f32) -> f32 {
    if v.is_finite() { v } else { fallback }
}

/// Running mean, `None` for an empty iterator.
pub(crate) fn mean(values: impl IntoIterator<Item = f32>) -> Option<f32> {
    let (sum, n) = values.into_iter().fold((0.0f32, 0u32), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f32)
}

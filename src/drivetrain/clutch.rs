//! Clutch between engine and gearbox.
//!
//! `engagement` is 0 when the clutch is locked (no slip) and 1 when it is fully
//! open. The automatic clutch opens to keep the engine from stalling and closes
//! once the engine is above `engage_rpm` and the driver wants to move.

use serde::{Deserialize, Serialize};

use crate::drivetrain::engine::{finite_or, unit};
use crate::error::{non_negative, ConfigResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClutchConfig {
    pub automatic: bool,
    pub engage_rpm: f32,
    pub engage_speed_kmh: f32,       // above this speed the clutch stays closed without throttle
    pub throttle_threshold: f32,
    pub inertia: f32,                // s for a full 0 <-> 1 travel
    pub press_when_shifting: bool,
    pub press_when_handbraking: bool,
    pub handbrake_threshold: f32,
    pub snap: f32,                   // distance from 0/1 that snaps to the limit
}

impl Default for ClutchConfig {
    fn default() -> Self {
        Self {
            automatic: true,
            engage_rpm: 1600.0,
            engage_speed_kmh: 15.0,
            throttle_threshold: 0.1,
            inertia: 0.15,
            press_when_shifting: true,
            press_when_handbraking: true,
            handbrake_threshold: 0.75,
            snap: 0.05,
        }
    }
}

impl ClutchConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        non_negative("clutch.engage_rpm", self.engage_rpm)?;
        non_negative("clutch.engage_speed_kmh", self.engage_speed_kmh)?;
        non_negative("clutch.inertia", self.inertia)?;
        non_negative("clutch.snap", self.snap)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClutchInputs {
    pub engine_rpm: f32,
    pub throttle: f32,
    pub speed_kmh: f32,
    pub shifting: bool,
    pub handbrake: f32,
    pub pedal: f32, // manual clutch pedal, 1 = pressed
}

#[derive(Debug, Clone)]
pub struct Clutch {
    config: ClutchConfig,
    engagement: f32,
    received_torque: f32,
    produced_torque: f32,
}

impl Clutch {
    pub fn new(config: ClutchConfig) -> Self {
        Self {
            config,
            engagement: 1.0,
            received_torque: 0.0,
            produced_torque: 0.0,
        }
    }

    pub fn config(&self) -> &ClutchConfig {
        &self.config
    }

    pub fn reload(&mut self) {
        self.engagement = 1.0;
        self.received_torque = 0.0;
        self.produced_torque = 0.0;
    }

    /// Target engagement for this tick, before filtering.
    fn target(&self, inputs: &ClutchInputs) -> f32 {
        let cfg = &self.config;

        if cfg.press_when_shifting && inputs.shifting {
            return 1.0;
        }
        if cfg.press_when_handbraking && inputs.handbrake >= cfg.handbrake_threshold {
            return 1.0;
        }
        if !cfg.automatic {
            return unit(inputs.pedal);
        }

        let wants_to_move = inputs.throttle >= cfg.throttle_threshold
            || inputs.speed_kmh.abs() >= cfg.engage_speed_kmh;
        if inputs.engine_rpm > cfg.engage_rpm && wants_to_move { 0.0 } else { 1.0 }
    }

    pub fn step(&mut self, dt: f32, received_torque: f32, inputs: ClutchInputs) -> f32 {
        if dt.is_finite() && dt > 0.0 {
            let target = self.target(&inputs);
            let max_step = if self.config.inertia > 0.0 { dt / self.config.inertia } else { 1.0 };
            self.engagement += (target - self.engagement).clamp(-max_step, max_step);

            // no permanent residual slip
            if self.engagement <= self.config.snap {
                self.engagement = 0.0;
            } else if self.engagement >= 1.0 - self.config.snap {
                self.engagement = 1.0;
            }
        }

        self.received_torque = finite_or(received_torque, 0.0);
        self.produced_torque = self.received_torque * (1.0 - self.engagement);
        self.produced_torque
    }

    pub fn engagement(&self) -> f32 {
        self.engagement
    }

    pub fn received_torque(&self) -> f32 {
        self.received_torque
    }

    pub fn produced_torque(&self) -> f32 {
        self.produced_torque
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    fn pulling_away() -> ClutchInputs {
        ClutchInputs { engine_rpm: 3000.0, throttle: 1.0, ..ClutchInputs::default() }
    }

    #[test]
    fn starts_open_and_transmits_nothing() {
        let mut c = Clutch::new(ClutchConfig::default());
        assert_eq!(c.step(0.0, 200.0, ClutchInputs::default()), 0.0);
    }

    #[test]
    fn engages_above_engage_rpm_with_throttle() {
        let mut c = Clutch::new(ClutchConfig::default());
        for _ in 0..30 {
            c.step(DT, 200.0, pulling_away());
        }
        assert_eq!(c.engagement(), 0.0);
        assert_eq!(c.produced_torque(), 200.0);
    }

    #[test]
    fn opens_near_stall() {
        let mut c = Clutch::new(ClutchConfig::default());
        for _ in 0..30 {
            c.step(DT, 200.0, pulling_away());
        }
        for _ in 0..30 {
            c.step(DT, 200.0, ClutchInputs { engine_rpm: 900.0, throttle: 1.0, ..ClutchInputs::default() });
        }
        assert_eq!(c.engagement(), 1.0);
    }

    #[test]
    fn rate_is_bounded() {
        let mut c = Clutch::new(ClutchConfig::default());
        c.step(DT, 0.0, pulling_away());
        let expected = 1.0 - DT / c.config().inertia;
        assert!((c.engagement() - expected).abs() < 1e-5);
    }

    #[test]
    fn shifting_and_handbrake_force_open() {
        let mut c = Clutch::new(ClutchConfig::default());
        for _ in 0..30 {
            c.step(DT, 100.0, pulling_away());
        }
        for _ in 0..30 {
            c.step(DT, 100.0, ClutchInputs { shifting: true, ..pulling_away() });
        }
        assert_eq!(c.engagement(), 1.0);

        for _ in 0..30 {
            c.step(DT, 100.0, pulling_away());
        }
        for _ in 0..30 {
            c.step(DT, 100.0, ClutchInputs { handbrake: 1.0, ..pulling_away() });
        }
        assert_eq!(c.engagement(), 1.0);
    }

    #[test]
    fn manual_clutch_follows_pedal() {
        let mut c = Clutch::new(ClutchConfig { automatic: false, ..ClutchConfig::default() });
        for _ in 0..60 {
            c.step(DT, 100.0, ClutchInputs { pedal: 0.5, ..ClutchInputs::default() });
        }
        assert!((c.engagement() - 0.5).abs() < 1e-4);
        assert!((c.produced_torque() - 50.0).abs() < 1e-2);
    }
}

//! Differential: final drive multiplication and the left/right torque split.
//!
//! The bias is a fraction of half the produced torque that moves from the
//! faster wheel to the slower one:
//!
//! ```text
//! diff  = |l| - |r|
//! slip  = |diff| / (|l| + |r|)          (0 when both are 0)
//! bias  = slip * k                      Open k=1, Limited k=1-lsd/100, else k=0
//! left  = half - half * bias * sign(diff)
//! right = half + half * bias * sign(diff)
//! ```

use serde::{Deserialize, Serialize};

use crate::drivetrain::engine::finite_or;
use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DifferentialKind {
    Open,
    Limited,
    FullLocked,
    Direct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferentialConfig {
    pub kind: DifferentialKind,
    pub final_drive: f32,
    pub limited_slip_ratio: f32, // 50..100, Limited only
}

impl Default for DifferentialConfig {
    fn default() -> Self {
        Self {
            kind: DifferentialKind::Open,
            final_drive: 3.73,
            limited_slip_ratio: 80.0,
        }
    }
}

impl DifferentialConfig {
    pub fn validate(&self, axle: usize) -> ConfigResult<()> {
        if !(self.final_drive.is_finite() && self.final_drive > 0.0) {
            return Err(ConfigError::InvalidFinalDrive { axle, ratio: self.final_drive });
        }
        if !(50.0..=100.0).contains(&self.limited_slip_ratio) {
            return Err(ConfigError::InvalidLimitedSlipRatio { axle, ratio: self.limited_slip_ratio });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Differential {
    config: DifferentialConfig,

    slip_ratio: f32,
    bias: f32,
    received_torque: f32,
    produced_torque: f32,
    left_torque: f32,
    right_torque: f32,

    torque_override: Option<(f32, f32)>,
}

impl Differential {
    pub fn new(config: DifferentialConfig) -> Self {
        Self {
            config,
            slip_ratio: 0.0,
            bias: 0.0,
            received_torque: 0.0,
            produced_torque: 0.0,
            left_torque: 0.0,
            right_torque: 0.0,
            torque_override: None,
        }
    }

    pub fn config(&self) -> &DifferentialConfig {
        &self.config
    }

    pub fn reload(&mut self) {
        *self = Self::new(self.config.clone());
    }

    /// How much of the slip ratio turns into bias for this kind.
    fn bias_factor(&self) -> f32 {
        match self.config.kind {
            DifferentialKind::Open => 1.0,
            DifferentialKind::Limited => 1.0 - self.config.limited_slip_ratio / 100.0,
            DifferentialKind::FullLocked | DifferentialKind::Direct => 0.0,
        }
    }

    pub fn split(&mut self, left_rpm: f32, right_rpm: f32, received_torque: f32) -> (f32, f32) {
        let l = finite_or(left_rpm, 0.0).abs();
        let r = finite_or(right_rpm, 0.0).abs();
        let diff = l - r;
        let sum = l + r;

        self.slip_ratio = if sum > 0.0 { (diff.abs() / sum).clamp(0.0, 1.0) } else { 0.0 };
        self.bias = self.slip_ratio * self.bias_factor();

        self.received_torque = finite_or(received_torque, 0.0);
        self.produced_torque = self.received_torque * self.config.final_drive;

        if let Some((left, right)) = self.torque_override {
            self.left_torque = left;
            self.right_torque = right;
            return (left, right);
        }

        let half = self.produced_torque * 0.5;
        let shift = if diff == 0.0 { 0.0 } else { half * self.bias * diff.signum() };
        self.left_torque = half - shift;
        self.right_torque = half + shift;
        (self.left_torque, self.right_torque)
    }

    /// Fixed per-wheel torque until `clear_override` is called.
    pub fn set_override(&mut self, left: f32, right: f32) {
        self.torque_override = Some((finite_or(left, 0.0), finite_or(right, 0.0)));
    }

    pub fn clear_override(&mut self) {
        self.torque_override = None;
    }

    pub fn is_overridden(&self) -> bool {
        self.torque_override.is_some()
    }

    pub fn final_drive(&self) -> f32 {
        self.config.final_drive
    }

    pub fn slip_ratio(&self) -> f32 {
        self.slip_ratio
    }

    pub fn bias(&self) -> f32 {
        self.bias
    }

    pub fn produced_torque(&self) -> f32 {
        self.produced_torque
    }

    pub fn left_torque(&self) -> f32 {
        self.left_torque
    }

    pub fn right_torque(&self) -> f32 {
        self.right_torque
    }
}

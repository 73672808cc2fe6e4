// ==============================================================================
// torque_curve.rs — NORMALIZED ENGINE TORQUE CURVE (RPM -> 0..1)
// ------------------------------------------------------------------------------
// Piecewise-linear keys (rpm, normalized torque). Outside the key range the
// first/last value is held. Keys are absolute RPM and strictly increasing.
// ==============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<[f32; 2]>", into = "Vec<[f32; 2]>")]
pub struct TorqueCurve {
    keys: Vec<[f32; 2]>,
}

impl TorqueCurve {
    pub fn new(keys: Vec<[f32; 2]>) -> ConfigResult<Self> {
        if keys.is_empty() {
            return Err(ConfigError::InvalidTorqueCurve("needs at least one key"));
        }
        if keys.iter().any(|[rpm, t]| !rpm.is_finite() || !t.is_finite() || *t < 0.0) {
            return Err(ConfigError::InvalidTorqueCurve("keys must be finite and torque >= 0"));
        }
        if keys.windows(2).any(|w| w[1][0] <= w[0][0]) {
            return Err(ConfigError::InvalidTorqueCurve("rpm keys must be strictly increasing"));
        }
        Ok(Self { keys })
    }

    /// Default shape: rises from idle to the peak, falls off towards the redline.
    pub fn from_peak(min_rpm: f32, peak_rpm: f32, max_rpm: f32) -> Self {
        let peak = peak_rpm.clamp(min_rpm + 1.0, max_rpm - 1.0);
        Self {
            keys: vec![
                [0.0, 0.0],
                [min_rpm, 0.55],
                [peak, 1.0],
                [max_rpm, 0.8],
            ],
        }
    }

    pub fn keys(&self) -> &[[f32; 2]] {
        &self.keys
    }

    /// Rpm of the highest key.
    pub fn peak_rpm(&self) -> f32 {
        self.keys
            .iter()
            .fold([0.0, f32::MIN], |best, k| if k[1] > best[1] { *k } else { best })[0]
    }

    pub fn evaluate(&self, rpm: f32) -> f32 {
        let first = self.keys[0];
        let last = self.keys[self.keys.len() - 1];
        if !rpm.is_finite() || rpm <= first[0] {
            return first[1];
        }
        if rpm >= last[0] {
            return last[1];
        }

        // keys are sorted; find the segment containing rpm
        let i = self.keys.partition_point(|k| k[0] <= rpm);
        let [r0, t0] = self.keys[i - 1];
        let [r1, t1] = self.keys[i];
        let u = (rpm - r0) / (r1 - r0);
        t0 + (t1 - t0) * u
    }
}

impl TryFrom<Vec<[f32; 2]>> for TorqueCurve {
    type Error = ConfigError;

    fn try_from(keys: Vec<[f32; 2]>) -> Result<Self, Self::Error> {
        Self::new(keys)
    }
}

impl From<TorqueCurve> for Vec<[f32; 2]> {
    fn from(curve: TorqueCurve) -> Self {
        curve.keys
    }
}

use serde::{Deserialize, Serialize};

/// Normalized driver (or AI) intent for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlInput {
    pub throttle: f32,  // 0..1
    pub brake: f32,     // 0..1
    pub steer: f32,     // -1..1 (negative = left)
    pub handbrake: f32, // 0..1
    pub clutch: f32,    // 0..1 (1 = pedal fully pressed, manual clutch only)
    pub nos: f32,       // 0..1
}

impl ControlInput {
    pub fn throttle(throttle: f32) -> Self {
        Self { throttle, ..Self::default() }
    }

    pub fn brake(brake: f32) -> Self {
        Self { brake, ..Self::default() }
    }

    /// Clamp every axis into its range; NaN collapses to 0.
    pub fn sanitized(self) -> Self {
        #[inline]
        fn unit(v: f32) -> f32 {
            if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
        }

        Self {
            throttle: unit(self.throttle),
            brake: unit(self.brake),
            steer: if self.steer.is_finite() { self.steer.clamp(-1.0, 1.0) } else { 0.0 },
            handbrake: unit(self.handbrake),
            clutch: unit(self.clutch),
            nos: unit(self.nos),
        }
    }
}

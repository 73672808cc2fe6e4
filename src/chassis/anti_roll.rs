// ==============================================================================
// anti_roll.rs — ANTI-ROLL BAR FORCES
// ------------------------------------------------------------------------------
// An anti-roll bar couples the two wheels of one axle. The difference in
// normalized compression (0..1) becomes a pair of opposite vertical forces at
// the wheel positions:
//
//   delta = cl - cr
//   left  = +k * delta   (pushes the compressed side up)
//   right = -k * delta
//
// The pair sums to zero, so the bar moves load across the axle without adding
// any net lift. Nothing is produced unless both wheels are on the ground.
// ==============================================================================

use crate::contact::WheelContact;

/// Compression differences below this are treated as level.
const DEADZONE: f32 = 1e-4;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AntiRollForces {
    pub left: f32,  // N, > 0 = up
    pub right: f32, // N
}

impl AntiRollForces {
    pub fn is_zero(&self) -> bool {
        self.left == 0.0 && self.right == 0.0
    }
}

/// Vertical forces for one axle. `stiffness` is N per unit of compression difference.
pub fn anti_roll_forces(left: &WheelContact, right: &WheelContact, stiffness: f32) -> AntiRollForces {
    if !(left.grounded && right.grounded) || !(stiffness.is_finite() && stiffness > 0.0) {
        return AntiRollForces::default();
    }

    let cl = left.compression.clamp(0.0, 1.0);
    let cr = right.compression.clamp(0.0, 1.0);
    let delta = cl - cr;
    if delta.abs() < DEADZONE {
        return AntiRollForces::default();
    }

    let transfer = stiffness * delta;
    AntiRollForces { left: transfer, right: -transfer }
}

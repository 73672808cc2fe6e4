// ==============================================================================
// state.rs — PER-TICK VEHICLE SNAPSHOT
// ------------------------------------------------------------------------------
// Read-only view handed to audio/UI/AI/recorders after every tick. Plain data,
// serializable to JSON lines. Rebuilt in place each tick (the wheel Vec keeps
// its allocation).
// ==============================================================================

use serde::Serialize;

use crate::chassis::Axle;
use crate::contact::WheelSlot;
use crate::drivetrain::GearState;
use crate::stability::StabilityFlags;

#[derive(Debug, Clone, Serialize)]
pub struct WheelSnapshot {
    pub slot: WheelSlot,
    pub grounded: bool,
    pub load: f32,           // N, suspension load at the contact
    pub rpm: f32,
    pub forward_slip: f32,
    pub sideways_slip: f32,
    pub total_slip: f32,
    pub skidding: bool,
    pub temperature: f32,
    pub deflated: bool,
    pub steer_angle: f32,
    pub motor_torque: f32,   // after cuts and guards
    pub brake_torque: f32,   // after ABS, incl. handbrake and ESP
    pub drive_force: f32,    // N at the contact patch
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleState {
    pub tick: u64,
    pub speed_kmh: f32,
    pub forward_speed: f32,   // m/s, signed

    pub rpm: f32,
    pub engine_running: bool,
    pub rev_limiter: bool,
    pub turbo_psi: f32,
    pub turbo_blow_off: bool,
    pub nos_active: bool,

    pub clutch_engagement: f32,
    pub gear_index: usize,
    pub gear_state: GearState,
    pub shifting: bool,

    pub produced_engine_torque: f32,
    pub produced_clutch_torque: f32,
    pub produced_gearbox_torque: f32,
    pub produced_differential_torque: f32,

    pub wheels: Vec<WheelSnapshot>,
    pub stability: StabilityFlags,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            tick: 0,
            speed_kmh: 0.0,
            forward_speed: 0.0,
            rpm: 0.0,
            engine_running: false,
            rev_limiter: false,
            turbo_psi: 0.0,
            turbo_blow_off: false,
            nos_active: false,
            clutch_engagement: 1.0,
            gear_index: 0,
            gear_state: GearState::Neutral,
            shifting: false,
            produced_engine_torque: 0.0,
            produced_clutch_torque: 0.0,
            produced_gearbox_torque: 0.0,
            produced_differential_torque: 0.0,
            wheels: Vec::new(),
            stability: StabilityFlags::default(),
        }
    }
}

impl VehicleState {
    pub(crate) fn capture_wheels(&mut self, axles: &[Axle]) {
        self.wheels.clear();
        for w in axles.iter().flat_map(Axle::wheels) {
            let cmd = w.command();
            self.wheels.push(WheelSnapshot {
                slot: w.slot(),
                grounded: w.is_grounded(),
                load: w.contact().load,
                rpm: w.rpm(),
                forward_slip: w.forward_slip(),
                sideways_slip: w.sideways_slip(),
                total_slip: w.total_slip(),
                skidding: w.is_skidding(),
                temperature: w.temperature(),
                deflated: w.is_deflated(),
                steer_angle: w.steer_angle(),
                motor_torque: cmd.motor_torque,
                brake_torque: cmd.brake_torque,
                drive_force: w.drive_force(),
            });
        }
    }

    pub fn wheel(&self, slot: WheelSlot) -> Option<&WheelSnapshot> {
        self.wheels.iter().find(|w| w.slot == slot)
    }

    /// Slip per wheel in axle order, left before right.
    pub fn wheel_slip(&self) -> impl Iterator<Item = (WheelSlot, f32, f32)> + '_ {
        self.wheels.iter().map(|w| (w.slot, w.forward_slip, w.sideways_slip))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

use std::sync::Arc;

use aven_drivetrain::chassis::AxleConfig;
use aven_drivetrain::drivetrain::{DifferentialKind, GearMode, GearState};
use aven_drivetrain::{
    ConfigError, ControlInput, GroundMaterials, ScriptedContact, Side, StabilityConfig, Vehicle, VehicleConfig,
    WheelSlot,
};
use nalgebra::Vector3;
use proptest::prelude::*;

const DT: f32 = 1.0 / 60.0;

fn vehicle(config: VehicleConfig) -> Vehicle {
    Vehicle::new(config, Arc::new(GroundMaterials::default())).unwrap()
}

fn run(v: &mut Vehicle, p: &mut ScriptedContact, input: ControlInput, ticks: usize) {
    for _ in 0..ticks {
        v.tick(DT, input, p);
    }
}

/// Engine started and past the starter countdown.
fn running(config: VehicleConfig, axles: usize) -> (Vehicle, ScriptedContact) {
    let mut v = vehicle(config);
    let mut p = ScriptedContact::grounded(axles);
    v.start_engine();
    run(&mut v, &mut p, ControlInput::default(), 40);
    assert!(v.engine().is_running());
    (v, p)
}

#[test]
fn reload_and_start_sits_at_idle_in_first_gear() {
    let mut v = vehicle(VehicleConfig::default());
    let mut p = ScriptedContact::grounded(2);
    v.reload();
    v.start_engine();
    let s = v.tick(DT, ControlInput::default(), &mut p).clone();

    assert!((s.rpm - v.config().engine.min_rpm).abs() < 1.0, "rpm = {}", s.rpm);
    assert_eq!(s.gear_index, 0);
    assert_eq!(s.gear_state, GearState::ForwardDrive);
    assert_eq!(s.tick, 1);
}

#[test]
fn throttle_reaches_only_the_powered_axle() {
    let (mut v, mut p) = running(VehicleConfig::default(), 2);
    p.clear_outputs();
    run(&mut v, &mut p, ControlInput::throttle(1.0), 120);

    assert!(p.commands.iter().any(|(s, c)| s.axle == 1 && c.motor_torque > 0.0));
    assert!(p.commands.iter().all(|(s, c)| s.axle != 0 || c.motor_torque == 0.0));
}

#[test]
fn automatic_upshifts_when_rpm_and_speed_allow() {
    let (mut v, mut p) = running(VehicleConfig::default(), 2);
    // ~60 km/h on 0.35 m wheels
    p.rolling(455.0, 0.35);
    run(&mut v, &mut p, ControlInput::throttle(1.0), 120);

    let s = v.state();
    assert!(s.gear_index >= 1, "still in gear {}", s.gear_index);
    assert_eq!(s.gear_state, GearState::ForwardDrive);
}

#[test]
fn manual_gearbox_holds_gear_at_the_limiter() {
    let mut config = VehicleConfig::default();
    config.gearbox.mode = GearMode::Manual;
    let (mut v, mut p) = running(config, 2);
    p.rolling(455.0, 0.35);
    run(&mut v, &mut p, ControlInput::throttle(1.0), 120);
    assert_eq!(v.state().gear_index, 0);

    assert!(v.shift_up());
    run(&mut v, &mut p, ControlInput::throttle(1.0), 30);
    assert_eq!(v.state().gear_index, 1);
}

#[test]
fn locked_brakes_are_released_by_abs() {
    let (mut v, mut p) = running(VehicleConfig::default(), 2);
    p.rolling(300.0, 0.35);
    for axle in 0..2 {
        for slot in [WheelSlot::left(axle), WheelSlot::right(axle)] {
            p.update(slot, |c| c.forward_slip = -1.0);
        }
    }
    p.clear_outputs();
    run(&mut v, &mut p, ControlInput::brake(1.0), 30);

    assert!(v.state().stability.abs);
    assert_eq!(p.last_command(WheelSlot::left(0)).unwrap().brake_torque, 0.0);
}

#[test]
fn differential_override_bypasses_the_gearbox() {
    let (mut v, mut p) = running(VehicleConfig::default(), 2);
    v.override_differential(100.0, -50.0);
    run(&mut v, &mut p, ControlInput::default(), 1);

    assert_eq!(p.last_command(WheelSlot::left(1)).unwrap().motor_torque, 100.0);
    assert_eq!(p.last_command(WheelSlot::right(1)).unwrap().motor_torque, -50.0);

    v.clear_differential_override();
    run(&mut v, &mut p, ControlInput::default(), 1);
    assert!(!v.axles()[1].differential().unwrap().is_overridden());
}

#[test]
fn override_reaches_every_powered_axle() {
    let mut config = VehicleConfig::tank();
    config.stability = StabilityConfig::disabled();
    let (mut v, mut p) = running(config, 2);
    v.override_differential(40.0, 40.0);
    run(&mut v, &mut p, ControlInput::default(), 1);

    for axle in 0..2 {
        assert_eq!(p.last_command(WheelSlot::left(axle)).unwrap().motor_torque, 40.0);
    }
}

#[test]
fn reverse_swaps_pedals_in_automatic() {
    let (mut v, mut p) = running(VehicleConfig::default(), 2);
    v.override_gear(0, GearState::Reverse);
    run(&mut v, &mut p, ControlInput::brake(0.4), 30);

    // the brake pedal is the throttle while reversing
    assert_eq!(p.last_command(WheelSlot::left(0)).unwrap().brake_torque, 0.0);
    assert_eq!(v.state().gear_state, GearState::Reverse);
}

#[test]
fn manual_reverse_keeps_pedals() {
    let mut config = VehicleConfig::default();
    config.gearbox.mode = GearMode::Manual;
    let (mut v, mut p) = running(config, 2);
    v.override_gear(0, GearState::Reverse);
    run(&mut v, &mut p, ControlInput::brake(0.4), 5);
    assert!(p.last_command(WheelSlot::left(0)).unwrap().brake_torque > 0.0);
}

#[test]
fn park_brakes_every_wheel() {
    let mut v = vehicle(VehicleConfig::default());
    let mut p = ScriptedContact::grounded(2);
    v.override_gear(0, GearState::Park);
    run(&mut v, &mut p, ControlInput::default(), 1);

    for axle in 0..2 {
        for side in [Side::Left, Side::Right] {
            assert!(p.last_command(WheelSlot::new(axle, side)).unwrap().brake_torque > 0.0);
        }
    }
}

#[test]
fn handbrake_only_on_handbrake_axles() {
    let mut config = VehicleConfig::default();
    config.stability = StabilityConfig::disabled();
    let mut v = vehicle(config);
    let mut p = ScriptedContact::grounded(2);
    run(&mut v, &mut p, ControlInput { handbrake: 1.0, ..ControlInput::default() }, 1);

    assert_eq!(p.last_command(WheelSlot::left(0)).unwrap().brake_torque, 0.0);
    assert!(p.last_command(WheelSlot::left(1)).unwrap().brake_torque > 0.0);
}

#[test]
fn airborne_vehicle_still_commands_every_wheel() {
    let mut v = vehicle(VehicleConfig::default());
    let mut p = ScriptedContact::default();
    let s = v.tick(DT, ControlInput::throttle(1.0), &mut p);
    assert!(s.wheels.iter().all(|w| !w.grounded));
    assert_eq!(p.commands.len(), 4);
}

#[test]
fn reload_restores_spawn_state() {
    let (mut v, mut p) = running(VehicleConfig::default(), 2);
    v.deflate_wheel(WheelSlot::left(0));
    v.override_gear(3, GearState::ForwardDrive);
    run(&mut v, &mut p, ControlInput::throttle(1.0), 10);

    v.reload();
    assert!(!v.engine().is_running());
    assert_eq!(v.gearbox().gear(), 0);
    assert_eq!(v.state().tick, 0);
    assert_eq!(v.engine().rpm(), v.config().engine.min_rpm);
}

#[test]
fn json_config_builds_a_vehicle() {
    let json = r#"{ "name": "light", "engine": { "max_torque": 120 }, "gearbox": { "mode": "Manual" } }"#;
    let config = VehicleConfig::from_json_str(json).unwrap();
    let v = vehicle(config);
    assert_eq!(v.config().engine.max_torque, 120.0);
    assert_eq!(v.gearbox().mode(), GearMode::Manual);
}

#[test]
fn invalid_axle_is_rejected_at_build() {
    let mut config = VehicleConfig::default();
    let mut bad = AxleConfig::rear();
    bad.wheel.radius = 0.0;
    config.axles.push(bad);
    assert!(Vehicle::new(config, Arc::new(GroundMaterials::default())).is_err());
}

#[test]
fn zero_grip_factors_are_rejected_at_build() {
    let mut config = VehicleConfig::default();
    config.axles[0].wheel.deflated_stiffness_multiplier = 0.0;
    assert!(matches!(
        Vehicle::new(config, Arc::new(GroundMaterials::default())),
        Err(ConfigError::InvalidGripFactor { .. })
    ));

    let mut config = VehicleConfig::default();
    config.stability.traction_helper_min_grip = 0.0;
    assert!(matches!(
        Vehicle::new(config, Arc::new(GroundMaterials::default())),
        Err(ConfigError::InvalidGripFactor { .. })
    ));
}

#[test]
fn non_finite_contacts_keep_outputs_finite() {
    let (mut v, mut p) = running(VehicleConfig::default(), 2);
    p.update(WheelSlot::left(1), |c| {
        c.rpm = f32::NAN;
        c.forward_slip = f32::INFINITY;
        c.load = f32::NAN;
    });
    p.update(WheelSlot::right(0), |c| c.sideways_slip = f32::NEG_INFINITY);
    p.motion.local_velocity = Vector3::new(f32::NAN, 0.0, f32::INFINITY);
    p.clear_outputs();

    let input = ControlInput { throttle: 1.0, steer: 0.5, ..ControlInput::default() };
    for _ in 0..120 {
        let s = v.tick(DT, input, &mut p);
        assert!(s.rpm.is_finite() && s.speed_kmh.is_finite() && s.forward_speed.is_finite());
        assert!(s.produced_engine_torque.is_finite());
        assert!(s.produced_gearbox_torque.is_finite());
        assert!(s.produced_differential_torque.is_finite());
        for w in &s.wheels {
            let values = [
                w.load,
                w.rpm,
                w.forward_slip,
                w.sideways_slip,
                w.total_slip,
                w.temperature,
                w.steer_angle,
                w.motor_torque,
                w.brake_torque,
                w.drive_force,
            ];
            assert!(values.iter().all(|x| x.is_finite()), "{:?}", w);
        }
    }

    assert_eq!(p.commands.len(), 120 * 4);
    for (slot, c) in &p.commands {
        let values = [
            c.motor_torque,
            c.brake_torque,
            c.steer_angle,
            c.radius,
            c.forward_stiffness,
            c.sideways_stiffness,
            c.damping,
        ];
        assert!(values.iter().all(|x| x.is_finite()), "{slot:?}: {c:?}");
    }
}

#[test]
fn snapshot_reports_load_and_drive_force() {
    let (mut v, mut p) = running(VehicleConfig::default(), 2);
    for axle in 0..2 {
        p.update(WheelSlot::left(axle), |c| c.load = 3500.0);
        p.update(WheelSlot::right(axle), |c| c.load = 3200.0);
    }
    run(&mut v, &mut p, ControlInput::throttle(1.0), 30);

    let s = v.state();
    let rear = s.wheel(WheelSlot::left(1)).unwrap();
    assert_eq!(rear.load, 3500.0);
    assert_eq!(s.wheel(WheelSlot::right(0)).unwrap().load, 3200.0);
    assert!(rear.motor_torque > 0.0);
    let radius = v.config().axles[1].wheel.radius;
    assert!((rear.drive_force - rear.motor_torque / radius).abs() < 1e-2);
    assert_eq!(s.wheel(WheelSlot::left(0)).unwrap().drive_force, 0.0);
}

#[test]
fn open_differential_with_equal_wheels_splits_evenly() {
    let mut config = VehicleConfig::default();
    config.stability = StabilityConfig::disabled();
    if let Some(d) = config.axles[1].differential.as_mut() {
        d.kind = DifferentialKind::Open;
    }
    let (mut v, mut p) = running(config, 2);
    run(&mut v, &mut p, ControlInput::throttle(1.0), 60);

    let rear = &v.axles()[1];
    let l = rear.wheel(Side::Left).drive_torque();
    let r = rear.wheel(Side::Right).drive_torque();
    assert!((l - r).abs() < 1e-3);
}

#[derive(Debug, Clone)]
enum Op {
    Up,
    Down,
    To(usize),
    Override(usize, GearState),
    Reverse,
    Neutral,
    Tick(f32, f32),
}

fn op() -> impl Strategy<Value = Op> {
    let state = prop_oneof![
        Just(GearState::Park),
        Just(GearState::Reverse),
        Just(GearState::Neutral),
        Just(GearState::ForwardDrive),
    ];
    prop_oneof![
        Just(Op::Up),
        Just(Op::Down),
        (0usize..20).prop_map(Op::To),
        ((0usize..20), state).prop_map(|(g, s)| Op::Override(g, s)),
        Just(Op::Reverse),
        Just(Op::Neutral),
        ((0.0f32..1.0), (0.0f32..1.0)).prop_map(|(t, b)| Op::Tick(t, b)),
    ]
}

proptest! {
    #[test]
    fn gear_index_stays_in_range(ops in proptest::collection::vec(op(), 1..60)) {
        let mut v = vehicle(VehicleConfig::default());
        let mut p = ScriptedContact::grounded(2);
        v.start_engine();
        let count = v.gearbox().gear_count();

        for op in ops {
            match op {
                Op::Up => { v.shift_up(); }
                Op::Down => { v.shift_down(); }
                Op::To(g) => { v.shift_to_gear(g); }
                Op::Override(g, s) => v.override_gear(g, s),
                Op::Reverse => { v.shift_reverse(); }
                Op::Neutral => { v.shift_to_neutral(); }
                Op::Tick(t, b) => {
                    let s = v.tick(DT, ControlInput { throttle: t, brake: b, ..ControlInput::default() }, &mut p);
                    prop_assert!(s.gear_index < count);
                    prop_assert!(s.rpm.is_finite());
                }
            }
            prop_assert!(v.gearbox().gear() < count);
        }
    }

    #[test]
    fn abs_never_adds_brake(brake in 0.0f32..1.0, slip in -5.0f32..5.0) {
        let mut v = vehicle(VehicleConfig::default());
        let mut p = ScriptedContact::grounded(2);
        p.update(WheelSlot::left(0), |c| c.forward_slip = slip);
        for _ in 0..10 {
            v.tick(DT, ControlInput::brake(brake), &mut p);
        }
        let max = v.config().axles[0].max_brake_torque * brake;
        let cmd = p.last_command(WheelSlot::left(0)).unwrap();
        prop_assert!(cmd.brake_torque <= max + 1e-3);
    }
}

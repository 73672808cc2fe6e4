// ==============================================================================
// vehicle.rs — COMPOSITION ROOT + FIXED-STEP TICK
// ==============================================================================
// Vehicle::new builds the whole component tree once from a validated config.
// Vehicle::tick runs one fixed step, always in this order:
//
//   0) wheels sense the contact provider (slip, load, wheel rpm)
//   1) engine      throttle + wheel feedback            -> engine torque
//   2) clutch      engine torque                        -> clutch torque
//   3) gearbox     clutch torque, timed shifts          -> torque per differential
//   4) diffs       per powered axle                     -> left/right drive torque
//   5) axles       steering, brakes, park, anti-roll
//   6) stability   ABS/TCS/ESP cuts, helper nudges
//   7) wheels      build + send one command each
//   8) snapshot
//
// Automatic mode in Reverse swaps the pedals for the engine and brakes; the
// gearbox always sees the raw pedals so it can decide when to leave Reverse.
// ==============================================================================

use std::sync::Arc;

use log::{debug, info};

use crate::chassis::{Axle, AxleInputs, TorqueGuards};
use crate::config::VehicleConfig;
use crate::contact::{ContactProvider, GroundMaterials, WheelSlot};
use crate::drivetrain::{
    Clutch, ClutchInputs, Engine, EngineInputs, GearMode, GearState, Gearbox, GearboxInputs, Selector,
};
use crate::drivetrain::engine::mean;
use crate::error::ConfigResult;
use crate::input::ControlInput;
use crate::stability::{StabilityController, StabilityInputs};
use crate::state::VehicleState;

/// Below this forward speed (m/s) the vehicle counts as stopped.
const STOPPED_SPEED: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct Vehicle {
    config: VehicleConfig,
    materials: Arc<GroundMaterials>,

    engine: Engine,
    clutch: Clutch,
    gearbox: Gearbox,
    axles: Vec<Axle>,
    stability: StabilityController,

    controllable: bool,
    tick: u64,
    state: VehicleState,
}

impl Vehicle {
    pub fn new(config: VehicleConfig, materials: Arc<GroundMaterials>) -> ConfigResult<Self> {
        config.validate()?;

        let axles = config
            .axles
            .iter()
            .enumerate()
            .map(|(i, a)| Axle::new(i, a.clone(), Arc::clone(&materials)))
            .collect::<ConfigResult<Vec<_>>>()?;

        let vehicle = Self {
            engine: Engine::new(config.engine.clone()),
            clutch: Clutch::new(config.clutch.clone()),
            gearbox: Gearbox::new(config.gearbox.clone())?,
            stability: StabilityController::new(config.stability.clone()),
            axles,
            config,
            materials,
            controllable: true,
            tick: 0,
            state: VehicleState::default(),
        };
        info!(
            "vehicle '{}' built: {} axles, {} powered, {} gears",
            vehicle.config.name,
            vehicle.axles.len(),
            vehicle.powered_axles(),
            vehicle.gearbox.gear_count()
        );
        Ok(vehicle)
    }

    // -------------------------
    // Tick
    // -------------------------

    pub fn tick<P: ContactProvider + ?Sized>(&mut self, dt: f32, input: ControlInput, provider: &mut P) -> &VehicleState {
        let input = if self.controllable { input.sanitized() } else { ControlInput::default() };

        // 0) sense
        for axle in self.axles.iter_mut() {
            axle.sense(dt, &*provider);
        }
        let forward_speed = provider.motion().forward_speed();
        let forward_speed = if forward_speed.is_finite() { forward_speed } else { 0.0 };
        let speed_kmh = forward_speed * 3.6;

        let (throttle, brake) = self.pedals(&input);

        // 1) engine
        let engine_torque = self.engine.step(
            dt,
            EngineInputs {
                throttle,
                nos: input.nos,
                clutch: self.clutch.engagement(),
                gear_engaged: self.gearbox.gear_input(),
                wheel_rpm: self.wheel_feedback_rpm(),
            },
        );

        // 2) clutch
        let clutch_torque = self.clutch.step(
            dt,
            engine_torque,
            ClutchInputs {
                engine_rpm: self.engine.rpm(),
                throttle,
                speed_kmh,
                shifting: self.gearbox.is_shifting(),
                handbrake: input.handbrake,
                pedal: input.clutch,
            },
        );

        // 3) gearbox
        self.gearbox.step(
            dt,
            GearboxInputs {
                engine_rpm: self.engine.rpm(),
                speed_kmh,
                throttle: input.throttle,
                brake: input.brake,
            },
        );
        let per_differential = self.gearbox.output(clutch_torque, self.powered_axles());

        // 4) differentials, 5) axles
        let axle_inputs = AxleInputs {
            steer: input.steer,
            brake,
            handbrake: input.handbrake,
            park: self.gearbox.state() == GearState::Park,
        };
        for axle in self.axles.iter_mut() {
            axle.drive(per_differential);
            axle.step(dt, axle_inputs, provider);
        }

        // 6) stability
        self.stability.step(
            dt,
            &mut self.axles,
            StabilityInputs {
                brake,
                handbrake: input.handbrake,
                gear_direction: if self.gearbox.is_shifting() { 0.0 } else { self.gearbox.state().direction() },
            },
            provider,
        );

        // 7) wheels
        let guards = TorqueGuards {
            engaged: self.engine.is_running() && self.gearbox.state().is_engaged(),
            over_speed: speed_kmh.abs() >= self.gearbox.config().max_speed_kmh,
            direction: if forward_speed.abs() > STOPPED_SPEED { forward_speed.signum() } else { 0.0 },
        };
        for axle in self.axles.iter_mut() {
            axle.apply(&guards, provider);
        }

        // 8) snapshot
        self.tick += 1;
        self.capture(provider.motion().speed_kmh(), forward_speed);
        &self.state
    }

    /// (throttle, brake) for the engine and brakes.
    fn pedals(&self, input: &ControlInput) -> (f32, f32) {
        let swapped = self.gearbox.mode() == GearMode::Automatic
            && self.gearbox.config().auto_reverse
            && self.gearbox.state() == GearState::Reverse;
        if swapped { (input.brake, input.throttle) } else { (input.throttle, input.brake) }
    }

    /// Driven wheel speed seen from the engine side of the gearbox.
    fn wheel_feedback_rpm(&self) -> f32 {
        let Some(at_axles) = mean(
            self.axles
                .iter()
                .filter(|a| a.is_powered())
                .map(|a| a.mean_wheel_rpm() * a.differential().map_or(1.0, |d| d.final_drive())),
        ) else {
            return 0.0;
        };
        let rpm = at_axles * self.gearbox.ratio();
        if rpm.is_finite() { rpm } else { 0.0 }
    }

    fn powered_axles(&self) -> usize {
        self.axles.iter().filter(|a| a.is_powered()).count()
    }

    fn capture(&mut self, speed_kmh: f32, forward_speed: f32) {
        let s = &mut self.state;
        s.tick = self.tick;
        s.speed_kmh = if speed_kmh.is_finite() { speed_kmh } else { 0.0 };
        s.forward_speed = forward_speed;

        s.rpm = self.engine.rpm();
        s.engine_running = self.engine.is_running();
        s.rev_limiter = self.engine.rev_limiter_active();
        s.turbo_psi = self.engine.turbo_psi();
        s.turbo_blow_off = self.engine.turbo_blow_off();
        s.nos_active = self.engine.nos_active();

        s.clutch_engagement = self.clutch.engagement();
        s.gear_index = self.gearbox.gear();
        s.gear_state = self.gearbox.state();
        s.shifting = self.gearbox.is_shifting();

        s.produced_engine_torque = self.engine.produced_torque();
        s.produced_clutch_torque = self.clutch.produced_torque();
        s.produced_gearbox_torque = self.gearbox.produced_torque();
        s.produced_differential_torque = self
            .axles
            .iter()
            .filter_map(Axle::differential)
            .map(|d| d.left_torque() + d.right_torque())
            .sum();

        s.capture_wheels(&self.axles);
        s.stability = self.stability.flags();
    }

    // -------------------------
    // Control surface
    // -------------------------

    pub fn start_engine(&mut self) {
        self.engine.start();
    }

    pub fn stop_engine(&mut self) {
        self.engine.stop();
    }

    pub fn shift_up(&mut self) -> bool {
        self.gearbox.shift_up()
    }

    pub fn shift_down(&mut self) -> bool {
        self.gearbox.shift_down()
    }

    pub fn shift_to_gear(&mut self, gear: usize) -> bool {
        self.gearbox.shift_to_gear(gear)
    }

    pub fn shift_reverse(&mut self) -> bool {
        self.gearbox.shift_reverse()
    }

    pub fn shift_to_neutral(&mut self) -> bool {
        self.gearbox.shift_to_neutral()
    }

    /// DNRP selector; ignored by other gearbox modes.
    pub fn select(&mut self, selector: Selector) -> bool {
        self.gearbox.select(selector)
    }

    pub fn override_gear(&mut self, gear: usize, state: GearState) {
        self.gearbox.override_gear(gear, state);
    }

    /// Fixed left/right torque on every powered axle until cleared.
    pub fn override_differential(&mut self, left: f32, right: f32) {
        for d in self.axles.iter_mut().filter_map(Axle::differential_mut) {
            d.set_override(left, right);
        }
    }

    pub fn clear_differential_override(&mut self) {
        for d in self.axles.iter_mut().filter_map(Axle::differential_mut) {
            d.clear_override();
        }
    }

    /// When false, every driver input is ignored (treated as released).
    pub fn set_controllable(&mut self, controllable: bool) {
        if self.controllable != controllable {
            debug!("vehicle '{}' controllable: {controllable}", self.config.name);
        }
        self.controllable = controllable;
    }

    pub fn deflate_wheel(&mut self, slot: WheelSlot) -> bool {
        match self.axles.get_mut(slot.axle) {
            Some(axle) => {
                axle.wheel_mut(slot.side).deflate();
                info!("wheel {slot} deflated");
                true
            }
            None => false,
        }
    }

    pub fn inflate_wheel(&mut self, slot: WheelSlot) -> bool {
        match self.axles.get_mut(slot.axle) {
            Some(axle) => {
                axle.wheel_mut(slot.side).inflate();
                true
            }
            None => false,
        }
    }

    /// Back to spawn defaults: engine stopped at idle rpm, default gear, no slip.
    pub fn reload(&mut self) {
        self.engine.reload();
        self.clutch.reload();
        self.gearbox.reload();
        for axle in self.axles.iter_mut() {
            axle.reload();
        }
        self.stability.reload();
        self.tick = 0;
        self.state = VehicleState::default();
        info!("vehicle '{}' reloaded", self.config.name);
    }

    // -------------------------
    // Read-outs
    // -------------------------

    pub fn config(&self) -> &VehicleConfig {
        &self.config
    }

    pub fn materials(&self) -> &Arc<GroundMaterials> {
        &self.materials
    }

    pub fn state(&self) -> &VehicleState {
        &self.state
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn clutch(&self) -> &Clutch {
        &self.clutch
    }

    pub fn gearbox(&self) -> &Gearbox {
        &self.gearbox
    }

    pub fn axles(&self) -> &[Axle] {
        &self.axles
    }

    pub fn stability(&self) -> &StabilityController {
        &self.stability
    }

    pub fn is_controllable(&self) -> bool {
        self.controllable
    }
}

// ==============================================================================
// gearbox.rs — GEAR STATE MACHINE + TIMED SHIFTS
// ==============================================================================
// States: Park, Reverse, Neutral, ForwardDrive. The gear index is always a
// valid index into `gear_ratios`; reverse reuses gear 0's ratio with a negated
// output.
//
// Shifts:
// - Any request (manual, automatic, DNRP selector) becomes a pending target
//   and starts a countdown of `shifting_time`.
// - While the countdown runs the box transmits nothing and every other
//   request is rejected.
// - When it reaches zero the target commits (gear + state together) and a
//   `shift_cooldown` starts. Automatic logic stays quiet until it expires.
// - `override_gear` writes gear/state directly and drops a pending shift.
//
// Automatic mode:
//   target_speed[i] = max_speed / ratio[i] * ratio[last]
//   up:   rpm >= shift_up_rpm   && speed >= target_speed[gear] * threshold
//   down: rpm <= shift_down_rpm => lowest gear whose target speed > speed
//   plus automatic reverse when held on the brake at a standstill.
//
// AutomaticDnrp: a D/N/R/P selector gates everything; automatic shifting only
// happens in D.
// ==============================================================================

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::drivetrain::engine::finite_or;
use crate::error::{non_negative, ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GearMode {
    Manual,
    Automatic,
    AutomaticDnrp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GearState {
    Park,
    Reverse,
    Neutral,
    ForwardDrive,
}

impl GearState {
    /// Whether the box can transmit torque in this state.
    pub fn is_engaged(self) -> bool {
        matches!(self, GearState::Reverse | GearState::ForwardDrive)
    }

    pub fn direction(self) -> f32 {
        match self {
            GearState::Reverse => -1.0,
            GearState::ForwardDrive => 1.0,
            GearState::Park | GearState::Neutral => 0.0,
        }
    }
}

/// DNRP selector position, ordered P < R < N < D.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Selector {
    P,
    R,
    N,
    D,
}

impl Selector {
    pub fn gear_state(self) -> GearState {
        match self {
            Selector::P => GearState::Park,
            Selector::R => GearState::Reverse,
            Selector::N => GearState::Neutral,
            Selector::D => GearState::ForwardDrive,
        }
    }

    fn from_state(state: GearState) -> Self {
        match state {
            GearState::Park => Selector::P,
            GearState::Reverse => Selector::R,
            GearState::Neutral => Selector::N,
            GearState::ForwardDrive => Selector::D,
        }
    }

    fn up(self) -> Self {
        match self {
            Selector::P => Selector::R,
            Selector::R => Selector::N,
            Selector::N | Selector::D => Selector::D,
        }
    }

    fn down(self) -> Self {
        match self {
            Selector::D => Selector::N,
            Selector::N => Selector::R,
            Selector::R | Selector::P => Selector::P,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GearboxConfig {
    pub mode: GearMode,
    pub gear_ratios: Vec<f32>,
    pub default_state: GearState,

    pub shifting_time: f32,    // s
    pub shift_cooldown: f32,   // s, automatic logic only
    pub shift_threshold: f32,  // fraction of the current gear's target speed
    pub shift_up_rpm: f32,
    pub shift_down_rpm: f32,
    pub max_speed_kmh: f32,    // top speed in the last gear

    pub gear_input_rate: f32,  // 1/s, re-engagement after a shift
    pub auto_reverse: bool,
    pub reverse_speed_kmh: f32,
}

impl Default for GearboxConfig {
    fn default() -> Self {
        Self {
            mode: GearMode::Automatic,
            gear_ratios: vec![4.35, 2.5, 1.66, 1.23, 1.0, 0.85],
            default_state: GearState::ForwardDrive,

            shifting_time: 0.2,
            shift_cooldown: 0.5,
            shift_threshold: 0.85,
            shift_up_rpm: 5500.0,
            shift_down_rpm: 3000.0,
            max_speed_kmh: 240.0,

            gear_input_rate: 5.0,
            auto_reverse: true,
            reverse_speed_kmh: 3.0,
        }
    }
}

impl GearboxConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.gear_ratios.is_empty() {
            return Err(ConfigError::EmptyGearRatios);
        }
        for (index, &ratio) in self.gear_ratios.iter().enumerate() {
            if !(ratio.is_finite() && ratio > 0.0) {
                return Err(ConfigError::InvalidGearRatio { index, ratio });
            }
        }
        non_negative("gearbox.shifting_time", self.shifting_time)?;
        non_negative("gearbox.shift_cooldown", self.shift_cooldown)?;
        non_negative("gearbox.shift_threshold", self.shift_threshold)?;
        non_negative("gearbox.shift_up_rpm", self.shift_up_rpm)?;
        non_negative("gearbox.shift_down_rpm", self.shift_down_rpm)?;
        non_negative("gearbox.max_speed_kmh", self.max_speed_kmh)?;
        non_negative("gearbox.gear_input_rate", self.gear_input_rate)?;
        non_negative("gearbox.reverse_speed_kmh", self.reverse_speed_kmh)?;
        Ok(())
    }
}

/// Inputs for the automatic logic. Pedals are the driver's raw pedals.
#[derive(Debug, Clone, Copy, Default)]
pub struct GearboxInputs {
    pub engine_rpm: f32,
    pub speed_kmh: f32,  // signed, > 0 forward
    pub throttle: f32,
    pub brake: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingShift {
    gear: usize,
    state: GearState,
}

#[derive(Debug, Clone)]
pub struct Gearbox {
    config: GearboxConfig,
    target_speeds: Vec<f32>,

    gear: usize,
    state: GearState,
    selector: Selector,

    pending: Option<PendingShift>,
    shift_remaining: f32,
    cooldown: f32,
    gear_input: f32,

    received_torque: f32,
    produced_torque: f32,
}

impl Gearbox {
    pub fn new(config: GearboxConfig) -> ConfigResult<Self> {
        config.validate()?;
        let last = config.gear_ratios[config.gear_ratios.len() - 1];
        let target_speeds = config
            .gear_ratios
            .iter()
            .map(|r| config.max_speed_kmh / r * last)
            .collect();
        let state = config.default_state;
        Ok(Self {
            config,
            target_speeds,
            gear: 0,
            state,
            selector: Selector::from_state(state),
            pending: None,
            shift_remaining: 0.0,
            cooldown: 0.0,
            gear_input: 0.0,
            received_torque: 0.0,
            produced_torque: 0.0,
        })
    }

    pub fn config(&self) -> &GearboxConfig {
        &self.config
    }

    pub fn reload(&mut self) {
        self.gear = 0;
        self.state = self.config.default_state;
        self.selector = Selector::from_state(self.state);
        self.pending = None;
        self.shift_remaining = 0.0;
        self.cooldown = 0.0;
        self.gear_input = 0.0;
        self.received_torque = 0.0;
        self.produced_torque = 0.0;
    }

    // -------------------------
    // Shift requests
    // -------------------------

    /// Starts a timed shift. Returns false when rejected (already shifting or no-op).
    fn request(&mut self, gear: usize, state: GearState) -> bool {
        if self.is_shifting() {
            debug!("shift to {state:?}/{gear} rejected: shift in progress");
            return false;
        }
        let gear = gear.min(self.last_gear());
        if gear == self.gear && state == self.state {
            return false;
        }

        debug!("shift {:?}/{} -> {state:?}/{gear}", self.state, self.gear);
        self.pending = Some(PendingShift { gear, state });
        self.shift_remaining = self.config.shifting_time;
        self.gear_input = 0.0;
        if self.shift_remaining <= 0.0 {
            self.commit();
        }
        true
    }

    fn commit(&mut self) {
        if let Some(p) = self.pending.take() {
            self.gear = p.gear;
            self.state = p.state;
            if self.config.mode == GearMode::AutomaticDnrp {
                self.selector = Selector::from_state(p.state);
            }
        }
        self.shift_remaining = 0.0;
        self.cooldown = self.config.shift_cooldown;
    }

    pub fn shift_up(&mut self) -> bool {
        if self.config.mode == GearMode::AutomaticDnrp && self.selector != Selector::D {
            return self.select(self.selector.up());
        }
        match self.state {
            GearState::ForwardDrive if self.gear < self.last_gear() => {
                self.request(self.gear + 1, GearState::ForwardDrive)
            }
            GearState::ForwardDrive => false,
            GearState::Reverse => self.request(0, GearState::Neutral),
            GearState::Neutral | GearState::Park => self.request(0, GearState::ForwardDrive),
        }
    }

    pub fn shift_down(&mut self) -> bool {
        if self.config.mode == GearMode::AutomaticDnrp && (self.selector != Selector::D || self.gear == 0) {
            return self.select(self.selector.down());
        }
        match self.state {
            GearState::ForwardDrive if self.gear > 0 => self.request(self.gear - 1, GearState::ForwardDrive),
            GearState::ForwardDrive => self.request(0, GearState::Neutral),
            GearState::Neutral => self.request(0, GearState::Reverse),
            GearState::Reverse | GearState::Park => false,
        }
    }

    pub fn shift_to_gear(&mut self, gear: usize) -> bool {
        if self.config.mode == GearMode::AutomaticDnrp && self.selector != Selector::D {
            return false;
        }
        if gear > self.last_gear() {
            warn!("shift to gear {gear} clamped to {}", self.last_gear());
        }
        self.request(gear, GearState::ForwardDrive)
    }

    pub fn shift_reverse(&mut self) -> bool {
        if self.config.mode == GearMode::AutomaticDnrp {
            return self.select(Selector::R);
        }
        self.request(0, GearState::Reverse)
    }

    pub fn shift_to_neutral(&mut self) -> bool {
        if self.config.mode == GearMode::AutomaticDnrp {
            return self.select(Selector::N);
        }
        self.request(self.gear, GearState::Neutral)
    }

    /// Moves the DNRP selector. Ignored outside `AutomaticDnrp`.
    pub fn select(&mut self, selector: Selector) -> bool {
        if self.config.mode != GearMode::AutomaticDnrp || selector == self.selector {
            return false;
        }
        let accepted = self.request(0, selector.gear_state());
        if accepted {
            self.selector = selector;
        }
        accepted
    }

    /// Writes gear and state directly, bypassing and cancelling any timed shift.
    pub fn override_gear(&mut self, gear: usize, state: GearState) {
        let clamped = gear.min(self.last_gear());
        if clamped != gear {
            warn!("override gear {gear} out of range, clamped to {clamped}");
        }
        self.pending = None;
        self.shift_remaining = 0.0;
        self.gear = clamped;
        self.state = state;
        self.selector = Selector::from_state(state);
    }

    // -------------------------
    // Step
    // -------------------------

    pub fn step(&mut self, dt: f32, inputs: GearboxInputs) {
        if !(dt.is_finite() && dt > 0.0) {
            return;
        }

        if self.gear > self.last_gear() {
            warn!("gear index {} out of range, clamped", self.gear);
            self.gear = self.last_gear();
        }

        if self.is_shifting() {
            self.shift_remaining -= dt;
            if self.shift_remaining <= 1e-6 {
                self.commit();
            }
        } else {
            self.cooldown = (self.cooldown - dt).max(0.0);
        }

        if !self.is_shifting() && self.cooldown <= 0.0 {
            self.automatic(inputs);
        }

        if self.is_shifting() || !self.state.is_engaged() {
            self.gear_input = 0.0;
        } else {
            self.gear_input = (self.gear_input + self.config.gear_input_rate * dt).min(1.0);
            if self.config.gear_input_rate <= 0.0 {
                self.gear_input = 1.0;
            }
        }
    }

    fn automatic(&mut self, inputs: GearboxInputs) {
        let auto = match self.config.mode {
            GearMode::Manual => false,
            GearMode::Automatic => true,
            GearMode::AutomaticDnrp => self.selector == Selector::D,
        };
        if !auto {
            return;
        }

        let rpm = finite_or(inputs.engine_rpm, 0.0);
        let speed = finite_or(inputs.speed_kmh, 0.0);
        let standstill = speed.abs() < self.config.reverse_speed_kmh;
        let auto_reverse = self.config.auto_reverse && self.config.mode == GearMode::Automatic;

        match self.state {
            GearState::ForwardDrive => {
                if auto_reverse && standstill && inputs.brake > 0.5 && inputs.throttle < 0.1 {
                    self.request(0, GearState::Reverse);
                    return;
                }

                if rpm >= self.config.shift_up_rpm
                    && self.gear < self.last_gear()
                    && speed >= self.target_speeds[self.gear] * self.config.shift_threshold
                {
                    self.request(self.gear + 1, GearState::ForwardDrive);
                    return;
                }

                if rpm <= self.config.shift_down_rpm && self.gear > 0 {
                    let lowest = self.target_speeds[..self.gear].iter().position(|&t| t > speed);
                    if let Some(gear) = lowest {
                        self.request(gear, GearState::ForwardDrive);
                    }
                }
            }
            GearState::Reverse => {
                if auto_reverse && standstill && inputs.throttle > 0.5 && inputs.brake < 0.1 {
                    self.request(0, GearState::ForwardDrive);
                }
            }
            GearState::Neutral | GearState::Park => {}
        }
    }

    /// Torque handed to each of `differentials` differentials.
    pub fn output(&mut self, received_torque: f32, differentials: usize) -> f32 {
        self.received_torque = finite_or(received_torque, 0.0);

        let ratio = self.config.gear_ratios[self.gear.min(self.last_gear())];
        let direction = if self.is_shifting() { 0.0 } else { self.state.direction() };
        self.produced_torque = self.received_torque * ratio * self.gear_input * direction;

        if differentials == 0 {
            return 0.0;
        }
        self.produced_torque / differentials as f32
    }

    // -------------------------
    // Read-outs
    // -------------------------

    fn last_gear(&self) -> usize {
        self.config.gear_ratios.len() - 1
    }

    pub fn gear(&self) -> usize {
        self.gear
    }

    pub fn gear_count(&self) -> usize {
        self.config.gear_ratios.len()
    }

    pub fn state(&self) -> GearState {
        self.state
    }

    pub fn mode(&self) -> GearMode {
        self.config.mode
    }

    pub fn selector(&self) -> Selector {
        self.selector
    }

    pub fn ratio(&self) -> f32 {
        self.config.gear_ratios[self.gear.min(self.last_gear())]
    }

    pub fn target_speeds(&self) -> &[f32] {
        &self.target_speeds
    }

    pub fn is_shifting(&self) -> bool {
        self.pending.is_some()
    }

    pub fn shift_remaining(&self) -> f32 {
        self.shift_remaining
    }

    pub fn cooldown(&self) -> f32 {
        self.cooldown
    }

    /// 0..1, how firmly the current gear is engaged (0 while shifting or in N/P).
    pub fn gear_input(&self) -> f32 {
        self.gear_input
    }

    pub fn produced_torque(&self) -> f32 {
        self.produced_torque
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DT: f32 = 1.0 / 60.0;

    fn manual() -> Gearbox {
        Gearbox::new(GearboxConfig { mode: GearMode::Manual, ..GearboxConfig::default() }).unwrap()
    }

    fn run(g: &mut Gearbox, ticks: usize, inputs: GearboxInputs) {
        for _ in 0..ticks {
            g.step(DT, inputs);
        }
    }

    #[test]
    fn empty_ratios_fail_fast() {
        let cfg = GearboxConfig { gear_ratios: vec![], ..GearboxConfig::default() };
        assert!(matches!(Gearbox::new(cfg), Err(ConfigError::EmptyGearRatios)));
        let cfg = GearboxConfig { gear_ratios: vec![3.0, 0.0], ..GearboxConfig::default() };
        assert!(matches!(Gearbox::new(cfg), Err(ConfigError::InvalidGearRatio { index: 1, .. })));
    }

    #[test]
    fn target_speeds_scale_with_last_ratio() {
        let g = manual();
        let t = g.target_speeds();
        assert!((t[t.len() - 1] - 240.0).abs() < 1e-3);
        assert!((t[0] - 240.0 / 4.35 * 0.85).abs() < 1e-3);
    }

    #[test]
    fn shift_commits_after_shifting_time_and_rejects_overlap() {
        let mut g = manual();
        assert!(g.shift_up());
        assert!(!g.shift_up(), "second request must be rejected");
        assert_eq!(g.gear(), 0);

        run(&mut g, 6, GearboxInputs::default());
        assert_eq!(g.gear(), 0);
        assert!(g.is_shifting());
        assert_eq!(g.output(100.0, 1), 0.0);

        run(&mut g, 7, GearboxInputs::default());
        assert_eq!(g.gear(), 1);
        assert!(!g.is_shifting());
    }

    #[test]
    fn reverse_negates_and_neutral_blocks() {
        let mut g = manual();
        g.override_gear(0, GearState::Reverse);
        run(&mut g, 30, GearboxInputs::default());
        assert!(g.output(100.0, 1) < 0.0);

        g.override_gear(0, GearState::Neutral);
        run(&mut g, 30, GearboxInputs::default());
        assert_eq!(g.output(100.0, 1), 0.0);
    }

    #[test]
    fn torque_is_split_across_differentials() {
        let mut g = manual();
        run(&mut g, 30, GearboxInputs::default());
        let one = g.output(100.0, 1);
        let two = g.output(100.0, 2);
        assert!((one - 435.0).abs() < 1e-3);
        assert!((two - one / 2.0).abs() < 1e-4);
        assert_eq!(g.output(100.0, 0), 0.0);
    }

    #[test]
    fn override_clamps_and_cancels_pending_shift() {
        let mut g = manual();
        g.shift_up();
        g.override_gear(42, GearState::ForwardDrive);
        assert_eq!(g.gear(), 5);
        assert!(!g.is_shifting());
    }

    #[test]
    fn automatic_upshifts_once_then_waits_for_cooldown() {
        let mut g = Gearbox::new(GearboxConfig::default()).unwrap();
        let speed = g.target_speeds()[0] * 0.9;
        let inputs = GearboxInputs { engine_rpm: 6000.0, speed_kmh: speed, throttle: 1.0, brake: 0.0 };
        let shifting_time = g.config().shifting_time;
        let cooldown = g.config().shift_cooldown;

        g.step(DT, inputs);
        assert!(g.is_shifting());
        assert_eq!(g.gear(), 0);

        let mut elapsed = 0.0;
        while g.gear() == 0 {
            g.step(DT, inputs);
            elapsed += DT;
            assert!(elapsed < shifting_time + DT + 1e-4, "shift took too long");
        }
        assert!(elapsed >= shifting_time - DT - 1e-4, "shift committed early after {elapsed}");
        assert_eq!(g.gear(), 1);

        // conditions for 1 -> 2 hold, but nothing may start while the cooldown runs
        let fast = GearboxInputs { speed_kmh: g.target_speeds()[1], ..inputs };
        let mut waited = 0.0;
        while g.cooldown() > 0.0 {
            g.step(DT, fast);
            waited += DT;
            if g.cooldown() > 0.0 {
                assert!(!g.is_shifting());
                assert_eq!(g.gear(), 1);
            }
        }
        assert!(waited >= cooldown - DT - 1e-4);
    }

    #[test]
    fn automatic_downshifts_to_lowest_gear_above_speed() {
        let mut g = Gearbox::new(GearboxConfig { shifting_time: 0.0, ..GearboxConfig::default() }).unwrap();
        g.override_gear(4, GearState::ForwardDrive);
        let speed = g.target_speeds()[2] - 1.0;
        g.step(DT, GearboxInputs { engine_rpm: 2000.0, speed_kmh: speed, ..GearboxInputs::default() });
        assert_eq!(g.gear(), 2);
    }

    #[test]
    fn automatic_reverse_from_standstill() {
        let mut g = Gearbox::new(GearboxConfig { shifting_time: 0.0, ..GearboxConfig::default() }).unwrap();
        g.step(DT, GearboxInputs { engine_rpm: 800.0, brake: 1.0, ..GearboxInputs::default() });
        assert_eq!(g.state(), GearState::Reverse);
        assert_eq!(g.gear(), 0);

        run(&mut g, 60, GearboxInputs { engine_rpm: 800.0, ..GearboxInputs::default() });
        g.step(DT, GearboxInputs { engine_rpm: 800.0, throttle: 1.0, ..GearboxInputs::default() });
        assert_eq!(g.state(), GearState::ForwardDrive);
    }

    #[test]
    fn dnrp_selector_gates_shifting() {
        let mut g = Gearbox::new(GearboxConfig {
            mode: GearMode::AutomaticDnrp,
            default_state: GearState::Park,
            shifting_time: 0.0,
            ..GearboxConfig::default()
        })
        .unwrap();
        assert_eq!(g.selector(), Selector::P);
        assert!(!g.shift_to_gear(2), "gears are locked outside D");

        g.shift_up();
        assert_eq!(g.state(), GearState::Reverse);
        run(&mut g, 60, GearboxInputs::default());
        g.shift_up();
        assert_eq!(g.state(), GearState::Neutral);
        run(&mut g, 60, GearboxInputs::default());
        g.shift_up();
        assert_eq!(g.selector(), Selector::D);
        assert_eq!(g.state(), GearState::ForwardDrive);

        run(&mut g, 60, GearboxInputs::default());
        assert!(g.shift_to_gear(2));
        assert_eq!(g.gear(), 2);
    }

    #[test]
    fn reload_restores_default_gear() {
        let mut g = manual();
        g.override_gear(3, GearState::Reverse);
        g.reload();
        assert_eq!(g.gear(), 0);
        assert_eq!(g.state(), GearState::ForwardDrive);
    }

    #[derive(Debug, Clone)]
    enum Req {
        Up,
        Down,
        To(usize),
        Reverse,
        Neutral,
        Override(usize),
        Tick(f32, f32),
    }

    fn req() -> impl Strategy<Value = Req> {
        prop_oneof![
            Just(Req::Up),
            Just(Req::Down),
            (0usize..12).prop_map(Req::To),
            Just(Req::Reverse),
            Just(Req::Neutral),
            (0usize..12).prop_map(Req::Override),
            (0.0f32..8000.0, -20.0f32..250.0).prop_map(|(r, s)| Req::Tick(r, s)),
        ]
    }

    proptest! {
        #[test]
        fn gear_index_stays_in_range(reqs in proptest::collection::vec(req(), 1..200)) {
            let mut g = Gearbox::new(GearboxConfig::default()).unwrap();
            for r in reqs {
                match r {
                    Req::Up => { g.shift_up(); }
                    Req::Down => { g.shift_down(); }
                    Req::To(n) => { g.shift_to_gear(n); }
                    Req::Reverse => { g.shift_reverse(); }
                    Req::Neutral => { g.shift_to_neutral(); }
                    Req::Override(n) => g.override_gear(n, GearState::ForwardDrive),
                    Req::Tick(rpm, speed) => g.step(DT, GearboxInputs {
                        engine_rpm: rpm,
                        speed_kmh: speed,
                        throttle: 0.5,
                        brake: 0.0,
                    }),
                }
                prop_assert!(g.gear() < g.gear_count());
                prop_assert!(g.shift_remaining() >= 0.0);
                prop_assert!(g.cooldown() >= 0.0);
            }
        }
    }
}

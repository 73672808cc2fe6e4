// ==============================================================================
// drivetrain — ENGINE -> CLUTCH -> GEARBOX -> DIFFERENTIAL
// ------------------------------------------------------------------------------
// Plain steppable components. Each one takes the torque handed over by the
// previous stage and returns what it passes on; no component reaches into
// another. The vehicle owns all of them and calls them in order.
// ==============================================================================

pub mod clutch;
pub mod differential;
pub mod engine;
pub mod gearbox;
pub mod torque_curve;

pub use clutch::{Clutch, ClutchConfig, ClutchInputs};
pub use differential::{Differential, DifferentialConfig, DifferentialKind};
pub use engine::{Engine, EngineConfig, EngineInputs};
pub use gearbox::{GearMode, GearState, Gearbox, GearboxConfig, GearboxInputs, Selector};
pub use torque_curve::TorqueCurve;

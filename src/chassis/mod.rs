//! Axles and wheels: everything between the differential output and the
//! contact provider.

pub mod anti_roll;
pub mod axle;
pub mod wheel;

pub use anti_roll::{anti_roll_forces, AntiRollForces};
pub use axle::{Axle, AxleConfig, AxleInputs};
pub use wheel::{TorqueGuards, WheelConfig, WheelPhysics};

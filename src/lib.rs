//! Vehicle drivetrain and stability control on top of a pluggable contact
//! provider.
//!
//! A [`Vehicle`] owns engine, clutch, gearbox, axles (with differentials and
//! wheels) and the stability controller. Each fixed step it reads wheel
//! contacts from a [`ContactProvider`], pushes torque down the chain and writes
//! one [`WheelCommand`] per wheel back. [`physics::PhysicsWorld`] is a rapier
//! provider; [`ScriptedContact`] drives the vehicle without a physics engine.

pub mod chassis;
pub mod config;
pub mod contact;
pub mod drivetrain;
pub mod error;
pub mod input;
pub mod physics;
pub mod stability;
pub mod state;
pub mod vehicle;

pub use config::{BehaviorPreset, ChassisConfig, VehicleConfig};
pub use contact::{
    ChassisMotion, ContactProvider, GroundMaterial, GroundMaterials, ScriptedContact, Side, WheelCommand,
    WheelContact, WheelSlot,
};
pub use error::{ConfigError, ConfigResult};
pub use input::ControlInput;
pub use stability::{StabilityConfig, StabilityController, StabilityFlags};
pub use state::{VehicleState, WheelSnapshot};
pub use vehicle::Vehicle;

// ==============================================================================
// config.rs — VEHICLE CONFIGURATION, PROFILES, BEHAVIOR PRESETS
// ==============================================================================
// One immutable VehicleConfig per vehicle, validated once by Vehicle::new.
// Every sub-config has serde defaults, so a JSON file only needs the fields
// it overrides:
//
//   { "engine": { "max_torque": 250 }, "gearbox": { "mode": "Manual" } }
//
// Profiles are complete vehicles (gt86, tank). Presets adjust the stability
// systems and a few grip knobs of an existing profile, applied once at load.
// ==============================================================================

use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::chassis::{AxleConfig, WheelConfig};
use crate::drivetrain::{
    ClutchConfig, DifferentialConfig, DifferentialKind, EngineConfig, GearMode, GearboxConfig, TorqueCurve,
};
use crate::error::{non_negative, ConfigError, ConfigResult};
use crate::stability::StabilityConfig;

/// Rigid body and suspension data, read by the rapier provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChassisConfig {
    pub mass: f32,                      // kg
    pub half_extents: [f32; 3],         // m, x right / y up / z forward
    pub com_offset: [f32; 3],           // m, collider offset from the body origin
    pub linear_damping: f32,
    pub angular_damping: f32,

    pub suspension_rest_length: f32,    // m
    pub suspension_max_length: f32,     // m, compression travel
    pub suspension_sag: f32,            // m, static compression used to derive k
    pub suspension_damping_ratio: f32,  // zeta
    pub wheel_mount_height: f32,        // m below the body origin
    pub wheel_inertia: f32,             // kg m^2
    pub tire_friction: f32,             // mu at stiffness 1
}

impl Default for ChassisConfig {
    fn default() -> Self {
        Self {
            mass: 1350.0,
            half_extents: [1.0, 0.35, 2.1],
            com_offset: [0.0, -0.15, 0.0],
            linear_damping: 0.08,
            angular_damping: 0.6,

            suspension_rest_length: 0.5,
            suspension_max_length: 0.9,
            suspension_sag: 0.05,
            suspension_damping_ratio: 0.9,
            wheel_mount_height: 0.3,
            wheel_inertia: 1.2,
            tire_friction: 1.0,
        }
    }
}

impl ChassisConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.mass.is_finite() && self.mass > 0.0) {
            return Err(ConfigError::NegativeValue { field: "chassis.mass", value: self.mass });
        }
        for (i, &h) in self.half_extents.iter().enumerate() {
            if !(h.is_finite() && h > 0.0) {
                let field = ["chassis.half_extents.x", "chassis.half_extents.y", "chassis.half_extents.z"][i];
                return Err(ConfigError::NegativeValue { field, value: h });
            }
        }
        non_negative("chassis.linear_damping", self.linear_damping)?;
        non_negative("chassis.angular_damping", self.angular_damping)?;
        non_negative("chassis.suspension_rest_length", self.suspension_rest_length)?;
        non_negative("chassis.suspension_max_length", self.suspension_max_length)?;
        non_negative("chassis.suspension_sag", self.suspension_sag)?;
        non_negative("chassis.suspension_damping_ratio", self.suspension_damping_ratio)?;
        non_negative("chassis.wheel_mount_height", self.wheel_mount_height)?;
        non_negative("chassis.wheel_inertia", self.wheel_inertia)?;
        non_negative("chassis.tire_friction", self.tire_friction)?;
        Ok(())
    }

    /// Spring and damper per wheel: k = m g / sag, c = 2 zeta sqrt(k m).
    pub fn suspension(&self, wheels: usize) -> (f32, f32) {
        let m = self.mass / wheels.max(1) as f32;
        let k = m * 9.81 / self.suspension_sag.max(1e-3);
        let c = 2.0 * self.suspension_damping_ratio * (k * m).sqrt();
        (k, c)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BehaviorPreset {
    Simulator,
    Racing,
    SemiArcade,
    Drift,
    Fun,
}

impl std::str::FromStr for BehaviorPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simulator" => Ok(Self::Simulator),
            "racing" => Ok(Self::Racing),
            "semiarcade" | "semi-arcade" => Ok(Self::SemiArcade),
            "drift" => Ok(Self::Drift),
            "fun" => Ok(Self::Fun),
            other => Err(format!("unknown preset '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    pub name: String,
    pub engine: EngineConfig,
    pub clutch: ClutchConfig,
    pub gearbox: GearboxConfig,
    pub axles: Vec<AxleConfig>,
    pub stability: StabilityConfig,
    pub chassis: ChassisConfig,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            engine: EngineConfig::default(),
            clutch: ClutchConfig::default(),
            gearbox: GearboxConfig::default(),
            axles: vec![AxleConfig::front(), AxleConfig::rear()],
            stability: StabilityConfig::default(),
            chassis: ChassisConfig::default(),
        }
    }
}

impl VehicleConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.engine.validate()?;
        self.clutch.validate()?;
        self.gearbox.validate()?;
        if self.axles.is_empty() {
            return Err(ConfigError::NoAxles);
        }
        for (i, axle) in self.axles.iter().enumerate() {
            axle.validate(i)?;
        }
        self.stability.validate()?;
        self.chassis.validate()?;
        Ok(())
    }

    // -------------------------
    // Profiles
    // -------------------------

    /// Rear-driven sports coupe.
    pub fn gt86() -> Self {
        let wheel = WheelConfig { radius: 0.32, max_wheel_rpm: 2200.0, ..WheelConfig::default() };
        Self {
            name: "gt86".to_string(),
            engine: EngineConfig {
                min_rpm: 800.0,
                max_rpm: 7400.0,
                max_torque: 205.0,
                torque_curve: TorqueCurve::from_peak(800.0, 6400.0, 7400.0),
                ..EngineConfig::default()
            },
            clutch: ClutchConfig::default(),
            gearbox: GearboxConfig {
                gear_ratios: vec![3.626, 2.188, 1.541, 1.213, 1.0, 0.767],
                shift_up_rpm: 6800.0,
                shift_down_rpm: 3500.0,
                max_speed_kmh: 226.0,
                ..GearboxConfig::default()
            },
            axles: vec![
                AxleConfig {
                    position_z: 1.25,
                    track_width: 1.5,
                    max_steer_angle: 34.0,
                    anti_roll_force: 9_000.0,
                    wheel: wheel.clone(),
                    ..AxleConfig::front()
                },
                AxleConfig {
                    position_z: -1.25,
                    track_width: 1.5,
                    anti_roll_force: 6_000.0,
                    wheel,
                    differential: Some(DifferentialConfig {
                        kind: DifferentialKind::Limited,
                        final_drive: 4.1,
                        limited_slip_ratio: 70.0,
                    }),
                    ..AxleConfig::rear()
                },
            ],
            stability: StabilityConfig::default(),
            chassis: ChassisConfig::default(),
        }
    }

    /// Heavy, slow, every axle driven through locked differentials.
    pub fn tank() -> Self {
        let wheel = WheelConfig { radius: 0.5, max_wheel_rpm: 600.0, ..WheelConfig::default() };
        let driven = |position_z: f32, is_steer: bool| AxleConfig {
            position_z,
            track_width: 2.6,
            is_power: true,
            is_steer,
            is_brake: true,
            is_handbrake: !is_steer,
            brake_multiplier: 1.0,
            max_steer_angle: 25.0,
            steer_speed: 60.0,
            max_brake_torque: 40_000.0,
            anti_roll_force: 60_000.0,
            wheel: wheel.clone(),
            differential: Some(DifferentialConfig {
                kind: DifferentialKind::FullLocked,
                final_drive: 6.0,
                limited_slip_ratio: 100.0,
            }),
            ..AxleConfig::front()
        };
        Self {
            name: "tank".to_string(),
            engine: EngineConfig {
                min_rpm: 600.0,
                max_rpm: 2600.0,
                max_torque: 4_000.0,
                torque_curve: TorqueCurve::from_peak(600.0, 1800.0, 2600.0),
                inertia: 0.4,
                inertia_full_throttle: 0.25,
                ..EngineConfig::default()
            },
            clutch: ClutchConfig { engage_rpm: 900.0, ..ClutchConfig::default() },
            gearbox: GearboxConfig {
                gear_ratios: vec![4.0, 2.5, 1.5, 1.0],
                shifting_time: 0.5,
                shift_up_rpm: 2300.0,
                shift_down_rpm: 1100.0,
                max_speed_kmh: 65.0,
                ..GearboxConfig::default()
            },
            axles: vec![driven(1.6, true), driven(-1.6, false)],
            stability: StabilityConfig {
                steering_helper: false,
                traction_helper: false,
                ..StabilityConfig::default()
            },
            chassis: ChassisConfig {
                mass: 32_000.0,
                half_extents: [1.6, 0.6, 3.4],
                com_offset: [0.0, -0.3, 0.0],
                linear_damping: 2.0,
                angular_damping: 4.0,
                suspension_sag: 0.08,
                wheel_mount_height: 0.5,
                wheel_inertia: 40.0,
                tire_friction: 1.2,
                ..ChassisConfig::default()
            },
        }
    }

    pub fn profile(name: &str) -> Option<Self> {
        match name {
            "gt86" => Some(Self::gt86()),
            "tank" => Some(Self::tank()),
            "default" => Some(Self::default()),
            _ => None,
        }
    }

    // -------------------------
    // Presets
    // -------------------------

    pub fn with_preset(mut self, preset: BehaviorPreset) -> Self {
        let s = &mut self.stability;
        match preset {
            BehaviorPreset::Simulator => {
                s.abs = true;
                s.tcs = true;
                s.esp = true;
                s.steering_helper = false;
                s.traction_helper = false;
                s.abs_intensity = 0.8;
                s.tcs_intensity = 0.6;
                s.esp_intensity = 0.5;
            }
            BehaviorPreset::Racing => {
                s.abs = true;
                s.tcs = true;
                s.esp = false;
                s.steering_helper = true;
                s.traction_helper = false;
                s.tcs_threshold = 0.45;
                s.tcs_intensity = 0.4;
                s.steer_helper_linear_strength = 0.05;
                s.steer_helper_angular_strength = 0.05;
            }
            BehaviorPreset::SemiArcade => {
                s.abs = true;
                s.tcs = true;
                s.esp = true;
                s.steering_helper = true;
                s.traction_helper = true;
                s.steer_helper_linear_strength = 0.15;
                s.steer_helper_angular_strength = 0.15;
                s.traction_helper_strength = 0.2;
            }
            BehaviorPreset::Drift => {
                s.abs = true;
                s.tcs = false;
                s.esp = false;
                s.steering_helper = true;
                s.traction_helper = true;
                s.steer_helper_linear_strength = 0.05;
                s.steer_helper_angular_strength = 0.2;
                s.traction_helper_strength = 0.4;
                s.traction_helper_min_grip = 0.3;
                for axle in self.axles.iter_mut().filter(|a| a.position_z <= 0.0) {
                    axle.wheel.handbrake_sideways_grip = 0.3;
                    if let Some(d) = axle.differential.as_mut() {
                        d.kind = DifferentialKind::Limited;
                        d.limited_slip_ratio = 90.0;
                    }
                }
            }
            BehaviorPreset::Fun => {
                s.abs = true;
                s.tcs = true;
                s.esp = true;
                s.steering_helper = true;
                s.traction_helper = true;
                s.steer_helper_linear_strength = 0.3;
                s.steer_helper_angular_strength = 0.3;
                s.traction_helper_strength = 0.5;
                s.traction_helper_min_grip = 0.4;
                self.engine.turbo = true;
                if self.gearbox.mode == GearMode::Manual {
                    self.gearbox.mode = GearMode::Automatic;
                }
            }
        }
        info!("applied {preset:?} preset to '{}'", self.name);
        self
    }

    // -------------------------
    // JSON
    // -------------------------

    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&text)?;
        info!("loaded vehicle '{}' from {}", config.name, path.as_ref().display());
        Ok(config)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_are_valid() {
        for name in ["default", "gt86", "tank"] {
            let cfg = VehicleConfig::profile(name).unwrap();
            cfg.validate().unwrap_or_else(|e| panic!("{name}: {e}"));
        }
        assert!(VehicleConfig::profile("bus").is_none());
    }

    #[test]
    fn every_preset_keeps_the_config_valid() {
        for preset in [
            BehaviorPreset::Simulator,
            BehaviorPreset::Racing,
            BehaviorPreset::SemiArcade,
            BehaviorPreset::Drift,
            BehaviorPreset::Fun,
        ] {
            for base in [VehicleConfig::gt86(), VehicleConfig::tank()] {
                base.with_preset(preset).validate().unwrap();
            }
        }
    }

    #[test]
    fn drift_preset_loosens_the_rear() {
        let cfg = VehicleConfig::gt86().with_preset(BehaviorPreset::Drift);
        assert!(!cfg.stability.esp);
        assert_eq!(cfg.axles[1].wheel.handbrake_sideways_grip, 0.3);
        assert_eq!(cfg.axles[0].wheel.handbrake_sideways_grip, 0.5);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = VehicleConfig::from_json_str(r#"{ "engine": { "max_torque": 250.0 } }"#).unwrap();
        assert_eq!(cfg.engine.max_torque, 250.0);
        assert_eq!(cfg.engine.min_rpm, 800.0);
        assert_eq!(cfg.axles.len(), 2);
    }

    #[test]
    fn invalid_json_config_fails_fast() {
        let err = VehicleConfig::from_json_str(r#"{ "gearbox": { "gear_ratios": [] } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyGearRatios));

        let err = VehicleConfig::from_json_str(r#"{ "axles": [] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::NoAxles));

        let err = VehicleConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));

        let err = VehicleConfig::from_json_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn json_round_trip_preserves_profile() {
        let cfg = VehicleConfig::tank();
        let back = VehicleConfig::from_json_str(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn suspension_follows_sag() {
        let c = ChassisConfig::default();
        let (k, damping) = c.suspension(4);
        assert!((k - 1350.0 / 4.0 * 9.81 / 0.05).abs() < 1.0);
        assert!(damping > 0.0);
    }

    #[test]
    fn preset_names_parse() {
        assert_eq!("semi-arcade".parse::<BehaviorPreset>().unwrap(), BehaviorPreset::SemiArcade);
        assert!("warp".parse::<BehaviorPreset>().is_err());
    }
}

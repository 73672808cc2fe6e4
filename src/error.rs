// ==============================================================================
// error.rs — CONFIGURATION ERRORS
// ------------------------------------------------------------------------------
// Everything that can be wrong with a vehicle is caught once, when the vehicle
// is built. The per-tick pipeline never returns errors: it clamps and logs.
// ==============================================================================

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("gearbox needs at least one forward gear ratio")]
    EmptyGearRatios,

    #[error("gear ratio #{index} must be finite and > 0 (got {ratio})")]
    InvalidGearRatio { index: usize, ratio: f32 },

    #[error("axle #{axle}: wheel radius must be > 0 (got {radius})")]
    InvalidWheelRadius { axle: usize, radius: f32 },

    #[error("axle #{axle}: final drive ratio must be > 0 (got {ratio})")]
    InvalidFinalDrive { axle: usize, ratio: f32 },

    #[error("axle #{axle}: limited slip ratio must be within [50, 100] (got {ratio})")]
    InvalidLimitedSlipRatio { axle: usize, ratio: f32 },

    #[error("{system} engage threshold must be within (0, 0.5] (got {value})")]
    InvalidThreshold { system: &'static str, value: f32 },

    #[error("{system} intensity must be within [0, 1] (got {value})")]
    InvalidIntensity { system: &'static str, value: f32 },

    #[error("engine rpm range is invalid: min {min} / max {max}")]
    InvalidRpmRange { min: f32, max: f32 },

    #[error("torque curve: {0}")]
    InvalidTorqueCurve(&'static str),

    #[error("{field} must be finite and >= 0 (got {value})")]
    NegativeValue { field: &'static str, value: f32 },

    #[error("{field} must be within (0, 1] (got {value})")]
    InvalidGripFactor { field: &'static str, value: f32 },

    #[error("vehicle needs at least one axle")]
    NoAxles,

    #[error("ground material table is empty")]
    NoGroundMaterials,

    #[error("ground material #{0} is out of range")]
    UnknownGroundMaterial(usize),

    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not read config: {0}")]
    Io(#[from] std::io::Error),
}

/// Rejects NaN/inf and negative values for fields that are physical magnitudes.
pub(crate) fn non_negative(field: &'static str, value: f32) -> ConfigResult<f32> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::NegativeValue { field, value })
    }
}

/// Grip scale factors: a wheel never loses all of its stiffness.
pub(crate) fn grip_factor(field: &'static str, value: f32) -> ConfigResult<f32> {
    if value > 0.0 && value <= 1.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidGripFactor { field, value })
    }
}

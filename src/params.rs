//! Scene and material parameters consumed by the raymarching shader.
//!
//! The struct is the superset of every parameter revision. Ranges mirror the
//! editor sliders the values are normally set from; they are checked once by
//! [`RaymarchParameters::validate`] at the configuration boundary and never on
//! the per-frame path.

use std::fmt;
use std::ops::RangeInclusive;

use glam::{Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::surface::EnvironmentMap;

/// Historical parameter sets, each a superset of the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ParameterRevision {
    /// Maximum distance and a single sphere.
    Initial = 1,
    /// Adds lighting, shadows, ambient occlusion and marching limits.
    Shading = 2,
    /// Adds reflections and the environment map.
    Reflections = 3,
}

impl ParameterRevision {
    pub const LATEST: ParameterRevision = ParameterRevision::Reflections;

    pub fn from_number(number: u32) -> Option<Self> {
        match number {
            1 => Some(Self::Initial),
            2 => Some(Self::Shading),
            3 => Some(Self::Reflections),
            _ => None,
        }
    }

    pub fn number(self) -> u32 {
        self as u32
    }
}

impl Default for ParameterRevision {
    fn default() -> Self {
        Self::LATEST
    }
}

impl fmt::Display for ParameterRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.number())
    }
}

/// Configuration value outside of its declared range.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{name} must be finite, got {value}")]
    NotFinite { name: &'static str, value: f32 },
    #[error("{name} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },
    #[error("shadow distance min {min} is greater than max {max}")]
    InvertedShadowDistance { min: f32, max: f32 },
    #[error("vertical field of view {value} must be inside (0, 180) degrees")]
    InvalidFieldOfView { value: f32 },
    #[error("aspect ratio {value} must be positive")]
    InvalidAspectRatio { value: f32 },
}

/// Rejects projections that would fold or collapse the frustum.
pub fn validate_projection(fov_degrees: f32, aspect_ratio: f32) -> Result<(), ConfigError> {
    finite("fov", fov_degrees)?;
    finite("aspect", aspect_ratio)?;
    if fov_degrees <= 0.0 || fov_degrees >= 180.0 {
        return Err(ConfigError::InvalidFieldOfView { value: fov_degrees });
    }
    if aspect_ratio <= 0.0 {
        return Err(ConfigError::InvalidAspectRatio {
            value: aspect_ratio,
        });
    }
    Ok(())
}

pub const MAX_DISTANCE_RANGE: RangeInclusive<f32> = 0.1..=10_000.0;
pub const COLOR_CHANNEL_RANGE: RangeInclusive<f32> = 0.0..=1.0;
pub const LIGHT_INTENSITY_RANGE: RangeInclusive<f32> = 0.0..=10.0;
pub const SPHERE_SMOOTH_RANGE: RangeInclusive<f32> = 0.0..=5.0;
pub const DEGREE_ROTATE_RANGE: RangeInclusive<f32> = -360.0..=360.0;
pub const SHADOW_INTENSITY_RANGE: RangeInclusive<f32> = 0.0..=4.0;
pub const SHADOW_DISTANCE_RANGE: RangeInclusive<f32> = 0.0..=10_000.0;
pub const SHADOW_PENUMBRA_RANGE: RangeInclusive<f32> = 1.0..=128.0;
pub const MAX_ITERATIONS_RANGE: RangeInclusive<i32> = 0..=500;
pub const ACCURACY_RANGE: RangeInclusive<f32> = 0.001..=0.1;
pub const AO_STEP_SIZE_RANGE: RangeInclusive<f32> = 0.01..=0.1;
pub const AO_INTENSITY_RANGE: RangeInclusive<f32> = 0.0..=1.0;
pub const AO_ITERATIONS_RANGE: RangeInclusive<i32> = 1..=5;
pub const REFLECTION_COUNT_RANGE: RangeInclusive<i32> = 0..=2;
pub const REFLECTION_INTENSITY_RANGE: RangeInclusive<f32> = 0.0..=1.0;
pub const ENV_REFLECTION_INTENSITY_RANGE: RangeInclusive<f32> = 0.0..=1.0;

/// Every value the shader reads besides the camera transport matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaymarchParameters {
    /// Distance after which a ray is considered a miss. `_maxDistance`
    pub max_distance: f32,
    /// Sphere center in `xyz`, radius in `w` (radius ≥ 0). `_sphere1`
    pub sphere1: Vec4,

    /// Light color, channels in [0, 1]. `_LightCol`
    pub light_color: Vec3,
    /// [0, 10]. `_LightIntensity`
    pub light_intensity: f32,
    /// Smooth-union blend radius between the primitives, [0, 5]. `_sphereSmooth`
    pub sphere_smooth: f32,
    /// Rotation of the box primitive around Y in degrees, [-360, 360]. `_degreeRotate`
    pub degree_rotate: f32,

    /// Exponent applied to the shadow term, [0, 4]. `_ShadowIntensity`
    pub shadow_intensity: f32,
    /// Shadow ray start and end distance, `0 ≤ x ≤ y`. `_ShadowDistance`
    pub shadow_distance: Vec2,
    /// Soft shadow sharpness, [1, 128]. `_ShadowPenumbra`
    pub shadow_penumbra: f32,

    /// Marching step budget, [0, 500]. `_MaxIterations`
    pub max_iterations: i32,
    /// Surface hit threshold, [0.001, 0.1]. `_Accuracy`
    pub accuracy: f32,

    /// [0.01, 0.1]. `_AoStepsize`
    pub ao_step_size: f32,
    /// [0, 1]. `_AoIntensity`
    pub ao_intensity: f32,
    /// [1, 5]. `_AoIterations`
    pub ao_iterations: i32,

    /// Number of reflection bounces, [0, 2]. `_ReflectionCount`
    pub reflection_count: i32,
    /// [0, 1]. `_ReflectionIntensity`
    pub reflection_intensity: f32,
    /// Equirectangular environment sampled by escaping reflection rays. `_ReflectionCube`
    #[serde(skip)]
    pub environment_map: Option<EnvironmentMap>,
    /// [0, 1]. `_EnvReflIntensity`
    pub env_reflection_intensity: f32,
}

impl Default for RaymarchParameters {
    fn default() -> Self {
        Self {
            max_distance: 100.0,
            sphere1: Vec4::new(0.0, 1.0, 0.0, 1.0),
            light_color: Vec3::ONE,
            light_intensity: 1.0,
            sphere_smooth: 0.5,
            degree_rotate: 0.0,
            shadow_intensity: 1.0,
            shadow_distance: Vec2::new(0.1, 20.0),
            shadow_penumbra: 16.0,
            max_iterations: 164,
            accuracy: 0.01,
            ao_step_size: 0.1,
            ao_intensity: 0.25,
            ao_iterations: 3,
            reflection_count: 1,
            reflection_intensity: 0.5,
            environment_map: None,
            env_reflection_intensity: 0.5,
        }
    }
}

impl RaymarchParameters {
    /// Checks every field against its declared range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check("max_distance", self.max_distance, MAX_DISTANCE_RANGE)?;
        for value in self.sphere1.to_array() {
            finite("sphere1", value)?;
        }
        check("sphere1.w", self.sphere1.w, 0.0..=f32::MAX)?;
        for value in self.light_color.to_array() {
            check("light_color", value, COLOR_CHANNEL_RANGE)?;
        }
        check("light_intensity", self.light_intensity, LIGHT_INTENSITY_RANGE)?;
        check("sphere_smooth", self.sphere_smooth, SPHERE_SMOOTH_RANGE)?;
        check("degree_rotate", self.degree_rotate, DEGREE_ROTATE_RANGE)?;
        check("shadow_intensity", self.shadow_intensity, SHADOW_INTENSITY_RANGE)?;
        check("shadow_distance.x", self.shadow_distance.x, SHADOW_DISTANCE_RANGE)?;
        check("shadow_distance.y", self.shadow_distance.y, SHADOW_DISTANCE_RANGE)?;
        if self.shadow_distance.x > self.shadow_distance.y {
            return Err(ConfigError::InvertedShadowDistance {
                min: self.shadow_distance.x,
                max: self.shadow_distance.y,
            });
        }
        check("shadow_penumbra", self.shadow_penumbra, SHADOW_PENUMBRA_RANGE)?;
        check_int("max_iterations", self.max_iterations, MAX_ITERATIONS_RANGE)?;
        check("accuracy", self.accuracy, ACCURACY_RANGE)?;
        check("ao_step_size", self.ao_step_size, AO_STEP_SIZE_RANGE)?;
        check("ao_intensity", self.ao_intensity, AO_INTENSITY_RANGE)?;
        check_int("ao_iterations", self.ao_iterations, AO_ITERATIONS_RANGE)?;
        check_int("reflection_count", self.reflection_count, REFLECTION_COUNT_RANGE)?;
        check(
            "reflection_intensity",
            self.reflection_intensity,
            REFLECTION_INTENSITY_RANGE,
        )?;
        check(
            "env_reflection_intensity",
            self.env_reflection_intensity,
            ENV_REFLECTION_INTENSITY_RANGE,
        )?;
        Ok(())
    }

    /// Returns a copy with every ranged field clamped the way a slider would.
    ///
    /// Non-finite values are not repaired.
    pub fn clamped(&self) -> Self {
        let mut out = self.clone();
        out.max_distance = clamp(out.max_distance, MAX_DISTANCE_RANGE);
        out.sphere1.w = out.sphere1.w.max(0.0);
        out.light_color = out.light_color.clamp(Vec3::ZERO, Vec3::ONE);
        out.light_intensity = clamp(out.light_intensity, LIGHT_INTENSITY_RANGE);
        out.sphere_smooth = clamp(out.sphere_smooth, SPHERE_SMOOTH_RANGE);
        out.degree_rotate = clamp(out.degree_rotate, DEGREE_ROTATE_RANGE);
        out.shadow_intensity = clamp(out.shadow_intensity, SHADOW_INTENSITY_RANGE);
        out.shadow_distance.x = clamp(out.shadow_distance.x, SHADOW_DISTANCE_RANGE);
        out.shadow_distance.y = clamp(out.shadow_distance.y, SHADOW_DISTANCE_RANGE)
            .max(out.shadow_distance.x);
        out.shadow_penumbra = clamp(out.shadow_penumbra, SHADOW_PENUMBRA_RANGE);
        out.max_iterations = clamp_int(out.max_iterations, MAX_ITERATIONS_RANGE);
        out.accuracy = clamp(out.accuracy, ACCURACY_RANGE);
        out.ao_step_size = clamp(out.ao_step_size, AO_STEP_SIZE_RANGE);
        out.ao_intensity = clamp(out.ao_intensity, AO_INTENSITY_RANGE);
        out.ao_iterations = clamp_int(out.ao_iterations, AO_ITERATIONS_RANGE);
        out.reflection_count = clamp_int(out.reflection_count, REFLECTION_COUNT_RANGE);
        out.reflection_intensity = clamp(out.reflection_intensity, REFLECTION_INTENSITY_RANGE);
        out.env_reflection_intensity =
            clamp(out.env_reflection_intensity, ENV_REFLECTION_INTENSITY_RANGE);
        out
    }
}

fn finite(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotFinite { name, value })
    }
}

fn check(name: &'static str, value: f32, range: RangeInclusive<f32>) -> Result<(), ConfigError> {
    finite(name, value)?;
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

fn check_int(name: &'static str, value: i32, range: RangeInclusive<i32>) -> Result<(), ConfigError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value: value as f32,
            min: *range.start() as f32,
            max: *range.end() as f32,
        })
    }
}

fn clamp(value: f32, range: RangeInclusive<f32>) -> f32 {
    value.clamp(*range.start(), *range.end())
}

fn clamp_int(value: i32, range: RangeInclusive<i32>) -> i32 {
    value.clamp(*range.start(), *range.end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        RaymarchParameters::default().validate().unwrap();
    }

    #[test]
    fn iteration_count_above_limit_is_rejected() {
        let params = RaymarchParameters {
            max_iterations: 501,
            ..RaymarchParameters::default()
        };
        let err = params.validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::OutOfRange {
                name: "max_iterations",
                value: 501.0,
                min: 0.0,
                max: 500.0,
            }
        );
        assert!(err.to_string().contains("max_iterations"));
    }

    #[test]
    fn accuracy_and_penumbra_bounds_are_enforced() {
        let too_fine = RaymarchParameters {
            accuracy: 0.0005,
            ..RaymarchParameters::default()
        };
        assert!(too_fine.validate().is_err());

        let too_soft = RaymarchParameters {
            shadow_penumbra: 0.5,
            ..RaymarchParameters::default()
        };
        assert!(too_soft.validate().is_err());
    }

    #[test]
    fn nan_is_rejected() {
        let params = RaymarchParameters {
            light_intensity: f32::NAN,
            ..RaymarchParameters::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ConfigError::NotFinite { name: "light_intensity", .. })
        ));
    }

    #[test]
    fn inverted_shadow_distance_is_rejected() {
        let params = RaymarchParameters {
            shadow_distance: Vec2::new(5.0, 1.0),
            ..RaymarchParameters::default()
        };
        assert_eq!(
            params.validate(),
            Err(ConfigError::InvertedShadowDistance { min: 5.0, max: 1.0 })
        );
    }

    #[test]
    fn clamping_produces_valid_parameters() {
        let params = RaymarchParameters {
            max_iterations: 9000,
            accuracy: 1.0,
            shadow_penumbra: 0.0,
            ao_iterations: 0,
            reflection_count: -3,
            light_color: Vec3::new(2.0, -1.0, 0.5),
            shadow_distance: Vec2::new(4.0, 2.0),
            ..RaymarchParameters::default()
        };
        let clamped = params.clamped();
        clamped.validate().unwrap();
        assert_eq!(clamped.max_iterations, 500);
        assert_eq!(clamped.accuracy, 0.1);
        assert_eq!(clamped.shadow_penumbra, 1.0);
        assert_eq!(clamped.reflection_count, 0);
        assert_eq!(clamped.light_color, Vec3::new(1.0, 0.0, 0.5));
    }

    #[test]
    fn degenerate_projections_are_rejected() {
        validate_projection(60.0, 16.0 / 9.0).unwrap();
        validate_projection(179.0, 0.01).unwrap();
        assert_eq!(
            validate_projection(180.0, 1.0),
            Err(ConfigError::InvalidFieldOfView { value: 180.0 })
        );
        assert_eq!(
            validate_projection(0.0, 1.0),
            Err(ConfigError::InvalidFieldOfView { value: 0.0 })
        );
        assert_eq!(
            validate_projection(60.0, -1.0),
            Err(ConfigError::InvalidAspectRatio { value: -1.0 })
        );
        assert!(matches!(
            validate_projection(f32::INFINITY, 1.0),
            Err(ConfigError::NotFinite { name: "fov", .. })
        ));
        assert!(matches!(
            validate_projection(60.0, f32::NAN),
            Err(ConfigError::NotFinite { name: "aspect", .. })
        ));
    }

    #[test]
    fn revisions_are_ordered() {
        assert!(ParameterRevision::Initial < ParameterRevision::Shading);
        assert!(ParameterRevision::Shading < ParameterRevision::Reflections);
        assert_eq!(ParameterRevision::from_number(2), Some(ParameterRevision::Shading));
        assert_eq!(ParameterRevision::from_number(7), None);
        assert_eq!(ParameterRevision::default().to_string(), "r3");
    }
}

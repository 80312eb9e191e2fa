use glam::{EulerRot, Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::frustum::{compute_frustum, Frustum};

/// Light direction used when no directional light is attached.
pub const DEFAULT_LIGHT_DIRECTION: Vec3 = Vec3::NEG_Y;

/// Per-frame snapshot of the camera driving the effect.
///
/// Camera space is right-handed: the camera looks down `-Z` with `+Y` up, so
/// `camera_to_world` maps the frustum rays straight into world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraView {
    pub vertical_fov_degrees: f32,
    pub aspect_ratio: f32,
    pub camera_to_world: Mat4,
    pub position: Vec3,
}

impl CameraView {
    /// Creates a view from a camera-to-world transform; the position is its translation.
    pub fn new(vertical_fov_degrees: f32, aspect_ratio: f32, camera_to_world: Mat4) -> Self {
        Self {
            vertical_fov_degrees,
            aspect_ratio,
            camera_to_world,
            position: camera_to_world.w_axis.truncate(),
        }
    }

    /// Creates a view from a position and Euler rotation in degrees (applied Z, Y, X).
    pub fn from_euler(
        position: Vec3,
        rotation_degrees: Vec3,
        vertical_fov_degrees: f32,
        aspect_ratio: f32,
    ) -> Self {
        let rotation = euler_to_quat(rotation_degrees);
        let camera_to_world = Mat4::from_rotation_translation(rotation, position);
        Self::new(vertical_fov_degrees, aspect_ratio, camera_to_world)
    }

    /// World-space direction the camera looks at.
    pub fn forward(&self) -> Vec3 {
        self.camera_to_world.transform_vector3(Vec3::NEG_Z)
    }

    /// Frustum corner rays for the current field of view and aspect ratio.
    pub fn frustum(&self) -> Frustum {
        compute_frustum(self.vertical_fov_degrees, self.aspect_ratio)
    }
}

/// Orientation of the directional light feeding the shader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightTransform {
    pub rotation: Quat,
}

impl LightTransform {
    pub fn new(rotation: Quat) -> Self {
        Self { rotation }
    }

    /// Builds the transform from an Euler rotation in degrees (applied Z, Y, X).
    pub fn from_euler_degrees(rotation_degrees: Vec3) -> Self {
        Self::new(euler_to_quat(rotation_degrees))
    }

    /// Direction the light travels in, world space.
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }
}

/// Uses the light's forward axis when one is attached, otherwise straight down.
pub fn resolve_light_direction(light: Option<&LightTransform>) -> Vec3 {
    light
        .map(LightTransform::forward)
        .unwrap_or(DEFAULT_LIGHT_DIRECTION)
}

fn euler_to_quat(rotation_degrees: Vec3) -> Quat {
    Quat::from_euler(
        EulerRot::ZYX,
        rotation_degrees.z.to_radians(),
        rotation_degrees.y.to_radians(),
        rotation_degrees.x.to_radians(),
    )
}

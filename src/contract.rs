//! Named parameter contract between the driver and the raymarching shader.
//!
//! Names and kinds must match what the shader program declares. A material
//! silently ignores names it does not know, so a typo here shows up as a
//! parameter stuck at its default rather than as an error.

use glam::{Mat4, Vec3, Vec4};

use crate::camera::CameraView;
use crate::frustum::Frustum;
use crate::params::{ParameterRevision, RaymarchParameters};
use crate::surface::EnvironmentMap;

pub const LIGHT_DIRECTION: &str = "_lightDirection";
pub const CAM_FRUSTUM: &str = "_CamFrustum";
pub const CAM_TO_WORLD: &str = "_CamToWorld";
pub const CAM_WORLD_SPACE: &str = "_CamWorldSpace";
/// Source surface bound by the backend at draw time.
pub const MAIN_TEX: &str = "_MainTex";

pub const MAX_DISTANCE: &str = "_maxDistance";
pub const SPHERE1: &str = "_sphere1";

pub const LIGHT_COL: &str = "_LightCol";
pub const LIGHT_INTENSITY: &str = "_LightIntensity";
pub const SPHERE_SMOOTH: &str = "_sphereSmooth";
pub const DEGREE_ROTATE: &str = "_degreeRotate";
pub const SHADOW_INTENSITY: &str = "_ShadowIntensity";
pub const SHADOW_DISTANCE: &str = "_ShadowDistance";
pub const SHADOW_PENUMBRA: &str = "_ShadowPenumbra";
pub const MAX_ITERATIONS: &str = "_MaxIterations";
pub const ACCURACY: &str = "_Accuracy";
pub const AO_STEPSIZE: &str = "_AoStepsize";
pub const AO_INTENSITY: &str = "_AoIntensity";
pub const AO_ITERATIONS: &str = "_AoIterations";

pub const REFLECTION_COUNT: &str = "_ReflectionCount";
pub const REFLECTION_INTENSITY: &str = "_ReflectionIntensity";
pub const REFLECTION_CUBE: &str = "_ReflectionCube";
pub const ENV_REFL_INTENSITY: &str = "_EnvReflIntensity";

/// Shader-side type of a named parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    Float,
    Int,
    Vector,
    Color,
    Matrix,
    Texture,
}

/// Declared entry of the parameter contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterDecl {
    pub name: &'static str,
    pub kind: ParameterKind,
    /// `None` for transport values uploaded by every revision.
    pub since: Option<ParameterRevision>,
}

const fn decl(
    name: &'static str,
    kind: ParameterKind,
    since: Option<ParameterRevision>,
) -> ParameterDecl {
    ParameterDecl { name, kind, since }
}

/// Every parameter the driver can upload, in upload order.
pub const PARAMETER_TABLE: &[ParameterDecl] = &[
    decl(LIGHT_DIRECTION, ParameterKind::Vector, None),
    decl(CAM_FRUSTUM, ParameterKind::Matrix, None),
    decl(CAM_TO_WORLD, ParameterKind::Matrix, None),
    decl(CAM_WORLD_SPACE, ParameterKind::Vector, None),
    decl(MAX_DISTANCE, ParameterKind::Float, Some(ParameterRevision::Initial)),
    decl(SPHERE1, ParameterKind::Vector, Some(ParameterRevision::Initial)),
    decl(LIGHT_COL, ParameterKind::Color, Some(ParameterRevision::Shading)),
    decl(LIGHT_INTENSITY, ParameterKind::Float, Some(ParameterRevision::Shading)),
    decl(SPHERE_SMOOTH, ParameterKind::Float, Some(ParameterRevision::Shading)),
    decl(DEGREE_ROTATE, ParameterKind::Float, Some(ParameterRevision::Shading)),
    decl(SHADOW_INTENSITY, ParameterKind::Float, Some(ParameterRevision::Shading)),
    decl(SHADOW_DISTANCE, ParameterKind::Vector, Some(ParameterRevision::Shading)),
    decl(SHADOW_PENUMBRA, ParameterKind::Float, Some(ParameterRevision::Shading)),
    decl(MAX_ITERATIONS, ParameterKind::Int, Some(ParameterRevision::Shading)),
    decl(ACCURACY, ParameterKind::Float, Some(ParameterRevision::Shading)),
    decl(AO_STEPSIZE, ParameterKind::Float, Some(ParameterRevision::Shading)),
    decl(AO_INTENSITY, ParameterKind::Float, Some(ParameterRevision::Shading)),
    decl(AO_ITERATIONS, ParameterKind::Int, Some(ParameterRevision::Shading)),
    decl(REFLECTION_COUNT, ParameterKind::Int, Some(ParameterRevision::Reflections)),
    decl(REFLECTION_INTENSITY, ParameterKind::Float, Some(ParameterRevision::Reflections)),
    decl(REFLECTION_CUBE, ParameterKind::Texture, Some(ParameterRevision::Reflections)),
    decl(ENV_REFL_INTENSITY, ParameterKind::Float, Some(ParameterRevision::Reflections)),
];

/// Looks up the declaration for a shader parameter name.
pub fn declaration(name: &str) -> Option<&'static ParameterDecl> {
    PARAMETER_TABLE.iter().find(|decl| decl.name == name)
}

/// Names uploaded every frame by the given revision, in upload order.
pub fn active_names(revision: ParameterRevision) -> impl Iterator<Item = &'static str> {
    PARAMETER_TABLE
        .iter()
        .filter(move |decl| decl.since.map_or(true, |since| since <= revision))
        .map(|decl| decl.name)
}

/// Typed value handed to a material.
#[derive(Debug, Clone, PartialEq)]
pub enum ShaderValue {
    Float(f32),
    Int(i32),
    Vector(Vec4),
    Color(Vec4),
    Matrix(Mat4),
    Texture(Option<EnvironmentMap>),
}

impl ShaderValue {
    pub fn kind(&self) -> ParameterKind {
        match self {
            ShaderValue::Float(_) => ParameterKind::Float,
            ShaderValue::Int(_) => ParameterKind::Int,
            ShaderValue::Vector(_) => ParameterKind::Vector,
            ShaderValue::Color(_) => ParameterKind::Color,
            ShaderValue::Matrix(_) => ParameterKind::Matrix,
            ShaderValue::Texture(_) => ParameterKind::Texture,
        }
    }
}

/// Shader instance that receives named parameters.
///
/// Implementations ignore names the underlying program does not declare.
pub trait Material {
    fn set_float(&mut self, name: &str, value: f32);
    fn set_int(&mut self, name: &str, value: i32);
    fn set_vector(&mut self, name: &str, value: Vec4);
    fn set_color(&mut self, name: &str, value: Vec4);
    fn set_matrix(&mut self, name: &str, value: Mat4);
    fn set_texture(&mut self, name: &str, value: Option<&EnvironmentMap>);

    /// Forgets every value set so far; the program reads its defaults again.
    fn reset(&mut self);
}

/// Complete set of values for one frame.
///
/// The set is assembled in full before anything reaches the material, so a
/// draw never observes a mix of two frames.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    revision: ParameterRevision,
    values: Vec<(&'static str, ShaderValue)>,
}

impl ParameterSet {
    /// Collects the transport values and every parameter active in `revision`.
    pub fn for_frame(
        camera: &CameraView,
        frustum: &Frustum,
        light_direction: Vec3,
        params: &RaymarchParameters,
        revision: ParameterRevision,
    ) -> Self {
        let values = active_names(revision)
            .map(|name| (name, value_of(name, camera, frustum, light_direction, params)))
            .collect();
        Self { revision, values }
    }

    pub fn revision(&self) -> ParameterRevision {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ShaderValue> {
        self.values
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ShaderValue)> {
        self.values.iter().map(|(name, value)| (*name, value))
    }

    /// Sends every value to the material once. Returns the number of uploads.
    pub fn upload<M: Material + ?Sized>(&self, material: &mut M) -> usize {
        for (name, value) in &self.values {
            match value {
                ShaderValue::Float(v) => material.set_float(name, *v),
                ShaderValue::Int(v) => material.set_int(name, *v),
                ShaderValue::Vector(v) => material.set_vector(name, *v),
                ShaderValue::Color(v) => material.set_color(name, *v),
                ShaderValue::Matrix(v) => material.set_matrix(name, *v),
                ShaderValue::Texture(v) => material.set_texture(name, v.as_ref()),
            }
        }
        self.values.len()
    }
}

fn value_of(
    name: &'static str,
    camera: &CameraView,
    frustum: &Frustum,
    light_direction: Vec3,
    params: &RaymarchParameters,
) -> ShaderValue {
    match name {
        LIGHT_DIRECTION => ShaderValue::Vector(light_direction.extend(0.0)),
        CAM_FRUSTUM => ShaderValue::Matrix(frustum.to_mat4()),
        CAM_TO_WORLD => ShaderValue::Matrix(camera.camera_to_world),
        CAM_WORLD_SPACE => ShaderValue::Vector(camera.position.extend(1.0)),
        MAX_DISTANCE => ShaderValue::Float(params.max_distance),
        SPHERE1 => ShaderValue::Vector(params.sphere1),
        LIGHT_COL => ShaderValue::Color(params.light_color.extend(1.0)),
        LIGHT_INTENSITY => ShaderValue::Float(params.light_intensity),
        SPHERE_SMOOTH => ShaderValue::Float(params.sphere_smooth),
        DEGREE_ROTATE => ShaderValue::Float(params.degree_rotate),
        SHADOW_INTENSITY => ShaderValue::Float(params.shadow_intensity),
        SHADOW_DISTANCE => ShaderValue::Vector(params.shadow_distance.extend(0.0).extend(0.0)),
        SHADOW_PENUMBRA => ShaderValue::Float(params.shadow_penumbra),
        MAX_ITERATIONS => ShaderValue::Int(params.max_iterations),
        ACCURACY => ShaderValue::Float(params.accuracy),
        AO_STEPSIZE => ShaderValue::Float(params.ao_step_size),
        AO_INTENSITY => ShaderValue::Float(params.ao_intensity),
        AO_ITERATIONS => ShaderValue::Int(params.ao_iterations),
        REFLECTION_COUNT => ShaderValue::Int(params.reflection_count),
        REFLECTION_INTENSITY => ShaderValue::Float(params.reflection_intensity),
        REFLECTION_CUBE => ShaderValue::Texture(params.environment_map.clone()),
        ENV_REFL_INTENSITY => ShaderValue::Float(params.env_reflection_intensity),
        other => unreachable!("parameter {other} is declared without a value source"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::frustum::compute_frustum;

    fn frame_set(revision: ParameterRevision) -> ParameterSet {
        let camera = CameraView::new(60.0, 1.5, Mat4::from_translation(Vec3::new(0.0, 1.0, 5.0)));
        let frustum = compute_frustum(60.0, 1.5);
        ParameterSet::for_frame(
            &camera,
            &frustum,
            Vec3::NEG_Y,
            &RaymarchParameters::default(),
            revision,
        )
    }

    #[test]
    fn table_names_are_unique() {
        let names: HashSet<_> = PARAMETER_TABLE.iter().map(|decl| decl.name).collect();
        assert_eq!(names.len(), PARAMETER_TABLE.len());
        assert!(declaration(MAIN_TEX).is_none());
    }

    #[test]
    fn every_declared_name_has_a_value_of_the_declared_kind() {
        let set = frame_set(ParameterRevision::LATEST);
        assert_eq!(set.len(), PARAMETER_TABLE.len());
        for decl in PARAMETER_TABLE {
            let value = set.get(decl.name).unwrap();
            assert_eq!(value.kind(), decl.kind, "{}", decl.name);
        }
    }

    #[test]
    fn revisions_grow_monotonically() {
        let initial: HashSet<_> = active_names(ParameterRevision::Initial).collect();
        let shading: HashSet<_> = active_names(ParameterRevision::Shading).collect();
        let reflections: HashSet<_> = active_names(ParameterRevision::Reflections).collect();
        assert!(initial.is_subset(&shading));
        assert!(shading.is_subset(&reflections));
        assert!(initial.len() < shading.len());
        assert!(shading.len() < reflections.len());
        assert_eq!(
            initial,
            HashSet::from([LIGHT_DIRECTION, CAM_FRUSTUM, CAM_TO_WORLD, CAM_WORLD_SPACE, MAX_DISTANCE, SPHERE1])
        );
    }

    #[test]
    fn initial_revision_omits_later_parameters() {
        let set = frame_set(ParameterRevision::Initial);
        assert!(set.get(MAX_ITERATIONS).is_none());
        assert!(set.get(REFLECTION_CUBE).is_none());
        assert_eq!(set.revision(), ParameterRevision::Initial);
    }

    #[test]
    fn transport_values_reflect_camera() {
        let set = frame_set(ParameterRevision::Initial);
        assert_eq!(
            set.get(CAM_WORLD_SPACE),
            Some(&ShaderValue::Vector(Vec4::new(0.0, 1.0, 5.0, 1.0)))
        );
        assert_eq!(
            set.get(LIGHT_DIRECTION),
            Some(&ShaderValue::Vector(Vec4::new(0.0, -1.0, 0.0, 0.0)))
        );
        assert_eq!(
            set.get(CAM_FRUSTUM),
            Some(&ShaderValue::Matrix(compute_frustum(60.0, 1.5).to_mat4()))
        );
    }
}

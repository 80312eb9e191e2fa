//! CPU backend: rasterizes the full-screen quad and runs a Rust fragment
//! program once per output pixel.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4};
use log::trace;

use super::RenderBackend;
use crate::contract::{self, Material, ShaderValue};
use crate::quad::{vertex_weights, QuadVertex};
use crate::surface::{to_rgba8, EnvironmentMap, Surface};

/// Inputs interpolated for a single pixel.
pub struct Fragment<'a> {
    /// Texture coordinate, origin bottom-left.
    pub uv: Vec2,
    /// Camera-space ray interpolated from the frustum corners.
    pub ray: Vec3,
    /// Source surface, bound as `_MainTex`.
    pub source: &'a Surface,
}

impl Fragment<'_> {
    pub fn source_color(&self) -> Vec4 {
        self.source.sample_bilinear(self.uv)
    }
}

/// Per-pixel program run by the software backend.
pub trait FragmentProgram: Send + Sync {
    fn name(&self) -> &str;

    /// Returns a linear RGBA color in [0, 1].
    fn shade(&self, uniforms: &Uniforms, fragment: &Fragment<'_>) -> Vec4;
}

/// Values uploaded to a software material, by shader name.
#[derive(Debug, Clone, Default)]
pub struct Uniforms {
    values: HashMap<String, ShaderValue>,
}

impl Uniforms {
    pub fn get(&self, name: &str) -> Option<&ShaderValue> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: &str, value: ShaderValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn float(&self, name: &str, default: f32) -> f32 {
        match self.values.get(name) {
            Some(ShaderValue::Float(value)) => *value,
            _ => default,
        }
    }

    pub fn int(&self, name: &str, default: i32) -> i32 {
        match self.values.get(name) {
            Some(ShaderValue::Int(value)) => *value,
            _ => default,
        }
    }

    pub fn vector(&self, name: &str, default: Vec4) -> Vec4 {
        match self.values.get(name) {
            Some(ShaderValue::Vector(value) | ShaderValue::Color(value)) => *value,
            _ => default,
        }
    }

    pub fn matrix(&self, name: &str, default: Mat4) -> Mat4 {
        match self.values.get(name) {
            Some(ShaderValue::Matrix(value)) => *value,
            _ => default,
        }
    }

    pub fn texture(&self, name: &str) -> Option<&EnvironmentMap> {
        match self.values.get(name) {
            Some(ShaderValue::Texture(value)) => value.as_ref(),
            _ => None,
        }
    }
}

/// Material bound to a fragment program.
pub struct SoftwareMaterial {
    program: Arc<dyn FragmentProgram>,
    uniforms: Uniforms,
}

impl SoftwareMaterial {
    pub fn uniforms(&self) -> &Uniforms {
        &self.uniforms
    }

    pub fn program_name(&self) -> &str {
        self.program.name()
    }
}

impl fmt::Debug for SoftwareMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareMaterial")
            .field("program", &self.program.name())
            .field("uniforms", &self.uniforms)
            .finish()
    }
}

impl Material for SoftwareMaterial {
    fn set_float(&mut self, name: &str, value: f32) {
        self.uniforms.set(name, ShaderValue::Float(value));
    }

    fn set_int(&mut self, name: &str, value: i32) {
        self.uniforms.set(name, ShaderValue::Int(value));
    }

    fn set_vector(&mut self, name: &str, value: Vec4) {
        self.uniforms.set(name, ShaderValue::Vector(value));
    }

    fn set_color(&mut self, name: &str, value: Vec4) {
        self.uniforms.set(name, ShaderValue::Color(value));
    }

    fn set_matrix(&mut self, name: &str, value: Mat4) {
        self.uniforms.set(name, ShaderValue::Matrix(value));
    }

    fn set_texture(&mut self, name: &str, value: Option<&EnvironmentMap>) {
        self.uniforms.set(name, ShaderValue::Texture(value.cloned()));
    }

    fn reset(&mut self) {
        self.uniforms = Uniforms::default();
    }
}

#[derive(Debug, Default)]
pub struct SoftwareBackend {
    frames: u64,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of quads drawn so far.
    pub fn frames_drawn(&self) -> u64 {
        self.frames
    }
}

impl RenderBackend for SoftwareBackend {
    type Surface = Surface;
    type Shader = Arc<dyn FragmentProgram>;
    type Material = SoftwareMaterial;

    fn create_material(&mut self, shader: &Arc<dyn FragmentProgram>) -> Option<SoftwareMaterial> {
        Some(SoftwareMaterial {
            program: Arc::clone(shader),
            uniforms: Uniforms::default(),
        })
    }

    fn blit(&mut self, source: &Surface, target: &mut Surface) {
        target.copy_from(source);
    }

    fn draw_fullscreen(
        &mut self,
        source: &Surface,
        target: &mut Surface,
        material: &mut SoftwareMaterial,
        quad: &[QuadVertex; 4],
    ) {
        let (width, height) = target.size();
        let frustum = material.uniforms.matrix(contract::CAM_FRUSTUM, Mat4::ZERO);
        let corner_rays = quad.map(|vertex| frustum.row(vertex.position[2] as usize).truncate());

        *target = Surface::from_fn(width, height, |x, y| {
            let uv = Vec2::new(
                (x as f32 + 0.5) / width as f32,
                1.0 - (y as f32 + 0.5) / height as f32,
            );
            let weights = vertex_weights(quad, uv);
            let ray = corner_rays
                .iter()
                .zip(weights)
                .map(|(ray, weight)| *ray * weight)
                .sum::<Vec3>();
            let fragment = Fragment { uv, ray, source };
            to_rgba8(material.program.shade(&material.uniforms, &fragment))
        });

        self.frames += 1;
        trace!(
            "software pass {} drew {width}x{height} with {}",
            self.frames,
            material.program.name()
        );
    }
}

/// Debug program that paints the normalized world-space ray direction.
#[derive(Debug, Default, Clone, Copy)]
pub struct RayDirectionProgram;

impl FragmentProgram for RayDirectionProgram {
    fn name(&self) -> &str {
        "ray-direction"
    }

    fn shade(&self, uniforms: &Uniforms, fragment: &Fragment<'_>) -> Vec4 {
        let cam_to_world = uniforms.matrix(contract::CAM_TO_WORLD, Mat4::IDENTITY);
        let direction = cam_to_world.transform_vector3(fragment.ray).normalize_or_zero();
        (direction * 0.5 + Vec3::splat(0.5)).extend(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraView;
    use crate::driver::{FrameOutcome, RaymarchDriver};
    use crate::params::{ParameterRevision, RaymarchParameters};

    fn driver(backend: &mut SoftwareBackend) -> RaymarchDriver<SoftwareBackend> {
        let program: Arc<dyn FragmentProgram> = Arc::new(RayDirectionProgram);
        RaymarchDriver::new(backend, Some(&program), ParameterRevision::LATEST)
    }

    #[test]
    fn center_pixel_looks_along_camera_forward() {
        let mut backend = SoftwareBackend::new();
        let mut driver = driver(&mut backend);
        let camera = CameraView::new(60.0, 1.0, Mat4::IDENTITY);
        let source = Surface::new(3, 3);
        let mut target = Surface::new(3, 3);

        let outcome = driver.render_frame(
            &mut backend,
            &camera,
            None,
            &RaymarchParameters::default(),
            &source,
            &mut target,
        );
        assert!(matches!(outcome, FrameOutcome::Raymarched { .. }));
        assert_eq!(backend.frames_drawn(), 1);

        // forward (0, 0, -1) maps to (0.5, 0.5, 0.0)
        assert_eq!(target.pixel(1, 1), Some([128, 128, 0, 255]));
    }

    #[test]
    fn top_right_pixel_points_up_and_right() {
        let mut backend = SoftwareBackend::new();
        let mut driver = driver(&mut backend);
        let camera = CameraView::new(90.0, 2.0, Mat4::IDENTITY);
        let source = Surface::new(4, 2);
        let mut target = Surface::new(4, 2);
        driver.render_frame(
            &mut backend,
            &camera,
            None,
            &RaymarchParameters::default(),
            &source,
            &mut target,
        );

        let [r, g, _, _] = target.pixel(3, 0).unwrap();
        assert!(r > 128 && g > 128);
        let [r, g, _, _] = target.pixel(0, 1).unwrap();
        assert!(r < 128 && g < 128);
    }

    #[test]
    fn blit_copies_source() {
        let mut backend = SoftwareBackend::new();
        let source = Surface::from_fn(5, 3, |x, y| [x as u8, y as u8, 9, 255]);
        let mut target = Surface::new(5, 3);
        backend.blit(&source, &mut target);
        assert_eq!(target, source);
    }

    #[test]
    fn uniforms_fall_back_on_kind_mismatch() {
        let mut uniforms = Uniforms::default();
        uniforms.set("_Accuracy", ShaderValue::Int(3));
        assert_eq!(uniforms.float("_Accuracy", 0.01), 0.01);
        uniforms.set("_LightCol", ShaderValue::Color(Vec4::ONE));
        assert_eq!(uniforms.vector("_LightCol", Vec4::ZERO), Vec4::ONE);
        assert!(uniforms.texture("_ReflectionCube").is_none());
    }
}

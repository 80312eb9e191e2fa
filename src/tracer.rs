//! Reference signed-distance scene traced on the CPU.
//!
//! Mirrors the built-in WGSL program so headless runs produce the same image
//! the GPU path would: a sphere smoothly merged with a box rotated around Y,
//! standing on the ground plane, lit by a single directional light with soft
//! shadows, ambient occlusion and reflection bounces.

use glam::{Mat3, Mat4, Vec3, Vec4, Vec4Swizzles};

use crate::backend::software::{Fragment, FragmentProgram, Uniforms};
use crate::contract;
use crate::params::RaymarchParameters;
use crate::surface::EnvironmentMap;

const GROUND_COLOR: Vec3 = Vec3::new(0.55, 0.55, 0.6);
const SHAPE_COLOR: Vec3 = Vec3::new(0.9, 0.45, 0.2);
const NORMAL_EPSILON: f32 = 0.001;
const SHADOW_STEPS: usize = 256;

/// Scene values read from the uniforms once per pixel.
struct SceneState<'a> {
    cam_to_world: Mat4,
    cam_position: Vec3,
    light_direction: Vec3,
    max_distance: f32,
    sphere: Vec4,
    light_color: Vec3,
    light_intensity: f32,
    smooth: f32,
    box_rotation: Mat3,
    shadow_intensity: f32,
    shadow_min: f32,
    shadow_max: f32,
    penumbra: f32,
    max_iterations: i32,
    accuracy: f32,
    ao_step: f32,
    ao_intensity: f32,
    ao_iterations: i32,
    reflection_count: i32,
    reflection_intensity: f32,
    environment: Option<&'a EnvironmentMap>,
    env_intensity: f32,
}

impl<'a> SceneState<'a> {
    /// Unset uniforms fall back to the parameter defaults, as an unset
    /// material property keeps the value declared by the shader.
    fn from_uniforms(uniforms: &'a Uniforms) -> Self {
        let defaults = RaymarchParameters::default();
        let shadow = uniforms.vector(
            contract::SHADOW_DISTANCE,
            defaults.shadow_distance.extend(0.0).extend(0.0),
        );
        let degrees = uniforms.float(contract::DEGREE_ROTATE, defaults.degree_rotate);
        Self {
            cam_to_world: uniforms.matrix(contract::CAM_TO_WORLD, Mat4::IDENTITY),
            cam_position: uniforms.vector(contract::CAM_WORLD_SPACE, Vec4::W).xyz(),
            light_direction: uniforms
                .vector(contract::LIGHT_DIRECTION, Vec4::NEG_Y)
                .xyz()
                .normalize_or_zero(),
            max_distance: uniforms.float(contract::MAX_DISTANCE, defaults.max_distance),
            sphere: uniforms.vector(contract::SPHERE1, defaults.sphere1),
            light_color: uniforms
                .vector(contract::LIGHT_COL, defaults.light_color.extend(1.0))
                .xyz(),
            light_intensity: uniforms.float(contract::LIGHT_INTENSITY, defaults.light_intensity),
            smooth: uniforms.float(contract::SPHERE_SMOOTH, defaults.sphere_smooth),
            box_rotation: Mat3::from_rotation_y(degrees.to_radians()),
            shadow_intensity: uniforms
                .float(contract::SHADOW_INTENSITY, defaults.shadow_intensity),
            shadow_min: shadow.x,
            shadow_max: shadow.y,
            penumbra: uniforms.float(contract::SHADOW_PENUMBRA, defaults.shadow_penumbra),
            max_iterations: uniforms.int(contract::MAX_ITERATIONS, defaults.max_iterations),
            accuracy: uniforms.float(contract::ACCURACY, defaults.accuracy),
            ao_step: uniforms.float(contract::AO_STEPSIZE, defaults.ao_step_size),
            ao_intensity: uniforms.float(contract::AO_INTENSITY, defaults.ao_intensity),
            ao_iterations: uniforms.int(contract::AO_ITERATIONS, defaults.ao_iterations),
            reflection_count: uniforms.int(contract::REFLECTION_COUNT, 0),
            reflection_intensity: uniforms
                .float(contract::REFLECTION_INTENSITY, defaults.reflection_intensity),
            environment: uniforms.texture(contract::REFLECTION_CUBE),
            env_intensity: uniforms
                .float(contract::ENV_REFL_INTENSITY, defaults.env_reflection_intensity),
        }
    }

    fn shape_distance(&self, p: Vec3) -> f32 {
        let local = p - self.sphere.xyz();
        let radius = self.sphere.w;
        let sphere = local.length() - radius;
        let boxed = sd_box(
            self.box_rotation.transpose() * local,
            Vec3::new(radius * 0.9, radius * 0.45, radius * 0.9),
        );
        smooth_union(sphere, boxed, self.smooth)
    }

    fn distance_field(&self, p: Vec3) -> f32 {
        p.y.min(self.shape_distance(p))
    }

    fn normal(&self, p: Vec3) -> Vec3 {
        let e = NORMAL_EPSILON;
        Vec3::new(
            self.distance_field(p + Vec3::X * e) - self.distance_field(p - Vec3::X * e),
            self.distance_field(p + Vec3::Y * e) - self.distance_field(p - Vec3::Y * e),
            self.distance_field(p + Vec3::Z * e) - self.distance_field(p - Vec3::Z * e),
        )
        .normalize_or_zero()
    }

    /// Returns the hit distance along the ray.
    fn march(&self, origin: Vec3, direction: Vec3) -> Option<f32> {
        let mut t = 0.0;
        for _ in 0..self.max_iterations {
            if t >= self.max_distance {
                return None;
            }
            let d = self.distance_field(origin + direction * t);
            if d < self.accuracy {
                return Some(t);
            }
            t += d;
        }
        None
    }

    fn soft_shadow(&self, origin: Vec3, direction: Vec3) -> f32 {
        let mut result: f32 = 1.0;
        let mut t = self.shadow_min;
        for _ in 0..SHADOW_STEPS {
            if t >= self.shadow_max {
                break;
            }
            let h = self.distance_field(origin + direction * t);
            if h < 0.001 {
                return 0.0;
            }
            result = result.min(self.penumbra * h / t);
            t += h;
        }
        result
    }

    fn ambient_occlusion(&self, p: Vec3, n: Vec3) -> f32 {
        let mut occlusion = 0.0;
        for i in 1..=self.ao_iterations {
            let dist = self.ao_step * i as f32;
            occlusion += ((dist - self.distance_field(p + n * dist)) / dist).max(0.0);
        }
        (1.0 - occlusion * self.ao_intensity).max(0.0)
    }

    fn albedo(&self, p: Vec3) -> Vec3 {
        if p.y <= self.shape_distance(p) {
            GROUND_COLOR
        } else {
            SHAPE_COLOR
        }
    }

    fn shade_hit(&self, p: Vec3, n: Vec3) -> Vec3 {
        let to_light = -self.light_direction;
        let diffuse = n.dot(to_light).max(0.0);
        let light = self.light_color * diffuse * self.light_intensity;
        let shadow = self.soft_shadow(p + n * self.accuracy, to_light) * 0.5 + 0.5;
        let shadow = shadow.max(0.0).powf(self.shadow_intensity);
        let ao = self.ambient_occlusion(p, n);
        self.albedo(p) * (light * shadow * ao + Vec3::splat(0.05) * ao)
    }

    fn environment(&self, direction: Vec3) -> Vec3 {
        self.environment
            .map(|env| env.sample(direction).xyz())
            .unwrap_or(Vec3::ZERO)
    }

    fn trace(&self, direction: Vec3) -> Option<Vec3> {
        let t = self.march(self.cam_position, direction)?;
        let mut p = self.cam_position + direction * t;
        let mut n = self.normal(p);
        let mut color = self.shade_hit(p, n);

        let mut ray = direction;
        let mut weight = self.reflection_intensity;
        for _ in 0..self.reflection_count {
            ray = reflect(ray, n);
            let origin = p + n * (self.accuracy * 2.0);
            match self.march(origin, ray) {
                Some(t) => {
                    p = origin + ray * t;
                    n = self.normal(p);
                    color += self.shade_hit(p, n) * weight;
                    weight *= self.reflection_intensity;
                }
                None => {
                    color += self.environment(ray) * weight * self.env_intensity;
                    break;
                }
            }
        }
        Some(color)
    }
}

fn sd_box(p: Vec3, half_extents: Vec3) -> f32 {
    let q = p.abs() - half_extents;
    q.max(Vec3::ZERO).length() + q.max_element().min(0.0)
}

fn smooth_union(a: f32, b: f32, k: f32) -> f32 {
    if k <= 0.0 {
        return a.min(b);
    }
    let h = (0.5 + 0.5 * (b - a) / k).clamp(0.0, 1.0);
    b + (a - b) * h - k * h * (1.0 - h)
}

fn reflect(incident: Vec3, normal: Vec3) -> Vec3 {
    incident - 2.0 * normal.dot(incident) * normal
}

/// CPU counterpart of the built-in raymarching shader.
#[derive(Debug, Default, Clone, Copy)]
pub struct SphereTracer;

impl FragmentProgram for SphereTracer {
    fn name(&self) -> &str {
        "sphere-tracer"
    }

    fn shade(&self, uniforms: &Uniforms, fragment: &Fragment<'_>) -> Vec4 {
        let scene = SceneState::from_uniforms(uniforms);
        let background = fragment.source_color();
        let direction = scene
            .cam_to_world
            .transform_vector3(fragment.ray)
            .normalize_or_zero();
        match scene.trace(direction) {
            Some(color) => color.extend(1.0),
            None => background,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::camera::CameraView;
    use crate::driver::RaymarchDriver;
    use crate::params::ParameterRevision;
    use crate::surface::Surface;

    fn render(params: &RaymarchParameters, revision: ParameterRevision) -> Surface {
        let mut backend = SoftwareBackend::new();
        let program: Arc<dyn FragmentProgram> = Arc::new(SphereTracer);
        let mut driver = RaymarchDriver::new(&mut backend, Some(&program), revision);
        // camera at z = 6 looking at the sphere resting on the ground
        let camera = CameraView::from_euler(Vec3::new(0.0, 1.0, 6.0), Vec3::ZERO, 60.0, 1.0);
        let source = Surface::filled(16, 16, [10, 20, 200, 255]);
        let mut target = Surface::new(16, 16);
        driver.render_frame(&mut backend, &camera, None, params, &source, &mut target);
        target
    }

    #[test]
    fn sphere_in_front_of_camera_is_hit() {
        let image = render(&RaymarchParameters::default(), ParameterRevision::LATEST);
        // center pixel lands on the shape, the top row escapes to the source
        assert_ne!(image.pixel(8, 8), Some([10, 20, 200, 255]));
        assert_eq!(image.pixel(8, 0), Some([10, 20, 200, 255]));
    }

    #[test]
    fn reflections_stop_after_switching_to_an_older_revision() {
        let params = RaymarchParameters {
            reflection_count: 2,
            ..RaymarchParameters::default()
        };
        let mut backend = SoftwareBackend::new();
        let program: Arc<dyn FragmentProgram> = Arc::new(SphereTracer);
        let mut driver =
            RaymarchDriver::new(&mut backend, Some(&program), ParameterRevision::Reflections);
        let camera = CameraView::from_euler(Vec3::new(0.0, 1.0, 6.0), Vec3::ZERO, 60.0, 1.0);
        let source = Surface::filled(16, 16, [10, 20, 200, 255]);
        let mut target = Surface::new(16, 16);
        driver.render_frame(&mut backend, &camera, None, &params, &source, &mut target);

        driver.set_revision(ParameterRevision::Initial);
        driver.render_frame(&mut backend, &camera, None, &params, &source, &mut target);
        assert_eq!(target, render(&params, ParameterRevision::Initial));
    }

    #[test]
    fn rendering_is_deterministic() {
        let params = RaymarchParameters::default();
        let a = render(&params, ParameterRevision::LATEST);
        let b = render(&params, ParameterRevision::LATEST);
        assert_eq!(a.checksum(), b.checksum());
    }

    #[test]
    fn zero_iterations_never_hit() {
        let params = RaymarchParameters {
            max_iterations: 0,
            ..RaymarchParameters::default()
        };
        let image = render(&params, ParameterRevision::LATEST);
        assert!(image.pixels().iter().all(|p| *p == [10, 20, 200, 255]));
    }

    #[test]
    fn smooth_union_without_radius_is_min() {
        assert_eq!(smooth_union(1.0, 2.0, 0.0), 1.0);
        assert!(smooth_union(1.0, 1.0, 0.5) < 1.0);
    }

    #[test]
    fn box_distance_is_zero_on_faces() {
        let d = sd_box(Vec3::new(1.0, 0.0, 0.0), Vec3::ONE);
        assert!(d.abs() < 1e-6);
        assert!(sd_box(Vec3::ZERO, Vec3::ONE) < 0.0);
    }
}

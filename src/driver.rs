use log::{debug, trace};

use crate::backend::RenderBackend;
use crate::camera::{resolve_light_direction, CameraView, LightTransform};
use crate::contract::{Material, ParameterSet};
use crate::frustum::compute_frustum;
use crate::params::{ParameterRevision, RaymarchParameters};
use crate::quad::FULL_SCREEN_QUAD;

/// What a call to [`RaymarchDriver::render_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// No usable material; the source was copied to the target.
    PassThrough,
    /// Parameters were uploaded and the quad was drawn.
    Raymarched { uploads: usize },
}

/// Per-camera driver that uploads the shader parameters and draws the quad.
///
/// The material is built once when the driver is created (or the shader is
/// replaced) and lives as long as the driver. Nothing else is kept between
/// frames.
pub struct RaymarchDriver<B: RenderBackend> {
    material: Option<B::Material>,
    revision: ParameterRevision,
}

impl<B: RenderBackend> RaymarchDriver<B> {
    /// Creates the driver, building the material from `shader` when one is given.
    pub fn new(backend: &mut B, shader: Option<&B::Shader>, revision: ParameterRevision) -> Self {
        let material = shader.and_then(|shader| backend.create_material(shader));
        debug!(
            "raymarch driver created (revision {revision}, material: {})",
            material.is_some()
        );
        Self { material, revision }
    }

    /// Replaces the shader, dropping the previous material.
    pub fn set_shader(&mut self, backend: &mut B, shader: Option<&B::Shader>) {
        self.material = shader.and_then(|shader| backend.create_material(shader));
    }

    pub fn has_material(&self) -> bool {
        self.material.is_some()
    }

    pub fn revision(&self) -> ParameterRevision {
        self.revision
    }

    /// Switches the parameter revision.
    ///
    /// The material forgets its values, so parameters the new revision does
    /// not upload fall back to the program defaults.
    pub fn set_revision(&mut self, revision: ParameterRevision) {
        if revision == self.revision {
            return;
        }
        if let Some(material) = self.material.as_mut() {
            material.reset();
        }
        debug!("parameter revision {} -> {revision}", self.revision);
        self.revision = revision;
    }

    /// Renders one frame from `source` into `target`.
    ///
    /// Without a material this is a plain copy. Otherwise the full parameter
    /// set for the current frame is uploaded before the quad is drawn.
    pub fn render_frame(
        &mut self,
        backend: &mut B,
        camera: &CameraView,
        light: Option<&LightTransform>,
        params: &RaymarchParameters,
        source: &B::Surface,
        target: &mut B::Surface,
    ) -> FrameOutcome {
        let Some(material) = self.material.as_mut() else {
            backend.blit(source, target);
            trace!("no raymarch material, copied source through");
            return FrameOutcome::PassThrough;
        };

        let light_direction = resolve_light_direction(light);
        let frustum = compute_frustum(camera.vertical_fov_degrees, camera.aspect_ratio);
        let parameters =
            ParameterSet::for_frame(camera, &frustum, light_direction, params, self.revision);
        let uploads = parameters.upload(material);

        backend.draw_fullscreen(source, target, material, &FULL_SCREEN_QUAD);
        trace!("raymarched frame with {uploads} parameter uploads");
        FrameOutcome::Raymarched { uploads }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use glam::{Mat4, Vec3, Vec4};

    use super::*;
    use crate::backend::recording::{RecordedEvent, RecordingBackend, RecordingShader};
    use crate::contract::{self, active_names, ShaderValue, PARAMETER_TABLE};
    use crate::surface::Surface;

    fn camera() -> CameraView {
        CameraView::from_euler(Vec3::new(0.0, 2.0, 6.0), Vec3::new(-10.0, 0.0, 0.0), 60.0, 16.0 / 9.0)
    }

    fn source() -> Surface {
        Surface::from_fn(8, 4, |x, y| [x as u8 * 30, y as u8 * 60, 7, 255])
    }

    fn uploads(events: &[RecordedEvent]) -> Vec<(String, ShaderValue)> {
        events
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Upload { name, value } => Some((name.clone(), value.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn missing_shader_copies_source_verbatim() {
        let mut backend = RecordingBackend::new();
        let mut driver = RaymarchDriver::new(&mut backend, None, ParameterRevision::LATEST);
        let source = source();
        let mut target = Surface::new(1, 1);

        let outcome = driver.render_frame(
            &mut backend,
            &camera(),
            None,
            &RaymarchParameters::default(),
            &source,
            &mut target,
        );

        assert_eq!(outcome, FrameOutcome::PassThrough);
        assert_eq!(target.as_bytes(), source.as_bytes());
        assert_eq!(backend.events(), vec![RecordedEvent::Blit]);
    }

    #[test]
    fn rejected_shader_degrades_to_pass_through() {
        let mut backend = RecordingBackend::new();
        let shader = RecordingShader::broken();
        let mut driver = RaymarchDriver::new(&mut backend, Some(&shader), ParameterRevision::LATEST);
        assert!(!driver.has_material());

        let source = source();
        let mut target = Surface::new(8, 4);
        let outcome = driver.render_frame(
            &mut backend,
            &camera(),
            None,
            &RaymarchParameters::default(),
            &source,
            &mut target,
        );
        assert_eq!(outcome, FrameOutcome::PassThrough);
        assert_eq!(target, source);
    }

    #[test]
    fn each_active_parameter_is_uploaded_once_per_frame() {
        for revision in [
            ParameterRevision::Initial,
            ParameterRevision::Shading,
            ParameterRevision::Reflections,
        ] {
            let mut backend = RecordingBackend::new();
            let shader = RecordingShader::default();
            let mut driver = RaymarchDriver::new(&mut backend, Some(&shader), revision);
            let mut target = Surface::new(8, 4);
            backend.clear();

            let outcome = driver.render_frame(
                &mut backend,
                &camera(),
                None,
                &RaymarchParameters::default(),
                &source(),
                &mut target,
            );

            let uploaded = uploads(&backend.events());
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for (name, _) in &uploaded {
                *counts.entry(name.as_str()).or_default() += 1;
            }
            let active: Vec<_> = active_names(revision).collect();
            assert_eq!(outcome, FrameOutcome::Raymarched { uploads: active.len() });
            for decl in PARAMETER_TABLE {
                let expected = usize::from(active.contains(&decl.name));
                assert_eq!(
                    counts.get(decl.name).copied().unwrap_or(0),
                    expected,
                    "{} in {revision}",
                    decl.name
                );
            }
        }
    }

    #[test]
    fn uploads_track_current_field_values() {
        let mut backend = RecordingBackend::new();
        let shader = RecordingShader::default();
        let mut driver = RaymarchDriver::new(&mut backend, Some(&shader), ParameterRevision::LATEST);
        let mut target = Surface::new(8, 4);
        let mut params = RaymarchParameters::default();

        for (frame, iterations) in [(0, 64), (1, 300)] {
            params.max_iterations = iterations;
            params.sphere1 = Vec4::new(frame as f32, 1.0, 0.0, 0.5);
            backend.clear();
            driver.render_frame(&mut backend, &camera(), None, &params, &source(), &mut target);

            let uploaded = uploads(&backend.events());
            let lookup = |name: &str| {
                uploaded
                    .iter()
                    .find(|(candidate, _)| candidate == name)
                    .map(|(_, value)| value.clone())
            };
            assert_eq!(lookup(contract::MAX_ITERATIONS), Some(ShaderValue::Int(iterations)));
            assert_eq!(lookup(contract::SPHERE1), Some(ShaderValue::Vector(params.sphere1)));
        }
    }

    #[test]
    fn target_is_bound_before_the_four_vertex_draw() {
        let mut backend = RecordingBackend::new();
        let shader = RecordingShader::default();
        let mut driver = RaymarchDriver::new(&mut backend, Some(&shader), ParameterRevision::LATEST);
        let mut target = Surface::new(8, 4);
        backend.clear();

        driver.render_frame(
            &mut backend,
            &camera(),
            None,
            &RaymarchParameters::default(),
            &source(),
            &mut target,
        );

        let events = backend.events();
        let bind = events
            .iter()
            .position(|event| *event == RecordedEvent::BindTarget)
            .unwrap();
        let draws: Vec<_> = events
            .iter()
            .enumerate()
            .filter_map(|(index, event)| match event {
                RecordedEvent::Draw { vertices } => Some((index, vertices)),
                _ => None,
            })
            .collect();
        assert_eq!(draws.len(), 1);
        let (draw_index, vertices) = draws[0];
        assert!(bind < draw_index);
        assert_eq!(vertices.len(), 4);

        let mut uvs: Vec<_> = vertices.iter().map(|vertex| vertex.uv).collect();
        uvs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(uvs, vec![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]);

        let last_upload = events
            .iter()
            .rposition(|event| matches!(event, RecordedEvent::Upload { .. }))
            .unwrap();
        assert!(last_upload < bind);
    }

    #[test]
    fn identical_inputs_render_identical_frames() {
        let mut backend = RecordingBackend::new();
        let shader = RecordingShader::default();
        let mut driver = RaymarchDriver::new(&mut backend, Some(&shader), ParameterRevision::LATEST);
        let params = RaymarchParameters::default();
        let light = LightTransform::from_euler_degrees(Vec3::new(-45.0, 30.0, 0.0));

        let mut first = Surface::new(8, 4);
        let mut second = Surface::new(8, 4);
        driver.render_frame(&mut backend, &camera(), Some(&light), &params, &source(), &mut first);
        driver.render_frame(&mut backend, &camera(), Some(&light), &params, &source(), &mut second);
        assert_eq!(first, second);

        let moved = LightTransform::from_euler_degrees(Vec3::new(-60.0, 30.0, 0.0));
        let mut third = Surface::new(8, 4);
        driver.render_frame(&mut backend, &camera(), Some(&moved), &params, &source(), &mut third);
        assert_ne!(first, third);
    }

    #[test]
    fn absent_light_uploads_straight_down() {
        let mut backend = RecordingBackend::new();
        let shader = RecordingShader::default();
        let mut driver = RaymarchDriver::new(&mut backend, Some(&shader), ParameterRevision::LATEST);
        let camera = CameraView::new(60.0, 16.0 / 9.0, Mat4::IDENTITY);
        let mut target = Surface::new(8, 4);

        driver.render_frame(
            &mut backend,
            &camera,
            None,
            &RaymarchParameters::default(),
            &source(),
            &mut target,
        );

        let uploaded = uploads(&backend.events());
        let light = uploaded
            .iter()
            .find(|(name, _)| name == contract::LIGHT_DIRECTION)
            .map(|(_, value)| value.clone());
        assert_eq!(
            light,
            Some(ShaderValue::Vector(Vec4::new(0.0, -1.0, 0.0, 0.0)))
        );
    }

    #[test]
    fn downgraded_revision_matches_a_fresh_driver() {
        let shader = RecordingShader::default();
        let params = RaymarchParameters {
            reflection_count: 2,
            ..RaymarchParameters::default()
        };

        let mut backend = RecordingBackend::new();
        let mut driver =
            RaymarchDriver::new(&mut backend, Some(&shader), ParameterRevision::Reflections);
        let mut target = Surface::new(8, 4);
        driver.render_frame(&mut backend, &camera(), None, &params, &source(), &mut target);
        driver.set_revision(ParameterRevision::Initial);
        assert!(backend.events().contains(&RecordedEvent::Reset));
        let mut downgraded = Surface::new(8, 4);
        driver.render_frame(&mut backend, &camera(), None, &params, &source(), &mut downgraded);

        let mut fresh_backend = RecordingBackend::new();
        let mut fresh =
            RaymarchDriver::new(&mut fresh_backend, Some(&shader), ParameterRevision::Initial);
        let mut expected = Surface::new(8, 4);
        fresh.render_frame(&mut fresh_backend, &camera(), None, &params, &source(), &mut expected);

        assert_eq!(downgraded, expected);
        assert_ne!(target, expected);
    }

    #[test]
    fn same_revision_keeps_material_values() {
        let mut backend = RecordingBackend::new();
        let shader = RecordingShader::default();
        let mut driver = RaymarchDriver::new(&mut backend, Some(&shader), ParameterRevision::Shading);
        driver.set_revision(ParameterRevision::Shading);
        assert!(!backend.events().contains(&RecordedEvent::Reset));
    }

    #[test]
    fn material_is_created_once() {
        let mut backend = RecordingBackend::new();
        let shader = RecordingShader::default();
        let mut driver = RaymarchDriver::new(&mut backend, Some(&shader), ParameterRevision::LATEST);
        let mut target = Surface::new(8, 4);
        for _ in 0..3 {
            driver.render_frame(
                &mut backend,
                &camera(),
                None,
                &RaymarchParameters::default(),
                &source(),
                &mut target,
            );
        }
        let created = backend
            .events()
            .iter()
            .filter(|event| matches!(event, RecordedEvent::CreateMaterial { .. }))
            .count();
        assert_eq!(created, 1);

        driver.set_shader(&mut backend, None);
        assert!(!driver.has_material());
    }
}

//! Scene configuration loaded by the demo binary.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use glam::{Vec2, Vec3, Vec4};
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};

use crate::camera::{CameraView, LightTransform};
use crate::params::{validate_projection, ParameterRevision, RaymarchParameters};
use crate::surface::{EnvironmentMap, Surface};

const SKY_WIDTH: u32 = 64;
const SKY_HEIGHT: u32 = 32;

/// Which program the driver should build its material from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShaderChoice {
    /// No shader; every frame is a plain copy.
    None,
    /// The raymarching program shipped with the crate.
    Builtin,
    /// A WGSL file, resolved relative to the configuration file.
    File(PathBuf),
}

impl fmt::Display for ShaderChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderChoice::None => f.write_str("none"),
            ShaderChoice::Builtin => f.write_str("builtin"),
            ShaderChoice::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    pub revision: ParameterRevision,
    pub shader: ShaderChoice,
    pub fov: f32,
    pub aspect: f32,
    pub camera_position: Vec3,
    pub camera_rotation: Vec3,
    pub light: Option<LightTransform>,
    /// Color of the source surface the effect is composited over, in [0, 1].
    pub background: Vec3,
    pub params: RaymarchParameters,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            revision: ParameterRevision::LATEST,
            shader: ShaderChoice::Builtin,
            fov: 60.0,
            aspect: 16.0 / 9.0,
            camera_position: Vec3::new(0.0, 2.0, 6.0),
            camera_rotation: Vec3::new(-10.0, 0.0, 0.0),
            light: None,
            background: Vec3::new(0.3, 0.45, 0.7),
            params: RaymarchParameters::default(),
        }
    }
}

impl SceneConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let xml = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config =
            Self::from_xml(&xml).with_context(|| format!("invalid config {}", path.display()))?;
        if let ShaderChoice::File(shader) = &config.shader {
            if shader.is_relative() {
                let base = path.parent().unwrap_or_else(|| Path::new("."));
                config.shader = ShaderChoice::File(base.join(shader));
            }
        }
        Ok(config)
    }

    pub fn from_xml(xml: &str) -> Result<Self> {
        let document = Document::parse(xml).context("invalid configuration XML")?;
        let root = document.root_element();
        if !root.has_tag_name("raymarch") {
            bail!("expected <raymarch> root, found <{}>", root.tag_name().name());
        }
        let defaults = Self::default();

        let revision = match root.attribute("revision") {
            Some(value) => {
                let number = value
                    .trim()
                    .parse::<u32>()
                    .with_context(|| format!("invalid revision {value:?}"))?;
                ParameterRevision::from_number(number)
                    .ok_or_else(|| anyhow!("unknown parameter revision {number}"))?
            }
            None => defaults.revision,
        };

        let shader = match optional_text(&root, "shader").as_deref() {
            None | Some("builtin") => ShaderChoice::Builtin,
            Some("none") => ShaderChoice::None,
            Some(path) => ShaderChoice::File(PathBuf::from(path)),
        };

        let (fov, aspect, camera_position, camera_rotation) = match child(&root, "camera") {
            Some(camera) => (
                parse_f32(optional_text(&camera, "fov"), defaults.fov).context("camera fov")?,
                parse_f32(optional_text(&camera, "aspect"), defaults.aspect)
                    .context("camera aspect")?,
                parse_vec3(optional_text(&camera, "position"), defaults.camera_position)
                    .context("camera position")?,
                parse_vec3(optional_text(&camera, "rotation"), defaults.camera_rotation)
                    .context("camera rotation")?,
            ),
            None => (
                defaults.fov,
                defaults.aspect,
                defaults.camera_position,
                defaults.camera_rotation,
            ),
        };
        validate_projection(fov, aspect).context("invalid camera")?;

        let light = match child(&root, "light") {
            Some(light) => {
                let rotation = parse_vec3(optional_text(&light, "rotation"), Vec3::new(-90.0, 0.0, 0.0))
                    .context("light rotation")?;
                Some(LightTransform::from_euler_degrees(rotation))
            }
            None => None,
        };

        let background = parse_color(optional_text(&root, "background"), defaults.background)
            .context("background")?;

        let params = match child(&root, "parameters") {
            Some(node) => parse_parameters(&node)?,
            None => RaymarchParameters::default(),
        };
        params.validate().context("parameter out of range")?;

        Ok(Self {
            revision,
            shader,
            fov,
            aspect,
            camera_position,
            camera_rotation,
            light,
            background,
            params,
        })
    }

    /// Camera for a frame; `aspect` overrides the configured ratio when the
    /// output size is known.
    pub fn camera(&self, aspect: Option<f32>) -> CameraView {
        CameraView::from_euler(
            self.camera_position,
            self.camera_rotation,
            self.fov,
            aspect.unwrap_or(self.aspect),
        )
    }
}

fn parse_parameters(node: &Node<'_, '_>) -> Result<RaymarchParameters> {
    let d = RaymarchParameters::default();
    let float = |tag: &str, default: f32| {
        parse_f32(optional_text(node, tag), default).with_context(|| format!("<{tag}>"))
    };
    let int = |tag: &str, default: i32| {
        parse_i32(optional_text(node, tag), default).with_context(|| format!("<{tag}>"))
    };

    let shadow_distance = match optional_text(node, "shadowDistance") {
        Some(text) => {
            let values = parse_numbers(&text, 2).context("<shadowDistance>")?;
            Vec2::new(values[0], values[1])
        }
        None => d.shadow_distance,
    };
    let sphere1 = match optional_text(node, "sphere1") {
        Some(text) => {
            let values = parse_numbers(&text, 4).context("<sphere1>")?;
            Vec4::new(values[0], values[1], values[2], values[3])
        }
        None => d.sphere1,
    };
    let environment_map = match optional_text(node, "environment").as_deref() {
        None | Some("none") => None,
        Some("sky") => Some(sky_environment()),
        Some(other) => bail!("unknown environment {other:?}, expected \"sky\" or \"none\""),
    };

    Ok(RaymarchParameters {
        max_distance: float("maxDistance", d.max_distance)?,
        sphere1,
        light_color: parse_color(optional_text(node, "lightColor"), d.light_color)
            .context("<lightColor>")?,
        light_intensity: float("lightIntensity", d.light_intensity)?,
        sphere_smooth: float("sphereSmooth", d.sphere_smooth)?,
        degree_rotate: float("degreeRotate", d.degree_rotate)?,
        shadow_intensity: float("shadowIntensity", d.shadow_intensity)?,
        shadow_distance,
        shadow_penumbra: float("shadowPenumbra", d.shadow_penumbra)?,
        max_iterations: int("maxIterations", d.max_iterations)?,
        accuracy: float("accuracy", d.accuracy)?,
        ao_step_size: float("aoStepSize", d.ao_step_size)?,
        ao_intensity: float("aoIntensity", d.ao_intensity)?,
        ao_iterations: int("aoIterations", d.ao_iterations)?,
        reflection_count: int("reflectionCount", d.reflection_count)?,
        reflection_intensity: float("reflectionIntensity", d.reflection_intensity)?,
        environment_map,
        env_reflection_intensity: float("envReflectionIntensity", d.env_reflection_intensity)?,
    })
}

/// Vertical gradient from horizon white to zenith blue.
fn sky_environment() -> EnvironmentMap {
    let image = Surface::from_fn(SKY_WIDTH, SKY_HEIGHT, |_, y| {
        let t = y as f32 / (SKY_HEIGHT - 1) as f32;
        let zenith = Vec3::new(0.25, 0.45, 0.85);
        let horizon = Vec3::new(0.9, 0.9, 0.95);
        let ground = Vec3::new(0.2, 0.18, 0.15);
        let color = if t < 0.5 {
            zenith.lerp(horizon, t * 2.0)
        } else {
            horizon.lerp(ground, (t - 0.5) * 2.0)
        };
        crate::surface::to_rgba8(color.extend(1.0))
    });
    EnvironmentMap::new(image)
}

fn child<'a, 'input>(node: &Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|candidate| candidate.has_tag_name(tag))
}

fn optional_text(node: &Node<'_, '_>, tag: &str) -> Option<String> {
    child(node, tag)
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(|text| text.to_string())
}

fn parse_numbers(text: &str, count: usize) -> Result<Vec<f32>> {
    let values = text
        .split_whitespace()
        .map(|component| {
            component
                .parse::<f32>()
                .with_context(|| format!("invalid number {component:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    if values.len() != count {
        bail!("expected {count} components, found {}", values.len());
    }
    Ok(values)
}

fn parse_vec3(value: Option<String>, default: Vec3) -> Result<Vec3> {
    let Some(value) = value else {
        return Ok(default);
    };
    let values = parse_numbers(&value, 3)?;
    Ok(Vec3::new(values[0], values[1], values[2]))
}

/// Colors are written as 0..255 channels.
fn parse_color(value: Option<String>, default: Vec3) -> Result<Vec3> {
    let Some(value) = value else {
        return Ok(default);
    };
    let values = parse_numbers(&value, 3)?;
    Ok(Vec3::new(values[0], values[1], values[2]) / 255.0)
}

fn parse_f32(value: Option<String>, default: f32) -> Result<f32> {
    match value {
        Some(text) => text
            .parse::<f32>()
            .with_context(|| format!("invalid number {text:?}")),
        None => Ok(default),
    }
}

fn parse_i32(value: Option<String>, default: i32) -> Result<i32> {
    match value {
        Some(text) => text
            .parse::<i32>()
            .with_context(|| format!("invalid integer {text:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ConfigError;

    const FULL: &str = r#"
        <raymarch revision="2">
          <shader>none</shader>
          <camera>
            <fov>45</fov><aspect>2</aspect>
            <position>1 2 3</position><rotation>0 90 0</rotation>
          </camera>
          <light><rotation>-45 30 0</rotation></light>
          <background>0 0 255</background>
          <parameters>
            <maxDistance>50</maxDistance>
            <sphere1>0 2 0 1.5</sphere1>
            <lightColor>255 0 51</lightColor>
            <shadowDistance>0.5 10</shadowDistance>
            <maxIterations>200</maxIterations>
            <environment>sky</environment>
          </parameters>
        </raymarch>
    "#;

    #[test]
    fn parse_full_configuration() {
        let config = SceneConfig::from_xml(FULL).unwrap();
        assert_eq!(config.revision, ParameterRevision::Shading);
        assert_eq!(config.shader, ShaderChoice::None);
        assert_eq!(config.fov, 45.0);
        assert_eq!(config.aspect, 2.0);
        assert_eq!(config.camera_position, Vec3::new(1.0, 2.0, 3.0));
        assert!(config.light.is_some());
        assert_eq!(config.background, Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(config.params.max_distance, 50.0);
        assert_eq!(config.params.sphere1, Vec4::new(0.0, 2.0, 0.0, 1.5));
        assert_eq!(config.params.light_color, Vec3::new(1.0, 0.0, 0.2));
        assert_eq!(config.params.shadow_distance, Vec2::new(0.5, 10.0));
        assert_eq!(config.params.max_iterations, 200);
        assert!(config.params.environment_map.is_some());
        // untouched fields keep their defaults
        assert_eq!(config.params.accuracy, RaymarchParameters::default().accuracy);
    }

    #[test]
    fn empty_root_uses_defaults() {
        let config = SceneConfig::from_xml("<raymarch/>").unwrap();
        let defaults = SceneConfig::default();
        assert_eq!(config.revision, ParameterRevision::LATEST);
        assert_eq!(config.shader, ShaderChoice::Builtin);
        assert_eq!(config.camera_position, defaults.camera_position);
        assert!(config.light.is_none());
        assert_eq!(config.params, RaymarchParameters::default());
    }

    #[test]
    fn shader_path_is_kept() {
        let config =
            SceneConfig::from_xml("<raymarch><shader>effects/march.wgsl</shader></raymarch>")
                .unwrap();
        assert_eq!(config.shader, ShaderChoice::File(PathBuf::from("effects/march.wgsl")));
    }

    #[test]
    fn out_of_range_parameter_is_rejected() {
        let xml = "<raymarch><parameters><maxIterations>900</maxIterations></parameters></raymarch>";
        let err = SceneConfig::from_xml(xml).unwrap_err();
        let config_error = err.downcast_ref::<ConfigError>();
        assert!(
            matches!(config_error, Some(ConfigError::OutOfRange { .. })),
            "{err:?}"
        );
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(SceneConfig::from_xml("<scene/>").is_err());
        assert!(SceneConfig::from_xml(r#"<raymarch revision="7"/>"#).is_err());
        assert!(SceneConfig::from_xml(
            "<raymarch><camera><position>1 2</position></camera></raymarch>"
        )
        .is_err());
        assert!(SceneConfig::from_xml(
            "<raymarch><parameters><accuracy>fast</accuracy></parameters></raymarch>"
        )
        .is_err());
        assert!(SceneConfig::from_xml(
            "<raymarch><parameters><environment>cubemap.png</environment></parameters></raymarch>"
        )
        .is_err());
    }

    #[test]
    fn degenerate_camera_is_rejected() {
        let camera = |body: &str| {
            let xml = format!("<raymarch><camera>{body}</camera></raymarch>");
            SceneConfig::from_xml(&xml)
                .unwrap_err()
                .downcast::<ConfigError>()
                .unwrap()
        };
        assert_eq!(
            camera("<fov>180</fov>"),
            ConfigError::InvalidFieldOfView { value: 180.0 }
        );
        assert_eq!(
            camera("<fov>0</fov>"),
            ConfigError::InvalidFieldOfView { value: 0.0 }
        );
        assert_eq!(
            camera("<aspect>-1</aspect>"),
            ConfigError::InvalidAspectRatio { value: -1.0 }
        );
        assert_eq!(
            camera("<aspect>0</aspect>"),
            ConfigError::InvalidAspectRatio { value: 0.0 }
        );
        assert!(matches!(
            camera("<fov>NaN</fov>"),
            ConfigError::NotFinite { name: "fov", .. }
        ));
        assert!(matches!(
            camera("<aspect>inf</aspect>"),
            ConfigError::NotFinite { name: "aspect", .. }
        ));
    }

    #[test]
    fn load_resolves_shader_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.xml");
        std::fs::write(&path, "<raymarch><shader>march.wgsl</shader></raymarch>").unwrap();
        let config = SceneConfig::load(&path).unwrap();
        assert_eq!(config.shader, ShaderChoice::File(dir.path().join("march.wgsl")));
    }

    #[test]
    fn camera_uses_override_aspect() {
        let config = SceneConfig::default();
        assert_eq!(config.camera(None).aspect_ratio, config.aspect);
        assert_eq!(config.camera(Some(1.0)).aspect_ratio, 1.0);
        assert_eq!(config.camera(None).position, config.camera_position);
    }
}

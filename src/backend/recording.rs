//! Backend that records what the driver asks of it.
//!
//! Useful for checking the parameter contract without a GPU: every material
//! upload, blit, bind and draw lands in a shared log that stays readable while
//! the driver holds the backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::{Mat4, Vec4};
use parking_lot::Mutex;

use super::RenderBackend;
use crate::contract::{Material, ShaderValue};
use crate::quad::QuadVertex;
use crate::surface::{EnvironmentMap, Surface};

/// One call observed by the recording backend.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    CreateMaterial { shader: String },
    Upload { name: String, value: ShaderValue },
    Reset,
    Blit,
    BindTarget,
    Draw { vertices: Vec<QuadVertex> },
}

/// Program stand-in; a broken shader makes material creation fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingShader {
    pub name: String,
    pub compiles: bool,
}

impl RecordingShader {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compiles: true,
        }
    }

    pub fn broken() -> Self {
        Self {
            name: "broken".into(),
            compiles: false,
        }
    }
}

impl Default for RecordingShader {
    fn default() -> Self {
        Self::new("recording")
    }
}

type EventLog = Arc<Mutex<Vec<RecordedEvent>>>;

#[derive(Debug, Default)]
pub struct RecordingBackend {
    log: EventLog,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.log.lock().clone()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }

    fn record(&self, event: RecordedEvent) {
        self.log.lock().push(event);
    }
}

/// Material that logs uploads and keeps the latest value per name.
#[derive(Debug)]
pub struct RecordingMaterial {
    log: EventLog,
    values: BTreeMap<String, ShaderValue>,
}

impl RecordingMaterial {
    pub fn value(&self, name: &str) -> Option<&ShaderValue> {
        self.values.get(name)
    }

    fn store(&mut self, name: &str, value: ShaderValue) {
        self.log.lock().push(RecordedEvent::Upload {
            name: name.to_string(),
            value: value.clone(),
        });
        self.values.insert(name.to_string(), value);
    }

    /// Color derived from every stored value, so different inputs draw differently.
    fn fingerprint(&self) -> [u8; 4] {
        let text = format!("{:?}", self.values);
        let hash = text.bytes().fold(0x811c_9dc5u32, |hash, byte| {
            (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
        });
        let [r, g, b, _] = hash.to_le_bytes();
        [r, g, b, 255]
    }
}

impl Material for RecordingMaterial {
    fn set_float(&mut self, name: &str, value: f32) {
        self.store(name, ShaderValue::Float(value));
    }

    fn set_int(&mut self, name: &str, value: i32) {
        self.store(name, ShaderValue::Int(value));
    }

    fn set_vector(&mut self, name: &str, value: Vec4) {
        self.store(name, ShaderValue::Vector(value));
    }

    fn set_color(&mut self, name: &str, value: Vec4) {
        self.store(name, ShaderValue::Color(value));
    }

    fn set_matrix(&mut self, name: &str, value: Mat4) {
        self.store(name, ShaderValue::Matrix(value));
    }

    fn set_texture(&mut self, name: &str, value: Option<&EnvironmentMap>) {
        self.store(name, ShaderValue::Texture(value.cloned()));
    }

    fn reset(&mut self) {
        self.log.lock().push(RecordedEvent::Reset);
        self.values.clear();
    }
}

impl RenderBackend for RecordingBackend {
    type Surface = Surface;
    type Shader = RecordingShader;
    type Material = RecordingMaterial;

    fn create_material(&mut self, shader: &RecordingShader) -> Option<RecordingMaterial> {
        self.record(RecordedEvent::CreateMaterial {
            shader: shader.name.clone(),
        });
        shader.compiles.then(|| RecordingMaterial {
            log: Arc::clone(&self.log),
            values: BTreeMap::new(),
        })
    }

    fn blit(&mut self, source: &Surface, target: &mut Surface) {
        self.record(RecordedEvent::Blit);
        target.copy_from(source);
    }

    fn draw_fullscreen(
        &mut self,
        _source: &Surface,
        target: &mut Surface,
        material: &mut RecordingMaterial,
        quad: &[QuadVertex; 4],
    ) {
        self.record(RecordedEvent::BindTarget);
        self.record(RecordedEvent::Draw {
            vertices: quad.to_vec(),
        });
        target.fill(material.fingerprint());
    }
}

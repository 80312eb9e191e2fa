//! Screen-space raymarching post-process driven by a camera.
//!
//! Each frame the driver rebuilds the camera frustum, marshals the camera,
//! light and scene parameters into a fixed name/type contract, and draws one
//! full-screen quad whose corners carry the frustum rays. The per-pixel
//! program then marches a signed distance field along the interpolated ray.
//!
//! Graphics APIs sit behind [`backend::RenderBackend`]: a recording backend
//! for tests, a CPU rasterizer for headless runs and a wgpu backend for the
//! windowed viewer.

pub mod backend;
pub mod camera;
pub mod config;
pub mod contract;
pub mod driver;
pub mod frustum;
pub mod params;
pub mod quad;
pub mod surface;
pub mod tracer;
pub mod viewer;

pub use backend::RenderBackend;
pub use camera::{CameraView, LightTransform};
pub use config::{SceneConfig, ShaderChoice};
pub use contract::{Material, ParameterSet, ShaderValue};
pub use driver::{FrameOutcome, RaymarchDriver};
pub use frustum::{compute_frustum, Frustum, FrustumCorner};
pub use params::{ConfigError, ParameterRevision, RaymarchParameters};
pub use quad::{QuadVertex, FULL_SCREEN_QUAD};
pub use surface::{EnvironmentMap, Surface};
pub use tracer::SphereTracer;
pub use viewer::Viewer;

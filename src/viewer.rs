use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowId};

use crate::backend::gpu::{GpuBackend, GpuSurface, WgslShader};
use crate::config::{SceneConfig, ShaderChoice};
use crate::driver::{FrameOutcome, RaymarchDriver};

/// Window presenting the raymarched camera through the wgpu backend.
pub struct Viewer {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    backend: GpuBackend,
    driver: RaymarchDriver<GpuBackend>,
    scene_color: GpuSurface,
    scene: SceneConfig,
}

impl Viewer {
    /// Initializes the GPU, the swapchain and the driver for `scene`.
    pub async fn new(window: Arc<Window>, scene: SceneConfig) -> Result<Self> {
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            return Err(anyhow!("window has zero area"));
        }

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance.create_surface(Arc::clone(&window))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to acquire GPU adapter")?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("raymarch-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .context("failed to create GPU device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|format| format.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .context("surface reports no supported formats")?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        let mut backend = GpuBackend::new(device, queue, surface_format);
        let shader = match &scene.shader {
            ShaderChoice::None => None,
            ShaderChoice::Builtin => Some(WgslShader::builtin()),
            ShaderChoice::File(path) => match WgslShader::from_file(path) {
                Ok(shader) => Some(shader),
                Err(err) => {
                    warn!("{err:#}; rendering without the effect");
                    None
                }
            },
        };
        let driver = RaymarchDriver::new(&mut backend, shader.as_ref(), scene.revision);
        let scene_color = GpuSurface::offscreen(
            backend.device(),
            "scene-color",
            size.width,
            size.height,
            surface_format,
        );
        info!(
            "viewer ready: {}x{} {surface_format:?}, shader {}",
            size.width, size.height, scene.shader
        );

        Ok(Self {
            window,
            surface,
            config,
            backend,
            driver,
            scene_color,
            scene,
        })
    }

    pub fn window_id(&self) -> WindowId {
        self.window.id()
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Resizes the swap chain and the scene color target.
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(self.backend.device(), &self.config);
        self.scene_color = GpuSurface::offscreen(
            self.backend.device(),
            "scene-color",
            new_size.width,
            new_size.height,
            self.config.format,
        );
    }

    /// Renders the host scene (a flat background) and runs the effect over it.
    pub fn render(&mut self) -> Result<FrameOutcome, wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut target = GpuSurface::from_view(view, self.config.width, self.config.height);

        let background = self.scene.background;
        self.backend.clear(
            &self.scene_color,
            wgpu::Color {
                r: f64::from(background.x),
                g: f64::from(background.y),
                b: f64::from(background.z),
                a: 1.0,
            },
        );

        let aspect = self.config.width as f32 / self.config.height.max(1) as f32;
        let camera = self.scene.camera(Some(aspect));
        let outcome = self.driver.render_frame(
            &mut self.backend,
            &camera,
            self.scene.light.as_ref(),
            &self.scene.params,
            &self.scene_color,
            &mut target,
        );
        output.present();
        Ok(outcome)
    }
}

//! wgpu backend used by the interactive viewer.

use std::num::NonZeroU64;
use std::path::Path;

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use log::{debug, error, trace};
use wgpu::util::DeviceExt;

use super::shader::{BLIT_SHADER, RAYMARCH_SHADER};
use super::RenderBackend;
use crate::contract::{self, Material};
use crate::params::RaymarchParameters;
use crate::quad::{QuadVertex, FULL_SCREEN_QUAD, QUAD_INDICES};
use crate::surface::EnvironmentMap;

/// WGSL source the raymarch material is compiled from.
#[derive(Debug, Clone)]
pub struct WgslShader {
    pub label: String,
    pub source: String,
}

impl WgslShader {
    /// The raymarching program shipped with the crate.
    pub fn builtin() -> Self {
        Self {
            label: "builtin-raymarch".into(),
            source: RAYMARCH_SHADER.into(),
        }
    }

    /// Reads a WGSL program from disk. It must declare the same bindings and
    /// entry points as the built-in one.
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read shader {}", path.display()))?;
        Ok(Self {
            label: path.display().to_string(),
            source,
        })
    }
}

/// Texture view the backend reads from or renders into.
pub struct GpuSurface {
    view: wgpu::TextureView,
    // kept alive for offscreen targets; swapchain views own nothing here
    _texture: Option<wgpu::Texture>,
    width: u32,
    height: u32,
}

impl GpuSurface {
    /// Allocates a texture that can be rendered to and sampled.
    pub fn offscreen(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            view,
            _texture: Some(texture),
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// Wraps a view owned elsewhere, such as the current swapchain frame.
    pub fn from_view(view: wgpu::TextureView, width: u32, height: u32) -> Self {
        Self {
            view,
            _texture: None,
            width,
            height,
        }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Uniform block read by the raymarching program.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct RaymarchUniform {
    pub cam_frustum: [[f32; 4]; 4],
    pub cam_to_world: [[f32; 4]; 4],
    pub cam_world_space: [f32; 4],
    pub light_direction: [f32; 4],
    pub light_color: [f32; 4],
    pub sphere1: [f32; 4],
    pub shadow_distance: [f32; 4],
    pub light_intensity: f32,
    pub max_distance: f32,
    pub sphere_smooth: f32,
    pub degree_rotate: f32,
    pub shadow_intensity: f32,
    pub shadow_penumbra: f32,
    pub accuracy: f32,
    pub ao_step_size: f32,
    pub ao_intensity: f32,
    pub reflection_intensity: f32,
    pub env_reflection_intensity: f32,
    pub has_environment: f32,
    pub max_iterations: i32,
    pub ao_iterations: i32,
    pub reflection_count: i32,
    pub _pad: i32,
}

impl Default for RaymarchUniform {
    /// Values the program sees for parameters an older revision never uploads.
    fn default() -> Self {
        let params = RaymarchParameters::default();
        Self {
            cam_frustum: Mat4::ZERO.to_cols_array_2d(),
            cam_to_world: Mat4::IDENTITY.to_cols_array_2d(),
            cam_world_space: Vec4::W.to_array(),
            light_direction: Vec4::NEG_Y.to_array(),
            light_color: params.light_color.extend(1.0).to_array(),
            sphere1: params.sphere1.to_array(),
            shadow_distance: [params.shadow_distance.x, params.shadow_distance.y, 0.0, 0.0],
            light_intensity: params.light_intensity,
            max_distance: params.max_distance,
            sphere_smooth: params.sphere_smooth,
            degree_rotate: params.degree_rotate,
            shadow_intensity: params.shadow_intensity,
            shadow_penumbra: params.shadow_penumbra,
            accuracy: params.accuracy,
            ao_step_size: params.ao_step_size,
            ao_intensity: params.ao_intensity,
            reflection_intensity: params.reflection_intensity,
            env_reflection_intensity: params.env_reflection_intensity,
            has_environment: 0.0,
            max_iterations: params.max_iterations,
            ao_iterations: params.ao_iterations,
            reflection_count: 0,
            _pad: 0,
        }
    }
}

/// CPU-side copy of the uniform block, filled by name and written to the GPU
/// in one piece right before the draw.
#[derive(Debug, Clone, Default)]
pub struct StagedUniform {
    pub block: RaymarchUniform,
    pub environment: Option<EnvironmentMap>,
}

impl Material for StagedUniform {
    fn set_float(&mut self, name: &str, value: f32) {
        let block = &mut self.block;
        let slot = match name {
            contract::LIGHT_INTENSITY => &mut block.light_intensity,
            contract::MAX_DISTANCE => &mut block.max_distance,
            contract::SPHERE_SMOOTH => &mut block.sphere_smooth,
            contract::DEGREE_ROTATE => &mut block.degree_rotate,
            contract::SHADOW_INTENSITY => &mut block.shadow_intensity,
            contract::SHADOW_PENUMBRA => &mut block.shadow_penumbra,
            contract::ACCURACY => &mut block.accuracy,
            contract::AO_STEPSIZE => &mut block.ao_step_size,
            contract::AO_INTENSITY => &mut block.ao_intensity,
            contract::REFLECTION_INTENSITY => &mut block.reflection_intensity,
            contract::ENV_REFL_INTENSITY => &mut block.env_reflection_intensity,
            _ => {
                trace!("uniform block has no float {name}");
                return;
            }
        };
        *slot = value;
    }

    fn set_int(&mut self, name: &str, value: i32) {
        let block = &mut self.block;
        let slot = match name {
            contract::MAX_ITERATIONS => &mut block.max_iterations,
            contract::AO_ITERATIONS => &mut block.ao_iterations,
            contract::REFLECTION_COUNT => &mut block.reflection_count,
            _ => {
                trace!("uniform block has no int {name}");
                return;
            }
        };
        *slot = value;
    }

    fn set_vector(&mut self, name: &str, value: Vec4) {
        let block = &mut self.block;
        let slot = match name {
            contract::CAM_WORLD_SPACE => &mut block.cam_world_space,
            contract::LIGHT_DIRECTION => &mut block.light_direction,
            contract::SPHERE1 => &mut block.sphere1,
            contract::SHADOW_DISTANCE => &mut block.shadow_distance,
            _ => {
                trace!("uniform block has no vector {name}");
                return;
            }
        };
        *slot = value.to_array();
    }

    fn set_color(&mut self, name: &str, value: Vec4) {
        match name {
            contract::LIGHT_COL => self.block.light_color = value.to_array(),
            _ => trace!("uniform block has no color {name}"),
        }
    }

    fn set_matrix(&mut self, name: &str, value: Mat4) {
        let block = &mut self.block;
        let slot = match name {
            contract::CAM_FRUSTUM => &mut block.cam_frustum,
            contract::CAM_TO_WORLD => &mut block.cam_to_world,
            _ => {
                trace!("uniform block has no matrix {name}");
                return;
            }
        };
        *slot = value.to_cols_array_2d();
    }

    fn set_texture(&mut self, name: &str, value: Option<&EnvironmentMap>) {
        match name {
            contract::REFLECTION_CUBE => {
                self.environment = value.cloned();
                self.block.has_environment = if value.is_some() { 1.0 } else { 0.0 };
            }
            _ => trace!("uniform block has no texture {name}"),
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Compiled raymarch pipeline plus its per-material GPU state.
pub struct GpuMaterial {
    label: String,
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    staged: StagedUniform,
    environment_texture: Option<(EnvironmentMap, wgpu::TextureView)>,
}

impl GpuMaterial {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn staged(&self) -> &StagedUniform {
        &self.staged
    }
}

impl Material for GpuMaterial {
    fn set_float(&mut self, name: &str, value: f32) {
        self.staged.set_float(name, value);
    }

    fn set_int(&mut self, name: &str, value: i32) {
        self.staged.set_int(name, value);
    }

    fn set_vector(&mut self, name: &str, value: Vec4) {
        self.staged.set_vector(name, value);
    }

    fn set_color(&mut self, name: &str, value: Vec4) {
        self.staged.set_color(name, value);
    }

    fn set_matrix(&mut self, name: &str, value: Mat4) {
        self.staged.set_matrix(name, value);
    }

    fn set_texture(&mut self, name: &str, value: Option<&EnvironmentMap>) {
        self.staged.set_texture(name, value);
    }

    fn reset(&mut self) {
        self.staged.reset();
        self.environment_texture = None;
    }
}

/// Renders through a wgpu device. Every pass targets `format`.
pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    format: wgpu::TextureFormat,
    sampler: wgpu::Sampler,
    blit_layout: wgpu::BindGroupLayout,
    blit_pipeline: wgpu::RenderPipeline,
    raymarch_layout: wgpu::BindGroupLayout,
    quad_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    fallback_environment: wgpu::TextureView,
}

impl GpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, format: wgpu::TextureFormat) -> Self {
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("raymarch-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit-bind-layout"),
            entries: &[texture_entry(0), sampler_entry(1)],
        });
        let blit_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit-shader"),
            source: wgpu::ShaderSource::Wgsl(BLIT_SHADER.into()),
        });
        let blit_pipeline = build_pipeline(&device, "blit", &blit_module, &blit_layout, &[], format);

        let raymarch_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("raymarch-bind-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: NonZeroU64::new(
                            std::mem::size_of::<RaymarchUniform>() as u64
                        ),
                    },
                    count: None,
                },
                texture_entry(1),
                texture_entry(2),
                sampler_entry(3),
            ],
        });

        let quad_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("fullscreen-quad"),
            contents: bytemuck::cast_slice(&FULL_SCREEN_QUAD),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("fullscreen-quad-indices"),
            contents: bytemuck::cast_slice(&QUAD_INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        let fallback_environment =
            upload_rgba8(&device, &queue, "environment-fallback", 1, 1, &[0, 0, 0, 255]);

        debug!("gpu backend ready ({format:?})");
        Self {
            device,
            queue,
            format,
            sampler,
            blit_layout,
            blit_pipeline,
            raymarch_layout,
            quad_buffer,
            index_buffer,
            fallback_environment,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Clears `target` to a solid color.
    pub fn clear(&mut self, target: &GpuSurface, color: wgpu::Color) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("clear-encoder"),
            });
        {
            let _pass = begin_pass(&mut encoder, "clear-pass", target.view(), color);
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn environment_view<'a>(
        &'a self,
        staged: &StagedUniform,
        cache: &'a mut Option<(EnvironmentMap, wgpu::TextureView)>,
    ) -> &'a wgpu::TextureView {
        let Some(environment) = staged.environment.as_ref() else {
            return &self.fallback_environment;
        };
        if needs_upload(cache.as_ref().map(|(cached, _)| cached), environment) {
            let image = environment.image();
            let view = upload_rgba8(
                &self.device,
                &self.queue,
                "environment-map",
                image.width(),
                image.height(),
                image.as_bytes(),
            );
            debug!("uploaded {}x{} environment map", image.width(), image.height());
            *cache = Some((environment.clone(), view));
        }
        match cache {
            Some((_, view)) => view,
            None => &self.fallback_environment,
        }
    }
}

impl RenderBackend for GpuBackend {
    type Surface = GpuSurface;
    type Shader = WgslShader;
    type Material = GpuMaterial;

    fn create_material(&mut self, shader: &WgslShader) -> Option<GpuMaterial> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(shader.label.as_str()),
                source: wgpu::ShaderSource::Wgsl(shader.source.as_str().into()),
            });
        let quad_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2],
        };
        let pipeline = build_pipeline(
            &self.device,
            "raymarch",
            &module,
            &self.raymarch_layout,
            &[quad_layout],
            self.format,
        );
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            error!("shader {} rejected: {err}", shader.label);
            return None;
        }

        let staged = StagedUniform::default();
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("raymarch-uniform"),
                contents: bytemuck::bytes_of(&staged.block),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
        debug!("raymarch material built from {}", shader.label);
        Some(GpuMaterial {
            label: shader.label.clone(),
            pipeline,
            uniform_buffer,
            staged,
            environment_texture: None,
        })
    }

    fn blit(&mut self, source: &GpuSurface, target: &mut GpuSurface) {
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blit-bind-group"),
            layout: &self.blit_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("blit-encoder"),
            });
        {
            let mut pass = begin_pass(&mut encoder, "blit-pass", target.view(), wgpu::Color::BLACK);
            pass.set_pipeline(&self.blit_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn draw_fullscreen(
        &mut self,
        source: &GpuSurface,
        target: &mut GpuSurface,
        material: &mut GpuMaterial,
        quad: &[QuadVertex; 4],
    ) {
        // one write per frame, so the shader never sees a half-updated block
        self.queue.write_buffer(
            &material.uniform_buffer,
            0,
            bytemuck::bytes_of(&material.staged.block),
        );
        self.queue
            .write_buffer(&self.quad_buffer, 0, bytemuck::cast_slice(quad));

        let environment = self.environment_view(&material.staged, &mut material.environment_texture);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("raymarch-bind-group"),
            layout: &self.raymarch_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: material.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(source.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(environment),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("raymarch-encoder"),
            });
        {
            let mut pass =
                begin_pass(&mut encoder, "raymarch-pass", target.view(), wgpu::Color::BLACK);
            pass.set_pipeline(&material.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, self.quad_buffer.slice(..));
            pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        trace!("raymarch pass submitted with {}", material.label);
    }
}

/// The cached map is held by the cache, so its image cannot be freed and
/// replaced at the same address while the comparison is made.
fn needs_upload(cached: Option<&EnvironmentMap>, current: &EnvironmentMap) -> bool {
    cached != Some(current)
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn build_pipeline(
    device: &wgpu::Device,
    label: &str,
    module: &wgpu::ShaderModule,
    layout: &wgpu::BindGroupLayout,
    buffers: &[wgpu::VertexBufferLayout<'_>],
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: "vs_main",
            buffers,
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: "fs_main",
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    })
}

fn begin_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &str,
    view: &'e wgpu::TextureView,
    clear: wgpu::Color,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(clear),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

fn upload_rgba8(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    width: u32,
    height: u32,
    bytes: &[u8],
) -> wgpu::TextureView {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytes,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        size,
    );
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

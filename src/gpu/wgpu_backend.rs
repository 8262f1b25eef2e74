use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;
use wgpu::{self, SurfaceError};
use winit::window::Window;

use crate::error::BackendError;
use crate::events::CameraFrame;
use crate::gpu::backend::{GpuBackend, ProgramHandle, TextureHandle, TextureKind};
use crate::gpu::shader::{ProgramLayout, ResourceKind};
use crate::gpu::shaders::{
    LUT_TEXTURE, PARALLAX_UNIFORM, PARAMS_UNIFORM, POSITION_ATTRIBUTE, UV_ATTRIBUTE,
};
use crate::params::UNIFORM_BLOCK_LEN;
use crate::processing::curve::{LUT_SIZE, Lut};

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 2],
    uv: [f32; 2],
}

const QUAD: [Vertex; 4] = [
    Vertex {
        position: [-1.0, -1.0],
        uv: [0.0, 1.0],
    },
    Vertex {
        position: [1.0, -1.0],
        uv: [1.0, 1.0],
    },
    Vertex {
        position: [-1.0, 1.0],
        uv: [0.0, 0.0],
    },
    Vertex {
        position: [1.0, 1.0],
        uv: [1.0, 0.0],
    },
];

const FRAME_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

struct GpuProgram {
    pipeline: wgpu::RenderPipeline,
    bind_layout: wgpu::BindGroupLayout,
    uniforms: HashMap<String, wgpu::Buffer>,
    layout: ProgramLayout,
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    kind: TextureKind,
    /// Bumped whenever the view changes or contents are latched.
    version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BindKey {
    program: ProgramHandle,
    frame: TextureHandle,
    frame_version: u64,
    lut: TextureHandle,
}

/// `wgpu` implementation presenting to a winit window surface.
pub struct WgpuBackend {
    _window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    device_lost: Arc<AtomicBool>,
    quad: wgpu::Buffer,
    sampler: wgpu::Sampler,
    clear: wgpu::Color,
    next_id: u64,
    programs: HashMap<ProgramHandle, GpuProgram>,
    textures: HashMap<TextureHandle, GpuTexture>,
    bound_program: Option<ProgramHandle>,
    bound_frame: Option<TextureHandle>,
    bound_lut: Option<TextureHandle>,
    bind_group: Option<(BindKey, wgpu::BindGroup)>,
}

fn other(context: &str, err: impl std::fmt::Display) -> BackendError {
    BackendError::Other(format!("{context}: {err}"))
}

fn request_device(
    adapter: &wgpu::Adapter,
) -> Result<(wgpu::Device, wgpu::Queue, Arc<AtomicBool>), BackendError> {
    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("camera-render-device"),
        required_features: wgpu::Features::empty(),
        required_limits: adapter.limits(),
        memory_hints: wgpu::MemoryHints::default(),
        trace: wgpu::Trace::default(),
        ..Default::default()
    }))
    .map_err(|err| other("failed to acquire GPU device", err))?;

    let lost = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&lost);
    device.set_device_lost_callback(move |reason, message| {
        warn!(?reason, %message, "GPU device lost");
        flag.store(true, Ordering::Release);
    });
    Ok((device, queue, lost))
}

fn create_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("frame-sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        ..Default::default()
    })
}

fn create_quad(device: &wgpu::Device) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("quad-vertices"),
        contents: bytemuck::cast_slice(&QUAD),
        usage: wgpu::BufferUsages::VERTEX,
    })
}

impl WgpuBackend {
    pub fn new(window: Arc<Window>, clear_color: [u8; 3]) -> Result<Self, BackendError> {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(window.clone())
            .map_err(|err| other("failed to create surface", err))?;
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|err| other("failed to acquire GPU adapter", err))?;
        let (device, queue, device_lost) = request_device(&adapter)?;

        // Linear output so the LUT's bytes land in the framebuffer unchanged.
        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|fmt| !fmt.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| BackendError::Other("surface reports no formats".into()))?;
        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        info!(
            width = config.width,
            height = config.height,
            format = ?config.format,
            adapter = %adapter.get_info().name,
            "render surface configured",
        );

        let quad = create_quad(&device);
        let sampler = create_sampler(&device);
        let [r, g, b] = clear_color.map(|c| f64::from(c) / 255.0);

        Ok(Self {
            _window: window,
            surface,
            adapter,
            device,
            queue,
            config,
            device_lost,
            quad,
            sampler,
            clear: wgpu::Color { r, g, b, a: 1.0 },
            next_id: 0,
            programs: HashMap::new(),
            textures: HashMap::new(),
            bound_program: None,
            bound_frame: None,
            bound_lut: None,
            bind_group: None,
        })
    }

    fn mint(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Replaces the lost device; every previously minted handle is gone afterwards.
    fn recover_device(&mut self) -> Result<(), BackendError> {
        let (device, queue, lost) = request_device(&self.adapter)?;
        self.programs.clear();
        self.textures.clear();
        self.bind_group = None;
        self.bound_program = None;
        self.bound_frame = None;
        self.bound_lut = None;
        self.quad = create_quad(&device);
        self.sampler = create_sampler(&device);
        self.device = device;
        self.queue = queue;
        self.device_lost = lost;
        self.surface.configure(&self.device, &self.config);
        info!("GPU device re-created after loss");
        Ok(())
    }

    fn check_device(&mut self) -> Result<(), BackendError> {
        if self.device_lost.load(Ordering::Acquire) {
            self.recover_device()?;
            return Err(BackendError::ContextLost);
        }
        Ok(())
    }

    fn allocate_texture(&self, kind: TextureKind, width: u32, height: u32) -> GpuTexture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(match kind {
                TextureKind::External => "camera-frame",
                TextureKind::Lut => "tone-lut",
            }),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FRAME_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture {
            texture,
            view,
            width,
            height,
            kind,
            version: 0,
        }
    }

    fn write_texture(&self, texture: &GpuTexture, pixels: &[u8]) {
        self.queue.write_texture(
            texture.texture.as_image_copy(),
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * texture.width),
                rows_per_image: Some(texture.height),
            },
            wgpu::Extent3d {
                width: texture.width,
                height: texture.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn write_uniform(&self, name: &str, bytes: &[u8]) -> Result<(), BackendError> {
        let program = self
            .bound_program
            .and_then(|h| self.programs.get(&h))
            .ok_or_else(|| BackendError::Other("no program bound".into()))?;
        let buffer = program
            .uniforms
            .get(name)
            .ok_or_else(|| BackendError::Other(format!("program has no uniform `{name}`")))?;
        self.queue.write_buffer(buffer, 0, bytes);
        Ok(())
    }

    fn bind_group_for(&mut self, key: BindKey) -> Result<&wgpu::BindGroup, BackendError> {
        if self.bind_group.as_ref().is_none_or(|(cached, _)| *cached != key) {
            let program = self
                .programs
                .get(&key.program)
                .ok_or(BackendError::UnknownHandle("program"))?;
            let frame = self
                .textures
                .get(&key.frame)
                .ok_or(BackendError::UnknownHandle("texture"))?;
            let lut = self
                .textures
                .get(&key.lut)
                .ok_or(BackendError::UnknownHandle("texture"))?;

            let mut entries = Vec::with_capacity(program.layout.resources().len());
            for resource in program.layout.resources() {
                let binding = match resource.kind {
                    ResourceKind::UniformBuffer { .. } => program
                        .uniforms
                        .get(&resource.name)
                        .ok_or(BackendError::UnknownHandle("uniform buffer"))?
                        .as_entire_binding(),
                    ResourceKind::Texture if resource.name == LUT_TEXTURE => {
                        wgpu::BindingResource::TextureView(&lut.view)
                    }
                    ResourceKind::Texture => wgpu::BindingResource::TextureView(&frame.view),
                    ResourceKind::Sampler => wgpu::BindingResource::Sampler(&self.sampler),
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: resource.slot.binding,
                    resource: binding,
                });
            }
            let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("adjust-bind-group"),
                layout: &program.bind_layout,
                entries: &entries,
            });
            debug!(program = %key.program, frame = %key.frame, "bind group rebuilt");
            self.bind_group = Some((key, group));
        }
        self.bind_group
            .as_ref()
            .map(|(_, group)| group)
            .ok_or_else(|| BackendError::Other("bind group unavailable".into()))
    }
}

fn vertex_attributes(layout: &ProgramLayout) -> Result<Vec<wgpu::VertexAttribute>, BackendError> {
    layout
        .attributes()
        .iter()
        .map(|attr| {
            let offset = match attr.name.as_str() {
                POSITION_ATTRIBUTE => 0,
                UV_ATTRIBUTE => std::mem::size_of::<[f32; 2]>() as u64,
                other => {
                    return Err(BackendError::Other(format!(
                        "no vertex data for attribute `{other}`"
                    )));
                }
            };
            if attr.components != 2 {
                return Err(BackendError::Other(format!(
                    "attribute `{}` must be a vec2",
                    attr.name
                )));
            }
            Ok(wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x2,
                offset,
                shader_location: attr.location,
            })
        })
        .collect()
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_program(
        &mut self,
        label: &str,
        vertex: &str,
        fragment: &str,
        layout: &ProgramLayout,
    ) -> Result<ProgramHandle, BackendError> {
        self.check_device()?;
        let attributes = vertex_attributes(layout)?;

        // Validation failures are captured here instead of reaching the
        // device's uncaptured-error handler, which panics.
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let vs = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("{label}-vertex")),
                source: wgpu::ShaderSource::Wgsl(vertex.into()),
            });
        let fs = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("{label}-fragment")),
                source: wgpu::ShaderSource::Wgsl(fragment.into()),
            });

        let mut uniforms = HashMap::new();
        let entries: Vec<wgpu::BindGroupLayoutEntry> = layout
            .resources()
            .iter()
            .map(|resource| {
                let ty = match resource.kind {
                    ResourceKind::UniformBuffer { size } => {
                        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                            label: Some(resource.name.as_str()),
                            size,
                            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                            mapped_at_creation: false,
                        });
                        uniforms.insert(resource.name.clone(), buffer);
                        wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: wgpu::BufferSize::new(size),
                        }
                    }
                    ResourceKind::Texture => wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    ResourceKind::Sampler => {
                        wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
                    }
                };
                wgpu::BindGroupLayoutEntry {
                    binding: resource.slot.binding,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty,
                    count: None,
                }
            })
            .collect();
        let bind_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &entries,
            });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[&bind_layout],
                push_constant_ranges: &[],
            });

        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        };
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vs,
                    entry_point: Some(layout.vertex_entry()),
                    buffers: &[vertex_layout],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fs,
                    entry_point: Some(layout.fragment_entry()),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.config.format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::Other(format!(
                "`{label}` rejected by the device: {err}"
            )));
        }

        let handle = ProgramHandle(self.mint());
        self.programs.insert(
            handle,
            GpuProgram {
                pipeline,
                bind_layout,
                uniforms,
                layout: layout.clone(),
            },
        );
        Ok(handle)
    }

    fn delete_program(&mut self, program: ProgramHandle) -> Result<(), BackendError> {
        self.programs
            .remove(&program)
            .ok_or(BackendError::UnknownHandle("program"))?;
        if self.bound_program == Some(program) {
            self.bound_program = None;
        }
        self.bind_group = None;
        Ok(())
    }

    fn create_texture(&mut self, kind: TextureKind) -> Result<TextureHandle, BackendError> {
        self.check_device()?;
        let (width, height) = match kind {
            TextureKind::External => (1, 1),
            TextureKind::Lut => (LUT_SIZE as u32, 1),
        };
        let texture = self.allocate_texture(kind, width, height);
        match kind {
            TextureKind::External => self.write_texture(&texture, &[0, 0, 0, u8::MAX]),
            TextureKind::Lut => self.write_texture(&texture, &Lut::identity().to_rgba()),
        }
        let handle = TextureHandle(self.mint());
        self.textures.insert(handle, texture);
        Ok(handle)
    }

    fn delete_texture(&mut self, texture: TextureHandle) -> Result<(), BackendError> {
        self.textures
            .remove(&texture)
            .ok_or(BackendError::UnknownHandle("texture"))?;
        if self.bound_frame == Some(texture) {
            self.bound_frame = None;
        }
        if self.bound_lut == Some(texture) {
            self.bound_lut = None;
        }
        self.bind_group = None;
        Ok(())
    }

    fn latch_frame(
        &mut self,
        texture: TextureHandle,
        frame: &CameraFrame,
    ) -> Result<(), BackendError> {
        self.check_device()?;
        let (resize, version) = match self.textures.get(&texture) {
            Some(t) if t.kind == TextureKind::External => (
                t.width != frame.width() || t.height != frame.height(),
                t.version,
            ),
            _ => return Err(BackendError::UnknownHandle("external texture")),
        };
        if resize {
            let replacement =
                self.allocate_texture(TextureKind::External, frame.width(), frame.height());
            debug!(
                width = frame.width(),
                height = frame.height(),
                "camera texture reallocated"
            );
            self.textures.insert(texture, replacement);
        }
        if let Some(target) = self.textures.get(&texture) {
            self.write_texture(target, frame.pixels());
        }
        if let Some(target) = self.textures.get_mut(&texture) {
            target.version = version + 1;
        }
        Ok(())
    }

    fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        self.config.width = width.max(1);
        self.config.height = height.max(1);
        self.surface.configure(&self.device, &self.config);
        debug!(
            width = self.config.width,
            height = self.config.height,
            "render surface resized"
        );
        Ok(())
    }

    fn bind_program(&mut self, program: ProgramHandle) -> Result<(), BackendError> {
        if !self.programs.contains_key(&program) {
            return Err(BackendError::UnknownHandle("program"));
        }
        self.bound_program = Some(program);
        Ok(())
    }

    fn bind_frame(&mut self, texture: TextureHandle) -> Result<(), BackendError> {
        match self.textures.get(&texture) {
            Some(t) if t.kind == TextureKind::External => {
                self.bound_frame = Some(texture);
                Ok(())
            }
            _ => Err(BackendError::UnknownHandle("external texture")),
        }
    }

    fn upload_parameters(&mut self, block: &[f32; UNIFORM_BLOCK_LEN]) -> Result<(), BackendError> {
        self.write_uniform(PARAMS_UNIFORM, bytemuck::cast_slice(block))
    }

    fn upload_lut(&mut self, texture: TextureHandle, lut: &Lut) -> Result<(), BackendError> {
        self.check_device()?;
        match self.textures.get(&texture) {
            Some(t) if t.kind == TextureKind::Lut => self.write_texture(t, &lut.to_rgba()),
            _ => return Err(BackendError::UnknownHandle("lut texture")),
        }
        self.bound_lut = Some(texture);
        Ok(())
    }

    fn upload_parallax(&mut self, offset: [f32; 4]) -> Result<(), BackendError> {
        self.write_uniform(PARALLAX_UNIFORM, bytemuck::cast_slice(&offset))
    }

    fn draw(&mut self) -> Result<(), BackendError> {
        self.check_device()?;
        let program = self
            .bound_program
            .ok_or_else(|| BackendError::Other("no program bound".into()))?;
        let frame = self
            .bound_frame
            .ok_or_else(|| BackendError::Other("no frame texture bound".into()))?;
        let lut = self
            .bound_lut
            .ok_or_else(|| BackendError::Other("no lut texture bound".into()))?;
        let frame_version = self
            .textures
            .get(&frame)
            .map(|t| t.version)
            .ok_or(BackendError::UnknownHandle("texture"))?;

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(SurfaceError::Outdated) | Err(SurfaceError::Lost) => {
                return Err(BackendError::SurfaceLost);
            }
            Err(SurfaceError::Timeout) => return Err(BackendError::Timeout),
            Err(SurfaceError::OutOfMemory) => return Err(BackendError::OutOfMemory),
            Err(SurfaceError::Other) => {
                return Err(BackendError::Other("surface reported an unknown error".into()));
            }
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("adjust-encoder"),
            });

        // Nothing latched yet: present the clear color only.
        let has_frame = frame_version > 0;
        let key = BindKey {
            program,
            frame,
            frame_version,
            lut,
        };
        if has_frame {
            self.bind_group_for(key)?;
        }
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("adjust-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            if let (true, Some(gpu_program), Some((_, group))) = (
                has_frame,
                self.programs.get(&program),
                self.bind_group.as_ref(),
            ) {
                pass.set_pipeline(&gpu_program.pipeline);
                pass.set_bind_group(0, group, &[]);
                pass.set_vertex_buffer(0, self.quad.slice(..));
                pass.draw(0..QUAD.len() as u32, 0..1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

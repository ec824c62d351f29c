//! wgpu execution of field update rules.
//!
//! Each field buffer is an `Rgba32Float` texture usable both as a sampled
//! texture (current/default/inputs) and as a write-only storage texture
//! (next). Each field gets one compute pipeline built from
//! [`field_shader`](crate::shader::field_shader); bind groups are created per
//! dispatch because the current/next roles flip every step.

mod distortion;
mod pass;

use std::collections::HashMap;
use std::sync::{mpsc, Arc};

use glam::Vec4;

pub use distortion::{distortion_offsets, pixelate, DistortionPass, DistortionUniforms};
pub use pass::{distortion_uniforms, FlowmapPass};

use crate::backend::{BufferRole, ComputeBackend, ComputePass, FieldProgram};
use crate::error::{GpuError, SimulationError, StepError};
use crate::field::{FieldId, Resolution};
use crate::shader::{field_shader, workgroup_count, FIRST_INPUT_BINDING};
use crate::uniforms::{StepUniforms, StepUniformsGpu};

/// Texture format of every field buffer.
pub const FIELD_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

const BYTES_PER_TEXEL: u32 = 16;

/// Device and queue shared with the host renderer.
#[derive(Clone, Debug)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    /// Wrap a device and queue owned by the host.
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    /// Request a device without a surface.
    pub async fn request_headless() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Flowmap Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        log::info!("Using adapter {:?}", adapter.get_info().name);
        Ok(Self::new(Arc::new(device), Arc::new(queue)))
    }

    /// Blocking version of [`request_headless`](Self::request_headless).
    pub fn headless() -> Result<Self, GpuError> {
        pollster::block_on(Self::request_headless())
    }
}

/// A field buffer: one texture plus its default view.
#[derive(Debug)]
pub struct FieldTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub resolution: Resolution,
}

fn create_field_texture(device: &wgpu::Device, label: &str, resolution: Resolution) -> FieldTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: extent(resolution),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: FIELD_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    FieldTexture { texture, view, resolution }
}

fn extent(resolution: Resolution) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: resolution.width,
        height: resolution.height,
        depth_or_array_layers: 1,
    }
}

/// Run `f` inside validation and out-of-memory error scopes.
fn scoped<T>(device: &wgpu::Device, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    let value = f();
    let oom = pollster::block_on(device.pop_error_scope());
    let validation = pollster::block_on(device.pop_error_scope());
    (value, oom.or(validation))
}

fn sampled_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

/// Compiled program of one field.
struct FieldPipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

/// Executes update rules as wgpu compute passes.
pub struct WgpuBackend {
    ctx: GpuContext,
    uniform_buffer: wgpu::Buffer,
    programs: HashMap<FieldId, FieldPipeline>,
}

impl WgpuBackend {
    pub fn new(ctx: GpuContext) -> Self {
        let uniform_buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Step Uniform Buffer"),
            size: std::mem::size_of::<StepUniformsGpu>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            ctx,
            uniform_buffer,
            programs: HashMap::new(),
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }
}

impl ComputeBackend for WgpuBackend {
    type Buffer = FieldTexture;
    type Texture<'a> = &'a wgpu::TextureView;

    fn max_texture_dimension(&self) -> u32 {
        self.ctx.device.limits().max_texture_dimension_2d
    }

    fn create_buffer(
        &mut self,
        field: &str,
        role: BufferRole,
        resolution: Resolution,
    ) -> Result<FieldTexture, SimulationError> {
        let label = format!("{} {} Texture", field, role.label());
        let (texture, error) = scoped(&self.ctx.device, || {
            create_field_texture(&self.ctx.device, &label, resolution)
        });
        if let Some(e) = error {
            log::debug!("Allocation of '{}' failed: {}", label, e);
            return Err(SimulationError::ResourceExhausted {
                field: field.to_string(),
                width: resolution.width,
                height: resolution.height,
                limit: self.max_texture_dimension(),
            });
        }
        Ok(texture)
    }

    fn upload(&mut self, buffer: &FieldTexture, resolution: Resolution, texels: &[Vec4]) -> Result<(), SimulationError> {
        self.ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &buffer.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(texels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(resolution.width * BYTES_PER_TEXEL),
                rows_per_image: Some(resolution.height),
            },
            extent(resolution),
        );
        Ok(())
    }

    fn read(&self, buffer: &FieldTexture, resolution: Resolution) -> Result<Vec<Vec4>, SimulationError> {
        let device = &self.ctx.device;
        let unpadded_row = resolution.width * BYTES_PER_TEXEL;
        // Must be aligned to COPY_BYTES_PER_ROW_ALIGNMENT (256)
        let padded_row = unpadded_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Field Readback Buffer"),
            size: padded_row as u64 * resolution.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Field Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &buffer.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(resolution.height),
                },
            },
            extent(resolution),
        );
        self.ctx.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?;

        let mut texels = Vec::with_capacity(resolution.texel_count());
        {
            let data = slice.get_mapped_range();
            for row in data.chunks_exact(padded_row as usize) {
                let row: &[f32] = bytemuck::cast_slice(&row[..unpadded_row as usize]);
                texels.extend(row.chunks_exact(4).map(Vec4::from_slice));
            }
        }
        staging.unmap();
        Ok(texels)
    }

    fn texture<'a>(&'a self, buffer: &'a FieldTexture) -> &'a wgpu::TextureView {
        &buffer.view
    }

    fn prepare(&mut self, program: &FieldProgram<'_>) -> Result<(), SimulationError> {
        let device = &self.ctx.device;
        let name = &program.config.name;
        let source = field_shader(program);

        let mut entries = vec![
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            sampled_entry(1),
            sampled_entry(2),
            wgpu::BindGroupLayoutEntry {
                binding: 3,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: FIELD_FORMAT,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            },
        ];
        let external = program.inputs.iter().filter(|i| i.field != program.field).count() as u32;
        entries.extend((0..external).map(|i| sampled_entry(FIRST_INPUT_BINDING + i)));

        let (compiled, error) = scoped(device, || {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("{} Update Shader", name)),
                source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
            });

            let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{} Bind Group Layout", name)),
                entries: &entries,
            });

            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("{} Pipeline Layout", name)),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&format!("{} Update Pipeline", name)),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });

            FieldPipeline {
                pipeline,
                bind_group_layout,
            }
        });

        if let Some(e) = error {
            return Err(SimulationError::InvalidRule {
                field: name.clone(),
                message: e.to_string(),
            });
        }

        log::debug!("Created update pipeline for '{}' (rule '{}')", name, program.rule.name());
        self.programs.insert(program.field, compiled);
        Ok(())
    }

    fn dispatch(&mut self, pass: &ComputePass<'_, FieldTexture>, uniforms: &StepUniforms) -> Result<(), StepError> {
        let program = self.programs.get(&pass.field).ok_or_else(|| {
            StepError::SubmissionFailed(format!("no pipeline prepared for field '{}'", pass.name))
        })?;
        let device = &self.ctx.device;
        let queue = &self.ctx.queue;

        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms.to_gpu()));

        let ((), error) = scoped(device, || {
            let mut entries = vec![
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&pass.previous.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&pass.default.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&pass.target.view),
                },
            ];
            entries.extend(
                pass.inputs
                    .iter()
                    .filter(|input| input.field != pass.field)
                    .enumerate()
                    .map(|(i, input)| wgpu::BindGroupEntry {
                        binding: FIRST_INPUT_BINDING + i as u32,
                        resource: wgpu::BindingResource::TextureView(&input.buffer.view),
                    }),
            );

            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{} Step Bind Group", pass.name)),
                layout: &program.bind_group_layout,
                entries: &entries,
            });

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Field Step Encoder"),
            });
            {
                let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(&format!("{} Step Pass", pass.name)),
                    timestamp_writes: None,
                });
                compute_pass.set_pipeline(&program.pipeline);
                compute_pass.set_bind_group(0, &bind_group, &[]);
                compute_pass.dispatch_workgroups(
                    workgroup_count(pass.resolution.width),
                    workgroup_count(pass.resolution.height),
                    1,
                );
            }
            queue.submit(Some(encoder.finish()));
        });

        match error {
            Some(e) => Err(StepError::SubmissionFailed(e.to_string())),
            None => Ok(()),
        }
    }
}

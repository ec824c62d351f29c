//! Fullscreen distortion pass driven by the motion texture.
//!
//! Reads the rendered scene and the current motion texture, offsets the scene
//! lookup by `-motion.xy * power` and optionally pixelates the motion lookup
//! and splits the color channels along the offset.
//!
//! The motion texture is GL-oriented (row 0 is the bottom of the screen), so
//! the fragment UV is flipped vertically before it touches the motion field and
//! flipped back before sampling the scene.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec4};

/// Per-frame parameters of the distortion pass.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct DistortionUniforms {
    pub power: f32,
    /// Viewport width / height.
    pub aspect: f32,
    /// Pixel-mode cell count along the vertical axis.
    pub pixel: f32,
    /// 1 when pixel mode is on
    pub pixel_mode: u32,
    /// 1 when RGB shift is on
    pub rgb_shift: u32,
    pub _pad: [u32; 3],
}

impl Default for DistortionUniforms {
    fn default() -> Self {
        Self {
            power: 0.3,
            aspect: 1.0,
            pixel: 20.0,
            pixel_mode: 0,
            rgb_shift: 1,
            _pad: [0; 3],
        }
    }
}

/// Snap a GL-oriented UV to the pixel-mode grid.
pub fn pixelate(uv: Vec2, aspect: f32, pixel: f32) -> Vec2 {
    let grid = Vec2::new(aspect * pixel, pixel);
    (uv * grid).floor() / grid
}

/// Scene lookup offsets for the red, green and blue channels.
pub fn distortion_offsets(motion: Vec4, power: f32, rgb_shift: bool) -> [Vec2; 3] {
    let distortion = -Vec2::new(motion.x, motion.y) * power;
    if rgb_shift {
        [distortion * 0.5, distortion * 0.75, distortion]
    } else {
        [distortion; 3]
    }
}

/// GPU resources for the distortion pass.
pub struct DistortionPass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
}

impl DistortionPass {
    /// Build the pipeline for a render target of `target_format`.
    pub fn new(device: &wgpu::Device, target_format: wgpu::TextureFormat) -> Self {
        // Sampler for the scene texture
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Distortion Scene Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Distortion Uniform Buffer"),
            size: std::mem::size_of::<DistortionUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Distortion Shader"),
            source: wgpu::ShaderSource::Wgsl(DISTORTION_SHADER.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Distortion Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Distortion Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Distortion Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            pipeline,
            bind_group_layout,
            sampler,
            uniform_buffer,
        }
    }

    /// Upload this frame's parameters.
    pub fn prepare(&self, queue: &wgpu::Queue, uniforms: &DistortionUniforms) {
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniforms));
    }

    /// Record the fullscreen draw into `encoder`.
    pub fn render(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        scene: &wgpu::TextureView,
        motion: &wgpu::TextureView,
        target: &wgpu::TextureView,
    ) {
        // Field views flip roles every step, so the bind group is per frame
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Distortion Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(scene),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(motion),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Distortion Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        render_pass.draw(0..3, 0..1);
    }
}

pub(crate) const DISTORTION_SHADER: &str = r#"
struct DistortionUniforms {
    power: f32,
    aspect: f32,
    pixel: f32,
    pixel_mode: u32,
    rgb_shift: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@group(0) @binding(0)
var scene: texture_2d<f32>;
@group(0) @binding(1)
var scene_sampler: sampler;
@group(0) @binding(2)
var motion: texture_2d<f32>;
@group(0) @binding(3)
var<uniform> uniforms: DistortionUniforms;

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 3>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(3.0, -1.0),
        vec2<f32>(-1.0, 3.0),
    );
    var uvs = array<vec2<f32>, 3>(
        vec2<f32>(0.0, 1.0),
        vec2<f32>(2.0, 1.0),
        vec2<f32>(0.0, -1.0),
    );

    var out: VertexOutput;
    out.clip_position = vec4<f32>(positions[vertex_index], 0.0, 1.0);
    out.uv = uvs[vertex_index];
    return out;
}

// GL-oriented uv -> scene texture
fn scene_at(gl_uv: vec2<f32>) -> vec4<f32> {
    return textureSampleLevel(scene, scene_sampler, vec2<f32>(gl_uv.x, 1.0 - gl_uv.y), 0.0);
}

fn motion_at(gl_uv: vec2<f32>) -> vec4<f32> {
    let size = textureDimensions(motion);
    let texel = min(vec2<u32>(floor(clamp(gl_uv, vec2<f32>(0.0), vec2<f32>(1.0)) * vec2<f32>(size))), size - vec2<u32>(1u));
    return textureLoad(motion, vec2<i32>(texel), 0);
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let uv = vec2<f32>(in.uv.x, 1.0 - in.uv.y);

    var st = uv;
    if (uniforms.pixel_mode != 0u) {
        let grid = vec2<f32>(uniforms.aspect * uniforms.pixel, uniforms.pixel);
        st = floor(uv * grid) / grid;
    }

    let distortion = -motion_at(st).xy * uniforms.power;
    let base = scene_at(uv + distortion);

    if (uniforms.rgb_shift == 0u) {
        return base;
    }

    let r = scene_at(uv + distortion * 0.5).r;
    let g = scene_at(uv + distortion * 0.75).g;
    return vec4<f32>(r, g, base.b, base.a);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distortion_shader_validates() {
        let module = naga::front::wgsl::parse_str(DISTORTION_SHADER).expect("parse");
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator.validate(&module).expect("distortion shader should be valid");
    }

    #[test]
    fn test_uniform_layout() {
        assert_eq!(std::mem::size_of::<DistortionUniforms>(), 32);
        let defaults = DistortionUniforms::default();
        assert_eq!(defaults.power, 0.3);
        assert_eq!(defaults.pixel, 20.0);
        assert_eq!(defaults.rgb_shift, 1);
    }

    #[test]
    fn test_offsets_point_against_motion() {
        let offsets = distortion_offsets(Vec4::new(0.5, -1.0, 0.2, 0.2), 0.4, false);
        assert_eq!(offsets, [Vec2::new(-0.2, 0.4); 3]);
    }

    #[test]
    fn test_rgb_shift_spreads_channels() {
        let [r, g, b] = distortion_offsets(Vec4::new(1.0, 0.0, 0.0, 0.0), 1.0, true);
        assert_eq!(r, Vec2::new(-0.5, 0.0));
        assert_eq!(g, Vec2::new(-0.75, 0.0));
        assert_eq!(b, Vec2::new(-1.0, 0.0));
    }

    #[test]
    fn test_pixelate_uses_aspect_grid() {
        let st = pixelate(Vec2::new(0.26, 0.26), 2.0, 4.0);
        // 8 columns, 4 rows
        assert_eq!(st, Vec2::new(0.25, 0.25));
        let st = pixelate(Vec2::new(0.1, 0.1), 2.0, 4.0);
        assert_eq!(st, Vec2::new(0.0, 0.0));
    }
}

//! The flowmap effect as a single post-processing pass.

use glam::Vec2;

use super::distortion::{DistortionPass, DistortionUniforms};
use super::{create_field_texture, FieldTexture, GpuContext, WgpuBackend};
use crate::driver::Flowmap;
use crate::field::Resolution;
use crate::settings::FlowmapSettings;
use crate::simulator::StepReport;

/// Distortion parameters for this frame. Power drops to zero when the effect
/// is inactive so the scene passes through untouched.
pub fn distortion_uniforms(settings: &FlowmapSettings, aspect: f32, active: bool) -> DistortionUniforms {
    DistortionUniforms {
        power: if active { settings.power } else { 0.0 },
        aspect,
        pixel: settings.pixel,
        pixel_mode: settings.pixel_mode as u32,
        rgb_shift: settings.rgb_shift as u32,
        _pad: [0; 3],
    }
}

/// Motion simulation plus the distortion draw that consumes it.
pub struct FlowmapPass {
    ctx: GpuContext,
    flowmap: Flowmap<WgpuBackend>,
    distortion: DistortionPass,
    /// Bound in place of the motion texture when no session exists.
    fallback: FieldTexture,
    aspect: f32,
}

impl FlowmapPass {
    /// Build the simulation at `width x height` and the distortion pipeline for
    /// `target_format`.
    pub fn new(
        ctx: GpuContext,
        settings: FlowmapSettings,
        width: u32,
        height: u32,
        target_format: wgpu::TextureFormat,
    ) -> Self {
        let backend_ctx = ctx.clone();
        let flowmap = Flowmap::new(settings, width, height, move || WgpuBackend::new(backend_ctx.clone()));
        let distortion = DistortionPass::new(&ctx.device, target_format);
        let fallback = create_field_texture(&ctx.device, "Flowmap Fallback Texture", Resolution::new(1, 1));

        Self {
            ctx,
            flowmap,
            distortion,
            fallback,
            aspect: aspect(width, height),
        }
    }

    /// Advance the motion field by one frame.
    pub fn update(&mut self, pointer_ndc: Option<Vec2>) -> Option<StepReport> {
        self.flowmap.frame(pointer_ndc)
    }

    /// Record the distortion of `scene` into `target`.
    pub fn render(&self, encoder: &mut wgpu::CommandEncoder, scene: &wgpu::TextureView, target: &wgpu::TextureView) {
        let uniforms = distortion_uniforms(self.flowmap.settings(), self.aspect, self.flowmap.is_active());
        self.distortion.prepare(&self.ctx.queue, &uniforms);

        let motion = self.flowmap.texture().unwrap_or(&self.fallback.view);
        self.distortion.render(&self.ctx.device, encoder, scene, motion, target);
    }

    /// Recreate the simulation for a new viewport size.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = aspect(width, height);
        self.flowmap.resize(width, height);
    }

    pub fn flowmap(&self) -> &Flowmap<WgpuBackend> {
        &self.flowmap
    }

    pub fn flowmap_mut(&mut self) -> &mut Flowmap<WgpuBackend> {
        &mut self.flowmap
    }
}

fn aspect(width: u32, height: u32) -> f32 {
    width as f32 / height.max(1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_effect_has_no_power() {
        let settings = FlowmapSettings::default();
        assert_eq!(distortion_uniforms(&settings, 1.5, true).power, 0.3);
        assert_eq!(distortion_uniforms(&settings, 1.5, false).power, 0.0);
    }

    #[test]
    fn test_flags_are_forwarded() {
        let settings = FlowmapSettings::default().with_pixel_mode(true).with_rgb_shift(false).with_pixel(30.0);
        let u = distortion_uniforms(&settings, 16.0 / 9.0, true);
        assert_eq!(u.pixel_mode, 1);
        assert_eq!(u.rgb_shift, 0);
        assert_eq!(u.pixel, 30.0);
        assert_eq!(u.aspect, 16.0 / 9.0);
    }

    #[test]
    fn test_aspect_handles_zero_height() {
        assert_eq!(aspect(1920, 1080), 1920.0 / 1080.0);
        assert_eq!(aspect(10, 0), 10.0);
    }
}

//! Per-step uniform values.
//!
//! [`StepUniforms`] is a plain `Copy` value handed to a step by value. The step
//! works on its own copy, so changing the caller's settings afterwards cannot
//! reach a step that is in flight or already done.

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

/// Smallest accepted influence range. `smoothstep(0, 0, d)` is undefined.
pub const MIN_RANGE: f32 = 1.0e-6;
/// Largest accepted influence range.
pub const MAX_RANGE: f32 = 0.5;

/// External inputs of one compute step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepUniforms {
    /// Pointer position in `[0, 1]²` screen space, `(0, 0)` when absent.
    pub pointer: Vec2,
    /// Influence radius in UV units, `(0, 0.5]`.
    pub range: f32,
    /// Blend weight toward the default state, `[0, 1]`.
    pub viscosity: f32,
    /// Index of the step being computed.
    pub frame: u32,
}

impl StepUniforms {
    /// Build uniforms, clamping `range` and `viscosity` into their domains.
    pub fn new(pointer: Vec2, range: f32, viscosity: f32) -> Self {
        Self {
            pointer,
            range: range.clamp(MIN_RANGE, MAX_RANGE),
            viscosity: viscosity.clamp(0.0, 1.0),
            frame: 0,
        }
    }

    /// Stamp the step index. The shader sees the low 32 bits, so the value
    /// wraps to 0 after `u32::MAX` steps.
    pub(crate) fn with_frame(mut self, frame: u64) -> Self {
        self.frame = (frame & u64::from(u32::MAX)) as u32;
        self
    }

    /// GPU layout of these values.
    pub fn to_gpu(&self) -> StepUniformsGpu {
        StepUniformsGpu {
            pointer: self.pointer.to_array(),
            influence_range: self.range,
            viscosity: self.viscosity,
            frame: self.frame,
            _pad: [0; 3],
        }
    }
}

impl Default for StepUniforms {
    fn default() -> Self {
        Self::new(Vec2::ZERO, 0.1, 0.04)
    }
}

/// Uniform buffer layout, must match [`WGSL_UNIFORMS`].
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct StepUniformsGpu {
    pub pointer: [f32; 2],
    pub influence_range: f32,
    pub viscosity: f32,
    pub frame: u32,
    pub _pad: [u32; 3],
}

/// WGSL declaration of the step uniforms.
pub(crate) const WGSL_UNIFORMS: &str = r#"struct StepUniforms {
    pointer: vec2<f32>,
    influence_range: f32,
    viscosity: f32,
    frame: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
};
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_layout_is_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<StepUniformsGpu>(), 32);
    }

    #[test]
    fn test_frame_wraps_to_low_bits() {
        let base = StepUniforms::default();
        assert_eq!(base.with_frame(7).frame, 7);
        assert_eq!(base.with_frame(u64::from(u32::MAX)).frame, u32::MAX);
        assert_eq!(base.with_frame((1u64 << 32) + 5).frame, 5);
    }

    #[test]
    fn test_new_clamps_domains() {
        let u = StepUniforms::new(Vec2::new(0.3, 0.7), 2.0, -0.5);
        assert_eq!(u.range, MAX_RANGE);
        assert_eq!(u.viscosity, 0.0);
        assert_eq!(u.pointer, Vec2::new(0.3, 0.7));

        let u = StepUniforms::new(Vec2::ZERO, 0.0, 3.0);
        assert_eq!(u.range, MIN_RANGE);
        assert_eq!(u.viscosity, 1.0);
    }

    #[test]
    fn test_uniforms_are_values() {
        let mut pointer = Vec2::new(0.2, 0.2);
        let snapshot = StepUniforms::new(pointer, 0.1, 0.5);
        pointer.x = 0.9;
        assert_eq!(snapshot.pointer.x, 0.2);
        assert_ne!(pointer, snapshot.pointer);
    }
}

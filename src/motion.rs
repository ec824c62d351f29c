//! The pointer-driven motion field.
//!
//! Lanes of each texel:
//! - `xy`: accumulated distortion vector, clamped to `[-1, 1]`
//! - `zw`: pointer position seen in the previous step
//!
//! Every step, texels within `range` of the pointer gain distortion
//! proportional to the pointer's movement since the previous step, weighted by
//! a smooth falloff. The whole field then blends toward its default state by
//! `viscosity`, and `zw` is overwritten with the current pointer everywhere so
//! that the next step can measure movement even at texels the pointer left.

use glam::{Vec2, Vec4, Vec4Swizzles};

use crate::rule::{lerp, smoothstep, Texel, UpdateRule};
use crate::uniforms::StepUniforms;

/// Name of the motion field in a session built by [`Simulator::motion`](crate::Simulator::motion).
pub const MOTION_FIELD: &str = "motionTexture";

/// Gain applied to pointer movement before it is accumulated.
pub const DISTORTION_GAIN: f32 = 5.0;

/// Update rule of the motion field. Reads only its own previous value.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotionRule;

impl MotionRule {
    /// Falloff weight of a texel at `uv`: 1 at the pointer, 0 at `range` and beyond.
    pub fn influence(uniforms: &StepUniforms, uv: Vec2) -> f32 {
        1.0 - smoothstep(0.0, uniforms.range, uniforms.pointer.distance(uv))
    }
}

impl UpdateRule for MotionRule {
    fn name(&self) -> &str {
        "motion"
    }

    fn wgsl(&self) -> String {
        format!(
            r#"
const DISTORTION_GAIN: f32 = {gain:.1};

fn lerp(original: vec2<f32>, evolving: vec2<f32>, alpha: f32) -> vec2<f32> {{
    return original * alpha + evolving * (1.0 - alpha);
}}

fn update(coord: vec2<u32>, uv: vec2<f32>, previous: vec4<f32>, default_value: vec4<f32>) -> vec4<f32> {{
    var current = previous;
    let influence = 1.0 - smoothstep(0.0, uniforms.influence_range, distance(uniforms.pointer, uv));

    if (0.0 < influence) {{
        let speed = uniforms.pointer - current.zw;
        let distortion = speed * influence * DISTORTION_GAIN;
        current = vec4<f32>(current.xy + distortion, current.zw);
    }}

    var result: vec4<f32>;
    let blended = lerp(default_value.xy, current.xy, uniforms.viscosity);
    let clamped = clamp(blended, vec2<f32>(-1.0), vec2<f32>(1.0));
    result = vec4<f32>(clamped, uniforms.pointer);
    return result;
}}
"#,
            gain = DISTORTION_GAIN
        )
    }

    fn evaluate(&self, texel: &Texel<'_>, uniforms: &StepUniforms) -> Vec4 {
        let mut current = texel.previous;

        let influence = Self::influence(uniforms, texel.uv);
        if influence > 0.0 {
            let speed = uniforms.pointer - current.zw();
            let distortion = speed * influence * DISTORTION_GAIN;
            current.x += distortion.x;
            current.y += distortion.y;
        }

        let blended = lerp(texel.default_value.xy(), current.xy(), uniforms.viscosity)
            .clamp(Vec2::splat(-1.0), Vec2::ONE);
        Vec4::new(blended.x, blended.y, uniforms.pointer.x, uniforms.pointer.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::UVec2;

    fn texel_at(uv: Vec2, previous: Vec4) -> Texel<'static> {
        Texel::new(UVec2::ZERO, uv, previous, Vec4::ZERO, &[])
    }

    #[test]
    fn test_influence_is_zero_at_range() {
        let uniforms = StepUniforms::new(Vec2::new(0.375, 0.125), 0.25, 0.5);
        assert_eq!(MotionRule::influence(&uniforms, Vec2::new(0.125, 0.125)), 0.0);
        assert_eq!(MotionRule::influence(&uniforms, uniforms.pointer), 1.0);
    }

    #[test]
    fn test_no_distortion_at_range_boundary() {
        // Pointer moved a long way, but the texel sits exactly on the falloff edge.
        let uniforms = StepUniforms::new(Vec2::new(0.375, 0.125), 0.25, 0.0);
        let previous = Vec4::new(0.0, 0.0, 0.9, 0.9);
        let out = MotionRule.evaluate(&texel_at(Vec2::new(0.125, 0.125), previous), &uniforms);
        assert_eq!(out.xy(), Vec2::ZERO);
    }

    #[test]
    fn test_pointer_is_always_remembered() {
        let uniforms = StepUniforms::new(Vec2::new(0.3, 0.7), 0.1, 0.04);
        let far = MotionRule.evaluate(&texel_at(Vec2::new(0.95, 0.05), Vec4::ONE), &uniforms);
        let near = MotionRule.evaluate(&texel_at(Vec2::new(0.3, 0.7), Vec4::ZERO), &uniforms);
        assert_eq!(far.zw(), Vec2::new(0.3, 0.7));
        assert_eq!(near.zw(), Vec2::new(0.3, 0.7));
    }

    #[test]
    fn test_viscosity_weights_default_state() {
        // No influence: the result is default * viscosity + previous * (1 - viscosity).
        let uniforms = StepUniforms::new(Vec2::ZERO, 0.1, 0.25);
        let texel = Texel::new(
            UVec2::ZERO,
            Vec2::new(0.9, 0.9),
            Vec4::new(0.8, -0.4, 0.0, 0.0),
            Vec4::new(0.4, 0.4, 0.0, 0.0),
            &[],
        );
        let out = MotionRule.evaluate(&texel, &uniforms);
        assert!((out.x - (0.4 * 0.25 + 0.8 * 0.75)).abs() < 1e-6);
        assert!((out.y - (0.4 * 0.25 - 0.4 * 0.75)).abs() < 1e-6);
    }

    #[test]
    fn test_result_is_clamped() {
        let uniforms = StepUniforms::new(Vec2::ONE, 0.5, 0.0);
        let out = MotionRule.evaluate(&texel_at(Vec2::ONE, Vec4::ZERO), &uniforms);
        assert_eq!(out.xy(), Vec2::ONE);

        let uniforms = StepUniforms::new(Vec2::ZERO, 0.5, 0.0);
        let out = MotionRule.evaluate(&texel_at(Vec2::ZERO, Vec4::new(0.0, 0.0, 1.0, 1.0)), &uniforms);
        assert_eq!(out.xy(), Vec2::splat(-1.0));
    }

    #[test]
    fn test_wgsl_defines_update() {
        let src = MotionRule.wgsl();
        assert!(src.contains("fn update("));
        assert!(src.contains("const DISTORTION_GAIN: f32 = 5.0;"));
    }
}

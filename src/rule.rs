//! Per-texel update rules.
//!
//! A rule is a pure function from the previous frame to the next one. It is
//! written twice: as WGSL for [`WgpuBackend`](crate::WgpuBackend) and as Rust
//! for [`ReferenceBackend`](crate::ReferenceBackend). Both forms receive the
//! same inputs and must agree within float tolerance.
//!
//! # WGSL contract
//!
//! [`UpdateRule::wgsl`] must define
//!
//! ```text
//! fn update(coord: vec2<u32>, uv: vec2<f32>, previous: vec4<f32>, default_value: vec4<f32>) -> vec4<f32>
//! ```
//!
//! Inside it the rule may use `uniforms.pointer`, `uniforms.influence_range`,
//! `uniforms.viscosity`, `uniforms.frame`, and one `read_<name>(uv)` accessor
//! per declared dependency (`<name>` sanitized to a WGSL identifier).

use glam::{UVec2, Vec2, Vec4};

use crate::field::Resolution;
use crate::uniforms::StepUniforms;

/// Rust-side view of one dependency's previous-frame buffer.
#[derive(Debug, Clone, Copy)]
pub struct InputView<'a> {
    pub name: &'a str,
    pub resolution: Resolution,
    pub texels: &'a [Vec4],
}

impl InputView<'_> {
    /// Nearest-texel lookup with repeat wrapping, matching `read_<name>` in WGSL.
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        let x = wrap_index(uv.x, self.resolution.width);
        let y = wrap_index(uv.y, self.resolution.height);
        self.texels[self.resolution.index(x, y)]
    }
}

fn wrap_index(coord: f32, size: u32) -> u32 {
    let wrapped = coord - coord.floor();
    ((wrapped * size as f32).floor() as u32).min(size.saturating_sub(1))
}

/// Everything a rule may observe for one texel.
#[derive(Debug, Clone, Copy)]
pub struct Texel<'a> {
    /// Integer texel coordinate.
    pub coord: UVec2,
    /// Texel-center UV in `[0, 1]²`.
    pub uv: Vec2,
    /// This field's value at the same texel in the previous frame.
    pub previous: Vec4,
    /// This field's default state at the same texel.
    pub default_value: Vec4,
    pub(crate) inputs: &'a [InputView<'a>],
}

impl<'a> Texel<'a> {
    pub fn new(coord: UVec2, uv: Vec2, previous: Vec4, default_value: Vec4, inputs: &'a [InputView<'a>]) -> Self {
        Self { coord, uv, previous, default_value, inputs }
    }

    /// Previous-frame value of a declared dependency at `uv`.
    ///
    /// Returns `None` if `name` is not a declared dependency.
    pub fn read(&self, name: &str, uv: Vec2) -> Option<Vec4> {
        self.inputs.iter().find(|i| i.name == name).map(|i| i.sample(uv))
    }
}

/// A per-texel update rule.
pub trait UpdateRule: Send + Sync {
    /// Short name for labels and logs.
    fn name(&self) -> &str;

    /// WGSL source defining `fn update(...)`. See the module docs.
    fn wgsl(&self) -> String;

    /// Evaluate the rule for one texel.
    fn evaluate(&self, texel: &Texel<'_>, uniforms: &StepUniforms) -> Vec4;
}

/// Cubic Hermite step, identical to WGSL/GLSL `smoothstep`.
#[inline]
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// `a * t + b * (1 - t)`.
///
/// Note the operand order: `t` weights `a`, not `b`.
#[inline]
pub fn lerp(a: Vec2, b: Vec2, t: f32) -> Vec2 {
    a * t + b * (1.0 - t)
}

//! The device seam between the simulator and whatever executes rules.
//!
//! A backend owns raw buffers and knows how to run one field's update rule
//! over them. It never decides *which* buffer is current: that bookkeeping
//! lives in [`crate::store`], and the simulator hands the backend explicit
//! previous/target buffers for every dispatch.

use glam::Vec4;

use crate::error::{SimulationError, StepError};
use crate::field::{FieldConfig, FieldId, Resolution};
use crate::rule::UpdateRule;
use crate::uniforms::StepUniforms;

/// What a buffer is used for. Only affects labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    Ping,
    Pong,
    Default,
}

impl BufferRole {
    pub fn label(self) -> &'static str {
        match self {
            BufferRole::Ping => "Ping",
            BufferRole::Pong => "Pong",
            BufferRole::Default => "Default",
        }
    }
}

/// A dependency as seen when compiling a field's program.
#[derive(Debug, Clone)]
pub struct ProgramInput<'a> {
    pub field: FieldId,
    pub config: &'a FieldConfig,
}

/// Everything needed to prepare a field's program ahead of the first step.
pub struct FieldProgram<'a> {
    pub field: FieldId,
    pub config: &'a FieldConfig,
    pub rule: &'a dyn UpdateRule,
    /// Declared dependencies, in declaration order. Includes the field itself
    /// if it reads its own history.
    pub inputs: Vec<ProgramInput<'a>>,
}

/// A dependency bound for one dispatch: always another field's *current* buffer.
pub struct PassInput<'a, B> {
    pub field: FieldId,
    pub name: &'a str,
    pub resolution: Resolution,
    pub buffer: &'a B,
}

/// One field's share of a compute step.
pub struct ComputePass<'a, B> {
    pub field: FieldId,
    pub name: &'a str,
    pub rule: &'a dyn UpdateRule,
    pub resolution: Resolution,
    /// The field's current buffer.
    pub previous: &'a B,
    /// The field's default snapshot.
    pub default: &'a B,
    /// The field's next buffer. Never bound for reading.
    pub target: &'a B,
    pub inputs: Vec<PassInput<'a, B>>,
}

/// Executes update rules over device buffers.
pub trait ComputeBackend {
    /// A single 2D `vec4<f32>` buffer.
    type Buffer;
    /// Read-only view of a buffer, handed to consumers outside the simulation.
    type Texture<'a>
    where
        Self: 'a;

    /// Largest width or height a buffer may have.
    fn max_texture_dimension(&self) -> u32;

    /// Allocate a zero-initialized buffer.
    fn create_buffer(
        &mut self,
        field: &str,
        role: BufferRole,
        resolution: Resolution,
    ) -> Result<Self::Buffer, SimulationError>;

    /// Overwrite a buffer with row-major texels.
    fn upload(
        &mut self,
        buffer: &Self::Buffer,
        resolution: Resolution,
        texels: &[Vec4],
    ) -> Result<(), SimulationError>;

    /// Read a buffer back as row-major texels.
    fn read(&self, buffer: &Self::Buffer, resolution: Resolution) -> Result<Vec<Vec4>, SimulationError>;

    /// Read-only view of a buffer.
    fn texture<'a>(&'a self, buffer: &'a Self::Buffer) -> Self::Texture<'a>;

    /// Compile whatever the backend needs to run `program` later.
    fn prepare(&mut self, program: &FieldProgram<'_>) -> Result<(), SimulationError>;

    /// Run one field's rule over every texel of `pass.target`.
    ///
    /// On error the target's contents are unspecified; the caller must not
    /// promote it to current.
    fn dispatch(&mut self, pass: &ComputePass<'_, Self::Buffer>, uniforms: &StepUniforms) -> Result<(), StepError>;
}

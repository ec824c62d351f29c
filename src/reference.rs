//! Host-memory backend that evaluates the Rust form of each rule.
//!
//! `ReferenceBackend` runs the exact same stepping protocol as
//! [`WgpuBackend`](crate::WgpuBackend): buffers are allocated by the store,
//! dispatches receive explicit previous/target buffers, and the simulator
//! decides when to swap. It exists so the engine can be verified without a GPU
//! and so GPU output has something to be compared against. It is never
//! substituted for the GPU at runtime.

use glam::{UVec2, Vec4};

use crate::backend::{BufferRole, ComputeBackend, ComputePass, FieldProgram};
use crate::error::{SimulationError, StepError};
use crate::field::{FieldId, Resolution};
use crate::rule::{InputView, Texel};
use crate::uniforms::StepUniforms;

/// Largest dimension accepted by default, matching common desktop GPUs.
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

/// Index into the backend's buffer arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostBuffer(usize);

#[derive(Debug)]
struct HostStorage {
    label: String,
    resolution: Resolution,
    texels: Vec<Vec4>,
}

/// Read-only view of a host buffer.
#[derive(Debug, Clone, Copy)]
pub struct HostTexture<'a> {
    pub resolution: Resolution,
    pub texels: &'a [Vec4],
}

impl HostTexture<'_> {
    /// Texel `(x, y)`; row 0 is the `v ≈ 0` edge.
    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        self.texels[self.resolution.index(x, y)]
    }
}

/// Deterministic CPU executor for update rules.
#[derive(Debug)]
pub struct ReferenceBackend {
    storage: Vec<HostStorage>,
    prepared: Vec<FieldId>,
    max_dimension: u32,
    pending_failures: usize,
}

impl Default for ReferenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceBackend {
    pub fn new() -> Self {
        Self {
            storage: Vec::new(),
            prepared: Vec::new(),
            max_dimension: DEFAULT_MAX_DIMENSION,
            pending_failures: 0,
        }
    }

    /// Emulate a device with a smaller texture limit.
    pub fn with_max_texture_dimension(mut self, limit: u32) -> Self {
        self.max_dimension = limit.max(1);
        self
    }

    /// Make the next `count` dispatches fail as if the device rejected them.
    pub fn inject_dispatch_failures(&mut self, count: usize) {
        self.pending_failures += count;
    }

    /// Number of buffers allocated so far.
    pub fn buffer_count(&self) -> usize {
        self.storage.len()
    }

    /// Debug label of a buffer, e.g. `"motionTexture Ping"`.
    pub fn label(&self, buffer: &HostBuffer) -> &str {
        &self.storage[buffer.0].label
    }
}

impl ComputeBackend for ReferenceBackend {
    type Buffer = HostBuffer;
    type Texture<'a> = HostTexture<'a>;

    fn max_texture_dimension(&self) -> u32 {
        self.max_dimension
    }

    fn create_buffer(
        &mut self,
        field: &str,
        role: BufferRole,
        resolution: Resolution,
    ) -> Result<HostBuffer, SimulationError> {
        self.storage.push(HostStorage {
            label: format!("{} {}", field, role.label()),
            resolution,
            texels: vec![Vec4::ZERO; resolution.texel_count()],
        });
        Ok(HostBuffer(self.storage.len() - 1))
    }

    fn upload(&mut self, buffer: &HostBuffer, resolution: Resolution, texels: &[Vec4]) -> Result<(), SimulationError> {
        let storage = &mut self.storage[buffer.0];
        debug_assert_eq!(storage.resolution, resolution);
        storage.texels.copy_from_slice(texels);
        Ok(())
    }

    fn read(&self, buffer: &HostBuffer, _resolution: Resolution) -> Result<Vec<Vec4>, SimulationError> {
        Ok(self.storage[buffer.0].texels.clone())
    }

    fn texture<'a>(&'a self, buffer: &'a HostBuffer) -> HostTexture<'a> {
        let storage = &self.storage[buffer.0];
        HostTexture {
            resolution: storage.resolution,
            texels: &storage.texels,
        }
    }

    fn prepare(&mut self, program: &FieldProgram<'_>) -> Result<(), SimulationError> {
        log::trace!(
            "Prepared reference program for '{}' ({} inputs)",
            program.config.name,
            program.inputs.len()
        );
        if !self.prepared.contains(&program.field) {
            self.prepared.push(program.field);
        }
        Ok(())
    }

    fn dispatch(&mut self, pass: &ComputePass<'_, HostBuffer>, uniforms: &StepUniforms) -> Result<(), StepError> {
        if self.pending_failures > 0 {
            self.pending_failures -= 1;
            return Err(StepError::SubmissionFailed(format!(
                "injected failure for field '{}'",
                pass.name
            )));
        }
        if !self.prepared.contains(&pass.field) {
            return Err(StepError::SubmissionFailed(format!(
                "field '{}' was dispatched before being prepared",
                pass.name
            )));
        }

        let resolution = pass.resolution;
        let previous = &self.storage[pass.previous.0].texels;
        let default = &self.storage[pass.default.0].texels;
        let inputs: Vec<InputView<'_>> = pass
            .inputs
            .iter()
            .map(|input| InputView {
                name: input.name,
                resolution: input.resolution,
                texels: &self.storage[input.buffer.0].texels,
            })
            .collect();

        let mut output = Vec::with_capacity(resolution.texel_count());
        for y in 0..resolution.height {
            for x in 0..resolution.width {
                let index = resolution.index(x, y);
                let texel = Texel::new(
                    UVec2::new(x, y),
                    resolution.uv(x, y),
                    previous[index],
                    default[index],
                    &inputs,
                );
                output.push(pass.rule.evaluate(&texel, uniforms));
            }
        }

        self.storage[pass.target.0].texels = output;
        Ok(())
    }
}

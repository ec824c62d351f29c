//! # flowmap - pointer-driven motion distortion on the GPU
//!
//! A small iterative simulation engine that advances a 2D motion texture once
//! per frame from the pointer position, plus the post-processing pass that
//! turns that texture into a screen-space distortion.
//!
//! ## Quick Start
//!
//! ```ignore
//! use flowmap::prelude::*;
//!
//! let ctx = GpuContext::headless()?;
//! let mut pass = FlowmapPass::new(ctx, FlowmapSettings::default(), 1280, 720, surface_format);
//!
//! // every frame
//! pass.update(Some(pointer_ndc));
//! pass.render(&mut encoder, &scene_view, &target_view);
//! ```
//!
//! ## Core Concepts
//!
//! ### Fields
//!
//! A field is a named 2D grid of `vec4<f32>` values with a default state and
//! an update rule. Each field owns two buffers: the *current* one holds the
//! last completed frame, the *next* one receives the frame being computed.
//!
//! ### Rules
//!
//! An [`UpdateRule`] computes a texel of the next frame from the previous frame
//! of its own field, its default state, the previous frame of any declared
//! dependencies, and the [`StepUniforms`] of the step. The shipped rule is
//! [`MotionRule`]:
//!
//! - texels near the pointer gain distortion proportional to pointer movement
//! - everything blends back toward the default state by `viscosity`
//! - `zw` remembers the pointer for the next frame
//!
//! ### Dependencies
//!
//! Fields declare which fields they read. A field reading itself is always
//! allowed; a cycle between different fields is rejected when the session is
//! built. See [`graph`].
//!
//! ### Backends
//!
//! [`WgpuBackend`] runs rules as compute shaders. [`ReferenceBackend`] runs the
//! Rust form of the same rules on the CPU for verification.
//!
//! ## Logging
//!
//! The crate logs through the `log` facade and never installs a logger.

pub mod backend;
mod driver;
pub mod error;
pub mod field;
mod gpu;
pub mod graph;
pub mod motion;
pub mod reference;
pub mod rule;
pub mod settings;
pub mod shader;
mod simulator;
pub mod store;
mod uniforms;

pub use backend::{BufferRole, ComputeBackend};
pub use driver::{normalize_pointer, Flowmap};
pub use error::{GpuError, SettingsError, SimulationError, StepError};
pub use field::{DefaultState, FieldConfig, FieldId, Resolution};
pub use glam::{Vec2, Vec4};
pub use gpu::{
    distortion_offsets, distortion_uniforms, pixelate, DistortionPass, DistortionUniforms, FieldTexture,
    FlowmapPass, GpuContext, WgpuBackend, FIELD_FORMAT,
};
pub use motion::{MotionRule, MOTION_FIELD};
pub use reference::{HostBuffer, HostTexture, ReferenceBackend};
pub use rule::{Texel, UpdateRule};
pub use settings::FlowmapSettings;
pub use simulator::{Simulator, SimulatorBuilder, StepReport};
pub use uniforms::{StepUniforms, StepUniformsGpu, MAX_RANGE, MIN_RANGE};

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use flowmap::prelude::*;
/// ```
pub mod prelude {
    pub use crate::driver::{normalize_pointer, Flowmap};
    pub use crate::field::{DefaultState, FieldConfig, Resolution};
    pub use crate::gpu::{FlowmapPass, GpuContext, WgpuBackend};
    pub use crate::motion::{MotionRule, MOTION_FIELD};
    pub use crate::reference::ReferenceBackend;
    pub use crate::rule::{Texel, UpdateRule};
    pub use crate::settings::FlowmapSettings;
    pub use crate::simulator::{Simulator, StepReport};
    pub use crate::uniforms::StepUniforms;
    pub use crate::{Vec2, Vec4};
}

//! 2D simulation fields.
//!
//! A field is a named grid of 4-lane `f32` values that is advanced once per
//! step by its update rule. Each field owns a pair of buffers on the device
//! (see [`crate::store`]) and an immutable snapshot of its default state,
//! which rules may read every frame.
//!
//! # Example
//!
//! ```ignore
//! let field = FieldConfig::new("motionTexture", Resolution::new(1280, 720))
//!     .with_default(DefaultState::Zero);
//! ```

use glam::Vec4;
use image::Rgba32FImage;

use crate::error::SimulationError;

/// Dense index of a field inside one simulation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub(crate) usize);

impl FieldId {
    /// Position of the field in declaration order.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Size of a field in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total number of texels.
    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Row-major index of texel `(x, y)`.
    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Texel-center UV of `(x, y)`. Row 0 sits at `v` close to 0.
    #[inline]
    pub fn uv(&self, x: u32, y: u32) -> glam::Vec2 {
        glam::Vec2::new(
            (x as f32 + 0.5) / self.width as f32,
            (y as f32 + 0.5) / self.height as f32,
        )
    }

    /// Memory size in bytes of one `Rgba32Float` buffer.
    pub fn memory_size(&self) -> usize {
        self.texel_count() * std::mem::size_of::<[f32; 4]>()
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new(width, height)
    }
}

/// Value of a field at time zero.
#[derive(Clone, Debug, Default)]
pub enum DefaultState {
    /// Every texel is `(0, 0, 0, 0)`.
    #[default]
    Zero,
    /// Every texel holds the same value.
    Uniform(Vec4),
    /// Explicit per-texel values. Must match the field resolution.
    ///
    /// Image row 0 is texel row 0 (the `v ≈ 0` edge).
    Image(Rgba32FImage),
}

impl DefaultState {
    /// Expand into row-major texels for a field of `resolution`.
    pub fn to_texels(&self, field: &str, resolution: Resolution) -> Result<Vec<Vec4>, SimulationError> {
        match self {
            DefaultState::Zero => Ok(vec![Vec4::ZERO; resolution.texel_count()]),
            DefaultState::Uniform(value) => Ok(vec![*value; resolution.texel_count()]),
            DefaultState::Image(image) => {
                if image.dimensions() != (resolution.width, resolution.height) {
                    return Err(SimulationError::DefaultStateMismatch {
                        field: field.to_string(),
                        expected: (resolution.width, resolution.height),
                        actual: image.dimensions(),
                    });
                }
                Ok(image_texels(image))
            }
        }
    }
}

/// Row-major texels of `image`. Image row 0 is texel row 0.
pub(crate) fn image_texels(image: &Rgba32FImage) -> Vec<Vec4> {
    image.pixels().map(|p| Vec4::from_array(p.0)).collect()
}

/// Field name as a WGSL identifier suffix: non-alphanumeric characters become `_`.
///
/// Distinct names may map to the same identifier, so the graph compares
/// names in this form.
pub(crate) fn wgsl_ident(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Configuration for a single field.
#[derive(Clone, Debug)]
pub struct FieldConfig {
    /// Unique name, used for dependency lookups and WGSL accessors.
    pub name: String,
    /// Grid size, fixed for the lifetime of the session.
    pub resolution: Resolution,
    /// Value at time zero; also the rest state rules blend toward.
    pub default_state: DefaultState,
}

impl FieldConfig {
    /// Create a zero-initialized field.
    pub fn new(name: impl Into<String>, resolution: impl Into<Resolution>) -> Self {
        Self {
            name: name.into(),
            resolution: resolution.into(),
            default_state: DefaultState::Zero,
        }
    }

    /// Set the default state.
    pub fn with_default(mut self, default_state: DefaultState) -> Self {
        self.default_state = default_state;
        self
    }

    /// Name as a WGSL identifier suffix.
    pub(crate) fn wgsl_ident(&self) -> String {
        wgsl_ident(&self.name)
    }
}

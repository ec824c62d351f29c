//! Tunables of the flowmap effect.
//!
//! Settings are plain data owned by the driver. They are read once per frame
//! and turned into a [`StepUniforms`] value for the simulation and a
//! [`DistortionUniforms`](crate::DistortionUniforms) value for the distortion
//! pass, so editing them never touches a step that was already computed.
//!
//! Settings can be stored as pretty-printed JSON:
//!
//! ```ignore
//! let settings = FlowmapSettings::default().with_power(0.45);
//! settings.save("flowmap.json")?;
//! let loaded = FlowmapSettings::load("flowmap.json")?;
//! ```

use std::fs;
use std::path::Path;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::uniforms::{StepUniforms, MAX_RANGE, MIN_RANGE};

/// Largest accepted distortion power.
pub const MAX_POWER: f32 = 1.0;

/// User-facing parameters of the effect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowmapSettings {
    /// When false, no simulation step runs and the pass draws the scene unchanged.
    pub enabled: bool,
    /// Scale of the UV offset applied by the distortion pass.
    pub power: f32,
    /// Pointer influence radius in UV units.
    pub range: f32,
    /// Weight of the default state in each step's blend.
    pub viscosity: f32,
    /// Quantize the motion lookup to a coarse grid.
    pub pixel_mode: bool,
    /// Grid cells along the vertical axis in pixel mode.
    pub pixel: f32,
    /// Split color channels along the distortion.
    pub rgb_shift: bool,
}

impl Default for FlowmapSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            power: 0.3,
            range: 0.1,
            viscosity: 0.04,
            pixel_mode: false,
            pixel: 20.0,
            rgb_shift: true,
        }
    }
}

impl FlowmapSettings {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the distortion power (clamped to `0.0..=1.0`).
    pub fn with_power(mut self, power: f32) -> Self {
        self.power = power.clamp(0.0, MAX_POWER);
        self
    }

    /// Set the influence range (clamped to `(0, 0.5]`).
    pub fn with_range(mut self, range: f32) -> Self {
        self.range = range.clamp(MIN_RANGE, MAX_RANGE);
        self
    }

    /// Set the viscosity (clamped to `0.0..=1.0`).
    pub fn with_viscosity(mut self, viscosity: f32) -> Self {
        self.viscosity = viscosity.clamp(0.0, 1.0);
        self
    }

    pub fn with_pixel_mode(mut self, pixel_mode: bool) -> Self {
        self.pixel_mode = pixel_mode;
        self
    }

    /// Set the pixel-mode grid size (at least 1).
    pub fn with_pixel(mut self, pixel: f32) -> Self {
        self.pixel = pixel.max(1.0);
        self
    }

    pub fn with_rgb_shift(mut self, rgb_shift: bool) -> Self {
        self.rgb_shift = rgb_shift;
        self
    }

    /// Clamp every numeric field into its domain.
    pub fn sanitized(self) -> Self {
        let (power, range, viscosity, pixel) = (self.power, self.range, self.viscosity, self.pixel);
        self.with_power(power)
            .with_range(range)
            .with_viscosity(viscosity)
            .with_pixel(pixel)
    }

    /// Uniforms of one simulation step at `pointer`.
    pub fn uniforms(&self, pointer: Vec2) -> StepUniforms {
        StepUniforms::new(pointer, self.range, self.viscosity)
    }

    /// Write the settings as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Read settings from JSON. Missing keys take their defaults and values
    /// outside their domain are clamped.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let json = fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&json)?;
        Ok(settings.sanitized())
    }
}

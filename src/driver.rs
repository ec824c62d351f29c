//! Per-frame driver of the motion simulation.
//!
//! [`Flowmap`] is what a render loop talks to. Once per frame it normalizes
//! the pointer, snapshots the settings into step uniforms and runs exactly one
//! compute step. It owns the session and rebuilds it when the viewport size
//! changes. If the device cannot hold the motion field, the effect switches
//! itself off instead of failing the host.

use glam::Vec2;

use crate::backend::ComputeBackend;
use crate::error::SimulationError;
use crate::field::Resolution;
use crate::settings::FlowmapSettings;
use crate::simulator::{Simulator, StepReport};

/// Map a pointer in normalized device coordinates to `[0, 1]²`.
///
/// An absent pointer and the exact NDC origin both mean "no pointer yet" and
/// map to `(0, 0)`, not to the screen center.
pub fn normalize_pointer(ndc: Option<Vec2>) -> Vec2 {
    match ndc {
        None => Vec2::ZERO,
        Some(p) if p == Vec2::ZERO => Vec2::ZERO,
        Some(p) => ((p + Vec2::ONE) * 0.5).clamp(Vec2::ZERO, Vec2::ONE),
    }
}

/// Owns the motion simulation of one viewport.
pub struct Flowmap<B: ComputeBackend> {
    settings: FlowmapSettings,
    simulator: Option<Simulator<B>>,
    make_backend: Box<dyn FnMut() -> B>,
    resolution: Resolution,
    last_error: Option<SimulationError>,
}

impl<B: ComputeBackend> Flowmap<B> {
    /// Create the driver and its first session.
    ///
    /// `make_backend` is called again every time the session is rebuilt.
    pub fn new(
        settings: FlowmapSettings,
        width: u32,
        height: u32,
        make_backend: impl FnMut() -> B + 'static,
    ) -> Self {
        let mut flowmap = Self {
            settings,
            simulator: None,
            make_backend: Box::new(make_backend),
            resolution: Resolution::new(width, height),
            last_error: None,
        };
        flowmap.rebuild();
        flowmap
    }

    fn rebuild(&mut self) {
        // Free the old buffers before allocating new ones
        self.simulator = None;
        let backend = (self.make_backend)();
        match Simulator::motion(backend, self.resolution.width, self.resolution.height) {
            Ok(sim) => {
                log::info!(
                    "Flowmap session ready at {}x{}",
                    self.resolution.width,
                    self.resolution.height
                );
                self.simulator = Some(sim);
                self.last_error = None;
            }
            Err(e) => {
                log::warn!("Flowmap effect disabled: {}", e);
                self.last_error = Some(e);
            }
        }
    }

    /// Run this frame's step. Returns `None` when the effect is off.
    pub fn frame(&mut self, pointer_ndc: Option<Vec2>) -> Option<StepReport> {
        if !self.settings.enabled {
            return None;
        }
        let uniforms = self.settings.uniforms(normalize_pointer(pointer_ndc));
        let sim = self.simulator.as_mut()?;
        Some(sim.step(uniforms))
    }

    /// The motion texture, if a session exists.
    pub fn texture(&self) -> Option<B::Texture<'_>> {
        self.simulator.as_ref().map(|sim| sim.texture())
    }

    /// Rebuild the session for a new viewport size.
    ///
    /// Motion state does not survive a resize. Resizing to the current size is
    /// a no-op unless the previous build failed.
    pub fn resize(&mut self, width: u32, height: u32) {
        let resolution = Resolution::new(width, height);
        if resolution == self.resolution && self.simulator.is_some() {
            return;
        }
        self.resolution = resolution;
        self.rebuild();
    }

    pub fn settings(&self) -> &FlowmapSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut FlowmapSettings {
        &mut self.settings
    }

    /// True when enabled and a session exists.
    pub fn is_active(&self) -> bool {
        self.settings.enabled && self.simulator.is_some()
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn simulator(&self) -> Option<&Simulator<B>> {
        self.simulator.as_ref()
    }

    pub fn simulator_mut(&mut self) -> Option<&mut Simulator<B>> {
        self.simulator.as_mut()
    }

    /// Why the last session build failed, if it did.
    pub fn last_error(&self) -> Option<&SimulationError> {
        self.last_error.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceBackend;
    use glam::Vec4;

    fn reference(limit: u32) -> impl FnMut() -> ReferenceBackend {
        move || ReferenceBackend::new().with_max_texture_dimension(limit)
    }

    #[test]
    fn test_pointer_normalization() {
        assert_eq!(normalize_pointer(None), Vec2::ZERO);
        assert_eq!(normalize_pointer(Some(Vec2::ZERO)), Vec2::ZERO);
        assert_eq!(normalize_pointer(Some(Vec2::ONE)), Vec2::ONE);
        assert_eq!(normalize_pointer(Some(Vec2::splat(-1.0))), Vec2::ZERO);
        assert_eq!(normalize_pointer(Some(Vec2::new(0.0, 0.5))), Vec2::new(0.5, 0.75));
    }

    #[test]
    fn test_frame_runs_one_step() {
        let mut flowmap = Flowmap::new(FlowmapSettings::default(), 8, 8, reference(64));
        assert!(flowmap.is_active());

        let report = flowmap.frame(Some(Vec2::new(0.0, 0.5))).unwrap();
        assert_eq!(report.frame, 1);
        let texture = flowmap.texture().unwrap();
        assert_eq!(texture.get(0, 0).z, 0.5);
        assert_eq!(texture.get(0, 0).w, 0.75);
    }

    #[test]
    fn test_unset_pointer_is_origin() {
        let mut flowmap = Flowmap::new(FlowmapSettings::default(), 4, 4, reference(64));
        flowmap.frame(None);
        flowmap.frame(Some(Vec2::ZERO));
        let texture = flowmap.texture().unwrap();
        assert!(texture.texels.iter().all(|t| *t == Vec4::ZERO));
    }

    #[test]
    fn test_disabled_effect_skips_compute() {
        let settings = FlowmapSettings::default().with_enabled(false);
        let mut flowmap = Flowmap::new(settings, 4, 4, reference(64));
        assert!(flowmap.frame(Some(Vec2::ONE)).is_none());
        assert_eq!(flowmap.simulator().map(|s| s.frame()), Some(0));

        flowmap.settings_mut().enabled = true;
        assert!(flowmap.frame(Some(Vec2::ONE)).is_some());
    }

    #[test]
    fn test_exhausted_device_disables_effect() {
        let mut flowmap = Flowmap::new(FlowmapSettings::default(), 32, 18, reference(16));
        assert!(!flowmap.is_active());
        assert!(flowmap.texture().is_none());
        assert!(flowmap.frame(Some(Vec2::ONE)).is_none());
        assert!(matches!(
            flowmap.last_error(),
            Some(SimulationError::ResourceExhausted { limit: 16, .. })
        ));

        flowmap.resize(16, 9);
        assert!(flowmap.is_active());
        assert!(flowmap.last_error().is_none());
    }

    #[test]
    fn test_resize_recreates_session() {
        let mut flowmap = Flowmap::new(FlowmapSettings::default(), 4, 4, reference(64));
        flowmap.frame(Some(Vec2::new(0.2, 0.2)));
        flowmap.frame(Some(Vec2::new(0.3, 0.2)));

        flowmap.resize(4, 4);
        assert_eq!(flowmap.simulator().unwrap().frame(), 2);

        flowmap.resize(8, 2);
        let sim = flowmap.simulator().unwrap();
        assert_eq!(sim.frame(), 0);
        assert_eq!(sim.resolution(), Resolution::new(8, 2));
        assert!(sim.texture().texels.iter().all(|t| *t == Vec4::ZERO));
    }
}

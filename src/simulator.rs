//! Simulation sessions and the per-frame compute step.
//!
//! A [`Simulator`] owns every field of a session, the dependency graph that
//! orders them, the double-buffered store, and the backend that runs rules.
//! One call to [`Simulator::step`] advances every field by exactly one frame:
//!
//! 1. each field, in evaluation order, reads the *current* buffers of itself,
//!    its default snapshot and its dependencies, and writes its *next* buffer
//! 2. once every field was dispatched, each field whose dispatch succeeded
//!    swaps current and next
//!
//! Because swaps wait for the whole order, no rule ever observes a value
//! written in the same step.
//!
//! # Example
//!
//! ```ignore
//! use flowmap::{ReferenceBackend, Simulator};
//! use glam::Vec2;
//!
//! let mut sim = Simulator::motion(ReferenceBackend::new(), 320, 180)?;
//! sim.compute(Vec2::new(0.5, 0.5), 0.1, 0.04);
//! let motion = sim.texture();
//! ```

use glam::{Vec2, Vec4};
use image::{Rgba, Rgba32FImage};

use crate::backend::{ComputeBackend, ComputePass, FieldProgram, PassInput, ProgramInput};
use crate::error::SimulationError;
use crate::field::{FieldConfig, FieldId, Resolution};
use crate::graph::DependencyGraph;
use crate::motion::{MotionRule, MOTION_FIELD};
use crate::rule::UpdateRule;
use crate::store::{DoubleBufferedStore, StoreHandle};
use crate::uniforms::StepUniforms;

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Frame counter after the step.
    pub frame: u64,
    /// Fields whose dispatch failed and that kept their previous frame.
    pub stale_fields: Vec<String>,
}

impl StepReport {
    /// True when every field advanced.
    pub fn is_complete(&self) -> bool {
        self.stale_fields.is_empty()
    }
}

struct FieldEntry {
    config: FieldConfig,
    rule: Box<dyn UpdateRule>,
    handle: StoreHandle,
}

/// Builder for a [`Simulator`].
pub struct SimulatorBuilder<B: ComputeBackend> {
    backend: B,
    fields: Vec<(FieldConfig, Box<dyn UpdateRule>)>,
    dependencies: Vec<(String, Vec<String>)>,
}

impl<B: ComputeBackend> SimulatorBuilder<B> {
    /// Declare a field and the rule that advances it.
    ///
    /// The first declared field is the session's primary field, returned by
    /// [`Simulator::texture`].
    pub fn with_field(mut self, config: FieldConfig, rule: impl UpdateRule + 'static) -> Self {
        self.fields.push((config, Box::new(rule)));
        self
    }

    /// Declare that `field` reads the previous frame of each of `depends_on`.
    ///
    /// Naming `field` itself declares a read of its own history.
    pub fn with_dependency<I, S>(mut self, field: &str, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.dependencies.push((
            field.to_string(),
            depends_on.into_iter().map(|s| s.as_ref().to_string()).collect(),
        ));
        self
    }

    /// Resolve the graph, allocate every field and prepare every rule.
    ///
    /// On error nothing of the session survives; the backend is dropped with it.
    pub fn build(self) -> Result<Simulator<B>, SimulationError> {
        let SimulatorBuilder {
            mut backend,
            fields,
            dependencies,
        } = self;

        if fields.is_empty() {
            return Err(SimulationError::NoFields);
        }

        let mut graph = DependencyGraph::new();
        for (config, _) in &fields {
            graph.add_field(config.name.clone())?;
        }
        for (field, depends_on) in &dependencies {
            graph.declare_dependency(field, depends_on)?;
        }
        let order = graph.finalize()?.to_vec();

        let mut store = DoubleBufferedStore::new();
        let mut entries = Vec::with_capacity(fields.len());
        for (config, rule) in fields {
            let handle = store.allocate(&mut backend, &config)?;
            entries.push(FieldEntry { config, rule, handle });
        }

        for &id in &order {
            let entry = &entries[id.index()];
            let program = FieldProgram {
                field: id,
                config: &entry.config,
                rule: entry.rule.as_ref(),
                inputs: graph
                    .reads(id)
                    .map(|dep| ProgramInput {
                        field: dep,
                        config: &entries[dep.index()].config,
                    })
                    .collect(),
            };
            backend.prepare(&program)?;
        }

        log::info!(
            "Created simulation with {} field(s): {}",
            entries.len(),
            order
                .iter()
                .map(|id| graph.name(*id))
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        Ok(Simulator {
            backend,
            graph,
            order,
            fields: entries,
            store,
            frame: 0,
        })
    }
}

/// A running simulation session.
pub struct Simulator<B: ComputeBackend> {
    backend: B,
    graph: DependencyGraph,
    order: Vec<FieldId>,
    fields: Vec<FieldEntry>,
    store: DoubleBufferedStore<B::Buffer>,
    frame: u64,
}

impl<B: ComputeBackend> Simulator<B> {
    /// Start building a session on `backend`.
    pub fn builder(backend: B) -> SimulatorBuilder<B> {
        SimulatorBuilder {
            backend,
            fields: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// A session with the single self-dependent motion field.
    pub fn motion(backend: B, width: u32, height: u32) -> Result<Self, SimulationError> {
        Self::builder(backend)
            .with_field(FieldConfig::new(MOTION_FIELD, (width, height)), MotionRule)
            .with_dependency(MOTION_FIELD, [MOTION_FIELD])
            .build()
    }

    /// Run one step with the given inputs.
    pub fn compute(&mut self, pointer: Vec2, range: f32, viscosity: f32) -> StepReport {
        self.step(StepUniforms::new(pointer, range, viscosity))
    }

    /// Advance every field by one frame.
    ///
    /// A field whose dispatch fails keeps its current buffer and is listed in
    /// the report; the frame counter advances regardless.
    pub fn step(&mut self, uniforms: StepUniforms) -> StepReport {
        let uniforms = uniforms.with_frame(self.frame);
        let mut advanced = Vec::with_capacity(self.order.len());
        let mut stale_fields = Vec::new();

        for &id in &self.order {
            let entry = &self.fields[id.index()];
            let pair = self.store.pair(entry.handle);
            let inputs = self
                .graph
                .reads(id)
                .map(|dep| {
                    let dep_entry = &self.fields[dep.index()];
                    let dep_pair = self.store.pair(dep_entry.handle);
                    PassInput {
                        field: dep,
                        name: dep_entry.config.name.as_str(),
                        resolution: dep_pair.resolution(),
                        buffer: dep_pair.current(),
                    }
                })
                .collect();

            let pass = ComputePass {
                field: id,
                name: entry.config.name.as_str(),
                rule: entry.rule.as_ref(),
                resolution: pair.resolution(),
                previous: pair.current(),
                default: pair.default_buffer(),
                target: pair.next(),
                inputs,
            };

            match self.backend.dispatch(&pass, &uniforms) {
                Ok(()) => advanced.push(entry.handle),
                Err(e) => {
                    log::warn!(
                        "Field '{}' keeps frame {}: {}",
                        entry.config.name,
                        self.frame,
                        e
                    );
                    stale_fields.push(entry.config.name.clone());
                }
            }
        }

        for handle in advanced {
            self.store.swap(handle);
        }
        self.frame += 1;

        StepReport {
            frame: self.frame,
            stale_fields,
        }
    }

    /// Current buffer of the primary field.
    pub fn texture(&self) -> B::Texture<'_> {
        self.store.current_texture(&self.backend, self.fields[0].handle)
    }

    /// Current buffer of a field by name.
    pub fn field_texture(&self, name: &str) -> Option<B::Texture<'_>> {
        let entry = self.entry(name).ok()?;
        Some(self.store.current_texture(&self.backend, entry.handle))
    }

    /// Number of completed steps.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Resolution of the primary field.
    pub fn resolution(&self) -> Resolution {
        self.fields[0].config.resolution
    }

    /// Fields in the order they are stepped.
    pub fn evaluation_order(&self) -> &[FieldId] {
        &self.order
    }

    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.graph.id_of(name)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Store handle of a field, for inspecting its buffer pair.
    pub fn field_handle(&self, name: &str) -> Option<StoreHandle> {
        self.entry(name).ok().map(|e| e.handle)
    }

    pub fn store(&self) -> &DoubleBufferedStore<B::Buffer> {
        &self.store
    }

    /// Read a field's current buffer back as row-major texels.
    pub fn read_field(&self, name: &str) -> Result<Vec<Vec4>, SimulationError> {
        let pair = self.store.pair(self.entry(name)?.handle);
        self.backend.read(pair.current(), pair.resolution())
    }

    /// Read a field's next buffer, i.e. the last write that was not promoted.
    pub fn read_field_next(&self, name: &str) -> Result<Vec<Vec4>, SimulationError> {
        let pair = self.store.pair(self.entry(name)?.handle);
        self.backend.read(pair.next(), pair.resolution())
    }

    /// Copy a field's current buffer into an image. Image row 0 is texel row 0.
    pub fn snapshot(&self, name: &str) -> Result<Rgba32FImage, SimulationError> {
        let resolution = self.store.pair(self.entry(name)?.handle).resolution();
        let texels = self.read_field(name)?;
        Ok(Rgba32FImage::from_fn(resolution.width, resolution.height, |x, y| {
            Rgba(texels[resolution.index(x, y)].to_array())
        }))
    }

    /// Overwrite a field's current buffer, e.g. to restore a snapshot.
    pub fn write_field(&mut self, name: &str, image: &Rgba32FImage) -> Result<(), SimulationError> {
        let handle = self.entry(name)?.handle;
        self.store.write_image(&mut self.backend, handle, image)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Tear the session down and keep the backend.
    pub fn into_backend(self) -> B {
        self.backend
    }

    fn entry(&self, name: &str) -> Result<&FieldEntry, SimulationError> {
        self.graph
            .id_of(name)
            .map(|id| &self.fields[id.index()])
            .ok_or_else(|| SimulationError::UnknownField(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::DefaultState;
    use crate::reference::ReferenceBackend;
    use crate::rule::Texel;
    use glam::Vec4Swizzles;
    use std::collections::HashSet;

    const EPS: f32 = 1e-5;

    fn motion_sim(size: u32) -> Simulator<ReferenceBackend> {
        Simulator::motion(ReferenceBackend::new(), size, size).unwrap()
    }

    fn texel(sim: &Simulator<ReferenceBackend>, x: u32, y: u32) -> Vec4 {
        sim.texture().get(x, y)
    }

    /// Adds one to every lane each step.
    struct Counter;

    impl UpdateRule for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn wgsl(&self) -> String {
            r#"
fn update(coord: vec2<u32>, uv: vec2<f32>, previous: vec4<f32>, default_value: vec4<f32>) -> vec4<f32> {
    return previous + vec4<f32>(1.0);
}
"#
            .to_string()
        }

        fn evaluate(&self, texel: &Texel<'_>, _uniforms: &StepUniforms) -> Vec4 {
            texel.previous + Vec4::ONE
        }
    }

    /// Copies the `counter` field.
    struct Follower;

    impl UpdateRule for Follower {
        fn name(&self) -> &str {
            "follower"
        }

        fn wgsl(&self) -> String {
            r#"
fn update(coord: vec2<u32>, uv: vec2<f32>, previous: vec4<f32>, default_value: vec4<f32>) -> vec4<f32> {
    return read_counter(uv);
}
"#
            .to_string()
        }

        fn evaluate(&self, texel: &Texel<'_>, _uniforms: &StepUniforms) -> Vec4 {
            texel.read("counter", texel.uv).unwrap_or(Vec4::splat(-1.0))
        }
    }

    #[test]
    fn test_texture_is_default_before_compute() {
        let sim = motion_sim(4);
        assert_eq!(sim.frame(), 0);
        assert!(sim.texture().texels.iter().all(|t| *t == Vec4::ZERO));
    }

    #[test]
    fn test_idle_pointer_at_origin_spreads_nothing() {
        let mut sim = motion_sim(4);
        assert!(sim.compute(Vec2::ZERO, 0.1, 0.5).is_complete());
        assert_eq!(texel(&sim, 0, 0), Vec4::ZERO);

        let report = sim.compute(Vec2::new(0.1, 0.0), 0.1, 0.5);
        assert_eq!(report.frame, 2);
        // (0.125, 0.125) is 0.1275 away from the pointer: outside the range.
        assert_eq!(texel(&sim, 0, 0).xy(), Vec2::ZERO);
        assert_eq!(texel(&sim, 0, 0).zw(), Vec2::new(0.1, 0.0));
    }

    #[test]
    fn test_two_frame_scenario() {
        let mut sim = motion_sim(4);

        sim.compute(Vec2::new(0.125, 0.125), 0.25, 0.5);
        let t = texel(&sim, 0, 0);
        assert!((t.x - 0.3125).abs() < EPS);
        assert!((t.y - 0.3125).abs() < EPS);
        assert_eq!(t.zw(), Vec2::new(0.125, 0.125));
        assert_eq!(texel(&sim, 1, 0).xy(), Vec2::ZERO);

        sim.compute(Vec2::new(0.225, 0.125), 0.25, 0.5);
        let t = texel(&sim, 0, 0);
        assert!((t.x - 0.31825).abs() < EPS, "x = {}", t.x);
        assert!((t.y - 0.15625).abs() < EPS, "y = {}", t.y);
        assert_eq!(t.zw(), Vec2::new(0.225, 0.125));

        let t = texel(&sim, 1, 0);
        assert!((t.x - 0.088).abs() < EPS, "x = {}", t.x);
        assert!(t.y.abs() < EPS);
    }

    #[test]
    fn test_distortion_is_clamped() {
        let mut sim = motion_sim(4);
        sim.compute(Vec2::ZERO, 0.5, 0.04);
        sim.compute(Vec2::new(0.875, 0.875), 0.5, 0.04);
        assert_eq!(texel(&sim, 3, 3).xy(), Vec2::ONE);
        assert!(sim
            .read_field(MOTION_FIELD)
            .unwrap()
            .iter()
            .all(|t| t.x.abs() <= 1.0 && t.y.abs() <= 1.0));
    }

    #[test]
    fn test_zero_input_is_idempotent() {
        let mut sim = motion_sim(4);
        for _ in 0..50 {
            sim.compute(Vec2::ZERO, 0.1, 0.04);
        }
        assert!(sim.texture().texels.iter().all(|t| *t == Vec4::ZERO));
        assert_eq!(sim.frame(), 50);
    }

    #[test]
    fn test_still_pointer_decays_to_default() {
        let mut sim = motion_sim(4);
        sim.compute(Vec2::new(0.5, 0.5), 0.25, 0.5);
        assert!(texel(&sim, 1, 1).x > 0.0);
        for _ in 0..49 {
            sim.compute(Vec2::new(0.5, 0.5), 0.25, 0.5);
        }
        assert!(sim.texture().texels.iter().all(|t| t.xy().length() < 1e-6));
    }

    #[test]
    fn test_pointer_is_remembered_everywhere() {
        let mut sim = motion_sim(4);
        sim.compute(Vec2::new(0.3, 0.6), 0.1, 0.04);
        assert!(sim.texture().texels.iter().all(|t| t.zw() == Vec2::new(0.3, 0.6)));
    }

    #[test]
    fn test_failed_dispatch_keeps_previous_frame() {
        let mut sim = motion_sim(4);
        sim.compute(Vec2::new(0.125, 0.125), 0.25, 0.5);
        let before = sim.read_field(MOTION_FIELD).unwrap();

        sim.backend_mut().inject_dispatch_failures(1);
        let report = sim.compute(Vec2::new(0.225, 0.125), 0.25, 0.5);
        assert_eq!(report.stale_fields, vec![MOTION_FIELD.to_string()]);
        assert_eq!(report.frame, 2);
        assert_eq!(sim.read_field(MOTION_FIELD).unwrap(), before);

        // The retry reads the same previous frame as the failed step would have.
        let report = sim.compute(Vec2::new(0.225, 0.125), 0.25, 0.5);
        assert!(report.is_complete());
        assert!((texel(&sim, 0, 0).x - 0.31825).abs() < EPS);
    }

    #[test]
    fn test_dependents_read_previous_frame() {
        let mut sim = Simulator::builder(ReferenceBackend::new())
            .with_field(FieldConfig::new("follower", (2, 2)), Follower)
            .with_field(FieldConfig::new("counter", (2, 2)), Counter)
            .with_dependency("follower", ["counter"])
            .with_dependency("counter", ["counter"])
            .build()
            .unwrap();

        let counter = sim.field_id("counter").unwrap();
        let follower = sim.field_id("follower").unwrap();
        assert_eq!(sim.evaluation_order(), &[counter, follower]);

        sim.step(StepUniforms::default());
        assert_eq!(sim.read_field("counter").unwrap()[0], Vec4::ONE);
        assert_eq!(sim.read_field("follower").unwrap()[0], Vec4::ZERO);

        sim.step(StepUniforms::default());
        assert_eq!(sim.read_field("counter").unwrap()[0], Vec4::splat(2.0));
        assert_eq!(sim.read_field("follower").unwrap()[0], Vec4::ONE);

        // Primary field is the first declared one.
        assert_eq!(sim.texture().get(1, 1), Vec4::ONE);
    }

    #[test]
    fn test_buffers_are_never_aliased() {
        let mut sim = Simulator::builder(ReferenceBackend::new())
            .with_field(FieldConfig::new("a", (2, 2)), Counter)
            .with_field(FieldConfig::new("b", (3, 1)), Counter)
            .with_dependency("a", ["a", "b"])
            .build()
            .unwrap();

        for _ in 0..3 {
            let mut seen = HashSet::new();
            for name in ["a", "b"] {
                let pair = sim.store().pair(sim.field_handle(name).unwrap());
                assert!(seen.insert(*pair.current()));
                assert!(seen.insert(*pair.next()));
                assert!(seen.insert(*pair.default_buffer()));
            }
            sim.step(StepUniforms::default());
        }
    }

    #[test]
    fn test_cycle_between_fields_is_rejected() {
        let result = Simulator::builder(ReferenceBackend::new())
            .with_field(FieldConfig::new("a", (2, 2)), Counter)
            .with_field(FieldConfig::new("b", (2, 2)), Counter)
            .with_dependency("a", ["b"])
            .with_dependency("b", ["a"])
            .build();
        assert!(matches!(
            result,
            Err(SimulationError::CyclicGraphUnsupportedAsOrdering { .. })
        ));
    }

    #[test]
    fn test_empty_session_is_rejected() {
        let result = Simulator::builder(ReferenceBackend::new()).build();
        assert!(matches!(result, Err(SimulationError::NoFields)));
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let result = Simulator::builder(ReferenceBackend::new())
            .with_field(FieldConfig::new("a", (2, 2)), Counter)
            .with_dependency("a", ["ghost"])
            .build();
        assert!(matches!(result, Err(SimulationError::UnknownField(name)) if name == "ghost"));
    }

    #[test]
    fn test_oversized_field_is_rejected() {
        let backend = ReferenceBackend::new().with_max_texture_dimension(16);
        assert!(matches!(
            Simulator::motion(backend, 32, 8),
            Err(SimulationError::ResourceExhausted { width: 32, height: 8, limit: 16, .. })
        ));
    }

    #[test]
    fn test_explicit_default_state_is_blended_toward() {
        let rest = Vec4::new(0.5, -0.5, 0.0, 0.0);
        let mut sim = Simulator::builder(ReferenceBackend::new())
            .with_field(
                FieldConfig::new(MOTION_FIELD, (2, 2)).with_default(DefaultState::Uniform(rest)),
                MotionRule,
            )
            .with_dependency(MOTION_FIELD, [MOTION_FIELD])
            .build()
            .unwrap();

        assert_eq!(sim.texture().get(0, 0), rest);
        sim.compute(Vec2::ZERO, 0.1, 1.0);
        assert_eq!(sim.texture().get(1, 1).xy(), rest.xy());
    }

    #[test]
    fn test_snapshot_matches_texels() {
        let mut sim = motion_sim(4);
        sim.compute(Vec2::new(0.125, 0.125), 0.25, 0.5);
        let image = sim.snapshot(MOTION_FIELD).unwrap();
        assert_eq!(image.dimensions(), (4, 4));
        assert_eq!(image.get_pixel(0, 0).0, texel(&sim, 0, 0).to_array());
        assert!(matches!(sim.snapshot("nope"), Err(SimulationError::UnknownField(_))));
    }

    #[test]
    fn test_colliding_shader_names_are_rejected() {
        let result = Simulator::builder(ReferenceBackend::new())
            .with_field(FieldConfig::new("dye-a", (4, 4)), Counter)
            .with_field(FieldConfig::new("dye_a", (4, 4)), Counter)
            .build();
        assert!(matches!(result, Err(SimulationError::DuplicateField(name)) if name == "dye_a"));
    }

    #[test]
    fn test_write_field_restores_snapshot() {
        let mut sim = motion_sim(4);
        sim.compute(Vec2::new(0.125, 0.125), 0.25, 0.5);
        let saved = sim.snapshot(MOTION_FIELD).unwrap();
        sim.compute(Vec2::new(0.875, 0.5), 0.25, 0.5);
        assert_ne!(sim.snapshot(MOTION_FIELD).unwrap(), saved);

        sim.write_field(MOTION_FIELD, &saved).unwrap();
        assert_eq!(sim.snapshot(MOTION_FIELD).unwrap(), saved);
        assert!(matches!(
            sim.write_field(MOTION_FIELD, &Rgba32FImage::new(2, 8)),
            Err(SimulationError::ImageSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_swap_promotes_written_buffer() {
        let mut sim = motion_sim(2);
        sim.compute(Vec2::new(0.25, 0.25), 0.1, 0.04);
        let current = sim.read_field(MOTION_FIELD).unwrap();
        assert!(current.iter().all(|t| (t.z, t.w) == (0.25, 0.25)));
        // The old current buffer still holds the default state.
        let next = sim.read_field_next(MOTION_FIELD).unwrap();
        assert!(next.iter().all(|t| *t == Vec4::ZERO));

        sim.compute(Vec2::new(0.75, 0.25), 0.1, 0.04);
        assert_eq!(sim.read_field_next(MOTION_FIELD).unwrap(), current);
    }
}

//! Double-buffered field storage.
//!
//! Each field owns a pair of equally sized buffers. One is *current* (read by
//! every rule this step and by consumers), the other is *next* (written by the
//! field's own rule). The role is a single bit per pair, flipped by
//! [`DoubleBufferedStore::swap`]; buffers themselves never move.
//!
//! A third, read-only buffer keeps the field's default state so rules can
//! blend back toward it.

use glam::Vec4;
use image::Rgba32FImage;

use crate::backend::{BufferRole, ComputeBackend};
use crate::error::SimulationError;
use crate::field::{image_texels, FieldConfig, Resolution};

/// Index of a buffer pair inside a [`DoubleBufferedStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreHandle(usize);

/// Two buffers and the bit that says which one is current.
#[derive(Debug)]
pub struct BufferPair<B> {
    name: String,
    buffers: [B; 2],
    default: B,
    resolution: Resolution,
    /// Which buffer is currently the readable one (false = A, true = B)
    current_is_b: bool,
}

impl<B> BufferPair<B> {
    /// The readable buffer.
    pub fn current(&self) -> &B {
        &self.buffers[self.current_index()]
    }

    /// The buffer the next step writes.
    pub fn next(&self) -> &B {
        &self.buffers[1 - self.current_index()]
    }

    /// The default-state snapshot.
    pub fn default_buffer(&self) -> &B {
        &self.default
    }

    /// 0 for A, 1 for B.
    pub fn current_index(&self) -> usize {
        self.current_is_b as usize
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Name of the field that owns the pair.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn swap(&mut self) {
        self.current_is_b = !self.current_is_b;
    }
}

/// Arena of buffer pairs, one per field.
#[derive(Debug)]
pub struct DoubleBufferedStore<B> {
    pairs: Vec<BufferPair<B>>,
}

impl<B> Default for DoubleBufferedStore<B> {
    fn default() -> Self {
        Self { pairs: Vec::new() }
    }
}

impl<B> DoubleBufferedStore<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the buffers of `config` and seed them with its default state.
    ///
    /// Fails with [`SimulationError::ResourceExhausted`] when the resolution
    /// is empty or larger than the device allows.
    pub fn allocate<K>(&mut self, backend: &mut K, config: &FieldConfig) -> Result<StoreHandle, SimulationError>
    where
        K: ComputeBackend<Buffer = B>,
    {
        let resolution = config.resolution;
        let limit = backend.max_texture_dimension();
        if resolution.width == 0
            || resolution.height == 0
            || resolution.width > limit
            || resolution.height > limit
        {
            return Err(SimulationError::ResourceExhausted {
                field: config.name.clone(),
                width: resolution.width,
                height: resolution.height,
                limit,
            });
        }

        let default_texels = config.default_state.to_texels(&config.name, resolution)?;

        let ping = backend.create_buffer(&config.name, BufferRole::Ping, resolution)?;
        let pong = backend.create_buffer(&config.name, BufferRole::Pong, resolution)?;
        let default = backend.create_buffer(&config.name, BufferRole::Default, resolution)?;
        backend.upload(&default, resolution, &default_texels)?;

        log::debug!(
            "Allocated field '{}' ({}x{}, {} bytes per buffer)",
            config.name,
            resolution.width,
            resolution.height,
            resolution.memory_size()
        );

        self.pairs.push(BufferPair {
            name: config.name.clone(),
            buffers: [ping, pong],
            default,
            resolution,
            current_is_b: false,
        });
        let handle = StoreHandle(self.pairs.len() - 1);
        self.write(backend, handle, &default_texels)?;
        Ok(handle)
    }

    /// Seed the current buffer directly with row-major texels.
    ///
    /// `texels` must hold exactly one value per texel of the field.
    pub fn write<K>(&mut self, backend: &mut K, handle: StoreHandle, texels: &[Vec4]) -> Result<(), SimulationError>
    where
        K: ComputeBackend<Buffer = B>,
    {
        let pair = &self.pairs[handle.0];
        let expected = pair.resolution.texel_count();
        if texels.len() != expected {
            return Err(SimulationError::TexelCountMismatch {
                field: pair.name.clone(),
                expected,
                actual: texels.len(),
            });
        }
        backend.upload(pair.current(), pair.resolution, texels)
    }

    /// Seed the current buffer from an image of the field's size.
    pub fn write_image<K>(
        &mut self,
        backend: &mut K,
        handle: StoreHandle,
        image: &Rgba32FImage,
    ) -> Result<(), SimulationError>
    where
        K: ComputeBackend<Buffer = B>,
    {
        let pair = &self.pairs[handle.0];
        let expected = (pair.resolution.width, pair.resolution.height);
        if image.dimensions() != expected {
            return Err(SimulationError::ImageSizeMismatch {
                field: pair.name.clone(),
                expected,
                actual: image.dimensions(),
            });
        }
        self.write(backend, handle, &image_texels(image))
    }

    /// Read-only view of the current buffer.
    pub fn current_texture<'a, K>(&'a self, backend: &'a K, handle: StoreHandle) -> K::Texture<'a>
    where
        K: ComputeBackend<Buffer = B>,
    {
        backend.texture(self.pairs[handle.0].current())
    }

    /// Promote next to current. Call once per field per completed step.
    pub fn swap(&mut self, handle: StoreHandle) {
        self.pairs[handle.0].swap();
    }

    /// The pair behind a handle.
    pub fn pair(&self, handle: StoreHandle) -> &BufferPair<B> {
        &self.pairs[handle.0]
    }

    /// Number of allocated pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::DefaultState;
    use crate::reference::ReferenceBackend;

    #[test]
    fn test_allocate_seeds_current_with_default() {
        let mut backend = ReferenceBackend::new();
        let mut store = DoubleBufferedStore::new();
        let config = FieldConfig::new("f", (2, 2)).with_default(DefaultState::Uniform(Vec4::splat(0.5)));
        let handle = store.allocate(&mut backend, &config).unwrap();

        let pair = store.pair(handle);
        let current = backend.read(pair.current(), pair.resolution()).unwrap();
        let next = backend.read(pair.next(), pair.resolution()).unwrap();
        assert!(current.iter().all(|t| *t == Vec4::splat(0.5)));
        assert!(next.iter().all(|t| *t == Vec4::ZERO));
    }

    #[test]
    fn test_swap_flips_roles() {
        let mut backend = ReferenceBackend::new();
        let mut store = DoubleBufferedStore::new();
        let handle = store.allocate(&mut backend, &FieldConfig::new("f", (2, 2))).unwrap();

        let before = *store.pair(handle).current();
        assert_eq!(store.pair(handle).current_index(), 0);
        store.swap(handle);
        assert_eq!(store.pair(handle).current_index(), 1);
        assert_eq!(*store.pair(handle).next(), before);
        store.swap(handle);
        assert_eq!(*store.pair(handle).current(), before);
    }

    #[test]
    fn test_write_rejects_wrong_texel_count() {
        let mut backend = ReferenceBackend::new();
        let mut store = DoubleBufferedStore::new();
        let handle = store.allocate(&mut backend, &FieldConfig::new("f", (2, 2))).unwrap();

        let err = store.write(&mut backend, handle, &[Vec4::ONE; 3]).unwrap_err();
        assert!(matches!(
            err,
            SimulationError::TexelCountMismatch { expected: 4, actual: 3, .. }
        ));
        // The current buffer keeps its previous contents.
        let pair = store.pair(handle);
        let current = backend.read(pair.current(), pair.resolution()).unwrap();
        assert!(current.iter().all(|t| *t == Vec4::ZERO));

        store.write(&mut backend, handle, &[Vec4::ONE; 4]).unwrap();
        let pair = store.pair(handle);
        let current = backend.read(pair.current(), pair.resolution()).unwrap();
        assert!(current.iter().all(|t| *t == Vec4::ONE));
    }

    #[test]
    fn test_write_image_seeds_current() {
        let mut backend = ReferenceBackend::new();
        let mut store = DoubleBufferedStore::new();
        let handle = store.allocate(&mut backend, &FieldConfig::new("f", (2, 2))).unwrap();

        let mut image = Rgba32FImage::new(2, 2);
        image.put_pixel(0, 1, image::Rgba([0.25, 0.5, 0.75, 1.0]));
        store.write_image(&mut backend, handle, &image).unwrap();

        let texture = store.current_texture(&backend, handle);
        assert_eq!(texture.get(0, 1), Vec4::new(0.25, 0.5, 0.75, 1.0));
        assert_eq!(texture.get(1, 1), Vec4::ZERO);

        // Same texel count, different shape.
        let err = store
            .write_image(&mut backend, handle, &Rgba32FImage::new(4, 1))
            .unwrap_err();
        assert!(matches!(
            err,
            SimulationError::ImageSizeMismatch { expected: (2, 2), actual: (4, 1), .. }
        ));
    }

    #[test]
    fn test_oversized_resolution_is_exhausted() {
        let mut backend = ReferenceBackend::new().with_max_texture_dimension(64);
        let mut store: DoubleBufferedStore<_> = DoubleBufferedStore::new();
        let err = store
            .allocate(&mut backend, &FieldConfig::new("big", (65, 10)))
            .unwrap_err();
        assert!(matches!(
            err,
            SimulationError::ResourceExhausted { width: 65, limit: 64, .. }
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_empty_resolution_is_exhausted() {
        let mut backend = ReferenceBackend::new();
        let mut store = DoubleBufferedStore::new();
        assert!(matches!(
            store.allocate(&mut backend, &FieldConfig::new("empty", (0, 4))),
            Err(SimulationError::ResourceExhausted { .. })
        ));
    }
}

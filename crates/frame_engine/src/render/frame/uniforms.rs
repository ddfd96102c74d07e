//! Per-image view/projection uniforms
//!
//! One host-visible uniform buffer and uniform set per image-chain slot, so
//! a write for one image never touches memory another image's submission
//! is reading.

use crate::foundation::math::ViewProjection;
use crate::render::api::{
    BufferHandle, BufferUsage, GpuBackend, GpuError, GpuResult, MemoryLocation, UniformSetHandle,
};

const UNIFORM_SIZE: u64 = std::mem::size_of::<ViewProjection>() as u64;

/// Uniform buffers and sets indexed by image-chain slot
#[derive(Debug, Default)]
pub struct FrameUniforms {
    buffers: Vec<BufferHandle>,
    sets: Vec<UniformSetHandle>,
}

impl FrameUniforms {
    /// Allocate one uniform buffer and set per image
    pub fn new<B: GpuBackend + ?Sized>(backend: &mut B, image_count: usize) -> GpuResult<Self> {
        let mut uniforms = Self::default();

        for _ in 0..image_count {
            if let Err(error) = uniforms.push_slot(backend) {
                uniforms.destroy(backend);
                return Err(error);
            }
        }

        log::debug!("Created {image_count} per-image uniform buffers of {UNIFORM_SIZE} bytes");
        Ok(uniforms)
    }

    fn push_slot<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) -> GpuResult<()> {
        let buffer = backend.create_buffer(UNIFORM_SIZE, BufferUsage::UNIFORM, MemoryLocation::HostVisible)?;
        match backend.create_uniform_set(buffer, UNIFORM_SIZE) {
            Ok(set) => {
                self.buffers.push(buffer);
                self.sets.push(set);
                Ok(())
            }
            Err(error) => {
                backend.destroy_buffer(buffer);
                Err(error)
            }
        }
    }

    /// Uniform set bound by draws into `image_index`
    pub fn set(&self, image_index: u32) -> Option<UniformSetHandle> {
        self.sets.get(image_index as usize).copied()
    }

    /// Buffer backing `image_index`
    pub fn buffer(&self, image_index: u32) -> Option<BufferHandle> {
        self.buffers.get(image_index as usize).copied()
    }

    /// Overwrite the uniform record of one image
    pub fn write<B: GpuBackend + ?Sized>(
        &self,
        backend: &mut B,
        image_index: u32,
        view_projection: &ViewProjection,
    ) -> GpuResult<()> {
        let buffer = self.buffer(image_index).ok_or_else(|| {
            GpuError::invalid(format!("no uniform buffer for image {image_index}"))
        })?;
        backend.write_buffer(buffer, 0, view_projection.as_bytes())
    }

    /// Release every set and buffer; the device must be idle
    pub fn destroy<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        for set in self.sets.drain(..) {
            backend.destroy_uniform_set(set);
        }
        for buffer in self.buffers.drain(..) {
            backend.destroy_buffer(buffer);
        }
    }
}

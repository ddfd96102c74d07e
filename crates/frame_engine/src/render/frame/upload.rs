//! Staged uploads into device-local buffers
//!
//! Every vertex and index stream goes through [`upload_buffer`]: a
//! host-visible staging buffer is filled, copied into a device-local buffer
//! with a one-shot blocking transfer, and released before returning.

use crate::render::api::{BufferHandle, BufferUsage, GpuBackend, GpuError, GpuResult, MemoryLocation};

/// A device-local buffer holding `element_count` elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuBuffer {
    /// Backend handle
    pub handle: BufferHandle,
    /// Number of elements stored
    pub element_count: u32,
    /// Size in bytes
    pub size: u64,
}

/// Upload `bytes` into a new device-local buffer usable as `usage`
///
/// Blocks until the transfer has completed. On failure every buffer
/// allocated along the way is released and no handle escapes.
pub fn upload_buffer<B: GpuBackend + ?Sized>(
    backend: &mut B,
    bytes: &[u8],
    element_size: usize,
    element_count: usize,
    usage: BufferUsage,
) -> GpuResult<GpuBuffer> {
    let expected = element_size
        .checked_mul(element_count)
        .ok_or_else(|| GpuError::invalid("upload size overflows"))?;
    if expected != bytes.len() {
        return Err(GpuError::invalid(format!(
            "upload of {element_count} x {element_size} bytes given {} bytes",
            bytes.len()
        )));
    }
    if bytes.is_empty() {
        return Err(GpuError::invalid("cannot upload an empty buffer"));
    }
    let element_count = u32::try_from(element_count)
        .map_err(|_| GpuError::invalid("element count exceeds u32"))?;
    let size = bytes.len() as u64;

    let staging = backend.create_buffer(size, BufferUsage::TRANSFER_SRC, MemoryLocation::HostVisible)?;
    let result = copy_through_staging(backend, staging, bytes, usage);
    backend.destroy_buffer(staging);

    let handle = result?;
    log::debug!("Uploaded {size} bytes ({element_count} elements, {usage:?}) into buffer {handle:?}");

    Ok(GpuBuffer {
        handle,
        element_count,
        size,
    })
}

/// Upload a slice of plain-old-data elements
pub fn upload_slice<B, T>(backend: &mut B, data: &[T], usage: BufferUsage) -> GpuResult<GpuBuffer>
where
    B: GpuBackend + ?Sized,
    T: bytemuck::Pod,
{
    upload_buffer(
        backend,
        bytemuck::cast_slice(data),
        std::mem::size_of::<T>(),
        data.len(),
        usage,
    )
}

fn copy_through_staging<B: GpuBackend + ?Sized>(
    backend: &mut B,
    staging: BufferHandle,
    bytes: &[u8],
    usage: BufferUsage,
) -> GpuResult<BufferHandle> {
    let size = bytes.len() as u64;
    backend.write_buffer(staging, 0, bytes)?;

    let destination = backend.create_buffer(
        size,
        usage | BufferUsage::TRANSFER_DST,
        MemoryLocation::DeviceLocal,
    )?;

    if let Err(error) = backend.copy_buffer_blocking(staging, destination, size) {
        backend.destroy_buffer(destination);
        return Err(error);
    }

    Ok(destination)
}

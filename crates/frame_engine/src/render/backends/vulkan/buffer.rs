//! Buffers with dedicated memory allocations
//!
//! Host-visible buffers are host-coherent, so a write is visible to the
//! device without an explicit flush.

use ash::{vk, Device};

use super::{vk_error, VulkanResult};
use crate::render::api::{BufferUsage, GpuError, MemoryLocation};

/// Translate backend-neutral usage into Vulkan usage flags
pub fn usage_flags(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

/// Memory properties required for a location
pub fn memory_properties(location: MemoryLocation) -> vk::MemoryPropertyFlags {
    match location {
        MemoryLocation::HostVisible => {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        }
        MemoryLocation::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
    }
}

/// First memory type allowed by `type_filter` that has every flag in `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            type_filter & (1 << i) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(GpuError::NoSuitableMemoryType)
}

/// Buffer plus its memory
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    location: MemoryLocation,
}

impl Buffer {
    /// Create a buffer and bind freshly allocated memory to it
    pub fn new(
        device: Device,
        memory_properties_table: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: BufferUsage,
        location: MemoryLocation,
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage_flags(usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None).map_err(vk_error)? };

        let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory = match find_memory_type(
            memory_properties_table,
            mem_requirements.memory_type_bits,
            memory_properties(location),
        )
        .and_then(|memory_type_index| {
            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(mem_requirements.size)
                .memory_type_index(memory_type_index);
            unsafe { device.allocate_memory(&alloc_info, None) }.map_err(|error| match error {
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                    GpuError::OutOfMemory {
                        requested: mem_requirements.size,
                    }
                }
                other => vk_error(other),
            })
        }) {
            Ok(memory) => memory,
            Err(error) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(error);
            }
        };

        if let Err(error) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(vk_error(error));
        }

        Ok(Self {
            device,
            buffer,
            memory,
            size,
            location,
        })
    }

    /// Map, copy `data` at `offset`, unmap
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        if self.location != MemoryLocation::HostVisible {
            return Err(GpuError::invalid("write to a device-local buffer"));
        }
        let end = offset
            .checked_add(data.len() as vk::DeviceSize)
            .filter(|&end| end <= self.size)
            .ok_or_else(|| {
                GpuError::invalid(format!(
                    "write of {} bytes at {offset} overruns a {} byte buffer",
                    data.len(),
                    self.size
                ))
            })?;
        if data.is_empty() {
            return Ok(());
        }

        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, offset, end - offset, vk::MemoryMapFlags::empty())
                .map_err(vk_error)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Raw handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        props
    }

    #[test]
    fn memory_type_respects_filter_and_flags() {
        let props = table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let host = memory_properties(MemoryLocation::HostVisible);

        assert_eq!(find_memory_type(&props, 0b111, host), Ok(2));
        assert_eq!(
            find_memory_type(&props, 0b011, host),
            Err(GpuError::NoSuitableMemoryType)
        );
        assert_eq!(
            find_memory_type(&props, 0b111, memory_properties(MemoryLocation::DeviceLocal)),
            Ok(0)
        );
    }

    #[test]
    fn usage_translation() {
        let flags = usage_flags(BufferUsage::VERTEX | BufferUsage::TRANSFER_DST);
        assert_eq!(
            flags,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        );
        assert_eq!(usage_flags(BufferUsage::UNIFORM), vk::BufferUsageFlags::UNIFORM_BUFFER);
    }
}

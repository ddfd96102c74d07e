//! Descriptor layout and pool for the per-image uniform block

use ash::{vk, Device};

use super::{vk_error, VulkanResult};

/// Layout with one uniform buffer at binding 0, read by the vertex stage
pub struct UniformLayout {
    device: Device,
    layout: vk::DescriptorSetLayout,
}

impl UniformLayout {
    /// Create the layout
    pub fn new(device: Device) -> VulkanResult<Self> {
        let bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build()];

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe {
            device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(vk_error)?
        };

        Ok(Self { device, layout })
    }

    /// Raw handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for UniformLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Pool that hands out and takes back uniform sets one at a time
pub struct UniformPool {
    device: Device,
    pool: vk::DescriptorPool,
}

impl UniformPool {
    /// Create a pool for up to `max_sets` uniform sets
    pub fn new(device: Device, max_sets: u32) -> VulkanResult<Self> {
        let pool_sizes = [vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(max_sets)
            .build()];

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .pool_sizes(&pool_sizes)
            .max_sets(max_sets);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None).map_err(vk_error)? };

        Ok(Self { device, pool })
    }

    /// Allocate a set and point binding 0 at `range` bytes of `buffer`
    pub fn allocate(
        &self,
        layout: vk::DescriptorSetLayout,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    ) -> VulkanResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let set = unsafe { self.device.allocate_descriptor_sets(&alloc_info).map_err(vk_error)? }
            .first()
            .copied()
            .ok_or_else(|| vk_error(vk::Result::ERROR_OUT_OF_POOL_MEMORY))?;

        let buffer_infos = [vk::DescriptorBufferInfo::builder()
            .buffer(buffer)
            .offset(0)
            .range(range)
            .build()];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_infos)
            .build();

        unsafe {
            self.device.update_descriptor_sets(&[write], &[]);
        }
        Ok(set)
    }

    /// Return a set to the pool
    pub fn free(&self, set: vk::DescriptorSet) {
        unsafe {
            if let Err(error) = self.device.free_descriptor_sets(self.pool, &[set]) {
                log::warn!("Failed to free descriptor set: {error:?}");
            }
        }
    }
}

impl Drop for UniformPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

//! Command pool and one-shot transfers

use ash::{vk, Device};

use super::{vk_error, VulkanResult};

/// Command pool with one reusable primary buffer per frame slot
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
    frame_buffers: Vec<vk::CommandBuffer>,
}

impl CommandPool {
    /// Create the pool and allocate `frame_slots` primary buffers
    pub fn new(device: Device, queue_family_index: u32, frame_slots: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe { device.create_command_pool(&pool_create_info, None).map_err(vk_error)? };

        let mut pool = Self {
            device,
            command_pool,
            frame_buffers: Vec::new(),
        };
        pool.frame_buffers = pool.allocate(frame_slots)?;
        Ok(pool)
    }

    fn allocate(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.allocate_command_buffers(&alloc_info).map_err(vk_error) }
    }

    /// Command buffer owned by a frame slot
    pub fn frame_buffer(&self, frame_slot: usize) -> Option<vk::CommandBuffer> {
        self.frame_buffers.get(frame_slot).copied()
    }

    /// Number of frame-slot buffers
    pub fn frame_slots(&self) -> usize {
        self.frame_buffers.len()
    }

    /// Record `record` into a temporary buffer, submit it, and wait for the queue
    pub fn run_one_shot(
        &self,
        queue: vk::Queue,
        record: impl FnOnce(&Device, vk::CommandBuffer),
    ) -> VulkanResult<()> {
        let command_buffer = self
            .allocate(1)?
            .first()
            .copied()
            .ok_or_else(|| vk_error(vk::Result::ERROR_OUT_OF_HOST_MEMORY))?;

        let result = self.submit_one_shot(queue, command_buffer, record);

        unsafe {
            self.device.free_command_buffers(self.command_pool, &[command_buffer]);
        }
        result
    }

    fn submit_one_shot(
        &self,
        queue: vk::Queue,
        command_buffer: vk::CommandBuffer,
        record: impl FnOnce(&Device, vk::CommandBuffer),
    ) -> VulkanResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();

        unsafe {
            self.device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(vk_error)?;
            record(&self.device, command_buffer);
            self.device.end_command_buffer(command_buffer).map_err(vk_error)?;
            self.device
                .queue_submit(queue, &[submit_info], vk::Fence::null())
                .map_err(vk_error)?;
            self.device.queue_wait_idle(queue).map_err(vk_error)
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            // Frees every buffer allocated from it
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

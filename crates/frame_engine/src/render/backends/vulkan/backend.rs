//! [`GpuBackend`] implementation on top of ash
//!
//! Native objects live in per-kind tables keyed by the `u64` handed across
//! the seam. Struct fields drop in declaration order, so everything created
//! from the device is released before the swapchain and the context.

use ash::vk;
use std::collections::HashMap;

use super::buffer::Buffer;
use super::commands::CommandPool;
use super::context::VulkanContext;
use super::descriptors::{UniformLayout, UniformPool};
use super::pipeline::{GraphicsPipeline, ShaderModule, PUSH_CONSTANT_SIZE};
use super::render_pass::{Framebuffer, RenderPass};
use super::swapchain::Swapchain;
use super::sync::{Fence, Semaphore};
use super::window::Window;
use super::{vk_error, VulkanResult};
use crate::core::{RendererConfig, MAX_FRAMES_IN_FLIGHT_LIMIT};
use crate::render::api::{
    AcquireOutcome, BufferHandle, BufferUsage, FenceHandle, FenceStatus, GpuBackend, GpuError,
    GpuResult, MemoryLocation, PipelineDesc, PipelineHandle, PresentOutcome, SemaphoreHandle,
    Submission, UniformSetHandle,
};
use crate::render::frame::command_recorder::{CommandSequence, RenderCommand};

/// Uniform sets the pool can hold per swapchain image
const UNIFORM_SETS_PER_IMAGE: u32 = 4;

/// Vulkan device provider for the frame pipeline
pub struct VulkanBackend {
    semaphores: HashMap<u64, Semaphore>,
    fences: HashMap<u64, Fence>,
    uniform_sets: HashMap<u64, vk::DescriptorSet>,
    buffers: HashMap<u64, Buffer>,
    pipelines: HashMap<u64, GraphicsPipeline>,
    next_handle: u64,
    uniform_pool: UniformPool,
    uniform_layout: UniformLayout,
    framebuffers: Vec<Framebuffer>,
    render_pass: RenderPass,
    commands: CommandPool,
    swapchain: Swapchain,
    context: VulkanContext,
}

impl VulkanBackend {
    /// Bring up Vulkan for `window` and negotiate the image chain
    pub fn new(window: &mut Window, config: &RendererConfig) -> GpuResult<Self> {
        let context = VulkanContext::new(window, &config.application_name, config.validation_enabled())?;

        let (width, height) = window.framebuffer_size();
        let swapchain = Swapchain::new(&context, vk::Extent2D { width, height })?;

        let device = context.raw_device().clone();
        let render_pass = RenderPass::new(device.clone(), swapchain.format().format)?;

        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&view| Framebuffer::new(device.clone(), render_pass.handle(), view, swapchain.extent()))
            .collect::<VulkanResult<Vec<_>>>()?;

        let commands = CommandPool::new(
            device.clone(),
            context.device.graphics_family,
            MAX_FRAMES_IN_FLIGHT_LIMIT as u32,
        )?;

        let uniform_layout = UniformLayout::new(device.clone())?;
        let uniform_pool = UniformPool::new(
            device,
            swapchain.image_count() as u32 * UNIFORM_SETS_PER_IMAGE,
        )?;

        log::info!(
            "Vulkan backend ready: {} images, {} command buffers",
            swapchain.image_count(),
            commands.frame_slots()
        );

        Ok(Self {
            semaphores: HashMap::new(),
            fences: HashMap::new(),
            uniform_sets: HashMap::new(),
            buffers: HashMap::new(),
            pipelines: HashMap::new(),
            next_handle: 1,
            uniform_pool,
            uniform_layout,
            framebuffers,
            render_pass,
            commands,
            swapchain,
            context,
        })
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_handle;
        self.next_handle += 1;
        id
    }

    fn buffer(&self, handle: BufferHandle) -> GpuResult<&Buffer> {
        self.buffers
            .get(&handle.0)
            .ok_or(GpuError::ResourceNotFound { id: handle.0 })
    }

    fn semaphore(&self, handle: SemaphoreHandle) -> GpuResult<vk::Semaphore> {
        self.semaphores
            .get(&handle.0)
            .map(Semaphore::handle)
            .ok_or(GpuError::ResourceNotFound { id: handle.0 })
    }

    fn fence(&self, handle: FenceHandle) -> GpuResult<&Fence> {
        self.fences
            .get(&handle.0)
            .ok_or(GpuError::ResourceNotFound { id: handle.0 })
    }

    fn translate(&self, command_buffer: vk::CommandBuffer, sequence: &CommandSequence) -> GpuResult<()> {
        let device = self.context.raw_device();
        let mut layout = None;

        for command in sequence.commands() {
            match *command {
                RenderCommand::BeginRenderPass {
                    image_index,
                    clear_color,
                } => {
                    let framebuffer = self
                        .framebuffers
                        .get(image_index as usize)
                        .ok_or_else(|| GpuError::invalid(format!("no framebuffer for image {image_index}")))?;
                    let extent = self.swapchain.extent();
                    let render_area = vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent,
                    };
                    let clear_values = [vk::ClearValue {
                        color: vk::ClearColorValue { float32: clear_color },
                    }];
                    let begin_info = vk::RenderPassBeginInfo::builder()
                        .render_pass(self.render_pass.handle())
                        .framebuffer(framebuffer.handle())
                        .render_area(render_area)
                        .clear_values(&clear_values);
                    let viewport = vk::Viewport {
                        x: 0.0,
                        y: 0.0,
                        width: extent.width as f32,
                        height: extent.height as f32,
                        min_depth: 0.0,
                        max_depth: 1.0,
                    };

                    unsafe {
                        device.cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE);
                        device.cmd_set_viewport(command_buffer, 0, &[viewport]);
                        device.cmd_set_scissor(command_buffer, 0, &[render_area]);
                    }
                }
                RenderCommand::BindPipeline(handle) => {
                    let pipeline = self
                        .pipelines
                        .get(&handle.0)
                        .ok_or(GpuError::ResourceNotFound { id: handle.0 })?;
                    layout = Some(pipeline.layout());
                    unsafe {
                        device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline.handle());
                    }
                }
                RenderCommand::BindVertexBuffer(handle) => {
                    let buffer = self.buffer(handle)?.handle();
                    unsafe { device.cmd_bind_vertex_buffers(command_buffer, 0, &[buffer], &[0]) };
                }
                RenderCommand::BindIndexBuffer(handle) => {
                    let buffer = self.buffer(handle)?.handle();
                    unsafe { device.cmd_bind_index_buffer(command_buffer, buffer, 0, vk::IndexType::UINT32) };
                }
                RenderCommand::PushTransform(ref matrix) => {
                    let layout = layout.ok_or_else(|| GpuError::invalid("transform pushed before a pipeline was bound"))?;
                    let bytes = bytemuck::bytes_of(matrix);
                    debug_assert_eq!(bytes.len() as u32, PUSH_CONSTANT_SIZE);
                    unsafe {
                        device.cmd_push_constants(command_buffer, layout, vk::ShaderStageFlags::VERTEX, 0, bytes);
                    }
                }
                RenderCommand::BindUniformSet(handle) => {
                    let layout = layout.ok_or_else(|| GpuError::invalid("uniform set bound before a pipeline was bound"))?;
                    let set = *self
                        .uniform_sets
                        .get(&handle.0)
                        .ok_or(GpuError::ResourceNotFound { id: handle.0 })?;
                    unsafe {
                        device.cmd_bind_descriptor_sets(
                            command_buffer,
                            vk::PipelineBindPoint::GRAPHICS,
                            layout,
                            0,
                            &[set],
                            &[],
                        );
                    }
                }
                RenderCommand::DrawIndexed { index_count } => unsafe {
                    device.cmd_draw_indexed(command_buffer, index_count, 1, 0, 0, 0);
                },
                RenderCommand::EndRenderPass => unsafe {
                    device.cmd_end_render_pass(command_buffer);
                },
            }
        }

        Ok(())
    }
}

impl GpuBackend for VulkanBackend {
    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn surface_extent(&self) -> (u32, u32) {
        let extent = self.swapchain.extent();
        (extent.width, extent.height)
    }

    fn create_semaphore(&mut self) -> GpuResult<SemaphoreHandle> {
        let semaphore = Semaphore::new(self.context.raw_device().clone())?;
        let id = self.allocate_id();
        self.semaphores.insert(id, semaphore);
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        if self.semaphores.remove(&semaphore.0).is_none() {
            log::warn!("Destroying unknown semaphore {}", semaphore.0);
        }
    }

    fn create_fence(&mut self, signaled: bool) -> GpuResult<FenceHandle> {
        let fence = Fence::new(self.context.raw_device().clone(), signaled)?;
        let id = self.allocate_id();
        self.fences.insert(id, fence);
        Ok(FenceHandle(id))
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        if self.fences.remove(&fence.0).is_none() {
            log::warn!("Destroying unknown fence {}", fence.0);
        }
    }

    fn wait_for_fence(&mut self, fence: FenceHandle, timeout_ns: u64) -> GpuResult<FenceStatus> {
        self.fence(fence)?.wait(timeout_ns)
    }

    fn reset_fence(&mut self, fence: FenceHandle) -> GpuResult<()> {
        self.fence(fence)?.reset()
    }

    fn create_buffer(&mut self, size: u64, usage: BufferUsage, location: MemoryLocation) -> GpuResult<BufferHandle> {
        if size == 0 {
            return Err(GpuError::invalid("zero-sized buffer"));
        }
        let buffer = Buffer::new(
            self.context.raw_device().clone(),
            &self.context.physical_device.memory_properties,
            size,
            usage,
            location,
        )?;
        let id = self.allocate_id();
        self.buffers.insert(id, buffer);
        log::trace!("Created buffer {id}: {size} bytes, {usage:?}, {location:?}");
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer.0).is_none() {
            log::warn!("Destroying unknown buffer {}", buffer.0);
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GpuResult<()> {
        self.buffer(buffer)?.write(offset, data)
    }

    fn copy_buffer_blocking(&mut self, src: BufferHandle, dst: BufferHandle, size: u64) -> GpuResult<()> {
        let src = self.buffer(src)?;
        let dst = self.buffer(dst)?;
        if size > src.size() || size > dst.size() {
            return Err(GpuError::invalid(format!(
                "copy of {size} bytes exceeds buffers of {} and {} bytes",
                src.size(),
                dst.size()
            )));
        }

        let (src, dst) = (src.handle(), dst.handle());
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        self.commands
            .run_one_shot(self.context.device.graphics_queue, |device, command_buffer| unsafe {
                device.cmd_copy_buffer(command_buffer, src, dst, &[region]);
            })
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc<'_>) -> GpuResult<PipelineHandle> {
        let device = self.context.raw_device().clone();
        let vertex = ShaderModule::from_bytes(device.clone(), desc.vertex_spirv)?;
        let fragment = ShaderModule::from_bytes(device.clone(), desc.fragment_spirv)?;

        let pipeline = GraphicsPipeline::new(
            device,
            self.render_pass.handle(),
            self.uniform_layout.handle(),
            &vertex,
            &fragment,
        )?;

        let id = self.allocate_id();
        self.pipelines.insert(id, pipeline);
        log::debug!("Created graphics pipeline {id}");
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        if self.pipelines.remove(&pipeline.0).is_none() {
            log::warn!("Destroying unknown pipeline {}", pipeline.0);
        }
    }

    fn create_uniform_set(&mut self, buffer: BufferHandle, range: u64) -> GpuResult<UniformSetHandle> {
        let buffer = self.buffer(buffer)?.handle();
        let set = self
            .uniform_pool
            .allocate(self.uniform_layout.handle(), buffer, range)?;
        let id = self.allocate_id();
        self.uniform_sets.insert(id, set);
        Ok(UniformSetHandle(id))
    }

    fn destroy_uniform_set(&mut self, set: UniformSetHandle) {
        match self.uniform_sets.remove(&set.0) {
            Some(set) => self.uniform_pool.free(set),
            None => log::warn!("Destroying unknown uniform set {}", set.0),
        }
    }

    fn record_commands(&mut self, frame_slot: usize, commands: &CommandSequence) -> GpuResult<()> {
        let command_buffer = self
            .commands
            .frame_buffer(frame_slot)
            .ok_or_else(|| GpuError::invalid(format!("no command buffer for frame slot {frame_slot}")))?;
        let device = self.context.raw_device();

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(vk_error)?;
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(vk_error)?;
        }

        // A failed translation leaves the buffer recording; the next reset
        // discards it and it is never submitted in that state.
        self.translate(command_buffer, commands)?;

        unsafe { device.end_command_buffer(command_buffer).map_err(vk_error) }
    }

    fn submit(&mut self, frame_slot: usize, submission: &Submission) -> GpuResult<()> {
        let wait = submission.wait.map(|s| self.semaphore(s)).transpose()?;
        let signal = submission.signal.map(|s| self.semaphore(s)).transpose()?;
        let fence = match submission.fence {
            Some(fence) => self.fence(fence)?.handle(),
            None => vk::Fence::null(),
        };

        let command_buffers: Vec<vk::CommandBuffer> = if submission.has_commands {
            let command_buffer = self
                .commands
                .frame_buffer(frame_slot)
                .ok_or_else(|| GpuError::invalid(format!("no command buffer for frame slot {frame_slot}")))?;
            vec![command_buffer]
        } else {
            Vec::new()
        };

        let wait_semaphores: Vec<vk::Semaphore> = wait.into_iter().collect();
        let wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait_semaphores.len()];
        let signal_semaphores: Vec<vk::Semaphore> = signal.into_iter().collect();

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.context
                .raw_device()
                .queue_submit(self.context.device.graphics_queue, &[submit_info], fence)
                .map_err(vk_error)
        }
    }

    fn acquire_next_image(&mut self, semaphore: SemaphoreHandle, timeout_ns: u64) -> GpuResult<AcquireOutcome> {
        let semaphore = self.semaphore(semaphore)?;
        let result = unsafe {
            self.swapchain
                .loader()
                .acquire_next_image(self.swapchain.handle(), timeout_ns, semaphore, vk::Fence::null())
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::TIMEOUT) => Ok(AcquireOutcome::Timeout),
            Err(vk::Result::NOT_READY) => Ok(AcquireOutcome::NotReady),
            Err(error) => Err(vk_error(error)),
        }
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> GpuResult<PresentOutcome> {
        let wait_semaphores = [self.semaphore(wait)?];
        let swapchains = [self.swapchain.handle()];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain
                .loader()
                .queue_present(self.context.device.present_queue, &present_info)
        };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(error) => Err(vk_error(error)),
        }
    }

    fn wait_idle(&mut self) -> GpuResult<()> {
        unsafe { self.context.raw_device().device_wait_idle().map_err(vk_error) }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(error) = self.wait_idle() {
            log::error!("Device wait before teardown failed: {error}");
        }
        let leaked = self.buffers.len() + self.semaphores.len() + self.fences.len() + self.pipelines.len();
        if leaked > 0 {
            log::warn!("Releasing {leaked} resources still held by the backend at teardown");
        }
    }
}

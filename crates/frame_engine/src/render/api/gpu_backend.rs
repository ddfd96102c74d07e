//! Backend abstraction for the frame pipeline
//!
//! The frame pipeline only ever talks to the device through [`GpuBackend`].
//! Resources cross the seam as opaque `u64` handles; the backend owns the
//! native objects behind them and releases them when asked to.

use bitflags::bitflags;

use crate::render::frame::command_recorder::CommandSequence;

/// Result type for backend operations
pub type GpuResult<T> = Result<T, GpuError>;

/// Handle to a buffer owned by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// Handle to a GPU-side signal (binary semaphore)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreHandle(pub u64);

/// Handle to a CPU-observable fence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceHandle(pub u64);

/// Handle to a compiled graphics pipeline and its layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub u64);

/// Handle to a bound per-frame uniform (descriptor set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformSetHandle(pub u64);

bitflags! {
    /// How a buffer will be used by the device
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Vertex stream
        const VERTEX = 1 << 0;
        /// Index stream
        const INDEX = 1 << 1;
        /// Uniform block
        const UNIFORM = 1 << 2;
        /// Source of a transfer
        const TRANSFER_SRC = 1 << 3;
        /// Destination of a transfer
        const TRANSFER_DST = 1 << 4;
    }
}

/// Where a buffer's memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// CPU-visible, coherent memory; writable through `write_buffer`
    HostVisible,
    /// GPU-local memory; only reachable through transfers
    DeviceLocal,
}

/// Result of asking the presentation layer for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was handed out; its image-acquired signal will fire
    Acquired {
        /// Index into the image chain
        image_index: u32,
        /// The surface no longer matches exactly but is still usable
        suboptimal: bool,
    },
    /// The image chain no longer matches the surface
    OutOfDate,
    /// No image became available within the timeout
    Timeout,
    /// No image is available right now (zero timeout)
    NotReady,
}

/// Result of queueing an image for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Queued for display
    Presented,
    /// Queued, but the surface no longer matches exactly
    Suboptimal,
    /// The image chain no longer matches the surface
    OutOfDate,
}

/// Result of a bounded fence wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence was observed signaled
    Signaled,
    /// The timeout elapsed first
    TimedOut,
}

/// One queue submission
///
/// With `has_commands` unset nothing executes; the submission only consumes
/// `wait` and signals `signal`/`fence` once the queue reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    /// Signal to wait on before the commands may write color output
    pub wait: Option<SemaphoreHandle>,
    /// Signal raised when the commands retire
    pub signal: Option<SemaphoreHandle>,
    /// Fence raised when the commands retire
    pub fence: Option<FenceHandle>,
    /// Whether the frame slot's recorded commands are part of the batch
    pub has_commands: bool,
}

/// Shader inputs for the single graphics pipeline
#[derive(Debug, Clone, Copy)]
pub struct PipelineDesc<'a> {
    /// Vertex stage SPIR-V
    pub vertex_spirv: &'a [u8],
    /// Fragment stage SPIR-V
    pub fragment_spirv: &'a [u8],
}

/// Backend errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// Raw API failure
    #[error("GPU API error: {0}")]
    Api(String),

    /// Allocation failed
    #[error("Out of memory (requested {requested} bytes)")]
    OutOfMemory {
        /// Bytes asked for
        requested: u64,
    },

    /// A handle did not resolve to a live resource
    #[error("Resource not found: {id}")]
    ResourceNotFound {
        /// Raw handle value
        id: u64,
    },

    /// The call is not valid for the resource or state
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of the misuse
        reason: String,
    },

    /// The device became unusable
    #[error("Device lost")]
    DeviceLost,

    /// Backend bring-up failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No memory type satisfies the request
    #[error("No suitable memory type")]
    NoSuitableMemoryType,
}

impl GpuError {
    /// Whether a frame hitting this error can simply be dropped
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::DeviceLost | Self::InitializationFailed(_))
    }

    /// Shorthand for [`GpuError::InvalidOperation`]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
        }
    }
}

/// Device provider consumed by the frame pipeline
///
/// One implementation drives Vulkan through ash; tests drive a scripted
/// mock. Every call happens on the thread that owns the renderer.
pub trait GpuBackend {
    /// Number of images in the image chain
    fn image_count(&self) -> usize;

    /// Current surface extent (width, height) in pixels
    fn surface_extent(&self) -> (u32, u32);

    /// Create an unsignaled GPU-side signal
    fn create_semaphore(&mut self) -> GpuResult<SemaphoreHandle>;

    /// Release a signal
    fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle);

    /// Create a fence, optionally already signaled
    fn create_fence(&mut self, signaled: bool) -> GpuResult<FenceHandle>;

    /// Release a fence
    fn destroy_fence(&mut self, fence: FenceHandle);

    /// Block until the fence is signaled or `timeout_ns` elapses
    fn wait_for_fence(&mut self, fence: FenceHandle, timeout_ns: u64) -> GpuResult<FenceStatus>;

    /// Return a fence to the unsignaled state
    fn reset_fence(&mut self, fence: FenceHandle) -> GpuResult<()>;

    /// Allocate a buffer of `size` bytes
    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsage,
        location: MemoryLocation,
    ) -> GpuResult<BufferHandle>;

    /// Release a buffer and its memory
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Map, copy `data` at `offset`, unmap; host-visible buffers only
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GpuResult<()>;

    /// Copy `size` bytes between buffers and wait for the queue to go idle
    fn copy_buffer_blocking(
        &mut self,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) -> GpuResult<()>;

    /// Build the graphics pipeline used by every draw
    fn create_pipeline(&mut self, desc: &PipelineDesc<'_>) -> GpuResult<PipelineHandle>;

    /// Release a pipeline
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    /// Bind `range` bytes of a uniform buffer to a new uniform set
    fn create_uniform_set(&mut self, buffer: BufferHandle, range: u64) -> GpuResult<UniformSetHandle>;

    /// Release a uniform set
    fn destroy_uniform_set(&mut self, set: UniformSetHandle);

    /// Translate a command sequence into the frame slot's command buffer
    ///
    /// Only valid once the slot's previous submission has retired.
    fn record_commands(&mut self, frame_slot: usize, commands: &CommandSequence) -> GpuResult<()>;

    /// Submit the frame slot's command buffer to the graphics queue
    fn submit(&mut self, frame_slot: usize, submission: &Submission) -> GpuResult<()>;

    /// Ask for the next presentable image; `semaphore` fires when it is free
    fn acquire_next_image(
        &mut self,
        semaphore: SemaphoreHandle,
        timeout_ns: u64,
    ) -> GpuResult<AcquireOutcome>;

    /// Queue an image for display once `wait` has fired
    fn present(&mut self, image_index: u32, wait: SemaphoreHandle) -> GpuResult<PresentOutcome>;

    /// Block until the device has no pending work
    fn wait_idle(&mut self) -> GpuResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_device_loss_and_init_failures_are_fatal() {
        assert!(!GpuError::DeviceLost.is_transient());
        assert!(!GpuError::InitializationFailed("no device".into()).is_transient());
        assert!(GpuError::OutOfMemory { requested: 64 }.is_transient());
        assert!(GpuError::Api("VK_ERROR_UNKNOWN".into()).is_transient());
        assert!(GpuError::invalid("bad").is_transient());
    }

    #[test]
    fn usage_flags_compose() {
        let usage = BufferUsage::VERTEX | BufferUsage::TRANSFER_DST;
        assert!(usage.contains(BufferUsage::TRANSFER_DST));
        assert!(!usage.contains(BufferUsage::INDEX));
    }
}

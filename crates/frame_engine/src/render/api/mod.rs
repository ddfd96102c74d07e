//! Public rendering API
//!
//! The backend seam consumed by the frame pipeline, plus the vertex format
//! every backend agrees on.

pub mod gpu_backend;
pub mod vertex;

// Re-export commonly used types
pub use gpu_backend::{
    AcquireOutcome, BufferHandle, BufferUsage, FenceHandle, FenceStatus, GpuBackend, GpuError,
    GpuResult, MemoryLocation, PipelineDesc, PipelineHandle, PresentOutcome, SemaphoreHandle,
    Submission, UniformSetHandle,
};
pub use vertex::Vertex;

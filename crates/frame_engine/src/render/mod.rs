//! # Rendering System
//!
//! The frame pipeline and the device backends it runs on.
//!
//! ## Architecture
//!
//! - **API**: the [`GpuBackend`](api::GpuBackend) seam and its handle types
//! - **Frame**: image chain, frame-in-flight sync, uploads, recording, frame loop
//! - **Scene**: object records drawn each frame
//! - **Backends**: the Vulkan implementation (and a scripted mock under test)

pub mod api;
pub mod frame;
pub mod scene;

/// Graphics backend implementations
pub mod backends;

pub use api::{GpuBackend, GpuError, PipelineDesc, PipelineHandle, Vertex};
pub use frame::{DropReason, FrameStats, FrameStatus, Renderer};
pub use scene::{ObjectId, ObjectRecord};

/// Errors surfaced to the application
///
/// Per-frame transient failures never show up here; they are reported as
/// [`FrameStatus::Dropped`].
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    /// Renderer initialization failed during setup
    ///
    /// Occurs when the device, surface, pipeline or per-frame resources
    /// cannot be created. The frame loop is never reached.
    #[error("Renderer initialization failed: {0}")]
    InitializationFailed(String),

    /// A mesh buffer could not be created
    #[error("Failed to create {resource}: {source}")]
    ResourceCreationFailed {
        /// What was being created
        resource: &'static str,
        /// Backend failure
        #[source]
        source: GpuError,
    },

    /// Mesh data is malformed
    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),

    /// No object with this id is loaded
    #[error("Object not found: {0:?}")]
    ObjectNotFound(ObjectId),

    /// The device became unusable
    #[error("Device lost")]
    DeviceLost,

    /// Backend-specific error occurred
    #[error("Backend error: {0}")]
    Backend(GpuError),
}

impl RenderError {
    /// Wrap a resource creation failure, keeping device loss fatal
    pub fn resource(resource: &'static str, source: GpuError) -> Self {
        match source {
            GpuError::DeviceLost => Self::DeviceLost,
            source => Self::ResourceCreationFailed { resource, source },
        }
    }
}

impl From<GpuError> for RenderError {
    fn from(error: GpuError) -> Self {
        match error {
            GpuError::DeviceLost => Self::DeviceLost,
            other => Self::Backend(other),
        }
    }
}

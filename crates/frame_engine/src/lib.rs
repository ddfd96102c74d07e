//! # Frame Engine
//!
//! A Vulkan frame pipeline: acquire an image from the presentation chain,
//! record the scene into the current frame slot's command buffer, submit it
//! with frame-in-flight synchronization, and present.
//!
//! ## Features
//!
//! - **Frames in flight**: up to N frames on the GPU at once, fence-paced
//! - **Staged uploads**: vertex and index data land in device-local memory
//! - **Per-image uniforms**: one view/projection block per swapchain image
//! - **Backend seam**: the pipeline runs against [`render::GpuBackend`], so it
//!   is testable without a GPU
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use frame_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RendererConfig::default();
//!     let mut window = Window::new(&config.window)?;
//!     let mut backend = VulkanBackend::new(&mut window, &config)?;
//!
//!     let (vert, frag) = config.shaders.load_bytes()?;
//!     let pipeline = backend.create_pipeline(&PipelineDesc {
//!         vertex_spirv: &vert,
//!         fragment_spirv: &frag,
//!     })?;
//!     let mut renderer = Renderer::new(backend, &config, pipeline)?;
//!
//!     let vertices = [
//!         Vertex::new([-0.5, -0.5, 0.0], [1.0, 0.0, 0.0]),
//!         Vertex::new([0.5, -0.5, 0.0], [0.0, 1.0, 0.0]),
//!         Vertex::new([0.0, 0.5, 0.0], [0.0, 0.0, 1.0]),
//!     ];
//!     let triangle = renderer.load_mesh(&vertices, &[0, 1, 2])?;
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         renderer.update_object_transform(triangle, Mat4::identity())?;
//!         renderer.render_frame()?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError},
        core::{RendererConfig, ShaderConfig, WindowConfig},
        foundation::math::{Mat4, Vec3, ViewProjection},
        render::{
            backends::vulkan::{VulkanBackend, Window},
            DropReason, FrameStatus, GpuBackend, ObjectId, PipelineDesc, RenderError, Renderer,
            Vertex,
        },
    };
}

//! Vulkan backend
//!
//! Implements [`GpuBackend`](crate::render::api::GpuBackend) with ash and a
//! GLFW window. Everything Vulkan-specific stays behind this module.

pub mod backend;
pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptors;
pub mod pipeline;
pub mod render_pass;
pub mod swapchain;
pub mod sync;
pub mod vertex_layout;
pub mod window;

pub use backend::VulkanBackend;
pub use context::{LogicalDevice, PhysicalDeviceInfo, VulkanContext, VulkanInstance};
pub use swapchain::Swapchain;
pub use window::{Window, WindowError, WindowResult};

use ash::vk;

use crate::render::api::GpuError;

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, GpuError>;

/// Map a raw Vulkan failure onto the backend error type
pub(crate) fn vk_error(result: vk::Result) -> GpuError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => GpuError::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            GpuError::OutOfMemory { requested: 0 }
        }
        vk::Result::ERROR_INITIALIZATION_FAILED => {
            GpuError::InitializationFailed(format!("{result:?}"))
        }
        other => GpuError::Api(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_loss_stays_fatal() {
        assert_eq!(vk_error(vk::Result::ERROR_DEVICE_LOST), GpuError::DeviceLost);
        assert!(!vk_error(vk::Result::ERROR_DEVICE_LOST).is_transient());
    }

    #[test]
    fn other_failures_are_transient() {
        assert!(matches!(
            vk_error(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            GpuError::OutOfMemory { .. }
        ));
        assert!(vk_error(vk::Result::ERROR_SURFACE_LOST_KHR).is_transient());
    }
}

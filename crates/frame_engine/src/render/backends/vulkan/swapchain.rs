//! Swapchain creation
//!
//! Negotiated once against the surface; the image chain is fixed for the
//! lifetime of the backend.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use super::context::VulkanContext;
use super::{vk_error, VulkanResult};
use crate::render::api::GpuError;

/// Preferred surface format, falling back to whatever the surface offers first
fn choose_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_UNORM && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: window_extent
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window_extent
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

/// Swapchain with one view per image
pub struct Swapchain {
    device: Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create the swapchain for the context's surface
    pub fn new(context: &VulkanContext, window_extent: vk::Extent2D) -> VulkanResult<Self> {
        let device = context.raw_device().clone();
        let physical = context.physical_device.device;
        let surface = context.surface;
        let loader = SwapchainLoader::new(&context.instance.instance, &device);

        let (caps, formats, modes) = unsafe {
            (
                context
                    .surface_loader
                    .get_physical_device_surface_capabilities(physical, surface)
                    .map_err(vk_error)?,
                context
                    .surface_loader
                    .get_physical_device_surface_formats(physical, surface)
                    .map_err(vk_error)?,
                context
                    .surface_loader
                    .get_physical_device_surface_present_modes(physical, surface)
                    .map_err(vk_error)?,
            )
        };

        let format = choose_format(&formats)
            .ok_or_else(|| GpuError::InitializationFailed("Surface offers no formats".to_string()))?;
        let present_mode = choose_present_mode(&modes);
        let extent = choose_extent(&caps, window_extent);
        let min_image_count = choose_image_count(&caps);

        let families = [context.physical_device.graphics_family, context.physical_device.present_family];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(min_image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        create_info = if families[0] == families[1] {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        };

        let swapchain = unsafe { loader.create_swapchain(&create_info, None).map_err(vk_error)? };

        let mut this = Self {
            device,
            loader,
            swapchain,
            image_views: Vec::new(),
            format,
            extent,
        };

        let images = unsafe { this.loader.get_swapchain_images(swapchain).map_err(vk_error)? };
        for image in images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            // Views created so far are released by Drop on failure
            let view = unsafe { this.device.create_image_view(&create_info, None).map_err(vk_error)? };
            this.image_views.push(view);
        }

        log::info!(
            "Swapchain: {} images, {:?}, {:?}, {}x{}",
            this.image_views.len(),
            format.format,
            present_mode,
            extent.width,
            extent.height
        );

        Ok(this)
    }

    /// Swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Surface format of the images
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// One view per image, in image-index order
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Raw swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Swapchain extension loader
    pub fn loader(&self) -> &SwapchainLoader {
        &self.loader
    }

    /// Number of images in the chain
    pub fn image_count(&self) -> usize {
        self.image_views.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &image_view in &self.image_views {
                self.device.destroy_image_view(image_view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

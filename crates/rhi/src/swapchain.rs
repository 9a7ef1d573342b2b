//! Swapchain management.
//!
//! [`SwapchainManager`] owns the presentable images of one surface and one
//! view per image. Creation and recreation share a single path: the previous
//! swapchain handle is handed to the driver, and only once the replacement
//! exists are the old views and the old swapchain destroyed.
//!
//! The selection policy is intentionally simple:
//! - color format: the first reported one, or B8G8R8A8_UNORM when the surface
//!   reports a single UNDEFINED entry
//! - extent: the surface's current extent unless it reports the "any size"
//!   sentinel, in which case the requested size is used
//! - present mode: FIFO under vsync, otherwise MAILBOX, IMMEDIATE, FIFO
//! - image count: `min_image_count + 1`, clamped to a nonzero maximum

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::backend::{FenceWait, GpuDevice, PresentRequest};
use crate::error::{RhiError, RhiResult};
use crate::image::ImageView;

/// Format used when the surface leaves the choice to the application.
pub const DEFAULT_SURFACE_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

/// Extent value reported by surfaces whose size follows the swapchain.
pub const ANY_SIZE_EXTENT: u32 = u32::MAX;

/// Swapchain surface support details.
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Owner of the swapchain and its image views.
pub struct SwapchainManager {
    device: Arc<dyn GpuDevice>,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<ImageView>,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl SwapchainManager {
    /// Creates the first swapchain for `surface`.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> RhiResult<Self> {
        let mut manager = Self {
            device,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            surface_format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
        };
        manager.create_or_recreate(surface, width, height, vsync)?;
        Ok(manager)
    }

    /// Builds a swapchain for `surface`, replacing the current one if any.
    ///
    /// On failure the previous swapchain, if any, is left untouched.
    ///
    /// # Errors
    ///
    /// - [`RhiError::NoSuitableQueueFamily`] if the graphics family cannot present
    /// - [`RhiError::Surface`] if the surface reports no formats or present modes
    /// - [`RhiError::SwapchainOutOfDate`] if the resolved extent has zero area
    pub fn create_or_recreate(
        &mut self,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> RhiResult<()> {
        let family = self.device.graphics_queue_family();
        if !self.device.surface_supports_present(family, surface)? {
            return Err(RhiError::NoSuitableQueueFamily(format!(
                "presentation (graphics family {})",
                family
            )));
        }

        let support = self.device.surface_support(surface)?;
        if !support.is_adequate() {
            return Err(RhiError::Surface(
                "surface reports no formats or present modes".to_string(),
            ));
        }

        let caps = &support.capabilities;
        let surface_format = choose_surface_format(&support.formats);
        let extent = choose_extent(caps, width, height);
        let present_mode = choose_present_mode(&support.present_modes, vsync);
        let image_count = determine_image_count(caps);

        if extent.width == 0 || extent.height == 0 {
            debug!("Surface has zero area, deferring swapchain creation");
            return Err(RhiError::SwapchainOutOfDate);
        }

        let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        if caps
            .supported_usage_flags
            .contains(vk::ImageUsageFlags::TRANSFER_SRC)
        {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }

        let old_swapchain = self.swapchain;

        info!(
            "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images{}",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            image_count,
            if old_swapchain == vk::SwapchainKHR::null() {
                ""
            } else {
                " (replacing previous)"
            }
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(choose_pre_transform(caps))
            .composite_alpha(choose_composite_alpha(caps))
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = self.device.create_swapchain(&create_info)?;

        // The replacement exists; the old views and swapchain can go now.
        self.destroy_image_views();
        if old_swapchain != vk::SwapchainKHR::null() {
            self.device.destroy_swapchain(old_swapchain);
        }

        self.swapchain = swapchain;
        self.surface = surface;
        self.surface_format = surface_format;
        self.extent = extent;
        self.present_mode = present_mode;
        self.images = self.device.swapchain_images(swapchain)?;
        self.image_views = create_image_views(&self.device, &self.images, surface_format.format)?;

        info!("Swapchain ready with {} images", self.images.len());
        Ok(())
    }

    /// Acquires the next image, signaling `semaphore`.
    ///
    /// Returns `(image_index, suboptimal)`; out-of-date surfaces are reported
    /// as `Err(vk::Result::ERROR_OUT_OF_DATE_KHR)`.
    pub fn acquire_next_image(
        &self,
        wait: FenceWait,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        self.device
            .acquire_next_image(self.swapchain, wait, semaphore)
    }

    /// Presents `image_index` after `wait_semaphore` is signaled.
    ///
    /// Returns true if the swapchain is suboptimal.
    pub fn present(&self, image_index: u32, wait_semaphore: vk::Semaphore) -> Result<bool, vk::Result> {
        self.device.queue_present(&PresentRequest {
            swapchain: self.swapchain,
            image_index,
            wait_semaphore,
        })
    }

    /// Releases the views and the swapchain. Calling it again does nothing.
    pub fn destroy(&mut self) {
        self.destroy_image_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            self.device.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
            self.images.clear();
            info!(
                "Swapchain destroyed (was {}x{})",
                self.extent.width, self.extent.height
            );
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    #[inline]
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.surface_format.color_space
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    #[inline]
    pub fn image_views(&self) -> &[ImageView] {
        &self.image_views
    }

    fn destroy_image_views(&mut self) {
        while let Some(mut view) = self.image_views.pop() {
            view.destroy();
        }
    }
}

impl Drop for SwapchainManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Picks the first reported format, or the default when the surface has no
/// preference (a single UNDEFINED entry).
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    match formats {
        [only] if only.format == vk::Format::UNDEFINED => {
            debug!("Surface has no preferred format, using {:?}", DEFAULT_SURFACE_FORMAT);
            vk::SurfaceFormatKHR {
                format: DEFAULT_SURFACE_FORMAT,
                color_space: only.color_space,
            }
        }
        [first, ..] => *first,
        [] => vk::SurfaceFormatKHR {
            format: DEFAULT_SURFACE_FORMAT,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        },
    }
}

/// Chooses the present mode.
///
/// FIFO is always available and is the only choice under vsync. Without
/// vsync MAILBOX wins over IMMEDIATE.
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }

    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| present_modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Chooses the swapchain extent.
///
/// The surface's current extent is authoritative unless it is the
/// [`ANY_SIZE_EXTENT`] sentinel.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width == ANY_SIZE_EXTENT {
        vk::Extent2D { width, height }
    } else {
        capabilities.current_extent
    }
}

/// One more than the minimum, clamped to the maximum when it is nonzero.
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn choose_pre_transform(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

fn choose_composite_alpha(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&flag| capabilities.supported_composite_alpha.contains(flag))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

fn create_image_views(
    device: &Arc<dyn GpuDevice>,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<ImageView>> {
    let mut image_views = Vec::with_capacity(images.len());

    for &image in images {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::R,
                g: vk::ComponentSwizzle::G,
                b: vk::ComponentSwizzle::B,
                a: vk::ComponentSwizzle::A,
            })
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        // Views created so far are dropped (and destroyed) on early return.
        image_views.push(ImageView::new(device.clone(), &create_info)?);
    }

    debug!("Created {} image views", image_views.len());
    Ok(image_views)
}

//! Image and image view owners.
//!
//! Both types release their handles exactly once: `destroy` nulls the handle
//! so a second call, or the subsequent `Drop`, does nothing.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use tracing::debug;

use crate::backend::{GpuDevice, MemoryId};
use crate::error::RhiResult;

/// Owned `VkImageView`.
pub struct ImageView {
    device: Arc<dyn GpuDevice>,
    view: vk::ImageView,
}

impl ImageView {
    pub fn new(device: Arc<dyn GpuDevice>, info: &vk::ImageViewCreateInfo<'_>) -> RhiResult<Self> {
        let view = device.create_image_view(info)?;
        Ok(Self { device, view })
    }

    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }

    pub fn destroy(&mut self) {
        if self.view != vk::ImageView::null() {
            self.device.destroy_image_view(self.view);
            self.view = vk::ImageView::null();
        }
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Owned `VkImage` together with its bound memory.
///
/// Memory is allocated right after the image is created and released before
/// the image on destruction.
pub struct DeviceImage {
    device: Arc<dyn GpuDevice>,
    image: vk::Image,
    memory: Option<MemoryId>,
    format: vk::Format,
    extent: vk::Extent3D,
}

impl DeviceImage {
    /// Creates the image and binds freshly allocated memory to it.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        info: &vk::ImageCreateInfo<'_>,
        name: &str,
        location: MemoryLocation,
    ) -> RhiResult<Self> {
        let image = device.create_image(info)?;

        let memory = match device.allocate_image_memory(image, name, location) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_image(image);
                return Err(e);
            }
        };

        debug!(
            "Created image '{}' {}x{} ({:?})",
            name, info.extent.width, info.extent.height, info.format
        );

        Ok(Self {
            device,
            image,
            memory: Some(memory),
            format: info.format,
            extent: info.extent,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    /// Frees the memory, then the image.
    pub fn destroy(&mut self) {
        if let Some(memory) = self.memory.take() {
            self.device.free_memory(memory);
        }
        if self.image != vk::Image::null() {
            self.device.destroy_image(self.image);
            self.image = vk::Image::null();
        }
    }
}

impl Drop for DeviceImage {
    fn drop(&mut self) {
        self.destroy();
    }
}

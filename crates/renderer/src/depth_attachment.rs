//! Depth/stencil attachment sized to the swapchain.
//!
//! The format is chosen once from a fixed preference list and stays the same
//! across resizes, so the render pass built against it remains valid. Only
//! the image, its memory and its view are recreated when the extent changes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_renderer::depth_attachment::{DepthAttachment, select_depth_format};
//! use vkframe_rhi::{GpuDevice, vk};
//!
//! # fn example(device: Arc<dyn GpuDevice>) -> Result<(), vkframe_rhi::RhiError> {
//! let format = select_depth_format(device.as_ref())?;
//! let depth = DepthAttachment::new(device, vk::Extent2D { width: 1920, height: 1080 }, format)?;
//! let _view = depth.view();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{debug, info};

use vkframe_rhi::image::{DeviceImage, ImageView};
use vkframe_rhi::{GpuDevice, MemoryLocation, RhiError, RhiResult, vk};

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 5] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

/// Returns the first candidate usable as an optimal-tiling depth attachment.
///
/// # Errors
///
/// [`RhiError::NoSupportedDepthFormat`] when no candidate qualifies.
pub fn select_depth_format(device: &dyn GpuDevice) -> RhiResult<vk::Format> {
    let format = DEPTH_FORMAT_CANDIDATES
        .into_iter()
        .find(|&format| {
            device
                .format_properties(format)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(RhiError::NoSupportedDepthFormat)?;

    debug!("Selected depth format {:?}", format);
    Ok(format)
}

/// Returns true for formats with a stencil component.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::S8_UINT
    )
}

/// View aspect for a depth format.
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil_component(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// Depth image, memory and view.
///
/// Destroyed view first, then memory, then image.
pub struct DepthAttachment {
    view: ImageView,
    image: DeviceImage,
    extent: vk::Extent2D,
}

impl DepthAttachment {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidState(
                "Depth attachment dimensions must be greater than 0".to_string(),
            ));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = DeviceImage::new(
            device.clone(),
            &image_info,
            "depth_attachment",
            MemoryLocation::GpuOnly,
        )?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.handle())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(depth_aspect(format))
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let view = ImageView::new(device, &view_info)?;

        info!(
            "Created depth attachment: {}x{} ({:?})",
            extent.width, extent.height, format
        );

        Ok(Self {
            view,
            image,
            extent,
        })
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view.handle()
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image.handle()
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn destroy(&mut self) {
        self.view.destroy();
        self.image.destroy();
    }
}

impl Drop for DepthAttachment {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkframe_rhi::mock::{Call, MockGpu, ResourceKind};

    #[test]
    fn test_first_supported_candidate_wins() {
        let gpu = MockGpu::new();
        gpu.set_depth_formats(vec![vk::Format::D16_UNORM, vk::Format::D24_UNORM_S8_UINT]);
        assert_eq!(
            select_depth_format(&gpu).unwrap(),
            vk::Format::D24_UNORM_S8_UINT
        );
    }

    #[test]
    fn test_no_depth_format_is_resource_exhaustion() {
        let gpu = MockGpu::new();
        gpu.set_depth_formats(Vec::new());
        let err = select_depth_format(&gpu).unwrap_err();
        assert!(matches!(err, RhiError::NoSupportedDepthFormat));
        assert_eq!(err.kind(), vkframe_rhi::ErrorKind::ResourceExhaustion);
    }

    #[test]
    fn test_depth_aspect() {
        assert_eq!(
            depth_aspect(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            depth_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_attachment_extent_and_usage() {
        let gpu = Arc::new(MockGpu::new());
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let depth = DepthAttachment::new(gpu.clone(), extent, vk::Format::D32_SFLOAT).unwrap();

        let record = gpu.image_records()[0];
        assert_eq!(record.extent.width, 800);
        assert_eq!(record.extent.height, 600);
        assert!(
            record
                .usage
                .contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        );
        assert_eq!(depth.extent(), extent);
    }

    #[test]
    fn test_destroy_order() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();
        let mut depth = DepthAttachment::new(
            gpu.clone(),
            vk::Extent2D {
                width: 4,
                height: 4,
            },
            vk::Format::D32_SFLOAT,
        )
        .unwrap();
        depth.destroy();
        drop(depth);

        let destroys: Vec<ResourceKind> = journal
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Destroy(kind, _) => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            destroys,
            vec![
                ResourceKind::ImageView,
                ResourceKind::Memory,
                ResourceKind::Image
            ]
        );
    }

    #[test]
    fn test_zero_extent_rejected() {
        let gpu = Arc::new(MockGpu::new());
        let result = DepthAttachment::new(
            gpu,
            vk::Extent2D {
                width: 0,
                height: 600,
            },
            vk::Format::D32_SFLOAT,
        );
        assert!(result.is_err());
    }
}

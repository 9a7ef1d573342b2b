//! The size-dependent attachments: the depth attachment and one framebuffer
//! per swapchain image.
//!
//! These are the parts of the resizable bundle that are thrown away and
//! rebuilt on every resize. The render pass they are built against is not.

use std::sync::Arc;

use tracing::debug;

use vkframe_rhi::framebuffer::Framebuffer;
use vkframe_rhi::render_pass::RenderPass;
use vkframe_rhi::swapchain::SwapchainManager;
use vkframe_rhi::{GpuDevice, RhiResult, vk};

use crate::depth_attachment::DepthAttachment;

/// Depth attachment plus framebuffers, sized to the swapchain.
pub struct RenderTargets {
    depth: DepthAttachment,
    framebuffers: Vec<Framebuffer>,
}

impl RenderTargets {
    /// Creates the depth attachment at the swapchain extent, then binds each
    /// swapchain view with the depth view into a framebuffer.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        swapchain: &SwapchainManager,
        render_pass: &RenderPass,
    ) -> RhiResult<Self> {
        let extent = swapchain.extent();
        let depth = DepthAttachment::new(device.clone(), extent, render_pass.depth_format())?;

        let mut framebuffers = Vec::with_capacity(swapchain.image_count());
        for view in swapchain.image_views() {
            let attachments = [view.handle(), depth.view()];
            framebuffers.push(Framebuffer::new(
                device.clone(),
                render_pass.handle(),
                &attachments,
                extent,
            )?);
        }

        debug!(
            "Created {} framebuffers at {}x{}",
            framebuffers.len(),
            extent.width,
            extent.height
        );

        Ok(Self {
            depth,
            framebuffers,
        })
    }

    #[inline]
    pub fn depth(&self) -> &DepthAttachment {
        &self.depth
    }

    #[inline]
    pub fn framebuffers(&self) -> &[Framebuffer] {
        &self.framebuffers
    }

    #[inline]
    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index].handle()
    }

    /// Destroys the framebuffers (newest first), then the depth attachment.
    pub fn destroy(&mut self) {
        while let Some(mut framebuffer) = self.framebuffers.pop() {
            framebuffer.destroy();
        }
        self.depth.destroy();
    }
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        self.destroy();
    }
}

//! Device capability trait.
//!
//! [`GpuDevice`] is the single object every RHI wrapper receives instead of
//! reaching for process-wide function tables. It mirrors the subset of Vulkan
//! entry points the presentation subsystem needs, taking and returning raw
//! `vk` handles so the owning wrappers stay in charge of lifetimes.
//!
//! [`DeviceContext`](crate::device::DeviceContext) implements it on top of
//! `ash`; the recording mock (feature `mock`) implements it for tests.

use std::time::Duration;

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::error::RhiResult;
use crate::swapchain::SwapchainSupportDetails;

/// Opaque handle to a device memory allocation bound to an image or buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemoryId(u64);

impl MemoryId {
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// How long a host-side wait may block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FenceWait {
    /// Block until signaled.
    #[default]
    Infinite,
    /// Give up after the duration and report [`RhiError::Timeout`](crate::RhiError::Timeout).
    Timeout(Duration),
}

impl FenceWait {
    /// Builds a wait from an optional millisecond budget.
    pub fn from_millis(timeout_ms: Option<u64>) -> Self {
        match timeout_ms {
            Some(ms) => Self::Timeout(Duration::from_millis(ms)),
            None => Self::Infinite,
        }
    }

    /// Timeout in nanoseconds, `u64::MAX` meaning infinite.
    pub fn as_nanos(self) -> u64 {
        match self {
            Self::Infinite => u64::MAX,
            Self::Timeout(d) => u64::try_from(d.as_nanos()).unwrap_or(u64::MAX - 1),
        }
    }
}

/// One command buffer submission on the graphics queue.
#[derive(Clone, Copy, Debug)]
pub struct SubmitBatch {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

/// One present request on the graphics queue.
#[derive(Clone, Copy, Debug)]
pub struct PresentRequest {
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
    pub wait_semaphore: vk::Semaphore,
}

/// Device capability object.
///
/// Creation methods return the raw handle; destruction methods accept
/// handles that are guaranteed live by the caller. Frame-path methods
/// (`acquire_next_image`, `queue_submit`, `queue_present`, `wait_for_fence`)
/// return the bare `vk::Result` so the frame scheduler can distinguish
/// transient results from fatal ones.
pub trait GpuDevice: Send + Sync {
    // ========================================================================
    // Device
    // ========================================================================

    /// Queue family used for graphics and presentation.
    fn graphics_queue_family(&self) -> u32;

    /// Memory type table of the adapter.
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;

    /// Format capabilities of the adapter.
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;

    /// Blocks until every queue is idle.
    fn wait_idle(&self) -> RhiResult<()>;

    // ========================================================================
    // Surface and swapchain
    // ========================================================================

    fn surface_support(&self, surface: vk::SurfaceKHR) -> RhiResult<SwapchainSupportDetails>;

    fn surface_supports_present(&self, queue_family: u32, surface: vk::SurfaceKHR)
    -> RhiResult<bool>;

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR<'_>)
    -> RhiResult<vk::SwapchainKHR>;

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>>;

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    /// Returns `(image_index, suboptimal)`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        wait: FenceWait,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result>;

    /// Returns `true` when the swapchain is suboptimal.
    fn queue_present(&self, request: &PresentRequest) -> Result<bool, vk::Result>;

    // ========================================================================
    // Images, buffers and memory
    // ========================================================================

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> RhiResult<vk::Image>;

    fn destroy_image(&self, image: vk::Image);

    /// Allocates memory for `image` and binds it.
    fn allocate_image_memory(
        &self,
        image: vk::Image,
        name: &str,
        location: MemoryLocation,
    ) -> RhiResult<MemoryId>;

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> RhiResult<vk::Buffer>;

    fn destroy_buffer(&self, buffer: vk::Buffer);

    /// Allocates memory for `buffer` and binds it.
    fn allocate_buffer_memory(
        &self,
        buffer: vk::Buffer,
        name: &str,
        location: MemoryLocation,
    ) -> RhiResult<MemoryId>;

    /// Copies `data` into a host-visible allocation.
    fn write_memory(&self, memory: MemoryId, offset: usize, data: &[u8]) -> RhiResult<()>;

    fn free_memory(&self, memory: MemoryId);

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> RhiResult<vk::ImageView>;

    fn destroy_image_view(&self, view: vk::ImageView);

    // ========================================================================
    // Render pass and framebuffers
    // ========================================================================

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>)
    -> RhiResult<vk::RenderPass>;

    fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo<'_>)
    -> RhiResult<vk::Framebuffer>;

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // ========================================================================
    // Command pool and recording
    // ========================================================================

    fn create_command_pool(&self, info: &vk::CommandPoolCreateInfo<'_>)
    -> RhiResult<vk::CommandPool>;

    fn destroy_command_pool(&self, pool: vk::CommandPool);

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>>;

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);

    fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()>;

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> RhiResult<()>;

    fn cmd_begin_render_pass(&self, buffer: vk::CommandBuffer, info: &vk::RenderPassBeginInfo<'_>);

    fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer);

    fn cmd_set_viewport(&self, buffer: vk::CommandBuffer, viewport: vk::Viewport);

    fn cmd_set_scissor(&self, buffer: vk::CommandBuffer, scissor: vk::Rect2D);

    fn cmd_bind_pipeline(&self, buffer: vk::CommandBuffer, pipeline: vk::Pipeline);

    fn cmd_bind_descriptor_sets(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
    );

    fn cmd_bind_vertex_buffer(&self, buffer: vk::CommandBuffer, vertex_buffer: vk::Buffer);

    fn cmd_bind_index_buffer(
        &self,
        buffer: vk::CommandBuffer,
        index_buffer: vk::Buffer,
        index_type: vk::IndexType,
    );

    fn cmd_draw_indexed(
        &self,
        buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    // ========================================================================
    // Synchronization and submission
    // ========================================================================

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;

    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;

    fn destroy_fence(&self, fence: vk::Fence);

    fn wait_for_fence(&self, fence: vk::Fence, wait: FenceWait) -> Result<(), vk::Result>;

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()>;

    fn fence_signaled(&self, fence: vk::Fence) -> RhiResult<bool>;

    fn queue_submit(&self, batch: &SubmitBatch) -> Result<(), vk::Result>;

    // ========================================================================
    // Pipelines and descriptors
    // ========================================================================

    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule>;

    fn destroy_shader_module(&self, module: vk::ShaderModule);

    fn create_pipeline_cache(&self, initial_data: &[u8]) -> RhiResult<vk::PipelineCache>;

    fn pipeline_cache_data(&self, cache: vk::PipelineCache) -> RhiResult<Vec<u8>>;

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache);

    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::PipelineLayout>;

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);

    fn create_graphics_pipeline(
        &self,
        cache: vk::PipelineCache,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> RhiResult<vk::Pipeline>;

    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorSetLayout>;

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorPool>;

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>>;

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_wait_nanos() {
        assert_eq!(FenceWait::Infinite.as_nanos(), u64::MAX);
        assert_eq!(
            FenceWait::Timeout(Duration::from_millis(2)).as_nanos(),
            2_000_000
        );
    }

    #[test]
    fn test_fence_wait_from_millis() {
        assert_eq!(FenceWait::from_millis(None), FenceWait::Infinite);
        assert_eq!(
            FenceWait::from_millis(Some(16)),
            FenceWait::Timeout(Duration::from_millis(16))
        );
    }

    #[test]
    fn test_gpu_device_is_object_safe() {
        fn assert_object_safe(_: Option<&dyn GpuDevice>) {}
        assert_object_safe(None);
    }
}

//! Command pool and command buffer management.
//!
//! - [`CommandPool`] owns a `VkCommandPool` on the graphics family whose
//!   buffers can be reset individually.
//! - [`CommandBuffers`] owns a batch of primary buffers allocated from it,
//!   one per swapchain image.
//! - [`CommandRecorder`] is a borrowed view of one buffer with the
//!   recording calls the frame loop uses.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_rhi::backend::GpuDevice;
//! use vkframe_rhi::command::{CommandBuffers, CommandPool};
//!
//! # fn example(device: Arc<dyn GpuDevice>) -> Result<(), vkframe_rhi::RhiError> {
//! let pool = CommandPool::new(device.clone(), device.graphics_queue_family())?;
//! let buffers = CommandBuffers::allocate(device.clone(), &pool, 3)?;
//!
//! let cmd = buffers.recorder(0);
//! cmd.begin()?;
//! // ... record ...
//! cmd.end()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::backend::GpuDevice;
use crate::error::RhiResult;

/// Owned command pool.
///
/// Command pools are externally synchronized; record from one thread at a
/// time.
pub struct CommandPool {
    device: Arc<dyn GpuDevice>,
    pool: vk::CommandPool,
    queue_family_index: u32,
}

impl CommandPool {
    /// Creates a pool whose buffers may be reset and re-recorded one by one.
    pub fn new(device: Arc<dyn GpuDevice>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let pool = device.create_command_pool(&create_info)?;

        debug!("Created command pool for queue family {}", queue_family_index);

        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn destroy(&mut self) {
        if self.pool != vk::CommandPool::null() {
            self.device.destroy_command_pool(self.pool);
            self.pool = vk::CommandPool::null();
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Primary command buffers allocated together from one pool.
///
/// Must be freed (or dropped) before the pool is destroyed.
pub struct CommandBuffers {
    device: Arc<dyn GpuDevice>,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl CommandBuffers {
    pub fn allocate(
        device: Arc<dyn GpuDevice>,
        pool: &CommandPool,
        count: u32,
    ) -> RhiResult<Self> {
        let buffers = device.allocate_command_buffers(pool.handle(), count)?;
        debug!("Allocated {} command buffers", buffers.len());

        Ok(Self {
            device,
            pool: pool.handle(),
            buffers,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    #[inline]
    pub fn handle(&self, index: usize) -> vk::CommandBuffer {
        self.buffers[index]
    }

    pub fn handles(&self) -> &[vk::CommandBuffer] {
        &self.buffers
    }

    /// Recording view of buffer `index`.
    pub fn recorder(&self, index: usize) -> CommandRecorder<'_> {
        CommandRecorder {
            device: self.device.as_ref(),
            buffer: self.buffers[index],
        }
    }

    /// Returns the buffers to the pool, last allocated first.
    pub fn free(&mut self) {
        if !self.buffers.is_empty() {
            let buffers: Vec<vk::CommandBuffer> = self.buffers.drain(..).rev().collect();
            self.device.free_command_buffers(self.pool, &buffers);
        }
    }
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        self.free();
    }
}

/// Records into one command buffer.
#[derive(Clone, Copy)]
pub struct CommandRecorder<'a> {
    device: &'a dyn GpuDevice,
    buffer: vk::CommandBuffer,
}

impl<'a> CommandRecorder<'a> {
    pub fn new(device: &'a dyn GpuDevice, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Begins recording for repeated submission.
    ///
    /// The pool's RESET_COMMAND_BUFFER flag makes this an implicit reset.
    pub fn begin(&self) -> RhiResult<()> {
        self.device
            .begin_command_buffer(self.buffer, vk::CommandBufferUsageFlags::empty())
    }

    pub fn end(&self) -> RhiResult<()> {
        self.device.end_command_buffer(self.buffer)
    }

    pub fn begin_render_pass(&self, info: &vk::RenderPassBeginInfo<'_>) {
        self.device.cmd_begin_render_pass(self.buffer, info);
    }

    pub fn end_render_pass(&self) {
        self.device.cmd_end_render_pass(self.buffer);
    }

    pub fn set_viewport(&self, viewport: vk::Viewport) {
        self.device.cmd_set_viewport(self.buffer, viewport);
    }

    pub fn set_scissor(&self, scissor: vk::Rect2D) {
        self.device.cmd_set_scissor(self.buffer, scissor);
    }

    pub fn bind_pipeline(&self, pipeline: vk::Pipeline) {
        self.device.cmd_bind_pipeline(self.buffer, pipeline);
    }

    pub fn bind_descriptor_sets(&self, layout: vk::PipelineLayout, sets: &[vk::DescriptorSet]) {
        self.device.cmd_bind_descriptor_sets(self.buffer, layout, sets);
    }

    pub fn bind_vertex_buffer(&self, buffer: vk::Buffer) {
        self.device.cmd_bind_vertex_buffer(self.buffer, buffer);
    }

    pub fn bind_index_buffer(&self, buffer: vk::Buffer, index_type: vk::IndexType) {
        self.device
            .cmd_bind_index_buffer(self.buffer, buffer, index_type);
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.device.cmd_draw_indexed(
            self.buffer,
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        );
    }
}

/// Viewport covering `extent` with the 0..1 depth range.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor covering `extent`.
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

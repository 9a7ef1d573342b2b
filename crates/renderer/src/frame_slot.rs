//! Per-image frame slots and the shared presentation semaphores.
//!
//! Every swapchain image owns one [`FrameSlot`]-worth of resources: a
//! pre-recorded command buffer and a fence that is signaled exactly when the
//! last submission of that buffer has retired on the device.
//!
//! # Synchronization Flow
//!
//! ```text
//! 1. Acquire image i          (signals `acquired`)
//! 2. Wait on fence[i], reset  (previous use of slot i has retired)
//! 3. Submit command_buffer[i] (waits `acquired`, signals `render_complete`,
//!                              signals fence[i])
//! 4. Present image i          (waits `render_complete`)
//! ```
//!
//! One semaphore pair is shared by all slots. That is enough because the
//! frame loop presents in submission order.

use std::sync::Arc;

use tracing::{debug, info};

use vkframe_rhi::command::{CommandBuffers, CommandPool, CommandRecorder, full_scissor, full_viewport};
use vkframe_rhi::sync::{Fence, Semaphore};
use vkframe_rhi::{GpuDevice, RhiError, RhiResult, vk};

/// Borrowed view of one slot.
#[derive(Clone, Copy)]
pub struct FrameSlot<'a> {
    pub command_buffer: vk::CommandBuffer,
    pub fence: &'a Fence,
}

/// Command buffers and completion fences, one per swapchain image.
///
/// Command buffers are freed and reallocated on resize; fences survive
/// resizes and are only added or removed when the image count changes.
pub struct FrameSlotSet {
    device: Arc<dyn GpuDevice>,
    command_buffers: CommandBuffers,
    fences: Vec<Fence>,
}

impl FrameSlotSet {
    /// Allocates `count` command buffers, then `count` fences created
    /// signaled so the first wait on each slot returns immediately.
    pub fn new(device: Arc<dyn GpuDevice>, pool: &CommandPool, count: usize) -> RhiResult<Self> {
        let command_buffers = CommandBuffers::allocate(device.clone(), pool, count as u32)?;

        let mut fences = Vec::with_capacity(count);
        for _ in 0..count {
            fences.push(Fence::new(device.clone(), true)?);
        }

        info!("Created {} frame slots", count);

        Ok(Self {
            device,
            command_buffers,
            fences,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.command_buffers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.command_buffers.is_empty()
    }

    /// Slot for swapchain image `image_index`.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidState`] when the driver hands out an index with no
    /// slot behind it.
    pub fn slot(&self, image_index: u32) -> RhiResult<FrameSlot<'_>> {
        let index = image_index as usize;
        match self.fences.get(index) {
            Some(fence) if index < self.command_buffers.len() => Ok(FrameSlot {
                command_buffer: self.command_buffers.handle(index),
                fence,
            }),
            _ => Err(RhiError::InvalidState(format!(
                "No frame slot for image index {} ({} slots)",
                image_index,
                self.len()
            ))),
        }
    }

    #[inline]
    pub fn command_buffer(&self, index: usize) -> vk::CommandBuffer {
        self.command_buffers.handle(index)
    }

    #[inline]
    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        self.command_buffers.handles()
    }

    pub fn recorder(&self, index: usize) -> CommandRecorder<'_> {
        self.command_buffers.recorder(index)
    }

    #[inline]
    pub fn fence(&self, index: usize) -> &Fence {
        &self.fences[index]
    }

    #[inline]
    pub fn fence_count(&self) -> usize {
        self.fences.len()
    }

    /// Returns every command buffer to the pool. The fences are kept.
    ///
    /// The device must be idle.
    pub fn free_command_buffers(&mut self) {
        self.command_buffers.free();
    }

    /// Allocates `count` fresh command buffers and brings the fence count to
    /// `count`. New fences start signaled.
    pub fn reallocate(&mut self, pool: &CommandPool, count: usize) -> RhiResult<()> {
        self.command_buffers.free();
        self.command_buffers = CommandBuffers::allocate(self.device.clone(), pool, count as u32)?;

        while self.fences.len() > count {
            if let Some(mut fence) = self.fences.pop() {
                fence.destroy();
            }
        }
        while self.fences.len() < count {
            self.fences.push(Fence::new(self.device.clone(), true)?);
        }

        debug!("Reallocated {} frame slots", count);
        Ok(())
    }

    /// Destroys the fences (newest first), then frees the command buffers.
    pub fn destroy(&mut self) {
        while let Some(mut fence) = self.fences.pop() {
            fence.destroy();
        }
        self.command_buffers.free();
    }
}

impl Drop for FrameSlotSet {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// The "acquired" and "render-complete" semaphores shared by every frame.
pub struct PresentationSemaphores {
    device: Arc<dyn GpuDevice>,
    acquired: Semaphore,
    render_complete: Semaphore,
}

impl PresentationSemaphores {
    pub fn new(device: Arc<dyn GpuDevice>) -> RhiResult<Self> {
        let acquired = Semaphore::new(device.clone())?;
        let render_complete = Semaphore::new(device.clone())?;
        debug!("Created presentation semaphores");

        Ok(Self {
            device,
            acquired,
            render_complete,
        })
    }

    /// Signaled by acquire, waited on by submit.
    #[inline]
    pub fn acquired(&self) -> vk::Semaphore {
        self.acquired.handle()
    }

    /// Signaled by submit, waited on by present.
    #[inline]
    pub fn render_complete(&self) -> vk::Semaphore {
        self.render_complete.handle()
    }

    /// Replaces the "acquired" semaphore.
    ///
    /// Used after an acquire signaled it but the frame was skipped; nothing
    /// will ever wait on that signal. The device must be idle.
    pub fn renew_acquired(&mut self) -> RhiResult<()> {
        let replacement = Semaphore::new(self.device.clone())?;
        let mut stale = std::mem::replace(&mut self.acquired, replacement);
        stale.destroy();
        debug!("Renewed acquire semaphore");
        Ok(())
    }

    /// Destroys render-complete, then acquired.
    pub fn destroy(&mut self) {
        self.render_complete.destroy();
        self.acquired.destroy();
    }
}

impl Drop for PresentationSemaphores {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// What a slot's command buffer draws, beyond the clear.
#[derive(Clone, Copy, Debug)]
pub struct DrawBinding {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
}

/// Everything needed to record one slot.
#[derive(Clone, Copy, Debug)]
pub struct SlotRecording {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub draw: Option<DrawBinding>,
}

/// Records the full draw sequence for one image.
///
/// The render pass always clears color and depth. The draw is recorded only
/// when `recording.draw` is set.
pub fn record_slot(cmd: CommandRecorder<'_>, recording: &SlotRecording) -> RhiResult<()> {
    cmd.begin()?;

    let clear_values = [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: recording.clear_color,
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ];

    let begin_info = vk::RenderPassBeginInfo::default()
        .render_pass(recording.render_pass)
        .framebuffer(recording.framebuffer)
        .render_area(full_scissor(recording.extent))
        .clear_values(&clear_values);

    cmd.begin_render_pass(&begin_info);
    cmd.set_viewport(full_viewport(recording.extent));
    cmd.set_scissor(full_scissor(recording.extent));

    if let Some(draw) = recording.draw {
        cmd.bind_descriptor_sets(draw.layout, &[draw.descriptor_set]);
        cmd.bind_pipeline(draw.pipeline);
        cmd.bind_vertex_buffer(draw.vertex_buffer);
        cmd.bind_index_buffer(draw.index_buffer, vk::IndexType::UINT32);
        cmd.draw_indexed(draw.index_count, 1, 0, 0, 1);
    }

    cmd.end_render_pass();
    cmd.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkframe_rhi::mock::{Call, MockGpu, ResourceKind};

    fn setup(count: usize) -> (Arc<MockGpu>, CommandPool, FrameSlotSet) {
        let gpu = Arc::new(MockGpu::new());
        let pool = CommandPool::new(gpu.clone(), 0).unwrap();
        let slots = FrameSlotSet::new(gpu.clone(), &pool, count).unwrap();
        (gpu, pool, slots)
    }

    #[test]
    fn test_fences_start_signaled() {
        let (gpu, _pool, slots) = setup(3);
        assert_eq!(slots.len(), 3);
        for i in 0..3 {
            assert!(gpu.is_fence_signaled(slots.fence(i).handle()));
        }
    }

    #[test]
    fn test_slot_lookup_out_of_range() {
        let (_gpu, _pool, slots) = setup(2);
        assert!(slots.slot(1).is_ok());
        assert!(matches!(slots.slot(2), Err(RhiError::InvalidState(_))));
    }

    #[test]
    fn test_reallocate_reconciles_fences() {
        let (gpu, pool, mut slots) = setup(3);
        let journal = gpu.journal();

        slots.free_command_buffers();
        slots.reallocate(&pool, 2).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots.fence_count(), 2);
        assert_eq!(journal.destroyed(ResourceKind::Fence).len(), 1);

        slots.reallocate(&pool, 4).unwrap();
        assert_eq!(slots.fence_count(), 4);
        assert!(gpu.is_fence_signaled(slots.fence(3).handle()));
        assert_eq!(journal.created(ResourceKind::CommandBuffer).len(), 3 + 2 + 4);
        assert_eq!(journal.destroyed(ResourceKind::CommandBuffer).len(), 3 + 2);
    }

    #[test]
    fn test_destroy_reverses_creation() {
        let (gpu, pool, mut slots) = setup(2);
        let journal = gpu.journal();
        slots.destroy();
        slots.destroy();
        drop(slots);
        drop(pool);

        let created: Vec<u64> = journal
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create(ResourceKind::CommandBuffer | ResourceKind::Fence, h) => Some(h),
                _ => None,
            })
            .collect();
        let mut destroyed: Vec<u64> = journal
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Destroy(ResourceKind::CommandBuffer | ResourceKind::Fence, h) => Some(h),
                _ => None,
            })
            .collect();
        destroyed.reverse();
        assert_eq!(created, destroyed);
    }

    #[test]
    fn test_renew_acquired_replaces_handle() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();
        let mut semaphores = PresentationSemaphores::new(gpu).unwrap();
        let before = semaphores.acquired();

        semaphores.renew_acquired().unwrap();
        assert_ne!(semaphores.acquired(), before);
        assert_eq!(journal.destroyed(ResourceKind::Semaphore), vec![
            vk::Handle::as_raw(before)
        ]);
    }

    #[test]
    fn test_record_clear_only() {
        let (gpu, _pool, slots) = setup(1);
        let journal = gpu.journal();
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };

        record_slot(
            slots.recorder(0),
            &SlotRecording {
                render_pass: vk::RenderPass::null(),
                framebuffer: vk::Framebuffer::null(),
                extent,
                clear_color: [0.0, 0.0, 0.0, 1.0],
                draw: None,
            },
        )
        .unwrap();

        assert_eq!(journal.count(|c| matches!(c, Call::DrawIndexed { .. })), 0);
        assert_eq!(
            journal.count(|c| matches!(
                c,
                Call::SetViewport { width, height, .. } if *width == 640.0 && *height == 480.0
            )),
            1
        );
        assert_eq!(journal.count(|c| matches!(c, Call::EndCommandBuffer(_))), 1);
    }

    #[test]
    fn test_record_draw_order() {
        let (gpu, _pool, slots) = setup(1);
        let journal = gpu.journal();

        record_slot(
            slots.recorder(0),
            &SlotRecording {
                render_pass: vk::RenderPass::null(),
                framebuffer: vk::Framebuffer::null(),
                extent: vk::Extent2D {
                    width: 8,
                    height: 8,
                },
                clear_color: [0.0; 4],
                draw: Some(DrawBinding {
                    pipeline: vk::Handle::from_raw(0xA),
                    layout: vk::Handle::from_raw(0xB),
                    descriptor_set: vk::Handle::from_raw(0xC),
                    vertex_buffer: vk::Handle::from_raw(0xD),
                    index_buffer: vk::Handle::from_raw(0xE),
                    index_count: 3,
                }),
            },
        )
        .unwrap();

        let sets = journal
            .position(|c| matches!(c, Call::BindDescriptorSets { count: 1, .. }))
            .unwrap();
        let pipeline = journal
            .position(|c| matches!(c, Call::BindPipeline { pipeline: 0xA, .. }))
            .unwrap();
        let vertex = journal
            .position(|c| matches!(c, Call::BindVertexBuffer { buffer: 0xD, .. }))
            .unwrap();
        let index = journal
            .position(|c| matches!(c, Call::BindIndexBuffer { buffer: 0xE, .. }))
            .unwrap();
        let draw = journal
            .position(|c| matches!(c, Call::DrawIndexed { index_count: 3, .. }))
            .unwrap();
        let end = journal
            .position(|c| matches!(c, Call::EndRenderPass(_)))
            .unwrap();

        assert!(sets < pipeline && pipeline < vertex && vertex < index);
        assert!(index < draw && draw < end);
    }
}

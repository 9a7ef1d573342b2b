//! Renderer facade.
//!
//! [`Renderer`] owns the resizable resource bundle and drives it:
//!
//! - [`Renderer::initialize`] builds the bundle for a surface.
//! - [`Renderer::build_pipelines`] compiles the graphics pipeline.
//! - [`Renderer::render`] runs one frame through the [`FrameScheduler`].
//! - [`Renderer::resize_resources`] runs the resize protocol.
//!
//! # Resize protocol
//!
//! ```text
//! 1. wait for the device to go idle
//! 2. destroy framebuffers, depth attachment, slot command buffers
//! 3. recreate the swapchain (handing off the old one), depth attachment,
//!    framebuffers and command buffers
//! 4. re-record every slot at the new extent
//! ```
//!
//! The render pass, pipeline, layouts and fences survive a resize.
//!
//! # Threading
//!
//! `render` and `resize_resources` take `&mut self`, so they can never
//! overlap. The renderer is `Send` and may live on a dedicated render thread.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use vkframe_rhi::buffer::{Buffer, BufferUsage};
use vkframe_rhi::command::CommandPool;
use vkframe_rhi::pipeline::{PipelineOptions, VertexInputLayout};
use vkframe_rhi::render_pass::RenderPass;
use vkframe_rhi::shader::Shader;
use vkframe_rhi::swapchain::{SwapchainManager, choose_extent};
use vkframe_rhi::{FenceWait, GpuDevice, RhiError, RhiResult, vk};

use crate::depth_attachment::select_depth_format;
use crate::frame_scheduler::{FrameOutcome, FrameScheduler, FrameState, FrameStep};
use crate::frame_slot::{DrawBinding, FrameSlotSet, PresentationSemaphores, SlotRecording, record_slot};
use crate::pipeline_resources::PipelineResourceSet;
use crate::render_targets::RenderTargets;

/// Renderer tunables.
#[derive(Clone, Debug)]
pub struct RendererSettings {
    /// Always use FIFO presentation.
    pub vsync: bool,
    /// Color the render pass clears to.
    pub clear_color: [f32; 4],
    /// Bound on acquire and per-slot fence waits.
    pub fence_wait: FenceWait,
    /// Where the pipeline cache is loaded from and saved to.
    pub pipeline_cache_path: Option<PathBuf>,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            vsync: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            fence_wait: FenceWait::Infinite,
            pipeline_cache_path: None,
        }
    }
}

/// Vertex and index buffers for the single indexed draw.
pub struct DrawSource {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
}

impl DrawSource {
    /// Draws every `u32` index in `index_buffer`.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidState`] if the buffers were created with the wrong
    /// usage.
    pub fn new(vertex_buffer: Buffer, index_buffer: Buffer) -> RhiResult<Self> {
        if vertex_buffer.usage() != BufferUsage::Vertex {
            return Err(RhiError::InvalidState(
                "Draw source needs a vertex buffer".to_string(),
            ));
        }
        if index_buffer.usage() != BufferUsage::Index {
            return Err(RhiError::InvalidState(
                "Draw source needs an index buffer".to_string(),
            ));
        }

        let index_count = (index_buffer.size() / std::mem::size_of::<u32>() as u64) as u32;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count,
        })
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn destroy(&mut self) {
        self.index_buffer.destroy();
        self.vertex_buffer.destroy();
    }
}

/// Owns the swapchain-dependent bundle and runs the frame loop.
pub struct Renderer {
    device: Arc<dyn GpuDevice>,
    settings: RendererSettings,
    surface: vk::SurfaceKHR,
    /// Last size requested by the window system.
    requested: vk::Extent2D,
    command_pool: CommandPool,
    swapchain: SwapchainManager,
    render_pass: RenderPass,
    targets: RenderTargets,
    slots: FrameSlotSet,
    semaphores: PresentationSemaphores,
    pipeline_resources: PipelineResourceSet,
    draw: Option<DrawSource>,
    uniform: Option<Buffer>,
    scheduler: FrameScheduler,
    /// Zero-area surface; frames are skipped until a nonzero resize.
    suspended: bool,
    /// The acquire semaphore holds a signal nothing will wait on.
    acquired_stale: bool,
}

impl Renderer {
    /// Builds the full bundle for `surface` at the requested size.
    ///
    /// Creation order: command pool, swapchain and views, render pass,
    /// depth attachment and framebuffers, frame slots, semaphores, pipeline
    /// resources. Teardown runs in exactly the reverse order.
    pub fn initialize(
        device: Arc<dyn GpuDevice>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        settings: RendererSettings,
    ) -> RhiResult<Self> {
        info!("Initializing renderer at {}x{}", width, height);

        let command_pool = CommandPool::new(device.clone(), device.graphics_queue_family())?;

        let swapchain =
            SwapchainManager::new(device.clone(), surface, width, height, settings.vsync)?;

        let depth_format = select_depth_format(device.as_ref())?;
        let render_pass = RenderPass::new(device.clone(), swapchain.format(), depth_format)?;

        let targets = RenderTargets::new(device.clone(), &swapchain, &render_pass)?;

        let slots = FrameSlotSet::new(device.clone(), &command_pool, swapchain.image_count())?;
        let semaphores = PresentationSemaphores::new(device.clone())?;

        let pipeline_resources =
            PipelineResourceSet::new(device.clone(), settings.pipeline_cache_path.as_deref())?;

        let scheduler = FrameScheduler::new(device.clone(), settings.fence_wait);

        let renderer = Self {
            device,
            settings,
            surface,
            requested: vk::Extent2D { width, height },
            command_pool,
            swapchain,
            render_pass,
            targets,
            slots,
            semaphores,
            pipeline_resources,
            draw: None,
            uniform: None,
            scheduler,
            suspended: false,
            acquired_stale: false,
        };

        renderer.record_all_slots()?;

        info!(
            "Renderer initialized: {}x{}, {} images, {:?}",
            renderer.extent().width,
            renderer.extent().height,
            renderer.image_count(),
            renderer.present_mode()
        );

        Ok(renderer)
    }

    /// Compiles the graphics pipeline from `shaders` and re-records the
    /// slots to draw with it.
    ///
    /// The shader modules are destroyed once the pipeline exists.
    pub fn build_pipelines(
        &mut self,
        shaders: Vec<Shader>,
        vertex_input: VertexInputLayout,
        options: PipelineOptions,
    ) -> RhiResult<()> {
        // The pipeline being replaced may still be referenced by submitted work.
        self.device.wait_idle()?;

        self.pipeline_resources
            .build(self.render_pass.handle(), &shaders, vertex_input, options)?;
        drop(shaders);

        self.rerecord()
    }

    /// Sets the buffers the indexed draw reads from.
    pub fn set_draw(&mut self, draw: DrawSource) -> RhiResult<()> {
        self.device.wait_idle()?;

        if let Some(mut previous) = self.draw.replace(draw) {
            previous.destroy();
        }

        self.rerecord()
    }

    /// Binds `buffer` as the uniform buffer at set 0, binding 0.
    pub fn bind_uniform_buffer(&mut self, buffer: Buffer) -> RhiResult<()> {
        if buffer.usage() != BufferUsage::Uniform {
            return Err(RhiError::InvalidState(
                "bind_uniform_buffer needs a uniform buffer".to_string(),
            ));
        }

        self.device.wait_idle()?;

        self.pipeline_resources.write_uniform(&buffer);
        if let Some(mut previous) = self.uniform.replace(buffer) {
            previous.destroy();
        }

        self.rerecord()
    }

    /// Overwrites the start of the uniform buffer with `data`.
    ///
    /// Waits for the device first; every slot reads the same buffer.
    pub fn update_uniform_buffer(&self, data: &[u8]) -> RhiResult<()> {
        let uniform = self
            .uniform
            .as_ref()
            .ok_or_else(|| RhiError::InvalidState("No uniform buffer bound".to_string()))?;

        self.device.wait_idle()?;
        uniform.write(0, data)
    }

    /// Runs one frame.
    ///
    /// Out-of-date and suboptimal swapchains are handled here by running the
    /// resize protocol; they never surface as errors.
    ///
    /// # Errors
    ///
    /// Any other acquire, fence, submit or present failure. These are fatal;
    /// see [`RhiError::kind`].
    pub fn render(&mut self) -> RhiResult<FrameOutcome> {
        if self.suspended {
            return Ok(FrameOutcome::Skipped);
        }

        let step = self
            .scheduler
            .run_frame(&self.swapchain, &self.slots, &self.semaphores)?;

        match step {
            FrameStep::Presented {
                image_index,
                needs_resize,
            } => {
                if needs_resize {
                    self.recreate()?;
                }
                Ok(FrameOutcome::Presented { image_index })
            }
            FrameStep::Skipped { acquired_signaled } => {
                self.acquired_stale |= acquired_signaled;
                self.recreate()?;
                Ok(FrameOutcome::Skipped)
            }
        }
    }

    /// Rebuilds the bundle for a new window size.
    ///
    /// A size with zero area (minimized window) is remembered and the
    /// rebuild is deferred until a nonzero size arrives; until then
    /// [`render`](Self::render) returns [`FrameOutcome::Skipped`].
    pub fn resize_resources(&mut self, width: u32, height: u32) -> RhiResult<()> {
        debug!(
            "Resize requested: {}x{} -> {}x{}",
            self.requested.width, self.requested.height, width, height
        );
        self.requested = vk::Extent2D { width, height };
        self.recreate()
    }

    /// Writes the pipeline cache to the configured path, if any.
    pub fn save_pipeline_cache(&self) -> RhiResult<()> {
        match &self.settings.pipeline_cache_path {
            Some(path) => self.pipeline_resources.save_cache(path),
            None => {
                debug!("No pipeline cache path configured, not saving");
                Ok(())
            }
        }
    }

    /// Blocks until the device has no outstanding work.
    pub fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    fn recreate(&mut self) -> RhiResult<()> {
        let support = self.device.surface_support(self.surface)?;
        let extent = choose_extent(
            &support.capabilities,
            self.requested.width,
            self.requested.height,
        );

        if extent.width == 0 || extent.height == 0 {
            if !self.suspended {
                info!("Surface has zero area, suspending rendering");
            }
            self.suspended = true;
            return Ok(());
        }

        self.device.wait_idle()?;

        self.targets.destroy();
        self.slots.free_command_buffers();

        match self.swapchain.create_or_recreate(
            self.surface,
            self.requested.width,
            self.requested.height,
            self.settings.vsync,
        ) {
            Ok(()) => {}
            Err(RhiError::SwapchainOutOfDate) => {
                // The surface shrank to nothing between the query and creation.
                self.suspended = true;
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        self.targets = RenderTargets::new(self.device.clone(), &self.swapchain, &self.render_pass)?;
        self.slots
            .reallocate(&self.command_pool, self.swapchain.image_count())?;

        if self.acquired_stale {
            self.semaphores.renew_acquired()?;
            self.acquired_stale = false;
        }

        self.record_all_slots()?;

        if self.suspended {
            info!("Rendering resumed");
        }
        self.suspended = false;

        info!(
            "Resources recreated at {}x{} with {} images",
            self.swapchain.extent().width,
            self.swapchain.extent().height,
            self.swapchain.image_count()
        );
        Ok(())
    }

    /// Re-records every slot at the current extent. Skipped while suspended;
    /// the resize that resumes rendering records them.
    fn rerecord(&mut self) -> RhiResult<()> {
        if self.suspended {
            return Ok(());
        }
        self.record_all_slots()
    }

    fn record_all_slots(&self) -> RhiResult<()> {
        let draw = self.draw_binding();
        let extent = self.swapchain.extent();

        for index in 0..self.slots.len() {
            record_slot(
                self.slots.recorder(index),
                &SlotRecording {
                    render_pass: self.render_pass.handle(),
                    framebuffer: self.targets.framebuffer(index),
                    extent,
                    clear_color: self.settings.clear_color,
                    draw,
                },
            )?;
        }

        debug!(
            "Recorded {} command buffers ({})",
            self.slots.len(),
            if draw.is_some() { "draw" } else { "clear only" }
        );
        Ok(())
    }

    /// The draw is recorded only once a pipeline, buffers and a uniform
    /// buffer are all in place.
    fn draw_binding(&self) -> Option<DrawBinding> {
        let pipeline = self.pipeline_resources.pipeline()?;
        let draw = self.draw.as_ref()?;
        self.uniform.as_ref()?;

        Some(DrawBinding {
            pipeline,
            layout: self.pipeline_resources.layout(),
            descriptor_set: self.pipeline_resources.descriptor_set(),
            vertex_buffer: draw.vertex_buffer.handle(),
            index_buffer: draw.index_buffer.handle(),
            index_count: draw.index_count,
        })
    }

    /// Tears the bundle down in reverse creation order after the device
    /// goes idle. Calling it again does nothing.
    pub fn destroy(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("wait_idle failed during renderer teardown: {}", e);
        }

        if let Some(mut uniform) = self.uniform.take() {
            uniform.destroy();
        }
        if let Some(mut draw) = self.draw.take() {
            draw.destroy();
        }
        self.pipeline_resources.destroy();
        self.semaphores.destroy();
        self.slots.destroy();
        self.targets.destroy();
        self.render_pass.destroy();
        self.swapchain.destroy();
        self.command_pool.destroy();
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    #[inline]
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    #[inline]
    pub fn swapchain(&self) -> &SwapchainManager {
        &self.swapchain
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.swapchain.format()
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.swapchain.present_mode()
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    #[inline]
    pub fn depth_extent(&self) -> vk::Extent2D {
        self.targets.depth().extent()
    }

    #[inline]
    pub fn framebuffer_count(&self) -> usize {
        self.targets.framebuffers().len()
    }

    #[inline]
    pub fn frame_slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Command buffers currently recorded, one per image.
    #[inline]
    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        self.slots.command_buffers()
    }

    #[inline]
    pub fn frame_state(&self) -> FrameState {
        self.scheduler.state()
    }

    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.scheduler.frames_presented()
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.destroy();
        info!("Renderer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use vkframe_rhi::mock::{Call, MockGpu, ResourceKind};
    use vkframe_rhi::shader::{SPIRV_MAGIC, ShaderStage};
    use vkframe_rhi::vertex::TriangleVertex;

    fn renderer(gpu: &Arc<MockGpu>, width: u32, height: u32) -> Renderer {
        renderer_with(gpu, width, height, RendererSettings::default())
    }

    fn renderer_with(
        gpu: &Arc<MockGpu>,
        width: u32,
        height: u32,
        settings: RendererSettings,
    ) -> Renderer {
        Renderer::initialize(gpu.clone(), vk::SurfaceKHR::null(), width, height, settings).unwrap()
    }

    fn spirv() -> Vec<u8> {
        [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    fn build_pipelines(gpu: &Arc<MockGpu>, renderer: &mut Renderer) {
        let shaders = vec![
            Shader::from_spirv_bytes(gpu.clone(), &spirv(), ShaderStage::Vertex, "main").unwrap(),
            Shader::from_spirv_bytes(gpu.clone(), &spirv(), ShaderStage::Fragment, "main")
                .unwrap(),
        ];
        renderer
            .build_pipelines(shaders, TriangleVertex::input_layout(), PipelineOptions::default())
            .unwrap();
    }

    fn attach_triangle(gpu: &Arc<MockGpu>, renderer: &mut Renderer) {
        let vertices = [
            TriangleVertex::default(),
            TriangleVertex::default(),
            TriangleVertex::default(),
        ];
        let indices: [u32; 3] = [0, 1, 2];
        let vertex_buffer =
            Buffer::with_data(gpu.clone(), BufferUsage::Vertex, bytemuck::cast_slice(&vertices))
                .unwrap();
        let index_buffer =
            Buffer::with_data(gpu.clone(), BufferUsage::Index, bytemuck::cast_slice(&indices))
                .unwrap();
        renderer
            .set_draw(DrawSource::new(vertex_buffer, index_buffer).unwrap())
            .unwrap();
        renderer
            .bind_uniform_buffer(Buffer::new(gpu.clone(), BufferUsage::Uniform, 64).unwrap())
            .unwrap();
    }

    fn assert_counts_match(renderer: &Renderer) {
        let images = renderer.swapchain().images().len();
        assert_eq!(renderer.swapchain().image_views().len(), images);
        assert_eq!(renderer.framebuffer_count(), images);
        assert_eq!(renderer.frame_slot_count(), images);
    }

    #[test]
    fn test_renderer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Renderer>();
    }

    #[test]
    fn test_initialize_vsync_800x600() {
        let gpu = Arc::new(MockGpu::new());
        let renderer = renderer(&gpu, 800, 600);

        assert_eq!(renderer.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(renderer.image_count(), 3);
        assert_eq!(
            renderer.extent(),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
        assert_eq!(renderer.frame_state(), FrameState::Idle);
        assert_counts_match(&renderer);
    }

    #[test]
    fn test_initialize_without_vsync_prefers_mailbox() {
        let gpu = Arc::new(MockGpu::new());
        let settings = RendererSettings {
            vsync: false,
            ..Default::default()
        };
        let renderer = renderer_with(&gpu, 800, 600, settings);
        assert_eq!(renderer.present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_out_of_date_acquire_skips_and_recovers() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();
        let mut renderer = renderer(&gpu, 800, 600);
        gpu.push_acquire_result(vk::Result::ERROR_OUT_OF_DATE_KHR);

        assert_eq!(renderer.render().unwrap(), FrameOutcome::Skipped);
        assert_eq!(journal.count(|c| matches!(c, Call::Submit { .. })), 0);
        assert_eq!(journal.count(|c| matches!(c, Call::Present { .. })), 0);

        let records = gpu.swapchain_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].old_swapchain, records[0].handle);

        assert!(matches!(
            renderer.render().unwrap(),
            FrameOutcome::Presented { .. }
        ));
        assert_eq!(journal.count(|c| matches!(c, Call::Present { .. })), 1);
        assert!(journal.violations().is_empty());
    }

    #[test]
    fn test_resize_rebuilds_at_new_extent() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();
        let mut renderer = renderer(&gpu, 800, 600);
        renderer.render().unwrap();

        renderer.resize_resources(1920, 1080).unwrap();

        let depth = gpu.image_records().last().copied().unwrap();
        assert_eq!((depth.extent.width, depth.extent.height), (1920, 1080));
        assert_eq!(
            renderer.depth_extent(),
            vk::Extent2D {
                width: 1920,
                height: 1080
            }
        );

        for &command_buffer in renderer.command_buffers() {
            let raw = vk::Handle::as_raw(command_buffer);
            let viewports: Vec<(f32, f32)> = journal
                .calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::SetViewport {
                        command_buffer,
                        width,
                        height,
                    } if command_buffer == raw => Some((width, height)),
                    _ => None,
                })
                .collect();
            assert_eq!(viewports, vec![(1920.0, 1080.0)]);
        }

        assert_counts_match(&renderer);
        assert!(renderer.render().is_ok());
        assert!(journal.violations().is_empty());
    }

    #[test]
    fn test_resize_waits_for_idle_before_teardown() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();
        let mut renderer = renderer(&gpu, 800, 600);
        gpu.set_completion_delay(Some(Duration::from_millis(30)));
        renderer.render().unwrap();

        journal.clear();
        renderer.resize_resources(1024, 768).unwrap();

        let idle = journal.position(|c| matches!(c, Call::WaitIdle)).unwrap();
        let first_destroy = journal
            .position(|c| matches!(c, Call::Destroy(..)))
            .unwrap();
        assert!(idle < first_destroy);
        assert!(journal.violations().is_empty());
    }

    #[test]
    fn test_slot_fence_wait_blocks_until_retired() {
        let gpu = Arc::new(MockGpu::new());
        gpu.set_image_count_range(1, 1);
        let journal = gpu.journal();
        let mut renderer = renderer(&gpu, 800, 600);
        assert_eq!(renderer.image_count(), 1);

        gpu.set_completion_delay(Some(Duration::from_millis(50)));
        assert_eq!(
            renderer.render().unwrap(),
            FrameOutcome::Presented { image_index: 0 }
        );
        assert_eq!(
            renderer.render().unwrap(),
            FrameOutcome::Presented { image_index: 0 }
        );

        let calls = journal.calls();
        let waits: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Call::FenceWaitReturned { .. }))
            .map(|(i, _)| i)
            .collect();
        let first_submit = calls
            .iter()
            .position(|c| matches!(c, Call::Submit { .. }))
            .unwrap();
        let retired = calls
            .iter()
            .enumerate()
            .position(|(i, c)| i > first_submit && matches!(c, Call::FenceSignaled(_)))
            .unwrap();

        assert_eq!(waits.len(), 2);
        assert!(first_submit < retired);
        assert!(retired < waits[1]);
        assert!(journal.violations().is_empty());
    }

    #[test]
    fn test_suboptimal_acquire_renews_semaphore() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();
        let mut renderer = renderer(&gpu, 800, 600);
        gpu.push_acquire_result(vk::Result::SUBOPTIMAL_KHR);

        assert_eq!(renderer.render().unwrap(), FrameOutcome::Skipped);
        assert_eq!(journal.destroyed(ResourceKind::Semaphore).len(), 1);
        assert_eq!(gpu.swapchain_records().len(), 2);

        assert!(matches!(
            renderer.render().unwrap(),
            FrameOutcome::Presented { .. }
        ));
        assert!(journal.violations().is_empty());
    }

    #[test]
    fn test_out_of_date_present_counts_and_recreates() {
        let gpu = Arc::new(MockGpu::new());
        let mut renderer = renderer(&gpu, 800, 600);
        gpu.push_present_result(vk::Result::ERROR_OUT_OF_DATE_KHR);

        assert_eq!(
            renderer.render().unwrap(),
            FrameOutcome::Presented { image_index: 0 }
        );
        assert_eq!(renderer.frames_presented(), 1);
        assert_eq!(gpu.swapchain_records().len(), 2);
        assert!(gpu.journal().violations().is_empty());
    }

    #[test]
    fn test_zero_area_resize_is_deferred() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();
        let mut renderer = renderer(&gpu, 800, 600);

        renderer.resize_resources(0, 0).unwrap();
        assert!(renderer.is_suspended());
        assert_eq!(gpu.swapchain_records().len(), 1);

        assert_eq!(renderer.render().unwrap(), FrameOutcome::Skipped);
        assert_eq!(journal.count(|c| matches!(c, Call::Acquire { .. })), 0);

        renderer.resize_resources(640, 480).unwrap();
        assert!(!renderer.is_suspended());
        assert_eq!(
            renderer.extent(),
            vk::Extent2D {
                width: 640,
                height: 480
            }
        );
        assert!(matches!(
            renderer.render().unwrap(),
            FrameOutcome::Presented { .. }
        ));
    }

    #[test]
    fn test_current_extent_overrides_request() {
        let gpu = Arc::new(MockGpu::new());
        gpu.set_current_extent(1280, 720);
        let mut renderer = renderer(&gpu, 800, 600);
        assert_eq!(renderer.extent().width, 1280);

        gpu.set_current_extent(1600, 900);
        renderer.resize_resources(10, 10).unwrap();
        assert_eq!(
            renderer.extent(),
            vk::Extent2D {
                width: 1600,
                height: 900
            }
        );
    }

    #[test]
    fn test_surface_without_format_preference_uses_default() {
        let gpu = Arc::new(MockGpu::new());
        let mut support = gpu.surface_support(vk::SurfaceKHR::null()).unwrap();
        support.formats = vec![vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        gpu.set_surface_support(support);

        let renderer = renderer(&gpu, 800, 600);
        assert_eq!(
            renderer.format(),
            vkframe_rhi::swapchain::DEFAULT_SURFACE_FORMAT
        );
        assert_eq!(renderer.framebuffer_count(), renderer.image_count());
    }

    #[test]
    fn test_initialize_requires_present_support() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();
        gpu.set_present_supported(false);

        let Err(err) = Renderer::initialize(
            gpu.clone(),
            vk::SurfaceKHR::null(),
            800,
            600,
            RendererSettings::default(),
        ) else {
            panic!("initialize succeeded without present support");
        };

        assert!(matches!(err, RhiError::NoSuitableQueueFamily(_)));
        assert_eq!(err.kind(), vkframe_rhi::ErrorKind::ResourceExhaustion);
        assert!(journal.created(ResourceKind::Swapchain).is_empty());
        assert_eq!(
            journal.created(ResourceKind::CommandPool),
            journal.destroyed(ResourceKind::CommandPool)
        );
    }

    #[test]
    fn test_device_lost_is_fatal() {
        let gpu = Arc::new(MockGpu::new());
        let mut renderer = renderer(&gpu, 800, 600);
        gpu.push_submit_result(vk::Result::ERROR_DEVICE_LOST);

        let err = renderer.render().unwrap_err();
        assert!(matches!(err, RhiError::DeviceLost));
        assert_eq!(err.kind(), vkframe_rhi::ErrorKind::FatalDevice);
        assert_eq!(renderer.frame_state(), FrameState::Idle);
    }

    #[test]
    fn test_fence_timeout_is_distinguishable() {
        let gpu = Arc::new(MockGpu::new());
        gpu.set_image_count_range(1, 1);
        let settings = RendererSettings {
            fence_wait: FenceWait::Timeout(Duration::from_millis(10)),
            ..Default::default()
        };
        let mut renderer = renderer_with(&gpu, 800, 600, settings);
        gpu.set_completion_delay(Some(Duration::from_millis(300)));

        renderer.render().unwrap();
        let err = renderer.render().unwrap_err();
        assert!(matches!(err, RhiError::Timeout { .. }));
    }

    #[test]
    fn test_present_follows_matching_submit() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();
        let mut renderer = renderer(&gpu, 800, 600);
        for _ in 0..6 {
            renderer.render().unwrap();
        }

        let mut pending_signal = None;
        for call in journal.calls() {
            match call {
                Call::Submit {
                    signal_semaphore, ..
                } => {
                    assert!(pending_signal.is_none());
                    pending_signal = Some(signal_semaphore);
                }
                Call::Present { wait_semaphore, .. } => {
                    assert_eq!(pending_signal.take(), Some(wait_semaphore));
                }
                _ => {}
            }
        }
        assert_eq!(renderer.frames_presented(), 6);
        assert!(journal.violations().is_empty());
    }

    #[test]
    fn test_counts_match_after_image_count_change() {
        let gpu = Arc::new(MockGpu::new());
        let mut renderer = renderer(&gpu, 800, 600);
        assert_counts_match(&renderer);

        gpu.set_image_count_range(3, 8);
        renderer.resize_resources(800, 600).unwrap();
        assert_eq!(renderer.image_count(), 4);
        assert_counts_match(&renderer);

        gpu.set_image_count_range(1, 2);
        renderer.resize_resources(800, 600).unwrap();
        assert_eq!(renderer.image_count(), 2);
        assert_counts_match(&renderer);
    }

    #[test]
    fn test_draw_recorded_once_everything_is_bound() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();
        let mut renderer = renderer(&gpu, 800, 600);

        build_pipelines(&gpu, &mut renderer);
        assert_eq!(journal.count(|c| matches!(c, Call::DrawIndexed { .. })), 0);
        assert_eq!(journal.destroyed(ResourceKind::ShaderModule).len(), 2);

        attach_triangle(&gpu, &mut renderer);
        assert_eq!(
            journal.count(|c| matches!(c, Call::DrawIndexed { index_count: 3, .. })),
            renderer.image_count()
        );

        renderer.render().unwrap();
        assert!(journal.violations().is_empty());
    }

    #[test]
    fn test_rebinding_while_in_flight_waits_for_idle() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();
        let mut renderer = renderer(&gpu, 800, 600);
        build_pipelines(&gpu, &mut renderer);

        gpu.set_completion_delay(Some(Duration::from_millis(30)));
        renderer.render().unwrap();
        attach_triangle(&gpu, &mut renderer);
        renderer.render().unwrap();

        assert!(journal.violations().is_empty());
    }

    #[test]
    fn test_uniform_update_requires_binding() {
        let gpu = Arc::new(MockGpu::new());
        let renderer = renderer(&gpu, 800, 600);
        assert!(matches!(
            renderer.update_uniform_buffer(&[0u8; 16]),
            Err(RhiError::InvalidState(_))
        ));
    }

    #[test]
    fn test_bundle_teardown_reverses_creation() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();
        let mut renderer = renderer(&gpu, 800, 600);
        build_pipelines(&gpu, &mut renderer);
        drop(renderer);
        drop(gpu);

        let is_tracked = |kind: &ResourceKind| *kind != ResourceKind::ShaderModule;
        let created: Vec<(ResourceKind, u64)> = journal
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create(kind, handle) if is_tracked(&kind) => Some((kind, handle)),
                _ => None,
            })
            .collect();
        let mut destroyed: Vec<(ResourceKind, u64)> = journal
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Destroy(kind, handle) if is_tracked(&kind) => Some((kind, handle)),
                _ => None,
            })
            .collect();
        destroyed.reverse();

        assert_eq!(created, destroyed);
        for kind in [
            ResourceKind::Framebuffer,
            ResourceKind::ImageView,
            ResourceKind::Image,
            ResourceKind::Memory,
            ResourceKind::RenderPass,
            ResourceKind::Pipeline,
            ResourceKind::PipelineCache,
            ResourceKind::CommandBuffer,
            ResourceKind::Swapchain,
            ResourceKind::Semaphore,
            ResourceKind::Fence,
            ResourceKind::Device,
            ResourceKind::Instance,
        ] {
            assert!(created.iter().any(|(k, _)| *k == kind), "{:?} never created", kind);
        }
    }

    #[test]
    fn test_teardown_after_resizes_is_balanced() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();
        let mut renderer = renderer(&gpu, 800, 600);
        build_pipelines(&gpu, &mut renderer);
        attach_triangle(&gpu, &mut renderer);
        renderer.render().unwrap();
        renderer.resize_resources(1024, 768).unwrap();
        gpu.push_acquire_result(vk::Result::SUBOPTIMAL_KHR);
        renderer.render().unwrap();
        renderer.render().unwrap();
        drop(renderer);
        drop(gpu);

        let mut created = journal.created(ResourceKind::Fence);
        created.extend(journal.created(ResourceKind::CommandBuffer));
        let mut destroyed = journal.destroyed(ResourceKind::Fence);
        destroyed.extend(journal.destroyed(ResourceKind::CommandBuffer));
        created.sort_unstable();
        destroyed.sort_unstable();
        assert_eq!(created, destroyed);

        for kind in [
            ResourceKind::Swapchain,
            ResourceKind::ImageView,
            ResourceKind::Framebuffer,
            ResourceKind::Image,
            ResourceKind::Memory,
            ResourceKind::Semaphore,
            ResourceKind::Buffer,
        ] {
            assert_eq!(
                journal.created(kind).len(),
                journal.destroyed(kind).len(),
                "{:?} unbalanced",
                kind
            );
        }
        assert!(journal.violations().is_empty());
    }

    #[test]
    fn test_pipeline_cache_saved_to_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vkframe.cache");
        let gpu = Arc::new(MockGpu::new());
        let settings = RendererSettings {
            pipeline_cache_path: Some(path.clone()),
            ..Default::default()
        };
        let renderer = renderer_with(&gpu, 800, 600, settings);

        renderer.save_pipeline_cache().unwrap();
        assert!(path.exists());
    }
}

//! Recording in-process implementation of [`GpuDevice`].
//!
//! `MockGpu` hands out unique fake handles and appends every operation to a
//! shared [`Journal`]. It models the parts of the Vulkan contract that the
//! frame loop relies on and records a [`Call::Violation`] (returning
//! `ERROR_VALIDATION_FAILED_EXT`) when they are broken:
//!
//! - a fence passed to a submit must be unsignaled
//! - a command buffer must not be re-recorded or resubmitted before its
//!   previous submission completed
//! - a semaphore may not be signaled twice without a wait in between, and a
//!   wait needs a pending signal
//!
//! Submission completion can be delayed to exercise host-side blocking.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use ash::vk;
use ash::vk::Handle;
use gpu_allocator::MemoryLocation;

use crate::backend::{FenceWait, GpuDevice, MemoryId, PresentRequest, SubmitBatch};
use crate::error::{RhiError, RhiResult};
use crate::swapchain::SwapchainSupportDetails;

/// Handle categories tracked by the journal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Instance,
    Device,
    Swapchain,
    Image,
    Memory,
    ImageView,
    Buffer,
    RenderPass,
    Framebuffer,
    CommandPool,
    CommandBuffer,
    Semaphore,
    Fence,
    ShaderModule,
    PipelineCache,
    PipelineLayout,
    Pipeline,
    DescriptorSetLayout,
    DescriptorPool,
}

/// One journaled operation. Handles are stored as raw values.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Create(ResourceKind, u64),
    Destroy(ResourceKind, u64),
    Acquire {
        image_index: Option<u32>,
        result: vk::Result,
    },
    Submit {
        command_buffer: u64,
        wait_semaphore: u64,
        signal_semaphore: u64,
        fence: u64,
    },
    Present {
        image_index: u32,
        wait_semaphore: u64,
    },
    FenceWaitReturned {
        fence: u64,
        result: vk::Result,
    },
    FenceReset(u64),
    FenceSignaled(u64),
    WaitIdle,
    BeginCommandBuffer(u64),
    EndCommandBuffer(u64),
    BeginRenderPass {
        command_buffer: u64,
        framebuffer: u64,
        extent: vk::Extent2D,
    },
    EndRenderPass(u64),
    SetViewport {
        command_buffer: u64,
        width: f32,
        height: f32,
    },
    SetScissor {
        command_buffer: u64,
        extent: vk::Extent2D,
    },
    BindPipeline {
        command_buffer: u64,
        pipeline: u64,
    },
    BindDescriptorSets {
        command_buffer: u64,
        count: usize,
    },
    BindVertexBuffer {
        command_buffer: u64,
        buffer: u64,
    },
    BindIndexBuffer {
        command_buffer: u64,
        buffer: u64,
    },
    DrawIndexed {
        command_buffer: u64,
        index_count: u32,
    },
    UpdateDescriptorSets(usize),
    Violation(String),
}

/// Shared, append-only record of mock operations.
#[derive(Clone, Default)]
pub struct Journal {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Journal {
    fn push(&self, call: Call) {
        lock(&self.calls).push(call);
    }

    /// Snapshot of every call so far.
    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        lock(&self.calls).clear();
    }

    /// Number of calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        lock(&self.calls).iter().filter(|call| predicate(call)).count()
    }

    /// Raw handles created for `kind`, in order.
    pub fn created(&self, kind: ResourceKind) -> Vec<u64> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                Call::Create(k, raw) if *k == kind => Some(*raw),
                _ => None,
            })
            .collect()
    }

    /// Raw handles destroyed for `kind`, in order.
    pub fn destroyed(&self, kind: ResourceKind) -> Vec<u64> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                Call::Destroy(k, raw) if *k == kind => Some(*raw),
                _ => None,
            })
            .collect()
    }

    /// Every recorded violation message.
    pub fn violations(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                Call::Violation(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Position of the first call matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&Call) -> bool) -> Option<usize> {
        lock(&self.calls).iter().position(predicate)
    }
}

/// Parameters captured from a swapchain creation.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainRecord {
    pub handle: u64,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub min_image_count: u32,
    pub old_swapchain: u64,
    pub usage: vk::ImageUsageFlags,
}

/// Parameters captured from an image creation.
#[derive(Clone, Copy, Debug)]
pub struct ImageRecord {
    pub handle: u64,
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}

/// Fixed-function state captured from a graphics pipeline creation.
#[derive(Clone, Debug)]
pub struct PipelineRecord {
    pub handle: u64,
    pub cache: u64,
    pub render_pass: u64,
    pub stage_count: u32,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub stencil_test: bool,
    pub samples: vk::SampleCountFlags,
    pub blend_enabled: Vec<bool>,
    pub dynamic_states: Vec<vk::DynamicState>,
    pub vertex_strides: Vec<u32>,
}

#[derive(Default)]
struct Completion {
    signaled: HashMap<u64, bool>,
    busy_buffers: HashSet<u64>,
}

#[derive(Default)]
struct FenceTable {
    state: Mutex<Completion>,
    changed: Condvar,
}

impl FenceTable {
    fn complete(&self, journal: &Journal, fence: u64, command_buffer: u64) {
        let mut state = lock(&self.state);
        state.busy_buffers.remove(&command_buffer);
        if fence != 0 {
            state.signaled.insert(fence, true);
            journal.push(Call::FenceSignaled(fence));
        }
        self.changed.notify_all();
    }
}

struct SwapchainState {
    images: Vec<vk::Image>,
    next_image: usize,
}

struct MockState {
    support: SwapchainSupportDetails,
    present_supported: bool,
    depth_formats: Vec<vk::Format>,
    swapchains: HashMap<u64, SwapchainState>,
    acquire_script: VecDeque<vk::Result>,
    present_script: VecDeque<vk::Result>,
    submit_script: VecDeque<vk::Result>,
    pending_semaphores: HashSet<u64>,
    completion_delay: Option<Duration>,
    buffer_sizes: HashMap<u64, usize>,
    memory: HashMap<u64, Vec<u8>>,
    cache_blobs: HashMap<u64, Vec<u8>>,
    swapchain_records: Vec<SwapchainRecord>,
    image_records: Vec<ImageRecord>,
    pipeline_records: Vec<PipelineRecord>,
}

const MOCK_INSTANCE: u64 = 0x1;
const MOCK_DEVICE: u64 = 0x2;

/// Recording fake device.
pub struct MockGpu {
    journal: Journal,
    next_handle: AtomicU64,
    fences: Arc<FenceTable>,
    state: Mutex<MockState>,
}

impl Default for MockGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGpu {
    /// Creates a mock whose surface reports the "any size" extent, two to
    /// eight images, a single BGRA format and FIFO/MAILBOX/IMMEDIATE.
    pub fn new() -> Self {
        let journal = Journal::default();
        journal.push(Call::Create(ResourceKind::Instance, MOCK_INSTANCE));
        journal.push(Call::Create(ResourceKind::Device, MOCK_DEVICE));

        let support = SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 16384,
                    height: 16384,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_SRC,
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![
                vk::PresentModeKHR::FIFO,
                vk::PresentModeKHR::MAILBOX,
                vk::PresentModeKHR::IMMEDIATE,
            ],
        };

        Self {
            journal,
            next_handle: AtomicU64::new(0x1000),
            fences: Arc::new(FenceTable::default()),
            state: Mutex::new(MockState {
                support,
                present_supported: true,
                depth_formats: vec![vk::Format::D32_SFLOAT_S8_UINT, vk::Format::D32_SFLOAT],
                swapchains: HashMap::new(),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                submit_script: VecDeque::new(),
                pending_semaphores: HashSet::new(),
                completion_delay: None,
                buffer_sizes: HashMap::new(),
                memory: HashMap::new(),
                cache_blobs: HashMap::new(),
                swapchain_records: Vec::new(),
                image_records: Vec::new(),
                pipeline_records: Vec::new(),
            }),
        }
    }

    /// Journal shared with this mock; stays readable after the mock drops.
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Replaces what the surface reports.
    pub fn set_surface_support(&self, support: SwapchainSupportDetails) {
        self.state().support = support;
    }

    /// Sets the surface's current extent (`u32::MAX` for "any size").
    pub fn set_current_extent(&self, width: u32, height: u32) {
        self.state().support.capabilities.current_extent = vk::Extent2D { width, height };
    }

    /// Sets the reported image count range.
    pub fn set_image_count_range(&self, min: u32, max: u32) {
        let mut state = self.state();
        state.support.capabilities.min_image_count = min;
        state.support.capabilities.max_image_count = max;
    }

    pub fn set_present_supported(&self, supported: bool) {
        self.state().present_supported = supported;
    }

    /// Formats that report DEPTH_STENCIL_ATTACHMENT at optimal tiling.
    pub fn set_depth_formats(&self, formats: Vec<vk::Format>) {
        self.state().depth_formats = formats;
    }

    /// Queues a result for the next acquire (`ERROR_OUT_OF_DATE_KHR`,
    /// `SUBOPTIMAL_KHR` or any error).
    pub fn push_acquire_result(&self, result: vk::Result) {
        self.state().acquire_script.push_back(result);
    }

    /// Queues a result for the next present.
    pub fn push_present_result(&self, result: vk::Result) {
        self.state().present_script.push_back(result);
    }

    /// Queues an error for the next submit.
    pub fn push_submit_result(&self, result: vk::Result) {
        self.state().submit_script.push_back(result);
    }

    /// Delays the completion signal of every later submission.
    pub fn set_completion_delay(&self, delay: Option<Duration>) {
        self.state().completion_delay = delay;
    }

    pub fn swapchain_records(&self) -> Vec<SwapchainRecord> {
        self.state().swapchain_records.clone()
    }

    pub fn image_records(&self) -> Vec<ImageRecord> {
        self.state().image_records.clone()
    }

    pub fn pipeline_records(&self) -> Vec<PipelineRecord> {
        self.state().pipeline_records.clone()
    }

    /// Contents of a host-visible allocation.
    pub fn memory_contents(&self, memory: MemoryId) -> Option<Vec<u8>> {
        self.state().memory.get(&memory.as_raw()).cloned()
    }

    /// Whether the fence is currently signaled.
    pub fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        lock(&self.fences.state)
            .signaled
            .get(&fence.as_raw())
            .copied()
            .unwrap_or(false)
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    fn create<H: Handle>(&self, kind: ResourceKind) -> H {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.journal.push(Call::Create(kind, raw));
        H::from_raw(raw)
    }

    fn destroy<H: Handle>(&self, kind: ResourceKind, handle: H) {
        self.journal.push(Call::Destroy(kind, handle.as_raw()));
    }

    fn violation(&self, message: String) -> vk::Result {
        self.journal.push(Call::Violation(message));
        vk::Result::ERROR_VALIDATION_FAILED_EXT
    }

    fn signal_semaphore(&self, semaphore: vk::Semaphore, op: &str) -> Result<(), vk::Result> {
        if semaphore == vk::Semaphore::null() {
            return Ok(());
        }
        if !self.state().pending_semaphores.insert(semaphore.as_raw()) {
            return Err(self.violation(format!(
                "{} signals semaphore {:#x} which already has a pending signal",
                op,
                semaphore.as_raw()
            )));
        }
        Ok(())
    }

    fn consume_semaphore(&self, semaphore: vk::Semaphore, op: &str) -> Result<(), vk::Result> {
        if semaphore == vk::Semaphore::null() {
            return Ok(());
        }
        if !self.state().pending_semaphores.remove(&semaphore.as_raw()) {
            return Err(self.violation(format!(
                "{} waits on semaphore {:#x} with no pending signal",
                op,
                semaphore.as_raw()
            )));
        }
        Ok(())
    }

    fn buffer_busy(&self, command_buffer: vk::CommandBuffer) -> bool {
        lock(&self.fences.state)
            .busy_buffers
            .contains(&command_buffer.as_raw())
    }
}

impl Drop for MockGpu {
    fn drop(&mut self) {
        self.journal
            .push(Call::Destroy(ResourceKind::Device, MOCK_DEVICE));
        self.journal
            .push(Call::Destroy(ResourceKind::Instance, MOCK_INSTANCE));
    }
}

impl GpuDevice for MockGpu {
    fn graphics_queue_family(&self) -> u32 {
        0
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            memory_heap_count: 1,
            ..Default::default()
        };
        properties.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        properties.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        properties
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        let supported = self.state().depth_formats.contains(&format);
        vk::FormatProperties {
            optimal_tiling_features: if supported {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        }
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let state = lock(&self.fences.state);
        let _idle = self
            .fences
            .changed
            .wait_while(state, |s| !s.busy_buffers.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        self.journal.push(Call::WaitIdle);
        Ok(())
    }

    fn surface_support(&self, _surface: vk::SurfaceKHR) -> RhiResult<SwapchainSupportDetails> {
        Ok(self.state().support.clone())
    }

    fn surface_supports_present(
        &self,
        _queue_family: u32,
        _surface: vk::SurfaceKHR,
    ) -> RhiResult<bool> {
        Ok(self.state().present_supported)
    }

    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> RhiResult<vk::SwapchainKHR> {
        let swapchain: vk::SwapchainKHR = self.create(ResourceKind::Swapchain);
        let images = (0..info.min_image_count)
            .map(|_| vk::Image::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed)))
            .collect();

        let mut state = self.state();
        state.swapchains.insert(
            swapchain.as_raw(),
            SwapchainState {
                images,
                next_image: 0,
            },
        );
        state.swapchain_records.push(SwapchainRecord {
            handle: swapchain.as_raw(),
            extent: info.image_extent,
            format: info.image_format,
            present_mode: info.present_mode,
            min_image_count: info.min_image_count,
            old_swapchain: info.old_swapchain.as_raw(),
            usage: info.image_usage,
        });
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        self.state()
            .swapchains
            .get(&swapchain.as_raw())
            .map(|s| s.images.clone())
            .ok_or(RhiError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.state().swapchains.remove(&swapchain.as_raw());
        self.destroy(ResourceKind::Swapchain, swapchain);
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _wait: FenceWait,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        let scripted = self.state().acquire_script.pop_front();
        let suboptimal = match scripted {
            None | Some(vk::Result::SUCCESS) => false,
            Some(vk::Result::SUBOPTIMAL_KHR) => true,
            Some(error) => {
                self.journal.push(Call::Acquire {
                    image_index: None,
                    result: error,
                });
                return Err(error);
            }
        };

        self.signal_semaphore(semaphore, "acquire")?;

        let image_index = {
            let mut state = self.state();
            let chain = state
                .swapchains
                .get_mut(&swapchain.as_raw())
                .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
            let index = chain.next_image % chain.images.len().max(1);
            chain.next_image = index + 1;
            index as u32
        };

        self.journal.push(Call::Acquire {
            image_index: Some(image_index),
            result: if suboptimal {
                vk::Result::SUBOPTIMAL_KHR
            } else {
                vk::Result::SUCCESS
            },
        });
        Ok((image_index, suboptimal))
    }

    fn queue_present(&self, request: &PresentRequest) -> Result<bool, vk::Result> {
        // The wait executes even when presentation is rejected.
        self.consume_semaphore(request.wait_semaphore, "present")?;
        self.journal.push(Call::Present {
            image_index: request.image_index,
            wait_semaphore: request.wait_semaphore.as_raw(),
        });

        match self.state().present_script.pop_front() {
            None | Some(vk::Result::SUCCESS) => Ok(false),
            Some(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
            Some(error) => Err(error),
        }
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> RhiResult<vk::Image> {
        let image: vk::Image = self.create(ResourceKind::Image);
        self.state().image_records.push(ImageRecord {
            handle: image.as_raw(),
            extent: info.extent,
            format: info.format,
            usage: info.usage,
        });
        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        self.destroy(ResourceKind::Image, image);
    }

    fn allocate_image_memory(
        &self,
        _image: vk::Image,
        _name: &str,
        _location: MemoryLocation,
    ) -> RhiResult<MemoryId> {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.journal.push(Call::Create(ResourceKind::Memory, raw));
        Ok(MemoryId::from_raw(raw))
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> RhiResult<vk::Buffer> {
        let buffer: vk::Buffer = self.create(ResourceKind::Buffer);
        self.state()
            .buffer_sizes
            .insert(buffer.as_raw(), info.size as usize);
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.state().buffer_sizes.remove(&buffer.as_raw());
        self.destroy(ResourceKind::Buffer, buffer);
    }

    fn allocate_buffer_memory(
        &self,
        buffer: vk::Buffer,
        _name: &str,
        location: MemoryLocation,
    ) -> RhiResult<MemoryId> {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state();
        let size = state.buffer_sizes.get(&buffer.as_raw()).copied().unwrap_or(0);
        if location != MemoryLocation::GpuOnly {
            state.memory.insert(raw, vec![0; size]);
        }
        drop(state);
        self.journal.push(Call::Create(ResourceKind::Memory, raw));
        Ok(MemoryId::from_raw(raw))
    }

    fn write_memory(&self, memory: MemoryId, offset: usize, data: &[u8]) -> RhiResult<()> {
        let mut state = self.state();
        let bytes = state
            .memory
            .get_mut(&memory.as_raw())
            .ok_or_else(|| RhiError::InvalidState("allocation is not host visible".into()))?;
        let end = offset + data.len();
        if end > bytes.len() {
            return Err(RhiError::InvalidState("write exceeds allocation".into()));
        }
        bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn free_memory(&self, memory: MemoryId) {
        self.state().memory.remove(&memory.as_raw());
        self.journal
            .push(Call::Destroy(ResourceKind::Memory, memory.as_raw()));
    }

    fn create_image_view(&self, _info: &vk::ImageViewCreateInfo<'_>) -> RhiResult<vk::ImageView> {
        Ok(self.create(ResourceKind::ImageView))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy(ResourceKind::ImageView, view);
    }

    fn create_render_pass(
        &self,
        _info: &vk::RenderPassCreateInfo<'_>,
    ) -> RhiResult<vk::RenderPass> {
        Ok(self.create(ResourceKind::RenderPass))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.destroy(ResourceKind::RenderPass, render_pass);
    }

    fn create_framebuffer(
        &self,
        _info: &vk::FramebufferCreateInfo<'_>,
    ) -> RhiResult<vk::Framebuffer> {
        Ok(self.create(ResourceKind::Framebuffer))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.destroy(ResourceKind::Framebuffer, framebuffer);
    }

    fn create_command_pool(
        &self,
        _info: &vk::CommandPoolCreateInfo<'_>,
    ) -> RhiResult<vk::CommandPool> {
        Ok(self.create(ResourceKind::CommandPool))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.destroy(ResourceKind::CommandPool, pool);
    }

    fn allocate_command_buffers(
        &self,
        _pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        Ok((0..count)
            .map(|_| self.create(ResourceKind::CommandBuffer))
            .collect())
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        for &buffer in buffers {
            if self.buffer_busy(buffer) {
                self.violation(format!(
                    "command buffer {:#x} freed while executing",
                    buffer.as_raw()
                ));
            }
            self.destroy(ResourceKind::CommandBuffer, buffer);
        }
    }

    fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()> {
        if self.buffer_busy(buffer) {
            return Err(RhiError::Vulkan(self.violation(format!(
                "command buffer {:#x} re-recorded while executing",
                buffer.as_raw()
            ))));
        }
        self.journal.push(Call::BeginCommandBuffer(buffer.as_raw()));
        Ok(())
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.journal.push(Call::EndCommandBuffer(buffer.as_raw()));
        Ok(())
    }

    fn cmd_begin_render_pass(&self, buffer: vk::CommandBuffer, info: &vk::RenderPassBeginInfo<'_>) {
        self.journal.push(Call::BeginRenderPass {
            command_buffer: buffer.as_raw(),
            framebuffer: info.framebuffer.as_raw(),
            extent: info.render_area.extent,
        });
    }

    fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer) {
        self.journal.push(Call::EndRenderPass(buffer.as_raw()));
    }

    fn cmd_set_viewport(&self, buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        self.journal.push(Call::SetViewport {
            command_buffer: buffer.as_raw(),
            width: viewport.width,
            height: viewport.height,
        });
    }

    fn cmd_set_scissor(&self, buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.journal.push(Call::SetScissor {
            command_buffer: buffer.as_raw(),
            extent: scissor.extent,
        });
    }

    fn cmd_bind_pipeline(&self, buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.journal.push(Call::BindPipeline {
            command_buffer: buffer.as_raw(),
            pipeline: pipeline.as_raw(),
        });
    }

    fn cmd_bind_descriptor_sets(
        &self,
        buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
    ) {
        self.journal.push(Call::BindDescriptorSets {
            command_buffer: buffer.as_raw(),
            count: sets.len(),
        });
    }

    fn cmd_bind_vertex_buffer(&self, buffer: vk::CommandBuffer, vertex_buffer: vk::Buffer) {
        self.journal.push(Call::BindVertexBuffer {
            command_buffer: buffer.as_raw(),
            buffer: vertex_buffer.as_raw(),
        });
    }

    fn cmd_bind_index_buffer(
        &self,
        buffer: vk::CommandBuffer,
        index_buffer: vk::Buffer,
        _index_type: vk::IndexType,
    ) {
        self.journal.push(Call::BindIndexBuffer {
            command_buffer: buffer.as_raw(),
            buffer: index_buffer.as_raw(),
        });
    }

    fn cmd_draw_indexed(
        &self,
        buffer: vk::CommandBuffer,
        index_count: u32,
        _instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.journal.push(Call::DrawIndexed {
            command_buffer: buffer.as_raw(),
            index_count,
        });
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        Ok(self.create(ResourceKind::Semaphore))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state().pending_semaphores.remove(&semaphore.as_raw());
        self.destroy(ResourceKind::Semaphore, semaphore);
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let fence: vk::Fence = self.create(ResourceKind::Fence);
        lock(&self.fences.state)
            .signaled
            .insert(fence.as_raw(), signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        lock(&self.fences.state).signaled.remove(&fence.as_raw());
        self.destroy(ResourceKind::Fence, fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, wait: FenceWait) -> Result<(), vk::Result> {
        let raw = fence.as_raw();
        let state = lock(&self.fences.state);
        let unsignaled = |s: &mut Completion| !s.signaled.get(&raw).copied().unwrap_or(false);

        let result = match wait {
            FenceWait::Infinite => {
                let _guard = self
                    .fences
                    .changed
                    .wait_while(state, unsignaled)
                    .unwrap_or_else(PoisonError::into_inner);
                vk::Result::SUCCESS
            }
            FenceWait::Timeout(timeout) => {
                let (_guard, outcome) = self
                    .fences
                    .changed
                    .wait_timeout_while(state, timeout, unsignaled)
                    .unwrap_or_else(PoisonError::into_inner);
                if outcome.timed_out() {
                    vk::Result::TIMEOUT
                } else {
                    vk::Result::SUCCESS
                }
            }
        };

        self.journal.push(Call::FenceWaitReturned { fence: raw, result });
        match result {
            vk::Result::SUCCESS => Ok(()),
            error => Err(error),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        lock(&self.fences.state)
            .signaled
            .insert(fence.as_raw(), false);
        self.journal.push(Call::FenceReset(fence.as_raw()));
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> RhiResult<bool> {
        Ok(self.is_fence_signaled(fence))
    }

    fn queue_submit(&self, batch: &SubmitBatch) -> Result<(), vk::Result> {
        if let Some(error) = self.state().submit_script.pop_front() {
            return Err(error);
        }

        if batch.fence != vk::Fence::null() && self.is_fence_signaled(batch.fence) {
            return Err(self.violation(format!(
                "submit with fence {:#x} still signaled",
                batch.fence.as_raw()
            )));
        }
        if self.buffer_busy(batch.command_buffer) {
            return Err(self.violation(format!(
                "command buffer {:#x} resubmitted while executing",
                batch.command_buffer.as_raw()
            )));
        }

        self.consume_semaphore(batch.wait_semaphore, "submit")?;
        self.signal_semaphore(batch.signal_semaphore, "submit")?;

        lock(&self.fences.state)
            .busy_buffers
            .insert(batch.command_buffer.as_raw());
        self.journal.push(Call::Submit {
            command_buffer: batch.command_buffer.as_raw(),
            wait_semaphore: batch.wait_semaphore.as_raw(),
            signal_semaphore: batch.signal_semaphore.as_raw(),
            fence: batch.fence.as_raw(),
        });

        let fence = batch.fence.as_raw();
        let command_buffer = batch.command_buffer.as_raw();
        match self.state().completion_delay {
            None => self.fences.complete(&self.journal, fence, command_buffer),
            Some(delay) => {
                let fences = Arc::clone(&self.fences);
                let journal = self.journal.clone();
                thread::spawn(move || {
                    thread::sleep(delay);
                    fences.complete(&journal, fence, command_buffer);
                });
            }
        }
        Ok(())
    }

    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule> {
        if code.is_empty() {
            return Err(RhiError::Vulkan(vk::Result::ERROR_INVALID_SHADER_NV));
        }
        Ok(self.create(ResourceKind::ShaderModule))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.destroy(ResourceKind::ShaderModule, module);
    }

    fn create_pipeline_cache(&self, initial_data: &[u8]) -> RhiResult<vk::PipelineCache> {
        let cache: vk::PipelineCache = self.create(ResourceKind::PipelineCache);
        let blob = if initial_data.is_empty() {
            empty_cache_blob()
        } else {
            initial_data.to_vec()
        };
        self.state().cache_blobs.insert(cache.as_raw(), blob);
        Ok(cache)
    }

    fn pipeline_cache_data(&self, cache: vk::PipelineCache) -> RhiResult<Vec<u8>> {
        self.state()
            .cache_blobs
            .get(&cache.as_raw())
            .cloned()
            .ok_or(RhiError::Vulkan(vk::Result::ERROR_UNKNOWN))
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        self.state().cache_blobs.remove(&cache.as_raw());
        self.destroy(ResourceKind::PipelineCache, cache);
    }

    fn create_pipeline_layout(
        &self,
        _info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::PipelineLayout> {
        Ok(self.create(ResourceKind::PipelineLayout))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy(ResourceKind::PipelineLayout, layout);
    }

    fn create_graphics_pipeline(
        &self,
        cache: vk::PipelineCache,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> RhiResult<vk::Pipeline> {
        // Safety: the caller keeps every referenced state struct alive for
        // the duration of the call, as with the real entry point.
        let record = unsafe { capture_pipeline(cache, info) }
            .ok_or_else(|| RhiError::Pipeline("incomplete pipeline state".into()))?;

        let pipeline: vk::Pipeline = self.create(ResourceKind::Pipeline);
        self.state().pipeline_records.push(PipelineRecord {
            handle: pipeline.as_raw(),
            ..record
        });
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy(ResourceKind::Pipeline, pipeline);
    }

    fn create_descriptor_set_layout(
        &self,
        _info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorSetLayout> {
        Ok(self.create(ResourceKind::DescriptorSetLayout))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.destroy(ResourceKind::DescriptorSetLayout, layout);
    }

    fn create_descriptor_pool(
        &self,
        _info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorPool> {
        Ok(self.create(ResourceKind::DescriptorPool))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.destroy(ResourceKind::DescriptorPool, pool);
    }

    fn allocate_descriptor_sets(
        &self,
        _pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        // Sets are released with their pool and are not journaled.
        Ok(layouts
            .iter()
            .map(|_| vk::DescriptorSet::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed)))
            .collect())
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        self.journal.push(Call::UpdateDescriptorSets(writes.len()));
    }
}

unsafe fn capture_pipeline(
    cache: vk::PipelineCache,
    info: &vk::GraphicsPipelineCreateInfo<'_>,
) -> Option<PipelineRecord> {
    let input_assembly = unsafe { info.p_input_assembly_state.as_ref()? };
    let rasterization = unsafe { info.p_rasterization_state.as_ref()? };
    let multisample = unsafe { info.p_multisample_state.as_ref()? };
    let depth_stencil = unsafe { info.p_depth_stencil_state.as_ref()? };
    let color_blend = unsafe { info.p_color_blend_state.as_ref()? };
    let dynamic = unsafe { info.p_dynamic_state.as_ref()? };
    let vertex_input = unsafe { info.p_vertex_input_state.as_ref()? };

    let blend_attachments = if color_blend.attachment_count == 0 {
        Vec::new()
    } else {
        unsafe {
            std::slice::from_raw_parts(
                color_blend.p_attachments,
                color_blend.attachment_count as usize,
            )
        }
        .to_vec()
    };
    let dynamic_states = if dynamic.dynamic_state_count == 0 {
        Vec::new()
    } else {
        unsafe {
            std::slice::from_raw_parts(
                dynamic.p_dynamic_states,
                dynamic.dynamic_state_count as usize,
            )
        }
        .to_vec()
    };
    let bindings = if vertex_input.vertex_binding_description_count == 0 {
        Vec::new()
    } else {
        unsafe {
            std::slice::from_raw_parts(
                vertex_input.p_vertex_binding_descriptions,
                vertex_input.vertex_binding_description_count as usize,
            )
        }
        .to_vec()
    };

    Some(PipelineRecord {
        handle: 0,
        cache: cache.as_raw(),
        render_pass: info.render_pass.as_raw(),
        stage_count: info.stage_count,
        topology: input_assembly.topology,
        polygon_mode: rasterization.polygon_mode,
        cull_mode: rasterization.cull_mode,
        front_face: rasterization.front_face,
        depth_test: depth_stencil.depth_test_enable == vk::TRUE,
        depth_write: depth_stencil.depth_write_enable == vk::TRUE,
        depth_compare: depth_stencil.depth_compare_op,
        stencil_test: depth_stencil.stencil_test_enable == vk::TRUE,
        samples: multisample.rasterization_samples,
        blend_enabled: blend_attachments
            .iter()
            .map(|a| a.blend_enable == vk::TRUE)
            .collect(),
        dynamic_states,
        vertex_strides: bindings.iter().map(|b| b.stride).collect(),
    })
}

/// Version-one cache header with no payload.
fn empty_cache_blob() -> Vec<u8> {
    let mut blob = Vec::with_capacity(32);
    blob.extend_from_slice(&32u32.to_le_bytes());
    blob.extend_from_slice(&1u32.to_le_bytes());
    blob.extend_from_slice(&[0u8; 24]);
    blob
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let gpu = MockGpu::new();
        let a = gpu.create_semaphore().unwrap();
        let b = gpu.create_semaphore().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_drop_records_device_and_instance() {
        let gpu = MockGpu::new();
        let journal = gpu.journal();
        drop(gpu);

        let calls = journal.calls();
        let n = calls.len();
        assert_eq!(calls[n - 2], Call::Destroy(ResourceKind::Device, MOCK_DEVICE));
        assert_eq!(calls[n - 1], Call::Destroy(ResourceKind::Instance, MOCK_INSTANCE));
    }

    #[test]
    fn test_submit_with_signaled_fence_is_violation() {
        let gpu = MockGpu::new();
        let fence = gpu.create_fence(true).unwrap();
        let batch = SubmitBatch {
            command_buffer: vk::CommandBuffer::from_raw(0x99),
            wait_semaphore: vk::Semaphore::null(),
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: vk::Semaphore::null(),
            fence,
        };

        assert_eq!(
            gpu.queue_submit(&batch),
            Err(vk::Result::ERROR_VALIDATION_FAILED_EXT)
        );
        assert_eq!(gpu.journal().violations().len(), 1);
    }

    #[test]
    fn test_wait_on_unsignaled_semaphore_is_violation() {
        let gpu = MockGpu::new();
        let semaphore = gpu.create_semaphore().unwrap();
        let result = gpu.queue_present(&PresentRequest {
            swapchain: vk::SwapchainKHR::null(),
            image_index: 0,
            wait_semaphore: semaphore,
        });
        assert_eq!(result, Err(vk::Result::ERROR_VALIDATION_FAILED_EXT));
    }

    #[test]
    fn test_fence_timeout() {
        let gpu = MockGpu::new();
        let fence = gpu.create_fence(false).unwrap();
        let result = gpu.wait_for_fence(fence, FenceWait::Timeout(Duration::from_millis(5)));
        assert_eq!(result, Err(vk::Result::TIMEOUT));
    }

    #[test]
    fn test_delayed_completion_signals_fence() {
        let gpu = MockGpu::new();
        gpu.set_completion_delay(Some(Duration::from_millis(20)));
        let fence = gpu.create_fence(false).unwrap();
        let batch = SubmitBatch {
            command_buffer: vk::CommandBuffer::from_raw(0x77),
            wait_semaphore: vk::Semaphore::null(),
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: vk::Semaphore::null(),
            fence,
        };

        gpu.queue_submit(&batch).unwrap();
        assert!(!gpu.is_fence_signaled(fence));
        gpu.wait_for_fence(fence, FenceWait::Infinite).unwrap();
        assert!(gpu.is_fence_signaled(fence));
    }
}

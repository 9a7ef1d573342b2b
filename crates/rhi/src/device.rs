//! Device context: instance, adapter, logical device, queues and memory.
//!
//! [`DeviceContext`] is constructed once at startup and handed to every other
//! component as an `Arc<dyn GpuDevice>`. It is destroyed last, when the final
//! reference goes away: outstanding allocations, the allocator, the logical
//! device and then the instance are released in that order.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use vkframe_rhi::backend::GpuDevice;
//! use vkframe_rhi::device::DeviceContext;
//!
//! let context = DeviceContext::initialize("demo", "vkframe", true, vk::QueueFlags::TRANSFER)
//!     .expect("Failed to initialize device");
//! let gpu: Arc<dyn GpuDevice> = context.clone();
//! ```

use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ash::vk;
use gpu_allocator::{AllocationError, MemoryLocation};
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use tracing::{debug, error, info, warn};

use crate::backend::{FenceWait, GpuDevice, MemoryId, PresentRequest, SubmitBatch};
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, select_physical_device};
use crate::swapchain::SwapchainSupportDetails;

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Returns the first memory type index allowed by `type_bits` whose flags
/// contain `required`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableMemoryType`] when nothing matches.
pub fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> RhiResult<u32> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(index, _)| index as u32)
        .ok_or(RhiError::NoSuitableMemoryType {
            type_bits,
            properties: required,
        })
}

/// Memory property flags gpu-allocator requires for `location`.
pub fn location_properties(location: MemoryLocation) -> vk::MemoryPropertyFlags {
    match location {
        MemoryLocation::GpuOnly => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        MemoryLocation::CpuToGpu | MemoryLocation::GpuToCpu => {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        }
        _ => vk::MemoryPropertyFlags::empty(),
    }
}

/// Converts an allocator failure, reporting a missing memory type as
/// [`RhiError::NoSuitableMemoryType`].
pub fn allocation_error(
    error: AllocationError,
    requirements: &vk::MemoryRequirements,
    location: MemoryLocation,
) -> RhiError {
    match error {
        AllocationError::NoCompatibleMemoryTypeFound => RhiError::NoSuitableMemoryType {
            type_bits: requirements.memory_type_bits,
            properties: location_properties(location),
        },
        other => RhiError::Allocator(other),
    }
}

/// Owner of the GPU connection.
///
/// # Thread Safety
///
/// Shared through `Arc`. The allocator and the allocation table are guarded
/// by mutexes; queue access follows the single render thread contract.
pub struct DeviceContext {
    allocator: ManuallyDrop<Mutex<Allocator>>,
    allocations: Mutex<HashMap<MemoryId, Allocation>>,
    next_memory_id: AtomicU64,
    swapchain_loader: ash::khr::swapchain::Device,
    surface_loader: ash::khr::surface::Instance,
    device: ash::Device,
    graphics_queue: vk::Queue,
    compute_queue: Option<vk::Queue>,
    transfer_queue: Option<vk::Queue>,
    physical: PhysicalDeviceInfo,
    instance: Instance,
}

impl DeviceContext {
    /// Creates the instance, picks the first adapter and creates the logical
    /// device with a graphics queue plus any requested dedicated queues.
    ///
    /// # Arguments
    ///
    /// * `app_name` / `engine_name` - Reported to the driver
    /// * `enable_validation` - Enables the Khronos validation layer when present
    /// * `requested_queues` - `COMPUTE` and/or `TRANSFER` to request dedicated
    ///   families; ignored when no distinct family exists
    pub fn initialize(
        app_name: &str,
        engine_name: &str,
        enable_validation: bool,
        requested_queues: vk::QueueFlags,
    ) -> RhiResult<Arc<Self>> {
        let instance = Instance::new(app_name, engine_name, enable_validation)?;
        let physical = select_physical_device(instance.handle(), requested_queues)?;

        let unique_families = physical.queue_families.unique_families();
        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical.device, &create_info, None)?
        };

        info!(
            "Logical device created with {} extension(s)",
            DEVICE_EXTENSIONS.len()
        );

        let families = physical.queue_families;
        let graphics_queue = unsafe { device.get_device_queue(families.graphics_family, 0) };
        let compute_queue = families
            .compute_family
            .map(|family| unsafe { device.get_device_queue(family, 0) });
        let transfer_queue = families
            .transfer_family
            .map(|family| unsafe { device.get_device_queue(family, 0) });

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("GPU memory allocator initialized");

        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), &device);
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            allocations: Mutex::new(HashMap::new()),
            next_memory_id: AtomicU64::new(1),
            swapchain_loader,
            surface_loader,
            device,
            graphics_queue,
            compute_queue,
            transfer_queue,
            physical,
            instance,
        }))
    }

    /// Returns the instance (needed by the platform layer for surface creation).
    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns information about the selected adapter.
    #[inline]
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Dedicated compute queue, when one was requested and exists.
    #[inline]
    pub fn compute_queue(&self) -> Option<vk::Queue> {
        self.compute_queue
    }

    /// Dedicated transfer queue, when one was requested and exists.
    #[inline]
    pub fn transfer_queue(&self) -> Option<vk::Queue> {
        self.transfer_queue
    }

    /// Scans the adapter memory table. See [`find_memory_type_index`].
    pub fn get_memory_type_index(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> RhiResult<u32> {
        find_memory_type_index(&self.physical.memory_properties, type_bits, required)
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> RhiResult<Allocation> {
        let mut allocator = self.allocator.lock().unwrap_or_else(PoisonError::into_inner);
        allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| allocation_error(e, &requirements, location))
    }

    fn release(&self, allocation: Allocation) {
        let mut allocator = self.allocator.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = allocator.free(allocation) {
            error!("Failed to free allocation: {}", e);
        }
    }

    fn track(&self, allocation: Allocation) -> MemoryId {
        let id = MemoryId::from_raw(self.next_memory_id.fetch_add(1, Ordering::Relaxed));
        self.allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, allocation);
        id
    }
}

impl GpuDevice for DeviceContext {
    fn graphics_queue_family(&self) -> u32 {
        self.physical.queue_families.graphics_family
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.physical.memory_properties
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .handle()
                .get_physical_device_format_properties(self.physical.device, format)
        }
    }

    fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    fn surface_support(&self, surface: vk::SurfaceKHR) -> RhiResult<SwapchainSupportDetails> {
        SwapchainSupportDetails::query(self.physical.device, surface, &self.surface_loader)
    }

    fn surface_supports_present(
        &self,
        queue_family: u32,
        surface: vk::SurfaceKHR,
    ) -> RhiResult<bool> {
        let supported = unsafe {
            self.surface_loader.get_physical_device_surface_support(
                self.physical.device,
                queue_family,
                surface,
            )?
        };
        Ok(supported)
    }

    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> RhiResult<vk::SwapchainKHR> {
        Ok(unsafe { self.swapchain_loader.create_swapchain(info, None)? })
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        Ok(unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        wait: FenceWait,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader.acquire_next_image(
                swapchain,
                wait.as_nanos(),
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    fn queue_present(&self, request: &PresentRequest) -> Result<bool, vk::Result> {
        let swapchains = [request.swapchain];
        let image_indices = [request.image_index];
        let wait_semaphores = [request.wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.swapchain_loader
                .queue_present(self.graphics_queue, &present_info)
        }
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> RhiResult<vk::Image> {
        Ok(unsafe { self.device.create_image(info, None)? })
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) };
    }

    fn allocate_image_memory(
        &self,
        image: vk::Image,
        name: &str,
        location: MemoryLocation,
    ) -> RhiResult<MemoryId> {
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = self.allocate(name, requirements, location, false)?;

        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            self.release(allocation);
            return Err(e.into());
        }

        Ok(self.track(allocation))
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> RhiResult<vk::Buffer> {
        Ok(unsafe { self.device.create_buffer(info, None)? })
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) };
    }

    fn allocate_buffer_memory(
        &self,
        buffer: vk::Buffer,
        name: &str,
        location: MemoryLocation,
    ) -> RhiResult<MemoryId> {
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocation = self.allocate(name, requirements, location, true)?;

        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            self.release(allocation);
            return Err(e.into());
        }

        Ok(self.track(allocation))
    }

    fn write_memory(&self, memory: MemoryId, offset: usize, data: &[u8]) -> RhiResult<()> {
        let mut allocations = self.allocations.lock().unwrap_or_else(PoisonError::into_inner);
        let allocation = allocations
            .get_mut(&memory)
            .ok_or_else(|| RhiError::InvalidState(format!("unknown allocation {:?}", memory)))?;

        let mapped = allocation
            .mapped_slice_mut()
            .ok_or_else(|| RhiError::InvalidState("allocation is not host visible".into()))?;

        let end = offset + data.len();
        if end > mapped.len() {
            return Err(RhiError::InvalidState(format!(
                "write of {} bytes at {} exceeds allocation of {} bytes",
                data.len(),
                offset,
                mapped.len()
            )));
        }

        mapped[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn free_memory(&self, memory: MemoryId) {
        let allocation = self
            .allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&memory);

        match allocation {
            Some(allocation) => self.release(allocation),
            None => warn!("Ignoring free of unknown allocation {:?}", memory),
        }
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> RhiResult<vk::ImageView> {
        Ok(unsafe { self.device.create_image_view(info, None)? })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo<'_>,
    ) -> RhiResult<vk::RenderPass> {
        Ok(unsafe { self.device.create_render_pass(info, None)? })
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> RhiResult<vk::Framebuffer> {
        Ok(unsafe { self.device.create_framebuffer(info, None)? })
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_command_pool(
        &self,
        info: &vk::CommandPoolCreateInfo<'_>,
    ) -> RhiResult<vk::CommandPool> {
        Ok(unsafe { self.device.create_command_pool(info, None)? })
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        Ok(unsafe { self.device.allocate_command_buffers(&alloc_info)? })
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) };
    }

    fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe { self.device.begin_command_buffer(buffer, &begin_info)? };
        Ok(())
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> RhiResult<()> {
        unsafe { self.device.end_command_buffer(buffer)? };
        Ok(())
    }

    fn cmd_begin_render_pass(&self, buffer: vk::CommandBuffer, info: &vk::RenderPassBeginInfo<'_>) {
        unsafe {
            self.device
                .cmd_begin_render_pass(buffer, info, vk::SubpassContents::INLINE)
        };
    }

    fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(buffer) };
    }

    fn cmd_set_viewport(&self, buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.device.cmd_set_viewport(buffer, 0, &[viewport]) };
    }

    fn cmd_set_scissor(&self, buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(buffer, 0, &[scissor]) };
    }

    fn cmd_bind_pipeline(&self, buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(buffer, vk::PipelineBindPoint::GRAPHICS, pipeline)
        };
    }

    fn cmd_bind_descriptor_sets(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                sets,
                &[],
            )
        };
    }

    fn cmd_bind_vertex_buffer(&self, buffer: vk::CommandBuffer, vertex_buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(buffer, 0, &[vertex_buffer], &[0])
        };
    }

    fn cmd_bind_index_buffer(
        &self,
        buffer: vk::CommandBuffer,
        index_buffer: vk::Buffer,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(buffer, index_buffer, 0, index_type)
        };
    }

    fn cmd_draw_indexed(
        &self,
        buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.device.create_semaphore(&create_info, None)? })
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        Ok(unsafe { self.device.create_fence(&create_info, None)? })
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fence(&self, fence: vk::Fence, wait: FenceWait) -> Result<(), vk::Result> {
        unsafe { self.device.wait_for_fences(&[fence], true, wait.as_nanos()) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        unsafe { self.device.reset_fences(&[fence])? };
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> RhiResult<bool> {
        Ok(unsafe { self.device.get_fence_status(fence)? })
    }

    fn queue_submit(&self, batch: &SubmitBatch) -> Result<(), vk::Result> {
        let wait_semaphores = [batch.wait_semaphore];
        let wait_stages = [batch.wait_stage];
        let command_buffers = [batch.command_buffer];
        let signal_semaphores = [batch.signal_semaphore];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], batch.fence)
        }
    }

    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        Ok(unsafe { self.device.create_shader_module(&create_info, None)? })
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) };
    }

    fn create_pipeline_cache(&self, initial_data: &[u8]) -> RhiResult<vk::PipelineCache> {
        let create_info = vk::PipelineCacheCreateInfo::default().initial_data(initial_data);
        Ok(unsafe { self.device.create_pipeline_cache(&create_info, None)? })
    }

    fn pipeline_cache_data(&self, cache: vk::PipelineCache) -> RhiResult<Vec<u8>> {
        Ok(unsafe { self.device.get_pipeline_cache_data(cache)? })
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        unsafe { self.device.destroy_pipeline_cache(cache, None) };
    }

    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::PipelineLayout> {
        Ok(unsafe { self.device.create_pipeline_layout(info, None)? })
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(
        &self,
        cache: vk::PipelineCache,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> RhiResult<vk::Pipeline> {
        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(cache, std::slice::from_ref(info), None)
                .map_err(|(_, result)| result)?
        };

        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::Pipeline("driver returned no pipeline".into()))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorSetLayout> {
        Ok(unsafe { self.device.create_descriptor_set_layout(info, None)? })
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorPool> {
        Ok(unsafe { self.device.create_descriptor_pool(info, None)? })
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(layouts);

        Ok(unsafe { self.device.allocate_descriptor_sets(&alloc_info)? })
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        unsafe { self.device.update_descriptor_sets(writes, &[]) };
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
        }

        let leaked: Vec<Allocation> = self
            .allocations
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, allocation)| allocation)
            .collect();
        if !leaked.is_empty() {
            warn!("Freeing {} allocation(s) still alive at shutdown", leaked.len());
        }
        for allocation in leaked {
            self.release(allocation);
        }

        // The allocator owns device memory blocks and must go before the device.
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device and ash::Instance are Send + Sync, handles are plain
// integers, and the allocator and allocation table are behind mutexes.
unsafe impl Send for DeviceContext {}
unsafe impl Sync for DeviceContext {}

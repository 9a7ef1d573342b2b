//! Descriptor set management for shader resource binding.
//!
//! - [`DescriptorSetLayout`] defines the shader bindings.
//! - [`DescriptorPool`] owns the storage descriptor sets are carved from;
//!   sets are released together with their pool.
//! - [`write_uniform_buffer`] points a binding at a buffer range.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use vkframe_rhi::backend::GpuDevice;
//! use vkframe_rhi::descriptor::{self, DescriptorPool, DescriptorSetLayout};
//!
//! # fn example(device: Arc<dyn GpuDevice>) -> Result<(), vkframe_rhi::RhiError> {
//! let binding = descriptor::uniform_buffer_binding(0, vk::ShaderStageFlags::VERTEX);
//! let layout = DescriptorSetLayout::new(device.clone(), &[binding])?;
//!
//! let pool_size = vk::DescriptorPoolSize::default()
//!     .ty(vk::DescriptorType::UNIFORM_BUFFER)
//!     .descriptor_count(1);
//! let pool = DescriptorPool::new(device.clone(), 1, &[pool_size])?;
//! let sets = pool.allocate(&[layout.handle()])?;
//! # let _ = sets;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::backend::GpuDevice;
use crate::error::RhiResult;

/// Owned descriptor set layout.
pub struct DescriptorSetLayout {
    device: Arc<dyn GpuDevice>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = device.create_descriptor_set_layout(&create_info)?;

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn destroy(&mut self) {
        if self.layout != vk::DescriptorSetLayout::null() {
            self.device.destroy_descriptor_set_layout(self.layout);
            self.layout = vk::DescriptorSetLayout::null();
        }
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Owned descriptor pool.
pub struct DescriptorPool {
    device: Arc<dyn GpuDevice>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = device.create_descriptor_pool(&create_info)?;

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Allocates one set per layout.
    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        self.device.allocate_descriptor_sets(self.pool, layouts)
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    pub fn destroy(&mut self) {
        if self.pool != vk::DescriptorPool::null() {
            self.device.destroy_descriptor_pool(self.pool);
            self.pool = vk::DescriptorPool::null();
        }
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Single uniform buffer binding visible to `stages`.
pub fn uniform_buffer_binding(
    binding: u32,
    stages: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(stages)
}

/// Points `binding` of `set` at `range` bytes of `buffer`.
pub fn write_uniform_buffer(
    device: &dyn GpuDevice,
    set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    range: vk::DeviceSize,
) {
    let buffer_info = [vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(0)
        .range(range)];

    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .dst_array_element(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(&buffer_info);

    device.update_descriptor_sets(&[write]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockGpu, ResourceKind};

    #[test]
    fn test_uniform_buffer_binding() {
        let binding = uniform_buffer_binding(0, vk::ShaderStageFlags::VERTEX);
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(binding.descriptor_count, 1);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_allocate_and_write() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();

        let layout = DescriptorSetLayout::new(
            gpu.clone(),
            &[uniform_buffer_binding(0, vk::ShaderStageFlags::VERTEX)],
        )
        .unwrap();
        let pool_size = vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1);
        let pool = DescriptorPool::new(gpu.clone(), 1, &[pool_size]).unwrap();
        assert_eq!(pool.max_sets(), 1);

        let sets = pool.allocate(&[layout.handle()]).unwrap();
        assert_eq!(sets.len(), 1);

        write_uniform_buffer(gpu.as_ref(), sets[0], 0, vk::Buffer::null(), 64);
        assert_eq!(journal.count(|c| *c == Call::UpdateDescriptorSets(1)), 1);

        drop(pool);
        drop(layout);
        assert_eq!(journal.destroyed(ResourceKind::DescriptorPool).len(), 1);
        assert_eq!(
            journal.destroyed(ResourceKind::DescriptorSetLayout).len(),
            1
        );
    }
}

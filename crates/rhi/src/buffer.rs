//! GPU buffer management.
//!
//! - [`BufferUsage`] picks the Vulkan usage flags and memory location.
//! - [`Buffer`] owns a `VkBuffer` and its allocation.
//!
//! Vertex, index and uniform buffers live in host-visible memory so they can
//! be filled directly without a staging copy.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_rhi::backend::GpuDevice;
//! use vkframe_rhi::buffer::{Buffer, BufferUsage};
//!
//! # fn example(device: Arc<dyn GpuDevice>) -> Result<(), vkframe_rhi::RhiError> {
//! let indices: [u32; 3] = [0, 1, 2];
//! let index_buffer = Buffer::with_data(device, BufferUsage::Index, bytemuck::cast_slice(&indices))?;
//! # let _ = index_buffer;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use tracing::debug;

use crate::backend::{GpuDevice, MemoryId};
use crate::error::{RhiError, RhiResult};

/// Buffer usage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
}

impl BufferUsage {
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        }
    }

    pub fn memory_location(self) -> MemoryLocation {
        MemoryLocation::CpuToGpu
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
        }
    }
}

/// Owned buffer with host-visible memory.
pub struct Buffer {
    device: Arc<dyn GpuDevice>,
    buffer: vk::Buffer,
    memory: Option<MemoryId>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a buffer of `size` bytes.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        usage: BufferUsage,
        size: vk::DeviceSize,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidState(format!(
                "{} buffer must not be empty",
                usage.name()
            )));
        }

        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = device.create_buffer(&create_info)?;

        let memory = match device.allocate_buffer_memory(
            buffer,
            &format!("{} buffer", usage.name()),
            usage.memory_location(),
        ) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_buffer(buffer);
                return Err(e);
            }
        };

        debug!("Created {} buffer ({} bytes)", usage.name(), size);

        Ok(Self {
            device,
            buffer,
            memory: Some(memory),
            size,
            usage,
        })
    }

    /// Creates a buffer sized to `data` and fills it.
    pub fn with_data(
        device: Arc<dyn GpuDevice>,
        usage: BufferUsage,
        data: &[u8],
    ) -> RhiResult<Self> {
        let buffer = Self::new(device, usage, data.len() as vk::DeviceSize)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Copies `data` into the buffer at `offset`.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidState(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                self.size
            )));
        }

        let memory = self
            .memory
            .ok_or_else(|| RhiError::InvalidState("Buffer memory was released".to_string()))?;

        self.device.write_memory(memory, offset as usize, data)
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    #[inline]
    pub fn memory(&self) -> Option<MemoryId> {
        self.memory
    }

    /// Frees the memory, then the buffer.
    pub fn destroy(&mut self) {
        if let Some(memory) = self.memory.take() {
            self.device.free_memory(memory);
        }
        if self.buffer != vk::Buffer::null() {
            self.device.destroy_buffer(self.buffer);
            self.buffer = vk::Buffer::null();
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockGpu, ResourceKind};

    #[test]
    fn test_buffer_usage_flags() {
        assert_eq!(
            BufferUsage::Vertex.to_vk_usage(),
            vk::BufferUsageFlags::VERTEX_BUFFER
        );
        assert_eq!(
            BufferUsage::Index.to_vk_usage(),
            vk::BufferUsageFlags::INDEX_BUFFER
        );
        assert_eq!(
            BufferUsage::Uniform.to_vk_usage(),
            vk::BufferUsageFlags::UNIFORM_BUFFER
        );
        assert_eq!(BufferUsage::Uniform.memory_location(), MemoryLocation::CpuToGpu);
    }

    #[test]
    fn test_with_data_writes_contents() {
        let gpu = Arc::new(MockGpu::new());
        let indices: [u32; 3] = [0, 1, 2];
        let buffer =
            Buffer::with_data(gpu.clone(), BufferUsage::Index, bytemuck::cast_slice(&indices))
                .unwrap();

        assert_eq!(buffer.size(), 12);
        let contents = gpu.memory_contents(buffer.memory().unwrap()).unwrap();
        assert_eq!(contents, bytemuck::cast_slice::<u32, u8>(&indices).to_vec());
    }

    #[test]
    fn test_write_out_of_bounds() {
        let gpu = Arc::new(MockGpu::new());
        let buffer = Buffer::new(gpu, BufferUsage::Uniform, 16).unwrap();
        assert!(matches!(
            buffer.write(8, &[0u8; 16]),
            Err(RhiError::InvalidState(_))
        ));
    }

    #[test]
    fn test_empty_buffer_rejected() {
        let gpu = Arc::new(MockGpu::new());
        assert!(Buffer::new(gpu, BufferUsage::Vertex, 0).is_err());
    }

    #[test]
    fn test_memory_freed_before_buffer() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();
        let mut buffer = Buffer::new(gpu, BufferUsage::Vertex, 48).unwrap();
        buffer.destroy();
        buffer.destroy();

        let memory = journal
            .position(|c| matches!(c, Call::Destroy(ResourceKind::Memory, _)))
            .unwrap();
        let handle = journal
            .position(|c| matches!(c, Call::Destroy(ResourceKind::Buffer, _)))
            .unwrap();
        assert!(memory < handle);
        assert_eq!(journal.destroyed(ResourceKind::Buffer).len(), 1);
    }
}

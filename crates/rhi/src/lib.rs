//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides an explicit abstraction over Vulkan using the `ash`
//! crate. Every component receives an `Arc<dyn GpuDevice>` capability object
//! rather than reaching for global function tables. It handles:
//! - Instance, adapter and device creation
//! - Swapchain creation and recreation
//! - Render pass, framebuffer and depth image ownership
//! - Command buffer recording
//! - Pipeline, pipeline cache and descriptor creation
//! - Synchronization primitives

mod error;

pub mod backend;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod framebuffer;
pub mod image;
pub mod instance;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use backend::{FenceWait, GpuDevice};
pub use error::{ErrorKind, RhiError, RhiResult};

// Re-export ash and allocator types that users might need
pub use ash;
pub use ash::vk;
pub use gpu_allocator::MemoryLocation;

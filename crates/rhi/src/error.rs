//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// Coarse classification of an [`RhiError`], used by callers to decide
/// whether a failure can be recovered locally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Adapter, device, swapchain or pipeline construction failed.
    Initialization,
    /// The swapchain no longer matches the surface; recovered by recreating it.
    TransientPresentation,
    /// No memory type, depth format or queue family satisfies the request.
    ResourceExhaustion,
    /// Device lost, timed out, or a submission/presentation failed.
    FatalDevice,
}

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    /// No physical device was enumerated
    #[error("No Vulkan adapter found")]
    NoAdapter,

    /// No memory type matches the requested bits and properties
    #[error("No memory type matches bits {type_bits:#x} with properties {properties:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// None of the candidate depth formats is usable as an attachment
    #[error("No supported depth/stencil format")]
    NoSupportedDepthFormat,

    /// No queue family exposes the requested capability
    #[error("No queue family supports {0}")]
    NoSuitableQueueFamily(String),

    /// Swapchain is out of date or suboptimal for the surface
    #[error("Swapchain out of date")]
    SwapchainOutOfDate,

    /// The logical device was lost
    #[error("Device lost")]
    DeviceLost,

    /// A bounded wait expired before the object was signaled
    #[error("Timed out waiting for {what}")]
    Timeout { what: &'static str },

    /// Acquire, submit or present failed with a non-recoverable result
    #[error("{stage} failed: {result}")]
    FrameFailed {
        stage: &'static str,
        result: vk::Result,
    },

    /// Surface error
    #[error("Surface error: {0}")]
    Surface(String),

    /// Shader error
    #[error("Shader error: {0}")]
    Shader(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Reading or writing a shader or pipeline cache file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation invoked in the wrong lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<vk::Result> for RhiError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR => {
                Self::SwapchainOutOfDate
            }
            other => Self::Vulkan(other),
        }
    }
}

impl RhiError {
    /// Wraps a failed acquire/submit/present result.
    pub fn frame(stage: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::TIMEOUT | vk::Result::NOT_READY => Self::Timeout { what: stage },
            result => Self::FrameFailed { stage, result },
        }
    }

    /// Returns the taxonomy bucket this error falls into.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoSuitableMemoryType { .. }
            | Self::NoSupportedDepthFormat
            | Self::NoSuitableQueueFamily(_) => ErrorKind::ResourceExhaustion,
            Self::SwapchainOutOfDate => ErrorKind::TransientPresentation,
            Self::DeviceLost | Self::Timeout { .. } | Self::FrameFailed { .. } => {
                ErrorKind::FatalDevice
            }
            _ => ErrorKind::Initialization,
        }
    }

    /// Returns true when the caller may recover without re-initialization.
    #[inline]
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientPresentation
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

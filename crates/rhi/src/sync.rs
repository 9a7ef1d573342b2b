//! Synchronization primitives.
//!
//! - [`Semaphore`] orders queue operations on the GPU (acquire -> submit ->
//!   present).
//! - [`Fence`] lets the host observe completion of a submission.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_rhi::backend::{FenceWait, GpuDevice};
//! use vkframe_rhi::sync::{Fence, Semaphore};
//!
//! # fn example(device: Arc<dyn GpuDevice>) -> Result<(), vkframe_rhi::RhiError> {
//! let image_acquired = Semaphore::new(device.clone())?;
//!
//! // Created signaled so the first wait of a frame slot returns at once.
//! let in_flight = Fence::new(device.clone(), true)?;
//! in_flight.wait(FenceWait::Infinite)?;
//! in_flight.reset()?;
//! # let _ = image_acquired;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::trace;

use crate::backend::{FenceWait, GpuDevice};
use crate::error::{RhiError, RhiResult};

/// Owned binary semaphore.
///
/// The owner must ensure no pending queue operation references the semaphore
/// when it is destroyed.
pub struct Semaphore {
    device: Arc<dyn GpuDevice>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Arc<dyn GpuDevice>) -> RhiResult<Self> {
        let semaphore = device.create_semaphore()?;
        trace!("Created semaphore {:?}", semaphore);
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    pub fn destroy(&mut self) {
        if self.semaphore != vk::Semaphore::null() {
            self.device.destroy_semaphore(self.semaphore);
            self.semaphore = vk::Semaphore::null();
        }
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Owned fence.
pub struct Fence {
    device: Arc<dyn GpuDevice>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence, optionally already signaled.
    pub fn new(device: Arc<dyn GpuDevice>, signaled: bool) -> RhiResult<Self> {
        let fence = device.create_fence(signaled)?;
        trace!("Created fence {:?} (signaled: {})", fence, signaled);
        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled.
    ///
    /// # Errors
    ///
    /// [`RhiError::Timeout`] when a bounded wait expires, [`RhiError::DeviceLost`]
    /// when the device is gone.
    pub fn wait(&self, wait: FenceWait) -> RhiResult<()> {
        self.device
            .wait_for_fence(self.fence, wait)
            .map_err(|result| RhiError::frame("fence wait", result))
    }

    /// Returns the fence to the unsignaled state.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_fence(self.fence)
    }

    /// Non-blocking status query.
    pub fn is_signaled(&self) -> RhiResult<bool> {
        self.device.fence_signaled(self.fence)
    }

    pub fn destroy(&mut self) {
        if self.fence != vk::Fence::null() {
            self.device.destroy_fence(self.fence);
            self.fence = vk::Fence::null();
        }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mock::{MockGpu, ResourceKind};

    #[test]
    fn test_semaphore_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
    }

    #[test]
    fn test_signaled_fence_wait_returns() {
        let gpu = Arc::new(MockGpu::new());
        let fence = Fence::new(gpu.clone(), true).unwrap();

        fence.wait(FenceWait::Infinite).unwrap();
        assert!(fence.is_signaled().unwrap());

        fence.reset().unwrap();
        assert!(!fence.is_signaled().unwrap());
    }

    #[test]
    fn test_bounded_wait_reports_timeout() {
        let gpu = Arc::new(MockGpu::new());
        let fence = Fence::new(gpu, false).unwrap();

        let err = fence
            .wait(FenceWait::Timeout(Duration::from_millis(1)))
            .unwrap_err();
        assert!(matches!(err, RhiError::Timeout { .. }));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let gpu = Arc::new(MockGpu::new());
        let journal = gpu.journal();

        let mut semaphore = Semaphore::new(gpu.clone()).unwrap();
        semaphore.destroy();
        semaphore.destroy();
        drop(semaphore);

        let mut fence = Fence::new(gpu, true).unwrap();
        fence.destroy();
        drop(fence);

        assert_eq!(journal.destroyed(ResourceKind::Semaphore).len(), 1);
        assert_eq!(journal.destroyed(ResourceKind::Fence).len(), 1);
    }
}

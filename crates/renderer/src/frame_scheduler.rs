//! The per-frame state machine.
//!
//! ```text
//! Idle -> Acquiring -> WaitingOnSlotFence -> Submitting -> Presenting -> Idle
//! ```
//!
//! [`FrameScheduler::run_frame`] walks one frame through these states. It
//! never recreates anything itself; it reports what happened and the
//! [`Renderer`](crate::Renderer) runs the resize protocol when needed.

use std::sync::Arc;

use tracing::{debug, trace};

use vkframe_rhi::backend::SubmitBatch;
use vkframe_rhi::swapchain::SwapchainManager;
use vkframe_rhi::{FenceWait, GpuDevice, RhiError, RhiResult, vk};

use crate::frame_slot::{FrameSlotSet, PresentationSemaphores};

/// Where the frame loop currently is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameState {
    #[default]
    Idle,
    Acquiring,
    WaitingOnSlotFence,
    Submitting,
    Presenting,
}

/// Result of one `Render` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The image was submitted and queued for presentation.
    Presented { image_index: u32 },
    /// Nothing was submitted this call.
    Skipped,
}

/// What happened to one frame, as seen by the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FrameStep {
    /// Submitted and presented. `needs_resize` is set when present reported
    /// the swapchain out of date or suboptimal.
    Presented { image_index: u32, needs_resize: bool },
    /// Acquire reported out of date or suboptimal. `acquired_signaled` is set
    /// when the acquire semaphore was signaled anyway (suboptimal).
    Skipped { acquired_signaled: bool },
}

/// Drives acquire, slot fence wait, submit and present.
pub struct FrameScheduler {
    device: Arc<dyn GpuDevice>,
    state: FrameState,
    fence_wait: FenceWait,
    frames_presented: u64,
}

impl FrameScheduler {
    pub fn new(device: Arc<dyn GpuDevice>, fence_wait: FenceWait) -> Self {
        Self {
            device,
            state: FrameState::Idle,
            fence_wait,
            frames_presented: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    #[inline]
    pub fn fence_wait(&self) -> FenceWait {
        self.fence_wait
    }

    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Runs one frame. The state is back to `Idle` when this returns, on
    /// success and on error.
    pub(crate) fn run_frame(
        &mut self,
        swapchain: &SwapchainManager,
        slots: &FrameSlotSet,
        semaphores: &PresentationSemaphores,
    ) -> RhiResult<FrameStep> {
        let result = self.step(swapchain, slots, semaphores);
        self.transition(FrameState::Idle);
        result
    }

    fn step(
        &mut self,
        swapchain: &SwapchainManager,
        slots: &FrameSlotSet,
        semaphores: &PresentationSemaphores,
    ) -> RhiResult<FrameStep> {
        self.transition(FrameState::Acquiring);
        let image_index = match swapchain.acquire_next_image(self.fence_wait, semaphores.acquired()) {
            Ok((index, false)) => index,
            Ok((_, true)) => {
                debug!("Swapchain suboptimal during acquire, skipping frame");
                return Ok(FrameStep::Skipped {
                    acquired_signaled: true,
                });
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date during acquire, skipping frame");
                return Ok(FrameStep::Skipped {
                    acquired_signaled: false,
                });
            }
            Err(result) => return Err(RhiError::frame("acquire", result)),
        };

        let slot = slots.slot(image_index)?;

        self.transition(FrameState::WaitingOnSlotFence);
        slot.fence.wait(self.fence_wait)?;
        slot.fence.reset()?;

        self.transition(FrameState::Submitting);
        self.device
            .queue_submit(&SubmitBatch {
                command_buffer: slot.command_buffer,
                wait_semaphore: semaphores.acquired(),
                wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                signal_semaphore: semaphores.render_complete(),
                fence: slot.fence.handle(),
            })
            .map_err(|result| RhiError::frame("submit", result))?;

        self.transition(FrameState::Presenting);
        let needs_resize = match swapchain.present(image_index, semaphores.render_complete()) {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(result) => return Err(RhiError::frame("present", result)),
        };

        self.frames_presented += 1;
        if needs_resize {
            debug!("Swapchain out of date or suboptimal after present");
        }

        Ok(FrameStep::Presented {
            image_index,
            needs_resize,
        })
    }

    fn transition(&mut self, next: FrameState) {
        trace!("Frame state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkframe_rhi::command::CommandPool;
    use vkframe_rhi::mock::{Call, MockGpu};

    struct Harness {
        scheduler: FrameScheduler,
        semaphores: PresentationSemaphores,
        slots: FrameSlotSet,
        _pool: CommandPool,
        swapchain: SwapchainManager,
        gpu: Arc<MockGpu>,
    }

    fn harness(fence_wait: FenceWait) -> Harness {
        let gpu = Arc::new(MockGpu::new());
        let device: Arc<dyn GpuDevice> = gpu.clone();
        let swapchain =
            SwapchainManager::new(device.clone(), vk::SurfaceKHR::null(), 800, 600, true).unwrap();
        let pool = CommandPool::new(device.clone(), 0).unwrap();
        let slots = FrameSlotSet::new(device.clone(), &pool, swapchain.image_count()).unwrap();
        let semaphores = PresentationSemaphores::new(device.clone()).unwrap();

        Harness {
            scheduler: FrameScheduler::new(device, fence_wait),
            semaphores,
            slots,
            _pool: pool,
            swapchain,
            gpu,
        }
    }

    impl Harness {
        fn run(&mut self) -> RhiResult<FrameStep> {
            self.scheduler
                .run_frame(&self.swapchain, &self.slots, &self.semaphores)
        }
    }

    #[test]
    fn test_frame_runs_in_order() {
        let mut h = harness(FenceWait::Infinite);
        let journal = h.gpu.journal();

        let step = h.run().unwrap();
        assert_eq!(
            step,
            FrameStep::Presented {
                image_index: 0,
                needs_resize: false
            }
        );
        assert_eq!(h.scheduler.state(), FrameState::Idle);
        assert_eq!(h.scheduler.frames_presented(), 1);

        let acquire = journal
            .position(|c| matches!(c, Call::Acquire { image_index: Some(0), .. }))
            .unwrap();
        let wait = journal
            .position(|c| matches!(c, Call::FenceWaitReturned { .. }))
            .unwrap();
        let reset = journal
            .position(|c| matches!(c, Call::FenceReset(_)))
            .unwrap();
        let submit = journal
            .position(|c| matches!(c, Call::Submit { .. }))
            .unwrap();
        let present = journal
            .position(|c| matches!(c, Call::Present { .. }))
            .unwrap();
        assert!(acquire < wait && wait < reset && reset < submit && submit < present);
        assert!(journal.violations().is_empty());
    }

    #[test]
    fn test_out_of_date_acquire_skips_submit() {
        let mut h = harness(FenceWait::Infinite);
        let journal = h.gpu.journal();
        h.gpu.push_acquire_result(vk::Result::ERROR_OUT_OF_DATE_KHR);

        let step = h.run().unwrap();
        assert_eq!(
            step,
            FrameStep::Skipped {
                acquired_signaled: false
            }
        );
        assert_eq!(journal.count(|c| matches!(c, Call::Submit { .. })), 0);
        assert_eq!(journal.count(|c| matches!(c, Call::Present { .. })), 0);
    }

    #[test]
    fn test_suboptimal_acquire_reports_signaled_semaphore() {
        let mut h = harness(FenceWait::Infinite);
        h.gpu.push_acquire_result(vk::Result::SUBOPTIMAL_KHR);

        assert_eq!(
            h.run().unwrap(),
            FrameStep::Skipped {
                acquired_signaled: true
            }
        );
    }

    #[test]
    fn test_other_acquire_error_is_fatal() {
        let mut h = harness(FenceWait::Infinite);
        h.gpu.push_acquire_result(vk::Result::ERROR_SURFACE_LOST_KHR);

        let err = h.run().unwrap_err();
        assert!(matches!(
            err,
            RhiError::FrameFailed {
                stage: "acquire",
                result: vk::Result::ERROR_SURFACE_LOST_KHR
            }
        ));
        assert_eq!(h.scheduler.state(), FrameState::Idle);
    }

    #[test]
    fn test_present_out_of_date_still_presents() {
        let mut h = harness(FenceWait::Infinite);
        h.gpu.push_present_result(vk::Result::ERROR_OUT_OF_DATE_KHR);

        assert_eq!(
            h.run().unwrap(),
            FrameStep::Presented {
                image_index: 0,
                needs_resize: true
            }
        );
    }

    #[test]
    fn test_submit_device_lost() {
        let mut h = harness(FenceWait::Infinite);
        h.gpu.push_submit_result(vk::Result::ERROR_DEVICE_LOST);

        assert!(matches!(h.run(), Err(RhiError::DeviceLost)));
        assert_eq!(h.scheduler.state(), FrameState::Idle);
    }

    #[test]
    fn test_present_waits_on_submit_signal() {
        let mut h = harness(FenceWait::Infinite);
        let journal = h.gpu.journal();
        for _ in 0..4 {
            h.run().unwrap();
        }

        let calls = journal.calls();
        let mut last_signal = None;
        for call in calls {
            match call {
                Call::Submit {
                    signal_semaphore, ..
                } => last_signal = Some(signal_semaphore),
                Call::Present { wait_semaphore, .. } => {
                    assert_eq!(last_signal.take(), Some(wait_semaphore));
                }
                _ => {}
            }
        }
        assert!(journal.violations().is_empty());
    }
}

//! Presentation and frame synchronization.
//!
//! This crate drives the swapchain-dependent resources built from
//! `vkframe_rhi`:
//! - Depth attachment and per-image framebuffers
//! - Per-image frame slots (command buffer + fence) and the shared
//!   presentation semaphores
//! - The acquire / fence wait / submit / present state machine
//! - The resize protocol
//! - Pipeline resources and the single indexed draw

pub mod depth_attachment;
pub mod frame_scheduler;
pub mod frame_slot;
pub mod pipeline_resources;
pub mod render_targets;
pub mod renderer;

pub use frame_scheduler::{FrameOutcome, FrameScheduler, FrameState};
pub use frame_slot::{FrameSlotSet, PresentationSemaphores};
pub use pipeline_resources::PipelineResourceSet;
pub use renderer::{DrawSource, Renderer, RendererSettings};

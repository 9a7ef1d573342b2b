//! Platform abstraction layer.
//!
//! This crate provides:
//! - The [`NativeWindow`] capability trait and its winit implementation
//! - [`WindowEvents`], the callbacks the application implements
//! - The surface capability interface ({Win32, Xlib, Xcb}) and the RAII
//!   [`Surface`] owner

mod surface;
mod window;

pub use surface::{Surface, SurfaceSource, SurfaceTarget};
pub use window::{NativeWindow, WindowEvents, WindowOptions, WinitWindow};

// Re-export winit types that handlers need
pub use winit::keyboard::KeyCode;

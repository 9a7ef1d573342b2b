//! Window abstraction and the winit implementation.
//!
//! The application never talks to winit directly. It implements
//! [`WindowEvents`] and hands it to [`NativeWindow::run_event_loop`]; the
//! window passed to each callback is the only way to change title, mode or
//! size, or to ask the loop to stop.

use std::cell::Cell;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::monitor::VideoModeHandle;
use winit::window::{Fullscreen, Window, WindowAttributes, WindowId};

use vkframe_core::{Error, Result, WindowMode};

use crate::surface::{SurfaceSource, SurfaceTarget};

/// Creation parameters for a window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowOptions {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub mode: WindowMode,
    pub resizable: bool,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            title: "vkframe".to_string(),
            width: 1920,
            height: 1080,
            mode: WindowMode::Windowed,
            resizable: true,
        }
    }
}

/// Callbacks delivered by the event loop.
///
/// Every callback receives the window so the handler can react without
/// holding its own reference.
pub trait WindowEvents<W: NativeWindow> {
    /// The window exists and can be used to create a surface. An error
    /// stops the loop and is returned from `run_event_loop`.
    fn created(&mut self, window: &W) -> Result<()>;

    fn resized(&mut self, window: &W, width: u32, height: u32);

    fn key(&mut self, window: &W, key: KeyCode, pressed: bool);

    fn redraw(&mut self, window: &W);

    /// The user asked to close the window. Closes it by default.
    fn close_requested(&mut self, window: &W) {
        window.close();
    }

    /// The loop is about to stop; the window is still alive.
    fn exiting(&mut self, _window: &W) {}
}

/// Capability set of a native window.
pub trait NativeWindow: SurfaceSource + Sized {
    type EventLoop;

    fn create(event_loop: &Self::EventLoop, options: &WindowOptions) -> Result<Self>;

    /// Opens a window with `options` and runs until the window is closed.
    fn run_event_loop<H: WindowEvents<Self>>(options: WindowOptions, handler: &mut H)
    -> Result<()>;

    fn set_title(&self, title: &str);

    fn set_mode(&self, mode: WindowMode);

    fn set_size(&self, width: u32, height: u32);

    /// Asks the event loop to stop after the current callback.
    fn close(&self);
}

/// A winit window.
pub struct WinitWindow {
    window: Window,
    closing: Cell<bool>,
}

impl WinitWindow {
    #[inline]
    pub fn is_closing(&self) -> bool {
        self.closing.get()
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    fn fullscreen(&self, mode: WindowMode) -> Option<Fullscreen> {
        let video_mode = self
            .window
            .current_monitor()
            .and_then(|monitor| monitor.video_modes().next());
        fullscreen_for(mode, video_mode)
    }
}

/// Maps a window mode onto winit's fullscreen setting. Exclusive
/// fullscreen needs a video mode; without one it degrades to borderless.
fn fullscreen_for(mode: WindowMode, video_mode: Option<VideoModeHandle>) -> Option<Fullscreen> {
    match mode {
        WindowMode::Windowed => None,
        WindowMode::Borderless => Some(Fullscreen::Borderless(None)),
        WindowMode::Fullscreen => match video_mode {
            Some(video_mode) => Some(Fullscreen::Exclusive(video_mode)),
            None => {
                warn!("No video mode available, using borderless fullscreen");
                Some(Fullscreen::Borderless(None))
            }
        },
    }
}

impl NativeWindow for WinitWindow {
    type EventLoop = ActiveEventLoop;

    fn create(event_loop: &ActiveEventLoop, options: &WindowOptions) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(options.title.as_str())
            .with_inner_size(PhysicalSize::new(options.width, options.height))
            .with_resizable(options.resizable);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        let window = Self {
            window,
            closing: Cell::new(false),
        };
        if options.mode != WindowMode::Windowed {
            window.set_mode(options.mode);
        }

        info!(
            "Window created: {}x{} ({:?})",
            options.width, options.height, options.mode
        );
        Ok(window)
    }

    fn run_event_loop<H: WindowEvents<Self>>(
        options: WindowOptions,
        handler: &mut H,
    ) -> Result<()> {
        #[allow(unused_mut)]
        let mut builder = EventLoop::builder();
        #[cfg(all(unix, not(target_os = "macos"), not(target_os = "android")))]
        {
            use winit::platform::x11::EventLoopBuilderExtX11;
            // Surfaces are only created for Xlib and Xcb.
            builder.with_x11();
        }
        let event_loop = builder
            .build()
            .map_err(|e| Error::Window(format!("Failed to create event loop: {}", e)))?;
        event_loop.set_control_flow(ControlFlow::Poll);

        let mut runner = Runner {
            options,
            handler,
            window: None,
            error: None,
        };
        event_loop
            .run_app(&mut runner)
            .map_err(|e| Error::Window(format!("Event loop error: {}", e)))?;

        match runner.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }

    fn set_mode(&self, mode: WindowMode) {
        self.window.set_fullscreen(self.fullscreen(mode));
        debug!("Window mode set to {:?}", mode);
    }

    fn set_size(&self, width: u32, height: u32) {
        let _ = self
            .window
            .request_inner_size(PhysicalSize::new(width, height));
    }

    fn close(&self) {
        self.closing.set(true);
    }
}

impl SurfaceSource for WinitWindow {
    fn surface_target(&self) -> Result<SurfaceTarget> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;
        let window = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;
        SurfaceTarget::from_raw(display.as_raw(), window.as_raw())
    }

    fn current_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }
}

struct Runner<'a, H> {
    options: WindowOptions,
    handler: &'a mut H,
    window: Option<WinitWindow>,
    error: Option<Error>,
}

impl<H: WindowEvents<WinitWindow>> Runner<'_, H> {
    fn exit_if_closing(&self, event_loop: &ActiveEventLoop) {
        if self.window.as_ref().is_some_and(WinitWindow::is_closing) {
            event_loop.exit();
        }
    }
}

impl<H: WindowEvents<WinitWindow>> ApplicationHandler for Runner<'_, H> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match WinitWindow::create(event_loop, &self.options) {
            Ok(window) => window,
            Err(e) => {
                error!("Failed to create window: {}", e);
                self.error = Some(e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.handler.created(&window) {
            error!("Window setup failed: {}", e);
            self.error = Some(e);
            window.close();
        }
        self.window = Some(window);
        self.exit_if_closing(event_loop);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = self.window.as_ref() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.handler.close_requested(window);
            }
            WindowEvent::Resized(size) => {
                self.handler.resized(window, size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                self.handler.redraw(window);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    self.handler.key(window, code, event.state.is_pressed());
                }
            }
            _ => {}
        }

        self.exit_if_closing(event_loop);
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.take() {
            self.handler.exiting(&window);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = WindowOptions::default();
        assert_eq!((options.width, options.height), (1920, 1080));
        assert_eq!(options.mode, WindowMode::Windowed);
        assert!(options.resizable);
    }

    #[test]
    fn test_windowed_has_no_fullscreen() {
        assert_eq!(fullscreen_for(WindowMode::Windowed, None), None);
    }

    #[test]
    fn test_borderless_uses_current_monitor() {
        assert_eq!(
            fullscreen_for(WindowMode::Borderless, None),
            Some(Fullscreen::Borderless(None))
        );
    }

    #[test]
    fn test_exclusive_without_video_mode_falls_back() {
        assert_eq!(
            fullscreen_for(WindowMode::Fullscreen, None),
            Some(Fullscreen::Borderless(None))
        );
    }
}

//! Vulkan surface creation behind a single capability interface.
//!
//! A window hands out a [`SurfaceTarget`] describing its native handles;
//! the target knows which `VK_KHR_*_surface` loader to call. Only the three
//! desktop window systems below are supported.

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};

use vkframe_core::{Error, Result};

/// Native handles for one of the supported window systems.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceTarget {
    Win32 {
        hinstance: vk::HINSTANCE,
        hwnd: vk::HWND,
    },
    Xlib {
        display: *mut vk::Display,
        window: vk::Window,
    },
    Xcb {
        connection: *mut vk::xcb_connection_t,
        window: vk::xcb_window_t,
    },
}

impl SurfaceTarget {
    /// Builds a target from raw-window-handle handles.
    ///
    /// # Errors
    ///
    /// [`Error::Surface`] for any other window system, or when the display
    /// connection is missing.
    pub fn from_raw(display: RawDisplayHandle, window: RawWindowHandle) -> Result<Self> {
        match (display, window) {
            (_, RawWindowHandle::Win32(handle)) => Ok(Self::Win32 {
                hinstance: handle.hinstance.map_or(0, |h| h.get()),
                hwnd: handle.hwnd.get(),
            }),
            (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
                let display = display
                    .display
                    .ok_or_else(|| Error::Surface("Xlib display connection missing".to_string()))?;
                Ok(Self::Xlib {
                    display: display.as_ptr(),
                    window: handle.window,
                })
            }
            (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
                let connection = display
                    .connection
                    .ok_or_else(|| Error::Surface("XCB connection missing".to_string()))?;
                Ok(Self::Xcb {
                    connection: connection.as_ptr(),
                    window: handle.window.get(),
                })
            }
            (display, window) => Err(Error::Surface(format!(
                "unsupported window system: {:?} / {:?}",
                display, window
            ))),
        }
    }

    /// Name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Win32 { .. } => "Win32",
            Self::Xlib { .. } => "Xlib",
            Self::Xcb { .. } => "Xcb",
        }
    }

    /// Instance extension the target's loader needs.
    pub fn extension_name(&self) -> &'static std::ffi::CStr {
        match self {
            Self::Win32 { .. } => ash::khr::win32_surface::NAME,
            Self::Xlib { .. } => ash::khr::xlib_surface::NAME,
            Self::Xcb { .. } => ash::khr::xcb_surface::NAME,
        }
    }

    /// Creates the raw surface with the matching loader.
    ///
    /// # Safety
    ///
    /// The native handles must still be alive and `instance` must have been
    /// created with [`Self::extension_name`] enabled.
    pub unsafe fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR> {
        let result = match *self {
            Self::Win32 { hinstance, hwnd } => {
                let create_info = vk::Win32SurfaceCreateInfoKHR::default()
                    .hinstance(hinstance)
                    .hwnd(hwnd);
                let loader = ash::khr::win32_surface::Instance::new(entry, instance);
                unsafe { loader.create_win32_surface(&create_info, None) }
            }
            Self::Xlib { display, window } => {
                let create_info = vk::XlibSurfaceCreateInfoKHR::default()
                    .dpy(display)
                    .window(window);
                let loader = ash::khr::xlib_surface::Instance::new(entry, instance);
                unsafe { loader.create_xlib_surface(&create_info, None) }
            }
            Self::Xcb { connection, window } => {
                let create_info = vk::XcbSurfaceCreateInfoKHR::default()
                    .connection(connection)
                    .window(window);
                let loader = ash::khr::xcb_surface::Instance::new(entry, instance);
                unsafe { loader.create_xcb_surface(&create_info, None) }
            }
        };

        result.map_err(|e| Error::Surface(format!("{} surface creation failed: {}", self.kind(), e)))
    }
}

/// Anything that can describe itself as a presentation target.
pub trait SurfaceSource {
    fn surface_target(&self) -> Result<SurfaceTarget>;

    /// Current drawable size in pixels. Zero while minimized.
    fn current_size(&self) -> (u32, u32);
}

/// RAII wrapper for a Vulkan surface.
///
/// Must be destroyed before the instance it was created from.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Creates a surface for `source`.
    pub fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        source: &dyn SurfaceSource,
    ) -> Result<Self> {
        let target = source.surface_target()?;
        // SAFETY: the source owns the native window for at least as long as
        // the caller keeps it alive, and the instance enables every supported
        // surface extension.
        let handle = unsafe { target.create_surface(entry, instance)? };

        info!("{} surface created", target.kind());

        Ok(Self {
            handle,
            loader: ash::khr::surface::Instance::new(entry, instance),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Destroys the surface. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.handle == vk::SurfaceKHR::null() {
            return;
        }
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        self.handle = vk::SurfaceKHR::null();
        debug!("Vulkan surface destroyed");
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_void;
    use raw_window_handle::{
        WaylandDisplayHandle, WaylandWindowHandle, Win32WindowHandle, WindowsDisplayHandle,
        XcbDisplayHandle, XcbWindowHandle, XlibDisplayHandle, XlibWindowHandle,
    };
    use std::num::{NonZeroIsize, NonZeroU32};
    use std::ptr::NonNull;

    fn fake_connection() -> NonNull<c_void> {
        NonNull::dangling()
    }

    #[test]
    fn test_win32_target() {
        let mut window = Win32WindowHandle::new(NonZeroIsize::new(0x1234).unwrap());
        window.hinstance = NonZeroIsize::new(0x10);

        let target = SurfaceTarget::from_raw(
            RawDisplayHandle::Windows(WindowsDisplayHandle::new()),
            RawWindowHandle::Win32(window),
        )
        .unwrap();

        assert_eq!(
            target,
            SurfaceTarget::Win32 {
                hinstance: 0x10,
                hwnd: 0x1234
            }
        );
        assert_eq!(target.extension_name(), ash::khr::win32_surface::NAME);
    }

    #[test]
    fn test_xlib_target() {
        let target = SurfaceTarget::from_raw(
            RawDisplayHandle::Xlib(XlibDisplayHandle::new(Some(fake_connection()), 0)),
            RawWindowHandle::Xlib(XlibWindowHandle::new(42)),
        )
        .unwrap();

        match target {
            SurfaceTarget::Xlib { display, window } => {
                assert_eq!(display, fake_connection().as_ptr());
                assert_eq!(window, 42);
            }
            other => panic!("expected Xlib, got {:?}", other),
        }
        assert_eq!(target.kind(), "Xlib");
    }

    #[test]
    fn test_xcb_target() {
        let target = SurfaceTarget::from_raw(
            RawDisplayHandle::Xcb(XcbDisplayHandle::new(Some(fake_connection()), 0)),
            RawWindowHandle::Xcb(XcbWindowHandle::new(NonZeroU32::new(7).unwrap())),
        )
        .unwrap();

        assert!(matches!(target, SurfaceTarget::Xcb { window: 7, .. }));
        assert_eq!(target.extension_name(), ash::khr::xcb_surface::NAME);
    }

    #[test]
    fn test_missing_display_connection() {
        let result = SurfaceTarget::from_raw(
            RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0)),
            RawWindowHandle::Xlib(XlibWindowHandle::new(42)),
        );
        assert!(matches!(result, Err(Error::Surface(_))));
    }

    #[test]
    fn test_unsupported_window_system() {
        let result = SurfaceTarget::from_raw(
            RawDisplayHandle::Wayland(WaylandDisplayHandle::new(fake_connection())),
            RawWindowHandle::Wayland(WaylandWindowHandle::new(fake_connection())),
        );
        match result {
            Err(Error::Surface(message)) => assert!(message.starts_with("unsupported")),
            other => panic!("expected surface error, got {:?}", other),
        }
    }
}

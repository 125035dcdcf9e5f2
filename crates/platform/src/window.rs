//! The application window and its Vulkan surface.

use std::ffi::{CStr, c_char};
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{DisplayHandle, HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, info};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use lantern_core::{Error, Result, WindowConfig};

/// Owns a `VkSurfaceKHR` and the loader that destroys it.
///
/// The instance that created it must outlive this value.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// For capability, format and present mode queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created by ash_window from this loader's instance and
        // destroyed only here.
        unsafe { self.loader.destroy_surface(self.handle, None) };
        debug!("Surface destroyed");
    }
}

/// A resizable winit window plus the framebuffer size last reported for it.
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
}

impl Window {
    /// Opens a window titled and sized from `config`.
    ///
    /// # Errors
    ///
    /// [`Error::Window`] if winit refuses.
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attributes = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attributes)
            .map_err(|e| Error::Window(e.to_string()))?;

        // The compositor may pick a different size than requested.
        let PhysicalSize { width, height } = window.inner_size();
        info!(
            "Opened window '{}' at {}x{}",
            config.title, width, height
        );

        Ok(Self {
            window: Arc::new(window),
            width,
            height,
        })
    }

    #[inline]
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Stores the size from a `Resized` event.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        debug!("Window size now {}x{}", width, height);
    }

    /// A zero dimension means there is nothing to present into.
    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    fn display(&self) -> Result<DisplayHandle<'_>> {
        self.window
            .display_handle()
            .map_err(|e| Error::Window(format!("display handle unavailable: {}", e)))
    }

    /// Instance extensions this window's platform needs for a surface.
    ///
    /// # Errors
    ///
    /// Fails when the display handle is gone or the platform has no Vulkan
    /// surface support.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        required_extensions(self.display()?.as_raw())
    }

    /// Creates a surface on `instance`, which must outlive it.
    ///
    /// # Errors
    ///
    /// Fails when a handle is unavailable or `vkCreate*SurfaceKHR` fails.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display = self.display()?;
        let window = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("window handle unavailable: {}", e)))?;

        // SAFETY: both handles belong to the live winit window; the surface
        // is destroyed in Surface::drop.
        let handle = unsafe {
            ash_window::create_surface(entry, instance, display.as_raw(), window.as_raw(), None)
        }
        .map_err(|e| Error::Vulkan(format!("surface creation failed: {}", e)))?;

        info!("Surface created");
        Ok(Surface {
            handle,
            loader: ash::khr::surface::Instance::new(entry, instance),
        })
    }
}

/// Surface instance extensions for `display`. The pointers are `'static`.
///
/// # Errors
///
/// Fails when the platform has no Vulkan surface support.
pub fn required_extensions(display: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|e| Error::Vulkan(format!("no surface extensions for this platform: {}", e)))?;

    // SAFETY: ash_window returns static NUL-terminated names.
    let names: Vec<&CStr> = extensions
        .iter()
        .map(|&name| unsafe { CStr::from_ptr(name) })
        .collect();
    debug!("Surface extensions: {:?}", names);

    Ok(extensions.to_vec())
}

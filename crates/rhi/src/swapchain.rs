//! Swapchain management.
//!
//! The swapchain only receives blits: the renderer draws into its own
//! textures and [`record_blit`](crate::image::record_blit)s the result into
//! the acquired image, so images are created with `TRANSFER_DST` usage and no
//! views.
//!
//! # Rebuilding
//!
//! [`Swapchain::rebuild`] consumes the old value and returns its replacement,
//! passing the old handle as `oldSwapchain`. Callers move-assign the result:
//!
//! ```no_run
//! use lantern_rhi::swapchain::{Swapchain, PresentStatus};
//! use lantern_rhi::vk;
//!
//! # fn example(swapchain: Swapchain, surface: vk::SurfaceKHR) -> Result<(), lantern_rhi::RhiError> {
//! let mut swapchain = swapchain;
//! swapchain = swapchain.rebuild(surface, 1280, 720)?;
//! # Ok(())
//! # }
//! ```
//!
//! Acquire and present results are classified by [`classify_acquire`] and
//! [`classify_present`]: out-of-date is a [`PresentStatus`], everything else
//! that is not success is an error.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::sync::timeout_nanos;

/// Usage every swapchain image must support.
const REQUIRED_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::TRANSFER_DST;

/// What a surface offers a physical device.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// # Errors
    ///
    /// Returns the first failing surface query.
    pub fn query(
        gpu: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let support = unsafe {
            Self {
                capabilities: loader.get_physical_device_surface_capabilities(gpu, surface)?,
                formats: loader.get_physical_device_surface_formats(gpu, surface)?,
                present_modes: loader.get_physical_device_surface_present_modes(gpu, surface)?,
            }
        };
        debug!(
            "Surface offers {} format(s), {} present mode(s), {}..={} images",
            support.formats.len(),
            support.present_modes.len(),
            support.capabilities.min_image_count,
            support.capabilities.max_image_count
        );
        Ok(support)
    }

    /// Something to pick from, and images that accept blits.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty()
            && !self.present_modes.is_empty()
            && self
                .capabilities
                .supported_usage_flags
                .contains(REQUIRED_USAGE)
    }

    /// First of B8G8R8A8_UNORM and R8G8B8A8_UNORM in SRGB_NONLINEAR, else
    /// whatever the surface lists first.
    fn pick_format(&self) -> vk::SurfaceFormatKHR {
        const PREFERRED: [vk::Format; 2] = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];

        let preferred = PREFERRED.iter().find_map(|&wanted| {
            self.formats
                .iter()
                .find(|f| f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
                .copied()
        });
        preferred.unwrap_or_else(|| {
            let fallback = self.formats.first().copied().unwrap_or_default();
            warn!("No preferred surface format, using {:?}", fallback.format);
            fallback
        })
    }

    /// MAILBOX if offered. FIFO is always available.
    fn pick_present_mode(&self) -> vk::PresentModeKHR {
        if self.present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
            vk::PresentModeKHR::MAILBOX
        } else {
            vk::PresentModeKHR::FIFO
        }
    }

    /// The surface's own extent when it has one; otherwise the request
    /// clamped to the surface limits.
    fn pick_extent(&self, width: u32, height: u32) -> vk::Extent2D {
        let caps = &self.capabilities;
        if caps.current_extent.width != u32::MAX {
            return caps.current_extent;
        }
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }

    /// One above the minimum; a zero maximum means unbounded.
    fn pick_image_count(&self) -> u32 {
        let caps = &self.capabilities;
        match caps.max_image_count {
            0 => caps.min_image_count + 1,
            max => (caps.min_image_count + 1).min(max),
        }
    }
}

/// What happened to a frame at the swapchain boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    /// The image was queued for presentation.
    Presented,
    /// The swapchain no longer matches the surface and must be rebuilt.
    SwapchainOutOfDate,
}

/// Result of a successful acquire call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    /// An image was acquired; its semaphore will be signaled.
    Image { index: u32, suboptimal: bool },
    /// Nothing was acquired; rebuild before the next attempt.
    OutOfDate,
}

/// Maps a raw `vkAcquireNextImageKHR` result.
///
/// # Errors
///
/// `TIMEOUT` and `NOT_READY` become [`RhiError::Timeout`]; other failures are
/// returned as Vulkan errors.
pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> RhiResult<Acquired> {
    match result {
        Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
        Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(RhiError::Timeout {
            what: "swapchain image",
        }),
        Err(e) => Err(RhiError::VulkanError(e)),
    }
}

/// Maps a raw `vkQueuePresentKHR` result. A suboptimal present asks for a
/// rebuild as well.
///
/// # Errors
///
/// Any failure other than out-of-date.
pub fn classify_present(result: Result<bool, vk::Result>) -> RhiResult<PresentStatus> {
    match result {
        Ok(false) => Ok(PresentStatus::Presented),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::SwapchainOutOfDate),
        Err(e) => Err(RhiError::VulkanError(e)),
    }
}

/// Vulkan swapchain wrapper.
///
/// Images belong to the swapchain and are destroyed with it.
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    surface_loader: ash::khr::surface::Instance,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Creates a new swapchain.
    ///
    /// - Preferred format: an 8-bit UNORM format with SRGB_NONLINEAR color
    ///   space, since the post-process pass already applies the transfer function
    /// - Preferred present mode: MAILBOX, fallback to FIFO
    /// - Image usage: TRANSFER_DST
    ///
    /// # Arguments
    ///
    /// * `instance` - The Vulkan instance
    /// * `device` - The logical device, created with present support
    /// * `surface` - The window surface
    /// * `width` - Desired swapchain width
    /// * `height` - Desired swapchain height
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The device has no present queue
    /// - Surface queries fail
    /// - The surface has no usable format, present mode or blit usage
    /// - Swapchain creation fails
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        Self::create(
            device,
            swapchain_loader,
            surface_loader,
            surface,
            width,
            height,
            vk::SwapchainKHR::null(),
        )
    }

    fn create(
        device: Arc<Device>,
        swapchain_loader: ash::khr::swapchain::Device,
        surface_loader: ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<Self> {
        let queue_families = device.queue_families();
        let (Some(graphics_family), Some(present_family)) =
            (queue_families.graphics_family, queue_families.present_family)
        else {
            return Err(RhiError::SwapchainError(
                "Device was created without a present queue".to_string(),
            ));
        };

        let support = SurfaceSupport::query(device.physical_device(), surface, &surface_loader)?;
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "surface lacks formats, present modes or TRANSFER_DST usage".to_string(),
            ));
        }

        let surface_format = support.pick_format();
        let present_mode = support.pick_present_mode();
        let extent = support.pick_extent(width, height);
        let image_count = support.pick_image_count();

        info!(
            "Swapchain {}x{} {:?}/{:?}, {:?}, min {} images",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode,
            image_count
        );

        // Images are shared when graphics and present live in different families.
        let families = [graphics_family, present_family];
        let (sharing_mode, shared_families): (_, &[u32]) = if graphics_family == present_family {
            (vk::SharingMode::EXCLUSIVE, &[])
        } else {
            (vk::SharingMode::CONCURRENT, &families)
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(REQUIRED_USAGE)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e.into());
            }
        };
        debug!("Swapchain owns {} images", images.len());

        Ok(Self {
            device,
            swapchain_loader,
            surface_loader,
            swapchain,
            images,
            format: surface_format.format,
            color_space: surface_format.color_space,
            extent,
            present_mode,
        })
    }

    /// Builds a replacement swapchain for a new window size.
    ///
    /// Waits for the device to go idle, creates the new swapchain with this
    /// one as `oldSwapchain`, then drops this one. On failure the old
    /// swapchain is destroyed as well and the error is fatal.
    ///
    /// # Errors
    ///
    /// Returns an error if the idle wait, surface query or creation fails.
    pub fn rebuild(self, surface: vk::SurfaceKHR, width: u32, height: u32) -> RhiResult<Self> {
        self.device.wait_idle()?;

        info!(
            "Rebuilding swapchain: {}x{} -> requested {}x{}",
            self.extent.width, self.extent.height, width, height
        );

        Self::create(
            self.device.clone(),
            self.swapchain_loader.clone(),
            self.surface_loader.clone(),
            surface,
            width,
            height,
            self.swapchain,
        )
        // `self` drops here, after the replacement has been created.
    }

    /// Acquires the next image, signaling `semaphore` when it is ready.
    ///
    /// # Errors
    ///
    /// See [`classify_acquire`].
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout: Duration,
    ) -> RhiResult<Acquired> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout_nanos(timeout),
                semaphore,
                vk::Fence::null(),
            )
        };
        let acquired = classify_acquire(result)?;
        if let Acquired::Image {
            suboptimal: true, ..
        } = acquired
        {
            debug!("Acquired image from a suboptimal swapchain");
        }
        Ok(acquired)
    }

    /// Queues image `image_index` for presentation after `wait_semaphore`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SwapchainError`] if the device has no present
    /// queue; otherwise see [`classify_present`].
    pub fn present(&self, image_index: u32, wait_semaphore: vk::Semaphore) -> RhiResult<PresentStatus> {
        let queue = self.device.present_queue().ok_or_else(|| {
            RhiError::SwapchainError("Device was created without a present queue".to_string())
        })?;

        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };
        classify_present(result)
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Returns the image at `index`, or an error for an index the swapchain
    /// never handed out.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] if `index` is out of range.
    pub fn image(&self, index: u32) -> RhiResult<vk::Image> {
        self.images.get(index as usize).copied().ok_or_else(|| {
            RhiError::InvalidHandle(format!(
                "swapchain image {} of {}",
                index,
                self.images.len()
            ))
        })
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

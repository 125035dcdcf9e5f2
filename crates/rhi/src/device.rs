//! Vulkan logical device and queue management.
//!
//! This module handles VkDevice creation, queue retrieval, gpu-allocator
//! initialization and the shader object loader.
//!
//! # Overview
//!
//! The [`Device`] struct provides a safe abstraction over the Vulkan logical device,
//! including:
//! - Logical device creation with the features the deferred path needs
//! - A single graphics + compute queue, plus a present queue when a surface exists
//! - Memory allocation via gpu-allocator
//! - A live-resource ledger that reports leaks at teardown
//!
//! # Example
//!
//! ```no_run
//! use lantern_rhi::instance::Instance;
//! use lantern_rhi::physical_device::select_physical_device;
//! use lantern_rhi::device::Device;
//!
//! let instance = Instance::new(false, &[]).expect("Failed to create instance");
//! let physical_device_info = select_physical_device(instance.handle(), None)
//!     .expect("No suitable GPU found");
//!
//! let device = Device::new(&instance, &physical_device_info)
//!     .expect("Failed to create logical device");
//!
//! let graphics_queue = device.graphics_queue();
//! assert!(device.present_queue().is_none());
//! ```

use std::collections::BTreeMap;
use std::ffi::{CStr, c_char};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info, warn};

use crate::error::RhiError;
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// Extensions every device enables.
const BASE_EXTENSIONS: &[&CStr] = &[ash::ext::shader_object::NAME];

/// Counts live GPU resources by kind.
///
/// Wrappers call [`ResourceLedger::track`] on creation and
/// [`ResourceLedger::release`] in `Drop`. Whatever is left when the device is
/// destroyed was leaked.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    live: Mutex<BTreeMap<&'static str, usize>>,
}

impl ResourceLedger {
    /// Records a new live resource of `kind`.
    pub fn track(&self, kind: &'static str) {
        if let Ok(mut live) = self.live.lock() {
            *live.entry(kind).or_insert(0) += 1;
        }
    }

    /// Records that a resource of `kind` was destroyed.
    ///
    /// Releasing a kind that has no live entries is a double release and is
    /// reported rather than underflowing.
    pub fn release(&self, kind: &'static str) {
        let Ok(mut live) = self.live.lock() else {
            return;
        };
        match live.get_mut(kind) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                live.remove(kind);
            }
            None => warn!("Released a {} that was not tracked as live", kind),
        }
    }

    /// Number of live resources of `kind`.
    pub fn count(&self, kind: &str) -> usize {
        self.live
            .lock()
            .ok()
            .and_then(|live| live.get(kind).copied())
            .unwrap_or(0)
    }

    /// Snapshot of every kind with live resources.
    pub fn outstanding(&self) -> Vec<(&'static str, usize)> {
        self.live
            .lock()
            .map(|live| live.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default()
    }
}

/// Vulkan logical device wrapper.
///
/// This struct manages the lifetime of the Vulkan logical device and its associated
/// resources including queues and the memory allocator.
///
/// # Thread Safety
///
/// The [`Device`] is designed to be shared across threads using `Arc`. The internal
/// allocator is protected by a `Mutex` for thread-safe memory allocation.
pub struct Device {
    /// Vulkan logical device handle.
    device: ash::Device,
    /// Physical device handle.
    physical_device: vk::PhysicalDevice,
    /// GPU memory allocator. Dropped before the device.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    /// Graphics + compute queue handle.
    graphics_queue: vk::Queue,
    /// Presentation queue handle, `None` for headless devices.
    present_queue: Option<vk::Queue>,
    /// Queue family indices.
    queue_families: QueueFamilyIndices,
    /// `VK_EXT_shader_object` function table.
    shader_object: ash::ext::shader_object::Device,
    /// Alignment for flushing non-coherent mapped memory.
    non_coherent_atom_size: u64,
    ledger: ResourceLedger,
}

impl Device {
    /// Creates a new logical device.
    ///
    /// This function creates a Vulkan logical device with:
    /// - `VK_EXT_shader_object`, plus `VK_KHR_swapchain` when the physical
    ///   device was selected with presentation support
    /// - Vulkan 1.2 features (descriptor indexing, buffer device address)
    /// - Vulkan 1.3 features (dynamic rendering, synchronization2)
    /// - The `shaderObject` feature
    ///
    /// It also initializes the gpu-allocator for memory management.
    ///
    /// # Arguments
    ///
    /// * `instance` - The Vulkan instance
    /// * `physical_device_info` - Information about the selected physical device
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The physical device has no graphics queue family
    /// - Device creation fails
    /// - Allocator initialization fails
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> Result<Arc<Self>, RhiError> {
        let queue_families = physical_device_info.queue_families;
        let graphics_family = queue_families.graphics_family.ok_or(RhiError::NoSuitableGpu)?;

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default()
            .descriptor_indexing(true)
            .buffer_device_address(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_partially_bound(true);

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let mut shader_object_features =
            vk::PhysicalDeviceShaderObjectFeaturesEXT::default().shader_object(true);

        let extension_names = device_extensions(physical_device_info.supports_present());

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3)
            .push_next(&mut shader_object_features);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!(
            "Logical device created with {} extension(s)",
            extension_names.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        debug!("Graphics queue retrieved from family {}", graphics_family);

        let present_queue = queue_families.present_family.map(|family| {
            let queue = unsafe { device.get_device_queue(family, 0) };
            debug!("Present queue retrieved from family {}", family);
            queue
        });

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("GPU memory allocator initialized");

        let shader_object = ash::ext::shader_object::Device::new(instance.handle(), &device);

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            queue_families,
            shader_object,
            non_coherent_atom_size: physical_device_info
                .properties
                .limits
                .non_coherent_atom_size
                .max(1),
            ledger: ResourceLedger::default(),
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the graphics + compute queue handle.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Returns the presentation queue handle, if the device can present.
    #[inline]
    pub fn present_queue(&self) -> Option<vk::Queue> {
        self.present_queue
    }

    /// Returns the queue family indices.
    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Returns the graphics queue family index.
    #[inline]
    pub fn graphics_family(&self) -> u32 {
        // Device::new refuses to build without one.
        self.queue_families.graphics_family.unwrap_or_default()
    }

    /// Returns a reference to the GPU memory allocator.
    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Returns the `VK_EXT_shader_object` function table.
    #[inline]
    pub fn shader_object(&self) -> &ash::ext::shader_object::Device {
        &self.shader_object
    }

    /// Returns `nonCoherentAtomSize` for the physical device.
    #[inline]
    pub fn non_coherent_atom_size(&self) -> u64 {
        self.non_coherent_atom_size
    }

    /// Returns the live-resource ledger.
    #[inline]
    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// Waits for the device to become idle.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits work to the graphics queue with `vkQueueSubmit2`.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - All command buffers are valid and recorded
    /// - Synchronization is properly handled
    /// - The fence (if not null) is unsignaled and not in use
    ///
    /// # Errors
    ///
    /// Returns an error if the submission fails.
    pub unsafe fn submit_graphics(
        &self,
        submits: &[vk::SubmitInfo2<'_>],
        fence: vk::Fence,
    ) -> Result<(), RhiError> {
        unsafe {
            self.device
                .queue_submit2(self.graphics_queue, submits, fence)?;
        }
        Ok(())
    }
}

/// Device extension list for the requested mode.
fn device_extensions(present: bool) -> Vec<*const c_char> {
    let mut names: Vec<*const c_char> = BASE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();
    if present {
        names.push(ash::khr::swapchain::NAME.as_ptr());
    }
    names
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
        }

        for (kind, count) in self.ledger.outstanding() {
            warn!("{} {}(s) still alive at device teardown", count, kind);
        }

        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: Device is Send+Sync because:
// - ash::Device and the extension tables are plain function pointers
// - vk::PhysicalDevice and vk::Queue are Copy types (handles)
// - Allocator and the ledger are protected by Mutex
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_for_mode() {
        let headless = device_extensions(false);
        assert_eq!(headless.len(), 1);
        let name = unsafe { CStr::from_ptr(headless[0]) };
        assert_eq!(name, ash::ext::shader_object::NAME);

        let windowed = device_extensions(true);
        assert_eq!(windowed.len(), 2);
        let name = unsafe { CStr::from_ptr(windowed[1]) };
        assert_eq!(name, ash::khr::swapchain::NAME);
    }

    #[test]
    fn test_ledger_tracks_and_releases() {
        let ledger = ResourceLedger::default();
        ledger.track("buffer");
        ledger.track("buffer");
        ledger.track("image");
        assert_eq!(ledger.count("buffer"), 2);

        ledger.release("buffer");
        ledger.release("image");
        assert_eq!(ledger.outstanding(), vec![("buffer", 1)]);

        ledger.release("buffer");
        assert!(ledger.outstanding().is_empty());
    }

    #[test]
    fn test_ledger_double_release_does_not_underflow() {
        let ledger = ResourceLedger::default();
        ledger.track("sampler");
        ledger.release("sampler");
        ledger.release("sampler");
        assert_eq!(ledger.count("sampler"), 0);
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}

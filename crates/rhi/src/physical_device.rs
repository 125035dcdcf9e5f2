//! Physical device (GPU) selection.
//!
//! A GPU is usable only if it offers everything the deferred path relies on:
//!
//! 1. Vulkan 1.3
//! 2. `synchronization2` and `dynamicRendering`
//! 3. Descriptor indexing with partially bound bindings and runtime arrays
//! 4. Buffer device addresses
//! 5. `VK_EXT_shader_object`
//! 6. A queue family with graphics + compute, and (when a surface is given)
//!    one that can present to it
//!
//! These are hard preconditions. Among usable GPUs the highest scoring one is
//! picked, preferring discrete GPUs.
//!
//! # Example
//!
//! ```no_run
//! use lantern_rhi::instance::Instance;
//! use lantern_rhi::physical_device::select_physical_device;
//!
//! let instance = Instance::new(false, &[]).expect("Failed to create instance");
//! // Headless: no presentation support is requested
//! let info = select_physical_device(instance.handle(), None).expect("No suitable GPU found");
//! println!("Selected GPU: {}", info.device_name());
//! ```

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;

/// Surface used to check presentation support during selection.
pub type SurfaceQuery<'a> = (vk::SurfaceKHR, &'a ash::khr::surface::Instance);

/// Queue family indices used by the renderer.
///
/// Graphics and compute work share one queue; the lighting and post-process
/// passes are recorded into the same command buffer as the GBuffer pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family supporting both graphics and compute.
    pub graphics_family: Option<u32>,
    /// Family able to present to the surface. `None` for headless devices.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Checks that the families needed for the requested mode are present.
    #[inline]
    pub fn is_complete(&self, needs_present: bool) -> bool {
        self.graphics_family.is_some() && (!needs_present || self.present_family.is_some())
    }

    /// Returns the unique queue family indices.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }
        families
    }
}

/// Feature support relevant to the renderer, flattened from the
/// `VkPhysicalDevice*Features` chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub api_version: u32,
    pub synchronization2: bool,
    pub dynamic_rendering: bool,
    pub descriptor_indexing: bool,
    pub descriptor_binding_partially_bound: bool,
    pub runtime_descriptor_array: bool,
    pub buffer_device_address: bool,
    pub shader_object_extension: bool,
    pub shader_object: bool,
    pub swapchain_extension: bool,
}

impl DeviceCapabilities {
    /// Names of every missing capability. Empty means the device is usable.
    pub fn missing(&self, needs_present: bool) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let major = vk::api_version_major(self.api_version);
        let minor = vk::api_version_minor(self.api_version);
        if major < 1 || (major == 1 && minor < 3) {
            missing.push("Vulkan 1.3");
        }
        if !self.synchronization2 {
            missing.push("synchronization2");
        }
        if !self.dynamic_rendering {
            missing.push("dynamicRendering");
        }
        if !self.descriptor_indexing {
            missing.push("descriptorIndexing");
        }
        if !self.descriptor_binding_partially_bound {
            missing.push("descriptorBindingPartiallyBound");
        }
        if !self.runtime_descriptor_array {
            missing.push("runtimeDescriptorArray");
        }
        if !self.buffer_device_address {
            missing.push("bufferDeviceAddress");
        }
        if !self.shader_object_extension {
            missing.push("VK_EXT_shader_object");
        } else if !self.shader_object {
            missing.push("shaderObject");
        }
        if needs_present && !self.swapchain_extension {
            missing.push("VK_KHR_swapchain");
        }
        missing
    }

    /// Queries capabilities for `device`.
    pub fn query(instance: &ash::Instance, device: vk::PhysicalDevice) -> Self {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .unwrap_or_default()
        };
        let has_extension = |name: &CStr| {
            extensions
                .iter()
                .any(|ext| ext.extension_name_as_c_str().is_ok_and(|n| n == name))
        };

        let shader_object_extension = has_extension(ash::ext::shader_object::NAME);
        let swapchain_extension = has_extension(ash::khr::swapchain::NAME);

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default();
        let mut shader_object = vk::PhysicalDeviceShaderObjectFeaturesEXT::default();
        {
            let mut features2 = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut features_1_2)
                .push_next(&mut features_1_3);
            if shader_object_extension {
                features2 = features2.push_next(&mut shader_object);
            }
            unsafe { instance.get_physical_device_features2(device, &mut features2) };
        }

        Self {
            api_version: properties.api_version,
            synchronization2: features_1_3.synchronization2 == vk::TRUE,
            dynamic_rendering: features_1_3.dynamic_rendering == vk::TRUE,
            descriptor_indexing: features_1_2.descriptor_indexing == vk::TRUE,
            descriptor_binding_partially_bound: features_1_2.descriptor_binding_partially_bound
                == vk::TRUE,
            runtime_descriptor_array: features_1_2.runtime_descriptor_array == vk::TRUE,
            buffer_device_address: features_1_2.buffer_device_address == vk::TRUE,
            shader_object_extension,
            shader_object: shader_object.shader_object == vk::TRUE,
            swapchain_extension,
        }
    }
}

/// Information about the selected physical device.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
    pub capabilities: DeviceCapabilities,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        device_type_name(self.properties.device_type)
    }

    /// Returns `(major, minor, patch)` of the supported API version.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Returns the total device-local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }

    /// Whether this device was selected with presentation support.
    #[inline]
    pub fn supports_present(&self) -> bool {
        self.queue_families.present_family.is_some()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

/// Selects the most suitable physical device.
///
/// # Arguments
///
/// * `instance` - The Vulkan instance
/// * `surface` - Surface and loader to check presentation against, or `None`
///   for a headless device
///
/// # Errors
///
/// * [`RhiError::NoSuitableGpu`] if no GPU is enumerated or none has usable queues
/// * [`RhiError::MissingCapabilities`] listing what the best candidate lacks
///   when every GPU fails the capability check
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: Option<SurfaceQuery<'_>>,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());
    let needs_present = surface.is_some();

    let mut suitable: Vec<(PhysicalDeviceInfo, u32)> = Vec::new();
    let mut best_rejected: Option<(u32, Vec<&'static str>)> = None;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        let queue_families = find_queue_families(instance, device, surface);
        let capabilities = DeviceCapabilities::query(instance, device);

        let info = PhysicalDeviceInfo {
            device,
            properties,
            memory_properties,
            queue_families,
            capabilities,
        };

        if !queue_families.is_complete(needs_present) {
            debug!(
                "GPU '{}' skipped: missing queue families (graphics={}, present={})",
                info.device_name(),
                queue_families.graphics_family.is_some(),
                queue_families.present_family.is_some()
            );
            continue;
        }

        let score = rate_device(&info);
        let missing = capabilities.missing(needs_present);
        if !missing.is_empty() {
            debug!(
                "GPU '{}' skipped: missing {}",
                info.device_name(),
                missing.join(", ")
            );
            if best_rejected.as_ref().is_none_or(|(s, _)| score > *s) {
                best_rejected = Some((score, missing));
            }
            continue;
        }

        debug!(
            "GPU '{}' ({}) - Score: {}",
            info.device_name(),
            info.device_type_name(),
            score
        );
        suitable.push((info, score));
    }

    suitable.sort_by(|a, b| b.1.cmp(&a.1));
    let Some((selected, score)) = suitable.into_iter().next() else {
        return Err(match best_rejected {
            Some((_, missing)) => {
                warn!("No GPU offers the required features: {}", missing.join(", "));
                RhiError::MissingCapabilities(missing)
            }
            None => RhiError::NoSuitableGpu,
        });
    };

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, Score: {}",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        score
    );

    Ok(selected)
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: Option<SurfaceQuery<'_>>,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let flags: Vec<vk::QueueFlags> = families
        .iter()
        .map(|f| {
            if f.queue_count == 0 {
                vk::QueueFlags::empty()
            } else {
                f.queue_flags
            }
        })
        .collect();

    let present_support = |index: u32| match surface {
        Some((surface, loader)) => unsafe {
            loader
                .get_physical_device_surface_support(device, index, surface)
                .unwrap_or(false)
        },
        None => false,
    };

    pick_queue_families(&flags, present_support)
}

/// Picks queue families from their flags. Prefers a single family that can
/// do graphics, compute and presentation.
fn pick_queue_families(
    flags: &[vk::QueueFlags],
    present_support: impl Fn(u32) -> bool,
) -> QueueFamilyIndices {
    let wanted = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
    let mut indices = QueueFamilyIndices::default();

    for (i, family_flags) in flags.iter().enumerate() {
        let i = i as u32;
        let graphics = family_flags.contains(wanted);
        let present = present_support(i);

        if graphics && present {
            return QueueFamilyIndices {
                graphics_family: Some(i),
                present_family: Some(i),
            };
        }
        if graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if present && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
    }

    indices
}

/// Rates a physical device; higher is better.
fn rate_device(info: &PhysicalDeviceInfo) -> u32 {
    let mut score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };

    score += info.properties.limits.max_image_dimension2_d;

    let vram_mb = (info.device_local_memory() / (1024 * 1024)) as u32;
    score += vram_mb.min(16000);

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_capabilities() -> DeviceCapabilities {
        DeviceCapabilities {
            api_version: vk::API_VERSION_1_3,
            synchronization2: true,
            dynamic_rendering: true,
            descriptor_indexing: true,
            descriptor_binding_partially_bound: true,
            runtime_descriptor_array: true,
            buffer_device_address: true,
            shader_object_extension: true,
            shader_object: true,
            swapchain_extension: true,
        }
    }

    #[test]
    fn test_full_capabilities_have_nothing_missing() {
        assert!(full_capabilities().missing(true).is_empty());
    }

    #[test]
    fn test_missing_capabilities_are_listed() {
        let caps = DeviceCapabilities {
            api_version: vk::API_VERSION_1_2,
            synchronization2: false,
            shader_object_extension: false,
            ..full_capabilities()
        };
        let missing = caps.missing(false);
        assert_eq!(
            missing,
            vec!["Vulkan 1.3", "synchronization2", "VK_EXT_shader_object"]
        );
    }

    #[test]
    fn test_shader_object_feature_checked_after_extension() {
        let caps = DeviceCapabilities {
            shader_object: false,
            ..full_capabilities()
        };
        assert_eq!(caps.missing(false), vec!["shaderObject"]);
    }

    #[test]
    fn test_swapchain_only_required_for_present() {
        let caps = DeviceCapabilities {
            swapchain_extension: false,
            ..full_capabilities()
        };
        assert!(caps.missing(false).is_empty());
        assert_eq!(caps.missing(true), vec!["VK_KHR_swapchain"]);
    }

    #[test]
    fn test_queue_family_completeness() {
        let headless = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        assert!(headless.is_complete(false));
        assert!(!headless.is_complete(true));
        assert!(!QueueFamilyIndices::default().is_complete(false));
    }

    #[test]
    fn test_unique_families() {
        let shared = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert_eq!(shared.unique_families(), vec![0]);

        let split = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
        };
        assert_eq!(split.unique_families(), vec![0, 2]);
    }

    #[test]
    fn test_pick_prefers_combined_family() {
        let flags = [
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        ];
        let indices = pick_queue_families(&flags, |i| i == 2);
        assert_eq!(indices.graphics_family, Some(2));
        assert_eq!(indices.present_family, Some(2));
    }

    #[test]
    fn test_pick_split_families() {
        let flags = [
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            vk::QueueFlags::TRANSFER,
        ];
        let indices = pick_queue_families(&flags, |i| i == 1);
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(1));
    }

    #[test]
    fn test_pick_requires_compute_on_graphics_family() {
        let flags = [vk::QueueFlags::GRAPHICS];
        let indices = pick_queue_families(&flags, |_| false);
        assert_eq!(indices.graphics_family, None);
    }
}

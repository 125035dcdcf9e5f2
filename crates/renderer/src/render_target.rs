//! Offscreen color + depth targets.
//!
//! A [`RenderTarget`] is allocated once at a fixed capacity and drawn into at
//! a smaller logical [`size`](RenderTarget::size) that may change every
//! frame. Each target owns a descriptor pool and three sets over its own
//! images, built against the shared [`SceneTextureLayouts`]:
//!
//! | set | bindings |
//! |---|---|
//! | singleton | 0: color, sampled |
//! | combined | 0: color, 1: depth, both sampled |
//! | storage | 0: color as a storage image |

use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use lantern_rhi::RhiResult;
use lantern_rhi::descriptor::{
    DescriptorLayoutBuilder, DescriptorPool, DescriptorWriter, ImmutableSamplerLayout,
    pool_sizes_for,
};
use lantern_rhi::device::Device;
use lantern_rhi::image::{AllocatedImage, ImageDesc, ImageView};
use lantern_rhi::sampler::{Sampler, SamplerKind};

/// Color format of every render target. Storage-capable on all Vulkan 1.3 devices.
pub const TARGET_COLOR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
/// Depth format of every render target.
pub const TARGET_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

const COLOR_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::STORAGE.as_raw()
        | vk::ImageUsageFlags::SAMPLED.as_raw()
        | vk::ImageUsageFlags::TRANSFER_SRC.as_raw()
        | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);
const DEPTH_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::SAMPLED.as_raw(),
);

const SAMPLED_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::FRAGMENT.as_raw() | vk::ShaderStageFlags::COMPUTE.as_raw(),
);

/// Set layouts shared by all render targets and the passes that read them.
pub struct SceneTextureLayouts {
    singleton: ImmutableSamplerLayout,
    combined: ImmutableSamplerLayout,
    storage: ImmutableSamplerLayout,
}

impl SceneTextureLayouts {
    /// Creates the three layouts. Samplers are immutable: linear for color,
    /// nearest for depth.
    ///
    /// # Errors
    ///
    /// Returns an error if a sampler or layout cannot be created.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let singleton = DescriptorLayoutBuilder::new()
            .add_immutable_samplers(
                0,
                SAMPLED_STAGES,
                vec![Sampler::new(device.clone(), SamplerKind::LinearClamp)?],
            )
            .build(device.clone())?;

        let combined = DescriptorLayoutBuilder::new()
            .add_immutable_samplers(
                0,
                SAMPLED_STAGES,
                vec![Sampler::new(device.clone(), SamplerKind::LinearClamp)?],
            )
            .add_immutable_samplers(
                1,
                SAMPLED_STAGES,
                vec![Sampler::new(device.clone(), SamplerKind::NearestClamp)?],
            )
            .build(device.clone())?;

        let storage = DescriptorLayoutBuilder::new()
            .add_binding(
                0,
                vk::DescriptorType::STORAGE_IMAGE,
                vk::ShaderStageFlags::COMPUTE,
            )
            .build(device)?;

        debug!("Created scene texture layouts");

        Ok(Self {
            singleton,
            combined,
            storage,
        })
    }

    #[inline]
    pub fn singleton(&self) -> vk::DescriptorSetLayout {
        self.singleton.handle()
    }

    #[inline]
    pub fn combined(&self) -> vk::DescriptorSetLayout {
        self.combined.handle()
    }

    #[inline]
    pub fn storage(&self) -> vk::DescriptorSetLayout {
        self.storage.handle()
    }
}

/// Clamps `requested` to `capacity` on each axis.
pub fn clamp_to_capacity(requested: vk::Extent2D, capacity: vk::Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: requested.width.min(capacity.width),
        height: requested.height.min(capacity.height),
    }
}

/// Color + depth image pair with its own descriptor sets.
pub struct RenderTarget {
    name: &'static str,
    singleton_set: vk::DescriptorSet,
    combined_set: vk::DescriptorSet,
    storage_set: vk::DescriptorSet,
    // Sets are freed with the pool, which must go before the views.
    _pool: DescriptorPool,
    color: ImageView,
    depth: ImageView,
    size: vk::Extent2D,
}

impl RenderTarget {
    /// Allocates the images at `capacity` and writes the three sets. The
    /// logical size starts at `capacity`.
    ///
    /// # Errors
    ///
    /// Returns an error if an image, view, pool or set cannot be created.
    pub fn new(
        device: Arc<Device>,
        layouts: &SceneTextureLayouts,
        name: &'static str,
        capacity: vk::Extent2D,
    ) -> RhiResult<Self> {
        let color = ImageView::new(AllocatedImage::new(
            device.clone(),
            &ImageDesc {
                name,
                extent: capacity,
                format: TARGET_COLOR_FORMAT,
                usage: COLOR_USAGE,
            },
        )?)?;
        let depth = ImageView::new(AllocatedImage::new(
            device.clone(),
            &ImageDesc {
                name,
                extent: capacity,
                format: TARGET_DEPTH_FORMAT,
                usage: DEPTH_USAGE,
            },
        )?)?;

        let pool = DescriptorPool::new(
            device.clone(),
            3,
            &pool_sizes_for(
                1,
                &[
                    (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 3),
                    (vk::DescriptorType::STORAGE_IMAGE, 1),
                ],
            ),
        )?;
        let sets = pool.allocate(&[
            layouts.singleton(),
            layouts.combined(),
            layouts.storage(),
        ])?;
        let [singleton_set, combined_set, storage_set] = sets[..] else {
            return Err(lantern_rhi::RhiError::InvalidState(format!(
                "render target '{}' got {} descriptor sets, expected 3",
                name,
                sets.len()
            )));
        };

        let sampled = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        DescriptorWriter::new()
            .sampled_image(0, color.view(), vk::Sampler::null(), sampled)
            .update(&device, singleton_set);
        DescriptorWriter::new()
            .sampled_image(0, color.view(), vk::Sampler::null(), sampled)
            .sampled_image(1, depth.view(), vk::Sampler::null(), sampled)
            .update(&device, combined_set);
        DescriptorWriter::new()
            .storage_image(0, color.view())
            .update(&device, storage_set);

        debug!(
            "Created render target '{}' ({}x{})",
            name, capacity.width, capacity.height
        );

        Ok(Self {
            name,
            singleton_set,
            combined_set,
            storage_set,
            _pool: pool,
            color,
            depth,
            size: capacity,
        })
    }

    /// Sets the logical size for the coming frame, clamped to capacity.
    /// Returns the size actually used.
    pub fn set_size(&mut self, size: vk::Extent2D) -> vk::Extent2D {
        let clamped = clamp_to_capacity(size, self.capacity());
        if clamped != size {
            warn!(
                "Render target '{}': {}x{} exceeds capacity, using {}x{}",
                self.name, size.width, size.height, clamped.width, clamped.height
            );
        }
        self.size = clamped;
        clamped
    }

    /// Logical size of the current frame.
    #[inline]
    pub fn size(&self) -> vk::Extent2D {
        self.size
    }

    /// Allocated size.
    #[inline]
    pub fn capacity(&self) -> vk::Extent2D {
        self.color.image().extent()
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn color(&self) -> &ImageView {
        &self.color
    }

    #[inline]
    pub fn color_image_mut(&mut self) -> &mut AllocatedImage {
        self.color.image_mut()
    }

    #[inline]
    pub fn depth(&self) -> &ImageView {
        &self.depth
    }

    #[inline]
    pub fn depth_image_mut(&mut self) -> &mut AllocatedImage {
        self.depth.image_mut()
    }

    /// Color, sampled (`SHADER_READ_ONLY_OPTIMAL`).
    #[inline]
    pub fn singleton_set(&self) -> vk::DescriptorSet {
        self.singleton_set
    }

    /// Color and depth, sampled (`SHADER_READ_ONLY_OPTIMAL`).
    #[inline]
    pub fn combined_set(&self) -> vk::DescriptorSet {
        self.combined_set
    }

    /// Color as a storage image (`GENERAL`).
    #[inline]
    pub fn storage_set(&self) -> vk::DescriptorSet {
        self.storage_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_clamp_to_capacity() {
        let capacity = extent(3840, 2160);
        assert_eq!(clamp_to_capacity(extent(1280, 720), capacity), extent(1280, 720));
        assert_eq!(clamp_to_capacity(extent(5120, 720), capacity), extent(3840, 720));
        assert_eq!(clamp_to_capacity(extent(5120, 2880), capacity), capacity);
    }

    #[test]
    fn test_usage_flags() {
        assert!(COLOR_USAGE.contains(vk::ImageUsageFlags::STORAGE));
        assert!(COLOR_USAGE.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(DEPTH_USAGE.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(!DEPTH_USAGE.contains(vk::ImageUsageFlags::STORAGE));
    }
}

//! Geometry buffer.
//!
//! Five color targets at one capacity, read by the lighting pass through a
//! single set: binding 0 is an array of five combined image samplers, indexed
//! by [`GBufferTarget`], with immutable nearest samplers.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use lantern_rhi::command::CommandBuffer;
use lantern_rhi::descriptor::{
    DescriptorLayoutBuilder, DescriptorPool, DescriptorWriter, ImmutableSamplerLayout,
    pool_sizes_for,
};
use lantern_rhi::device::Device;
use lantern_rhi::image::{AllocatedImage, ImageDesc, ImageView};
use lantern_rhi::rendering::ColorAttachment;
use lantern_rhi::sampler::{Sampler, SamplerKind};
use lantern_rhi::{RhiError, RhiResult};

/// Number of GBuffer targets.
pub const GBUFFER_TARGET_COUNT: usize = 5;

/// One GBuffer target. The discriminant is the attachment location and the
/// sampler array index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GBufferTarget {
    Diffuse = 0,
    Specular = 1,
    Normal = 2,
    WorldPosition = 3,
    /// Occlusion, roughness, metallic.
    Orm = 4,
}

impl GBufferTarget {
    pub const ALL: [GBufferTarget; GBUFFER_TARGET_COUNT] = [
        GBufferTarget::Diffuse,
        GBufferTarget::Specular,
        GBufferTarget::Normal,
        GBufferTarget::WorldPosition,
        GBufferTarget::Orm,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GBufferTarget::Diffuse => "gbuffer diffuse",
            GBufferTarget::Specular => "gbuffer specular",
            GBufferTarget::Normal => "gbuffer normal",
            GBufferTarget::WorldPosition => "gbuffer world position",
            GBufferTarget::Orm => "gbuffer orm",
        }
    }

    pub fn format(self) -> vk::Format {
        match self {
            GBufferTarget::Diffuse | GBufferTarget::Specular | GBufferTarget::Orm => {
                vk::Format::R8G8B8A8_UNORM
            }
            GBufferTarget::Normal => vk::Format::R16G16B16A16_SFLOAT,
            GBufferTarget::WorldPosition => vk::Format::R32G32B32A32_SFLOAT,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// The five targets plus the set that samples them.
pub struct GBuffer {
    set: vk::DescriptorSet,
    _pool: DescriptorPool,
    layout: ImmutableSamplerLayout,
    textures: Vec<ImageView>,
}

impl GBuffer {
    /// Creates the targets at `capacity` and the sampled set.
    ///
    /// # Errors
    ///
    /// Returns an error if any image, sampler, layout, pool or set cannot be
    /// created. Samplers created before a failure are destroyed.
    pub fn new(device: Arc<Device>, capacity: vk::Extent2D) -> RhiResult<Self> {
        let textures = GBufferTarget::ALL
            .iter()
            .map(|target| {
                ImageView::new(AllocatedImage::new(
                    device.clone(),
                    &ImageDesc {
                        name: target.name(),
                        extent: capacity,
                        format: target.format(),
                        usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                            | vk::ImageUsageFlags::SAMPLED,
                    },
                )?)
            })
            .collect::<RhiResult<Vec<_>>>()?;

        let samplers =
            Sampler::new_batch(device.clone(), SamplerKind::NearestClamp, GBUFFER_TARGET_COUNT)?;
        let layout = DescriptorLayoutBuilder::new()
            .add_immutable_samplers(0, vk::ShaderStageFlags::COMPUTE, samplers)
            .build(device.clone())?;

        let pool = DescriptorPool::new(
            device.clone(),
            1,
            &pool_sizes_for(
                1,
                &[(
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    GBUFFER_TARGET_COUNT as u32,
                )],
            ),
        )?;
        let set = pool.allocate_one(layout.handle())?;

        GBufferTarget::ALL
            .iter()
            .fold(DescriptorWriter::new(), |writer, &target| {
                writer.sampled_image_element(
                    0,
                    target.index() as u32,
                    textures[target.index()].view(),
                    vk::Sampler::null(),
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                )
            })
            .update(&device, set);

        info!(
            "Created GBuffer ({} targets, {}x{})",
            GBUFFER_TARGET_COUNT, capacity.width, capacity.height
        );

        Ok(Self {
            set,
            _pool: pool,
            layout,
            textures,
        })
    }

    /// Transitions every target to `COLOR_ATTACHMENT_OPTIMAL`.
    pub fn record_to_attachments(&mut self, cmd: &CommandBuffer) {
        self.record_all(cmd, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    /// Transitions every target to `SHADER_READ_ONLY_OPTIMAL`.
    pub fn record_to_sampled(&mut self, cmd: &CommandBuffer) {
        self.record_all(cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    fn record_all(&mut self, cmd: &CommandBuffer, layout: vk::ImageLayout) {
        for texture in &mut self.textures {
            texture.image_mut().record_transition_barriered(cmd, layout);
        }
        debug!("GBuffer targets -> {:?}", layout);
    }

    /// Cleared attachments in location order.
    pub fn color_attachments(&self) -> Vec<ColorAttachment> {
        self.textures
            .iter()
            .map(|texture| ColorAttachment::new(texture.view()))
            .collect()
    }

    /// The target's view.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidHandle`] if the target was not created.
    pub fn texture(&self, target: GBufferTarget) -> RhiResult<&ImageView> {
        self.textures
            .get(target.index())
            .ok_or_else(|| RhiError::InvalidHandle(target.name().to_string()))
    }

    #[inline]
    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    #[inline]
    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.layout.handle()
    }

    #[inline]
    pub fn capacity(&self) -> vk::Extent2D {
        self.textures
            .first()
            .map(|t| t.image().extent())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_are_indexed_in_order() {
        for (i, target) in GBufferTarget::ALL.iter().enumerate() {
            assert_eq!(target.index(), i);
        }
    }

    #[test]
    fn test_target_names_are_unique() {
        let mut names: Vec<&str> = GBufferTarget::ALL.iter().map(|t| t.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), GBUFFER_TARGET_COUNT);
    }

    #[test]
    fn test_world_position_has_full_precision() {
        assert_eq!(
            GBufferTarget::WorldPosition.format(),
            vk::Format::R32G32B32A32_SFLOAT
        );
        assert_eq!(GBufferTarget::Diffuse.format(), vk::Format::R8G8B8A8_UNORM);
    }
}

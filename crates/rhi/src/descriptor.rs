//! Descriptor set management for shader resource binding.
//!
//! This module provides abstractions for Vulkan descriptor management:
//! - [`DescriptorSetLayout`] defines the layout of shader bindings
//! - [`DescriptorLayoutBuilder`] collects bindings, including immutable
//!   samplers, and builds an [`ImmutableSamplerLayout`] that owns them
//! - [`DescriptorPool`] manages allocation of descriptor sets
//! - [`DescriptorWriter`] batches descriptor updates
//!
//! Every subsystem that binds resources owns its own pool; sets are freed with
//! the pool.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lantern_rhi::vk;
//! use lantern_rhi::device::Device;
//! use lantern_rhi::descriptor::{DescriptorLayoutBuilder, DescriptorPool, DescriptorWriter};
//!
//! # fn example(device: Arc<Device>, view: vk::ImageView) -> Result<(), lantern_rhi::RhiError> {
//! let layout = DescriptorLayoutBuilder::new()
//!     .add_binding(0, vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::COMPUTE)
//!     .build(device.clone())?;
//!
//! let pool = DescriptorPool::new(
//!     device.clone(),
//!     1,
//!     &[vk::DescriptorPoolSize::default()
//!         .ty(vk::DescriptorType::STORAGE_IMAGE)
//!         .descriptor_count(1)],
//! )?;
//! let set = pool.allocate_one(layout.handle())?;
//!
//! DescriptorWriter::new()
//!     .storage_image(0, view)
//!     .update(&device, set);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::sampler::Sampler;

/// Descriptor set layout wrapper.
///
/// Every binding is created `PARTIALLY_BOUND`, so sets may leave bindings
/// unwritten as long as shaders do not access them.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Creates a new descriptor set layout.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RhiResult<Self> {
        let binding_flags =
            vec![vk::DescriptorBindingFlags::PARTIALLY_BOUND; bindings.len()];
        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
            .binding_flags(&binding_flags);
        let create_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(bindings)
            .push_next(&mut flags_info);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };
        device.ledger().track("descriptor set layout");

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    /// Returns the Vulkan descriptor set layout handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        self.device.ledger().release("descriptor set layout");
        debug!("Destroyed descriptor set layout");
    }
}

/// A layout together with the immutable samplers baked into it.
///
/// Field order drops the layout before the samplers it references.
pub struct ImmutableSamplerLayout {
    layout: DescriptorSetLayout,
    samplers: Vec<Sampler>,
}

impl ImmutableSamplerLayout {
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout.handle()
    }

    /// Number of immutable samplers owned by this layout.
    #[inline]
    pub fn sampler_count(&self) -> usize {
        self.samplers.len()
    }
}

/// One binding as described to [`DescriptorLayoutBuilder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindingSlot {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
    /// Range into the builder's sampler list, for immutable samplers.
    immutable: Option<(usize, usize)>,
}

/// Collects bindings first, then builds the layout in one step.
///
/// Samplers handed to [`DescriptorLayoutBuilder::add_immutable_samplers`] are
/// owned by the builder and move into the built [`ImmutableSamplerLayout`].
#[derive(Default)]
pub struct DescriptorLayoutBuilder {
    slots: Vec<BindingSlot>,
    samplers: Vec<Sampler>,
}

impl DescriptorLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single-descriptor binding.
    pub fn add_binding(
        self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.add_array_binding(binding, descriptor_type, 1, stages)
    }

    /// Adds a binding with `count` descriptors.
    pub fn add_array_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.slots.push(BindingSlot {
            binding,
            descriptor_type,
            count,
            stages,
            immutable: None,
        });
        self
    }

    /// Adds a combined image sampler binding whose samplers are baked into the
    /// layout. One descriptor per sampler.
    pub fn add_immutable_samplers(
        mut self,
        binding: u32,
        stages: vk::ShaderStageFlags,
        samplers: Vec<Sampler>,
    ) -> Self {
        let start = self.samplers.len();
        let count = samplers.len();
        self.samplers.extend(samplers);
        self.slots.push(BindingSlot {
            binding,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count: count as u32,
            stages,
            immutable: Some((start, count)),
        });
        self
    }

    /// Bindings added so far.
    pub fn slots(&self) -> &[BindingSlot] {
        &self.slots
    }

    /// Checks that the bindings can form a layout.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidState`] for duplicate binding numbers or empty bindings.
    pub fn validate(&self) -> RhiResult<()> {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.count == 0 {
                return Err(RhiError::InvalidState(format!(
                    "binding {} has no descriptors",
                    slot.binding
                )));
            }
            if self.slots[..i].iter().any(|s| s.binding == slot.binding) {
                return Err(RhiError::InvalidState(format!(
                    "binding {} declared twice",
                    slot.binding
                )));
            }
        }
        Ok(())
    }

    /// Creates the layout. The samplers move into the result.
    ///
    /// # Errors
    ///
    /// Returns an error if validation or layout creation fails. The samplers
    /// are dropped with the builder in that case.
    pub fn build(self, device: Arc<Device>) -> RhiResult<ImmutableSamplerLayout> {
        self.validate()?;

        let handles: Vec<vk::Sampler> = self.samplers.iter().map(Sampler::handle).collect();
        let bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> = self
            .slots
            .iter()
            .map(|slot| {
                let binding = vk::DescriptorSetLayoutBinding::default()
                    .binding(slot.binding)
                    .descriptor_type(slot.descriptor_type)
                    .descriptor_count(slot.count)
                    .stage_flags(slot.stages);
                match slot.immutable {
                    Some((start, count)) => {
                        binding.immutable_samplers(&handles[start..start + count])
                    }
                    None => binding,
                }
            })
            .collect();

        let layout = DescriptorSetLayout::new(device, &bindings)?;
        Ok(ImmutableSamplerLayout {
            layout,
            samplers: self.samplers,
        })
    }
}

/// Descriptor pool wrapper.
///
/// Sets allocated from the pool are freed when the pool is destroyed.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    /// Creates a new descriptor pool.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };
        device.ledger().track("descriptor pool");

        debug!(
            "Created descriptor pool (max {} sets, {} pool size(s))",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Allocates one set per layout.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool is exhausted or allocation fails.
    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        Ok(sets)
    }

    /// Allocates a single set.
    ///
    /// # Errors
    ///
    /// See [`DescriptorPool::allocate`].
    pub fn allocate_one(&self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        self.allocate(std::slice::from_ref(&layout))?
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::InvalidState("descriptor allocation returned no set".into()))
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        self.device.ledger().release("descriptor pool");
        debug!("Destroyed descriptor pool");
    }
}

/// Pool sizes for `sets` sets, each using the given `(type, count)` pairs.
pub fn pool_sizes_for(
    sets: u32,
    per_set: &[(vk::DescriptorType, u32)],
) -> Vec<vk::DescriptorPoolSize> {
    per_set
        .iter()
        .map(|&(ty, count)| {
            vk::DescriptorPoolSize::default()
                .ty(ty)
                .descriptor_count(count * sets)
        })
        .collect()
}

#[derive(Clone, Debug)]
struct ImageWrite {
    binding: u32,
    array_element: u32,
    descriptor_type: vk::DescriptorType,
    info: vk::DescriptorImageInfo,
}

/// Batches image descriptor writes for one set.
#[derive(Clone, Debug, Default)]
pub struct DescriptorWriter {
    images: Vec<ImageWrite>,
}

impl DescriptorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a sampled image (combined sampler; the sampler may be immutable).
    pub fn sampled_image(
        self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> Self {
        self.sampled_image_element(binding, 0, view, sampler, layout)
    }

    /// Writes one element of a combined image sampler array.
    pub fn sampled_image_element(
        self,
        binding: u32,
        array_element: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> Self {
        self.image(
            binding,
            array_element,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::DescriptorImageInfo::default()
                .sampler(sampler)
                .image_view(view)
                .image_layout(layout),
        )
    }

    /// Writes a storage image in the `GENERAL` layout.
    pub fn storage_image(self, binding: u32, view: vk::ImageView) -> Self {
        self.image(
            binding,
            0,
            vk::DescriptorType::STORAGE_IMAGE,
            vk::DescriptorImageInfo::default()
                .image_view(view)
                .image_layout(vk::ImageLayout::GENERAL),
        )
    }

    fn image(
        mut self,
        binding: u32,
        array_element: u32,
        descriptor_type: vk::DescriptorType,
        info: vk::DescriptorImageInfo,
    ) -> Self {
        self.images.push(ImageWrite {
            binding,
            array_element,
            descriptor_type,
            info,
        });
        self
    }

    /// Number of queued writes.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Applies the writes to `set`.
    pub fn update(&self, device: &Device, set: vk::DescriptorSet) {
        if self.images.is_empty() {
            return;
        }

        let writes: Vec<vk::WriteDescriptorSet<'_>> = self
            .images
            .iter()
            .map(|w| {
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(w.binding)
                    .dst_array_element(w.array_element)
                    .descriptor_type(w.descriptor_type)
                    .image_info(std::slice::from_ref(&w.info))
            })
            .collect();

        unsafe {
            device.handle().update_descriptor_sets(&writes, &[]);
        }

        debug!("Updated {} descriptor(s)", writes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_bindings_in_order() {
        let builder = DescriptorLayoutBuilder::new()
            .add_binding(
                0,
                vk::DescriptorType::STORAGE_IMAGE,
                vk::ShaderStageFlags::COMPUTE,
            )
            .add_array_binding(
                1,
                vk::DescriptorType::SAMPLED_IMAGE,
                4,
                vk::ShaderStageFlags::FRAGMENT,
            );

        let slots = builder.slots();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].binding, 0);
        assert_eq!(slots[0].count, 1);
        assert_eq!(slots[1].descriptor_type, vk::DescriptorType::SAMPLED_IMAGE);
        assert_eq!(slots[1].count, 4);
        assert!(builder.validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_duplicate_binding() {
        let builder = DescriptorLayoutBuilder::new()
            .add_binding(
                2,
                vk::DescriptorType::STORAGE_IMAGE,
                vk::ShaderStageFlags::COMPUTE,
            )
            .add_binding(
                2,
                vk::DescriptorType::SAMPLED_IMAGE,
                vk::ShaderStageFlags::COMPUTE,
            );
        assert!(matches!(builder.validate(), Err(RhiError::InvalidState(_))));
    }

    #[test]
    fn test_builder_rejects_empty_binding() {
        let builder = DescriptorLayoutBuilder::new().add_immutable_samplers(
            0,
            vk::ShaderStageFlags::COMPUTE,
            Vec::new(),
        );
        assert!(builder.validate().is_err());
    }

    #[test]
    fn test_pool_sizes_scale_with_sets() {
        let sizes = pool_sizes_for(
            3,
            &[
                (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 2),
                (vk::DescriptorType::STORAGE_IMAGE, 1),
            ],
        );
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].descriptor_count, 6);
        assert_eq!(sizes[1].ty, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(sizes[1].descriptor_count, 3);
    }

    #[test]
    fn test_writer_queues_writes() {
        let writer = DescriptorWriter::new()
            .storage_image(0, vk::ImageView::null())
            .sampled_image(
                1,
                vk::ImageView::null(),
                vk::Sampler::null(),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        assert_eq!(writer.len(), 2);
        assert_eq!(writer.images[0].info.image_layout, vk::ImageLayout::GENERAL);
        assert_eq!(
            writer.images[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
    }

    #[test]
    fn test_writer_array_elements() {
        let writer = (0..5).fold(DescriptorWriter::new(), |w, i| {
            w.sampled_image_element(
                0,
                i,
                vk::ImageView::null(),
                vk::Sampler::null(),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        });
        assert_eq!(writer.len(), 5);
        assert_eq!(writer.images[4].array_element, 4);
        assert_eq!(writer.images[4].binding, 0);
    }
}

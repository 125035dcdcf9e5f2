//! Pipeline layouts and compute dispatch sizing.
//!
//! With shader objects there is no pipeline object, but descriptor sets and
//! push constants are still bound against a [`PipelineLayout`]. The layout
//! must be created from the same set layouts and push constant ranges that
//! were given to the [`ShaderObject`](crate::shader::ShaderObject)s bound
//! with it.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan pipeline layout wrapper.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Creates a new pipeline layout.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `descriptor_set_layouts` - Slice of descriptor set layout handles
    /// * `push_constant_ranges` - Slice of push constant ranges
    ///
    /// # Errors
    ///
    /// Returns an error if pipeline layout creation fails.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use lantern_rhi::device::Device;
    /// use lantern_rhi::pipeline::{PipelineLayout, push_constant_range};
    /// use lantern_rhi::vk;
    ///
    /// # fn example(device: Arc<Device>) -> Result<(), lantern_rhi::RhiError> {
    /// let range = push_constant_range::<[f32; 16]>(vk::ShaderStageFlags::VERTEX);
    /// let layout = PipelineLayout::new(device, &[], &[range])?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(
        device: Arc<Device>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };
        device.ledger().track("pipeline layout");

        debug!(
            "Created pipeline layout with {} descriptor set layout(s) and {} push constant range(s)",
            descriptor_set_layouts.len(),
            push_constant_ranges.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        self.device.ledger().release("pipeline layout");
        debug!("Pipeline layout destroyed");
    }
}

/// A push constant range at offset 0 sized for `T`.
pub fn push_constant_range<T: bytemuck::Pod>(stages: vk::ShaderStageFlags) -> vk::PushConstantRange {
    vk::PushConstantRange {
        stage_flags: stages,
        offset: 0,
        size: std::mem::size_of::<T>() as u32,
    }
}

/// Workgroup counts covering `extent` with `local_size` invocations per
/// group. Partial groups are rounded up; shaders discard the invocations
/// that fall outside the image.
pub fn dispatch_size(extent: vk::Extent2D, local_size: [u32; 2]) -> [u32; 3] {
    [
        extent.width.div_ceil(local_size[0].max(1)),
        extent.height.div_ceil(local_size[1].max(1)),
        1,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_dispatch_size_exact_multiple() {
        assert_eq!(dispatch_size(extent(1920, 1088), [16, 16]), [120, 68, 1]);
    }

    #[test]
    fn test_dispatch_size_rounds_up() {
        assert_eq!(dispatch_size(extent(1921, 1080), [16, 16]), [121, 68, 1]);
        assert_eq!(dispatch_size(extent(1, 1), [16, 16]), [1, 1, 1]);
    }

    #[test]
    fn test_dispatch_size_empty_extent() {
        assert_eq!(dispatch_size(extent(0, 720), [16, 16]), [0, 45, 1]);
    }

    #[test]
    fn test_push_constant_range_size() {
        let range = push_constant_range::<[[f32; 4]; 4]>(vk::ShaderStageFlags::VERTEX);
        assert_eq!(range.offset, 0);
        assert_eq!(range.size, 64);
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_pipeline_layout_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PipelineLayout>();
    }
}

//! GPU images, views and layout tracking.
//!
//! An [`AllocatedImage`] owns its allocation and handle and records the layout
//! it will be in once previously recorded commands execute. That
//! `expected_layout` is the only source of truth: every transition of an owned
//! image goes through [`AllocatedImage::record_transition_barriered`], which
//! builds a synchronization2 barrier from the tracked layout and updates it
//! immediately.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lantern_rhi::vk;
//! use lantern_rhi::command::CommandBuffer;
//! use lantern_rhi::device::Device;
//! use lantern_rhi::image::{AllocatedImage, ImageDesc, ImageView};
//!
//! # fn example(device: Arc<Device>, cmd: &CommandBuffer) -> Result<(), lantern_rhi::RhiError> {
//! let image = AllocatedImage::new(
//!     device,
//!     &ImageDesc {
//!         name: "scene color",
//!         extent: vk::Extent2D { width: 1920, height: 1080 },
//!         format: vk::Format::R16G16B16A16_SFLOAT,
//!         usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
//!     },
//! )?;
//! let mut view = ImageView::new(image)?;
//!
//! view.image_mut()
//!     .record_transition_barriered(cmd, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error, warn};

use crate::command::CommandBuffer;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Parameters for [`AllocatedImage::new`].
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub name: &'static str,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}

/// Layout an image will be in after all recorded commands execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackedLayout {
    current: vk::ImageLayout,
}

impl TrackedLayout {
    /// Starts from `UNDEFINED`, as freshly created images do.
    pub fn new() -> Self {
        Self {
            current: vk::ImageLayout::UNDEFINED,
        }
    }

    #[inline]
    pub fn get(&self) -> vk::ImageLayout {
        self.current
    }

    /// Moves to `new` and returns the layout transitioned from.
    pub fn advance(&mut self, new: vk::ImageLayout) -> vk::ImageLayout {
        std::mem::replace(&mut self.current, new)
    }
}

impl Default for TrackedLayout {
    fn default() -> Self {
        Self::new()
    }
}

/// Stages and accesses that touch an image while it is in `layout`.
///
/// Used for both sides of a barrier: as the source it describes the work that
/// must finish, as the destination the work that must wait.
pub fn layout_masks(layout: vk::ImageLayout) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
    match layout {
        vk::ImageLayout::UNDEFINED => (vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL | vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_SAMPLED_READ,
        ),
        vk::ImageLayout::GENERAL => (
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
            vk::PipelineStageFlags2::ALL_TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
        ),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::PipelineStageFlags2::ALL_TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => {
            (vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE)
        }
        _ => (
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
        ),
    }
}

/// Aspect flags for a format.
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Full single-mip, single-layer range for `aspect`.
pub fn full_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Builds a layout transition barrier with masks derived from both layouts.
pub fn transition_barrier(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> vk::ImageMemoryBarrier2<'static> {
    let (src_stage, src_access) = layout_masks(old_layout);
    let (dst_stage, dst_access) = layout_masks(new_layout);
    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(src_stage)
        .src_access_mask(src_access)
        .dst_stage_mask(dst_stage)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(full_range(aspect))
}

/// Records a transition for an image this crate does not own, such as a
/// swapchain image. Owned images use
/// [`AllocatedImage::record_transition_barriered`].
pub fn record_external_transition(
    cmd: &CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let barrier = transition_barrier(image, vk::ImageAspectFlags::COLOR, old_layout, new_layout);
    let dependency =
        vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
    cmd.pipeline_barrier2(&dependency);
}

/// Two opposite corners of `rect`.
fn blit_offsets(rect: vk::Rect2D) -> [vk::Offset3D; 2] {
    [
        vk::Offset3D {
            x: rect.offset.x,
            y: rect.offset.y,
            z: 0,
        },
        vk::Offset3D {
            x: rect.offset.x + rect.extent.width as i32,
            y: rect.offset.y + rect.extent.height as i32,
            z: 1,
        },
    ]
}

fn origin_rect(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    }
}

/// Records a linear-filtered blit of the top-left `src_extent` of `src` onto
/// the top-left `dst_extent` of `dst`.
///
/// `src` must be in `TRANSFER_SRC_OPTIMAL` and `dst` in `TRANSFER_DST_OPTIMAL`.
pub fn record_blit(
    cmd: &CommandBuffer,
    src: vk::Image,
    src_extent: vk::Extent2D,
    dst: vk::Image,
    dst_extent: vk::Extent2D,
) {
    record_blit_region(cmd, src, origin_rect(src_extent), dst, origin_rect(dst_extent));
}

/// Like [`record_blit`], between arbitrary rectangles.
pub fn record_blit_region(
    cmd: &CommandBuffer,
    src: vk::Image,
    src_rect: vk::Rect2D,
    dst: vk::Image,
    dst_rect: vk::Rect2D,
) {
    let layers = vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1);
    let region = vk::ImageBlit2::default()
        .src_subresource(layers)
        .src_offsets(blit_offsets(src_rect))
        .dst_subresource(layers)
        .dst_offsets(blit_offsets(dst_rect));
    let blit = vk::BlitImageInfo2::default()
        .src_image(src)
        .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .dst_image(dst)
        .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .regions(std::slice::from_ref(&region))
        .filter(vk::Filter::LINEAR);
    cmd.blit_image2(&blit);
}

/// GPU-only 2D image with tracked layout.
pub struct AllocatedImage {
    device: Arc<Device>,
    image: vk::Image,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
    aspect: vk::ImageAspectFlags,
    layout: TrackedLayout,
    name: &'static str,
}

impl AllocatedImage {
    /// Creates a GPU-only image in the `UNDEFINED` layout.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The extent is zero
    /// - Image creation fails
    /// - Memory allocation fails
    pub fn new(device: Arc<Device>, desc: &ImageDesc) -> RhiResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "Image '{}' dimensions must be greater than 0",
                desc.name
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = {
            let allocated = device
                .allocator()
                .lock()
                .map_err(|_| RhiError::InvalidState("allocator mutex poisoned".to_string()))
                .and_then(|mut allocator| {
                    Ok(allocator.allocate(&AllocationCreateDesc {
                        name: desc.name,
                        requirements,
                        location: MemoryLocation::GpuOnly,
                        linear: false,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })?)
                });
            match allocated {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { device.handle().destroy_image(image, None) };
                    return Err(e);
                }
            }
        };

        if let Err(e) = unsafe {
            device
                .handle()
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            if let Ok(mut allocator) = device.allocator().lock() {
                let _ = allocator.free(allocation);
            }
            unsafe { device.handle().destroy_image(image, None) };
            return Err(e.into());
        }

        device.ledger().track("image");
        debug!(
            "Created image '{}': {}x{} ({:?})",
            desc.name, desc.extent.width, desc.extent.height, desc.format
        );

        Ok(Self {
            device,
            image,
            allocation: Some(allocation),
            format: desc.format,
            extent: desc.extent,
            aspect: aspect_for_format(desc.format),
            layout: TrackedLayout::new(),
            name: desc.name,
        })
    }

    /// Records a barrier from the tracked layout to `new_layout` and updates
    /// the tracked layout.
    ///
    /// A barrier is recorded even when the layout does not change, so that
    /// writes by one pass become visible to the next.
    pub fn record_transition_barriered(&mut self, cmd: &CommandBuffer, new_layout: vk::ImageLayout) {
        let old_layout = self.layout.advance(new_layout);
        let barrier = transition_barrier(self.image, self.aspect, old_layout, new_layout);
        let dependency =
            vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
        cmd.pipeline_barrier2(&dependency);
    }

    /// Layout the image will be in after all recorded commands execute.
    #[inline]
    pub fn expected_layout(&self) -> vk::ImageLayout {
        self.layout.get()
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for AllocatedImage {
    fn drop(&mut self) {
        match self.allocation.take() {
            Some(allocation) => match self.device.allocator().lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free image '{}' allocation: {:?}", self.name, e);
                    }
                }
                Err(_) => error!("Allocator poisoned, leaking image '{}' memory", self.name),
            },
            None => warn!("Image '{}' dropped without an allocation", self.name),
        }

        unsafe {
            self.device.handle().destroy_image(self.image, None);
        }
        self.device.ledger().release("image");
        debug!("Destroyed image '{}'", self.name);
    }
}

/// An image together with a view over its full range.
///
/// Field order makes the view drop before the image.
pub struct ImageView {
    view: vk::ImageView,
    image: AllocatedImage,
}

impl ImageView {
    /// Creates a 2D view over the whole image.
    ///
    /// # Errors
    ///
    /// Returns an error if view creation fails; the image is dropped with it.
    pub fn new(image: AllocatedImage) -> RhiResult<Self> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.handle())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(image.format())
            .subresource_range(full_range(image.aspect()));

        let view = unsafe { image.device().handle().create_image_view(&view_info, None)? };
        image.device().ledger().track("image view");

        Ok(Self { view, image })
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn image(&self) -> &AllocatedImage {
        &self.image
    }

    #[inline]
    pub fn image_mut(&mut self) -> &mut AllocatedImage {
        &mut self.image
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        let device = self.image.device();
        unsafe {
            device.handle().destroy_image_view(self.view, None);
        }
        device.ledger().release("image view");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracked_layout_updates_immediately() {
        let mut layout = TrackedLayout::new();
        assert_eq!(layout.get(), vk::ImageLayout::UNDEFINED);

        let old = layout.advance(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(old, vk::ImageLayout::UNDEFINED);
        assert_eq!(layout.get(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let old = layout.advance(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(old, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_transition_barrier_masks() {
        let barrier = transition_barrier(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(
            barrier.src_stage_mask,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
        );
        assert!(
            barrier
                .src_access_mask
                .contains(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
        );
        assert!(
            barrier
                .dst_stage_mask
                .contains(vk::PipelineStageFlags2::COMPUTE_SHADER)
        );
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::SHADER_SAMPLED_READ);
        assert_eq!(barrier.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_undefined_source_waits_on_nothing() {
        let (stage, access) = layout_masks(vk::ImageLayout::UNDEFINED);
        assert_eq!(stage, vk::PipelineStageFlags2::NONE);
        assert_eq!(access, vk::AccessFlags2::NONE);
    }

    #[test]
    fn test_general_layout_is_compute_storage() {
        let (stage, access) = layout_masks(vk::ImageLayout::GENERAL);
        assert_eq!(stage, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert!(access.contains(vk::AccessFlags2::SHADER_STORAGE_WRITE));
    }

    #[test]
    fn test_transfer_layouts() {
        assert_eq!(
            layout_masks(vk::ImageLayout::TRANSFER_SRC_OPTIMAL).1,
            vk::AccessFlags2::TRANSFER_READ
        );
        assert_eq!(
            layout_masks(vk::ImageLayout::TRANSFER_DST_OPTIMAL).1,
            vk::AccessFlags2::TRANSFER_WRITE
        );
    }

    #[test]
    fn test_aspect_for_format() {
        assert_eq!(
            aspect_for_format(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_for_format(vk::Format::R8G8B8A8_UNORM),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn test_blit_offsets_cover_extent() {
        let [start, end] = blit_offsets(origin_rect(vk::Extent2D {
            width: 800,
            height: 600,
        }));
        assert_eq!((start.x, start.y, start.z), (0, 0, 0));
        assert_eq!((end.x, end.y, end.z), (800, 600, 1));
    }

    #[test]
    fn test_blit_offsets_with_offset() {
        let [start, end] = blit_offsets(vk::Rect2D {
            offset: vk::Offset2D { x: 100, y: 50 },
            extent: vk::Extent2D {
                width: 640,
                height: 360,
            },
        });
        assert_eq!((start.x, start.y), (100, 50));
        assert_eq!((end.x, end.y), (740, 410));
    }
}

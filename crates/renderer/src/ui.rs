//! UI composite boundary.
//!
//! The renderer hands the finished scene to a [`UiLayer`], which renders
//! into a texture of its own and returns it for presentation. Widget
//! libraries plug in here; [`CompositeLayer`] is the built-in layer that
//! only places the scene as a viewport.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use lantern_rhi::RhiResult;
use lantern_rhi::command::CommandBuffer;
use lantern_rhi::device::Device;
use lantern_rhi::image::{self, full_range};

use crate::render_target::{RenderTarget, SceneTextureLayouts};

/// A layer that composites the scene with its own content.
pub trait UiLayer {
    /// Called once per frame before any recording, with the swapchain extent.
    fn begin_frame(&mut self, extent: vk::Extent2D);

    /// Records the layer's work and returns the texture to present, or
    /// `None` if nothing was produced.
    ///
    /// `scene` holds the post-processed scene color; the layer may
    /// transition it as needed.
    fn record(
        &mut self,
        cmd: &CommandBuffer,
        scene: &mut RenderTarget,
    ) -> Option<&mut RenderTarget>;
}

/// Largest rectangle with the aspect ratio of `content` that fits centered
/// in `frame`.
pub fn fit_viewport(frame: vk::Extent2D, content: vk::Extent2D) -> vk::Rect2D {
    if content.width == 0 || content.height == 0 || frame.width == 0 || frame.height == 0 {
        return vk::Rect2D::default();
    }

    let scale = f64::min(
        frame.width as f64 / content.width as f64,
        frame.height as f64 / content.height as f64,
    );
    let width = ((content.width as f64 * scale).round() as u32).clamp(1, frame.width);
    let height = ((content.height as f64 * scale).round() as u32).clamp(1, frame.height);

    vk::Rect2D {
        offset: vk::Offset2D {
            x: ((frame.width - width) / 2) as i32,
            y: ((frame.height - height) / 2) as i32,
        },
        extent: vk::Extent2D { width, height },
    }
}

/// Clears its output and blits the scene into the centered viewport.
pub struct CompositeLayer {
    output: RenderTarget,
    clear_color: [f32; 4],
}

impl CompositeLayer {
    /// Creates the output target at `capacity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the output target cannot be created.
    pub fn new(
        device: Arc<Device>,
        layouts: &SceneTextureLayouts,
        capacity: vk::Extent2D,
    ) -> RhiResult<Self> {
        Ok(Self {
            output: RenderTarget::new(device, layouts, "ui output", capacity)?,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        })
    }

    /// Color of the area around the scene viewport.
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    #[inline]
    pub fn output(&self) -> &RenderTarget {
        &self.output
    }
}

impl UiLayer for CompositeLayer {
    fn begin_frame(&mut self, extent: vk::Extent2D) {
        self.output.set_size(extent);
    }

    fn record(
        &mut self,
        cmd: &CommandBuffer,
        scene: &mut RenderTarget,
    ) -> Option<&mut RenderTarget> {
        let viewport = fit_viewport(self.output.size(), scene.size());

        scene
            .color_image_mut()
            .record_transition_barriered(cmd, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        let output = self.output.color_image_mut();
        output.record_transition_barriered(cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL);

        cmd.clear_color_image(
            output.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &vk::ClearColorValue {
                float32: self.clear_color,
            },
            full_range(vk::ImageAspectFlags::COLOR),
        );
        // Orders the blit after the clear.
        output.record_transition_barriered(cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL);

        if viewport.extent.width > 0 {
            image::record_blit_region(
                cmd,
                scene.color().image().handle(),
                vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent: scene.size(),
                },
                output.handle(),
                viewport,
            );
        }

        debug!(
            "Composited scene into {}x{} at ({}, {})",
            viewport.extent.width, viewport.extent.height, viewport.offset.x, viewport.offset.y
        );
        Some(&mut self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_fit_viewport_same_size_fills_frame() {
        let rect = fit_viewport(extent(1280, 720), extent(1280, 720));
        assert_eq!(rect.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(rect.extent, extent(1280, 720));
    }

    #[test]
    fn test_fit_viewport_letterboxes() {
        // 4:3 content in a 16:9 frame gets pillarboxed
        let rect = fit_viewport(extent(1600, 900), extent(800, 600));
        assert_eq!(rect.extent, extent(1200, 900));
        assert_eq!(rect.offset, vk::Offset2D { x: 200, y: 0 });
    }

    #[test]
    fn test_fit_viewport_empty() {
        assert_eq!(fit_viewport(extent(0, 0), extent(10, 10)).extent, extent(0, 0));
        assert_eq!(fit_viewport(extent(10, 10), extent(0, 10)).extent, extent(0, 0));
    }
}

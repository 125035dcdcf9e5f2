//! Dynamic rendering helpers (Vulkan 1.3).
//!
//! Attachments are described with [`ColorAttachment`] and
//! [`DepthAttachment`], collected in a [`RenderingConfig`], and turned into a
//! [`RenderingInfoBundle`] that keeps the attachment arrays alive for as long
//! as the `VkRenderingInfo` borrowing them.
//!
//! # Example
//!
//! ```no_run
//! use lantern_rhi::vk;
//! use lantern_rhi::rendering::{ColorAttachment, DepthAttachment, RenderingConfig};
//! use lantern_rhi::command::CommandBuffer;
//!
//! # fn example(albedo: vk::ImageView, normal: vk::ImageView, depth: vk::ImageView, cmd: &CommandBuffer) {
//! let bundle = RenderingConfig::new(vk::Extent2D { width: 1280, height: 720 })
//!     .with_color_attachments([albedo, normal].map(ColorAttachment::new))
//!     .with_depth_attachment(DepthAttachment::new(depth))
//!     .build();
//! cmd.begin_rendering(&bundle.info());
//! // ... draw commands ...
//! cmd.end_rendering();
//! # }
//! ```

use ash::vk;

/// A cleared-and-stored color attachment.
#[derive(Clone, Copy)]
pub struct ColorAttachment {
    pub image_view: vk::ImageView,
    pub load_op: vk::AttachmentLoadOp,
    pub clear_color: [f32; 4],
}

impl ColorAttachment {
    /// Clears to transparent black and stores.
    #[inline]
    pub fn new(image_view: vk::ImageView) -> Self {
        Self {
            image_view,
            load_op: vk::AttachmentLoadOp::CLEAR,
            clear_color: [0.0, 0.0, 0.0, 0.0],
        }
    }

    #[inline]
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self.load_op = vk::AttachmentLoadOp::CLEAR;
        self
    }

    /// Keeps the previous contents instead of clearing.
    #[inline]
    pub fn load(mut self) -> Self {
        self.load_op = vk::AttachmentLoadOp::LOAD;
        self
    }

    pub fn to_rendering_attachment_info(&self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.image_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(self.load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            })
    }
}

impl std::fmt::Debug for ColorAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorAttachment")
            .field("image_view", &self.image_view)
            .field("load_op", &self.load_op)
            .field("clear_color", &self.clear_color)
            .finish()
    }
}

/// A depth attachment in `DEPTH_ATTACHMENT_OPTIMAL`.
///
/// Defaults to clearing to 1.0 and storing, since later passes may sample
/// scene depth.
#[derive(Clone, Copy, Debug)]
pub struct DepthAttachment {
    pub image_view: vk::ImageView,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_depth: f32,
}

impl DepthAttachment {
    #[inline]
    pub fn new(image_view: vk::ImageView) -> Self {
        Self {
            image_view,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_depth: 1.0,
        }
    }

    #[inline]
    pub fn with_clear_depth(mut self, depth: f32) -> Self {
        self.clear_depth = depth;
        self
    }

    #[inline]
    pub fn dont_store(mut self) -> Self {
        self.store_op = vk::AttachmentStoreOp::DONT_CARE;
        self
    }

    pub fn to_rendering_attachment_info(&self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.image_view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.clear_depth,
                    stencil: 0,
                },
            })
    }
}

/// Attachments and render area for one `vkCmdBeginRendering`.
#[derive(Clone, Debug)]
pub struct RenderingConfig {
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_attachment: Option<DepthAttachment>,
    pub render_area: vk::Rect2D,
}

impl RenderingConfig {
    /// Renders into the top-left `extent` of the attachments.
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            color_attachments: Vec::new(),
            depth_attachment: None,
            render_area: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            },
        }
    }

    #[inline]
    pub fn with_color_attachment(mut self, attachment: ColorAttachment) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    #[inline]
    pub fn with_color_attachments(
        mut self,
        attachments: impl IntoIterator<Item = ColorAttachment>,
    ) -> Self {
        self.color_attachments.extend(attachments);
        self
    }

    #[inline]
    pub fn with_depth_attachment(mut self, attachment: DepthAttachment) -> Self {
        self.depth_attachment = Some(attachment);
        self
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.render_area.extent
    }

    pub fn build(&self) -> RenderingInfoBundle {
        RenderingInfoBundle::new(self)
    }
}

/// `VkRenderingInfo` together with the attachment infos it points at.
pub struct RenderingInfoBundle {
    color_attachments: Vec<vk::RenderingAttachmentInfo<'static>>,
    depth_attachment: Option<vk::RenderingAttachmentInfo<'static>>,
    render_area: vk::Rect2D,
}

impl RenderingInfoBundle {
    pub fn new(config: &RenderingConfig) -> Self {
        Self {
            color_attachments: config
                .color_attachments
                .iter()
                .map(ColorAttachment::to_rendering_attachment_info)
                .collect(),
            depth_attachment: config
                .depth_attachment
                .as_ref()
                .map(DepthAttachment::to_rendering_attachment_info),
            render_area: config.render_area,
        }
    }

    /// The returned info borrows this bundle.
    pub fn info(&self) -> vk::RenderingInfo<'_> {
        let mut info = vk::RenderingInfo::default()
            .render_area(self.render_area)
            .layer_count(1)
            .color_attachments(&self.color_attachments);

        if let Some(depth) = &self.depth_attachment {
            info = info.depth_attachment(depth);
        }

        info
    }

    #[inline]
    pub fn color_attachment_count(&self) -> u32 {
        self.color_attachments.len() as u32
    }

    #[inline]
    pub fn render_area(&self) -> vk::Rect2D {
        self.render_area
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_color_attachment_default() {
        let info = ColorAttachment::new(vk::ImageView::null()).to_rendering_attachment_info();
        assert_eq!(info.image_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(info.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(info.store_op, vk::AttachmentStoreOp::STORE);
        let clear = unsafe { info.clear_value.color.float32 };
        assert_eq!(clear, [0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_color_attachment_builder() {
        let attachment = ColorAttachment::new(vk::ImageView::null())
            .load()
            .with_clear_color([1.0, 0.0, 0.0, 1.0]);
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.clear_color, [1.0, 0.0, 0.0, 1.0]);

        let attachment = ColorAttachment::new(vk::ImageView::null()).load();
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::LOAD);
    }

    #[test]
    fn test_depth_attachment_default() {
        let attachment = DepthAttachment::new(vk::ImageView::null());
        let info = attachment.to_rendering_attachment_info();
        assert_eq!(info.image_layout, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
        assert_eq!(info.store_op, vk::AttachmentStoreOp::STORE);
        let clear = unsafe { info.clear_value.depth_stencil };
        assert_eq!(clear.depth, 1.0);

        let attachment = attachment.with_clear_depth(0.0).dont_store();
        assert_eq!(attachment.clear_depth, 0.0);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::DONT_CARE);
    }

    #[test]
    fn test_rendering_info_bundle() {
        let views = [vk::ImageView::null(); 5];
        let bundle = RenderingConfig::new(extent(1920, 1080))
            .with_color_attachments(views.map(ColorAttachment::new))
            .with_depth_attachment(DepthAttachment::new(vk::ImageView::null()))
            .build();

        assert_eq!(bundle.color_attachment_count(), 5);
        assert_eq!(bundle.render_area().extent, extent(1920, 1080));

        let info = bundle.info();
        assert_eq!(info.color_attachment_count, 5);
        assert_eq!(info.layer_count, 1);
        assert!(!info.p_depth_attachment.is_null());
    }

    #[test]
    fn test_rendering_info_without_depth() {
        let bundle = RenderingConfig::new(extent(800, 600))
            .with_color_attachment(ColorAttachment::new(vk::ImageView::null()))
            .build();
        assert!(bundle.info().p_depth_attachment.is_null());
    }
}

//! Deferred frame sequencing.
//!
//! One frame records, in order:
//!
//! 1. geometry into the GBuffer and scene depth
//! 2. compute lighting into the scene color
//! 3. sRGB encoding of the scene color, in place
//! 4. the UI layer, which produces the texture to present
//! 5. the blit into the swapchain image, done by [`FrameBuffer`]
//!
//! Every target owns its tracked layout, so each pass only states the layout
//! it needs and the barrier follows from the previous pass.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use glam::{Mat4, Vec3};
use tracing::{error, info};

use lantern_core::RenderConfig;
use lantern_rhi::device::Device;
use lantern_rhi::swapchain::Swapchain;
use lantern_rhi::{RhiError, RhiResult};
use lantern_scene::DirectionalLight;

use crate::frame_buffer::{FrameBuffer, PresentStatus};
use crate::gbuffer::GBuffer;
use crate::geometry_pass::{GeometryPass, MeshDraw};
use crate::lighting_pass::LightingPass;
use crate::post_process::PostProcessPass;
use crate::render_target::{RenderTarget, SceneTextureLayouts};
use crate::ui::UiLayer;

/// Everything a frame needs from the application.
pub struct FrameInputs<'a> {
    pub view_proj: Mat4,
    pub camera_position: Vec3,
    pub light: DirectionalLight,
    pub draws: &'a [MeshDraw<'a>],
}

/// `max_extent` from the configuration as an extent.
pub fn capacity_from_config(render: &RenderConfig) -> vk::Extent2D {
    vk::Extent2D {
        width: render.max_extent[0],
        height: render.max_extent[1],
    }
}

/// Passes and the persistent targets they share.
pub struct DeferredRenderer {
    geometry: GeometryPass,
    lighting: LightingPass,
    post_process: PostProcessPass,
    scene: RenderTarget,
    gbuffer: GBuffer,
    layouts: SceneTextureLayouts,
}

impl DeferredRenderer {
    /// Creates the targets at the configured capacity and loads every pass
    /// from `shader_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if a target cannot be allocated or a shader cannot
    /// be loaded.
    pub fn new(device: Arc<Device>, render: &RenderConfig, shader_dir: &Path) -> RhiResult<Self> {
        let capacity = capacity_from_config(render);

        let layouts = SceneTextureLayouts::new(device.clone())?;
        let gbuffer = GBuffer::new(device.clone(), capacity)?;
        let scene = RenderTarget::new(device.clone(), &layouts, "scene", capacity)?;

        let geometry = GeometryPass::new(device.clone(), shader_dir)?;
        let lighting = LightingPass::new(device.clone(), shader_dir, &gbuffer, &layouts)?;
        let post_process = PostProcessPass::new(device, shader_dir, &layouts)?;

        info!(
            "Deferred renderer ready ({}x{} capacity, shaders from {:?})",
            capacity.width, capacity.height, shader_dir
        );

        Ok(Self {
            geometry,
            lighting,
            post_process,
            scene,
            gbuffer,
            layouts,
        })
    }

    /// Records and presents one frame.
    ///
    /// Out-of-date swapchains are reported through [`PresentStatus`]; the
    /// caller rebuilds and carries on.
    ///
    /// # Errors
    ///
    /// Any failure is fatal for the frame loop: wait timeouts, Vulkan
    /// errors, or a UI layer that produced no output.
    pub fn draw_frame(
        &mut self,
        frames: &mut FrameBuffer,
        swapchain: &Swapchain,
        ui: &mut dyn UiLayer,
        inputs: &FrameInputs<'_>,
    ) -> RhiResult<PresentStatus> {
        let extent = swapchain.extent();
        self.scene.set_size(extent);
        ui.begin_frame(extent);

        let cmd = frames.begin_new_frame()?;

        self.geometry.record(
            cmd,
            &mut self.gbuffer,
            &mut self.scene,
            inputs.view_proj,
            inputs.draws,
        )?;
        self.lighting.record(
            cmd,
            &mut self.gbuffer,
            &mut self.scene,
            &inputs.light,
            inputs.camera_position,
        )?;
        self.post_process.record(cmd, &mut self.scene)?;

        let Some(output) = ui.record(cmd, &mut self.scene) else {
            error!("UI layer produced no output texture");
            return Err(RhiError::InvalidState(
                "UI layer produced no output".to_string(),
            ));
        };

        let output_size = output.size();
        frames.finish_frame_with_present(swapchain, output.color_image_mut(), output_size)
    }

    /// Layouts shared with any other [`RenderTarget`], such as a UI layer's.
    #[inline]
    pub fn layouts(&self) -> &SceneTextureLayouts {
        &self.layouts
    }

    #[inline]
    pub fn scene(&self) -> &RenderTarget {
        &self.scene
    }

    #[inline]
    pub fn gbuffer(&self) -> &GBuffer {
        &self.gbuffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_from_config() {
        let render = RenderConfig {
            max_extent: [1920, 1080],
            ..Default::default()
        };
        assert_eq!(
            capacity_from_config(&render),
            vk::Extent2D {
                width: 1920,
                height: 1080
            }
        );
    }
}

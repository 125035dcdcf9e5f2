//! Nonlinear output encoding.
//!
//! Applies the sRGB transfer function to the scene color in place. The
//! swapchain uses a UNORM format, so this is the only place the encoding
//! happens.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use lantern_rhi::RhiResult;
use lantern_rhi::command::CommandBuffer;
use lantern_rhi::device::Device;
use lantern_rhi::pipeline::{PipelineLayout, dispatch_size, push_constant_range};
use lantern_rhi::shader::{ShaderObject, ShaderStage, ShaderStageSet, StageBindings};

use crate::push_constants::PostProcessPush;
use crate::render_target::{RenderTarget, SceneTextureLayouts};

/// Workgroup size declared in `post_process.comp`.
pub const POST_PROCESS_LOCAL_SIZE: [u32; 2] = [16, 16];

/// CPU reference of the encoding the shader performs.
pub fn linear_to_srgb(c: f32) -> f32 {
    let c = c.clamp(0.0, 1.0);
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

pub struct PostProcessPass {
    stages: ShaderStageSet,
    bindings: StageBindings,
    _shader: ShaderObject,
    layout: PipelineLayout,
}

impl PostProcessPass {
    /// Loads `post_process.comp.spv` from `shader_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the shader cannot be loaded or the layout cannot
    /// be created.
    pub fn new(
        device: Arc<Device>,
        shader_dir: &Path,
        layouts: &SceneTextureLayouts,
    ) -> RhiResult<Self> {
        let set_layouts = [layouts.storage()];
        let push = push_constant_range::<PostProcessPush>(vk::ShaderStageFlags::COMPUTE);
        let layout = PipelineLayout::new(device.clone(), &set_layouts, &[push])?;

        let shader = ShaderObject::from_spirv_file(
            device,
            ShaderStage::Compute,
            &shader_dir.join("post_process.comp.spv"),
            &set_layouts,
            &[push],
        )?;
        let stages = ShaderStageSet::new().with(&shader);

        info!("Created post-process pass");

        Ok(Self {
            stages,
            bindings: StageBindings::Unbound,
            _shader: shader,
            layout,
        })
    }

    /// Encodes `scene`'s color in place. Leaves it in `GENERAL`.
    ///
    /// # Errors
    ///
    /// [`lantern_rhi::RhiError::InvalidState`] if the stage bind state is
    /// inconsistent.
    pub fn record(&mut self, cmd: &CommandBuffer, scene: &mut RenderTarget) -> RhiResult<()> {
        let extent = scene.size();

        // GENERAL -> GENERAL still orders this dispatch after the lighting writes.
        scene
            .color_image_mut()
            .record_transition_barriered(cmd, vk::ImageLayout::GENERAL);

        self.bindings.bind(cmd, &self.stages)?;
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::COMPUTE,
            self.layout.handle(),
            0,
            &[scene.storage_set()],
        );
        cmd.push_constants(
            self.layout.handle(),
            vk::ShaderStageFlags::COMPUTE,
            &PostProcessPush::new([extent.width, extent.height]),
        );

        let [x, y, z] = dispatch_size(extent, POST_PROCESS_LOCAL_SIZE);
        cmd.dispatch(x, y, z);
        self.bindings.unbind(cmd, &self.stages)?;

        debug!("Recorded post-process pass");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_to_srgb_endpoints() {
        assert_eq!(linear_to_srgb(0.0), 0.0);
        assert!((linear_to_srgb(1.0) - 1.0).abs() < 1e-6);
        assert_eq!(linear_to_srgb(-1.0), 0.0);
        assert!((linear_to_srgb(4.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_linear_to_srgb_midtones() {
        // Mid grey brightens to roughly 0.735
        assert!((linear_to_srgb(0.5) - 0.7354).abs() < 1e-3);
        // Linear segment
        assert!((linear_to_srgb(0.002) - 0.02584).abs() < 1e-5);
    }
}

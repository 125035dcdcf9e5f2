//! Deferred lighting.
//!
//! A compute shader reads the GBuffer (set 0) and writes lit color into the
//! scene render target's storage image (set 1).

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use glam::Vec3;
use tracing::{debug, info};

use lantern_rhi::RhiResult;
use lantern_rhi::command::CommandBuffer;
use lantern_rhi::device::Device;
use lantern_rhi::pipeline::{PipelineLayout, dispatch_size, push_constant_range};
use lantern_rhi::shader::{ShaderObject, ShaderStage, ShaderStageSet, StageBindings};
use lantern_scene::DirectionalLight;

use crate::gbuffer::GBuffer;
use crate::push_constants::LightingPush;
use crate::render_target::{RenderTarget, SceneTextureLayouts};

/// Workgroup size declared in `lighting.comp`.
pub const LIGHTING_LOCAL_SIZE: [u32; 2] = [16, 16];

pub struct LightingPass {
    stages: ShaderStageSet,
    bindings: StageBindings,
    _shader: ShaderObject,
    layout: PipelineLayout,
}

impl LightingPass {
    /// Loads `lighting.comp.spv` from `shader_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the shader cannot be loaded or the layout cannot
    /// be created.
    pub fn new(
        device: Arc<Device>,
        shader_dir: &Path,
        gbuffer: &GBuffer,
        layouts: &SceneTextureLayouts,
    ) -> RhiResult<Self> {
        let set_layouts = [gbuffer.set_layout(), layouts.storage()];
        let push = push_constant_range::<LightingPush>(vk::ShaderStageFlags::COMPUTE);
        let layout = PipelineLayout::new(device.clone(), &set_layouts, &[push])?;

        let shader = ShaderObject::from_spirv_file(
            device,
            ShaderStage::Compute,
            &shader_dir.join("lighting.comp.spv"),
            &set_layouts,
            &[push],
        )?;
        let stages = ShaderStageSet::new().with(&shader);

        info!("Created lighting pass");

        Ok(Self {
            stages,
            bindings: StageBindings::Unbound,
            _shader: shader,
            layout,
        })
    }

    /// Records the lighting dispatch over `scene.size()`.
    ///
    /// Leaves the GBuffer in `SHADER_READ_ONLY_OPTIMAL` and the scene color
    /// in `GENERAL`.
    ///
    /// # Errors
    ///
    /// [`lantern_rhi::RhiError::InvalidState`] if the stage bind state is
    /// inconsistent.
    pub fn record(
        &mut self,
        cmd: &CommandBuffer,
        gbuffer: &mut GBuffer,
        scene: &mut RenderTarget,
        light: &DirectionalLight,
        camera_position: Vec3,
    ) -> RhiResult<()> {
        let extent = scene.size();

        gbuffer.record_to_sampled(cmd);
        scene
            .color_image_mut()
            .record_transition_barriered(cmd, vk::ImageLayout::GENERAL);

        self.bindings.bind(cmd, &self.stages)?;
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::COMPUTE,
            self.layout.handle(),
            0,
            &[gbuffer.set(), scene.storage_set()],
        );
        let push = LightingPush::new(light, camera_position, [extent.width, extent.height]);
        cmd.push_constants(self.layout.handle(), vk::ShaderStageFlags::COMPUTE, &push);

        let [x, y, z] = dispatch_size(extent, LIGHTING_LOCAL_SIZE);
        cmd.dispatch(x, y, z);
        self.bindings.unbind(cmd, &self.stages)?;

        debug!("Recorded lighting pass: {}x{} groups", x, y);
        Ok(())
    }
}

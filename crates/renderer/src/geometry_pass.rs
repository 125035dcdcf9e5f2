//! GBuffer fill pass.
//!
//! Draws every mesh into the five GBuffer targets and the scene depth with
//! dynamic rendering and unlinked vertex/fragment shader objects.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use glam::Mat4;
use tracing::{debug, info};

use lantern_rhi::RhiResult;
use lantern_rhi::command::CommandBuffer;
use lantern_rhi::device::Device;
use lantern_rhi::pipeline::{PipelineLayout, push_constant_range};
use lantern_rhi::rendering::{DepthAttachment, RenderingConfig};
use lantern_rhi::shader::{GraphicsState, ShaderObject, ShaderStage, ShaderStageSet, StageBindings};

use crate::gbuffer::{GBUFFER_TARGET_COUNT, GBuffer};
use crate::mesh::GpuMesh;
use crate::push_constants::GeometryPush;
use crate::render_target::RenderTarget;

/// One mesh instance to draw.
#[derive(Clone, Copy)]
pub struct MeshDraw<'a> {
    pub mesh: &'a GpuMesh,
    pub model: Mat4,
}

pub struct GeometryPass {
    stages: ShaderStageSet,
    bindings: StageBindings,
    _vertex: ShaderObject,
    _fragment: ShaderObject,
    layout: PipelineLayout,
}

impl GeometryPass {
    /// Loads `gbuffer.vert.spv` and `gbuffer.frag.spv` from `shader_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if a shader file is missing or invalid, or the
    /// layout cannot be created.
    pub fn new(device: Arc<Device>, shader_dir: &Path) -> RhiResult<Self> {
        let push = push_constant_range::<GeometryPush>(vk::ShaderStageFlags::VERTEX);
        let layout = PipelineLayout::new(device.clone(), &[], &[push])?;

        let vertex = ShaderObject::from_spirv_file(
            device.clone(),
            ShaderStage::Vertex,
            &shader_dir.join("gbuffer.vert.spv"),
            &[],
            &[push],
        )?;
        let fragment = ShaderObject::from_spirv_file(
            device,
            ShaderStage::Fragment,
            &shader_dir.join("gbuffer.frag.spv"),
            &[],
            &[push],
        )?;
        let stages = ShaderStageSet::new().with(&vertex).with(&fragment);

        info!("Created geometry pass");

        Ok(Self {
            stages,
            bindings: StageBindings::Unbound,
            _vertex: vertex,
            _fragment: fragment,
            layout,
        })
    }

    /// Records the pass over the top-left `extent` of the targets.
    ///
    /// Leaves the GBuffer targets in `COLOR_ATTACHMENT_OPTIMAL` and the scene
    /// depth in `DEPTH_ATTACHMENT_OPTIMAL`.
    ///
    /// # Errors
    ///
    /// [`lantern_rhi::RhiError::InvalidState`] if the shader stages are
    /// still bound from an earlier failed recording.
    pub fn record(
        &mut self,
        cmd: &CommandBuffer,
        gbuffer: &mut GBuffer,
        scene: &mut RenderTarget,
        view_proj: Mat4,
        draws: &[MeshDraw<'_>],
    ) -> RhiResult<()> {
        let extent = scene.size();

        gbuffer.record_to_attachments(cmd);
        scene
            .depth_image_mut()
            .record_transition_barriered(cmd, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);

        let rendering = RenderingConfig::new(extent)
            .with_color_attachments(gbuffer.color_attachments())
            .with_depth_attachment(DepthAttachment::new(scene.depth().view()))
            .build();

        cmd.begin_rendering(&rendering.info());
        GraphicsState {
            extent,
            color_attachment_count: GBUFFER_TARGET_COUNT as u32,
            depth_test: true,
            cull_mode: vk::CullModeFlags::BACK,
        }
        .record(cmd);

        self.bindings.bind(cmd, &self.stages)?;
        for draw in draws {
            let push = GeometryPush::new(view_proj, draw.model, draw.mesh.vertex_address());
            cmd.push_constants(self.layout.handle(), vk::ShaderStageFlags::VERTEX, &push);
            cmd.bind_index_buffer(draw.mesh.index_buffer(), 0, vk::IndexType::UINT32);
            cmd.draw_indexed(draw.mesh.index_count(), 1, 0, 0, 0);
        }
        self.bindings.unbind(cmd, &self.stages)?;
        cmd.end_rendering();

        debug!("Recorded geometry pass: {} draws", draws.len());
        Ok(())
    }
}

//! Shader objects (`VK_EXT_shader_object`).
//!
//! Stages are compiled into individually bindable [`ShaderObject`]s; no
//! pipeline object exists. A [`ShaderStageSet`] names which object is bound to
//! which stage, and [`StageBindings`] tracks bind/unbind pairs so that a pass
//! cannot unbind a different set than it bound.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use lantern_rhi::device::Device;
//! use lantern_rhi::shader::{ShaderObject, ShaderStage, ShaderStageSet};
//!
//! # fn example(device: Arc<Device>) -> Result<(), lantern_rhi::RhiError> {
//! let lighting = ShaderObject::from_spirv_file(
//!     device,
//!     ShaderStage::Compute,
//!     Path::new("shaders/spirv/lighting.comp.spv"),
//!     &[],
//!     &[],
//! )?;
//! let stages = ShaderStageSet::new().with(&lighting);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::command::CommandBuffer;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Shader stage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShaderStage {
    /// Vertex shader stage - processes each vertex
    Vertex,
    /// Fragment (pixel) shader stage - processes each fragment
    Fragment,
    /// Compute shader stage - general-purpose GPU computation
    Compute,
}

impl ShaderStage {
    /// Converts the shader stage to Vulkan shader stage flags.
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    /// Stages that may follow this one.
    pub fn next_stages(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Fragment | ShaderStage::Compute => vk::ShaderStageFlags::empty(),
        }
    }

    /// Returns a human-readable name for the shader stage.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Decodes SPIR-V bytes into words.
///
/// # Errors
///
/// Returns [`RhiError::ShaderError`] if the length is not a multiple of 4.
pub fn spirv_words(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    ash::util::read_spv(&mut std::io::Cursor::new(bytes))
        .map_err(|e| RhiError::ShaderError(format!("Invalid SPIR-V: {}", e)))
}

/// Reads a SPIR-V file.
///
/// # Errors
///
/// Returns [`RhiError::ShaderError`] if the file cannot be read or decoded.
pub fn load_spirv(path: &Path) -> RhiResult<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|e| {
        RhiError::ShaderError(format!("Failed to read shader file {:?}: {}", path, e))
    })?;
    spirv_words(&bytes).map_err(|e| RhiError::ShaderError(format!("{:?}: {}", path, e)))
}

/// A compiled, unlinked shader object for one stage.
pub struct ShaderObject {
    device: Arc<Device>,
    shader: vk::ShaderEXT,
    stage: ShaderStage,
}

impl ShaderObject {
    /// Creates a shader object from SPIR-V words. The entry point is `main`.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `stage` - Stage the code is for
    /// * `code` - SPIR-V words
    /// * `set_layouts` - Descriptor set layouts, matching the pipeline layout used at bind time
    /// * `push_constant_ranges` - Push constant ranges, matching the same layout
    ///
    /// # Errors
    ///
    /// Returns an error if shader creation fails.
    pub fn new(
        device: Arc<Device>,
        stage: ShaderStage,
        code: &[u32],
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::ShaderCreateInfoEXT::default()
            .stage(stage.to_vk_stage())
            .next_stage(stage.next_stages())
            .code_type(vk::ShaderCodeTypeEXT::SPIRV)
            .code(bytemuck::cast_slice(code))
            .name(c"main")
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let shaders = unsafe {
            device
                .shader_object()
                .create_shaders(std::slice::from_ref(&create_info), None)
        }
        .map_err(|(partial, e)| {
            for shader in partial {
                if shader != vk::ShaderEXT::null() {
                    unsafe { device.shader_object().destroy_shader(shader, None) };
                }
            }
            RhiError::ShaderError(format!("Failed to create {} shader object: {}", stage, e))
        })?;

        let shader = shaders.into_iter().next().ok_or_else(|| {
            RhiError::ShaderError(format!("No {} shader object was returned", stage))
        })?;
        device.ledger().track("shader object");

        info!("Created {} shader object", stage);

        Ok(Self {
            device,
            shader,
            stage,
        })
    }

    /// Loads and creates a shader object from a SPIR-V file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the shader cannot be created.
    pub fn from_spirv_file(
        device: Arc<Device>,
        stage: ShaderStage,
        path: &Path,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        debug!("Loading {} shader from {:?}", stage, path);
        let code = load_spirv(path)?;
        Self::new(device, stage, &code, set_layouts, push_constant_ranges)
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderEXT {
        self.shader
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }
}

impl Drop for ShaderObject {
    fn drop(&mut self) {
        unsafe {
            self.device
                .shader_object()
                .destroy_shader(self.shader, None);
        }
        self.device.ledger().release("shader object");
        debug!("Destroyed {} shader object", self.stage);
    }
}

/// Which shader object is bound to which stage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderStageSet {
    stages: BTreeMap<ShaderStage, vk::ShaderEXT>,
}

impl ShaderStageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `shader` under its own stage, replacing any previous entry.
    pub fn with(self, shader: &ShaderObject) -> Self {
        self.with_handle(shader.stage(), shader.handle())
    }

    /// Adds a raw handle for `stage`.
    pub fn with_handle(mut self, stage: ShaderStage, shader: vk::ShaderEXT) -> Self {
        self.stages.insert(stage, shader);
        self
    }

    /// Union of every stage in the set.
    pub fn stage_flags(&self) -> vk::ShaderStageFlags {
        self.stages
            .keys()
            .fold(vk::ShaderStageFlags::empty(), |acc, s| acc | s.to_vk_stage())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn record(&self, cmd: &CommandBuffer, unbind: bool) {
        let stages: Vec<vk::ShaderStageFlags> =
            self.stages.keys().map(|s| s.to_vk_stage()).collect();
        let shaders: Vec<vk::ShaderEXT> = if unbind {
            vec![vk::ShaderEXT::null(); stages.len()]
        } else {
            self.stages.values().copied().collect()
        };
        unsafe {
            cmd.device()
                .shader_object()
                .cmd_bind_shaders(cmd.handle(), &stages, &shaders);
        }
    }
}

/// Bind state of a pass's shader stages.
///
/// `Unbound -> bind(S) -> Bound(S) -> unbind(S) -> Unbound`. Binding twice, or
/// unbinding a set other than the bound one, is rejected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum StageBindings {
    #[default]
    Unbound,
    Bound(ShaderStageSet),
}

impl StageBindings {
    /// Moves to `Bound(set)` without recording anything.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidState`] if already bound or `set` is empty.
    pub fn try_bind(&mut self, set: &ShaderStageSet) -> RhiResult<()> {
        if set.is_empty() {
            return Err(RhiError::InvalidState(
                "cannot bind an empty shader stage set".to_string(),
            ));
        }
        match self {
            StageBindings::Unbound => {
                *self = StageBindings::Bound(set.clone());
                Ok(())
            }
            StageBindings::Bound(bound) => Err(RhiError::InvalidState(format!(
                "shader stages {:?} are already bound",
                bound.stage_flags()
            ))),
        }
    }

    /// Moves back to `Unbound` without recording anything.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidState`] if nothing is bound or `set` differs from
    /// the bound set.
    pub fn try_unbind(&mut self, set: &ShaderStageSet) -> RhiResult<()> {
        match self {
            StageBindings::Bound(bound) if bound == set => {
                *self = StageBindings::Unbound;
                Ok(())
            }
            StageBindings::Bound(bound) => Err(RhiError::InvalidState(format!(
                "unbinding {:?} but {:?} is bound",
                set.stage_flags(),
                bound.stage_flags()
            ))),
            StageBindings::Unbound => Err(RhiError::InvalidState(
                "unbinding shader stages that are not bound".to_string(),
            )),
        }
    }

    /// Binds `set` on `cmd`.
    ///
    /// # Errors
    ///
    /// See [`StageBindings::try_bind`]. Nothing is recorded on error.
    pub fn bind(&mut self, cmd: &CommandBuffer, set: &ShaderStageSet) -> RhiResult<()> {
        self.try_bind(set)?;
        set.record(cmd, false);
        Ok(())
    }

    /// Unbinds `set` on `cmd` by binding null shaders to its stages.
    ///
    /// # Errors
    ///
    /// See [`StageBindings::try_unbind`]. Nothing is recorded on error.
    pub fn unbind(&mut self, cmd: &CommandBuffer, set: &ShaderStageSet) -> RhiResult<()> {
        self.try_unbind(set)?;
        set.record(cmd, true);
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, StageBindings::Bound(_))
    }
}

/// Rasterization settings recorded as dynamic state before a shader-object draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GraphicsState {
    pub extent: vk::Extent2D,
    pub color_attachment_count: u32,
    pub depth_test: bool,
    pub cull_mode: vk::CullModeFlags,
}

impl GraphicsState {
    /// Records every piece of state that shader objects leave dynamic.
    ///
    /// Vertex input is left empty: vertices are pulled from a buffer device
    /// address.
    pub fn record(&self, cmd: &CommandBuffer) {
        let device = cmd.device();
        let raw = device.handle();
        let ext = device.shader_object();
        let cb = cmd.handle();

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        cmd.set_viewport(&viewport);
        cmd.set_scissor(&vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: self.extent,
        });

        let attachments = self.color_attachment_count as usize;
        let blend_enables = vec![vk::FALSE; attachments];
        let write_masks = vec![vk::ColorComponentFlags::RGBA; attachments];

        unsafe {
            raw.cmd_set_rasterizer_discard_enable(cb, false);
            raw.cmd_set_primitive_topology(cb, vk::PrimitiveTopology::TRIANGLE_LIST);
            raw.cmd_set_primitive_restart_enable(cb, false);
            raw.cmd_set_cull_mode(cb, self.cull_mode);
            raw.cmd_set_front_face(cb, vk::FrontFace::COUNTER_CLOCKWISE);
            raw.cmd_set_depth_test_enable(cb, self.depth_test);
            raw.cmd_set_depth_write_enable(cb, self.depth_test);
            raw.cmd_set_depth_compare_op(cb, vk::CompareOp::LESS_OR_EQUAL);
            raw.cmd_set_depth_bounds_test_enable(cb, false);
            raw.cmd_set_depth_bias_enable(cb, false);
            raw.cmd_set_stencil_test_enable(cb, false);

            ext.cmd_set_vertex_input(cb, &[], &[]);
            ext.cmd_set_polygon_mode(cb, vk::PolygonMode::FILL);
            ext.cmd_set_rasterization_samples(cb, vk::SampleCountFlags::TYPE_1);
            ext.cmd_set_sample_mask(cb, vk::SampleCountFlags::TYPE_1, &[u32::MAX]);
            ext.cmd_set_alpha_to_coverage_enable(cb, false);
            if attachments > 0 {
                ext.cmd_set_color_blend_enable(cb, 0, &blend_enables);
                ext.cmd_set_color_write_mask(cb, 0, &write_masks);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    fn fake(n: u64) -> vk::ShaderEXT {
        vk::ShaderEXT::from_raw(n)
    }

    fn graphics_set() -> ShaderStageSet {
        ShaderStageSet::new()
            .with_handle(ShaderStage::Vertex, fake(1))
            .with_handle(ShaderStage::Fragment, fake(2))
    }

    #[test]
    fn test_shader_stage_to_vk_stage() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Compute.to_vk_stage(),
            vk::ShaderStageFlags::COMPUTE
        );
        assert_eq!(
            ShaderStage::Vertex.next_stages(),
            vk::ShaderStageFlags::FRAGMENT
        );
        assert!(ShaderStage::Compute.next_stages().is_empty());
    }

    #[test]
    fn test_shader_stage_display() {
        assert_eq!(format!("{}", ShaderStage::Vertex), "vertex");
        assert_eq!(format!("{}", ShaderStage::Compute), "compute");
    }

    #[test]
    fn test_stage_set_flags() {
        let set = graphics_set();
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.stage_flags(),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn test_stage_set_replaces_same_stage() {
        let set = ShaderStageSet::new()
            .with_handle(ShaderStage::Compute, fake(1))
            .with_handle(ShaderStage::Compute, fake(7));
        assert_eq!(set.len(), 1);
        assert_eq!(set, ShaderStageSet::new().with_handle(ShaderStage::Compute, fake(7)));
    }

    #[test]
    fn test_bind_unbind_cycle() {
        let set = graphics_set();
        let mut bindings = StageBindings::default();

        bindings.try_bind(&set).unwrap();
        assert!(bindings.is_bound());
        bindings.try_unbind(&set).unwrap();
        assert_eq!(bindings, StageBindings::Unbound);

        bindings.try_bind(&set).unwrap();
        assert!(bindings.is_bound());
    }

    #[test]
    fn test_double_bind_rejected() {
        let set = graphics_set();
        let mut bindings = StageBindings::default();
        bindings.try_bind(&set).unwrap();
        assert!(matches!(
            bindings.try_bind(&set),
            Err(RhiError::InvalidState(_))
        ));
    }

    #[test]
    fn test_unbind_of_different_set_rejected() {
        let set = graphics_set();
        let other = ShaderStageSet::new().with_handle(ShaderStage::Compute, fake(9));
        let mut bindings = StageBindings::default();
        bindings.try_bind(&set).unwrap();

        assert!(bindings.try_unbind(&other).is_err());
        assert!(bindings.is_bound());
    }

    #[test]
    fn test_unbind_when_unbound_rejected() {
        let mut bindings = StageBindings::default();
        assert!(bindings.try_unbind(&graphics_set()).is_err());
    }

    #[test]
    fn test_empty_set_cannot_bind() {
        let mut bindings = StageBindings::default();
        assert!(bindings.try_bind(&ShaderStageSet::new()).is_err());
    }

    #[test]
    fn test_spirv_words_rejects_misaligned() {
        assert!(matches!(
            spirv_words(&[0u8; 5]),
            Err(RhiError::ShaderError(_))
        ));
    }

    #[test]
    fn test_spirv_words_reads_magic() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0, 0, 1, 0];
        let words = spirv_words(&bytes).unwrap();
        assert_eq!(words[0], 0x0723_0203);
        assert_eq!(words.len(), 2);
    }
}

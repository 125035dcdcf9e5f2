//! Push constant blocks shared with the shaders.
//!
//! These structures must match the GLSL `push_constant` blocks exactly.
//! All structures use `#[repr(C)]` for predictable memory layout and implement
//! `Pod` and `Zeroable` for safe byte casting.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use lantern_scene::DirectionalLight;

/// Per-draw data for `gbuffer.vert`.
///
/// # Memory Layout
///
/// - Offset 0: view-projection matrix (64 bytes)
/// - Offset 64: model matrix rows 0..3 (48 bytes, affine part only)
/// - Offset 112: vertex buffer device address (8 bytes)
/// - Offset 120: padding (8 bytes)
/// - Total size: 128 bytes, the guaranteed minimum push constant size
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct GeometryPush {
    pub view_proj: Mat4,
    pub model_rows: [Vec4; 3],
    pub vertex_buffer: u64,
    pub _padding: u64,
}

impl GeometryPush {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Packs `model` as three rows; the last row of an affine matrix is
    /// always `(0, 0, 0, 1)`.
    pub fn new(view_proj: Mat4, model: Mat4, vertex_buffer: u64) -> Self {
        Self {
            view_proj,
            model_rows: [model.row(0), model.row(1), model.row(2)],
            vertex_buffer,
            _padding: 0,
        }
    }

    /// Rebuilds the full model matrix.
    pub fn model(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&[
            self.model_rows[0].to_array(),
            self.model_rows[1].to_array(),
            self.model_rows[2].to_array(),
            [0.0, 0.0, 0.0, 1.0],
        ])
        .transpose()
    }
}

/// Light and camera parameters for `lighting.comp`.
///
/// # Memory Layout
///
/// - Offset 0: direction towards the light, w = intensity (16 bytes)
/// - Offset 16: light color (16 bytes)
/// - Offset 32: camera world position (16 bytes)
/// - Offset 48: ambient color (16 bytes)
/// - Offset 64: output extent (8 bytes)
/// - Offset 72: padding (8 bytes)
/// - Total size: 80 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct LightingPush {
    pub to_light: Vec4,
    pub light_color: Vec4,
    pub camera_position: Vec4,
    pub ambient: Vec4,
    pub extent: [u32; 2],
    pub _padding: [u32; 2],
}

impl LightingPush {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(light: &DirectionalLight, camera_position: Vec3, extent: [u32; 2]) -> Self {
        Self {
            to_light: light.to_light().extend(light.intensity),
            light_color: light.color.extend(1.0),
            camera_position: camera_position.extend(1.0),
            ambient: light.ambient.extend(0.0),
            extent,
            _padding: [0; 2],
        }
    }
}

/// Extent for `post_process.comp`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PostProcessPush {
    pub extent: [u32; 2],
    pub _padding: [u32; 2],
}

impl PostProcessPush {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(extent: [u32; 2]) -> Self {
        Self {
            extent,
            _padding: [0; 2],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_push_size() {
        assert_eq!(GeometryPush::SIZE, 128);
        assert_eq!(std::mem::offset_of!(GeometryPush, vertex_buffer), 112);
    }

    #[test]
    fn test_geometry_push_alignment() {
        // Mat4 requires 16-byte alignment
        assert_eq!(std::mem::align_of::<GeometryPush>(), 16);
    }

    #[test]
    fn test_geometry_push_model_round_trip() {
        let model = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 1.0, 0.5),
            glam::Quat::from_rotation_y(0.7),
            Vec3::new(1.0, -2.0, 3.0),
        );
        let push = GeometryPush::new(Mat4::IDENTITY, model, 0xdead_beef);
        assert!(push.model().abs_diff_eq(model, 1e-6));
        assert_eq!(push.model_rows[0].w, 1.0);
        assert_eq!(push.vertex_buffer, 0xdead_beef);
    }

    #[test]
    fn test_lighting_push_layout() {
        assert_eq!(LightingPush::SIZE, 80);
        assert_eq!(std::mem::offset_of!(LightingPush, extent), 64);

        let light = DirectionalLight {
            direction: Vec3::NEG_Y,
            intensity: 2.5,
            ..Default::default()
        };
        let push = LightingPush::new(&light, Vec3::new(1.0, 2.0, 3.0), [640, 480]);
        assert_eq!(push.to_light, Vec4::new(0.0, 1.0, 0.0, 2.5));
        assert_eq!(push.camera_position.truncate(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(push.extent, [640, 480]);
    }

    #[test]
    fn test_push_pod_zeroable() {
        let push = PostProcessPush::new([1, 2]);
        let bytes: &[u8] = bytemuck::bytes_of(&push);
        assert_eq!(bytes.len(), PostProcessPush::SIZE);
        assert_eq!(PostProcessPush::SIZE, 16);
    }
}

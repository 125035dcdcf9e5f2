//! GPU-resident meshes.
//!
//! Vertices live in a storage buffer that the vertex shader reads through its
//! device address; there is no vertex input state.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use tracing::debug;

use lantern_resources::Mesh;
use lantern_rhi::buffer::AllocatedBuffer;
use lantern_rhi::device::Device;
use lantern_rhi::immediate::ImmediateSubmitQueue;
use lantern_rhi::staged_buffer::StagedBuffer;
use lantern_rhi::{RhiError, RhiResult, vk};

/// Vertex layout shared with `gbuffer.vert`. UVs are split across the two
/// padding slots so the struct packs into 32 bytes under std430.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuVertex {
    pub position: [f32; 3],
    pub uv_x: f32,
    pub normal: [f32; 3],
    pub uv_y: f32,
}

/// Interleaves a CPU mesh into [`GpuVertex`] records.
///
/// Missing normals or UVs read as +Y and zero.
pub fn interleave(mesh: &Mesh) -> Vec<GpuVertex> {
    mesh.positions
        .iter()
        .enumerate()
        .map(|(i, position)| {
            let normal = mesh.normals.get(i).copied().unwrap_or(glam::Vec3::Y);
            let [u, v] = mesh.tex_coords.get(i).copied().unwrap_or([0.0, 0.0]);
            GpuVertex {
                position: position.to_array(),
                uv_x: u,
                normal: normal.to_array(),
                uv_y: v,
            }
        })
        .collect()
}

/// Index and vertex buffers for one mesh.
pub struct GpuMesh {
    name: String,
    index_buffer: AllocatedBuffer,
    vertex_buffer: AllocatedBuffer,
    vertex_address: vk::DeviceAddress,
    index_count: u32,
}

impl GpuMesh {
    /// Uploads `mesh` through a pair of [`StagedBuffer`]s and blocks until the
    /// copy completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the mesh is empty, an allocation fails, or the
    /// submission does not complete.
    pub fn upload(
        device: Arc<Device>,
        queue: &mut ImmediateSubmitQueue,
        mesh: &Mesh,
    ) -> RhiResult<Self> {
        if mesh.positions.is_empty() || mesh.indices.is_empty() {
            return Err(RhiError::InvalidState(format!(
                "mesh '{}' has no geometry to upload",
                mesh.name
            )));
        }

        let vertices = interleave(mesh);
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&mesh.indices);

        let mut vertices_staged = StagedBuffer::new(
            device.clone(),
            vertex_bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            "mesh vertices",
        )?;
        let mut indices_staged = StagedBuffer::new(
            device,
            index_bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER,
            "mesh indices",
        )?;
        vertices_staged.overwrite_staged(vertex_bytes)?;
        indices_staged.overwrite_staged(index_bytes)?;

        queue
            .submit(|cmd| {
                vertices_staged.record_copy_to_device(cmd)?;
                indices_staged.record_copy_to_device(cmd)?;
                vertices_staged.record_total_copy_barrier(
                    cmd,
                    vk::PipelineStageFlags2::VERTEX_SHADER,
                    vk::AccessFlags2::SHADER_STORAGE_READ,
                );
                indices_staged.record_total_copy_barrier(
                    cmd,
                    vk::PipelineStageFlags2::INDEX_INPUT,
                    vk::AccessFlags2::INDEX_READ,
                );
                Ok(())
            })
            .into_result()?;

        // The copy has completed; the staging halves are no longer needed.
        let vertex_buffer = vertices_staged.into_device_buffer();
        let index_buffer = indices_staged.into_device_buffer();

        let vertex_address = vertex_buffer.device_address().ok_or_else(|| {
            RhiError::InvalidHandle(format!("vertex buffer of '{}' has no address", mesh.name))
        })?;

        debug!(
            "Uploaded mesh '{}' ({} vertices, {} indices)",
            mesh.name,
            vertices.len(),
            mesh.indices.len()
        );

        Ok(Self {
            name: mesh.name.clone(),
            index_buffer,
            vertex_buffer,
            vertex_address,
            index_count: mesh.indices.len() as u32,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.handle()
    }

    #[inline]
    pub fn vertex_buffer(&self) -> &AllocatedBuffer {
        &self.vertex_buffer
    }

    #[inline]
    pub fn vertex_address(&self) -> vk::DeviceAddress {
        self.vertex_address
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_vertex_is_32_bytes() {
        assert_eq!(std::mem::size_of::<GpuVertex>(), 32);
        assert_eq!(std::mem::offset_of!(GpuVertex, normal), 16);
    }

    #[test]
    fn test_interleave_cube() {
        let cube = Mesh::cube();
        let vertices = interleave(&cube);
        assert_eq!(vertices.len(), cube.positions.len());
        assert_eq!(vertices[0].position, cube.positions[0].to_array());
        assert_eq!(vertices[0].normal, cube.normals[0].to_array());
        assert_eq!([vertices[0].uv_x, vertices[0].uv_y], cube.tex_coords[0]);
    }

    #[test]
    fn test_interleave_fills_missing_attributes() {
        let mesh = Mesh {
            name: "bare".to_string(),
            positions: vec![glam::Vec3::ONE],
            ..Default::default()
        };
        let vertices = interleave(&mesh);
        assert_eq!(vertices[0].normal, [0.0, 1.0, 0.0]);
        assert_eq!(vertices[0].uv_x, 0.0);
    }
}

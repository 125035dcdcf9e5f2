//! Command pools and the command buffers recorded from them.
//!
//! Every frame slot and the immediate submission queue own one
//! [`CommandPool`] with a single [`CommandBuffer`]. Recording uses the
//! Vulkan 1.3 entry points only: dynamic rendering, `vkCmdPipelineBarrier2`
//! and `vkCmdBlitImage2`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lantern_rhi::device::Device;
//! use lantern_rhi::command::CommandPool;
//!
//! # fn example(device: Arc<Device>) -> Result<(), lantern_rhi::RhiError> {
//! let pool = CommandPool::new(device.clone(), device.graphics_family())?;
//! let cmd = pool.allocate_command_buffer()?;
//!
//! cmd.begin()?;
//! // ... record commands ...
//! cmd.end()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// A resettable command pool bound to one queue family.
///
/// Not thread-safe; each owner records from its own pool.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    family: u32,
}

impl CommandPool {
    /// Creates a pool whose buffers can be reset one at a time.
    ///
    /// # Errors
    ///
    /// Returns an error if `vkCreateCommandPool` fails.
    pub fn new(device: Arc<Device>, family: u32) -> RhiResult<Self> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.handle().create_command_pool(&info, None)? };
        device.ledger().track("command pool");
        debug!("Created command pool (family {})", family);

        Ok(Self {
            device,
            pool,
            family,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.family
    }

    /// Allocates one primary buffer. It is freed with the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn allocate_command_buffer(&self) -> RhiResult<CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let handle = unsafe { self.device.handle().allocate_command_buffers(&info)? }
            .pop()
            .ok_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY)?;
        Ok(CommandBuffer::from_handle(self.device.clone(), handle))
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_command_pool(self.pool, None) };
        self.device.ledger().release("command pool");
        debug!("Destroyed command pool (family {})", self.family);
    }
}

/// A primary command buffer. The handle belongs to its [`CommandPool`].
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    #[inline]
    pub fn from_handle(device: Arc<Device>, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    fn raw(&self) -> &ash::Device {
        self.device.handle()
    }

    /// This buffer as a `vkQueueSubmit2` entry.
    #[inline]
    pub fn submit_info(&self) -> vk::CommandBufferSubmitInfo<'static> {
        vk::CommandBufferSubmitInfo::default().command_buffer(self.buffer)
    }

    /// Starts a one-time-submit recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is not in the initial state.
    pub fn begin(&self) -> RhiResult<()> {
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.raw().begin_command_buffer(self.buffer, &info)? };
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the buffer is not recording.
    pub fn end(&self) -> RhiResult<()> {
        unsafe { self.raw().end_command_buffer(self.buffer)? };
        Ok(())
    }

    /// Returns the buffer to the initial state, from any state.
    ///
    /// # Errors
    ///
    /// Returns an error if `vkResetCommandBuffer` fails.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.raw()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?
        };
        Ok(())
    }

    pub fn begin_rendering(&self, info: &vk::RenderingInfo) {
        unsafe { self.raw().cmd_begin_rendering(self.buffer, info) };
    }

    pub fn end_rendering(&self) {
        unsafe { self.raw().cmd_end_rendering(self.buffer) };
    }

    pub fn bind_index_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, ty: vk::IndexType) {
        unsafe {
            self.raw()
                .cmd_bind_index_buffer(self.buffer, buffer, offset, ty)
        };
    }

    /// Binds `sets` starting at `first_set`, without dynamic offsets.
    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.raw()
                .cmd_bind_descriptor_sets(self.buffer, bind_point, layout, first_set, sets, &[])
        };
    }

    /// Pushes `data` at offset zero.
    pub fn push_constants<T: bytemuck::Pod>(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &T,
    ) {
        unsafe {
            self.raw()
                .cmd_push_constants(self.buffer, layout, stages, 0, bytemuck::bytes_of(data))
        };
    }

    /// Shader objects take viewports through the `WithCount` variant only.
    pub fn set_viewport(&self, viewport: &vk::Viewport) {
        unsafe {
            self.raw()
                .cmd_set_viewport_with_count(self.buffer, std::slice::from_ref(viewport))
        };
    }

    pub fn set_scissor(&self, scissor: &vk::Rect2D) {
        unsafe {
            self.raw()
                .cmd_set_scissor_with_count(self.buffer, std::slice::from_ref(scissor))
        };
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.raw().cmd_draw_indexed(
                self.buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    pub fn dispatch(&self, x: u32, y: u32, z: u32) {
        unsafe { self.raw().cmd_dispatch(self.buffer, x, y, z) };
    }

    pub fn pipeline_barrier2(&self, dependency: &vk::DependencyInfo) {
        unsafe { self.raw().cmd_pipeline_barrier2(self.buffer, dependency) };
    }

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe { self.raw().cmd_copy_buffer(self.buffer, src, dst, regions) };
    }

    pub fn blit_image2(&self, info: &vk::BlitImageInfo2) {
        unsafe { self.raw().cmd_blit_image2(self.buffer, info) };
    }

    /// Clears `image` outside a rendering scope. `layout` must be
    /// `GENERAL` or `TRANSFER_DST_OPTIMAL`.
    pub fn clear_color_image(
        &self,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: &vk::ClearColorValue,
        range: vk::ImageSubresourceRange,
    ) {
        unsafe {
            self.raw().cmd_clear_color_image(
                self.buffer,
                image,
                layout,
                color,
                std::slice::from_ref(&range),
            )
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}

    #[test]
    fn test_command_types_are_send() {
        assert_send::<CommandBuffer>();
        assert_send::<CommandPool>();
    }
}

//! GPU buffer management.
//!
//! [`AllocatedBuffer`] pairs a VkBuffer with its gpu-allocator allocation. It
//! is move-only: exactly one owner destroys it. Share it explicitly with
//! [`SharedBuffer`] when more than one holder needs it; the buffer then lives as
//! long as the longest holder.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lantern_rhi::device::Device;
//! use lantern_rhi::buffer::{AllocatedBuffer, BufferUsage};
//!
//! # fn example(device: Arc<Device>) -> Result<(), lantern_rhi::RhiError> {
//! let staging = AllocatedBuffer::for_usage(device, BufferUsage::Staging, 1024)?;
//! staging.write(0, &[0u8; 16])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// A buffer with more than one holder.
pub type SharedBuffer = Arc<AllocatedBuffer>;

/// Common buffer roles.
///
/// Maps a role to Vulkan usage flags and a memory location. Use
/// [`AllocatedBuffer::new`] directly for anything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Device-local index buffer, filled by a transfer.
    Index,
    /// Device-local vertex data read through a buffer device address.
    Vertex,
    /// Device-local storage buffer, filled by a transfer.
    Storage,
    /// Host-visible upload source.
    Staging,
    /// Host-visible transfer destination for reading results back.
    Readback,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                    | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Storage => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferUsage::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    /// Returns the memory location for this role.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Index | BufferUsage::Vertex | BufferUsage::Storage => {
                MemoryLocation::GpuOnly
            }
            BufferUsage::Staging => MemoryLocation::CpuToGpu,
            BufferUsage::Readback => MemoryLocation::GpuToCpu,
        }
    }

    /// Returns a human-readable name for the buffer role.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Index => "index",
            BufferUsage::Vertex => "vertex",
            BufferUsage::Storage => "storage",
            BufferUsage::Staging => "staging",
            BufferUsage::Readback => "readback",
        }
    }
}

/// GPU buffer wrapper with managed memory.
///
/// Not `Clone`. Dropping it frees the allocation and then destroys the handle.
pub struct AllocatedBuffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    name: &'static str,
}

impl AllocatedBuffer {
    /// Creates a new buffer.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `size` - Buffer size in bytes, non-zero
    /// * `usage` - Vulkan usage flags
    /// * `location` - Where the allocation lives
    /// * `name` - Debug name for logs and the allocator
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero, or if buffer or memory allocation fails.
    pub fn new(
        device: Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &'static str,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = match Self::allocate(&device, name, requirements, location) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            if let Ok(mut allocator) = device.allocator().lock() {
                let _ = allocator.free(allocation);
            }
            unsafe { device.handle().destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        device.ledger().track("buffer");
        debug!("Created {} buffer: {} bytes", name, size);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
            name,
        })
    }

    /// Creates a buffer for one of the common roles.
    ///
    /// # Errors
    ///
    /// See [`AllocatedBuffer::new`].
    pub fn for_usage(
        device: Arc<Device>,
        usage: BufferUsage,
        size: vk::DeviceSize,
    ) -> RhiResult<Self> {
        Self::new(
            device,
            size,
            usage.to_vk_usage(),
            usage.memory_location(),
            usage.name(),
        )
    }

    fn allocate(
        device: &Device,
        name: &'static str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
    ) -> RhiResult<Allocation> {
        let mut allocator = device
            .allocator()
            .lock()
            .map_err(|_| RhiError::InvalidState("allocator mutex poisoned".to_string()))?;
        Ok(allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?)
    }

    /// Writes bytes into a host-visible buffer.
    ///
    /// Non-coherent memory is flushed after the write.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The buffer memory is not mapped
    /// - The write would exceed the buffer size
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        self.copy_to_mapped(offset, data)?;
        self.flush(offset, data.len() as vk::DeviceSize)
    }

    /// Copies bytes into mapped memory without flushing.
    pub(crate) fn copy_to_mapped(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidHandle(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                self.size
            )));
        }

        let mapped = self.mapped_ptr()?;
        unsafe {
            let dst = mapped.add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    /// Copies `len` bytes out of a host-visible buffer.
    ///
    /// Non-coherent memory is invalidated before the read.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory is not mapped or the range is out of bounds.
    pub fn read(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<Vec<u8>> {
        let end = offset + len as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidHandle(format!(
                "Read exceeds buffer size: offset {} + len {} > buffer {}",
                offset, len, self.size
            )));
        }

        let mapped = self.mapped_ptr()?;
        if let Some(range) = self.non_coherent_range(offset, len as vk::DeviceSize) {
            unsafe {
                self.device
                    .handle()
                    .invalidate_mapped_memory_ranges(std::slice::from_ref(&range))?;
            }
        }

        let mut out = vec![0u8; len];
        unsafe {
            std::ptr::copy_nonoverlapping(mapped.add(offset as usize), out.as_mut_ptr(), len);
        }
        Ok(out)
    }

    /// Flushes a written range of non-coherent host memory. No-op for
    /// coherent memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> RhiResult<()> {
        if let Some(range) = self.non_coherent_range(offset, size) {
            unsafe {
                self.device
                    .handle()
                    .flush_mapped_memory_ranges(std::slice::from_ref(&range))?;
            }
        }
        Ok(())
    }

    /// Builds the atom-aligned mapped range, or `None` for coherent memory.
    fn non_coherent_range(
        &self,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Option<vk::MappedMemoryRange<'static>> {
        let allocation = self.allocation.as_ref()?;
        if allocation
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
            || size == 0
        {
            return None;
        }
        let (aligned_offset, aligned_size) = atom_aligned_range(
            allocation.offset() + offset,
            size,
            self.device.non_coherent_atom_size(),
        );
        Some(
            vk::MappedMemoryRange::default()
                .memory(unsafe { allocation.memory() })
                .offset(aligned_offset)
                .size(aligned_size),
        )
    }

    fn mapped_ptr(&self) -> RhiResult<*mut u8> {
        let allocation = self.allocation.as_ref().ok_or_else(|| {
            RhiError::InvalidHandle("Buffer allocation is not available".to_string())
        })?;
        let mapped = allocation
            .mapped_ptr()
            .ok_or_else(|| RhiError::InvalidHandle("Buffer memory is not mapped".to_string()))?;
        Ok(mapped.as_ptr().cast::<u8>())
    }

    /// Returns the buffer device address, or `None` when the buffer was not
    /// created with `SHADER_DEVICE_ADDRESS` usage.
    pub fn device_address(&self) -> Option<vk::DeviceAddress> {
        if !self
            .usage
            .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
        {
            return None;
        }
        let info = vk::BufferDeviceAddressInfo::default().buffer(self.buffer);
        Some(unsafe { self.device.handle().get_buffer_device_address(&info) })
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Returns the usage flags the buffer was created with.
    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Returns the debug name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Converts into a [`SharedBuffer`].
    #[inline]
    pub fn into_shared(self) -> SharedBuffer {
        Arc::new(self)
    }
}

impl Drop for AllocatedBuffer {
    fn drop(&mut self) {
        match self.allocation.take() {
            Some(allocation) => match self.device.allocator().lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free {} buffer allocation: {:?}", self.name, e);
                    }
                }
                Err(_) => error!("Allocator poisoned, leaking {} buffer memory", self.name),
            },
            None => warn!("{} buffer dropped without an allocation", self.name),
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }
        self.device.ledger().release("buffer");

        debug!("Destroyed {} buffer", self.name);
    }
}

/// Expands `[offset, offset + size)` to multiples of `atom`, as
/// `vkFlushMappedMemoryRanges` requires.
pub fn atom_aligned_range(
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    atom: vk::DeviceSize,
) -> (vk::DeviceSize, vk::DeviceSize) {
    let atom = atom.max(1);
    let start = offset - offset % atom;
    let end = (offset + size).div_ceil(atom) * atom;
    (start, end - start)
}

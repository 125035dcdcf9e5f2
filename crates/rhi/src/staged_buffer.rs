//! Host-to-device uploads with explicit dirty tracking.
//!
//! A [`StagedBuffer`] pairs a host-visible staging buffer with a device-local
//! buffer of the same capacity. Writes land in the staging buffer and mark it
//! dirty; nothing reaches the device buffer until
//! [`StagedBuffer::record_copy_to_device`] records the copy. Readers that must
//! see the copy insert [`StagedBuffer::record_total_copy_barrier`] themselves.
//!
//! ```text
//!   overwrite/push/pop          record_copy_to_device
//!  ------------------> [dirty] -----------------------> [clean]
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lantern_rhi::vk;
//! use lantern_rhi::command::CommandBuffer;
//! use lantern_rhi::device::Device;
//! use lantern_rhi::staged_buffer::StagedBuffer;
//!
//! # fn example(device: Arc<Device>, cmd: &CommandBuffer) -> Result<(), lantern_rhi::RhiError> {
//! let mut lights = StagedBuffer::new(
//!     device,
//!     4096,
//!     vk::BufferUsageFlags::STORAGE_BUFFER,
//!     "lights",
//! )?;
//!
//! lights.overwrite_staged(&[0u8; 64])?;
//! lights.record_copy_to_device(cmd)?;
//! lights.record_total_copy_barrier(
//!     cmd,
//!     vk::PipelineStageFlags2::COMPUTE_SHADER,
//!     vk::AccessFlags2::SHADER_STORAGE_READ,
//! );
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use tracing::{debug, warn};

use crate::buffer::AllocatedBuffer;
use crate::command::CommandBuffer;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Size bookkeeping for a staged buffer.
///
/// Capacity is fixed. Staging past it is rejected with
/// [`RhiError::StagingOverflow`] and leaves the ledger unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagingLedger {
    capacity: u64,
    staged_size: u64,
    device_size: u64,
    dirty: bool,
}

impl StagingLedger {
    /// Creates an empty, clean ledger.
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            staged_size: 0,
            device_size: 0,
            dirty: false,
        }
    }

    /// Replaces the staged contents with `len` bytes.
    pub fn overwrite(&mut self, len: u64) -> RhiResult<()> {
        self.check_fits(len)?;
        self.staged_size = len;
        self.dirty = true;
        Ok(())
    }

    /// Appends `len` bytes and returns the offset they go to.
    ///
    /// An empty push changes nothing and returns `None`.
    pub fn push(&mut self, len: u64) -> RhiResult<Option<u64>> {
        if len == 0 {
            return Ok(None);
        }
        let offset = self.staged_size;
        self.check_fits(offset.saturating_add(len))?;
        self.staged_size = offset + len;
        self.dirty = true;
        Ok(Some(offset))
    }

    /// Removes up to `count` bytes from the end, clamped at zero.
    pub fn pop(&mut self, count: u64) {
        let remaining = self.staged_size.saturating_sub(count);
        if remaining != self.staged_size {
            self.staged_size = remaining;
            self.dirty = true;
        }
    }

    /// Marks the staged range as copied and returns its size.
    pub fn mark_copied(&mut self) -> u64 {
        self.device_size = self.staged_size;
        self.dirty = false;
        self.device_size
    }

    /// Applies `change` to a copy of the ledger and hands its result to
    /// `write`. The ledger takes the new state only if both succeed.
    pub fn stage<T>(
        &mut self,
        change: impl FnOnce(&mut Self) -> RhiResult<T>,
        write: impl FnOnce(T) -> RhiResult<()>,
    ) -> RhiResult<()> {
        let mut next = *self;
        let staged = change(&mut next)?;
        write(staged)?;
        *self = next;
        Ok(())
    }

    fn check_fits(&self, requested: u64) -> RhiResult<()> {
        if requested > self.capacity {
            return Err(RhiError::StagingOverflow {
                requested,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn staged_size(&self) -> u64 {
        self.staged_size
    }

    #[inline]
    pub fn device_size(&self) -> u64 {
        self.device_size
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// A staging buffer and a device-local buffer of equal capacity.
pub struct StagedBuffer {
    staging: AllocatedBuffer,
    device_buffer: AllocatedBuffer,
    ledger: StagingLedger,
}

impl StagedBuffer {
    /// Creates the buffer pair.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `capacity` - Size of both buffers in bytes
    /// * `usage` - Usage of the device-local side; `TRANSFER_DST` is added
    /// * `name` - Debug name
    ///
    /// # Errors
    ///
    /// Returns an error if either allocation fails.
    pub fn new(
        device: Arc<Device>,
        capacity: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        name: &'static str,
    ) -> RhiResult<Self> {
        let staging = AllocatedBuffer::new(
            device.clone(),
            capacity,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            name,
        )?;
        let device_buffer = AllocatedBuffer::new(
            device,
            capacity,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            name,
        )?;

        debug!("Created staged buffer '{}' ({} bytes)", name, capacity);

        Ok(Self {
            staging,
            device_buffer,
            ledger: StagingLedger::new(capacity),
        })
    }

    /// Clears the staged contents and writes `bytes` from offset zero.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::StagingOverflow`] when `bytes` exceeds the capacity.
    pub fn overwrite_staged(&mut self, bytes: &[u8]) -> RhiResult<()> {
        let staging = &self.staging;
        self.ledger.stage(
            |ledger| ledger.overwrite(bytes.len() as u64),
            |()| staging.copy_to_mapped(0, bytes),
        )
    }

    /// Appends `bytes` after the current staged contents. Empty input is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::StagingOverflow`] when the result would exceed the capacity.
    pub fn push_staged(&mut self, bytes: &[u8]) -> RhiResult<()> {
        let staging = &self.staging;
        self.ledger.stage(
            |ledger| ledger.push(bytes.len() as u64),
            |offset| match offset {
                Some(offset) => staging.copy_to_mapped(offset, bytes),
                None => Ok(()),
            },
        )
    }

    /// Drops up to `count` bytes from the end of the staged contents.
    pub fn pop_staged(&mut self, count: u64) {
        self.ledger.pop(count);
    }

    /// Records a copy of the staged range into the device buffer and marks
    /// the buffer clean.
    ///
    /// No barrier is recorded; see [`StagedBuffer::record_total_copy_barrier`].
    ///
    /// # Errors
    ///
    /// Returns an error if flushing non-coherent staging memory fails.
    pub fn record_copy_to_device(&mut self, cmd: &CommandBuffer) -> RhiResult<()> {
        let size = self.ledger.staged_size();
        if size > 0 {
            self.staging.flush(0, size)?;
            let region = vk::BufferCopy::default().size(size);
            cmd.copy_buffer(
                self.staging.handle(),
                self.device_buffer.handle(),
                std::slice::from_ref(&region),
            );
        }
        self.ledger.mark_copied();
        Ok(())
    }

    /// Records a buffer memory barrier making the whole device buffer visible
    /// to `dst_stage` / `dst_access` after a copy.
    pub fn record_total_copy_barrier(
        &self,
        cmd: &CommandBuffer,
        dst_stage: vk::PipelineStageFlags2,
        dst_access: vk::AccessFlags2,
    ) {
        let barrier = vk::BufferMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::COPY)
            .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(self.device_buffer.handle())
            .offset(0)
            .size(vk::WHOLE_SIZE);
        let dependency =
            vk::DependencyInfo::default().buffer_memory_barriers(std::slice::from_ref(&barrier));
        cmd.pipeline_barrier2(&dependency);
    }

    /// The device-local buffer. Warns when staged data has not been copied yet.
    pub fn device_buffer(&self) -> &AllocatedBuffer {
        self.warn_if_dirty("device_buffer");
        &self.device_buffer
    }

    /// Device address of the device-local buffer, if it has one. Warns when
    /// staged data has not been copied yet.
    pub fn device_address(&self) -> Option<vk::DeviceAddress> {
        self.warn_if_dirty("device_address");
        self.device_buffer.device_address()
    }

    /// Gives up the staging side once the device copy has completed.
    pub fn into_device_buffer(self) -> AllocatedBuffer {
        self.warn_if_dirty("into_device_buffer");
        self.device_buffer
    }

    fn warn_if_dirty(&self, accessor: &str) {
        if self.ledger.is_dirty() {
            warn!(
                "{}() on staged buffer '{}' while dirty: device contents are stale",
                accessor,
                self.device_buffer.name()
            );
        }
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.ledger.is_dirty()
    }

    #[inline]
    pub fn staged_size(&self) -> u64 {
        self.ledger.staged_size()
    }

    #[inline]
    pub fn device_size(&self) -> u64 {
        self.ledger.device_size()
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.ledger.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ledger_is_clean_and_empty() {
        let ledger = StagingLedger::new(256);
        assert!(!ledger.is_dirty());
        assert_eq!(ledger.staged_size(), 0);
        assert_eq!(ledger.device_size(), 0);
    }

    #[test]
    fn test_overwrite_then_copy() {
        let mut ledger = StagingLedger::new(256);
        ledger.overwrite(100).unwrap();
        assert!(ledger.is_dirty());
        assert_eq!(ledger.staged_size(), 100);
        assert_eq!(ledger.device_size(), 0);

        assert_eq!(ledger.mark_copied(), 100);
        assert!(!ledger.is_dirty());
        assert_eq!(ledger.device_size(), 100);
    }

    #[test]
    fn test_push_returns_offsets() {
        let mut ledger = StagingLedger::new(256);
        assert_eq!(ledger.push(16).unwrap(), Some(0));
        assert_eq!(ledger.push(32).unwrap(), Some(16));
        assert_eq!(ledger.staged_size(), 48);
    }

    #[test]
    fn test_empty_push_and_zero_pop_are_no_ops() {
        let mut ledger = StagingLedger::new(256);
        ledger.overwrite(10).unwrap();
        ledger.mark_copied();

        assert_eq!(ledger.push(0).unwrap(), None);
        ledger.pop(0);
        assert_eq!(ledger.staged_size(), 10);
        assert!(!ledger.is_dirty());
    }

    #[test]
    fn test_pop_clamps_at_zero() {
        let mut ledger = StagingLedger::new(256);
        ledger.push(8).unwrap();
        ledger.pop(100);
        assert_eq!(ledger.staged_size(), 0);
        assert!(ledger.is_dirty());
    }

    #[test]
    fn test_pop_on_empty_leaves_clean_ledger_clean() {
        let mut ledger = StagingLedger::new(256);
        ledger.pop(4);
        assert!(!ledger.is_dirty());
    }

    #[test]
    fn test_overflow_is_rejected_without_side_effects() {
        let mut ledger = StagingLedger::new(64);
        ledger.push(60).unwrap();
        ledger.mark_copied();

        let err = ledger.push(8).unwrap_err();
        assert!(matches!(
            err,
            RhiError::StagingOverflow {
                requested: 68,
                capacity: 64
            }
        ));
        assert_eq!(ledger.staged_size(), 60);
        assert!(!ledger.is_dirty());

        assert!(ledger.overwrite(65).is_err());
        assert!(ledger.overwrite(64).is_ok());
    }

    #[test]
    fn test_failed_write_leaves_ledger_unchanged() {
        let mut ledger = StagingLedger::new(64);
        ledger.overwrite(16).unwrap();
        ledger.mark_copied();
        let before = ledger;

        let result = ledger.stage(
            |l| l.overwrite(32),
            |()| Err(RhiError::InvalidHandle("not mapped".to_string())),
        );
        assert!(matches!(result, Err(RhiError::InvalidHandle(_))));
        assert_eq!(ledger, before);

        let result = ledger.stage(
            |l| l.push(8),
            |_| Err(RhiError::InvalidHandle("not mapped".to_string())),
        );
        assert!(result.is_err());
        assert_eq!(ledger.staged_size(), 16);
        assert!(!ledger.is_dirty());
    }

    #[test]
    fn test_stage_commits_after_write() {
        let mut ledger = StagingLedger::new(64);
        ledger.push(8).unwrap();

        let mut written_at = None;
        ledger
            .stage(
                |l| l.push(4),
                |offset| {
                    written_at = offset;
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(written_at, Some(8));
        assert_eq!(ledger.staged_size(), 12);
    }

    #[test]
    fn test_stage_rejects_overflow_before_writing() {
        let mut ledger = StagingLedger::new(8);
        let mut wrote = false;
        let result = ledger.stage(
            |l| l.overwrite(9),
            |()| {
                wrote = true;
                Ok(())
            },
        );
        assert!(matches!(result, Err(RhiError::StagingOverflow { .. })));
        assert!(!wrote);
        assert_eq!(ledger.staged_size(), 0);
    }

    #[test]
    fn test_overwrite_with_empty_clears() {
        let mut ledger = StagingLedger::new(64);
        ledger.push(32).unwrap();
        ledger.mark_copied();
        ledger.overwrite(0).unwrap();
        assert_eq!(ledger.staged_size(), 0);
        assert!(ledger.is_dirty());
    }
}

//! Fences and binary semaphores.
//!
//! Every host wait takes an explicit bound. A fence still unsignaled when the
//! bound expires reports [`RhiError::Timeout`] naming what was waited on.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use lantern_rhi::device::Device;
//! use lantern_rhi::sync::{Semaphore, Fence};
//!
//! # fn example(device: Arc<Device>) -> Result<(), lantern_rhi::RhiError> {
//! let image_ready = Semaphore::new(device.clone())?;
//!
//! // Starts signaled so the first frame does not wait
//! let render_fence = Fence::new(device.clone(), true)?;
//!
//! render_fence.wait(Duration::from_secs(1), "render fence")?;
//! render_fence.reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Binary semaphore ordering one queue operation after another, such as
/// acquire before render or render before present.
pub struct Semaphore {
    device: Arc<Device>,
    handle: vk::Semaphore,
}

impl Semaphore {
    /// # Errors
    ///
    /// Returns an error if `vkCreateSemaphore` fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let handle = unsafe {
            device
                .handle()
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        device.ledger().track("semaphore");
        debug!("Created semaphore");
        Ok(Self { device, handle })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }

    /// A wait or signal entry for `vkQueueSubmit2` at `stage`.
    #[inline]
    pub fn submit_info(&self, stage: vk::PipelineStageFlags2) -> vk::SemaphoreSubmitInfo<'static> {
        vk::SemaphoreSubmitInfo::default()
            .semaphore(self.handle)
            .stage_mask(stage)
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_semaphore(self.handle, None) };
        self.device.ledger().release("semaphore");
        debug!("Destroyed semaphore");
    }
}

/// Fence the host waits on before reusing what a submission touched.
pub struct Fence {
    device: Arc<Device>,
    handle: vk::Fence,
}

impl Fence {
    /// Creates a fence, optionally already signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if `vkCreateFence` fails.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let mut flags = vk::FenceCreateFlags::empty();
        if signaled {
            flags |= vk::FenceCreateFlags::SIGNALED;
        }
        let handle = unsafe {
            device
                .handle()
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)?
        };
        device.ledger().track("fence");
        debug!("Created fence (signaled: {})", signaled);
        Ok(Self { device, handle })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    /// Blocks until the fence signals or `timeout` expires.
    ///
    /// # Errors
    ///
    /// [`RhiError::Timeout`] carrying `what` on expiry; the Vulkan error
    /// otherwise, e.g. device lost.
    pub fn wait(&self, timeout: Duration, what: &'static str) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .wait_for_fences(&[self.handle], true, timeout_nanos(timeout))
        }
        .map_err(|e| RhiError::from_wait(e, what))
    }

    /// Unsignals the fence. No pending submission may reference it.
    ///
    /// # Errors
    ///
    /// Returns an error if `vkResetFences` fails.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe { self.device.handle().reset_fences(&[self.handle])? };
        Ok(())
    }

    /// Non-blocking status query. Errors read as unsignaled.
    pub fn is_signaled(&self) -> bool {
        unsafe { self.device.handle().get_fence_status(self.handle) }.unwrap_or(false)
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_fence(self.handle, None) };
        self.device.ledger().release("fence");
        debug!("Destroyed fence");
    }
}

/// `timeout` in nanoseconds, saturating at `u64::MAX` (wait forever).
pub fn timeout_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_nanos() {
        assert_eq!(timeout_nanos(Duration::from_millis(1500)), 1_500_000_000);
        assert_eq!(timeout_nanos(Duration::ZERO), 0);
        assert_eq!(timeout_nanos(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_sync_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
    }
}

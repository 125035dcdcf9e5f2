//! Blocking one-shot GPU submission.
//!
//! [`ImmediateSubmitQueue`] owns a single command buffer and fence. Each
//! [`submit`](ImmediateSubmitQueue::submit) records through a callback, submits
//! to the graphics queue and waits for completion. It is used for uploads
//! outside the frame loop.
//!
//! When the wait fails or times out the queue drains the whole device before
//! returning, so the caller may free whatever the submission referenced. If
//! even that drain fails the queue refuses further submissions.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use lantern_rhi::device::Device;
//! use lantern_rhi::immediate::{ImmediateSubmitQueue, SubmitOutcome};
//!
//! # fn example(device: Arc<Device>) -> Result<(), lantern_rhi::RhiError> {
//! let mut queue = ImmediateSubmitQueue::new(device, Duration::from_secs(1))?;
//! let outcome = queue.submit(|cmd| {
//!     // record copies into `cmd`
//!     Ok(())
//! });
//! assert!(matches!(outcome, SubmitOutcome::Success));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, error, warn};

use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::sync::Fence;

/// Result of a blocking submission.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// The GPU finished the work.
    Success,
    /// The fence did not signal within the wait bound.
    Timeout,
    /// Recording, submission or the wait failed.
    Failed(RhiError),
}

impl SubmitOutcome {
    fn from_result(result: RhiResult<()>) -> Self {
        match result {
            Ok(()) => SubmitOutcome::Success,
            Err(RhiError::Timeout { .. }) => SubmitOutcome::Timeout,
            Err(e) => SubmitOutcome::Failed(e),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, SubmitOutcome::Success)
    }

    /// Converts the outcome back into a result so callers can use `?`.
    ///
    /// # Errors
    ///
    /// [`SubmitOutcome::Timeout`] maps to [`RhiError::Timeout`]; a failure
    /// returns its cause.
    pub fn into_result(self) -> RhiResult<()> {
        match self {
            SubmitOutcome::Success => Ok(()),
            SubmitOutcome::Timeout => Err(RhiError::Timeout {
                what: "immediate submit fence",
            }),
            SubmitOutcome::Failed(e) => Err(e),
        }
    }
}

/// Single command buffer and fence for synchronous submissions.
pub struct ImmediateSubmitQueue {
    // Field order matters: the buffer is freed with the pool.
    command_buffer: CommandBuffer,
    _pool: CommandPool,
    fence: Fence,
    timeout: Duration,
    // Set when a submission may still be pending on the GPU.
    poisoned: bool,
}

impl ImmediateSubmitQueue {
    /// Creates the queue on the device's graphics family.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `timeout` - Bound on the completion wait of every submit
    ///
    /// # Errors
    ///
    /// Returns an error if the pool, buffer or fence cannot be created.
    pub fn new(device: Arc<Device>, timeout: Duration) -> RhiResult<Self> {
        let pool = CommandPool::new(device.clone(), device.graphics_family())?;
        let command_buffer = pool.allocate_command_buffer()?;
        let fence = Fence::new(device, false)?;

        debug!("Created immediate submit queue (timeout {:?})", timeout);

        Ok(Self {
            command_buffer,
            _pool: pool,
            fence,
            timeout,
            poisoned: false,
        })
    }

    /// Records `record_fn` into the command buffer, submits it and waits.
    ///
    /// The callback's error is reported as [`SubmitOutcome::Failed`] and
    /// nothing is submitted in that case.
    pub fn submit<F>(&mut self, record_fn: F) -> SubmitOutcome
    where
        F: FnOnce(&CommandBuffer) -> RhiResult<()>,
    {
        let outcome = SubmitOutcome::from_result(self.submit_inner(record_fn));
        match &outcome {
            SubmitOutcome::Success => {}
            SubmitOutcome::Timeout => warn!(
                "Immediate submit did not complete within {:?}",
                self.timeout
            ),
            SubmitOutcome::Failed(e) => error!("Immediate submit failed: {}", e),
        }
        outcome
    }

    fn submit_inner<F>(&mut self, record_fn: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer) -> RhiResult<()>,
    {
        if self.poisoned {
            return Err(RhiError::InvalidState(
                "immediate submit queue has work of unknown state in flight".to_string(),
            ));
        }
        self.fence.reset()?;
        self.command_buffer.reset()?;
        self.command_buffer.begin()?;
        record_fn(&self.command_buffer)?;
        self.command_buffer.end()?;

        let command_infos = [self.command_buffer.submit_info()];
        let submit = vk::SubmitInfo2::default().command_buffer_infos(&command_infos);

        let device = self.command_buffer.device();
        // SAFETY: the buffer was just recorded and the fence reset above.
        unsafe {
            device.submit_graphics(std::slice::from_ref(&submit), self.fence.handle())?;
        }

        let waited = self.fence.wait(self.timeout, "immediate submit fence");
        if !settle_failed_wait(&waited, || device.wait_idle()) {
            self.poisoned = true;
        }
        waited
    }

    /// False once a submission could not be confirmed finished.
    #[inline]
    pub fn is_usable(&self) -> bool {
        !self.poisoned
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Blocks on `drain` after a failed completion wait. Returns false when the
/// drain fails too and the submission may still be running.
fn settle_failed_wait(waited: &RhiResult<()>, drain: impl FnOnce() -> RhiResult<()>) -> bool {
    if waited.is_ok() {
        return true;
    }
    warn!("Immediate submit wait failed; waiting for the device to go idle");
    match drain() {
        Ok(()) => true,
        Err(e) => {
            error!("Device idle wait after failed submit also failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_result() {
        assert!(SubmitOutcome::from_result(Ok(())).is_success());
        assert!(matches!(
            SubmitOutcome::from_result(Err(RhiError::Timeout { what: "fence" })),
            SubmitOutcome::Timeout
        ));
        assert!(matches!(
            SubmitOutcome::from_result(Err(RhiError::VulkanError(
                vk::Result::ERROR_DEVICE_LOST
            ))),
            SubmitOutcome::Failed(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST))
        ));
    }

    #[test]
    fn test_outcome_into_result() {
        assert!(SubmitOutcome::Success.into_result().is_ok());
        assert!(matches!(
            SubmitOutcome::Timeout.into_result(),
            Err(RhiError::Timeout { .. })
        ));
    }

    #[test]
    fn test_completed_wait_does_not_drain() {
        let mut drained = false;
        assert!(settle_failed_wait(&Ok(()), || {
            drained = true;
            Ok(())
        }));
        assert!(!drained);
    }

    #[test]
    fn test_timed_out_wait_drains_device() {
        let mut drained = false;
        let usable = settle_failed_wait(&Err(RhiError::Timeout { what: "fence" }), || {
            drained = true;
            Ok(())
        });
        assert!(drained);
        assert!(usable);
    }

    #[test]
    fn test_failed_drain_leaves_queue_unusable() {
        let usable = settle_failed_wait(
            &Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST)),
            || Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST)),
        );
        assert!(!usable);
    }
}

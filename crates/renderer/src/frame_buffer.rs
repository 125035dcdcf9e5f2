//! Frame ring and per-frame synchronization.
//!
//! [`FrameBuffer`] owns a fixed ring of [`Frame`]s. Each frame has its own
//! command pool and buffer, a render fence and an image-ready semaphore, and
//! is reused every `ring_size` frames. Render-complete semaphores belong to
//! swapchain images instead: a slot's fence says nothing about whether the
//! presentation engine has consumed the semaphore its last present waited on.
//!
//! ```text
//! begin_new_frame            finish_frame_with_present
//!  ├ wait render fence        ├ acquire swapchain image i (signals image-ready)
//!  ├ reset fence + buffer     ├ blit source -> swapchain image i
//!  └ begin recording          ├ submit (wait image-ready, signal render-complete[i] + fence)
//!                             └ present i (wait render-complete[i])
//! ```
//!
//! Slot bookkeeping lives in [`FrameRing`], which has no GPU state.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use lantern_rhi::device::Device;
//! use lantern_rhi::image::AllocatedImage;
//! use lantern_rhi::swapchain::Swapchain;
//! use lantern_renderer::frame_buffer::{FrameBuffer, PresentStatus};
//!
//! # fn example(device: Arc<Device>, swapchain: &Swapchain, output: &mut AllocatedImage) -> Result<(), lantern_rhi::RhiError> {
//! let mut frames = FrameBuffer::new(device, 2, swapchain.image_count(), Duration::from_secs(1))?;
//! let cmd = frames.begin_new_frame()?;
//! // ... record passes into `cmd`, ending with `output` ...
//! let extent = output.extent();
//! if frames.finish_frame_with_present(swapchain, output, extent)? == PresentStatus::SwapchainOutOfDate {
//!     // rebuild the swapchain
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info, warn};

use lantern_rhi::command::{CommandBuffer, CommandPool};
use lantern_rhi::device::Device;
use lantern_rhi::image::{self, AllocatedImage};
use lantern_rhi::swapchain::{Acquired, Swapchain};
use lantern_rhi::sync::{Fence, Semaphore};
use lantern_rhi::{RhiError, RhiResult};

pub use lantern_rhi::swapchain::PresentStatus;

/// Lifecycle of one ring slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// No GPU work pending; the fence is signaled.
    Idle,
    /// Recording has begun; the fence is unsignaled and nothing is submitted.
    Recording,
    /// Work is submitted; the fence signals when it completes.
    Submitted,
}

/// What `begin_new_frame` has to do before recording into a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BeginPlan {
    pub frame_number: u64,
    pub slot: usize,
    /// False for a slot abandoned in `Recording`: its fence will never
    /// signal, and was already reset.
    pub wait_fence: bool,
}

/// How the recording frame leaves the ring once the acquire has returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmitPlan {
    pub slot: usize,
    /// Swapchain image to blit into and present. `None` submits the recorded
    /// work alone, without waiting on or signaling any semaphore.
    pub present_image: Option<u32>,
    /// The acquire reported a suboptimal swapchain.
    pub suboptimal: bool,
}

impl SubmitPlan {
    /// Final status of a frame whose present returned `presented`. A frame
    /// acquired from a suboptimal swapchain asks for a rebuild either way.
    pub fn settle(&self, presented: PresentStatus) -> PresentStatus {
        if self.suboptimal {
            PresentStatus::SwapchainOutOfDate
        } else {
            presented
        }
    }
}

/// Slot selection and state for a ring of frames.
#[derive(Clone, Debug)]
pub struct FrameRing {
    states: Vec<SlotState>,
    next_frame: u64,
    current: Option<usize>,
}

impl FrameRing {
    /// Creates a ring of `size` idle slots (at least one).
    pub fn new(size: usize) -> Self {
        Self {
            states: vec![SlotState::Idle; size.max(1)],
            next_frame: 0,
            current: None,
        }
    }

    /// Picks the slot for the next frame without changing any state.
    pub fn plan_begin(&self) -> BeginPlan {
        let slot = (self.next_frame % self.states.len() as u64) as usize;
        BeginPlan {
            frame_number: self.next_frame,
            slot,
            wait_fence: self.states[slot] != SlotState::Recording,
        }
    }

    /// Records that the planned slot is now recording.
    pub fn commit_begin(&mut self, plan: BeginPlan) {
        self.states[plan.slot] = SlotState::Recording;
        self.current = Some(plan.slot);
        self.next_frame = plan.frame_number + 1;
    }

    /// Marks the current slot submitted.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidState`] if no slot is recording.
    pub fn mark_submitted(&mut self) -> RhiResult<usize> {
        let slot = self.recording_slot()?;
        self.states[slot] = SlotState::Submitted;
        self.current = None;
        Ok(slot)
    }

    /// Decides what the recording slot submits after `acquired`.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidState`] if no slot is recording.
    pub fn plan_submit(&self, acquired: Acquired) -> RhiResult<SubmitPlan> {
        let slot = self.recording_slot()?;
        Ok(match acquired {
            Acquired::Image { index, suboptimal } => SubmitPlan {
                slot,
                present_image: Some(index),
                suboptimal,
            },
            Acquired::OutOfDate => SubmitPlan {
                slot,
                present_image: None,
                suboptimal: false,
            },
        })
    }

    /// The slot currently recording.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidState`] if there is none.
    pub fn recording_slot(&self) -> RhiResult<usize> {
        self.current
            .filter(|&slot| self.states[slot] == SlotState::Recording)
            .ok_or_else(|| RhiError::InvalidState("no frame is recording".to_string()))
    }

    #[inline]
    pub fn state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    /// Slots that are not submitted.
    pub fn unsubmitted_count(&self) -> usize {
        self.states
            .iter()
            .filter(|&&s| s != SlotState::Submitted)
            .count()
    }

    /// Number of frames begun so far.
    #[inline]
    pub fn frames_begun(&self) -> u64 {
        self.next_frame
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.states.len()
    }
}

/// Per-slot GPU objects.
pub struct Frame {
    command_buffer: CommandBuffer,
    _command_pool: CommandPool,
    render_fence: Fence,
    image_ready: Semaphore,
}

impl Frame {
    fn new(device: Arc<Device>) -> RhiResult<Self> {
        let command_pool = CommandPool::new(device.clone(), device.graphics_family())?;
        let command_buffer = command_pool.allocate_command_buffer()?;
        Ok(Self {
            command_buffer,
            _command_pool: command_pool,
            // Signaled so the first wait on a fresh slot returns at once.
            render_fence: Fence::new(device.clone(), true)?,
            image_ready: Semaphore::new(device)?,
        })
    }

    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn render_fence(&self) -> &Fence {
        &self.render_fence
    }
}

/// The swapchain calls the present path makes.
pub trait PresentTarget {
    /// Acquires an image, signaling `image_ready` once it can be written.
    fn acquire(&self, image_ready: vk::Semaphore, timeout: Duration) -> RhiResult<Acquired>;

    fn image(&self, index: u32) -> RhiResult<vk::Image>;

    fn extent(&self) -> vk::Extent2D;

    /// Queues image `index` for presentation after `render_complete`.
    fn present(&self, index: u32, render_complete: vk::Semaphore) -> RhiResult<PresentStatus>;
}

impl PresentTarget for Swapchain {
    fn acquire(&self, image_ready: vk::Semaphore, timeout: Duration) -> RhiResult<Acquired> {
        self.acquire_next_image(image_ready, timeout)
    }

    fn image(&self, index: u32) -> RhiResult<vk::Image> {
        Swapchain::image(self, index)
    }

    fn extent(&self) -> vk::Extent2D {
        Swapchain::extent(self)
    }

    fn present(&self, index: u32, render_complete: vk::Semaphore) -> RhiResult<PresentStatus> {
        Swapchain::present(self, index, render_complete)
    }
}

/// Ring of frames in flight plus the present path.
pub struct FrameBuffer {
    device: Arc<Device>,
    frames: Vec<Frame>,
    // One per swapchain image, indexed by the acquired image.
    render_complete: Vec<Semaphore>,
    ring: FrameRing,
    timeout: Duration,
}

impl FrameBuffer {
    /// Creates `ring_size` frames.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `ring_size` - Frames in flight
    /// * `image_count` - Images in the swapchain frames are presented to
    /// * `timeout` - Bound for the fence wait and the swapchain acquire
    ///
    /// # Errors
    ///
    /// Returns an error if any per-frame object cannot be created.
    pub fn new(
        device: Arc<Device>,
        ring_size: usize,
        image_count: u32,
        timeout: Duration,
    ) -> RhiResult<Self> {
        let ring = FrameRing::new(ring_size);
        let frames = (0..ring.size())
            .map(|_| Frame::new(device.clone()))
            .collect::<RhiResult<Vec<_>>>()?;
        let render_complete = create_semaphores(&device, image_count)?;

        info!(
            "Frame buffer created with {} frames in flight, {} swapchain images",
            frames.len(),
            render_complete.len()
        );

        Ok(Self {
            device,
            frames,
            render_complete,
            ring,
            timeout,
        })
    }

    /// Replaces the render-complete semaphores after a swapchain rebuild.
    ///
    /// The device must be idle so no present still waits on the old ones.
    ///
    /// # Errors
    ///
    /// Returns an error if a semaphore cannot be created.
    pub fn reset_present_semaphores(&mut self, image_count: u32) -> RhiResult<()> {
        self.render_complete = create_semaphores(&self.device, image_count)?;
        debug!("Render-complete semaphores recreated for {} images", image_count);
        Ok(())
    }

    /// Starts the next frame and returns its command buffer, recording.
    ///
    /// # Errors
    ///
    /// [`RhiError::Timeout`] if the slot's previous work does not finish in
    /// time; any error resetting or beginning the buffer. All are fatal.
    pub fn begin_new_frame(&mut self) -> RhiResult<&CommandBuffer> {
        let plan = self.ring.plan_begin();
        let frame = &self.frames[plan.slot];

        if plan.wait_fence {
            frame.render_fence.wait(self.timeout, "render fence")?;
            frame.render_fence.reset()?;
        } else {
            warn!(
                "Frame slot {} was begun but never submitted; reusing it",
                plan.slot
            );
        }
        frame.command_buffer.reset()?;
        frame.command_buffer.begin()?;

        self.ring.commit_begin(plan);
        Ok(&self.frames[plan.slot].command_buffer)
    }

    /// The recording frame's command buffer.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidState`] outside `begin_new_frame` /
    /// `finish_frame_with_present`.
    pub fn command_buffer(&self) -> RhiResult<&CommandBuffer> {
        Ok(&self.frames[self.ring.recording_slot()?].command_buffer)
    }

    /// Copies `source` into the next swapchain image, submits the frame and
    /// presents it.
    ///
    /// `source` is transitioned to `TRANSFER_SRC_OPTIMAL` through its own
    /// layout tracking; its top-left `source_extent` is scaled onto the whole
    /// swapchain image.
    ///
    /// When the acquire reports out-of-date, the recorded work is still
    /// submitted (so tracked layouts stay truthful) but nothing is presented.
    /// A suboptimal acquire is presented and then reported as out-of-date.
    ///
    /// # Errors
    ///
    /// Fatal failures: timeouts, any Vulkan error other than out-of-date,
    /// or no frame recording.
    pub fn finish_frame_with_present<T: PresentTarget + ?Sized>(
        &mut self,
        target: &T,
        source: &mut AllocatedImage,
        source_extent: vk::Extent2D,
    ) -> RhiResult<PresentStatus> {
        let slot = self.ring.recording_slot()?;
        let acquired = target.acquire(self.frames[slot].image_ready.handle(), self.timeout)?;
        let plan = self.ring.plan_submit(acquired)?;
        let cmd = &self.frames[plan.slot].command_buffer;

        let Some(index) = plan.present_image else {
            debug!("Swapchain out of date on acquire; submitting frame without present");
            cmd.end()?;
            self.submit(plan.slot, None)?;
            return Ok(PresentStatus::SwapchainOutOfDate);
        };

        let render_complete = self
            .render_complete
            .get(index as usize)
            .map(Semaphore::handle)
            .ok_or_else(|| {
                RhiError::InvalidState(format!(
                    "no render-complete semaphore for swapchain image {} of {}",
                    index,
                    self.render_complete.len()
                ))
            })?;

        let swap_image = target.image(index)?;
        source.record_transition_barriered(cmd, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        record_acquire_transition(cmd, swap_image);
        image::record_blit(cmd, source.handle(), source_extent, swap_image, target.extent());
        image::record_external_transition(
            cmd,
            swap_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        cmd.end()?;

        self.submit(plan.slot, Some(render_complete))?;
        let presented = target.present(index, render_complete)?;
        Ok(plan.settle(presented))
    }

    /// Submits the slot's buffer. With `render_complete`, the submit waits on
    /// the slot's image-ready semaphore and signals `render_complete`.
    fn submit(&mut self, slot: usize, render_complete: Option<vk::Semaphore>) -> RhiResult<()> {
        let frame = &self.frames[slot];
        let command_infos = [frame.command_buffer.submit_info()];
        let waits = [frame
            .image_ready
            .submit_info(vk::PipelineStageFlags2::ALL_TRANSFER)];

        let signals = render_complete.map(|semaphore| {
            [vk::SemaphoreSubmitInfo::default()
                .semaphore(semaphore)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)]
        });

        let mut submit = vk::SubmitInfo2::default().command_buffer_infos(&command_infos);
        if let Some(signals) = &signals {
            submit = submit
                .wait_semaphore_infos(&waits)
                .signal_semaphore_infos(signals);
        }

        // SAFETY: the buffer has ended and the fence was reset in begin_new_frame.
        unsafe {
            self.device
                .submit_graphics(std::slice::from_ref(&submit), frame.render_fence.handle())?;
        }
        self.ring.mark_submitted()?;
        Ok(())
    }

    /// True if the recording frame's fence is signaled. Always false while a
    /// frame is recording.
    pub fn is_current_fence_signaled(&self) -> RhiResult<bool> {
        Ok(self.frames[self.ring.recording_slot()?]
            .render_fence
            .is_signaled())
    }

    #[inline]
    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Number of render-complete semaphores, one per swapchain image.
    #[inline]
    pub fn present_semaphore_count(&self) -> usize {
        self.render_complete.len()
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn create_semaphores(device: &Arc<Device>, count: u32) -> RhiResult<Vec<Semaphore>> {
    (0..count).map(|_| Semaphore::new(device.clone())).collect()
}

/// `UNDEFINED -> TRANSFER_DST` for a freshly acquired swapchain image. The
/// first scope matches the image-ready semaphore's wait stage so the
/// transition happens after the presentation engine releases the image.
fn record_acquire_transition(cmd: &CommandBuffer, target: vk::Image) {
    let barrier = image::transition_barrier(
        target,
        vk::ImageAspectFlags::COLOR,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    )
    .src_stage_mask(vk::PipelineStageFlags2::ALL_TRANSFER);
    let dependency =
        vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
    cmd.pipeline_barrier2(&dependency);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn begin(ring: &mut FrameRing) -> BeginPlan {
        let plan = ring.plan_begin();
        ring.commit_begin(plan);
        plan
    }

    #[test]
    fn test_slots_cycle_in_order() {
        let mut ring = FrameRing::new(2);
        let slots: Vec<usize> = (0..5)
            .map(|_| {
                let plan = begin(&mut ring);
                ring.mark_submitted().unwrap();
                plan.slot
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        assert_eq!(ring.frames_begun(), 5);
    }

    #[test]
    fn test_begin_marks_slot_recording() {
        let mut ring = FrameRing::new(2);
        let plan = begin(&mut ring);
        assert_eq!(ring.state(plan.slot), SlotState::Recording);
        assert_eq!(ring.recording_slot().unwrap(), plan.slot);

        ring.mark_submitted().unwrap();
        assert_eq!(ring.state(plan.slot), SlotState::Submitted);
        assert!(ring.recording_slot().is_err());
    }

    #[test]
    fn test_submitted_and_idle_slots_wait_on_fence() {
        let mut ring = FrameRing::new(2);
        assert!(ring.plan_begin().wait_fence);
        begin(&mut ring);
        ring.mark_submitted().unwrap();
        begin(&mut ring);
        ring.mark_submitted().unwrap();

        let plan = ring.plan_begin();
        assert_eq!(plan.slot, 0);
        assert!(plan.wait_fence);
    }

    #[test]
    fn test_unsubmitted_slots_wrap_without_waiting() {
        let mut ring = FrameRing::new(2);

        // Two begins without submitting use different slots.
        let first = begin(&mut ring);
        let second = begin(&mut ring);
        assert_ne!(first.slot, second.slot);

        // The third wraps to slot 0, which is abandoned: no fence wait.
        let third = ring.plan_begin();
        assert_eq!(third.slot, 0);
        assert!(!third.wait_fence);
        ring.commit_begin(third);
        assert_eq!(ring.recording_slot().unwrap(), 0);
    }

    #[test]
    fn test_unsubmitted_count_bounded_by_ring_size() {
        let mut ring = FrameRing::new(3);
        for i in 0..10 {
            begin(&mut ring);
            if i % 3 == 0 {
                ring.mark_submitted().unwrap();
            }
            assert!(ring.unsubmitted_count() <= ring.size());
        }
    }

    #[test]
    fn test_submit_without_recording_is_rejected() {
        let mut ring = FrameRing::new(2);
        assert!(matches!(
            ring.mark_submitted(),
            Err(RhiError::InvalidState(_))
        ));
    }

    #[test]
    fn test_zero_size_ring_has_one_slot() {
        let ring = FrameRing::new(0);
        assert_eq!(ring.size(), 1);
        assert_eq!(ring.plan_begin().slot, 0);
    }

    #[test]
    fn test_out_of_date_acquire_submits_without_present() {
        let mut ring = FrameRing::new(2);
        let begun = begin(&mut ring);

        let plan = ring.plan_submit(Acquired::OutOfDate).unwrap();
        assert_eq!(plan.slot, begun.slot);
        assert_eq!(plan.present_image, None);

        // The recorded work still goes out, moving the slot on.
        assert_eq!(ring.mark_submitted().unwrap(), begun.slot);
        assert_eq!(ring.state(begun.slot), SlotState::Submitted);
        assert!(ring.plan_begin().wait_fence);
    }

    #[test]
    fn test_acquired_image_is_presented() {
        let mut ring = FrameRing::new(2);
        begin(&mut ring);
        let plan = ring
            .plan_submit(Acquired::Image {
                index: 2,
                suboptimal: false,
            })
            .unwrap();
        assert_eq!(plan.present_image, Some(2));
        assert_eq!(plan.settle(PresentStatus::Presented), PresentStatus::Presented);
        assert_eq!(
            plan.settle(PresentStatus::SwapchainOutOfDate),
            PresentStatus::SwapchainOutOfDate
        );
    }

    #[test]
    fn test_suboptimal_acquire_requests_rebuild_after_present() {
        let mut ring = FrameRing::new(1);
        begin(&mut ring);
        let plan = ring
            .plan_submit(Acquired::Image {
                index: 0,
                suboptimal: true,
            })
            .unwrap();
        assert_eq!(plan.present_image, Some(0));
        assert_eq!(
            plan.settle(PresentStatus::Presented),
            PresentStatus::SwapchainOutOfDate
        );
    }

    #[test]
    fn test_plan_submit_without_recording_is_rejected() {
        let ring = FrameRing::new(2);
        assert!(matches!(
            ring.plan_submit(Acquired::OutOfDate),
            Err(RhiError::InvalidState(_))
        ));
    }

    #[test]
    fn test_frame_buffer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameBuffer>();
    }
}

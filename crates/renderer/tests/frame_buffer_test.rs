//! Frame ring behavior against a real device. Skips when no Vulkan 1.3
//! GPU is available.

use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

use lantern_renderer::frame_buffer::{PresentTarget, SlotState};
use lantern_renderer::{FrameBuffer, PresentStatus};
use lantern_rhi::device::Device;
use lantern_rhi::image::{AllocatedImage, ImageDesc};
use lantern_rhi::instance::Instance;
use lantern_rhi::physical_device::select_physical_device;
use lantern_rhi::swapchain::Acquired;
use lantern_rhi::{RhiError, RhiResult, vk};

struct Headless {
    device: Arc<Device>,
    _instance: Instance,
}

fn headless_device() -> Option<Headless> {
    let instance = Instance::new(false, &[])
        .map_err(|e| eprintln!("Skipping test: no Vulkan loader ({})", e))
        .ok()?;
    let info = select_physical_device(instance.handle(), None)
        .map_err(|e| eprintln!("Skipping test: no suitable GPU ({})", e))
        .ok()?;
    let device = Device::new(&instance, &info)
        .map_err(|e| eprintln!("Skipping test: device creation failed ({})", e))
        .ok()?;
    Some(Headless {
        device,
        _instance: instance,
    })
}

const EXTENT: vk::Extent2D = vk::Extent2D {
    width: 64,
    height: 64,
};

/// A swapchain that is always out of date on acquire.
#[derive(Default)]
struct StaleSwapchain {
    presents: Cell<u32>,
}

impl PresentTarget for StaleSwapchain {
    fn acquire(&self, _image_ready: vk::Semaphore, _timeout: Duration) -> RhiResult<Acquired> {
        Ok(Acquired::OutOfDate)
    }

    fn image(&self, index: u32) -> RhiResult<vk::Image> {
        Err(RhiError::InvalidHandle(format!("no swapchain image {}", index)))
    }

    fn extent(&self) -> vk::Extent2D {
        EXTENT
    }

    fn present(&self, _index: u32, _render_complete: vk::Semaphore) -> RhiResult<PresentStatus> {
        self.presents.set(self.presents.get() + 1);
        Ok(PresentStatus::Presented)
    }
}

fn output_image(device: &Arc<Device>) -> AllocatedImage {
    AllocatedImage::new(
        device.clone(),
        &ImageDesc {
            name: "output",
            extent: EXTENT,
            format: vk::Format::R16G16B16A16_SFLOAT,
            usage: vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC,
        },
    )
    .unwrap()
}

#[test]
fn test_begin_leaves_slot_recording_with_unsignaled_fence() {
    let Some(gpu) = headless_device() else {
        return;
    };
    let mut frames = FrameBuffer::new(gpu.device.clone(), 2, 3, Duration::from_secs(1)).unwrap();

    frames.begin_new_frame().unwrap();

    assert_eq!(frames.ring().state(0), SlotState::Recording);
    assert!(!frames.is_current_fence_signaled().unwrap());
    assert!(frames.command_buffer().is_ok());
}

#[test]
fn test_unsubmitted_frames_wrap_without_waiting() {
    let Some(gpu) = headless_device() else {
        return;
    };
    let mut frames = FrameBuffer::new(gpu.device.clone(), 2, 3, Duration::from_secs(1)).unwrap();

    frames.begin_new_frame().unwrap();
    frames.begin_new_frame().unwrap();
    assert_eq!(frames.ring().state(0), SlotState::Recording);
    assert_eq!(frames.ring().state(1), SlotState::Recording);

    // Slot 0 was never submitted, so its fence is not waited on.
    frames.begin_new_frame().unwrap();
    assert_eq!(frames.ring().frames_begun(), 3);
    assert!(frames.ring().unsubmitted_count() <= frames.frames_in_flight());
}

#[test]
fn test_out_of_date_acquire_submits_without_presenting() {
    let Some(gpu) = headless_device() else {
        return;
    };
    let mut frames = FrameBuffer::new(gpu.device.clone(), 2, 3, Duration::from_secs(1)).unwrap();
    let mut output = output_image(&gpu.device);
    let target = StaleSwapchain::default();

    frames.begin_new_frame().unwrap();
    let status = frames
        .finish_frame_with_present(&target, &mut output, EXTENT)
        .unwrap();

    assert_eq!(status, PresentStatus::SwapchainOutOfDate);
    assert_eq!(target.presents.get(), 0);
    assert_eq!(frames.ring().state(0), SlotState::Submitted);
    assert!(frames.command_buffer().is_err());
    // The blit was skipped, so the output keeps its layout.
    assert_eq!(output.expected_layout(), vk::ImageLayout::UNDEFINED);

    // Slot 0 comes round again and waits on its fence. The submit waited on
    // no semaphore, so the fence signals.
    frames.begin_new_frame().unwrap();
    frames
        .finish_frame_with_present(&target, &mut output, EXTENT)
        .unwrap();
    frames.begin_new_frame().unwrap();
    assert_eq!(frames.ring().state(0), SlotState::Recording);

    gpu.device.wait_idle().unwrap();
}

#[test]
fn test_present_semaphores_follow_swapchain_image_count() {
    let Some(gpu) = headless_device() else {
        return;
    };
    let mut frames = FrameBuffer::new(gpu.device.clone(), 2, 3, Duration::from_secs(1)).unwrap();
    assert_eq!(frames.present_semaphore_count(), 3);

    frames.reset_present_semaphores(4).unwrap();
    assert_eq!(frames.present_semaphore_count(), 4);
    assert_eq!(frames.frames_in_flight(), 2);
}

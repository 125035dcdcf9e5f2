//! Main renderer orchestration.
//!
//! [`Renderer`] owns every Vulkan object for one window, from the instance
//! down to the uploaded meshes, and drives one frame per
//! [`render_frame`](Renderer::render_frame) call.

use std::sync::Arc;

use ash::vk;
use glam::{Mat4, Vec3};
use tracing::{debug, error, info};

use lantern_core::EngineConfig;
use lantern_platform::{Surface, Window};
use lantern_resources::Model;
use lantern_rhi::device::Device;
use lantern_rhi::immediate::ImmediateSubmitQueue;
use lantern_rhi::instance::Instance;
use lantern_rhi::physical_device::select_physical_device;
use lantern_rhi::swapchain::Swapchain;
use lantern_rhi::{RhiError, RhiResult};
use lantern_scene::{Camera, DirectionalLight};

use crate::deferred::{DeferredRenderer, FrameInputs, capacity_from_config};
use crate::frame_buffer::{FrameBuffer, PresentStatus};
use crate::geometry_pass::MeshDraw;
use crate::mesh::GpuMesh;
use crate::ui::CompositeLayer;

/// Scales and centers a model so its bounding box spans two units around
/// the origin.
pub fn normalizing_transform(model: &Model) -> Mat4 {
    let size = model.bounds.size().max_element().max(0.001);
    Mat4::from_scale(Vec3::splat(2.0 / size)) * Mat4::from_translation(-model.bounds.center())
}

/// Main renderer that manages all Vulkan resources.
///
/// # Resource Destruction Order
///
/// Fields drop in declaration order after [`Drop::drop`] waits for the GPU:
/// meshes, passes and targets, frame resources, the swapchain, the device,
/// the surface and finally the instance.
pub struct Renderer {
    meshes: Vec<GpuMesh>,
    model_transform: Mat4,
    ui: CompositeLayer,
    deferred: DeferredRenderer,
    frames: FrameBuffer,
    upload_queue: ImmediateSubmitQueue,
    /// `None` only while a rebuild is in progress.
    swapchain: Option<Swapchain>,
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,

    /// Flag indicating swapchain needs rebuilding before the next acquire.
    swapchain_stale: bool,
    width: u32,
    height: u32,
}

impl Renderer {
    /// Creates a renderer for `window`.
    ///
    /// # Errors
    ///
    /// Returns an error if any Vulkan object cannot be created, no GPU meets
    /// the requirements, or a shader cannot be loaded.
    pub fn new(window: &Window, config: &EngineConfig) -> RhiResult<Self> {
        let width = window.width();
        let height = window.height();
        info!("Initializing Vulkan renderer ({}x{})", width, height);

        let extensions = window
            .required_extensions()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;
        let instance = Instance::new(config.render.validation, &extensions)?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let physical_device_info = select_physical_device(
            instance.handle(),
            Some((surface.handle(), surface.loader())),
        )?;
        info!(
            "Using GPU '{}' ({})",
            physical_device_info.device_name(),
            physical_device_info.device_type_name()
        );

        let device = Device::new(&instance, &physical_device_info)?;
        let swapchain = Swapchain::new(&instance, device.clone(), surface.handle(), width, height)?;

        let timeout = config.render.wait_timeout();
        let frames = FrameBuffer::new(
            device.clone(),
            config.render.frames_in_flight as usize,
            swapchain.image_count(),
            timeout,
        )?;
        let upload_queue = ImmediateSubmitQueue::new(device.clone(), timeout)?;

        let deferred =
            DeferredRenderer::new(device.clone(), &config.render, &config.assets.shader_dir)?;
        let ui = CompositeLayer::new(
            device.clone(),
            deferred.layouts(),
            capacity_from_config(&config.render),
        )?;

        info!(
            "Renderer initialized: {} swapchain images, {} frames in flight",
            swapchain.image_count(),
            frames.frames_in_flight()
        );

        Ok(Self {
            meshes: Vec::new(),
            model_transform: Mat4::IDENTITY,
            ui,
            deferred,
            frames,
            upload_queue,
            swapchain: Some(swapchain),
            device,
            surface,
            instance,
            swapchain_stale: false,
            width,
            height,
        })
    }

    /// Uploads every mesh of `model`, replacing what was drawn before.
    ///
    /// # Errors
    ///
    /// Returns an error if a buffer cannot be created or the upload does not
    /// complete.
    pub fn upload_model(&mut self, model: &Model) -> RhiResult<()> {
        let meshes = model
            .meshes
            .iter()
            .filter(|mesh| !mesh.indices.is_empty())
            .map(|mesh| GpuMesh::upload(self.device.clone(), &mut self.upload_queue, mesh))
            .collect::<RhiResult<Vec<_>>>()?;

        self.model_transform = normalizing_transform(model);
        info!(
            "Model uploaded: {} meshes, {} triangles",
            meshes.len(),
            model.total_triangle_count()
        );

        // The old buffers may still be read by frames in flight.
        self.device.wait_idle()?;
        self.meshes = meshes;
        Ok(())
    }

    /// Records the new window size. The swapchain is rebuilt before the next
    /// frame; zero sizes pause rendering instead.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == self.width && height == self.height {
            return;
        }
        debug!(
            "Resize triggered: {}x{} -> {}x{}",
            self.width, self.height, width, height
        );
        self.width = width;
        self.height = height;
        self.swapchain_stale = true;
    }

    /// True while the window has a zero dimension.
    #[inline]
    pub fn is_paused(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn rebuild_swapchain(&mut self) -> RhiResult<()> {
        let swapchain = self
            .swapchain
            .take()
            .ok_or_else(|| RhiError::InvalidState("swapchain is missing".to_string()))?;
        let swapchain = swapchain.rebuild(self.surface.handle(), self.width, self.height)?;
        // The rebuild left the device idle, so no present still waits on these.
        self.frames.reset_present_semaphores(swapchain.image_count())?;
        self.swapchain = Some(swapchain);
        self.swapchain_stale = false;
        Ok(())
    }

    /// Renders and presents one frame.
    ///
    /// Skipped while the window is minimized. An out-of-date swapchain is
    /// rebuilt before the next frame.
    ///
    /// # Errors
    ///
    /// Any error is fatal for the frame loop.
    pub fn render_frame(&mut self, camera: &Camera, light: &DirectionalLight) -> RhiResult<()> {
        if self.is_paused() {
            return Ok(());
        }
        if self.swapchain_stale {
            self.rebuild_swapchain()?;
        }

        let draws: Vec<MeshDraw<'_>> = self
            .meshes
            .iter()
            .map(|mesh| MeshDraw {
                mesh,
                model: self.model_transform,
            })
            .collect();
        let inputs = FrameInputs {
            view_proj: camera.view_projection_matrix(),
            camera_position: camera.position,
            light: *light,
            draws: &draws,
        };

        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| RhiError::InvalidState("swapchain is missing".to_string()))?;
        let status =
            self.deferred
                .draw_frame(&mut self.frames, swapchain, &mut self.ui, &inputs)?;

        if status == PresentStatus::SwapchainOutOfDate {
            debug!("Swapchain out of date, rebuilding before the next frame");
            self.swapchain_stale = true;
        }
        Ok(())
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain
            .as_ref()
            .map(Swapchain::extent)
            .unwrap_or_default()
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!(
                "Failed to wait for device idle during renderer drop: {:?}",
                e
            );
        }
        info!("Renderer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lantern_resources::Mesh;

    #[test]
    fn test_normalizing_transform_fits_two_units() {
        let mut cube = Mesh::cube();
        for p in &mut cube.positions {
            *p = *p * 10.0 + Vec3::new(5.0, 0.0, 0.0);
        }
        let model = Model::from_meshes(vec![cube]).unwrap();
        let transform = normalizing_transform(&model);

        let min = transform.transform_point3(model.bounds.min);
        let max = transform.transform_point3(model.bounds.max);
        assert!((min - Vec3::splat(-1.0)).length() < 1e-5);
        assert!((max - Vec3::splat(1.0)).length() < 1e-5);
    }
}

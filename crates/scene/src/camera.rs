//! Perspective camera and an orbit controller.

use glam::{Mat4, Quat, Vec3};

/// A perspective camera.
#[derive(Clone, Debug)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,
    /// Camera rotation
    pub rotation: Quat,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Width over height
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            rotation: Quat::IDENTITY,
            fov_y: 45.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    /// Create a new camera with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the aspect ratio from a viewport size. Zero-sized viewports
    /// leave it unchanged.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    /// Get the view matrix.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), self.up())
    }

    /// Get the projection matrix (with Vulkan Y-flip, depth 0..1).
    pub fn projection_matrix(&self) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
        // Flip Y for Vulkan coordinate system
        proj.y_axis.y *= -1.0;
        proj
    }

    /// Get the view-projection matrix.
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// Turn to face `target`, keeping world +Y up.
    pub fn look_at(&mut self, target: Vec3) {
        let Some(forward) = (target - self.position).try_normalize() else {
            return;
        };
        let right = forward.cross(Vec3::Y).try_normalize().unwrap_or(Vec3::X);
        let up = right.cross(forward);
        self.rotation = Quat::from_mat3(&glam::Mat3::from_cols(right, up, -forward));
    }
}

/// Orbits a camera around a target point.
///
/// Yaw turns around world +Y, pitch is clamped short of the poles.
#[derive(Clone, Debug)]
pub struct OrbitController {
    pub target: Vec3,
    pub distance: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub min_distance: f32,
}

impl Default for OrbitController {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 5.0,
            yaw: 0.0,
            pitch: 0.3,
            min_distance: 0.05,
        }
    }
}

impl OrbitController {
    const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

    pub fn new(target: Vec3, distance: f32) -> Self {
        Self {
            target,
            distance,
            ..Default::default()
        }
    }

    /// Centers on a bounding sphere so the whole of it fits a vertical
    /// field of view of `fov_y`.
    pub fn frame_sphere(&mut self, center: Vec3, radius: f32, fov_y: f32) {
        self.target = center;
        let half = (fov_y * 0.5).max(0.01);
        self.distance = (radius.max(self.min_distance) / half.sin()).max(self.min_distance);
    }

    /// Rotates by the given angles in radians.
    pub fn orbit(&mut self, delta_yaw: f32, delta_pitch: f32) {
        self.yaw = (self.yaw + delta_yaw).rem_euclid(std::f32::consts::TAU);
        self.pitch = (self.pitch + delta_pitch).clamp(-Self::PITCH_LIMIT, Self::PITCH_LIMIT);
    }

    /// Scales the distance; `factor < 1` moves closer.
    pub fn zoom(&mut self, factor: f32) {
        if factor > 0.0 {
            self.distance = (self.distance * factor).max(self.min_distance);
        }
    }

    /// Camera position for the current angles.
    pub fn eye(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        let offset = Vec3::new(sin_yaw * cos_pitch, sin_pitch, cos_yaw * cos_pitch);
        self.target + offset * self.distance
    }

    /// Moves `camera` to the orbit position looking at the target.
    pub fn apply(&self, camera: &mut Camera) {
        camera.position = self.eye();
        camera.look_at(self.target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn test_projection_flips_y() {
        let camera = Camera::default();
        let proj = camera.projection_matrix();
        assert!(proj.y_axis.y < 0.0);

        // A point above the view axis lands in negative clip-space Y.
        let clip = camera.view_projection_matrix() * glam::Vec4::new(0.0, 1.0, 0.0, 1.0);
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn test_depth_range_is_zero_to_one() {
        let camera = Camera::default();
        let proj = camera.projection_matrix();
        let near = proj * glam::Vec4::new(0.0, 0.0, -camera.near, 1.0);
        let far = proj * glam::Vec4::new(0.0, 0.0, -camera.far, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_look_at() {
        let mut camera = Camera::new();
        camera.position = Vec3::new(0.0, 0.0, 5.0);
        camera.look_at(Vec3::new(5.0, 0.0, 5.0));
        assert!(approx(camera.forward(), Vec3::X));
        assert!(approx(camera.up(), Vec3::Y));

        // Degenerate target is ignored
        let before = camera.rotation;
        camera.look_at(camera.position);
        assert_eq!(camera.rotation, before);
    }

    #[test]
    fn test_set_viewport_ignores_zero() {
        let mut camera = Camera::new();
        camera.set_viewport(800, 400);
        assert_eq!(camera.aspect, 2.0);
        camera.set_viewport(0, 400);
        assert_eq!(camera.aspect, 2.0);
    }

    #[test]
    fn test_orbit_keeps_distance_and_faces_target() {
        let mut orbit = OrbitController::new(Vec3::new(1.0, 2.0, 3.0), 4.0);
        orbit.orbit(1.0, 0.5);

        let mut camera = Camera::new();
        orbit.apply(&mut camera);
        assert!(((camera.position - orbit.target).length() - 4.0).abs() < 1e-4);
        let to_target = (orbit.target - camera.position).normalize();
        assert!(approx(camera.forward(), to_target));
    }

    #[test]
    fn test_orbit_clamps_pitch_and_zoom() {
        let mut orbit = OrbitController::default();
        orbit.orbit(0.0, 10.0);
        assert!(orbit.pitch < std::f32::consts::FRAC_PI_2);
        orbit.zoom(0.0);
        assert_eq!(orbit.distance, 5.0);
        orbit.zoom(1e-6);
        assert_eq!(orbit.distance, orbit.min_distance);
    }

    #[test]
    fn test_frame_sphere() {
        let mut orbit = OrbitController::default();
        orbit.frame_sphere(Vec3::ONE, 1.0, std::f32::consts::FRAC_PI_2);
        assert_eq!(orbit.target, Vec3::ONE);
        assert!((orbit.distance - std::f32::consts::SQRT_2).abs() < 1e-4);
    }
}

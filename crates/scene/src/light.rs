//! Light definitions for the scene.

use glam::Vec3;

/// A directional light (sun-like) plus a flat ambient term.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels in. Not required to be normalized.
    pub direction: Vec3,
    /// Light color
    pub color: Vec3,
    /// Light intensity
    pub intensity: f32,
    /// Ambient color added to every lit pixel
    pub ambient: Vec3,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.4, -1.0, -0.3),
            color: Vec3::ONE,
            intensity: 3.0,
            ambient: Vec3::splat(0.03),
        }
    }
}

impl DirectionalLight {
    /// Unit vector from a surface towards the light.
    pub fn to_light(&self) -> Vec3 {
        (-self.direction).try_normalize().unwrap_or(Vec3::Y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_light_is_normalized_and_reversed() {
        let light = DirectionalLight {
            direction: Vec3::new(0.0, -2.0, 0.0),
            ..Default::default()
        };
        assert_eq!(light.to_light(), Vec3::Y);
    }

    #[test]
    fn test_to_light_zero_direction() {
        let light = DirectionalLight {
            direction: Vec3::ZERO,
            ..Default::default()
        };
        assert_eq!(light.to_light(), Vec3::Y);
    }
}

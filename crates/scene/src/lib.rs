//! Scene parameters.
//!
//! There is no scene graph: the application owns a [`Camera`] and a
//! [`DirectionalLight`] and hands their values to the renderer each frame.

pub mod camera;
pub mod light;

pub use camera::{Camera, OrbitController};
pub use light::DirectionalLight;

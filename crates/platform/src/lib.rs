//! Platform layer.
//!
//! A winit window plus the Vulkan surface created from its raw handles.

mod window;

pub use window::{Surface, Window, required_extensions};

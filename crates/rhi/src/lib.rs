//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides a safe abstraction over Vulkan 1.3 using the `ash` crate.
//! It handles:
//! - Instance, physical device selection and device creation
//! - Swapchain management and present classification
//! - Command buffer recording and blocking immediate submission
//! - Buffer, staged buffer and image management with layout tracking
//! - Descriptor layouts, pools and writes
//! - Shader objects (`VK_EXT_shader_object`)
//! - Synchronization primitives

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod immediate;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod rendering;
pub mod sampler;
pub mod shader;
pub mod staged_buffer;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;

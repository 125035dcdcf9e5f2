//! Deferred rendering on top of `lantern_rhi`.
//!
//! - [`frame_buffer`]: the frame ring, per-frame sync and presentation
//! - [`render_target`] and [`gbuffer`]: persistent offscreen targets
//! - [`geometry_pass`], [`lighting_pass`], [`post_process`]: the passes
//! - [`ui`]: the composite boundary in front of presentation
//! - [`deferred`]: per-frame pass sequencing
//! - [`renderer`]: owns everything for one window

pub mod deferred;
pub mod frame_buffer;
pub mod gbuffer;
pub mod geometry_pass;
pub mod lighting_pass;
pub mod mesh;
pub mod post_process;
pub mod push_constants;
pub mod render_target;
pub mod renderer;
pub mod ui;

pub use deferred::{DeferredRenderer, FrameInputs};
pub use frame_buffer::{FrameBuffer, PresentStatus};
pub use mesh::GpuMesh;
pub use renderer::Renderer;
pub use ui::{CompositeLayer, UiLayer};

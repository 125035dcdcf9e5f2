//! Asset import.
//!
//! This crate turns glTF files into CPU-side mesh data:
//! positions, normals, the first UV set and 32-bit indices, plus the model's
//! bounding box. Uploading to the GPU happens in the renderer.

pub mod error;
pub mod model;

pub use error::{ResourceError, ResourceResult};
pub use model::{Aabb, Mesh, Model};

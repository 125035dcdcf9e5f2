//! Import errors.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResourceError {
    /// The glTF importer rejected the document or its buffers.
    #[error("Cannot import glTF '{path}': {message}")]
    GltfLoad { path: PathBuf, message: String },

    /// Every primitive was skipped or empty.
    #[error("'{0}' has no triangle meshes")]
    NoMeshes(PathBuf),

    #[error("Mesh '{0}' has a primitive without positions")]
    NoPositionData(String),

    /// An index refers past the end of the vertex data.
    #[error("Mesh '{mesh}': index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        mesh: String,
        index: u32,
        vertex_count: usize,
    },

    #[error("No such file: {0}")]
    FileNotFound(PathBuf),
}

pub type ResourceResult<T> = Result<T, ResourceError>;

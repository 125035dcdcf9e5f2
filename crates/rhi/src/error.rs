//! RHI-specific error types.

use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// The best candidate GPU lacks required capabilities
    #[error("GPU is missing required capabilities: {}", .0.join(", "))]
    MissingCapabilities(Vec<&'static str>),

    /// Shader loading or creation error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid handle or argument
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// A bounded wait expired
    #[error("Timed out waiting for {what}")]
    Timeout { what: &'static str },

    /// Staged bytes would exceed a fixed-capacity buffer
    #[error("Staging overflow: {requested} bytes requested, capacity is {capacity}")]
    StagingOverflow { requested: u64, capacity: u64 },

    /// An object was used in a state that does not allow the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

impl RhiError {
    /// Maps a Vulkan `TIMEOUT` result to [`RhiError::Timeout`].
    pub(crate) fn from_wait(result: ash::vk::Result, what: &'static str) -> Self {
        if result == ash::vk::Result::TIMEOUT {
            RhiError::Timeout { what }
        } else {
            RhiError::VulkanError(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn test_wait_timeout_is_distinguished() {
        assert!(matches!(
            RhiError::from_wait(vk::Result::TIMEOUT, "render fence"),
            RhiError::Timeout {
                what: "render fence"
            }
        ));
        assert!(matches!(
            RhiError::from_wait(vk::Result::ERROR_DEVICE_LOST, "render fence"),
            RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST)
        ));
    }

    #[test]
    fn test_missing_capabilities_message() {
        let err = RhiError::MissingCapabilities(vec!["synchronization2", "shaderObject"]);
        assert_eq!(
            err.to_string(),
            "GPU is missing required capabilities: synchronization2, shaderObject"
        );
    }
}

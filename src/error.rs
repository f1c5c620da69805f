// Renderer error types
//
// Lower layers return descriptive errors; only the top-level driver decides
// between abort and retry, using `RenderError::kind()`.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification used by callers to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Initialization cannot proceed (no GPU, missing feature, failed creation).
    FatalSetup,
    /// The device or a queue operation failed mid-run.
    FatalRuntime,
    /// The swapchain no longer matches the surface; rebuild it and carry on.
    SwapchainStale,
    /// A single asset load failed; the renderer itself is still usable.
    Asset,
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),

    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("Allocator error: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("No suitable GPU found")]
    NoSuitableGpu,

    #[error("Required extension not supported: {0}")]
    MissingExtension(String),

    #[error("No supported format among candidates: {0}")]
    UnsupportedFormat(String),

    #[error("Shader '{path}': {reason}")]
    Shader { path: PathBuf, reason: String },

    #[error("Asset '{path}': {reason}")]
    Asset { path: PathBuf, reason: String },

    #[error("Texture limit reached ({max} descriptor sets)")]
    TextureLimit { max: u32 },

    #[error("Swapchain is out of date or suboptimal")]
    SwapchainStale,

    #[error("Device lost")]
    DeviceLost,

    #[error("Transfer did not complete within {timeout_ms} ms")]
    TransferTimeout { timeout_ms: u64 },

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<vk::Result> for RenderError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
            vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR => {
                RenderError::SwapchainStale
            }
            other => RenderError::Vulkan(other),
        }
    }
}

impl RenderError {
    pub fn asset(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        RenderError::Asset {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RenderError::SwapchainStale => ErrorKind::SwapchainStale,
            RenderError::Asset { .. } => ErrorKind::Asset,
            RenderError::DeviceLost
            | RenderError::TransferTimeout { .. }
            | RenderError::Vulkan(_)
            | RenderError::InvalidHandle(_) => ErrorKind::FatalRuntime,
            RenderError::Loading(_)
            | RenderError::Allocation(_)
            | RenderError::NoSuitableGpu
            | RenderError::MissingExtension(_)
            | RenderError::UnsupportedFormat(_)
            | RenderError::Shader { .. }
            | RenderError::TextureLimit { .. }
            | RenderError::Config(_) => ErrorKind::FatalSetup,
        }
    }
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_is_recoverable() {
        let err: RenderError = vk::Result::ERROR_OUT_OF_DATE_KHR.into();
        assert_eq!(err.kind(), ErrorKind::SwapchainStale);
    }

    #[test]
    fn device_lost_is_fatal_runtime() {
        let err: RenderError = vk::Result::ERROR_DEVICE_LOST.into();
        assert!(matches!(err, RenderError::DeviceLost));
        assert_eq!(err.kind(), ErrorKind::FatalRuntime);
    }

    #[test]
    fn other_vulkan_results_pass_through() {
        let err: RenderError = vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.into();
        assert!(matches!(
            err,
            RenderError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
        ));
    }

    #[test]
    fn asset_errors_name_the_path() {
        let err = RenderError::asset("Textures/missing.png", "file not found");
        assert_eq!(err.kind(), ErrorKind::Asset);
        assert!(err.to_string().contains("Textures/missing.png"));
    }

    #[test]
    fn texture_limit_is_a_setup_error() {
        let err = RenderError::TextureLimit { max: 20 };
        assert_eq!(err.kind(), ErrorKind::FatalSetup);
    }
}

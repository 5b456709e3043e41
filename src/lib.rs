pub mod bench;
pub mod config;
pub mod reporter;
pub mod results;
pub mod tui;
pub mod vulkan;

use thiserror::Error;
use vulkan::{vk, NativeApiError, RecorderError};

#[derive(Error, Debug)]
pub enum BenchmarkError {
    #[error("No GPU device found")]
    NoDevice,

    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("Vulkan loader unavailable: {0}")]
    Loader(String),

    #[error("Shader loading failed: {0}")]
    ShaderLoad(String),

    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    #[error("Buffer creation failed: {0}")]
    BufferCreation(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error(transparent)]
    Vulkan(#[from] NativeApiError),

    #[error("Recording failed: {0}")]
    Recording(#[from] RecorderError),

    #[error("Invalid config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<vk::Result> for BenchmarkError {
    fn from(result: vk::Result) -> Self {
        BenchmarkError::Vulkan(NativeApiError::new(result))
    }
}

/// Where recorded command buffers get executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Vulkan,
    Simulated,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Vulkan => "Vulkan",
            Backend::Simulated => "Simulated",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Backend::Vulkan => "System Vulkan driver, timed with GPU timestamp queries",
            Backend::Simulated => "Software device replaying the recorded commands (no GPU)",
        }
    }

    /// Returns true if this backend can run user-supplied SPIR-V kernels
    pub fn runs_shaders(&self) -> bool {
        matches!(self, Backend::Vulkan)
    }

    pub fn is_available(&self) -> bool {
        match self {
            Backend::Vulkan => cfg!(feature = "loaded"),
            Backend::Simulated => true,
        }
    }

    pub fn from_name(name: &str) -> Option<Backend> {
        Self::all()
            .into_iter()
            .find(|b| b.name().eq_ignore_ascii_case(name))
    }

    pub fn all() -> Vec<Backend> {
        vec![Backend::Vulkan, Backend::Simulated]
    }

    pub fn available() -> Vec<Backend> {
        Self::all()
            .into_iter()
            .filter(|b| b.is_available())
            .collect()
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_round_trip() {
        assert_eq!(Backend::from_name("vulkan"), Some(Backend::Vulkan));
        assert_eq!(Backend::from_name("SIMULATED"), Some(Backend::Simulated));
        assert_eq!(Backend::from_name("metal"), None);
    }

    #[test]
    fn simulated_is_always_available() {
        assert!(Backend::available().contains(&Backend::Simulated));
    }

    #[test]
    fn native_errors_convert() {
        let err = BenchmarkError::from(vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(err, BenchmarkError::Vulkan(e) if e.result == vk::Result::ERROR_DEVICE_LOST));
    }
}
